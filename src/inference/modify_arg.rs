use anyhow::{Result, bail};

use super::{ARGS, Inference, InferenceRequest, pass_through_group, value_signature};
use crate::descriptor::{JvmType, method_type};
use crate::ir::{CallSite, InstructionKind};
use crate::signature::{MethodSignature, Parameter, ParameterGroup};

/// Argument types of every matched call, one list per site.
fn call_arguments(request: &InferenceRequest<'_>) -> Result<Vec<Vec<JvmType>>> {
    request
        .instructions()?
        .into_iter()
        .map(|instruction| match &instruction.kind {
            InstructionKind::Invoke(CallSite { descriptor, .. })
            | InstructionKind::InvokeDynamic { descriptor, .. } => {
                Ok(method_type(descriptor)?.parameters)
            }
            _ => bail!(
                "argument modification needs a call, found opcode 0x{:02x} at offset {}",
                instruction.opcode,
                instruction.offset
            ),
        })
        .collect()
}

/// `ModifyArg`: one argument of the matched calls.
pub(super) fn infer_single(request: &InferenceRequest<'_>) -> Result<Inference> {
    let arguments = call_arguments(request)?;
    match request.annotation.index {
        Some(index) => by_index(request, &arguments, usize::from(index)),
        None => by_type(request, &arguments),
    }
}

fn by_index(
    request: &InferenceRequest<'_>,
    arguments: &[Vec<JvmType>],
    index: usize,
) -> Result<Inference> {
    let mut found: Option<&JvmType> = None;
    for site in arguments {
        let Some(ty) = site.get(index) else {
            return Ok(Inference::Inconsistent(format!(
                "argument index {index} out of range for a call with {} arguments",
                site.len()
            )));
        };
        match found {
            Some(existing) if existing != ty => {
                return Ok(Inference::Inconsistent(format!(
                    "argument {index} is {existing} at one site and {ty} at another"
                )));
            }
            Some(_) => {}
            None => found = Some(ty),
        }
    }
    let Some(ty) = found else {
        return Ok(Inference::NoInstructions);
    };
    Ok(Inference::Signatures(vec![value_signature(
        ty.clone(),
        request.method,
    )?]))
}

/// Without an index the argument is picked by type: only types occurring
/// exactly once in every matched call qualify. When every call shares one
/// argument list, each candidate may also be modified from a handler taking
/// that whole list.
fn by_type(request: &InferenceRequest<'_>, arguments: &[Vec<JvmType>]) -> Result<Inference> {
    let mut sites = arguments.iter().map(|site| unique_types(site));
    let Some(mut candidates) = sites.next() else {
        return Ok(Inference::NoInstructions);
    };
    for site in sites {
        candidates.retain(|ty| site.contains(ty));
    }

    let mut signatures = Vec::with_capacity(candidates.len() * 2);
    for ty in &candidates {
        signatures.push(value_signature(ty.clone(), request.method)?);
    }
    if let Some((first, rest)) = arguments.split_first()
        && rest.iter().all(|site| site == first)
        && first.len() > 1
    {
        let whole: Vec<Parameter> = first
            .iter()
            .enumerate()
            .map(|(position, ty)| Parameter::new(format!("arg{position}"), ty.clone()))
            .collect();
        for ty in candidates {
            signatures.push(MethodSignature::new(
                vec![
                    ParameterGroup::required(whole.clone()),
                    pass_through_group(request.method)?,
                ],
                ty,
            ));
        }
    }
    Ok(Inference::from_signatures(
        signatures,
        "no argument type is unique at every matched call",
    ))
}

/// Types occurring exactly once in `arguments`, in order.
fn unique_types(arguments: &[JvmType]) -> Vec<JvmType> {
    arguments
        .iter()
        .filter(|ty| arguments.iter().filter(|other| other == ty).count() == 1)
        .cloned()
        .collect()
}

/// `ModifyArgs`: the whole argument list through an `Args` bundle.
pub(super) fn infer_list(request: &InferenceRequest<'_>) -> Result<Inference> {
    call_arguments(request)?;
    Ok(Inference::Signatures(vec![MethodSignature::new(
        vec![
            ParameterGroup::required(vec![Parameter::new("args", JvmType::object(ARGS))]),
            pass_through_group(request.method)?,
        ],
        JvmType::Void,
    )]))
}
