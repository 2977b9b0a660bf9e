use anyhow::{Result, bail};

use super::{Inference, InferenceRequest, Oracles, pass_through_group};
use crate::descriptor::{CLASS, JvmType, OBJECT, method_type};
use crate::hierarchy::{HierarchyResolver, MemberKind};
use crate::ir::{CallSite, FieldRef, Instruction, InstructionKind, Method};
use crate::opcodes;
use crate::selector::{MemberDescriptor, MemberSelector, Selector};
use crate::signature::{MethodSignature, Parameter, ParameterGroup};

/// Opcode families a redirect can target.
#[derive(Clone, Debug, Eq, PartialEq)]
pub(crate) enum RedirectTarget<'a> {
    FieldGet { field: &'a FieldRef, is_static: bool },
    FieldPut { field: &'a FieldRef, is_static: bool },
    MethodCall { call: &'a CallSite, is_static: bool },
    ArrayLength,
    ArrayLoad { opcode: u8 },
    ArrayStore { opcode: u8 },
    Constructor { class: &'a str },
    InstanceOf,
}

impl<'a> RedirectTarget<'a> {
    /// Classify an instruction; errors for opcodes no redirect accepts.
    pub(crate) fn classify(instruction: &'a Instruction) -> Result<Self> {
        let opcode = instruction.opcode;
        let target = match (&instruction.kind, opcode) {
            (InstructionKind::Field(field), opcodes::GETFIELD | opcodes::GETSTATIC) => {
                RedirectTarget::FieldGet {
                    field,
                    is_static: opcode == opcodes::GETSTATIC,
                }
            }
            (InstructionKind::Field(field), _) => RedirectTarget::FieldPut {
                field,
                is_static: opcode == opcodes::PUTSTATIC,
            },
            (InstructionKind::Invoke(call), _) => {
                if call.name == "<init>" {
                    bail!("constructor calls are redirected through their NEW instruction");
                }
                RedirectTarget::MethodCall {
                    call,
                    is_static: opcode == opcodes::INVOKESTATIC,
                }
            }
            (InstructionKind::Type(class), opcodes::NEW) => RedirectTarget::Constructor { class },
            (_, opcodes::INSTANCEOF) => RedirectTarget::InstanceOf,
            (_, opcodes::ARRAYLENGTH) => RedirectTarget::ArrayLength,
            (_, opcodes::IALOAD..=opcodes::SALOAD) => RedirectTarget::ArrayLoad { opcode },
            (_, opcodes::IASTORE..=opcodes::SASTORE) => RedirectTarget::ArrayStore { opcode },
            _ => bail!(
                "opcode 0x{opcode:02x} at offset {} cannot be redirected",
                instruction.offset
            ),
        };
        Ok(target)
    }

    /// Whether two sites can share one handler.
    fn agrees_with(&self, other: &RedirectTarget<'_>) -> bool {
        match (self, other) {
            (
                RedirectTarget::FieldGet { field, is_static },
                RedirectTarget::FieldGet {
                    field: other_field,
                    is_static: other_static,
                },
            )
            | (
                RedirectTarget::FieldPut { field, is_static },
                RedirectTarget::FieldPut {
                    field: other_field,
                    is_static: other_static,
                },
            ) => {
                is_static == other_static
                    && field.name == other_field.name
                    && field.descriptor == other_field.descriptor
            }
            (
                RedirectTarget::MethodCall { call, is_static },
                RedirectTarget::MethodCall {
                    call: other_call,
                    is_static: other_static,
                },
            ) => {
                is_static == other_static
                    && call.name == other_call.name
                    && call.descriptor == other_call.descriptor
            }
            (
                RedirectTarget::ArrayLoad { opcode },
                RedirectTarget::ArrayLoad {
                    opcode: other_opcode,
                },
            )
            | (
                RedirectTarget::ArrayStore { opcode },
                RedirectTarget::ArrayStore {
                    opcode: other_opcode,
                },
            ) => opcode == other_opcode,
            (
                RedirectTarget::Constructor { class },
                RedirectTarget::Constructor { class: other },
            ) => {
                class == other
            }
            (RedirectTarget::ArrayLength, RedirectTarget::ArrayLength)
            | (RedirectTarget::InstanceOf, RedirectTarget::InstanceOf) => true,
            _ => false,
        }
    }
}

pub(super) fn infer(request: &InferenceRequest<'_>, oracles: Oracles<'_>) -> Result<Inference> {
    let instructions = request.instructions()?;
    let mut targets = Vec::with_capacity(instructions.len());
    for instruction in &instructions {
        targets.push(RedirectTarget::classify(instruction)?);
    }
    let Some(first) = targets.first() else {
        return Ok(Inference::NoInstructions);
    };
    if let Some(other) = targets.iter().find(|target| !first.agrees_with(target)) {
        return Ok(Inference::Inconsistent(format!(
            "matched instructions disagree: {first:?} and {other:?}"
        )));
    }

    let method = request.method;
    let signatures = match first {
        RedirectTarget::FieldGet { field, is_static } => {
            let mut parameters = Vec::new();
            if !is_static {
                parameters.push(Parameter::new("instance", JvmType::object(&field.owner)));
            }
            vec![with_pass_through(
                parameters,
                JvmType::from_descriptor(&field.descriptor)?,
                method,
            )?]
        }
        RedirectTarget::FieldPut { field, is_static } => {
            let mut parameters = Vec::new();
            if !is_static {
                parameters.push(Parameter::new("instance", JvmType::object(&field.owner)));
            }
            parameters.push(Parameter::new("value", JvmType::from_descriptor(&field.descriptor)?));
            vec![with_pass_through(parameters, JvmType::Void, method)?]
        }
        RedirectTarget::MethodCall { call, is_static } => {
            let ty = method_type(&call.descriptor)?;
            let mut parameters = Vec::new();
            if !is_static {
                parameters.push(Parameter::new("instance", JvmType::object(&call.owner)));
            }
            let names = callee_parameter_names(oracles, call, *is_static, ty.parameters.len());
            parameters.extend(
                names
                    .into_iter()
                    .zip(ty.parameters)
                    .map(|(name, parameter)| Parameter::new(name, parameter)),
            );
            vec![with_pass_through(parameters, ty.return_type, method)?]
        }
        RedirectTarget::ArrayLength => {
            let array = match array_type(request, oracles, 0, None) {
                Ok(array) => array,
                Err(inference) => return Ok(inference),
            };
            vec![with_pass_through(
                vec![Parameter::new("array", array)],
                JvmType::Int,
                method,
            )?]
        }
        RedirectTarget::ArrayLoad { opcode } => {
            let array = match array_type(request, oracles, 1, Some(*opcode)) {
                Ok(array) => array,
                Err(inference) => return Ok(inference),
            };
            let element = array.element_type().cloned().unwrap_or(JvmType::object(OBJECT));
            vec![with_pass_through(
                vec![
                    Parameter::new("array", array),
                    Parameter::new("index", JvmType::Int),
                ],
                element,
                method,
            )?]
        }
        RedirectTarget::ArrayStore { opcode } => {
            let array = match array_type(request, oracles, 2, Some(*opcode)) {
                Ok(array) => array,
                Err(inference) => return Ok(inference),
            };
            let element = array.element_type().cloned().unwrap_or(JvmType::object(OBJECT));
            vec![with_pass_through(
                vec![
                    Parameter::new("array", array),
                    Parameter::new("index", JvmType::Int),
                    Parameter::new("value", element),
                ],
                JvmType::Void,
                method,
            )?]
        }
        RedirectTarget::Constructor { class } => {
            let mut descriptors: Vec<&str> = request
                .sites
                .iter()
                .filter_map(|site| paired_constructor(method, site.index, class))
                .map(|call| call.descriptor.as_str())
                .collect();
            descriptors.sort_unstable();
            descriptors.dedup();
            match descriptors.as_slice() {
                [] => {
                    return Ok(Inference::Unavailable(format!(
                        "no constructor call paired with NEW {class}"
                    )));
                }
                [descriptor] => {
                    let ty = method_type(descriptor)?;
                    let parameters = ty
                        .parameters
                        .into_iter()
                        .enumerate()
                        .map(|(index, parameter)| Parameter::new(format!("arg{index}"), parameter))
                        .collect();
                    vec![with_pass_through(parameters, JvmType::object(class), method)?]
                }
                _ => {
                    return Ok(Inference::Inconsistent(format!(
                        "NEW {class} sites call different constructors: {}",
                        descriptors.join(", ")
                    )));
                }
            }
        }
        RedirectTarget::InstanceOf => {
            let parameters = vec![
                Parameter::new("instance", JvmType::object(OBJECT)),
                Parameter::new("type", JvmType::object(CLASS)),
            ];
            vec![
                with_pass_through(parameters.clone(), JvmType::Boolean, method)?,
                with_pass_through(parameters, JvmType::object(CLASS), method)?,
            ]
        }
    };
    Ok(Inference::from_signatures(signatures, "no signature"))
}

fn with_pass_through(
    parameters: Vec<Parameter>,
    return_type: JvmType,
    method: &Method,
) -> Result<MethodSignature> {
    Ok(MethodSignature::new(
        vec![ParameterGroup::required(parameters), pass_through_group(method)?],
        return_type,
    ))
}

/// Callee parameter names from its local variable table when the callee is
/// loadable, else `arg0, arg1, ...`. The callee may be inherited by the
/// call's owner.
fn callee_parameter_names(
    oracles: Oracles<'_>,
    call: &CallSite,
    is_static: bool,
    count: usize,
) -> Vec<String> {
    let selector = Selector::Member(MemberSelector::exact(
        &call.owner,
        &call.name,
        MemberDescriptor::Method(call.descriptor.clone()),
    ));
    let callee = oracles.classes.load_class(&call.owner).and_then(|owner| {
        HierarchyResolver::default()
            .first(oracles.classes, &selector, &[owner], MemberKind::Method)
            .into_iter()
            .find_map(|found| found.member.method())
    });
    let positional = |index: usize| format!("arg{index}");
    let Some(callee) = callee else {
        return (0..count).map(positional).collect();
    };
    let Ok(ty) = method_type(&callee.descriptor) else {
        return (0..count).map(positional).collect();
    };
    let mut slot: u16 = if is_static { 0 } else { 1 };
    ty.parameters
        .iter()
        .enumerate()
        .map(|(index, parameter)| {
            let name = callee
                .local_variables
                .iter()
                .find(|local| local.index == slot && local.start_pc == 0)
                .map(|local| local.name.clone())
                .unwrap_or_else(|| positional(index));
            slot += parameter.slot_size();
            name
        })
        .collect()
}

/// Array operand type at every site, which must agree. Primitive opcodes
/// other than `BALOAD`/`BASTORE` determine the type when data flow cannot.
fn array_type(
    request: &InferenceRequest<'_>,
    oracles: Oracles<'_>,
    depth: usize,
    opcode: Option<u8>,
) -> std::result::Result<JvmType, Inference> {
    let mut found: Option<JvmType> = None;
    for site in request.sites {
        let ty = oracles
            .stack
            .stack_type(request.class, request.method, site.index, depth)
            .filter(JvmType::is_array)
            .or_else(|| opcode.and_then(array_of_opcode));
        let Some(ty) = ty else {
            return Err(Inference::Unavailable(format!(
                "array type at instruction {} cannot be determined",
                site.index
            )));
        };
        match &found {
            Some(existing) if *existing != ty => {
                return Err(Inference::Inconsistent(format!(
                    "array types disagree: {existing} and {ty}"
                )));
            }
            Some(_) => {}
            None => found = Some(ty),
        }
    }
    found.ok_or(Inference::NoInstructions)
}

fn array_of_opcode(opcode: u8) -> Option<JvmType> {
    let element = match opcode {
        opcodes::IALOAD | opcodes::IASTORE => JvmType::Int,
        opcodes::LALOAD | opcodes::LASTORE => JvmType::Long,
        opcodes::FALOAD | opcodes::FASTORE => JvmType::Float,
        opcodes::DALOAD | opcodes::DASTORE => JvmType::Double,
        opcodes::CALOAD | opcodes::CASTORE => JvmType::Char,
        opcodes::SALOAD | opcodes::SASTORE => JvmType::Short,
        _ => return None,
    };
    Some(JvmType::array_of(element))
}

/// The `INVOKESPECIAL <init>` consuming the object created by the `NEW` at
/// `index`, skipping constructions nested in its arguments. Argument code may
/// branch (`flag ? 1 : 2`), so the scan runs past jumps and stops only where
/// the method exits.
fn paired_constructor<'a>(method: &'a Method, index: usize, class: &str) -> Option<&'a CallSite> {
    let mut nested = 0usize;
    for instruction in method.instructions.iter().skip(index + 1) {
        match &instruction.kind {
            InstructionKind::Type(_) if instruction.opcode == opcodes::NEW => nested += 1,
            InstructionKind::Invoke(call)
                if instruction.opcode == opcodes::INVOKESPECIAL && call.name == "<init>" =>
            {
                if nested == 0 {
                    return (call.owner == class).then_some(call);
                }
                nested -= 1;
            }
            _ => {}
        }
        if opcodes::is_return(instruction.opcode) || instruction.opcode == opcodes::ATHROW {
            return None;
        }
    }
    None
}
