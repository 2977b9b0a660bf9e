use anyhow::{Context, Result};

use super::{Inference, InferenceRequest, Oracles, value_signature};
use crate::descriptor::JvmType;

/// `ModifyVariable`: the type comes from the explicit `type` attribute, the
/// local at slot `index` at every site, or the handler's first parameter.
pub(super) fn infer(request: &InferenceRequest<'_>, oracles: Oracles<'_>) -> Result<Inference> {
    let ty = if let Some(descriptor) = &request.annotation.value_type {
        JvmType::from_descriptor(descriptor)
            .with_context(|| format!("invalid variable type {descriptor}"))?
    } else if let Some(slot) = request.annotation.index {
        match local_type(request, oracles, slot)? {
            Ok(ty) => ty,
            Err(inference) => return Ok(inference),
        }
    } else if let Some(ty) = request
        .handler
        .and_then(|handler| handler.parameters.first())
    {
        ty.clone()
    } else {
        return Ok(Inference::Unavailable(
            "variable type is neither declared nor implied by the handler".to_string(),
        ));
    };
    Ok(Inference::Signatures(vec![value_signature(
        ty,
        request.method,
    )?]))
}

fn local_type(
    request: &InferenceRequest<'_>,
    oracles: Oracles<'_>,
    slot: u16,
) -> Result<std::result::Result<JvmType, Inference>> {
    let mut found: Option<String> = None;
    for site in request.sites {
        let local = oracles
            .locals
            .locals_at(request.method, site.index, false)
            .and_then(|locals| locals.into_iter().find(|local| local.index == slot));
        let Some(local) = local else {
            return Ok(Err(Inference::Unavailable(format!(
                "no local in slot {slot} at instruction {}",
                site.index
            ))));
        };
        match &found {
            Some(existing) if *existing != local.descriptor => {
                return Ok(Err(Inference::Inconsistent(format!(
                    "slot {slot} holds {existing} at one site and {} at another",
                    local.descriptor
                ))));
            }
            Some(_) => {}
            None => found = Some(local.descriptor),
        }
    }
    match found {
        Some(descriptor) => Ok(Ok(JvmType::from_descriptor(&descriptor)?)),
        None => Ok(Err(Inference::NoInstructions)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::annotation::InjectorAnnotation;
    use crate::descriptor::{MethodType, STRING};
    use crate::inference::tests::{Fixture, annotation, sites};
    use crate::inference::{InjectorKind, infer as infer_kind};
    use crate::ir::{Method, build};
    use crate::opcodes;
    use crate::signature::Parameter;

    fn method() -> Method {
        let mut method = build::method(
            "run",
            "(Ljava/lang/String;)V",
            true,
            vec![
                build::plain(0, opcodes::ICONST_0),
                build::local(1, opcodes::ISTORE, 1),
                build::plain(3, opcodes::LCONST_0),
                build::local(4, opcodes::LSTORE, 1),
                build::plain(6, opcodes::RETURN),
            ],
        );
        method.local_variables = vec![
            build::local_var(0, "name", "Ljava/lang/String;", 0, 7),
            build::local_var(1, "count", "I", 3, 1),
            build::local_var(1, "total", "J", 6, 1),
        ];
        method
    }

    fn run(
        annotation: &InjectorAnnotation,
        indices: &[usize],
        handler: Option<&MethodType>,
    ) -> Inference {
        let fixture = Fixture::new(Vec::new());
        let method = method();
        let class = build::class("com/example/ClassA", None, &[], vec![method.clone()]);
        let sites = sites(indices);
        let request = InferenceRequest {
            annotation,
            class: &class,
            method: &method,
            sites: &sites,
            handler,
        };
        infer_kind(InjectorKind::ModifyVariable, &request, fixture.oracles()).expect("inference")
    }

    fn slot(index: u16) -> InjectorAnnotation {
        InjectorAnnotation {
            index: Some(index),
            ..annotation("ModifyVariable")
        }
    }

    #[test]
    fn local_slot_determines_the_type() {
        let signatures = run(&slot(1), &[2], None).into_signatures();
        assert_eq!(signatures.len(), 1);
        assert_eq!(
            signatures[0].groups[0].parameters,
            vec![Parameter::new("value", JvmType::Int)]
        );
        assert_eq!(signatures[0].return_type, JvmType::Int);
        assert_eq!(
            signatures[0].groups[1].parameters,
            vec![Parameter::new("name", JvmType::object(STRING))]
        );
    }

    #[test]
    fn slot_reuse_with_other_types_is_inconsistent() {
        assert!(matches!(run(&slot(1), &[2, 4], None), Inference::Inconsistent(_)));
    }

    #[test]
    fn dead_slots_are_unavailable() {
        assert!(matches!(run(&slot(1), &[0], None), Inference::Unavailable(_)));
    }

    #[test]
    fn declared_type_wins() {
        let annotation = InjectorAnnotation {
            value_type: Some("D".to_string()),
            ..slot(1)
        };
        let signatures = run(&annotation, &[2, 4], None).into_signatures();
        assert_eq!(signatures[0].return_type, JvmType::Double);
    }

    #[test]
    fn handler_is_the_last_resort() {
        let handler = MethodType::new(vec![JvmType::Boolean], JvmType::Boolean);
        let signatures = run(&annotation("ModifyVariable"), &[0], Some(&handler)).into_signatures();
        assert_eq!(signatures[0].return_type, JvmType::Boolean);
        assert!(matches!(
            run(&annotation("ModifyVariable"), &[0], None),
            Inference::Unavailable(_)
        ));
    }
}
