use anyhow::Result;

use super::locals::{capture_group, common_prefix, site_locals};
use super::{
    CALLBACK_INFO, CALLBACK_INFO_RETURNABLE, Inference, InferenceRequest, Oracles,
    target_parameters,
};
use crate::descriptor::{JvmType, method_type};
use crate::signature::{MethodSignature, Parameter, ParameterGroup};

/// `Inject`: target parameters, then the callback, then captured locals.
pub(super) fn infer(request: &InferenceRequest<'_>, oracles: Oracles<'_>) -> Result<Inference> {
    let returns_value = method_type(&request.method.descriptor)?.return_type != JvmType::Void;
    let callback = if returns_value {
        CALLBACK_INFO_RETURNABLE
    } else {
        CALLBACK_INFO
    };

    let mut groups = vec![
        ParameterGroup::optional(target_parameters(request.method)?),
        ParameterGroup::required(vec![Parameter::new("ci", JvmType::object(callback))]),
    ];

    let capture = request.annotation.locals;
    if capture.captures() {
        let Some(sites) = site_locals(request, oracles)? else {
            return Ok(Inference::Unavailable(format!(
                "{}.{} has no local variable table to capture from",
                request.class.name, request.method.name
            )));
        };
        groups.extend(capture_group(common_prefix(&sites)?, capture));
    }

    Ok(Inference::Signatures(vec![MethodSignature::new(
        groups,
        JvmType::Void,
    )]))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::annotation::{InjectorAnnotation, LocalCapture};
    use crate::inference::tests::{Fixture, annotation, sites};
    use crate::inference::{InjectorKind, infer as infer_kind};
    use crate::ir::{Method, build};
    use crate::opcodes;
    use crate::signature::RequiredLevel;

    fn method(descriptor: &str) -> Method {
        let mut method = build::method(
            "tick",
            descriptor,
            false,
            vec![
                build::plain(0, opcodes::ICONST_1),
                build::local(1, opcodes::ISTORE, 2),
                build::plain(3, opcodes::NOP),
                build::plain(4, opcodes::RETURN),
            ],
        );
        method.local_variables = vec![
            build::local_var(0, "this", "Lcom/example/World;", 0, 5),
            build::local_var(1, "delta", "F", 0, 5),
            build::local_var(2, "steps", "I", 3, 2),
        ];
        method
    }

    fn run(annotation: &InjectorAnnotation, method: &Method, indices: &[usize]) -> Inference {
        let fixture = Fixture::new(Vec::new());
        let class = build::class("com/example/World", None, &[], vec![method.clone()]);
        let sites = sites(indices);
        let request = InferenceRequest {
            annotation,
            class: &class,
            method,
            sites: &sites,
            handler: None,
        };
        infer_kind(InjectorKind::Inject, &request, fixture.oracles()).expect("inference")
    }

    #[test]
    fn void_targets_take_callback_info() {
        let signatures = run(&annotation("Inject"), &method("(F)V"), &[0]).into_signatures();

        assert_eq!(signatures.len(), 1);
        let signature = &signatures[0];
        assert_eq!(signature.groups.len(), 2);
        assert_eq!(
            signature.groups[0].parameters,
            vec![Parameter::new("delta", JvmType::Float)]
        );
        assert_eq!(signature.groups[0].required, RequiredLevel::Optional);
        assert_eq!(
            signature.groups[1].parameters[0].ty,
            JvmType::object(CALLBACK_INFO)
        );
        let ci = JvmType::object(CALLBACK_INFO);
        assert!(signature.matches(&[ci.clone()], &JvmType::Void).is_match());
        assert!(
            signature
                .matches(&[JvmType::Float, ci], &JvmType::Void)
                .is_match()
        );
    }

    #[test]
    fn value_returning_targets_take_returnable_callback() {
        let signatures = run(&annotation("Inject"), &method("(F)I"), &[0]).into_signatures();
        assert_eq!(
            signatures[0].groups[1].parameters[0].ty,
            JvmType::object(CALLBACK_INFO_RETURNABLE)
        );
    }

    #[test]
    fn captured_locals_follow_the_callback() {
        let annotation = InjectorAnnotation {
            locals: LocalCapture::CaptureFailhard,
            ..annotation("Inject")
        };

        let signatures = run(&annotation, &method("(F)V"), &[2]).into_signatures();

        let capture = &signatures[0].groups[2];
        assert_eq!(capture.parameters, vec![Parameter::new("steps", JvmType::Int)]);
        assert_eq!(capture.required, RequiredLevel::ErrorIfAbsent);
    }

    #[test]
    fn capture_without_a_local_variable_table_is_unavailable() {
        let annotation = InjectorAnnotation {
            locals: LocalCapture::CaptureFailsoft,
            ..annotation("Inject")
        };
        let mut bare = method("(F)V");
        bare.local_variables.clear();
        assert!(matches!(run(&annotation, &bare, &[2]), Inference::Unavailable(_)));
    }
}
