use super::{Inference, InferenceRequest};
use crate::annotation::ConstantMatcher;
use crate::descriptor::JvmType;
use crate::signature::{MethodSignature, Parameter, ParameterGroup};

/// `ModifyConstant`: one signature per literal kind named by the matchers.
/// Without matchers the kind comes from the handler itself.
pub(super) fn infer(request: &InferenceRequest<'_>) -> Inference {
    let mut types: Vec<JvmType> = Vec::new();
    for ty in request
        .annotation
        .constants
        .iter()
        .flat_map(ConstantMatcher::literal_types)
    {
        if !types.contains(&ty) {
            types.push(ty);
        }
    }

    if types.is_empty() {
        let from_handler = request.handler.and_then(|handler| {
            handler
                .parameters
                .first()
                .cloned()
                .or_else(|| {
                    (handler.return_type != JvmType::Void).then(|| handler.return_type.clone())
                })
        });
        match from_handler {
            Some(ty) => types.push(ty),
            None => {
                return Inference::Unavailable(
                    "no constant matcher and no handler to take the constant type from".to_string(),
                );
            }
        }
    }

    Inference::Signatures(
        types
            .into_iter()
            .map(|ty| {
                MethodSignature::new(
                    vec![ParameterGroup::required(vec![Parameter::new(
                        "value",
                        ty.clone(),
                    )])],
                    ty,
                )
            })
            .collect(),
    )
}
