use std::fmt;

use serde::Serialize;

use crate::descriptor::JvmType;

/// Handler parameter with an optional suggested name.
#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
pub(crate) struct Parameter {
    pub(crate) name: Option<String>,
    #[serde(rename = "type")]
    pub(crate) ty: JvmType,
}

impl Parameter {
    pub(crate) fn new(name: impl Into<String>, ty: JvmType) -> Self {
        Self {
            name: Some(name.into()),
            ty,
        }
    }
}

impl fmt::Display for Parameter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.name {
            Some(name) => write!(f, "{} {name}", self.ty),
            None => write!(f, "{}", self.ty),
        }
    }
}

/// How a group's absence is judged.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub(crate) enum RequiredLevel {
    Required,
    Optional,
    WarnIfAbsent,
    ErrorIfAbsent,
}

#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
pub(crate) struct ParameterGroup {
    pub(crate) parameters: Vec<Parameter>,
    pub(crate) required: RequiredLevel,
    /// A variadic group may be supplied as any prefix of its parameters.
    pub(crate) is_vararg: bool,
    pub(crate) is_default: bool,
}

impl ParameterGroup {
    /// The default group of an injector: always required, never variadic.
    pub(crate) fn required(parameters: Vec<Parameter>) -> Self {
        Self {
            parameters,
            required: RequiredLevel::Required,
            is_vararg: false,
            is_default: true,
        }
    }

    pub(crate) fn vararg(parameters: Vec<Parameter>, required: RequiredLevel) -> Self {
        Self {
            parameters,
            required,
            is_vararg: true,
            is_default: false,
        }
    }

    pub(crate) fn optional(parameters: Vec<Parameter>) -> Self {
        Self {
            parameters,
            required: RequiredLevel::Optional,
            is_vararg: false,
            is_default: false,
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.parameters.len()
    }
}

/// Expected handler shape: parameter groups in order plus a return type.
#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
pub(crate) struct MethodSignature {
    pub(crate) groups: Vec<ParameterGroup>,
    pub(crate) return_type: JvmType,
}

/// Result of checking a handler against a signature.
#[derive(Clone, Debug, Eq, PartialEq)]
pub(crate) enum MatchResult {
    Matches { warnings: Vec<String> },
    Mismatch { reason: String },
}

impl MatchResult {
    pub(crate) fn is_match(&self) -> bool {
        matches!(self, MatchResult::Matches { .. })
    }
}

impl MethodSignature {
    pub(crate) fn new(groups: Vec<ParameterGroup>, return_type: JvmType) -> Self {
        Self {
            groups,
            return_type,
        }
    }

    /// All parameters in declaration order, ignoring grouping.
    pub(crate) fn parameters(&self) -> impl Iterator<Item = &Parameter> {
        self.groups.iter().flat_map(|group| group.parameters.iter())
    }

    pub(crate) fn matches(&self, parameters: &[JvmType], return_type: &JvmType) -> MatchResult {
        if !type_matches(&self.return_type, return_type) {
            return MatchResult::Mismatch {
                reason: format!(
                    "return type {return_type} does not match expected {}",
                    self.return_type
                ),
            };
        }
        let mut warnings = Vec::new();
        if match_groups(&self.groups, parameters, &mut warnings) {
            MatchResult::Matches { warnings }
        } else {
            let actual: Vec<String> = parameters.iter().map(JvmType::java_name).collect();
            MatchResult::Mismatch {
                reason: format!("parameters ({}) do not match expected {self}", actual.join(", ")),
            }
        }
    }
}

/// Backtracking partition of `parameters` over `groups`.
fn match_groups(
    groups: &[ParameterGroup],
    parameters: &[JvmType],
    warnings: &mut Vec<String>,
) -> bool {
    let Some((group, rest)) = groups.split_first() else {
        return parameters.is_empty();
    };
    if group.parameters.is_empty() {
        return match_groups(rest, parameters, warnings);
    }

    let lengths: Vec<usize> = if group.is_vararg {
        (1..=group.len()).rev().collect()
    } else {
        vec![group.len()]
    };
    for length in lengths {
        if length > parameters.len() {
            continue;
        }
        let (head, tail) = parameters.split_at(length);
        let accepted = group
            .parameters
            .iter()
            .zip(head)
            .all(|(expected, actual)| type_matches(&expected.ty, actual));
        if !accepted {
            continue;
        }
        let mark = warnings.len();
        if match_groups(rest, tail, warnings) {
            return true;
        }
        warnings.truncate(mark);
    }

    match group.required {
        RequiredLevel::Required | RequiredLevel::ErrorIfAbsent => false,
        RequiredLevel::Optional => match_groups(rest, parameters, warnings),
        RequiredLevel::WarnIfAbsent => {
            let mark = warnings.len();
            let names: Vec<String> = group.parameters.iter().map(ToString::to_string).collect();
            warnings.push(format!("missing parameters ({})", names.join(", ")));
            if match_groups(rest, parameters, warnings) {
                true
            } else {
                warnings.truncate(mark);
                false
            }
        }
    }
}

/// Equal types match; a handler may widen any reference to `Object`.
fn type_matches(expected: &JvmType, actual: &JvmType) -> bool {
    expected == actual || (expected.is_reference() && actual.is_object())
}

impl fmt::Display for MethodSignature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut parts = Vec::new();
        for group in &self.groups {
            if group.parameters.is_empty() {
                continue;
            }
            let params: Vec<String> = group.parameters.iter().map(ToString::to_string).collect();
            let mut rendered = params.join(", ");
            if group.is_vararg {
                rendered.push_str(", ...");
            }
            if group.required == RequiredLevel::Required {
                parts.push(rendered);
            } else {
                parts.push(format!("[{rendered}]"));
            }
        }
        write!(f, "({}) -> {}", parts.join(", "), self.return_type)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn foo() -> JvmType {
        JvmType::object("com/example/Foo")
    }

    fn field_write() -> MethodSignature {
        MethodSignature::new(
            vec![
                ParameterGroup::required(vec![
                    Parameter::new("instance", foo()),
                    Parameter::new("value", JvmType::Int),
                ]),
                ParameterGroup::vararg(
                    vec![
                        Parameter::new("par1", JvmType::Long),
                        Parameter::new("par2", JvmType::object("java/lang/String")),
                    ],
                    RequiredLevel::Optional,
                ),
            ],
            JvmType::Void,
        )
    }

    #[test]
    fn required_group_must_be_present() {
        let signature = field_write();
        assert!(signature.matches(&[foo(), JvmType::Int], &JvmType::Void).is_match());
        assert!(!signature.matches(&[JvmType::Int], &JvmType::Void).is_match());
        assert!(!signature.matches(&[foo(), JvmType::Int], &JvmType::Int).is_match());
    }

    #[test]
    fn variadic_group_accepts_any_prefix() {
        let signature = field_write();
        let string = JvmType::object("java/lang/String");
        assert!(signature
            .matches(&[foo(), JvmType::Int, JvmType::Long], &JvmType::Void)
            .is_match());
        assert!(signature
            .matches(&[foo(), JvmType::Int, JvmType::Long, string.clone()], &JvmType::Void)
            .is_match());
        assert!(!signature
            .matches(&[foo(), JvmType::Int, string], &JvmType::Void)
            .is_match());
    }

    #[test]
    fn object_widens_reference_parameters() {
        let signature = field_write();
        let object = JvmType::object("java/lang/Object");
        assert!(signature.matches(&[object.clone(), JvmType::Int], &JvmType::Void).is_match());
        assert!(!signature.matches(&[foo(), object], &JvmType::Void).is_match());
    }

    #[test]
    fn absence_levels_decide_the_outcome() {
        let group = |required| {
            MethodSignature::new(
                vec![
                    ParameterGroup::required(vec![Parameter::new("value", JvmType::Int)]),
                    ParameterGroup::vararg(
                        vec![Parameter::new("local1", JvmType::Double)],
                        required,
                    ),
                ],
                JvmType::Void,
            )
        };
        assert_eq!(
            group(RequiredLevel::Optional).matches(&[JvmType::Int], &JvmType::Void),
            MatchResult::Matches { warnings: Vec::new() }
        );
        match group(RequiredLevel::WarnIfAbsent).matches(&[JvmType::Int], &JvmType::Void) {
            MatchResult::Matches { warnings } => assert_eq!(warnings.len(), 1),
            other => panic!("unexpected {other:?}"),
        }
        assert!(!group(RequiredLevel::ErrorIfAbsent)
            .matches(&[JvmType::Int], &JvmType::Void)
            .is_match());
        assert!(group(RequiredLevel::ErrorIfAbsent)
            .matches(&[JvmType::Int, JvmType::Double], &JvmType::Void)
            .is_match());
    }

    #[test]
    fn display_marks_optional_groups() {
        assert_eq!(
            field_write().to_string(),
            "(com.example.Foo instance, int value, [long par1, java.lang.String par2, ...]) -> void"
        );
    }
}
