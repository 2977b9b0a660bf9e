use anyhow::{Context, Result};
use serde::Deserialize;

use crate::descriptor::{JvmType, MethodType};

/// Explicit member declaration (`@Desc`-style): owner, name and the declared
/// argument and return types.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq)]
pub(crate) struct DescDeclaration {
    #[serde(default)]
    pub(crate) id: Option<String>,
    #[serde(default)]
    pub(crate) owner: Option<String>,
    pub(crate) value: String,
    #[serde(default)]
    pub(crate) args: Vec<String>,
    #[serde(default = "void_descriptor")]
    pub(crate) ret: String,
}

fn void_descriptor() -> String {
    "V".to_string()
}

impl DescDeclaration {
    /// The id used by `@Desc(id)` references; defaults to the member name.
    pub(crate) fn id(&self) -> &str {
        self.id.as_deref().unwrap_or(&self.value)
    }

    /// Build the selector, falling back to `default_owners` (the mixin
    /// targets) when the declaration names no owner.
    pub(crate) fn to_selector(&self, default_owners: &[String]) -> Result<DescSelector> {
        let mut parameters = Vec::with_capacity(self.args.len());
        for arg in &self.args {
            parameters.push(
                JvmType::from_descriptor(arg)
                    .with_context(|| format!("argument type of {}", self.value))?,
            );
        }
        let return_type = JvmType::from_descriptor(&self.ret)
            .with_context(|| format!("return type of {}", self.value))?;
        let owners = match &self.owner {
            Some(owner) => vec![owner.replace('.', "/")],
            None => default_owners.to_vec(),
        };
        Ok(DescSelector {
            owners,
            name: self.value.clone(),
            descriptor: MethodType::new(parameters, return_type).descriptor(),
        })
    }
}

/// Selector derived from declared types rather than a descriptor string.
#[derive(Clone, Debug, Eq, PartialEq)]
pub(crate) struct DescSelector {
    pub(crate) owners: Vec<String>,
    pub(crate) name: String,
    pub(crate) descriptor: String,
}

impl DescSelector {
    pub(crate) fn match_method(&self, owner: &str, name: &str, descriptor: &str) -> bool {
        self.owns(owner) && self.name == name && self.descriptor == descriptor
    }

    /// Fields compare against the declared return type.
    pub(crate) fn match_field(&self, owner: &str, name: &str, descriptor: &str) -> bool {
        self.owns(owner) && self.name == name && self.field_descriptor() == descriptor
    }

    pub(crate) fn can_ever_match(&self, name: &str) -> bool {
        self.name == name
    }

    pub(crate) fn field_descriptor(&self) -> &str {
        match self.descriptor.rfind(')') {
            Some(end) => &self.descriptor[end + 1..],
            None => &self.descriptor,
        }
    }

    pub(crate) fn single_owner(&self) -> Option<&str> {
        match self.owners.as_slice() {
            [owner] => Some(owner),
            _ => None,
        }
    }

    fn owns(&self, owner: &str) -> bool {
        self.owners.iter().any(|candidate| candidate == owner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn declaration(owner: Option<&str>) -> DescDeclaration {
        DescDeclaration {
            id: Some("runner".to_string()),
            owner: owner.map(str::to_string),
            value: "run".to_string(),
            args: vec!["I".to_string(), "Ljava/lang/String;".to_string()],
            ret: "Z".to_string(),
        }
    }

    #[test]
    fn descriptor_is_computed_from_declared_types() {
        let selector = declaration(Some("com.example.ClassA"))
            .to_selector(&[])
            .expect("selector");
        assert_eq!(selector.owners, vec!["com/example/ClassA".to_string()]);
        assert_eq!(selector.descriptor, "(ILjava/lang/String;)Z");
        assert!(selector.match_method("com/example/ClassA", "run", "(ILjava/lang/String;)Z"));
        assert!(!selector.match_method("com/example/ClassB", "run", "(ILjava/lang/String;)Z"));
        assert!(selector.match_field("com/example/ClassA", "run", "Z"));
    }

    #[test]
    fn owners_default_to_mixin_targets() {
        let targets = vec!["com/example/ClassA".to_string(), "com/example/ClassB".to_string()];
        let selector = declaration(None).to_selector(&targets).expect("selector");
        assert!(selector.match_method("com/example/ClassB", "run", "(ILjava/lang/String;)Z"));
        assert_eq!(selector.single_owner(), None);
    }

    #[test]
    fn invalid_types_are_rejected() {
        let mut bad = declaration(None);
        bad.args = vec!["Q".to_string()];
        assert!(bad.to_selector(&[]).is_err());
        assert_eq!(declaration(None).id(), "runner");
    }
}
