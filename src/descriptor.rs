use std::fmt;
use std::str::FromStr;

use anyhow::{Context, Result};
use jdescriptor::{MethodDescriptor, TypeDescriptor};
use serde::Serialize;

pub(crate) const OBJECT: &str = "java/lang/Object";
pub(crate) const STRING: &str = "java/lang/String";
pub(crate) const CLASS: &str = "java/lang/Class";

/// Resolved JVM type as it appears in field and method descriptors.
#[derive(Clone, Debug, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub(crate) enum JvmType {
    Void,
    Boolean,
    Byte,
    Char,
    Short,
    Int,
    Long,
    Float,
    Double,
    Object(String),
    Array(Box<JvmType>),
}

impl JvmType {
    pub(crate) fn object(internal_name: &str) -> Self {
        JvmType::Object(internal_name.to_string())
    }

    pub(crate) fn array_of(element: JvmType) -> Self {
        JvmType::Array(Box::new(element))
    }

    /// Parse a single field descriptor such as `I` or `[Ljava/lang/String;`.
    pub(crate) fn from_descriptor(descriptor: &str) -> Result<Self> {
        if descriptor == "V" {
            return Ok(JvmType::Void);
        }
        let wrapped = format!("({descriptor})V");
        let parsed = MethodDescriptor::from_str(&wrapped)
            .with_context(|| format!("parse field descriptor {descriptor}"))?;
        let params = parsed.parameter_types();
        if params.len() != 1 {
            anyhow::bail!("not a single field descriptor: {descriptor}");
        }
        Ok(JvmType::from(&params[0]))
    }

    /// Parse an internal class name or array descriptor used by `NEW`,
    /// `ANEWARRAY`, `CHECKCAST` and `INSTANCEOF` operands.
    pub(crate) fn from_class_operand(operand: &str) -> Result<Self> {
        if operand.starts_with('[') {
            Self::from_descriptor(operand)
        } else {
            Ok(JvmType::object(operand))
        }
    }

    pub(crate) fn descriptor(&self) -> String {
        match self {
            JvmType::Void => "V".to_string(),
            JvmType::Boolean => "Z".to_string(),
            JvmType::Byte => "B".to_string(),
            JvmType::Char => "C".to_string(),
            JvmType::Short => "S".to_string(),
            JvmType::Int => "I".to_string(),
            JvmType::Long => "J".to_string(),
            JvmType::Float => "F".to_string(),
            JvmType::Double => "D".to_string(),
            JvmType::Object(name) => format!("L{name};"),
            JvmType::Array(element) => format!("[{}", element.descriptor()),
        }
    }

    /// Java source spelling, e.g. `int[]` or `java.lang.String`.
    pub(crate) fn java_name(&self) -> String {
        match self {
            JvmType::Void => "void".to_string(),
            JvmType::Boolean => "boolean".to_string(),
            JvmType::Byte => "byte".to_string(),
            JvmType::Char => "char".to_string(),
            JvmType::Short => "short".to_string(),
            JvmType::Int => "int".to_string(),
            JvmType::Long => "long".to_string(),
            JvmType::Float => "float".to_string(),
            JvmType::Double => "double".to_string(),
            JvmType::Object(name) => name.replace(['/', '$'], "."),
            JvmType::Array(element) => format!("{}[]", element.java_name()),
        }
    }

    pub(crate) fn is_array(&self) -> bool {
        matches!(self, JvmType::Array(_))
    }

    pub(crate) fn is_reference(&self) -> bool {
        matches!(self, JvmType::Object(_) | JvmType::Array(_))
    }

    pub(crate) fn is_object(&self) -> bool {
        matches!(self, JvmType::Object(name) if name == OBJECT)
    }

    pub(crate) fn element_type(&self) -> Option<&JvmType> {
        match self {
            JvmType::Array(element) => Some(element),
            _ => None,
        }
    }

    /// Number of local variable slots the type occupies.
    pub(crate) fn slot_size(&self) -> u16 {
        match self {
            JvmType::Long | JvmType::Double => 2,
            JvmType::Void => 0,
            _ => 1,
        }
    }
}

impl From<&TypeDescriptor> for JvmType {
    fn from(descriptor: &TypeDescriptor) -> Self {
        match descriptor {
            TypeDescriptor::Void => JvmType::Void,
            TypeDescriptor::Boolean => JvmType::Boolean,
            TypeDescriptor::Byte => JvmType::Byte,
            TypeDescriptor::Char => JvmType::Char,
            TypeDescriptor::Short => JvmType::Short,
            TypeDescriptor::Integer => JvmType::Int,
            TypeDescriptor::Long => JvmType::Long,
            TypeDescriptor::Float => JvmType::Float,
            TypeDescriptor::Double => JvmType::Double,
            TypeDescriptor::Object(class) => JvmType::Object(class.clone()),
            TypeDescriptor::Array(inner, dims) => {
                let mut ty = JvmType::from(inner.as_ref());
                for _ in 0..*dims {
                    ty = JvmType::array_of(ty);
                }
                ty
            }
        }
    }
}

impl fmt::Display for JvmType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.java_name())
    }
}

impl Serialize for JvmType {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.java_name())
    }
}

/// Argument and return types of a method descriptor.
#[derive(Clone, Debug, Eq, PartialEq)]
pub(crate) struct MethodType {
    pub(crate) parameters: Vec<JvmType>,
    pub(crate) return_type: JvmType,
}

impl MethodType {
    pub(crate) fn new(parameters: Vec<JvmType>, return_type: JvmType) -> Self {
        Self {
            parameters,
            return_type,
        }
    }

    pub(crate) fn descriptor(&self) -> String {
        let params: String = self.parameters.iter().map(JvmType::descriptor).collect();
        format!("({params}){}", self.return_type.descriptor())
    }
}

/// Split a JVM method descriptor into its argument list and return type.
pub(crate) fn method_type(descriptor: &str) -> Result<MethodType> {
    let parsed =
        MethodDescriptor::from_str(descriptor).context("parse method descriptor")?;
    Ok(MethodType {
        parameters: parsed.parameter_types().iter().map(JvmType::from).collect(),
        return_type: JvmType::from(parsed.return_type()),
    })
}

pub(crate) fn is_method_descriptor(descriptor: &str) -> bool {
    descriptor.starts_with('(') && MethodDescriptor::from_str(descriptor).is_ok()
}

pub(crate) fn is_field_descriptor(descriptor: &str) -> bool {
    descriptor != "V" && JvmType::from_descriptor(descriptor).is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn method_type_splits_arguments_and_return() {
        let ty = method_type("(IJ[Ljava/lang/String;)Z").expect("method type");
        assert_eq!(
            ty.parameters,
            vec![
                JvmType::Int,
                JvmType::Long,
                JvmType::array_of(JvmType::object(STRING))
            ]
        );
        assert_eq!(ty.return_type, JvmType::Boolean);
        assert_eq!(ty.descriptor(), "(IJ[Ljava/lang/String;)Z");
    }

    #[test]
    fn field_descriptor_round_trips() {
        for descriptor in ["I", "[[D", "Ljava/util/List;", "[Lcom/example/Foo$Bar;"] {
            let ty = JvmType::from_descriptor(descriptor).expect("field type");
            assert_eq!(ty.descriptor(), descriptor);
        }
        assert!(JvmType::from_descriptor("Ljava/lang/String").is_err());
    }

    #[test]
    fn java_names_use_source_spelling() {
        let ty = JvmType::from_descriptor("[Lcom/example/Outer$Inner;").expect("type");
        assert_eq!(ty.java_name(), "com.example.Outer.Inner[]");
        assert_eq!(JvmType::Int.java_name(), "int");
    }

    #[test]
    fn descriptor_kinds_are_recognized() {
        assert!(!is_field_descriptor("V"));
        assert!(is_field_descriptor("[I"));
        assert!(is_method_descriptor("()V"));
        assert!(!is_method_descriptor("I"));
    }
}
