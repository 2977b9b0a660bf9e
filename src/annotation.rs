use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Deserializer};

use crate::descriptor::{CLASS, JvmType, OBJECT, STRING};
use crate::selector::DescDeclaration;

/// Mixin description file: already-extracted annotation values per mixin.
#[derive(Clone, Debug, Deserialize)]
pub(crate) struct MixinFile {
    pub(crate) mixins: Vec<MixinDescription>,
}

#[derive(Clone, Debug, Deserialize)]
pub(crate) struct MixinDescription {
    pub(crate) name: String,
    pub(crate) targets: Vec<String>,
    #[serde(default)]
    pub(crate) desc: Vec<DescDeclaration>,
    #[serde(default)]
    pub(crate) handlers: Vec<HandlerMethod>,
}

impl MixinDescription {
    /// Targets in internal form.
    pub(crate) fn target_names(&self) -> Vec<String> {
        self.targets.iter().map(|target| target.replace('.', "/")).collect()
    }
}

/// Handler method written by the user plus its injector annotation.
#[derive(Clone, Debug, Deserialize)]
pub(crate) struct HandlerMethod {
    pub(crate) name: String,
    pub(crate) descriptor: String,
    #[serde(flatten)]
    pub(crate) annotation: InjectorAnnotation,
}

/// Raw attribute values of an injector annotation.
#[derive(Clone, Debug, Default, Deserialize)]
pub(crate) struct InjectorAnnotation {
    /// Simple or qualified annotation name, e.g. `Redirect`.
    pub(crate) annotation: String,
    #[serde(default, deserialize_with = "one_or_many")]
    pub(crate) method: Vec<String>,
    #[serde(default, deserialize_with = "one_or_many")]
    pub(crate) at: Vec<AtSpec>,
    #[serde(default)]
    pub(crate) index: Option<u16>,
    #[serde(default, rename = "constant", alias = "constants", deserialize_with = "one_or_many")]
    pub(crate) constants: Vec<ConstantMatcher>,
    #[serde(default)]
    pub(crate) locals: LocalCapture,
    /// Explicit value type of `ModifyVariable`, as a field descriptor.
    #[serde(default, rename = "type")]
    pub(crate) value_type: Option<String>,
}

/// Injection point attributes (`@At`).
#[derive(Clone, Debug, Default, Deserialize)]
pub(crate) struct AtSpec {
    pub(crate) value: String,
    #[serde(default)]
    pub(crate) target: Option<String>,
    #[serde(default)]
    pub(crate) opcode: Option<u8>,
    #[serde(default)]
    pub(crate) ordinal: Option<usize>,
}

/// One `@Constant` matcher. Each populated attribute names a literal kind.
#[derive(Clone, Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct ConstantMatcher {
    #[serde(default)]
    pub(crate) null_value: bool,
    #[serde(default)]
    pub(crate) int_value: Option<i32>,
    #[serde(default)]
    pub(crate) float_value: Option<f32>,
    #[serde(default)]
    pub(crate) long_value: Option<i64>,
    #[serde(default)]
    pub(crate) double_value: Option<f64>,
    #[serde(default)]
    pub(crate) string_value: Option<String>,
    #[serde(default)]
    pub(crate) class_value: Option<String>,
}

impl ConstantMatcher {
    /// Literal kinds referenced by this matcher, in attribute order.
    pub(crate) fn literal_types(&self) -> Vec<JvmType> {
        let mut types = Vec::new();
        if self.null_value {
            types.push(JvmType::object(OBJECT));
        }
        if self.int_value.is_some() {
            types.push(JvmType::Int);
        }
        if self.float_value.is_some() {
            types.push(JvmType::Float);
        }
        if self.long_value.is_some() {
            types.push(JvmType::Long);
        }
        if self.double_value.is_some() {
            types.push(JvmType::Double);
        }
        if self.string_value.is_some() {
            types.push(JvmType::object(STRING));
        }
        if self.class_value.is_some() {
            types.push(JvmType::object(CLASS));
        }
        types
    }
}

/// `locals` attribute of `@Inject`.
#[derive(Clone, Copy, Debug, Default, Deserialize, Eq, PartialEq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub(crate) enum LocalCapture {
    #[default]
    NoCapture,
    Print,
    CaptureFailsoft,
    CaptureFailhard,
    CaptureFailexception,
}

impl LocalCapture {
    pub(crate) fn captures(self) -> bool {
        !matches!(self, LocalCapture::NoCapture | LocalCapture::Print)
    }
}

fn one_or_many<'de, D, T>(deserializer: D) -> std::result::Result<Vec<T>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum OneOrMany<T> {
        One(T),
        Many(Vec<T>),
    }

    Ok(match OneOrMany::deserialize(deserializer)? {
        OneOrMany::One(value) => vec![value],
        OneOrMany::Many(values) => values,
    })
}

/// Read a mixin description file, naming the JSON path on errors.
pub(crate) fn load_mixins(path: &Path) -> Result<MixinFile> {
    let data = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    parse_mixins(&data).with_context(|| format!("failed to parse {}", path.display()))
}

pub(crate) fn parse_mixins(data: &str) -> Result<MixinFile> {
    let deserializer = &mut serde_json::Deserializer::from_str(data);
    let file = serde_path_to_error::deserialize(deserializer)
        .map_err(|err| anyhow::anyhow!("{} at {}", err.inner(), err.path()))?;
    Ok(file)
}
