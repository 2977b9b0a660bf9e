use super::{Selector, SelectorContext};

/// Parser for one `@id(args)` selector family.
pub(crate) trait DynamicSelectorParser: Send + Sync {
    fn id(&self) -> &'static str;
    fn namespace(&self) -> &'static str;
    /// `None` when the arguments do not form a valid selector for this id.
    fn parse(&self, args: &str, context: &SelectorContext) -> Option<Selector>;
}

/// Selector resolved through a registered dynamic parser.
#[derive(Clone, Debug)]
pub(crate) struct DynamicSelector {
    pub(crate) namespace: String,
    pub(crate) id: String,
    pub(crate) args: String,
    pub(crate) inner: Box<Selector>,
}

impl DynamicSelector {
    pub(crate) fn display_name(&self) -> String {
        format!("@{}:{}({})", self.namespace, self.id, self.args)
    }
}

/// Split `@id(args)` or `@namespace:id(args)`.
pub(crate) fn split_dynamic(text: &str) -> Option<(Option<&str>, &str, &str)> {
    let body = text.trim().strip_prefix('@')?;
    let open = body.find('(')?;
    let args = body[open + 1..].strip_suffix(')')?;
    let head = body[..open].trim();
    let (namespace, id) = match head.split_once(':') {
        Some((namespace, id)) => (Some(namespace.trim()), id.trim()),
        None => (None, head),
    };
    if id.is_empty() || namespace.is_some_and(str::is_empty) {
        return None;
    }
    Some((namespace, id, args.trim()))
}

/// `@Desc(id)`: look up a declared descriptor in the parse context.
pub(crate) struct DescParser;

impl DynamicSelectorParser for DescParser {
    fn id(&self) -> &'static str {
        "Desc"
    }

    fn namespace(&self) -> &'static str {
        "mixin"
    }

    fn parse(&self, args: &str, context: &SelectorContext) -> Option<Selector> {
        let wanted = args.trim_matches('"');
        let declaration = context
            .desc_declarations
            .iter()
            .find(|declaration| declaration.id().eq_ignore_ascii_case(wanted))?;
        match declaration.to_selector(&context.targets) {
            Ok(selector) => Some(Selector::Desc(selector)),
            Err(err) => {
                tracing::debug!("invalid descriptor declaration {wanted}: {err:#}");
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn splits_namespaced_and_plain_forms() {
        assert_eq!(split_dynamic("@Desc(run)"), Some((None, "Desc", "run")));
        assert_eq!(
            split_dynamic("@mixin:Desc( run )"),
            Some((Some("mixin"), "Desc", "run"))
        );
        assert_eq!(split_dynamic("Desc(run)"), None);
        assert_eq!(split_dynamic("@(run)"), None);
        assert_eq!(split_dynamic("@Desc(run"), None);
        assert_eq!(split_dynamic("@:Desc(run)"), None);
    }
}
