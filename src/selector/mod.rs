//! Member selectors: the textual query language used to name target members.

mod desc;
mod dynamic;
mod member;
mod regex;

pub(crate) use desc::{DescDeclaration, DescSelector};
pub(crate) use dynamic::{DescParser, DynamicSelector, DynamicSelectorParser};
pub(crate) use member::{MemberDescriptor, MemberSelector};
pub(crate) use self::regex::RegexSelector;

use dynamic::split_dynamic;
use member::parse_member;
use self::regex::{RegexParse, parse_regex};

/// A parsed selector. Every variant tests `(owner, name, descriptor)` triples.
#[derive(Clone, Debug)]
pub(crate) enum Selector {
    Member(MemberSelector),
    Regex(RegexSelector),
    Desc(DescSelector),
    Dynamic(DynamicSelector),
}

impl Selector {
    pub(crate) fn match_method(&self, owner: &str, name: &str, descriptor: &str) -> bool {
        match self {
            Selector::Member(selector) => selector.match_method(owner, name, descriptor),
            Selector::Regex(selector) => selector.match_method(owner, name, descriptor),
            Selector::Desc(selector) => selector.match_method(owner, name, descriptor),
            Selector::Dynamic(selector) => selector.inner.match_method(owner, name, descriptor),
        }
    }

    pub(crate) fn match_field(&self, owner: &str, name: &str, descriptor: &str) -> bool {
        match self {
            Selector::Member(selector) => selector.match_field(owner, name, descriptor),
            Selector::Regex(selector) => selector.match_field(owner, name, descriptor),
            Selector::Desc(selector) => selector.match_field(owner, name, descriptor),
            Selector::Dynamic(selector) => selector.inner.match_field(owner, name, descriptor),
        }
    }

    /// Cheap name-only pre-filter.
    pub(crate) fn can_ever_match(&self, name: &str) -> bool {
        match self {
            Selector::Member(selector) => selector.can_ever_match(name),
            Selector::Regex(selector) => selector.can_ever_match(name),
            Selector::Desc(selector) => selector.can_ever_match(name),
            Selector::Dynamic(selector) => selector.inner.can_ever_match(name),
        }
    }

    pub(crate) fn owner(&self) -> Option<&str> {
        match self {
            Selector::Member(selector) => selector.owner.as_deref(),
            Selector::Regex(selector) => selector.owner_constant(),
            Selector::Desc(selector) => selector.single_owner(),
            Selector::Dynamic(selector) => selector.inner.owner(),
        }
    }

    pub(crate) fn method_descriptor(&self) -> Option<&str> {
        match self {
            Selector::Member(selector) => selector.method_descriptor(),
            Selector::Regex(selector) => selector.method_descriptor(),
            Selector::Desc(selector) => Some(&selector.descriptor),
            Selector::Dynamic(selector) => selector.inner.method_descriptor(),
        }
    }

    pub(crate) fn field_descriptor(&self) -> Option<&str> {
        match self {
            Selector::Member(selector) => selector.field_descriptor(),
            Selector::Regex(selector) => selector.field_descriptor(),
            Selector::Desc(selector) => Some(selector.field_descriptor()),
            Selector::Dynamic(selector) => selector.inner.field_descriptor(),
        }
    }

    /// Whether the selector pins the descriptor, which rules out ambiguity.
    pub(crate) fn has_explicit_descriptor(&self) -> bool {
        match self {
            Selector::Member(selector) => selector.descriptor.is_some(),
            Selector::Regex(selector) => selector.desc.is_some(),
            Selector::Desc(_) => true,
            Selector::Dynamic(selector) => selector.inner.has_explicit_descriptor(),
        }
    }

    /// Selectors that are expected to pick several members on purpose.
    pub(crate) fn matches_many(&self) -> bool {
        match self {
            Selector::Member(selector) => selector.matches_many(),
            Selector::Regex(_) => true,
            Selector::Desc(_) => false,
            Selector::Dynamic(selector) => selector.inner.matches_many(),
        }
    }

    pub(crate) fn display_name(&self) -> String {
        match self {
            Selector::Member(selector) => selector.to_canonical_string(),
            Selector::Regex(selector) => selector.source().to_string(),
            Selector::Desc(selector) => match selector.single_owner() {
                Some(owner) => format!("L{owner};{}{}", selector.name, selector.descriptor),
                None => format!("{}{}", selector.name, selector.descriptor),
            },
            Selector::Dynamic(selector) => selector.display_name(),
        }
    }
}

/// Information available while parsing: the mixin's targets and its
/// descriptor declarations.
#[derive(Clone, Debug, Default)]
pub(crate) struct SelectorContext {
    pub(crate) targets: Vec<String>,
    pub(crate) desc_declarations: Vec<DescDeclaration>,
}

/// Result of parsing a selector literal.
#[derive(Clone, Debug)]
pub(crate) enum ParseOutcome {
    Parsed(Selector),
    /// `@id(...)` with no registered parser; callers suppress diagnostics.
    UnknownDynamic { id: String },
    Unparseable,
}

impl ParseOutcome {
    pub(crate) fn selector(&self) -> Option<&Selector> {
        match self {
            ParseOutcome::Parsed(selector) => Some(selector),
            _ => None,
        }
    }

    pub(crate) fn into_selector(self) -> Option<Selector> {
        match self {
            ParseOutcome::Parsed(selector) => Some(selector),
            _ => None,
        }
    }
}

/// One selector grammar. Returns `None` when the text is not in its syntax.
pub(crate) trait SelectorParser: Send + Sync {
    fn parse(&self, text: &str, context: &SelectorContext) -> Option<ParseOutcome>;
}

pub(crate) struct RegexSelectorParser;

impl SelectorParser for RegexSelectorParser {
    fn parse(&self, text: &str, _context: &SelectorContext) -> Option<ParseOutcome> {
        match parse_regex(text) {
            RegexParse::NotRegex => None,
            RegexParse::Invalid => Some(ParseOutcome::Unparseable),
            RegexParse::Parsed(selector) => Some(ParseOutcome::Parsed(Selector::Regex(selector))),
        }
    }
}

/// Dispatches `@id(args)` literals to the registered dynamic parsers.
pub(crate) struct DynamicSelectorParsers {
    parsers: Vec<Box<dyn DynamicSelectorParser>>,
}

impl DynamicSelectorParsers {
    pub(crate) fn new(parsers: Vec<Box<dyn DynamicSelectorParser>>) -> Self {
        Self { parsers }
    }

    fn find(&self, namespace: Option<&str>, id: &str) -> Option<&dyn DynamicSelectorParser> {
        self.parsers
            .iter()
            .filter(|parser| parser.id().eq_ignore_ascii_case(id))
            .find(|parser| namespace.is_none_or(|namespace| parser.namespace() == namespace))
            .map(|parser| parser.as_ref())
    }
}

impl SelectorParser for DynamicSelectorParsers {
    fn parse(&self, text: &str, context: &SelectorContext) -> Option<ParseOutcome> {
        let (namespace, id, args) = split_dynamic(text)?;
        let Some(parser) = self.find(namespace, id) else {
            let id = match namespace {
                Some(namespace) => format!("{namespace}:{id}"),
                None => id.to_string(),
            };
            return Some(ParseOutcome::UnknownDynamic { id });
        };
        let outcome = match parser.parse(args, context) {
            Some(inner) => ParseOutcome::Parsed(Selector::Dynamic(DynamicSelector {
                namespace: parser.namespace().to_string(),
                id: parser.id().to_string(),
                args: args.to_string(),
                inner: Box::new(inner),
            })),
            None => ParseOutcome::Unparseable,
        };
        Some(outcome)
    }
}

/// Fallback grammar; always answers.
pub(crate) struct MemberSelectorParser;

impl SelectorParser for MemberSelectorParser {
    fn parse(&self, text: &str, _context: &SelectorContext) -> Option<ParseOutcome> {
        Some(match parse_member(text) {
            Some(selector) => ParseOutcome::Parsed(Selector::Member(selector)),
            None => ParseOutcome::Unparseable,
        })
    }
}

/// Ordered list of selector grammars; the first one to answer wins.
pub(crate) struct SelectorParsers {
    parsers: Vec<Box<dyn SelectorParser>>,
}

impl SelectorParsers {
    pub(crate) fn new(parsers: Vec<Box<dyn SelectorParser>>) -> Self {
        Self { parsers }
    }

    /// Regex form, then dynamic form (`@Desc` built in), then member form.
    pub(crate) fn standard() -> Self {
        Self::new(vec![
            Box::new(RegexSelectorParser),
            Box::new(DynamicSelectorParsers::new(vec![Box::new(DescParser)])),
            Box::new(MemberSelectorParser),
        ])
    }

    pub(crate) fn parse(&self, text: &str, context: &SelectorContext) -> ParseOutcome {
        self.parsers
            .iter()
            .find_map(|parser| parser.parse(text, context))
            .unwrap_or(ParseOutcome::Unparseable)
    }
}
