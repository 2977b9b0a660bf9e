use regex::Regex;

/// Selector built from independent regular expressions for owner, name and
/// descriptor. Absent patterns match anything.
#[derive(Clone, Debug)]
pub(crate) struct RegexSelector {
    pub(crate) owner: Option<Regex>,
    pub(crate) name: Option<Regex>,
    pub(crate) desc: Option<Regex>,
    source: String,
    owner_constant: Option<String>,
    desc_constant: Option<String>,
}

impl RegexSelector {
    pub(crate) fn match_method(&self, owner: &str, name: &str, descriptor: &str) -> bool {
        self.matches(owner, name, descriptor)
    }

    pub(crate) fn match_field(&self, owner: &str, name: &str, descriptor: &str) -> bool {
        self.matches(owner, name, descriptor)
    }

    fn matches(&self, owner: &str, name: &str, descriptor: &str) -> bool {
        is_match(self.owner.as_ref(), owner)
            && is_match(self.name.as_ref(), name)
            && is_match(self.desc.as_ref(), descriptor)
    }

    pub(crate) fn can_ever_match(&self, name: &str) -> bool {
        is_match(self.name.as_ref(), name)
    }

    /// Owner hint when the owner pattern is an anchored literal.
    pub(crate) fn owner_constant(&self) -> Option<&str> {
        self.owner_constant.as_deref()
    }

    pub(crate) fn method_descriptor(&self) -> Option<&str> {
        self.desc_constant.as_deref().filter(|desc| desc.starts_with('('))
    }

    pub(crate) fn field_descriptor(&self) -> Option<&str> {
        self.desc_constant.as_deref().filter(|desc| !desc.starts_with('('))
    }

    pub(crate) fn source(&self) -> &str {
        &self.source
    }
}

fn is_match(pattern: Option<&Regex>, value: &str) -> bool {
    pattern.is_none_or(|pattern| pattern.is_match(value))
}

/// Outcome of reading the regex selector grammar.
#[derive(Debug)]
pub(crate) enum RegexParse {
    /// The literal is not in regex form; other grammars may try it.
    NotRegex,
    Invalid,
    Parsed(RegexSelector),
}

/// Parse `/name/` or keyed `owner=/.../ name=/.../ desc=/.../` segments.
/// Only literals ending in `/` are considered regex selectors.
pub(crate) fn parse_regex(text: &str) -> RegexParse {
    let text = text.trim();
    if !text.ends_with('/') || !text.contains('/') {
        return RegexParse::NotRegex;
    }

    let mut owner = None;
    let mut name = None;
    let mut desc = None;
    let mut rest = text;
    while !rest.is_empty() {
        rest = rest.trim_start();
        let (key, after_key) = split_key(rest);
        let Some(body) = after_key.strip_prefix('/') else {
            return RegexParse::NotRegex;
        };
        let Some(end) = closing_slash(body) else {
            return RegexParse::Invalid;
        };
        let pattern = body[..end].replace("\\/", "/");
        let slot = match key {
            Some("owner") => &mut owner,
            Some("desc") => &mut desc,
            Some("name") | None => &mut name,
            Some(_) => return RegexParse::Invalid,
        };
        if slot.is_some() {
            return RegexParse::Invalid;
        }
        *slot = Some(pattern);
        rest = &body[end + 1..];
    }

    let compile = |pattern: &Option<String>| -> Result<Option<Regex>, regex::Error> {
        pattern.as_deref().map(Regex::new).transpose()
    };
    let (Ok(owner_regex), Ok(name_regex), Ok(desc_regex)) =
        (compile(&owner), compile(&name), compile(&desc))
    else {
        return RegexParse::Invalid;
    };

    RegexParse::Parsed(RegexSelector {
        owner: owner_regex,
        name: name_regex,
        desc: desc_regex,
        source: text.to_string(),
        owner_constant: owner.as_deref().and_then(literal_of),
        desc_constant: desc.as_deref().and_then(literal_of),
    })
}

fn split_key(text: &str) -> (Option<&str>, &str) {
    for key in ["owner", "name", "desc"] {
        if let Some(after) = text.strip_prefix(key) {
            let after = after.trim_start();
            if let Some(after) = after.strip_prefix('=') {
                return (Some(key), after.trim_start());
            }
        }
    }
    if let Some(eq) = text.find('=') {
        if !text[..eq].contains('/') {
            return (Some(text[..eq].trim()), text[eq + 1..].trim_start());
        }
    }
    (None, text)
}

fn closing_slash(body: &str) -> Option<usize> {
    let bytes = body.as_bytes();
    let mut index = 0;
    while index < bytes.len() {
        match bytes[index] {
            b'\\' => index += 2,
            b'/' => return Some(index),
            _ => index += 1,
        }
    }
    None
}

/// Reduce `^literal$` with no metacharacters to the literal itself.
fn literal_of(pattern: &str) -> Option<String> {
    let inner = pattern.strip_prefix('^')?.strip_suffix('$')?;
    const META: &[char] = &[
        '\\', '.', '*', '+', '?', '(', ')', '[', ']', '{', '}', '|', '^', '$',
    ];
    if inner.is_empty() || inner.contains(META) {
        return None;
    }
    Some(inner.to_string())
}
