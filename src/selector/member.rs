use crate::descriptor::{is_field_descriptor, is_method_descriptor};

/// Descriptor attached to a member selector.
#[derive(Clone, Debug, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub(crate) enum MemberDescriptor {
    Method(String),
    Field(String),
}

/// Exact member selector such as `Lcom/example/Foo;bar(I)V`, `Foo.bar` or `bar*`.
#[derive(Clone, Debug, Eq, PartialEq, Hash)]
pub(crate) struct MemberSelector {
    /// Owner in internal form (`com/example/Foo`).
    pub(crate) owner: Option<String>,
    /// `None` is the `*` wildcard.
    pub(crate) name: Option<String>,
    pub(crate) descriptor: Option<MemberDescriptor>,
    /// Set by a trailing `*` after the name.
    pub(crate) any_descriptor: bool,
}

impl MemberSelector {
    /// Selector naming exactly one member.
    pub(crate) fn exact(owner: &str, name: &str, descriptor: MemberDescriptor) -> Self {
        Self {
            owner: Some(owner.to_string()),
            name: Some(name.to_string()),
            descriptor: Some(descriptor),
            any_descriptor: false,
        }
    }

    pub(crate) fn match_method(&self, owner: &str, name: &str, descriptor: &str) -> bool {
        if matches!(self.descriptor, Some(MemberDescriptor::Field(_))) {
            return false;
        }
        self.matches_owner(owner)
            && self.can_ever_match(name)
            && match &self.descriptor {
                Some(MemberDescriptor::Method(expected)) => expected == descriptor,
                _ => true,
            }
    }

    pub(crate) fn match_field(&self, owner: &str, name: &str, descriptor: &str) -> bool {
        if matches!(self.descriptor, Some(MemberDescriptor::Method(_))) {
            return false;
        }
        self.matches_owner(owner)
            && self.can_ever_match(name)
            && match &self.descriptor {
                Some(MemberDescriptor::Field(expected)) => expected == descriptor,
                _ => true,
            }
    }

    pub(crate) fn can_ever_match(&self, name: &str) -> bool {
        match &self.name {
            Some(expected) => expected == name,
            None => true,
        }
    }

    fn matches_owner(&self, owner: &str) -> bool {
        match &self.owner {
            Some(expected) => expected == owner,
            None => true,
        }
    }

    pub(crate) fn method_descriptor(&self) -> Option<&str> {
        match &self.descriptor {
            Some(MemberDescriptor::Method(descriptor)) => Some(descriptor),
            _ => None,
        }
    }

    pub(crate) fn field_descriptor(&self) -> Option<&str> {
        match &self.descriptor {
            Some(MemberDescriptor::Field(descriptor)) => Some(descriptor),
            _ => None,
        }
    }

    /// Wildcard names and `name*` deliberately select several members.
    pub(crate) fn matches_many(&self) -> bool {
        self.name.is_none() || self.any_descriptor
    }

    /// Render in the `Lowner;name(desc)` / `Lowner;name:desc` grammar.
    pub(crate) fn to_canonical_string(&self) -> String {
        let mut out = String::new();
        if let Some(owner) = &self.owner {
            out.push('L');
            out.push_str(owner);
            out.push(';');
        }
        out.push_str(self.name.as_deref().unwrap_or("*"));
        match &self.descriptor {
            Some(MemberDescriptor::Method(descriptor)) => out.push_str(descriptor),
            Some(MemberDescriptor::Field(descriptor)) => {
                out.push(':');
                out.push_str(descriptor);
            }
            None if self.any_descriptor && self.name.is_some() => out.push('*'),
            None => {}
        }
        out
    }
}

/// Parse the member grammar. Returns `None` for anything that is not a
/// well-formed member selector.
pub(crate) fn parse_member(text: &str) -> Option<MemberSelector> {
    let text: String = text.chars().filter(|c| !c.is_whitespace()).collect();
    if text.is_empty() {
        return None;
    }
    let (owner, rest) = split_owner(&text)?;

    let (raw_name, descriptor) = if let Some(paren) = rest.find('(') {
        let descriptor = &rest[paren..];
        if !is_method_descriptor(descriptor) {
            return None;
        }
        (&rest[..paren], Some(MemberDescriptor::Method(descriptor.to_string())))
    } else if let Some(colon) = rest.find(':') {
        let descriptor = &rest[colon + 1..];
        if !is_field_descriptor(descriptor) {
            return None;
        }
        (&rest[..colon], Some(MemberDescriptor::Field(descriptor.to_string())))
    } else {
        (rest, None)
    };

    let (raw_name, any_descriptor) = match raw_name.strip_suffix('*') {
        Some(stripped) if !stripped.is_empty() && descriptor.is_none() => (stripped, true),
        _ => (raw_name, false),
    };

    let name = if raw_name == "*" {
        None
    } else if is_valid_member_name(raw_name) {
        Some(raw_name.to_string())
    } else {
        return None;
    };

    Some(MemberSelector {
        owner,
        name,
        descriptor,
        any_descriptor,
    })
}

/// Split off a leading `Lowner;` or a dotted `owner.` prefix.
fn split_owner(text: &str) -> Option<(Option<String>, &str)> {
    let descriptor_start = text.find(['(', ':']).unwrap_or(text.len());
    if text.starts_with('L') {
        if let Some(semi) = text.find(';') {
            if semi < descriptor_start {
                let owner = &text[1..semi];
                if !is_valid_owner(owner) {
                    return None;
                }
                return Some((Some(owner.replace('.', "/")), &text[semi + 1..]));
            }
        }
    }
    let head = &text[..descriptor_start];
    match head.rfind('.') {
        Some(dot) => {
            let owner = &head[..dot];
            if !is_valid_owner(owner) {
                return None;
            }
            Some((Some(owner.replace('.', "/")), &text[dot + 1..]))
        }
        None => Some((None, text)),
    }
}

fn is_valid_owner(owner: &str) -> bool {
    !owner.is_empty() && owner.split(['/', '.']).all(is_java_identifier)
}

pub(crate) fn is_valid_member_name(name: &str) -> bool {
    name == "<init>" || name == "<clinit>" || is_java_identifier(name)
}

pub(crate) fn is_java_identifier(value: &str) -> bool {
    let mut chars = value.chars();
    match chars.next() {
        Some(first) if first.is_alphabetic() || first == '_' || first == '$' => {}
        _ => return false,
    }
    chars.all(|c| c.is_alphanumeric() || c == '_' || c == '$')
}
