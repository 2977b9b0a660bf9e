use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use serde::Serialize;

use crate::ir::{Class, Field, Method};
use crate::selector::{MemberDescriptor, MemberSelector, Selector};

/// Class graph lookup by internal name.
pub(crate) trait ClassProvider {
    fn load_class(&self, name: &str) -> Option<&Class>;
}

/// Which member table a query searches.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub(crate) enum MemberKind {
    Method,
    Field,
}

impl fmt::Display for MemberKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MemberKind::Method => f.write_str("method"),
            MemberKind::Field => f.write_str("field"),
        }
    }
}

#[derive(Clone, Copy, Debug)]
pub(crate) enum Member<'a> {
    Method(&'a Method),
    Field(&'a Field),
}

impl<'a> Member<'a> {
    pub(crate) fn name(&self) -> &'a str {
        match self {
            Member::Method(method) => &method.name,
            Member::Field(field) => &field.name,
        }
    }

    pub(crate) fn descriptor(&self) -> &'a str {
        match self {
            Member::Method(method) => &method.descriptor,
            Member::Field(field) => &field.descriptor,
        }
    }

    pub(crate) fn method(&self) -> Option<&'a Method> {
        match self {
            Member::Method(method) => Some(method),
            Member::Field(_) => None,
        }
    }
}

/// A member found by a selector together with its declaring class.
#[derive(Clone, Copy, Debug)]
pub(crate) struct ResolvedMember<'a> {
    pub(crate) owner: &'a Class,
    pub(crate) member: Member<'a>,
}

impl<'a> ResolvedMember<'a> {
    fn key(&self) -> (&'a str, &'a str, &'a str) {
        (
            self.owner.name.as_str(),
            self.member.name(),
            self.member.descriptor(),
        )
    }

    /// Render as `Lowner;name(desc)` or `Lowner;name:desc`.
    pub(crate) fn to_canonical_string(&self) -> String {
        let descriptor = match self.member {
            Member::Method(method) => MemberDescriptor::Method(method.descriptor.clone()),
            Member::Field(field) => MemberDescriptor::Field(field.descriptor.clone()),
        };
        MemberSelector::exact(&self.owner.name, self.member.name(), descriptor)
            .to_canonical_string()
    }
}

/// Outcome of checking a selector reference against its targets.
#[derive(Clone, Debug, Eq, PartialEq)]
pub(crate) enum ReferenceStatus {
    Resolved,
    Unresolved { message: String },
    Ambiguous { name: String, candidates: Vec<String> },
}

/// Member listed for completion.
#[derive(Clone, Debug, Eq, PartialEq, Ord, PartialOrd, Serialize)]
pub(crate) struct Candidate {
    pub(crate) owner: String,
    pub(crate) name: String,
    pub(crate) descriptor: String,
    /// Whether the name alone identifies the member in the searched scope.
    pub(crate) unique_name: bool,
    /// Shortest selector that names the member unambiguously.
    pub(crate) selector: String,
}

/// Applies selectors over target classes and their supertypes.
#[derive(Clone, Copy, Debug)]
pub(crate) struct HierarchyResolver {
    include_supertypes: bool,
}

impl Default for HierarchyResolver {
    fn default() -> Self {
        Self {
            include_supertypes: true,
        }
    }
}

impl HierarchyResolver {
    /// Search only the target classes themselves, as injector target methods do.
    pub(crate) fn target_only() -> Self {
        Self {
            include_supertypes: false,
        }
    }

    /// Every matching member across all targets, de-duplicated by
    /// `(owner, name, descriptor)`.
    pub(crate) fn resolve<'a, P>(
        &self,
        provider: &'a P,
        selector: &Selector,
        targets: &[&'a Class],
        kind: MemberKind,
    ) -> Vec<ResolvedMember<'a>>
    where
        P: ClassProvider + ?Sized,
    {
        let mut seen = BTreeSet::new();
        let mut resolved = Vec::new();
        for &target in targets {
            for found in self.resolve_root(provider, selector, target, kind, false) {
                if seen.insert(found.key()) {
                    resolved.push(found);
                }
            }
        }
        resolved
    }

    /// The first class along each root's walk that has a match contributes
    /// its matches; later classes are not searched.
    pub(crate) fn first<'a, P>(
        &self,
        provider: &'a P,
        selector: &Selector,
        targets: &[&'a Class],
        kind: MemberKind,
    ) -> Vec<ResolvedMember<'a>>
    where
        P: ClassProvider + ?Sized,
    {
        targets
            .iter()
            .flat_map(|&target| self.resolve_root(provider, selector, target, kind, true))
            .collect()
    }

    pub(crate) fn is_ambiguous<'a, P>(
        &self,
        provider: &'a P,
        selector: &Selector,
        targets: &[&'a Class],
        kind: MemberKind,
    ) -> bool
    where
        P: ClassProvider + ?Sized,
    {
        self.ambiguous_name(provider, selector, targets, kind)
            .is_some()
    }

    /// Name that resolves to more than one descriptor, within one target's
    /// matches or across the union of targets.
    fn ambiguous_name<'a, P>(
        &self,
        provider: &'a P,
        selector: &Selector,
        targets: &[&'a Class],
        kind: MemberKind,
    ) -> Option<String>
    where
        P: ClassProvider + ?Sized,
    {
        if selector.has_explicit_descriptor() || selector.matches_many() {
            return None;
        }
        if let Some(name) = self.overloaded_in_target(selector, targets, kind) {
            return Some(name);
        }

        let mut union: BTreeMap<&str, BTreeSet<&str>> = BTreeMap::new();
        for &target in targets {
            let mut per_target: BTreeMap<&str, BTreeSet<&str>> = BTreeMap::new();
            for found in self.resolve_root(provider, selector, target, kind, false) {
                per_target
                    .entry(found.member.name())
                    .or_default()
                    .insert(found.member.descriptor());
            }
            if let Some((name, _)) = per_target
                .iter()
                .find(|(_, descriptors)| descriptors.len() > 1)
            {
                return Some(name.to_string());
            }
            for (name, descriptors) in per_target {
                union.entry(name).or_default().extend(descriptors);
            }
        }
        union
            .into_iter()
            .find(|(_, descriptors)| descriptors.len() > 1)
            .map(|(name, _)| name.to_string())
    }

    /// Fast path through the per-class overload index when the walk stays on
    /// the target and the selector names an exact member of it.
    fn overloaded_in_target(
        &self,
        selector: &Selector,
        targets: &[&Class],
        kind: MemberKind,
    ) -> Option<String> {
        if self.include_supertypes {
            return None;
        }
        let Selector::Member(MemberSelector {
            name: Some(name), ..
        }) = selector
        else {
            return None;
        };
        targets
            .iter()
            .filter(|target| selector.owner().is_none_or(|owner| owner == target.name))
            .any(|target| match kind {
                MemberKind::Method => target.method_overloads(name) > 1,
                MemberKind::Field => target.field_overloads(name) > 1,
            })
            .then(|| name.clone())
    }

    pub(crate) fn check_reference<'a, P>(
        &self,
        provider: &'a P,
        selector: &Selector,
        targets: &[&'a Class],
        kind: MemberKind,
    ) -> ReferenceStatus
    where
        P: ClassProvider + ?Sized,
    {
        let resolved = self.resolve(provider, selector, targets, kind);
        if resolved.is_empty() {
            let owners: Vec<&str> = targets.iter().map(|target| target.name.as_str()).collect();
            return ReferenceStatus::Unresolved {
                message: format!(
                    "cannot resolve {kind} {} in {}",
                    selector.display_name(),
                    if owners.is_empty() {
                        "<no targets>".to_string()
                    } else {
                        owners.join(", ")
                    }
                ),
            };
        }
        match self.ambiguous_name(provider, selector, targets, kind) {
            Some(name) => {
                let candidates = resolved
                    .iter()
                    .filter(|found| found.member.name() == name)
                    .map(ResolvedMember::to_canonical_string)
                    .collect();
                ReferenceStatus::Ambiguous { name, candidates }
            }
            None => ReferenceStatus::Resolved,
        }
    }

    /// All members reachable from the targets, flagging names that are unique
    /// in the searched scope.
    pub(crate) fn candidates<'a, P>(
        &self,
        provider: &'a P,
        targets: &[&'a Class],
        kind: MemberKind,
    ) -> Vec<Candidate>
    where
        P: ClassProvider + ?Sized,
    {
        let mut members: BTreeMap<(&str, &str, &str), ResolvedMember<'a>> = BTreeMap::new();
        for &target in targets {
            self.walk(provider, target, &mut BTreeSet::new(), &mut |class| {
                for found in class_members(class, kind) {
                    members.entry(found.key()).or_insert(found);
                }
                false
            });
        }

        let mut descriptors_by_name: BTreeMap<&str, BTreeSet<&str>> = BTreeMap::new();
        for &(_, name, descriptor) in members.keys() {
            descriptors_by_name.entry(name).or_default().insert(descriptor);
        }

        let mut candidates: Vec<Candidate> = members
            .values()
            .map(|found| {
                let name = found.member.name();
                let unique_name = descriptors_by_name
                    .get(name)
                    .is_some_and(|descriptors| descriptors.len() == 1);
                let selector = if unique_name {
                    name.to_string()
                } else {
                    match found.member {
                        Member::Method(method) => format!("{name}{}", method.descriptor),
                        Member::Field(field) => format!("{name}:{}", field.descriptor),
                    }
                };
                Candidate {
                    owner: found.owner.name.clone(),
                    name: name.to_string(),
                    descriptor: found.member.descriptor().to_string(),
                    unique_name,
                    selector,
                }
            })
            .collect();
        candidates.sort();
        candidates
    }

    fn resolve_root<'a, P>(
        &self,
        provider: &'a P,
        selector: &Selector,
        root: &'a Class,
        kind: MemberKind,
        stop_at_first: bool,
    ) -> Vec<ResolvedMember<'a>>
    where
        P: ClassProvider + ?Sized,
    {
        let mut found = Vec::new();
        self.walk(provider, root, &mut BTreeSet::new(), &mut |class| {
            let matches = matching_members(class, root, selector, kind);
            let hit = !matches.is_empty();
            found.extend(matches);
            stop_at_first && hit
        });
        found
    }

    /// Depth-first: the class, then each interface, then the superclass.
    /// Returns `true` once `visit` asks to stop.
    fn walk<'a, P>(
        &self,
        provider: &'a P,
        class: &'a Class,
        visited: &mut BTreeSet<String>,
        visit: &mut dyn FnMut(&'a Class) -> bool,
    ) -> bool
    where
        P: ClassProvider + ?Sized,
    {
        if !visited.insert(class.name.clone()) {
            tracing::debug!("hierarchy walk reached {} again; branch cut", class.name);
            return false;
        }
        if visit(class) {
            return true;
        }
        if !self.include_supertypes {
            return false;
        }
        let supertypes = class.interfaces.iter().chain(class.super_name.iter());
        for name in supertypes {
            let Some(supertype) = provider.load_class(name) else {
                continue;
            };
            if self.walk(provider, supertype, visited, visit) {
                return true;
            }
        }
        false
    }
}

/// Members of `class` accepted by the selector. Owner-qualified selectors
/// also accept inherited members when they name the root target.
fn matching_members<'a>(
    class: &'a Class,
    root: &Class,
    selector: &Selector,
    kind: MemberKind,
) -> Vec<ResolvedMember<'a>> {
    class_members(class, kind)
        .filter(|found| selector.can_ever_match(found.member.name()))
        .filter(|found| {
            let (name, descriptor) = (found.member.name(), found.member.descriptor());
            [class.name.as_str(), root.name.as_str()]
                .into_iter()
                .any(|owner| match kind {
                    MemberKind::Method => selector.match_method(owner, name, descriptor),
                    MemberKind::Field => selector.match_field(owner, name, descriptor),
                })
        })
        .collect()
}

fn class_members<'a>(
    class: &'a Class,
    kind: MemberKind,
) -> Box<dyn Iterator<Item = ResolvedMember<'a>> + 'a> {
    match kind {
        MemberKind::Method => Box::new(class.methods.iter().map(move |method| ResolvedMember {
            owner: class,
            member: Member::Method(method),
        })),
        MemberKind::Field => Box::new(class.fields.iter().map(move |field| ResolvedMember {
            owner: class,
            member: Member::Field(field),
        })),
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::ir::{FieldAccess, build};
    use crate::selector::{ParseOutcome, SelectorContext, SelectorParsers};

    /// Map-backed provider for hand-built class graphs.
    #[derive(Default)]
    pub(crate) struct Classes(pub(crate) BTreeMap<String, Class>);

    impl Classes {
        pub(crate) fn new(classes: Vec<Class>) -> Self {
            Self(
                classes
                    .into_iter()
                    .map(|class| (class.name.clone(), class))
                    .collect(),
            )
        }

        pub(crate) fn get(&self, name: &str) -> &Class {
            self.0.get(name).expect("class in fixture")
        }
    }

    impl ClassProvider for Classes {
        fn load_class(&self, name: &str) -> Option<&Class> {
            self.0.get(name)
        }
    }

    fn selector(text: &str) -> Selector {
        match SelectorParsers::standard().parse(text, &SelectorContext::default()) {
            ParseOutcome::Parsed(selector) => selector,
            other => panic!("expected selector for {text}, got {other:?}"),
        }
    }

    fn method(name: &str, descriptor: &str) -> Method {
        build::method(name, descriptor, false, Vec::new())
    }

    fn field(name: &str, descriptor: &str) -> Field {
        Field {
            name: name.to_string(),
            descriptor: descriptor.to_string(),
            access: FieldAccess { is_static: false },
        }
    }

    fn fixture() -> Classes {
        Classes::new(vec![
            build::class(
                "com/example/ClassA",
                Some("com/example/Base"),
                &["com/example/Iface"],
                vec![method("run", "()V"), method("run", "(I)V"), method("stop", "()V")],
            ),
            build::class(
                "com/example/Base",
                None,
                &[],
                vec![method("inherited", "()V"), method("stop", "()V")],
            ),
            build::class(
                "com/example/Iface",
                None,
                &[],
                vec![method("fromInterface", "()I")],
            ),
            build::class("com/example/ClassB", None, &[], vec![method("stop", "(J)V")]),
        ])
    }

    #[test]
    fn descriptor_disambiguates_overloads() {
        let classes = fixture();
        let targets = [classes.get("com/example/ClassA")];
        let resolver = HierarchyResolver::default();

        assert!(resolver.is_ambiguous(&classes, &selector("run"), &targets, MemberKind::Method));
        assert!(!resolver.is_ambiguous(
            &classes,
            &selector("run(I)V"),
            &targets,
            MemberKind::Method
        ));
        assert!(
            HierarchyResolver::target_only().is_ambiguous(
                &classes,
                &selector("run"),
                &targets,
                MemberKind::Method
            )
        );
        assert_eq!(
            resolver
                .resolve(&classes, &selector("run(I)V"), &targets, MemberKind::Method)
                .len(),
            1
        );
    }

    #[test]
    fn ambiguity_spans_the_union_of_targets() {
        let classes = fixture();
        let resolver = HierarchyResolver::target_only();
        let both = [classes.get("com/example/ClassA"), classes.get("com/example/ClassB")];

        assert!(!resolver.is_ambiguous(
            &classes,
            &selector("stop"),
            &both[..1],
            MemberKind::Method
        ));
        assert!(resolver.is_ambiguous(&classes, &selector("stop"), &both, MemberKind::Method));
        assert!(!resolver.is_ambiguous(&classes, &selector("stop*"), &both, MemberKind::Method));
        assert!(!resolver.is_ambiguous(&classes, &selector("/stop/"), &both, MemberKind::Method));
    }

    #[test]
    fn walk_visits_interfaces_and_superclass() {
        let classes = fixture();
        let targets = [classes.get("com/example/ClassA")];
        let resolver = HierarchyResolver::default();

        let inherited =
            resolver.resolve(&classes, &selector("inherited"), &targets, MemberKind::Method);
        assert_eq!(inherited.len(), 1);
        assert_eq!(inherited[0].owner.name, "com/example/Base");

        let from_interface =
            resolver.resolve(&classes, &selector("fromInterface"), &targets, MemberKind::Method);
        assert_eq!(from_interface.len(), 1);

        let qualified = resolver.resolve(
            &classes,
            &selector("Lcom/example/ClassA;inherited()V"),
            &targets,
            MemberKind::Method,
        );
        assert_eq!(qualified.len(), 1);

        assert!(
            HierarchyResolver::target_only()
                .resolve(&classes, &selector("inherited"), &targets, MemberKind::Method)
                .is_empty()
        );
    }

    #[test]
    fn exhaustive_resolution_deduplicates_and_first_stops_early() {
        let classes = fixture();
        let targets = [classes.get("com/example/ClassA"), classes.get("com/example/ClassA")];
        let resolver = HierarchyResolver::default();

        let all = resolver.resolve(&classes, &selector("stop()V"), &targets, MemberKind::Method);
        assert_eq!(all.len(), 2);

        let first =
            resolver.first(&classes, &selector("stop()V"), &targets[..1], MemberKind::Method);
        assert_eq!(first.len(), 1);
        assert_eq!(first[0].owner.name, "com/example/ClassA");
    }

    #[test]
    fn cyclic_graphs_terminate() {
        let classes = Classes::new(vec![
            build::class(
                "com/example/A",
                Some("com/example/B"),
                &["com/example/A"],
                vec![method("a", "()V")],
            ),
            build::class("com/example/B", Some("com/example/A"), &[], vec![method("b", "()V")]),
        ]);
        let targets = [classes.get("com/example/A")];
        let resolver = HierarchyResolver::default();

        let all = resolver.resolve(&classes, &selector("*"), &targets, MemberKind::Method);
        assert_eq!(all.len(), 2);
        assert!(resolver
            .resolve(&classes, &selector("missing"), &targets, MemberKind::Method)
            .is_empty());
    }

    #[test]
    fn wildcard_matches_every_member() {
        let mut class = build::class(
            "com/example/ClassA",
            None,
            &[],
            vec![method("run", "()V"), method("<init>", "()V")],
        );
        class.fields = vec![field("count", "I"), field("name", "Ljava/lang/String;")];
        let classes = Classes::new(vec![class]);
        let targets = [classes.get("com/example/ClassA")];
        let resolver = HierarchyResolver::default();
        let wildcard = selector("*");

        assert_eq!(resolver.resolve(&classes, &wildcard, &targets, MemberKind::Method).len(), 2);
        assert_eq!(resolver.resolve(&classes, &wildcard, &targets, MemberKind::Field).len(), 2);
    }

    #[test]
    fn reference_status_distinguishes_failures() {
        let classes = fixture();
        let targets = [classes.get("com/example/ClassA")];
        let resolver = HierarchyResolver::default();

        assert_eq!(
            resolver.check_reference(&classes, &selector("stop()V"), &targets, MemberKind::Method),
            ReferenceStatus::Resolved
        );
        let status =
            resolver.check_reference(&classes, &selector("missing"), &targets, MemberKind::Method);
        match status {
            ReferenceStatus::Unresolved { message } => {
                assert!(message.contains("missing"), "{message}");
                assert!(message.contains("com/example/ClassA"), "{message}");
            }
            other => panic!("unexpected status {other:?}"),
        }
        match resolver.check_reference(&classes, &selector("run"), &targets, MemberKind::Method) {
            ReferenceStatus::Ambiguous { name, candidates } => {
                assert_eq!(name, "run");
                assert_eq!(
                    candidates,
                    vec![
                        "Lcom/example/ClassA;run()V".to_string(),
                        "Lcom/example/ClassA;run(I)V".to_string()
                    ]
                );
            }
            other => panic!("unexpected status {other:?}"),
        }
    }

    #[test]
    fn candidates_flag_unique_names() {
        let classes = fixture();
        let targets = [classes.get("com/example/ClassA")];
        let candidates =
            HierarchyResolver::target_only().candidates(&classes, &targets, MemberKind::Method);

        let selectors: Vec<&str> = candidates.iter().map(|c| c.selector.as_str()).collect();
        assert_eq!(selectors, vec!["run()V", "run(I)V", "stop"]);
        assert!(candidates.iter().any(|c| c.name == "stop" && c.unique_name));
    }
}
