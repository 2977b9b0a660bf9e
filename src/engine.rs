use anyhow::Result;

use crate::annotation::InjectorAnnotation;
use crate::descriptor::MethodType;
use crate::hierarchy::{
    Candidate, ClassProvider, HierarchyResolver, MemberKind, ReferenceStatus, ResolvedMember,
};
use crate::inference::{
    self, Inference, InferenceRequest, InjectorKind, InjectorRegistry, InstructionFinder, Oracles,
};
use crate::ir::{Class, Method};
use crate::selector::{ParseOutcome, Selector, SelectorContext, SelectorParsers};

/// How far member lookups walk from each target class.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub(crate) enum Scope {
    /// The targets and all of their supertypes.
    Hierarchy,
    /// Only the targets themselves; injector target methods are looked up
    /// this way.
    TargetOnly,
}

impl Scope {
    fn resolver(self) -> HierarchyResolver {
        match self {
            Scope::Hierarchy => HierarchyResolver::default(),
            Scope::TargetOnly => HierarchyResolver::target_only(),
        }
    }
}

/// Collaborators that locate sites and answer data-flow questions.
#[derive(Clone, Copy)]
pub(crate) struct Collaborators<'a> {
    pub(crate) finder: &'a dyn InstructionFinder,
    pub(crate) oracles: Oracles<'a>,
}

/// Selector resolution and handler signature inference over a class graph.
pub(crate) struct MixinEngine {
    parsers: SelectorParsers,
    injectors: InjectorRegistry,
}

impl MixinEngine {
    pub(crate) fn new(parsers: SelectorParsers, injectors: InjectorRegistry) -> Self {
        Self { parsers, injectors }
    }

    pub(crate) fn parsers(&self) -> &SelectorParsers {
        &self.parsers
    }

    pub(crate) fn injector_kind(&self, annotation: &str) -> Option<InjectorKind> {
        self.injectors.kind_of(annotation)
    }

    pub(crate) fn resolve_selector(&self, text: &str, context: &SelectorContext) -> ParseOutcome {
        self.parsers.parse(text, context)
    }

    pub(crate) fn resolve_members<'a, P>(
        &self,
        provider: &'a P,
        selector: &Selector,
        targets: &[&'a Class],
        kind: MemberKind,
        scope: Scope,
    ) -> Vec<ResolvedMember<'a>>
    where
        P: ClassProvider + ?Sized,
    {
        scope.resolver().resolve(provider, selector, targets, kind)
    }

    pub(crate) fn is_ambiguous<'a, P>(
        &self,
        provider: &'a P,
        selector: &Selector,
        targets: &[&'a Class],
        kind: MemberKind,
        scope: Scope,
    ) -> bool
    where
        P: ClassProvider + ?Sized,
    {
        scope.resolver().is_ambiguous(provider, selector, targets, kind)
    }

    pub(crate) fn check_reference<'a, P>(
        &self,
        provider: &'a P,
        selector: &Selector,
        targets: &[&'a Class],
        kind: MemberKind,
        scope: Scope,
    ) -> ReferenceStatus
    where
        P: ClassProvider + ?Sized,
    {
        scope.resolver().check_reference(provider, selector, targets, kind)
    }

    pub(crate) fn candidate_members<'a, P>(
        &self,
        provider: &'a P,
        targets: &[&'a Class],
        kind: MemberKind,
        scope: Scope,
    ) -> Vec<Candidate>
    where
        P: ClassProvider + ?Sized,
    {
        scope.resolver().candidates(provider, targets, kind)
    }

    /// Locate the annotation's sites in `method` and infer the handler
    /// signatures they admit. Sites found nowhere yield
    /// `Inference::NoInstructions`.
    pub(crate) fn expected_signatures(
        &self,
        kind: InjectorKind,
        annotation: &InjectorAnnotation,
        class: &Class,
        method: &Method,
        handler: Option<&MethodType>,
        collaborators: Collaborators<'_>,
    ) -> Result<Inference> {
        let sites = collaborators
            .finder
            .find_instructions(annotation, class, method);
        let request = InferenceRequest {
            annotation,
            class,
            method,
            sites: &sites,
            handler,
        };
        inference::infer(kind, &request, collaborators.oracles)
    }

    pub(crate) fn to_canonical_string(&self, member: &ResolvedMember<'_>) -> String {
        member.to_canonical_string()
    }
}
