use rayon::prelude::*;
use serde::Serialize;
use serde_sarif::sarif::{
    Location, LogicalLocation, Message, MultiformatMessageString, ReportingDescriptor,
    Result as SarifResult,
};

use crate::annotation::{HandlerMethod, MixinDescription, MixinFile};
use crate::classpath::ClassPool;
use crate::dataflow::{LocalVariableTableOracle, WorklistStackOracle};
use crate::descriptor::{MethodType, method_type};
use crate::engine::{Collaborators, MixinEngine, Scope};
use crate::hierarchy::{Member, MemberKind, ReferenceStatus};
use crate::inference::{Inference, Oracles};
use crate::locate::{InjectionPointFinder, has_selector_target};
use crate::selector::{ParseOutcome, SelectorContext};
use crate::signature::{MatchResult, MethodSignature};
use crate::telemetry::{Telemetry, attribute, with_span};

/// Metadata describing a diagnostic rule.
#[derive(Clone, Debug)]
pub(crate) struct RuleMetadata {
    pub(crate) id: &'static str,
    pub(crate) name: &'static str,
    pub(crate) description: &'static str,
}

pub(crate) const UNPARSEABLE_SELECTOR: &str = "MIXIN_UNPARSEABLE_SELECTOR";
pub(crate) const UNRESOLVED_TARGET: &str = "MIXIN_UNRESOLVED_TARGET";
pub(crate) const AMBIGUOUS_TARGET: &str = "MIXIN_AMBIGUOUS_TARGET";
pub(crate) const NO_INJECTION_POINT: &str = "MIXIN_NO_INJECTION_POINT";
pub(crate) const INCONSISTENT_INJECTION_POINTS: &str = "MIXIN_INCONSISTENT_INJECTION_POINTS";
pub(crate) const SIGNATURE_INFERENCE_FAILED: &str = "MIXIN_SIGNATURE_INFERENCE_FAILED";
pub(crate) const INVALID_HANDLER_SIGNATURE: &str = "MIXIN_INVALID_HANDLER_SIGNATURE";

pub(crate) const RULES: &[RuleMetadata] = &[
    RuleMetadata {
        id: AMBIGUOUS_TARGET,
        name: "Ambiguous target method",
        description: "Method selector matches overloads with different descriptors",
    },
    RuleMetadata {
        id: INCONSISTENT_INJECTION_POINTS,
        name: "Inconsistent injection points",
        description: "Matched instructions disagree so no single handler fits them all",
    },
    RuleMetadata {
        id: INVALID_HANDLER_SIGNATURE,
        name: "Invalid handler signature",
        description: "Handler descriptor fits none of the expected signatures",
    },
    RuleMetadata {
        id: NO_INJECTION_POINT,
        name: "No injection point",
        description: "Injection point matches no instruction in the target method",
    },
    RuleMetadata {
        id: SIGNATURE_INFERENCE_FAILED,
        name: "Signature inference failed",
        description: "Expected handler signature cannot be determined",
    },
    RuleMetadata {
        id: UNPARSEABLE_SELECTOR,
        name: "Unparseable selector",
        description: "Selector text matches no selector grammar",
    },
    RuleMetadata {
        id: UNRESOLVED_TARGET,
        name: "Unresolved target",
        description: "Target class or method cannot be found",
    },
];

/// One diagnostic raised for a handler.
#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
pub(crate) struct Finding {
    pub(crate) rule_id: &'static str,
    pub(crate) message: String,
}

/// Signatures inferred for one resolved target method.
#[derive(Clone, Debug, Serialize)]
pub(crate) struct TargetReport {
    pub(crate) target: String,
    pub(crate) signatures: Vec<MethodSignature>,
}

/// Everything learned about one handler.
#[derive(Clone, Debug, Serialize)]
pub(crate) struct HandlerReport {
    pub(crate) mixin: String,
    pub(crate) handler: String,
    pub(crate) descriptor: String,
    pub(crate) findings: Vec<Finding>,
    pub(crate) targets: Vec<TargetReport>,
}

impl HandlerReport {
    fn new(mixin: &MixinDescription, handler: &HandlerMethod) -> Self {
        Self {
            mixin: mixin.name.clone(),
            handler: handler.name.clone(),
            descriptor: handler.descriptor.clone(),
            findings: Vec::new(),
            targets: Vec::new(),
        }
    }

    fn label(&self) -> String {
        format!("{}.{}{}", self.mixin, self.handler, self.descriptor)
    }

    fn push(&mut self, rule_id: &'static str, message: String) {
        self.findings.push(Finding { rule_id, message });
    }

    fn record(
        &mut self,
        target: String,
        inference: anyhow::Result<Inference>,
        handler: &MethodType,
    ) {
        let label = self.label();
        let signatures = match inference {
            Err(err) => {
                self.push(
                    SIGNATURE_INFERENCE_FAILED,
                    format!("{label} cannot inject into {target}: {err:#}"),
                );
                Vec::new()
            }
            Ok(Inference::NoInstructions) => {
                self.push(
                    NO_INJECTION_POINT,
                    format!("{label} matches no injection point in {target}"),
                );
                Vec::new()
            }
            Ok(Inference::Inconsistent(reason)) => {
                self.push(
                    INCONSISTENT_INJECTION_POINTS,
                    format!("{label} matches inconsistent injection points in {target}: {reason}"),
                );
                Vec::new()
            }
            Ok(Inference::Unavailable(reason)) => {
                self.push(
                    SIGNATURE_INFERENCE_FAILED,
                    format!("{label} has no inferable signature for {target}: {reason}"),
                );
                Vec::new()
            }
            Ok(Inference::Signatures(signatures)) => {
                let outcomes: Vec<MatchResult> = signatures
                    .iter()
                    .map(|signature| signature.matches(&handler.parameters, &handler.return_type))
                    .collect();
                match outcomes.iter().find(|outcome| outcome.is_match()) {
                    Some(MatchResult::Matches { warnings }) => {
                        for warning in warnings {
                            tracing::warn!("{label} in {target}: {warning}");
                        }
                    }
                    _ => {
                        let expected: Vec<String> =
                            signatures.iter().map(ToString::to_string).collect();
                        let reason = outcomes
                            .iter()
                            .find_map(|outcome| match outcome {
                                MatchResult::Mismatch { reason } => Some(reason.as_str()),
                                MatchResult::Matches { .. } => None,
                            })
                            .unwrap_or("no signature matches");
                        self.push(
                            INVALID_HANDLER_SIGNATURE,
                            format!(
                                "{label} does not fit {target}: {reason}; expected {}",
                                expected.join(" or ")
                            ),
                        );
                    }
                }
                signatures
            }
        };
        self.targets.push(TargetReport { target, signatures });
    }
}

/// Aggregated SARIF payload of a check run.
pub(crate) struct CheckOutput {
    pub(crate) rules: Vec<ReportingDescriptor>,
    pub(crate) results: Vec<SarifResult>,
    pub(crate) handler_count: usize,
}

/// Analyze every handler in parallel; reports come back in input order.
pub(crate) fn analyze_mixins(
    engine: &MixinEngine,
    pool: &ClassPool,
    mixins: &MixinFile,
    telemetry: Option<&Telemetry>,
) -> Vec<HandlerReport> {
    let handlers: Vec<(&MixinDescription, &HandlerMethod)> = mixins
        .mixins
        .iter()
        .flat_map(|mixin| mixin.handlers.iter().map(move |handler| (mixin, handler)))
        .collect();
    handlers
        .par_iter()
        .map(|(mixin, handler)| {
            let attributes = [
                attribute("mixin", mixin.name.clone()),
                attribute("handler", handler.name.clone()),
            ];
            with_span(telemetry, "handler", &attributes, || {
                analyze_handler(engine, pool, mixin, handler)
            })
        })
        .collect()
}

pub(crate) fn check_mixins(
    engine: &MixinEngine,
    pool: &ClassPool,
    mixins: &MixinFile,
    telemetry: Option<&Telemetry>,
) -> CheckOutput {
    let reports = analyze_mixins(engine, pool, mixins, telemetry);
    let handler_count = reports.len();
    let mut results: Vec<SarifResult> = reports
        .iter()
        .flat_map(|report| {
            report.findings.iter().map(|finding| {
                let location = method_location(&report.mixin, &report.handler, &report.descriptor);
                let mut result = SarifResult::builder()
                    .message(result_message(finding.message.clone()))
                    .locations(vec![location])
                    .build();
                result.rule_id = Some(finding.rule_id.to_string());
                result
            })
        })
        .collect();

    results.sort_by(|left, right| {
        let left_id = left.rule_id.as_deref().unwrap_or("");
        let right_id = right.rule_id.as_deref().unwrap_or("");
        let left_msg = left.message.text.as_deref().unwrap_or("");
        let right_msg = right.message.text.as_deref().unwrap_or("");
        left_id.cmp(right_id).then(left_msg.cmp(right_msg))
    });

    CheckOutput {
        rules: RULES.iter().map(rule_descriptor).collect(),
        results,
        handler_count,
    }
}

fn analyze_handler(
    engine: &MixinEngine,
    pool: &ClassPool,
    mixin: &MixinDescription,
    handler: &HandlerMethod,
) -> HandlerReport {
    let mut report = HandlerReport::new(mixin, handler);
    let annotation = &handler.annotation;
    let Some(kind) = engine.injector_kind(&annotation.annotation) else {
        tracing::debug!(
            "{} is not an injector annotation; skipping {}",
            annotation.annotation,
            report.label()
        );
        return report;
    };
    let handler_type = match method_type(&handler.descriptor) {
        Ok(handler_type) => handler_type,
        Err(err) => {
            let label = report.label();
            report.push(
                INVALID_HANDLER_SIGNATURE,
                format!("{label} has a malformed descriptor: {err:#}"),
            );
            return report;
        }
    };

    let context = SelectorContext {
        targets: mixin.target_names(),
        desc_declarations: mixin.desc.clone(),
    };
    let mut targets = Vec::new();
    for name in &context.targets {
        match pool.get(name) {
            Some(class) => targets.push(class),
            None => report.push(
                UNRESOLVED_TARGET,
                format!("target class {name} of {} is not on the classpath", mixin.name),
            ),
        }
    }
    if targets.is_empty() {
        return report;
    }

    for at in annotation.at.iter().filter(|at| has_selector_target(at)) {
        let Some(target) = &at.target else {
            continue;
        };
        let label = report.label();
        match engine.resolve_selector(target, &context) {
            ParseOutcome::Parsed(_) => {}
            ParseOutcome::UnknownDynamic { id } => {
                tracing::debug!("{label}: no parser for dynamic injection point target @{id}");
                return report;
            }
            ParseOutcome::Unparseable => {
                report.push(
                    UNPARSEABLE_SELECTOR,
                    format!("{label}: {} target {target:?} does not parse", at.value),
                );
                return report;
            }
        }
    }

    let finder = InjectionPointFinder::new(engine.parsers(), &context);
    let collaborators = Collaborators {
        finder: &finder,
        oracles: Oracles {
            classes: pool,
            stack: &WorklistStackOracle,
            locals: &LocalVariableTableOracle,
        },
    };
    for text in &annotation.method {
        let label = report.label();
        let selector = match engine.resolve_selector(text, &context) {
            ParseOutcome::Parsed(selector) => selector,
            ParseOutcome::UnknownDynamic { id } => {
                tracing::debug!("{label}: no parser for dynamic selector @{id}");
                continue;
            }
            ParseOutcome::Unparseable => {
                report.push(
                    UNPARSEABLE_SELECTOR,
                    format!("{label}: method selector {text:?} does not parse"),
                );
                continue;
            }
        };
        match engine.check_reference(
            pool,
            &selector,
            &targets,
            MemberKind::Method,
            Scope::TargetOnly,
        ) {
            ReferenceStatus::Resolved => {}
            ReferenceStatus::Unresolved { message } => {
                report.push(UNRESOLVED_TARGET, format!("{label}: {message}"));
                continue;
            }
            ReferenceStatus::Ambiguous { name, candidates } => {
                report.push(
                    AMBIGUOUS_TARGET,
                    format!(
                        "{label}: method {name} is ambiguous between {}",
                        candidates.join(", ")
                    ),
                );
                continue;
            }
        }

        let members = engine.resolve_members(
            pool,
            &selector,
            &targets,
            MemberKind::Method,
            Scope::TargetOnly,
        );
        for member in members {
            let Member::Method(method) = member.member else {
                continue;
            };
            let inference = engine.expected_signatures(
                kind,
                annotation,
                member.owner,
                method,
                Some(&handler_type),
                collaborators,
            );
            report.record(engine.to_canonical_string(&member), inference, &handler_type);
        }
    }
    report
}

fn rule_descriptor(metadata: &RuleMetadata) -> ReportingDescriptor {
    ReportingDescriptor::builder()
        .id(metadata.id)
        .name(metadata.name)
        .short_description(
            MultiformatMessageString::builder()
                .text(metadata.description)
                .build(),
        )
        .build()
}

fn method_location(class_name: &str, method_name: &str, descriptor: &str) -> Location {
    let logical = LogicalLocation::builder()
        .name(format!("{class_name}.{method_name}{descriptor}"))
        .kind("function")
        .build();
    Location::builder().logical_locations(vec![logical]).build()
}

fn result_message(text: impl Into<String>) -> Message {
    Message::builder().text(text.into()).build()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::annotation::parse_mixins;
    use crate::inference::InjectorRegistry;
    use crate::scan::parse_class_bytes;
    use crate::selector::SelectorParsers;
    use crate::test_harness::field_write_class;

    fn pool() -> ClassPool {
        ClassPool::new(vec![parse_class_bytes(&field_write_class()).expect("parse Foo")])
    }

    fn engine() -> MixinEngine {
        MixinEngine::new(SelectorParsers::standard(), InjectorRegistry::standard())
    }

    fn findings(handlers: &str) -> Vec<Vec<Finding>> {
        let mixins = parse_mixins(&format!(
            r#"{{ "mixins": [{{ "name": "FooMixin", "targets": ["com.example.Foo"], "handlers": {handlers} }}] }}"#
        ))
        .expect("parse mixins");
        analyze_mixins(&engine(), &pool(), &mixins, None)
            .into_iter()
            .map(|report| report.findings)
            .collect()
    }

    fn rule_ids(findings: &[Finding]) -> Vec<&'static str> {
        findings.iter().map(|finding| finding.rule_id).collect()
    }

    #[test]
    fn matching_field_write_redirect_is_clean() {
        let reports = findings(
            r#"[{ "name": "set", "descriptor": "(Lcom/example/Foo;I)V", "annotation": "Redirect",
                  "method": "bar", "at": { "value": "FIELD", "target": "Lcom/example/Foo;x:I" } }]"#,
        );
        assert_eq!(reports, vec![Vec::<Finding>::new()]);
    }

    #[test]
    fn mismatched_handler_is_reported_with_expectations() {
        let reports = findings(
            r#"[{ "name": "set", "descriptor": "(I)V", "annotation": "Redirect",
                  "method": "bar", "at": { "value": "FIELD", "target": "Lcom/example/Foo;x:I" } }]"#,
        );
        assert_eq!(rule_ids(&reports[0]), vec![INVALID_HANDLER_SIGNATURE]);
        assert!(reports[0][0].message.contains("Foo instance, int value"), "{:?}", reports[0]);
    }

    #[test]
    fn selector_and_injection_point_problems_map_to_rules() {
        let reports = findings(
            r#"[
              { "name": "a", "descriptor": "()V", "annotation": "Inject", "method": "missing",
                "at": { "value": "HEAD" } },
              { "name": "b", "descriptor": "()V", "annotation": "Inject", "method": "not a selector!",
                "at": { "value": "HEAD" } },
              { "name": "c", "descriptor": "()V", "annotation": "Inject", "method": "@Custom(run)",
                "at": { "value": "HEAD" } },
              { "name": "d", "descriptor": "(I)V", "annotation": "Redirect", "method": "bar",
                "at": { "value": "FIELD", "target": "Lcom/example/Foo;y:I" } },
              { "name": "e", "descriptor": "()V", "annotation": "Redirect", "method": "bar",
                "at": { "value": "RETURN" } }
            ]"#,
        );
        assert_eq!(rule_ids(&reports[0]), vec![UNRESOLVED_TARGET]);
        assert_eq!(rule_ids(&reports[1]), vec![UNPARSEABLE_SELECTOR]);
        assert!(reports[2].is_empty());
        assert_eq!(rule_ids(&reports[3]), vec![NO_INJECTION_POINT]);
        assert_eq!(rule_ids(&reports[4]), vec![SIGNATURE_INFERENCE_FAILED]);
    }

    #[test]
    fn injection_point_targets_are_parsed_before_searching() {
        let reports = findings(
            r#"[
              { "name": "a", "descriptor": "(Lcom/example/Foo;I)V", "annotation": "Redirect",
                "method": "bar", "at": { "value": "FIELD", "target": "@acme:Custom(x)" } },
              { "name": "b", "descriptor": "(Lcom/example/Foo;I)V", "annotation": "Redirect",
                "method": "bar", "at": { "value": "FIELD", "target": "not a selector!" } },
              { "name": "c", "descriptor": "()V", "annotation": "Redirect",
                "method": "bar", "at": { "value": "INVOKE", "target": "(((" } }
            ]"#,
        );
        assert!(reports[0].is_empty(), "{:?}", reports[0]);
        assert_eq!(rule_ids(&reports[1]), vec![UNPARSEABLE_SELECTOR]);
        assert!(reports[1][0].message.contains("FIELD target"), "{:?}", reports[1]);
        assert_eq!(rule_ids(&reports[2]), vec![UNPARSEABLE_SELECTOR]);
    }

    #[test]
    fn inject_handler_takes_callback_info() {
        let reports = findings(
            r#"[
              { "name": "ok", "descriptor": "(Lorg/spongepowered/asm/mixin/injection/callback/CallbackInfo;)V",
                "annotation": "Inject", "method": "bar", "at": { "value": "HEAD" } },
              { "name": "bad", "descriptor": "()V", "annotation": "Inject", "method": "bar",
                "at": { "value": "HEAD" } }
            ]"#,
        );
        assert!(reports[0].is_empty(), "{:?}", reports[0]);
        assert_eq!(rule_ids(&reports[1]), vec![INVALID_HANDLER_SIGNATURE]);
    }

    #[test]
    fn missing_target_class_is_unresolved() {
        let mixins = parse_mixins(
            r#"{ "mixins": [{ "name": "GhostMixin", "targets": ["com.example.Ghost"],
                 "handlers": [{ "name": "a", "descriptor": "()V", "annotation": "Inject",
                                "method": "run", "at": { "value": "HEAD" } }] }] }"#,
        )
        .expect("parse mixins");

        let output = check_mixins(&engine(), &pool(), &mixins, None);

        assert_eq!(output.handler_count, 1);
        assert_eq!(output.rules.len(), RULES.len());
        assert_eq!(output.results.len(), 1);
        assert_eq!(output.results[0].rule_id.as_deref(), Some(UNRESOLVED_TARGET));
    }

    #[test]
    fn rule_ids_are_unique_and_sorted() {
        let ids: Vec<&str> = RULES.iter().map(|rule| rule.id).collect();
        let mut sorted = ids.clone();
        sorted.sort();
        sorted.dedup();
        assert_eq!(ids, sorted);
    }
}
