//! Pipeline graph validation: lint rules and diagnostics.
//!
//! Call [`validate`] for advisory diagnostics or [`validate_or_raise`] to fail
//! on any `Error`-severity issue. [`PipelineGraphBuilder::build`] runs the
//! latter, so a constructed [`PipelineGraph`] has already passed every rule.
//!
//! [`PipelineGraphBuilder::build`]: crate::graph::PipelineGraphBuilder::build

use std::collections::{HashMap, HashSet};

use triage_types::{StageId, TriageError};

use crate::graph::{EdgeTarget, PipelineGraph};

// ---------------------------------------------------------------------------
// Diagnostic types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct Diagnostic {
    pub rule: String,
    pub severity: Severity,
    pub message: String,
    pub stage: Option<StageId>,
    pub edge: Option<(StageId, EdgeTarget)>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Error,
    Warning,
}

impl Diagnostic {
    fn error(rule: &str, message: impl Into<String>) -> Self {
        Self {
            rule: rule.into(),
            severity: Severity::Error,
            message: message.into(),
            stage: None,
            edge: None,
        }
    }

    fn warning(rule: &str, message: impl Into<String>) -> Self {
        Self {
            severity: Severity::Warning,
            ..Self::error(rule, message)
        }
    }

    fn at_stage(mut self, stage: StageId) -> Self {
        self.stage = Some(stage);
        self
    }

    fn at_edge(mut self, from: StageId, to: EdgeTarget) -> Self {
        self.edge = Some((from, to));
        self
    }
}

// ---------------------------------------------------------------------------
// LintRule trait
// ---------------------------------------------------------------------------

pub trait LintRule: Send + Sync {
    fn name(&self) -> &str;
    fn apply(&self, graph: &PipelineGraph) -> Vec<Diagnostic>;
}

// ---------------------------------------------------------------------------
// Rules
// ---------------------------------------------------------------------------

struct NonEmptyRule;
impl LintRule for NonEmptyRule {
    fn name(&self) -> &str { "non_empty" }
    fn apply(&self, graph: &PipelineGraph) -> Vec<Diagnostic> {
        if graph.stages().next().is_none() {
            vec![Diagnostic::error(self.name(), "Pipeline has no stages")]
        } else {
            vec![]
        }
    }
}

struct UniqueStageRule;
impl LintRule for UniqueStageRule {
    fn name(&self) -> &str { "unique_stage" }
    fn apply(&self, graph: &PipelineGraph) -> Vec<Diagnostic> {
        let mut seen = HashSet::new();
        let mut reported = HashSet::new();
        let mut diags = Vec::new();
        for id in graph.stage_ids() {
            if !seen.insert(id) && reported.insert(id) {
                diags.push(
                    Diagnostic::error(self.name(), format!("Stage '{id}' is declared more than once"))
                        .at_stage(id),
                );
            }
        }
        diags
    }
}

struct EdgeEndpointRule;
impl LintRule for EdgeEndpointRule {
    fn name(&self) -> &str { "edge_endpoint" }
    fn apply(&self, graph: &PipelineGraph) -> Vec<Diagnostic> {
        let known: HashSet<StageId> = graph.stage_ids().into_iter().collect();
        let mut diags = Vec::new();
        for edge in graph.edges() {
            if !known.contains(&edge.from) {
                diags.push(
                    Diagnostic::error(
                        self.name(),
                        format!("Edge {} -> {} starts at unknown stage '{}'", edge.from, edge.to, edge.from),
                    )
                    .at_edge(edge.from, edge.to),
                );
            }
            if let EdgeTarget::Stage(to) = edge.to {
                if !known.contains(&to) {
                    diags.push(
                        Diagnostic::error(
                            self.name(),
                            format!("Edge {} -> {to} targets unknown stage '{to}'", edge.from),
                        )
                        .at_edge(edge.from, edge.to),
                    );
                }
            }
        }
        diags
    }
}

struct SingleEntryRule;
impl LintRule for SingleEntryRule {
    fn name(&self) -> &str { "single_entry" }
    fn apply(&self, graph: &PipelineGraph) -> Vec<Diagnostic> {
        if graph.stages().next().is_none() {
            return vec![];
        }
        let candidates = graph.entry_candidates();
        match candidates.len() {
            1 => vec![],
            0 => vec![Diagnostic::error(
                self.name(),
                "Pipeline has no entry stage; every stage has an incoming edge",
            )],
            _ => vec![Diagnostic::error(
                self.name(),
                format!(
                    "Pipeline has {} entry stages: {}; expected exactly one",
                    candidates.len(),
                    candidates.iter().map(StageId::as_str).collect::<Vec<_>>().join(", ")
                ),
            )],
        }
    }
}

struct AcyclicRule;
impl LintRule for AcyclicRule {
    fn name(&self) -> &str { "acyclic" }
    fn apply(&self, graph: &PipelineGraph) -> Vec<Diagnostic> {
        #[derive(Clone, Copy, PartialEq)]
        enum Mark {
            Visiting,
            Done,
        }

        fn visit(
            graph: &PipelineGraph,
            id: StageId,
            marks: &mut HashMap<StageId, Mark>,
            path: &mut Vec<StageId>,
        ) -> Option<Vec<StageId>> {
            match marks.get(&id) {
                Some(Mark::Done) => return None,
                Some(Mark::Visiting) => {
                    let start = path.iter().position(|s| *s == id).unwrap_or(0);
                    let mut cycle = path[start..].to_vec();
                    cycle.push(id);
                    return Some(cycle);
                }
                None => {}
            }
            marks.insert(id, Mark::Visiting);
            path.push(id);
            for edge in graph.outgoing_edges(id) {
                if let EdgeTarget::Stage(next) = edge.to {
                    if let Some(cycle) = visit(graph, next, marks, path) {
                        return Some(cycle);
                    }
                }
            }
            path.pop();
            marks.insert(id, Mark::Done);
            None
        }

        let mut marks = HashMap::new();
        for id in graph.stage_ids() {
            let mut path = Vec::new();
            if let Some(cycle) = visit(graph, id, &mut marks, &mut path) {
                let rendered: Vec<_> = cycle.iter().map(StageId::as_str).collect();
                return vec![Diagnostic::error(
                    self.name(),
                    format!("Pipeline contains a cycle: {}", rendered.join(" -> ")),
                )
                .at_stage(cycle[0])];
            }
        }
        vec![]
    }
}

/// Every path from the entry to a stage must pass through each stage it
/// requires.
struct RequirementRule;
impl LintRule for RequirementRule {
    fn name(&self) -> &str { "requirement_upstream" }
    fn apply(&self, graph: &PipelineGraph) -> Vec<Diagnostic> {
        let Some(entry) = graph.entry() else {
            return vec![];
        };
        let known: HashSet<StageId> = graph.stage_ids().into_iter().collect();
        let mut diags = Vec::new();

        for stage in graph.stages() {
            let id = stage.id();
            for &required in stage.requires() {
                let message = if !known.contains(&required) {
                    format!("Stage '{id}' requires '{required}', which is not in the pipeline")
                } else if required == entry {
                    continue;
                } else if id == entry
                    || graph.reachable_from(entry, Some(required)).contains(&id)
                {
                    format!("Stage '{id}' can be reached without passing through '{required}'")
                } else {
                    continue;
                };
                diags.push(Diagnostic::error(self.name(), message).at_stage(id));
            }
        }
        diags
    }
}

/// A stage whose outgoing edges are all conditional may end the run early.
struct ConditionalOnlyRule;
impl LintRule for ConditionalOnlyRule {
    fn name(&self) -> &str { "conditional_only" }
    fn apply(&self, graph: &PipelineGraph) -> Vec<Diagnostic> {
        let mut diags = Vec::new();
        for id in graph.stage_ids() {
            let edges: Vec<_> = graph.outgoing_edges(id).collect();
            if !edges.is_empty() && edges.iter().all(|e| e.is_conditional()) {
                diags.push(
                    Diagnostic::warning(
                        self.name(),
                        format!(
                            "Stage '{id}' has only conditional edges; the run ends after it when none match"
                        ),
                    )
                    .at_stage(id),
                );
            }
        }
        diags
    }
}

struct DuplicateEdgeRule;
impl LintRule for DuplicateEdgeRule {
    fn name(&self) -> &str { "duplicate_edge" }
    fn apply(&self, graph: &PipelineGraph) -> Vec<Diagnostic> {
        let mut counts: HashMap<(StageId, EdgeTarget), usize> = HashMap::new();
        let mut order = Vec::new();
        for edge in graph.edges().iter().filter(|e| !e.is_conditional()) {
            let count = counts.entry((edge.from, edge.to)).or_insert(0);
            if *count == 0 {
                order.push((edge.from, edge.to));
            }
            *count += 1;
        }
        order
            .into_iter()
            .filter(|key| counts.get(key).is_some_and(|n| *n > 1))
            .map(|(from, to)| {
                Diagnostic::warning(
                    self.name(),
                    format!("Unconditional edge {from} -> {to} is declared more than once"),
                )
                .at_edge(from, to)
            })
            .collect()
    }
}

const CONDITION_SCOPES: &[&str] = &["ticket", "analysis", "response"];

struct ConditionKeyRule;
impl LintRule for ConditionKeyRule {
    fn name(&self) -> &str { "condition_key" }
    fn apply(&self, graph: &PipelineGraph) -> Vec<Diagnostic> {
        let mut diags = Vec::new();
        for edge in graph.edges() {
            let Some(condition) = &edge.condition else {
                continue;
            };
            for clause in &condition.clauses {
                let scope = clause.key.split('.').next().unwrap_or_default();
                if !CONDITION_SCOPES.contains(&scope) {
                    diags.push(
                        Diagnostic::warning(
                            self.name(),
                            format!(
                                "Condition key '{}' on edge {} -> {} never resolves; it always reads as empty",
                                clause.key, edge.from, edge.to
                            ),
                        )
                        .at_edge(edge.from, edge.to),
                    );
                }
            }
        }
        diags
    }
}

// ---------------------------------------------------------------------------
// Public API
// ---------------------------------------------------------------------------

/// Run all built-in lint rules and return collected diagnostics.
pub fn validate(graph: &PipelineGraph) -> Vec<Diagnostic> {
    let rules: Vec<Box<dyn LintRule>> = vec![
        Box::new(NonEmptyRule),
        Box::new(UniqueStageRule),
        Box::new(EdgeEndpointRule),
        Box::new(SingleEntryRule),
        Box::new(AcyclicRule),
        Box::new(RequirementRule),
        Box::new(ConditionalOnlyRule),
        Box::new(DuplicateEdgeRule),
        Box::new(ConditionKeyRule),
    ];

    let mut diagnostics = Vec::new();
    for rule in &rules {
        diagnostics.extend(rule.apply(graph));
    }
    diagnostics
}

/// Run all lint rules; return `Err` if any `Error`-severity diagnostic found.
pub fn validate_or_raise(graph: &PipelineGraph) -> triage_types::Result<Vec<Diagnostic>> {
    let diagnostics = validate(graph);
    let errors: Vec<_> = diagnostics
        .iter()
        .filter(|d| d.severity == Severity::Error)
        .map(|d| d.message.as_str())
        .collect();
    if !errors.is_empty() {
        return Err(TriageError::GraphInvalid(errors.join("; ")));
    }
    Ok(diagnostics)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
