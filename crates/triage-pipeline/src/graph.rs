use std::fmt;
use std::sync::Arc;

use triage_types::{Result, StageId, TriageError};

use crate::condition::{parse_condition, ConditionExpr};
use crate::config::PipelineConfig;
use crate::stages::{AnalysisStage, ResponseStage, Stage};
use crate::validation::validate_or_raise;

// ---------------------------------------------------------------------------
// Edges
// ---------------------------------------------------------------------------

/// Where an edge leads: another stage, or out of the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EdgeTarget {
    Stage(StageId),
    Exit,
}

impl From<StageId> for EdgeTarget {
    fn from(stage: StageId) -> Self {
        EdgeTarget::Stage(stage)
    }
}

impl fmt::Display for EdgeTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EdgeTarget::Stage(stage) => write!(f, "{stage}"),
            EdgeTarget::Exit => f.write_str("exit"),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct PipelineEdge {
    pub from: StageId,
    pub to: EdgeTarget,
    pub condition: Option<ConditionExpr>,
}

impl PipelineEdge {
    pub fn is_conditional(&self) -> bool {
        self.condition.is_some()
    }
}

// ---------------------------------------------------------------------------
// PipelineGraph
// ---------------------------------------------------------------------------

/// Stage nodes and the directed edges between them.
///
/// Only constructible through [`PipelineGraphBuilder::build`], which rejects
/// malformed graphs.
#[derive(Clone)]
pub struct PipelineGraph {
    stages: Vec<Arc<dyn Stage>>,
    edges: Vec<PipelineEdge>,
    entry: Option<StageId>,
}

impl PipelineGraph {
    pub fn builder() -> PipelineGraphBuilder {
        PipelineGraphBuilder::default()
    }

    /// The default triage graph: `analysis -> response -> exit`.
    pub fn standard(config: &PipelineConfig) -> Result<Self> {
        Self::builder()
            .stage(AnalysisStage::new(config.fallback(StageId::Analysis)))
            .stage(ResponseStage::new(
                config.fallback(StageId::Response),
                config.allow_urgent_resolve,
            ))
            .edge(StageId::Analysis, StageId::Response)
            .edge(StageId::Response, EdgeTarget::Exit)
            .build()
    }

    /// The single stage without incoming edges.
    pub fn entry(&self) -> Option<StageId> {
        self.entry
    }

    pub fn stage(&self, id: StageId) -> Option<&Arc<dyn Stage>> {
        self.stages.iter().find(|s| s.id() == id)
    }

    /// Stage ids in declaration order.
    pub fn stage_ids(&self) -> Vec<StageId> {
        self.stages.iter().map(|s| s.id()).collect()
    }

    pub fn stages(&self) -> impl Iterator<Item = &Arc<dyn Stage>> {
        self.stages.iter()
    }

    pub fn edges(&self) -> &[PipelineEdge] {
        &self.edges
    }

    /// Outgoing edges of `from`, in declaration order.
    pub fn outgoing_edges(&self, from: StageId) -> impl Iterator<Item = &PipelineEdge> {
        self.edges.iter().filter(move |e| e.from == from)
    }

    /// Stages reachable from `from` along edges, skipping `blocked`.
    pub(crate) fn reachable_from(&self, from: StageId, blocked: Option<StageId>) -> Vec<StageId> {
        let mut seen = vec![from];
        let mut stack = vec![from];
        while let Some(current) = stack.pop() {
            for edge in self.outgoing_edges(current) {
                if let EdgeTarget::Stage(next) = edge.to {
                    if Some(next) != blocked && !seen.contains(&next) {
                        seen.push(next);
                        stack.push(next);
                    }
                }
            }
        }
        seen
    }

    /// Assemble a graph without validating it.
    pub(crate) fn assemble(stages: Vec<Arc<dyn Stage>>, edges: Vec<PipelineEdge>) -> Self {
        let mut graph = Self {
            stages,
            edges,
            entry: None,
        };
        graph.entry = graph.compute_entry();
        graph
    }

    fn compute_entry(&self) -> Option<StageId> {
        let mut candidates = self.entry_candidates();
        match candidates.len() {
            1 => candidates.pop(),
            _ => None,
        }
    }

    /// Stages with no incoming stage-to-stage edge.
    pub(crate) fn entry_candidates(&self) -> Vec<StageId> {
        self.stage_ids()
            .into_iter()
            .filter(|id| {
                !self
                    .edges
                    .iter()
                    .any(|e| e.to == EdgeTarget::Stage(*id) && e.from != *id)
            })
            .collect()
    }
}

impl fmt::Debug for PipelineGraph {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PipelineGraph")
            .field("stages", &self.stage_ids())
            .field("edges", &self.edges)
            .field("entry", &self.entry)
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Builder
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct PipelineGraphBuilder {
    stages: Vec<Arc<dyn Stage>>,
    edges: Vec<(StageId, EdgeTarget, Option<String>)>,
}

impl PipelineGraphBuilder {
    pub fn stage(self, stage: impl Stage + 'static) -> Self {
        self.shared_stage(Arc::new(stage))
    }

    pub fn shared_stage(mut self, stage: Arc<dyn Stage>) -> Self {
        self.stages.push(stage);
        self
    }

    pub fn edge(mut self, from: StageId, to: impl Into<EdgeTarget>) -> Self {
        self.edges.push((from, to.into(), None));
        self
    }

    /// An edge taken only when `condition` holds for the run state.
    pub fn conditional_edge(
        mut self,
        from: StageId,
        to: impl Into<EdgeTarget>,
        condition: impl Into<String>,
    ) -> Self {
        self.edges.push((from, to.into(), Some(condition.into())));
        self
    }

    /// Parse edge conditions, assemble the graph, and validate it.
    pub fn build(self) -> Result<PipelineGraph> {
        let mut edges = Vec::with_capacity(self.edges.len());
        for (from, to, condition) in self.edges {
            let condition = match condition {
                Some(src) => {
                    let expr = parse_condition(&src).map_err(|e| {
                        TriageError::GraphInvalid(format!("edge {from} -> {to}: {e}"))
                    })?;
                    (!expr.clauses.is_empty()).then_some(expr)
                }
                None => None,
            };
            edges.push(PipelineEdge {
                from,
                to,
                condition,
            });
        }

        let graph = PipelineGraph::assemble(self.stages, edges);
        let warnings = validate_or_raise(&graph)?;
        for w in &warnings {
            tracing::warn!(rule = %w.rule, "{}", w.message);
        }
        Ok(graph)
    }
}
