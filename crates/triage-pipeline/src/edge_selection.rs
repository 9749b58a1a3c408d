//! Edge selection after a stage completes.
//!
//! Conditional edges are tried first, in declaration order, and the first one
//! whose condition holds wins. Otherwise the first unconditional edge is taken.
//! No match means the run ends after this stage.

use triage_types::StageId;

use crate::condition::evaluate_condition;
use crate::graph::{PipelineEdge, PipelineGraph};

/// Select the next edge to follow after `from` completes.
pub fn select_edge<'a>(
    graph: &'a PipelineGraph,
    from: StageId,
    resolve: &dyn Fn(&str) -> String,
) -> Option<&'a PipelineEdge> {
    let matched = graph.outgoing_edges(from).find(|e| {
        e.condition
            .as_ref()
            .is_some_and(|expr| evaluate_condition(expr, resolve))
    });
    matched.or_else(|| graph.outgoing_edges(from).find(|e| !e.is_conditional()))
}
