//! `TicketState`: the accumulator owned by a single pipeline run.

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{
    AnalysisResult, ResponseInput, ResponseResult, Result, StageId, StageStatus, Ticket,
    TriageError,
};

/// Lifecycle phase of one ticket run. Phases only move forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "phase", content = "stage")]
pub enum RunPhase {
    Created,
    Running(StageId),
    Done(StageId),
    Completed,
    Aborted,
    Cancelled,
}

impl RunPhase {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            RunPhase::Completed | RunPhase::Aborted | RunPhase::Cancelled
        )
    }
}

impl fmt::Display for RunPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunPhase::Created => f.write_str("created"),
            RunPhase::Running(stage) => write!(f, "running({stage})"),
            RunPhase::Done(stage) => write!(f, "done({stage})"),
            RunPhase::Completed => f.write_str("completed"),
            RunPhase::Aborted => f.write_str("aborted"),
            RunPhase::Cancelled => f.write_str("cancelled"),
        }
    }
}

/// One entry in the outcome log: exactly one per executed stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageRecord {
    pub stage: StageId,
    pub attempts: u32,
    pub status: StageStatus,
    #[serde(rename = "elapsed_ms", with = "crate::duration_ms")]
    pub elapsed: Duration,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

/// Per-run state threaded through the pipeline.
///
/// Owned by value by the run that created it. Every mutator fails with
/// [`TriageError::StateSealed`] once the phase is terminal.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TicketState {
    run_id: Uuid,
    ticket: Ticket,
    analysis: Option<AnalysisResult>,
    response: Option<ResponseResult>,
    outcomes: Vec<StageRecord>,
    phase: RunPhase,
    #[serde(rename = "elapsed_ms", with = "crate::duration_ms")]
    elapsed: Duration,
}

impl TicketState {
    pub fn new(ticket: Ticket) -> Self {
        Self {
            run_id: Uuid::new_v4(),
            ticket,
            analysis: None,
            response: None,
            outcomes: Vec::new(),
            phase: RunPhase::Created,
            elapsed: Duration::ZERO,
        }
    }

    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    pub fn ticket(&self) -> &Ticket {
        &self.ticket
    }

    pub fn analysis(&self) -> Option<&AnalysisResult> {
        self.analysis.as_ref()
    }

    pub fn response(&self) -> Option<&ResponseResult> {
        self.response.as_ref()
    }

    /// Read-only outcome log, in execution order.
    pub fn outcomes(&self) -> &[StageRecord] {
        &self.outcomes
    }

    pub fn outcome(&self, stage: StageId) -> Option<&StageRecord> {
        self.outcomes.iter().find(|r| r.stage == stage)
    }

    pub fn phase(&self) -> RunPhase {
        self.phase
    }

    /// Total wall-clock time of the run, set when the run reaches a terminal phase.
    pub fn elapsed(&self) -> Duration {
        self.elapsed
    }

    /// Whether the result produced by `stage` is present.
    pub fn has_result(&self, stage: StageId) -> bool {
        match stage {
            StageId::Analysis => self.analysis.is_some(),
            StageId::Response => self.response.is_some(),
        }
    }

    /// Input for the response stage. Fails when analysis has not produced a value.
    pub fn response_input(&self) -> Result<ResponseInput<'_>> {
        let analysis = self
            .analysis
            .as_ref()
            .ok_or(TriageError::MissingDependency {
                stage: StageId::Response,
                missing: StageId::Analysis,
            })?;
        Ok(ResponseInput {
            ticket: &self.ticket,
            analysis,
        })
    }

    fn ensure_open(&self) -> Result<()> {
        if self.phase.is_terminal() {
            return Err(TriageError::StateSealed {
                ticket_id: self.ticket.id.clone(),
                phase: self.phase,
            });
        }
        Ok(())
    }

    pub fn set_analysis(&mut self, analysis: AnalysisResult) -> Result<()> {
        self.ensure_open()?;
        self.analysis = Some(analysis);
        Ok(())
    }

    pub fn set_response(&mut self, response: ResponseResult) -> Result<()> {
        self.ensure_open()?;
        self.response = Some(response);
        Ok(())
    }

    pub fn record_outcome(&mut self, record: StageRecord) -> Result<()> {
        self.ensure_open()?;
        self.outcomes.push(record);
        Ok(())
    }

    pub fn advance(&mut self, phase: RunPhase) -> Result<()> {
        self.ensure_open()?;
        self.phase = phase;
        Ok(())
    }

    /// Move to a terminal phase and stamp the total run time.
    pub fn seal(&mut self, phase: RunPhase, elapsed: Duration) -> Result<()> {
        self.ensure_open()?;
        self.phase = phase;
        self.elapsed = elapsed;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Category, Priority};

    fn analysis() -> AnalysisResult {
        AnalysisResult {
            category: Category::Billing,
            priority: Priority::Medium,
            expertise: Default::default(),
            confidence: 0.7,
            key_points: vec![],
            urgency_indicators: vec![],
            sentiment: 0.0,
            business_impact: None,
            suggested_template: None,
        }
    }

    #[test]
    fn new_state_is_created_and_empty() {
        let state = TicketState::new(Ticket::new("T-1", "s", "b"));
        assert_eq!(state.phase(), RunPhase::Created);
        assert!(state.outcomes().is_empty());
        assert!(state.analysis().is_none());
        assert!(state.response().is_none());
    }

    #[test]
    fn response_input_requires_analysis() {
        let mut state = TicketState::new(Ticket::new("T-1", "s", "b"));
        assert!(matches!(
            state.response_input(),
            Err(TriageError::MissingDependency {
                stage: StageId::Response,
                missing: StageId::Analysis
            })
        ));

        state.set_analysis(analysis()).unwrap();
        let input = state.response_input().unwrap();
        assert_eq!(input.analysis.category, Category::Billing);
        assert_eq!(input.ticket.id, "T-1");
    }

    #[test]
    fn sealed_state_rejects_mutation() {
        let mut state = TicketState::new(Ticket::new("T-1", "s", "b"));
        state
            .seal(RunPhase::Completed, Duration::from_millis(5))
            .unwrap();
        assert_eq!(state.elapsed(), Duration::from_millis(5));

        assert!(matches!(
            state.set_analysis(analysis()),
            Err(TriageError::StateSealed { .. })
        ));
        assert!(matches!(
            state.advance(RunPhase::Running(StageId::Analysis)),
            Err(TriageError::StateSealed { .. })
        ));
        assert!(state.analysis().is_none());
    }

    #[test]
    fn run_phase_serializes_adjacently_tagged() {
        let json = serde_json::to_value(RunPhase::Running(StageId::Response)).unwrap();
        assert_eq!(json, serde_json::json!({"phase": "running", "stage": "response"}));
        let json = serde_json::to_value(RunPhase::Completed).unwrap();
        assert_eq!(json, serde_json::json!({"phase": "completed"}));
    }

    #[test]
    fn stage_record_serializes_elapsed_as_millis() {
        let record = StageRecord {
            stage: StageId::Analysis,
            attempts: 3,
            status: StageStatus::Fallback,
            elapsed: Duration::from_millis(1250),
            detail: None,
        };
        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["elapsed_ms"], 1250);
        assert_eq!(json["status"], "fallback");
        assert!(json.get("detail").is_none());
    }
}
