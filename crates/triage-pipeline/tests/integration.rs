//! End-to-end tests for the triage pipeline.
//!
//! Each test drives tickets through the public `Orchestrator` front door with
//! either the deterministic rules generator or a scripted mock.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};

use triage_llm::{GenerationRequest, Generator, RawOutput, RulesGenerator};
use triage_pipeline::{
    CancelToken, EdgeTarget, Orchestrator, PipelineConfig, PipelineEvent, PipelineGraph,
    AnalysisStage, ResponseStage,
};
use triage_types::{
    Category, CustomerInfo, NextAction, Priority, Result, RunPhase, StageId, StageStatus, Ticket,
    TriageError,
};

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Replies with a fixed script per stage and counts calls.
struct ScriptedGenerator {
    analysis: Box<dyn Fn(usize) -> Result<RawOutput> + Send + Sync>,
    response: Box<dyn Fn(usize) -> Result<RawOutput> + Send + Sync>,
    analysis_calls: AtomicUsize,
    response_calls: AtomicUsize,
}

impl ScriptedGenerator {
    fn new(
        analysis: impl Fn(usize) -> Result<RawOutput> + Send + Sync + 'static,
        response: impl Fn(usize) -> Result<RawOutput> + Send + Sync + 'static,
    ) -> Self {
        Self {
            analysis: Box::new(analysis),
            response: Box::new(response),
            analysis_calls: AtomicUsize::new(0),
            response_calls: AtomicUsize::new(0),
        }
    }

    fn calls(&self, stage: StageId) -> usize {
        match stage {
            StageId::Analysis => self.analysis_calls.load(Ordering::SeqCst),
            StageId::Response => self.response_calls.load(Ordering::SeqCst),
        }
    }
}

#[async_trait]
impl Generator for ScriptedGenerator {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn generate(&self, request: &GenerationRequest) -> Result<RawOutput> {
        match request.stage {
            StageId::Analysis => (self.analysis)(self.analysis_calls.fetch_add(1, Ordering::SeqCst)),
            StageId::Response => (self.response)(self.response_calls.fetch_add(1, Ordering::SeqCst)),
        }
    }
}

fn structured(value: Value) -> Result<RawOutput> {
    Ok(RawOutput::Structured(value))
}

fn fast_config() -> PipelineConfig {
    let mut config = PipelineConfig::default();
    config.backoff.base_ms = 0;
    config
}

fn rules_orchestrator() -> Orchestrator {
    Orchestrator::new(fast_config(), Arc::new(RulesGenerator::new())).expect("valid config")
}

fn ticket(id: &str, body: &str) -> Ticket {
    Ticket::new(id, "Support request", body)
}

// ---------------------------------------------------------------------------
// Rules-driven runs
// ---------------------------------------------------------------------------

#[tokio::test]
async fn double_charge_is_billing_medium_and_resolved() {
    let state = rules_orchestrator()
        .process(ticket("T-100", "I was charged twice this month"))
        .await
        .expect("run should complete");

    assert_eq!(state.phase(), RunPhase::Completed);
    let analysis = state.analysis().unwrap();
    assert_eq!(analysis.category, Category::Billing);
    assert_eq!(analysis.priority, Priority::Medium);
    assert!(analysis.confidence > 0.0);

    let response = state.response().unwrap();
    assert_eq!(response.next_action, NextAction::Resolve);
    assert_eq!(response.template_id.as_deref(), Some("billing_inquiry"));
    assert!(state
        .outcomes()
        .iter()
        .all(|r| r.status == StageStatus::Success));
}

#[tokio::test]
async fn urgent_payroll_blocker_is_escalated() {
    let ticket = Ticket::new(
        "TKT-001",
        "Cannot access admin dashboard",
        "Hi,\n\nI keep getting a 403 error when I open the admin dashboard. \
         I need this fixed ASAP as I need to process payroll today.\n\nThanks,\nJohn Smith",
    )
    .with_customer(CustomerInfo {
        tier: Some("Enterprise".into()),
        role: Some("Admin".into()),
        company_size: Some("500+".into()),
        prior_tickets: 3,
    });

    let state = rules_orchestrator().process(ticket).await.unwrap();

    let analysis = state.analysis().unwrap();
    assert_eq!(analysis.category, Category::Account);
    assert_eq!(analysis.priority, Priority::Urgent);
    let response = state.response().unwrap();
    assert_eq!(response.next_action, NextAction::Escalate);
    assert!(response.requires_approval);
    assert!(response.body.contains("John Smith"));
}

// ---------------------------------------------------------------------------
// Retry and fallback
// ---------------------------------------------------------------------------

#[tokio::test]
async fn transient_analysis_failures_fall_back_after_budget() {
    let generator = Arc::new(ScriptedGenerator::new(
        |_| {
            Err(TriageError::Connection {
                provider: "mock".into(),
                message: "connection reset".into(),
            })
        },
        |_| structured(json!({"body": "We are looking into it.", "next_action": "escalate"})),
    ));
    let orch = Orchestrator::new(fast_config().with_max_retries(2), generator.clone()).unwrap();

    let state = orch.process(ticket("T-200", "Something is off")).await.unwrap();

    let analysis = state.analysis().unwrap();
    assert_eq!(analysis.category, Category::Other);
    assert_eq!(analysis.priority, Priority::Medium);
    assert_eq!(analysis.confidence, 0.0);
    assert!(analysis.is_fallback());

    let record = state.outcome(StageId::Analysis).unwrap();
    assert_eq!(record.status, StageStatus::Fallback);
    assert_eq!(record.attempts, 3);
    assert_eq!(generator.calls(StageId::Analysis), 3);

    // The response stage still runs on the fallback analysis.
    assert_eq!(state.outcome(StageId::Response).unwrap().status, StageStatus::Success);
}

#[tokio::test]
async fn urgent_resolve_without_override_falls_back_to_escalate() {
    let generator = Arc::new(ScriptedGenerator::new(
        |_| structured(json!({"category": "technical", "priority": "urgent", "confidence": 0.9})),
        |_| structured(json!({"body": "Fixed it for you.", "next_action": "resolve"})),
    ));
    let orch = Orchestrator::new(fast_config(), generator.clone()).unwrap();

    let state = orch.process(ticket("T-300", "Production is down")).await.unwrap();

    let response = state.response().unwrap();
    assert_eq!(response.next_action, NextAction::Escalate);
    let record = state.outcome(StageId::Response).unwrap();
    assert_eq!(record.status, StageStatus::Fallback);
    assert_eq!(record.attempts, 3);
    assert!(record.detail.as_deref().unwrap_or_default().contains("urgent"));
    assert_eq!(generator.calls(StageId::Response), 3);
}

#[tokio::test]
async fn invalid_then_valid_output_succeeds_on_retry() {
    let generator = Arc::new(ScriptedGenerator::new(
        |n| match n {
            0 => Ok(RawOutput::text("Sure! Here is my analysis: it's billing.")),
            _ => Ok(RawOutput::text(
                "```json\n{\"category\": \"billing\", \"priority\": 3, \"confidence\": 0.7}\n```",
            )),
        },
        |_| structured(json!({"response": "Refund issued.", "action": "resolve"})),
    ));
    let orch = Orchestrator::new(fast_config(), generator.clone()).unwrap();

    let state = orch.process(ticket("T-400", "Refund please")).await.unwrap();

    let record = state.outcome(StageId::Analysis).unwrap();
    assert_eq!(record.status, StageStatus::Success);
    assert_eq!(record.attempts, 2);
    assert_eq!(state.analysis().unwrap().priority, Priority::High);
    assert_eq!(state.response().unwrap().body, "Refund issued.");
}

#[tokio::test]
async fn fallback_result_is_the_same_every_time() {
    let failing = || {
        Arc::new(ScriptedGenerator::new(
            |_| Err(TriageError::AuthError { provider: "mock".into() }),
            |_| Err(TriageError::AuthError { provider: "mock".into() }),
        ))
    };

    let first = Orchestrator::new(fast_config(), failing())
        .unwrap()
        .process(ticket("T-500", "Hello"))
        .await
        .unwrap();
    let second = Orchestrator::new(fast_config(), failing())
        .unwrap()
        .process(ticket("T-500", "Hello"))
        .await
        .unwrap();

    assert_eq!(first.analysis(), second.analysis());
    assert_eq!(first.response(), second.response());
    assert_eq!(first.response().unwrap().next_action, NextAction::Escalate);
    // Non-retryable failures use a single attempt.
    assert!(first.outcomes().iter().all(|r| r.attempts == 1));
}

#[tokio::test]
async fn transient_fallback_is_independent_of_retry_budget() {
    let mut analyses = Vec::new();
    for max_retries in [0, 2, 5] {
        let generator = Arc::new(ScriptedGenerator::new(
            |_| {
                Err(TriageError::Connection {
                    provider: "mock".into(),
                    message: "connection reset".into(),
                })
            },
            |_| structured(json!({"body": "We are looking into it.", "next_action": "escalate"})),
        ));
        let state = Orchestrator::new(fast_config().with_max_retries(max_retries), generator.clone())
            .unwrap()
            .process(ticket("T-510", "Nothing loads"))
            .await
            .unwrap();

        let record = state.outcome(StageId::Analysis).unwrap();
        assert_eq!(record.status, StageStatus::Fallback);
        assert_eq!(record.attempts, max_retries + 1);
        assert_eq!(generator.calls(StageId::Analysis), max_retries as usize + 1);
        analyses.push(state.analysis().unwrap().clone());
    }

    assert_eq!(analyses[0], analyses[1]);
    assert_eq!(analyses[1], analyses[2]);
    assert_eq!(analyses[0].category, Category::Other);
    assert_eq!(analyses[0].priority, Priority::Medium);
    assert_eq!(analyses[0].confidence, 0.0);
}

#[tokio::test]
async fn malformed_configured_fallback_aborts_run() {
    let mut config = fast_config().with_max_retries(0);
    config.response.fallback = json!({"body": "", "next_action": "escalate"});
    let generator = Arc::new(ScriptedGenerator::new(
        |_| structured(json!({"category": "general", "priority": "low", "confidence": 0.5})),
        |_| Ok(RawOutput::text("no json here")),
    ));
    let orch = Orchestrator::new(config, generator).unwrap();

    let err = orch.process(ticket("T-600", "Question")).await.unwrap_err();

    match err {
        TriageError::Aborted { stage, outcomes, .. } => {
            assert_eq!(stage, StageId::Response);
            let statuses: Vec<_> = outcomes.iter().map(|r| r.status).collect();
            assert_eq!(statuses, vec![StageStatus::Success, StageStatus::Failure]);
        }
        other => panic!("expected Aborted, got {other:?}"),
    }
    assert_eq!(orch.in_flight(), 0);
}

// ---------------------------------------------------------------------------
// Admission, ordering, cancellation
// ---------------------------------------------------------------------------

#[tokio::test]
async fn empty_body_is_rejected_before_any_stage() {
    let generator = Arc::new(ScriptedGenerator::new(
        |_| structured(json!({})),
        |_| structured(json!({})),
    ));
    let orch = Orchestrator::new(fast_config(), generator.clone()).unwrap();

    let err = orch.process(ticket("T-700", "   ")).await.unwrap_err();

    assert!(matches!(err, TriageError::InputInvalid { ref ticket_id, .. } if ticket_id == "T-700"));
    assert_eq!(generator.calls(StageId::Analysis), 0);
    assert_eq!(generator.calls(StageId::Response), 0);
}

#[tokio::test]
async fn events_follow_stage_order() {
    let orch = rules_orchestrator();
    let mut rx = orch.subscribe();

    orch.process(ticket("T-800", "The app crashes with an error on startup"))
        .await
        .unwrap();

    let mut sequence = Vec::new();
    while let Ok(event) = rx.try_recv() {
        assert_eq!(event.ticket_id(), "T-800");
        match event {
            PipelineEvent::RunStarted { .. } => sequence.push("run_started".to_string()),
            PipelineEvent::StageStarted { stage, .. } => sequence.push(format!("{stage}_started")),
            PipelineEvent::StageCompleted { stage, .. } => {
                sequence.push(format!("{stage}_completed"))
            }
            PipelineEvent::RunCompleted { .. } => sequence.push("run_completed".to_string()),
            other => panic!("unexpected event {other:?}"),
        }
    }
    assert_eq!(
        sequence,
        vec![
            "run_started",
            "analysis_started",
            "analysis_completed",
            "response_started",
            "response_completed",
            "run_completed",
        ]
    );
}

#[tokio::test]
async fn cancelled_run_reports_cancelled() {
    let orch = rules_orchestrator();
    let cancel = CancelToken::new();
    cancel.cancel();

    let err = orch
        .process_with_cancel(ticket("T-900", "Cannot log in"), &cancel)
        .await
        .unwrap_err();

    assert!(matches!(err, TriageError::Cancelled { completed: 0, .. }));
    assert_eq!(orch.in_flight(), 0);
}

#[tokio::test]
async fn batch_results_follow_input_order() {
    let orch = rules_orchestrator();
    let tickets = vec![
        ticket("S-1", "I was charged twice this month"),
        ticket("S-2", "   "),
        ticket("S-3", "The export feature throws an error"),
        ticket("S-1", "Duplicate id"),
    ];

    let results = orch.process_batch(tickets).await;

    assert_eq!(results.len(), 4);
    assert_eq!(results[0].as_ref().unwrap().analysis().unwrap().category, Category::Billing);
    assert!(matches!(results[1], Err(TriageError::InputInvalid { .. })));
    assert_eq!(results[2].as_ref().unwrap().ticket().id, "S-3");
    assert!(matches!(results[3], Err(TriageError::InputInvalid { .. })));
}

// ---------------------------------------------------------------------------
// Custom graphs
// ---------------------------------------------------------------------------

#[tokio::test]
async fn fallback_analysis_exits_before_response() {
    let config = fast_config();
    let graph = PipelineGraph::builder()
        .stage(AnalysisStage::new(config.fallback(StageId::Analysis)))
        .stage(ResponseStage::new(config.fallback(StageId::Response), false))
        .conditional_edge(StageId::Analysis, EdgeTarget::Exit, "analysis.status=fallback")
        .edge(StageId::Analysis, StageId::Response)
        .edge(StageId::Response, EdgeTarget::Exit)
        .build()
        .unwrap();
    let generator = Arc::new(ScriptedGenerator::new(
        |_| Err(TriageError::AuthError { provider: "mock".into() }),
        |_| structured(json!({"body": "Hello", "next_action": "resolve"})),
    ));
    let orch = Orchestrator::with_graph(config, graph, generator.clone()).unwrap();

    let state = orch.process(ticket("G-1", "Hello?")).await.unwrap();

    assert_eq!(state.phase(), RunPhase::Completed);
    assert!(state.analysis().unwrap().is_fallback());
    assert!(state.response().is_none());
    assert_eq!(generator.calls(StageId::Response), 0);
}

#[test]
fn graph_with_response_before_analysis_is_invalid() {
    let err = PipelineGraph::builder()
        .stage(ResponseStage::new(json!({}), false))
        .stage(AnalysisStage::new(json!({})))
        .edge(StageId::Response, StageId::Analysis)
        .build()
        .unwrap_err();
    assert!(matches!(err, TriageError::GraphInvalid(_)));
}

#[test]
fn graph_with_cycle_is_invalid() {
    let err = PipelineGraph::builder()
        .stage(AnalysisStage::new(json!({})))
        .stage(ResponseStage::new(json!({}), false))
        .edge(StageId::Analysis, StageId::Response)
        .edge(StageId::Response, StageId::Analysis)
        .build()
        .unwrap_err();
    match err {
        TriageError::GraphInvalid(msg) => assert!(msg.contains("cycle")),
        other => panic!("expected GraphInvalid, got {other:?}"),
    }
}
