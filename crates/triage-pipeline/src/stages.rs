//! The triage stages: ticket analysis and response drafting.
//!
//! A [`Stage`] knows how to turn the run state into a generation request, which
//! [`Schema`] its output must satisfy, how to convert a validated record into
//! its typed result (enforcing any stage policy), and what to fall back to.

use std::collections::BTreeSet;

use serde_json::json;
use triage_llm::{GenerationRequest, RawOutput};
use triage_types::{
    AnalysisResult, Category, NextAction, Priority, ResponseResult, Result, StageId, TicketState,
    ValidationFailure, ValidationKind,
};

use crate::executor::Provenance;
use crate::schema::{FieldKind, FieldSpec, Schema, ValidatedRecord};

const CATEGORIES: &[&str] = &["billing", "technical", "account", "general", "other"];
const PRIORITIES: &[&str] = &["low", "medium", "high", "urgent"];
const NEXT_ACTIONS: &[&str] = &["resolve", "escalate", "request-info"];

const ANALYSIS_SYSTEM: &str = "You are a support ticket triage assistant. \
Reply with a single JSON object and nothing else.";

const RESPONSE_SYSTEM: &str = "You are a customer support agent drafting a reply. \
Reply with a single JSON object and nothing else.";

/// The typed result of one stage.
#[derive(Debug, Clone, PartialEq)]
pub enum StageValue {
    Analysis(AnalysisResult),
    Response(ResponseResult),
}

impl StageValue {
    /// Store this value in the run state.
    pub fn apply(self, state: &mut TicketState) -> Result<()> {
        match self {
            StageValue::Analysis(analysis) => state.set_analysis(analysis),
            StageValue::Response(response) => state.set_response(response),
        }
    }
}

// ---------------------------------------------------------------------------
// Stage trait
// ---------------------------------------------------------------------------

pub trait Stage: Send + Sync {
    fn id(&self) -> StageId;

    /// Stages whose results must exist before this one runs.
    fn requires(&self) -> &[StageId] {
        &[]
    }

    fn schema(&self) -> &Schema;

    /// Build the generation request from the current run state.
    fn request(&self, state: &TicketState) -> Result<GenerationRequest>;

    /// Convert a validated record into the stage result, applying stage policy.
    fn accept(
        &self,
        record: ValidatedRecord,
        state: &TicketState,
        provenance: Provenance,
    ) -> std::result::Result<StageValue, ValidationFailure>;

    fn fallback(&self) -> &RawOutput;
}

// ---------------------------------------------------------------------------
// AnalysisStage
// ---------------------------------------------------------------------------

/// Classifies and prioritises a ticket.
pub struct AnalysisStage {
    schema: Schema,
    fallback: RawOutput,
}

impl AnalysisStage {
    pub fn new(fallback: serde_json::Value) -> Self {
        Self {
            schema: analysis_schema(),
            fallback: RawOutput::Structured(fallback),
        }
    }
}

pub fn analysis_schema() -> Schema {
    Schema::new(
        "analysis",
        vec![
            FieldSpec::required(
                "category",
                FieldKind::Enum {
                    variants: CATEGORIES,
                    ordinal: false,
                },
            ),
            FieldSpec::required(
                "priority",
                FieldKind::Enum {
                    variants: PRIORITIES,
                    ordinal: true,
                },
            ),
            FieldSpec::optional("expertise", FieldKind::List)
                .with_aliases(&["required_expertise", "expertise_tags"]),
            FieldSpec::required("confidence", FieldKind::Number { min: 0.0, max: 1.0 }),
            FieldSpec::optional("key_points", FieldKind::List),
            FieldSpec::optional("urgency_indicators", FieldKind::List),
            FieldSpec::optional("sentiment", FieldKind::Number { min: -1.0, max: 1.0 }),
            FieldSpec::optional("business_impact", FieldKind::Text { non_empty: false }),
            FieldSpec::optional("suggested_template", FieldKind::Text { non_empty: false })
                .with_aliases(&["suggested_response_type"]),
        ],
    )
}

impl Stage for AnalysisStage {
    fn id(&self) -> StageId {
        StageId::Analysis
    }

    fn schema(&self) -> &Schema {
        &self.schema
    }

    fn request(&self, state: &TicketState) -> Result<GenerationRequest> {
        let ticket = state.ticket();
        let mut prompt = format!(
            "Analyze this support ticket.\n\nSubject: {}\n\n{}\n",
            ticket.subject, ticket.body
        );
        if let Some(customer) = &ticket.customer {
            prompt.push_str(&format!(
                "\nCustomer: tier={}, role={}, prior tickets={}\n",
                customer.tier.as_deref().unwrap_or("unknown"),
                customer.role.as_deref().unwrap_or("unknown"),
                customer.prior_tickets
            ));
        }
        prompt.push_str(
            "\nReturn JSON with: category (billing|technical|account|general|other), \
             priority (low|medium|high|urgent), expertise (list of strings), \
             confidence (0-1), key_points, urgency_indicators, sentiment (-1..1), \
             business_impact, suggested_template.",
        );

        Ok(
            GenerationRequest::new(StageId::Analysis, prompt, json!({ "ticket": ticket }))
                .with_system(ANALYSIS_SYSTEM),
        )
    }

    fn accept(
        &self,
        record: ValidatedRecord,
        _state: &TicketState,
        provenance: Provenance,
    ) -> std::result::Result<StageValue, ValidationFailure> {
        let category = parse_variant(&record, "category", Category::parse)?;
        let priority = parse_variant(&record, "priority", Priority::parse)?;
        let confidence = record.require_number("confidence")?;

        match provenance {
            Provenance::Generated if confidence <= 0.0 => {
                return Err(record.failure(
                    ValidationKind::OutOfRange,
                    "confidence",
                    "generated confidence must be in (0, 1]",
                ));
            }
            Provenance::Fallback if confidence != 0.0 => {
                return Err(record.failure(
                    ValidationKind::OutOfRange,
                    "confidence",
                    "fallback confidence must be exactly 0",
                ));
            }
            _ => {}
        }

        let list = |name: &str| record.list(name).map(<[String]>::to_vec).unwrap_or_default();

        Ok(StageValue::Analysis(AnalysisResult {
            category,
            priority,
            expertise: list("expertise").into_iter().collect::<BTreeSet<_>>(),
            confidence,
            key_points: list("key_points"),
            urgency_indicators: list("urgency_indicators"),
            sentiment: record.number("sentiment").unwrap_or(0.0),
            business_impact: non_blank(record.text("business_impact")),
            suggested_template: non_blank(record.text("suggested_template")),
        }))
    }

    fn fallback(&self) -> &RawOutput {
        &self.fallback
    }
}

// ---------------------------------------------------------------------------
// ResponseStage
// ---------------------------------------------------------------------------

/// Drafts the customer reply and picks the next action.
///
/// Refuses to resolve an urgent ticket unless the output sets
/// `urgent_override` or the stage was built with `allow_urgent_resolve`.
pub struct ResponseStage {
    schema: Schema,
    fallback: RawOutput,
    allow_urgent_resolve: bool,
}

impl ResponseStage {
    pub fn new(fallback: serde_json::Value, allow_urgent_resolve: bool) -> Self {
        Self {
            schema: response_schema(),
            fallback: RawOutput::Structured(fallback),
            allow_urgent_resolve,
        }
    }
}

pub fn response_schema() -> Schema {
    Schema::new(
        "response",
        vec![
            FieldSpec::required("body", FieldKind::Text { non_empty: true })
                .with_aliases(&["response", "response_text"]),
            FieldSpec::required(
                "next_action",
                FieldKind::Enum {
                    variants: NEXT_ACTIONS,
                    ordinal: false,
                },
            )
            .with_aliases(&["action", "suggested_action"]),
            FieldSpec::optional("template_id", FieldKind::Text { non_empty: false })
                .with_aliases(&["template"]),
            FieldSpec::optional("urgent_override", FieldKind::Bool),
            FieldSpec::optional("requires_approval", FieldKind::Bool),
            FieldSpec::optional("suggested_actions", FieldKind::List),
        ],
    )
}

impl Stage for ResponseStage {
    fn id(&self) -> StageId {
        StageId::Response
    }

    fn requires(&self) -> &[StageId] {
        &[StageId::Analysis]
    }

    fn schema(&self) -> &Schema {
        &self.schema
    }

    fn request(&self, state: &TicketState) -> Result<GenerationRequest> {
        let input = state.response_input()?;
        let analysis = input.analysis;
        let prompt = format!(
            "Draft a reply to this support ticket.\n\nSubject: {}\n\n{}\n\n\
             Analysis: category={}, priority={}, key points: {}\n\n\
             Return JSON with: body, next_action (resolve|escalate|request-info), \
             template_id, urgent_override (true only if resolving an urgent ticket is \
             explicitly safe), requires_approval, suggested_actions.",
            input.ticket.subject,
            input.ticket.body,
            analysis.category,
            analysis.priority,
            if analysis.key_points.is_empty() {
                "none".to_string()
            } else {
                analysis.key_points.join("; ")
            },
        );

        Ok(GenerationRequest::new(
            StageId::Response,
            prompt,
            json!({ "ticket": input.ticket, "analysis": analysis }),
        )
        .with_system(RESPONSE_SYSTEM))
    }

    fn accept(
        &self,
        record: ValidatedRecord,
        state: &TicketState,
        _provenance: Provenance,
    ) -> std::result::Result<StageValue, ValidationFailure> {
        let body = record.require_text("body")?.to_string();
        let next_action = parse_variant(&record, "next_action", NextAction::parse)?;
        let urgent_override = record.boolean("urgent_override").unwrap_or(false);

        let urgent = state
            .analysis()
            .is_some_and(|a| a.priority == Priority::Urgent);
        if urgent
            && next_action == NextAction::Resolve
            && !urgent_override
            && !self.allow_urgent_resolve
        {
            return Err(ValidationFailure::policy(
                "next_action",
                "urgent tickets cannot be resolved without urgent_override",
                record.raw(),
            ));
        }

        Ok(StageValue::Response(ResponseResult {
            body,
            next_action,
            template_id: non_blank(record.text("template_id")),
            urgent_override,
            requires_approval: record.boolean("requires_approval").unwrap_or(false),
            suggested_actions: record
                .list("suggested_actions")
                .map(<[String]>::to_vec)
                .unwrap_or_default(),
        }))
    }

    fn fallback(&self) -> &RawOutput {
        &self.fallback
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn parse_variant<T>(
    record: &ValidatedRecord,
    field: &str,
    parse: fn(&str) -> Option<T>,
) -> std::result::Result<T, ValidationFailure> {
    let variant = record.require_variant(field)?;
    parse(variant).ok_or_else(|| {
        record.failure(
            ValidationKind::SchemaMismatch,
            field,
            format!("unknown value '{variant}'"),
        )
    })
}

fn non_blank(text: Option<&str>) -> Option<String> {
    text.map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from)
}
