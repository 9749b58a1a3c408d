//! Deterministic, offline generator driven by keyword heuristics.
//!
//! Reads the structured `payload` of a [`GenerationRequest`] and answers with
//! JSON text, the way a model would. Useful for local runs, demos, and as a
//! baseline to compare model output against.

use std::collections::HashMap;
use std::sync::LazyLock;

use async_trait::async_trait;
use regex::Regex;
use serde::Deserialize;
use serde_json::json;
use triage_types::{
    AnalysisResult, Category, NextAction, Priority, Result, StageId, Ticket, TriageError,
};

use crate::templates::{self, extract_customer_name, fill_template};
use crate::{GenerationRequest, Generator, RawOutput};

static IMMEDIATE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\b(?:today|now|immediately)\b").expect("timeframe pattern is valid")
});

const URGENCY_KEYWORDS: &[&str] = &[
    "urgent",
    "asap",
    "immediately",
    "emergency",
    "critical",
    "as soon as possible",
    "right away",
    "time sensitive",
];

const CRITICAL_TERMS: &[&str] = &[
    "payroll",
    "revenue",
    "cannot work",
    "can't work",
    "production down",
    "system down",
    "outage",
];

const VIP_ROLES: &[&str] = &[
    "ceo",
    "cfo",
    "cto",
    "director",
    "vp",
    "vice president",
    "president",
    "head",
    "chief",
];

const NEGATIVE_WORDS: &[&str] = &[
    "cannot", "can't", "issue", "problem", "error", "fail", "bug", "broken", "urgent", "bad",
    "wrong",
];
const POSITIVE_WORDS: &[&str] = &["thank", "please", "appreciate", "good", "great"];

struct CategoryRule {
    category: Category,
    keywords: &'static [&'static str],
    expertise: &'static [&'static str],
    template: &'static str,
    base_priority: Priority,
}

const CATEGORY_RULES: &[CategoryRule] = &[
    CategoryRule {
        category: Category::Account,
        keywords: &[
            "access", "login", "log in", "sign in", "permission", "403", "dashboard", "password",
            "locked out",
        ],
        expertise: &["access control", "permissions", "authentication"],
        template: templates::ACCESS_ISSUE,
        base_priority: Priority::Medium,
    },
    CategoryRule {
        category: Category::Billing,
        keywords: &[
            "bill", "invoice", "payment", "charge", "pricing", "cost", "subscription", "refund",
        ],
        expertise: &["billing", "accounting", "finance"],
        template: templates::BILLING_INQUIRY,
        base_priority: Priority::Medium,
    },
    CategoryRule {
        category: Category::General,
        keywords: &["feature", "enhancement", "improvement", "suggestion", "roadmap"],
        expertise: &["product management", "development"],
        template: templates::FEATURE_REQUEST,
        base_priority: Priority::Low,
    },
    CategoryRule {
        category: Category::Technical,
        keywords: &[
            "error", "crash", "bug", "slow", "not working", "down", "broken", "fail",
        ],
        expertise: &["technical support", "troubleshooting"],
        template: templates::TECHNICAL_ISSUE,
        base_priority: Priority::Medium,
    },
];

/// Keyword-driven generator for both pipeline stages.
#[derive(Debug, Default, Clone)]
pub struct RulesGenerator;

impl RulesGenerator {
    pub fn new() -> Self {
        Self
    }
}

#[derive(Deserialize)]
struct AnalysisPayload {
    ticket: Ticket,
}

#[derive(Deserialize)]
struct ResponsePayload {
    ticket: Ticket,
    analysis: AnalysisResult,
}

#[async_trait]
impl Generator for RulesGenerator {
    fn name(&self) -> &str {
        "rules"
    }

    async fn generate(&self, request: &GenerationRequest) -> Result<RawOutput> {
        let value = match request.stage {
            StageId::Analysis => {
                let payload: AnalysisPayload = parse_payload(request)?;
                analyze(&payload.ticket)
            }
            StageId::Response => {
                let payload: ResponsePayload = parse_payload(request)?;
                draft_response(&payload.ticket, &payload.analysis)
            }
        };
        let text = serde_json::to_string_pretty(&value)?;
        Ok(RawOutput::Text(text))
    }
}

fn parse_payload<T: serde::de::DeserializeOwned>(request: &GenerationRequest) -> Result<T> {
    serde_json::from_value(request.payload.clone()).map_err(|e| TriageError::MalformedRequest {
        provider: "rules".into(),
        message: format!("{} payload: {e}", request.stage),
    })
}

// ---------------------------------------------------------------------------
// Analysis
// ---------------------------------------------------------------------------

fn analyze(ticket: &Ticket) -> serde_json::Value {
    let content = format!("{}\n{}", ticket.subject, ticket.body).to_lowercase();

    let matched = CATEGORY_RULES.iter().find_map(|rule| {
        let hits = rule
            .keywords
            .iter()
            .filter(|k| content.contains(*k))
            .count();
        (hits > 0).then_some((rule, hits))
    });

    let (category, expertise, template, mut priority, confidence) = match matched {
        Some((rule, hits)) => (
            rule.category,
            rule.expertise.to_vec(),
            rule.template,
            rule.base_priority,
            (0.55 + 0.1 * hits.min(4) as f64).min(0.95),
        ),
        None => (
            Category::General,
            vec!["general support"],
            templates::AMBIGUOUS_REQUEST,
            Priority::Medium,
            0.4,
        ),
    };

    let urgency = urgency_indicators(&ticket.body);
    if !urgency.is_empty() {
        priority = priority.max(Priority::High);
    }

    if CRITICAL_TERMS.iter().any(|t| content.contains(t)) {
        priority = Priority::Urgent;
    }

    if let Some(role) = ticket.role() {
        let role = role.to_lowercase();
        if VIP_ROLES.iter().any(|r| role.contains(r)) {
            priority = priority.max(Priority::High);
        }
    }

    if ticket
        .tier()
        .is_some_and(|t| t.eq_ignore_ascii_case("enterprise"))
    {
        priority = priority.max(Priority::Medium);
    }

    let business_impact = business_impact(&content);

    json!({
        "category": category.as_str(),
        "priority": priority_rank(priority),
        "required_expertise": expertise,
        "confidence": (confidence * 100.0).round() / 100.0,
        "key_points": key_points(category, &content),
        "urgency_indicators": urgency,
        "sentiment": sentiment(&content),
        "business_impact": business_impact,
        "suggested_response_type": template,
    })
}

fn priority_rank(priority: Priority) -> u8 {
    match priority {
        Priority::Low => 1,
        Priority::Medium => 2,
        Priority::High => 3,
        Priority::Urgent => 4,
    }
}

fn urgency_indicators(body: &str) -> Vec<String> {
    let content = body.to_lowercase();
    let mut indicators: Vec<String> = URGENCY_KEYWORDS
        .iter()
        .filter(|k| content.contains(*k))
        .map(|k| k.to_string())
        .collect();
    if content.matches('!').count() >= 3 {
        indicators.push("multiple exclamation marks".into());
    }
    if IMMEDIATE.is_match(&content) {
        indicators.push("immediate timeframe".into());
    }
    indicators
}

const ACCOUNT_POINTS: &[(&str, &str)] = &[
    ("dashboard", "Cannot access dashboard"),
    ("403", "Receiving 403 error"),
    ("password", "Password issue"),
    ("login", "Login problem"),
    ("permission", "Permission problem"),
];

const BILLING_POINTS: &[(&str, &str)] = &[
    ("invoice", "Invoice question"),
    ("payment", "Payment issue"),
    ("charge", "Charge inquiry"),
    ("refund", "Refund request"),
    ("cycle", "Billing cycle question"),
    ("pro-rat", "Billing cycle question"),
];

const GENERAL_POINTS: &[(&str, &str)] = &[
    ("request", "Feature request"),
    ("suggest", "Feature suggestion"),
    ("improve", "Improvement suggestion"),
    ("roadmap", "Roadmap inquiry"),
];

const TECHNICAL_POINTS: &[(&str, &str)] = &[
    ("error", "Error reported"),
    ("crash", "System crash"),
    ("bug", "Bug report"),
    ("slow", "Performance issue"),
    ("not working", "Functionality issue"),
];

fn key_points(category: Category, content: &str) -> Vec<String> {
    let (checks, default) = match category {
        Category::Account => (ACCOUNT_POINTS, "General access issue"),
        Category::Billing => (BILLING_POINTS, "General billing question"),
        Category::General => (GENERAL_POINTS, "General request"),
        Category::Technical | Category::Other => (TECHNICAL_POINTS, "Technical issue"),
    };

    let mut points: Vec<String> = Vec::new();
    for (needle, point) in checks {
        if content.contains(needle) && !points.iter().any(|p| p == point) {
            points.push(point.to_string());
        }
    }
    if points.is_empty() {
        points.push(default.to_string());
    }
    points
}

fn business_impact(content: &str) -> Option<&'static str> {
    if content.contains("payroll") {
        Some("Payroll processing impact")
    } else if content.contains("revenue") || content.contains("sales") {
        Some("Revenue impact")
    } else if content.contains("customer") && (content.contains("cannot") || content.contains("unable")) {
        Some("Customer impact")
    } else if content.contains("production") {
        Some("Production impact")
    } else if content.contains("deadline") {
        Some("Deadline impact")
    } else {
        None
    }
}

fn sentiment(content: &str) -> f64 {
    let negative = NEGATIVE_WORDS.iter().filter(|w| content.contains(*w)).count() as f64;
    let positive = POSITIVE_WORDS.iter().filter(|w| content.contains(*w)).count() as f64;
    let total = negative + positive;
    if total == 0.0 {
        return 0.0;
    }
    ((positive - negative) / total * 100.0).round() / 100.0
}

// ---------------------------------------------------------------------------
// Response drafting
// ---------------------------------------------------------------------------

fn draft_response(ticket: &Ticket, analysis: &AnalysisResult) -> serde_json::Value {
    let template_id = analysis
        .suggested_template
        .as_deref()
        .filter(|id| templates::template(id).is_some())
        .unwrap_or(match analysis.category {
            Category::Account => templates::ACCESS_ISSUE,
            Category::Billing => templates::BILLING_INQUIRY,
            Category::Technical => templates::TECHNICAL_ISSUE,
            Category::General | Category::Other => templates::AMBIGUOUS_REQUEST,
        });

    let mut vars: HashMap<&str, String> = HashMap::new();
    vars.insert("name", extract_customer_name(&ticket.body));
    let elevated = analysis.priority >= Priority::High;
    let points = analysis.key_points.join(" ").to_lowercase();

    match template_id {
        templates::ACCESS_ISSUE => {
            let feature = if points.contains("dashboard") {
                "admin dashboard"
            } else if points.contains("login") {
                "login system"
            } else {
                "system"
            };
            vars.insert("feature", feature.into());
            let diagnosis = if points.contains("403") {
                "It appears you're encountering a 403 error, which typically indicates a permissions issue."
            } else {
                "This looks like an access control issue related to your account permissions."
            };
            vars.insert("diagnosis", diagnosis.into());
            vars.insert(
                "resolution_steps",
                "Please try the following steps:\n1. Clear your browser cache and cookies\n2. Try accessing from a private window\n3. Confirm you're using the correct credentials".into(),
            );
            vars.insert("priority_level", if elevated { "HIGH" } else { "MEDIUM" }.into());
            vars.insert(
                "eta",
                if elevated { "Today (within 2-3 hours)" } else { "Within 24 hours" }.into(),
            );
        }
        templates::BILLING_INQUIRY => {
            let topic = if points.contains("cycle") {
                "billing cycle"
            } else if points.contains("invoice") {
                "invoice"
            } else if points.contains("charge") {
                "recent charges"
            } else if points.contains("payment") {
                "payment"
            } else {
                "billing inquiry"
            };
            vars.insert("billing_topic", topic.into());
            vars.insert(
                "explanation",
                "I've reviewed your account and the billing records for the period in question.".into(),
            );
            vars.insert(
                "next_steps",
                "If anything on your statement looks incorrect, we will issue a correction on your next invoice.".into(),
            );
        }
        templates::FEATURE_REQUEST => {
            vars.insert("feature_name", "the requested functionality".into());
            vars.insert(
                "feedback",
                "We review feature requests regularly and prioritise them by demand and feasibility.".into(),
            );
            vars.insert(
                "timeline",
                "I've logged your request with the product team and we'll let you know if it's scheduled.".into(),
            );
        }
        templates::TECHNICAL_ISSUE => {
            let issue = if points.contains("error") {
                "the error you encountered"
            } else if points.contains("crash") {
                "the system crash"
            } else if points.contains("performance") {
                "the performance issue"
            } else {
                "the technical issue you reported"
            };
            vars.insert("issue_description", issue.into());
            vars.insert(
                "troubleshooting",
                "To help us resolve this quickly, please share the exact error message, your browser and operating system, and the steps that led to the problem.".into(),
            );
            vars.insert(
                "solution",
                "In the meantime, clearing your cache or trying another browser often helps.".into(),
            );
            vars.insert("priority_level", if elevated { "HIGH" } else { "STANDARD" }.into());
        }
        _ => {
            vars.insert(
                "questions",
                "1. Which feature or area were you using?\n2. Are you seeing any error messages?\n3. When did you first notice this?".into(),
            );
        }
    }

    let body = fill_template(templates::template(template_id).unwrap_or_default(), &vars);

    let next_action = if analysis.priority == Priority::Urgent {
        NextAction::Escalate
    } else if matches!(
        template_id,
        templates::TECHNICAL_ISSUE | templates::AMBIGUOUS_REQUEST
    ) {
        NextAction::RequestInfo
    } else if elevated && analysis.category == Category::Account {
        NextAction::Escalate
    } else {
        NextAction::Resolve
    };

    let mut suggested_actions: Vec<&str> = match analysis.category {
        Category::Account => vec![
            "Verify user permissions in the admin system",
            "Check for recent security updates that might affect access",
        ],
        Category::Billing => vec![
            "Verify billing records",
            "Consider offering billing adjustments if appropriate",
        ],
        Category::General => vec![
            "Log feature request in product backlog",
            "Check with product team about similar planned features",
        ],
        Category::Technical | Category::Other => vec![
            "Document the issue in internal knowledge base",
            "Check for similar recent technical issues",
        ],
    };
    if elevated {
        suggested_actions.push("Escalate to specialists if not resolved within 2 hours");
    }
    if analysis.priority == Priority::Urgent {
        suggested_actions.push("Supervisory review required due to priority");
    }
    if analysis.sentiment < -0.5 {
        suggested_actions.push("Follow up personally due to customer sentiment");
    }

    let mut confidence: f64 = 0.8;
    if analysis.key_points.len() <= 1 {
        confidence -= 0.2;
    }
    if analysis.sentiment < -0.5 {
        confidence -= 0.1;
    }

    json!({
        "body": body,
        "next_action": next_action.as_str(),
        "template_id": template_id,
        "requires_approval": analysis.priority == Priority::Urgent,
        "suggested_actions": suggested_actions,
        "confidence_score": (confidence.clamp(0.1, 1.0) * 100.0).round() / 100.0,
    })
}
