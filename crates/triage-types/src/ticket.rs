//! Ticket input and the typed results produced by the pipeline stages.

use std::collections::BTreeSet;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{Result, TriageError};

// ---------------------------------------------------------------------------
// Ticket
// ---------------------------------------------------------------------------

/// An inbound support ticket. Immutable once admitted to a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Ticket {
    pub id: String,
    #[serde(default)]
    pub subject: String,
    #[serde(alias = "content")]
    pub body: String,
    #[serde(default = "chrono::Utc::now")]
    pub submitted_at: DateTime<Utc>,
    #[serde(default, alias = "customer_info")]
    pub customer: Option<CustomerInfo>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CustomerInfo {
    #[serde(default, alias = "plan")]
    pub tier: Option<String>,
    #[serde(default)]
    pub role: Option<String>,
    #[serde(default)]
    pub company_size: Option<String>,
    #[serde(default)]
    pub prior_tickets: u32,
}

impl Ticket {
    pub fn new(id: impl Into<String>, subject: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            subject: subject.into(),
            body: body.into(),
            submitted_at: Utc::now(),
            customer: None,
        }
    }

    pub fn with_customer(mut self, customer: CustomerInfo) -> Self {
        self.customer = Some(customer);
        self
    }

    /// Check the invariants a ticket must satisfy before any stage runs.
    pub fn check(&self) -> Result<()> {
        if self.id.trim().is_empty() {
            return Err(TriageError::InputInvalid {
                ticket_id: self.id.clone(),
                reason: "identifier is empty".into(),
            });
        }
        if self.body.trim().is_empty() {
            return Err(TriageError::InputInvalid {
                ticket_id: self.id.clone(),
                reason: "body is empty".into(),
            });
        }
        Ok(())
    }

    pub fn tier(&self) -> Option<&str> {
        self.customer.as_ref().and_then(|c| c.tier.as_deref())
    }

    pub fn role(&self) -> Option<&str> {
        self.customer.as_ref().and_then(|c| c.role.as_deref())
    }
}

// ---------------------------------------------------------------------------
// Enumerations
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    Billing,
    Technical,
    Account,
    General,
    Other,
}

impl Category {
    pub const ALL: [Category; 5] = [
        Category::Billing,
        Category::Technical,
        Category::Account,
        Category::General,
        Category::Other,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Category::Billing => "billing",
            Category::Technical => "technical",
            Category::Account => "account",
            Category::General => "general",
            Category::Other => "other",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|c| c.as_str() == s)
    }
}

/// Ticket priority. Variant order is the escalation order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    Low,
    Medium,
    High,
    Urgent,
}

impl Priority {
    pub const ALL: [Priority; 4] = [
        Priority::Low,
        Priority::Medium,
        Priority::High,
        Priority::Urgent,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Priority::Low => "low",
            Priority::Medium => "medium",
            Priority::High => "high",
            Priority::Urgent => "urgent",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|p| p.as_str() == s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum NextAction {
    Resolve,
    Escalate,
    RequestInfo,
}

impl NextAction {
    pub const ALL: [NextAction; 3] = [
        NextAction::Resolve,
        NextAction::Escalate,
        NextAction::RequestInfo,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            NextAction::Resolve => "resolve",
            NextAction::Escalate => "escalate",
            NextAction::RequestInfo => "request-info",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|a| a.as_str() == s)
    }
}

macro_rules! display_as_str {
    ($($ty:ty),*) => {
        $(impl fmt::Display for $ty {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        })*
    };
}

display_as_str!(Category, Priority, NextAction);

// ---------------------------------------------------------------------------
// Stage results
// ---------------------------------------------------------------------------

/// Output of the analysis stage.
///
/// `confidence` is exactly `0.0` for a fallback value and in `(0, 1]` otherwise.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisResult {
    pub category: Category,
    pub priority: Priority,
    #[serde(default)]
    pub expertise: BTreeSet<String>,
    pub confidence: f64,
    #[serde(default)]
    pub key_points: Vec<String>,
    #[serde(default)]
    pub urgency_indicators: Vec<String>,
    #[serde(default)]
    pub sentiment: f64,
    #[serde(default)]
    pub business_impact: Option<String>,
    #[serde(default)]
    pub suggested_template: Option<String>,
}

impl AnalysisResult {
    pub fn is_fallback(&self) -> bool {
        self.confidence == 0.0
    }
}

/// Output of the response stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResponseResult {
    pub body: String,
    pub next_action: NextAction,
    pub template_id: Option<String>,
    #[serde(default)]
    pub urgent_override: bool,
    #[serde(default)]
    pub requires_approval: bool,
    #[serde(default)]
    pub suggested_actions: Vec<String>,
}

/// Everything the response stage is allowed to read. Obtained from
/// [`TicketState::response_input`](crate::TicketState::response_input).
#[derive(Debug, Clone, Copy)]
pub struct ResponseInput<'a> {
    pub ticket: &'a Ticket,
    pub analysis: &'a AnalysisResult,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ticket_check_rejects_blank_body() {
        let ticket = Ticket::new("TKT-1", "Hello", "   \n ");
        let err = ticket.check().unwrap_err();
        assert!(matches!(err, TriageError::InputInvalid { ref reason, .. } if reason == "body is empty"));
    }

    #[test]
    fn ticket_check_rejects_blank_id() {
        let ticket = Ticket::new("", "Hello", "body");
        assert!(matches!(
            ticket.check(),
            Err(TriageError::InputInvalid { .. })
        ));
    }

    #[test]
    fn ticket_accepts_original_field_names() {
        let ticket: Ticket = serde_json::from_str(
            r#"{
                "id": "TKT-002",
                "subject": "Question about billing cycle",
                "content": "Our invoice shows billing from the 15th",
                "customer_info": {"role": "Billing Admin", "plan": "Professional"}
            }"#,
        )
        .unwrap();
        assert_eq!(ticket.body, "Our invoice shows billing from the 15th");
        assert_eq!(ticket.tier(), Some("Professional"));
        assert_eq!(ticket.role(), Some("Billing Admin"));
        assert!(ticket.check().is_ok());
    }

    #[test]
    fn priority_is_ordered() {
        assert!(Priority::Low < Priority::Medium);
        assert!(Priority::High < Priority::Urgent);
        assert_eq!(Priority::ALL.iter().max(), Some(&Priority::Urgent));
    }

    #[test]
    fn next_action_uses_kebab_case() {
        assert_eq!(
            serde_json::to_string(&NextAction::RequestInfo).unwrap(),
            "\"request-info\""
        );
        assert_eq!(NextAction::parse("request-info"), Some(NextAction::RequestInfo));
    }

    #[test]
    fn category_parse_round_trips_display() {
        for c in Category::ALL {
            assert_eq!(Category::parse(&c.to_string()), Some(c));
        }
        assert_eq!(Category::parse("spam"), None);
    }
}
