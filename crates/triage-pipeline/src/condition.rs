//! Edge condition language: parser, evaluator, and run-state resolver.
//!
//! Grammar:
//! ```text
//! ConditionExpr  ::= Clause ( '&&' Clause )*
//! Clause         ::= Key Operator Literal
//! Key            ::= identifier ( '.' identifier )*
//! Operator       ::= '=' | '!='
//! Literal        ::= QuotedString | BareWord | Number | Boolean
//! ```
//!
//! Keys resolve against a [`TicketState`] (see [`resolve_state_key`]). Unknown
//! keys resolve to the empty string.

use std::fmt;

use triage_types::{StageId, TicketState, TriageError};

/// A parsed condition expression consisting of one or more clauses joined by `&&`.
#[derive(Debug, Clone, PartialEq)]
pub struct ConditionExpr {
    pub clauses: Vec<Clause>,
}

/// A single comparison clause: `key op value`.
#[derive(Debug, Clone, PartialEq)]
pub struct Clause {
    pub key: String,
    pub operator: Operator,
    pub value: String,
}

/// Comparison operator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operator {
    Eq,
    NotEq,
}

impl fmt::Display for ConditionExpr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, clause) in self.clauses.iter().enumerate() {
            if i > 0 {
                f.write_str(" && ")?;
            }
            let op = match clause.operator {
                Operator::Eq => "=",
                Operator::NotEq => "!=",
            };
            write!(f, "{}{}{}", clause.key, op, clause.value)?;
        }
        Ok(())
    }
}

/// Parse a condition string into a [`ConditionExpr`].
///
/// An empty or whitespace-only input produces an expression with zero clauses,
/// which [`evaluate_condition`] treats as always true.
pub fn parse_condition(input: &str) -> Result<ConditionExpr, TriageError> {
    let trimmed = input.trim();
    if trimmed.is_empty() {
        return Ok(ConditionExpr {
            clauses: Vec::new(),
        });
    }

    let clauses = trimmed
        .split("&&")
        .map(|part| parse_clause(part.trim()))
        .collect::<Result<Vec<_>, _>>()?;

    Ok(ConditionExpr { clauses })
}

fn parse_clause(input: &str) -> Result<Clause, TriageError> {
    if input.is_empty() {
        return Err(make_error("empty clause"));
    }

    let (key_end, operator, op_len) = find_operator(input)?;

    let key = input[..key_end].trim().to_string();
    if key.is_empty() {
        return Err(make_error("missing key before operator"));
    }
    for seg in key.split('.') {
        if seg.is_empty() || !seg.chars().all(|c| c.is_alphanumeric() || c == '_') {
            return Err(make_error(&format!("invalid key segment: '{seg}'")));
        }
    }

    let raw_value = input[key_end + op_len..].trim();
    if raw_value.is_empty() {
        return Err(make_error(&format!(
            "missing value after operator in '{input}'"
        )));
    }

    Ok(Clause {
        key,
        operator,
        value: strip_quotes(raw_value),
    })
}

fn find_operator(input: &str) -> Result<(usize, Operator, usize), TriageError> {
    // Scan for `!=` or `=`, skipping quoted regions.
    let bytes = input.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            b'"' | b'\'' => {
                let quote = bytes[i];
                i += 1;
                while i < bytes.len() && bytes[i] != quote {
                    i += 1;
                }
                i += 1;
            }
            b'!' if i + 1 < bytes.len() && bytes[i + 1] == b'=' => {
                return Ok((i, Operator::NotEq, 2));
            }
            b'=' => {
                return Ok((i, Operator::Eq, 1));
            }
            _ => {
                i += 1;
            }
        }
    }
    Err(make_error(&format!("no operator found in '{input}'")))
}

fn strip_quotes(s: &str) -> String {
    if s.len() >= 2 {
        let bytes = s.as_bytes();
        if (bytes[0] == b'"' && bytes[bytes.len() - 1] == b'"')
            || (bytes[0] == b'\'' && bytes[bytes.len() - 1] == b'\'')
        {
            return s[1..s.len() - 1].to_string();
        }
    }
    s.to_string()
}

fn make_error(msg: &str) -> TriageError {
    TriageError::GraphInvalid(format!("condition parse error: {msg}"))
}

/// Evaluate a condition expression against values provided by a resolver function.
///
/// Comparison is case-insensitive. An expression with zero clauses evaluates
/// to `true`.
pub fn evaluate_condition(expr: &ConditionExpr, resolve: &dyn Fn(&str) -> String) -> bool {
    expr.clauses.iter().all(|clause| {
        let matches = resolve(&clause.key).eq_ignore_ascii_case(&clause.value);
        match clause.operator {
            Operator::Eq => matches,
            Operator::NotEq => !matches,
        }
    })
}

// ---------------------------------------------------------------------------
// Run-state resolution
// ---------------------------------------------------------------------------

/// Resolve a condition key against the run state.
///
/// Supported keys: `ticket.id`, `ticket.tier`, `ticket.role`,
/// `analysis.{category,priority,confidence,status}`,
/// `response.{next_action,template_id,status}`. `<stage>.status` is the
/// outcome tag of that stage (`success`, `fallback`, `failure`).
pub fn resolve_state_key(state: &TicketState, key: &str) -> String {
    let (scope, field) = key.split_once('.').unwrap_or((key, ""));

    if scope == "ticket" {
        let ticket = state.ticket();
        return match field {
            "id" => ticket.id.clone(),
            "tier" => ticket.tier().unwrap_or_default().to_string(),
            "role" => ticket.role().unwrap_or_default().to_string(),
            _ => String::new(),
        };
    }

    let Ok(stage) = scope.parse::<StageId>() else {
        return String::new();
    };
    if field == "status" {
        return state
            .outcome(stage)
            .map(|r| r.status.to_string())
            .unwrap_or_default();
    }

    match stage {
        StageId::Analysis => state
            .analysis()
            .map(|a| match field {
                "category" => a.category.to_string(),
                "priority" => a.priority.to_string(),
                "confidence" => a.confidence.to_string(),
                _ => String::new(),
            })
            .unwrap_or_default(),
        StageId::Response => state
            .response()
            .map(|r| match field {
                "next_action" => r.next_action.to_string(),
                "template_id" => r.template_id.clone().unwrap_or_default(),
                _ => String::new(),
            })
            .unwrap_or_default(),
    }
}
