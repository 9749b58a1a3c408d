//! Declared shapes for structured stage output.
//!
//! A [`Schema`] lists the fields a stage expects, their kinds, and the
//! alternative names a generator may use for them. The validator turns a raw
//! candidate into a [`ValidatedRecord`] of [`TypedValue`]s keyed by the
//! canonical field name.

use std::collections::BTreeMap;

use triage_types::{ValidationFailure, ValidationKind};

// ---------------------------------------------------------------------------
// Field declarations
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub enum FieldKind {
    /// A string. With `non_empty`, blank text is out of range.
    Text { non_empty: bool },
    /// A finite number within an inclusive range.
    Number { min: f64, max: f64 },
    Bool,
    /// A list of strings.
    List,
    /// One of a closed set of lowercase variants. Ordinal enums also accept
    /// a 1-based rank.
    Enum {
        variants: &'static [&'static str],
        ordinal: bool,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub struct FieldSpec {
    pub name: &'static str,
    pub kind: FieldKind,
    pub required: bool,
    pub aliases: &'static [&'static str],
}

impl FieldSpec {
    pub fn required(name: &'static str, kind: FieldKind) -> Self {
        Self {
            name,
            kind,
            required: true,
            aliases: &[],
        }
    }

    pub fn optional(name: &'static str, kind: FieldKind) -> Self {
        Self {
            name,
            kind,
            required: false,
            aliases: &[],
        }
    }

    pub fn with_aliases(mut self, aliases: &'static [&'static str]) -> Self {
        self.aliases = aliases;
        self
    }

    /// Names this field may appear under, canonical name first.
    pub fn names(&self) -> impl Iterator<Item = &'static str> + '_ {
        std::iter::once(self.name).chain(self.aliases.iter().copied())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Schema {
    pub name: &'static str,
    pub fields: Vec<FieldSpec>,
}

impl Schema {
    pub fn new(name: &'static str, fields: Vec<FieldSpec>) -> Self {
        Self { name, fields }
    }

    pub fn field(&self, name: &str) -> Option<&FieldSpec> {
        self.fields.iter().find(|f| f.name == name)
    }
}

// ---------------------------------------------------------------------------
// Validated output
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub enum TypedValue {
    Text(String),
    Number(f64),
    Bool(bool),
    List(Vec<String>),
    /// Canonical variant name.
    Enum(&'static str),
}

/// Output that passed schema validation. Holds only declared fields, under
/// their canonical names, plus the raw payload for diagnostics.
#[derive(Debug, Clone, PartialEq)]
pub struct ValidatedRecord {
    values: BTreeMap<&'static str, TypedValue>,
    raw: String,
}

impl ValidatedRecord {
    pub(crate) fn new(values: BTreeMap<&'static str, TypedValue>, raw: String) -> Self {
        Self { values, raw }
    }

    pub fn get(&self, name: &str) -> Option<&TypedValue> {
        self.values.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.values.contains_key(name)
    }

    pub fn raw(&self) -> &str {
        &self.raw
    }

    pub fn text(&self, name: &str) -> Option<&str> {
        match self.values.get(name) {
            Some(TypedValue::Text(s)) => Some(s),
            _ => None,
        }
    }

    pub fn number(&self, name: &str) -> Option<f64> {
        match self.values.get(name) {
            Some(TypedValue::Number(n)) => Some(*n),
            _ => None,
        }
    }

    pub fn boolean(&self, name: &str) -> Option<bool> {
        match self.values.get(name) {
            Some(TypedValue::Bool(b)) => Some(*b),
            _ => None,
        }
    }

    pub fn list(&self, name: &str) -> Option<&[String]> {
        match self.values.get(name) {
            Some(TypedValue::List(items)) => Some(items),
            _ => None,
        }
    }

    pub fn variant(&self, name: &str) -> Option<&'static str> {
        match self.values.get(name) {
            Some(TypedValue::Enum(v)) => Some(v),
            _ => None,
        }
    }

    /// A required enum field, or a `MissingField` failure.
    pub fn require_variant(&self, name: &str) -> Result<&'static str, ValidationFailure> {
        self.variant(name)
            .ok_or_else(|| ValidationFailure::missing_field(name, self.raw.clone()))
    }

    pub fn require_text(&self, name: &str) -> Result<&str, ValidationFailure> {
        self.text(name)
            .ok_or_else(|| ValidationFailure::missing_field(name, self.raw.clone()))
    }

    pub fn require_number(&self, name: &str) -> Result<f64, ValidationFailure> {
        self.number(name)
            .ok_or_else(|| ValidationFailure::missing_field(name, self.raw.clone()))
    }

    /// Build a failure attributed to `field` carrying this record's payload.
    pub fn failure(
        &self,
        kind: ValidationKind,
        field: &str,
        message: impl Into<String>,
    ) -> ValidationFailure {
        ValidationFailure::new(kind, Some(field), message, self.raw.clone())
    }
}
