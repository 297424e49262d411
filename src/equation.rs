//! Validated Scopus search equations.

use crate::error::{Result, ScopusError};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::OnceLock;

const BOOLEAN_OPERATORS: &[&str] = &["AND", "OR", "NOT"];

/// Field-code call such as `TITLE-ABS-KEY("deep learning")` or `AUTHOR-NAME(smith)`.
fn field_call_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?i)\b[A-Z][A-Z0-9-]*\s*\(.*\)").expect("valid regex")
    })
}

fn operator_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        let pattern = format!(r"(?i)\b(?:{})\b", BOOLEAN_OPERATORS.join("|"));
        Regex::new(&pattern).expect("valid regex")
    })
}

/// A search equation in Scopus advanced-search syntax.
///
/// The syntax itself is opaque here; only a basic shape check is applied
/// before anything is sent to the API.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct SearchEquation(String);

impl SearchEquation {
    pub fn new(raw: impl Into<String>) -> Result<Self> {
        let raw = raw.into();
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Err(ScopusError::Query("Search equation cannot be empty".to_string()));
        }
        if !operator_regex().is_match(trimmed) && !field_call_regex().is_match(trimmed) {
            return Err(ScopusError::Query(
                "Search equation must contain a boolean operator or a field code such as TITLE-ABS-KEY(...)"
                    .to_string(),
            ));
        }
        Ok(Self(trimmed.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SearchEquation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for SearchEquation {
    type Error = ScopusError;

    fn try_from(value: String) -> Result<Self> {
        Self::new(value)
    }
}

impl From<SearchEquation> for String {
    fn from(value: SearchEquation) -> Self {
        value.0
    }
}
