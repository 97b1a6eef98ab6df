//! Drop rules: YAML loading, validation, and per-record evaluation.
//!
//! A rule set is an "any rule matches" disjunction. A rule is a group of
//! field/regex matches that are ANDed together, but only over the fields the
//! record actually carries (see [`Rule::eval`]).

use crate::codec::{FieldValue, Record};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::OnceLock;

/// Record fields a match is allowed to target.
pub const RECOGNIZED_FIELDS: [&str; 4] = ["eventName", "eventSource", "awsRegion", "recipientAccountId"];

pub fn is_recognized_field(name: &str) -> bool {
    RECOGNIZED_FIELDS.contains(&name)
}

/// One validation failure, attributed to the 0-based index of its rule.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FieldError {
    pub index: usize,
    pub field: String,
    pub description: String,
}

/// Every validation failure found in a rule set, in rule order.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ValidationErrors(pub Vec<FieldError>);

impl ValidationErrors {
    pub fn is_empty(&self) -> bool { self.0.is_empty() }
    pub fn len(&self) -> usize { self.0.len() }
    pub fn iter(&self) -> impl Iterator<Item = &FieldError> { self.0.iter() }

    fn push(&mut self, index: usize, field: &str, description: impl Into<String>) {
        self.0.push(FieldError { index, field: field.to_string(), description: description.into() });
    }
}

impl fmt::Display for ValidationErrors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, e) in self.0.iter().enumerate() {
            if i > 0 { f.write_str("\n")?; }
            write!(f, "rule index: {} field: {} error: {}", e.index, e.field, e.description)?;
        }
        Ok(())
    }
}

impl std::error::Error for ValidationErrors {}

/// Top-level rules document.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct RuleSet {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub rules: Vec<Rule>,
}

/// A named group of matches.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Rule {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub matches: Vec<Match>,
}

/// A field name and the regex its string value is tested against.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Match {
    #[serde(default)]
    pub field_name: String,
    /// `matches` was the key name in older configs.
    #[serde(default, rename = "regex", alias = "matches")]
    pub pattern: String,
    #[serde(skip)]
    compiled: OnceLock<Regex>,
}

impl PartialEq for Match {
    fn eq(&self, other: &Self) -> bool {
        self.field_name == other.field_name && self.pattern == other.pattern
    }
}

impl Match {
    pub fn new(field_name: impl Into<String>, pattern: impl Into<String>) -> Self {
        Self { field_name: field_name.into(), pattern: pattern.into(), compiled: OnceLock::new() }
    }

    /// Compiled pattern, built on first use and reused afterwards.
    pub fn regex(&self) -> Result<&Regex, regex::Error> {
        if let Some(re) = self.compiled.get() {
            return Ok(re);
        }
        let re = Regex::new(&self.pattern)?;
        Ok(self.compiled.get_or_init(|| re))
    }
}

impl Rule {
    pub fn new(name: impl Into<String>, matches: Vec<Match>) -> Self {
        Self { name: name.into(), matches }
    }

    /// Walks the record's fields in document order; each match whose
    /// `field_name` equals the current key tests that field's string value and
    /// ANDs the outcome into an accumulator that starts at `true`.
    ///
    /// Non-string values are skipped. A rule none of whose fields appear in
    /// the record therefore evaluates to `true`.
    pub fn eval(&self, record: &Record) -> Result<bool, regex::Error> {
        let mut matched = true;
        for (key, value) in record.fields() {
            for m in &self.matches {
                if m.field_name != key {
                    continue;
                }
                let s = match FieldValue::of(value) {
                    FieldValue::String(s) => s,
                    _ => continue,
                };
                let hit = m.regex()?.is_match(&s);
                matched = matched && hit;
            }
        }
        Ok(matched)
    }
}

impl RuleSet {
    /// Parse a YAML rules document. A missing `rules` key yields an empty set.
    pub fn load(raw: &str) -> Result<Self, serde_yaml::Error> {
        if raw.trim().is_empty() {
            return Ok(Self::default());
        }
        serde_yaml::from_str(raw)
    }

    /// Collect every defect across all rules rather than stopping at the first.
    pub fn validate(&self) -> ValidationErrors {
        let mut errs = ValidationErrors::default();
        for (i, rule) in self.rules.iter().enumerate() {
            if rule.name.is_empty() {
                errs.push(i, "", "missing name");
            }
            for m in &rule.matches {
                if !is_recognized_field(&m.field_name) {
                    errs.push(i, &m.field_name, "invalid field");
                }
                if let Err(e) = m.regex() {
                    errs.push(i, &m.field_name, format!("invalid regex: {}", e));
                }
            }
        }
        errs
    }

    /// True when any rule matches; evaluation stops at the first match.
    pub fn eval_rules(&self, record: &Record) -> Result<bool, regex::Error> {
        for rule in &self.rules {
            if rule.eval(record)? {
                return Ok(true);
            }
        }
        Ok(false)
    }

    pub fn len(&self) -> usize { self.rules.len() }
    pub fn is_empty(&self) -> bool { self.rules.is_empty() }
}
