//! Label-selector evaluation.
//!
//! Selectors combine equality requirements (`match_labels`) with set-based
//! requirements (`match_expressions`). A label set satisfies a selector when
//! it satisfies every requirement; the empty selector matches everything.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Selector validation errors.
#[derive(Debug, Error)]
pub enum SelectorError {
    /// In/NotIn requirements need at least one value.
    #[error("operator {operator:?} on key {key:?} requires a non-empty values list")]
    EmptyValues { key: String, operator: Operator },

    /// Exists/DoesNotExist requirements must not carry values.
    #[error("operator {operator:?} on key {key:?} must not specify values")]
    UnexpectedValues { key: String, operator: Operator },
}

/// Set-based requirement operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Operator {
    In,
    NotIn,
    Exists,
    DoesNotExist,
}

/// A single set-based requirement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Requirement {
    pub key: String,
    pub operator: Operator,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub values: Vec<String>,
}

impl Requirement {
    /// Check a label set against this requirement.
    ///
    /// A missing key fails `In` and passes `NotIn`.
    pub fn matches(&self, labels: &BTreeMap<String, String>) -> bool {
        let value = labels.get(&self.key);
        match self.operator {
            Operator::In => value.map_or(false, |v| self.values.iter().any(|x| x == v)),
            Operator::NotIn => value.map_or(true, |v| !self.values.iter().any(|x| x == v)),
            Operator::Exists => value.is_some(),
            Operator::DoesNotExist => value.is_none(),
        }
    }

    fn validate(&self) -> Result<(), SelectorError> {
        match self.operator {
            Operator::In | Operator::NotIn if self.values.is_empty() => {
                Err(SelectorError::EmptyValues {
                    key: self.key.clone(),
                    operator: self.operator,
                })
            }
            Operator::Exists | Operator::DoesNotExist if !self.values.is_empty() => {
                Err(SelectorError::UnexpectedValues {
                    key: self.key.clone(),
                    operator: self.operator,
                })
            }
            _ => Ok(()),
        }
    }
}

/// A label selector.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LabelSelector {
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub match_labels: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub match_expressions: Vec<Requirement>,
}

impl LabelSelector {
    /// A selector that matches every label set.
    pub fn everything() -> Self {
        Self::default()
    }

    /// True when the selector has no requirements at all.
    pub fn is_empty(&self) -> bool {
        self.match_labels.is_empty() && self.match_expressions.is_empty()
    }

    /// Validate the selector's requirements.
    pub fn validate(&self) -> Result<(), SelectorError> {
        for requirement in &self.match_expressions {
            requirement.validate()?;
        }
        Ok(())
    }

    /// Check a label set against every requirement.
    pub fn matches(&self, labels: &BTreeMap<String, String>) -> bool {
        for (key, value) in &self.match_labels {
            if labels.get(key) != Some(value) {
                return false;
            }
        }
        self.match_expressions.iter().all(|r| r.matches(labels))
    }
}
