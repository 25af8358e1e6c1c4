//! Job conditions
//!
//! A condition is a typed, timestamped fact about a job's progress, keyed by
//! stage name. A job carries at most one condition per type.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConditionStatus {
    True,
    False,
    Unknown,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Condition {
    #[serde(rename = "type")]
    pub condition_type: String,
    pub status: ConditionStatus,
    #[serde(default)]
    pub message: String,
    pub last_transition_time: DateTime<Utc>,
}

/// Ordered list of conditions, unique by type
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Conditions(Vec<Condition>);

impl Conditions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts or updates the condition of `condition_type`.
    ///
    /// `last_transition_time` only moves when the status or message changes.
    /// Returns `true` if anything changed.
    pub fn set(
        &mut self,
        condition_type: &str,
        status: ConditionStatus,
        message: impl Into<String>,
        now: DateTime<Utc>,
    ) -> bool {
        let message = message.into();

        match self
            .0
            .iter_mut()
            .find(|c| c.condition_type == condition_type)
        {
            Some(existing) => {
                if existing.status == status && existing.message == message {
                    return false;
                }
                existing.status = status;
                existing.message = message;
                existing.last_transition_time = now;
                true
            }
            None => {
                self.0.push(Condition {
                    condition_type: condition_type.to_string(),
                    status,
                    message,
                    last_transition_time: now,
                });
                true
            }
        }
    }

    pub fn get(&self, condition_type: &str) -> Option<&Condition> {
        self.0.iter().find(|c| c.condition_type == condition_type)
    }

    pub fn is_true(&self, condition_type: &str) -> bool {
        self.get(condition_type)
            .is_some_and(|c| c.status == ConditionStatus::True)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Condition> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}
