use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Status of a single condition. A condition starts `Initialized` and
/// settles on either `Success` or `Error`.
#[derive(Serialize, Deserialize, Debug, PartialEq, Eq, Clone, Copy, JsonSchema, Default)]
pub enum ConditionStatus {
    #[default]
    Initialized,
    InProgress,
    Waiting,
    Success,
    Error,
}

impl ConditionStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, ConditionStatus::Success | ConditionStatus::Error)
    }
}

impl fmt::Display for ConditionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{self:?}")
    }
}

/// Phase derived from a set of conditions.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum DerivedPhase {
    Running,
    Done,
    Error,
}

/// Implemented by the condition type enums of each resource. `ALL` is the
/// ordered set of conditions the resource tracks.
pub trait ConditionType: Copy + PartialEq + fmt::Debug + 'static {
    const ALL: &'static [Self];
}

#[derive(Serialize, Deserialize, Debug, PartialEq, Clone, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Condition<T> {
    #[serde(rename = "type")]
    pub type_: T,
    pub status: ConditionStatus,
    /// Time the condition was last mutated in memory, not the time it was
    /// committed to the API.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_transition_time: Option<DateTime<Utc>>,
}

impl<T> Condition<T> {
    pub fn new(type_: T, status: ConditionStatus) -> Self {
        Self {
            type_,
            status,
            last_transition_time: None,
        }
    }
}

/// Ordered set of conditions, keyed by type.
#[derive(Serialize, Deserialize, Debug, PartialEq, Clone, JsonSchema)]
#[serde(transparent)]
pub struct Conditions<T>(Vec<Condition<T>>);

impl<T> Default for Conditions<T> {
    fn default() -> Self {
        Self(Vec::new())
    }
}

impl<T: ConditionType> Conditions<T> {
    /// Returns a copy of the condition for `type_`. An absent type reads as
    /// `Initialized`.
    pub fn get_condition(&self, type_: T) -> Condition<T> {
        self.0
            .iter()
            .find(|c| c.type_ == type_)
            .cloned()
            .unwrap_or_else(|| Condition::new(type_, ConditionStatus::Initialized))
    }

    /// Replaces the entry with the same type or appends it. Returns whether
    /// the stack changed.
    ///
    /// Writing the status an entry already has is a no-op, including its
    /// timestamp. A terminal entry (`Success`/`Error`) never moves back to an
    /// earlier status. The transition time is stamped with `now` unless the
    /// caller supplied one for a new entry.
    pub fn set_condition(&mut self, mut condition: Condition<T>) -> bool {
        match self.0.iter_mut().find(|c| c.type_ == condition.type_) {
            Some(existing) => {
                if existing.status == condition.status {
                    return false;
                }
                if existing.status.is_terminal() && !condition.status.is_terminal() {
                    tracing::warn!(
                        condition = ?condition.type_,
                        from = %existing.status,
                        to = %condition.status,
                        "refusing to regress a settled condition"
                    );
                    return false;
                }
                if condition.last_transition_time.is_none()
                    || condition.last_transition_time == existing.last_transition_time
                {
                    condition.last_transition_time = Some(Utc::now());
                }
                *existing = condition;
            }
            None => {
                if condition.last_transition_time.is_none() {
                    condition.last_transition_time = Some(Utc::now());
                }
                self.0.push(condition);
            }
        }
        true
    }

    pub fn set(&mut self, type_: T, status: ConditionStatus) -> bool {
        self.set_condition(Condition::new(type_, status))
    }

    /// Phase over the conditions present in the stack: `Error` if any is in
    /// error, `Done` if all are successful, `Running` otherwise. An empty stack
    /// is `Done`.
    pub fn phase(&self) -> DerivedPhase {
        derive_phase(self.0.iter().map(|c| c.status))
    }

    /// Phase over every tracked type of `T`, absent types counting as
    /// `Initialized`.
    pub fn tracked_phase(&self) -> DerivedPhase {
        derive_phase(T::ALL.iter().map(|t| self.get_condition(*t).status))
    }

    /// Most recent condition in error, the canonical user-facing failure.
    pub fn last_error(&self) -> Option<&Condition<T>> {
        self.0
            .iter()
            .filter(|c| c.status == ConditionStatus::Error)
            .max_by_key(|c| c.last_transition_time)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Condition<T>> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

fn derive_phase(statuses: impl Iterator<Item = ConditionStatus>) -> DerivedPhase {
    let mut completed = true;
    for status in statuses {
        if status == ConditionStatus::Error {
            return DerivedPhase::Error;
        }
        if status != ConditionStatus::Success {
            completed = false;
        }
    }

    if completed {
        DerivedPhase::Done
    } else {
        DerivedPhase::Running
    }
}
