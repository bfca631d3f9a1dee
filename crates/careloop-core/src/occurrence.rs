//! Occurrence records and their state machine.
//!
//! ```text
//! Scheduled -> Fired -> Resolved
//!                  \--> Escalated
//! ```
//!
//! `Scheduled` occurrences are never persisted; they exist only as the output
//! of the recurrence resolver. A record appears in the store the moment an
//! occurrence fires (or is resolved ahead of the tick that would have fired
//! it). `Resolved` and `Escalated` are terminal.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::reminder::Reminder;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OccurrenceState {
    Scheduled,
    Fired,
    Resolved,
    Escalated,
}

impl OccurrenceState {
    pub fn can_transition_to(&self, to: &OccurrenceState) -> bool {
        match self {
            OccurrenceState::Scheduled => {
                matches!(to, OccurrenceState::Fired | OccurrenceState::Resolved)
            }
            OccurrenceState::Fired => {
                matches!(to, OccurrenceState::Resolved | OccurrenceState::Escalated)
            }
            OccurrenceState::Resolved | OccurrenceState::Escalated => false,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, OccurrenceState::Resolved | OccurrenceState::Escalated)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            OccurrenceState::Scheduled => "scheduled",
            OccurrenceState::Fired => "fired",
            OccurrenceState::Resolved => "resolved",
            OccurrenceState::Escalated => "escalated",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "scheduled" => Some(OccurrenceState::Scheduled),
            "fired" => Some(OccurrenceState::Fired),
            "resolved" => Some(OccurrenceState::Resolved),
            "escalated" => Some(OccurrenceState::Escalated),
            _ => None,
        }
    }
}

impl fmt::Display for OccurrenceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Idempotency key: one reminder, one due instant.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct OccurrenceKey {
    pub reminder_id: String,
    pub due_at: DateTime<Utc>,
}

impl OccurrenceKey {
    pub fn new(reminder_id: impl Into<String>, due_at: DateTime<Utc>) -> Self {
        Self {
            reminder_id: reminder_id.into(),
            due_at,
        }
    }
}

impl fmt::Display for OccurrenceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.reminder_id, self.due_at.to_rfc3339())
    }
}

/// Escalation policy captured when the occurrence fired. Later edits to the
/// reminder do not reach an occurrence that is already in flight.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EscalationSnapshot {
    pub deadline: DateTime<Utc>,
    pub targets: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Occurrence {
    pub key: OccurrenceKey,
    pub state: OccurrenceState,
    pub fired_at: Option<DateTime<Utc>>,
    /// `None` when escalation was disabled at fire time.
    pub escalation: Option<EscalationSnapshot>,
    pub resolved_at: Option<DateTime<Utc>>,
    pub escalated_at: Option<DateTime<Utc>>,
    pub alert_id: Option<String>,
}

impl Occurrence {
    /// A freshly fired occurrence. When the reminder escalates, the deadline
    /// is armed from `now`, the instant it actually fired.
    pub fn fired(reminder: &Reminder, due_at: DateTime<Utc>, now: DateTime<Utc>) -> Self {
        let escalation = reminder.escalation.enabled.then(|| EscalationSnapshot {
            deadline: now + Duration::minutes(reminder.escalation.delay_minutes as i64),
            targets: reminder.escalation.targets.clone(),
        });
        Self {
            key: OccurrenceKey::new(&reminder.id, due_at),
            state: OccurrenceState::Fired,
            fired_at: Some(now),
            escalation,
            resolved_at: None,
            escalated_at: None,
            alert_id: None,
        }
    }

    /// An occurrence the owner resolved before any tick fired it.
    pub fn resolved_early(reminder_id: &str, due_at: DateTime<Utc>, now: DateTime<Utc>) -> Self {
        Self {
            key: OccurrenceKey::new(reminder_id, due_at),
            state: OccurrenceState::Resolved,
            fired_at: None,
            escalation: None,
            resolved_at: Some(now),
            escalated_at: None,
            alert_id: None,
        }
    }

    pub fn deadline(&self) -> Option<DateTime<Utc>> {
        self.escalation.as_ref().map(|e| e.deadline)
    }

    /// Still waiting for resolution with a deadline at or before `now`.
    pub fn is_overdue(&self, now: DateTime<Utc>) -> bool {
        self.state == OccurrenceState::Fired && self.deadline().is_some_and(|d| d <= now)
    }
}

/// Result of a conditional state write against the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransitionOutcome {
    /// This writer moved the occurrence.
    Applied,
    /// The occurrence was not in the expected prior state; carries what it
    /// actually was.
    Observed(Occurrence),
}
