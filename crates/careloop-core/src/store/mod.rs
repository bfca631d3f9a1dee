//! Occurrence store: the engine's only window onto durable state.
//!
//! The engine never assumes anything about storage beyond this trait. Two
//! guarantees matter and every adapter must provide them:
//!
//! - occurrence inserts are keyed by [`OccurrenceKey`] and never overwrite;
//! - state transitions are conditional on the prior state, so two ticks
//!   racing on one occurrence produce one winner and one observer.

pub mod memory;
pub mod migrations;
pub mod sqlite;

use chrono::{DateTime, Utc};

use crate::alert::{Alert, DeliveryRecord};
use crate::error::StoreError;
use crate::member::SupportCircleMember;
use crate::occurrence::{Occurrence, OccurrenceKey, TransitionOutcome};
use crate::reminder::Reminder;

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// Result of an insert-if-absent on an occurrence key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InsertOutcome {
    Inserted,
    /// A record with this key already existed and was left untouched.
    Existing(Occurrence),
}

pub trait OccurrenceStore: Send + Sync {
    // ── Reminders ────────────────────────────────────────────────────

    fn insert_reminder(&self, reminder: &Reminder) -> StoreResult<()>;

    /// Replace a stored reminder. Returns `false` if it does not exist.
    fn update_reminder(&self, reminder: &Reminder) -> StoreResult<bool>;

    fn get_reminder(&self, id: &str) -> StoreResult<Option<Reminder>>;

    fn list_reminders(&self) -> StoreResult<Vec<Reminder>>;

    fn list_active_reminders(&self) -> StoreResult<Vec<Reminder>> {
        Ok(self
            .list_reminders()?
            .into_iter()
            .filter(|r| r.active)
            .collect())
    }

    // ── Members ──────────────────────────────────────────────────────

    fn upsert_member(&self, member: &SupportCircleMember) -> StoreResult<()>;

    fn get_member(&self, id: &str) -> StoreResult<Option<SupportCircleMember>>;

    fn list_members(&self) -> StoreResult<Vec<SupportCircleMember>>;

    // ── Occurrences ──────────────────────────────────────────────────

    fn insert_occurrence(&self, occurrence: &Occurrence) -> StoreResult<InsertOutcome>;

    fn get_occurrence(&self, key: &OccurrenceKey) -> StoreResult<Option<Occurrence>>;

    fn list_occurrences(&self, reminder_id: &str) -> StoreResult<Vec<Occurrence>>;

    /// Fired occurrences whose escalation deadline is at or before `now`.
    fn list_overdue(&self, now: DateTime<Utc>) -> StoreResult<Vec<Occurrence>>;

    /// `fired -> resolved`, only if still fired.
    fn resolve_occurrence(
        &self,
        key: &OccurrenceKey,
        now: DateTime<Utc>,
    ) -> StoreResult<TransitionOutcome>;

    /// `fired -> escalated`, only if still fired, storing `alert` in the same
    /// write. Re-submitting the same alert after an ambiguous failure reports
    /// `Applied` when the first submission had in fact landed.
    fn escalate_occurrence(
        &self,
        key: &OccurrenceKey,
        now: DateTime<Utc>,
        alert: Option<&Alert>,
    ) -> StoreResult<TransitionOutcome>;

    // ── Alerts ───────────────────────────────────────────────────────

    fn insert_alert(&self, alert: &Alert) -> StoreResult<()>;

    fn get_alert(&self, id: &str) -> StoreResult<Option<Alert>>;

    fn list_alerts(&self) -> StoreResult<Vec<Alert>>;

    /// Idempotent set-insert. Returns the updated alert, or `None` if the
    /// alert does not exist.
    fn add_acknowledgment(&self, alert_id: &str, member_id: &str) -> StoreResult<Option<Alert>>;

    /// Insert or replace the delivery record for `(member, channel)`.
    fn record_delivery(&self, alert_id: &str, record: &DeliveryRecord) -> StoreResult<()>;
}

/// Shared decision for a conditional escalate: given the current record,
/// whether the write should be applied, is a replay, or must be refused.
pub(crate) fn escalate_precondition(
    current: &Occurrence,
    alert: Option<&Alert>,
) -> EscalatePrecondition {
    use crate::occurrence::OccurrenceState;
    match current.state {
        OccurrenceState::Fired => EscalatePrecondition::Apply,
        OccurrenceState::Escalated
            if current.alert_id.as_deref() == alert.map(|a| a.id.as_str()) =>
        {
            EscalatePrecondition::Replay
        }
        _ => EscalatePrecondition::Refuse,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum EscalatePrecondition {
    Apply,
    Replay,
    Refuse,
}
