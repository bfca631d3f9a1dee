//! Escalation coordinator.
//!
//! Owns the per-occurrence lifecycle: recording a fire, accepting a
//! resolution, and turning an overdue occurrence into at most one alert.
//! There are no timers here. A deadline is a timestamp on the occurrence
//! record and each tick compares it against `now`.
//!
//! Every store write goes through a conditional transition, so a duplicated
//! or concurrent tick observes the winner's result instead of writing a
//! second time. Transient store failures are retried with the *same* write
//! (same alert id), never by re-deriving a fresh one.

use chrono::{DateTime, Utc};
use std::time::Duration;

use crate::alert::{Alert, AlertType, Severity};
use crate::error::{CoreError, StoreError, ValidationError};
use crate::gate::{self, AlertContext};
use crate::occurrence::{Occurrence, OccurrenceKey, OccurrenceState, TransitionOutcome};
use crate::reminder::recurrence::is_occurrence;
use crate::reminder::{Reminder, ReminderCategory};
use crate::store::{InsertOutcome, OccurrenceStore};

/// Result of firing one due instant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FireOutcome {
    Fired(Occurrence),
    /// A record for this key already existed (duplicate tick, or resolved early).
    AlreadyRecorded(Occurrence),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResolveOutcome {
    /// Fired occurrence moved to resolved before any escalation.
    Resolved,
    /// Resolved before a tick fired it; the tick will find it settled.
    ResolvedEarly,
    AlreadyResolved,
    /// Too late: the alert exists and is not retracted.
    AlreadyEscalated { alert_id: Option<String> },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EscalationOutcome {
    /// Still inside the window, or no deadline armed.
    NotDue,
    Escalated(Alert),
    /// Escalated, but nobody in the target list may be told.
    Suppressed,
    /// Another writer settled the occurrence first.
    AlreadySettled(OccurrenceState),
}

/// First pause between store write attempts; doubles per attempt.
const STORE_RETRY_BASE_DELAY: Duration = Duration::from_millis(50);
const STORE_RETRY_MAX_DELAY: Duration = Duration::from_secs(1);

pub struct EscalationCoordinator<'a, S: OccurrenceStore + ?Sized> {
    store: &'a S,
    store_write_attempts: u32,
    retry_base_delay: Duration,
}

impl<'a, S: OccurrenceStore + ?Sized> EscalationCoordinator<'a, S> {
    pub fn new(store: &'a S, store_write_attempts: u32) -> Self {
        Self {
            store,
            store_write_attempts: store_write_attempts.max(1),
            retry_base_delay: STORE_RETRY_BASE_DELAY,
        }
    }

    pub fn with_retry_delay(mut self, base: Duration) -> Self {
        self.retry_base_delay = base;
        self
    }

    fn retry_delay(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
        self.retry_base_delay
            .saturating_mul(factor)
            .min(STORE_RETRY_MAX_DELAY)
    }

    /// Repeat `op` while it fails transiently, up to the attempt budget,
    /// pausing with exponential backoff in between.
    fn retry<T>(
        &self,
        what: &'static str,
        key: &OccurrenceKey,
        mut op: impl FnMut() -> Result<T, StoreError>,
    ) -> Result<T, StoreError> {
        let mut attempt = 1;
        loop {
            match op() {
                Err(e) if e.is_transient() && attempt < self.store_write_attempts => {
                    let delay = self.retry_delay(attempt);
                    tracing::warn!(
                        occurrence = %key,
                        attempt,
                        error = %e,
                        "{what} write failed, retrying in {:?}",
                        delay
                    );
                    std::thread::sleep(delay);
                    attempt += 1;
                }
                other => return other,
            }
        }
    }

    /// Record `due` as fired, arming the deadline if the reminder escalates.
    pub fn fire(
        &self,
        reminder: &Reminder,
        due: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<FireOutcome, StoreError> {
        let occurrence = Occurrence::fired(reminder, due, now);
        let key = occurrence.key.clone();
        match self.retry("fire", &key, || self.store.insert_occurrence(&occurrence))? {
            InsertOutcome::Inserted => {
                tracing::info!(
                    occurrence = %key,
                    deadline = ?occurrence.deadline(),
                    "occurrence fired"
                );
                Ok(FireOutcome::Fired(occurrence))
            }
            InsertOutcome::Existing(existing) => {
                tracing::debug!(occurrence = %key, state = %existing.state, "already recorded");
                Ok(FireOutcome::AlreadyRecorded(existing))
            }
        }
    }

    /// Owner completed the occurrence due at `due`.
    ///
    /// # Errors
    /// [`ValidationError::NotAnOccurrence`] if `due` is neither recorded nor
    /// an instant of the reminder's rule.
    pub fn resolve(
        &self,
        reminder: &Reminder,
        due: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<ResolveOutcome, CoreError> {
        let key = OccurrenceKey::new(&reminder.id, due);

        let current = match self.store.get_occurrence(&key)? {
            Some(current) => current,
            None => {
                if !is_occurrence(reminder, due) {
                    return Err(ValidationError::NotAnOccurrence {
                        reminder_id: reminder.id.clone(),
                        due,
                    }
                    .into());
                }
                let early = Occurrence::resolved_early(&reminder.id, due, now);
                match self.retry("resolve", &key, || self.store.insert_occurrence(&early))? {
                    InsertOutcome::Inserted => {
                        tracing::info!(occurrence = %key, "occurrence resolved before firing");
                        return Ok(ResolveOutcome::ResolvedEarly);
                    }
                    // A tick fired it between our read and insert.
                    InsertOutcome::Existing(existing) => existing,
                }
            }
        };

        let settled = |occ: &Occurrence| match occ.state {
            OccurrenceState::Escalated => ResolveOutcome::AlreadyEscalated {
                alert_id: occ.alert_id.clone(),
            },
            _ => ResolveOutcome::AlreadyResolved,
        };

        if current.state != OccurrenceState::Fired {
            return Ok(settled(&current));
        }
        match self.retry("resolve", &key, || self.store.resolve_occurrence(&key, now))? {
            TransitionOutcome::Applied => {
                tracing::info!(occurrence = %key, "occurrence resolved");
                Ok(ResolveOutcome::Resolved)
            }
            TransitionOutcome::Observed(occ) => {
                tracing::debug!(occurrence = %key, state = %occ.state, "resolve lost race");
                Ok(settled(&occ))
            }
        }
    }

    /// Escalate `occurrence` if its deadline has passed and it is still fired.
    ///
    /// `reminder` supplies the alert's wording and content domain; the target
    /// list comes from the snapshot taken at fire time.
    pub fn escalate(
        &self,
        occurrence: &Occurrence,
        reminder: &Reminder,
        now: DateTime<Utc>,
    ) -> Result<EscalationOutcome, StoreError> {
        if !occurrence.is_overdue(now) {
            return Ok(EscalationOutcome::NotDue);
        }
        let Some(snapshot) = occurrence.escalation.as_ref() else {
            return Ok(EscalationOutcome::NotDue);
        };
        let key = &occurrence.key;

        let mut candidates = Vec::with_capacity(snapshot.targets.len());
        for id in &snapshot.targets {
            match self.store.get_member(id)? {
                Some(member) => candidates.push(member),
                None => tracing::debug!(occurrence = %key, member_id = %id, "escalation target not found"),
            }
        }
        let recipients = gate::eligible_recipients(&AlertContext::for_reminder(reminder), &candidates);

        let alert = if recipients.is_empty() {
            None
        } else {
            Some(missed_reminder_alert(
                occurrence,
                reminder,
                recipients.iter().map(|m| m.id.clone()),
                now,
            ))
        };

        let outcome = self.retry("escalate", key, || {
            self.store.escalate_occurrence(key, now, alert.as_ref())
        })?;

        match (outcome, alert) {
            (TransitionOutcome::Applied, Some(alert)) => {
                tracing::info!(
                    occurrence = %key,
                    alert_id = %alert.id,
                    recipients = alert.targets().len(),
                    "occurrence escalated"
                );
                Ok(EscalationOutcome::Escalated(alert))
            }
            (TransitionOutcome::Applied, None) => {
                tracing::warn!(occurrence = %key, "occurrence escalated with no eligible recipients");
                Ok(EscalationOutcome::Suppressed)
            }
            (TransitionOutcome::Observed(current), _) => {
                tracing::debug!(occurrence = %key, state = %current.state, "escalation lost race");
                Ok(EscalationOutcome::AlreadySettled(current.state))
            }
        }
    }
}

fn missed_reminder_alert(
    occurrence: &Occurrence,
    reminder: &Reminder,
    targets: impl IntoIterator<Item = String>,
    now: DateTime<Utc>,
) -> Alert {
    let due = occurrence.key.due_at;
    let waited = match (occurrence.fired_at, occurrence.deadline()) {
        (Some(fired), Some(deadline)) => (deadline - fired).num_minutes(),
        _ => 0,
    };
    let severity = match reminder.category {
        ReminderCategory::Medication | ReminderCategory::Safety => Severity::Urgent,
        _ => Severity::Warning,
    };
    Alert::new(
        AlertType::EscalationMissedReminder,
        format!("Missed reminder: {}", reminder.title),
        format!(
            "\"{}\" was due at {} UTC and was not completed within {} minutes.",
            reminder.title,
            due.format("%Y-%m-%d %H:%M"),
            waited
        ),
        severity,
        targets,
        now,
    )
    .for_occurrence(occurrence.key.clone())
}
