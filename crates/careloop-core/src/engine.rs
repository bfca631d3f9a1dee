//! Engine facade.
//!
//! The inbound operations of the reminder engine plus the periodic `tick`,
//! over any [`OccurrenceStore`]. The engine holds no state between calls:
//! everything it knows comes from the store, so ticks may be skipped,
//! delayed or duplicated by the external scheduler without harm.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

use crate::ack::AcknowledgmentTracker;
use crate::alert::{Alert, AlertType, Severity};
use crate::config::Config;
use crate::dispatch::{AlertDispatcher, DispatchReport};
use crate::error::{CoreError, Result};
use crate::escalation::{EscalationCoordinator, EscalationOutcome, FireOutcome, ResolveOutcome};
use crate::gate::{self, AlertContext};
use crate::member::{NotificationChannel, SupportCircleMember};
use crate::occurrence::Occurrence;
use crate::reminder::{
    next_occurrence, occurrences_between, Author, NewReminder, Reminder, ReminderPatch,
};
use crate::store::OccurrenceStore;

/// Upper bound on fires per reminder per tick.
const MAX_FIRES_PER_REMINDER: usize = 1_000;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineSettings {
    /// How far back a tick looks for due instants that were never fired.
    pub lookback: Duration,
    pub store_write_attempts: u32,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self::from_config(&Config::default())
    }
}

impl EngineSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            lookback: Duration::hours(config.escalation.lookback_hours as i64),
            store_write_attempts: config.escalation.store_write_attempts,
        }
    }
}

/// Input for the manual alert path.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ManualAlert {
    pub alert_type: AlertType,
    pub title: String,
    pub message: String,
    pub severity: Severity,
    /// `None` targets every member.
    #[serde(default)]
    pub targets: Option<Vec<String>>,
}

/// What one tick did.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TickReport {
    pub fired: usize,
    pub duplicates_skipped: usize,
    pub escalated: usize,
    pub alerts_created: usize,
    /// Escalated with nobody eligible to tell.
    pub suppressed: usize,
    /// Lost a race to another tick or a resolution.
    pub already_settled: usize,
    /// Reminders or occurrences skipped because the store failed on them.
    #[serde(default)]
    pub errors: usize,
    pub alert_ids: Vec<String>,
}

pub struct Engine<S: OccurrenceStore> {
    store: S,
    settings: EngineSettings,
}

impl<S: OccurrenceStore> Engine<S> {
    pub fn new(store: S, settings: EngineSettings) -> Self {
        Self { store, settings }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn settings(&self) -> &EngineSettings {
        &self.settings
    }

    fn coordinator(&self) -> EscalationCoordinator<'_, S> {
        EscalationCoordinator::new(&self.store, self.settings.store_write_attempts)
    }

    /// Owners may always act; a member must be active and allowed to send reminders.
    fn authorize(&self, author: &Author, action: &'static str) -> Result<()> {
        let Author::Member(member_id) = author else {
            return Ok(());
        };
        let member = self
            .store
            .get_member(member_id)?
            .ok_or_else(|| CoreError::not_found("member", member_id.as_str()))?;
        if member.is_active() && member.can_send_reminders {
            Ok(())
        } else {
            Err(CoreError::PermissionDenied {
                member_id: member_id.clone(),
                action,
            })
        }
    }

    // ── Members ──────────────────────────────────────────────────────────

    pub fn add_member(&self, member: SupportCircleMember) -> Result<SupportCircleMember> {
        member.validate()?;
        self.store.upsert_member(&member)?;
        tracing::info!(member_id = %member.id, role = ?member.role, "member saved");
        Ok(member)
    }

    // ── Reminders ────────────────────────────────────────────────────────

    pub fn create_reminder(&self, new: NewReminder, now: DateTime<Utc>) -> Result<Reminder> {
        self.authorize(&new.created_by, "create reminders")?;
        let reminder = Reminder::from_new(uuid::Uuid::new_v4().to_string(), new, now);
        reminder.validate()?;
        self.store.insert_reminder(&reminder)?;
        tracing::info!(reminder_id = %reminder.id, title = %reminder.title, "reminder created");
        Ok(reminder)
    }

    /// Apply `patch`. Occurrences already fired keep the escalation they
    /// fired with.
    pub fn update_reminder(
        &self,
        id: &str,
        patch: ReminderPatch,
        editor: &Author,
        now: DateTime<Utc>,
    ) -> Result<Reminder> {
        self.authorize(editor, "edit reminders")?;
        let mut reminder = self
            .store
            .get_reminder(id)?
            .ok_or_else(|| CoreError::not_found("reminder", id))?;
        if patch.is_empty() {
            return Ok(reminder);
        }
        reminder.apply(patch, now);
        reminder.validate()?;
        if !self.store.update_reminder(&reminder)? {
            return Err(CoreError::not_found("reminder", id));
        }
        tracing::info!(reminder_id = %id, "reminder updated");
        Ok(reminder)
    }

    /// The next `count` due instants strictly after `after`.
    pub fn upcoming(
        &self,
        reminder_id: &str,
        after: DateTime<Utc>,
        count: usize,
    ) -> Result<Vec<DateTime<Utc>>> {
        let reminder = self
            .store
            .get_reminder(reminder_id)?
            .ok_or_else(|| CoreError::not_found("reminder", reminder_id))?;
        let mut out = Vec::with_capacity(count);
        let mut cursor = after;
        while out.len() < count {
            match next_occurrence(&reminder, cursor) {
                Some(due) => {
                    out.push(due);
                    cursor = due;
                }
                None => break,
            }
        }
        Ok(out)
    }

    // ── Occurrences ──────────────────────────────────────────────────────

    pub fn resolve_occurrence(
        &self,
        reminder_id: &str,
        due: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<ResolveOutcome> {
        let reminder = self
            .store
            .get_reminder(reminder_id)?
            .ok_or_else(|| CoreError::not_found("reminder", reminder_id))?;
        self.coordinator().resolve(&reminder, due, now)
    }

    /// One scheduler evaluation: fire what came due in the lookback window,
    /// then escalate whatever is past its deadline.
    ///
    /// A failure on one reminder or occurrence is logged and counted in
    /// [`TickReport::errors`]; the rest of the tick still runs. Only failing
    /// to list reminders or overdue occurrences fails the whole call.
    pub fn tick(&self, now: DateTime<Utc>) -> Result<TickReport> {
        let coordinator = self.coordinator();
        let mut report = TickReport::default();
        let window_start = now - self.settings.lookback;

        for reminder in self.store.list_active_reminders()? {
            for due in occurrences_between(&reminder, window_start, now, MAX_FIRES_PER_REMINDER) {
                match coordinator.fire(&reminder, due, now) {
                    Ok(FireOutcome::Fired(_)) => report.fired += 1,
                    Ok(FireOutcome::AlreadyRecorded(_)) => report.duplicates_skipped += 1,
                    Err(e) => {
                        tracing::warn!(reminder_id = %reminder.id, %due, error = %e, "failed to fire occurrence");
                        report.errors += 1;
                    }
                }
            }
        }

        for occurrence in self.store.list_overdue(now)? {
            if let Err(e) = self.escalate_one(&coordinator, &occurrence, now, &mut report) {
                tracing::warn!(occurrence = %occurrence.key, error = %e, "failed to escalate occurrence");
                report.errors += 1;
            }
        }

        tracing::info!(
            %now,
            fired = report.fired,
            duplicates = report.duplicates_skipped,
            escalated = report.escalated,
            alerts = report.alerts_created,
            suppressed = report.suppressed,
            errors = report.errors,
            "tick complete"
        );
        Ok(report)
    }

    fn escalate_one(
        &self,
        coordinator: &EscalationCoordinator<'_, S>,
        occurrence: &Occurrence,
        now: DateTime<Utc>,
        report: &mut TickReport,
    ) -> Result<()> {
        let Some(reminder) = self.store.get_reminder(&occurrence.key.reminder_id)? else {
            tracing::warn!(occurrence = %occurrence.key, "overdue occurrence has no reminder");
            return Ok(());
        };
        match coordinator.escalate(occurrence, &reminder, now)? {
            EscalationOutcome::Escalated(alert) => {
                report.escalated += 1;
                report.alerts_created += 1;
                report.alert_ids.push(alert.id);
            }
            EscalationOutcome::Suppressed => {
                report.escalated += 1;
                report.suppressed += 1;
            }
            EscalationOutcome::AlreadySettled(_) => report.already_settled += 1,
            EscalationOutcome::NotDue => {}
        }
        Ok(())
    }

    // ── Alerts ───────────────────────────────────────────────────────────

    /// Manual alert. Named targets must exist; they are then gated like
    /// escalation targets, and the survivors are fixed as the alert's targets.
    pub fn generate_alert(&self, spec: ManualAlert, now: DateTime<Utc>) -> Result<Alert> {
        let candidates = match &spec.targets {
            Some(ids) => ids
                .iter()
                .map(|id| -> Result<SupportCircleMember> {
                    self.store
                        .get_member(id)?
                        .ok_or_else(|| CoreError::not_found("member", id.as_str()))
                })
                .collect::<Result<Vec<_>>>()?,
            None => self.store.list_members()?,
        };
        let recipients = gate::eligible_recipients(&AlertContext::ungated(), &candidates);
        if recipients.is_empty() {
            tracing::warn!(title = %spec.title, "manual alert has no eligible recipients");
        }

        let alert = Alert::new(
            spec.alert_type,
            spec.title,
            spec.message,
            spec.severity,
            recipients.into_iter().map(|m| m.id),
            now,
        );
        self.store.insert_alert(&alert)?;
        tracing::info!(alert_id = %alert.id, alert_type = alert.alert_type.as_str(), "alert created");
        Ok(alert)
    }

    pub fn acknowledge(&self, alert_id: &str, member_id: &str) -> Result<Alert> {
        AcknowledgmentTracker::new(&self.store).acknowledge(alert_id, member_id)
    }

    /// Deliver an existing alert to its targets and record the outcomes on it.
    ///
    /// Delivery problems never fail this call; only a missing alert or a
    /// failing store read does.
    pub async fn dispatch_alert(
        &self,
        alert_id: &str,
        dispatcher: &AlertDispatcher,
    ) -> Result<DispatchReport> {
        let alert = self
            .store
            .get_alert(alert_id)?
            .ok_or_else(|| CoreError::not_found("alert", alert_id))?;

        let mut recipients = Vec::with_capacity(alert.targets().len());
        for id in alert.targets() {
            match self.store.get_member(id)? {
                Some(member) => recipients.push(member),
                None => tracing::warn!(alert_id, member_id = %id, "alert target no longer exists"),
            }
        }

        let allowed: BTreeSet<NotificationChannel> = match &alert.occurrence {
            Some(key) => match self.store.get_reminder(&key.reminder_id)? {
                Some(reminder) => reminder.delivery.notification_channels(),
                None => NotificationChannel::ALL.into_iter().collect(),
            },
            None => NotificationChannel::ALL.into_iter().collect(),
        };

        let report = dispatcher.dispatch(&alert, &recipients, &allowed).await;

        let recorded_at = Utc::now();
        for o in &report.outcomes {
            if let Some(record) = o.outcome.to_record(&o.member_id, o.channel, recorded_at) {
                if let Err(e) = self.store.record_delivery(alert_id, &record) {
                    tracing::warn!(alert_id, member_id = %o.member_id, channel = %o.channel, error = %e, "failed to record delivery");
                }
            }
        }
        Ok(report)
    }
}
