//! In-memory store for tests and embedders that bring their own persistence.

use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, HashMap};
use std::sync::{Mutex, MutexGuard};

use super::{
    escalate_precondition, EscalatePrecondition, InsertOutcome, OccurrenceStore, StoreResult,
};
use crate::alert::{Alert, DeliveryRecord};
use crate::member::SupportCircleMember;
use crate::occurrence::{Occurrence, OccurrenceKey, OccurrenceState, TransitionOutcome};
use crate::reminder::Reminder;

#[derive(Default)]
struct Inner {
    reminders: BTreeMap<String, Reminder>,
    members: BTreeMap<String, SupportCircleMember>,
    occurrences: BTreeMap<OccurrenceKey, Occurrence>,
    alerts: HashMap<String, Alert>,
}

/// `Mutex`-guarded maps. Every trait call takes the lock once, so each call
/// is atomic with respect to the others.
#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl OccurrenceStore for MemoryStore {
    fn insert_reminder(&self, reminder: &Reminder) -> StoreResult<()> {
        self.lock()
            .reminders
            .insert(reminder.id.clone(), reminder.clone());
        Ok(())
    }

    fn update_reminder(&self, reminder: &Reminder) -> StoreResult<bool> {
        let mut inner = self.lock();
        match inner.reminders.get_mut(&reminder.id) {
            Some(existing) => {
                *existing = reminder.clone();
                Ok(true)
            }
            None => Ok(false),
        }
    }

    fn get_reminder(&self, id: &str) -> StoreResult<Option<Reminder>> {
        Ok(self.lock().reminders.get(id).cloned())
    }

    fn list_reminders(&self) -> StoreResult<Vec<Reminder>> {
        Ok(self.lock().reminders.values().cloned().collect())
    }

    fn upsert_member(&self, member: &SupportCircleMember) -> StoreResult<()> {
        self.lock().members.insert(member.id.clone(), member.clone());
        Ok(())
    }

    fn get_member(&self, id: &str) -> StoreResult<Option<SupportCircleMember>> {
        Ok(self.lock().members.get(id).cloned())
    }

    fn list_members(&self) -> StoreResult<Vec<SupportCircleMember>> {
        Ok(self.lock().members.values().cloned().collect())
    }

    fn insert_occurrence(&self, occurrence: &Occurrence) -> StoreResult<InsertOutcome> {
        let mut inner = self.lock();
        if let Some(existing) = inner.occurrences.get(&occurrence.key) {
            return Ok(InsertOutcome::Existing(existing.clone()));
        }
        inner
            .occurrences
            .insert(occurrence.key.clone(), occurrence.clone());
        Ok(InsertOutcome::Inserted)
    }

    fn get_occurrence(&self, key: &OccurrenceKey) -> StoreResult<Option<Occurrence>> {
        Ok(self.lock().occurrences.get(key).cloned())
    }

    fn list_occurrences(&self, reminder_id: &str) -> StoreResult<Vec<Occurrence>> {
        Ok(self
            .lock()
            .occurrences
            .values()
            .filter(|o| o.key.reminder_id == reminder_id)
            .cloned()
            .collect())
    }

    fn list_overdue(&self, now: DateTime<Utc>) -> StoreResult<Vec<Occurrence>> {
        Ok(self
            .lock()
            .occurrences
            .values()
            .filter(|o| o.is_overdue(now))
            .cloned()
            .collect())
    }

    fn resolve_occurrence(
        &self,
        key: &OccurrenceKey,
        now: DateTime<Utc>,
    ) -> StoreResult<TransitionOutcome> {
        let mut inner = self.lock();
        let Some(occ) = inner.occurrences.get_mut(key) else {
            return Err(crate::error::StoreError::QueryFailed(format!(
                "occurrence {key} does not exist"
            )));
        };
        if occ.state != OccurrenceState::Fired {
            return Ok(TransitionOutcome::Observed(occ.clone()));
        }
        occ.state = OccurrenceState::Resolved;
        occ.resolved_at = Some(now);
        Ok(TransitionOutcome::Applied)
    }

    fn escalate_occurrence(
        &self,
        key: &OccurrenceKey,
        now: DateTime<Utc>,
        alert: Option<&Alert>,
    ) -> StoreResult<TransitionOutcome> {
        let mut guard = self.lock();
        let inner = &mut *guard;
        let Some(occ) = inner.occurrences.get_mut(key) else {
            return Err(crate::error::StoreError::QueryFailed(format!(
                "occurrence {key} does not exist"
            )));
        };
        match escalate_precondition(occ, alert) {
            EscalatePrecondition::Refuse => return Ok(TransitionOutcome::Observed(occ.clone())),
            EscalatePrecondition::Replay => return Ok(TransitionOutcome::Applied),
            EscalatePrecondition::Apply => {}
        }
        occ.state = OccurrenceState::Escalated;
        occ.escalated_at = Some(now);
        occ.alert_id = alert.map(|a| a.id.clone());
        if let Some(alert) = alert {
            inner.alerts.insert(alert.id.clone(), alert.clone());
        }
        Ok(TransitionOutcome::Applied)
    }

    fn insert_alert(&self, alert: &Alert) -> StoreResult<()> {
        self.lock().alerts.insert(alert.id.clone(), alert.clone());
        Ok(())
    }

    fn get_alert(&self, id: &str) -> StoreResult<Option<Alert>> {
        Ok(self.lock().alerts.get(id).cloned())
    }

    fn list_alerts(&self) -> StoreResult<Vec<Alert>> {
        let mut alerts: Vec<Alert> = self.lock().alerts.values().cloned().collect();
        alerts.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        Ok(alerts)
    }

    fn add_acknowledgment(&self, alert_id: &str, member_id: &str) -> StoreResult<Option<Alert>> {
        let mut inner = self.lock();
        Ok(inner.alerts.get_mut(alert_id).map(|alert| {
            alert.add_acknowledgment(member_id);
            alert.clone()
        }))
    }

    fn record_delivery(&self, alert_id: &str, record: &DeliveryRecord) -> StoreResult<()> {
        let mut inner = self.lock();
        match inner.alerts.get_mut(alert_id) {
            Some(alert) => {
                alert.upsert_delivery(record.clone());
                Ok(())
            }
            None => Err(crate::error::StoreError::QueryFailed(format!(
                "alert {alert_id} does not exist"
            ))),
        }
    }
}
