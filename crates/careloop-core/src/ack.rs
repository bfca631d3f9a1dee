//! Acknowledgment tracker.
//!
//! Acknowledging is a set-insert on the alert. It commutes, so members acting
//! at the same time never clobber each other, and repeating it is a no-op.

use crate::alert::Alert;
use crate::error::{CoreError, Result};
use crate::store::OccurrenceStore;

pub struct AcknowledgmentTracker<'a, S: OccurrenceStore + ?Sized> {
    store: &'a S,
}

impl<'a, S: OccurrenceStore + ?Sized> AcknowledgmentTracker<'a, S> {
    pub fn new(store: &'a S) -> Self {
        Self { store }
    }

    /// Add `member_id` to the alert's acknowledgment set and return the alert.
    ///
    /// # Errors
    /// `NotFound` if either the alert or the member does not exist.
    pub fn acknowledge(&self, alert_id: &str, member_id: &str) -> Result<Alert> {
        if self.store.get_member(member_id)?.is_none() {
            return Err(CoreError::not_found("member", member_id));
        }
        let alert = self
            .store
            .add_acknowledgment(alert_id, member_id)?
            .ok_or_else(|| CoreError::not_found("alert", alert_id))?;
        tracing::info!(
            alert_id,
            member_id,
            acknowledgments = alert.acknowledged_by().len(),
            "alert acknowledged"
        );
        Ok(alert)
    }
}
