//! Notification transport seam.
//!
//! The engine decides whether and to whom to send; a transport only moves
//! bytes to a provider and reports whether that worked.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Mutex;

use crate::alert::{Alert, AlertType, Severity};
use crate::error::DeliveryError;
use crate::member::NotificationChannel;

/// Body handed to the provider for one recipient.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotificationPayload {
    pub alert_id: String,
    pub alert_type: AlertType,
    pub severity: Severity,
    pub title: String,
    pub message: String,
    pub recipient_id: String,
    pub recipient_name: String,
    pub created_at: DateTime<Utc>,
}

impl NotificationPayload {
    pub fn for_recipient(alert: &Alert, recipient_id: &str, recipient_name: &str) -> Self {
        Self {
            alert_id: alert.id.clone(),
            alert_type: alert.alert_type,
            severity: alert.severity,
            title: alert.title.clone(),
            message: alert.message.clone(),
            recipient_id: recipient_id.to_string(),
            recipient_name: recipient_name.to_string(),
            created_at: alert.created_at,
        }
    }
}

#[async_trait]
pub trait NotificationTransport: Send + Sync {
    /// Whether this transport can deliver on `channel` at all.
    fn supports(&self, channel: NotificationChannel) -> bool;

    async fn send(
        &self,
        channel: NotificationChannel,
        contact: &str,
        payload: &NotificationPayload,
    ) -> Result<(), DeliveryError>;
}

/// One call into [`RecordingTransport::send`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SendAttempt {
    pub channel: NotificationChannel,
    pub contact: String,
    pub alert_id: String,
    pub succeeded: bool,
}

#[derive(Debug, Clone)]
struct FailureRule {
    /// `None` fails forever.
    remaining: Option<u32>,
    error: DeliveryError,
}

/// In-process transport that records every send. Individual
/// `(channel, contact)` pairs can be told to fail.
#[derive(Debug, Default)]
pub struct RecordingTransport {
    attempts: Mutex<Vec<SendAttempt>>,
    failures: Mutex<HashMap<(NotificationChannel, String), FailureRule>>,
}

impl RecordingTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every send to `(channel, contact)` fails with `error`.
    pub fn fail_always(&self, channel: NotificationChannel, contact: &str, error: DeliveryError) {
        self.set_rule(channel, contact, None, error);
    }

    /// The next `times` sends to `(channel, contact)` fail, later ones succeed.
    pub fn fail_times(
        &self,
        channel: NotificationChannel,
        contact: &str,
        times: u32,
        error: DeliveryError,
    ) {
        self.set_rule(channel, contact, Some(times), error);
    }

    fn set_rule(
        &self,
        channel: NotificationChannel,
        contact: &str,
        remaining: Option<u32>,
        error: DeliveryError,
    ) {
        self.failures
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .insert((channel, contact.to_string()), FailureRule { remaining, error });
    }

    pub fn attempts(&self) -> Vec<SendAttempt> {
        self.attempts.lock().unwrap_or_else(|p| p.into_inner()).clone()
    }

    /// Successful sends only.
    pub fn delivered(&self) -> Vec<SendAttempt> {
        self.attempts().into_iter().filter(|a| a.succeeded).collect()
    }

    fn next_failure(&self, channel: NotificationChannel, contact: &str) -> Option<DeliveryError> {
        let mut failures = self.failures.lock().unwrap_or_else(|p| p.into_inner());
        let rule = failures.get_mut(&(channel, contact.to_string()))?;
        match rule.remaining.as_mut() {
            None => Some(rule.error.clone()),
            Some(0) => None,
            Some(n) => {
                *n -= 1;
                Some(rule.error.clone())
            }
        }
    }
}

#[async_trait]
impl NotificationTransport for RecordingTransport {
    fn supports(&self, _channel: NotificationChannel) -> bool {
        true
    }

    async fn send(
        &self,
        channel: NotificationChannel,
        contact: &str,
        payload: &NotificationPayload,
    ) -> Result<(), DeliveryError> {
        let failure = self.next_failure(channel, contact);
        self.attempts
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .push(SendAttempt {
                channel,
                contact: contact.to_string(),
                alert_id: payload.alert_id.clone(),
                succeeded: failure.is_none(),
            });
        match failure {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}
