//! Alert dispatcher.
//!
//! Fans an alert out to each recipient over each channel both sides allow.
//! Every `(recipient, channel)` pair is attempted on its own task with its
//! own retry budget; nothing one pair does can stall or fail another.

pub mod transport;
pub mod webhook;

use chrono::{DateTime, Utc};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinSet;

use crate::alert::{Alert, DeliveryRecord, DeliveryStatus};
use crate::config::DispatchSettings;
use crate::member::{NotificationChannel, SupportCircleMember};

pub use transport::{NotificationPayload, NotificationTransport, RecordingTransport, SendAttempt};
pub use webhook::WebhookTransport;

/// Bounded exponential backoff.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub jitter: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_settings(&DispatchSettings::default())
    }
}

impl RetryPolicy {
    pub fn from_settings(settings: &DispatchSettings) -> Self {
        Self {
            max_attempts: settings.max_attempts.max(1),
            base_delay: Duration::from_millis(settings.base_delay_ms),
            max_delay: Duration::from_millis(settings.max_delay_ms),
            jitter: settings.jitter,
        }
    }

    /// Retries without sleeping.
    pub fn immediate(max_attempts: u32) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
            jitter: false,
        }
    }

    /// Pause after failed attempt number `attempt` (1-based):
    /// `base * 2^(attempt-1)`, capped at `max_delay`. Jitter draws from the
    /// upper half of that window.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1).min(20);
        let delay = self
            .base_delay
            .saturating_mul(1u32 << exp)
            .min(self.max_delay);
        if !self.jitter || delay.is_zero() {
            return delay;
        }
        let full = delay.as_millis() as u64;
        Duration::from_millis(rand::thread_rng().gen_range(full / 2..=full))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    /// No email address / phone number for the channel.
    MissingContact,
    /// The member switched this channel off.
    NotPreferred,
    /// No transport is configured for the channel.
    ChannelNotConfigured,
    MemberInactive,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum ChannelOutcome {
    Delivered { attempts: u32, at: DateTime<Utc> },
    Failed { attempts: u32, error: String },
    Skipped { reason: SkipReason },
}

impl ChannelOutcome {
    /// The record to persist, if this outcome involved a send.
    pub fn to_record(
        &self,
        member_id: &str,
        channel: NotificationChannel,
        now: DateTime<Utc>,
    ) -> Option<DeliveryRecord> {
        let (status, attempts, delivered_at, error) = match self {
            ChannelOutcome::Delivered { attempts, at } => {
                (DeliveryStatus::Delivered, *attempts, Some(*at), None)
            }
            ChannelOutcome::Failed { attempts, error } => {
                (DeliveryStatus::Failed, *attempts, None, Some(error.clone()))
            }
            ChannelOutcome::Skipped { .. } => return None,
        };
        Some(DeliveryRecord {
            member_id: member_id.to_string(),
            channel,
            status,
            attempts,
            delivered_at,
            error,
            recorded_at: now,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecipientOutcome {
    pub member_id: String,
    pub channel: NotificationChannel,
    #[serde(flatten)]
    pub outcome: ChannelOutcome,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DispatchReport {
    pub alert_id: String,
    pub outcomes: Vec<RecipientOutcome>,
}

impl DispatchReport {
    pub fn outcome_for(&self, member_id: &str, channel: NotificationChannel) -> Option<&ChannelOutcome> {
        self.outcomes
            .iter()
            .find(|o| o.member_id == member_id && o.channel == channel)
            .map(|o| &o.outcome)
    }

    pub fn delivered(&self) -> usize {
        self.count(|o| matches!(o, ChannelOutcome::Delivered { .. }))
    }

    pub fn failed(&self) -> usize {
        self.count(|o| matches!(o, ChannelOutcome::Failed { .. }))
    }

    pub fn skipped(&self) -> usize {
        self.count(|o| matches!(o, ChannelOutcome::Skipped { .. }))
    }

    fn count(&self, pred: impl Fn(&ChannelOutcome) -> bool) -> usize {
        self.outcomes.iter().filter(|o| pred(&o.outcome)).count()
    }

    fn push(&mut self, member_id: &str, channel: NotificationChannel, outcome: ChannelOutcome) {
        self.outcomes.push(RecipientOutcome {
            member_id: member_id.to_string(),
            channel,
            outcome,
        });
    }
}

pub struct AlertDispatcher {
    transport: Arc<dyn NotificationTransport>,
    policy: RetryPolicy,
}

impl AlertDispatcher {
    pub fn new(transport: Arc<dyn NotificationTransport>, policy: RetryPolicy) -> Self {
        Self { transport, policy }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Deliver `alert` to `recipients` over the channels in `allowed` that each
    /// recipient has switched on.
    ///
    /// Never fails: every pair ends as delivered, failed or skipped.
    pub async fn dispatch(
        &self,
        alert: &Alert,
        recipients: &[SupportCircleMember],
        allowed: &BTreeSet<NotificationChannel>,
    ) -> DispatchReport {
        let mut report = DispatchReport {
            alert_id: alert.id.clone(),
            outcomes: Vec::new(),
        };
        let mut tasks = JoinSet::new();

        for member in recipients {
            for &channel in allowed {
                let skip = if !member.notification_preferences.allows(channel) {
                    Some(SkipReason::NotPreferred)
                } else if !member.is_active() {
                    Some(SkipReason::MemberInactive)
                } else if !self.transport.supports(channel) {
                    Some(SkipReason::ChannelNotConfigured)
                } else {
                    None
                };
                if let Some(reason) = skip {
                    tracing::debug!(member_id = %member.id, %channel, ?reason, "channel skipped");
                    report.push(&member.id, channel, ChannelOutcome::Skipped { reason });
                    continue;
                }

                let Some(contact) = member.contact_for(channel) else {
                    tracing::warn!(member_id = %member.id, %channel, "no contact for channel");
                    report.push(
                        &member.id,
                        channel,
                        ChannelOutcome::Skipped {
                            reason: SkipReason::MissingContact,
                        },
                    );
                    continue;
                };

                let transport = Arc::clone(&self.transport);
                let policy = self.policy.clone();
                let payload = NotificationPayload::for_recipient(alert, &member.id, &member.display_name);
                let contact = contact.to_string();
                let member_id = member.id.clone();
                tasks.spawn(async move {
                    let outcome =
                        deliver(transport.as_ref(), &policy, channel, &contact, &payload).await;
                    (member_id, channel, outcome)
                });
            }
        }

        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((member_id, channel, outcome)) => report.push(&member_id, channel, outcome),
                Err(e) => tracing::error!(alert_id = %alert.id, error = %e, "delivery task aborted"),
            }
        }

        tracing::info!(
            alert_id = %alert.id,
            delivered = report.delivered(),
            failed = report.failed(),
            skipped = report.skipped(),
            "alert dispatched"
        );
        report
    }
}

/// One `(recipient, channel)` pair, retried per `policy`.
async fn deliver(
    transport: &dyn NotificationTransport,
    policy: &RetryPolicy,
    channel: NotificationChannel,
    contact: &str,
    payload: &NotificationPayload,
) -> ChannelOutcome {
    let mut attempt = 0;
    loop {
        attempt += 1;
        match transport.send(channel, contact, payload).await {
            Ok(()) => {
                return ChannelOutcome::Delivered {
                    attempts: attempt,
                    at: Utc::now(),
                }
            }
            Err(err) if err.is_retryable() && attempt < policy.max_attempts => {
                let delay = policy.delay_for(attempt);
                tracing::warn!(
                    alert_id = %payload.alert_id,
                    member_id = %payload.recipient_id,
                    %channel,
                    attempt,
                    error = %err,
                    "delivery failed, retrying in {:?}",
                    delay
                );
                tokio::time::sleep(delay).await;
            }
            Err(err) => {
                tracing::warn!(
                    alert_id = %payload.alert_id,
                    member_id = %payload.recipient_id,
                    %channel,
                    attempts = attempt,
                    error = %err,
                    "delivery failed"
                );
                return ChannelOutcome::Failed {
                    attempts: attempt,
                    error: err.to_string(),
                };
            }
        }
    }
}
