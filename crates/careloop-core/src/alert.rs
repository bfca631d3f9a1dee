//! Alert records.
//!
//! Targets are fixed when the alert is created. The acknowledgment set only
//! grows. Delivery records annotate the alert but never gate its existence.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize, Serializer};
use std::collections::BTreeSet;

use crate::member::NotificationChannel;
use crate::occurrence::OccurrenceKey;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertType {
    TaskCompleted,
    TaskMissed,
    StreakMilestone,
    ConcernPattern,
    EmailNotification,
    EscalationMissedReminder,
}

impl AlertType {
    pub fn as_str(&self) -> &'static str {
        match self {
            AlertType::TaskCompleted => "task_completed",
            AlertType::TaskMissed => "task_missed",
            AlertType::StreakMilestone => "streak_milestone",
            AlertType::ConcernPattern => "concern_pattern",
            AlertType::EmailNotification => "email_notification",
            AlertType::EscalationMissedReminder => "escalation_missed_reminder",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "task_completed" => Some(AlertType::TaskCompleted),
            "task_missed" => Some(AlertType::TaskMissed),
            "streak_milestone" => Some(AlertType::StreakMilestone),
            "concern_pattern" => Some(AlertType::ConcernPattern),
            "email_notification" => Some(AlertType::EmailNotification),
            "escalation_missed_reminder" => Some(AlertType::EscalationMissedReminder),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Info,
    Warning,
    Urgent,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Info => "info",
            Severity::Warning => "warning",
            Severity::Urgent => "urgent",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "info" => Some(Severity::Info),
            "warning" => Some(Severity::Warning),
            "urgent" => Some(Severity::Urgent),
            _ => None,
        }
    }
}

/// Derived from the acknowledgment set; never stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertStatus {
    Unacknowledged,
    Acknowledged,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeliveryStatus {
    Delivered,
    Failed,
}

/// Final outcome of delivering one alert to one member over one channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeliveryRecord {
    pub member_id: String,
    pub channel: NotificationChannel,
    pub status: DeliveryStatus,
    pub attempts: u32,
    pub delivered_at: Option<DateTime<Utc>>,
    pub error: Option<String>,
    pub recorded_at: DateTime<Utc>,
}

/// Serialized with its derived `status` alongside the stored fields; the
/// status is ignored when reading an alert back.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Alert {
    pub id: String,
    pub alert_type: AlertType,
    pub title: String,
    pub message: String,
    pub severity: Severity,
    /// Set when the alert came from an escalation.
    #[serde(default)]
    pub occurrence: Option<OccurrenceKey>,
    targets: BTreeSet<String>,
    #[serde(default)]
    acknowledged_by: BTreeSet<String>,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub deliveries: Vec<DeliveryRecord>,
}

impl Serialize for Alert {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        #[derive(Serialize)]
        struct AlertView<'a> {
            id: &'a str,
            alert_type: AlertType,
            title: &'a str,
            message: &'a str,
            severity: Severity,
            occurrence: Option<&'a OccurrenceKey>,
            targets: &'a BTreeSet<String>,
            acknowledged_by: &'a BTreeSet<String>,
            status: AlertStatus,
            created_at: DateTime<Utc>,
            deliveries: &'a [DeliveryRecord],
        }

        AlertView {
            id: &self.id,
            alert_type: self.alert_type,
            title: &self.title,
            message: &self.message,
            severity: self.severity,
            occurrence: self.occurrence.as_ref(),
            targets: &self.targets,
            acknowledged_by: &self.acknowledged_by,
            status: self.status(),
            created_at: self.created_at,
            deliveries: &self.deliveries,
        }
        .serialize(serializer)
    }
}

impl Alert {
    pub fn new(
        alert_type: AlertType,
        title: impl Into<String>,
        message: impl Into<String>,
        severity: Severity,
        targets: impl IntoIterator<Item = String>,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            alert_type,
            title: title.into(),
            message: message.into(),
            severity,
            occurrence: None,
            targets: targets.into_iter().collect(),
            acknowledged_by: BTreeSet::new(),
            created_at,
            deliveries: Vec::new(),
        }
    }

    pub fn for_occurrence(mut self, key: OccurrenceKey) -> Self {
        self.occurrence = Some(key);
        self
    }

    /// Rebuild a stored alert. Used by store adapters only.
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn from_parts(
        id: String,
        alert_type: AlertType,
        title: String,
        message: String,
        severity: Severity,
        occurrence: Option<OccurrenceKey>,
        targets: BTreeSet<String>,
        acknowledged_by: BTreeSet<String>,
        created_at: DateTime<Utc>,
        deliveries: Vec<DeliveryRecord>,
    ) -> Self {
        Self {
            id,
            alert_type,
            title,
            message,
            severity,
            occurrence,
            targets,
            acknowledged_by,
            created_at,
            deliveries,
        }
    }

    pub fn targets(&self) -> &BTreeSet<String> {
        &self.targets
    }

    pub fn acknowledged_by(&self) -> &BTreeSet<String> {
        &self.acknowledged_by
    }

    pub fn status(&self) -> AlertStatus {
        if self.acknowledged_by.is_empty() {
            AlertStatus::Unacknowledged
        } else {
            AlertStatus::Acknowledged
        }
    }

    /// Set-insert; returns whether the member was newly added.
    pub(crate) fn add_acknowledgment(&mut self, member_id: &str) -> bool {
        self.acknowledged_by.insert(member_id.to_string())
    }

    /// Insert or replace the record for the record's `(member, channel)` pair.
    pub(crate) fn upsert_delivery(&mut self, record: DeliveryRecord) {
        match self
            .deliveries
            .iter_mut()
            .find(|d| d.member_id == record.member_id && d.channel == record.channel)
        {
            Some(existing) => *existing = record,
            None => self.deliveries.push(record),
        }
    }

    pub fn delivery_for(
        &self,
        member_id: &str,
        channel: NotificationChannel,
    ) -> Option<&DeliveryRecord> {
        self.deliveries
            .iter()
            .find(|d| d.member_id == member_id && d.channel == channel)
    }
}
