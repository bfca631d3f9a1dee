//! Reminder types.
//!
//! A reminder owns a recurrence rule, an escalation policy and delivery
//! preferences. Occurrences are never stored ahead of time; they are derived
//! from the rule by [`recurrence::next_occurrence`] whenever needed.

pub mod recurrence;

use chrono::{DateTime, NaiveDate, NaiveTime, Utc, Weekday};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

use crate::error::ValidationError;
use crate::member::{Capability, NotificationChannel};

pub use recurrence::{next_occurrence, occurrences_between};

/// Default minutes between a reminder firing and its escalation deadline.
pub const DEFAULT_ESCALATION_DELAY_MINUTES: u32 = 30;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReminderCategory {
    Medication,
    Appointment,
    Activity,
    Safety,
    Custom,
}

impl ReminderCategory {
    /// Content domain a recipient must be granted before hearing about this
    /// reminder. `None` means the alert carries no gated content.
    pub fn content_domain(self) -> Option<Capability> {
        match self {
            ReminderCategory::Medication => Some(Capability::Health),
            ReminderCategory::Appointment => Some(Capability::Calendar),
            ReminderCategory::Activity | ReminderCategory::Safety | ReminderCategory::Custom => {
                None
            }
        }
    }
}

/// Who created (or edited) a reminder.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "member_id", rename_all = "snake_case")]
pub enum Author {
    /// The owning user.
    #[serde(rename = "self")]
    Owner,
    Member(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Frequency {
    Once,
    Daily,
    Weekly,
    Monthly,
}

/// When a reminder is due. All times are UTC.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecurrenceRule {
    pub frequency: Frequency,
    pub time_of_day: NaiveTime,
    /// Only meaningful for [`Frequency::Weekly`].
    #[serde(default)]
    pub days_of_week: BTreeSet<DayOfWeek>,
    pub start_date: NaiveDate,
    #[serde(default)]
    pub end_date: Option<NaiveDate>,
}

/// Serializable, ordered wrapper around [`chrono::Weekday`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DayOfWeek {
    Mon,
    Tue,
    Wed,
    Thu,
    Fri,
    Sat,
    Sun,
}

impl From<Weekday> for DayOfWeek {
    fn from(day: Weekday) -> Self {
        match day {
            Weekday::Mon => DayOfWeek::Mon,
            Weekday::Tue => DayOfWeek::Tue,
            Weekday::Wed => DayOfWeek::Wed,
            Weekday::Thu => DayOfWeek::Thu,
            Weekday::Fri => DayOfWeek::Fri,
            Weekday::Sat => DayOfWeek::Sat,
            Weekday::Sun => DayOfWeek::Sun,
        }
    }
}

impl From<DayOfWeek> for Weekday {
    fn from(day: DayOfWeek) -> Self {
        match day {
            DayOfWeek::Mon => Weekday::Mon,
            DayOfWeek::Tue => Weekday::Tue,
            DayOfWeek::Wed => Weekday::Wed,
            DayOfWeek::Thu => Weekday::Thu,
            DayOfWeek::Fri => Weekday::Fri,
            DayOfWeek::Sat => Weekday::Sat,
            DayOfWeek::Sun => Weekday::Sun,
        }
    }
}

impl DayOfWeek {
    pub fn parse(s: &str) -> Option<Self> {
        s.trim().parse::<Weekday>().ok().map(Into::into)
    }
}

impl RecurrenceRule {
    pub fn daily(time_of_day: NaiveTime, start_date: NaiveDate) -> Self {
        Self {
            frequency: Frequency::Daily,
            time_of_day,
            days_of_week: BTreeSet::new(),
            start_date,
            end_date: None,
        }
    }

    pub fn weekly(
        time_of_day: NaiveTime,
        start_date: NaiveDate,
        days: impl IntoIterator<Item = Weekday>,
    ) -> Self {
        Self {
            frequency: Frequency::Weekly,
            time_of_day,
            days_of_week: days.into_iter().map(Into::into).collect(),
            start_date,
            end_date: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EscalationConfig {
    pub enabled: bool,
    #[serde(default = "default_delay_minutes")]
    pub delay_minutes: u32,
    /// Ordered, duplicate-free member ids.
    #[serde(default)]
    pub targets: Vec<String>,
}

fn default_delay_minutes() -> u32 {
    DEFAULT_ESCALATION_DELAY_MINUTES
}

impl Default for EscalationConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            delay_minutes: DEFAULT_ESCALATION_DELAY_MINUTES,
            targets: Vec::new(),
        }
    }
}

impl EscalationConfig {
    pub fn to(targets: impl IntoIterator<Item = impl Into<String>>) -> Self {
        let mut cfg = Self {
            enabled: true,
            ..Self::default()
        };
        for t in targets {
            cfg.push_target(t.into());
        }
        cfg
    }

    /// Append a target, keeping first-seen order and dropping repeats.
    pub fn push_target(&mut self, member_id: String) {
        if !self.targets.contains(&member_id) {
            self.targets.push(member_id);
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VibrationIntensity {
    Gentle,
    #[default]
    Medium,
    Strong,
}

/// On-device presentation channels for the reminder itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertChannel {
    Audio,
    Vibration,
    Visual,
    Voice,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeliveryConfig {
    /// 1..=10
    pub volume: u8,
    pub vibration_enabled: bool,
    #[serde(default)]
    pub vibration_intensity: VibrationIntensity,
    pub alert_channels: BTreeSet<AlertChannel>,
    #[serde(default)]
    pub voice_note: Option<String>,
}

impl Default for DeliveryConfig {
    fn default() -> Self {
        Self {
            volume: 7,
            vibration_enabled: true,
            vibration_intensity: VibrationIntensity::Medium,
            alert_channels: [AlertChannel::Audio, AlertChannel::Vibration, AlertChannel::Visual]
                .into_iter()
                .collect(),
            voice_note: None,
        }
    }
}

impl DeliveryConfig {
    /// Member notification channels this reminder's channel set permits.
    ///
    /// `visual` covers both text channels; `voice` covers sms.
    pub fn notification_channels(&self) -> BTreeSet<NotificationChannel> {
        let mut out = BTreeSet::new();
        if self.alert_channels.contains(&AlertChannel::Visual) {
            out.insert(NotificationChannel::Email);
            out.insert(NotificationChannel::Sms);
        }
        if self.alert_channels.contains(&AlertChannel::Voice) {
            out.insert(NotificationChannel::Sms);
        }
        out
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reminder {
    pub id: String,
    pub owner_id: String,
    pub created_by: Author,
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
    pub category: ReminderCategory,
    pub recurrence: RecurrenceRule,
    pub active: bool,
    #[serde(default)]
    pub escalation: EscalationConfig,
    #[serde(default)]
    pub delivery: DeliveryConfig,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Input for creating a reminder.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewReminder {
    pub owner_id: String,
    pub created_by: Author,
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
    pub category: ReminderCategory,
    pub recurrence: RecurrenceRule,
    #[serde(default = "default_true")]
    pub active: bool,
    #[serde(default)]
    pub escalation: EscalationConfig,
    #[serde(default)]
    pub delivery: DeliveryConfig,
}

fn default_true() -> bool {
    true
}

/// Partial update. `None` leaves a field untouched.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ReminderPatch {
    #[serde(default)]
    pub title: Option<String>,
    /// `Some(None)` clears the description.
    #[serde(default)]
    pub description: Option<Option<String>>,
    #[serde(default)]
    pub category: Option<ReminderCategory>,
    #[serde(default)]
    pub recurrence: Option<RecurrenceRule>,
    #[serde(default)]
    pub active: Option<bool>,
    #[serde(default)]
    pub escalation: Option<EscalationConfig>,
    #[serde(default)]
    pub delivery: Option<DeliveryConfig>,
}

impl ReminderPatch {
    pub fn is_empty(&self) -> bool {
        self.title.is_none()
            && self.description.is_none()
            && self.category.is_none()
            && self.recurrence.is_none()
            && self.active.is_none()
            && self.escalation.is_none()
            && self.delivery.is_none()
    }
}

impl Reminder {
    pub fn from_new(id: String, new: NewReminder, now: DateTime<Utc>) -> Self {
        let mut escalation = new.escalation;
        escalation.targets = dedup(escalation.targets);
        Self {
            id,
            owner_id: new.owner_id,
            created_by: new.created_by,
            title: new.title,
            description: new.description,
            category: new.category,
            recurrence: new.recurrence,
            active: new.active,
            escalation,
            delivery: new.delivery,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn apply(&mut self, patch: ReminderPatch, now: DateTime<Utc>) {
        if let Some(title) = patch.title {
            self.title = title;
        }
        if let Some(description) = patch.description {
            self.description = description;
        }
        if let Some(category) = patch.category {
            self.category = category;
        }
        if let Some(recurrence) = patch.recurrence {
            self.recurrence = recurrence;
        }
        if let Some(active) = patch.active {
            self.active = active;
        }
        if let Some(mut escalation) = patch.escalation {
            escalation.targets = dedup(escalation.targets);
            self.escalation = escalation;
        }
        if let Some(delivery) = patch.delivery {
            self.delivery = delivery;
        }
        self.updated_at = now;
    }

    /// Structural checks. A weekly rule with no days is accepted: it simply
    /// never produces an occurrence.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.title.trim().is_empty() {
            return Err(ValidationError::InvalidValue {
                field: "title",
                message: "title must not be empty".into(),
            });
        }
        if self.owner_id.trim().is_empty() {
            return Err(ValidationError::InvalidValue {
                field: "owner_id",
                message: "owner must not be empty".into(),
            });
        }
        if let Some(end) = self.recurrence.end_date {
            if end < self.recurrence.start_date {
                return Err(ValidationError::InvalidDateRange {
                    start: self.recurrence.start_date,
                    end,
                });
            }
        }
        if !(1..=10).contains(&self.delivery.volume) {
            return Err(ValidationError::OutOfRange {
                field: "delivery.volume",
                value: self.delivery.volume as i64,
                min: 1,
                max: 10,
            });
        }
        if self.escalation.delay_minutes == 0 {
            return Err(ValidationError::OutOfRange {
                field: "escalation.delay_minutes",
                value: 0,
                min: 1,
                max: u32::MAX as i64,
            });
        }
        Ok(())
    }
}

fn dedup(ids: Vec<String>) -> Vec<String> {
    let mut out: Vec<String> = Vec::with_capacity(ids.len());
    for id in ids {
        if !out.contains(&id) {
            out.push(id);
        }
    }
    out
}
