//! # Careloop Core Library
//!
//! Reminder scheduling and escalation alerting for a user's support circle.
//! A reminder fires on its recurrence rule; if the owner does not resolve the
//! occurrence before its deadline, eligible support-circle members get one
//! alert, delivered over their own channels and acknowledged independently.
//!
//! ## Architecture
//!
//! - **Recurrence**: pure functions from a rule and a reference time to due
//!   instants
//! - **Gate**: who may receive an alert, from consent and capability flags
//! - **Escalation**: fire, resolve and escalate transitions, keyed by
//!   `(reminder_id, due_at)` so duplicated ticks are harmless
//! - **Dispatch**: best-effort, per-channel delivery with bounded retries
//! - **Store**: the persistence seam, with in-memory and SQLite adapters
//!
//! ## Key Components
//!
//! - [`Engine`]: inbound operations and the periodic `tick()`
//! - [`OccurrenceStore`]: storage contract
//! - [`AlertDispatcher`]: fan-out over a [`NotificationTransport`]
//! - [`Config`]: application configuration management

pub mod ack;
pub mod alert;
pub mod config;
pub mod dispatch;
pub mod engine;
pub mod error;
pub mod escalation;
pub mod gate;
pub mod member;
pub mod occurrence;
pub mod reminder;
pub mod store;

pub use ack::AcknowledgmentTracker;
pub use alert::{Alert, AlertStatus, AlertType, DeliveryRecord, DeliveryStatus, Severity};
pub use config::{data_dir, Config};
pub use dispatch::{
    AlertDispatcher, ChannelOutcome, DispatchReport, NotificationPayload, NotificationTransport,
    RecordingTransport, RetryPolicy, SkipReason, WebhookTransport,
};
pub use engine::{Engine, EngineSettings, ManualAlert, TickReport};
pub use error::{ConfigError, CoreError, DeliveryError, Result, StoreError, ValidationError};
pub use escalation::{EscalationCoordinator, EscalationOutcome, FireOutcome, ResolveOutcome};
pub use gate::{eligible_recipients, AlertContext};
pub use member::{
    Capability, CapabilitySet, MemberRole, MemberStatus, NotificationChannel,
    NotificationPreferences, SupportCircleMember,
};
pub use occurrence::{Occurrence, OccurrenceKey, OccurrenceState};
pub use reminder::{
    next_occurrence, AlertChannel, Author, DayOfWeek, DeliveryConfig, EscalationConfig, Frequency,
    NewReminder, RecurrenceRule, Reminder, ReminderCategory, ReminderPatch, VibrationIntensity,
};
pub use store::{MemoryStore, OccurrenceStore, SqliteStore};
