//! Support-circle member model.
//!
//! A member is a person the owner has granted scoped visibility into their
//! accountability data. Capabilities gate *content* (what a member may be told
//! about); `can_receive_alerts` gates whether they are contacted at all.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use crate::error::ValidationError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MemberRole {
    Viewer,
    Supporter,
    Caregiver,
    Medical,
    Colleague,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MemberStatus {
    #[default]
    Active,
    Inactive,
}

/// Content domains a member may be granted visibility into.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Capability {
    Mood,
    Health,
    Calendar,
    Goals,
    Gratitude,
}

impl Capability {
    pub const ALL: [Capability; 5] = [
        Capability::Mood,
        Capability::Health,
        Capability::Calendar,
        Capability::Goals,
        Capability::Gratitude,
    ];
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Capability::Mood => "mood",
            Capability::Health => "health",
            Capability::Calendar => "calendar",
            Capability::Goals => "goals",
            Capability::Gratitude => "gratitude",
        };
        f.write_str(s)
    }
}

/// Channels a member can be reached on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NotificationChannel {
    Email,
    Sms,
}

impl NotificationChannel {
    pub const ALL: [NotificationChannel; 2] = [NotificationChannel::Email, NotificationChannel::Sms];

    pub fn as_str(self) -> &'static str {
        match self {
            NotificationChannel::Email => "email",
            NotificationChannel::Sms => "sms",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "email" => Some(NotificationChannel::Email),
            "sms" => Some(NotificationChannel::Sms),
            _ => None,
        }
    }
}

impl fmt::Display for NotificationChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Explicit capability map. Domains absent from the map are denied.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CapabilitySet(BTreeMap<Capability, bool>);

impl CapabilitySet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every domain granted.
    pub fn all() -> Self {
        Self(Capability::ALL.iter().map(|c| (*c, true)).collect())
    }

    pub fn with(mut self, capability: Capability, granted: bool) -> Self {
        self.0.insert(capability, granted);
        self
    }

    pub fn grants(&self, capability: Capability) -> bool {
        self.0.get(&capability).copied().unwrap_or(false)
    }
}

/// Per-channel opt-in. Channels absent from the map are off.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NotificationPreferences(BTreeMap<NotificationChannel, bool>);

impl NotificationPreferences {
    pub fn none() -> Self {
        Self::default()
    }

    pub fn all() -> Self {
        Self(NotificationChannel::ALL.iter().map(|c| (*c, true)).collect())
    }

    pub fn with(mut self, channel: NotificationChannel, enabled: bool) -> Self {
        self.0.insert(channel, enabled);
        self
    }

    pub fn allows(&self, channel: NotificationChannel) -> bool {
        self.0.get(&channel).copied().unwrap_or(false)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SupportCircleMember {
    pub id: String,
    pub display_name: String,
    /// Free-form relationship label ("sister", "GP", ...).
    pub relationship: String,
    pub role: MemberRole,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub phone: Option<String>,
    #[serde(default)]
    pub capabilities: CapabilitySet,
    #[serde(default)]
    pub can_send_reminders: bool,
    #[serde(default)]
    pub can_receive_alerts: bool,
    #[serde(default)]
    pub notification_preferences: NotificationPreferences,
    #[serde(default)]
    pub status: MemberStatus,
}

impl SupportCircleMember {
    /// Contact detail required to reach this member on `channel`, if any.
    pub fn contact_for(&self, channel: NotificationChannel) -> Option<&str> {
        let raw = match channel {
            NotificationChannel::Email => self.email.as_deref(),
            NotificationChannel::Sms => self.phone.as_deref(),
        };
        raw.map(str::trim).filter(|s| !s.is_empty())
    }

    pub fn is_active(&self) -> bool {
        self.status == MemberStatus::Active
    }

    /// Checks that hold for any member worth storing.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.id.trim().is_empty() {
            return Err(ValidationError::InvalidValue {
                field: "id",
                message: "member id must not be empty".into(),
            });
        }
        if self.display_name.trim().is_empty() {
            return Err(ValidationError::InvalidValue {
                field: "display_name",
                message: "display name must not be empty".into(),
            });
        }
        let has_contact = NotificationChannel::ALL
            .iter()
            .any(|c| self.contact_for(*c).is_some());
        if !has_contact {
            return Err(ValidationError::InvalidValue {
                field: "contact",
                message: "at least one of email or phone is required".into(),
            });
        }
        if let Some(email) = self.contact_for(NotificationChannel::Email) {
            if !email.contains('@') {
                return Err(ValidationError::InvalidValue {
                    field: "email",
                    message: format!("'{email}' is not an email address"),
                });
            }
        }
        Ok(())
    }
}
