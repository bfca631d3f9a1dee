//! Shared builders for the integration tests.
#![allow(dead_code)]

use careloop_core::{
    Author, CapabilitySet, DeliveryConfig, Engine, EngineSettings, EscalationConfig, MemberRole,
    MemberStatus, NewReminder, NotificationPreferences, OccurrenceStore, RecurrenceRule,
    ReminderCategory, SupportCircleMember,
};
use chrono::{DateTime, NaiveDate, NaiveTime, Utc};

pub fn date(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).unwrap()
}

pub fn time(h: u32, m: u32) -> NaiveTime {
    NaiveTime::from_hms_opt(h, m, 0).unwrap()
}

/// 2024-01-02 at `h:m` UTC.
pub fn at(h: u32, m: u32) -> DateTime<Utc> {
    date(2024, 1, 2).and_time(time(h, m)).and_utc()
}

/// `+1555010` followed by the id's trailing digits, so `m3` is `+15550103`.
pub fn phone_of(id: &str) -> String {
    let digits: String = id.chars().filter(char::is_ascii_digit).collect();
    format!("+1555010{digits}")
}

pub fn member(id: &str, can_receive_alerts: bool) -> SupportCircleMember {
    SupportCircleMember {
        id: id.to_string(),
        display_name: format!("Member {id}"),
        relationship: "friend".into(),
        role: MemberRole::Supporter,
        email: Some(format!("{id}@example.com")),
        phone: Some(phone_of(id)),
        capabilities: CapabilitySet::all(),
        can_send_reminders: false,
        can_receive_alerts,
        notification_preferences: NotificationPreferences::all(),
        status: MemberStatus::Active,
    }
}

/// "Take medication", daily 08:00 from 2024-01-01, escalating after 30
/// minutes to m1 and m2.
pub fn take_medication() -> NewReminder {
    NewReminder {
        owner_id: "owner".into(),
        created_by: Author::Owner,
        title: "Take medication".into(),
        description: None,
        category: ReminderCategory::Medication,
        recurrence: RecurrenceRule::daily(time(8, 0), date(2024, 1, 1)),
        active: true,
        escalation: EscalationConfig::to(["m1", "m2"]),
        delivery: DeliveryConfig::default(),
    }
}

/// Engine with m1 (may receive alerts) and m2 (may not).
pub fn seeded_engine<S: OccurrenceStore>(store: S) -> Engine<S> {
    let engine = Engine::new(store, EngineSettings::default());
    engine.add_member(member("m1", true)).unwrap();
    engine.add_member(member("m2", false)).unwrap();
    engine
}
