//! Reminder management commands.

use std::collections::BTreeSet;

use careloop_core::{
    AlertChannel, Author, Config, DayOfWeek, DeliveryConfig, EscalationConfig, Frequency,
    NewReminder, OccurrenceStore, RecurrenceRule, ReminderCategory, ReminderPatch,
};
use chrono::Utc;
use clap::{Args, Subcommand, ValueEnum};

use super::{open_engine, parse_date, parse_instant, parse_time, print_json, split_list, CliResult};

#[derive(Clone, Copy, ValueEnum)]
pub enum CategoryArg {
    Medication,
    Appointment,
    Activity,
    Safety,
    Custom,
}

impl From<CategoryArg> for ReminderCategory {
    fn from(c: CategoryArg) -> Self {
        match c {
            CategoryArg::Medication => ReminderCategory::Medication,
            CategoryArg::Appointment => ReminderCategory::Appointment,
            CategoryArg::Activity => ReminderCategory::Activity,
            CategoryArg::Safety => ReminderCategory::Safety,
            CategoryArg::Custom => ReminderCategory::Custom,
        }
    }
}

#[derive(Clone, Copy, ValueEnum)]
pub enum FrequencyArg {
    Once,
    Daily,
    Weekly,
    Monthly,
}

impl From<FrequencyArg> for Frequency {
    fn from(f: FrequencyArg) -> Self {
        match f {
            FrequencyArg::Once => Frequency::Once,
            FrequencyArg::Daily => Frequency::Daily,
            FrequencyArg::Weekly => Frequency::Weekly,
            FrequencyArg::Monthly => Frequency::Monthly,
        }
    }
}

/// Schedule flags shared by create and update.
#[derive(Args)]
pub struct ScheduleArgs {
    #[arg(long, value_enum)]
    frequency: Option<FrequencyArg>,
    /// Time of day, HH:MM (UTC)
    #[arg(long)]
    time: Option<String>,
    /// Comma-separated weekdays for weekly reminders (mon,wed,fri)
    #[arg(long)]
    days: Option<String>,
    /// First day, YYYY-MM-DD
    #[arg(long)]
    start: Option<String>,
    /// Last day, YYYY-MM-DD
    #[arg(long)]
    end: Option<String>,
}

#[derive(Subcommand)]
pub enum ReminderAction {
    /// Create a reminder
    Create {
        /// Reminder title
        title: String,
        #[arg(long)]
        description: Option<String>,
        #[arg(long, value_enum, default_value = "custom")]
        category: CategoryArg,
        #[command(flatten)]
        schedule: ScheduleArgs,
        /// Owner ID
        #[arg(long, default_value = "self")]
        owner: String,
        /// Create on behalf of this support-circle member
        #[arg(long)]
        as_member: Option<String>,
        /// Comma-separated member IDs to alert if the reminder is missed
        #[arg(long)]
        escalate_to: Option<String>,
        /// Minutes after the due time before escalating
        #[arg(long)]
        delay: Option<u32>,
        /// Comma-separated alert channels (audio,vibration,visual,voice)
        #[arg(long)]
        channels: Option<String>,
        /// Create paused
        #[arg(long)]
        inactive: bool,
    },
    /// Update a reminder
    Update {
        /// Reminder ID
        id: String,
        #[arg(long)]
        title: Option<String>,
        #[arg(long)]
        description: Option<String>,
        #[arg(long, value_enum)]
        category: Option<CategoryArg>,
        #[command(flatten)]
        schedule: ScheduleArgs,
        #[arg(long)]
        active: Option<bool>,
        /// Replace the escalation targets (empty string disables escalation)
        #[arg(long)]
        escalate_to: Option<String>,
        #[arg(long)]
        delay: Option<u32>,
        #[arg(long)]
        channels: Option<String>,
        /// Edit on behalf of this support-circle member
        #[arg(long)]
        as_member: Option<String>,
    },
    /// List reminders
    List {
        /// Only active reminders
        #[arg(long)]
        active: bool,
    },
    /// Show upcoming due times
    Next {
        /// Reminder ID
        id: String,
        #[arg(long, default_value = "5")]
        count: usize,
        /// Start from this RFC 3339 instant instead of now
        #[arg(long)]
        after: Option<String>,
    },
}

fn author(as_member: Option<String>) -> Author {
    as_member.map_or(Author::Owner, Author::Member)
}

fn parse_days(raw: &str) -> Result<BTreeSet<DayOfWeek>, Box<dyn std::error::Error>> {
    split_list(raw)
        .into_iter()
        .map(|d| -> Result<DayOfWeek, Box<dyn std::error::Error>> {
            Ok(DayOfWeek::parse(&d).ok_or_else(|| format!("unknown weekday: {d}"))?)
        })
        .collect()
}

fn parse_alert_channels(raw: &str) -> Result<BTreeSet<AlertChannel>, Box<dyn std::error::Error>> {
    split_list(raw)
        .into_iter()
        .map(|c| -> Result<AlertChannel, Box<dyn std::error::Error>> {
            Ok(serde_json::from_value(serde_json::Value::String(c.clone()))
                .map_err(|_| format!("unknown alert channel: {c}"))?)
        })
        .collect()
}

/// Overlay schedule flags onto `rule`.
fn apply_schedule(
    mut rule: RecurrenceRule,
    args: ScheduleArgs,
) -> Result<RecurrenceRule, Box<dyn std::error::Error>> {
    if let Some(f) = args.frequency {
        rule.frequency = f.into();
    }
    if let Some(t) = args.time {
        rule.time_of_day = parse_time(&t)?;
    }
    if let Some(d) = args.days {
        rule.days_of_week = parse_days(&d)?;
    }
    if let Some(s) = args.start {
        rule.start_date = parse_date(&s)?;
    }
    if let Some(e) = args.end {
        rule.end_date = if e.trim().is_empty() {
            None
        } else {
            Some(parse_date(&e)?)
        };
    }
    Ok(rule)
}

fn escalation_for(targets: &str, delay_minutes: u32) -> EscalationConfig {
    let mut cfg = EscalationConfig::to(split_list(targets));
    cfg.enabled = !cfg.targets.is_empty();
    cfg.delay_minutes = delay_minutes;
    cfg
}

pub fn run(action: ReminderAction) -> CliResult {
    let config = Config::load_or_default();
    let engine = open_engine(&config)?;
    let now = Utc::now();

    match action {
        ReminderAction::Create {
            title,
            description,
            category,
            schedule,
            owner,
            as_member,
            escalate_to,
            delay,
            channels,
            inactive,
        } => {
            let base = RecurrenceRule::daily(parse_time("09:00")?, now.date_naive());
            let recurrence = apply_schedule(base, schedule)?;
            let delay = delay.unwrap_or(config.escalation.default_delay_minutes);
            let mut delivery = DeliveryConfig::default();
            if let Some(c) = channels {
                delivery.alert_channels = parse_alert_channels(&c)?;
            }
            let new = NewReminder {
                owner_id: owner,
                created_by: author(as_member),
                title,
                description,
                category: category.into(),
                recurrence,
                active: !inactive,
                escalation: escalation_for(escalate_to.as_deref().unwrap_or(""), delay),
                delivery,
            };
            let reminder = engine.create_reminder(new, now)?;
            print_json(&reminder)?;
        }
        ReminderAction::Update {
            id,
            title,
            description,
            category,
            schedule,
            active,
            escalate_to,
            delay,
            channels,
            as_member,
        } => {
            let current = engine
                .store()
                .get_reminder(&id)?
                .ok_or_else(|| format!("reminder not found: {id}"))?;

            let touches_schedule = schedule.frequency.is_some()
                || schedule.time.is_some()
                || schedule.days.is_some()
                || schedule.start.is_some()
                || schedule.end.is_some();
            let recurrence = if touches_schedule {
                Some(apply_schedule(current.recurrence.clone(), schedule)?)
            } else {
                None
            };

            let escalation = match (escalate_to, delay) {
                (None, None) => None,
                (targets, delay) => {
                    let mut cfg = match targets {
                        Some(t) => escalation_for(&t, current.escalation.delay_minutes),
                        None => current.escalation.clone(),
                    };
                    if let Some(d) = delay {
                        cfg.delay_minutes = d;
                    }
                    Some(cfg)
                }
            };

            let delivery = match channels {
                Some(c) => Some(DeliveryConfig {
                    alert_channels: parse_alert_channels(&c)?,
                    ..current.delivery.clone()
                }),
                None => None,
            };

            let patch = ReminderPatch {
                title,
                description: description.map(|d| (!d.is_empty()).then_some(d)),
                category: category.map(Into::into),
                recurrence,
                active,
                escalation,
                delivery,
            };
            let reminder = engine.update_reminder(&id, patch, &author(as_member), now)?;
            print_json(&reminder)?;
        }
        ReminderAction::List { active } => {
            let reminders = if active {
                engine.store().list_active_reminders()?
            } else {
                engine.store().list_reminders()?
            };
            print_json(&reminders)?;
        }
        ReminderAction::Next { id, count, after } => {
            let after = parse_instant(after.as_deref())?;
            print_json(&engine.upcoming(&id, after, count)?)?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn weekdays_parse_case_insensitively() {
        let days = parse_days("Mon,wed, FRI").unwrap();
        assert_eq!(
            days.into_iter().collect::<Vec<_>>(),
            vec![DayOfWeek::Mon, DayOfWeek::Wed, DayOfWeek::Fri]
        );
        assert!(parse_days("someday").is_err());
    }

    #[test]
    fn alert_channels_parse_by_name() {
        let set = parse_alert_channels("visual,voice").unwrap();
        assert!(set.contains(&AlertChannel::Visual));
        assert!(set.contains(&AlertChannel::Voice));
        assert!(parse_alert_channels("pager").is_err());
    }

    #[test]
    fn empty_targets_disable_escalation() {
        let cfg = escalation_for("", 30);
        assert!(!cfg.enabled);
        let cfg = escalation_for("m1,m2,m1", 45);
        assert!(cfg.enabled);
        assert_eq!(cfg.targets, vec!["m1", "m2"]);
        assert_eq!(cfg.delay_minutes, 45);
    }
}
