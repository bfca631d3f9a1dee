pub mod alert;
pub mod config;
pub mod member;
pub mod reminder;
pub mod resolve;
pub mod tick;

use std::sync::Arc;

use careloop_core::{
    AlertDispatcher, Config, Engine, EngineSettings, RetryPolicy, SqliteStore, WebhookTransport,
};
use chrono::{DateTime, NaiveDate, NaiveTime, Utc};

pub type CliResult = Result<(), Box<dyn std::error::Error>>;

/// Engine over the default SQLite database, tuned from `config.toml`.
pub fn open_engine(config: &Config) -> Result<Engine<SqliteStore>, Box<dyn std::error::Error>> {
    let store = SqliteStore::open_default()?;
    Ok(Engine::new(store, EngineSettings::from_config(config)))
}

pub fn webhook_dispatcher(config: &Config) -> Result<AlertDispatcher, Box<dyn std::error::Error>> {
    let transport = WebhookTransport::from_settings(&config.transport)?;
    Ok(AlertDispatcher::new(
        Arc::new(transport),
        RetryPolicy::from_settings(&config.dispatch),
    ))
}

/// RFC 3339 timestamp, or the current time when absent.
pub fn parse_instant(raw: Option<&str>) -> Result<DateTime<Utc>, Box<dyn std::error::Error>> {
    match raw {
        Some(s) => Ok(DateTime::parse_from_rfc3339(s)
            .map_err(|e| format!("invalid timestamp '{s}': {e}"))?
            .with_timezone(&Utc)),
        None => Ok(Utc::now()),
    }
}

pub fn parse_date(raw: &str) -> Result<NaiveDate, Box<dyn std::error::Error>> {
    Ok(NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .map_err(|e| format!("invalid date '{raw}' (expected YYYY-MM-DD): {e}"))?)
}

pub fn parse_time(raw: &str) -> Result<NaiveTime, Box<dyn std::error::Error>> {
    Ok(NaiveTime::parse_from_str(raw, "%H:%M")
        .map_err(|e| format!("invalid time '{raw}' (expected HH:MM): {e}"))?)
}

/// Comma-separated list, trimmed, blanks dropped.
pub fn split_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

pub fn print_json<T: serde::Serialize>(value: &T) -> CliResult {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn split_list_drops_blanks() {
        assert_eq!(split_list(" m1, ,m2 ,"), vec!["m1", "m2"]);
    }

    #[test]
    fn parse_instant_normalizes_offset() {
        let t = parse_instant(Some("2024-01-02T09:30:00+01:00")).unwrap();
        assert_eq!(t.to_rfc3339(), "2024-01-02T08:30:00+00:00");
        assert!(parse_instant(Some("yesterday")).is_err());
    }

    #[test]
    fn parse_time_requires_hours_and_minutes() {
        assert_eq!(parse_time("08:05").unwrap(), NaiveTime::from_hms_opt(8, 5, 0).unwrap());
        assert!(parse_time("8am").is_err());
    }
}
