//! Alert commands: manual alerts, acknowledgment and delivery.

use careloop_core::{AlertType, Config, ManualAlert, OccurrenceStore, Severity};
use chrono::Utc;
use clap::Subcommand;

use super::{open_engine, print_json, split_list, webhook_dispatcher, CliResult};

#[derive(Subcommand)]
pub enum AlertAction {
    /// Create an alert outside the escalation path
    Generate {
        /// Alert type (task_completed, task_missed, streak_milestone, concern_pattern, ...)
        #[arg(long = "type", default_value = "concern_pattern")]
        alert_type: String,
        #[arg(long)]
        title: String,
        #[arg(long)]
        message: String,
        /// info, warning or urgent
        #[arg(long, default_value = "info")]
        severity: String,
        /// Comma-separated member IDs (default: everyone)
        #[arg(long)]
        targets: Option<String>,
        /// Deliver immediately over the configured webhooks
        #[arg(long)]
        dispatch: bool,
    },
    /// List alerts
    List {
        /// Only alerts nobody has acknowledged yet
        #[arg(long)]
        unacknowledged: bool,
    },
    /// Show one alert
    Get {
        /// Alert ID
        id: String,
    },
    /// Acknowledge an alert as a member
    Ack {
        /// Alert ID
        alert_id: String,
        /// Member ID
        member_id: String,
    },
    /// Deliver an existing alert over the configured webhooks
    Dispatch {
        /// Alert ID
        alert_id: String,
    },
}

fn dispatch(
    engine: &careloop_core::Engine<careloop_core::SqliteStore>,
    config: &Config,
    alert_id: &str,
) -> CliResult {
    let dispatcher = webhook_dispatcher(config)?;
    let runtime = tokio::runtime::Runtime::new()?;
    let report = runtime.block_on(engine.dispatch_alert(alert_id, &dispatcher))?;
    print_json(&report)
}

pub fn run(action: AlertAction) -> CliResult {
    let config = Config::load_or_default();
    let engine = open_engine(&config)?;

    match action {
        AlertAction::Generate {
            alert_type,
            title,
            message,
            severity,
            targets,
            dispatch: deliver,
        } => {
            let spec = ManualAlert {
                alert_type: AlertType::parse(&alert_type)
                    .ok_or_else(|| format!("unknown alert type: {alert_type}"))?,
                title,
                message,
                severity: Severity::parse(&severity)
                    .ok_or_else(|| format!("unknown severity: {severity}"))?,
                targets: targets.as_deref().map(split_list),
            };
            let alert = engine.generate_alert(spec, Utc::now())?;
            print_json(&alert)?;
            if deliver {
                dispatch(&engine, &config, &alert.id)?;
            }
        }
        AlertAction::List { unacknowledged } => {
            let alerts: Vec<_> = engine
                .store()
                .list_alerts()?
                .into_iter()
                .filter(|a| !unacknowledged || a.acknowledged_by().is_empty())
                .collect();
            print_json(&alerts)?;
        }
        AlertAction::Get { id } => match engine.store().get_alert(&id)? {
            Some(alert) => print_json(&alert)?,
            None => return Err(format!("alert not found: {id}").into()),
        },
        AlertAction::Ack {
            alert_id,
            member_id,
        } => {
            let alert = engine.acknowledge(&alert_id, &member_id)?;
            print_json(&alert)?;
        }
        AlertAction::Dispatch { alert_id } => dispatch(&engine, &config, &alert_id)?,
    }
    Ok(())
}
