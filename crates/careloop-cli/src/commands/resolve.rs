use careloop_core::{Config, ResolveOutcome};
use clap::Args;
use serde_json::json;

use super::{open_engine, parse_instant, print_json, CliResult};

#[derive(Args)]
pub struct ResolveArgs {
    /// Reminder ID
    reminder_id: String,
    /// Due time of the occurrence, RFC 3339
    due: String,
    /// Resolution time, RFC 3339 (default: now)
    #[arg(long)]
    at: Option<String>,
}

pub fn run(args: ResolveArgs) -> CliResult {
    let config = Config::load_or_default();
    let engine = open_engine(&config)?;
    let due = parse_instant(Some(&args.due))?;
    let at = parse_instant(args.at.as_deref())?;

    let outcome = engine.resolve_occurrence(&args.reminder_id, due, at)?;
    let body = match outcome {
        ResolveOutcome::Resolved => json!({ "outcome": "resolved" }),
        ResolveOutcome::ResolvedEarly => json!({ "outcome": "resolved_early" }),
        ResolveOutcome::AlreadyResolved => json!({ "outcome": "already_resolved" }),
        ResolveOutcome::AlreadyEscalated { alert_id } => {
            json!({ "outcome": "already_escalated", "alert_id": alert_id })
        }
    };
    print_json(&body)
}
