//! Scheduler entry point.
//!
//! An external scheduler (cron, systemd timer) runs `careloop-cli tick` every
//! minute or so. Missed or repeated runs are harmless.

use careloop_core::{Config, DispatchReport, Engine, SqliteStore};
use clap::Args;
use serde::Serialize;

use super::{open_engine, parse_instant, print_json, webhook_dispatcher, CliResult};

#[derive(Args)]
pub struct TickArgs {
    /// Evaluate as of this RFC 3339 instant instead of now
    #[arg(long)]
    now: Option<String>,
    /// Create alerts but do not deliver them
    #[arg(long)]
    no_dispatch: bool,
}

#[derive(Serialize)]
struct TickOutput {
    #[serde(flatten)]
    report: careloop_core::TickReport,
    dispatches: Vec<DispatchReport>,
}

pub fn run(args: TickArgs) -> CliResult {
    let config = Config::load_or_default();
    let engine = open_engine(&config)?;
    let now = parse_instant(args.now.as_deref())?;

    let report = engine.tick(now)?;

    // The tick has committed; a broken transport must not hide its alert ids.
    let mut dispatches = Vec::new();
    if !args.no_dispatch && !report.alert_ids.is_empty() {
        if let Err(e) = dispatch_all(&engine, &config, &report.alert_ids, &mut dispatches) {
            tracing::warn!(
                alerts = report.alert_ids.len(),
                error = %e,
                "dispatch skipped; run `alert dispatch` once the transport is fixed"
            );
        }
    }

    print_json(&TickOutput { report, dispatches })
}

fn dispatch_all(
    engine: &Engine<SqliteStore>,
    config: &Config,
    alert_ids: &[String],
    dispatches: &mut Vec<DispatchReport>,
) -> CliResult {
    let dispatcher = webhook_dispatcher(config)?;
    let runtime = tokio::runtime::Runtime::new()?;
    runtime.block_on(async {
        for alert_id in alert_ids {
            match engine.dispatch_alert(alert_id, &dispatcher).await {
                Ok(d) => dispatches.push(d),
                Err(e) => tracing::warn!(%alert_id, error = %e, "dispatch failed"),
            }
        }
    });
    Ok(())
}
