//! `run`: one full fetch-aggregate-analyze pass.

use anyhow::{Context, Result};
use clap::Args;
use portfolio_core::{EnvCredentials, OutcomeStatus};
use portfolio_orchestrator::{Orchestrator, RunReport};
use portfolio_sources::{build_sources, Collaborators};
use rust_decimal::Decimal;
use std::fmt::Write;
use std::sync::Arc;

#[derive(Args, Debug, Clone)]
pub struct RunArgs {
    /// Config file path
    #[arg(short, long, env = "PORTFOLIO_CONFIG")]
    pub config: Option<String>,

    /// Print the full report as JSON
    #[arg(long)]
    pub json: bool,

    /// Number of positions to list
    #[arg(long, default_value_t = 20)]
    pub top: usize,
}

/// # Errors
/// Returns an error if the configuration is invalid. Source failures are
/// reported in the summary and never fail the command.
pub async fn run_portfolio(args: RunArgs) -> Result<()> {
    let config = super::load_config(args.config.as_deref())?;
    let sources = build_sources(&config, &Collaborators::new());
    tracing::info!("Loaded {} enabled source(s)", sources.len());

    let orchestrator = Orchestrator::new(config, sources, Arc::new(EnvCredentials))?;
    let report = orchestrator.run().await;

    if args.json {
        println!(
            "{}",
            serde_json::to_string_pretty(&report).context("Failed to serialize run report")?
        );
    } else {
        print!("{}", render_summary(&report, args.top));
    }
    Ok(())
}

fn usd(value: Decimal) -> String {
    format!("${}", value.round_dp(2))
}

fn pct(value: Decimal) -> Decimal {
    value.round_dp(2).normalize()
}

fn render_summary(report: &RunReport, top: usize) -> String {
    let mut out = String::new();
    let counts = report.status_counts();

    let _ = writeln!(out, "Run {} ({} ms)", report.run_id, report.elapsed().num_milliseconds());
    let _ = writeln!(
        out,
        "Sources: {} ok, {} failed, {} skipped{}",
        counts.ok,
        counts.failed,
        counts.skipped,
        if report.timed_out { " (run deadline reached)" } else { "" }
    );
    for outcome in &report.outcomes {
        let line = match outcome.status() {
            OutcomeStatus::Ok => format!(
                "{} record(s), {} call(s)",
                outcome.records().len(),
                outcome.attempts()
            ),
            OutcomeStatus::Failed => format!(
                "{}: {}",
                outcome
                    .failure_reason()
                    .map_or("failed", |reason| reason.describe()),
                outcome.detail().unwrap_or_default()
            ),
            OutcomeStatus::Skipped => outcome.detail().unwrap_or_default().to_string(),
        };
        let _ = writeln!(out, "  {:<20} {:<8} {}", outcome.source_id(), outcome.status(), line);
    }

    let _ = writeln!(out);
    let _ = writeln!(out, "Positions:");
    for position in report.exposure.largest_directional.iter().take(top) {
        let _ = writeln!(
            out,
            "  {:<12} {:>20} {:>18}",
            position.symbol,
            position.net_quantity.normalize(),
            usd(position.usd_value)
        );
    }
    let hidden = report.exposure.largest_directional.len().saturating_sub(top);
    if hidden > 0 {
        let _ = writeln!(out, "  ... {hidden} more");
    }

    let ledger = &report.ledger;
    let exposure = &report.exposure;
    let _ = writeln!(out);
    let _ = writeln!(out, "Total:  {}", usd(ledger.total_usd));
    if !ledger.offset_usd.is_zero() {
        let _ = writeln!(out, "Offset: {}", usd(ledger.offset_usd));
        let _ = writeln!(out, "Net:    {}", usd(ledger.net_usd));
    }
    let _ = writeln!(
        out,
        "Stable: {} ({}%)  Non-stable: {} ({}%)",
        usd(exposure.stable_usd),
        pct(exposure.stable_pct),
        usd(exposure.non_stable_usd),
        pct(exposure.non_stable_pct)
    );
    for alert in &exposure.concentration_alerts {
        let _ = writeln!(
            out,
            "Concentration: {} is {}% of the portfolio",
            alert.symbol,
            pct(alert.pct_of_total)
        );
    }
    out
}
