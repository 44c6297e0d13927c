//! # Operator command surface.
//!
//! One privileged verb with sub-commands `(none | now | <seconds> | test |
//! status | cancel)`. The verb returns to the operator immediately after
//! dispatch; the copyover itself runs on the coordinator's worker. Output
//! is plain text — ANSI decoration happens downstream in the render
//! pipeline.

use std::fmt::Write as _;
use std::sync::Arc;

use crate::config::Config;
use crate::coordinator::{Coordinator, InitiateOptions};
use crate::error::CopyoverError;
use crate::phase::Status;

/// Parsed operator sub-command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperatorCommand {
    /// No arguments: show usage.
    Help,
    /// Immediate copyover, no countdown.
    Now,
    /// Copyover after a countdown in seconds.
    Countdown(u32),
    /// Readiness report without side effects.
    Test,
    /// Phase, progress, vetoes, totals, recent history.
    Status,
    /// Cancel a pending copyover.
    Cancel,
}

/// Parses the verb's argument string.
///
/// Unknown words and negative or non-numeric countdowns return an error
/// string suitable for echoing back to the operator.
pub fn parse_command(args: &str, cfg: &Config) -> Result<OperatorCommand, String> {
    let mut words = args.split_whitespace();
    let Some(first) = words.next() else {
        return Ok(OperatorCommand::Help);
    };

    match first.to_ascii_lowercase().as_str() {
        "now" => Ok(OperatorCommand::Now),
        "test" => Ok(OperatorCommand::Test),
        "status" => Ok(OperatorCommand::Status),
        "cancel" => Ok(OperatorCommand::Cancel),
        word => {
            let seconds: u32 = word
                .parse()
                .map_err(|_| "Invalid countdown value. Use a positive number of seconds.".to_string())?;
            if seconds > cfg.max_countdown {
                return Err(format!(
                    "Maximum countdown is {} seconds.",
                    cfg.max_countdown
                ));
            }
            // Zero falls to the configured default.
            Ok(OperatorCommand::Countdown(cfg.effective_countdown(seconds)))
        }
    }
}

/// Dispatches a parsed command, returning the text reply for the
/// operator.
pub async fn dispatch(
    coordinator: &Arc<Coordinator>,
    cfg: &Config,
    command: OperatorCommand,
    issued_by: &str,
) -> String {
    match command {
        OperatorCommand::Help => usage(),
        OperatorCommand::Test => readiness_report(coordinator, cfg),
        OperatorCommand::Status => render_status(&coordinator.status(), coordinator, cfg),
        OperatorCommand::Cancel => match coordinator.cancel("operator request").await {
            Ok(()) => "Copyover cancelled.".to_string(),
            Err(CopyoverError::CancelRefused { phase }) if !phase.is_active() => {
                "No copyover in progress.".to_string()
            }
            Err(err) => format!("Cannot cancel: {err}"),
        },
        OperatorCommand::Now => {
            start(coordinator, issued_by, 0, "Initiating immediate copyover...")
        }
        OperatorCommand::Countdown(seconds) => {
            let banner = format!("Initiating copyover in {seconds} seconds...");
            start(coordinator, issued_by, seconds, &banner)
        }
    }
}

fn start(
    coordinator: &Arc<Coordinator>,
    issued_by: &str,
    countdown: u32,
    banner: &str,
) -> String {
    let result = coordinator.initiate(InitiateOptions {
        countdown,
        build: true,
        reason: String::new(),
        initiated_by: issued_by.to_string(),
    });
    match result {
        Ok(()) => banner.to_string(),
        Err(err) => format!("Copyover refused: {err}"),
    }
}

fn usage() -> String {
    "copyover - hot reload of the server without disconnecting players.\n\
     \n\
     Usage:\n\
     \x20 copyover now        - immediate copyover\n\
     \x20 copyover <seconds>  - copyover with countdown (0 = default)\n\
     \x20 copyover test       - check copyover readiness\n\
     \x20 copyover status     - phase, progress, and history\n\
     \x20 copyover cancel     - cancel a pending copyover"
        .to_string()
}

fn readiness_report(coordinator: &Arc<Coordinator>, cfg: &Config) -> String {
    let mut out = String::from("Testing copyover readiness...\n");

    if coordinator.is_in_progress() {
        out.push_str("Copyover is already in progress!\n");
        return out;
    }
    if cfg.snapshot_path().exists() {
        out.push_str(
            "Warning: a copyover snapshot exists on disk. A previous copyover may have failed.\n",
        );
    }
    let (ok, vetoes) = coordinator.registry().check_vetoes();
    for veto in &vetoes {
        let _ = writeln!(
            out,
            "{} veto from {}: {}",
            veto.severity.as_str(),
            veto.subsystem,
            veto.reason
        );
    }
    if ok {
        out.push_str("Copyover system ready.");
    } else {
        out.push_str("Copyover is currently blocked.");
    }
    out
}

fn render_status(status: &Status, coordinator: &Arc<Coordinator>, _cfg: &Config) -> String {
    let mut out = String::new();
    let _ = writeln!(
        out,
        "Phase: {} ({}% overall)",
        status.phase,
        status.overall_progress()
    );

    if let Some(when) = status.scheduled_for {
        let left = status.time_until_scheduled();
        let _ = writeln!(
            out,
            "Scheduled: {}s from now ({:?})",
            left.as_secs(),
            when
        );
    }
    if let Some(by) = &status.initiated_by {
        if !by.is_empty() {
            let _ = writeln!(out, "Initiated by: {by}");
        }
    }
    if let Some(err) = &status.last_error {
        let _ = writeln!(out, "Last error: {err}");
    }
    for veto in &status.vetoes {
        let _ = writeln!(
            out,
            "Veto [{}] {}: {}",
            veto.severity.as_str(),
            veto.subsystem,
            veto.reason
        );
    }
    let _ = writeln!(
        out,
        "Copyovers: {} total, average {:?}",
        status.total_copyovers, status.average_duration
    );

    let history = coordinator.history(5);
    if !history.is_empty() {
        out.push_str("Recent:\n");
        for rec in history {
            let _ = writeln!(
                out,
                "  #{} {} by {} in {:?} (saved {}, lost {}){}",
                rec.id,
                if rec.success { "ok" } else { "failed" },
                rec.initiated_by,
                rec.duration,
                rec.connections_saved,
                rec.connections_lost,
                rec.error.map(|e| format!(" - {e}")).unwrap_or_default()
            );
        }
    }
    out.trim_end().to_string()
}
