//! # Built-in logging subscriber.
//!
//! Mirrors every lifecycle event into `tracing` with structured fields.
//! Reference observer; deployments with their own telemetry pipelines
//! replace it.

use async_trait::async_trait;

use crate::events::{Event, EventKind};

use super::Subscribe;

/// Logs lifecycle events through `tracing`.
pub struct LogSubscriber;

#[async_trait]
impl Subscribe for LogSubscriber {
    async fn on_event(&self, event: &Event) {
        match event.kind {
            EventKind::PhaseChange => {
                let from = event.from.map(|p| p.as_str()).unwrap_or("?");
                let to = event.phase.map(|p| p.as_str()).unwrap_or("?");
                tracing::info!(
                    seq = event.seq,
                    from,
                    to,
                    progress = event.progress,
                    "copyover phase"
                );
            }
            EventKind::Scheduled => {
                tracing::info!(seq = event.seq, when = ?event.when, reason = ?event.reason, "copyover scheduled");
            }
            EventKind::Cancelled => {
                tracing::warn!(seq = event.seq, reason = ?event.reason, "copyover cancelled");
            }
            EventKind::Completed => {
                tracing::info!(seq = event.seq, "copyover complete");
            }
            EventKind::GatherState | EventKind::RestoreState | EventKind::ShutdownListeners => {
                tracing::info!(seq = event.seq, kind = ?event.kind, "copyover milestone");
            }
            EventKind::Broadcast => {
                tracing::debug!(seq = event.seq, text = ?event.text, "broadcast");
            }
        }
    }

    fn name(&self) -> &'static str {
        "log"
    }
}
