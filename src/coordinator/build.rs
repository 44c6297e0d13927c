//! # The optional build step.
//!
//! Invokes the host toolchain to produce a fresh executable before exec.
//! The build runs **without** the world quiescence lock: a slow compile
//! must never stall connected clients, and a failed one returns the
//! machine to rest.
//!
//! Build identifiers feed the status surface and the post-copyover notice;
//! the embedding server stamps its own via [`set_build_number`].

use std::sync::{OnceLock, RwLock};

use tokio::process::Command;

use crate::config::Config;
use crate::error::CopyoverError;

fn build_number_cell() -> &'static RwLock<String> {
    static CELL: OnceLock<RwLock<String>> = OnceLock::new();
    CELL.get_or_init(|| RwLock::new(env!("CARGO_PKG_VERSION").to_string()))
}

/// Current build identifier.
pub fn build_number() -> String {
    build_number_cell().read().unwrap().clone()
}

/// Replaces the build identifier (typically a VCS hash stamped at link
/// time).
pub fn set_build_number(build: impl Into<String>) {
    *build_number_cell().write().unwrap() = build.into();
}

/// Runs the configured build command to completion.
///
/// No intrinsic timeout: operators watch the status surface and intervene.
/// A non-zero exit returns [`CopyoverError::BuildFailed`] carrying the
/// tail of stderr.
pub async fn run_build(cfg: &Config) -> Result<(), CopyoverError> {
    tracing::info!(command = %cfg.build_command, args = ?cfg.build_args, "building successor");

    let output = Command::new(&cfg.build_command)
        .args(&cfg.build_args)
        .output()
        .await
        .map_err(|err| CopyoverError::BuildFailed {
            reason: format!("failed to invoke '{}': {err}", cfg.build_command),
        })?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(CopyoverError::BuildFailed {
            reason: tail(&stderr, 800),
        });
    }

    tracing::info!("build successful");
    Ok(())
}

/// Last `max` bytes of toolchain output, on a char boundary.
fn tail(text: &str, max: usize) -> String {
    let trimmed = text.trim();
    if trimmed.len() <= max {
        return trimmed.to_string();
    }
    let mut start = trimmed.len() - max;
    while !trimmed.is_char_boundary(start) {
        start += 1;
    }
    format!("...{}", &trimmed[start..])
}
