//! # Collaborator interfaces.
//!
//! The engine drives four narrow external contracts: durable user
//! persistence, template rendering for user-facing notices, world re-entry
//! after recovery, and the round clock. Everything behind these traits —
//! the character file format, the ANSI pipeline, room placement logic — is
//! outside the engine.
//!
//! Built-in reference implementations ([`JsonUserStore`],
//! [`PlainRenderer`]) exist so the engine runs end-to-end in tests and
//! small deployments; production servers supply their own.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Mutex;

use async_trait::async_trait;

use crate::error::SubsystemError;
use crate::world::{RoomId, UserId, UserRecord};

/// Durable persistence for user entities (character files).
#[async_trait]
pub trait UserStore: Send + Sync + 'static {
    /// Durably writes the user's character file.
    async fn save(&self, user: &UserRecord) -> Result<(), SubsystemError>;

    /// Loads a user by id. Used during recovery for users referenced by a
    /// preserved connection but not yet resident.
    async fn load(&self, id: UserId) -> Result<UserRecord, SubsystemError>;
}

/// Substitution points available to notice templates.
#[derive(Debug, Clone, Default)]
pub struct TemplateVars {
    /// Seconds remaining, for countdown messages.
    pub seconds: Option<u64>,
    /// Whole minutes remaining, for long countdowns.
    pub minutes: Option<u64>,
    /// The operator's reason, verbatim.
    pub reason: Option<String>,
    /// Build identifier, for the post-copyover notice.
    pub build: Option<String>,
    /// Human-readable elapsed duration, for the post-copyover notice.
    pub duration: Option<String>,
}

/// Renders a named template with named substitutions. ANSI markup in the
/// output is parsed downstream, not here.
pub trait TemplateRenderer: Send + Sync + 'static {
    /// Renders `name` with `vars`. Unknown template names are an error;
    /// the caller falls back to a plain message.
    fn render(&self, name: &str, vars: &TemplateVars) -> Result<String, SubsystemError>;
}

/// Reintroduces a user into the in-memory world after recovery.
pub trait WorldEntry: Send + Sync + 'static {
    /// Places the user in the room. Implementations fall back to a safe
    /// default room when `room_id` does not resolve.
    fn enter(&self, user_id: UserId, room_id: RoomId);
}

/// Reference [`UserStore`]: one JSON file per user under a directory.
///
/// Demo/reference only; real servers bring their own character store.
pub struct JsonUserStore {
    dir: PathBuf,
}

impl JsonUserStore {
    /// Creates a store rooted at `dir` (must exist).
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn path_for(&self, id: UserId) -> PathBuf {
        self.dir.join(format!("user_{id}.json"))
    }
}

#[async_trait]
impl UserStore for JsonUserStore {
    async fn save(&self, user: &UserRecord) -> Result<(), SubsystemError> {
        let bytes = serde_json::to_vec_pretty(user).map_err(SubsystemError::Encode)?;
        tokio::fs::write(self.path_for(user.id), bytes).await?;
        Ok(())
    }

    async fn load(&self, id: UserId) -> Result<UserRecord, SubsystemError> {
        let bytes = tokio::fs::read(self.path_for(id)).await?;
        serde_json::from_slice(&bytes).map_err(SubsystemError::Decode)
    }
}

/// Reference [`TemplateRenderer`]: in-memory named templates with
/// `{{Name}}` substitution for `Seconds`, `Minutes`, `Reason`, `Build`,
/// and `Duration`.
pub struct PlainRenderer {
    templates: Mutex<HashMap<String, String>>,
}

impl PlainRenderer {
    /// Creates a renderer pre-loaded with the engine's notice templates.
    pub fn with_defaults() -> Self {
        let renderer = Self {
            templates: Mutex::new(HashMap::new()),
        };
        for (name, body) in [
            ("copyover-announce", "A reboot is coming in {{Minutes}} minute(s). {{Reason}}"),
            ("copyover-countdown", "Reboot in {{Seconds}} second(s)..."),
            ("copyover-pre", "The world shimmers and holds its breath..."),
            ("copyover-building", "Forging the new world..."),
            ("copyover-build-failed", "The forge sputters; the reboot is off."),
            ("copyover-cancelled", "The reboot was cancelled: {{Reason}}"),
            (
                "copyover-reconnect",
                "Your connection cannot cross over. Please reconnect in a few seconds.",
            ),
            (
                "copyover-post",
                "The world returns. Build {{Build}}, away {{Duration}}.",
            ),
        ] {
            renderer.set(name, body);
        }
        renderer
    }

    /// Adds or replaces a template.
    pub fn set(&self, name: &str, body: &str) {
        self.templates
            .lock()
            .unwrap()
            .insert(name.to_string(), body.to_string());
    }
}

impl TemplateRenderer for PlainRenderer {
    fn render(&self, name: &str, vars: &TemplateVars) -> Result<String, SubsystemError> {
        let body = self
            .templates
            .lock()
            .unwrap()
            .get(name)
            .cloned()
            .ok_or_else(|| SubsystemError::Other(format!("unknown template '{name}'")))?;

        let mut out = body;
        let subs: [(&str, String); 5] = [
            ("{{Seconds}}", vars.seconds.map(|s| s.to_string()).unwrap_or_default()),
            ("{{Minutes}}", vars.minutes.map(|m| m.to_string()).unwrap_or_default()),
            ("{{Reason}}", vars.reason.clone().unwrap_or_default()),
            ("{{Build}}", vars.build.clone().unwrap_or_default()),
            ("{{Duration}}", vars.duration.clone().unwrap_or_default()),
        ];
        for (needle, value) in subs {
            out = out.replace(needle, &value);
        }
        Ok(out.trim_end().to_string())
    }
}
