//! File-modify suppression for files being edited in place.
//!
//! While a file is open in an edit session, modify notifications for it are
//! ignored so the host's file-watch re-render cannot clobber the editor. The
//! suppression outlives each save by a short grace window that absorbs the
//! notification for the write this system just made.

use dashmap::DashMap;
use std::time::Duration;
use tokio::time::Instant;
use tracing::trace;

/// How long modify events stay suppressed after a save completes.
pub const POST_SAVE_GRACE: Duration = Duration::from_millis(500);

/// Files currently protected from external modify handling.
#[derive(Debug)]
pub struct SuppressionSet {
    editing: DashMap<String, String>,
    grace: DashMap<String, Instant>,
    grace_period: Duration,
}

impl Default for SuppressionSet {
    fn default() -> Self {
        Self::new(POST_SAVE_GRACE)
    }
}

impl SuppressionSet {
    /// Empty set with the given post-save grace period.
    pub fn new(grace_period: Duration) -> Self {
        Self {
            editing: DashMap::new(),
            grace: DashMap::new(),
            grace_period,
        }
    }

    /// Claim `path` for the session `owner`; false if another session holds it.
    pub fn begin_editing(&self, path: &str, owner: &str) -> bool {
        let entry = self
            .editing
            .entry(path.to_string())
            .or_insert_with(|| owner.to_string());
        entry.value() == owner
    }

    /// Release `path` if `owner` holds it.
    pub fn end_editing(&self, path: &str, owner: &str) {
        self.editing.remove_if(path, |_, held_by| held_by == owner);
    }

    /// Whether a session is editing `path`
    pub fn is_editing(&self, path: &str) -> bool {
        self.editing.contains_key(path)
    }

    /// Session holding `path`
    pub fn editor_of(&self, path: &str) -> Option<String> {
        self.editing.get(path).map(|owner| owner.value().clone())
    }

    /// A save of `path` just completed.
    pub fn note_saved(&self, path: &str) {
        let until = Instant::now() + self.grace_period;
        trace!(path, "Suppressing modify events after save");
        self.grace.insert(path.to_string(), until);
    }

    /// Whether modify events for `path` must be ignored right now.
    pub fn is_suppressed(&self, path: &str) -> bool {
        if self.is_editing(path) {
            return true;
        }
        let now = Instant::now();
        // Expired windows are dropped lazily
        self.grace.remove_if(path, |_, until| *until <= now);
        self.grace.contains_key(path)
    }

    /// Forget everything.
    pub fn clear(&self) {
        self.editing.clear();
        self.grace.clear();
    }
}
