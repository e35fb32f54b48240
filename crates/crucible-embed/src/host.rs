//! Capabilities consumed from the host application.
//!
//! The overlay never talks to a concrete editor. Everything it needs from the
//! host (file resolution and IO, markdown rendering, settings persistence,
//! navigation, toasts) comes through these traits, bundled in [`HostServices`].

use crate::dom::{NodeId, SharedDocument};
use crate::error::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

pub use crucible_embed_config::SettingsStore;

/// A concrete file in the host's vault.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct FileRef {
    /// Vault-relative path, `/`-separated
    pub path: String,
}

impl FileRef {
    /// Reference to `path`
    pub fn new(path: impl Into<String>) -> Self {
        Self { path: path.into() }
    }

    /// File name with extension
    pub fn basename(&self) -> &str {
        self.path.rsplit('/').next().unwrap_or(&self.path)
    }

    /// Lowercased extension
    pub fn extension(&self) -> Option<String> {
        let (stem, ext) = self.basename().rsplit_once('.')?;
        if stem.is_empty() {
            return None;
        }
        Some(ext.to_ascii_lowercase())
    }

    /// File name without extension
    pub fn name(&self) -> &str {
        let base = self.basename();
        match base.rsplit_once('.') {
            Some((stem, _)) if !stem.is_empty() => stem,
            _ => base,
        }
    }
}

impl fmt::Display for FileRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.path)
    }
}

/// File resolution and IO.
#[async_trait]
pub trait Vault: Send + Sync {
    /// Resolve a link path (no heading or alias) relative to `source_path`.
    fn resolve_link(&self, link_path: &str, source_path: &str) -> Option<FileRef>;

    /// Read the full raw text of `file`.
    async fn read(&self, file: &FileRef) -> Result<String>;

    /// Replace the full text of `file`.
    async fn write(&self, file: &FileRef, content: &str) -> Result<()>;
}

/// The host's markdown rendering routine.
#[async_trait]
pub trait MarkdownRenderer: Send + Sync {
    /// Render `markdown` into `container`, appending to its children.
    async fn render(
        &self,
        markdown: &str,
        container: NodeId,
        document: &SharedDocument,
        source_path: &str,
    ) -> Result<()>;
}

/// Where to open a navigation target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Placement {
    /// A new tab
    NewTab,
    /// Replace the current view
    CurrentView,
}

/// View navigation.
#[async_trait]
pub trait Navigator: Send + Sync {
    /// Whether there is a current view to navigate in.
    fn has_active_view(&self) -> bool;

    /// Open `file`.
    async fn open(&self, file: &FileRef, placement: Placement) -> Result<()>;
}

/// Tone of a transient notice.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NoticeKind {
    /// Operation succeeded
    Success,
    /// Operation failed
    Failure,
}

/// A transient user-visible message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notice {
    /// Tone
    pub kind: NoticeKind,
    /// Message text
    pub message: String,
    /// How long the host should show it
    pub duration: Duration,
}

impl Notice {
    /// Success toast
    pub fn success(message: impl Into<String>) -> Self {
        Self {
            kind: NoticeKind::Success,
            message: message.into(),
            duration: Duration::from_millis(1500),
        }
    }

    /// Failure toast, shown longer
    pub fn failure(message: impl Into<String>) -> Self {
        Self {
            kind: NoticeKind::Failure,
            message: message.into(),
            duration: Duration::from_millis(4000),
        }
    }
}

/// Transient user notifications.
pub trait Notifier: Send + Sync {
    /// Show `notice`.
    fn notify(&self, notice: Notice);
}

/// Everything the overlay consumes from the host.
#[derive(Clone)]
pub struct HostServices {
    /// File resolution and IO
    pub vault: Arc<dyn Vault>,
    /// Markdown rendering
    pub renderer: Arc<dyn MarkdownRenderer>,
    /// Navigation
    pub navigator: Arc<dyn Navigator>,
    /// Toasts
    pub notifier: Arc<dyn Notifier>,
    /// Settings persistence
    pub settings: Arc<dyn SettingsStore>,
}

impl fmt::Debug for HostServices {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HostServices").finish_non_exhaustive()
    }
}
