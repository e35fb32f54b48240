//! Host lifecycle events delivered to the overlay.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A file lifecycle event from the host's vault.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FileEvent {
    /// Unique identifier for this event.
    pub id: Uuid,

    /// Kind of file event.
    pub kind: FileEventKind,

    /// Vault-relative path of the affected file (the new path for renames).
    pub path: String,

    /// Timestamp when the event occurred.
    pub timestamp: DateTime<Utc>,
}

impl FileEvent {
    /// Create a new file event.
    pub fn new(kind: FileEventKind, path: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            kind,
            path: path.into(),
            timestamp: Utc::now(),
        }
    }

    /// File was created.
    pub fn created(path: impl Into<String>) -> Self {
        Self::new(FileEventKind::Created, path)
    }

    /// File content changed.
    pub fn modified(path: impl Into<String>) -> Self {
        Self::new(FileEventKind::Modified, path)
    }

    /// File moved from `from` to `path`.
    pub fn renamed(from: impl Into<String>, path: impl Into<String>) -> Self {
        Self::new(FileEventKind::Renamed { from: from.into() }, path)
    }

    /// Paths whose caches this event invalidates.
    pub fn affected_paths(&self) -> Vec<&str> {
        match &self.kind {
            FileEventKind::Renamed { from } => vec![from.as_str(), self.path.as_str()],
            _ => vec![self.path.as_str()],
        }
    }
}

/// Kinds of file events the overlay reacts to.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub enum FileEventKind {
    /// File was created.
    Created,
    /// File content was modified.
    Modified,
    /// File was renamed or moved.
    Renamed {
        /// Path before the rename.
        from: String,
    },
}

impl FileEventKind {
    /// Get a string representation of the event kind.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::Modified => "modified",
            Self::Renamed { .. } => "renamed",
        }
    }
}

/// Workspace lifecycle events that warrant a reconciliation pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkspaceEvent {
    /// A different view became active
    ActiveViewChanged,
    /// Panes were split, closed or rearranged
    LayoutChanged,
    /// The window or a pane was resized
    Resized,
}
