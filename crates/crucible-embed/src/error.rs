//! Error types for the embed overlay engine.

use thiserror::Error;

/// Errors that can occur while augmenting or editing embeds.
///
/// None of these are allowed to reach the host: entry points log them and leave
/// the native rendering in place.
#[derive(Error, Debug)]
pub enum EmbedError {
    /// Link text does not resolve to a file.
    #[error("Cannot resolve link '{link}' from '{source_path}'")]
    Unresolvable {
        /// Raw link text
        link: String,
        /// Path of the document containing the link
        source_path: String,
    },

    /// Link text still contains typing artifacts.
    #[error("Malformed embed link '{0}'")]
    MalformedLink(String),

    /// IO error from the filesystem host.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Writing the edited buffer failed.
    #[error("Failed to save '{path}': {reason}")]
    SaveFailed {
        /// File being saved
        path: String,
        /// Host-provided reason
        reason: String,
    },

    /// Nested reprocessing or a retry loop hit its bound.
    #[error("Recursion limit of {0} exceeded")]
    RecursionLimit(usize),

    /// A retained node no longer exists in the document.
    #[error("Node {0} is no longer in the document")]
    StaleNode(u64),

    /// A tree edit would corrupt the document (cycle, root removal).
    #[error("Invalid tree operation: {0}")]
    InvalidTree(String),

    /// No augmented block carries this identity.
    #[error("No block with identity '{0}'")]
    BlockNotFound(String),

    /// A host capability reported an error.
    #[error("Host error: {0}")]
    Host(String),

    /// Settings load/save failure.
    #[error("Settings error: {0}")]
    Settings(#[from] crucible_embed_config::ConfigError),

    /// Serialization failure.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Result type for embed operations.
pub type Result<T> = std::result::Result<T, EmbedError>;
