//! Memoization shared by every reconciliation pass.
//!
//! Node-keyed entries only live for one pass: the host recreates nodes on every
//! re-render, so a node id is not a durable key. Path-keyed entries live until
//! the file changes.

use crate::classifier::EmbedKind;
use crate::dom::NodeId;
use dashmap::{DashMap, DashSet};
use tracing::trace;

/// Cache sizes, for debug output.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStatistics {
    /// Node classifications from the current pass
    pub node_kinds: usize,
    /// Path classifications
    pub file_kinds: usize,
    /// Files with fallback rendering already attempted
    pub structurally_processed: usize,
    /// Links given up on
    pub broken_links: usize,
    /// Links with a creation retry in flight
    pub pending_retries: usize,
}

/// Process-wide caches.
#[derive(Debug, Default)]
pub struct ProcessingCache {
    node_kinds: DashMap<NodeId, EmbedKind>,
    file_kinds: DashMap<String, EmbedKind>,
    structurally_processed: DashSet<String>,
    broken_links: DashSet<String>,
    pending_retries: DashSet<String>,
}

impl ProcessingCache {
    /// Empty cache
    pub fn new() -> Self {
        Self::default()
    }

    /// Drop pass-scoped entries.
    pub fn begin_pass(&self) {
        self.node_kinds.clear();
    }

    /// Classification of `node` from earlier in this pass
    pub fn node_kind(&self, node: NodeId) -> Option<EmbedKind> {
        self.node_kinds.get(&node).map(|k| *k)
    }

    /// Remember the classification of `node` for this pass.
    pub fn set_node_kind(&self, node: NodeId, kind: EmbedKind) {
        self.node_kinds.insert(node, kind);
    }

    /// Classification of a resolved file path
    pub fn file_kind(&self, path: &str) -> Option<EmbedKind> {
        self.file_kinds.get(path).map(|k| *k)
    }

    /// Remember the classification of a resolved file path.
    pub fn set_file_kind(&self, path: &str, kind: EmbedKind) {
        self.file_kinds.insert(path.to_string(), kind);
    }

    /// Mark `path` as structurally processed; returns false if it already was.
    pub fn mark_structurally_processed(&self, path: &str) -> bool {
        self.structurally_processed.insert(path.to_string())
    }

    /// Whether fallback rendering was already attempted for `path`
    pub fn is_structurally_processed(&self, path: &str) -> bool {
        self.structurally_processed.contains(path)
    }

    /// Record that `key` will never resolve (until some file is created).
    pub fn mark_broken(&self, key: &str) {
        self.broken_links.insert(key.to_string());
    }

    /// Whether `key` was given up on
    pub fn is_broken(&self, key: &str) -> bool {
        self.broken_links.contains(key)
    }

    /// A file appeared: every broken link deserves another look.
    pub fn clear_broken(&self) {
        self.broken_links.clear();
    }

    /// Claim the retry slot for `key`; false when a retry is already running.
    pub fn begin_retry(&self, key: &str) -> bool {
        self.pending_retries.insert(key.to_string())
    }

    /// Release the retry slot for `key`.
    pub fn end_retry(&self, key: &str) {
        self.pending_retries.remove(key);
    }

    /// Whether a retry for `key` is running
    pub fn is_retrying(&self, key: &str) -> bool {
        self.pending_retries.contains(key)
    }

    /// Forget everything derived from the content or name of `path`.
    pub fn invalidate_path(&self, path: &str) {
        trace!(path, "Invalidating cached state");
        self.file_kinds.remove(path);
        self.structurally_processed.remove(path);
    }

    /// Drop everything.
    pub fn clear(&self) {
        self.node_kinds.clear();
        self.file_kinds.clear();
        self.structurally_processed.clear();
        self.broken_links.clear();
        self.pending_retries.clear();
    }

    /// Current sizes
    pub fn statistics(&self) -> CacheStatistics {
        CacheStatistics {
            node_kinds: self.node_kinds.len(),
            file_kinds: self.file_kinds.len(),
            structurally_processed: self.structurally_processed.len(),
            broken_links: self.broken_links.len(),
            pending_retries: self.pending_retries.len(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dom::Document;

    #[test]
    fn test_node_entries_are_pass_scoped() {
        let mut doc = Document::new();
        let node = doc.create_element("div");
        let cache = ProcessingCache::new();

        cache.set_node_kind(node, EmbedKind::Image);
        cache.set_file_kind("a.png", EmbedKind::Image);
        assert_eq!(cache.node_kind(node), Some(EmbedKind::Image));

        cache.begin_pass();
        assert_eq!(cache.node_kind(node), None);
        assert_eq!(cache.file_kind("a.png"), Some(EmbedKind::Image));
    }

    #[test]
    fn test_invalidate_path() {
        let cache = ProcessingCache::new();
        cache.set_file_kind("A.md", EmbedKind::Text);
        assert!(cache.mark_structurally_processed("A.md"));
        assert!(!cache.mark_structurally_processed("A.md"));

        cache.invalidate_path("A.md");
        assert_eq!(cache.file_kind("A.md"), None);
        assert!(!cache.is_structurally_processed("A.md"));
    }

    #[test]
    fn test_retry_slot_is_exclusive() {
        let cache = ProcessingCache::new();
        assert!(cache.begin_retry("D.md|New"));
        assert!(!cache.begin_retry("D.md|New"));
        assert!(cache.is_retrying("D.md|New"));
        cache.end_retry("D.md|New");
        assert!(cache.begin_retry("D.md|New"));
    }

    #[test]
    fn test_clear() {
        let cache = ProcessingCache::new();
        cache.set_file_kind("A.md", EmbedKind::Text);
        cache.mark_broken("x");
        cache.begin_retry("y");
        cache.clear();
        assert_eq!(cache.statistics(), CacheStatistics::default());
    }
}
