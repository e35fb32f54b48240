//! Shared reconciliation state with an explicit lifetime.
//!
//! One [`ReconcileContext`] is created per loaded plugin and torn down on
//! unload. Everything that would otherwise be process-global (caches, collapse
//! map, editing-file set, listeners) hangs off it.

use crate::cache::ProcessingCache;
use crate::classifier::Classifier;
use crate::collapse::CollapseStore;
use crate::dom::{Document, NodeId, SharedDocument};
use crate::host::HostServices;
use crate::markers;
use crate::suppression::SuppressionSet;
use crate::title_bar::ListenerRegistry;
use crucible_embed_config::{EmbedSettings, PersistedState};
use parking_lot::RwLock;
use std::sync::Arc;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::trace;

/// State shared by the driver, edit sessions and the plugin facade.
pub struct ReconcileContext {
    /// Host capabilities
    pub host: HostServices,
    /// The live document all views render into
    pub document: SharedDocument,
    /// Settings and collapse flags
    pub state: Arc<RwLock<PersistedState>>,
    /// Memoized classification and processing markers
    pub cache: Arc<ProcessingCache>,
    /// Embed classifier
    pub classifier: Classifier,
    /// Collapse flags
    pub collapse: CollapseStore,
    /// Files protected from external modify handling
    pub suppression: Arc<SuppressionSet>,
    /// Tracked click listeners
    pub listeners: Arc<ListenerRegistry>,
    /// Cancelled on unload; parent of every background task token
    pub shutdown: CancellationToken,
    reprocess: Arc<watch::Sender<u64>>,
}

impl ReconcileContext {
    /// Context over `document`, starting from `state`.
    pub fn new(host: HostServices, document: SharedDocument, state: PersistedState) -> Self {
        let cache = Arc::new(ProcessingCache::new());
        let state = Arc::new(RwLock::new(state));
        let (reprocess, _) = watch::channel(0);
        Self {
            classifier: Classifier::new(cache.clone(), host.vault.clone()),
            collapse: CollapseStore::new(state.clone(), host.settings.clone()),
            host,
            document,
            state,
            cache,
            suppression: Arc::new(SuppressionSet::default()),
            listeners: Arc::new(ListenerRegistry::new()),
            shutdown: CancellationToken::new(),
            reprocess: Arc::new(reprocess),
        }
    }

    /// Current settings
    pub fn settings(&self) -> EmbedSettings {
        self.state.read().settings.clone()
    }

    /// Ask every attached view to reprocess after the settle delay.
    pub fn request_reprocess(&self) -> usize {
        self.reprocess.send_modify(|generation| *generation += 1);
        let views = self.reprocess.receiver_count();
        trace!(views, "Reprocess requested");
        views
    }

    /// Receiver woken by [`ReconcileContext::request_reprocess`].
    pub fn subscribe_reprocess(&self) -> watch::Receiver<u64> {
        self.reprocess.subscribe()
    }

    /// Sender side of the reprocess signal, for the debug hook.
    pub(crate) fn reprocess_signal(&self) -> &Arc<watch::Sender<u64>> {
        &self.reprocess
    }
}

/// Augmented block carrying `identity` under `root`.
///
/// Lookups after an await go through here: retained node ids may have been
/// replaced by a host re-render in the meantime.
pub fn find_block(doc: &Document, root: NodeId, identity: &str) -> Option<NodeId> {
    if !doc.contains(root) {
        return None;
    }
    doc.query_attr(root, markers::ATTR_ID, identity)
        .into_iter()
        .find(|n| doc.has_class(*n, markers::HOST_EMBED))
}

/// Every augmented block carrying `identity` anywhere in the document.
pub fn find_blocks(doc: &Document, identity: &str) -> Vec<NodeId> {
    doc.query_attr(doc.root(), markers::ATTR_ID, identity)
        .into_iter()
        .filter(|n| doc.has_class(*n, markers::HOST_EMBED))
        .collect()
}
