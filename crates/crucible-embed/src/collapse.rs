//! Collapse state: block identity -> collapsed, persisted with the settings blob.
//!
//! Collapsing is a presentation rule ([`is_hidden`]), never a DOM removal, so
//! expanding is lossless. The host drops the presentation on every re-render,
//! which is why [`CollapseStore::apply_all`] runs at the end of each pass.

use crate::dom::{Document, NodeId};
use crate::error::Result;
use crate::markers;
use crate::title_bar;
use crucible_embed_config::{ConfigError, PersistedState, SettingsStore};
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::Mutex as AsyncMutex;
use tracing::{debug, error};

/// Persisted collapse flags.
#[derive(Clone)]
pub struct CollapseStore {
    state: Arc<RwLock<PersistedState>>,
    store: Arc<dyn SettingsStore>,
    save_lock: Arc<AsyncMutex<()>>,
}

impl CollapseStore {
    /// Store over the shared persisted state, saving through `store`.
    pub fn new(state: Arc<RwLock<PersistedState>>, store: Arc<dyn SettingsStore>) -> Self {
        Self {
            state,
            store,
            save_lock: Arc::new(AsyncMutex::new(())),
        }
    }

    /// Save the whole persisted state.
    ///
    /// Saves run one at a time and each snapshots the state only once it holds
    /// the save lock, so the blob written last is never older than one written
    /// before it.
    pub async fn persist(&self) -> std::result::Result<(), ConfigError> {
        let _guard = self.save_lock.lock().await;
        let snapshot = self.state.read().clone();
        snapshot.save_to(self.store.as_ref()).await
    }

    /// Whether `identity` is collapsed (false when unknown).
    pub fn get(&self, identity: &str) -> bool {
        self.state
            .read()
            .collapse_states
            .get(identity)
            .copied()
            .unwrap_or(false)
    }

    /// Record and persist the flag for `identity`.
    ///
    /// The in-memory flag is updated even when persisting fails; the failure is
    /// logged and reported as `false`.
    pub async fn set(&self, identity: &str, collapsed: bool) -> bool {
        self.state
            .write()
            .collapse_states
            .insert(identity.to_string(), collapsed);
        debug!(identity, collapsed, "Collapse state changed");

        match self.persist().await {
            Ok(()) => true,
            Err(e) => {
                error!(identity, "Failed to persist collapse state: {}", e);
                false
            }
        }
    }

    /// Every known entry
    pub fn entries(&self) -> BTreeMap<String, bool> {
        self.state.read().collapse_states.clone()
    }

    /// Re-apply stored flags to every augmented block under `root`.
    ///
    /// Blocks in an edit session keep their presentation. Returns how many
    /// blocks changed.
    pub fn apply_all(&self, doc: &mut Document, root: NodeId) -> usize {
        let blocks: Vec<(NodeId, String)> = doc
            .query_class(root, markers::BLOCK)
            .into_iter()
            .filter(|b| !doc.has_class(*b, markers::EDITING))
            .filter_map(|b| doc.attr(b, markers::ATTR_ID).map(|id| (b, id.to_string())))
            .collect();

        let states = self.entries();
        let mut changed = 0;
        for (block, identity) in blocks {
            let collapsed = states.get(&identity).copied().unwrap_or(false);
            match apply(doc, block, collapsed) {
                Ok(true) => changed += 1,
                Ok(false) => {}
                Err(e) => debug!(identity, "Skipping collapse for vanished block: {}", e),
            }
        }
        changed
    }
}

/// Put `block` into the collapsed or expanded presentation.
pub fn apply(doc: &mut Document, block: NodeId, collapsed: bool) -> Result<bool> {
    let changed = doc.toggle_class(block, markers::COLLAPSED, collapsed)?;
    if let Some(bar) = doc.child_with_class(block, markers::TITLE_BAR) {
        title_bar::set_collapse_icon(doc, bar, collapsed)?;
    }
    Ok(changed)
}

/// Whether `node` is hidden by a collapsed block or an inert holding container.
///
/// A collapsed block hides everything inside it except its own title bar.
pub fn is_hidden(doc: &Document, node: NodeId) -> bool {
    let mut child = node;
    for ancestor in doc.ancestors(node) {
        if doc.has_class(ancestor, markers::HOLDING) {
            return true;
        }
        if doc.has_class(ancestor, markers::COLLAPSED) && !doc.has_class(child, markers::TITLE_BAR)
        {
            return true;
        }
        child = ancestor;
    }
    doc.has_class(node, markers::HOLDING)
}
