//! In-memory host doubles for tests.
//!
//! [`TestHost`] wires a [`MemoryVault`], recording navigator and notifier, and a
//! memory settings store into a [`ReconcileContext`], and renders notes through
//! the [`HostSimulator`] the same way a real host would.

use crate::context::ReconcileContext;
use crate::dom::{Document, NodeId, SharedDocument};
use crate::driver::{Reconciler, ViewScope};
use crate::edit::EditSessions;
use crate::error::{EmbedError, Result};
use crate::host::{FileRef, HostServices, Navigator, Notice, Notifier, Placement, Vault};
use crate::identity::{self, IdentityScope};
use crate::link::{self, LinkTarget};
use crate::markers;
use crate::retry::RetryPolicy;
use crate::title_bar::{self, TitleBarOptions};
use crate::vault::{resolve_path, HostSimulator, PulldownRenderer};
use async_trait::async_trait;
use crucible_embed_config::{MemorySettingsStore, PersistedState};
use parking_lot::{Mutex, RwLock};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::Duration;

/// Vault held in memory, recording every write.
#[derive(Debug, Default)]
pub struct MemoryVault {
    files: RwLock<BTreeMap<String, String>>,
    writes: Mutex<Vec<(String, String)>>,
    fail_writes: AtomicBool,
}

impl MemoryVault {
    /// Empty vault
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder form of [`MemoryVault::insert`]
    pub fn with_file(self, path: &str, content: &str) -> Self {
        self.insert(path, content);
        self
    }

    /// Create or replace a file without recording a write
    pub fn insert(&self, path: &str, content: &str) {
        self.files.write().insert(path.to_string(), content.to_string());
    }

    /// Delete a file
    pub fn remove(&self, path: &str) -> bool {
        self.files.write().remove(path).is_some()
    }

    /// Current content of `path`
    pub fn contents(&self, path: &str) -> Option<String> {
        self.files.read().get(path).cloned()
    }

    /// Every successful write, in order
    pub fn writes(&self) -> Vec<(String, String)> {
        self.writes.lock().clone()
    }

    /// Make subsequent writes fail
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }
}

#[async_trait]
impl Vault for MemoryVault {
    fn resolve_link(&self, link_path: &str, source_path: &str) -> Option<FileRef> {
        let paths: Vec<String> = self.files.read().keys().cloned().collect();
        resolve_path(&paths, link_path, source_path).map(FileRef::new)
    }

    async fn read(&self, file: &FileRef) -> Result<String> {
        self.contents(&file.path).ok_or_else(|| {
            EmbedError::Io(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                format!("{} does not exist", file.path),
            ))
        })
    }

    async fn write(&self, file: &FileRef, content: &str) -> Result<()> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(EmbedError::Host("disk is read-only".to_string()));
        }
        self.insert(&file.path, content);
        self.writes
            .lock()
            .push((file.path.clone(), content.to_string()));
        Ok(())
    }
}

/// Navigator recording what was opened.
#[derive(Debug)]
pub struct RecordingNavigator {
    opened: Mutex<Vec<(FileRef, Placement)>>,
    active_view: AtomicBool,
}

impl Default for RecordingNavigator {
    fn default() -> Self {
        Self {
            opened: Mutex::new(Vec::new()),
            active_view: AtomicBool::new(true),
        }
    }
}

impl RecordingNavigator {
    /// Everything opened so far
    pub fn opened(&self) -> Vec<(FileRef, Placement)> {
        self.opened.lock().clone()
    }

    /// Pretend there is (or is not) a current view
    pub fn set_active_view(&self, active: bool) {
        self.active_view.store(active, Ordering::SeqCst);
    }
}

#[async_trait]
impl Navigator for RecordingNavigator {
    fn has_active_view(&self) -> bool {
        self.active_view.load(Ordering::SeqCst)
    }

    async fn open(&self, file: &FileRef, placement: Placement) -> Result<()> {
        self.opened.lock().push((file.clone(), placement));
        Ok(())
    }
}

/// Notifier recording every notice.
#[derive(Debug, Default)]
pub struct RecordingNotifier {
    notices: Mutex<Vec<Notice>>,
}

impl RecordingNotifier {
    /// Notices shown so far
    pub fn notices(&self) -> Vec<Notice> {
        self.notices.lock().clone()
    }
}

impl Notifier for RecordingNotifier {
    fn notify(&self, notice: Notice) {
        self.notices.lock().push(notice);
    }
}

/// A complete in-memory host.
pub struct TestHost {
    vault: Arc<MemoryVault>,
    navigator: Arc<RecordingNavigator>,
    notifier: Arc<RecordingNotifier>,
    settings: Arc<MemorySettingsStore>,
    document: SharedDocument,
    state: PersistedState,
    context: OnceLock<Arc<ReconcileContext>>,
    sessions: OnceLock<EditSessions>,
}

impl Default for TestHost {
    fn default() -> Self {
        Self::new()
    }
}

impl TestHost {
    /// Empty vault, default settings
    pub fn new() -> Self {
        Self {
            vault: Arc::new(MemoryVault::new()),
            navigator: Arc::new(RecordingNavigator::default()),
            notifier: Arc::new(RecordingNotifier::default()),
            settings: Arc::new(MemorySettingsStore::new()),
            document: Document::new().into_shared(),
            state: PersistedState::default(),
            context: OnceLock::new(),
            sessions: OnceLock::new(),
        }
    }

    /// Add a file to the vault
    pub fn with_file(self, path: &str, content: &str) -> Self {
        self.vault.insert(path, content);
        self
    }

    /// Start from a previously persisted state
    pub fn with_state(mut self, state: PersistedState) -> Self {
        self.state = state;
        self
    }

    /// Host capabilities; rendering is plain markdown without embed loading
    pub fn services(&self) -> HostServices {
        HostServices {
            vault: self.vault.clone(),
            renderer: Arc::new(PulldownRenderer),
            navigator: self.navigator.clone(),
            notifier: self.notifier.clone(),
            settings: self.settings.clone(),
        }
    }

    /// Shared context, created on first use
    pub fn context(&self) -> Arc<ReconcileContext> {
        self.context
            .get_or_init(|| {
                Arc::new(ReconcileContext::new(
                    self.services(),
                    self.document.clone(),
                    self.state.clone(),
                ))
            })
            .clone()
    }

    /// Edit sessions shared with [`TestHost::reconciler`]
    pub fn sessions(&self) -> EditSessions {
        self.sessions
            .get_or_init(|| EditSessions::new(self.context()))
            .clone()
    }

    /// Driver with retries shortened to a few milliseconds
    pub fn reconciler(&self) -> Reconciler {
        Reconciler::new(self.context(), self.sessions()).with_retry_policy(RetryPolicy {
            max_attempts: 3,
            initial_delay: Duration::from_millis(10),
            multiplier: 2,
            max_delay: Duration::from_millis(40),
        })
    }

    /// The live document
    pub fn document(&self) -> &SharedDocument {
        &self.document
    }

    /// The vault
    pub fn vault(&self) -> &Arc<MemoryVault> {
        &self.vault
    }

    /// The navigator
    pub fn navigator(&self) -> &Arc<RecordingNavigator> {
        &self.navigator
    }

    /// The notifier
    pub fn notifier(&self) -> &Arc<RecordingNotifier> {
        &self.notifier
    }

    /// The settings store
    pub fn settings_store(&self) -> &Arc<MemorySettingsStore> {
        &self.settings
    }

    /// Simulated host over this vault and document
    pub fn simulator(&self) -> HostSimulator {
        HostSimulator::new(self.vault.clone(), self.document.clone())
    }

    /// A new, empty view for `path`.
    pub fn empty_view(&self, path: &str) -> ViewScope {
        let mut doc = self.document.lock();
        let root = doc.create_element_with_classes("div", &["markdown-preview-view"]);
        let top = doc.root();
        doc.append_child(top, root).expect("attach view root");
        ViewScope::new(root, path)
    }

    /// A view of `path` with every embed loaded by the host.
    pub async fn render_view(&self, path: &str) -> ViewScope {
        let scope = self.empty_view(path);
        self.simulator()
            .render_note(scope.root, path)
            .await
            .expect("render note");
        scope
    }

    /// A view of `path` whose embeds are marked loaded but were never filled,
    /// as a host does when it gives up on nested content.
    pub async fn render_view_shallow(&self, path: &str) -> ViewScope {
        let scope = self.empty_view(path);
        self.simulator()
            .render_note_shallow(scope.root, path)
            .await
            .expect("render note");
        let mut doc = self.document.lock();
        for embed in doc.query_class(scope.root, markers::HOST_EMBED) {
            doc.add_class(embed, markers::HOST_LOADED).expect("mark loaded");
        }
        scope
    }

    /// Build one augmented, loaded block embedding `path` via link `src`
    /// directly under the document root. Returns its identity.
    pub fn augmented_block(&self, src: &str, path: &str, content: &str) -> String {
        let ctx = self.context();
        let settings = ctx.settings();
        let mut doc = self.document.lock();
        let root = doc.root();

        let block = doc.create_element_with_classes("span", &[markers::HOST_EMBED, markers::HOST_LOADED]);
        doc.set_attr(block, markers::HOST_SRC, src).expect("src");
        let container = doc.create_element_with_classes("div", &[markers::HOST_CONTENT]);
        PulldownRenderer::render_into(&mut doc, container, content).expect("render");
        doc.append_child(block, container).expect("content");
        doc.append_child(root, block).expect("attach");

        let scope = IdentityScope {
            root,
            document_path: "D.md",
        };
        let id = identity::identity(&doc, scope, block, &link::target_name(src));
        doc.add_class(block, markers::BLOCK).expect("class");
        doc.set_attr(block, markers::ATTR_ID, &id).expect("id");
        doc.set_attr(block, markers::ATTR_DEPTH, "0").expect("depth");
        doc.set_attr(block, markers::ATTR_FILE, path).expect("file");

        let label = LinkTarget::parse(src).display();
        let options = TitleBarOptions {
            label: &label,
            identity: &id,
            depth: 0,
            collapsed: false,
            settings: &settings,
        };
        let bar = title_bar::build_title_bar(&mut doc, &options, &ctx.listeners).expect("title bar");
        doc.insert_child(block, 0, bar).expect("insert title bar");
        id
    }

    /// Block carrying `identity`, if any
    pub fn block(&self, identity: &str) -> Option<NodeId> {
        let doc = self.document.lock();
        crate::context::find_blocks(&doc, identity).into_iter().next()
    }
}
