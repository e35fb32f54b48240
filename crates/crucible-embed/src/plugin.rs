//! Plugin lifecycle: the object the host talks to.
//!
//! [`EmbedLens`] owns one [`ReconcileContext`] from `load` to `unload`, tracks
//! attached views with their background watcher and bootstrap tasks, and turns
//! host events and clicks into driver, collapse and edit operations. Nothing
//! here returns an error the host has to handle for rendering to keep working:
//! failures are logged and the native rendering stays in place.

use crate::collapse;
use crate::context::{find_blocks, ReconcileContext};
use crate::debug::{self, DebugHook};
use crate::dom::{NodeId, SharedDocument};
use crate::driver::{PassReport, Reconciler, ViewScope};
use crate::edit::EditSessions;
use crate::error::{EmbedError, Result};
use crate::events::{FileEvent, FileEventKind, WorkspaceEvent};
use crate::host::{FileRef, HostServices, Placement};
use crate::markers;
use crate::retry::RetryPolicy;
use crate::schedule::BootstrapStep;
use crate::title_bar::{ClickOutcome, Listener, TitleAction};
use crucible_embed_config::{EmbedSettings, PersistedState};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

struct AttachedView {
    scope: ViewScope,
    cancel: CancellationToken,
    watcher: JoinHandle<()>,
    bootstrap: JoinHandle<Option<BootstrapStep>>,
}

impl AttachedView {
    fn stop(&self) {
        self.cancel.cancel();
        self.watcher.abort();
        self.bootstrap.abort();
    }
}

/// The embedded-note overlay, as loaded into a host.
pub struct EmbedLens {
    ctx: Arc<ReconcileContext>,
    sessions: EditSessions,
    reconciler: Reconciler,
    views: Mutex<HashMap<String, AttachedView>>,
    _debug_hook: DebugHook,
}

impl EmbedLens {
    /// Load persisted state through the host and start an empty plugin.
    pub async fn load(host: HostServices, document: SharedDocument) -> Self {
        let state = PersistedState::load_from(host.settings.as_ref()).await;
        Self::with_state(host, document, state)
    }

    /// Start from an already loaded state.
    pub fn with_state(host: HostServices, document: SharedDocument, state: PersistedState) -> Self {
        let ctx = Arc::new(ReconcileContext::new(host, document, state));
        let sessions = EditSessions::new(ctx.clone());
        let reconciler = Reconciler::new(ctx.clone(), sessions.clone());
        let debug_hook = debug::register(&ctx);
        info!(
            collapse_entries = ctx.collapse.entries().len(),
            "Embed overlay loaded"
        );
        Self {
            ctx,
            sessions,
            reconciler,
            views: Mutex::new(HashMap::new()),
            _debug_hook: debug_hook,
        }
    }

    /// Override the link creation retry schedule for views attached from now on.
    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.reconciler = self.reconciler.with_retry_policy(policy);
        self
    }

    /// Shared context
    pub fn context(&self) -> &Arc<ReconcileContext> {
        &self.ctx
    }

    /// Edit sessions
    pub fn sessions(&self) -> &EditSessions {
        &self.sessions
    }

    /// The driver
    pub fn reconciler(&self) -> &Reconciler {
        &self.reconciler
    }

    /// Current settings
    pub fn settings(&self) -> EmbedSettings {
        self.ctx.settings()
    }

    /// Scopes of every attached view, sorted by view id.
    pub fn views(&self) -> Vec<(String, ViewScope)> {
        let mut views: Vec<(String, ViewScope)> = self
            .views
            .lock()
            .iter()
            .map(|(id, view)| (id.clone(), view.scope.clone()))
            .collect();
        views.sort_by(|a, b| a.0.cmp(&b.0));
        views
    }

    /// Start managing the note at `path` rendered under `root`.
    ///
    /// Runs one pass immediately, then leaves a mutation watcher and a bootstrap
    /// sweep running until the view is detached. Attaching an id again replaces
    /// the previous view.
    pub async fn attach_view(&self, view_id: &str, root: NodeId, path: &str) -> PassReport {
        self.detach_view(view_id);

        let scope = ViewScope::new(root, path);
        let subscription = self.ctx.document.lock().observe(root);
        let report = self.reconciler.reconcile_view(&scope).await;
        self.reconciler.log_report(&scope, "attach", &report);

        let cancel = self.ctx.shutdown.child_token();
        let watcher = tokio::spawn(self.reconciler.clone().watch(
            scope.clone(),
            subscription,
            cancel.clone(),
        ));
        let bootstrap = tokio::spawn(self.reconciler.clone().bootstrap(scope.clone(), cancel.clone()));

        info!(view = view_id, path, "Attached view");
        self.views.lock().insert(
            view_id.to_string(),
            AttachedView {
                scope,
                cancel,
                watcher,
                bootstrap,
            },
        );
        report
    }

    /// Stop managing a view. Returns whether it was attached.
    pub fn detach_view(&self, view_id: &str) -> bool {
        let Some(view) = self.views.lock().remove(view_id) else {
            return false;
        };
        view.stop();
        debug!(view = view_id, path = %view.scope.path, "Detached view");
        true
    }

    /// Whether the bootstrap sweep of a view has finished (stable, timed out or
    /// cancelled). `None` for unknown views.
    pub fn bootstrap_finished(&self, view_id: &str) -> Option<bool> {
        self.views
            .lock()
            .get(view_id)
            .map(|view| view.bootstrap.is_finished())
    }

    /// Host hook: `container` was just rendered.
    pub async fn on_render(&self, container: NodeId) -> PassReport {
        let Some(scope) = self.scope_containing(container) else {
            debug!(container = %container, "Render outside any attached view");
            return PassReport::default();
        };
        let report = self.reconciler.reconcile(&scope, container, 0).await;
        self.reconciler.log_report(&scope, "render", &report);
        report
    }

    /// Host hook: a view now shows the note at `path`.
    pub async fn on_file_open(&self, view_id: &str, root: NodeId, path: &str) -> PassReport {
        debug!(view = view_id, path, "File opened");
        self.attach_view(view_id, root, path).await
    }

    /// Host hook: workspace change. Returns the number of views signalled.
    pub fn on_workspace_event(&self, event: WorkspaceEvent) -> usize {
        debug!(?event, "Workspace event");
        self.ctx.request_reprocess()
    }

    /// A different view became active
    pub fn on_active_view_change(&self) -> usize {
        self.on_workspace_event(WorkspaceEvent::ActiveViewChanged)
    }

    /// Panes were rearranged
    pub fn on_layout_change(&self) -> usize {
        self.on_workspace_event(WorkspaceEvent::LayoutChanged)
    }

    /// The window or a pane was resized
    pub fn on_resize(&self) -> usize {
        self.on_workspace_event(WorkspaceEvent::Resized)
    }

    /// Host hook: vault file event. Returns whether a pass was scheduled.
    pub fn on_file_event(&self, event: &FileEvent) -> bool {
        match &event.kind {
            FileEventKind::Modified => {
                if self.ctx.suppression.is_suppressed(&event.path) {
                    debug!(path = %event.path, "Ignoring modify of a file being edited");
                    return false;
                }
            }
            FileEventKind::Created => self.ctx.cache.clear_broken(),
            FileEventKind::Renamed { from } => {
                debug!(from = %from, path = %event.path, "File renamed");
            }
        }
        for path in event.affected_paths() {
            self.ctx.cache.invalidate_path(path);
        }
        self.ctx.request_reprocess();
        true
    }

    /// Dispatch a click on `target` to the listener it bubbles to.
    pub async fn click(&self, target: NodeId) -> ClickOutcome {
        let found = {
            let doc = self.ctx.document.lock();
            self.ctx.listeners.lookup(&doc, target)
        };
        match found {
            Some((_, Listener::Title { identity, action })) => {
                let result = match action {
                    TitleAction::ToggleCollapse => self.toggle_collapse(&identity).await.map(|_| ()),
                    TitleAction::ToggleEdit => self.toggle_edit(&identity).await.map(|_| ()),
                    TitleAction::Jump => self.jump(&identity).await,
                };
                if let Err(e) = result {
                    warn!(identity = %identity, ?action, "Title bar action failed: {}", e);
                }
                ClickOutcome::Handled { identity, action }
            }
            Some((_, Listener::InterceptOpen)) => ClickOutcome::DefaultPrevented,
            None => ClickOutcome::NotHandled,
        }
    }

    /// Whether a keystroke on `target` must be kept from host shortcuts.
    pub fn should_isolate_key(&self, target: NodeId) -> bool {
        let doc = self.ctx.document.lock();
        EditSessions::should_isolate_key(&doc, target)
    }

    /// Flip the collapse flag of `identity`; returns the new flag.
    ///
    /// Blocks being edited keep their state.
    pub async fn toggle_collapse(&self, identity: &str) -> Result<bool> {
        let current = self.ctx.collapse.get(identity);
        if self.sessions.is_editing(identity) {
            debug!(identity, "Collapse ignored while editing");
            return Ok(current);
        }
        let blocks = {
            let doc = self.ctx.document.lock();
            find_blocks(&doc, identity)
        };
        if blocks.is_empty() {
            return Err(EmbedError::BlockNotFound(identity.to_string()));
        }

        let collapsed = !current;
        self.ctx.collapse.set(identity, collapsed).await;

        let mut doc = self.ctx.document.lock();
        for block in find_blocks(&doc, identity) {
            collapse::apply(&mut doc, block, collapsed)?;
        }
        Ok(collapsed)
    }

    /// Enter or leave editing; returns whether the block is now being edited.
    pub async fn toggle_edit(&self, identity: &str) -> Result<bool> {
        self.sessions.toggle(identity).await
    }

    /// Open the file embedded by `identity`.
    pub async fn jump(&self, identity: &str) -> Result<()> {
        let file = {
            let doc = self.ctx.document.lock();
            find_blocks(&doc, identity)
                .into_iter()
                .find_map(|b| doc.attr(b, markers::ATTR_FILE).map(FileRef::new))
        }
        .ok_or_else(|| EmbedError::BlockNotFound(identity.to_string()))?;

        let navigator = &self.ctx.host.navigator;
        let placement = if self.ctx.settings().jump_in_new_tab || !navigator.has_active_view() {
            Placement::NewTab
        } else {
            Placement::CurrentView
        };
        debug!(identity, path = %file, ?placement, "Jumping to embedded file");
        navigator.open(&file, placement).await
    }

    /// Validate, persist and apply new settings, rebuilding every title bar.
    /// Returns how many blocks were rebuilt.
    pub async fn update_settings(&self, settings: EmbedSettings) -> Result<usize> {
        settings.validate()?;
        self.ctx.state.write().settings = settings.clone();
        self.ctx.collapse.persist().await?;
        info!(settings = ?settings, "Settings updated");

        let mut rebuilt = 0;
        for (_, scope) in self.views() {
            let report = self.reconciler.reconcile_view(&scope).await;
            rebuilt += report.augmented;
        }
        Ok(rebuilt)
    }

    /// Signal every attached view to reprocess. Returns how many were signalled.
    pub fn force_reconcile(&self) -> usize {
        self.ctx.request_reprocess()
    }

    fn scope_containing(&self, node: NodeId) -> Option<ViewScope> {
        let doc = self.ctx.document.lock();
        self.views
            .lock()
            .values()
            .map(|view| &view.scope)
            .find(|scope| doc.is_within(node, scope.root))
            .cloned()
    }

    /// Tear everything down: stop background work, close edit sessions
    /// (saving), remove the overlay and listeners, and drop caches.
    pub async fn unload(self) {
        self.ctx.shutdown.cancel();
        let views: Vec<AttachedView> = self.views.lock().drain().map(|(_, v)| v).collect();
        for view in &views {
            view.stop();
        }

        self.sessions.exit_all().await;

        let mut stripped = 0;
        for view in &views {
            stripped += self.reconciler.strip_all(view.scope.root);
        }
        self.ctx.listeners.clear();
        self.ctx.cache.clear();
        self.ctx.suppression.clear();
        if self.ctx.state.read().settings.debug_mode {
            info!(views = views.len(), stripped, "Embed overlay unloaded");
        } else {
            debug!(views = views.len(), stripped, "Embed overlay unloaded");
        }
    }
}

impl Drop for AttachedView {
    fn drop(&mut self) {
        self.stop();
    }
}
