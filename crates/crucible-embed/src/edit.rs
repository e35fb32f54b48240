//! In-place editing of embedded notes.
//!
//! Per block: `Idle -> Editing -> Idle`. Entering swaps the rendered content for
//! a raw-text editor seeded from the source file. The rendered nodes are parked
//! in a hidden holding container rather than deleted, so leaving without changes
//! restores them untouched. While editing, the block is frozen (the driver skips
//! it) and its file is claimed in the [`SuppressionSet`](crate::suppression::SuppressionSet).
//!
//! Every DOM lookup after an await goes back through the block identity.

use crate::classifier::is_overlay_node;
use crate::collapse;
use crate::context::{find_blocks, ReconcileContext};
use crate::dom::{Document, NodeId};
use crate::error::{EmbedError, Result};
use crate::host::{FileRef, Notice};
use crate::markers;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

struct Session {
    file: FileRef,
    original: String,
    buffer: String,
    dirty: bool,
    generation: u64,
    loaded: bool,
    content_in_block: bool,
    pending_save: Option<CancellationToken>,
}

impl Session {
    fn new(file: FileRef) -> Self {
        Self {
            file,
            original: String::new(),
            buffer: String::new(),
            dirty: false,
            generation: 0,
            loaded: false,
            content_in_block: false,
            pending_save: None,
        }
    }

    fn cancel_pending_save(&mut self) {
        if let Some(token) = self.pending_save.take() {
            token.cancel();
        }
    }
}

/// Snapshot of one session, for inspection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionInfo {
    /// Block identity
    pub identity: String,
    /// File being edited
    pub file: FileRef,
    /// Current buffer
    pub buffer: String,
    /// Unsaved changes present
    pub dirty: bool,
}

/// Manager of every edit session. Cheap to clone.
#[derive(Clone)]
pub struct EditSessions {
    ctx: Arc<ReconcileContext>,
    sessions: Arc<Mutex<HashMap<String, Session>>>,
}

impl EditSessions {
    /// Sessions over the shared context
    pub fn new(ctx: Arc<ReconcileContext>) -> Self {
        Self {
            ctx,
            sessions: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Whether `identity` has a session
    pub fn is_editing(&self, identity: &str) -> bool {
        self.sessions.lock().contains_key(identity)
    }

    /// Whether any session is open
    pub fn any_active(&self) -> bool {
        !self.sessions.lock().is_empty()
    }

    /// Identities with an open session
    pub fn active(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.sessions.lock().keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Snapshot of the session for `identity`
    pub fn info(&self, identity: &str) -> Option<SessionInfo> {
        self.sessions.lock().get(identity).map(|s| SessionInfo {
            identity: identity.to_string(),
            file: s.file.clone(),
            buffer: s.buffer.clone(),
            dirty: s.dirty,
        })
    }

    /// Whether a keystroke on `target` belongs to an editor and must not reach
    /// host shortcuts.
    pub fn should_isolate_key(doc: &Document, target: NodeId) -> bool {
        doc.closest(target, |d, n| d.has_class(n, markers::EDITOR))
            .is_some()
    }

    /// Enter or leave editing; returns whether the block is now being edited.
    pub async fn toggle(&self, identity: &str) -> Result<bool> {
        if self.is_editing(identity) {
            self.exit(identity).await?;
            Ok(false)
        } else {
            self.enter(identity).await
        }
    }

    /// Start editing the block `identity`.
    ///
    /// Returns `false` without doing anything when the block already has an
    /// editor or another session is editing the same file.
    pub async fn enter(&self, identity: &str) -> Result<bool> {
        let (file, collapsed, has_editor) = {
            let doc = self.ctx.document.lock();
            let block = first_block(&doc, identity)?;
            let path = doc
                .attr(block, markers::ATTR_FILE)
                .ok_or_else(|| EmbedError::BlockNotFound(identity.to_string()))?;
            (
                FileRef::new(path),
                doc.has_class(block, markers::COLLAPSED),
                doc.child_with_class(block, markers::EDITOR).is_some(),
            )
        };
        if has_editor {
            return Ok(false);
        }

        {
            let mut sessions = self.sessions.lock();
            if sessions.contains_key(identity) {
                return Ok(false);
            }
            if !self.ctx.suppression.begin_editing(&file.path, identity) {
                debug!(identity, path = %file, "File already being edited elsewhere");
                return Ok(false);
            }
            sessions.insert(identity.to_string(), Session::new(file.clone()));
        }

        if collapsed {
            self.ctx.collapse.set(identity, false).await;
        }
        self.with_blocks(identity, |doc, block| {
            if collapsed {
                collapse::apply(doc, block, false)?;
            }
            doc.set_attr(block, markers::ATTR_FROZEN, "true")?;
            doc.add_class(block, markers::EDITING)?;
            Ok(())
        });

        let content = match self.ctx.host.vault.read(&file).await {
            Ok(content) => content,
            Err(e) => {
                warn!(identity, path = %file, "Cannot read file for editing: {}", e);
                self.abandon(identity, &file);
                self.ctx
                    .host
                    .notifier
                    .notify(Notice::failure(format!("Cannot edit {}: {}", file.name(), e)));
                return Err(e);
            }
        };

        let installed = {
            let mut doc = self.ctx.document.lock();
            match first_block(&doc, identity) {
                Ok(block) if self.is_editing(identity) => {
                    install_editor(&mut doc, block, &content).map(Some)
                }
                _ => Ok(None),
            }
        };
        let content_in_block = match installed {
            Ok(Some(in_block)) => in_block,
            Ok(None) => {
                debug!(identity, "Block vanished before the editor was ready");
                self.abandon(identity, &file);
                return Err(EmbedError::BlockNotFound(identity.to_string()));
            }
            Err(e) => {
                self.abandon(identity, &file);
                return Err(e);
            }
        };

        if let Some(session) = self.sessions.lock().get_mut(identity) {
            session.original = content.clone();
            session.buffer = content;
            session.loaded = true;
            session.content_in_block = content_in_block;
        }
        info!(identity, path = %file, "Editing embed");
        Ok(true)
    }

    /// The user changed the buffer to `text`.
    pub async fn input(&self, identity: &str, text: &str) -> Result<()> {
        let settings = self.ctx.settings();
        let scheduled = {
            let mut sessions = self.sessions.lock();
            let session = sessions
                .get_mut(identity)
                .filter(|s| s.loaded)
                .ok_or_else(|| EmbedError::BlockNotFound(identity.to_string()))?;
            session.buffer = text.to_string();
            session.dirty = true;
            session.generation += 1;
            session.cancel_pending_save();
            if settings.manual_save_only {
                None
            } else {
                let token = self.ctx.shutdown.child_token();
                session.pending_save = Some(token.clone());
                Some((session.generation, token))
            }
        };

        self.with_blocks(identity, |doc, block| {
            if let Some(editor) = doc.child_with_class(block, markers::EDITOR) {
                doc.set_text_content(editor, text)?;
            }
            Ok(())
        });

        if let Some((generation, token)) = scheduled {
            let this = self.clone();
            let identity = identity.to_string();
            let delay = settings.auto_save_delay();
            tokio::spawn(async move {
                tokio::select! {
                    _ = token.cancelled() => {}
                    _ = tokio::time::sleep(delay) => {
                        this.save_if_current(&identity, generation).await;
                    }
                }
            });
        }
        Ok(())
    }

    /// Explicit save request.
    pub async fn save(&self, identity: &str) -> Result<()> {
        if let Some(session) = self.sessions.lock().get_mut(identity) {
            session.cancel_pending_save();
        }
        self.write_buffer(identity, true).await
    }

    /// Leave editing, saving first when required.
    ///
    /// A failed save keeps the session open with its buffer intact.
    pub async fn exit(&self, identity: &str) -> Result<bool> {
        let manual = self.ctx.settings().manual_save_only;
        let needs_save = {
            let mut sessions = self.sessions.lock();
            let Some(session) = sessions.get_mut(identity) else {
                return Ok(false);
            };
            session.cancel_pending_save();
            session.loaded && (manual || session.dirty)
        };
        if needs_save {
            self.write_buffer(identity, manual).await?;
        }

        let Some(session) = self.sessions.lock().remove(identity) else {
            return Ok(false);
        };
        if session.loaded {
            self.restore(identity, &session).await;
        } else {
            self.with_blocks(identity, |doc, block| unmark(doc, block));
        }
        self.ctx.suppression.end_editing(&session.file.path, identity);
        self.ctx.request_reprocess();
        info!(identity, path = %session.file, "Stopped editing embed");
        Ok(true)
    }

    /// Leave every session; failures are logged.
    pub async fn exit_all(&self) {
        for identity in self.active() {
            if let Err(e) = self.exit(&identity).await {
                error!(identity, "Failed to leave edit session: {}", e);
                let removed = self.sessions.lock().remove(&identity);
                if let Some(mut session) = removed {
                    session.cancel_pending_save();
                    self.ctx
                        .suppression
                        .end_editing(&session.file.path, &identity);
                }
            }
        }
    }

    async fn save_if_current(&self, identity: &str, generation: u64) {
        let current = self
            .sessions
            .lock()
            .get(identity)
            .map(|s| s.generation == generation && s.dirty)
            .unwrap_or(false);
        if !current {
            return;
        }
        // Failures are already reported to the user; the buffer stays dirty.
        let _ = self.write_buffer(identity, false).await;
    }

    async fn write_buffer(&self, identity: &str, explicit: bool) -> Result<()> {
        let (file, buffer, generation) = {
            let sessions = self.sessions.lock();
            let session = sessions
                .get(identity)
                .filter(|s| s.loaded)
                .ok_or_else(|| EmbedError::BlockNotFound(identity.to_string()))?;
            (
                session.file.clone(),
                session.buffer.clone(),
                session.generation,
            )
        };

        match self.ctx.host.vault.write(&file, &buffer).await {
            Ok(()) => {
                self.ctx.suppression.note_saved(&file.path);
                self.ctx.cache.invalidate_path(&file.path);
                if let Some(session) = self.sessions.lock().get_mut(identity) {
                    if session.generation == generation {
                        session.dirty = false;
                    }
                }
                debug!(identity, path = %file, "Saved embed");
                if explicit {
                    self.ctx
                        .host
                        .notifier
                        .notify(Notice::success(format!("Saved {}", file.name())));
                }
                Ok(())
            }
            Err(e) => {
                error!(identity, path = %file, "Failed to save embed: {}", e);
                self.ctx
                    .host
                    .notifier
                    .notify(Notice::failure(format!("Failed to save {}", file.name())));
                Err(EmbedError::SaveFailed {
                    path: file.path,
                    reason: e.to_string(),
                })
            }
        }
    }

    /// Put rendered content back, re-rendering when the text changed.
    async fn restore(&self, identity: &str, session: &Session) {
        let changed = session.buffer != session.original;
        let target = {
            let mut doc = self.ctx.document.lock();
            let Ok(block) = first_block(&doc, identity) else {
                return;
            };
            let content = if session.content_in_block {
                Some(block)
            } else {
                doc.child_with_class(block, markers::HOST_CONTENT)
            };
            let holding = doc.child_with_class(block, markers::HOLDING);

            match (content, holding) {
                (Some(content), Some(holding)) if !changed => {
                    if let Err(e) = restore_holding(&mut doc, block, content, holding) {
                        warn!(identity, "Failed to restore rendered content: {}", e);
                    }
                    return;
                }
                (Some(content), _) => clear_content(&mut doc, content).map(|_| content),
                (None, _) => new_content_container(&mut doc, block),
            }
        };
        let target = match target {
            Ok(target) => target,
            Err(e) => {
                warn!(identity, "No place to restore content: {}", e);
                self.degrade(identity);
                return;
            }
        };

        let rendered = self
            .ctx
            .host
            .renderer
            .render(
                &session.buffer,
                target,
                &self.ctx.document,
                &session.file.path,
            )
            .await;
        match rendered {
            Ok(()) => {
                self.with_blocks(identity, |doc, block| {
                    remove_editor_parts(doc, block)?;
                    unmark(doc, block)
                });
            }
            Err(e) => {
                warn!(identity, "Re-render after edit failed, editor left read-only: {}", e);
                self.degrade(identity);
            }
        }
    }

    fn degrade(&self, identity: &str) {
        self.with_blocks(identity, |doc, block| {
            if let Some(editor) = doc.child_with_class(block, markers::EDITOR) {
                doc.set_attr(editor, "readonly", "true")?;
            }
            unmark(doc, block)
        });
    }

    /// Undo a half-finished enter.
    fn abandon(&self, identity: &str, file: &FileRef) {
        self.sessions.lock().remove(identity);
        self.ctx.suppression.end_editing(&file.path, identity);
        self.with_blocks(identity, |doc, block| unmark(doc, block));
    }

    /// Run `f` on every block carrying `identity`, logging failures.
    fn with_blocks(&self, identity: &str, mut f: impl FnMut(&mut Document, NodeId) -> Result<()>) {
        let mut doc = self.ctx.document.lock();
        for block in find_blocks(&doc, identity) {
            if let Err(e) = f(&mut doc, block) {
                debug!(identity, "Block update skipped: {}", e);
            }
        }
    }
}

fn first_block(doc: &Document, identity: &str) -> Result<NodeId> {
    find_blocks(doc, identity)
        .into_iter()
        .next()
        .ok_or_else(|| EmbedError::BlockNotFound(identity.to_string()))
}

/// Park the rendered content and put an editor in its place.
///
/// Returns whether the content lived directly in the block (no content container).
fn install_editor(doc: &mut Document, block: NodeId, text: &str) -> Result<bool> {
    let content = doc.child_with_class(block, markers::HOST_CONTENT);
    let source = content.unwrap_or(block);

    let holding = doc.create_element_with_classes("div", &[markers::HOLDING]);
    doc.set_attr(holding, "hidden", "true")?;
    let parked: Vec<NodeId> = doc
        .children(source)
        .iter()
        .copied()
        .filter(|c| !is_overlay_node(doc, *c))
        .collect();
    for node in parked {
        doc.append_child(holding, node)?;
    }

    let editor = doc.create_element_with_classes("textarea", &[markers::EDITOR]);
    let buffer = doc.create_text(text);
    doc.append_child(editor, buffer)?;

    let after_title = doc
        .children(block)
        .iter()
        .position(|c| doc.has_class(*c, markers::TITLE_BAR))
        .map(|i| i + 1)
        .unwrap_or(0);
    doc.insert_child(block, after_title, editor)?;
    doc.insert_child(block, after_title + 1, holding)?;
    doc.focus(Some(editor));
    Ok(content.is_none())
}

fn restore_holding(doc: &mut Document, block: NodeId, content: NodeId, holding: NodeId) -> Result<()> {
    let parked = doc.children(holding).to_vec();
    for node in parked {
        doc.append_child(content, node)?;
    }
    remove_editor_parts(doc, block)?;
    unmark(doc, block)
}

fn clear_content(doc: &mut Document, content: NodeId) -> Result<()> {
    let stale: Vec<NodeId> = doc
        .children(content)
        .iter()
        .copied()
        .filter(|c| !is_overlay_node(doc, *c))
        .collect();
    for node in stale {
        doc.remove(node)?;
    }
    Ok(())
}

fn new_content_container(doc: &mut Document, block: NodeId) -> Result<NodeId> {
    let container = doc.create_element_with_classes("div", &[markers::HOST_CONTENT]);
    doc.append_child(block, container)?;
    Ok(container)
}

fn remove_editor_parts(doc: &mut Document, block: NodeId) -> Result<()> {
    for class in [markers::EDITOR, markers::HOLDING] {
        if let Some(node) = doc.child_with_class(block, class) {
            doc.remove(node)?;
        }
    }
    Ok(())
}

fn unmark(doc: &mut Document, block: NodeId) -> Result<()> {
    doc.remove_attr(block, markers::ATTR_FROZEN)?;
    doc.remove_class(block, markers::EDITING)?;
    if let Some(focused) = doc.focused() {
        if doc.is_within(focused, block) && EditSessions::should_isolate_key(doc, focused) {
            doc.focus(None);
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::TestHost;

    async fn editing_setup(content: &str) -> (TestHost, EditSessions, String) {
        let host = TestHost::new().with_file("A.md", content);
        let identity = host.augmented_block("A", "A.md", content);
        let sessions = EditSessions::new(host.context());
        (host, sessions, identity)
    }

    #[tokio::test]
    async fn test_enter_parks_content_and_seeds_raw_text() {
        let (host, sessions, id) = editing_setup("# Raw *markdown*").await;
        assert!(sessions.enter(&id).await.unwrap());

        let doc = host.document().lock();
        let block = first_block(&doc, &id).unwrap();
        let editor = doc.child_with_class(block, markers::EDITOR).unwrap();
        assert_eq!(doc.text_content(editor), "# Raw *markdown*");
        assert!(doc.child_with_class(block, markers::HOLDING).is_some());
        assert_eq!(doc.attr(block, markers::ATTR_FROZEN), Some("true"));
        assert!(host.context().suppression.is_editing("A.md"));
        assert_eq!(doc.focused(), Some(editor));
    }

    #[tokio::test]
    async fn test_second_enter_is_noop() {
        let (_host, sessions, id) = editing_setup("text").await;
        assert!(sessions.enter(&id).await.unwrap());
        assert!(!sessions.enter(&id).await.unwrap());
        assert_eq!(sessions.active(), vec![id]);
    }

    #[tokio::test]
    async fn test_exit_without_changes_restores_original_nodes() {
        let (host, sessions, id) = editing_setup("text").await;
        let before = {
            let doc = host.document().lock();
            let block = first_block(&doc, &id).unwrap();
            let content = doc.child_with_class(block, markers::HOST_CONTENT).unwrap();
            doc.children(content).to_vec()
        };

        sessions.enter(&id).await.unwrap();
        assert!(sessions.exit(&id).await.unwrap());

        let doc = host.document().lock();
        let block = first_block(&doc, &id).unwrap();
        let content = doc.child_with_class(block, markers::HOST_CONTENT).unwrap();
        assert_eq!(doc.children(content), before.as_slice());
        assert!(doc.child_with_class(block, markers::EDITOR).is_none());
        assert!(!doc.has_class(block, markers::EDITING));
        assert!(host.vault().writes().is_empty());
    }

    #[tokio::test]
    async fn test_should_isolate_key_inside_editor_only() {
        let (host, sessions, id) = editing_setup("text").await;
        sessions.enter(&id).await.unwrap();

        let doc = host.document().lock();
        let block = first_block(&doc, &id).unwrap();
        let editor = doc.child_with_class(block, markers::EDITOR).unwrap();
        let text = doc.children(editor)[0];
        assert!(EditSessions::should_isolate_key(&doc, text));
        assert!(!EditSessions::should_isolate_key(&doc, block));
    }

    #[tokio::test(start_paused = true)]
    async fn test_debounced_save_is_superseded() {
        let (host, sessions, id) = editing_setup("A").await;
        sessions.enter(&id).await.unwrap();

        sessions.input(&id, "AB").await.unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(600)).await;
        sessions.input(&id, "ABC").await.unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(1100)).await;

        assert_eq!(host.vault().writes(), vec![("A.md".to_string(), "ABC".to_string())]);
        assert!(!sessions.info(&id).unwrap().dirty);
    }

    #[tokio::test]
    async fn test_manual_mode_saves_on_exit() {
        let (host, sessions, id) = editing_setup("A").await;
        host.context().state.write().settings.manual_save_only = true;
        sessions.enter(&id).await.unwrap();
        sessions.input(&id, "B").await.unwrap();
        assert!(host.vault().writes().is_empty());

        sessions.exit(&id).await.unwrap();
        assert_eq!(host.vault().contents("A.md").as_deref(), Some("B"));
    }

    #[tokio::test]
    async fn test_failed_save_keeps_session_and_buffer() {
        let (host, sessions, id) = editing_setup("A").await;
        sessions.enter(&id).await.unwrap();
        sessions.input(&id, "B").await.unwrap();
        host.vault().set_fail_writes(true);

        let err = sessions.exit(&id).await.unwrap_err();
        assert!(matches!(err, EmbedError::SaveFailed { .. }));
        assert!(sessions.is_editing(&id));
        assert_eq!(sessions.info(&id).unwrap().buffer, "B");
        assert!(host
            .notifier()
            .notices()
            .iter()
            .any(|n| n.kind == crate::host::NoticeKind::Failure));

        host.vault().set_fail_writes(false);
        sessions.exit(&id).await.unwrap();
        assert_eq!(host.vault().contents("A.md").as_deref(), Some("B"));
    }
}
