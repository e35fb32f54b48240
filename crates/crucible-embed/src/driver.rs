//! Reconciliation driver.
//!
//! Brings host-rendered embed blocks under a view root to the augmented state
//! and keeps them there. Three triggers feed it:
//!
//! - the host's post-render hook, handled immediately ([`Reconciler::reconcile`])
//! - the per-view mutation watcher ([`Reconciler::watch`]), which debounces
//!   relevant additions through a [`SettleScheduler`] and re-checks title bars
//!   as soon as the host marks an embed loaded
//! - the bootstrap sweep ([`Reconciler::bootstrap`]), repeating passes until the
//!   augmented count stops changing
//!
//! Passes are idempotent: a block that already carries the right identity,
//! depth, file and title bar is left alone, so a second pass over a converged
//! tree makes no DOM changes. Blocks are processed shallowest first so a
//! parent is always augmented before its children are looked at.

use crate::classifier::{is_embed_block, is_overlay_node};
use crate::collapse;
use crate::context::{find_block, ReconcileContext};
use crate::dom::{Document, MutationRecord, MutationSubscription, NodeId};
use crate::edit::EditSessions;
use crate::error::{EmbedError, Result};
use crate::host::FileRef;
use crate::identity::{self, IdentityScope};
use crate::link::{self, LinkTarget};
use crate::markers;
use crate::nesting;
use crate::retry::{RetryOutcome, RetryPolicy, RetryTask};
use crate::schedule::{BootstrapStep, BootstrapTracker, SettleScheduler, BOOTSTRAP_INTERVAL};
use crate::title_bar::{self, TitleBarOptions};
use crucible_embed_config::EmbedSettings;
use futures::future::{BoxFuture, FutureExt};
use std::future::Future;
use std::sync::Arc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

/// Nested fallback rendering stops after this many levels.
pub const MAX_RECURSION_DEPTH: usize = 5;

/// One document view: the subtree the host renders a note into.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ViewScope {
    /// Root node of the view
    pub root: NodeId,
    /// Path of the note shown
    pub path: String,
}

impl ViewScope {
    /// Scope for the note at `path` rendered under `root`
    pub fn new(root: NodeId, path: impl Into<String>) -> Self {
        Self {
            root,
            path: path.into(),
        }
    }

    fn identity_scope(&self) -> IdentityScope<'_> {
        IdentityScope {
            root: self.root,
            document_path: &self.path,
        }
    }
}

/// What a pass did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PassReport {
    /// Blocks that received (or had rebuilt) their overlay
    pub augmented: usize,
    /// Blocks left alone: images, malformed or pending links, frozen blocks
    pub skipped: usize,
    /// Blocks whose overlay was removed
    pub stripped: usize,
    /// Blocks already fully augmented
    pub unchanged: usize,
    /// Content containers rendered by the fallback path
    pub rendered: usize,
    /// The pass did nothing because editing is in progress
    pub suppressed: bool,
}

impl PassReport {
    fn suppressed() -> Self {
        Self {
            suppressed: true,
            ..Default::default()
        }
    }

    /// Whether the pass touched the DOM
    pub fn changed(&self) -> bool {
        self.augmented > 0 || self.stripped > 0 || self.rendered > 0
    }

    fn merge(&mut self, other: PassReport) {
        self.augmented += other.augmented;
        self.skipped += other.skipped;
        self.stripped += other.stripped;
        self.unchanged += other.unchanged;
        self.rendered += other.rendered;
        self.suppressed |= other.suppressed;
    }

    fn count(&mut self, outcome: BlockOutcome) {
        match outcome {
            BlockOutcome::Augmented => self.augmented += 1,
            BlockOutcome::Unchanged => self.unchanged += 1,
            BlockOutcome::Skipped => self.skipped += 1,
            BlockOutcome::Stripped => self.stripped += 1,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BlockOutcome {
    Augmented,
    Unchanged,
    Skipped,
    Stripped,
}

/// How the watcher reacts to a mutation record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Relevance {
    /// Nothing to do (including every change made by the overlay itself)
    Ignore,
    /// New embeds or content appeared; reprocess after the settle delay
    Reprocess,
    /// The host finished loading, or stripped children of, this block
    VerifyTitleBar(NodeId),
}

/// Classify a mutation record.
pub fn relevance(doc: &Document, record: &MutationRecord) -> Relevance {
    let target = record.target();
    if !doc.contains(target) || inside_overlay(doc, target) {
        return Relevance::Ignore;
    }

    match record {
        MutationRecord::ChildList { added, removed, .. } => {
            let grew = added
                .iter()
                .any(|n| doc.contains(*n) && !is_overlay_node(doc, *n) && carries_embeds(doc, *n));
            if grew {
                return Relevance::Reprocess;
            }
            let lost_title = !removed.is_empty()
                && doc.has_class(target, markers::BLOCK)
                && doc.child_with_class(target, markers::TITLE_BAR).is_none();
            if lost_title {
                Relevance::VerifyTitleBar(target)
            } else {
                Relevance::Ignore
            }
        }
        MutationRecord::Attribute {
            name, old_value, ..
        } => {
            if !is_embed_block(doc, target) {
                return Relevance::Ignore;
            }
            if name == markers::HOST_SRC {
                return Relevance::Reprocess;
            }
            if name != "class" {
                return Relevance::Ignore;
            }
            let was_loaded = old_value
                .as_deref()
                .unwrap_or("")
                .split_whitespace()
                .any(|c| c == markers::HOST_LOADED);
            if !was_loaded && doc.has_class(target, markers::HOST_LOADED) {
                Relevance::VerifyTitleBar(target)
            } else {
                Relevance::Ignore
            }
        }
    }
}

fn inside_overlay(doc: &Document, node: NodeId) -> bool {
    doc.closest(node, |d, n| {
        d.has_class(n, markers::EDITOR) || d.has_class(n, markers::HOLDING) || d.has_class(n, markers::TITLE_BAR)
    })
    .is_some()
}

fn carries_embeds(doc: &Document, node: NodeId) -> bool {
    let interesting = |n: NodeId| is_embed_block(doc, n) || doc.has_class(n, markers::HOST_CONTENT);
    interesting(node) || doc.descendants(node).into_iter().any(interesting)
}

/// A text embed left without content by the host.
#[derive(Debug, Clone)]
struct FallbackJob {
    identity: String,
    file: FileRef,
}

#[derive(Debug, Clone)]
struct RetryJob {
    key: String,
    link_path: String,
    source_path: String,
}

#[derive(Default)]
struct PassWork {
    fallbacks: Vec<FallbackJob>,
    retries: Vec<RetryJob>,
}

/// The orchestrating reconciliation loop. Cheap to clone.
#[derive(Clone)]
pub struct Reconciler {
    ctx: Arc<ReconcileContext>,
    sessions: EditSessions,
    retry_policy: RetryPolicy,
}

impl Reconciler {
    /// Driver over the shared context; passes are suppressed while `sessions` has
    /// anything open.
    pub fn new(ctx: Arc<ReconcileContext>, sessions: EditSessions) -> Self {
        Self {
            ctx,
            sessions,
            retry_policy: RetryPolicy::default(),
        }
    }

    /// Override the creation retry policy
    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry_policy = policy;
        self
    }

    /// Shared context
    pub fn context(&self) -> &Arc<ReconcileContext> {
        &self.ctx
    }

    /// Why reconciliation must not touch the document right now, if it must not.
    pub fn suppression_reason(&self, doc: &Document) -> Option<&'static str> {
        if self.sessions.any_active() {
            return Some("edit session active");
        }
        if doc
            .descendants(doc.root())
            .into_iter()
            .any(|n| doc.attr(n, markers::ATTR_FROZEN).is_some())
        {
            return Some("frozen block present");
        }
        let focused = doc.focused()?;
        if EditSessions::should_isolate_key(doc, focused) {
            return Some("focus in embed editor");
        }
        let in_host_editor = doc
            .closest(focused, |d, n| d.has_class(n, markers::HOST_EDITOR))
            .is_some_and(|editor| nesting::parent_embed(doc, editor).is_some());
        in_host_editor.then_some("focus in embedded editor")
    }

    /// Full pass over a view.
    pub async fn reconcile_view(&self, scope: &ViewScope) -> PassReport {
        self.reconcile(scope, scope.root, 0).await
    }

    /// Pass over `root` (the view root, a freshly rendered container, or a
    /// single block) within `scope`.
    pub fn reconcile<'a>(
        &'a self,
        scope: &'a ViewScope,
        root: NodeId,
        recursion: usize,
    ) -> BoxFuture<'a, PassReport> {
        async move {
            let (mut report, work) = self.augment_pass(scope, root);
            self.spawn_retries(work.retries);
            if report.suppressed {
                return report;
            }

            for job in work.fallbacks {
                let container = match self.fallback_render(scope, &job).await {
                    Ok(Some(container)) => container,
                    Ok(None) => continue,
                    Err(e) => {
                        warn!(identity = %job.identity, path = %job.file, "Fallback render failed: {}", e);
                        continue;
                    }
                };
                report.rendered += 1;

                if recursion + 1 >= MAX_RECURSION_DEPTH {
                    warn!(
                        identity = %job.identity,
                        "{}; nested embeds left unaugmented",
                        EmbedError::RecursionLimit(MAX_RECURSION_DEPTH)
                    );
                    continue;
                }
                let nested = self.reconcile(scope, container, recursion + 1).await;
                report.merge(nested);
            }
            report
        }
        .boxed()
    }

    /// Synchronous part of a pass: classify and augment under one lock.
    fn augment_pass(&self, scope: &ViewScope, root: NodeId) -> (PassReport, PassWork) {
        let mut work = PassWork::default();
        let mut doc = self.ctx.document.lock();
        if !doc.contains(root) || !doc.is_within(root, scope.root) {
            return (PassReport::default(), work);
        }
        if let Some(reason) = self.suppression_reason(&doc) {
            trace!(reason, view = %scope.path, "Reconciliation suppressed");
            return (PassReport::suppressed(), work);
        }

        self.ctx.cache.begin_pass();
        let settings = self.ctx.settings();
        let mut blocks = Vec::new();
        if is_embed_block(&doc, root) {
            blocks.push(root);
        }
        blocks.extend(nesting::embeds_by_depth(&doc, root));

        let mut report = PassReport::default();
        for block in blocks {
            match self.reconcile_block(&mut doc, scope, block, &settings, &mut work) {
                Ok(outcome) => report.count(outcome),
                Err(e) => {
                    debug!(block = %block, "Block skipped: {}", e);
                    report.skipped += 1;
                }
            }
        }

        self.ctx.collapse.apply_all(&mut doc, scope.root);
        self.ctx.listeners.prune(&doc);
        (report, work)
    }

    fn reconcile_block(
        &self,
        doc: &mut Document,
        scope: &ViewScope,
        block: NodeId,
        settings: &EmbedSettings,
        work: &mut PassWork,
    ) -> Result<BlockOutcome> {
        if doc.attr(block, markers::ATTR_FROZEN).is_some() || doc.has_class(block, markers::EDITING) {
            return Ok(BlockOutcome::Skipped);
        }
        let Some(src) = doc.attr(block, markers::HOST_SRC).map(str::to_string) else {
            return Ok(BlockOutcome::Skipped);
        };
        if let Err(reason) = link::check_syntax(&src) {
            debug!(src, ?reason, "Skipping malformed embed link");
            return Ok(BlockOutcome::Skipped);
        }

        // Links inside an embedded note resolve relative to that note
        let source_path = nesting::parent_embed(doc, block)
            .and_then(|p| doc.attr(p, markers::ATTR_FILE))
            .unwrap_or(scope.path.as_str())
            .to_string();

        let kind = self.ctx.classifier.classify(doc, block, &source_path);
        if !kind.is_augmentable() {
            return self.strip_outcome(doc, block);
        }

        let target = LinkTarget::parse(&src);
        let Some(file) = self.ctx.host.vault.resolve_link(&target.path, &source_path) else {
            return self.unresolved(doc, block, &target, &source_path, work);
        };

        let depth = nesting::depth(doc, block);
        let identity = identity::identity(doc, scope.identity_scope(), block, &link::target_name(&src));
        let label = target.display();

        let outcome = if is_fully_augmented(doc, block, &identity, depth, &file, &label, settings) {
            BlockOutcome::Unchanged
        } else {
            self.augment(doc, block, &identity, depth, &file, &label, settings)?;
            debug!(identity = %identity, depth, path = %file, "Augmented embed");
            BlockOutcome::Augmented
        };
        title_bar::intercept_open_links(doc, block, &self.ctx.listeners);

        if needs_fallback(doc, block) && self.ctx.cache.mark_structurally_processed(&file.path) {
            work.fallbacks.push(FallbackJob { identity, file });
        }
        Ok(outcome)
    }

    fn unresolved(
        &self,
        doc: &mut Document,
        block: NodeId,
        target: &LinkTarget,
        source_path: &str,
        work: &mut PassWork,
    ) -> Result<BlockOutcome> {
        let key = format!("{source_path}|{}", target.path);
        if !self.ctx.cache.is_broken(&key) && link::is_plausible_name(target) {
            if !self.ctx.cache.is_retrying(&key) {
                work.retries.push(RetryJob {
                    key,
                    link_path: target.path.clone(),
                    source_path: source_path.to_string(),
                });
            }
            return Ok(BlockOutcome::Skipped);
        }

        if !self.ctx.cache.is_broken(&key) {
            debug!(link = %target.path, source = source_path, "Link is broken");
            self.ctx.cache.mark_broken(&key);
        }
        self.strip_outcome(doc, block)
    }

    fn strip_outcome(&self, doc: &mut Document, block: NodeId) -> Result<BlockOutcome> {
        if strip(doc, block, &self.ctx)? {
            Ok(BlockOutcome::Stripped)
        } else {
            Ok(BlockOutcome::Skipped)
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn augment(
        &self,
        doc: &mut Document,
        block: NodeId,
        identity: &str,
        depth: usize,
        file: &FileRef,
        label: &str,
        settings: &EmbedSettings,
    ) -> Result<()> {
        for bar in title_bars(doc, block) {
            self.ctx.listeners.remove_within(doc, bar);
            doc.remove(bar)?;
        }

        doc.add_class(block, markers::BLOCK)?;
        doc.set_attr(block, markers::ATTR_ID, identity)?;
        doc.set_attr(block, markers::ATTR_DEPTH, &depth.to_string())?;
        doc.set_attr(block, markers::ATTR_FILE, &file.path)?;

        let collapsed = self.ctx.collapse.get(identity);
        let options = TitleBarOptions {
            label,
            identity,
            depth,
            collapsed,
            settings,
        };
        let bar = title_bar::build_title_bar(doc, &options, &self.ctx.listeners)?;
        doc.insert_child(block, 0, bar)?;
        collapse::apply(doc, block, collapsed)?;
        Ok(())
    }

    async fn fallback_render(&self, scope: &ViewScope, job: &FallbackJob) -> Result<Option<NodeId>> {
        let content = self.ctx.host.vault.read(&job.file).await?;

        // The host may have re-rendered or filled the block while we read
        let container = {
            let mut doc = self.ctx.document.lock();
            let Some(block) = find_block(&doc, scope.root, &job.identity) else {
                return Ok(None);
            };
            if !needs_fallback(&doc, block) || doc.attr(block, markers::ATTR_FROZEN).is_some() {
                return Ok(None);
            }
            let container = doc.create_element_with_classes("div", &[markers::HOST_CONTENT]);
            doc.set_attr(container, markers::ATTR_FALLBACK, "true")?;
            doc.append_child(block, container)?;
            container
        };

        debug!(identity = %job.identity, path = %job.file, "Rendering missing embed content");
        self.ctx
            .host
            .renderer
            .render(&content, container, &self.ctx.document, &job.file.path)
            .await?;
        Ok(Some(container))
    }

    fn spawn_retries(&self, jobs: Vec<RetryJob>) {
        for job in jobs {
            if !self.ctx.cache.begin_retry(&job.key) {
                continue;
            }
            debug!(link = %job.link_path, "Link unresolved, waiting for the file to appear");

            let ctx = self.ctx.clone();
            let task = RetryTask::new(self.retry_policy, ctx.shutdown.child_token());
            tokio::spawn(async move {
                let vault = ctx.host.vault.clone();
                let cache = ctx.cache.clone();
                let key = job.key.clone();
                let link_path = job.link_path.clone();
                let outcome = task
                    .run(
                        |_| {
                            let found = vault.resolve_link(&job.link_path, &job.source_path);
                            async move { found }
                        },
                        |attempts| {
                            warn!(link = %link_path, attempts, "Giving up on unresolved link");
                            cache.mark_broken(&key);
                        },
                    )
                    .await;

                ctx.cache.end_retry(&job.key);
                match outcome {
                    RetryOutcome::Succeeded { value, attempts } => {
                        debug!(path = %value, attempts, "Link resolved");
                        ctx.request_reprocess();
                    }
                    RetryOutcome::Exhausted { .. } => {
                        ctx.request_reprocess();
                    }
                    RetryOutcome::Cancelled => {}
                }
            });
        }
    }

    /// Re-check one block after the host touched it; returns whether anything changed.
    pub async fn verify_title_bar(&self, scope: &ViewScope, block: NodeId) -> bool {
        let needed = {
            let doc = self.ctx.document.lock();
            doc.contains(block)
                && doc.is_within(block, scope.root)
                && doc.child_with_class(block, markers::TITLE_BAR).is_none()
        };
        if !needed {
            return false;
        }
        let report = self.reconcile(scope, block, 0).await;
        if report.augmented > 0 {
            debug!(block = %block, "Reinserted title bar");
        }
        report.changed()
    }

    /// Augmented blocks in the view
    pub fn augmented_count(&self, scope: &ViewScope) -> usize {
        let doc = self.ctx.document.lock();
        if !doc.contains(scope.root) {
            return 0;
        }
        doc.query_class(scope.root, markers::BLOCK).len()
    }

    /// Remove every overlay under `root`. Returns how many blocks were stripped.
    pub fn strip_all(&self, root: NodeId) -> usize {
        let mut doc = self.ctx.document.lock();
        if !doc.contains(root) {
            return 0;
        }
        let blocks = doc.query_class(root, markers::BLOCK);
        blocks
            .into_iter()
            .filter(|b| match strip(&mut doc, *b, &self.ctx) {
                Ok(changed) => changed,
                Err(e) => {
                    debug!("Strip failed: {}", e);
                    false
                }
            })
            .count()
    }

    /// Mutation watcher for one view; runs until cancelled or the
    /// subscription closes.
    ///
    /// The reprocess signal is subscribed before the future is first polled, so
    /// the view counts as attached as soon as this returns.
    pub fn watch(
        self,
        scope: ViewScope,
        mut subscription: MutationSubscription,
        cancel: CancellationToken,
    ) -> impl Future<Output = ()> + Send + 'static {
        let mut reprocess = self.ctx.subscribe_reprocess();
        async move {
            let mut settle = SettleScheduler::default();
            debug!(view = %scope.path, "Watching view");

            loop {
                let deadline = settle.deadline();
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    record = subscription.recv() => {
                        let Some(record) = record else { break };
                        let mut records = vec![record];
                        records.extend(subscription.drain());

                        let mut verify = Vec::new();
                        {
                            let doc = self.ctx.document.lock();
                            for record in &records {
                                match relevance(&doc, record) {
                                    Relevance::Ignore => {}
                                    Relevance::Reprocess => settle.note_activity(Instant::now()),
                                    Relevance::VerifyTitleBar(block) => verify.push(block),
                                }
                            }
                        }
                        verify.sort_unstable();
                        verify.dedup();
                        for block in verify {
                            self.verify_title_bar(&scope, block).await;
                        }
                    }
                    changed = reprocess.changed() => {
                        if changed.is_err() {
                            break;
                        }
                        settle.note_activity(Instant::now());
                    }
                    _ = tokio::time::sleep_until(deadline.unwrap_or_else(Instant::now)), if deadline.is_some() => {
                        if settle.fire(Instant::now()) {
                            let report = self.reconcile_view(&scope).await;
                            self.log_report(&scope, "settle", &report);
                        }
                    }
                }
            }
            debug!(view = %scope.path, "View watcher stopped");
        }
    }

    /// Repeat passes until the augmented count stabilizes or the timeout
    /// elapses. `None` when cancelled.
    pub async fn bootstrap(self, scope: ViewScope, cancel: CancellationToken) -> Option<BootstrapStep> {
        let mut tracker = BootstrapTracker::new(Instant::now());
        loop {
            tokio::select! {
                _ = cancel.cancelled() => return None,
                _ = tokio::time::sleep(BOOTSTRAP_INTERVAL) => {}
            }

            let report = self.reconcile_view(&scope).await;
            self.log_report(&scope, "bootstrap", &report);
            let count = self.augmented_count(&scope);
            match tracker.observe(count, Instant::now()) {
                BootstrapStep::Continue => {}
                BootstrapStep::Stable => {
                    debug!(view = %scope.path, blocks = count, "Bootstrap sweep stable");
                    return Some(BootstrapStep::Stable);
                }
                BootstrapStep::TimedOut => {
                    warn!(view = %scope.path, blocks = count, "Bootstrap sweep timed out");
                    return Some(BootstrapStep::TimedOut);
                }
            }
        }
    }

    /// Log a pass report; verbose in debug mode.
    pub fn log_report(&self, scope: &ViewScope, trigger: &str, report: &PassReport) {
        if self.ctx.state.read().settings.debug_mode {
            info!(view = %scope.path, trigger, ?report, "Reconciliation pass");
        } else {
            trace!(view = %scope.path, trigger, ?report, "Reconciliation pass");
        }
    }
}

fn title_bars(doc: &Document, block: NodeId) -> Vec<NodeId> {
    doc.children(block)
        .iter()
        .copied()
        .filter(|c| doc.has_class(*c, markers::TITLE_BAR))
        .collect()
}

fn is_fully_augmented(
    doc: &Document,
    block: NodeId,
    identity: &str,
    depth: usize,
    file: &FileRef,
    label: &str,
    settings: &EmbedSettings,
) -> bool {
    if !doc.has_class(block, markers::BLOCK)
        || doc.attr(block, markers::ATTR_ID) != Some(identity)
        || doc.attr(block, markers::ATTR_DEPTH) != Some(depth.to_string().as_str())
        || doc.attr(block, markers::ATTR_FILE) != Some(file.path.as_str())
    {
        return false;
    }
    let Some(&bar) = doc.element_children(block).first() else {
        return false;
    };
    doc.has_class(bar, markers::TITLE_BAR)
        && title_bars(doc, block).len() == 1
        && doc.has_class(bar, &markers::depth_class(depth))
        && title_bar::matches_settings(doc, bar, settings)
        && doc
            .child_with_class(bar, markers::TITLE_LABEL)
            .is_some_and(|l| doc.text_content(l) == label)
}

/// A loaded text embed without a content container, or one nested in content
/// the overlay rendered itself (nobody else will ever fill it).
fn needs_fallback(doc: &Document, block: NodeId) -> bool {
    if doc.child_with_class(block, markers::HOST_CONTENT).is_some() {
        return false;
    }
    doc.has_class(block, markers::HOST_LOADED)
        || doc
            .ancestors(block)
            .into_iter()
            .any(|a| doc.attr(a, markers::ATTR_FALLBACK).is_some())
}

/// Remove the overlay from `block`; returns whether anything changed.
fn strip(doc: &mut Document, block: NodeId, ctx: &ReconcileContext) -> Result<bool> {
    let mut changed = false;
    for bar in title_bars(doc, block) {
        ctx.listeners.remove_within(doc, bar);
        doc.remove(bar)?;
        changed = true;
    }
    for class in [markers::BLOCK, markers::COLLAPSED] {
        changed |= doc.remove_class(block, class)?;
    }
    for attr in [markers::ATTR_ID, markers::ATTR_DEPTH, markers::ATTR_FILE] {
        changed |= doc.remove_attr(block, attr)?;
    }
    Ok(changed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::TestHost;

    #[tokio::test]
    async fn test_second_pass_is_noop() {
        let host = TestHost::new()
            .with_file("D.md", "![[A]]")
            .with_file("A.md", "![[B]]")
            .with_file("B.md", "leaf");
        let scope = host.render_view("D.md").await;
        let reconciler = host.reconciler();

        let first = reconciler.reconcile_view(&scope).await;
        assert_eq!(first.augmented, 2);

        let revision = host.document().lock().revision();
        let second = reconciler.reconcile_view(&scope).await;
        assert_eq!(second.augmented, 0);
        assert_eq!(second.unchanged, 2);
        assert_eq!(host.document().lock().revision(), revision);
    }

    #[tokio::test]
    async fn test_images_and_pdfs_are_left_alone() {
        let host = TestHost::new()
            .with_file("D.md", "![[pic.png]]\n\n![[paper.pdf]]\n\n![[A]]")
            .with_file("pic.png", "")
            .with_file("paper.pdf", "")
            .with_file("A.md", "text");
        let scope = host.render_view("D.md").await;
        let report = host.reconciler().reconcile_view(&scope).await;

        assert_eq!(report.augmented, 1);
        assert_eq!(report.skipped, 2);
        let doc = host.document().lock();
        assert_eq!(doc.query_class(scope.root, markers::TITLE_BAR).len(), 1);
    }

    #[tokio::test]
    async fn test_malformed_link_is_skipped() {
        let host = TestHost::new().with_file("D.md", "");
        let scope = host.empty_view("D.md");
        {
            let mut doc = host.document().lock();
            let block = doc.create_element_with_classes("span", &[markers::HOST_EMBED]);
            doc.set_attr(block, markers::HOST_SRC, "Half typed]]").unwrap();
            doc.append_child(scope.root, block).unwrap();
        }
        let report = host.reconciler().reconcile_view(&scope).await;
        assert_eq!(report.skipped, 1);
        assert_eq!(report.augmented, 0);
    }

    #[tokio::test]
    async fn test_broken_link_strips_overlay() {
        let host = TestHost::new()
            .with_file("D.md", "![[A]]")
            .with_file("A.md", "text");
        let scope = host.render_view("D.md").await;
        let reconciler = host.reconciler();
        assert_eq!(reconciler.reconcile_view(&scope).await.augmented, 1);

        // The link now points at something that can never be a file name
        {
            let mut doc = host.document().lock();
            let block = doc.query_class(scope.root, markers::BLOCK)[0];
            doc.set_attr(block, markers::HOST_SRC, "bad:name").unwrap();
        }
        let report = reconciler.reconcile_view(&scope).await;
        assert_eq!(report.stripped, 1);
        assert_eq!(reconciler.augmented_count(&scope), 0);
    }

    #[tokio::test]
    async fn test_title_bar_rebuilt_when_host_strips_it() {
        let host = TestHost::new()
            .with_file("D.md", "![[A]]")
            .with_file("A.md", "text");
        let scope = host.render_view("D.md").await;
        let reconciler = host.reconciler();
        reconciler.reconcile_view(&scope).await;

        let block = {
            let mut doc = host.document().lock();
            let block = doc.query_class(scope.root, markers::BLOCK)[0];
            let bar = doc.child_with_class(block, markers::TITLE_BAR).unwrap();
            doc.remove(bar).unwrap();
            block
        };
        assert!(reconciler.verify_title_bar(&scope, block).await);
        let doc = host.document().lock();
        assert!(doc.child_with_class(block, markers::TITLE_BAR).is_some());
    }

    #[tokio::test]
    async fn test_fallback_renders_missing_content_up_to_limit() {
        // A note embedding itself: the host never fills nested levels
        let host = TestHost::new()
            .with_file("D.md", "![[A]]")
            .with_file("A.md", "again ![[A]]");
        let scope = host.render_view_shallow("D.md").await;
        let report = host.reconciler().reconcile_view(&scope).await;

        // A rendered once; the nested A is the same file and not rendered again
        assert_eq!(report.rendered, 1);
        assert_eq!(report.augmented, 2);
    }

    #[test]
    fn test_relevance_ignores_overlay_changes() {
        let mut doc = Document::new();
        let root = doc.root();
        let block = doc.create_element_with_classes("span", &[markers::HOST_EMBED, markers::BLOCK]);
        doc.append_child(root, block).unwrap();
        let bar = doc.create_element_with_classes("div", &[markers::TITLE_BAR]);
        let mut sub = doc.observe(root);
        doc.insert_child(block, 0, bar).unwrap();
        doc.set_attr(block, markers::ATTR_ID, "embed-1").unwrap();
        doc.add_class(block, markers::COLLAPSED).unwrap();

        for record in sub.drain() {
            assert_eq!(relevance(&doc, &record), Relevance::Ignore, "{record:?}");
        }
    }

    #[test]
    fn test_relevance_of_host_changes() {
        let mut doc = Document::new();
        let root = doc.root();
        let mut sub = doc.observe(root);

        let block = doc.create_element_with_classes("span", &[markers::HOST_EMBED]);
        doc.append_child(root, block).unwrap();
        let added = sub.drain();
        assert_eq!(relevance(&doc, &added[0]), Relevance::Reprocess);

        doc.add_class(block, markers::HOST_LOADED).unwrap();
        let loaded = sub.drain();
        assert_eq!(relevance(&doc, &loaded[0]), Relevance::VerifyTitleBar(block));

        let text = doc.create_text("plain");
        doc.append_child(root, text).unwrap();
        let typed = sub.drain();
        assert_eq!(relevance(&doc, &typed[0]), Relevance::Ignore);
    }

    #[tokio::test]
    async fn test_pass_suppressed_while_focus_in_editor() {
        let host = TestHost::new()
            .with_file("D.md", "![[A]]")
            .with_file("A.md", "text");
        let scope = host.render_view("D.md").await;
        {
            let mut doc = host.document().lock();
            let editor = doc.create_element_with_classes("textarea", &[markers::EDITOR]);
            doc.append_child(scope.root, editor).unwrap();
            doc.focus(Some(editor));
        }
        let report = host.reconciler().reconcile_view(&scope).await;
        assert!(report.suppressed);
        assert_eq!(report.augmented, 0);
    }
}
