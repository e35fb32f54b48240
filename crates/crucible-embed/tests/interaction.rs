//! Clicks, navigation, file events and link retries.

use crucible_embed::dom::NodeId;
use crucible_embed::markers;
use crucible_embed::test_support::TestHost;
use crucible_embed::{
    force_reconcile, ClickOutcome, EmbedLens, EmbedSettings, FileEvent, FileRef, Placement,
    TitleAction,
};
use std::time::Duration;

fn jump_button(host: &TestHost, root: NodeId) -> NodeId {
    let doc = host.document().lock();
    let block = doc.query_class(root, markers::BLOCK)[0];
    let bar = doc.child_with_class(block, markers::TITLE_BAR).unwrap();
    doc.query_class(bar, markers::TITLE_JUMP)[0]
}

async fn attached(host: &TestHost, path: &str) -> (EmbedLens, NodeId) {
    let scope = host.render_view(path).await;
    let plugin = EmbedLens::load(host.services(), host.document().clone()).await;
    plugin.attach_view("main", scope.root, path).await;
    (plugin, scope.root)
}

#[tokio::test]
async fn test_jump_placement_follows_settings_and_active_view() {
    let host = TestHost::new()
        .with_file("D.md", "intro\n\n![[A]]")
        .with_file("A.md", "text");
    let (plugin, root) = attached(&host, "D.md").await;
    let a = FileRef::new("A.md");

    let outcome = plugin.click(jump_button(&host, root)).await;
    assert!(matches!(
        outcome,
        ClickOutcome::Handled {
            action: TitleAction::Jump,
            ..
        }
    ));

    let settings = EmbedSettings {
        jump_in_new_tab: false,
        ..Default::default()
    };
    plugin.update_settings(settings).await.unwrap();
    plugin.click(jump_button(&host, root)).await;

    host.navigator().set_active_view(false);
    plugin.click(jump_button(&host, root)).await;

    assert_eq!(
        host.navigator().opened(),
        vec![
            (a.clone(), Placement::NewTab),
            (a.clone(), Placement::CurrentView),
            (a, Placement::NewTab),
        ]
    );
    plugin.unload().await;
}

#[tokio::test]
async fn test_host_open_link_is_intercepted_and_plain_text_is_not() {
    let host = TestHost::new()
        .with_file("D.md", "intro\n\n![[A]]")
        .with_file("A.md", "text");
    let (plugin, root) = attached(&host, "D.md").await;

    let (open_link, intro) = {
        let doc = host.document().lock();
        let link = doc.query_class(root, markers::HOST_LINK)[0];
        let paragraph = doc.query_tag(root, "p")[0];
        (link, doc.children(paragraph)[0])
    };
    assert_eq!(plugin.click(open_link).await, ClickOutcome::DefaultPrevented);
    assert_eq!(plugin.click(intro).await, ClickOutcome::NotHandled);
    plugin.unload().await;
}

#[tokio::test]
async fn test_settings_change_rebuilds_title_bars() {
    let host = TestHost::new()
        .with_file("D.md", "![[A]]")
        .with_file("A.md", "text");
    let (plugin, root) = attached(&host, "D.md").await;

    let settings = EmbedSettings {
        show_edit_button: false,
        ..Default::default()
    };
    assert_eq!(plugin.update_settings(settings).await.unwrap(), 1);
    assert!(host.document().lock().query_class(root, markers::TITLE_EDIT).is_empty());
    assert_eq!(host.settings_store().save_count(), 1);
    plugin.unload().await;
}

#[tokio::test(start_paused = true)]
async fn test_link_to_file_created_later_is_retried() {
    let host = TestHost::new().with_file("D.md", "![[Later]]");
    let scope = host.render_view("D.md").await;
    let reconciler = host.reconciler();
    let mut reprocess = host.context().subscribe_reprocess();

    let first = reconciler.reconcile_view(&scope).await;
    assert_eq!(first.augmented, 0);
    assert_eq!(first.skipped, 1);

    host.vault().insert("Later.md", "finally here");
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(reprocess.has_changed().unwrap());

    let second = reconciler.reconcile_view(&scope).await;
    assert_eq!(second.augmented, 1);
    assert!(!host.context().cache.is_broken("D.md|Later"));
}

#[tokio::test(start_paused = true)]
async fn test_retry_gives_up_and_marks_link_broken() {
    let host = TestHost::new().with_file("D.md", "![[Never]]");
    let scope = host.render_view("D.md").await;
    let reconciler = host.reconciler();

    reconciler.reconcile_view(&scope).await;
    tokio::time::sleep(Duration::from_secs(1)).await;
    assert!(host.context().cache.is_broken("D.md|Never"));

    let report = reconciler.reconcile_view(&scope).await;
    assert_eq!(report.augmented, 0);
    assert_eq!(reconciler.augmented_count(&scope), 0);
}

#[tokio::test]
async fn test_file_events() {
    let host = TestHost::new()
        .with_file("D.md", "![[A]]")
        .with_file("A.md", "text");
    let (plugin, _) = attached(&host, "D.md").await;
    let ctx = plugin.context().clone();

    ctx.suppression.note_saved("A.md");
    assert!(!plugin.on_file_event(&FileEvent::modified("A.md")));
    assert!(plugin.on_file_event(&FileEvent::renamed("A.md", "Archive/A.md")));

    ctx.cache.mark_broken("D.md|B");
    assert!(plugin.on_file_event(&FileEvent::created("B.md")));
    assert!(!ctx.cache.is_broken("D.md|B"));
    plugin.unload().await;
}

#[tokio::test]
async fn test_workspace_events_and_debug_hook_signal_attached_views() {
    let host = TestHost::new()
        .with_file("D.md", "![[A]]")
        .with_file("A.md", "text");
    let (plugin, _) = attached(&host, "D.md").await;

    assert_eq!(plugin.on_resize(), 1);
    assert_eq!(plugin.on_layout_change(), 1);
    assert_eq!(plugin.force_reconcile(), 1);
    assert!(force_reconcile() >= 1);

    plugin.detach_view("main");
    tokio::task::yield_now().await;
    plugin.unload().await;
}
