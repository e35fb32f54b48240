//! In-place editing through the plugin, against memory and disk vaults.

use crucible_embed::dom::NodeId;
use crucible_embed::markers;
use crucible_embed::test_support::{RecordingNavigator, RecordingNotifier, TestHost};
use crucible_embed::{
    ClickOutcome, Document, EmbedLens, FsVault, HostServices, HostSimulator, NoticeKind,
    PulldownRenderer, TitleAction,
};
use crucible_embed_config::{JsonFileSettingsStore, PersistedState};
use std::sync::Arc;
use tempfile::TempDir;

fn first_block(host: &TestHost, root: NodeId) -> (String, NodeId) {
    let doc = host.document().lock();
    let block = doc.query_class(root, markers::BLOCK)[0];
    (doc.attr(block, markers::ATTR_ID).unwrap().to_string(), block)
}

#[tokio::test]
async fn test_edit_round_trip_through_title_bar() {
    let host = TestHost::new()
        .with_file("D.md", "![[A]]")
        .with_file("A.md", "A");
    let scope = host.render_view("D.md").await;
    let plugin = EmbedLens::load(host.services(), host.document().clone()).await;
    plugin.attach_view("main", scope.root, "D.md").await;

    let (id, block) = first_block(&host, scope.root);
    let edit_button = {
        let doc = host.document().lock();
        let bar = doc.child_with_class(block, markers::TITLE_BAR).unwrap();
        doc.query_class(bar, markers::TITLE_EDIT)[0]
    };
    assert_eq!(
        plugin.click(edit_button).await,
        ClickOutcome::Handled {
            identity: id.clone(),
            action: TitleAction::ToggleEdit
        }
    );
    assert!(plugin.sessions().is_editing(&id));

    let editor = {
        let doc = host.document().lock();
        let editor = doc.child_with_class(block, markers::EDITOR).unwrap();
        assert_eq!(doc.text_content(editor), "A");
        editor
    };
    assert!(plugin.should_isolate_key(editor));

    plugin.sessions().input(&id, "B").await.unwrap();
    plugin.sessions().save(&id).await.unwrap();
    assert_eq!(host.vault().contents("A.md").as_deref(), Some("B"));

    assert!(!plugin.toggle_edit(&id).await.unwrap());
    assert_eq!(
        host.vault().writes(),
        vec![("A.md".to_string(), "B".to_string())]
    );
    {
        let doc = host.document().lock();
        let content = doc.child_with_class(block, markers::HOST_CONTENT).unwrap();
        assert_eq!(doc.text_content(content).trim(), "B");
        assert!(doc.child_with_class(block, markers::EDITOR).is_none());
        assert!(doc.attr(block, markers::ATTR_FROZEN).is_none());
    }
    assert!(host
        .notifier()
        .notices()
        .iter()
        .any(|n| n.kind == NoticeKind::Success));
    plugin.unload().await;
}

#[tokio::test]
async fn test_one_session_per_file() {
    let host = TestHost::new()
        .with_file("D.md", "![[A]]\n\n![[A]]")
        .with_file("A.md", "shared");
    let scope = host.render_view("D.md").await;
    let plugin = EmbedLens::load(host.services(), host.document().clone()).await;
    plugin.attach_view("main", scope.root, "D.md").await;

    let ids: Vec<String> = {
        let doc = host.document().lock();
        doc.query_class(scope.root, markers::BLOCK)
            .into_iter()
            .map(|b| doc.attr(b, markers::ATTR_ID).unwrap().to_string())
            .collect()
    };
    assert_eq!(ids.len(), 2);
    assert_ne!(ids[0], ids[1]);

    assert!(plugin.toggle_edit(&ids[0]).await.unwrap());
    assert!(!plugin.toggle_edit(&ids[1]).await.unwrap());
    assert_eq!(plugin.sessions().active(), vec![ids[0].clone()]);
    plugin.unload().await;
}

#[tokio::test]
async fn test_collapse_is_ignored_while_editing() {
    let host = TestHost::new()
        .with_file("D.md", "![[A]]")
        .with_file("A.md", "text");
    let scope = host.render_view("D.md").await;
    let plugin = EmbedLens::load(host.services(), host.document().clone()).await;
    plugin.attach_view("main", scope.root, "D.md").await;
    let (id, block) = first_block(&host, scope.root);

    plugin.toggle_edit(&id).await.unwrap();
    assert!(!plugin.toggle_collapse(&id).await.unwrap());
    assert!(!host.document().lock().has_class(block, markers::COLLAPSED));
    plugin.unload().await;
}

#[tokio::test]
async fn test_failed_save_surfaces_and_keeps_editing() {
    let host = TestHost::new()
        .with_file("D.md", "![[A]]")
        .with_file("A.md", "A");
    let scope = host.render_view("D.md").await;
    let plugin = EmbedLens::load(host.services(), host.document().clone()).await;
    plugin.attach_view("main", scope.root, "D.md").await;
    let (id, _) = first_block(&host, scope.root);

    plugin.toggle_edit(&id).await.unwrap();
    plugin.sessions().input(&id, "B").await.unwrap();
    host.vault().set_fail_writes(true);

    assert!(plugin.toggle_edit(&id).await.is_err());
    assert!(plugin.sessions().is_editing(&id));
    assert_eq!(host.vault().contents("A.md").as_deref(), Some("A"));
    assert!(host
        .notifier()
        .notices()
        .iter()
        .any(|n| n.kind == NoticeKind::Failure));

    host.vault().set_fail_writes(false);
    assert!(!plugin.toggle_edit(&id).await.unwrap());
    assert_eq!(host.vault().contents("A.md").as_deref(), Some("B"));
    plugin.unload().await;
}

#[tokio::test]
async fn test_disk_vault_edit_and_collapse_persist() {
    let dir = TempDir::new().unwrap();
    std::fs::create_dir_all(dir.path().join("notes")).unwrap();
    std::fs::write(dir.path().join("notes/D.md"), "# Today\n\n![[Project]]").unwrap();
    std::fs::write(dir.path().join("notes/Project.md"), "old plan").unwrap();
    let state_path = dir.path().join("state.json");

    let vault = Arc::new(FsVault::open(dir.path().join("notes")).await.unwrap());
    let settings = Arc::new(JsonFileSettingsStore::new(&state_path));
    let services = HostServices {
        vault: vault.clone(),
        renderer: Arc::new(PulldownRenderer),
        navigator: Arc::new(RecordingNavigator::default()),
        notifier: Arc::new(RecordingNotifier::default()),
        settings: settings.clone(),
    };

    let document = Document::new().into_shared();
    let root = document.lock().root();
    HostSimulator::new(vault.clone(), document.clone())
        .render_note(root, "D.md")
        .await
        .unwrap();

    let plugin = EmbedLens::load(services, document.clone()).await;
    assert_eq!(plugin.attach_view("main", root, "D.md").await.augmented, 1);
    let id = {
        let doc = document.lock();
        let block = doc.query_class(root, markers::BLOCK)[0];
        doc.attr(block, markers::ATTR_ID).unwrap().to_string()
    };

    plugin.toggle_edit(&id).await.unwrap();
    plugin.sessions().input(&id, "new plan").await.unwrap();
    plugin.toggle_edit(&id).await.unwrap();
    assert_eq!(
        std::fs::read_to_string(dir.path().join("notes/Project.md")).unwrap(),
        "new plan"
    );

    plugin.toggle_collapse(&id).await.unwrap();
    plugin.unload().await;

    let saved = PersistedState::load_from(settings.as_ref()).await;
    assert_eq!(saved.collapse_states.get(&id), Some(&true));
}
