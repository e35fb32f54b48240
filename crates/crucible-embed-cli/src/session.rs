//! One rendered note with the overlay attached, as the commands see it.

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use crucible_embed::schedule::BOOTSTRAP_TIMEOUT;
use crucible_embed::{
    Document, EmbedLens, FileRef, FsVault, HostServices, HostSimulator, Navigator, NodeId, Notice,
    NoticeKind, Notifier, Placement, PulldownRenderer, SharedDocument, Vault,
};
use crucible_embed::markers;
use crucible_embed_config::{default_settings_path, JsonFileSettingsStore};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

const VIEW_ID: &str = "cli";

/// Prints navigation instead of opening anything.
#[derive(Debug, Default)]
pub struct StdoutNavigator;

#[async_trait]
impl Navigator for StdoutNavigator {
    fn has_active_view(&self) -> bool {
        true
    }

    async fn open(&self, file: &FileRef, placement: Placement) -> crucible_embed::Result<()> {
        let target = match placement {
            Placement::NewTab => "new tab",
            Placement::CurrentView => "current view",
        };
        println!("open {file} in {target}");
        Ok(())
    }
}

/// Routes toasts into the log.
#[derive(Debug, Default)]
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn notify(&self, notice: Notice) {
        match notice.kind {
            NoticeKind::Success => info!("{}", notice.message),
            NoticeKind::Failure => warn!("{}", notice.message),
        }
    }
}

/// Expand a leading `~` to the home directory.
pub fn expand_home(path: &Path) -> PathBuf {
    match path.strip_prefix("~") {
        Ok(rest) => dirs::home_dir()
            .map(|home| home.join(rest))
            .unwrap_or_else(|| path.to_path_buf()),
        Err(_) => path.to_path_buf(),
    }
}

/// Settings store at `path`, or the default location.
pub fn settings_store(path: Option<&Path>) -> Arc<JsonFileSettingsStore> {
    let path = path.map(expand_home).unwrap_or_else(default_settings_path);
    Arc::new(JsonFileSettingsStore::new(path))
}

/// One augmented block, for listing.
#[derive(Debug, Clone, Serialize)]
pub struct BlockRow {
    /// 1-based position in document order
    pub index: usize,
    pub identity: String,
    pub depth: usize,
    pub file: String,
    pub label: String,
    pub collapsed: bool,
}

/// A note rendered into an in-memory document with the overlay attached.
pub struct ViewSession {
    pub plugin: EmbedLens,
    pub document: SharedDocument,
    pub root: NodeId,
    pub path: String,
}

impl ViewSession {
    /// Open `note` from the vault at `vault_dir`, render it with its embeds and
    /// wait for the bootstrap sweep to settle.
    pub async fn open(vault_dir: &Path, settings: Option<&Path>, note: &str) -> Result<Self> {
        let vault_dir = expand_home(vault_dir);
        let vault = Arc::new(
            FsVault::open(vault_dir.clone())
                .await
                .with_context(|| format!("Failed to open vault at {}", vault_dir.display()))?,
        );
        let Some(file) = vault.resolve_link(note, "") else {
            bail!("No note matching '{}' in {}", note, vault_dir.display());
        };

        let document = Document::new().into_shared();
        let root = {
            let mut doc = document.lock();
            let root = doc.create_element_with_classes("div", &["markdown-preview-view"]);
            let top = doc.root();
            doc.append_child(top, root)?;
            root
        };
        let loaded = HostSimulator::new(vault.clone(), document.clone())
            .render_note(root, &file.path)
            .await
            .with_context(|| format!("Failed to render {file}"))?;
        debug!(path = %file, embeds = loaded, "Rendered note");

        let services = HostServices {
            vault,
            renderer: Arc::new(PulldownRenderer),
            navigator: Arc::new(StdoutNavigator),
            notifier: Arc::new(LogNotifier),
            settings: settings_store(settings),
        };
        let plugin = EmbedLens::load(services, document.clone()).await;
        plugin.attach_view(VIEW_ID, root, &file.path).await;

        let session = Self {
            plugin,
            document,
            root,
            path: file.path,
        };
        session.settle().await;
        Ok(session)
    }

    /// Wait until the bootstrap sweep reports stable or gives up.
    pub async fn settle(&self) {
        let give_up = tokio::time::Instant::now() + BOOTSTRAP_TIMEOUT + Duration::from_secs(1);
        while self.plugin.bootstrap_finished(VIEW_ID) == Some(false) {
            if tokio::time::Instant::now() >= give_up {
                warn!("Bootstrap sweep did not finish in time");
                break;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
    }

    /// Augmented blocks in document order.
    pub fn blocks(&self) -> Vec<BlockRow> {
        let doc = self.document.lock();
        doc.query_class(self.root, markers::BLOCK)
            .into_iter()
            .enumerate()
            .filter_map(|(i, block)| {
                let label = doc
                    .child_with_class(block, markers::TITLE_BAR)
                    .and_then(|bar| doc.child_with_class(bar, markers::TITLE_LABEL))
                    .map(|l| doc.text_content(l))
                    .unwrap_or_default();
                Some(BlockRow {
                    index: i + 1,
                    identity: doc.attr(block, markers::ATTR_ID)?.to_string(),
                    depth: doc.attr(block, markers::ATTR_DEPTH)?.parse().ok()?,
                    file: doc.attr(block, markers::ATTR_FILE)?.to_string(),
                    label,
                    collapsed: doc.has_class(block, markers::COLLAPSED),
                })
            })
            .collect()
    }

    /// Block by identity or by 1-based position.
    pub fn select(&self, selector: &str) -> Result<BlockRow> {
        let blocks = self.blocks();
        let found = match selector.parse::<usize>() {
            Ok(index) => blocks.into_iter().find(|b| b.index == index),
            Err(_) => blocks.into_iter().find(|b| b.identity == selector),
        };
        found.with_context(|| format!("No block '{}' in {}", selector, self.path))
    }

    /// Indented dump of the rendered view.
    pub fn outline(&self) -> String {
        self.document.lock().outline(self.root)
    }

    /// Detach and tear the overlay down.
    pub async fn close(self) {
        self.plugin.unload().await;
    }
}
