//! # Embed Lens
//!
//! Overlay engine for embedded notes. A host application renders `![[note]]`
//! transclusions as embed blocks; this crate finds those blocks, gives each a
//! stable identity, and decorates text embeds with a title bar offering
//! collapse, in-place editing and jump-to-source. The host keeps re-rendering
//! underneath, so the work is a reconciliation: every pass brings the tree back
//! to the augmented state without disturbing blocks that are already there.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────┐  render / file / workspace   ┌──────────────┐
//! │     Host     │─────────────────────────────▶│  EmbedLens   │
//! │ (Vault, DOM, │                              │   (plugin)   │
//! │  Renderer)   │◀──────── title bars ─────────┤              │
//! └──────────────┘                              └──────┬───────┘
//!                                                      │
//!        ┌───────────────────┬─────────────────────────┼──────────────────┐
//!        ▼                   ▼                         ▼                  ▼
//! ┌──────────────┐   ┌──────────────┐          ┌──────────────┐   ┌──────────────┐
//! │  Reconciler  │──▶│  Classifier  │          │ EditSessions │   │ CollapseStore│
//! │ (driver,     │   │  Identity    │          │ (freeze,     │   │ (persisted   │
//! │  watch,      │   │  Nesting     │          │  debounced   │   │  flags)      │
//! │  bootstrap)  │   │  TitleBar    │          │  save)       │   │              │
//! └──────────────┘   └──────────────┘          └──────────────┘   └──────────────┘
//! ```
//!
//! All shared state lives in one [`ReconcileContext`] created by
//! [`EmbedLens::load`] and torn down by [`EmbedLens::unload`].
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use crucible_embed::{Document, EmbedLens, FsVault, HostSimulator};
//! # use crucible_embed::HostServices;
//! # async fn run(services: HostServices, vault: std::sync::Arc<FsVault>) -> crucible_embed::Result<()> {
//! let document = Document::new().into_shared();
//! let root = document.lock().root();
//!
//! HostSimulator::new(vault, document.clone())
//!     .render_note(root, "Daily.md")
//!     .await?;
//!
//! let plugin = EmbedLens::load(services, document).await;
//! let report = plugin.attach_view("main", root, "Daily.md").await;
//! println!("augmented {} embeds", report.augmented);
//! plugin.unload().await;
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![deny(unsafe_code)]

pub mod cache;
pub mod classifier;
pub mod collapse;
pub mod context;
pub mod debug;
pub mod dom;
pub mod driver;
pub mod edit;
pub mod error;
pub mod events;
pub mod host;
pub mod identity;
pub mod link;
pub mod markers;
pub mod nesting;
pub mod plugin;
pub mod retry;
pub mod schedule;
pub mod suppression;
pub mod title_bar;
pub mod vault;

#[cfg(any(test, feature = "test-utils"))]
pub mod test_support;

pub use cache::{CacheStatistics, ProcessingCache};
pub use classifier::{Classifier, EmbedKind};
pub use collapse::CollapseStore;
pub use context::ReconcileContext;
pub use debug::force_reconcile;
pub use dom::{Document, MutationRecord, MutationSubscription, NodeId, SharedDocument};
pub use driver::{PassReport, Reconciler, ViewScope, MAX_RECURSION_DEPTH};
pub use edit::{EditSessions, SessionInfo};
pub use error::{EmbedError, Result};
pub use events::{FileEvent, FileEventKind, WorkspaceEvent};
pub use host::{
    FileRef, HostServices, MarkdownRenderer, Navigator, Notice, NoticeKind, Notifier, Placement,
    SettingsStore, Vault,
};
pub use link::LinkTarget;
pub use plugin::EmbedLens;
pub use retry::{RetryOutcome, RetryPolicy, RetryTask};
pub use schedule::{BootstrapStep, BootstrapTracker, SettleScheduler};
pub use suppression::SuppressionSet;
pub use title_bar::{ClickOutcome, ListenerRegistry, TitleAction};
pub use vault::{FsVault, HostSimulator, PulldownRenderer};

pub use crucible_embed_config::{EmbedSettings, FontSize, PersistedState};
