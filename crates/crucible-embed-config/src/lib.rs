//! # Embed Lens Configuration
//!
//! Settings and persisted state for the embedded-note overlay.
//!
//! The host application stores a single opaque blob for the plugin. This crate
//! owns the shape of that blob:
//!
//! ```text
//! {
//!   "fontSize": "14px",
//!   "showCollapseIcon": true,
//!   ...
//!   "collapseStates": { "embed-3f1c...": true }
//! }
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use crucible_embed_config::{JsonFileSettingsStore, PersistedState, SettingsStore};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let store = JsonFileSettingsStore::new("embed-lens.json");
//!     let state = PersistedState::load_from(&store).await;
//!     println!("auto-save after {}ms", state.settings.auto_save_delay);
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

mod error;
mod settings;
mod state;
mod store;

pub use error::{ConfigError, ValidationError};
pub use settings::{EmbedSettings, FontSize, SettingsValidator};
pub use state::PersistedState;
pub use store::{default_settings_path, JsonFileSettingsStore, SettingsStore};

#[cfg(any(test, feature = "test-utils"))]
pub use store::MemorySettingsStore;
