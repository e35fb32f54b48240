//! Settings persistence backends

use crate::error::ConfigError;
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::Mutex as AsyncMutex;
use tracing::debug;

/// Distinguishes temp files of saves in flight, across stores in this process.
static TEMP_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Host capability: load and save an arbitrary settings blob across sessions.
#[async_trait]
pub trait SettingsStore: Send + Sync {
    /// Load the blob, `None` when nothing was saved yet.
    async fn load(&self) -> Result<Option<serde_json::Value>, ConfigError>;

    /// Replace the saved blob.
    async fn save(&self, value: &serde_json::Value) -> Result<(), ConfigError>;
}

/// Default settings file: `<config dir>/crucible/embed-lens.json`.
pub fn default_settings_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("crucible")
        .join("embed-lens.json")
}

/// Settings stored as pretty-printed JSON in a single file.
#[derive(Debug, Clone)]
pub struct JsonFileSettingsStore {
    path: PathBuf,
    write_lock: Arc<AsyncMutex<()>>,
}

impl JsonFileSettingsStore {
    /// Store backed by `path`; the file is created on first save.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Arc::new(AsyncMutex::new(())),
        }
    }

    /// Path of the backing file
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn temp_path(&self) -> PathBuf {
        let name = self
            .path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "settings".to_string());
        let n = TEMP_COUNTER.fetch_add(1, Ordering::Relaxed);
        self.path
            .with_file_name(format!(".{name}.{}.{n}.tmp", std::process::id()))
    }
}

#[async_trait]
impl SettingsStore for JsonFileSettingsStore {
    async fn load(&self) -> Result<Option<serde_json::Value>, ConfigError> {
        match tokio::fs::read_to_string(&self.path).await {
            Ok(contents) => Ok(Some(serde_json::from_str(&contents)?)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn save(&self, value: &serde_json::Value) -> Result<(), ConfigError> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }

        // Write-then-rename so a crash never leaves a truncated blob behind
        let contents = serde_json::to_string_pretty(value)?;
        let _guard = self.write_lock.lock().await;
        let tmp = self.temp_path();
        tokio::fs::write(&tmp, contents).await?;
        if let Err(e) = tokio::fs::rename(&tmp, &self.path).await {
            let _ = tokio::fs::remove_file(&tmp).await;
            return Err(e.into());
        }

        debug!("Saved settings to {}", self.path.display());
        Ok(())
    }
}

/// In-memory store for tests.
#[cfg(any(test, feature = "test-utils"))]
#[derive(Debug, Default)]
pub struct MemorySettingsStore {
    value: parking_lot::Mutex<Option<serde_json::Value>>,
    saves: std::sync::atomic::AtomicUsize,
    fail_saves: std::sync::atomic::AtomicBool,
}

#[cfg(any(test, feature = "test-utils"))]
impl MemorySettingsStore {
    /// Empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Store pre-seeded with `value`
    pub fn with_value(value: serde_json::Value) -> Self {
        let store = Self::default();
        *store.value.lock() = Some(value);
        store
    }

    /// Current blob
    pub fn value(&self) -> Option<serde_json::Value> {
        self.value.lock().clone()
    }

    /// Number of successful saves so far
    pub fn save_count(&self) -> usize {
        self.saves.load(std::sync::atomic::Ordering::SeqCst)
    }

    /// Make subsequent saves fail
    pub fn set_fail_saves(&self, fail: bool) {
        self.fail_saves
            .store(fail, std::sync::atomic::Ordering::SeqCst);
    }
}

#[cfg(any(test, feature = "test-utils"))]
#[async_trait]
impl SettingsStore for MemorySettingsStore {
    async fn load(&self) -> Result<Option<serde_json::Value>, ConfigError> {
        Ok(self.value.lock().clone())
    }

    async fn save(&self, value: &serde_json::Value) -> Result<(), ConfigError> {
        if self.fail_saves.load(std::sync::atomic::Ordering::SeqCst) {
            return Err(ConfigError::Store("save rejected".to_string()));
        }
        *self.value.lock() = Some(value.clone());
        self.saves
            .fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        Ok(())
    }
}
