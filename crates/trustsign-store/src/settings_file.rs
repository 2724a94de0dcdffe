//! JSON-file persistence for [`Settings`].

use std::io::Write;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tracing::{debug, info};
use trustsign_core::{Settings, SettingsStore};

use crate::StoreError;

const APP_DIR: &str = "trustsign";
const SETTINGS_FILE: &str = "settings.json";

/// Settings stored as pretty-printed JSON at a fixed path.
///
/// A missing file loads as [`Settings::default`]; a malformed one is an error.
#[derive(Debug, Clone)]
pub struct JsonSettingsFile {
    path: PathBuf,
}

impl JsonSettingsFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// `<platform config dir>/trustsign/settings.json`.
    pub fn default_location() -> Result<Self, StoreError> {
        let base = dirs::config_dir()
            .ok_or_else(|| StoreError::Other("no platform config directory".into()))?;
        Ok(Self::new(base.join(APP_DIR).join(SETTINGS_FILE)))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl SettingsStore for JsonSettingsFile {
    type Error = StoreError;

    async fn load(&self) -> Result<Settings, StoreError> {
        let bytes = match tokio::fs::read(&self.path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %self.path.display(), "no settings file, using defaults");
                return Ok(Settings::default());
            }
            Err(e) => return Err(StoreError::io(&self.path, e)),
        };
        serde_json::from_slice(&bytes).map_err(|source| StoreError::Parse {
            path: self.path.clone(),
            source,
        })
    }

    async fn save(&self, settings: &Settings) -> Result<(), StoreError> {
        let parent = self
            .path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."))
            .to_path_buf();
        tokio::fs::create_dir_all(&parent)
            .await
            .map_err(|e| StoreError::io(&parent, e))?;
        let json = serde_json::to_vec_pretty(settings).map_err(|source| StoreError::Parse {
            path: self.path.clone(),
            source,
        })?;

        // Each save gets its own temp file, so concurrent saves never share one.
        let target = self.path.clone();
        tokio::task::spawn_blocking(move || write_then_rename(&parent, &target, &json))
            .await
            .map_err(|e| StoreError::Other(format!("settings save task failed: {e}")))??;
        info!(path = %self.path.display(), "settings saved");
        Ok(())
    }
}

fn write_then_rename(dir: &Path, target: &Path, json: &[u8]) -> Result<(), StoreError> {
    let mut tmp = tempfile::NamedTempFile::new_in(dir).map_err(|e| StoreError::io(dir, e))?;
    tmp.write_all(json)
        .map_err(|e| StoreError::io(tmp.path(), e))?;
    tmp.as_file()
        .sync_all()
        .map_err(|e| StoreError::io(tmp.path(), e))?;
    tmp.persist(target)
        .map_err(|e| StoreError::io(target, e.error))?;
    Ok(())
}
