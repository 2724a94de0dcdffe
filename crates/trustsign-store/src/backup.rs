//! Backups and atomic in-place replacement of signed files.
//!
//! A backup is a byte-for-byte copy named `<file name>.backup.<YYYYMMDDHHMMSS>`
//! (UTC) next to the original. Backups are created with create-new semantics
//! and are never overwritten; a same-second collision is an error the caller
//! may retry.
//!
//! Replacement always backs up first. The signed bytes are written to a
//! temporary file in the original's directory and renamed over it, so readers
//! see either the old content or the new content, never a partial write.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};
use trustsign_core::Clock;

use crate::StoreError;

const BACKUP_TIMESTAMP_FORMAT: &str = "%Y%m%d%H%M%S";

/// Creates backups and swaps in signed content.
#[derive(Debug, Clone)]
pub struct BackupManager {
    clock: Arc<dyn Clock>,
}

impl BackupManager {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self { clock }
    }

    /// Backup path that [`backup`](Self::backup) would use for `path` right now.
    pub fn backup_path_for(&self, path: &Path) -> PathBuf {
        let stamp = self.clock.now().format(BACKUP_TIMESTAMP_FORMAT);
        let mut name = path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_default();
        name.push(format!(".backup.{stamp}"));
        path.with_file_name(name)
    }

    /// Copy `path` to a fresh timestamped backup and return the backup's path.
    pub async fn backup(&self, path: &Path) -> Result<PathBuf, StoreError> {
        ensure_file(path).await?;
        let backup_path = self.backup_path_for(path);

        let mut target = match tokio::fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&backup_path)
            .await
        {
            Ok(file) => file,
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                return Err(StoreError::BackupExists(backup_path));
            }
            Err(e) => return Err(StoreError::io(&backup_path, e)),
        };

        let copied = async {
            let mut source = tokio::fs::File::open(path)
                .await
                .map_err(|e| StoreError::io(path, e))?;
            let n = tokio::io::copy(&mut source, &mut target)
                .await
                .map_err(|e| StoreError::io(&backup_path, e))?;
            target
                .flush()
                .await
                .map_err(|e| StoreError::io(&backup_path, e))?;
            target
                .sync_all()
                .await
                .map_err(|e| StoreError::io(&backup_path, e))?;
            Ok::<u64, StoreError>(n)
        }
        .await;

        match copied {
            Ok(bytes) => {
                info!(
                    original = %path.display(),
                    backup = %backup_path.display(),
                    bytes,
                    "backup created"
                );
                Ok(backup_path)
            }
            Err(e) => {
                drop(target);
                // Only remove what this call created.
                if let Err(cleanup) = tokio::fs::remove_file(&backup_path).await {
                    warn!(
                        backup = %backup_path.display(),
                        error = %cleanup,
                        "could not remove partial backup"
                    );
                }
                Err(e)
            }
        }
    }

    /// Back up `original`, then atomically replace its content with `signed`.
    ///
    /// Returns the backup path. If the backup fails the original is untouched.
    pub async fn replace_with_signed(
        &self,
        original: &Path,
        signed: Vec<u8>,
    ) -> Result<PathBuf, StoreError> {
        ensure_file(original).await?;
        let backup_path = self.backup(original).await?;

        let target = original.to_path_buf();
        tokio::task::spawn_blocking(move || write_atomically(&target, &signed))
            .await
            .map_err(|e| StoreError::Other(format!("replace task failed: {e}")))??;

        info!(
            path = %original.display(),
            backup = %backup_path.display(),
            "replaced with signed content"
        );
        Ok(backup_path)
    }
}

async fn ensure_file(path: &Path) -> Result<(), StoreError> {
    match tokio::fs::metadata(path).await {
        Ok(meta) if meta.is_file() => Ok(()),
        Ok(_) => Err(StoreError::Other(format!(
            "not a regular file: {}",
            path.display()
        ))),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            Err(StoreError::NotFound(path.to_path_buf()))
        }
        Err(e) => Err(StoreError::io(path, e)),
    }
}

/// Write `bytes` to a sibling temp file, copy permissions, fsync, rename over `target`.
fn write_atomically(target: &Path, bytes: &[u8]) -> Result<(), StoreError> {
    let dir = target
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    let permissions = std::fs::metadata(target)
        .map_err(|e| StoreError::io(target, e))?
        .permissions();

    let mut tmp = tempfile::Builder::new()
        .prefix(".trustsign-")
        .suffix(".tmp")
        .tempfile_in(dir)
        .map_err(|e| StoreError::io(dir, e))?;
    tmp.write_all(bytes)
        .map_err(|e| StoreError::io(tmp.path(), e))?;
    tmp.as_file()
        .sync_all()
        .map_err(|e| StoreError::io(tmp.path(), e))?;
    std::fs::set_permissions(tmp.path(), permissions)
        .map_err(|e| StoreError::io(tmp.path(), e))?;
    debug!(
        tmp = %tmp.path().display(),
        target = %target.display(),
        "renaming signed file into place"
    );
    tmp.persist(target)
        .map_err(|e| StoreError::io(target, e.error))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::time::Duration;
    use tempfile::TempDir;
    use trustsign_core::ManualClock;

    fn manager() -> (BackupManager, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::fixed());
        (BackupManager::new(clock.clone()), clock)
    }

    fn dir_entries(dir: &Path) -> Vec<String> {
        let mut names: Vec<String> = fs::read_dir(dir)
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        names.sort();
        names
    }

    #[test]
    fn backup_name_uses_utc_second_stamp() {
        let (mgr, _) = manager();
        let p = mgr.backup_path_for(Path::new("/builds/app.exe"));
        assert_eq!(p, PathBuf::from("/builds/app.exe.backup.20260101000000"));
    }

    #[tokio::test]
    async fn backup_copies_content() {
        let tmp = TempDir::new().unwrap();
        let original = tmp.path().join("app.exe");
        fs::write(&original, b"unsigned").unwrap();
        let (mgr, _) = manager();

        let backup = mgr.backup(&original).await.unwrap();
        assert_eq!(fs::read(&backup).unwrap(), b"unsigned");
        assert_eq!(fs::read(&original).unwrap(), b"unsigned");
    }

    #[tokio::test]
    async fn backup_of_missing_file_is_not_found_and_creates_nothing() {
        let tmp = TempDir::new().unwrap();
        let (mgr, _) = manager();
        let err = mgr.backup(&tmp.path().join("gone.dll")).await.unwrap_err();
        assert!(matches!(err, StoreError::NotFound(_)));
        assert!(dir_entries(tmp.path()).is_empty());
    }

    #[tokio::test]
    async fn same_second_backup_collision_fails_without_overwrite() {
        let tmp = TempDir::new().unwrap();
        let original = tmp.path().join("lib.dll");
        fs::write(&original, b"v1").unwrap();
        let (mgr, clock) = manager();

        let first = mgr.backup(&original).await.unwrap();
        fs::write(&original, b"v2").unwrap();
        let err = mgr.backup(&original).await.unwrap_err();
        assert!(matches!(err, StoreError::BackupExists(ref p) if *p == first));
        assert_eq!(fs::read(&first).unwrap(), b"v1");

        // A second later the retry succeeds.
        clock.advance(Duration::from_secs(1));
        let second = mgr.backup(&original).await.unwrap();
        assert_ne!(first, second);
        assert_eq!(fs::read(&second).unwrap(), b"v2");
    }

    #[tokio::test]
    async fn replace_writes_signed_bytes_and_keeps_backup() {
        let tmp = TempDir::new().unwrap();
        let original = tmp.path().join("tool.msi");
        fs::write(&original, b"unsigned").unwrap();
        let (mgr, _) = manager();

        let backup = mgr
            .replace_with_signed(&original, b"signed".to_vec())
            .await
            .unwrap();
        assert_eq!(fs::read(&original).unwrap(), b"signed");
        assert_eq!(fs::read(&backup).unwrap(), b"unsigned");
        // No temp files left behind.
        assert_eq!(
            dir_entries(tmp.path()),
            vec!["tool.msi", "tool.msi.backup.20260101000000"]
        );
    }

    #[tokio::test]
    async fn replace_leaves_original_untouched_when_backup_collides() {
        let tmp = TempDir::new().unwrap();
        let original = tmp.path().join("tool.exe");
        fs::write(&original, b"original bytes").unwrap();
        let (mgr, _) = manager();
        fs::write(mgr.backup_path_for(&original), b"older backup").unwrap();

        let err = mgr
            .replace_with_signed(&original, b"signed".to_vec())
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::BackupExists(_)));
        assert_eq!(fs::read(&original).unwrap(), b"original bytes");
        assert_eq!(
            fs::read(mgr.backup_path_for(&original)).unwrap(),
            b"older backup"
        );
    }

    #[tokio::test]
    async fn replace_of_missing_file_is_not_found() {
        let tmp = TempDir::new().unwrap();
        let (mgr, _) = manager();
        let err = mgr
            .replace_with_signed(&tmp.path().join("missing.exe"), vec![1, 2, 3])
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::NotFound(_)));
        assert!(dir_entries(tmp.path()).is_empty());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn replace_preserves_permissions() {
        use std::os::unix::fs::PermissionsExt;

        let tmp = TempDir::new().unwrap();
        let original = tmp.path().join("run.exe");
        fs::write(&original, b"x").unwrap();
        fs::set_permissions(&original, fs::Permissions::from_mode(0o755)).unwrap();
        let (mgr, _) = manager();

        mgr.replace_with_signed(&original, b"y".to_vec())
            .await
            .unwrap();
        let mode = fs::metadata(&original).unwrap().permissions().mode() & 0o777;
        assert_eq!(mode, 0o755);
    }
}
