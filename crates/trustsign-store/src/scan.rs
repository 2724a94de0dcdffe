//! Directory scanning for signable artifacts.
//!
//! Walks a root directory (one level, or the whole tree), drops hidden
//! entries unless asked to keep them, and keeps only files whose extension
//! passes [`is_signable`]. Entries that cannot be read are logged and skipped
//! so one unreadable file never aborts the scan.

use std::path::Path;

use tracing::{debug, info, warn};
use trustsign_core::{Artifact, is_signable};
use walkdir::{DirEntry, WalkDir};

use crate::StoreError;

/// Scan behaviour flags.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ScanOptions {
    pub recursive: bool,
    pub show_hidden: bool,
}

fn is_hidden(entry: &DirEntry) -> bool {
    entry.file_name().to_string_lossy().starts_with('.')
}

/// Scan `root` for signable artifacts, ordered by file name.
///
/// Fails only if `root` is missing or not a directory; per-entry errors are
/// logged at `warn` and skipped.
pub fn scan(root: &Path, options: &ScanOptions) -> Result<Vec<Artifact>, StoreError> {
    let meta = match std::fs::metadata(root) {
        Ok(meta) => meta,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(StoreError::NotFound(root.to_path_buf()));
        }
        Err(e) => return Err(StoreError::io(root, e)),
    };
    if !meta.is_dir() {
        return Err(StoreError::NotADirectory(root.to_path_buf()));
    }

    let mut walker = WalkDir::new(root).min_depth(1);
    if !options.recursive {
        walker = walker.max_depth(1);
    }

    let show_hidden = options.show_hidden;
    let mut artifacts = Vec::new();
    let mut skipped = 0usize;

    // Hidden directories are pruned together with their contents.
    let entries = walker
        .into_iter()
        .filter_entry(|e| show_hidden || !is_hidden(e));

    for entry in entries {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                warn!(error = %e, "skipping unreadable entry");
                skipped += 1;
                continue;
            }
        };
        if entry.file_type().is_dir() || !is_signable(entry.path()) {
            continue;
        }
        // Follows symlinks so a linked binary reports its target's size.
        let size = match std::fs::metadata(entry.path()) {
            Ok(meta) if meta.is_file() => meta.len(),
            Ok(_) => continue,
            Err(e) => {
                warn!(path = %entry.path().display(), error = %e, "stat failed, skipping");
                skipped += 1;
                continue;
            }
        };
        debug!(path = %entry.path().display(), size, "found signable file");
        artifacts.push(Artifact::new(entry.into_path(), size));
    }

    artifacts.sort_by(|a, b| a.name().cmp(b.name()).then_with(|| a.path().cmp(b.path())));
    info!(
        root = %root.display(),
        found = artifacts.len(),
        skipped,
        recursive = options.recursive,
        "scan complete"
    );
    Ok(artifacts)
}
