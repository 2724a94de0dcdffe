//! Filesystem layer: artifact discovery, backup/replace, settings persistence.

mod error;
pub use error::StoreError;

pub mod backup;
pub mod scan;
pub mod settings_file;

pub use backup::BackupManager;
pub use scan::{ScanOptions, scan};
pub use settings_file::JsonSettingsFile;
