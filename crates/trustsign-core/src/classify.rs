//! Signable-artifact classification by file extension.
//!
//! A path is signable when its extension appears in [`SIGNABLE_EXTENSIONS`].
//! The comparison is ASCII case-insensitive and purely lexical: the file is
//! never opened or stat'ed.
//!
//! # Covered formats
//!
//! - Windows PE and installers: exe, dll, msi, cab, ocx, sys, scr
//! - Apple: dylib, app, framework, bundle, kext, ipa
//! - Packages: jar, apk, xap, vsix, nupkg

use std::path::Path;

/// Extensions accepted by [`is_signable`], lower-case, without the dot.
pub const SIGNABLE_EXTENSIONS: &[&str] = &[
    "exe",
    "dll",
    "msi",
    "cab",
    "ocx",
    "sys",
    "scr",
    "dylib",
    "app",
    "framework",
    "bundle",
    "kext",
    "jar",
    "apk",
    "ipa",
    "xap",
    "vsix",
    "nupkg",
];

/// Decide whether `path` names a signable artifact.
///
/// Returns `false` when the path has no extension, including dot-files such
/// as `.exe` whose whole name is the stem.
pub fn is_signable(path: &Path) -> bool {
    match path.extension().and_then(|ext| ext.to_str()) {
        Some(ext) if !ext.is_empty() => SIGNABLE_EXTENSIONS
            .iter()
            .any(|allowed| allowed.eq_ignore_ascii_case(ext)),
        _ => false,
    }
}

/// Lower-cased extension of `path`, or an empty string.
pub fn extension_of(path: &Path) -> String {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.to_ascii_lowercase())
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_listed_extension_is_signable() {
        for ext in SIGNABLE_EXTENSIONS {
            let name = format!("artifact.{ext}");
            assert!(is_signable(Path::new(&name)), "{name} should be signable");
        }
    }

    #[test]
    fn extension_match_ignores_case() {
        assert!(is_signable(Path::new("setup.EXE")));
        assert!(is_signable(Path::new("Library.Dll")));
        assert!(is_signable(Path::new("/opt/pkg/Tool.NuPkg")));
    }

    #[test]
    fn unknown_extensions_rejected() {
        assert!(!is_signable(Path::new("readme.txt")));
        assert!(!is_signable(Path::new("archive.exe.zip")));
        assert!(!is_signable(Path::new("notes.exe.md")));
    }

    #[test]
    fn extensionless_paths_rejected() {
        assert!(!is_signable(Path::new("Makefile")));
        assert!(!is_signable(Path::new("trailing.")));
        assert!(!is_signable(Path::new("")));
    }

    #[test]
    fn dotfile_without_stem_rejected() {
        assert!(!is_signable(Path::new(".exe")));
        assert!(is_signable(Path::new(".hidden.exe")));
    }

    #[test]
    fn extension_of_lowercases() {
        assert_eq!(extension_of(Path::new("a/B.MSI")), "msi");
        assert_eq!(extension_of(Path::new("noext")), "");
    }
}
