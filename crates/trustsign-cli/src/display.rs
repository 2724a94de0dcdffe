//! Terminal rendering for scan results and signing outcomes.

use std::path::Path;

use trustsign_core::{Artifact, ArtifactStatus, Progress};
use trustsign_engine::SigningRequest;

const STATUS_WIDTH: usize = 11;
const SIZE_WIDTH: usize = 10;

// ── Public API ──

/// One row per artifact: status, size, then the path relative to `root`.
pub fn print_artifacts(root: &Path, artifacts: &[Artifact]) {
    if artifacts.is_empty() {
        println!("No signable files found in {}", root.display());
        return;
    }
    println!(
        "{:<STATUS_WIDTH$}  {:>SIZE_WIDTH$}  PATH",
        "STATUS", "SIZE"
    );
    for artifact in artifacts {
        println!("{}", artifact_row(root, artifact));
        if let Some(message) = artifact.error_message() {
            println!("{:<STATUS_WIDTH$}  {:>SIZE_WIDTH$}  └ {message}", "", "");
        }
    }
    let total: u64 = artifacts.iter().map(|a| a.size_bytes()).sum();
    println!(
        "\n{} file(s), {}",
        artifacts.len(),
        format_size(total)
    );
}

/// Request header plus per-file outcome.
pub fn print_request_summary(request: &SigningRequest, root: &Path, artifacts: &[Artifact]) {
    let statuses: Vec<ArtifactStatus> = artifacts.iter().map(|a| a.status()).collect();
    let progress = Progress::from_statuses(&statuses);

    println!();
    println!("Request   {}", request.request_id());
    if let Some(remote) = request.remote_id() {
        println!("Remote    {remote}");
    }
    println!("State     {}", request.state());
    println!("Result    {}", progress_line(&progress));
    if let Some(message) = request.error_message() {
        println!("Detail    {message}");
    }
    println!();
    print_artifacts(root, artifacts);
}

// ── Helpers ──

fn artifact_row(root: &Path, artifact: &Artifact) -> String {
    let shown = artifact.path().strip_prefix(root).unwrap_or(artifact.path());
    format!(
        "{:<STATUS_WIDTH$}  {:>SIZE_WIDTH$}  {}",
        artifact.status().as_str(),
        format_size(artifact.size_bytes()),
        shown.display()
    )
}

fn progress_line(progress: &Progress) -> String {
    format!(
        "{} signed, {} failed, {} total ({:.0}%)",
        progress.completed,
        progress.failed,
        progress.total,
        progress.percent()
    )
}

/// Human-readable size using binary units.
pub fn format_size(bytes: u64) -> String {
    const UNITS: [&str; 4] = ["KiB", "MiB", "GiB", "TiB"];
    if bytes < 1024 {
        return format!("{bytes} B");
    }
    let mut value = bytes as f64 / 1024.0;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    format!("{value:.1} {}", UNITS[unit])
}
