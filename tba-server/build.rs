//! Build script for tba-server
//!
//! Exposes build identification to both binaries as compile-time env vars:
//! `GIT_HASH` (short hash, or `TBA_GIT_HASH` for builds from a source
//! tarball), `BUILD_TIMESTAMP` and `BUILD_PROFILE`. Reruns only when the
//! checked-out commit changes.

use std::path::{Path, PathBuf};
use std::process::Command;

fn git(args: &[&str]) -> Option<String> {
    let output = Command::new("git").args(args).output().ok()?;
    if !output.status.success() {
        return None;
    }
    String::from_utf8(output.stdout)
        .ok()
        .map(|s| s.trim().to_string())
}

/// `.git/HEAD` plus the branch ref it points at, when building from a checkout
fn git_watch_paths(workspace_root: &Path) -> Vec<PathBuf> {
    let git_dir = workspace_root.join(".git");
    let head = git_dir.join("HEAD");
    let mut paths = Vec::new();

    if let Ok(contents) = std::fs::read_to_string(&head) {
        if let Some(reference) = contents.trim().strip_prefix("ref: ") {
            paths.push(git_dir.join(reference));
        }
        paths.push(head);
    }
    paths
}

fn main() {
    let manifest_dir = PathBuf::from(std::env::var("CARGO_MANIFEST_DIR").unwrap_or_default());
    let workspace_root = manifest_dir.parent().unwrap_or(manifest_dir.as_path());

    println!("cargo:rerun-if-changed=build.rs");
    println!("cargo:rerun-if-env-changed=TBA_GIT_HASH");
    for path in git_watch_paths(workspace_root) {
        println!("cargo:rerun-if-changed={}", path.display());
    }

    let git_hash = std::env::var("TBA_GIT_HASH")
        .ok()
        .filter(|hash| !hash.is_empty())
        .or_else(|| git(&["rev-parse", "--short=8", "HEAD"]))
        .unwrap_or_else(|| "unknown".to_string());

    let build_timestamp = chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Secs, true);
    let profile = std::env::var("PROFILE").unwrap_or_else(|_| "unknown".to_string());

    println!("cargo:rustc-env=GIT_HASH={}", git_hash);
    println!("cargo:rustc-env=BUILD_TIMESTAMP={}", build_timestamp);
    println!("cargo:rustc-env=BUILD_PROFILE={}", profile);
}
