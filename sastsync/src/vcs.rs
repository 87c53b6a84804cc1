//! Reads repository state through the `git` command line.

use std::path::Path;
use std::process::Command;

use anyhow::{Context, Result, bail};

/// The checked-out branch, from `git rev-parse --abbrev-ref HEAD`.
pub fn current_branch(repo_dir: &Path) -> Result<String> {
    git(repo_dir, &["rev-parse", "--abbrev-ref", "HEAD"])
}

/// A human label for the current commit, from `git describe --tags --always`.
pub fn describe(repo_dir: &Path) -> Result<String> {
    git(repo_dir, &["describe", "--tags", "--always"])
}

fn git(repo_dir: &Path, args: &[&str]) -> Result<String> {
    let output = Command::new("git")
        .args(args)
        .current_dir(repo_dir)
        .output()
        .context("failed to run git")?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        bail!("git {} failed: {}", args.join(" "), stderr.trim());
    }

    let out = String::from_utf8_lossy(&output.stdout).trim().to_string();
    if out.is_empty() {
        bail!("git {} returned empty output", args.join(" "));
    }
    Ok(out)
}
