use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use glob::Pattern;
use tracing::debug;

/// Files to upload: every include pattern in order, less anything an
/// exclude pattern matches. Paths are relative to `base_dir`; a file
/// reached by several include patterns keeps its first position.
pub fn collect_files(base_dir: &Path, include: &[String], exclude: &[String]) -> Result<Vec<PathBuf>> {
    let excludes = exclude
        .iter()
        .map(|p| Pattern::new(p).with_context(|| format!("invalid exclude pattern '{p}'")))
        .collect::<Result<Vec<_>>>()?;

    // The base directory is literal; only the include pattern is a glob.
    let base = PathBuf::from(Pattern::escape(&base_dir.to_string_lossy()));
    let mut files: Vec<PathBuf> = Vec::new();
    for pattern in include {
        let absolute = base.join(pattern);
        let absolute = absolute.to_string_lossy();
        let mut matched: Vec<PathBuf> = glob::glob(&absolute)
            .with_context(|| format!("invalid include pattern '{pattern}'"))?
            .filter_map(|entry| entry.ok())
            .filter(|path| path.is_file())
            .collect();
        matched.sort();

        for path in matched {
            let relative = path.strip_prefix(base_dir).unwrap_or(&path).to_path_buf();
            if excludes.iter().any(|ex| ex.matches_path(&relative)) {
                debug!(file = %relative.display(), "excluded from upload");
                continue;
            }
            if !files.contains(&relative) {
                files.push(relative);
            }
        }
    }
    Ok(files)
}
