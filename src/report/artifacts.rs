//! Artifact manifest

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// A declared artifact path as found after a stage
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Artifact {
    /// Declared path, relative to the workspace
    pub path: PathBuf,
    /// Whether anything exists at the path
    pub exists: bool,
    /// Size in bytes; directories report the sum of their files
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub size: Option<u64>,
}

/// Records the declared artifact paths of a stage
///
/// Missing paths are still listed with `exists: false`.
pub fn collect(workspace: &Path, paths: &[PathBuf]) -> Vec<Artifact> {
    paths
        .iter()
        .map(|path| {
            let full = workspace.join(path);
            let size = disk_size(&full);
            Artifact {
                path: path.clone(),
                exists: size.is_some(),
                size,
            }
        })
        .collect()
}

fn disk_size(path: &Path) -> Option<u64> {
    let meta = std::fs::metadata(path).ok()?;
    if !meta.is_dir() {
        return Some(meta.len());
    }
    let total = std::fs::read_dir(path)
        .ok()?
        .filter_map(Result::ok)
        .filter_map(|entry| disk_size(&entry.path()))
        .fold(0_u64, u64::saturating_add);
    Some(total)
}
