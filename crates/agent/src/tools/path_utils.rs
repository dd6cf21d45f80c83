//! Path confinement for workspace tools

use std::path::{Component, Path, PathBuf};

/// A path resolved outside the workspace
#[derive(Debug, Clone)]
pub struct PathValidationError {
    pub path: String,
    pub workspace: String,
}

impl std::fmt::Display for PathValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Path {} is outside workspace {}",
            self.path, self.workspace
        )
    }
}

impl std::error::Error for PathValidationError {}

/// Resolve `path` against the workspace and make sure it stays inside it
///
/// Relative paths are joined to the workspace, `~` is expanded, symlinks
/// of existing ancestors are resolved and `..` is folded lexically for the
/// part that does not exist yet.
pub async fn validate_workspace_path(
    path: &str,
    workspace_root: &Path,
) -> Result<PathBuf, Box<dyn std::error::Error + Send + Sync>> {
    let expanded = if path.starts_with('/') || path.starts_with('~') {
        kestrel_config::paths::expand_home(path)
    } else {
        workspace_root.join(path)
    };

    let absolute = resolve(&expanded).await?;

    let canonical_workspace = match tokio::fs::canonicalize(workspace_root).await {
        Ok(p) => p,
        Err(_) => normalize(&absolute_from_cwd(workspace_root)?),
    };

    if !absolute.starts_with(&canonical_workspace) {
        return Err(Box::new(PathValidationError {
            path: path.to_string(),
            workspace: canonical_workspace.display().to_string(),
        }));
    }

    Ok(absolute)
}

fn absolute_from_cwd(path: &Path) -> std::io::Result<PathBuf> {
    if path.is_absolute() {
        Ok(path.to_path_buf())
    } else {
        Ok(std::env::current_dir()?.join(path))
    }
}

/// Canonicalize the longest existing ancestor, then append the rest
async fn resolve(path: &Path) -> std::io::Result<PathBuf> {
    let normalized = normalize(&absolute_from_cwd(path)?);

    let mut existing = normalized.as_path();
    let mut rest = Vec::new();
    loop {
        if let Ok(canonical) = tokio::fs::canonicalize(existing).await {
            let mut out = canonical;
            for part in rest.iter().rev() {
                out.push(part);
            }
            return Ok(out);
        }
        match (existing.parent(), existing.file_name()) {
            (Some(parent), Some(name)) => {
                rest.push(name.to_os_string());
                existing = parent;
            }
            _ => return Ok(normalized),
        }
    }
}

/// Lexically fold `.` and `..`
fn normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                out.pop();
            }
            other => out.push(other.as_os_str()),
        }
    }
    out
}
