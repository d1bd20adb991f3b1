use std::path::{Path, PathBuf};

/// Resolves the working-tree directory for `name` under `root`.
///
/// The name is used verbatim, unicode included. Names that would land
/// outside `root` are rejected, never sanitized.
pub fn repo_destination(root: &Path, name: &str) -> Result<PathBuf, String> {
    if name.trim().is_empty() {
        return Err("repository name is empty".to_string());
    }
    if name == "." || name == ".." {
        return Err(format!("repository name {name:?} is not a valid directory"));
    }
    if name.contains(['/', '\\', '\0']) {
        return Err(format!(
            "repository name {name:?} would escape the destination directory"
        ));
    }
    Ok(root.join(name))
}
