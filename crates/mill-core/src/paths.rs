use std::path::{Path, PathBuf};

// ---------------------------------------------------------------------------
// File constants
// ---------------------------------------------------------------------------

pub const CONFIG_FILE: &str = "mill.yml";

/// Nix expression every shell and query is evaluated against.
pub const NIXPKGS: &str = "<nixpkgs>";

pub fn config_path(root: &Path, file: &str) -> PathBuf {
    root.join(file)
}

/// Resolve a path from the config file relative to the directory holding it.
/// Absolute paths are returned unchanged.
pub fn resolve_relative(base: &Path, path: &str) -> PathBuf {
    if path.is_empty() {
        return PathBuf::new();
    }
    base.join(path)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_path_joins_root() {
        assert_eq!(
            config_path(Path::new("/proj"), CONFIG_FILE),
            PathBuf::from("/proj/mill.yml")
        );
    }

    #[test]
    fn absolute_paths_are_kept() {
        assert_eq!(
            resolve_relative(Path::new("/proj"), "/etc/app.env"),
            PathBuf::from("/etc/app.env")
        );
        assert_eq!(
            resolve_relative(Path::new("/proj"), "api/.env"),
            PathBuf::from("/proj/api/.env")
        );
        assert_eq!(resolve_relative(Path::new("/proj"), ""), PathBuf::new());
    }
}
