use std::path::{Path, PathBuf};

/// Resolve the project root.
///
/// Priority:
/// 1. `--root` flag / `MILL_ROOT` env var (passed in as `explicit`)
/// 2. Walk upward from `cwd` looking for `file`
/// 3. Fall back to `cwd`
///
/// The result is always absolute so `PWD` and relative `dir`s are stable.
pub fn resolve_root(explicit: Option<&Path>, file: &str) -> PathBuf {
    let cwd = std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."));
    if let Some(p) = explicit {
        return cwd.join(p);
    }
    find_upward(&cwd, file).unwrap_or(cwd)
}

fn find_upward(start: &Path, file: &str) -> Option<PathBuf> {
    start
        .ancestors()
        .find(|dir| dir.join(file).is_file())
        .map(Path::to_path_buf)
}
