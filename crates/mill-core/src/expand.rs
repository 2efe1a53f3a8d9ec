//! Shell-style `$NAME` / `${NAME}` substitution.
//!
//! Only names that look like shell identifiers or positional digits are
//! substituted; any other `$` (e.g. `$(cmd)`, `$$`) is left untouched so the
//! shell that eventually runs the command still sees it.

use regex::{Captures, Regex};
use std::sync::OnceLock;

fn var_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_]*|[0-9]+)\}|\$([A-Za-z_][A-Za-z0-9_]*|[0-9]+)")
            .expect("valid regex")
    })
}

/// Replace every variable reference in `value` using `lookup`.
///
/// Names `lookup` does not know about expand to the empty string.
pub fn expand<F>(value: &str, mut lookup: F) -> String
where
    F: FnMut(&str) -> Option<String>,
{
    var_re()
        .replace_all(value, |caps: &Captures<'_>| {
            let name = caps
                .get(1)
                .or_else(|| caps.get(2))
                .map(|m| m.as_str())
                .unwrap_or_default();
            lookup(name).unwrap_or_default()
        })
        .into_owned()
}

/// Host environment lookup, used as the last resort by every expansion.
pub fn host_var(name: &str) -> Option<String> {
    std::env::var(name).ok()
}
