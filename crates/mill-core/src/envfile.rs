//! Key/value environment stores and the `.env` file format.
//!
//! ```text
//! # comment
//! SIMPLE=xyz123
//! QUOTED="value with ${SIMPLE}"
//! HEREDOC=<<EOF
//! first line
//! second line
//! EOF
//! BLOCK="""
//! long text
//! """
//! ```
//!
//! Plain values are expanded as they are read: a reference resolves against
//! keys already parsed from the same file, then the fallback store, then the
//! host environment. Heredoc and triple-quoted blocks are kept verbatim.

use crate::error::{MillError, Result};
use crate::expand::{expand, host_var};
use std::collections::BTreeMap;
use std::path::Path;

const TRIPLE_QUOTES: [&str; 2] = ["\"\"\"", "'''"];

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Env {
    vars: BTreeMap<String, String>,
}

impl Env {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of the current process environment.
    pub fn from_host() -> Self {
        std::env::vars().collect()
    }

    /// Load one or more env files, later files overriding earlier ones.
    pub fn load<P: AsRef<Path>>(paths: &[P]) -> Result<Self> {
        Self::load_with_fallback(&Env::new(), paths)
    }

    /// Load env files, expanding values against `fallback` when a name is not
    /// defined in the files themselves.
    pub fn load_with_fallback<P: AsRef<Path>>(fallback: &Env, paths: &[P]) -> Result<Self> {
        let mut env = Env::new();
        for path in paths {
            env.load_file(path.as_ref(), fallback)?;
        }
        Ok(env)
    }

    /// Read a single file into this store. An empty path is a no-op.
    pub fn load_file(&mut self, path: &Path, fallback: &Env) -> Result<()> {
        if path.as_os_str().is_empty() {
            return Ok(());
        }
        let content = match std::fs::read_to_string(path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(MillError::EnvFileNotFound(path.to_path_buf()));
            }
            Err(e) => return Err(e.into()),
        };
        self.parse_str(&content, fallback);
        Ok(())
    }

    /// Parse env-file formatted text into this store.
    pub fn parse_str(&mut self, content: &str, fallback: &Env) {
        let mut lines = content.lines();
        while let Some(raw) = lines.next() {
            let line = raw.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let Some((key, value)) = line.split_once('=') else {
                continue;
            };
            let key = key.trim();
            let key = key.strip_prefix("export ").map(str::trim).unwrap_or(key);
            if key.is_empty() {
                continue;
            }
            let value = value.trim();

            let parsed = if let Some(rest) = value.strip_prefix("<<") {
                read_heredoc(&mut lines, rest)
            } else if let Some(marker) = TRIPLE_QUOTES.iter().find(|q| value.starts_with(**q)) {
                read_block(&mut lines, &value[marker.len()..], marker)
            } else {
                self.expand(strip_quotes(value), fallback)
            };
            self.vars.insert(key.to_string(), parsed);
        }
    }

    /// Expand `value` against this store, then `fallback`, then the host.
    pub fn expand(&self, value: &str, fallback: &Env) -> String {
        expand(value, |name| {
            self.get(name)
                .or_else(|| fallback.get(name))
                .map(str::to_string)
                .or_else(|| host_var(name))
        })
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.vars.get(key).map(String::as_str)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.vars.contains_key(key)
    }

    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.vars.insert(key.into(), value.into());
    }

    /// Overlay `other` on top of this store.
    pub fn extend(&mut self, other: &Env) {
        for (k, v) in &other.vars {
            self.vars.insert(k.clone(), v.clone());
        }
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.vars.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.vars.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.vars.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vars.is_empty()
    }

    /// `KEY=VALUE` strings, suitable for printing or a child environment.
    pub fn to_pairs(&self) -> Vec<String> {
        self.vars.iter().map(|(k, v)| format!("{k}={v}")).collect()
    }
}

impl FromIterator<(String, String)> for Env {
    fn from_iter<I: IntoIterator<Item = (String, String)>>(iter: I) -> Self {
        Self {
            vars: iter.into_iter().collect(),
        }
    }
}

impl<'a> IntoIterator for &'a Env {
    type Item = (&'a String, &'a String);
    type IntoIter = std::collections::btree_map::Iter<'a, String, String>;

    fn into_iter(self) -> Self::IntoIter {
        self.vars.iter()
    }
}

fn strip_quotes(value: &str) -> &str {
    for quote in ['"', '\''] {
        if value.len() >= 2 && value.starts_with(quote) && value.ends_with(quote) {
            return &value[1..value.len() - 1];
        }
    }
    value
}

/// `rest` is everything after `<<`: the terminator token, optionally followed
/// by text that becomes the first line of the value.
fn read_heredoc<'a>(lines: &mut impl Iterator<Item = &'a str>, rest: &str) -> String {
    let (token, first) = match rest.split_once(char::is_whitespace) {
        Some((token, first)) => (token, first.trim()),
        None => (rest, ""),
    };
    let mut parts = Vec::new();
    if !first.is_empty() {
        parts.push(first.to_string());
    }
    for line in lines {
        if line.trim_end_matches('\r') == token {
            break;
        }
        parts.push(line.to_string());
    }
    parts.join("\n")
}

/// Collect a triple-quoted value. The closing marker ends the line that
/// carries it; text before the marker on that line is part of the value.
fn read_block<'a>(lines: &mut impl Iterator<Item = &'a str>, first: &str, marker: &str) -> String {
    if let Some(body) = first.strip_suffix(marker) {
        return body.to_string();
    }
    let mut parts = Vec::new();
    if !first.trim().is_empty() {
        parts.push(first.trim().to_string());
    }
    for line in lines {
        let line = line.trim_end();
        if let Some(body) = line.strip_suffix(marker) {
            if !body.is_empty() {
                parts.push(body.to_string());
            }
            break;
        }
        parts.push(line.to_string());
    }
    parts.join("\n")
}
