use std::collections::BTreeMap;
use std::ffi::OsString;
use std::process::{Output, Stdio};

use async_trait::async_trait;
use mill_core::paths::NIXPKGS;
use tokio::process::Command;
use tracing::debug;

use crate::package::{PackageIndex, PackageInfo};
use crate::{NixError, Result};

const INSTALL_HINT: &str =
    "nix was not found on PATH; install it from https://nixos.org/download or rerun with --no-nix";

/// Fail with [`NixError::ResolverUnavailable`] unless `nix` is on `PATH`.
pub fn ensure_available() -> Result<()> {
    which::which("nix")
        .map(|_| ())
        .map_err(|_| NixError::ResolverUnavailable(INSTALL_HINT.to_string()))
}

/// [`PackageIndex`] backed by the `nix-env` command line tool.
#[derive(Debug, Clone)]
pub struct NixEnv {
    program: OsString,
    leading_args: Vec<OsString>,
    nixpkgs: String,
}

impl Default for NixEnv {
    fn default() -> Self {
        Self {
            program: "nix-env".into(),
            leading_args: Vec::new(),
            nixpkgs: NIXPKGS.to_string(),
        }
    }
}

impl NixEnv {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drive a different executable, with `leading_args` placed before the
    /// `nix-env` arguments.
    pub fn with_command(
        program: impl Into<OsString>,
        leading_args: impl IntoIterator<Item = impl Into<OsString>>,
    ) -> Self {
        Self {
            program: program.into(),
            leading_args: leading_args.into_iter().map(Into::into).collect(),
            ..Self::default()
        }
    }

    async fn run(&self, args: &[&str]) -> Result<Output> {
        debug!(program = ?self.program, ?args, "nix-env");
        Command::new(&self.program)
            .args(&self.leading_args)
            .args(args)
            .stdin(Stdio::null())
            .output()
            .await
            .map_err(|e| {
                NixError::ResolverUnavailable(format!(
                    "failed to run {}: {e}",
                    self.program.to_string_lossy()
                ))
            })
    }
}

fn stderr_of(output: &Output) -> String {
    String::from_utf8_lossy(&output.stderr).trim().to_string()
}

#[async_trait]
impl PackageIndex for NixEnv {
    async fn query(&self, name: &str) -> Result<Vec<PackageInfo>> {
        let output = self
            .run(&["--file", self.nixpkgs.as_str(), "--query", name, "--json", "--meta"])
            .await?;
        if !output.status.success() {
            debug!(package = name, status = %output.status, "query found nothing");
            return Ok(Vec::new());
        }
        let found: BTreeMap<String, PackageInfo> = serde_json::from_slice(&output.stdout)?;
        Ok(found.into_values().collect())
    }

    async fn install(&self, name: &str) -> Result<()> {
        let attr = format!("nixpkgs.{name}");
        let output = self.run(&["--install", "--attr", attr.as_str()]).await?;
        if output.status.success() {
            Ok(())
        } else {
            Err(NixError::InstallFailed {
                name: name.to_string(),
                stderr: stderr_of(&output),
            })
        }
    }

    async fn attr_paths(&self, names: &[String]) -> Result<BTreeMap<String, PackageInfo>> {
        if names.is_empty() {
            return Ok(BTreeMap::new());
        }
        let mut args = vec![
            "--json",
            "--file",
            self.nixpkgs.as_str(),
            "--query",
            "--available",
            "--attr-path",
        ];
        args.extend(names.iter().map(String::as_str));
        let output = self.run(&args).await?;
        if !output.status.success() {
            return Err(NixError::QueryFailed(stderr_of(&output)));
        }
        Ok(serde_json::from_slice(&output.stdout)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// A stand-in `nix-env` written as an inline `sh -c` script; `$@` holds the
    /// arguments the driver passed.
    fn fake(script: &str) -> NixEnv {
        NixEnv::with_command("sh", ["-c", script, "nix-env"])
    }

    const FAKE: &str = r#"
case "$*" in
  *--install*nixpkgs.broken*) echo "error: attribute 'broken' missing" >&2; exit 1 ;;
  *--install*) exit 0 ;;
  *--attr-path*) echo '{"hello":{"name":"hello-2.12","pname":"hello"},"jq":{"name":"jq-1.7","pname":"jq"}}' ;;
  *--query\ hello*) echo '{"hello-2.12":{"name":"hello-2.12","pname":"hello","version":"2.12"}}' ;;
  *--query\ python*) echo '{"a":{"name":"python3-3.11"},"b":{"name":"python3-3.12"}}' ;;
  *) exit 1 ;;
esac
"#;

    #[tokio::test]
    async fn query_parses_matches() {
        let found = fake(FAKE).query("hello").await.unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].version, "2.12");
        assert_eq!(fake(FAKE).query("python").await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn query_failure_means_not_installed() {
        assert!(fake(FAKE).query("absent").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn install_failure_carries_stderr() {
        let err = fake(FAKE).install("broken").await.unwrap_err();
        match err {
            NixError::InstallFailed { name, stderr } => {
                assert_eq!(name, "broken");
                assert!(stderr.contains("attribute 'broken' missing"), "{stderr}");
            }
            other => panic!("expected InstallFailed, got {other}"),
        }
        fake(FAKE).install("hello").await.unwrap();
    }

    #[tokio::test]
    async fn attr_paths_batches_names() {
        let names = vec!["hello".to_string(), "jq".to_string()];
        let found = fake(FAKE).attr_paths(&names).await.unwrap();
        assert_eq!(found.keys().collect::<Vec<_>>(), vec!["hello", "jq"]);
        assert!(fake(FAKE).attr_paths(&[]).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn missing_tool_is_unavailable() {
        let index = NixEnv::with_command("mill-test-no-such-binary", Vec::<String>::new());
        let err = index.query("hello").await.unwrap_err();
        assert!(matches!(err, NixError::ResolverUnavailable(_)));
    }
}
