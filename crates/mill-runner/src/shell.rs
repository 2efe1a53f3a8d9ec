use std::path::PathBuf;

use mill_core::expand::host_var;
use mill_core::paths::NIXPKGS;
use mill_core::Env;
use tokio::process::Command;

/// Host variables `nix-shell` itself needs before `--pure` takes effect.
const NIX_PASSTHROUGH: [&str; 6] = [
    "PATH",
    "HOME",
    "USER",
    "NIX_PATH",
    "NIX_SSL_CERT_FILE",
    "TERM",
];

/// Everything needed to launch one command (or an interactive shell) inside
/// the environment shell.
#[derive(Debug, Clone, Default)]
pub struct Invocation {
    /// `None` starts an interactive shell.
    pub command: Option<String>,
    pub dir: PathBuf,
    pub env: Env,
    pub packages: Vec<String>,
    pub isolated: bool,
    /// Variables an isolated shell must preserve.
    pub keep: Vec<String>,
}

/// Turns an [`Invocation`] into a ready-to-spawn command. The caller decides
/// how stdio and process groups are wired.
pub trait ShellWrapper: Send + Sync {
    fn command(&self, invocation: &Invocation) -> Command;
}

/// Runs through `nix-shell` with the required packages.
#[derive(Debug, Clone)]
pub struct NixShell {
    nixpkgs: String,
}

impl Default for NixShell {
    fn default() -> Self {
        Self {
            nixpkgs: NIXPKGS.to_string(),
        }
    }
}

impl NixShell {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ShellWrapper for NixShell {
    fn command(&self, inv: &Invocation) -> Command {
        let mut cmd = Command::new("nix-shell");
        cmd.arg(&self.nixpkgs);
        if inv.isolated {
            cmd.arg("--pure");
            for key in &inv.keep {
                cmd.arg("--keep").arg(key);
            }
        }
        if !inv.packages.is_empty() {
            cmd.arg("--packages").args(&inv.packages);
        }
        if let Some(text) = &inv.command {
            cmd.arg("--command").arg(text);
        }

        let mut env = inv.env.clone();
        for key in NIX_PASSTHROUGH {
            if !env.contains_key(key) {
                if let Some(value) = host_var(key) {
                    env.set(key, value);
                }
            }
        }
        apply(&mut cmd, inv, &env);
        cmd
    }
}

/// Runs through `/bin/sh -c` with no package management. Interactive
/// invocations start `$SHELL`.
#[derive(Debug, Clone, Default)]
pub struct DirectShell;

impl ShellWrapper for DirectShell {
    fn command(&self, inv: &Invocation) -> Command {
        let mut cmd = match &inv.command {
            Some(text) => {
                let mut cmd = Command::new("/bin/sh");
                cmd.arg("-c").arg(text);
                cmd
            }
            None => Command::new(host_var("SHELL").unwrap_or_else(|| "/bin/sh".to_string())),
        };
        apply(&mut cmd, inv, &inv.env);
        cmd
    }
}

fn apply(cmd: &mut Command, inv: &Invocation, env: &Env) {
    cmd.env_clear().envs(env.iter());
    if !inv.dir.as_os_str().is_empty() {
        cmd.current_dir(&inv.dir);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(cmd: &Command) -> Vec<String> {
        cmd.as_std()
            .get_args()
            .map(|a| a.to_string_lossy().into_owned())
            .collect()
    }

    fn invocation() -> Invocation {
        let mut env = Env::new();
        env.set("SVC", "web");
        Invocation {
            command: Some("npm start".into()),
            dir: PathBuf::from("/proj"),
            env,
            packages: vec!["nodejs".into(), "hello".into()],
            isolated: false,
            keep: vec!["SVC".into(), "PWD".into()],
        }
    }

    #[test]
    fn nix_shell_arguments() {
        let cmd = NixShell::new().command(&invocation());
        assert_eq!(cmd.as_std().get_program(), "nix-shell");
        assert_eq!(
            args(&cmd),
            vec!["<nixpkgs>", "--packages", "nodejs", "hello", "--command", "npm start"]
        );
        assert_eq!(
            cmd.as_std().get_current_dir(),
            Some(std::path::Path::new("/proj"))
        );
    }

    #[test]
    fn isolated_nix_shell_is_pure_and_keeps_names() {
        let mut inv = invocation();
        inv.isolated = true;
        inv.command = None;
        let cmd = NixShell::new().command(&inv);
        assert_eq!(
            args(&cmd),
            vec![
                "<nixpkgs>", "--pure", "--keep", "SVC", "--keep", "PWD", "--packages", "nodejs",
                "hello"
            ]
        );
    }

    #[test]
    fn direct_shell_runs_sh_with_exact_environment() {
        let cmd = DirectShell.command(&invocation());
        assert_eq!(cmd.as_std().get_program(), "/bin/sh");
        assert_eq!(args(&cmd), vec!["-c", "npm start"]);
        let envs: Vec<_> = cmd
            .as_std()
            .get_envs()
            .map(|(k, v)| (k.to_owned(), v.map(|v| v.to_owned())))
            .collect();
        assert_eq!(envs.len(), 1);
        assert_eq!(envs[0].0, "SVC");
    }
}
