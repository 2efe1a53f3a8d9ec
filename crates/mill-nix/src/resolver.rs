use std::fmt;
use std::sync::Arc;

use futures::future::join_all;
use mill_core::{Procfile, Requirement};
use serde::Serialize;
use tracing::{debug, info};

use crate::package::{PackageIndex, PackageInfo};
use crate::{NixError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DependencyState {
    Unknown,
    Installed,
    /// Installed, but more than one version matched so builds may differ.
    InstalledAmbiguous,
    NotInstalled,
}

impl DependencyState {
    pub fn as_str(&self) -> &'static str {
        match self {
            DependencyState::Unknown => "unknown",
            DependencyState::Installed => "installed",
            DependencyState::InstalledAmbiguous => "installed (ambiguous)",
            DependencyState::NotInstalled => "not installed",
        }
    }
}

impl fmt::Display for DependencyState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Dependency {
    pub name: String,
    pub attr: Option<String>,
    pub state: DependencyState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub package: Option<PackageInfo>,
}

impl Dependency {
    pub fn new(req: &Requirement) -> Self {
        Self {
            name: req.name.clone(),
            attr: req.attr.clone(),
            state: DependencyState::Unknown,
            package: None,
        }
    }

    pub fn is_satisfied(&self) -> bool {
        matches!(
            self.state,
            DependencyState::Installed | DependencyState::InstalledAmbiguous
        )
    }

    /// What to hand the environment shell: the pinned attribute when known.
    pub fn shell_package(&self) -> &str {
        self.attr.as_deref().unwrap_or(&self.name)
    }

    /// Whether `pkg` (from an attribute-path listing) is this dependency.
    fn matches(&self, pkg: &PackageInfo) -> bool {
        match &self.package {
            Some(known) if !known.name.is_empty() => known.name == pkg.name,
            _ => pkg.pname == self.name || pkg.name == self.name,
        }
    }

    async fn refresh(&mut self, index: &dyn PackageIndex) -> Result<()> {
        if self.attr.is_some() {
            self.state = DependencyState::Installed;
            return Ok(());
        }
        let found = index.query(&self.name).await?;
        self.state = match found.len() {
            0 => DependencyState::NotInstalled,
            1 => DependencyState::Installed,
            _ => DependencyState::InstalledAmbiguous,
        };
        self.package = found.into_iter().next();
        debug!(package = %self.name, state = %self.state, "queried");
        Ok(())
    }
}

/// Tracks every package a config requires and drives the index to satisfy
/// and pin them.
pub struct Resolver {
    index: Arc<dyn PackageIndex>,
    deps: Vec<Dependency>,
}

impl Resolver {
    pub fn new(index: Arc<dyn PackageIndex>, procfile: &Procfile) -> Self {
        let deps = procfile.requirements().iter().map(Dependency::new).collect();
        Self { index, deps }
    }

    pub fn dependencies(&self) -> &[Dependency] {
        &self.deps
    }

    /// Query every dependency concurrently; returns once all have answered.
    pub async fn query_all(&mut self) -> Result<()> {
        let index = &*self.index;
        join_all(self.deps.iter_mut().map(|dep| dep.refresh(index)))
            .await
            .into_iter()
            .collect()
    }

    /// Install every `NotInstalled` dependency concurrently. A failure never
    /// stops the other installs; all failures come back together.
    pub async fn install_missing(&mut self) -> Result<()> {
        let index = &*self.index;
        let results = join_all(
            self.deps
                .iter_mut()
                .filter(|dep| dep.state == DependencyState::NotInstalled)
                .map(|dep| async move {
                    info!(package = %dep.name, "installing");
                    index.install(&dep.name).await?;
                    dep.refresh(index).await
                }),
        )
        .await;

        let failures: Vec<NixError> = results.into_iter().filter_map(|r| r.err()).collect();
        if failures.is_empty() {
            Ok(())
        } else {
            Err(NixError::InstallsFailed(failures))
        }
    }

    /// Resolve attribute paths for every unpinned dependency in one call and
    /// persist them into `procfile`. Returns true if the file was rewritten.
    pub async fn pin(&mut self, procfile: &mut Procfile) -> Result<bool> {
        let names: Vec<String> = self
            .deps
            .iter()
            .filter(|dep| dep.attr.is_none())
            .map(|dep| dep.name.clone())
            .collect();
        if names.is_empty() {
            return Ok(false);
        }

        let found = self.index.attr_paths(&names).await?;
        let mut changed = false;
        for (attr, pkg) in &found {
            let Some(dep) = self
                .deps
                .iter_mut()
                .find(|dep| dep.attr.is_none() && dep.matches(pkg))
            else {
                continue;
            };
            dep.attr = Some(attr.clone());
            changed |= procfile.pin(&dep.name, attr);
        }
        if changed {
            procfile.save()?;
            info!(path = %procfile.path().display(), "pinned package references");
        }
        Ok(changed)
    }

    pub fn all_satisfied(&self) -> bool {
        self.deps.iter().all(Dependency::is_satisfied)
    }

    /// Fail with every package the index still does not report, e.g. after an
    /// install that exited cleanly without providing it.
    pub fn ensure_satisfied(&self) -> Result<()> {
        if self.all_satisfied() {
            return Ok(());
        }
        let missing = self
            .deps
            .iter()
            .filter(|dep| !dep.is_satisfied())
            .map(|dep| dep.name.clone())
            .collect();
        Err(NixError::Unsatisfied(missing))
    }

    pub fn all_pinned(&self) -> bool {
        self.deps.iter().all(|dep| dep.attr.is_some())
    }

    /// Shell package arguments for `names`, in order.
    pub fn shell_packages(&self, names: &[String]) -> Vec<String> {
        names
            .iter()
            .map(|name| {
                self.deps
                    .iter()
                    .find(|dep| &dep.name == name)
                    .map(|dep| dep.shell_package().to_string())
                    .unwrap_or_else(|| name.clone())
            })
            .collect()
    }
}
