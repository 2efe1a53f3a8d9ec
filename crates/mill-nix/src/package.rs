use std::collections::BTreeMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::Result;

/// Package metadata as reported by `nix-env --json`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct PackageInfo {
    pub name: String,
    pub pname: String,
    pub version: String,
    pub system: String,
    pub output_name: String,
    pub meta: PackageMeta,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PackageMeta {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub available: bool,
    pub broken: bool,
    pub insecure: bool,
    pub unfree: bool,
}

/// The external package index.
///
/// Implementations must be safe to call concurrently: the resolver issues one
/// query or install per dependency at the same time.
#[async_trait]
pub trait PackageIndex: Send + Sync {
    /// Every installed package matching `name`. An empty result means the
    /// package is not installed.
    async fn query(&self, name: &str) -> Result<Vec<PackageInfo>>;

    /// Install `name` into the user profile.
    async fn install(&self, name: &str) -> Result<()>;

    /// Attribute path → package for every available package matching `names`.
    async fn attr_paths(&self, names: &[String]) -> Result<BTreeMap<String, PackageInfo>>;
}
