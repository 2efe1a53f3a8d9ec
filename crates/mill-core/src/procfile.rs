use crate::envfile::Env;
use crate::error::{MillError, Result};
use crate::{io, paths};
use serde::de::{self, Deserializer};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::fs::Permissions;
use std::path::{Path, PathBuf};
use tracing::debug;

pub const SUPPORTED_VERSION: &str = "1";

/// Prefix marking a command entry as a reference to another task.
pub const TASK_PREFIX: &str = ".@";

const TEMPLATE: &str = r#"version: "1"
requires:
  - hello
env:
  GREETING: hello from mill
services:
  web:
    desc: An example long-running service
    cmds:
      - hello -g "$GREETING"
tasks:
  greet:
    desc: Print a greeting
    usage: greet [name]
    cmds:
      - echo "hello $1"
"#;

// ---------------------------------------------------------------------------
// Requirement
// ---------------------------------------------------------------------------

/// A required package, optionally pinned to the attribute path it resolved to
/// on a previous run. Written as `name` or `name = attr`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Requirement {
    pub name: String,
    pub attr: Option<String>,
}

impl Requirement {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            attr: None,
        }
    }
}

impl TryFrom<String> for Requirement {
    type Error = String;

    fn try_from(value: String) -> std::result::Result<Self, Self::Error> {
        let (name, attr) = match value.split_once('=') {
            Some((name, attr)) => (name.trim(), Some(attr.trim())),
            None => (value.trim(), None),
        };
        if name.is_empty() {
            return Err(format!("requirement '{value}' has no package name"));
        }
        Ok(Self {
            name: name.to_string(),
            attr: attr.filter(|a| !a.is_empty()).map(str::to_string),
        })
    }
}

impl From<Requirement> for String {
    fn from(req: Requirement) -> Self {
        req.to_string()
    }
}

impl fmt::Display for Requirement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.attr {
            Some(attr) => write!(f, "{} = {}", self.name, attr),
            None => write!(f, "{}", self.name),
        }
    }
}

// ---------------------------------------------------------------------------
// Command
// ---------------------------------------------------------------------------

/// One entry of a `before` / `cmds` / `after` list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum Command {
    /// Text handed to the environment shell.
    Shell(String),
    /// Run another task's full before/cmds/after sequence.
    Task(String),
}

impl From<String> for Command {
    fn from(value: String) -> Self {
        match value.strip_prefix(TASK_PREFIX) {
            Some(task) => Command::Task(task.trim().to_string()),
            None => Command::Shell(value),
        }
    }
}

impl From<Command> for String {
    fn from(cmd: Command) -> Self {
        match cmd {
            Command::Shell(text) => text,
            Command::Task(name) => format!("{TASK_PREFIX}{name}"),
        }
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Command::Shell(text) => write!(f, "{text}"),
            Command::Task(name) => write!(f, "{TASK_PREFIX}{name}"),
        }
    }
}

// ---------------------------------------------------------------------------
// UnitKind
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UnitKind {
    Service,
    Task,
}

impl UnitKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            UnitKind::Service => "service",
            UnitKind::Task => "task",
        }
    }

    /// The variable carrying the unit's name in its environment.
    pub fn identity_var(&self) -> &'static str {
        match self {
            UnitKind::Service => "SVC",
            UnitKind::Task => "TASK",
        }
    }
}

impl fmt::Display for UnitKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// On-disk document
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
struct UnitDoc {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    desc: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    usage: Option<String>,
    #[serde(default, skip_serializing_if = "is_false")]
    hidden: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    service: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    dir: Option<String>,
    #[serde(
        default,
        skip_serializing_if = "BTreeMap::is_empty",
        deserialize_with = "de_env_map"
    )]
    env: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    envs: Vec<String>,
    #[serde(default, alias = "nixpkgs", skip_serializing_if = "Vec::is_empty")]
    requires: Vec<Requirement>,
    #[serde(default, skip_serializing_if = "is_false")]
    isolated: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    before: Vec<Command>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    cmds: Vec<Command>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    after: Vec<Command>,
}

impl UnitDoc {
    fn commands(&self) -> impl Iterator<Item = &Command> {
        self.before.iter().chain(&self.cmds).chain(&self.after)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
struct Document {
    #[serde(deserialize_with = "de_version")]
    version: String,
    #[serde(default, skip_serializing_if = "is_false")]
    isolated: bool,
    #[serde(
        default,
        skip_serializing_if = "BTreeMap::is_empty",
        deserialize_with = "de_env_map"
    )]
    env: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    envs: Vec<String>,
    #[serde(default, alias = "nixpkgs", skip_serializing_if = "Vec::is_empty")]
    requires: Vec<Requirement>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    services: BTreeMap<String, UnitDoc>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    tasks: BTreeMap<String, UnitDoc>,
}

impl Document {
    fn units(&self) -> impl Iterator<Item = (UnitKind, &String, &UnitDoc)> {
        self.services
            .iter()
            .map(|(n, d)| (UnitKind::Service, n, d))
            .chain(self.tasks.iter().map(|(n, d)| (UnitKind::Task, n, d)))
    }

    fn requirement_lists_mut(&mut self) -> impl Iterator<Item = &mut Vec<Requirement>> {
        std::iter::once(&mut self.requires)
            .chain(self.services.values_mut().map(|d| &mut d.requires))
            .chain(self.tasks.values_mut().map(|d| &mut d.requires))
    }
}

fn is_false(b: &bool) -> bool {
    !*b
}

fn scalar_to_string(value: serde_yaml::Value) -> Option<String> {
    match value {
        serde_yaml::Value::String(s) => Some(s),
        serde_yaml::Value::Number(n) => Some(n.to_string()),
        serde_yaml::Value::Bool(b) => Some(b.to_string()),
        serde_yaml::Value::Null => Some(String::new()),
        _ => None,
    }
}

fn de_version<'de, D: Deserializer<'de>>(d: D) -> std::result::Result<String, D::Error> {
    let value = serde_yaml::Value::deserialize(d)?;
    scalar_to_string(value).ok_or_else(|| de::Error::custom("version must be a string"))
}

fn de_env_map<'de, D: Deserializer<'de>>(
    d: D,
) -> std::result::Result<BTreeMap<String, String>, D::Error> {
    let raw = BTreeMap::<String, serde_yaml::Value>::deserialize(d)?;
    raw.into_iter()
        .map(|(key, value)| match scalar_to_string(value) {
            Some(v) => Ok((key, v)),
            None => Err(de::Error::custom(format!(
                "env value for '{key}' must be a scalar"
            ))),
        })
        .collect()
}

// ---------------------------------------------------------------------------
// Service
// ---------------------------------------------------------------------------

/// A resolved service or task definition.
#[derive(Debug, Clone)]
pub struct Service {
    name: String,
    kind: UnitKind,
    description: Option<String>,
    usage: Option<String>,
    hidden: bool,
    parent: Option<String>,
    dir: PathBuf,
    env: Env,
    isolated: bool,
    requires: Vec<String>,
    before: Vec<Command>,
    cmds: Vec<Command>,
    after: Vec<Command>,
}

impl Service {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> UnitKind {
        self.kind
    }

    pub fn description(&self) -> Option<&str> {
        self.description.as_deref()
    }

    pub fn usage(&self) -> Option<&str> {
        self.usage.as_deref()
    }

    /// The word this unit is invoked by on the command line: the first word of
    /// `usage` when one is set, otherwise the name.
    pub fn invocation_name(&self) -> &str {
        self.usage
            .as_deref()
            .and_then(|u| u.split_whitespace().next())
            .unwrap_or(&self.name)
    }

    pub fn hidden(&self) -> bool {
        self.hidden
    }

    pub fn parent(&self) -> Option<&str> {
        self.parent.as_deref()
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// The unit's own variables (`env` map then `envs` files), already expanded.
    pub fn env(&self) -> &Env {
        &self.env
    }

    pub fn isolated(&self) -> bool {
        self.isolated
    }

    /// Project, inherited and own package names, de-duplicated.
    pub fn requires(&self) -> &[String] {
        &self.requires
    }

    pub fn before(&self) -> &[Command] {
        &self.before
    }

    pub fn cmds(&self) -> &[Command] {
        &self.cmds
    }

    pub fn after(&self) -> &[Command] {
        &self.after
    }
}

// ---------------------------------------------------------------------------
// Procfile
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct Procfile {
    dir: PathBuf,
    path: PathBuf,
    permissions: Option<Permissions>,
    document: Document,
    env: Env,
    flag_env: Env,
    services: BTreeMap<String, Service>,
    tasks: BTreeMap<String, Service>,
}

impl Procfile {
    /// Load `dir/filename`. `flag_env` holds variables loaded from env files
    /// given on the command line; they sit in the ambient layer.
    pub fn load(dir: &Path, filename: &str, flag_env: Env) -> Result<Self> {
        let path = paths::config_path(dir, filename);
        let meta = match std::fs::metadata(&path) {
            Ok(m) => m,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(MillError::ConfigNotFound(path));
            }
            Err(e) => return Err(e.into()),
        };
        let content = std::fs::read_to_string(&path)?;
        let mut procfile = Self::parse(dir, &content, flag_env)
            .map_err(|e| match e {
                MillError::ConfigInvalid(msg) => {
                    MillError::ConfigInvalid(format!("{}: {msg}", path.display()))
                }
                other => other,
            })?;
        procfile.path = path;
        procfile.permissions = Some(meta.permissions());
        debug!(
            path = %procfile.path.display(),
            services = procfile.services.len(),
            tasks = procfile.tasks.len(),
            "Loaded config"
        );
        Ok(procfile)
    }

    /// Parse config text as if it lived in `dir`.
    pub fn parse(dir: &Path, content: &str, flag_env: Env) -> Result<Self> {
        let document: Document = serde_yaml::from_str(content)
            .map_err(|e| MillError::ConfigInvalid(e.to_string()))?;
        if document.version != SUPPORTED_VERSION {
            return Err(MillError::ConfigInvalid(format!(
                "unsupported version '{}', expected '{SUPPORTED_VERSION}'",
                document.version
            )));
        }
        validate_parents(&document)?;
        validate_task_references(&document)?;

        let env = scoped_env(dir, &document.env, &document.envs, &flag_env)?;

        let mut services = BTreeMap::new();
        let mut tasks = BTreeMap::new();
        for (kind, name, _) in document.units() {
            let unit = build_unit(dir, &document, &env, kind, name)?;
            match kind {
                UnitKind::Service => services.insert(name.clone(), unit),
                UnitKind::Task => tasks.insert(name.clone(), unit),
            };
        }

        Ok(Self {
            dir: dir.to_path_buf(),
            path: paths::config_path(dir, paths::CONFIG_FILE),
            permissions: None,
            document,
            env,
            flag_env,
            services,
            tasks,
        })
    }

    /// Write the starter config to `dir/filename` unless one already exists.
    /// Returns true if the file was written.
    pub fn create(dir: &Path, filename: &str) -> Result<bool> {
        io::write_if_missing(&paths::config_path(dir, filename), TEMPLATE.as_bytes())
    }

    /// Persist the document (including pins) back to the file it came from,
    /// keeping its permissions.
    pub fn save(&self) -> Result<()> {
        let data = serde_yaml::to_string(&self.document)?;
        io::atomic_write_with_permissions(&self.path, data.as_bytes(), self.permissions.clone())
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn version(&self) -> &str {
        &self.document.version
    }

    pub fn isolated(&self) -> bool {
        self.document.isolated
    }

    /// The project-level store: `env` then `envs`.
    pub fn env(&self) -> &Env {
        &self.env
    }

    pub fn flag_env(&self) -> &Env {
        &self.flag_env
    }

    pub fn services(&self) -> impl Iterator<Item = &Service> {
        self.services.values()
    }

    pub fn tasks(&self) -> impl Iterator<Item = &Service> {
        self.tasks.values()
    }

    pub fn service(&self, name: &str) -> Option<&Service> {
        self.services.get(name)
    }

    pub fn task(&self, name: &str) -> Option<&Service> {
        self.tasks.get(name)
    }

    /// Find a task by the name it is invoked with on the command line.
    pub fn task_for_invocation(&self, word: &str) -> Option<&Service> {
        self.tasks
            .get(word)
            .or_else(|| self.tasks.values().find(|t| t.invocation_name() == word))
    }

    /// A service by name, falling back to a task of that name.
    pub fn lookup(&self, name: &str) -> Result<&Service> {
        self.services
            .get(name)
            .or_else(|| self.tasks.get(name))
            .ok_or_else(|| MillError::NotFound(format!("unknown service or task '{name}'")))
    }

    /// Every requirement declared anywhere in the file, one entry per package.
    /// A pin found on any entry for a package applies to the package.
    pub fn requirements(&self) -> Vec<Requirement> {
        let doc = &self.document;
        let all = doc
            .requires
            .iter()
            .chain(doc.units().flat_map(|(_, _, d)| d.requires.iter()));
        let mut out: Vec<Requirement> = Vec::new();
        for req in all {
            match out.iter_mut().find(|r| r.name == req.name) {
                Some(existing) if existing.attr.is_none() => existing.attr = req.attr.clone(),
                Some(_) => {}
                None => out.push(req.clone()),
            }
        }
        out
    }

    /// Names of every required package, for shells not tied to one unit.
    pub fn packages(&self) -> Vec<String> {
        self.requirements().into_iter().map(|r| r.name).collect()
    }

    /// Record `attr` as the pinned reference for package `name` on every entry
    /// that requires it. Returns true if anything changed; call [`save`] to
    /// persist.
    ///
    /// [`save`]: Procfile::save
    pub fn pin(&mut self, name: &str, attr: &str) -> bool {
        let mut changed = false;
        for list in self.document.requirement_lists_mut() {
            for req in list.iter_mut().filter(|r| r.name == name) {
                if req.attr.as_deref() != Some(attr) {
                    req.attr = Some(attr.to_string());
                    changed = true;
                }
            }
        }
        changed
    }

    // -----------------------------------------------------------------------
    // Environment composition
    // -----------------------------------------------------------------------

    /// The full environment for a service or task.
    ///
    /// Layers, lowest priority first: the ambient layer (host environment
    /// unless isolated, then `--env` files), the project store, each parent
    /// service's own store from the root of the chain down, the unit's own
    /// store, and finally the identity variables (`SVC`/`TASK`, `PWD`).
    pub fn environ(&self, name: &str) -> Result<Env> {
        let unit = self.lookup(name)?;
        Ok(self.compose(unit, self.isolated() || unit.isolated))
    }

    /// Names an isolated shell must be told to keep: everything the config
    /// declares or inherits for this unit, without the host environment.
    pub fn env_keys(&self, name: &str) -> Result<Vec<String>> {
        let unit = self.lookup(name)?;
        Ok(self.compose(unit, true).keys().map(str::to_string).collect())
    }

    /// The project-level environment used when no unit is selected.
    pub fn base_environ(&self) -> Env {
        self.base(self.isolated())
    }

    pub fn base_env_keys(&self) -> Vec<String> {
        self.base(true).keys().map(str::to_string).collect()
    }

    fn base(&self, isolated: bool) -> Env {
        let mut env = self.project_layer(isolated);
        env.set("PWD", self.dir.display().to_string());
        env
    }

    fn compose(&self, unit: &Service, isolated: bool) -> Env {
        let mut env = self.layered(unit, isolated);
        env.set(unit.kind.identity_var(), unit.name.clone());
        if unit.kind == UnitKind::Task {
            if let Some(parent) = &unit.parent {
                env.set(UnitKind::Service.identity_var(), parent.clone());
            }
        }
        env.set("PWD", unit.dir.display().to_string());
        env
    }

    // Parent chains were checked for cycles at load time.
    fn layered(&self, unit: &Service, isolated: bool) -> Env {
        let mut env = match unit.parent.as_deref().and_then(|p| self.services.get(p)) {
            Some(parent) => self.layered(parent, isolated),
            None => self.project_layer(isolated),
        };
        env.extend(&unit.env);
        env
    }

    /// Host (unless isolated), then `--env` files, then the project store.
    fn project_layer(&self, isolated: bool) -> Env {
        let mut env = if isolated {
            Env::new()
        } else {
            Env::from_host()
        };
        env.extend(&self.flag_env);
        env.extend(&self.env);
        env
    }
}

// ---------------------------------------------------------------------------
// Load-time resolution
// ---------------------------------------------------------------------------

/// A store built from an `env` map and `envs` files, resolved against `outer`.
fn scoped_env(
    base: &Path,
    map: &BTreeMap<String, String>,
    files: &[String],
    outer: &Env,
) -> Result<Env> {
    let empty = Env::new();
    let mut env: Env = map
        .iter()
        .map(|(k, v)| (k.clone(), outer.expand(v, &empty)))
        .collect();
    let mut fallback = outer.clone();
    fallback.extend(&env);
    let paths: Vec<PathBuf> = files
        .iter()
        .map(|f| paths::resolve_relative(base, f))
        .collect();
    env.extend(&Env::load_with_fallback(&fallback, &paths)?);
    Ok(env)
}

fn build_unit(
    dir: &Path,
    doc: &Document,
    project_env: &Env,
    kind: UnitKind,
    name: &str,
) -> Result<Service> {
    let def = unit_doc(doc, kind, name);
    let env = scoped_env(dir, &def.env, &def.envs, project_env)?;

    let mut requires: Vec<String> = Vec::new();
    let mut push = |pkg: &str| {
        if !requires.iter().any(|r| r == pkg) {
            requires.push(pkg.to_string());
        }
    };
    for req in &doc.requires {
        push(&req.name);
    }
    for ancestor in chain(doc, def).iter().rev() {
        for req in &ancestor.requires {
            push(&req.name);
        }
    }

    Ok(Service {
        name: name.to_string(),
        kind,
        description: def.desc.clone(),
        usage: def.usage.clone(),
        hidden: def.hidden,
        parent: def.service.clone(),
        dir: resolve_dir(dir, doc, def),
        env,
        isolated: def.isolated,
        requires,
        before: def.before.clone(),
        cmds: def.cmds.clone(),
        after: def.after.clone(),
    })
}

fn unit_doc<'a>(doc: &'a Document, kind: UnitKind, name: &str) -> &'a UnitDoc {
    let map = match kind {
        UnitKind::Service => &doc.services,
        UnitKind::Task => &doc.tasks,
    };
    &map[name]
}

/// `def` followed by each of its ancestors, nearest first.
fn chain<'a>(doc: &'a Document, def: &'a UnitDoc) -> Vec<&'a UnitDoc> {
    let mut out = vec![def];
    let mut current = def;
    while let Some(parent) = current.service.as_deref().and_then(|p| doc.services.get(p)) {
        out.push(parent);
        current = parent;
    }
    out
}

/// The nearest `dir` along the inheritance chain, relative to the config
/// directory; the config directory itself when none is set.
fn resolve_dir(dir: &Path, doc: &Document, def: &UnitDoc) -> PathBuf {
    chain(doc, def)
        .iter()
        .find_map(|d| d.dir.as_deref())
        .map(|d| paths::resolve_relative(dir, d))
        .unwrap_or_else(|| dir.to_path_buf())
}

fn validate_parents(doc: &Document) -> Result<()> {
    for (kind, name, def) in doc.units() {
        if let Some(parent) = def.service.as_deref() {
            if !doc.services.contains_key(parent) {
                return Err(MillError::ConfigInvalid(format!(
                    "undefined service '{parent}' requested in {kind} '{name}'"
                )));
            }
        }
    }

    for start in doc.services.keys() {
        let mut seen: Vec<&str> = vec![start.as_str()];
        let mut current = start.as_str();
        while let Some(parent) = doc.services[current].service.as_deref() {
            if let Some(pos) = seen.iter().position(|n| *n == parent) {
                let mut cycle = seen[pos..].to_vec();
                cycle.push(parent);
                return Err(MillError::ConfigInvalid(format!(
                    "service inheritance cycle: {}",
                    cycle.join(" -> ")
                )));
            }
            seen.push(parent);
            current = parent;
        }
    }
    Ok(())
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Mark {
    Visiting,
    Done,
}

fn validate_task_references(doc: &Document) -> Result<()> {
    for (kind, name, def) in doc.units() {
        for cmd in def.commands() {
            if let Command::Task(task) = cmd {
                if !doc.tasks.contains_key(task) {
                    return Err(MillError::ConfigInvalid(format!(
                        "undefined task '{task}' referenced by {kind} '{name}'"
                    )));
                }
            }
        }
    }

    let mut marks: HashMap<&str, Mark> = HashMap::new();
    for name in doc.tasks.keys() {
        let mut stack = Vec::new();
        if let Some(cycle) = visit_task(doc, name, &mut marks, &mut stack) {
            return Err(MillError::ConfigInvalid(format!(
                "task delegation cycle: {}",
                cycle.join(" -> ")
            )));
        }
    }
    Ok(())
}

fn visit_task<'a>(
    doc: &'a Document,
    name: &'a str,
    marks: &mut HashMap<&'a str, Mark>,
    stack: &mut Vec<&'a str>,
) -> Option<Vec<&'a str>> {
    match marks.get(name) {
        Some(Mark::Done) => return None,
        Some(Mark::Visiting) => {
            let pos = stack.iter().position(|n| *n == name).unwrap_or(0);
            let mut cycle = stack[pos..].to_vec();
            cycle.push(name);
            return Some(cycle);
        }
        None => {}
    }
    marks.insert(name, Mark::Visiting);
    stack.push(name);
    for cmd in doc.tasks[name].commands() {
        if let Command::Task(next) = cmd {
            if let Some(cycle) = visit_task(doc, next, marks, stack) {
                return Some(cycle);
            }
        }
    }
    stack.pop();
    marks.insert(name, Mark::Done);
    None
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn parse(yaml: &str) -> Result<Procfile> {
        Procfile::parse(Path::new("/proj"), yaml, Env::new())
    }

    const BASIC: &str = r#"
version: "1"
env:
  SHARED: project
  PORT: 3000
requires:
  - hello
services:
  db:
    dir: db
    env:
      DB_NAME: app
    requires: [postgresql]
    cmds:
      - postgres -D data
  web:
    desc: the web app
    service: db
    env:
      PORT: 8080
    nixpkgs: [nodejs]
    cmds:
      - npm start
tasks:
  migrate:
    service: web
    usage: migrate [steps]
    before:
      - .@setup
    cmds:
      - npm run migrate -- $1
  setup:
    hidden: true
    cmds:
      - echo setup
"#;

    #[test]
    fn parses_units_and_metadata() {
        let pf = parse(BASIC).unwrap();
        assert_eq!(pf.version(), "1");
        assert_eq!(pf.services().count(), 2);
        assert_eq!(pf.tasks().count(), 2);

        let web = pf.service("web").unwrap();
        assert_eq!(web.kind(), UnitKind::Service);
        assert_eq!(web.description(), Some("the web app"));
        assert_eq!(web.parent(), Some("db"));

        let setup = pf.task("setup").unwrap();
        assert!(setup.hidden());
    }

    #[test]
    fn numeric_version_is_accepted() {
        let pf = parse("version: 1\n").unwrap();
        assert_eq!(pf.version(), "1");
    }

    #[test]
    fn unsupported_version_is_invalid() {
        let err = parse("version: \"2\"\n").unwrap_err();
        assert!(matches!(err, MillError::ConfigInvalid(ref m) if m.contains("unsupported version")));
    }

    #[test]
    fn missing_version_is_invalid() {
        assert!(matches!(
            parse("services: {}\n").unwrap_err(),
            MillError::ConfigInvalid(_)
        ));
    }

    #[test]
    fn unknown_fields_are_rejected() {
        let yaml = "version: \"1\"\nservices:\n  web:\n    command: npm start\n";
        assert!(matches!(parse(yaml).unwrap_err(), MillError::ConfigInvalid(_)));
    }

    #[test]
    fn dangling_parent_is_invalid() {
        let yaml = r#"
version: "1"
tasks:
  test:
    service: missing
    cmds: [make test]
"#;
        let err = parse(yaml).unwrap_err();
        assert!(
            matches!(err, MillError::ConfigInvalid(ref m) if m.contains("undefined service 'missing'")),
            "{err}"
        );
    }

    #[test]
    fn parent_cycle_is_invalid_and_named() {
        let yaml = r#"
version: "1"
services:
  a:
    service: b
  b:
    service: c
  c:
    service: a
"#;
        let err = parse(yaml).unwrap_err();
        match err {
            MillError::ConfigInvalid(msg) => {
                assert!(msg.contains("inheritance cycle"), "{msg}");
                assert!(msg.contains("a -> b -> c -> a"), "{msg}");
            }
            other => panic!("expected ConfigInvalid, got {other}"),
        }
    }

    #[test]
    fn self_parent_is_a_cycle() {
        let yaml = "version: \"1\"\nservices:\n  a:\n    service: a\n";
        assert!(matches!(parse(yaml).unwrap_err(), MillError::ConfigInvalid(_)));
    }

    #[test]
    fn commands_are_tagged_at_parse_time() {
        let pf = parse(BASIC).unwrap();
        let migrate = pf.task("migrate").unwrap();
        assert_eq!(migrate.before(), &[Command::Task("setup".into())]);
        assert_eq!(
            migrate.cmds(),
            &[Command::Shell("npm run migrate -- $1".into())]
        );
    }

    #[test]
    fn undefined_task_reference_is_invalid() {
        let yaml = "version: \"1\"\nservices:\n  web:\n    before: [.@nope]\n";
        let err = parse(yaml).unwrap_err();
        assert!(matches!(err, MillError::ConfigInvalid(ref m) if m.contains("undefined task 'nope'")));
    }

    #[test]
    fn task_delegation_cycle_is_invalid() {
        let yaml = r#"
version: "1"
tasks:
  a:
    cmds: [.@b]
  b:
    after: [.@a]
"#;
        let err = parse(yaml).unwrap_err();
        assert!(matches!(err, MillError::ConfigInvalid(ref m) if m.contains("task delegation cycle")));
    }

    #[test]
    fn directories_resolve_relative_and_inherit() {
        let pf = parse(BASIC).unwrap();
        assert_eq!(pf.service("db").unwrap().dir(), Path::new("/proj/db"));
        assert_eq!(pf.service("web").unwrap().dir(), Path::new("/proj/db"));
        assert_eq!(pf.task("migrate").unwrap().dir(), Path::new("/proj/db"));
        assert_eq!(pf.task("setup").unwrap().dir(), Path::new("/proj"));
    }

    #[test]
    fn packages_merge_global_parent_and_own() {
        let pf = parse(BASIC).unwrap();
        assert_eq!(
            pf.service("web").unwrap().requires(),
            &["hello", "postgresql", "nodejs"]
        );
        assert_eq!(
            pf.task("migrate").unwrap().requires(),
            &["hello", "postgresql", "nodejs"]
        );
        assert_eq!(pf.task("setup").unwrap().requires(), &["hello"]);
        assert_eq!(pf.packages(), vec!["hello", "postgresql", "nodejs"]);
    }

    #[test]
    fn identity_variables_cannot_be_overridden() {
        let yaml = r#"
version: "1"
env:
  SVC: from-project
services:
  web:
    env:
      SVC: nope
      PWD: /nope
tasks:
  lint:
    env:
      TASK: nope
"#;
        let pf = parse(yaml).unwrap();
        let web = pf.environ("web").unwrap();
        assert_eq!(web.get("SVC"), Some("web"));
        assert_eq!(web.get("PWD"), Some("/proj"));
        let lint = pf.environ("lint").unwrap();
        assert_eq!(lint.get("TASK"), Some("lint"));
        assert_eq!(lint.get("PWD"), Some("/proj"));
    }

    #[test]
    fn task_with_parent_carries_both_identities() {
        let pf = parse(BASIC).unwrap();
        let env = pf.environ("migrate").unwrap();
        assert_eq!(env.get("TASK"), Some("migrate"));
        assert_eq!(env.get("SVC"), Some("web"));
        assert_eq!(env.get("PWD"), Some("/proj/db"));
    }

    #[test]
    fn environment_inherits_through_parents() {
        let pf = parse(BASIC).unwrap();
        let env = pf.environ("migrate").unwrap();
        assert_eq!(env.get("SHARED"), Some("project"));
        assert_eq!(env.get("DB_NAME"), Some("app"));
        assert_eq!(env.get("PORT"), Some("8080"));
    }

    #[test]
    fn environ_is_idempotent() {
        let pf = parse(BASIC).unwrap();
        assert_eq!(pf.environ("web").unwrap(), pf.environ("web").unwrap());
    }

    #[test]
    fn unknown_unit_is_not_found() {
        let pf = parse(BASIC).unwrap();
        assert!(matches!(pf.environ("nope").unwrap_err(), MillError::NotFound(_)));
        assert!(pf.env_keys("nope").unwrap_err().is_not_found());
    }

    #[test]
    fn isolated_units_drop_the_host_environment() {
        let yaml = r#"
version: "1"
env:
  DECLARED: true
services:
  open:
    cmds: [env]
  sealed:
    isolated: true
    cmds: [env]
"#;
        let pf = parse(yaml).unwrap();
        let host = Env::from_host();
        let (host_key, host_value) = host
            .iter()
            .find(|(k, _)| !["DECLARED", "SVC", "PWD"].contains(k))
            .expect("test process has at least one environment variable");

        let open = pf.environ("open").unwrap();
        assert_eq!(open.get(host_key), Some(host_value));

        let sealed = pf.environ("sealed").unwrap();
        assert_eq!(sealed.get(host_key), None);
        assert_eq!(sealed.get("DECLARED"), Some("true"));
        let mut keys: Vec<_> = sealed.keys().collect();
        keys.sort();
        assert_eq!(keys, vec!["DECLARED", "PWD", "SVC"]);
    }

    #[test]
    fn env_keys_cover_declared_and_inherited_names_only() {
        let pf = parse(BASIC).unwrap();
        let keys = pf.env_keys("web").unwrap();
        for expected in ["SHARED", "PORT", "DB_NAME", "SVC", "PWD"] {
            assert!(keys.iter().any(|k| k == expected), "missing {expected}");
        }
        assert_eq!(keys.len(), 5);
    }

    #[test]
    fn flag_env_fills_gaps_but_never_beats_declared_values() {
        let mut flags = Env::new();
        flags.set("SHARED", "flag");
        flags.set("PORT", "1");
        flags.set("EXTRA", "flag");
        let pf = Procfile::parse(Path::new("/proj"), BASIC, flags).unwrap();
        let env = pf.environ("web").unwrap();
        assert_eq!(env.get("EXTRA"), Some("flag"));
        assert_eq!(env.get("SHARED"), Some("project"));
        assert_eq!(env.get("PORT"), Some("8080"));
        assert_eq!(pf.base_environ().get("SHARED"), Some("project"));
        assert_eq!(pf.base_environ().get("EXTRA"), Some("flag"));
    }

    #[test]
    fn declared_values_beat_the_host_environment() {
        let host = Env::from_host();
        let mut names = host.keys().filter(|k| {
            !["SVC", "TASK", "PWD"].contains(k)
                && k.starts_with(|c: char| c.is_ascii_uppercase())
                && k.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
        });
        let (project_key, parent_key) = match (names.next(), names.next()) {
            (Some(a), Some(b)) => (a.to_string(), b.to_string()),
            _ => return,
        };
        let yaml = format!(
            r#"
version: "1"
env:
  {project_key}: from-config
services:
  base:
    env:
      {parent_key}: from-parent
    cmds: ["true"]
  app:
    service: base
    cmds: ["true"]
"#
        );
        let pf = parse(&yaml).unwrap();
        assert_eq!(pf.base_environ().get(&project_key), Some("from-config"));
        let app = pf.environ("app").unwrap();
        assert_eq!(app.get(&project_key), Some("from-config"));
        assert_eq!(app.get(&parent_key), Some("from-parent"));
    }

    #[test]
    fn env_files_load_relative_to_config_and_see_env_map() {
        let dir = TempDir::new().unwrap();
        std::fs::write(
            dir.path().join("app.env"),
            "URL=http://${HOST}:${PORT}\nPORT=9999\n",
        )
        .unwrap();
        let yaml = r#"
version: "1"
env:
  HOST: localhost
  PORT: 80
services:
  web:
    envs: [app.env]
"#;
        let pf = Procfile::parse(dir.path(), yaml, Env::new()).unwrap();
        let own = pf.service("web").unwrap().env();
        assert_eq!(own.get("URL"), Some("http://localhost:80"));
        let env = pf.environ("web").unwrap();
        assert_eq!(env.get("PORT"), Some("9999"));
    }

    #[test]
    fn missing_env_file_fails_load() {
        let dir = TempDir::new().unwrap();
        let yaml = "version: \"1\"\nenvs: [missing.env]\n";
        let err = Procfile::parse(dir.path(), yaml, Env::new()).unwrap_err();
        assert!(matches!(err, MillError::EnvFileNotFound(_)));
    }

    #[test]
    fn requirement_strings_round_trip() {
        let pinned = Requirement::try_from("hello = nixpkgs.hello".to_string()).unwrap();
        assert_eq!(pinned.name, "hello");
        assert_eq!(pinned.attr.as_deref(), Some("nixpkgs.hello"));
        assert_eq!(pinned.to_string(), "hello = nixpkgs.hello");

        let bare = Requirement::try_from("ripgrep".to_string()).unwrap();
        assert_eq!(bare.attr, None);
        assert_eq!(String::from(bare), "ripgrep");

        assert!(Requirement::try_from(" = x".to_string()).is_err());
    }

    #[test]
    fn task_lookup_by_usage_word() {
        let pf = parse(BASIC).unwrap();
        assert_eq!(pf.task_for_invocation("migrate").unwrap().name(), "migrate");
        assert_eq!(pf.task("migrate").unwrap().invocation_name(), "migrate");
        assert!(pf.task_for_invocation("web").is_none());
    }

    #[test]
    fn load_missing_file_is_config_not_found() {
        let dir = TempDir::new().unwrap();
        let err = Procfile::load(dir.path(), paths::CONFIG_FILE, Env::new()).unwrap_err();
        assert!(matches!(err, MillError::ConfigNotFound(_)));
    }

    #[test]
    fn create_writes_a_loadable_template_once() {
        let dir = TempDir::new().unwrap();
        assert!(Procfile::create(dir.path(), paths::CONFIG_FILE).unwrap());
        assert!(!Procfile::create(dir.path(), paths::CONFIG_FILE).unwrap());
        let pf = Procfile::load(dir.path(), paths::CONFIG_FILE, Env::new()).unwrap();
        assert!(pf.service("web").is_some());
        assert!(pf.task("greet").is_some());
    }

    #[cfg(unix)]
    #[test]
    fn pins_persist_with_original_permissions() {
        use std::os::unix::fs::PermissionsExt;

        let dir = TempDir::new().unwrap();
        let path = dir.path().join(paths::CONFIG_FILE);
        std::fs::write(
            &path,
            "version: \"1\"\nrequires: [hello, jq]\nservices:\n  web:\n    requires: [hello]\n",
        )
        .unwrap();
        std::fs::set_permissions(&path, Permissions::from_mode(0o600)).unwrap();

        let mut pf = Procfile::load(dir.path(), paths::CONFIG_FILE, Env::new()).unwrap();
        assert!(pf.pin("hello", "nixpkgs.hello"));
        assert!(!pf.pin("hello", "nixpkgs.hello"));
        pf.save().unwrap();

        let mode = std::fs::metadata(&path).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);

        let reloaded = Procfile::load(dir.path(), paths::CONFIG_FILE, Env::new()).unwrap();
        let reqs = reloaded.requirements();
        assert_eq!(reqs.len(), 2);
        assert_eq!(reqs[0].attr.as_deref(), Some("nixpkgs.hello"));
        assert_eq!(reqs[1].attr, None);
        let raw = std::fs::read_to_string(&path).unwrap();
        assert!(raw.contains("hello = nixpkgs.hello"), "{raw}");
    }
}
