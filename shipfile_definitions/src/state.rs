use std::collections::BTreeMap;
use std::path::PathBuf;

use serde::Deserialize as _;
use serde_yaml::Value;

use crate::environment::EnvSpec;
use crate::merge::merge_documents;
use crate::release::{HelmDefaults, Release, Repository};
use crate::Result;

#[derive(Debug, Fail)]
enum StateErrorKind {
    #[fail(display = "{}", _0)]
    Parse(String),
    #[fail(display = "both 'releases' and the deprecated 'charts' were declared")]
    BothReleasesAndCharts,
}

/// One `helmfiles:` entry (spec.md 4.10): a bare path, or a map with a path
/// plus selector-inheritance controls.
#[derive(Serialize, Deserialize, Clone, Debug)]
#[serde(untagged)]
pub enum NestedEntry {
    Bare(String),
    Full {
        path: String,
        #[serde(default)]
        selectors: Option<Vec<String>>,
        #[serde(default)]
        selectorsInherited: Option<bool>,
        #[serde(default)]
        values: Vec<crate::release::ValuesEntry>,
    },
}

impl NestedEntry {
    pub fn path(&self) -> &str {
        match self {
            NestedEntry::Bare(p) => p,
            NestedEntry::Full { path, .. } => path,
        }
    }
}

/// The raw, pre-bases, pre-environment-materialization parse of one state
/// file (spec.md 6, "state file (YAML)").
#[derive(Serialize, Deserialize, Clone, Default, Debug)]
#[serde(deny_unknown_fields)]
struct RawState {
    #[serde(default)]
    repositories: Vec<Repository>,
    #[serde(default)]
    helmDefaults: HelmDefaults,
    #[serde(default)]
    releases: Vec<Release>,
    #[serde(default)]
    charts: Vec<Release>,
    #[serde(default)]
    environments: BTreeMap<String, EnvSpec>,
    #[serde(default)]
    helmfiles: Vec<NestedEntry>,
    #[serde(default)]
    bases: Vec<String>,
    #[serde(default)]
    apiVersions: Vec<String>,
    #[serde(default)]
    context: Option<String>,
    #[serde(default)]
    missingFileHandler: Option<crate::environment::MissingFileHandler>,
}

/// A fully parsed and base-layered state file (spec.md 3, "State").
///
/// `bases` is intentionally absent here: by the time a `State` is frozen,
/// every base listed in the source YAML has been merged underneath it.
#[derive(Clone, Debug, Default)]
pub struct State {
    /// Absolute directory the state file was loaded from; local chart
    /// references and relative values paths resolve against this.
    pub base_path: PathBuf,
    pub repositories: Vec<Repository>,
    pub defaults: HelmDefaults,
    pub releases: Vec<Release>,
    pub environments: BTreeMap<String, EnvSpec>,
    pub nested: Vec<NestedEntry>,
    pub apiVersions: Vec<String>,
    pub missingFileHandler: crate::environment::MissingFileHandler,
}

/// Strict multi-document YAML parse with append-slice merge across
/// documents (spec.md 4.2): sequences concatenate, maps deep-merge, scalars
/// are later-wins.
fn parse_merged(raw: &str) -> Result<Value> {
    let mut merged: Option<Value> = None;
    for doc in serde_yaml::Deserializer::from_str(raw) {
        let v = Value::deserialize(doc).map_err(|e| StateErrorKind::Parse(e.to_string()))?;
        if v.is_null() { continue; }
        merged = Some(match merged {
            Some(m) => merge_documents(m, v),
            None => v,
        });
    }
    Ok(merged.unwrap_or(Value::Mapping(Default::default())))
}

impl State {
    /// Parse rendered bytes (spec.md 4.2). Does not load `bases:` or
    /// materialize environments — callers (the `filesystem`-gated loader)
    /// do that, since both require file IO this crate keeps behind a
    /// feature flag.
    pub fn parse(raw: &str, base_path: PathBuf) -> Result<(State, Vec<String>)> {
        let merged = parse_merged(raw)?;
        let mut rs: RawState = serde_yaml::from_value(merged)
            .map_err(|e| StateErrorKind::Parse(e.to_string()))?;

        if !rs.releases.is_empty() && !rs.charts.is_empty() {
            return Err(StateErrorKind::BothReleasesAndCharts.into());
        }
        if rs.releases.is_empty() && !rs.charts.is_empty() {
            rs.releases = std::mem::take(&mut rs.charts);
        }

        // Deprecated `context:` populates `helmDefaults.kubeContext` only if unset.
        if rs.helmDefaults.kubeContext.is_none() {
            if let Some(ctx) = rs.context.take() {
                rs.helmDefaults.kubeContext = Some(ctx);
            }
        }

        let state = State {
            base_path,
            repositories: rs.repositories,
            defaults: rs.helmDefaults,
            releases: rs.releases,
            environments: rs.environments,
            nested: rs.helmfiles,
            apiVersions: rs.apiVersions,
            missingFileHandler: rs.missingFileHandler.unwrap_or_default(),
        };
        Ok((state, rs.bases))
    }

    /// Merge `base` underneath `self` (spec.md 4.2 "base layering"):
    /// the base is lower precedence, `self` is the current (highest
    /// precedence) file. Lists concatenate with base entries first.
    pub fn layer_over(mut self, base: State) -> State {
        let mut releases = base.releases;
        releases.extend(self.releases);
        self.releases = releases;

        let mut repos = base.repositories;
        repos.extend(self.repositories);
        self.repositories = repos;

        for (name, spec) in base.environments {
            self.environments.entry(name).or_insert(spec);
        }

        if self.defaults.kubeContext.is_none() { self.defaults.kubeContext = base.defaults.kubeContext; }
        if self.defaults.wait.is_none() { self.defaults.wait = base.defaults.wait; }
        if self.defaults.atomic.is_none() { self.defaults.atomic = base.defaults.atomic; }
        if self.defaults.force.is_none() { self.defaults.force = base.defaults.force; }
        if self.defaults.recreatePods.is_none() { self.defaults.recreatePods = base.defaults.recreatePods; }
        if self.defaults.verify.is_none() { self.defaults.verify = base.defaults.verify; }
        if self.defaults.cleanupOnFail.is_none() { self.defaults.cleanupOnFail = base.defaults.cleanupOnFail; }
        if self.defaults.createNamespace.is_none() { self.defaults.createNamespace = base.defaults.createNamespace; }
        if self.defaults.tillerless.is_none() { self.defaults.tillerless = base.defaults.tillerless; }
        if self.defaults.tls.is_none() { self.defaults.tls = base.defaults.tls; }
        if self.defaults.timeout.is_none() { self.defaults.timeout = base.defaults.timeout; }
        if self.defaults.historyMax.is_none() { self.defaults.historyMax = base.defaults.historyMax; }
        if self.defaults.args.is_none() { self.defaults.args = base.defaults.args; }

        self
    }
}
