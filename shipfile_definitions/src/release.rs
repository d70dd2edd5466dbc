use std::collections::BTreeMap;

/// A repository entry under the top level `repositories:` key
///
/// ```yaml
/// repositories:
/// - name: stable
///   url: https://charts.helm.sh/stable
/// ```
#[derive(Serialize, Deserialize, Clone, Default, Debug)]
#[serde(deny_unknown_fields)]
pub struct Repository {
    pub name: String,
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub certFile: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub keyFile: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
}

/// One `values:` list entry — a path to a values file, or an inline map
///
/// Plain `.yaml` files are used verbatim; `.gotmpl` files are rendered via
/// the two-pass renderer first (spec.md 4.1, 4.6).
#[derive(Serialize, Deserialize, Clone, Debug)]
#[serde(untagged)]
pub enum ValuesEntry {
    File(String),
    Inline(serde_yaml::Mapping),
}

impl ValuesEntry {
    pub fn is_gotmpl(&self) -> bool {
        match self {
            ValuesEntry::File(p) => p.ends_with(".gotmpl"),
            ValuesEntry::Inline(_) => false,
        }
    }
}

/// The right hand side of a `set:` entry
///
/// - `value` escapes to `--set name=value`
/// - `file` becomes `--set-file name=path`
/// - `values` becomes `--set name[0]={v1,v2,...}`
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct SetEntry {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub values: Option<Vec<String>>,
}

/// A single `prepare:`/`cleanup:` hook command
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct Hook {
    pub command: String,
    #[serde(default)]
    pub args: Vec<String>,
    /// Stream the hook's output through the same executor prefix as the
    /// release's own command (spec.md 4.9).
    #[serde(default)]
    pub showlogs: bool,
}

/// `hooks:` on a release — prepare runs before, cleanup runs after,
/// regardless of the per-release operation's success or failure.
#[derive(Serialize, Deserialize, Clone, Default, Debug)]
#[serde(deny_unknown_fields)]
pub struct Hooks {
    #[serde(default)]
    pub prepare: Vec<Hook>,
    #[serde(default)]
    pub cleanup: Vec<Hook>,
}

/// Tiller related settings, only meaningful pre-Helm-3 / tillerless plugin use
#[derive(Serialize, Deserialize, Clone, Default, Debug)]
#[serde(deny_unknown_fields)]
pub struct TillerSettings {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tillerless: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tillerNamespace: Option<String>,
}

/// TLS settings forwarded to the underlying package manager invocation
#[derive(Serialize, Deserialize, Clone, Default, Debug)]
#[serde(deny_unknown_fields)]
pub struct TlsSettings {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tls: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tlsCaCert: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tlsCert: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tlsKey: Option<String>,
}

/// Cluster-wide defaults merged under every release (spec.md 4.6, precedence
/// high to low: CLI flag, release field, `helmDefaults`, built-in default).
///
/// Boolean fields here are genuinely tri-state: `None` means "no opinion, try
/// the next precedence level", `Some(false)` means "explicitly disabled" and
/// must override a built-in `true` default. Do not collapse this to `bool`.
#[derive(Serialize, Deserialize, Clone, Default, Debug)]
#[serde(deny_unknown_fields)]
pub struct HelmDefaults {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kubeContext: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub wait: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub atomic: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub force: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recreatePods: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub verify: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cleanupOnFail: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub createNamespace: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tillerless: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tls: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub historyMax: Option<u32>,
    /// Shell-like argument list, parsed once and merged into every argv
    /// after subcommand-specific flags, de-duplicated by leading flag name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub args: Option<String>,
}

/// A named, namespaced installation of a chart into a cluster.
///
/// ```yaml
/// releases:
/// - name: my-release
///   namespace: my-ns
///   chart: stable/my-chart
///   version: "1.2.3"
///   needs:
///   - my-ns/other-release
/// ```
#[derive(Serialize, Deserialize, Clone, Default, Debug)]
#[serde(deny_unknown_fields)]
pub struct Release {
    pub name: String,
    #[serde(default)]
    pub namespace: String,
    pub chart: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,

    #[serde(default)]
    pub labels: BTreeMap<String, String>,

    /// A tera boolean expression; when present and false-ish the release is
    /// skipped entirely (not even considered for selection).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub condition: Option<String>,

    /// `Some(false)` on `apply`/`sync` targets the release for uninstall
    /// rather than install/upgrade.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub installed: Option<bool>,

    #[serde(default)]
    pub values: Vec<ValuesEntry>,
    #[serde(default)]
    pub set: Vec<SetEntry>,
    #[serde(default)]
    pub secrets: Vec<String>,

    /// Dependency edges, possibly qualified as `[tillerNS/][ns/]name`;
    /// missing parts default to this release's own tiller namespace and
    /// namespace (spec.md 4.4).
    #[serde(default)]
    pub needs: Vec<String>,

    #[serde(default)]
    pub hooks: Hooks,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub wait: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub atomic: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recreatePods: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub force: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub verify: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub historyMax: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub createNamespace: Option<bool>,

    #[serde(flatten)]
    pub tiller: TillerSettings,
    #[serde(flatten)]
    pub tls: TlsSettings,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kubeContext: Option<String>,
}

impl Release {
    /// The key used by the DAG planner and by name-uniqueness checks:
    /// `[tillerNS/][ns/]name`. Uniqueness (spec.md P1) is by `name` alone.
    pub fn dag_key(&self) -> String {
        let mut parts = Vec::new();
        if let Some(ref tns) = self.tiller.tillerNamespace {
            parts.push(tns.clone());
        }
        if !self.namespace.is_empty() {
            parts.push(self.namespace.clone());
        }
        parts.push(self.name.clone());
        parts.join("/")
    }

    /// A `needs:` entry qualified relative to this release's own namespace
    /// and tiller namespace, for comparing against other releases' `dag_key`.
    pub fn qualify_need(&self, raw: &str) -> String {
        let segs: Vec<&str> = raw.split('/').collect();
        match segs.len() {
            1 => {
                let mut parts = Vec::new();
                if let Some(ref tns) = self.tiller.tillerNamespace {
                    parts.push(tns.clone());
                }
                if !self.namespace.is_empty() {
                    parts.push(self.namespace.clone());
                }
                parts.push(segs[0].to_string());
                parts.join("/")
            }
            2 => {
                let mut parts = Vec::new();
                if let Some(ref tns) = self.tiller.tillerNamespace {
                    parts.push(tns.clone());
                }
                parts.push(segs[0].to_string());
                parts.push(segs[1].to_string());
                parts.join("/")
            }
            _ => raw.to_string(),
        }
    }

    /// Chart reference without a repository prefix, used as the implicit
    /// `chart` selector key (spec.md 4.3).
    pub fn chart_name(&self) -> &str {
        match self.chart.rfind('/') {
            Some(idx) if !self.is_local_chart() => &self.chart[idx + 1..],
            _ => &self.chart,
        }
    }

    /// Whether the chart reference is a filesystem path, resolved relative
    /// to the originating state file's directory (spec.md 4.6).
    pub fn is_local_chart(&self) -> bool {
        self.chart.starts_with('.') || self.chart.starts_with('/')
    }

    /// Whether `name` is a valid helm release name: lowercase alphanumerics
    /// and `-`, up to 53 characters (the Kubernetes object-name limit helm
    /// itself enforces).
    pub fn valid_name(&self) -> bool {
        let re = regex::Regex::new(r"^[0-9a-z\-]{1,53}$").unwrap();
        re.is_match(&self.name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dag_key_defaults_to_bare_name() {
        let r = Release { name: "foo".into(), ..Default::default() };
        assert_eq!(r.dag_key(), "foo");
    }

    #[test]
    fn dag_key_includes_namespace_and_tiller() {
        let mut r = Release { name: "foo".into(), namespace: "ns".into(), ..Default::default() };
        r.tiller.tillerNamespace = Some("tns".into());
        assert_eq!(r.dag_key(), "tns/ns/foo");
    }

    #[test]
    fn qualify_need_inherits_own_namespace() {
        let r = Release { name: "foo".into(), namespace: "ns".into(), ..Default::default() };
        assert_eq!(r.qualify_need("bar"), "ns/bar");
        assert_eq!(r.qualify_need("other-ns/bar"), "other-ns/bar");
    }

    #[test]
    fn chart_name_strips_repo_prefix() {
        let r = Release { chart: "stable/mysql".into(), ..Default::default() };
        assert_eq!(r.chart_name(), "mysql");
    }

    #[test]
    fn local_chart_not_stripped() {
        let r = Release { chart: "./charts/mysql".into(), ..Default::default() };
        assert!(r.is_local_chart());
        assert_eq!(r.chart_name(), "./charts/mysql");
    }

    #[test]
    fn valid_name_accepts_lowercase_alphanumeric_and_dash() {
        let r = Release { name: "my-web-app-1".into(), ..Default::default() };
        assert!(r.valid_name());
    }

    #[test]
    fn valid_name_rejects_uppercase_and_underscores() {
        let r = Release { name: "My_App".into(), ..Default::default() };
        assert!(!r.valid_name());
    }
}
