//! `ValueResolver`: one interface over secret/value backends (spec.md 4.3,
//! design notes 9). A ref is `kind://path[?query][#/json-pointer]`; backends
//! register themselves by scheme and are looked up by `ValueRef::scheme`.

use std::collections::BTreeMap;
use serde_yaml::Value;
use crate::Result;

/// A parsed value/secret reference, e.g. `vault://secret/foo/bar#/value`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ValueRef {
    pub scheme: String,
    pub path: String,
    pub query: Option<String>,
    pub pointer: Option<String>,
}

impl ValueRef {
    pub fn parse(raw: &str) -> Result<ValueRef> {
        let (scheme, rest) = raw.split_once("://")
            .ok_or_else(|| format_err!("value ref '{}' is missing a scheme", raw))?;
        let (rest, pointer) = match rest.find('#') {
            Some(idx) => (&rest[..idx], Some(rest[idx + 1..].to_string())),
            None => (rest, None),
        };
        let (path, query) = match rest.find('?') {
            Some(idx) => (&rest[..idx], Some(rest[idx + 1..].to_string())),
            None => (rest, None),
        };
        Ok(ValueRef {
            scheme: scheme.to_string(),
            path: path.to_string(),
            query,
            pointer,
        })
    }
}

/// Backends implement this to be usable for `environments.<name>.secrets`
/// entries and for inline `{{ requiredEnv }}`-style secret lookups.
pub trait ValueResolver: Send + Sync {
    /// The scheme this backend registers for, e.g. `"vault"`.
    fn scheme(&self) -> &str;

    /// Fetch a single scalar value.
    fn get_string(&self, r: &ValueRef) -> Result<String>;

    /// Fetch a structured value (a YAML mapping), e.g. a whole secret's
    /// key/value pairs, to be merged into an `Environment`.
    fn get_map(&self, r: &ValueRef) -> Result<Value>;
}

/// A registry of backends keyed by scheme, shared by the renderer and by
/// release-values preparation (spec.md design notes 9: "value provider
/// plurality").
#[derive(Default)]
pub struct ResolverRegistry {
    backends: BTreeMap<String, Box<dyn ValueResolver>>,
}

impl ResolverRegistry {
    pub fn new() -> Self { ResolverRegistry { backends: BTreeMap::new() } }

    pub fn register(&mut self, backend: Box<dyn ValueResolver>) {
        self.backends.insert(backend.scheme().to_string(), backend);
    }

    pub fn get_string(&self, raw: &str) -> Result<String> {
        let r = ValueRef::parse(raw)?;
        self.backend_for(&r)?.get_string(&r)
    }

    pub fn get_map(&self, raw: &str) -> Result<Value> {
        let r = ValueRef::parse(raw)?;
        self.backend_for(&r)?.get_map(&r)
    }

    fn backend_for(&self, r: &ValueRef) -> Result<&dyn ValueResolver> {
        self.backends.get(&r.scheme)
            .map(|b| b.as_ref())
            .ok_or_else(|| format_err!("no value resolver registered for scheme '{}'", r.scheme))
    }
}
