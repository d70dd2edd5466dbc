use serde_yaml::{Mapping, Value};

/// What to do when a values/secrets file referenced by an environment does
/// not exist on disk (spec.md 4.2).
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "PascalCase")]
pub enum MissingFileHandler {
    Error,
    Warn,
    Info,
    Debug,
}

impl Default for MissingFileHandler {
    fn default() -> Self { MissingFileHandler::Error }
}

/// The declared `environments.<name>:` block, before materialization.
#[derive(Serialize, Deserialize, Clone, Default, Debug)]
#[serde(deny_unknown_fields)]
pub struct EnvSpec {
    #[serde(default)]
    pub values: Vec<crate::release::ValuesEntry>,
    #[serde(default)]
    pub secrets: Vec<String>,
    #[serde(default)]
    pub missingFileHandler: Option<MissingFileHandler>,
}

/// A fully materialized environment: one recursive values map, ready to be
/// passed into template scope and release-values preparation.
#[derive(Clone, Debug, Default)]
pub struct Environment {
    pub name: String,
    pub values: Mapping,
}

impl Environment {
    pub fn new(name: impl Into<String>) -> Self {
        Environment { name: name.into(), values: Mapping::new() }
    }

    /// Merge `other` on top of `self`: later entries win, maps deep-merge,
    /// everything else is later-wins (spec.md 4.2 "later entries override
    /// earlier"; inline maps and files share this precedence by position).
    pub fn merge_values(&mut self, other: &Mapping) {
        crate::merge::merge_mapping(&mut self.values, other);
    }

    /// Overlay this environment's values on top of a parent environment's
    /// (nested dispatch case, spec.md 4.2 step 3): parent first, this wins.
    pub fn overlay_on_parent(&self, parent: &Environment) -> Environment {
        let mut merged = parent.values.clone();
        crate::merge::merge_mapping(&mut merged, &self.values);
        Environment { name: self.name.clone(), values: merged }
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.values.get(&Value::String(key.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn map(pairs: &[(&str, &str)]) -> Mapping {
        let mut m = Mapping::new();
        for (k, v) in pairs {
            m.insert(Value::String(k.to_string()), Value::String(v.to_string()));
        }
        m
    }

    #[test]
    fn later_entries_override_earlier() {
        let mut env = Environment::new("default");
        env.merge_values(&map(&[("a", "1"), ("b", "2")]));
        env.merge_values(&map(&[("b", "3")]));
        assert_eq!(env.get("a").unwrap().as_str(), Some("1"));
        assert_eq!(env.get("b").unwrap().as_str(), Some("3"));
    }

    #[test]
    fn overlay_parent_then_nested_wins() {
        let mut parent = Environment::new("default");
        parent.merge_values(&map(&[("a", "parent"), ("shared", "parent")]));
        let mut nested = Environment::new("default");
        nested.merge_values(&map(&[("shared", "nested"), ("b", "nested")]));
        let merged = nested.overlay_on_parent(&parent);
        assert_eq!(merged.get("a").unwrap().as_str(), Some("parent"));
        assert_eq!(merged.get("b").unwrap().as_str(), Some("nested"));
        assert_eq!(merged.get("shared").unwrap().as_str(), Some("nested"));
    }
}
