//! Disk-backed state loading: `bases:` recursion, environment value/secret
//! materialization, and `missingFileHandler` semantics (spec.md 4.2).
//!
//! This module is the `StateLoader` component. File-set discovery
//! (`--file` resolution, `helmfile.d/*.yaml` globbing) is a CLI concern and
//! lives in `shipfile`'s `locator` module instead; this one only knows how
//! to turn a single path plus an environment name into a frozen `State`.

use std::fs;
use std::path::{Path, PathBuf};

use serde_yaml::Value;

use crate::environment::{Environment, MissingFileHandler};
use crate::release::ValuesEntry;
use crate::resolver::ResolverRegistry;
use crate::state::State;
use crate::template::TwoPassRenderer;
use crate::Result;

/// Exported so callers outside this crate (the nested dispatcher) can tell
/// `UndefinedEnvError` apart from every other load failure: spec.md 7 has
/// the nested dispatcher tolerate it silently while every other
/// `StateLoadError` aborts the containing file.
#[derive(Clone, Eq, PartialEq, Debug, Fail)]
pub enum LoadErrorKind {
    #[fail(display = "environment '{}' is not defined in {}", _0, _1)]
    UndefinedEnv(String, String),
    #[fail(display = "values file {} does not exist", _0)]
    MissingValuesFile(String),
    #[fail(display = "bases are not permitted at nesting depth >= 2 ({})", _0)]
    BasesTooDeep(String),
}

impl LoadErrorKind {
    pub fn is_undefined_env(&self) -> bool {
        matches!(self, LoadErrorKind::UndefinedEnv(_, _))
    }
}

/// True if `err` is (or wraps) `LoadErrorKind::UndefinedEnv` — the one
/// `StateLoadError` variant the nested dispatcher tolerates (spec.md 4.10,
/// 7).
pub fn is_undefined_env_error(err: &crate::Error) -> bool {
    err.downcast_ref::<LoadErrorKind>().map(|k| k.is_undefined_env()).unwrap_or(false)
}

/// Load and fully materialize a state file for `env_name`.
///
/// `parent_env`, when `Some`, is overlaid *under* this file's own
/// environment values (spec.md 4.2 step 3, the nested-dispatch case).
/// `depth` gates `bases:` (disallowed once `depth >= 2`, per the same
/// recursion rule applied to base files themselves).
pub fn load_state_file(
    path: &Path,
    env_name: &str,
    parent_env: Option<&Environment>,
    depth: u32,
    resolver: &ResolverRegistry,
) -> Result<(State, Environment)> {
    let base_path = path.parent().unwrap_or_else(|| Path::new(".")).to_path_buf();
    let base_path = fs::canonicalize(&base_path).unwrap_or(base_path);
    let raw = fs::read_to_string(path)
        .map_err(|e| format_err!("reading {}: {}", path.display(), e))?;

    let renderer = TwoPassRenderer::new();
    let prelim_doc = renderer.render_pass1(&raw, env_name);
    let prelim_env = preliminary_environment(&prelim_doc, env_name);

    let rendered = renderer.render_pass2(&raw, &path.to_string_lossy(), &prelim_env, "")?;
    let (mut state, bases) = State::parse(&rendered, base_path.clone())?;

    for release in &state.releases {
        if !release.valid_name() {
            warn!("release \"{}\" in {} is not a valid helm release name", release.name, path.display());
        }
    }

    if !bases.is_empty() {
        if depth >= 2 {
            return Err(LoadErrorKind::BasesTooDeep(path.display().to_string()).into());
        }
        let mut merged: Option<State> = None;
        for base_rel in &bases {
            let base_path_file = resolve_relative(&base_path, base_rel);
            let (base_state, _) = load_state_file(&base_path_file, env_name, None, depth + 1, resolver)?;
            merged = Some(match merged {
                Some(acc) => base_state.layer_over(acc),
                None => base_state,
            });
        }
        if let Some(acc) = merged {
            state = state.layer_over(acc);
        }
    }

    if env_name != "default" && !state.environments.contains_key(env_name) {
        return Err(LoadErrorKind::UndefinedEnv(env_name.to_string(), path.display().to_string()).into());
    }

    let mut env = Environment::new(env_name);
    if let Some(spec) = state.environments.get(env_name) {
        let handler = spec.missingFileHandler.unwrap_or(state.missingFileHandler);
        for entry in &spec.values {
            merge_values_entry(&mut env, entry, &base_path, &renderer, handler)?;
        }
        for secret_ref in &spec.secrets {
            match resolver.get_map(secret_ref) {
                Ok(Value::Mapping(m)) => env.merge_values(&m),
                Ok(_) => bail!("secret ref '{}' did not resolve to a mapping", secret_ref),
                Err(e) => return Err(e),
            }
        }
    }

    if let Some(parent) = parent_env {
        env = env.overlay_on_parent(parent);
    }

    Ok((state, env))
}

fn merge_values_entry(
    env: &mut Environment,
    entry: &ValuesEntry,
    base_path: &Path,
    renderer: &TwoPassRenderer,
    handler: MissingFileHandler,
) -> Result<()> {
    match entry {
        ValuesEntry::Inline(m) => {
            env.merge_values(m);
            Ok(())
        }
        ValuesEntry::File(rel) => {
            let full = resolve_relative(base_path, rel);
            if !full.exists() {
                return handle_missing(&full, handler);
            }
            let raw = fs::read_to_string(&full)
                .map_err(|e| format_err!("reading values file {}: {}", full.display(), e))?;
            let text = if entry.is_gotmpl() {
                let env_snapshot = env.clone();
                renderer.render_pass2(&raw, &full.to_string_lossy(), &env_snapshot, "")?
            } else {
                raw
            };
            let doc: Value = serde_yaml::from_str(&text)
                .map_err(|e| format_err!("parsing values file {}: {}", full.display(), e))?;
            match doc {
                Value::Mapping(m) => env.merge_values(&m),
                Value::Null => {}
                _ => bail!("values file {} did not contain a mapping", full.display()),
            }
            Ok(())
        }
    }
}

fn handle_missing(path: &Path, handler: MissingFileHandler) -> Result<()> {
    let msg = format!("values file {} does not exist", path.display());
    match handler {
        MissingFileHandler::Error => Err(LoadErrorKind::MissingValuesFile(path.display().to_string()).into()),
        MissingFileHandler::Warn => { warn!("{}", msg); Ok(()) }
        MissingFileHandler::Info => { info!("{}", msg); Ok(()) }
        MissingFileHandler::Debug => { debug!("{}", msg); Ok(()) }
    }
}

fn resolve_relative(base: &Path, rel: &str) -> PathBuf {
    let p = Path::new(rel);
    if p.is_absolute() { p.to_path_buf() } else { base.join(p) }
}

/// Non-strict extraction of `environments.<name>.values` inline entries
/// from pass-1 output, used only to seed `.Environment.Values` for pass 2
/// (spec.md 4.1). File-path entries are skipped here: they need the real
/// loader (bases resolved, missing-file policy applied) to read safely.
fn preliminary_environment(doc: &str, env_name: &str) -> Environment {
    let mut env = Environment::new(env_name);
    let parsed: Value = match serde_yaml::from_str(doc) {
        Ok(v) => v,
        Err(_) => return env,
    };
    let values = parsed
        .get("environments")
        .and_then(|e| e.get(env_name))
        .and_then(|e| e.get("values"))
        .and_then(|v| v.as_sequence());
    if let Some(entries) = values {
        for entry in entries {
            if let Value::Mapping(m) = entry {
                env.merge_values(m);
            }
        }
    }
    env
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn tempdir() -> PathBuf {
        let mut dir = std::env::temp_dir();
        dir.push(format!("shipfile-test-{}", std::process::id()));
        let _ = fs::create_dir_all(&dir);
        dir
    }

    fn write_file(dir: &Path, name: &str, content: &str) -> PathBuf {
        let p = dir.join(name);
        let mut f = fs::File::create(&p).unwrap();
        f.write_all(content.as_bytes()).unwrap();
        p
    }

    #[test]
    fn default_env_always_available_even_if_undeclared() {
        let dir = tempdir();
        let f = write_file(&dir, "state1.yaml", "releases: []\n");
        let resolver = ResolverRegistry::new();
        let (state, env) = load_state_file(&f, "default", None, 0, &resolver).unwrap();
        assert!(state.releases.is_empty());
        assert_eq!(env.name, "default");
    }

    #[test]
    fn undefined_non_default_env_is_an_error() {
        let dir = tempdir();
        let f = write_file(&dir, "state2.yaml", "releases: []\n");
        let resolver = ResolverRegistry::new();
        assert!(load_state_file(&f, "staging", None, 0, &resolver).is_err());
    }

    #[test]
    fn environment_values_materialize_from_inline_and_files() {
        let dir = tempdir();
        write_file(&dir, "extra.yaml", "region: eu\n");
        let f = write_file(&dir, "state3.yaml", concat!(
            "releases: []\n",
            "environments:\n",
            "  staging:\n",
            "    values:\n",
            "    - extra.yaml\n",
            "    - tier: backend\n",
        ));
        let resolver = ResolverRegistry::new();
        let (_, env) = load_state_file(&f, "staging", None, 0, &resolver).unwrap();
        assert_eq!(env.get("region").unwrap().as_str(), Some("eu"));
        assert_eq!(env.get("tier").unwrap().as_str(), Some("backend"));
    }

    #[test]
    fn two_pass_reference_to_inline_environment_value_resolves() {
        let dir = tempdir();
        let f = write_file(&dir, "state4.yaml", concat!(
            "environments:\n",
            "  production:\n",
            "    values:\n",
            "    - releaseName: prod\n",
            "releases:\n",
            "- name: \"{{ Environment.Values.releaseName }}-app\"\n",
            "  chart: stable/app\n",
        ));
        let resolver = ResolverRegistry::new();
        let (state, _) = load_state_file(&f, "production", None, 0, &resolver).unwrap();
        assert_eq!(state.releases[0].name, "prod-app");
    }
}
