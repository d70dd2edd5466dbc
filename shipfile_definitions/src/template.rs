//! Renders state files and `.gotmpl` values files through `tera` twice
//! (spec.md 4.1).
//!
//! Pass 1 runs with a stubbed, side-effect-free scope (`exec`/`readFile` are
//! no-ops, and any error is swallowed) just far enough to parse out the
//! `environments:` block non-strictly. Pass 2 re-renders the same raw bytes
//! with the full scope — live `exec`/`readFile`, `.Namespace`, and the
//! resolved `.Environment.Values` — and its errors are fatal.

use std::collections::HashMap;
use std::env;
use std::io::Write;
use std::process::{Command, Stdio};

use serde_yaml::Mapping;
use tera::{Context, Tera, Value as TeraValue};

use crate::environment::Environment;
use crate::Result;

#[derive(Debug, Fail)]
enum RenderErrorKind {
    #[fail(display = "template render failed in {}: {}", _0, _1)]
    Pass2Failed(String, String),
}

/// Capability knobs threaded into the registered tera functions, so pass 1
/// and pass 2 share one code path instead of two copy-pasted registries
/// (spec.md design notes 9: "provide a small, explicit capability object").
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Phase {
    StubbedTolerant,
    LiveStrict,
}

pub struct TwoPassRenderer;

impl TwoPassRenderer {
    pub fn new() -> Self { TwoPassRenderer }

    /// Pass 1. Never fails: on any template error, returns an empty
    /// preliminary environment instead of propagating.
    pub fn render_pass1(&self, raw: &str, env_name: &str) -> String {
        let mut tera = Tera::default();
        register_functions(&mut tera, Phase::StubbedTolerant);

        let mut ctx = Context::new();
        ctx.insert("Environment", &EnvironmentScope {
            Name: env_name.to_string(),
            Values: Mapping::new(),
        });
        ctx.insert("Namespace", &String::new());

        match tera.add_raw_template("state.pass1", raw)
            .and_then(|_| tera.render("state.pass1", &ctx))
        {
            Ok(out) => out,
            Err(_) => String::new(),
        }
    }

    /// Pass 2. Fatal on any render error, with the raw bytes attached for
    /// the line-numbered debug dump described in spec.md 7.
    pub fn render_pass2(&self, raw: &str, file: &str, env: &Environment, namespace: &str) -> Result<String> {
        let mut tera = Tera::default();
        register_functions(&mut tera, Phase::LiveStrict);

        let mut ctx = Context::new();
        ctx.insert("Environment", &EnvironmentScope {
            Name: env.name.clone(),
            Values: env.values.clone(),
        });
        // Deprecated top level alias for `.Environment.Values`.
        ctx.insert("Values", &env.values);
        ctx.insert("Namespace", &namespace.to_string());

        tera.add_raw_template(file, raw)
            .and_then(|_| tera.render(file, &ctx))
            .map_err(|e| {
                debug!("rendered buffer for {} before failure:\n{}", file, raw);
                RenderErrorKind::Pass2Failed(file.to_string(), e.to_string()).into()
            })
    }
}

/// `.Environment` scope exposed to templates.
#[derive(Serialize)]
#[allow(non_snake_case)]
struct EnvironmentScope {
    Name: String,
    Values: Mapping,
}

/// Build a `tera::Error` from a message without relying on a specific
/// constructor — `tera`'s pre-1.0 error type implements `From<String>`
/// (it's the same `error-chain`-style type the teacher's era of `tera`
/// ships), so this is the portable way to raise one from a closure.
fn tera_err(msg: impl Into<String>) -> tera::Error {
    let s: String = msg.into();
    s.into()
}

fn register_functions(tera: &mut Tera, phase: Phase) {
    tera.register_function("requiredEnv", Box::new(|args: HashMap<String, TeraValue>| {
        let name = args.get("0")
            .or_else(|| args.get("name"))
            .and_then(|v| v.as_str())
            .ok_or_else(|| tera_err("requiredEnv needs a variable name"))?;
        match env::var(name) {
            Ok(ref v) if !v.is_empty() => Ok(TeraValue::String(v.clone())),
            _ => Err(tera_err(format!("required environment variable '{}' is unset or empty", name))),
        }
    }));

    tera.register_function("env", Box::new(|args: HashMap<String, TeraValue>| {
        let name = args.get("0").or_else(|| args.get("name")).and_then(|v| v.as_str()).unwrap_or("");
        Ok(TeraValue::String(env::var(name).unwrap_or_default()))
    }));

    tera.register_function("fromYaml", Box::new(|args: HashMap<String, TeraValue>| {
        let raw = args.get("0").or_else(|| args.get("str")).and_then(|v| v.as_str()).unwrap_or("");
        let parsed: serde_yaml::Value = serde_yaml::from_str(raw)
            .map_err(|e| tera_err(format!("fromYaml: {}", e)))?;
        serde_json::to_value(parsed).map_err(|e| tera_err(e.to_string()))
    }));

    tera.register_function("toYaml", Box::new(|args: HashMap<String, TeraValue>| {
        let v = args.get("0").or_else(|| args.get("value")).cloned().unwrap_or(TeraValue::Null);
        let yaml = serde_yaml::to_string(&v).map_err(|e| tera_err(e.to_string()))?;
        Ok(TeraValue::String(yaml))
    }));

    tera.register_function("setValueAtPath", Box::new(|args: HashMap<String, TeraValue>| {
        let path = args.get("path").and_then(|v| v.as_str()).unwrap_or("");
        let value = args.get("value").cloned().unwrap_or(TeraValue::Null);
        let mut root = args.get("obj").cloned().unwrap_or_else(|| TeraValue::Object(Default::default()));
        set_at_path(&mut root, path, value);
        Ok(root)
    }));

    match phase {
        Phase::StubbedTolerant => {
            tera.register_function("exec", Box::new(|_: HashMap<String, TeraValue>| {
                Ok(TeraValue::String(String::new()))
            }));
            tera.register_function("readFile", Box::new(|_: HashMap<String, TeraValue>| {
                Ok(TeraValue::String(String::new()))
            }));
        }
        Phase::LiveStrict => {
            tera.register_function("exec", Box::new(|args: HashMap<String, TeraValue>| {
                let prog = args.get("0").or_else(|| args.get("command"))
                    .and_then(|v| v.as_str())
                    .ok_or_else(|| tera_err("exec needs a command"))?;
                let argv: Vec<String> = args.get("args")
                    .and_then(|v| v.as_array())
                    .map(|a| a.iter().filter_map(|x| x.as_str().map(String::from)).collect())
                    .unwrap_or_default();
                let stdin = args.get("stdin").and_then(|v| v.as_str()).map(String::from);

                let mut cmd = Command::new(prog);
                cmd.args(&argv);
                cmd.stdout(Stdio::piped()).stderr(Stdio::piped());
                if stdin.is_some() { cmd.stdin(Stdio::piped()); }

                let mut child = cmd.spawn().map_err(|e| tera_err(format!("exec {}: {}", prog, e)))?;
                if let Some(input) = stdin {
                    if let Some(mut sin) = child.stdin.take() {
                        let _ = sin.write_all(input.as_bytes());
                    }
                }
                let out = child.wait_with_output().map_err(|e| tera_err(e.to_string()))?;
                if !out.status.success() {
                    return Err(tera_err(format!(
                        "exec {} exited with {}: {}", prog, out.status, String::from_utf8_lossy(&out.stderr)
                    )));
                }
                Ok(TeraValue::String(String::from_utf8_lossy(&out.stdout).trim_end().to_string()))
            }));

            tera.register_function("readFile", Box::new(|args: HashMap<String, TeraValue>| {
                let path = args.get("0").or_else(|| args.get("path"))
                    .and_then(|v| v.as_str())
                    .ok_or_else(|| tera_err("readFile needs a path"))?;
                std::fs::read_to_string(path)
                    .map(TeraValue::String)
                    .map_err(|e| tera_err(format!("readFile {}: {}", path, e)))
            }));
        }
    }
}

fn set_at_path(root: &mut TeraValue, path: &str, value: TeraValue) {
    let segs: Vec<&str> = path.split('.').filter(|s| !s.is_empty()).collect();
    let mut cur = root;
    for (i, seg) in segs.iter().enumerate() {
        if !cur.is_object() {
            *cur = TeraValue::Object(Default::default());
        }
        let map = cur.as_object_mut().unwrap();
        if i == segs.len() - 1 {
            map.insert((*seg).to_string(), value.clone());
            return;
        }
        cur = map.entry((*seg).to_string()).or_insert_with(|| TeraValue::Object(Default::default()));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pass1_never_fails_on_missing_env_var() {
        let r = TwoPassRenderer::new();
        let out = r.render_pass1("{{ requiredEnv(name=\"DEFINITELY_UNSET_VAR_XYZ\") }}", "default");
        assert_eq!(out, "");
    }

    #[test]
    fn pass1_extracts_environments_block() {
        let r = TwoPassRenderer::new();
        let raw = "environments:\n  production:\n    values:\n    - releaseName: prod\n";
        let out = r.render_pass1(raw, "production");
        let doc: serde_yaml::Value = serde_yaml::from_str(&out).unwrap();
        assert!(doc.get("environments").is_some());
    }

    #[test]
    fn pass2_resolves_environment_values() {
        let r = TwoPassRenderer::new();
        let mut env = Environment::new("production");
        let mut m = Mapping::new();
        m.insert(serde_yaml::Value::String("releaseName".into()), serde_yaml::Value::String("prod".into()));
        env.values = m;
        let raw = "releases:\n- name: \"{{ Environment.Values.releaseName }}-app\"\n";
        let out = r.render_pass2(raw, "state.yaml", &env, "").unwrap();
        assert!(out.contains("prod-app"));
    }

    #[test]
    fn pass2_propagates_render_errors() {
        let r = TwoPassRenderer::new();
        let env = Environment::new("default");
        let raw = "{{ requiredEnv(name=\"DEFINITELY_UNSET_VAR_XYZ\") }}";
        assert!(r.render_pass2(raw, "bad.yaml", &env, "").is_err());
    }
}
