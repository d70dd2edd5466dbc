//! `CommandShaper` (spec.md 4.6): turns a release plus global defaults plus
//! CLI flags into the exact external command line, materializing inline
//! values into temp files and resolving secrets through the secrets
//! collaborator.

use std::collections::BTreeMap;
use std::io::Write;
use std::path::{Path, PathBuf};

use shipfile_definitions::{HelmDefaults, Release, SetEntry, ValuesEntry};

use crate::cleanup::Registry;
use crate::session::Session;
use crate::Result;

#[derive(Debug, Fail)]
enum ShaperErrorKind {
    #[fail(display = "failed to write temp values file for release \"{}\": {}", _0, _1)]
    TempFileWrite(String, String),
    #[fail(display = "set[] entry on \"{}\" has none of value/file/values", _0)]
    EmptySetEntry(String),
}

/// The external command to invoke, and everything needed to run it (spec.md
/// 3 "TempArtifact", 4.6).
#[derive(Debug, Clone)]
pub struct ExecSpec {
    pub binary: String,
    pub argv: Vec<String>,
    pub env: BTreeMap<String, String>,
}

/// The package-manager subcommand being shaped (spec.md 4.6).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Action {
    Sync,
    Diff,
    Template,
    Lint,
    Delete,
    /// `delete` with `--purge`: helm releases its name back for reuse
    /// (spec.md 6, `destroy` = delete + purge).
    Destroy,
    Test,
    Status,
    Deps,
}

impl Action {
    fn as_helm_args(self) -> &'static [&'static str] {
        match self {
            Action::Sync => &["upgrade", "--install", "--reset-values"],
            Action::Diff => &["diff", "upgrade", "--reset-values"],
            Action::Template => &["template"],
            Action::Lint => &["lint"],
            Action::Delete => &["delete"],
            Action::Destroy => &["delete", "--purge"],
            Action::Test => &["test"],
            Action::Status => &["status"],
            Action::Deps => &["dependency", "update"],
        }
    }
}

/// Three-valued boolean override resolution (spec.md 4.6, P4): CLI flag >
/// release field > `helmDefaults` > built-in default. `None` at any level
/// falls through to the next; an explicit `Some(false)` must NOT be
/// collapsed into the built-in default.
fn resolve_bool(cli: Option<bool>, release: Option<bool>, defaults: Option<bool>, builtin: bool) -> bool {
    cli.or(release).or(defaults).unwrap_or(builtin)
}

/// Shape the `ExecSpec` for one release under `action`. `state_dir` is the
/// directory of the release's *originating* file (before any `bases`
/// flattening), used for local chart and relative values-path resolution
/// (spec.md 4.6 "local chart resolution").
pub fn shape(
    release: &Release,
    defaults: &HelmDefaults,
    session: &Session,
    action: Action,
    state_dir: &Path,
    cleanup: &Registry,
) -> Result<ExecSpec> {
    let binary = session.flags.helm_binary.clone().unwrap_or_else(|| "helm".to_string());
    let mut argv: Vec<String> = action.as_helm_args().iter().map(|s| s.to_string()).collect();

    match action {
        Action::Sync | Action::Diff | Action::Template | Action::Status | Action::Test | Action::Delete | Action::Destroy => {
            argv.push(release.name.clone());
        }
        _ => {}
    }
    if matches!(action, Action::Sync | Action::Diff | Action::Template) {
        argv.push(resolve_chart(release, state_dir));
    }

    if !release.namespace.is_empty() {
        argv.push("--namespace".into());
        argv.push(release.namespace.clone());
    }
    if let Some(ref v) = release.version {
        if matches!(action, Action::Sync | Action::Diff | Action::Template) {
            argv.push("--version".into());
            argv.push(v.clone());
        }
    }

    let kube_context = session.flags.kube_context.clone()
        .or_else(|| release.kubeContext.clone())
        .or_else(|| defaults.kubeContext.clone());
    if let Some(ctx) = kube_context {
        argv.push("--kube-context".into());
        argv.push(ctx);
    }

    if matches!(action, Action::Sync | Action::Diff) {
        shape_sync_flags(release, defaults, &mut argv);
    }
    if action == Action::Diff {
        argv.push("--detailed-exitcode".into());
    }

    shape_values(release, state_dir, cleanup, session, &mut argv)?;
    shape_set_entries(release, &mut argv)?;

    if let Some(ref extra) = defaults.args {
        merge_dedup_args(&mut argv, &shell_words::split(extra)
            .map_err(|e| format_err!("helmDefaults.args: {}", e))?);
    }
    if !session.flags.extra_args.is_empty() {
        merge_dedup_args(&mut argv, &session.flags.extra_args);
    }

    let mut env = BTreeMap::new();
    let tillerless = resolve_bool(None, release.tiller.tillerless, defaults.tillerless, false);
    if tillerless {
        let tiller_ns = release.tiller.tillerNamespace.clone().unwrap_or_default();
        let mut prefixed = vec!["tiller".to_string(), "run".to_string()];
        if !tiller_ns.is_empty() {
            prefixed.push(tiller_ns);
        }
        prefixed.push("--".to_string());
        prefixed.push(binary.clone());
        prefixed.extend(argv);
        argv = prefixed;

        env.insert("HELM_TILLER_SILENT".to_string(), "true".to_string());
        if let Ok(kubeconfig) = std::env::var("KUBECONFIG") {
            let abs = std::fs::canonicalize(&kubeconfig)
                .map(|p| p.display().to_string())
                .unwrap_or(kubeconfig);
            env.insert("KUBECONFIG".to_string(), abs);
        }
    }

    Ok(ExecSpec { binary, argv, env })
}

fn shape_sync_flags(release: &Release, defaults: &HelmDefaults, argv: &mut Vec<String>) {
    if resolve_bool(None, release.wait, defaults.wait, false) {
        argv.push("--wait".into());
    }
    if resolve_bool(None, release.atomic, defaults.atomic, false) {
        argv.push("--atomic".into());
    }
    if resolve_bool(None, release.force, defaults.force, false) {
        argv.push("--force".into());
    }
    if resolve_bool(None, release.recreatePods, defaults.recreatePods, false) {
        argv.push("--recreate-pods".into());
    }
    if resolve_bool(None, release.verify, defaults.verify, false) {
        argv.push("--verify".into());
    }
    if resolve_bool(None, release.createNamespace, defaults.createNamespace, false) {
        argv.push("--create-namespace".into());
    }
    let timeout = release.timeout.or(defaults.timeout);
    if let Some(t) = timeout {
        argv.push("--timeout".into());
        argv.push(t.to_string());
    }
    let history_max = release.historyMax.or(defaults.historyMax);
    if let Some(h) = history_max {
        argv.push("--history-max".into());
        argv.push(h.to_string());
    }
}

/// A chart reference beginning with `.`/`./`/`../` resolves against
/// `state_dir`; anything else (`repo/chart`) passes through unchanged.
fn resolve_chart(release: &Release, state_dir: &Path) -> String {
    if release.is_local_chart() {
        let resolved = if Path::new(&release.chart).is_absolute() {
            PathBuf::from(&release.chart)
        } else {
            state_dir.join(&release.chart)
        };
        resolved.display().to_string()
    } else {
        release.chart.clone()
    }
}

fn shape_values(
    release: &Release,
    state_dir: &Path,
    cleanup: &Registry,
    session: &Session,
    argv: &mut Vec<String>,
) -> Result<()> {
    for entry in &release.values {
        match entry {
            ValuesEntry::Inline(m) => {
                let path = write_temp_values(release, cleanup, serde_yaml::to_string(m)?)?;
                argv.push("--values".into());
                argv.push(path.display().to_string());
            }
            ValuesEntry::File(p) => {
                let full = resolve_relative(state_dir, p);
                if entry.is_gotmpl() {
                    let raw = std::fs::read_to_string(&full)
                        .map_err(|e| format_err!("reading values file {}: {}", full.display(), e))?;
                    let renderer = shipfile_definitions::TwoPassRenderer::new();
                    let env = shipfile_definitions::Environment::new(session.flags.environment.clone());
                    let rendered = renderer.render_pass2(&raw, &full.to_string_lossy(), &env, "")?;
                    let out = write_temp_values(release, cleanup, rendered)?;
                    argv.push("--values".into());
                    argv.push(out.display().to_string());
                } else {
                    argv.push("--values".into());
                    argv.push(full.display().to_string());
                }
            }
        }
    }
    for extra in &session.flags.extra_values {
        argv.push("--values".into());
        argv.push(extra.clone());
    }
    for secret_ref in &release.secrets {
        let decrypted = resolve_relative(state_dir, secret_ref);
        let dec_path = decrypted.with_extension(
            format!("{}.dec", decrypted.extension().and_then(|e| e.to_str()).unwrap_or("yaml"))
        );
        argv.push("--values".into());
        argv.push(dec_path.display().to_string());
        cleanup.register(release.name.clone(), dec_path);
    }
    Ok(())
}

fn shape_set_entries(release: &Release, argv: &mut Vec<String>) -> Result<()> {
    for entry in &release.set {
        match entry {
            SetEntry { value: Some(v), .. } => {
                argv.push("--set".into());
                argv.push(format!("{}={}", entry.name, escape_set_value(v)));
            }
            SetEntry { file: Some(f), .. } => {
                argv.push("--set-file".into());
                argv.push(format!("{}={}", entry.name, f));
            }
            SetEntry { values: Some(vs), .. } => {
                let joined = vs.iter().map(|v| escape_set_value(v)).collect::<Vec<_>>().join(",");
                argv.push("--set".into());
                argv.push(format!("{}[0]={{{}}}", entry.name, joined));
            }
            _ => return Err(ShaperErrorKind::EmptySetEntry(release.name.clone()).into()),
        }
    }
    Ok(())
}

/// Escape commas and braces, which are meaningful to helm's `--set` list
/// grammar (spec.md 4.6 "value assembly").
fn escape_set_value(v: &str) -> String {
    v.replace('\\', "\\\\")
        .replace(',', "\\,")
        .replace('{', "\\{")
        .replace('}', "\\}")
}

/// Merge a shell-like argument list into `argv`, de-duplicated by leading
/// flag name: an existing `--foo ...` in `argv` is replaced by the later
/// occurrence rather than appending a conflicting duplicate.
fn merge_dedup_args(argv: &mut Vec<String>, extra: &[String]) {
    let mut i = 0;
    while i < extra.len() {
        let flag = &extra[i];
        if flag.starts_with("--") {
            if let Some(pos) = argv.iter().position(|a| a == flag) {
                argv.remove(pos);
                if pos < argv.len() && !argv[pos].starts_with("--") {
                    argv.remove(pos);
                }
            }
        }
        argv.push(flag.clone());
        i += 1;
    }
}

fn resolve_relative(base: &Path, rel: &str) -> PathBuf {
    let p = Path::new(rel);
    if p.is_absolute() { p.to_path_buf() } else { base.join(p) }
}

fn write_temp_values(release: &Release, cleanup: &Registry, contents: String) -> Result<PathBuf> {
    let mut file = tempfile::Builder::new()
        .prefix(&format!("shipfile-{}-", release.name))
        .suffix(".yaml")
        .tempfile()
        .map_err(|e| ShaperErrorKind::TempFileWrite(release.name.clone(), e.to_string()))?;
    file.write_all(contents.as_bytes())
        .map_err(|e| ShaperErrorKind::TempFileWrite(release.name.clone(), e.to_string()))?;
    let (_, path) = file.keep().map_err(|e| ShaperErrorKind::TempFileWrite(release.name.clone(), e.to_string()))?;
    cleanup.register(release.name.clone(), path.clone());
    Ok(path)
}
