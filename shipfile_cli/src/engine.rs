//! The reconciliation engine: wires `FileLocator` output through
//! `StateLoader`, `ReleaseFilter`, the DAG planner, the worker pool, the
//! nested dispatcher, and the per-release command shaper/executor
//! (spec.md 2 "control flow").

use std::path::Path;

use shipfile_definitions::filebacked::{is_undefined_env_error, load_state_file};
use shipfile_definitions::resolver::ResolverRegistry;
use shipfile_definitions::{Environment, Release, State};

use crate::dag;
use crate::filter::{self, Selector};
use crate::nested::{self, InheritanceMode};
use crate::session::Session;
use crate::shaper::{self, Action};
use crate::workerpool;
use crate::{executor, Result};

/// The subcommand being reconciled (spec.md 4.6, 6). `Apply` is handled by
/// `crate::apply` instead of the plain shape+execute loop below, since it
/// composes diff/confirm/sync/delete.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EngineAction {
    Sync,
    Diff,
    Template,
    Lint,
    Delete,
    Destroy,
    Test,
    Status,
    Deps,
    Apply,
}

/// What happened across one root state file and all the nested files it
/// pulled in (spec.md 5 "ordering guarantees").
#[derive(Default)]
pub struct RunReport {
    pub releases_seen: usize,
    pub failures: Vec<String>,
}

impl RunReport {
    fn merge(&mut self, other: RunReport) {
        self.releases_seen += other.releases_seen;
        self.failures.extend(other.failures);
    }

    pub fn ok(&self) -> bool {
        self.failures.is_empty()
    }
}

/// Run one root state file end to end: nested helmfiles first (spec.md
/// 4.10, 5-iii), then this file's own releases, DAG-ordered and worked
/// through the bounded pool (spec.md 4.4-4.5).
pub fn run_file(
    path: &Path,
    action: EngineAction,
    selectors: &[Selector],
    session: &Session,
) -> Result<RunReport> {
    run_nested_or_root(path, action, selectors, session, None, 0)
}

fn run_nested_or_root(
    path: &Path,
    action: EngineAction,
    selectors: &[Selector],
    session: &Session,
    parent_env: Option<&Environment>,
    depth: u32,
) -> Result<RunReport> {
    let load_result = load_state_file(path, &session.flags.environment, parent_env, depth, &session.resolver);
    let (state, env) = match load_result {
        Ok(pair) => pair,
        Err(e) => {
            // Nested files tolerate an undefined environment silently
            // (spec.md 4.10, 7); the root file does not.
            if depth > 0 && is_undefined_env_error(&e) {
                return Ok(RunReport::default());
            }
            return Err(e);
        }
    };

    let mut report = RunReport::default();

    let mode = InheritanceMode::from_env();
    let nested_jobs = nested::resolve(&state.nested, &state.base_path, selectors, mode)?;
    for job in nested_jobs {
        let sub = run_nested_or_root(&job.path, action, &job.selectors, session, Some(&env), depth + 1)?;
        report.merge(sub);
        if !report.ok() {
            // A nested failure aborts the parent state (spec.md 4.10).
            return Ok(report);
        }
    }

    let live_releases = evaluate_conditions(&state, &env)?;
    let selected = filter::select(&live_releases, selectors);
    filter::check_duplicates(&selected)?;
    report.releases_seen += selected.len();

    if selected.is_empty() {
        return Ok(report);
    }

    if action == EngineAction::Apply {
        run_apply_plan(path, &selected, &state, session, &mut report)?;
        return Ok(report);
    }

    let plan = dag::plan(&selected)?;
    let plan = if matches!(action, EngineAction::Delete | EngineAction::Destroy) {
        plan.reversed()
    } else {
        plan
    };

    for wave in &plan.waves {
        let state_dir = state.base_path.clone();
        let defaults = state.defaults.clone();
        let worker_session = session.clone();
        let cleanup = worker_session.cleanup.clone();
        let concurrency = session.flags.concurrency;
        let outcomes = workerpool::run_wave(wave, concurrency, move |release| {
            if worker_session.is_cancelled() {
                bail!("cancelled");
            }
            run_hooks(release, true);
            let spec = shaper::shape(release, &defaults, &worker_session, to_shaper_action(action), &state_dir, &cleanup)?;
            let result = executor::run(&spec, &release.name, to_shaper_action(action)).map(|_| ());
            run_hooks(release, false);
            cleanup.remove_for_release(&release.name);
            result
        });

        let mut wave_failed = false;
        for outcome in outcomes {
            if let Err(e) = outcome.result {
                report.failures.push(format!("{}: {}", outcome.release.name, e));
                wave_failed = true;
            }
        }
        if wave_failed {
            break;
        }
        if session.is_cancelled() {
            break;
        }
    }

    if action == EngineAction::Sync && report.ok() && !session.is_cancelled() {
        if let Err(e) = crate::lock::write(path, &selected) {
            warn!("failed to write lock file for {}: {}", path.display(), e);
        }
    }

    Ok(report)
}

fn run_apply_plan(
    path: &Path,
    selected: &[&Release],
    state: &State,
    session: &Session,
    report: &mut RunReport,
) -> Result<()> {
    let plan = dag::plan(selected)?;
    for wave in &plan.waves {
        match crate::apply::run_apply(path, wave, &state.defaults, session, &state.base_path, &session.cleanup) {
            Ok(crate::apply::ApplyExit::ReleaseFailure) => {
                report.failures.push(format!("apply failed for wave of {} release(s)", wave.len()));
                break;
            }
            Ok(_) => {}
            Err(e) => {
                report.failures.push(e.to_string());
                break;
            }
        }
    }
    if report.ok() {
        if let Err(e) = crate::lock::write(path, selected) {
            warn!("failed to write lock file for {}: {}", path.display(), e);
        }
    }
    Ok(())
}

/// `prepare` hooks fire before the release's own command, `cleanup` hooks
/// fire after, regardless of outcome (spec.md 4.9). Hook failures are
/// logged, not propagated — a misbehaving hook must not mask the release's
/// real result.
fn run_hooks(release: &Release, prepare: bool) {
    let hooks = if prepare { &release.hooks.prepare } else { &release.hooks.cleanup };
    for hook in hooks {
        let mut cmd = std::process::Command::new(&hook.command);
        cmd.args(&hook.args);
        match cmd.status() {
            Ok(status) if !status.success() => {
                warn!("hook {} for release \"{}\" exited with {}", hook.command, release.name, status);
            }
            Err(e) => {
                warn!("hook {} for release \"{}\" failed to start: {}", hook.command, release.name, e);
            }
            _ => {}
        }
    }
}

fn to_shaper_action(action: EngineAction) -> Action {
    match action {
        EngineAction::Sync => Action::Sync,
        EngineAction::Diff => Action::Diff,
        EngineAction::Template => Action::Template,
        EngineAction::Lint => Action::Lint,
        EngineAction::Delete => Action::Delete,
        EngineAction::Destroy => Action::Destroy,
        EngineAction::Test => Action::Test,
        EngineAction::Status => Action::Status,
        EngineAction::Deps => Action::Deps,
        EngineAction::Apply => unreachable!("apply is handled by run_apply_plan"),
    }
}

/// Drop releases whose `condition` (a tera boolean expression) evaluates
/// false-ish; they are not even considered for selection (spec.md 3
/// "Release").
fn evaluate_conditions(state: &State, env: &Environment) -> Result<Vec<Release>> {
    let renderer = shipfile_definitions::TwoPassRenderer::new();
    let mut out = Vec::new();
    for release in &state.releases {
        let keep = match &release.condition {
            None => true,
            Some(expr) => {
                let wrapped = format!("{{{{ {} }}}}", expr);
                let rendered = renderer.render_pass2(&wrapped, "condition", env, &release.namespace)?;
                matches!(rendered.trim(), "true")
            }
        };
        if keep {
            out.push(release.clone());
        }
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use shipfile_definitions::resolver::ResolverRegistry as Registry;
    use std::fs;

    fn tempdir(name: &str) -> std::path::PathBuf {
        let mut p = std::env::temp_dir();
        p.push(format!("shipfile-engine-test-{}-{}", std::process::id(), name));
        let _ = fs::remove_dir_all(&p);
        fs::create_dir_all(&p).unwrap();
        p
    }

    fn session() -> Session {
        Session::new(crate::session::GlobalFlags { environment: "default".into(), ..Default::default() }, Registry::new())
    }

    #[test]
    fn lint_runs_and_reports_releases_seen() {
        let dir = tempdir("lint");
        let f = dir.join("helmfile.yaml");
        fs::write(&f, "releases:\n- name: web\n  chart: stable/nginx\n").unwrap();
        let report = run_file(&f, EngineAction::Lint, &[], &session()).unwrap();
        assert_eq!(report.releases_seen, 1);
    }

    #[test]
    fn condition_false_drops_release_from_selection() {
        let dir = tempdir("condition");
        let f = dir.join("helmfile.yaml");
        fs::write(&f, concat!(
            "releases:\n",
            "- name: web\n",
            "  chart: stable/nginx\n",
            "  condition: \"false\"\n",
        )).unwrap();
        let report = run_file(&f, EngineAction::Lint, &[], &session()).unwrap();
        assert_eq!(report.releases_seen, 0);
    }
}
