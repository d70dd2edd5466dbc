//! ApplyController (spec.md 4.8): composes diff → affected-set → confirm →
//! sync+delete, with skip-when-no-change and the exit-status mapping of
//! spec.md 6.

use std::io::{self, BufRead, Write};
use std::path::Path;

use shipfile_definitions::{HelmDefaults, Release};

use crate::cleanup::Registry;
use crate::executor;
use crate::lock::{self, LockFile};
use crate::session::Session;
use crate::shaper::{self, Action};
use crate::Result;

/// `apply`'s exit status (spec.md 6, 4.8).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplyExit {
    Success,
    NoMatchingHelmfile,
    ReleaseFailure,
}

impl ApplyExit {
    pub fn code(self) -> i32 {
        match self {
            ApplyExit::Success => 0,
            ApplyExit::NoMatchingHelmfile => 3,
            ApplyExit::ReleaseFailure => 1,
        }
    }
}

/// A release found to have pending changes (or to be newly absent) by the
/// `diff` pass.
pub struct Affected<'a> {
    pub release: &'a Release,
    /// `true` when this release is in the delete set (`installed: false`
    /// and currently present), `false` when it is in the sync set.
    pub delete: bool,
}

/// Run `diff --detailed-exitcode` for every release in the selected set;
/// partition the result into "needs sync" and "needs delete" (releases
/// with `installed: false`). Releases whose diff reports no changes and
/// are not targeted for deletion are dropped from the affected set, unless
/// `lock` shows the release drifted from the chart/version it last synced
/// to — that drift is folded in so `diff`'s live helm comparison and the
/// lock file's own record of the last successful sync agree (spec.md 6).
pub fn compute_affected<'a>(
    releases: &[&'a Release],
    defaults: &HelmDefaults,
    session: &Session,
    state_dir: &Path,
    cleanup: &Registry,
    lock: Option<&LockFile>,
) -> Result<Vec<Affected<'a>>> {
    let drifted: Vec<String> = lock.map(|l| lock::drifted(l, releases)).unwrap_or_default();

    let mut affected = Vec::new();
    for release in releases {
        if let Some(v) = &release.version {
            lock::check_version(&release.name, v);
        }
        let delete = release.installed == Some(false);
        let spec = shaper::shape(release, defaults, session, Action::Diff, state_dir, cleanup)?;
        let info = executor::run(&spec, &release.name, Action::Diff)?;
        let has_drifted = drifted.iter().any(|n| n == &release.name);
        if has_drifted && !info.has_changes && !delete {
            info!("release \"{}\" drifted from its last recorded sync (lock file) though diff reports no change", release.name);
        }
        if delete || info.has_changes || has_drifted {
            affected.push(Affected { release, delete });
        }
        cleanup.remove_for_release(&release.name);
    }
    Ok(affected)
}

/// Prompt on stdin unless `--auto-approve`; a `y`/`yes` answer (any case)
/// proceeds (spec.md 4.8 step 5, 5 "confirmation prompt is a serialization
/// point").
pub fn confirm(session: &Session, affected: &[Affected]) -> Result<bool> {
    if session.flags.auto_approve {
        return Ok(true);
    }
    println!("the following releases are affected:");
    for a in affected {
        let verb = if a.delete { "delete" } else { "sync" };
        println!("  {} {}", verb, a.release.name);
    }
    print!("proceed? [y/N] ");
    io::stdout().flush().ok();

    let stdin = io::stdin();
    let mut line = String::new();
    stdin.lock().read_line(&mut line)?;
    let answer = line.trim().to_lowercase();
    Ok(answer == "y" || answer == "yes")
}

/// Run `apply` for a pre-selected set of releases sharing one state
/// directory and one `HelmDefaults`. The caller (the nested dispatcher /
/// main reconciliation loop) is responsible for ordering this per DAG wave;
/// this function itself only shapes and executes one wave's worth of
/// releases in sequence, used from within the per-wave worker pool.
pub fn run_apply(
    state_path: &Path,
    releases: &[&Release],
    defaults: &HelmDefaults,
    session: &Session,
    state_dir: &Path,
    cleanup: &Registry,
) -> Result<ApplyExit> {
    if releases.is_empty() {
        return Ok(ApplyExit::NoMatchingHelmfile);
    }

    let lock = lock::read(state_path)?;
    let affected = compute_affected(releases, defaults, session, state_dir, cleanup, lock.as_ref())?;
    if affected.is_empty() {
        info!("no affected releases");
        return Ok(ApplyExit::Success);
    }

    if session.flags.interactive && !confirm(session, &affected)? {
        info!("apply cancelled by operator");
        return Ok(ApplyExit::Success);
    }

    let mut had_failure = false;
    for a in &affected {
        let action = if a.delete { Action::Delete } else { Action::Sync };
        let spec = shaper::shape(a.release, defaults, session, action, state_dir, cleanup)?;
        if let Err(e) = executor::run(&spec, &a.release.name, action) {
            warn!("release \"{}\" failed: {}", a.release.name, e);
            had_failure = true;
        }
        cleanup.remove_for_release(&a.release.name);
    }

    if had_failure {
        Ok(ApplyExit::ReleaseFailure)
    } else {
        Ok(ApplyExit::Success)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exit_codes_match_spec_mapping() {
        assert_eq!(ApplyExit::Success.code(), 0);
        assert_eq!(ApplyExit::NoMatchingHelmfile.code(), 3);
        assert_eq!(ApplyExit::ReleaseFailure.code(), 1);
    }

    #[test]
    fn empty_release_set_is_no_matching_helmfile() {
        let session = Session::new(
            crate::session::GlobalFlags::default(),
            shipfile_definitions::resolver::ResolverRegistry::new(),
        );
        let cleanup = Registry::new();
        let defaults = HelmDefaults::default();
        let releases: Vec<&Release> = vec![];
        let result = run_apply(Path::new("/tmp/nonexistent.yaml"), &releases, &defaults, &session, Path::new("/tmp"), &cleanup).unwrap();
        assert_eq!(result, ApplyExit::NoMatchingHelmfile);
    }
}
