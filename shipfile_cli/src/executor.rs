//! Executor (spec.md 4.7): invokes the shaped external command, streams
//! combined output with a `[subcommand/release]` prefix, and classifies
//! exit codes — notably `diff --detailed-exitcode`'s `0`/`2` split.

use std::io::{BufRead, BufReader};
use std::process::{Command, Stdio};
use std::thread;

use crate::shaper::{Action, ExecSpec};
use crate::Result;

#[derive(Debug, Fail)]
enum ExecErrorKind {
    #[fail(display = "release \"{}\" ({}): {}", _0, _1, _2)]
    ReleaseError(String, String, String),
    #[fail(display = "failed to spawn {}: {}", _0, _1)]
    SpawnFailed(String, String),
}

/// The result of running one `ExecSpec` (spec.md 4.7 "ExitInfo").
#[derive(Debug, Clone)]
pub struct ExitInfo {
    pub code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
    /// Set only for the `diff` subcommand: exit code `2` with
    /// `--detailed-exitcode` means "changes detected", not failure
    /// (spec.md P8).
    pub has_changes: bool,
}

/// Run `spec` for `release_name` under `action`, streaming combined output
/// line-by-line with a `[action/release]` prefix so each log line is
/// emitted atomically (spec.md 5 "stdout ... writes are line-oriented").
/// Logs the full command line before invocation, so the transcript alone
/// lets an operator reproduce the failure outside the tool (spec.md 4.7).
pub fn run(spec: &ExecSpec, release_name: &str, action: Action) -> Result<ExitInfo> {
    let label = format!("{}/{}", action_name(action), release_name);
    info!("[{}] {} {}", label, spec.binary, spec.argv.join(" "));

    let mut cmd = Command::new(&spec.binary);
    cmd.args(&spec.argv);
    for (k, v) in &spec.env {
        cmd.env(k, v);
    }
    cmd.stdout(Stdio::piped()).stderr(Stdio::piped());

    let mut child = cmd.spawn()
        .map_err(|e| ExecErrorKind::SpawnFailed(spec.binary.clone(), e.to_string()))?;

    let stdout_pipe = child.stdout.take().expect("stdout was piped");
    let stderr_pipe = child.stderr.take().expect("stderr was piped");

    let out_label = label.clone();
    let out_handle = thread::spawn(move || {
        let mut collected = String::new();
        for line in BufReader::new(stdout_pipe).lines().flatten() {
            println!("[{}] {}", out_label, line);
            collected.push_str(&line);
            collected.push('\n');
        }
        collected
    });
    let err_label = label.clone();
    let err_handle = thread::spawn(move || {
        let mut collected = String::new();
        for line in BufReader::new(stderr_pipe).lines().flatten() {
            eprintln!("[{}] {}", err_label, line);
            collected.push_str(&line);
            collected.push('\n');
        }
        collected
    });

    let status = child.wait()
        .map_err(|e| ExecErrorKind::SpawnFailed(spec.binary.clone(), e.to_string()))?;

    let stdout = out_handle.join().unwrap_or_default();
    let stderr = err_handle.join().unwrap_or_default();

    let code = status.code();
    let has_changes = action == Action::Diff && code == Some(2);

    match action {
        Action::Diff => {
            if code == Some(0) || has_changes {
                Ok(ExitInfo { code, stdout, stderr, has_changes })
            } else {
                Err(ExecErrorKind::ReleaseError(release_name.to_string(), action_name(action).to_string(), stderr).into())
            }
        }
        _ => {
            if code == Some(0) {
                Ok(ExitInfo { code, stdout, stderr, has_changes: false })
            } else {
                Err(ExecErrorKind::ReleaseError(release_name.to_string(), action_name(action).to_string(), stderr).into())
            }
        }
    }
}

fn action_name(action: Action) -> &'static str {
    match action {
        Action::Sync => "sync",
        Action::Diff => "diff",
        Action::Template => "template",
        Action::Lint => "lint",
        Action::Delete => "delete",
        Action::Destroy => "destroy",
        Action::Test => "test",
        Action::Status => "status",
        Action::Deps => "deps",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    fn spec(binary: &str, argv: &[&str]) -> ExecSpec {
        ExecSpec {
            binary: binary.to_string(),
            argv: argv.iter().map(|s| s.to_string()).collect(),
            env: BTreeMap::new(),
        }
    }

    #[test]
    fn success_exit_code_zero() {
        let spec = spec("true", &[]);
        let info = run(&spec, "r", Action::Sync).unwrap();
        assert_eq!(info.code, Some(0));
    }

    #[test]
    fn nonzero_exit_is_a_release_error_for_sync() {
        let spec = spec("false", &[]);
        assert!(run(&spec, "r", Action::Sync).is_err());
    }

    #[test]
    fn diff_exit_two_is_success_with_changes() {
        let spec = spec("sh", &["-c", "exit 2"]);
        let info = run(&spec, "r", Action::Diff).unwrap();
        assert_eq!(info.code, Some(2));
        assert!(info.has_changes);
    }

    #[test]
    fn diff_exit_one_is_a_failure() {
        let spec = spec("sh", &["-c", "exit 1"]);
        assert!(run(&spec, "r", Action::Diff).is_err());
    }

    #[test]
    fn missing_binary_is_a_spawn_error() {
        let spec = spec("definitely-not-a-real-binary-xyz", &[]);
        assert!(run(&spec, "r", Action::Sync).is_err());
    }
}
