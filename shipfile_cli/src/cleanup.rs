//! Temp-file ownership and guaranteed removal on every exit path
//! (spec.md 4.9, 3 "TempArtifact", P5).
//!
//! Every temp file created while shaping a release's command is registered
//! here before the external command runs. Cleanup is explicit and
//! session-scoped rather than finalizer-based (spec.md design notes 9):
//! normal completion, a release failure, a wave abort, and the `SIGINT`/
//! `SIGTERM` handler (`Session::install_signal_handler`) all end up calling
//! `Registry::remove_all`.

use std::fs;
use std::path::PathBuf;
use std::sync::Mutex;

/// One temp file owned by a release's shaped command.
#[derive(Clone, Debug)]
pub struct TempArtifact {
    pub path: PathBuf,
    pub release: String,
}

/// Session-level registry of every `TempArtifact` created so far. Shared
/// behind an `Arc` (see `Session`), so any worker thread can register and
/// the signal handler or final cleanup pass can drain all of them.
#[derive(Default)]
pub struct Registry {
    artifacts: Mutex<Vec<TempArtifact>>,
}

impl Registry {
    pub fn new() -> Registry {
        Registry { artifacts: Mutex::new(Vec::new()) }
    }

    /// Register a temp file immediately after creating it, before the
    /// owning release's external command runs.
    pub fn register(&self, release: impl Into<String>, path: PathBuf) {
        let mut guard = self.artifacts.lock().expect("cleanup registry poisoned");
        guard.push(TempArtifact { path, release: release.into() });
    }

    /// Remove every registered artifact. Individual removal failures are
    /// logged, not propagated (spec.md 4.9: "logging but not failing on
    /// individual remove errors"). Safe to call more than once.
    pub fn remove_all(&self) {
        let mut guard = self.artifacts.lock().expect("cleanup registry poisoned");
        for artifact in guard.drain(..) {
            if let Err(e) = fs::remove_file(&artifact.path) {
                if e.kind() != std::io::ErrorKind::NotFound {
                    warn!("failed to remove temp file {} for release {}: {}", artifact.path.display(), artifact.release, e);
                }
            }
        }
    }

    /// Remove only the artifacts owned by one release, used after a
    /// per-release operation completes so long-running sessions don't
    /// accumulate temp files across many waves.
    pub fn remove_for_release(&self, release: &str) {
        let mut guard = self.artifacts.lock().expect("cleanup registry poisoned");
        let (mine, rest): (Vec<_>, Vec<_>) = guard.drain(..).partition(|a| a.release == release);
        *guard = rest;
        drop(guard);
        for artifact in mine {
            if let Err(e) = fs::remove_file(&artifact.path) {
                if e.kind() != std::io::ErrorKind::NotFound {
                    warn!("failed to remove temp file {} for release {}: {}", artifact.path.display(), artifact.release, e);
                }
            }
        }
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.artifacts.lock().unwrap().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn tempfile(name: &str) -> PathBuf {
        let mut p = std::env::temp_dir();
        p.push(format!("shipfile-cleanup-test-{}-{}", std::process::id(), name));
        let mut f = fs::File::create(&p).unwrap();
        f.write_all(b"x").unwrap();
        p
    }

    #[test]
    fn registered_artifacts_are_removed() {
        let reg = Registry::new();
        let p = tempfile("a");
        reg.register("release-a", p.clone());
        assert!(p.exists());
        reg.remove_all();
        assert!(!p.exists());
    }

    #[test]
    fn remove_all_is_idempotent() {
        let reg = Registry::new();
        let p = tempfile("b");
        reg.register("release-b", p.clone());
        reg.remove_all();
        reg.remove_all();
        assert!(!p.exists());
    }

    #[test]
    fn remove_for_release_only_touches_that_releases_files() {
        let reg = Registry::new();
        let pa = tempfile("c");
        let pb = tempfile("d");
        reg.register("release-a", pa.clone());
        reg.register("release-b", pb.clone());
        reg.remove_for_release("release-a");
        assert!(!pa.exists());
        assert!(pb.exists());
        assert_eq!(reg.len(), 1);
        reg.remove_all();
        assert!(!pb.exists());
    }
}
