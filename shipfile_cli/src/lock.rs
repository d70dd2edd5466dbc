//! Lock files (spec.md 6): `<file>.lock` records exactly which chart and
//! version each release resolved to on its last successful `sync`, so a
//! later `diff`/`apply` can report drift from what was actually applied
//! instead of only from what the state file currently declares.

use std::fs;
use std::path::{Path, PathBuf};

use chrono::Utc;

use shipfile_definitions::Release;

use crate::Result;

#[derive(Debug, Fail)]
enum LockErrorKind {
    #[fail(display = "writing lock file {}: {}", _0, _1)]
    Write(String, String),
    #[fail(display = "reading lock file {}: {}", _0, _1)]
    Read(String, String),
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LockedRelease {
    pub name: String,
    pub chart: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct LockFile {
    pub generatedAt: String,
    pub releases: Vec<LockedRelease>,
}

/// The lock file that sits alongside a state file, named `<file>.lock`.
pub fn lock_path(state_path: &Path) -> PathBuf {
    let mut name = state_path.file_name().unwrap_or_default().to_os_string();
    name.push(".lock");
    state_path.with_file_name(name)
}

/// Warn (not fail) when `version` isn't strict semver; helm itself accepts
/// ranges and repo-specific aliases, so this is advisory only (spec.md 3's
/// `version` field carries no grammar beyond "a chart version string").
pub fn check_version(release_name: &str, version: &str) {
    if semver::Version::parse(version).is_err() {
        warn!(
            "release \"{}\": version \"{}\" is not strict semver; helm may still accept it",
            release_name, version
        );
    }
}

/// Write (overwrite) the lock file for `state_path` from the releases that
/// just completed a successful `sync` or `apply`-sync.
pub fn write(state_path: &Path, releases: &[&Release]) -> Result<()> {
    let lock = LockFile {
        generatedAt: Utc::now().to_rfc3339(),
        releases: releases
            .iter()
            .map(|r| LockedRelease {
                name: r.name.clone(),
                chart: r.chart.clone(),
                version: r.version.clone(),
            })
            .collect(),
    };
    let yaml = serde_yaml::to_string(&lock)?;
    let path = lock_path(state_path);
    fs::write(&path, yaml).map_err(|e| LockErrorKind::Write(path.display().to_string(), e.to_string()))?;
    Ok(())
}

/// Read a state file's lock file, if one exists.
pub fn read(state_path: &Path) -> Result<Option<LockFile>> {
    let path = lock_path(state_path);
    if !path.is_file() {
        return Ok(None);
    }
    let raw = fs::read_to_string(&path)
        .map_err(|e| LockErrorKind::Read(path.display().to_string(), e.to_string()))?;
    let lock: LockFile = serde_yaml::from_str(&raw)
        .map_err(|e| LockErrorKind::Read(path.display().to_string(), e.to_string()))?;
    Ok(Some(lock))
}

/// Names of releases whose chart or version in `lock` no longer matches
/// the live set — drift since the last successful sync.
pub fn drifted(lock: &LockFile, live: &[&Release]) -> Vec<String> {
    let mut out = Vec::new();
    for release in live {
        let matched = lock.releases.iter().find(|l| l.name == release.name);
        match matched {
            None => out.push(release.name.clone()),
            Some(locked) => {
                if locked.chart != release.chart || locked.version != release.version {
                    out.push(release.name.clone());
                }
            }
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn tempfile(name: &str) -> PathBuf {
        let mut p = std::env::temp_dir();
        p.push(format!("shipfile-lock-test-{}-{}", std::process::id(), name));
        p
    }

    fn release(name: &str, chart: &str, version: Option<&str>) -> Release {
        Release {
            name: name.into(),
            chart: chart.into(),
            version: version.map(String::from),
            ..Default::default()
        }
    }

    #[test]
    fn lock_path_appends_suffix() {
        let state = Path::new("/tmp/helmfile.yaml");
        assert_eq!(lock_path(state), PathBuf::from("/tmp/helmfile.yaml.lock"));
    }

    #[test]
    fn write_then_read_round_trips() {
        let state = tempfile("roundtrip.yaml");
        let a = release("a", "stable/nginx", Some("1.2.3"));
        let releases = vec![&a];
        write(&state, &releases).unwrap();
        let lock = read(&state).unwrap().unwrap();
        assert_eq!(lock.releases.len(), 1);
        assert_eq!(lock.releases[0].name, "a");
        assert_eq!(lock.releases[0].version.as_deref(), Some("1.2.3"));
        fs::remove_file(lock_path(&state)).ok();
    }

    #[test]
    fn missing_lock_file_reads_as_none() {
        let state = tempfile("missing.yaml");
        assert!(read(&state).unwrap().is_none());
    }

    #[test]
    fn drift_detects_version_bump_and_new_release() {
        let lock = LockFile {
            generatedAt: "2024-01-01T00:00:00+00:00".to_string(),
            releases: vec![LockedRelease { name: "a".into(), chart: "stable/nginx".into(), version: Some("1.0.0".into()) }],
        };
        let a = release("a", "stable/nginx", Some("2.0.0"));
        let b = release("b", "stable/redis", None);
        let live = vec![&a, &b];
        let mut drift = drifted(&lock, &live);
        drift.sort();
        assert_eq!(drift, vec!["a".to_string(), "b".to_string()]);
    }

    #[test]
    fn no_drift_when_unchanged() {
        let lock = LockFile {
            generatedAt: "2024-01-01T00:00:00+00:00".to_string(),
            releases: vec![LockedRelease { name: "a".into(), chart: "stable/nginx".into(), version: Some("1.0.0".into()) }],
        };
        let a = release("a", "stable/nginx", Some("1.0.0"));
        let live = vec![&a];
        assert!(drifted(&lock, &live).is_empty());
    }
}
