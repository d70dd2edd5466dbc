//! `FileLocator` (spec.md 4.1 pipeline step 1, 6 "default locations"):
//! resolves `--file` to a single state file or an ordered set of `*.yaml`
//! files under a directory.

use std::path::{Path, PathBuf};

use crate::Result;

#[derive(Debug, Fail)]
enum LocatorErrorKind {
    #[fail(display = "no state file found: tried {}, {}/*.yaml, and the deprecated {}", _0, _1, _2)]
    NothingFound(String, String, String),
    #[fail(display = "{} does not exist", _0)]
    ExplicitPathMissing(String),
}

const DEFAULT_FILE: &str = "helmfile.yaml";
const DEFAULT_DIR: &str = "helmfile.d";
const DEPRECATED_FILE: &str = "charts.yaml";

/// Resolve the set of state files to load, in the order they must be
/// processed (spec.md 5 "files located by the FileLocator are processed in
/// lexical order, one at a time").
///
/// `explicit` is the `--file|-f` flag, if given. Without it, the default
/// search order is: `./helmfile.yaml`; else every `*.yaml` under
/// `./helmfile.d` in lexical order; else the deprecated `./charts.yaml`
/// with a warning.
pub fn locate(explicit: Option<&str>, cwd: &Path) -> Result<Vec<PathBuf>> {
    if let Some(p) = explicit {
        return locate_explicit(p, cwd);
    }

    let default_file = cwd.join(DEFAULT_FILE);
    if default_file.is_file() {
        return Ok(vec![default_file]);
    }

    let default_dir = cwd.join(DEFAULT_DIR);
    if default_dir.is_dir() {
        let files = yaml_files_in(&default_dir)?;
        if !files.is_empty() {
            return Ok(files);
        }
    }

    let deprecated = cwd.join(DEPRECATED_FILE);
    if deprecated.is_file() {
        warn!("{} is deprecated, rename it to {}", DEPRECATED_FILE, DEFAULT_FILE);
        return Ok(vec![deprecated]);
    }

    Err(LocatorErrorKind::NothingFound(
        default_file.display().to_string(),
        default_dir.display().to_string(),
        deprecated.display().to_string(),
    ).into())
}

fn locate_explicit(p: &str, cwd: &Path) -> Result<Vec<PathBuf>> {
    let path = Path::new(p);
    let path = if path.is_absolute() { path.to_path_buf() } else { cwd.join(path) };

    if path.is_dir() {
        return yaml_files_in(&path);
    }
    if path.is_file() {
        return Ok(vec![path]);
    }
    Err(LocatorErrorKind::ExplicitPathMissing(path.display().to_string()).into())
}

/// Every `*.yaml` file directly under `dir`, lexically sorted.
fn yaml_files_in(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut out = Vec::new();
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();
        if path.extension().map(|e| e == "yaml").unwrap_or(false) && path.is_file() {
            out.push(path);
        }
    }
    out.sort();
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn tempdir(name: &str) -> PathBuf {
        let mut p = std::env::temp_dir();
        p.push(format!("shipfile-locator-test-{}-{}", std::process::id(), name));
        let _ = fs::remove_dir_all(&p);
        fs::create_dir_all(&p).unwrap();
        p
    }

    #[test]
    fn default_file_is_preferred_when_present() {
        let dir = tempdir("default-file");
        fs::write(dir.join("helmfile.yaml"), "releases: []\n").unwrap();
        let found = locate(None, &dir).unwrap();
        assert_eq!(found, vec![dir.join("helmfile.yaml")]);
    }

    #[test]
    fn helmfile_d_is_scanned_lexically_when_no_default_file() {
        let dir = tempdir("helmfile-d");
        let d = dir.join("helmfile.d");
        fs::create_dir_all(&d).unwrap();
        fs::write(d.join("b.yaml"), "releases: []\n").unwrap();
        fs::write(d.join("a.yaml"), "releases: []\n").unwrap();
        fs::write(d.join("notes.txt"), "ignored\n").unwrap();
        let found = locate(None, &dir).unwrap();
        assert_eq!(found, vec![d.join("a.yaml"), d.join("b.yaml")]);
    }

    #[test]
    fn deprecated_charts_yaml_is_last_resort() {
        let dir = tempdir("deprecated");
        fs::write(dir.join("charts.yaml"), "releases: []\n").unwrap();
        let found = locate(None, &dir).unwrap();
        assert_eq!(found, vec![dir.join("charts.yaml")]);
    }

    #[test]
    fn nothing_found_is_an_error() {
        let dir = tempdir("empty");
        assert!(locate(None, &dir).is_err());
    }

    #[test]
    fn explicit_directory_is_globbed() {
        let dir = tempdir("explicit-dir");
        let sub = dir.join("states");
        fs::create_dir_all(&sub).unwrap();
        fs::write(sub.join("z.yaml"), "releases: []\n").unwrap();
        fs::write(sub.join("a.yaml"), "releases: []\n").unwrap();
        let found = locate(Some("states"), &dir).unwrap();
        assert_eq!(found, vec![sub.join("a.yaml"), sub.join("z.yaml")]);
    }

    #[test]
    fn explicit_missing_path_is_an_error() {
        let dir = tempdir("missing");
        assert!(locate(Some("nope.yaml"), &dir).is_err());
    }
}
