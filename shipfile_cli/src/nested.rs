//! NestedDispatcher (spec.md 4.10): processes `helmfiles:` entries as
//! sub-engines sharing the parent's resolver and executor, using an
//! explicit work stack rather than unbounded recursion (spec.md design
//! notes 9).

use std::path::{Path, PathBuf};

use shipfile_definitions::state::NestedEntry;

use crate::filter::Selector;
use crate::Result;

/// Selector inheritance mode (spec.md 4.10, open question resolved in
/// DESIGN.md): gated upstream by `HELMFILE_EXPERIMENTAL=explicit-selector-
/// inheritance`. This reimplementation picks **legacy** as the default,
/// per spec.md 9's instruction to settle on one default rather than mirror
/// both silently; `explicit` is available by setting the same environment
/// variable, preserved as a recognizable on-ramp for operators migrating
/// from the upstream tool.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum InheritanceMode {
    Legacy,
    Explicit,
}

impl InheritanceMode {
    pub fn from_env() -> InheritanceMode {
        let flags = std::env::var("HELMFILE_EXPERIMENTAL").unwrap_or_default();
        if flags.split(',').any(|f| f == "explicit-selector-inheritance" || f == "true") {
            InheritanceMode::Explicit
        } else {
            InheritanceMode::Legacy
        }
    }
}

/// One resolved child dispatch: a concrete path plus the selectors it
/// should run with.
pub struct NestedJob {
    pub path: PathBuf,
    pub selectors: Vec<Selector>,
}

/// Resolve `helmfiles:` entries into an ordered (declaration order) list
/// of jobs, expanding glob patterns in lexical match order and applying
/// selector inheritance (spec.md 4.10).
///
/// Remote URIs (`git::...`, `s3::...`) are out of scope for this engine
/// (spec.md 1 "out of scope: ... on-disk file I/O", generalized here to
/// remote fetchers, which are themselves file-I/O producers); a bare path
/// containing `::` is rejected with a clear error rather than silently
/// treated as a literal filesystem path.
pub fn resolve(
    entries: &[NestedEntry],
    base_dir: &Path,
    parent_selectors: &[Selector],
    mode: InheritanceMode,
) -> Result<Vec<NestedJob>> {
    let mut jobs = Vec::new();
    // Explicit stack instead of recursion (spec.md design notes 9); each
    // entry here is one `helmfiles:` list item, so this loop never nests —
    // recursion into the children's own releases happens one level up, in
    // the caller that loads each resolved path as its own `State`.
    let mut stack: Vec<&NestedEntry> = entries.iter().collect();
    stack.reverse();

    while let Some(entry) = stack.pop() {
        let raw_path = entry.path();
        if raw_path.contains("::") {
            bail!("remote helmfiles entry '{}' is not supported by this engine", raw_path);
        }

        let pattern = if Path::new(raw_path).is_absolute() {
            raw_path.to_string()
        } else {
            base_dir.join(raw_path).to_string_lossy().to_string()
        };

        let mut matches: Vec<PathBuf> = glob::glob(&pattern)
            .map_err(|e| format_err!("invalid helmfiles glob '{}': {}", pattern, e))?
            .filter_map(|r| r.ok())
            .collect();
        if matches.is_empty() {
            // A literal (non-glob) path that doesn't exist is still a hard
            // error; a glob that matches nothing is tolerated, since glob
            // patterns routinely span optional per-environment files.
            if !(pattern.contains('*') || pattern.contains('?') || pattern.contains('[')) {
                bail!("helmfiles entry '{}' does not exist", pattern);
            }
        }
        matches.sort();

        let selectors = match entry {
            NestedEntry::Bare(_) => inherit(parent_selectors, None, mode),
            NestedEntry::Full { selectors, selectorsInherited, .. } => {
                inherit(parent_selectors, selectors.as_deref(), mode).into_iter()
                    .chain(if *selectorsInherited == Some(true) && selectors.is_none() {
                        parent_selectors.to_vec()
                    } else {
                        Vec::new()
                    })
                    .collect::<Vec<_>>()
            }
        };
        for path in matches {
            jobs.push(NestedJob { path, selectors: selectors.clone() });
        }
    }

    Ok(jobs)
}

/// `selectors: []` always clears, regardless of inheritance mode. An
/// explicit non-empty `selectors:` always wins. Otherwise: legacy mode
/// inherits the parent/CLI selectors; explicit mode yields nothing unless
/// `selectorsInherited: true` (handled by the caller).
fn inherit(parent: &[Selector], explicit: Option<&[String]>, mode: InheritanceMode) -> Vec<Selector> {
    match explicit {
        Some(list) => list.iter().filter_map(|s| Selector::parse(s).ok()).collect(),
        None => match mode {
            InheritanceMode::Legacy => parent.to_vec(),
            InheritanceMode::Explicit => Vec::new(),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn tempdir(name: &str) -> PathBuf {
        let mut p = std::env::temp_dir();
        p.push(format!("shipfile-nested-test-{}-{}", std::process::id(), name));
        let _ = fs::remove_dir_all(&p);
        fs::create_dir_all(&p).unwrap();
        p
    }

    #[test]
    fn bare_entries_glob_expand_in_lexical_order() {
        let dir = tempdir("glob-order");
        fs::write(dir.join("b.yaml"), "releases: []\n").unwrap();
        fs::write(dir.join("a.yaml"), "releases: []\n").unwrap();
        let entries = vec![NestedEntry::Bare("*.yaml".to_string())];
        let jobs = resolve(&entries, &dir, &[], InheritanceMode::Legacy).unwrap();
        assert_eq!(jobs.len(), 2);
        assert!(jobs[0].path.ends_with("a.yaml"));
        assert!(jobs[1].path.ends_with("b.yaml"));
    }

    #[test]
    fn legacy_mode_inherits_parent_selectors_by_default() {
        let dir = tempdir("legacy-inherit");
        fs::write(dir.join("child.yaml"), "releases: []\n").unwrap();
        let entries = vec![NestedEntry::Bare("child.yaml".to_string())];
        let parent = vec![Selector::parse("tier=frontend").unwrap()];
        let jobs = resolve(&entries, &dir, &parent, InheritanceMode::Legacy).unwrap();
        assert_eq!(jobs[0].selectors.len(), 1);
    }

    #[test]
    fn explicit_mode_drops_selectors_without_opt_in() {
        let dir = tempdir("explicit-drop");
        fs::write(dir.join("child.yaml"), "releases: []\n").unwrap();
        let entries = vec![NestedEntry::Bare("child.yaml".to_string())];
        let parent = vec![Selector::parse("tier=frontend").unwrap()];
        let jobs = resolve(&entries, &dir, &parent, InheritanceMode::Explicit).unwrap();
        assert!(jobs[0].selectors.is_empty());
    }

    #[test]
    fn explicit_empty_list_always_clears() {
        let dir = tempdir("explicit-empty-clears");
        fs::write(dir.join("child.yaml"), "releases: []\n").unwrap();
        let entries = vec![NestedEntry::Full {
            path: "child.yaml".to_string(),
            selectors: Some(vec![]),
            selectorsInherited: Some(true),
            values: vec![],
        }];
        let parent = vec![Selector::parse("tier=frontend").unwrap()];
        let jobs = resolve(&entries, &dir, &parent, InheritanceMode::Legacy).unwrap();
        assert!(jobs[0].selectors.is_empty());
    }

    #[test]
    fn remote_uri_is_rejected() {
        let dir = tempdir("remote");
        let entries = vec![NestedEntry::Bare("git::https://example.com/repo.git".to_string())];
        assert!(resolve(&entries, &dir, &[], InheritanceMode::Legacy).is_err());
    }

    #[test]
    fn missing_literal_path_is_an_error() {
        let dir = tempdir("missing-literal");
        let entries = vec![NestedEntry::Bare("nope.yaml".to_string())];
        assert!(resolve(&entries, &dir, &[], InheritanceMode::Legacy).is_err());
    }
}
