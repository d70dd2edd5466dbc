//! `ReleaseFilter` (spec.md 4.3): label-selector filtering and duplicate
//! release-name detection.
//!
//! Selector grammar: one `--selector` argument is a comma-separated list of
//! `k=v` or `k!=v` terms, AND'd together; multiple `--selector` arguments
//! are OR'd (spec.md P7). Available keys are any entry in a release's
//! `labels` map, plus the implicit `name`, `namespace`, `chart` (chart
//! without its repository prefix, `Release::chart_name`).

use shipfile_definitions::Release;

use crate::Result;

#[derive(Debug, Fail)]
enum SelectorErrorKind {
    #[fail(display = "malformed selector term '{}': expected k=v or k!=v", _0)]
    MalformedTerm(String),
    #[fail(display = "malformed selector term '{}': key must not be empty", _0)]
    EmptyKey(String),
    #[fail(display = "malformed selector term '{}': value must not be empty", _0)]
    EmptyValue(String),
}

#[derive(Debug, Fail)]
enum DuplicateErrorKind {
    #[fail(display = "duplicate release \"{}\" found: there were {} releases named \"{}\" matching specified selector", _0, _1, _0)]
    Duplicate(String, usize),
}

#[derive(Clone, Debug, PartialEq, Eq)]
enum Op {
    Eq,
    Ne,
}

#[derive(Clone, Debug)]
struct Term {
    key: String,
    value: String,
    op: Op,
}

/// One `--selector` argument: an AND of `Term`s.
#[derive(Clone, Debug, Default)]
pub struct Selector {
    terms: Vec<Term>,
}

impl Selector {
    /// Parse a comma-separated `k=v,k!=v,...` expression.
    pub fn parse(expr: &str) -> Result<Selector> {
        let mut terms = Vec::new();
        for raw in expr.split(',') {
            let raw = raw.trim();
            if raw.is_empty() {
                return Err(SelectorErrorKind::MalformedTerm(expr.to_string()).into());
            }
            terms.push(parse_term(raw)?);
        }
        Ok(Selector { terms })
    }

    fn matches(&self, release: &Release) -> bool {
        self.terms.iter().all(|t| term_matches(t, release))
    }
}

fn parse_term(raw: &str) -> Result<Term> {
    let (key, value, op) = if let Some(idx) = raw.find("!=") {
        (&raw[..idx], &raw[idx + 2..], Op::Ne)
    } else if let Some(idx) = raw.find('=') {
        (&raw[..idx], &raw[idx + 1..], Op::Eq)
    } else {
        return Err(SelectorErrorKind::MalformedTerm(raw.to_string()).into());
    };
    if key.is_empty() {
        return Err(SelectorErrorKind::EmptyKey(raw.to_string()).into());
    }
    if value.is_empty() {
        return Err(SelectorErrorKind::EmptyValue(raw.to_string()).into());
    }
    Ok(Term { key: key.to_string(), value: value.to_string(), op })
}

fn term_matches(term: &Term, release: &Release) -> bool {
    let actual = match term.key.as_str() {
        "name" => Some(release.name.clone()),
        "namespace" => Some(release.namespace.clone()),
        "chart" => Some(release.chart_name().to_string()),
        key => release.labels.get(key).cloned(),
    };
    let eq = actual.as_deref() == Some(term.value.as_str());
    match term.op {
        Op::Eq => eq,
        Op::Ne => !eq,
    }
}

/// Apply an OR-of-`Selector`s predicate. An empty `selectors` list selects
/// everything (no `--selector` flag given at all).
pub fn select<'a>(releases: &'a [Release], selectors: &[Selector]) -> Vec<&'a Release> {
    if selectors.is_empty() {
        return releases.iter().collect();
    }
    releases.iter()
        .filter(|r| selectors.iter().any(|s| s.matches(r)))
        .collect()
}

/// Fail with `DuplicateReleaseError` if any name repeats in the selected
/// set. Uniqueness is by `name` alone, not `(namespace, name)`, to match the
/// underlying CLI's flat release namespace (spec.md 4.3, P1).
pub fn check_duplicates(releases: &[&Release]) -> Result<()> {
    use std::collections::BTreeMap;
    let mut counts: BTreeMap<&str, usize> = BTreeMap::new();
    for r in releases {
        *counts.entry(r.name.as_str()).or_insert(0) += 1;
    }
    for (name, count) in counts {
        if count > 1 {
            return Err(DuplicateErrorKind::Duplicate(name.to_string(), count).into());
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    fn release(name: &str, labels: &[(&str, &str)]) -> Release {
        let mut l = BTreeMap::new();
        for (k, v) in labels { l.insert(k.to_string(), v.to_string()); }
        Release { name: name.into(), labels: l, ..Default::default() }
    }

    #[test]
    fn and_of_terms_within_one_selector() {
        let a = release("a", &[("tier", "frontend"), ("env", "prod")]);
        let b = release("b", &[("tier", "frontend"), ("env", "staging")]);
        let sel = Selector::parse("tier=frontend,env=prod").unwrap();
        assert!(sel.matches(&a));
        assert!(!sel.matches(&b));
    }

    #[test]
    fn or_across_selectors() {
        let a = release("a", &[("tier", "frontend")]);
        let b = release("b", &[("tier", "backend")]);
        let c = release("c", &[("tier", "db")]);
        let releases = vec![a, b, c];
        let sels = vec![Selector::parse("tier=frontend").unwrap(), Selector::parse("tier=backend").unwrap()];
        let picked = select(&releases, &sels);
        let names: Vec<_> = picked.iter().map(|r| r.name.as_str()).collect();
        assert_eq!(names, vec!["a", "b"]);
    }

    #[test]
    fn not_equal_operator() {
        let a = release("a", &[("tier", "frontend")]);
        let b = release("b", &[("tier", "backend")]);
        let sel = Selector::parse("tier!=frontend").unwrap();
        assert!(!sel.matches(&a));
        assert!(sel.matches(&b));
    }

    #[test]
    fn implicit_keys_name_namespace_chart() {
        let mut r = release("svc", &[]);
        r.namespace = "ns1".into();
        r.chart = "stable/mysql".into();
        assert!(Selector::parse("name=svc").unwrap().matches(&r));
        assert!(Selector::parse("namespace=ns1").unwrap().matches(&r));
        assert!(Selector::parse("chart=mysql").unwrap().matches(&r));
    }

    #[test]
    fn malformed_terms_are_rejected() {
        assert!(Selector::parse("noequals").is_err());
        assert!(Selector::parse("=v").is_err());
        assert!(Selector::parse("k=").is_err());
    }

    #[test]
    fn duplicate_names_fail_with_count() {
        let a = release("foo", &[]);
        let b = release("foo", &[]);
        let refs: Vec<&Release> = vec![&a, &b];
        let err = check_duplicates(&refs).unwrap_err();
        assert!(err.to_string().contains("there were 2 releases named \"foo\""));
    }

    #[test]
    fn empty_selector_list_selects_everything() {
        let a = release("a", &[]);
        let b = release("b", &[]);
        let releases = vec![a, b];
        let picked = select(&releases, &[]);
        assert_eq!(picked.len(), 2);
    }
}
