//! DAG Planner (spec.md 4.4): groups releases into topologically ordered
//! waves along their `needs:` edges, using `petgraph` the way the teacher's
//! own `graph` module (manifest dependency visualization) uses it — here
//! driving actual scheduling instead of a picture.

use std::collections::BTreeMap;

use petgraph::algo::is_cyclic_directed;
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::Direction;

use shipfile_definitions::Release;

use crate::Result;

#[derive(Debug, Fail)]
enum DagErrorKind {
    #[fail(display = "release \"{}\" needs \"{}\", which is not a declared release in this selection", _0, _1)]
    UnresolvedNeed(String, String),
    #[fail(display = "dependency cycle detected among the selected releases")]
    Cycle,
}

/// A maximal set of releases that may run in parallel (spec.md "Wave").
pub type Wave<'a> = Vec<&'a Release>;

/// An ordered sequence of waves (spec.md "Plan").
pub struct Plan<'a> {
    pub waves: Vec<Wave<'a>>,
}

impl<'a> Plan<'a> {
    /// The reversed plan used for `delete`/`destroy` (spec.md 4.4, P3):
    /// wave order reverses, intra-wave order is preserved.
    pub fn reversed(&self) -> Plan<'a> {
        let mut waves = self.waves.clone();
        waves.reverse();
        Plan { waves }
    }
}

impl<'a> Clone for Plan<'a> {
    fn clone(&self) -> Self {
        Plan { waves: self.waves.clone() }
    }
}

/// Build a DAG from `needs:` edges and compute the topological wave
/// grouping (spec.md 4.4, P2). Tie-breaking within a wave is stable
/// insertion order from `releases` (source-YAML order after selection).
pub fn plan<'a>(releases: &'a [&'a Release]) -> Result<Plan<'a>> {
    let mut graph: DiGraph<(), ()> = DiGraph::new();
    let mut index_of: BTreeMap<String, NodeIndex> = BTreeMap::new();

    for r in releases {
        let key = r.dag_key();
        let idx = graph.add_node(());
        index_of.insert(key, idx);
    }

    for r in releases {
        let my_idx = index_of[&r.dag_key()];
        for raw_need in &r.needs {
            let need_key = r.qualify_need(raw_need);
            let need_idx = index_of.get(&need_key)
                .ok_or_else(|| DagErrorKind::UnresolvedNeed(r.name.clone(), need_key.clone()))?;
            // Edge points from the dependency to the dependent, so a
            // topological walk visits dependencies before dependents.
            graph.add_edge(*need_idx, my_idx, ());
        }
    }

    if is_cyclic_directed(&graph) {
        return Err(DagErrorKind::Cycle.into());
    }

    // Wave index = 1 + max(wave index of predecessors), computed by
    // repeatedly peeling off nodes whose predecessors are all already
    // assigned (Kahn's algorithm, grouped by level instead of flattened).
    let mut wave_of: BTreeMap<NodeIndex, usize> = BTreeMap::new();
    let mut remaining: Vec<NodeIndex> = graph.node_indices().collect();
    let mut current_wave = 0usize;

    while !remaining.is_empty() {
        let mut ready = Vec::new();
        let mut still_waiting = Vec::new();
        for idx in remaining {
            let unassigned_pred = graph.neighbors_directed(idx, Direction::Incoming)
                .any(|p| !wave_of.contains_key(&p));
            if unassigned_pred {
                still_waiting.push(idx);
            } else {
                ready.push(idx);
            }
        }
        // Cycle detection above guarantees `ready` is non-empty whenever
        // `remaining` was non-empty.
        for idx in &ready {
            wave_of.insert(*idx, current_wave);
        }
        remaining = still_waiting;
        current_wave += 1;
    }

    let num_waves = wave_of.values().cloned().max().map(|m| m + 1).unwrap_or(0);
    let mut waves: Vec<Wave<'a>> = vec![Vec::new(); num_waves];
    // Stable insertion order: iterate the original `releases` slice, not
    // the graph's internal node order.
    for r in releases {
        let idx = index_of[&r.dag_key()];
        let w = wave_of[&idx];
        waves[w].push(r);
    }

    Ok(Plan { waves })
}

#[cfg(test)]
mod tests {
    use super::*;
    use shipfile_definitions::Release;

    fn release(name: &str, needs: &[&str]) -> Release {
        Release { name: name.into(), needs: needs.iter().map(|s| s.to_string()).collect(), ..Default::default() }
    }

    #[test]
    fn independent_releases_share_wave_zero() {
        let a = release("a", &[]);
        let b = release("b", &[]);
        let refs = vec![&a, &b];
        let p = plan(&refs).unwrap();
        assert_eq!(p.waves.len(), 1);
        assert_eq!(p.waves[0].len(), 2);
    }

    #[test]
    fn linear_chain_produces_one_release_per_wave() {
        let logging = release("logging", &[]);
        let servicemesh = release("servicemesh", &["logging"]);
        let myapp1 = release("myapp1", &["servicemesh", "logging"]);
        let myapp2 = release("myapp2", &["servicemesh", "logging"]);
        let refs = vec![&myapp1, &myapp2, &servicemesh, &logging];
        let p = plan(&refs).unwrap();
        assert_eq!(p.waves.len(), 3);
        assert_eq!(p.waves[0].iter().map(|r| r.name.as_str()).collect::<Vec<_>>(), vec!["logging"]);
        assert_eq!(p.waves[1].iter().map(|r| r.name.as_str()).collect::<Vec<_>>(), vec!["servicemesh"]);
        let mut wave2: Vec<_> = p.waves[2].iter().map(|r| r.name.as_str()).collect();
        wave2.sort();
        assert_eq!(wave2, vec!["myapp1", "myapp2"]);
    }

    #[test]
    fn unresolved_need_is_an_error() {
        let a = release("a", &["ghost"]);
        let refs = vec![&a];
        assert!(plan(&refs).is_err());
    }

    #[test]
    fn cycle_is_detected() {
        let a = release("a", &["b"]);
        let b = release("b", &["a"]);
        let refs = vec![&a, &b];
        assert!(plan(&refs).is_err());
    }

    #[test]
    fn delete_plan_is_reverse_of_sync_plan() {
        let logging = release("logging", &[]);
        let servicemesh = release("servicemesh", &["logging"]);
        let refs = vec![&servicemesh, &logging];
        let p = plan(&refs).unwrap();
        let rev = p.reversed();
        assert_eq!(rev.waves.len(), p.waves.len());
        assert_eq!(rev.waves[0][0].name, p.waves[p.waves.len() - 1][0].name);
    }
}
