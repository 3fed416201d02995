//! Dependency analyzer: priority scores, cycle detection, execution order,
//! and wavefront parallel groups over a work-item graph.
//!
//! Cycles are reported as data in [`AnalysisResult`], never as an error; the
//! caller decides how to surface them to an operator. The only hard failure
//! is a dependency edge referencing an item that does not exist.

use crate::error::{OrchestratorError, Result};
use crate::item::{DependencyEdge, ItemStatus, WorkItem};
use serde::{Deserialize, Serialize};
use std::cmp::Reverse;
use std::collections::{BTreeMap, BTreeSet, BinaryHeap, HashMap};

/// Weights for the priority-score formula.
///
/// `score = priority_weight * priority_rank
///        - dependent_weight * |dependents|
///        - critical_path_weight * on_critical_path`
///
/// Lower score sorts first. The shape is fixed (priority dominates, the other
/// two act as unblocking bonuses); the constants are tunable.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct AnalyzerConfig {
    pub priority_weight: i64,
    pub dependent_weight: i64,
    pub critical_path_weight: i64,
}

impl Default for AnalyzerConfig {
    fn default() -> Self {
        Self {
            priority_weight: 10,
            dependent_weight: 5,
            critical_path_weight: 20,
        }
    }
}

/// A work item enriched with graph-derived data. Recomputed on every analysis,
/// never persisted independently of its source item.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalyzedItem {
    pub item: WorkItem,
    /// Direct dependencies (items this one depends on), sorted.
    pub dependencies: Vec<String>,
    /// Direct dependents (items depending on this one), sorted.
    pub dependents: Vec<String>,
    /// Full transitive dependency set.
    pub transitive_dependencies: BTreeSet<String>,
    /// Longest dependency chain below this item; 0 for items with no deps.
    pub depth: usize,
    /// Priority score; lower is more urgent.
    pub score: i64,
    pub on_critical_path: bool,
    /// True iff every direct dependency's item status is completed.
    pub dependencies_resolved: bool,
}

/// Output of [`DependencyAnalyzer::analyze`].
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AnalysisResult {
    pub items: BTreeMap<String, AnalyzedItem>,
    /// Total execution order over schedulable (non-blocked) items.
    pub execution_order: Vec<String>,
    /// Wavefront schedule: each group's items depend only on earlier groups.
    pub parallel_groups: Vec<Vec<String>>,
    /// Detected cycles, one representative path per back-edge found.
    pub cycles: Vec<Vec<String>>,
    /// Items that can never run: cycle members and everything that
    /// transitively depends on one.
    pub blocked_by_cycle: BTreeSet<String>,
}

impl AnalysisResult {
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn has_cycles(&self) -> bool {
        !self.cycles.is_empty()
    }

    pub fn is_blocked(&self, item_id: &str) -> bool {
        self.blocked_by_cycle.contains(item_id)
    }
}

/// Graph analyzer over work items and depends-on edges.
#[derive(Debug, Clone, Default)]
pub struct DependencyAnalyzer {
    config: AnalyzerConfig,
}

impl DependencyAnalyzer {
    pub fn new(config: AnalyzerConfig) -> Self {
        Self { config }
    }

    /// Analyze the graph. Fails only on an edge referencing an unknown item;
    /// cycles and empty inputs are normal results.
    pub fn analyze(
        &self,
        items: &[WorkItem],
        edges: &[DependencyEdge],
    ) -> Result<AnalysisResult> {
        if items.is_empty() {
            return Ok(AnalysisResult::default());
        }

        let item_map: HashMap<&str, &WorkItem> =
            items.iter().map(|i| (i.id.as_str(), i)).collect();

        // Adjacency, deduplicated and sorted for determinism.
        let mut deps: BTreeMap<&str, BTreeSet<&str>> =
            items.iter().map(|i| (i.id.as_str(), BTreeSet::new())).collect();
        let mut dependents: BTreeMap<&str, BTreeSet<&str>> =
            items.iter().map(|i| (i.id.as_str(), BTreeSet::new())).collect();

        for edge in edges {
            let from = item_map
                .get_key_value(edge.from.as_str())
                .map(|(k, _)| *k)
                .ok_or_else(|| OrchestratorError::MissingItemReference(edge.from.clone()))?;
            let to = item_map
                .get_key_value(edge.to.as_str())
                .map(|(k, _)| *k)
                .ok_or_else(|| OrchestratorError::MissingItemReference(edge.to.clone()))?;

            deps.get_mut(from).unwrap().insert(to);
            dependents.get_mut(to).unwrap().insert(from);
        }

        let cycles = detect_cycles(&deps);

        // Kahn residue: anything never freed is a cycle member or depends on
        // one, transitively. These items are permanently blocked.
        let (topo_all, blocked) = kahn_residue(&deps, &dependents);

        // Depth and wavefront levels over the schedulable portion, in
        // topological order so dependencies are always computed first.
        let mut depth: HashMap<&str, usize> = HashMap::new();
        for &id in &topo_all {
            let d = deps[id]
                .iter()
                .filter(|dep| !blocked.contains(**dep))
                .map(|dep| depth[*dep] + 1)
                .max()
                .unwrap_or(0);
            depth.insert(id, d);
        }

        // Height: longest chain of dependents above each node. Combined with
        // depth it identifies critical-path members.
        let mut height: HashMap<&str, usize> = HashMap::new();
        for &id in topo_all.iter().rev() {
            let h = dependents[id]
                .iter()
                .filter(|dep| !blocked.contains(**dep))
                .map(|dep| height[*dep] + 1)
                .max()
                .unwrap_or(0);
            height.insert(id, h);
        }

        let max_chain = topo_all
            .iter()
            .map(|id| depth[*id] + height[*id])
            .max()
            .unwrap_or(0);

        // Transitive dependency closure, reusing topological order.
        let mut transitive: HashMap<&str, BTreeSet<String>> = HashMap::new();
        for &id in &topo_all {
            let mut set = BTreeSet::new();
            for dep in &deps[id] {
                if blocked.contains(*dep) {
                    set.insert((*dep).to_string());
                    continue;
                }
                set.insert((*dep).to_string());
                set.extend(transitive[*dep].iter().cloned());
            }
            transitive.insert(id, set);
        }

        let mut analyzed: BTreeMap<String, AnalyzedItem> = BTreeMap::new();
        let mut scores: HashMap<&str, i64> = HashMap::new();

        for item in items {
            let id = item.id.as_str();
            let is_blocked = blocked.contains(id);
            let on_critical_path =
                !is_blocked && max_chain > 0 && depth[id] + height[id] == max_chain;

            let score = self.config.priority_weight * item.priority.rank()
                - self.config.dependent_weight * dependents[id].len() as i64
                - if on_critical_path {
                    self.config.critical_path_weight
                } else {
                    0
                };
            scores.insert(id, score);

            let dependencies_resolved = deps[id].iter().all(|dep| {
                item_map
                    .get(*dep)
                    .map_or(false, |d| d.status == ItemStatus::Completed)
            });

            analyzed.insert(
                item.id.clone(),
                AnalyzedItem {
                    item: item.clone(),
                    dependencies: deps[id].iter().map(|d| d.to_string()).collect(),
                    dependents: dependents[id].iter().map(|d| d.to_string()).collect(),
                    transitive_dependencies: transitive
                        .get(id)
                        .cloned()
                        .unwrap_or_else(|| {
                            deps[id].iter().map(|d| d.to_string()).collect()
                        }),
                    depth: depth.get(id).copied().unwrap_or(0),
                    score,
                    on_critical_path,
                    dependencies_resolved,
                },
            );
        }

        let execution_order = ordered_by_score(&deps, &dependents, &blocked, &scores);

        // Wavefront groups: group index = depth within the schedulable set.
        let group_count = topo_all
            .iter()
            .map(|id| depth[*id] + 1)
            .max()
            .unwrap_or(0);
        let mut parallel_groups: Vec<Vec<String>> = vec![Vec::new(); group_count];
        // Fill groups in execution order so intra-group ordering follows score.
        for id in &execution_order {
            parallel_groups[depth[id.as_str()]].push(id.clone());
        }

        if !cycles.is_empty() {
            tracing::warn!(
                cycles = cycles.len(),
                blocked = blocked.len(),
                "dependency cycles detected; blocked items excluded from execution order"
            );
        }

        Ok(AnalysisResult {
            items: analyzed,
            execution_order,
            parallel_groups,
            cycles: cycles
                .into_iter()
                .map(|c| c.into_iter().map(|s| s.to_string()).collect())
                .collect(),
            blocked_by_cycle: blocked.iter().map(|s| s.to_string()).collect(),
        })
    }
}

/// Depth-first cycle search tracking the recursion stack. Each back-edge to a
/// node currently on the stack yields one representative cycle path.
fn detect_cycles<'a>(deps: &BTreeMap<&'a str, BTreeSet<&'a str>>) -> Vec<Vec<&'a str>> {
    #[derive(Clone, Copy, PartialEq)]
    enum Color {
        White,
        Gray,
        Black,
    }

    let mut color: HashMap<&str, Color> = deps.keys().map(|&k| (k, Color::White)).collect();
    let mut cycles = Vec::new();

    // Iterative DFS; frame is (node, next-neighbor iterator position).
    for &start in deps.keys() {
        if color[start] != Color::White {
            continue;
        }

        let mut stack: Vec<(&str, Vec<&str>)> = Vec::new();
        let mut path: Vec<&str> = Vec::new();

        color.insert(start, Color::Gray);
        path.push(start);
        stack.push((start, deps[start].iter().copied().collect()));

        loop {
            let next = match stack.last_mut() {
                Some((_, neighbors)) => neighbors.pop(),
                None => break,
            };

            match next {
                Some(next) => match color[next] {
                    Color::White => {
                        color.insert(next, Color::Gray);
                        path.push(next);
                        stack.push((next, deps[next].iter().copied().collect()));
                    }
                    Color::Gray => {
                        // Back edge: the cycle is the path suffix from `next`.
                        let pos = path.iter().position(|&n| n == next).unwrap();
                        cycles.push(path[pos..].to_vec());
                    }
                    Color::Black => {}
                },
                None => {
                    let (node, _) = stack.pop().unwrap();
                    color.insert(node, Color::Black);
                    path.pop();
                }
            }
        }
    }

    cycles
}

/// Kahn's algorithm over the full graph. Returns the processed order and the
/// residue of nodes that were never freed (cycle members and their
/// transitive dependents).
fn kahn_residue<'a>(
    deps: &BTreeMap<&'a str, BTreeSet<&'a str>>,
    dependents: &BTreeMap<&'a str, BTreeSet<&'a str>>,
) -> (Vec<&'a str>, BTreeSet<&'a str>) {
    let mut in_degree: BTreeMap<&str, usize> =
        deps.iter().map(|(&id, d)| (id, d.len())).collect();

    let mut ready: Vec<&str> = in_degree
        .iter()
        .filter(|(_, &d)| d == 0)
        .map(|(&id, _)| id)
        .collect();
    let mut order = Vec::new();

    while let Some(id) = ready.pop() {
        order.push(id);
        for &dependent in &dependents[id] {
            let degree = in_degree.get_mut(dependent).unwrap();
            *degree -= 1;
            if *degree == 0 {
                ready.push(dependent);
            }
        }
    }

    let ordered: BTreeSet<&str> = order.iter().copied().collect();
    let residue: BTreeSet<&str> = deps
        .keys()
        .filter(|id| !ordered.contains(**id))
        .copied()
        .collect();

    (order, residue)
}

/// Kahn's algorithm restricted to schedulable nodes, with the ready set kept
/// in a heap ordered by ascending score then id. Guarantees every item
/// appears after all of its dependencies, deterministically.
fn ordered_by_score(
    deps: &BTreeMap<&str, BTreeSet<&str>>,
    dependents: &BTreeMap<&str, BTreeSet<&str>>,
    blocked: &BTreeSet<&str>,
    scores: &HashMap<&str, i64>,
) -> Vec<String> {
    let mut in_degree: HashMap<&str, usize> = deps
        .iter()
        .filter(|(id, _)| !blocked.contains(*id))
        .map(|(&id, d)| {
            let live = d.iter().filter(|dep| !blocked.contains(*dep)).count();
            (id, live)
        })
        .collect();

    let mut ready: BinaryHeap<Reverse<(i64, &str)>> = in_degree
        .iter()
        .filter(|(_, &d)| d == 0)
        .map(|(&id, _)| Reverse((scores[id], id)))
        .collect();

    let mut order = Vec::with_capacity(in_degree.len());

    while let Some(Reverse((_, id))) = ready.pop() {
        order.push(id.to_string());
        for &dependent in &dependents[id] {
            if let Some(degree) = in_degree.get_mut(dependent) {
                *degree -= 1;
                if *degree == 0 {
                    ready.push(Reverse((scores[dependent], dependent)));
                }
            }
        }
    }

    order
}
