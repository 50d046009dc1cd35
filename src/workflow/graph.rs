//! StepGraph - DAG structure derived from step references.
//!
//! Edges come from `${{ steps.<id>... }}` references, not an explicit edge
//! list. Uses Arc<str> + FxHashMap + SmallVec for cheap cloning and fast
//! lookups; cycle detection is the standard DFS three-color algorithm.

use std::collections::VecDeque;
use std::sync::Arc;

use rustc_hash::{FxHashMap, FxHashSet};
use smallvec::SmallVec;

use crate::error::{AutoPrError, Result};
use crate::workflow::spec::WorkflowSpec;

/// Stack-allocated deps: most steps have 0-4 dependencies
pub type DepVec = SmallVec<[Arc<str>; 4]>;

/// Dependency graph over a workflow's steps.
pub struct StepGraph {
    /// step_id -> successor step_ids
    adjacency: FxHashMap<Arc<str>, DepVec>,
    /// step_id -> predecessor step_ids
    predecessors: FxHashMap<Arc<str>, DepVec>,
    /// All step IDs in declaration order
    step_ids: Vec<Arc<str>>,
}

impl StepGraph {
    pub fn from_spec(spec: &WorkflowSpec) -> Self {
        let capacity = spec.steps.len();
        let mut adjacency: FxHashMap<Arc<str>, DepVec> =
            FxHashMap::with_capacity_and_hasher(capacity, Default::default());
        let mut predecessors: FxHashMap<Arc<str>, DepVec> =
            FxHashMap::with_capacity_and_hasher(capacity, Default::default());
        let mut step_ids: Vec<Arc<str>> = Vec::with_capacity(capacity);
        let mut interned: FxHashMap<&str, Arc<str>> =
            FxHashMap::with_capacity_and_hasher(capacity, Default::default());

        for step in &spec.steps {
            let id: Arc<str> = Arc::from(step.id.as_str());
            interned.insert(step.id.as_str(), Arc::clone(&id));
            step_ids.push(Arc::clone(&id));
            adjacency.insert(Arc::clone(&id), DepVec::new());
            predecessors.insert(id, DepVec::new());
        }

        for step in &spec.steps {
            let target = Arc::clone(&interned[step.id.as_str()]);
            for dep in step.dependencies() {
                let Some(source) = interned.get(dep.as_str()) else {
                    // Validated earlier; an unknown dep cannot produce edges
                    continue;
                };
                adjacency
                    .entry(Arc::clone(source))
                    .or_default()
                    .push(Arc::clone(&target));
                predecessors
                    .entry(Arc::clone(&target))
                    .or_default()
                    .push(Arc::clone(source));
            }
        }

        Self {
            adjacency,
            predecessors,
            step_ids,
        }
    }

    /// Predecessors of a step.
    #[inline]
    pub fn dependencies(&self, step_id: &str) -> &[Arc<str>] {
        static EMPTY: &[Arc<str>] = &[];
        self.predecessors
            .get(step_id)
            .map_or(EMPTY, SmallVec::as_slice)
    }

    /// Successors of a step.
    #[inline]
    pub fn successors(&self, step_id: &str) -> &[Arc<str>] {
        static EMPTY: &[Arc<str>] = &[];
        self.adjacency
            .get(step_id)
            .map_or(EMPTY, SmallVec::as_slice)
    }

    /// All step ids in declaration order.
    pub fn step_ids(&self) -> &[Arc<str>] {
        &self.step_ids
    }

    /// Every step reachable downstream of `step_id` (not including itself).
    pub fn descendants(&self, step_id: &str) -> Vec<Arc<str>> {
        let mut visited: FxHashSet<Arc<str>> = FxHashSet::default();
        let mut queue: VecDeque<&str> = VecDeque::new();
        queue.push_back(step_id);

        while let Some(current) = queue.pop_front() {
            for next in self.successors(current) {
                if visited.insert(Arc::clone(next)) {
                    queue.push_back(next.as_ref());
                }
            }
        }
        let mut out: Vec<Arc<str>> = visited.into_iter().collect();
        out.sort();
        out
    }

    /// Detect cycles using DFS with three-color marking.
    ///
    /// - White: unvisited
    /// - Gray: currently in the DFS stack
    /// - Black: fully processed
    ///
    /// A Gray neighbor means a cycle; the error carries the cycle path.
    pub fn detect_cycles(&self) -> Result<()> {
        #[derive(Clone, Copy, PartialEq, Eq)]
        enum Color {
            White,
            Gray,
            Black,
        }

        let mut colors: FxHashMap<Arc<str>, Color> = self
            .step_ids
            .iter()
            .map(|id| (Arc::clone(id), Color::White))
            .collect();
        let mut stack: Vec<Arc<str>> = Vec::new();

        fn dfs(
            node: Arc<str>,
            adjacency: &FxHashMap<Arc<str>, DepVec>,
            colors: &mut FxHashMap<Arc<str>, Color>,
            stack: &mut Vec<Arc<str>>,
        ) -> std::result::Result<(), String> {
            colors.insert(Arc::clone(&node), Color::Gray);
            stack.push(Arc::clone(&node));

            if let Some(neighbors) = adjacency.get(&node) {
                for neighbor in neighbors {
                    match colors.get(neighbor) {
                        Some(Color::Gray) => {
                            let cycle_start = stack
                                .iter()
                                .position(|x| x.as_ref() == neighbor.as_ref())
                                .unwrap_or(0);
                            let cycle: Vec<&str> =
                                stack[cycle_start..].iter().map(|s| s.as_ref()).collect();
                            return Err(format!("{} -> {}", cycle.join(" -> "), neighbor));
                        }
                        Some(Color::White) | None => {
                            dfs(Arc::clone(neighbor), adjacency, colors, stack)?;
                        }
                        Some(Color::Black) => {}
                    }
                }
            }

            stack.pop();
            colors.insert(node, Color::Black);
            Ok(())
        }

        for step_id in &self.step_ids {
            if colors.get(step_id) == Some(&Color::White) {
                if let Err(cycle) = dfs(
                    Arc::clone(step_id),
                    &self.adjacency,
                    &mut colors,
                    &mut stack,
                ) {
                    return Err(AutoPrError::CycleDetected { cycle });
                }
            }
        }

        Ok(())
    }
}
