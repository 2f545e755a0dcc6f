//! Circular reference detection.
//!
//! Snapshot formulas may reference each other. A chain that loops back on
//! itself would recurse until Rhai's limits trip, so the evaluator searches
//! every formula cell a request can reach first.

use std::collections::HashSet;

use super::{CellRef, Grid};

/// Depth-first search state shared across several roots, so a subgraph
/// proven acyclic is not walked twice. The walk keeps its own stack, so
/// long reference chains cannot exhaust the thread's.
struct CycleSearch<'a> {
    grid: &'a Grid,
    cleared: HashSet<CellRef>,
}

impl<'a> CycleSearch<'a> {
    fn new(grid: &'a Grid) -> Self {
        CycleSearch {
            grid,
            cleared: HashSet::new(),
        }
    }

    fn deps(&self, cell: &CellRef) -> Option<std::vec::IntoIter<CellRef>> {
        self.grid
            .get(cell)
            .map(|entry| entry.depends_on.clone().into_iter())
    }

    /// Returns the loop as `[X, ..., X]` if one is reachable from `start`.
    fn run(&mut self, start: &CellRef) -> Option<Vec<CellRef>> {
        if self.cleared.contains(start) {
            return None;
        }
        let mut on_path = HashSet::from([start.clone()]);
        let mut path = vec![start.clone()];
        let mut stack = vec![self.deps(start)?];

        while let Some(deps) = stack.last_mut() {
            let Some(dep) = deps.next() else {
                stack.pop();
                if let Some(done) = path.pop() {
                    on_path.remove(&done);
                    self.cleared.insert(done);
                }
                continue;
            };
            if on_path.contains(&dep) {
                let first = path.iter().position(|cell| *cell == dep)?;
                let mut cycle = path.split_off(first);
                cycle.push(dep);
                return Some(cycle);
            }
            if self.cleared.contains(&dep) {
                continue;
            }
            if let Some(next) = self.deps(&dep) {
                on_path.insert(dep.clone());
                path.push(dep);
                stack.push(next);
            }
        }
        None
    }
}

/// The reference loop reachable from `start`, if any.
pub fn detect_cycle(start: &CellRef, grid: &Grid) -> Option<Vec<CellRef>> {
    CycleSearch::new(grid).run(start)
}

/// The first reference loop reachable from any of `roots`.
pub fn detect_cycle_from(roots: &[CellRef], grid: &Grid) -> Option<Vec<CellRef>> {
    let mut search = CycleSearch::new(grid);
    roots.iter().find_map(|root| search.run(root))
}
