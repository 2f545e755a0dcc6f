//! Which cells does a formula read?
//!
//! Used to wire up the dependency graph of a snapshot's formula cells before
//! cycle detection. Range arguments (`SUM(A1:B5)`) expand to every cell they
//! cover; references inside string literals are ignored.

use std::collections::HashSet;

use super::cell::Grid;
use super::cell_ref::CellRef;
use super::preprocess::{Segment, segments};
use crate::builtins::range_fn_re;

/// Ranges larger than this are left out of the dependency list.
const MAX_DEPENDENCY_RANGE_CELLS: usize = 1_000_000;

/// Cell references in `script`, ranges first, in order of appearance.
pub fn extract_dependencies(script: &str) -> Vec<CellRef> {
    let code: Vec<&str> = segments(script)
        .into_iter()
        .filter_map(|segment| match segment {
            Segment::Code(code) => Some(code),
            Segment::Literal(_) => None,
        })
        .collect();
    let code = code.join(" ").replace('$', "");

    let range_re = range_fn_re();
    let mut deps: Vec<CellRef> = range_re
        .captures_iter(&code)
        .filter_map(|caps| Some((CellRef::parse(&caps[2])?, CellRef::parse(&caps[3])?)))
        .flat_map(|(start, end)| range_cells(&start, &end))
        .collect();

    // Range endpoints were handled above.
    let singles = range_re.replace_all(&code, " ");
    deps.extend(
        singles
            .split(|c: char| !(c.is_ascii_alphanumeric() || c == '_'))
            .filter_map(CellRef::parse),
    );
    deps
}

fn range_cells(start: &CellRef, end: &CellRef) -> Vec<CellRef> {
    let width = start.col.abs_diff(end.col).checked_add(1);
    let height = start.row.abs_diff(end.row).checked_add(1);
    let within_limit = width
        .zip(height)
        .and_then(|(w, h)| w.checked_mul(h))
        .is_some_and(|n| n <= MAX_DEPENDENCY_RANGE_CELLS);
    if !within_limit {
        return Vec::new();
    }

    let cols = start.col.min(end.col)..=start.col.max(end.col);
    (start.row.min(end.row)..=start.row.max(end.row))
        .flat_map(|row| cols.clone().map(move |col| CellRef::new(col, row)))
        .collect()
}

/// Formula cells reachable from `roots`, each listed after every formula
/// cell it reads. Loops are cut where they close, so this also terminates
/// on cyclic input.
pub fn evaluation_order(roots: &[CellRef], grid: &Grid) -> Vec<CellRef> {
    let formula_deps = |cell_ref: &CellRef| {
        grid.get(cell_ref)
            .filter(|cell| cell.is_script())
            .map(|cell| cell.depends_on.clone().into_iter())
    };

    let mut order = Vec::new();
    let mut seen = HashSet::new();
    for root in roots {
        if !seen.insert(root.clone()) {
            continue;
        }
        let Some(deps) = formula_deps(root) else {
            continue;
        };
        let mut stack = vec![(root.clone(), deps)];
        while let Some((_, deps)) = stack.last_mut() {
            let Some(dep) = deps.next() else {
                if let Some((done, _)) = stack.pop() {
                    order.push(done);
                }
                continue;
            };
            if seen.insert(dep.clone())
                && let Some(next) = formula_deps(&dep)
            {
                stack.push((dep, next));
            }
        }
    }
    order
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::Cell;
    use dashmap::DashMap;
    use std::sync::Arc;

    #[test]
    fn test_ranges_expand_and_singles_follow() {
        let deps = extract_dependencies("SUM(A1:B2) + C3 * 2");
        assert_eq!(
            deps,
            vec![
                CellRef::new(0, 0),
                CellRef::new(1, 0),
                CellRef::new(0, 1),
                CellRef::new(1, 1),
                CellRef::new(2, 2),
            ]
        );
    }

    #[test]
    fn test_over_limit_ranges_are_skipped() {
        let deps = extract_dependencies("SUM(A1:A1000001)+B2");
        assert_eq!(deps, vec![CellRef::new(1, 1)]);
    }

    #[test]
    fn test_string_literals_are_ignored() {
        let deps = extract_dependencies(r#"A1 + "B2""#);
        assert_eq!(deps, vec![CellRef::new(0, 0)]);
    }

    #[test]
    fn test_typed_and_absolute_refs() {
        let deps = extract_dependencies("@A1 + $B$2");
        assert_eq!(deps, vec![CellRef::new(0, 0), CellRef::new(1, 1)]);
    }

    #[test]
    fn test_absolute_range_expands() {
        let deps = extract_dependencies("SUM($A$1:$A$2)");
        assert_eq!(deps, vec![CellRef::new(0, 0), CellRef::new(0, 1)]);
    }

    fn chain(len: usize) -> Grid {
        let grid: Grid = Arc::new(DashMap::new());
        grid.insert(CellRef::new(1, 0), Cell::new_number(0.0));
        for row in 1..len {
            grid.insert(
                CellRef::new(1, row),
                Cell::new_script(&format!("B{} + 1", row)),
            );
        }
        grid
    }

    #[test]
    fn test_evaluation_order_lists_dependencies_first() {
        let grid = chain(4);
        assert_eq!(
            evaluation_order(&[CellRef::new(1, 3)], &grid),
            vec![CellRef::new(1, 1), CellRef::new(1, 2), CellRef::new(1, 3)]
        );
    }

    #[test]
    fn test_evaluation_order_handles_long_chains() {
        let order = evaluation_order(&[CellRef::new(1, 4999)], &chain(5000));
        assert_eq!(order.len(), 4999);
        assert_eq!(order.first(), Some(&CellRef::new(1, 1)));
        assert_eq!(order.last(), Some(&CellRef::new(1, 4999)));
    }

    #[test]
    fn test_evaluation_order_terminates_on_cycles() {
        let grid: Grid = Arc::new(DashMap::new());
        grid.insert(CellRef::new(0, 0), Cell::new_script("B1"));
        grid.insert(CellRef::new(1, 0), Cell::new_script("A1"));
        assert_eq!(
            evaluation_order(&[CellRef::new(0, 0)], &grid),
            vec![CellRef::new(1, 0), CellRef::new(0, 0)]
        );
    }
}
