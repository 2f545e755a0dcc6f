//! Grid cells as the evaluator sees them.

use dashmap::DashMap;
use std::sync::Arc;

use super::cell_ref::CellRef;
use super::deps::extract_dependencies;

#[derive(Clone, Debug, PartialEq)]
pub enum CellType {
    Empty,
    Text(String),
    Number(f64),
    Script(String),
}

/// Cell contents plus the cells a formula reads, extracted once up front.
#[derive(Clone, Debug)]
pub struct Cell {
    pub contents: CellType,
    pub depends_on: Vec<CellRef>,
}

impl Cell {
    pub fn new_text(text: &str) -> Cell {
        Cell {
            contents: CellType::Text(text.to_string()),
            depends_on: vec![],
        }
    }

    pub fn new_number(n: f64) -> Cell {
        Cell {
            contents: CellType::Number(n),
            depends_on: vec![],
        }
    }

    /// Create a new cell containing a formula.
    /// The leading `=` is optional; dependencies are extracted from the body.
    pub fn new_script(script: &str) -> Cell {
        let body = super::preprocess::strip_formula_prefix(script);
        Cell {
            depends_on: extract_dependencies(body),
            contents: CellType::Script(body.to_string()),
        }
    }

    pub fn is_script(&self) -> bool {
        matches!(self.contents, CellType::Script(_))
    }
}

/// Sparse cell storage, shared with the builtins registered in an engine.
pub type Grid = Arc<DashMap<CellRef, Cell>>;

/// Formula cell results for one evaluation, so a cell read many times (e.g.
/// by a range) runs once. A failed cell keeps its error message.
pub type ValueCache = Arc<DashMap<CellRef, Result<rhai::Dynamic, String>>>;
