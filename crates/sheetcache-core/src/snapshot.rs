//! Spreadsheet snapshot (`ExcelData`) as it arrives over the wire.
//!
//! A snapshot is immutable for the duration of one evaluation. Row `r`,
//! column `c` of `rows` is addressable as the cell at (c, r), so with
//! `headers: ["A"]` and `rows: [[1], [2]]` the values live in `A1` and `A2`.
//! Headers are names only and never addressable.

use std::collections::BTreeMap;
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use dashmap::DashMap;
use serde::{Deserialize, Serialize, Serializer};
use sheetcache_engine::engine::{Cell, CellRef, Grid};

/// Largest integer an f64 represents exactly (2^53).
const MAX_EXACT_INT: f64 = 9_007_199_254_740_992.0;

/// A single cell value: string, number or null.
#[derive(Clone, Debug, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum CellValue {
    Number(f64),
    Text(String),
    Null,
}

impl CellValue {
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            CellValue::Number(n) => Some(*n),
            _ => None,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, CellValue::Null)
    }

    fn hash_into<H: Hasher>(&self, state: &mut H) {
        match self {
            CellValue::Number(n) => {
                0u8.hash(state);
                n.to_bits().hash(state);
            }
            CellValue::Text(s) => {
                1u8.hash(state);
                s.hash(state);
            }
            CellValue::Null => 2u8.hash(state),
        }
    }
}

// Integral numbers go out as JSON integers (`3`, not `3.0`).
impl Serialize for CellValue {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            CellValue::Number(n) if n.fract() == 0.0 && n.abs() < MAX_EXACT_INT => {
                serializer.serialize_i64(*n as i64)
            }
            CellValue::Number(n) => serializer.serialize_f64(*n),
            CellValue::Text(s) => serializer.serialize_str(s),
            CellValue::Null => serializer.serialize_unit(),
        }
    }
}

impl From<f64> for CellValue {
    fn from(n: f64) -> Self {
        CellValue::Number(n)
    }
}

impl From<&str> for CellValue {
    fn from(s: &str) -> Self {
        CellValue::Text(s.to_string())
    }
}

impl From<String> for CellValue {
    fn from(s: String) -> Self {
        CellValue::Text(s)
    }
}

/// Snapshot of the spreadsheet the main thread is showing.
///
/// `cell_styles`, `selected_cells` and `pending_changes` are presentation state the
/// evaluator never reads; they are kept as opaque JSON because they still take
/// part in the snapshot's identity.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExcelData {
    pub headers: Vec<String>,
    pub rows: Vec<Vec<CellValue>>,
    #[serde(default)]
    pub formulas: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "serde_json::Value::is_null")]
    pub cell_styles: serde_json::Value,
    #[serde(default, skip_serializing_if = "serde_json::Value::is_null")]
    pub selected_cells: serde_json::Value,
    #[serde(default, skip_serializing_if = "serde_json::Value::is_null")]
    pub pending_changes: serde_json::Value,
}

impl ExcelData {
    pub fn new(headers: Vec<String>, rows: Vec<Vec<CellValue>>) -> Self {
        ExcelData {
            headers,
            rows,
            ..Default::default()
        }
    }

    /// Attach a formula to a cell reference (builder style).
    pub fn with_formula(mut self, cell: &str, formula: &str) -> Self {
        self.formulas.insert(cell.to_string(), formula.to_string());
        self
    }

    /// Build the sparse evaluation grid.
    ///
    /// Literal values are taken as-is (a string starting with `=` is still text);
    /// entries of `formulas` override whatever literal sits in their cell.
    /// Formula keys that are not valid A1 references are skipped.
    pub fn to_grid(&self) -> Grid {
        let grid: Grid = Arc::new(DashMap::new());

        for (row, values) in self.rows.iter().enumerate() {
            for (col, value) in values.iter().enumerate() {
                let cell = match value {
                    CellValue::Number(n) => Cell::new_number(*n),
                    CellValue::Text(s) => Cell::new_text(s),
                    CellValue::Null => continue,
                };
                grid.insert(CellRef::new(col, row), cell);
            }
        }

        for (name, formula) in &self.formulas {
            match CellRef::parse(name) {
                Some(cell_ref) => {
                    grid.insert(cell_ref, Cell::new_script(formula));
                }
                None => log::warn!("skipping formula for invalid cell reference {:?}", name),
            }
        }

        grid
    }

    /// Structural hash of the whole snapshot, presentation state included.
    /// Two snapshots that differ in any field hash differently (modulo collisions).
    pub fn fingerprint(&self) -> u64 {
        let mut hasher = DefaultHasher::new();
        self.headers.hash(&mut hasher);
        self.rows.len().hash(&mut hasher);
        for row in &self.rows {
            row.len().hash(&mut hasher);
            for value in row {
                value.hash_into(&mut hasher);
            }
        }
        self.formulas.hash(&mut hasher);
        for extra in [&self.cell_styles, &self.selected_cells, &self.pending_changes] {
            extra.to_string().hash(&mut hasher);
        }
        hasher.finish()
    }
}
