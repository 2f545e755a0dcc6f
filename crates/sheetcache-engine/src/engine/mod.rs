//! Spreadsheet formula engine.
//!
//! - [`CellRef`] - A1 notation <-> zero-indexed (col, row)
//! - [`Cell`], [`CellType`], [`Grid`] - sparse cell storage
//! - [`extract_dependencies`] / [`detect_cycle`] / [`evaluation_order`] - reference graph
//! - [`preprocess_script`] - spreadsheet formula -> Rhai script
//! - [`FormulaEngine`] - Rhai engine with the builtins registered

mod cell;
mod cell_ref;
mod cycle;
mod deps;
mod eval;
mod preprocess;

pub use cell::{Cell, CellType, Grid, ValueCache};
pub use cell_ref::CellRef;
pub use cycle::{detect_cycle, detect_cycle_from};
pub use deps::{evaluation_order, extract_dependencies};
pub use eval::{FormulaEngine, MAX_OPERATIONS, compile_functions};
pub(crate) use eval::run_script;
pub use preprocess::{preprocess_script, strip_formula_prefix};

pub use rhai::{AST, Dynamic};
