//! Rhai engine setup and formula evaluation.

use std::sync::Arc;

use rhai::{Engine, EvalAltResult, ParseError};

use super::{AST, Dynamic, Grid, ValueCache, evaluation_order, extract_dependencies};
use super::{preprocess_script, strip_formula_prefix};
use crate::builtins::{GridReader, register_builtins};

/// Upper bound on Rhai operations per evaluation. A runaway custom function
/// fails with an error instead of pinning the worker thread.
pub const MAX_OPERATIONS: u64 = 5_000_000;

/// Compile user-supplied Rhai functions once, for reuse across evaluations.
/// Only the function definitions are kept; top-level statements are dropped.
pub fn compile_functions(script: &str) -> Result<AST, ParseError> {
    let mut engine = Engine::new_raw();
    engine.set_max_operations(MAX_OPERATIONS);
    Ok(engine.compile(script)?.clone_functions_only())
}

/// Compile `script` and run it with `functions` in scope.
pub(crate) fn run_script(
    engine: &Engine,
    functions: Option<&AST>,
    script: &str,
) -> Result<Dynamic, Box<EvalAltResult>> {
    let ast = engine.compile(script)?;
    match functions {
        Some(functions) => engine.eval_ast(&functions.merge(&ast)),
        None => engine.eval_ast(&ast),
    }
}

/// A Rhai engine bound to one grid, with all spreadsheet builtins registered.
pub struct FormulaEngine {
    engine: Engine,
    reader: GridReader,
}

impl FormulaEngine {
    pub fn new(grid: Grid) -> Self {
        Self::with_cache(grid, ValueCache::default())
    }

    /// Share `value_cache` for formula cell results (see [`ValueCache`]).
    pub fn with_cache(grid: Grid, value_cache: ValueCache) -> Self {
        Self::build(GridReader::new(grid, value_cache))
    }

    /// Make the functions in `functions` callable from formulas, including
    /// formulas stored in referenced cells.
    pub fn with_functions(self, functions: impl Into<Arc<AST>>) -> Self {
        Self::build(self.reader.with_functions(functions.into()))
    }

    fn build(reader: GridReader) -> Self {
        let mut engine = Engine::new();
        engine.set_max_operations(MAX_OPERATIONS);
        register_builtins(&mut engine, reader.clone());
        FormulaEngine { engine, reader }
    }

    /// Preprocess and evaluate a spreadsheet formula such as `=SUM(A1:A2)`.
    ///
    /// Formula cells the formula reads are evaluated first, dependencies
    /// before dependents, so nested cell lookups find their values memoized.
    pub fn eval(&self, formula: &str) -> Result<Dynamic, Box<EvalAltResult>> {
        let roots = extract_dependencies(strip_formula_prefix(formula));
        for cell_ref in evaluation_order(&roots, self.reader.grid()) {
            self.reader.prime(&self.engine, &cell_ref);
        }
        self.eval_script(&preprocess_script(formula))
    }

    /// Evaluate an already-preprocessed Rhai script.
    pub fn eval_script(&self, script: &str) -> Result<Dynamic, Box<EvalAltResult>> {
        run_script(&self.engine, self.reader.functions(), script)
    }
}
