//! Formula evaluation over a snapshot.
//!
//! The worker treats evaluation as an opaque, possibly slow, synchronous call.
//! [`RhaiEvaluator`] is the production implementation; tests and embedders can
//! plug in anything implementing [`FormulaEvaluator`], including plain closures.

use std::sync::Arc;

use rhai::Dynamic;
use sheetcache_engine::engine::{
    AST, FormulaEngine, compile_functions, detect_cycle_from, extract_dependencies,
    strip_formula_prefix,
};

use crate::error::{Result, SheetcacheError};
use crate::snapshot::{CellValue, ExcelData};

pub trait FormulaEvaluator {
    fn evaluate(&self, formula: &str, snapshot: &ExcelData) -> Result<CellValue>;
}

impl<F> FormulaEvaluator for F
where
    F: Fn(&str, &ExcelData) -> Result<CellValue>,
{
    fn evaluate(&self, formula: &str, snapshot: &ExcelData) -> Result<CellValue> {
        self(formula, snapshot)
    }
}

/// Evaluates formulas with the Rhai-backed spreadsheet engine.
#[derive(Clone, Debug, Default)]
pub struct RhaiEvaluator {
    functions: Option<Arc<AST>>,
}

impl RhaiEvaluator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make custom Rhai functions callable from every formula. The script is
    /// compiled once here, so syntax errors surface up front.
    pub fn with_functions(script: impl AsRef<str>) -> Result<Self> {
        let functions = compile_functions(script.as_ref())
            .map_err(|err| SheetcacheError::RhaiCompile(err.to_string()))?;
        Ok(RhaiEvaluator {
            functions: Some(Arc::new(functions)),
        })
    }

    pub fn has_functions(&self) -> bool {
        self.functions.is_some()
    }
}

impl FormulaEvaluator for RhaiEvaluator {
    fn evaluate(&self, formula: &str, snapshot: &ExcelData) -> Result<CellValue> {
        let grid = snapshot.to_grid();

        let roots = extract_dependencies(strip_formula_prefix(formula));
        if let Some(path) = detect_cycle_from(&roots, &grid) {
            let path = path
                .iter()
                .map(|cell| cell.to_string())
                .collect::<Vec<_>>()
                .join(" -> ");
            return Err(SheetcacheError::CircularDependency(path));
        }

        let mut engine = FormulaEngine::new(grid);
        if let Some(functions) = &self.functions {
            engine = engine.with_functions(Arc::clone(functions));
        }
        dynamic_to_cell_value(engine.eval(formula)?)
    }
}

/// Map a Rhai result onto the string | number | null the protocol carries.
fn dynamic_to_cell_value(value: Dynamic) -> Result<CellValue> {
    if value.is_unit() {
        return Ok(CellValue::Null);
    }
    if let Ok(n) = value.as_float() {
        if !n.is_finite() {
            return Err(SheetcacheError::UnsupportedResult(format!(
                "{} is not a finite number",
                n
            )));
        }
        return Ok(CellValue::Number(n));
    }
    if let Ok(n) = value.as_int() {
        return Ok(CellValue::Number(n as f64));
    }
    if let Ok(b) = value.as_bool() {
        return Ok(CellValue::Text(if b { "TRUE" } else { "FALSE" }.to_string()));
    }
    if let Ok(c) = value.as_char() {
        return Ok(CellValue::Text(c.to_string()));
    }
    let type_name = value.type_name();
    value
        .into_string()
        .map(CellValue::Text)
        .map_err(|_| SheetcacheError::UnsupportedResult(type_name.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn column(values: &[f64]) -> ExcelData {
        ExcelData::new(
            vec!["A".into()],
            values.iter().map(|n| vec![CellValue::Number(*n)]).collect(),
        )
    }

    #[test]
    fn test_sum_over_snapshot() {
        let result = RhaiEvaluator::new()
            .evaluate("=SUM(A1:A2)", &column(&[1.0, 2.0]))
            .unwrap();
        assert_eq!(result, CellValue::Number(3.0));
    }

    #[test]
    fn test_formula_cells_feed_other_formulas() {
        let data = column(&[4.0, 6.0]).with_formula("B1", "=A1 * 10");
        let result = RhaiEvaluator::new().evaluate("=B1 + A2", &data).unwrap();
        assert_eq!(result, CellValue::Number(46.0));
    }

    #[test]
    fn test_circular_formulas_are_rejected() {
        let data = column(&[1.0])
            .with_formula("B1", "=C1 + 1")
            .with_formula("C1", "=B1 + 1");
        let err = RhaiEvaluator::new().evaluate("=B1", &data).unwrap_err();
        assert!(matches!(err, SheetcacheError::CircularDependency(_)));
        assert!(err.to_string().contains("B1 -> C1 -> B1"));
    }

    #[test]
    fn test_string_and_bool_results() {
        let data = ExcelData::new(vec!["A".into()], vec![vec!["hi".into()]]);
        let evaluator = RhaiEvaluator::new();
        assert_eq!(
            evaluator.evaluate("=@A1 + \"!\"", &data).unwrap(),
            CellValue::from("hi!")
        );
        assert_eq!(
            evaluator.evaluate("=1 < 2", &data).unwrap(),
            CellValue::from("TRUE")
        );
    }

    #[test]
    fn test_array_result_is_unsupported() {
        let err = RhaiEvaluator::new()
            .evaluate("=[1, 2]", &ExcelData::default())
            .unwrap_err();
        assert!(matches!(err, SheetcacheError::UnsupportedResult(_)));
    }

    #[test]
    fn test_custom_functions() {
        let evaluator = RhaiEvaluator::with_functions("fn TRIPLE(x) { x * 3.0 }").unwrap();
        assert!(evaluator.has_functions());
        let result = evaluator.evaluate("=TRIPLE(A2)", &column(&[1.0, 2.0])).unwrap();
        assert_eq!(result, CellValue::Number(6.0));
        assert!(RhaiEvaluator::with_functions("fn (").is_err());
    }

    #[test]
    fn test_custom_functions_inside_formula_cells() {
        let evaluator = RhaiEvaluator::with_functions("fn TRIPLE(x) { x * 3.0 }").unwrap();
        let data = column(&[2.0]).with_formula("B1", "=TRIPLE(A1)");
        assert_eq!(
            evaluator.evaluate("=B1", &data).unwrap(),
            CellValue::Number(6.0)
        );
        assert_eq!(
            evaluator.evaluate("=SUM(B1:B1) + 1", &data).unwrap(),
            CellValue::Number(7.0)
        );
    }

    #[test]
    fn test_failing_formula_cell_fails_the_request() {
        let data = column(&[1.0]).with_formula("A2", "=NOPE(1)");
        let evaluator = RhaiEvaluator::new();
        let err = evaluator.evaluate("=SUM(A1:A2)", &data).unwrap_err();
        assert!(matches!(err, SheetcacheError::Rhai(_)), "{:?}", err);
        assert!(evaluator.evaluate("=A2", &data).is_err());
    }

    #[test]
    fn test_running_total_column() {
        let mut data = column(&[1.0]);
        for row in 2..=1500 {
            data = data.with_formula(&format!("A{}", row), &format!("=A{} + 1", row - 1));
        }
        assert_eq!(
            RhaiEvaluator::new().evaluate("=A1500", &data).unwrap(),
            CellValue::Number(1500.0)
        );
    }

    #[test]
    fn test_malformed_formula_is_an_error() {
        assert!(RhaiEvaluator::new()
            .evaluate("=SUM(A1:", &column(&[1.0]))
            .is_err());
    }
}
