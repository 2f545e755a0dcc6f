//! Functions registered into every formula engine.
//!
//! Range calls such as `SUM(A1:B5)` are rewritten by the preprocessor into
//! `SUM_RANGE(0, 0, 1, 4)`; the `*_RANGE` names below are what actually runs.
//! Adding a range function means adding a [`RangeAggregate`] variant and a
//! row in [`RANGE_BUILTINS`].

use crate::engine::{AST, CellRef, CellType, Grid, ValueCache, preprocess_script, run_script};
use regex::Regex;
use rhai::{Dynamic, Engine, EvalAltResult, NativeCallContext, Position};

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, OnceLock};

type FnResult<T> = Result<T, Box<EvalAltResult>>;

const MAX_DECIMALS: usize = 12;
const MAX_RANGE_CELLS: usize = 1_000_000;
/// Formula cells evaluated inside one another at once. Cells found by
/// dependency extraction are evaluated up front and never nest.
const MAX_NESTING: usize = 32;

/// Reduction applied over every cell of a rectangular range.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RangeAggregate {
    Sum,
    Average,
    Count,
    Min,
    Max,
}

impl RangeAggregate {
    pub fn rhai_name(self) -> &'static str {
        match self {
            RangeAggregate::Sum => "SUM_RANGE",
            RangeAggregate::Average => "AVG_RANGE",
            RangeAggregate::Count => "COUNT_RANGE",
            RangeAggregate::Min => "MIN_RANGE",
            RangeAggregate::Max => "MAX_RANGE",
        }
    }

    fn all() -> [RangeAggregate; 5] {
        [
            RangeAggregate::Sum,
            RangeAggregate::Average,
            RangeAggregate::Count,
            RangeAggregate::Min,
            RangeAggregate::Max,
        ]
    }
}

/// Spreadsheet-facing range function names. `AVG` and `AVERAGE` are aliases.
pub const RANGE_BUILTINS: &[(&str, RangeAggregate)] = &[
    ("SUM", RangeAggregate::Sum),
    ("AVERAGE", RangeAggregate::Average),
    ("AVG", RangeAggregate::Average),
    ("COUNT", RangeAggregate::Count),
    ("MIN", RangeAggregate::Min),
    ("MAX", RangeAggregate::Max),
];

/// Matches `NAME(A1:B5)` for every name in [`RANGE_BUILTINS`].
///
/// Groups: 1 = name, 2 = first corner, 3 = second corner, 4 = trailing
/// arguments (unused, but tolerated).
pub fn range_fn_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        let names: Vec<&str> = RANGE_BUILTINS.iter().map(|(name, _)| *name).collect();
        Regex::new(&format!(
            r"\b({})\(\s*([A-Za-z]+[0-9]+)\s*:\s*([A-Za-z]+[0-9]+)\s*(\s*,[^)]*)?\)",
            names.join("|")
        ))
        .expect("range function regex is valid")
    })
}

pub fn range_rhai_name(sheet_name: &str) -> Option<&'static str> {
    RANGE_BUILTINS
        .iter()
        .find(|(name, _)| *name == sheet_name)
        .map(|(_, agg)| agg.rhai_name())
}

fn runtime_error(message: String) -> Box<EvalAltResult> {
    EvalAltResult::ErrorRuntime(message.into(), Position::NONE).into()
}

fn non_negative(value: i64, label: &str) -> FnResult<usize> {
    usize::try_from(value).map_err(|_| runtime_error(format!("{} must be >= 0", label)))
}

fn as_number(value: &Dynamic) -> Option<f64> {
    value
        .as_float()
        .ok()
        .or_else(|| value.as_int().ok().map(|n| n as f64))
}

/// Read access to the grid for builtins, with per-evaluation memoization of
/// formula cells.
#[derive(Clone)]
pub(crate) struct GridReader {
    grid: Grid,
    values: ValueCache,
    functions: Option<Arc<AST>>,
    depth: Arc<AtomicUsize>,
}

impl GridReader {
    pub(crate) fn new(grid: Grid, values: ValueCache) -> Self {
        GridReader {
            grid,
            values,
            functions: None,
            depth: Arc::default(),
        }
    }

    pub(crate) fn with_functions(self, functions: Arc<AST>) -> Self {
        GridReader {
            functions: Some(functions),
            ..self
        }
    }

    pub(crate) fn grid(&self) -> &Grid {
        &self.grid
    }

    pub(crate) fn functions(&self) -> Option<&AST> {
        self.functions.as_deref()
    }

    /// Evaluate and memoize the formula at `cell_ref` ahead of its readers.
    /// A failure is memoized too and only surfaces if the cell is read.
    pub(crate) fn prime(&self, engine: &Engine, cell_ref: &CellRef) {
        let script = match self.grid.get(cell_ref) {
            Some(cell) => match &cell.contents {
                CellType::Script(script) => script.clone(),
                _ => return,
            },
            None => return,
        };
        let _ = self.formula_value(engine, cell_ref, &script);
    }

    /// Evaluate the formula stored at `cell_ref`, once per evaluation.
    fn formula_value(
        &self,
        engine: &Engine,
        cell_ref: &CellRef,
        script: &str,
    ) -> FnResult<Dynamic> {
        let memo = self.values.get(cell_ref).map(|entry| entry.value().clone());
        let result = match memo {
            Some(result) => result,
            None => {
                let result = self.eval_nested(engine, script).map_err(|err| err.to_string());
                self.values.insert(cell_ref.clone(), result.clone());
                result
            }
        };
        result.map_err(|message| runtime_error(format!("{}: {}", cell_ref, message)))
    }

    fn eval_nested(&self, engine: &Engine, script: &str) -> FnResult<Dynamic> {
        let depth = self.depth.fetch_add(1, Ordering::Relaxed);
        let result = if depth >= MAX_NESTING {
            Err(runtime_error(format!(
                "formula cells nest deeper than {} levels",
                MAX_NESTING
            )))
        } else {
            run_script(engine, self.functions(), &preprocess_script(script))
        };
        self.depth.fetch_sub(1, Ordering::Relaxed);
        result
    }

    /// Typed contents: numbers, text, or a formula's result. Empty is `""`.
    fn typed(&self, engine: &Engine, cell_ref: &CellRef) -> FnResult<Dynamic> {
        let contents = match self.grid.get(cell_ref) {
            Some(cell) => cell.contents.clone(),
            None => return Ok(Dynamic::from(String::new())),
        };
        Ok(match contents {
            CellType::Empty => Dynamic::from(String::new()),
            CellType::Number(n) => Dynamic::from(n),
            CellType::Text(s) => Dynamic::from(s),
            CellType::Script(s) => self.formula_value(engine, cell_ref, &s)?,
        })
    }

    /// Numeric contents. Missing and empty cells are 0; text is `text_value`.
    fn number(&self, engine: &Engine, cell_ref: &CellRef, text_value: f64) -> FnResult<f64> {
        let contents = match self.grid.get(cell_ref) {
            Some(cell) => cell.contents.clone(),
            None => return Ok(0.0),
        };
        Ok(match contents {
            CellType::Empty => 0.0,
            CellType::Number(n) => n,
            CellType::Text(_) => text_value,
            CellType::Script(s) => {
                as_number(&self.formula_value(engine, cell_ref, &s)?).unwrap_or(text_value)
            }
        })
    }

    fn is_filled(&self, cell_ref: &CellRef) -> bool {
        self.grid
            .get(cell_ref)
            .is_some_and(|cell| !matches!(cell.contents, CellType::Empty))
    }

    fn aggregate(
        &self,
        engine: &Engine,
        agg: RangeAggregate,
        corners: (i64, i64, i64, i64),
    ) -> FnResult<f64> {
        let (c1, r1, c2, r2) = corners;
        let (c1, c2) = (non_negative(c1, "col")?, non_negative(c2, "col")?);
        let (r1, r2) = (non_negative(r1, "row")?, non_negative(r2, "row")?);
        let size = (c1.abs_diff(c2) as u128 + 1) * (r1.abs_diff(r2) as u128 + 1);
        if size > MAX_RANGE_CELLS as u128 {
            return Err(runtime_error(format!(
                "range of {} cells exceeds the limit of {}",
                size, MAX_RANGE_CELLS
            )));
        }
        let cells = (r1.min(r2)..=r1.max(r2))
            .flat_map(|row| (c1.min(c2)..=c1.max(c2)).map(move |col| CellRef::new(col, row)));
        // Text counts as zero inside ranges.
        let number = |cell_ref: CellRef| self.number(engine, &cell_ref, 0.0);

        let result = match agg {
            RangeAggregate::Count => cells.filter(|cell_ref| self.is_filled(cell_ref)).count() as f64,
            RangeAggregate::Sum => cells.map(number).try_fold(0.0, |sum, n| n.map(|n| sum + n))?,
            RangeAggregate::Average => {
                let (sum, count) = cells
                    .map(number)
                    .try_fold((0.0, 0usize), |(sum, count), n| {
                        n.map(|n| (sum + n, count + 1))
                    })?;
                sum / count as f64
            }
            RangeAggregate::Min => cells
                .map(number)
                .try_fold(f64::INFINITY, |min, n| n.map(|n| min.min(n)))?,
            RangeAggregate::Max => cells
                .map(number)
                .try_fold(f64::NEG_INFINITY, |max, n| n.map(|n| max.max(n)))?,
        };
        Ok(result)
    }
}

/// Round half away from zero.
fn round_to(n: f64, decimals: i64) -> f64 {
    let factor = 10f64.powi(decimals.clamp(-15, 15) as i32);
    (n * factor).round() / factor
}

fn fixed(n: f64, decimals: i64) -> FnResult<String> {
    let decimals = non_negative(decimals, "decimals")?;
    if decimals > MAX_DECIMALS {
        return Err(runtime_error(format!("decimals must be <= {}", MAX_DECIMALS)));
    }
    Ok(if n.is_nan() {
        "#NAN!".to_string()
    } else if n.is_infinite() {
        "#INF!".to_string()
    } else {
        format!("{:.*}", decimals, n)
    })
}

/// Register all built-in functions into `engine`.
pub(crate) fn register_builtins(engine: &mut Engine, reader: GridReader) {

    // CELL(col, row): number at cell; text is NaN so arithmetic on it is visible.
    let cell_reader = reader.clone();
    engine.register_fn(
        "CELL",
        move |ctx: NativeCallContext, col: i64, row: i64| -> FnResult<f64> {
            let cell_ref = CellRef::new(non_negative(col, "col")?, non_negative(row, "row")?);
            cell_reader.number(ctx.engine(), &cell_ref, f64::NAN)
        },
    );

    // VALUE(col, row): typed value, written `@A1` in formulas.
    let value_reader = reader.clone();
    engine.register_fn(
        "VALUE",
        move |ctx: NativeCallContext, col: i64, row: i64| -> FnResult<Dynamic> {
            let cell_ref = CellRef::new(non_negative(col, "col")?, non_negative(row, "row")?);
            value_reader.typed(ctx.engine(), &cell_ref)
        },
    );

    for agg in RangeAggregate::all() {
        let reader = reader.clone();
        engine.register_fn(
            agg.rhai_name(),
            move |ctx: NativeCallContext, c1: i64, r1: i64, c2: i64, r2: i64| -> FnResult<f64> {
                reader.aggregate(ctx.engine(), agg, (c1, r1, c2, r2))
            },
        );
    }

    // Cell values may arrive as int or float, so each math helper takes both.
    engine.register_fn("POW", |base: f64, exp: f64| base.powf(exp));
    engine.register_fn("POW", |base: f64, exp: i64| base.powf(exp as f64));
    engine.register_fn("POW", |base: i64, exp: f64| (base as f64).powf(exp));
    engine.register_fn("POW", |base: i64, exp: i64| (base as f64).powf(exp as f64));
    engine.register_fn("SQRT", |x: f64| x.sqrt());
    engine.register_fn("SQRT", |x: i64| (x as f64).sqrt());
    engine.register_fn("ABS", |x: f64| x.abs());
    engine.register_fn("ABS", |x: i64| (x as f64).abs());
    engine.register_fn("ROUND", |n: f64, decimals: i64| round_to(n, decimals));
    engine.register_fn("ROUND", |n: i64, decimals: i64| round_to(n as f64, decimals));
    engine.register_fn("FIXED", |n: f64, decimals: i64| fixed(n, decimals));
    engine.register_fn("FIXED", |n: i64, decimals: i64| fixed(n as f64, decimals));
}
