//! Formula preprocessing.
//!
//! Rhai has no notion of cells, so a formula is rewritten before evaluation:
//!
//! - `=` prefix, `$` markers, `<>` and `^` are translated to Rhai syntax
//! - `SUM(A1:B5)` becomes `SUM_RANGE(0, 0, 1, 4)` (col, row, col, row)
//! - `@A1` becomes `VALUE(0, 0)` and a bare `A1` becomes `CELL(0, 0)`
//!
//! Text inside string literals is never touched.

use regex::{Captures, Regex};
use std::sync::OnceLock;

use super::cell_ref::CellRef;
use crate::builtins::{range_fn_re, range_rhai_name};

/// A run of formula text, either code or a quoted string literal (quotes included).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum Segment<'a> {
    Code(&'a str),
    Literal(&'a str),
}

/// Split `script` into code and string-literal runs. An unterminated literal
/// runs to the end of the input.
pub(crate) fn segments(script: &str) -> Vec<Segment<'_>> {
    let mut out = Vec::new();
    let mut rest = script;
    while let Some(open) = rest.find('"') {
        if open > 0 {
            out.push(Segment::Code(&rest[..open]));
        }
        let end = match closing_quote(&rest[open + 1..]) {
            Some(close) => open + close + 2,
            None => rest.len(),
        };
        out.push(Segment::Literal(&rest[open..end]));
        rest = &rest[end..];
    }
    if !rest.is_empty() {
        out.push(Segment::Code(rest));
    }
    out
}

fn closing_quote(body: &str) -> Option<usize> {
    let mut escaped = false;
    for (i, b) in body.bytes().enumerate() {
        match b {
            _ if escaped => escaped = false,
            b'\\' => escaped = true,
            b'"' => return Some(i),
            _ => {}
        }
    }
    None
}

fn absolute_ref_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\$?\b([A-Za-z]+)\$?([0-9]+)\b").expect("valid regex"))
}

/// `@A1` or `A1`; group 1 is the optional `@`.
fn cell_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(@?)\b([A-Za-z]+[0-9]+)\b").expect("valid regex"))
}

/// Strip the leading `=` that marks spreadsheet formulas.
pub fn strip_formula_prefix(formula: &str) -> &str {
    let trimmed = formula.trim();
    trimmed.strip_prefix('=').unwrap_or(trimmed).trim_start()
}

/// Rewrite a spreadsheet formula into a Rhai script.
pub fn preprocess_script(script: &str) -> String {
    segments(strip_formula_prefix(script))
        .into_iter()
        .map(|segment| match segment {
            Segment::Code(code) => rewrite_code(code),
            Segment::Literal(literal) => literal.to_string(),
        })
        .collect()
}

fn rewrite_code(code: &str) -> String {
    let code = absolute_ref_re().replace_all(code, "${1}${2}");
    let code = code.replace("<>", "!=").replace('^', "**");
    let code = range_fn_re().replace_all(&code, rewrite_range_call);
    cell_re().replace_all(&code, rewrite_cell).into_owned()
}

fn rewrite_range_call(caps: &Captures) -> String {
    let corners = (CellRef::parse(&caps[2]), CellRef::parse(&caps[3]));
    match (range_rhai_name(&caps[1]), corners) {
        (Some(name), (Some(start), Some(end))) => format!(
            "{}({}, {}, {}, {}{})",
            name,
            start.col,
            start.row,
            end.col,
            end.row,
            caps.get(4).map_or("", |m| m.as_str())
        ),
        _ => caps[0].to_string(),
    }
}

fn rewrite_cell(caps: &Captures) -> String {
    let Some(cell) = CellRef::parse(&caps[2]) else {
        return caps[0].to_string();
    };
    let accessor = if caps[1].is_empty() { "CELL" } else { "VALUE" };
    format!("{}({}, {})", accessor, cell.col, cell.row)
}
