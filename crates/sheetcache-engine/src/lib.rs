//! sheetcache_engine - Spreadsheet formula engine + Rhai integration.

pub(crate) mod builtins;
pub mod engine;
