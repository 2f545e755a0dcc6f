//! sheetcache-core - snapshot model, formula cache and worker protocol.

pub mod cache;
pub mod error;
pub mod evaluator;
pub mod protocol;
pub mod snapshot;
pub mod worker;

pub use cache::{CacheConfig, CacheStats, FormulaCache, FormulaKey};
pub use error::{Result, SheetcacheError};
pub use evaluator::{FormulaEvaluator, RhaiEvaluator};
pub use protocol::{RequestId, WorkerRequest, WorkerResponse};
pub use snapshot::{CellValue, ExcelData};
pub use worker::{PendingRequests, RequestHandler, Worker, WorkerHandle};

pub use sheetcache_engine::engine::CellRef;
