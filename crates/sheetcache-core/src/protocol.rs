//! Worker wire protocol.
//!
//! Requests and responses are JSON objects discriminated by `type`:
//!
//! ```text
//! → {"type":"evaluate","id":"1","formula":"=SUM(A1:A2)","data":{...}}
//! → {"type":"invalidate"}
//! → {"type":"stats","id":"2"}
//! ← {"type":"success","id":"1","result":3,"cached":false}
//! ← {"type":"error","id":"1","error":"..."}
//! ← {"type":"stats","id":"2","stats":{"size":1,"maxSize":1000,"hitRate":0.0,"dataVersion":0}}
//! ```
//!
//! Every response echoes the id of the request it answers. `invalidate` gets no reply.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::cache::CacheStats;
use crate::error::Result;
use crate::snapshot::{CellValue, ExcelData};

/// Id used when a fault cannot be traced back to a request.
pub const UNKNOWN_REQUEST_ID: &str = "unknown";

/// Caller-chosen request id: a JSON string or number, echoed back verbatim.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RequestId {
    Text(String),
    Number(serde_json::Number),
}

impl RequestId {
    pub fn unknown() -> Self {
        RequestId::Text(UNKNOWN_REQUEST_ID.to_string())
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RequestId::Text(s) => write!(f, "{}", s),
            RequestId::Number(n) => write!(f, "{}", n),
        }
    }
}

impl From<&str> for RequestId {
    fn from(s: &str) -> Self {
        RequestId::Text(s.to_string())
    }
}

impl From<String> for RequestId {
    fn from(s: String) -> Self {
        RequestId::Text(s)
    }
}

impl From<u64> for RequestId {
    fn from(n: u64) -> Self {
        RequestId::Number(n.into())
    }
}

/// Messages sent from the main thread to the worker.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WorkerRequest {
    Evaluate {
        id: RequestId,
        formula: String,
        data: ExcelData,
    },
    Invalidate,
    Stats {
        id: RequestId,
    },
    /// Any `type` this worker does not know. Dropped without a reply.
    #[serde(other)]
    Unknown,
}

impl WorkerRequest {
    pub fn evaluate(id: impl Into<RequestId>, formula: &str, data: ExcelData) -> Self {
        WorkerRequest::Evaluate {
            id: id.into(),
            formula: formula.to_string(),
            data,
        }
    }

    pub fn stats(id: impl Into<RequestId>) -> Self {
        WorkerRequest::Stats { id: id.into() }
    }

    /// Id a reply to this request would carry, if it gets one.
    pub fn id(&self) -> Option<&RequestId> {
        match self {
            WorkerRequest::Evaluate { id, .. } | WorkerRequest::Stats { id } => Some(id),
            WorkerRequest::Invalidate | WorkerRequest::Unknown => None,
        }
    }
}

/// Messages sent from the worker back to the main thread.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WorkerResponse {
    Success {
        id: RequestId,
        result: CellValue,
        cached: bool,
    },
    Error {
        id: RequestId,
        error: String,
    },
    Stats {
        id: RequestId,
        stats: CacheStats,
    },
}

impl WorkerResponse {
    pub fn id(&self) -> &RequestId {
        match self {
            WorkerResponse::Success { id, .. }
            | WorkerResponse::Error { id, .. }
            | WorkerResponse::Stats { id, .. } => id,
        }
    }
}

/// Outcome of decoding one inbound payload.
#[derive(Clone, Debug, PartialEq)]
pub enum Decoded {
    Request(WorkerRequest),
    /// Not valid JSON, or a known `type` with missing/invalid fields.
    Malformed { id: RequestId, message: String },
}

/// Decode a JSON request, recovering the `id` of a malformed one when possible.
///
/// Valid JSON without a string `type` is an unrecognized request, like any
/// unknown `type`, and decodes to [`WorkerRequest::Unknown`].
pub fn decode_request(text: &str) -> Decoded {
    let err = match serde_json::from_str::<WorkerRequest>(text) {
        Ok(request) => return Decoded::Request(request),
        Err(err) => err,
    };
    let Ok(value) = serde_json::from_str::<serde_json::Value>(text) else {
        return Decoded::Malformed {
            id: RequestId::unknown(),
            message: format!("malformed request: {}", err),
        };
    };
    if !value.get("type").is_some_and(serde_json::Value::is_string) {
        return Decoded::Request(WorkerRequest::Unknown);
    }
    let id = value
        .get("id")
        .cloned()
        .and_then(|id| serde_json::from_value::<RequestId>(id).ok())
        .unwrap_or_else(RequestId::unknown);
    Decoded::Malformed {
        id,
        message: format!("malformed request: {}", err),
    }
}

/// Encode a response as a single JSON line (no trailing newline).
pub fn encode_response(response: &WorkerResponse) -> Result<String> {
    Ok(serde_json::to_string(response)?)
}
