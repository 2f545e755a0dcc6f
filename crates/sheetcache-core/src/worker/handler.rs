use std::any::Any;
use std::panic::{self, AssertUnwindSafe};

use crate::cache::{CacheConfig, Clock, FormulaCache, FormulaKey, SystemClock};
use crate::evaluator::FormulaEvaluator;
use crate::protocol::{Decoded, RequestId, WorkerRequest, WorkerResponse, decode_request};
use crate::snapshot::ExcelData;

/// Dispatches protocol requests to the cache and the evaluator.
///
/// Owns its [`FormulaCache`] exclusively; nothing else reads or writes it.
/// Each call runs to completion, so cache transitions are atomic per request.
pub struct RequestHandler<E, C = SystemClock> {
    evaluator: E,
    cache: FormulaCache<C>,
    dropped: u64,
}

impl<E: FormulaEvaluator> RequestHandler<E, SystemClock> {
    pub fn new(evaluator: E, config: CacheConfig) -> Self {
        Self::with_cache(evaluator, FormulaCache::new(config))
    }
}

impl<E: FormulaEvaluator, C: Clock> RequestHandler<E, C> {
    pub fn with_cache(evaluator: E, cache: FormulaCache<C>) -> Self {
        RequestHandler {
            evaluator,
            cache,
            dropped: 0,
        }
    }

    /// Handle one request. `None` means the request gets no reply.
    pub fn handle(&mut self, request: WorkerRequest) -> Option<WorkerResponse> {
        match request {
            WorkerRequest::Evaluate { id, formula, data } => {
                Some(self.evaluate(id, &formula, &data))
            }
            WorkerRequest::Invalidate => {
                self.cache.invalidate();
                log::debug!("cache invalidated, data version {}", self.cache.data_version());
                None
            }
            WorkerRequest::Stats { id } => Some(WorkerResponse::Stats {
                id,
                stats: self.cache.stats(),
            }),
            WorkerRequest::Unknown => {
                self.dropped += 1;
                log::debug!("dropped unrecognized request ({} so far)", self.dropped);
                None
            }
        }
    }

    fn evaluate(&mut self, id: RequestId, formula: &str, data: &ExcelData) -> WorkerResponse {
        let key = FormulaKey::new(formula, data);
        if let Some(result) = self.cache.lookup(&key) {
            log::trace!("cache hit for {:?}", formula);
            return WorkerResponse::Success {
                id,
                result,
                cached: true,
            };
        }

        log::trace!("cache miss for {:?}", formula);
        match self.evaluator.evaluate(formula, data) {
            Ok(result) => {
                self.cache.store(&key, result.clone());
                WorkerResponse::Success {
                    id,
                    result,
                    cached: false,
                }
            }
            Err(err) => {
                log::warn!("request {}: evaluating {:?} failed: {}", id, formula, err);
                WorkerResponse::Error {
                    id,
                    error: err.to_string(),
                }
            }
        }
    }

    /// Like [`handle`](Self::handle), but a panic while handling becomes an
    /// `error` response instead of unwinding into the caller.
    pub fn handle_guarded(&mut self, request: WorkerRequest) -> Option<WorkerResponse> {
        let id = request.id().cloned();
        match panic::catch_unwind(AssertUnwindSafe(|| self.handle(request))) {
            Ok(response) => response,
            Err(payload) => {
                let message = panic_message(payload.as_ref());
                log::error!("request handler panicked: {}", message);
                Some(WorkerResponse::Error {
                    id: id.unwrap_or_else(RequestId::unknown),
                    error: format!("internal error: {}", message),
                })
            }
        }
    }

    /// Decode and handle a raw JSON payload.
    pub fn handle_text(&mut self, text: &str) -> Option<WorkerResponse> {
        match decode_request(text) {
            Decoded::Request(request) => self.handle_guarded(request),
            Decoded::Malformed { id, message } => {
                log::warn!("request {}: {}", id, message);
                Some(WorkerResponse::Error { id, error: message })
            }
        }
    }

    pub fn cache(&self) -> &FormulaCache<C> {
        &self.cache
    }

    /// Number of unrecognized requests dropped without a reply.
    pub fn dropped_messages(&self) -> u64 {
        self.dropped
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::ManualClock;
    use crate::error::{Result, SheetcacheError};
    use crate::evaluator::RhaiEvaluator;
    use crate::snapshot::CellValue;

    fn data() -> ExcelData {
        ExcelData::new(
            vec!["A".into()],
            vec![vec![CellValue::Number(1.0)], vec![CellValue::Number(2.0)]],
        )
    }

    fn rhai_handler() -> RequestHandler<RhaiEvaluator, ManualClock> {
        let cache = FormulaCache::with_clock(CacheConfig::new(16, 60_000), ManualClock::new(0));
        RequestHandler::with_cache(RhaiEvaluator::new(), cache)
    }

    #[test]
    fn test_evaluate_then_cached() {
        let mut handler = rhai_handler();
        let first = handler.handle(WorkerRequest::evaluate("1", "=SUM(A1:A2)", data()));
        let second = handler.handle(WorkerRequest::evaluate("2", "=SUM(A1:A2)", data()));

        assert_eq!(
            first,
            Some(WorkerResponse::Success {
                id: "1".into(),
                result: CellValue::Number(3.0),
                cached: false,
            })
        );
        assert_eq!(
            second,
            Some(WorkerResponse::Success {
                id: "2".into(),
                result: CellValue::Number(3.0),
                cached: true,
            })
        );
    }

    #[test]
    fn test_failed_evaluation_is_not_cached() {
        let mut handler = rhai_handler();
        for id in ["a", "b"] {
            let response = handler.handle(WorkerRequest::evaluate(id, "=NOPE(1)", data()));
            assert!(matches!(response, Some(WorkerResponse::Error { .. })));
        }
        assert_eq!(handler.cache().len(), 0);
    }

    #[test]
    fn test_invalidate_has_no_reply() {
        let mut handler = rhai_handler();
        assert_eq!(handler.handle(WorkerRequest::Invalidate), None);
    }

    #[test]
    fn test_unknown_request_is_counted_and_dropped() {
        let mut handler = rhai_handler();
        assert_eq!(handler.handle(WorkerRequest::Unknown), None);
        assert_eq!(handler.handle_text(r#"{"type":"bogus"}"#), None);
        assert_eq!(handler.dropped_messages(), 2);
    }

    #[test]
    fn test_message_without_string_type_is_dropped() {
        let mut handler = rhai_handler();
        assert_eq!(handler.handle_text(r#"{"id":"x","formula":"=1"}"#), None);
        assert_eq!(handler.handle_text(r#"{"type":7,"id":"y"}"#), None);
        assert_eq!(handler.dropped_messages(), 2);
    }

    #[test]
    fn test_malformed_text_gets_error_with_recovered_id() {
        let mut handler = rhai_handler();
        let response = handler.handle_text(r#"{"type":"stats"}"#).unwrap();
        assert_eq!(response.id(), &RequestId::unknown());

        let response = handler.handle_text(r#"{"type":"evaluate","id":7}"#).unwrap();
        assert_eq!(response.id(), &RequestId::from(7u64));
        assert!(matches!(response, WorkerResponse::Error { .. }));
    }

    #[test]
    fn test_panicking_evaluator_becomes_error_response() {
        let evaluator = |formula: &str, _: &ExcelData| -> Result<CellValue> {
            if formula == "=boom" {
                panic!("evaluator exploded");
            }
            Ok(CellValue::Number(1.0))
        };
        let mut handler = RequestHandler::new(evaluator, CacheConfig::default());

        let response = handler
            .handle_guarded(WorkerRequest::evaluate("p", "=boom", data()))
            .unwrap();
        assert_eq!(
            response,
            WorkerResponse::Error {
                id: "p".into(),
                error: "internal error: evaluator exploded".to_string(),
            }
        );

        let response = handler
            .handle_guarded(WorkerRequest::evaluate("q", "=fine", data()))
            .unwrap();
        assert!(matches!(response, WorkerResponse::Success { cached: false, .. }));
    }

    #[test]
    fn test_evaluator_error_message_is_forwarded() {
        let evaluator = |_: &str, _: &ExcelData| -> Result<CellValue> {
            Err(SheetcacheError::CircularDependency("A1 -> A1".to_string()))
        };
        let mut handler = RequestHandler::new(evaluator, CacheConfig::default());
        let response = handler.handle(WorkerRequest::evaluate("e", "=A1", data()));
        assert_eq!(
            response,
            Some(WorkerResponse::Error {
                id: "e".into(),
                error: "Circular dependency detected: A1 -> A1".to_string(),
            })
        );
    }
}
