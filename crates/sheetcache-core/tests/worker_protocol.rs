//! Integration tests for the formula cache and the worker protocol.

use std::collections::HashSet;
use std::time::Duration;

use serde_json::json;
use sheetcache_core::cache::{CacheConfig, FormulaCache, ManualClock};
use sheetcache_core::error::{Result, SheetcacheError};
use sheetcache_core::evaluator::{FormulaEvaluator, RhaiEvaluator};
use sheetcache_core::protocol::{RequestId, WorkerRequest, WorkerResponse, encode_response};
use sheetcache_core::snapshot::{CellValue, ExcelData};
use sheetcache_core::worker::{PendingRequests, RequestHandler, Worker};

fn sample() -> ExcelData {
    serde_json::from_value(json!({"headers": ["A"], "rows": [[1], [2]]})).unwrap()
}

fn manual_cache(max_size: usize, ttl_ms: u64) -> (FormulaCache<ManualClock>, ManualClock) {
    let clock = ManualClock::new(0);
    (
        FormulaCache::with_clock(CacheConfig::new(max_size, ttl_ms), clock.clone()),
        clock,
    )
}

#[test]
fn test_cache_hit_returns_stored_value() {
    let (mut cache, clock) = manual_cache(8, 1_000);
    let data = sample();
    let values = [
        CellValue::Number(3.0),
        CellValue::from("text"),
        CellValue::Null,
    ];
    for (i, value) in values.iter().enumerate() {
        let formula = format!("=F{}", i + 1);
        cache.set(&formula, &data, value.clone());
        clock.advance(10);
        assert_eq!(cache.get(&formula, &data).as_ref(), Some(value));
    }
}

#[test]
fn test_invalidate_misses_before_ttl() {
    let (mut cache, _) = manual_cache(8, 1_000_000);
    let data = sample();
    cache.set("=SUM(A1:A2)", &data, CellValue::Number(3.0));
    cache.invalidate();
    assert_eq!(cache.get("=SUM(A1:A2)", &data), None);
}

#[test]
fn test_ttl_expiry() {
    let (mut cache, clock) = manual_cache(8, 250);
    let data = sample();
    cache.set("=A1", &data, CellValue::Number(1.0));
    clock.advance(251);
    assert_eq!(cache.get("=A1", &data), None);
}

#[test]
fn test_capacity_bound() {
    let data = sample();
    for max_size in [1, 3, 10] {
        let (mut cache, _) = manual_cache(max_size, 60_000);
        for k in 1..=5 {
            for i in 0..max_size + k {
                cache.set(&format!("={}+{}", k, i), &data, CellValue::Number(i as f64));
                assert!(cache.stats().size <= max_size);
            }
        }
    }
}

#[test]
fn test_hit_rate_accounting() {
    let data = sample();
    for (misses, hits) in [(1usize, 0usize), (4, 4), (1, 3), (3, 7)] {
        let (mut cache, _) = manual_cache(100, 60_000);
        for i in 0..misses {
            let formula = format!("={}", i);
            assert_eq!(cache.get(&formula, &data), None);
            cache.set(&formula, &data, CellValue::Number(i as f64));
        }
        for i in 0..hits {
            assert!(cache.get(&format!("={}", i % misses), &data).is_some());
        }
        let expected = hits as f64 / (misses + hits) as f64;
        assert!((cache.stats().hit_rate - expected).abs() < 1e-12);
    }
}

#[test]
fn test_evaluator_failure_is_isolated() {
    let evaluator = |formula: &str, snapshot: &ExcelData| -> Result<CellValue> {
        match formula {
            "=bad" => Err(SheetcacheError::UnsupportedResult("bad".to_string())),
            "=panic" => panic!("evaluator panicked"),
            other => RhaiEvaluator::new().evaluate(other, snapshot),
        }
    };
    let handler = RequestHandler::new(evaluator, CacheConfig::default());
    let worker = Worker::spawn(handler).unwrap();

    worker.post(WorkerRequest::evaluate("f1", "=bad", sample())).unwrap();
    worker.post(WorkerRequest::evaluate("p1", "=panic", sample())).unwrap();
    worker
        .post(WorkerRequest::evaluate("f2", "=SUM(A1:A2)", sample()))
        .unwrap();

    let responses = worker.shutdown();
    assert!(matches!(&responses[0], WorkerResponse::Error { id, .. } if id == &RequestId::from("f1")));
    assert!(matches!(&responses[1], WorkerResponse::Error { id, .. } if id == &RequestId::from("p1")));
    assert_eq!(
        responses[2],
        WorkerResponse::Success {
            id: "f2".into(),
            result: CellValue::Number(3.0),
            cached: false,
        }
    );
}

#[test]
fn test_responses_correlate_with_requests() {
    let handler = RequestHandler::new(RhaiEvaluator::new(), CacheConfig::default());
    let worker = Worker::spawn(handler).unwrap();
    let mut pending = PendingRequests::new();

    let mut sent = HashSet::new();
    for i in 0..20 {
        let id = pending.next_id();
        sent.insert(id.clone());
        let request = match i % 4 {
            0 => WorkerRequest::stats(id),
            1 => WorkerRequest::evaluate(id, "=A1 + A2", sample()),
            2 => WorkerRequest::evaluate(id, "=NOT_A_FUNCTION()", sample()),
            _ => WorkerRequest::evaluate(id, &format!("={} * 2", i), sample()),
        };
        worker.post(request).unwrap();
        if i % 5 == 0 {
            worker.post(WorkerRequest::Invalidate).unwrap();
        }
    }
    worker.post_raw(r#"{"type":"ping","id":"ignored"}"#).unwrap();

    let mut seen = HashSet::new();
    while !pending.is_empty() {
        let response = worker
            .recv_timeout(Duration::from_secs(10))
            .unwrap()
            .expect("worker stopped replying");
        let id = pending.resolve(&response).unwrap();
        assert!(sent.contains(&id));
        assert!(seen.insert(id));
    }
    assert_eq!(seen, sent);
    assert!(worker.shutdown().is_empty());
}

#[test]
fn test_end_to_end_sum_scenario() {
    let handler = RequestHandler::new(RhaiEvaluator::new(), CacheConfig::default());
    let worker = Worker::spawn(handler).unwrap();
    let request = |id: &str| WorkerRequest::evaluate(id, "=SUM(A1:A2)", sample());

    worker.post(request("1")).unwrap();
    worker.post(request("2")).unwrap();
    worker.post(WorkerRequest::Invalidate).unwrap();
    worker.post(request("3")).unwrap();

    let lines: Vec<serde_json::Value> = worker
        .shutdown()
        .iter()
        .map(|response| serde_json::from_str(&encode_response(response).unwrap()).unwrap())
        .collect();
    assert_eq!(
        lines,
        vec![
            json!({"type": "success", "id": "1", "result": 3, "cached": false}),
            json!({"type": "success", "id": "2", "result": 3, "cached": true}),
            json!({"type": "success", "id": "3", "result": 3, "cached": false}),
        ]
    );
}

#[test]
fn test_stats_after_traffic() {
    let handler = RequestHandler::new(RhaiEvaluator::new(), CacheConfig::new(5, 60_000));
    let worker = Worker::spawn(handler).unwrap();
    worker.post(WorkerRequest::evaluate(1u64, "=A1", sample())).unwrap();
    worker.post(WorkerRequest::evaluate(2u64, "=A1", sample())).unwrap();
    worker.post(WorkerRequest::stats(3u64)).unwrap();

    let responses = worker.shutdown();
    let WorkerResponse::Stats { id, stats } = &responses[2] else {
        panic!("expected stats, got {:?}", responses[2]);
    };
    assert_eq!(id, &RequestId::from(3u64));
    assert_eq!(
        serde_json::to_value(stats).unwrap(),
        json!({"size": 1, "maxSize": 5, "hitRate": 0.5, "dataVersion": 0})
    );
}

#[test]
fn test_worker_survives_long_reference_chain() {
    let mut data = ExcelData::new(vec!["A".into()], vec![vec![CellValue::Number(1.0)]])
        .with_formula("B1", "=A1");
    for row in 2..=1000 {
        data = data.with_formula(&format!("B{}", row), &format!("=B{} + 1", row - 1));
    }

    let handler = RequestHandler::new(RhaiEvaluator::new(), CacheConfig::default());
    let worker = Worker::spawn(handler).unwrap();
    worker.post(WorkerRequest::evaluate("chain", "=B1000", data)).unwrap();
    worker.post(WorkerRequest::stats("after")).unwrap();

    let responses = worker.shutdown();
    assert_eq!(responses.len(), 2);
    assert_eq!(
        responses[0],
        WorkerResponse::Success {
            id: RequestId::from("chain"),
            result: CellValue::Number(1000.0),
            cached: false,
        }
    );
    assert!(matches!(&responses[1], WorkerResponse::Stats { stats, .. } if stats.size == 1));
}

#[test]
fn test_untyped_messages_get_no_reply() {
    let handler = RequestHandler::new(RhaiEvaluator::new(), CacheConfig::default());
    let worker = Worker::spawn(handler).unwrap();
    worker.post_raw(r#"{"id":"x","formula":"=1"}"#).unwrap();
    worker.post_raw(r#"{"type":7,"id":"y"}"#).unwrap();
    worker.post_raw(r#"[1, 2]"#).unwrap();
    worker.post(WorkerRequest::stats("s")).unwrap();

    let responses = worker.shutdown();
    assert_eq!(responses.len(), 1);
    assert_eq!(responses[0].id(), &RequestId::from("s"));
}

#[test]
fn test_failed_formula_cell_is_an_error_and_not_cached() {
    let evaluator = RhaiEvaluator::with_functions("fn TRIPLE(x) { x * 3.0 }").unwrap();
    let mut handler = RequestHandler::new(evaluator, CacheConfig::default());
    let good = sample().with_formula("B1", "=TRIPLE(A2)");
    let bad = sample().with_formula("B1", "=MISSING(A2)");

    let response = handler.handle(WorkerRequest::evaluate("good", "=SUM(B1:B1) + 1", good));
    assert_eq!(
        response,
        Some(WorkerResponse::Success {
            id: RequestId::from("good"),
            result: CellValue::Number(7.0),
            cached: false,
        })
    );

    for id in ["bad-1", "bad-2"] {
        let response = handler.handle(WorkerRequest::evaluate(id, "=SUM(B1:B1) + 1", bad.clone()));
        assert!(
            matches!(&response, Some(WorkerResponse::Error { id: got, .. }) if got == &RequestId::from(id)),
            "{:?}",
            response
        );
    }
    assert_eq!(handler.cache().len(), 1);
}
