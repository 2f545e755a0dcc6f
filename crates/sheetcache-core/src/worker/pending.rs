use std::collections::HashMap;

use crate::cache::{Clock, SystemClock};
use crate::error::{Result, SheetcacheError};
use crate::protocol::{RequestId, WorkerResponse};

/// Caller-side bookkeeping of requests awaiting a reply.
///
/// The worker answers in arrival order, but callers should still match
/// replies by id. Requests that never get a reply (a worker that crashed
/// or hung) are reaped with [`expire`](Self::expire).
pub struct PendingRequests<C = SystemClock> {
    clock: C,
    next: u64,
    in_flight: HashMap<RequestId, i64>,
}

impl PendingRequests<SystemClock> {
    pub fn new() -> Self {
        Self::with_clock(SystemClock)
    }
}

impl Default for PendingRequests<SystemClock> {
    fn default() -> Self {
        Self::new()
    }
}

impl<C: Clock> PendingRequests<C> {
    pub fn with_clock(clock: C) -> Self {
        PendingRequests {
            clock,
            next: 0,
            in_flight: HashMap::new(),
        }
    }

    /// Allocate and register a fresh id of the form `req-N`.
    pub fn next_id(&mut self) -> RequestId {
        loop {
            self.next += 1;
            let id = RequestId::Text(format!("req-{}", self.next));
            if !self.in_flight.contains_key(&id) {
                self.in_flight.insert(id.clone(), self.clock.now_ms());
                return id;
            }
        }
    }

    /// Track a caller-chosen id. Ids must be unique among in-flight requests.
    pub fn register(&mut self, id: RequestId) -> Result<()> {
        if self.in_flight.contains_key(&id) {
            return Err(SheetcacheError::DuplicateRequestId(id));
        }
        self.in_flight.insert(id, self.clock.now_ms());
        Ok(())
    }

    /// Match a response to its request and stop tracking it.
    pub fn resolve(&mut self, response: &WorkerResponse) -> Result<RequestId> {
        let id = response.id();
        match self.in_flight.remove_entry(id) {
            Some((id, _)) => Ok(id),
            None => Err(SheetcacheError::UnknownRequestId(id.clone())),
        }
    }

    /// Forget requests older than `timeout_ms`, returning their ids oldest first.
    pub fn expire(&mut self, timeout_ms: i64) -> Vec<RequestId> {
        let now = self.clock.now_ms();
        let mut expired: Vec<(RequestId, i64)> = self
            .in_flight
            .iter()
            .filter(|(_, sent)| now.saturating_sub(**sent) >= timeout_ms)
            .map(|(id, sent)| (id.clone(), *sent))
            .collect();
        expired.sort_by_key(|(_, sent)| *sent);
        for (id, _) in &expired {
            self.in_flight.remove(id);
        }
        if !expired.is_empty() {
            log::warn!("{} request(s) timed out without a reply", expired.len());
        }
        expired.into_iter().map(|(id, _)| id).collect()
    }

    pub fn contains(&self, id: &RequestId) -> bool {
        self.in_flight.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.in_flight.len()
    }

    pub fn is_empty(&self) -> bool {
        self.in_flight.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::ManualClock;

    fn error_for(id: &RequestId) -> WorkerResponse {
        WorkerResponse::Error {
            id: id.clone(),
            error: "boom".to_string(),
        }
    }

    #[test]
    fn test_next_id_is_unique() {
        let mut pending = PendingRequests::with_clock(ManualClock::new(0));
        pending.register("req-2".into()).unwrap();
        let a = pending.next_id();
        let b = pending.next_id();
        assert_eq!(a, RequestId::from("req-1"));
        assert_eq!(b, RequestId::from("req-3"));
        assert_eq!(pending.len(), 3);
    }

    #[test]
    fn test_duplicate_register_is_rejected() {
        let mut pending = PendingRequests::with_clock(ManualClock::new(0));
        pending.register(7u64.into()).unwrap();
        assert!(matches!(
            pending.register(7u64.into()),
            Err(SheetcacheError::DuplicateRequestId(_))
        ));
    }

    #[test]
    fn test_resolve_out_of_order() {
        let mut pending = PendingRequests::with_clock(ManualClock::new(0));
        let first = pending.next_id();
        let second = pending.next_id();

        assert_eq!(pending.resolve(&error_for(&second)).unwrap(), second);
        assert_eq!(pending.resolve(&error_for(&first)).unwrap(), first);
        assert!(pending.is_empty());
        assert!(matches!(
            pending.resolve(&error_for(&first)),
            Err(SheetcacheError::UnknownRequestId(_))
        ));
    }

    #[test]
    fn test_expire_reaps_old_requests() {
        let clock = ManualClock::new(0);
        let mut pending = PendingRequests::with_clock(clock.clone());
        let old = pending.next_id();
        clock.advance(100);
        let second = pending.next_id();
        clock.advance(100);
        let fresh = pending.next_id();

        assert_eq!(pending.expire(100), vec![old, second]);
        assert!(pending.contains(&fresh));
        assert_eq!(pending.len(), 1);
    }
}
