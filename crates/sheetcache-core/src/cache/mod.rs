//! Bounded, TTL-aware, versioned memo of formula results.
//!
//! Entries are keyed by the formula text, the cache's current data version and
//! the snapshot fingerprint. An entry is returned only while its version
//! matches the cache's and it is younger than the configured TTL.
//!
//! - Capacity: when full, the entry inserted longest ago is evicted before the
//!   new one goes in (overwriting a key counts as a fresh insertion).
//! - TTL: expired or stale entries are removed when a lookup finds them;
//!   [`FormulaCache::purge_expired`] sweeps the rest on demand.
//! - Versioning: [`FormulaCache::invalidate`] is the only way to bump the data
//!   version. Back-to-back invalidations with no access in between bump it once.

mod clock;
mod config;

pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{CacheConfig, DEFAULT_MAX_SIZE, DEFAULT_TTL_MS};

use std::collections::{BTreeMap, HashMap};

use serde::{Deserialize, Serialize};

use crate::snapshot::{CellValue, ExcelData};

/// A formula over one snapshot, fingerprinted once so a lookup and the
/// store that follows a miss share the work.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct FormulaKey {
    formula: String,
    fingerprint: u64,
}

impl FormulaKey {
    pub fn new(formula: &str, snapshot: &ExcelData) -> Self {
        FormulaKey {
            formula: formula.to_string(),
            fingerprint: snapshot.fingerprint(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
struct CacheKey {
    formula: String,
    data_version: u64,
    fingerprint: u64,
}

#[derive(Clone, Debug)]
struct CacheEntry {
    value: CellValue,
    inserted_at: i64,
    data_version: u64,
    seq: u64,
}

/// Snapshot of cache counters, as sent in a `stats` response.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheStats {
    pub size: usize,
    pub max_size: usize,
    pub hit_rate: f64,
    pub data_version: u64,
    #[serde(skip)]
    pub hits: u64,
    #[serde(skip)]
    pub lookups: u64,
}

pub struct FormulaCache<C = SystemClock> {
    config: CacheConfig,
    clock: C,
    entries: HashMap<CacheKey, CacheEntry>,
    /// Insertion sequence -> key; the first entry is the eviction victim.
    order: BTreeMap<u64, CacheKey>,
    next_seq: u64,
    data_version: u64,
    /// Set by any get/set since the last version bump.
    touched: bool,
    hits: u64,
    lookups: u64,
}

impl FormulaCache<SystemClock> {
    pub fn new(config: CacheConfig) -> Self {
        Self::with_clock(config, SystemClock)
    }
}

impl Default for FormulaCache<SystemClock> {
    fn default() -> Self {
        Self::new(CacheConfig::default())
    }
}

impl<C: Clock> FormulaCache<C> {
    /// Create a cache reading time from `clock`. A zero capacity is raised to
    /// one and a TTL past the clock's range is capped to it.
    pub fn with_clock(config: CacheConfig, clock: C) -> Self {
        let config = CacheConfig {
            max_size: config.max_size.max(1),
            ttl_ms: config.ttl_ms.min(i64::MAX as u64),
        };
        FormulaCache {
            config,
            clock,
            entries: HashMap::new(),
            order: BTreeMap::new(),
            next_seq: 0,
            data_version: 0,
            touched: false,
            hits: 0,
            lookups: 0,
        }
    }

    fn key(&self, key: &FormulaKey) -> CacheKey {
        CacheKey {
            formula: key.formula.clone(),
            data_version: self.data_version,
            fingerprint: key.fingerprint,
        }
    }

    fn is_live(&self, entry: &CacheEntry, now: i64) -> bool {
        let age = now.saturating_sub(entry.inserted_at);
        entry.data_version == self.data_version && age < self.config.ttl_ms as i64
    }

    fn remove(&mut self, key: &CacheKey) -> Option<CacheEntry> {
        let entry = self.entries.remove(key)?;
        self.order.remove(&entry.seq);
        Some(entry)
    }

    /// Memoized value for `formula` over `snapshot` at the current version, if live.
    pub fn get(&mut self, formula: &str, snapshot: &ExcelData) -> Option<CellValue> {
        self.lookup(&FormulaKey::new(formula, snapshot))
    }

    /// Insert or overwrite the entry for `formula` over `snapshot`.
    pub fn set(&mut self, formula: &str, snapshot: &ExcelData, value: CellValue) {
        self.store(&FormulaKey::new(formula, snapshot), value);
    }

    /// [`get`](Self::get) with a precomputed key.
    pub fn lookup(&mut self, key: &FormulaKey) -> Option<CellValue> {
        self.lookups += 1;
        self.touched = true;

        let key = self.key(key);
        let now = self.clock.now_ms();
        let live = match self.entries.get(&key) {
            Some(entry) => self.is_live(entry, now),
            None => return None,
        };

        if !live {
            self.remove(&key);
            return None;
        }

        self.hits += 1;
        self.entries.get(&key).map(|entry| entry.value.clone())
    }

    /// [`set`](Self::set) with a precomputed key.
    pub fn store(&mut self, key: &FormulaKey, value: CellValue) {
        self.touched = true;

        let key = self.key(key);
        if self.remove(&key).is_none() && self.entries.len() >= self.config.max_size {
            if let Some((_, oldest)) = self.order.pop_first() {
                self.entries.remove(&oldest);
                log::trace!("evicted {:?} to make room", oldest.formula);
            }
        }

        let seq = self.next_seq;
        self.next_seq += 1;
        self.order.insert(seq, key.clone());
        self.entries.insert(
            key,
            CacheEntry {
                value,
                inserted_at: self.clock.now_ms(),
                data_version: self.data_version,
                seq,
            },
        );
    }

    /// Make every existing entry unreachable.
    pub fn invalidate(&mut self) {
        if self.touched {
            self.data_version += 1;
            self.touched = false;
        }
        self.entries.clear();
        self.order.clear();
    }

    /// Drop every expired entry now. Returns how many were removed.
    pub fn purge_expired(&mut self) -> usize {
        let now = self.clock.now_ms();
        let dead: Vec<CacheKey> = self
            .entries
            .iter()
            .filter(|(_, entry)| !self.is_live(entry, now))
            .map(|(key, _)| key.clone())
            .collect();
        for key in &dead {
            self.remove(key);
        }
        dead.len()
    }

    pub fn stats(&self) -> CacheStats {
        let hit_rate = if self.lookups == 0 {
            0.0
        } else {
            self.hits as f64 / self.lookups as f64
        };
        CacheStats {
            size: self.entries.len(),
            max_size: self.config.max_size,
            hit_rate,
            data_version: self.data_version,
            hits: self.hits,
            lookups: self.lookups,
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn data_version(&self) -> u64 {
        self.data_version
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }
}
