//! Request-Log Ring (§4.I): a fixed-capacity, thread-safe circular buffer of
//! HTTP request entries with filtered, paginated, newest-first queries.

use std::collections::VecDeque;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

/// Server-side cap on `limit`, applied regardless of what the caller asks
/// for (§4.I: "limit capped at 1,000, default 100").
pub const MAX_LIMIT: u32 = 1_000;
pub const DEFAULT_LIMIT: u32 = 100;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RequestLogEntry {
    pub id: u64,
    pub method: String,
    pub path: String,
    pub status: u16,
    pub duration_ms: u64,
    pub actor_id: Option<String>,
    pub ts: DateTime<Utc>,
}

#[derive(Debug, Clone, Default)]
pub struct RequestLogQuery {
    pub method: Option<String>,
    pub path: Option<String>,
    /// Excludes entries whose `path` starts with this prefix (e.g. hide
    /// `/metrics` polling from an admin view).
    pub exclude_prefix: Option<String>,
    pub status: Option<u16>,
    pub min_status: Option<u16>,
    pub max_status: Option<u16>,
    pub actor_id: Option<String>,
    pub since: Option<DateTime<Utc>>,
    pub until: Option<DateTime<Utc>>,
    pub limit: Option<u32>,
    pub offset: Option<u32>,
}

impl RequestLogQuery {
    fn effective_limit(&self) -> u32 {
        self.limit.unwrap_or(DEFAULT_LIMIT).min(MAX_LIMIT)
    }

    fn matches(&self, entry: &RequestLogEntry) -> bool {
        if let Some(method) = &self.method {
            if !entry.method.eq_ignore_ascii_case(method) {
                return false;
            }
        }
        if let Some(path) = &self.path {
            if &entry.path != path {
                return false;
            }
        }
        if let Some(prefix) = &self.exclude_prefix {
            if entry.path.starts_with(prefix.as_str()) {
                return false;
            }
        }
        if let Some(status) = self.status {
            if entry.status != status {
                return false;
            }
        }
        if let Some(min) = self.min_status {
            if entry.status < min {
                return false;
            }
        }
        if let Some(max) = self.max_status {
            if entry.status > max {
                return false;
            }
        }
        if let Some(actor_id) = &self.actor_id {
            if entry.actor_id.as_deref() != Some(actor_id.as_str()) {
                return false;
            }
        }
        if let Some(since) = self.since {
            if entry.ts < since {
                return false;
            }
        }
        if let Some(until) = self.until {
            if entry.ts > until {
                return false;
            }
        }
        true
    }
}

/// Fixed-capacity circular buffer of HTTP entries, newest at the back,
/// guarded by a single mutex (§4.I: "thread-safe via a single mutex").
pub struct RequestLogRing {
    capacity: usize,
    entries: Mutex<VecDeque<RequestLogEntry>>,
    next_id: Mutex<u64>,
}

impl RequestLogRing {
    pub fn new(capacity: usize) -> Self {
        Self { capacity: capacity.max(1), entries: Mutex::new(VecDeque::new()), next_id: Mutex::new(1) }
    }

    /// Appends a new entry, assigning it the next insertion-order id and
    /// evicting the oldest entry if the ring is at capacity.
    pub fn record(&self, method: String, path: String, status: u16, duration_ms: u64, actor_id: Option<String>) -> u64 {
        let id = {
            let mut next_id = self.next_id.lock();
            let id = *next_id;
            *next_id += 1;
            id
        };
        let entry = RequestLogEntry { id, method, path, status, duration_ms, actor_id, ts: alyx_base::now() };
        let mut entries = self.entries.lock();
        if entries.len() >= self.capacity {
            entries.pop_front();
        }
        entries.push_back(entry);
        id
    }

    /// Filters and paginates, newest-first (§4.I).
    pub fn query(&self, query: &RequestLogQuery) -> Vec<RequestLogEntry> {
        let entries = self.entries.lock();
        let offset = query.offset.unwrap_or(0) as usize;
        let limit = query.effective_limit() as usize;
        entries.iter().rev().filter(|entry| query.matches(entry)).skip(offset).take(limit).cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
