//! Bounded time-series storage.
//!
//! One writer (the sampler) and any number of readers share the store:
//! - per-key ring buffers of (timestamp, value) pairs with FIFO eviction,
//! - a bounded, append-only log-event buffer,
//! - a constant-time "latest" view for live display consumers.
//!
//! Critical sections are short and bounded. The writer never waits on
//! readers indefinitely: shared-structure writes use a bounded lock
//! acquisition and fall back to skip-and-log rather than block.

use crate::error::HostwatchError;
use crate::models::{LogEvent, ProcessSnapshot, Sample, SourceStatus, StoreSnapshot};
use crate::observability::HostwatchMetrics;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use dashmap::DashMap;
use std::collections::{BTreeMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{RwLock, RwLockWriteGuard};
use std::time::Duration;
use tracing::{error, warn};

/// Attempts made to acquire a write lock before skipping the write
const WRITE_LOCK_ATTEMPTS: usize = 1024;

/// Ring buffer for one metric key
#[derive(Debug, Default)]
struct SeriesBuffer {
    points: VecDeque<(DateTime<Utc>, f64)>,
}

impl SeriesBuffer {
    /// Append a point, evicting from the front when at capacity.
    /// Returns the number of evicted points, or None if the point was
    /// dropped to preserve timestamp ordering.
    fn push(&mut self, timestamp: DateTime<Utc>, value: f64, capacity: usize) -> Option<usize> {
        if let Some((tail, _)) = self.points.back() {
            if timestamp < *tail {
                return None;
            }
        }

        let mut evicted = 0;
        while self.points.len() >= capacity {
            self.points.pop_front();
            evicted += 1;
        }
        self.points.push_back((timestamp, value));
        Some(evicted)
    }
}

/// Bounded, concurrency-safe storage for samples and log events
pub struct TimeSeriesStore {
    series: DashMap<String, SeriesBuffer>,
    /// Per-key capacity, recomputed on reconfiguration
    capacity: AtomicUsize,
    logs: RwLock<VecDeque<LogEvent>>,
    max_log_events: AtomicUsize,
    /// Log entries older than this are evicted on append
    log_retention: RwLock<Duration>,
    latest: RwLock<StoreSnapshot>,
    metrics: HostwatchMetrics,
}

impl TimeSeriesStore {
    /// Create a store sized for `retention / sample_interval` points per key.
    pub fn new(retention: Duration, sample_interval: Duration, max_log_events: usize) -> Self {
        let capacity = derive_capacity(retention, sample_interval);
        Self {
            series: DashMap::new(),
            capacity: AtomicUsize::new(capacity),
            logs: RwLock::new(VecDeque::new()),
            max_log_events: AtomicUsize::new(max_log_events),
            log_retention: RwLock::new(retention),
            latest: RwLock::new(StoreSnapshot::default()),
            metrics: HostwatchMetrics::new(),
        }
    }

    /// Recompute the per-key capacity after a configuration change.
    ///
    /// Buffers are trimmed lazily on their next append; ordering within a
    /// key is never disturbed mid-run.
    pub fn reconfigure(&self, retention: Duration, sample_interval: Duration) {
        let capacity = derive_capacity(retention, sample_interval);
        self.capacity.store(capacity, Ordering::Release);
        if let Some(mut guard) = bounded_write(&self.log_retention) {
            *guard = retention;
        }
    }

    /// Append one sample to its key's ring buffer. O(1) amortized.
    ///
    /// A zero capacity is an internal invariant violation: the key's buffer
    /// is reset and the fault logged, never propagated to readers.
    pub fn append(&self, sample: &Sample) {
        let capacity = self.capacity.load(Ordering::Acquire);
        let mut buffer = self.series.entry(sample.key.clone()).or_default();

        if capacity == 0 {
            let fault = HostwatchError::StoreCapacityInconsistent {
                key: sample.key.clone(),
            };
            error!(key = %sample.key, "{fault}; resetting buffer");
            buffer.points.clear();
            return;
        }

        match buffer.push(sample.timestamp, sample.value, capacity) {
            Some(evicted) => {
                if evicted > 0 {
                    self.metrics.inc_samples_evicted(evicted as u64);
                }
                self.metrics.inc_samples_appended();
            }
            None => {
                warn!(
                    key = %sample.key,
                    timestamp = %sample.timestamp,
                    "dropping out-of-order sample"
                );
            }
        }
    }

    /// Append a batch of samples (one write batch per source per tick)
    pub fn append_samples(&self, samples: &[Sample]) {
        for sample in samples {
            self.append(sample);
        }
    }

    /// Append log events, evicting by count and age.
    ///
    /// Uses bounded lock acquisition: under pathological reader contention
    /// the batch is skipped and the degradation logged instead of blocking
    /// the sampling tick.
    pub fn append_events(&self, events: Vec<LogEvent>) {
        if events.is_empty() {
            return;
        }

        let appended = events.len();
        let max = self.max_log_events.load(Ordering::Acquire);
        let retention = self
            .log_retention
            .read()
            .map(|d| *d)
            .unwrap_or(Duration::from_secs(3600));

        let Some(mut logs) = bounded_write(&self.logs) else {
            warn!(dropped = appended, "log buffer contended; dropping batch");
            return;
        };

        for event in events {
            logs.push_back(event);
        }
        while logs.len() > max {
            logs.pop_front();
        }
        if let Some(newest) = logs.back().map(|e| e.timestamp) {
            let cutoff = newest - chrono_duration(retention);
            while logs.front().is_some_and(|e| e.timestamp < cutoff) {
                logs.pop_front();
            }
        }
        drop(logs);

        self.metrics.inc_log_events(appended as u64);
    }

    /// Update the live view: latest host scalars and, when this tick
    /// captured one, the latest process table. Passing `None` keeps the
    /// previous table so a degraded tick leaves a stale-but-visible view.
    pub fn update_live(
        &self,
        taken_at: DateTime<Utc>,
        processes: Option<Vec<ProcessSnapshot>>,
        scalars: BTreeMap<String, f64>,
    ) {
        let Some(mut latest) = bounded_write(&self.latest) else {
            warn!("live view contended; skipping update");
            return;
        };
        latest.taken_at = Some(taken_at);
        if let Some(processes) = processes {
            latest.processes = processes;
        }
        for (key, value) in scalars {
            latest.scalars.insert(key, value);
        }
    }

    /// Record one source's collection outcome for this tick (the
    /// degraded/stale indicator consumed by the live display).
    pub fn record_source_status(&self, status: SourceStatus) {
        let Some(mut latest) = bounded_write(&self.latest) else {
            warn!(source = %status.source, "live view contended; skipping status");
            return;
        };
        match latest.sources.iter_mut().find(|s| s.source == status.source) {
            Some(existing) => *existing = status,
            None => latest.sources.push(status),
        }
    }

    /// Constant-time live view, independent of series history size
    pub fn snapshot(&self) -> StoreSnapshot {
        self.latest
            .read()
            .map(|guard| guard.clone())
            .unwrap_or_default()
    }

    /// Samples for `key` with `from <= timestamp <= to`, in time order.
    ///
    /// Returns a defensive copy; an unknown key yields an empty vec (no
    /// data yet is not a fault).
    pub fn range_query(&self, key: &str, from: DateTime<Utc>, to: DateTime<Utc>) -> Vec<Sample> {
        let Some(buffer) = self.series.get(key) else {
            return Vec::new();
        };
        buffer
            .points
            .iter()
            .filter(|(ts, _)| *ts >= from && *ts <= to)
            .map(|(ts, value)| Sample::new(key, *ts, *value))
            .collect()
    }

    /// The most recent `limit` log events, oldest first
    pub fn recent_logs(&self, limit: usize) -> Vec<LogEvent> {
        let Ok(logs) = self.logs.read() else {
            return Vec::new();
        };
        let skip = logs.len().saturating_sub(limit);
        logs.iter().skip(skip).cloned().collect()
    }

    /// Log events with `from <= timestamp <= to`, in time order
    pub fn logs_in_range(&self, from: DateTime<Utc>, to: DateTime<Utc>) -> Vec<LogEvent> {
        let Ok(logs) = self.logs.read() else {
            return Vec::new();
        };
        logs.iter()
            .filter(|e| e.timestamp >= from && e.timestamp <= to)
            .cloned()
            .collect()
    }

    /// All metric keys currently holding data
    pub fn keys(&self) -> Vec<String> {
        self.series.iter().map(|entry| entry.key().clone()).collect()
    }

    /// Number of retained samples for one key
    pub fn series_len(&self, key: &str) -> usize {
        self.series.get(key).map_or(0, |b| b.points.len())
    }

    /// Total retained samples across all keys
    pub fn sample_count(&self) -> usize {
        self.series.iter().map(|entry| entry.points.len()).sum()
    }

    /// Number of buffered log events
    pub fn log_count(&self) -> usize {
        self.logs.read().map_or(0, |logs| logs.len())
    }
}

fn derive_capacity(retention: Duration, sample_interval: Duration) -> usize {
    (retention.as_millis() / sample_interval.as_millis().max(1)) as usize
}

fn chrono_duration(d: Duration) -> ChronoDuration {
    ChronoDuration::from_std(d).unwrap_or_else(|_| ChronoDuration::seconds(i64::MAX / 1_000))
}

/// Bounded write-lock acquisition: spin a fixed number of attempts, then
/// give up so the caller can skip-and-log instead of deadlocking.
fn bounded_write<T>(lock: &RwLock<T>) -> Option<RwLockWriteGuard<'_, T>> {
    for _ in 0..WRITE_LOCK_ATTEMPTS {
        match lock.try_write() {
            Ok(guard) => return Some(guard),
            Err(std::sync::TryLockError::WouldBlock) => std::hint::spin_loop(),
            Err(std::sync::TryLockError::Poisoned(poisoned)) => {
                return Some(poisoned.into_inner());
            }
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{LogSeverity, SourceState};

    fn ts(secs: i64) -> DateTime<Utc> {
        DateTime::from_timestamp(1_700_000_000 + secs, 0).unwrap()
    }

    fn store_with_capacity(capacity: usize) -> TimeSeriesStore {
        // retention / interval == capacity
        TimeSeriesStore::new(
            Duration::from_secs(capacity as u64),
            Duration::from_secs(1),
            100,
        )
    }

    fn event(secs: i64, severity: LogSeverity) -> LogEvent {
        LogEvent {
            timestamp: ts(secs),
            severity,
            source: "test.service".to_string(),
            message: format!("event at +{secs}s"),
        }
    }

    #[test]
    fn test_eviction_bound_keeps_most_recent() {
        let store = store_with_capacity(5);

        for i in 0..12 {
            store.append(&Sample::new("cpu.total", ts(i), i as f64));
        }

        let samples = store.range_query("cpu.total", ts(0), ts(100));
        assert_eq!(samples.len(), 5, "exactly capacity samples retained");
        let values: Vec<f64> = samples.iter().map(|s| s.value).collect();
        assert_eq!(values, vec![7.0, 8.0, 9.0, 10.0, 11.0]);
        // timestamps stay ordered
        for pair in samples.windows(2) {
            assert!(pair[0].timestamp <= pair[1].timestamp);
        }
    }

    #[test]
    fn test_unknown_key_returns_empty_not_error() {
        let store = store_with_capacity(10);
        let samples = store.range_query("never.seen", ts(0), ts(100));
        assert!(samples.is_empty());
        assert_eq!(store.series_len("never.seen"), 0);
    }

    #[test]
    fn test_range_query_bounds_inclusive() {
        let store = store_with_capacity(100);
        for i in 0..10 {
            store.append(&Sample::new("mem.percent", ts(i), 50.0));
        }

        let samples = store.range_query("mem.percent", ts(3), ts(6));
        assert_eq!(samples.len(), 4);
        assert_eq!(samples.first().unwrap().timestamp, ts(3));
        assert_eq!(samples.last().unwrap().timestamp, ts(6));
    }

    #[test]
    fn test_out_of_order_sample_dropped() {
        let store = store_with_capacity(100);
        store.append(&Sample::new("cpu.total", ts(10), 1.0));
        store.append(&Sample::new("cpu.total", ts(5), 2.0));
        store.append(&Sample::new("cpu.total", ts(10), 3.0)); // equal is fine

        let samples = store.range_query("cpu.total", ts(0), ts(100));
        assert_eq!(samples.len(), 2);
        assert_eq!(samples[1].value, 3.0);
    }

    #[test]
    fn test_zero_capacity_resets_buffer() {
        let store = store_with_capacity(10);
        for i in 0..5 {
            store.append(&Sample::new("cpu.total", ts(i), 1.0));
        }
        assert_eq!(store.series_len("cpu.total"), 5);

        // retention below interval derives capacity 0
        store.reconfigure(Duration::from_millis(1), Duration::from_secs(1));
        store.append(&Sample::new("cpu.total", ts(6), 1.0));
        assert_eq!(
            store.series_len("cpu.total"),
            0,
            "fault containment resets the offending key"
        );
    }

    #[test]
    fn test_reconfigure_shrinks_lazily_without_reordering() {
        let store = store_with_capacity(10);
        for i in 0..10 {
            store.append(&Sample::new("cpu.total", ts(i), i as f64));
        }

        store.reconfigure(Duration::from_secs(3), Duration::from_secs(1));
        store.append(&Sample::new("cpu.total", ts(10), 10.0));

        let samples = store.range_query("cpu.total", ts(0), ts(100));
        assert_eq!(samples.len(), 3);
        let values: Vec<f64> = samples.iter().map(|s| s.value).collect();
        assert_eq!(values, vec![8.0, 9.0, 10.0]);
    }

    #[test]
    fn test_log_eviction_by_count() {
        let store = TimeSeriesStore::new(Duration::from_secs(3600), Duration::from_secs(1), 5);
        store.append_events((0..8).map(|i| event(i, LogSeverity::Info)).collect());

        assert_eq!(store.log_count(), 5);
        let logs = store.recent_logs(100);
        assert_eq!(logs.first().unwrap().timestamp, ts(3), "oldest evicted first");
    }

    #[test]
    fn test_log_eviction_by_age() {
        let store = TimeSeriesStore::new(Duration::from_secs(60), Duration::from_secs(1), 1000);
        let mut events: Vec<LogEvent> = vec![event(0, LogSeverity::Info)];
        events.push(event(200, LogSeverity::Warn));
        store.append_events(events);

        assert_eq!(store.log_count(), 1, "entry older than retention evicted");
        assert_eq!(store.recent_logs(10)[0].severity, LogSeverity::Warn);
    }

    #[test]
    fn test_recent_logs_limit() {
        let store = store_with_capacity(10);
        store.append_events((0..6).map(|i| event(i, LogSeverity::Info)).collect());

        let logs = store.recent_logs(3);
        assert_eq!(logs.len(), 3);
        assert_eq!(logs[0].timestamp, ts(3));
        assert_eq!(logs[2].timestamp, ts(5));
    }

    #[test]
    fn test_logs_in_range() {
        let store = store_with_capacity(10);
        store.append_events((0..10).map(|i| event(i, LogSeverity::Error)).collect());

        let logs = store.logs_in_range(ts(2), ts(4));
        assert_eq!(logs.len(), 3);
    }

    #[test]
    fn test_snapshot_reflects_live_update() {
        let store = store_with_capacity(10);
        assert!(store.snapshot().taken_at.is_none());

        let mut scalars = BTreeMap::new();
        scalars.insert("cpu.total".to_string(), 42.5);
        store.update_live(ts(1), Some(Vec::new()), scalars);

        let snap = store.snapshot();
        assert_eq!(snap.taken_at, Some(ts(1)));
        assert_eq!(snap.scalars.get("cpu.total"), Some(&42.5));
    }

    #[test]
    fn test_degraded_tick_keeps_stale_process_table() {
        let store = store_with_capacity(10);
        let table = vec![crate::models::ProcessSnapshot {
            pid: 1,
            name: "init".to_string(),
            cpu_percent: 0.5,
            mem_percent: 0.1,
            mem_bytes: 4096,
            state: crate::models::ProcessState::Sleeping,
            user: "0".to_string(),
        }];
        store.update_live(ts(1), Some(table), BTreeMap::new());
        // Next tick captured no table
        store.update_live(ts(2), None, BTreeMap::new());

        let snap = store.snapshot();
        assert_eq!(snap.taken_at, Some(ts(2)));
        assert_eq!(snap.processes.len(), 1, "stale table remains visible");
    }

    #[test]
    fn test_source_status_upsert() {
        let store = store_with_capacity(10);
        store.record_source_status(SourceStatus {
            source: "proc".to_string(),
            last_tick: ts(1),
            state: SourceState::Ok,
        });
        store.record_source_status(SourceStatus {
            source: "proc".to_string(),
            last_tick: ts(2),
            state: SourceState::Degraded {
                error: "timeout".to_string(),
            },
        });

        let snap = store.snapshot();
        assert_eq!(snap.sources.len(), 1, "status is upserted per source");
        assert!(snap.sources[0].is_degraded());
        assert_eq!(snap.sources[0].last_tick, ts(2));
    }

    #[test]
    fn test_keys_and_counts() {
        let store = store_with_capacity(10);
        store.append(&Sample::new("cpu.total", ts(0), 1.0));
        store.append(&Sample::new("mem.percent", ts(0), 2.0));
        store.append(&Sample::new("mem.percent", ts(1), 3.0));

        let mut keys = store.keys();
        keys.sort();
        assert_eq!(keys, vec!["cpu.total", "mem.percent"]);
        assert_eq!(store.sample_count(), 3);
    }

    #[test]
    fn test_concurrent_reads_during_writes() {
        use std::sync::Arc;

        let store = Arc::new(store_with_capacity(100));
        let writer = {
            let store = Arc::clone(&store);
            std::thread::spawn(move || {
                for i in 0..1000 {
                    store.append(&Sample::new("cpu.total", ts(i), i as f64));
                }
            })
        };

        for _ in 0..100 {
            let samples = store.range_query("cpu.total", ts(0), ts(10_000));
            for pair in samples.windows(2) {
                assert!(
                    pair[0].timestamp <= pair[1].timestamp,
                    "readers must observe ordered history"
                );
            }
        }
        writer.join().unwrap();
    }
}
