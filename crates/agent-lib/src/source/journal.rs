//! Log-event collection from systemd journald
//!
//! Polls `journalctl --output=json` once per tick with a bounded timeout,
//! parsing one JSON object per line. A cursor timestamp is carried between
//! polls so each tick only yields events not seen before.

use super::{MetricSource, SourceBatch};
use crate::error::HostwatchError;
use crate::models::{LogEvent, LogSeverity};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;
use tokio::process::Command;

/// Upper bound on lines fetched per poll
const MAX_LINES: &str = "500";

/// How far back the first poll reaches
const INITIAL_LOOKBACK_SECS: i64 = 60;

/// Tailer for systemd journal events
pub struct JournalSource {
    command_timeout: Duration,
    /// Timestamp of the newest event returned so far
    cursor: Mutex<Option<DateTime<Utc>>>,
}

impl JournalSource {
    pub fn new(command_timeout: Duration) -> Self {
        Self {
            command_timeout,
            cursor: Mutex::new(None),
        }
    }

    /// Fetch journal events newer than the cursor. Non-blocking beyond the
    /// configured command timeout; an absent `journalctl` binary yields an
    /// empty sequence rather than an error.
    pub async fn poll(&self, now: DateTime<Utc>) -> Result<Vec<LogEvent>, HostwatchError> {
        let since = self
            .cursor
            .lock()
            .map_err(|e| HostwatchError::source_unavailable("journal", format!("cursor lock: {e}")))?
            .unwrap_or_else(|| now - chrono::Duration::seconds(INITIAL_LOOKBACK_SECS));

        let mut command = Command::new("journalctl");
        command
            .arg(format!("--since=@{}", since.timestamp()))
            .args(["--output=json", "--no-pager", "--lines", MAX_LINES])
            .kill_on_drop(true);

        let output = match tokio::time::timeout(self.command_timeout, command.output()).await {
            Ok(Ok(output)) => output,
            Ok(Err(e)) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Ok(Err(e)) => {
                return Err(HostwatchError::source_unavailable(
                    "journal",
                    format!("failed to run journalctl: {e}"),
                ))
            }
            Err(_) => {
                return Err(HostwatchError::source_unavailable(
                    "journal",
                    format!("journalctl exceeded {:?}", self.command_timeout),
                ))
            }
        };

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(HostwatchError::source_unavailable(
                "journal",
                format!("journalctl exited with {}: {stderr}", output.status),
            ));
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        let mut events = parse_journal_output(&stdout);

        // --since has one-second granularity; drop anything at or before
        // the cursor so re-fetched edge events are not duplicated.
        if let Ok(guard) = self.cursor.lock() {
            if let Some(cursor) = *guard {
                events.retain(|e| e.timestamp > cursor);
            }
        }
        if let Some(newest) = events.iter().map(|e| e.timestamp).max() {
            if let Ok(mut guard) = self.cursor.lock() {
                *guard = Some(newest);
            }
        }

        Ok(events)
    }
}

#[async_trait]
impl MetricSource for JournalSource {
    fn name(&self) -> &str {
        "journal"
    }

    async fn collect(&self, now: DateTime<Utc>) -> Result<SourceBatch, HostwatchError> {
        let events = self.poll(now).await?;
        Ok(SourceBatch {
            events,
            ..Default::default()
        })
    }
}

/// Parse `journalctl --output=json` lines into events, skipping anything
/// malformed or empty (journald emits binary MESSAGE payloads as byte
/// arrays; those are skipped too).
pub fn parse_journal_output(stdout: &str) -> Vec<LogEvent> {
    let mut events = Vec::new();

    for line in stdout.lines() {
        let Ok(entry) = serde_json::from_str::<HashMap<String, serde_json::Value>>(line) else {
            continue;
        };

        let message = entry
            .get("MESSAGE")
            .and_then(|v| v.as_str())
            .unwrap_or("")
            .to_string();
        if message.is_empty() {
            continue;
        }

        let source = entry
            .get("_SYSTEMD_UNIT")
            .or_else(|| entry.get("SYSLOG_IDENTIFIER"))
            .and_then(|v| v.as_str())
            .unwrap_or("unknown")
            .to_string();

        events.push(LogEvent {
            timestamp: parse_timestamp(&entry),
            severity: LogSeverity::from_syslog_priority(parse_priority(&entry)),
            source,
            message,
        });
    }

    events.sort_by_key(|e| e.timestamp);
    events
}

fn parse_timestamp(entry: &HashMap<String, serde_json::Value>) -> DateTime<Utc> {
    entry
        .get("__REALTIME_TIMESTAMP")
        .and_then(|v| v.as_str())
        .and_then(|s| s.parse::<i64>().ok())
        .and_then(|us| {
            let nanos = u32::try_from((us % 1_000_000) * 1_000).unwrap_or(0);
            DateTime::from_timestamp(us / 1_000_000, nanos)
        })
        .unwrap_or_else(Utc::now)
}

fn parse_priority(entry: &HashMap<String, serde_json::Value>) -> u8 {
    entry
        .get("PRIORITY")
        .and_then(|v| {
            v.as_str()
                .and_then(|s| s.parse::<u8>().ok())
                .or_else(|| v.as_u64().and_then(|n| u8::try_from(n).ok()))
        })
        .unwrap_or(6)
}
