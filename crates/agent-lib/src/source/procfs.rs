//! Host metrics collection from the Linux procfs
//!
//! Reads metrics directly from the proc filesystem:
//! - /proc/stat for aggregate CPU time and core count
//! - /proc/loadavg for the 1-minute load average
//! - /proc/meminfo for memory and swap usage
//! - /proc/<pid>/stat and /proc/<pid>/status for the process table

use super::{MetricSource, SourceBatch};
use crate::error::HostwatchError;
use crate::models::{ProcessSnapshot, ProcessState, Sample};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tokio::fs;

/// Assumed page size for RSS conversion
const PAGE_SIZE: u64 = 4096;

/// Aggregate CPU time split into busy and idle jiffies
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CpuTimes {
    pub busy: u64,
    pub idle: u64,
}

impl CpuTimes {
    pub fn total(&self) -> u64 {
        self.busy + self.idle
    }
}

/// Memory figures from /proc/meminfo, in kilobytes
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MemInfo {
    pub total_kb: u64,
    pub available_kb: u64,
    pub swap_total_kb: u64,
    pub swap_free_kb: u64,
}

/// One process's accounting from /proc/<pid>/stat
#[derive(Debug, Clone, PartialEq)]
pub struct PidStat {
    pub name: String,
    pub state: ProcessState,
    /// utime + stime in jiffies
    pub cpu_jiffies: u64,
    pub rss_pages: u64,
}

/// Counters carried between ticks for rate computation.
///
/// The first collect after startup has nothing to diff against and emits no
/// rate samples; correctness is unaffected.
#[derive(Debug, Default)]
struct RateState {
    cpu: Option<CpuTimes>,
    proc_jiffies: HashMap<u32, u64>,
}

/// Collector for host CPU, memory and per-process metrics
pub struct ProcSource {
    proc_root: PathBuf,
    top_process_count: usize,
    state: Mutex<RateState>,
}

impl ProcSource {
    /// Create a source reading the real /proc
    pub fn new(top_process_count: usize) -> Self {
        Self::with_proc_root("/proc", top_process_count)
    }

    /// Create a source with a custom proc root (for testing)
    pub fn with_proc_root(proc_root: impl Into<PathBuf>, top_process_count: usize) -> Self {
        Self {
            proc_root: proc_root.into(),
            top_process_count,
            state: Mutex::new(RateState::default()),
        }
    }

    /// Parse the aggregate "cpu " line of /proc/stat.
    /// Busy = user + nice + system + irq + softirq + steal; idle = idle + iowait.
    pub fn parse_cpu_line(line: &str) -> Option<CpuTimes> {
        let mut parts = line.split_whitespace();
        if parts.next()? != "cpu" {
            return None;
        }
        let fields: Vec<u64> = parts.filter_map(|p| p.parse().ok()).collect();
        if fields.len() < 4 {
            return None;
        }

        let field = |i: usize| fields.get(i).copied().unwrap_or(0);
        let busy = field(0) + field(1) + field(2) + field(5) + field(6) + field(7);
        let idle = field(3) + field(4);
        Some(CpuTimes { busy, idle })
    }

    /// Count "cpuN" lines in /proc/stat contents
    pub fn count_cores(stat: &str) -> usize {
        stat.lines()
            .filter(|l| {
                l.starts_with("cpu")
                    && l.as_bytes()
                        .get(3)
                        .is_some_and(|b| b.is_ascii_digit())
            })
            .count()
            .max(1)
    }

    /// Parse the 1-minute load average from /proc/loadavg
    pub fn parse_loadavg(content: &str) -> Option<f64> {
        content.split_whitespace().next()?.parse().ok()
    }

    /// Parse the fields we use from /proc/meminfo
    pub fn parse_meminfo(content: &str) -> MemInfo {
        let mut info = MemInfo::default();
        for line in content.lines() {
            let mut parts = line.split_whitespace();
            let (Some(label), Some(value)) = (parts.next(), parts.next()) else {
                continue;
            };
            let Ok(kb) = value.parse::<u64>() else {
                continue;
            };
            match label {
                "MemTotal:" => info.total_kb = kb,
                "MemAvailable:" => info.available_kb = kb,
                "SwapTotal:" => info.swap_total_kb = kb,
                "SwapFree:" => info.swap_free_kb = kb,
                _ => {}
            }
        }
        info
    }

    /// Parse /proc/<pid>/stat. The comm field is parenthesized and may
    /// itself contain spaces or parentheses, so fields are taken relative
    /// to the last ')'.
    pub fn parse_pid_stat(content: &str) -> Option<PidStat> {
        let open = content.find('(')?;
        let close = content.rfind(')')?;
        let name = content.get(open + 1..close)?.to_string();
        let rest: Vec<&str> = content.get(close + 1..)?.split_whitespace().collect();

        // rest[0] = state (field 3); utime/stime are fields 14/15; rss is field 24
        let state = map_state(rest.first()?.chars().next()?);
        let utime: u64 = rest.get(11)?.parse().ok()?;
        let stime: u64 = rest.get(12)?.parse().ok()?;
        let rss_pages: u64 = rest.get(21)?.parse().ok().unwrap_or(0);

        Some(PidStat {
            name,
            state,
            cpu_jiffies: utime + stime,
            rss_pages,
        })
    }

    /// Extract the real uid from /proc/<pid>/status
    pub fn parse_status_uid(content: &str) -> Option<u32> {
        for line in content.lines() {
            if let Some(rest) = line.strip_prefix("Uid:") {
                return rest.split_whitespace().next()?.parse().ok();
            }
        }
        None
    }

    async fn read_proc_file(&self, rel: &str) -> Result<String, HostwatchError> {
        fs::read_to_string(self.proc_root.join(rel))
            .await
            .map_err(|e| HostwatchError::source_unavailable("proc", format!("{rel}: {e}")))
    }

    /// Scan numeric directories under the proc root
    async fn list_pids(&self) -> Result<Vec<u32>, HostwatchError> {
        let mut pids = Vec::new();
        let mut entries = fs::read_dir(&self.proc_root)
            .await
            .map_err(|e| HostwatchError::source_unavailable("proc", e.to_string()))?;

        while let Ok(Some(entry)) = entries.next_entry().await {
            if let Ok(pid) = entry.file_name().to_string_lossy().parse::<u32>() {
                pids.push(pid);
            }
        }
        pids.sort_unstable();
        Ok(pids)
    }

    async fn collect_process(
        &self,
        pid: u32,
        mem_total_bytes: u64,
    ) -> Option<(ProcessSnapshot, u64)> {
        let stat = self
            .read_proc_file(&format!("{pid}/stat"))
            .await
            .ok()
            .and_then(|c| Self::parse_pid_stat(&c))?;

        let user = self
            .read_proc_file(&format!("{pid}/status"))
            .await
            .ok()
            .and_then(|c| Self::parse_status_uid(&c))
            .map_or_else(|| "unknown".to_string(), |uid| uid.to_string());

        let mem_bytes = stat.rss_pages * PAGE_SIZE;
        let mem_percent = if mem_total_bytes > 0 {
            (mem_bytes as f64 / mem_total_bytes as f64) * 100.0
        } else {
            0.0
        };

        Some((
            ProcessSnapshot {
                pid,
                name: stat.name,
                cpu_percent: 0.0, // filled in once deltas are known
                mem_percent,
                mem_bytes,
                state: stat.state,
                user,
            },
            stat.cpu_jiffies,
        ))
    }
}

#[async_trait]
impl MetricSource for ProcSource {
    fn name(&self) -> &str {
        "proc"
    }

    async fn collect(&self, now: DateTime<Utc>) -> Result<SourceBatch, HostwatchError> {
        let stat_content = self.read_proc_file("stat").await?;
        let meminfo_content = self.read_proc_file("meminfo").await?;
        let loadavg_content = self.read_proc_file("loadavg").await.unwrap_or_default();

        let cpu_now = Self::parse_cpu_line(stat_content.lines().next().unwrap_or(""))
            .ok_or_else(|| {
                HostwatchError::source_unavailable("proc", "malformed /proc/stat cpu line")
            })?;
        let cores = Self::count_cores(&stat_content);
        let mem = Self::parse_meminfo(&meminfo_content);
        let mem_total_bytes = mem.total_kb * 1024;

        let mut batch = SourceBatch::default();
        let mut push = |key: &str, value: f64| {
            batch.samples.push(Sample::new(key, now, value));
        };

        // Memory scalars need no previous counters
        let used_kb = mem.total_kb.saturating_sub(mem.available_kb);
        push("mem.used", (used_kb * 1024) as f64);
        push("mem.available", (mem.available_kb * 1024) as f64);
        if mem.total_kb > 0 {
            push("mem.percent", used_kb as f64 / mem.total_kb as f64 * 100.0);
        }
        if mem.swap_total_kb > 0 {
            let swap_used = mem.swap_total_kb.saturating_sub(mem.swap_free_kb);
            push(
                "swap.percent",
                swap_used as f64 / mem.swap_total_kb as f64 * 100.0,
            );
        }
        if let Some(load1) = Self::parse_loadavg(&loadavg_content) {
            push("cpu.load1", load1);
        }

        // Process table
        let pids = self.list_pids().await?;
        let mut table = Vec::with_capacity(pids.len());
        let mut jiffies_now = HashMap::with_capacity(pids.len());
        for pid in pids {
            if let Some((snapshot, jiffies)) = self.collect_process(pid, mem_total_bytes).await {
                jiffies_now.insert(pid, jiffies);
                table.push(snapshot);
            }
        }
        push("proc.count", table.len() as f64);

        // Rates against the previous tick's counters
        let mut state = self
            .state
            .lock()
            .map_err(|e| HostwatchError::source_unavailable("proc", format!("state lock: {e}")))?;

        if let Some(cpu_prev) = state.cpu {
            let total_delta = cpu_now.total().saturating_sub(cpu_prev.total());
            if total_delta > 0 {
                let busy_delta = cpu_now.busy.saturating_sub(cpu_prev.busy);
                push(
                    "cpu.total",
                    busy_delta as f64 / total_delta as f64 * 100.0,
                );

                for proc in &mut table {
                    let prev = state.proc_jiffies.get(&proc.pid).copied();
                    if let (Some(prev), Some(cur)) = (prev, jiffies_now.get(&proc.pid)) {
                        let delta = cur.saturating_sub(prev);
                        // Fraction of one core over the same system interval
                        proc.cpu_percent =
                            delta as f64 / total_delta as f64 * cores as f64 * 100.0;
                    }
                }
            }
        }
        state.cpu = Some(cpu_now);
        state.proc_jiffies = jiffies_now;
        drop(state);

        table.sort_by(|a, b| {
            b.cpu_percent
                .partial_cmp(&a.cpu_percent)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| b.mem_bytes.cmp(&a.mem_bytes))
        });

        for proc in table.iter().take(self.top_process_count) {
            batch
                .samples
                .push(Sample::new(format!("proc.{}.cpu", proc.pid), now, proc.cpu_percent));
            batch
                .samples
                .push(Sample::new(format!("proc.{}.mem", proc.pid), now, proc.mem_percent));
        }

        batch.processes = Some(table);
        Ok(batch)
    }
}

const fn map_state(c: char) -> ProcessState {
    match c {
        'R' => ProcessState::Running,
        'S' | 'I' => ProcessState::Sleeping,
        'D' => ProcessState::DiskSleep,
        'T' | 't' => ProcessState::Stopped,
        'Z' => ProcessState::Zombie,
        _ => ProcessState::Other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_cpu_line() {
        let line = "cpu  10132153 290696 3084719 46828483 16683 0 25195 0 175628 0";
        let times = ProcSource::parse_cpu_line(line).unwrap();
        // busy = user + nice + system + irq + softirq + steal
        assert_eq!(times.busy, 10132153 + 290696 + 3084719 + 25195 + 175628);
        assert_eq!(times.idle, 46828483 + 16683);
    }

    #[test]
    fn test_parse_cpu_line_rejects_per_core_lines() {
        assert!(ProcSource::parse_cpu_line("cpu0 123 0 456 789").is_none());
        assert!(ProcSource::parse_cpu_line("intr 12345").is_none());
    }

    #[test]
    fn test_count_cores() {
        let stat = "cpu  1 2 3 4\ncpu0 1 1 1 1\ncpu1 1 1 1 1\nintr 5\nctxt 9";
        assert_eq!(ProcSource::count_cores(stat), 2);
        // Never zero, even on malformed content
        assert_eq!(ProcSource::count_cores("garbage"), 1);
    }

    #[test]
    fn test_parse_loadavg() {
        let load = ProcSource::parse_loadavg("0.52 0.58 0.59 1/467 12345\n").unwrap();
        assert!((load - 0.52).abs() < f64::EPSILON);
        assert!(ProcSource::parse_loadavg("").is_none());
    }

    #[test]
    fn test_parse_meminfo() {
        let content = "MemTotal:       16384000 kB\n\
                       MemFree:         1024000 kB\n\
                       MemAvailable:    8192000 kB\n\
                       SwapTotal:       4096000 kB\n\
                       SwapFree:        4000000 kB\n";
        let info = ProcSource::parse_meminfo(content);
        assert_eq!(info.total_kb, 16384000);
        assert_eq!(info.available_kb, 8192000);
        assert_eq!(info.swap_total_kb, 4096000);
        assert_eq!(info.swap_free_kb, 4000000);
    }

    #[test]
    fn test_parse_pid_stat() {
        let content = "1234 (some proc) S 1 1234 1234 0 -1 4194560 1576 0 0 0 \
                       250 120 0 0 20 0 1 0 12345 223456256 890 18446744073709551615";
        let stat = ProcSource::parse_pid_stat(content).unwrap();
        assert_eq!(stat.name, "some proc");
        assert_eq!(stat.state, ProcessState::Sleeping);
        assert_eq!(stat.cpu_jiffies, 250 + 120);
        assert_eq!(stat.rss_pages, 890);
    }

    #[test]
    fn test_parse_pid_stat_name_with_parens() {
        let content = "99 (weird (name)) R 1 99 99 0 -1 0 0 0 0 0 \
                       5 5 0 0 20 0 1 0 100 1000 42 0";
        let stat = ProcSource::parse_pid_stat(content).unwrap();
        assert_eq!(stat.name, "weird (name)");
        assert_eq!(stat.state, ProcessState::Running);
        assert_eq!(stat.rss_pages, 42);
    }

    #[test]
    fn test_parse_pid_stat_malformed() {
        assert!(ProcSource::parse_pid_stat("").is_none());
        assert!(ProcSource::parse_pid_stat("1234 no-parens R 1").is_none());
    }

    #[test]
    fn test_parse_status_uid() {
        let content = "Name:\tbash\nUmask:\t0022\nState:\tS (sleeping)\n\
                       Uid:\t1000\t1000\t1000\t1000\nGid:\t1000\t1000\t1000\t1000\n";
        assert_eq!(ProcSource::parse_status_uid(content), Some(1000));
        assert_eq!(ProcSource::parse_status_uid("Name:\tbash\n"), None);
    }

    #[test]
    fn test_map_state() {
        assert_eq!(map_state('R'), ProcessState::Running);
        assert_eq!(map_state('S'), ProcessState::Sleeping);
        assert_eq!(map_state('I'), ProcessState::Sleeping);
        assert_eq!(map_state('D'), ProcessState::DiskSleep);
        assert_eq!(map_state('T'), ProcessState::Stopped);
        assert_eq!(map_state('Z'), ProcessState::Zombie);
        assert_eq!(map_state('X'), ProcessState::Other);
    }
}
