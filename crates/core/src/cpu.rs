//! CPU utilisation math.
//!
//! Utilisation is derived from two snapshots of the aggregate `cpu` line
//! of `/proc/stat`: the share of non-idle jiffies between them.

use crate::error::CoreError;

/// Value reported to the orchestrator before the first successful sample.
///
/// Tells the scheduler to treat the node as fully busy until it has
/// measured itself.
pub const UNCALIBRATED_CPU_SENTINEL: f64 = 9999.0;

/// The worker's most recent CPU measurement.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub enum CpuLoad {
    #[default]
    Uncalibrated,
    Calibrated(f64),
}

impl CpuLoad {
    /// Record a successful sample, rounded to two decimals.
    pub fn record(&mut self, percent: f64) {
        *self = Self::Calibrated((percent * 100.0).round() / 100.0);
    }

    pub fn is_calibrated(&self) -> bool {
        matches!(self, Self::Calibrated(_))
    }

    /// Value sent on the wire.
    pub fn report_value(&self) -> f64 {
        match self {
            Self::Uncalibrated => UNCALIBRATED_CPU_SENTINEL,
            Self::Calibrated(percent) => *percent,
        }
    }
}

/// Cumulative idle and total jiffies across all CPUs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CpuTimes {
    pub idle: u64,
    pub total: u64,
}

impl CpuTimes {
    /// Parse the aggregate `cpu` line from `/proc/stat` contents.
    ///
    /// Fields: user nice system idle iowait irq softirq steal [guest
    /// guest_nice]. Guest time is already included in user/nice and is
    /// not added again. Idle includes iowait.
    pub fn parse_proc_stat(contents: &str) -> Result<Self, CoreError> {
        let line = contents
            .lines()
            .find(|l| l.split_whitespace().next() == Some("cpu"))
            .ok_or_else(|| CoreError::CpuStats("no aggregate cpu line".to_string()))?;

        let fields = line
            .split_whitespace()
            .skip(1)
            .take(8)
            .map(|f| {
                f.parse::<u64>()
                    .map_err(|e| CoreError::CpuStats(format!("bad field '{f}': {e}")))
            })
            .collect::<Result<Vec<u64>, _>>()?;

        if fields.len() < 4 {
            return Err(CoreError::CpuStats(format!(
                "expected at least 4 fields, found {}",
                fields.len()
            )));
        }

        let idle = fields[3] + fields.get(4).copied().unwrap_or(0);
        let total = fields.iter().sum();
        Ok(Self { idle, total })
    }
}

/// Utilisation percent between two snapshots.
///
/// Returns `None` if no time elapsed or the counters went backwards.
pub fn usage_percent(before: CpuTimes, after: CpuTimes) -> Option<f64> {
    let total = after.total.checked_sub(before.total)?;
    let idle = after.idle.checked_sub(before.idle)?;
    if total == 0 || idle > total {
        return None;
    }
    Some(100.0 * (total - idle) as f64 / total as f64)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
