//! Periodic CPU utilisation sampling.
//!
//! Each sample reads `/proc/stat`, waits one window, reads it again and
//! derives utilisation from the delta. Samples run back to back, so the
//! window doubles as the stats reporting period. Results are posted to
//! the worker's event channel; the worker decides what to do with them.

use std::path::{Path, PathBuf};
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use transcode_core::cpu::{usage_percent, CpuTimes};

use crate::error::SampleError;
use crate::worker::WorkerEvent;

const PROC_STAT: &str = "/proc/stat";

pub struct CpuSampler {
    stat_path: PathBuf,
    window: Duration,
}

impl CpuSampler {
    pub fn new(window: Duration) -> Self {
        Self {
            stat_path: PathBuf::from(PROC_STAT),
            window,
        }
    }

    /// Read counters from `path` instead of `/proc/stat`.
    pub fn with_stat_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.stat_path = path.into();
        self
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    /// Take one sample spanning the configured window.
    pub async fn sample(&self) -> Result<f64, SampleError> {
        let before = read_times(&self.stat_path).await?;
        tokio::time::sleep(self.window).await;
        let after = read_times(&self.stat_path).await?;
        usage_percent(before, after).ok_or(SampleError::NoElapsedTime)
    }
}

async fn read_times(path: &Path) -> Result<CpuTimes, SampleError> {
    let contents = tokio::fs::read_to_string(path).await?;
    Ok(CpuTimes::parse_proc_stat(&contents)?)
}

/// Run `sampler` until `cancel` fires or the worker stops listening.
///
/// A failed sample is still posted so the worker can log it, then the
/// loop waits one window before retrying.
pub fn spawn_sampler(
    sampler: CpuSampler,
    events: mpsc::UnboundedSender<WorkerEvent>,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            let result = tokio::select! {
                _ = cancel.cancelled() => break,
                result = sampler.sample() => result,
            };
            let failed = result.is_err();

            if events.send(WorkerEvent::CpuSampled(result)).is_err() {
                break;
            }

            if failed {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = tokio::time::sleep(sampler.window()) => {}
                }
            }
        }
        tracing::debug!("CPU sampler stopped");
    })
}
