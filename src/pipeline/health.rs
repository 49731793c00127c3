//! Resource monitoring for a running recording
//!
//! Samples host CPU usage from `/proc/stat` and the growth of the output
//! file. Purely observational: it never touches the session or the capture
//! processes, and any failure to sample is logged and ignored.

use log::{debug, info, warn};
use std::path::PathBuf;
use std::time::Duration;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

const PROC_STAT: &str = "/proc/stat";

/// Aggregate CPU counters from the first line of `/proc/stat`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CpuTimes {
    /// idle + iowait jiffies
    pub idle: u64,
    pub total: u64,
}

impl CpuTimes {
    /// Parse the aggregate `cpu` line out of a `/proc/stat` dump
    pub fn parse(stat: &str) -> Option<Self> {
        let line = stat.lines().find(|line| line.starts_with("cpu "))?;
        let fields = line
            .split_whitespace()
            .skip(1)
            .map(|field| field.parse::<u64>())
            .collect::<Result<Vec<_>, _>>()
            .ok()?;

        if fields.len() < 4 {
            return None;
        }

        // guest and guest_nice are already counted in user and nice
        let total = fields.iter().take(8).sum();
        let idle = fields[3] + fields.get(4).copied().unwrap_or(0);
        Some(Self { idle, total })
    }

    /// Busy percentage between an earlier sample and this one
    pub fn usage_since(&self, earlier: &CpuTimes) -> Option<f32> {
        let total = self.total.checked_sub(earlier.total)?;
        let idle = self.idle.checked_sub(earlier.idle)?;
        if total == 0 {
            return None;
        }
        Some((total.saturating_sub(idle) as f64 / total as f64 * 100.0) as f32)
    }
}

/// One monitoring sample
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ResourceSample {
    pub cpu_percent: Option<f32>,
    pub output_bytes: Option<u64>,
}

impl std::fmt::Display for ResourceSample {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.cpu_percent {
            Some(cpu) => write!(f, "cpu {:.1}%", cpu)?,
            None => write!(f, "cpu n/a")?,
        }
        match self.output_bytes {
            Some(bytes) => write!(f, ", output {:.2} MiB", bytes as f64 / (1024.0 * 1024.0)),
            None => write!(f, ", output not written yet"),
        }
    }
}

/// Periodic CPU and output-size sampler
pub struct ResourceMonitor {
    output: PathBuf,
    interval: Duration,
    cpu_warn_percent: f32,
    last_cpu: Option<CpuTimes>,
    last_size: Option<u64>,
}

impl ResourceMonitor {
    pub fn new(output: PathBuf) -> Self {
        Self {
            output,
            interval: Duration::from_secs(5),
            cpu_warn_percent: 90.0,
            last_cpu: None,
            last_size: None,
        }
    }

    /// Configure the sampling interval
    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// Configure the CPU usage warning threshold
    pub fn with_cpu_warn_percent(mut self, percent: f32) -> Self {
        self.cpu_warn_percent = percent;
        self
    }

    /// Sample until `cancel` fires.
    pub async fn run(mut self, cancel: CancellationToken) {
        let mut interval = tokio::time::interval(self.interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        debug!("resource monitor watching {}", self.output.display());

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = interval.tick() => {}
            }

            let sample = self.sample().await;
            self.report(&sample);
        }

        debug!("resource monitor stopped");
    }

    async fn sample(&mut self) -> ResourceSample {
        let cpu = match tokio::fs::read_to_string(PROC_STAT).await {
            Ok(stat) => CpuTimes::parse(&stat),
            Err(e) => {
                debug!("cannot read {}: {}", PROC_STAT, e);
                None
            }
        };
        let cpu_percent = match (cpu, self.last_cpu) {
            (Some(now), Some(before)) => now.usage_since(&before),
            _ => None,
        };
        if cpu.is_some() {
            self.last_cpu = cpu;
        }

        let output_bytes = match tokio::fs::metadata(&self.output).await {
            Ok(meta) => Some(meta.len()),
            Err(e) => {
                debug!("cannot stat {}: {}", self.output.display(), e);
                None
            }
        };

        ResourceSample {
            cpu_percent,
            output_bytes,
        }
    }

    fn report(&mut self, sample: &ResourceSample) {
        info!("recording: {}", sample);

        if let Some(cpu) = sample.cpu_percent.filter(|cpu| *cpu > self.cpu_warn_percent) {
            warn!("high CPU usage: {:.1}% (threshold {:.0}%)", cpu, self.cpu_warn_percent);
        }

        if let (Some(now), Some(before)) = (sample.output_bytes, self.last_size) {
            if now <= before {
                warn!("output file has not grown since the last sample");
            }
        }
        if sample.output_bytes.is_some() {
            self.last_size = sample.output_bytes;
        }
    }
}
