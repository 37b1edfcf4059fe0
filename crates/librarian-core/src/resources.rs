//! Memory-aware concurrency limits.
//!
//! The engine asks for a worker count before every batch; this is the only
//! backpressure in the pipeline. Readings come from a [`MemoryProbe`] so
//! the arithmetic can be exercised with synthetic machines.

use crate::config::ResourceConfig;
use std::thread;
use std::time::{Duration, Instant};
use sysinfo::System;
use tracing::{debug, info, warn};

const MB: u64 = 1024 * 1024;
const MIN_OS_RESERVED_MB: u64 = 512;
const MAX_RAM_RATIO: f64 = 0.8;
const MIN_FREE_FLOOR_MB: u64 = 256;
const SMALL_MACHINE_MB: u64 = 4096;
const MEDIUM_MACHINE_MB: u64 = 8192;
const MB_PER_BATCH_ITEM: u64 = 200;

/// One reading of host memory, in MB.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct MemorySnapshot {
    pub total_mb: u64,
    /// Free plus reclaimable (page cache, buffers).
    pub available_mb: u64,
    pub used_mb: u64,
    pub swap_total_mb: u64,
    pub swap_used_mb: u64,
    pub process_rss_mb: Option<u64>,
}

impl MemorySnapshot {
    pub fn used_percent(&self) -> f64 {
        if self.total_mb == 0 {
            return 0.0;
        }
        self.used_mb as f64 / self.total_mb as f64 * 100.0
    }

    pub fn swap_percent(&self) -> f64 {
        if self.swap_total_mb == 0 {
            return 0.0;
        }
        self.swap_used_mb as f64 / self.swap_total_mb as f64 * 100.0
    }
}

pub trait MemoryProbe: Send {
    fn snapshot(&mut self) -> MemorySnapshot;
}

/// OS memory collector backed by the `sysinfo` crate.
pub struct SysinfoProbe {
    system: System,
}

impl Default for SysinfoProbe {
    fn default() -> Self {
        Self::new()
    }
}

impl SysinfoProbe {
    pub fn new() -> Self {
        let mut system = System::new();
        system.refresh_memory();
        Self { system }
    }
}

impl MemoryProbe for SysinfoProbe {
    fn snapshot(&mut self) -> MemorySnapshot {
        self.system.refresh_memory();

        let process_rss_mb = sysinfo::get_current_pid().ok().and_then(|pid| {
            self.system
                .refresh_processes(sysinfo::ProcessesToUpdate::Some(&[pid]), true);
            self.system.process(pid).map(|p| p.memory() / MB)
        });

        MemorySnapshot {
            total_mb: self.system.total_memory() / MB,
            available_mb: self.system.available_memory() / MB,
            used_mb: self.system.used_memory() / MB,
            swap_total_mb: self.system.total_swap() / MB,
            swap_used_mb: self.system.used_swap() / MB,
            process_rss_mb,
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct CachedCount {
    at: Instant,
    max_workers: usize,
    memory_per_worker_mb: u64,
    workers: usize,
}

pub struct ResourceMonitor {
    probe: Box<dyn MemoryProbe>,
    config: ResourceConfig,
    cpu_count: usize,
    cache_ttl: Duration,
    poll_interval: Duration,
    cached: Option<CachedCount>,
}

impl ResourceMonitor {
    pub fn new(config: ResourceConfig) -> Self {
        Self::with_probe(config, Box::new(SysinfoProbe::new()))
    }

    pub fn with_probe(mut config: ResourceConfig, probe: Box<dyn MemoryProbe>) -> Self {
        config.os_reserved_mb = config.os_reserved_mb.max(MIN_OS_RESERVED_MB);
        config.max_ram_ratio = config.max_ram_ratio.clamp(0.0, MAX_RAM_RATIO);
        config.min_free_mb = config.min_free_mb.max(MIN_FREE_FLOOR_MB);
        config.memory_per_worker_mb = config.memory_per_worker_mb.max(1);
        let cpu_count = thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(4);
        let cache_ttl = Duration::from_secs(config.cache_secs);
        Self {
            probe,
            config,
            cpu_count,
            cache_ttl,
            poll_interval: Duration::from_secs(5),
            cached: None,
        }
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn config(&self) -> &ResourceConfig {
        &self.config
    }

    pub fn snapshot(&mut self) -> MemorySnapshot {
        self.probe.snapshot()
    }

    pub fn available_memory_mb(&mut self) -> u64 {
        self.probe.snapshot().available_mb
    }

    /// Worker count under the configured caps.
    pub fn worker_count(&mut self) -> usize {
        let max = self.config.max_workers;
        let per_worker = self.config.memory_per_worker_mb;
        self.safe_worker_count(max, per_worker)
    }

    /// How many workers of `memory_per_worker_mb` fit in usable memory.
    /// Always at least 1; forced to 1 under memory pressure.
    pub fn safe_worker_count(&mut self, max_workers: usize, memory_per_worker_mb: u64) -> usize {
        if let Some(cached) = self.cached {
            if cached.at.elapsed() < self.cache_ttl
                && cached.max_workers == max_workers
                && cached.memory_per_worker_mb == memory_per_worker_mb
            {
                return cached.workers;
            }
        }

        let snapshot = self.probe.snapshot();
        let capped = max_workers.min(self.cpu_count).max(1);
        let usable_mb = self.usable_memory_mb(&snapshot);
        let mut workers = compute_workers(usable_mb, capped, memory_per_worker_mb);

        if self.is_pressured(&snapshot) {
            if workers > 1 {
                info!(
                    "Memory pressure detected ({:.0}% used, {:.0}% swap), using a single worker",
                    snapshot.used_percent(),
                    snapshot.swap_percent()
                );
            }
            workers = 1;
            self.cached = None;
        } else {
            self.cached = Some(CachedCount {
                at: Instant::now(),
                max_workers,
                memory_per_worker_mb,
                workers,
            });
        }

        debug!(
            "Workers: {}, usable RAM: {}MB, available: {}MB, total: {}MB",
            workers, usable_mb, snapshot.available_mb, snapshot.total_mb
        );
        workers
    }

    pub fn under_memory_pressure(&mut self) -> bool {
        let snapshot = self.probe.snapshot();
        self.is_pressured(&snapshot)
    }

    /// Batch size scaled to available memory, capped at `ceiling`.
    pub fn recommended_batch_size(&mut self, ceiling: usize) -> usize {
        let available = self.available_memory_mb();
        let by_memory = (available / MB_PER_BATCH_ITEM) as usize;
        by_memory.clamp(1, ceiling.max(1))
    }

    /// Block until `min_free_mb` is available or `max_wait` elapses.
    /// Returns false when giving up; the caller proceeds either way.
    pub fn wait_until_free(&mut self, min_free_mb: u64, max_wait: Duration) -> bool {
        let start = Instant::now();
        loop {
            let snapshot = self.probe.snapshot();
            let target = if snapshot.total_mb < SMALL_MACHINE_MB {
                min_free_mb.min(MIN_FREE_FLOOR_MB)
            } else {
                min_free_mb
            };

            if self.is_pressured(&snapshot) {
                self.cached = None;
            }
            if snapshot.available_mb >= target {
                debug!(
                    "Sufficient free RAM: {}MB >= {}MB",
                    snapshot.available_mb, target
                );
                return true;
            }
            if start.elapsed() >= max_wait {
                warn!(
                    "Proceeding with limited RAM ({}MB < {}MB) after {}s wait",
                    snapshot.available_mb,
                    target,
                    max_wait.as_secs()
                );
                return false;
            }
            info!(
                "Waiting for free RAM: {}MB < {}MB (waited {}s)",
                snapshot.available_mb,
                target,
                start.elapsed().as_secs()
            );
            thread::sleep(self.poll_interval.min(max_wait.saturating_sub(start.elapsed())));
        }
    }

    pub fn log_usage(&mut self, phase: &str) {
        let snapshot = self.probe.snapshot();
        let rss = snapshot
            .process_rss_mb
            .map(|mb| format!("{}MB", mb))
            .unwrap_or_else(|| "N/A".to_string());
        info!(
            "{}: process RAM={}, system RAM={:.1}%, available={}MB",
            phase,
            rss,
            snapshot.used_percent(),
            snapshot.available_mb
        );
        if snapshot.process_rss_mb.unwrap_or(0) > 1024 {
            warn!("High process memory usage during {}: {}", phase, rss);
        }
    }

    fn os_reserved_mb(&self, total_mb: u64) -> u64 {
        if total_mb < SMALL_MACHINE_MB {
            MIN_OS_RESERVED_MB
        } else if total_mb < MEDIUM_MACHINE_MB {
            1024
        } else {
            self.config.os_reserved_mb
        }
    }

    fn usable_memory_mb(&self, snapshot: &MemorySnapshot) -> u64 {
        let reserved = self.os_reserved_mb(snapshot.total_mb);
        let usable = snapshot.available_mb.saturating_sub(reserved);
        let cap = (snapshot.total_mb as f64 * self.config.max_ram_ratio) as u64;
        usable.min(cap)
    }

    fn is_pressured(&self, snapshot: &MemorySnapshot) -> bool {
        snapshot.used_percent() > self.config.pressure_used_percent
            || (snapshot.swap_total_mb > 0
                && snapshot.swap_percent() > self.config.pressure_swap_percent)
    }
}

fn compute_workers(usable_mb: u64, max_workers: usize, memory_per_worker_mb: u64) -> usize {
    let fit = (usable_mb / memory_per_worker_mb.max(1)) as usize;
    fit.clamp(1, max_workers.max(1))
}
