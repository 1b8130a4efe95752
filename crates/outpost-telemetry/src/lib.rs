// SPDX-License-Identifier: MIT OR Apache-2.0
//! Resource telemetry and hardware inventory.
//!
//! The sampler emits CPU / RAM / disk percentages over the control
//! channel every sampling interval while the agent is connected.
//! Telemetry is best-effort: a sample that cannot be delivered is
//! dropped, never spooled. The orchestrator binds the sampler task's
//! lifetime strictly to the connected state.

#![deny(unsafe_code)]
#![warn(missing_docs)]

use outpost_core::events::StatusUpdate;
use outpost_core::{HardwareReport, ShutdownSignal};
use std::sync::Mutex;
use std::time::Duration;
use sysinfo::{Disks, System};
use tracing::{debug, trace};

// ---------------------------------------------------------------------------
// Capabilities
// ---------------------------------------------------------------------------

/// Source of resource snapshots. The production implementation reads
/// from the OS; tests substitute fixed sequences.
#[async_trait::async_trait]
pub trait ResourceSampler: Send + Sync {
    /// Take one snapshot. May suspend (CPU sampling needs a settling
    /// interval between refreshes).
    async fn sample(&self) -> StatusUpdate;
}

/// Source of the one-shot hardware inventory.
pub trait HardwareProbe: Send + Sync {
    /// Collect the inventory payload.
    fn probe(&self) -> HardwareReport;
}

/// Consumer of snapshots; returns whether the snapshot was handed to a
/// live channel. The sampler drops undeliverable snapshots.
pub trait StatusEmitter: Send + Sync {
    /// Try to emit one snapshot.
    fn emit_status(&self, snapshot: &StatusUpdate) -> bool;
}

// ---------------------------------------------------------------------------
// sysinfo-backed implementations
// ---------------------------------------------------------------------------

/// OS-backed sampler using `sysinfo`.
pub struct SysinfoSampler {
    system: Mutex<System>,
}

impl SysinfoSampler {
    /// New sampler with a fresh system handle.
    pub fn new() -> Self {
        Self {
            system: Mutex::new(System::new()),
        }
    }
}

impl Default for SysinfoSampler {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl ResourceSampler for SysinfoSampler {
    async fn sample(&self) -> StatusUpdate {
        // CPU usage is a delta between two refreshes.
        {
            let mut system = self.system.lock().expect("sysinfo lock poisoned");
            system.refresh_cpu();
        }
        tokio::time::sleep(sysinfo::MINIMUM_CPU_UPDATE_INTERVAL).await;

        let (cpu, ram) = {
            let mut system = self.system.lock().expect("sysinfo lock poisoned");
            system.refresh_cpu();
            system.refresh_memory();
            let cpu = f64::from(system.global_cpu_info().cpu_usage());
            let ram = if system.total_memory() == 0 {
                0.0
            } else {
                system.used_memory() as f64 / system.total_memory() as f64 * 100.0
            };
            (cpu, ram)
        };

        let disks = Disks::new_with_refreshed_list();
        let (mut total, mut available) = (0u64, 0u64);
        for disk in disks.list() {
            total += disk.total_space();
            available += disk.available_space();
        }
        let disk = if total == 0 {
            0.0
        } else {
            (total - available) as f64 / total as f64 * 100.0
        };

        StatusUpdate {
            cpu_usage: round1(cpu),
            ram_usage: round1(ram),
            disk_usage: round1(disk),
        }
    }
}

/// OS-backed hardware probe using `sysinfo`.
pub struct SysinfoProbe;

impl HardwareProbe for SysinfoProbe {
    fn probe(&self) -> HardwareReport {
        let mut system = System::new();
        system.refresh_cpu();
        system.refresh_memory();

        let disks = Disks::new_with_refreshed_list();
        let total_disk_bytes = disks.list().iter().map(|d| d.total_space()).sum();

        let os = match (System::name(), System::os_version()) {
            (Some(name), Some(version)) => format!("{name} {version}"),
            (Some(name), None) => name,
            _ => "unknown".to_string(),
        };

        HardwareReport {
            hostname: System::host_name().unwrap_or_else(|| "unknown".to_string()),
            os,
            cpu_model: system
                .cpus()
                .first()
                .map(|cpu| cpu.brand().to_string())
                .unwrap_or_default(),
            cpu_count: system.cpus().len(),
            total_memory_bytes: system.total_memory(),
            total_disk_bytes,
            agent_version: outpost_core::AGENT_VERSION.to_string(),
        }
    }
}

// ---------------------------------------------------------------------------
// Sampler task
// ---------------------------------------------------------------------------

/// Percentages go over the wire with one decimal, clamped to `[0, 100]`.
pub fn round1(value: f64) -> f64 {
    let clamped = value.clamp(0.0, 100.0);
    (clamped * 10.0).round() / 10.0
}

/// Run the periodic sampling loop until `shutdown` triggers.
///
/// The orchestrator hands this a per-session shutdown signal so the loop
/// dies with the connection.
pub async fn run_sampler(
    sampler: &dyn ResourceSampler,
    emitter: &dyn StatusEmitter,
    interval: Duration,
    shutdown: ShutdownSignal,
) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    loop {
        tokio::select! {
            _ = shutdown.triggered() => break,
            _ = ticker.tick() => {}
        }
        let snapshot = tokio::select! {
            _ = shutdown.triggered() => break,
            snapshot = sampler.sample() => snapshot,
        };
        if emitter.emit_status(&snapshot) {
            trace!(
                target: "outpost.telemetry",
                cpu = snapshot.cpu_usage,
                ram = snapshot.ram_usage,
                disk = snapshot.disk_usage,
                "status update emitted"
            );
        } else {
            // Best-effort: disconnected samples are dropped, not spooled.
            debug!(target: "outpost.telemetry", "dropping sample, channel unavailable");
        }
    }
    debug!(target: "outpost.telemetry", "sampler stopped");
}
