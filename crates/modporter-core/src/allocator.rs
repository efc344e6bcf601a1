//! Resource admission control
//!
//! Tracks a single process-wide ledger of memory, CPU slots, and disk, and
//! admits jobs all-or-nothing against it. Reservations are recorded per job
//! id so release subtracts exactly what was granted, even if the job's
//! options are mutated mid-flight.

use crate::job::{JobId, ResourceRequirements};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::{debug, warn};

/// Process-wide resource capacity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceTotals {
    /// Total memory in megabytes
    #[serde(default = "default_total_memory_mb")]
    pub memory_mb: u64,

    /// Total CPU slots
    #[serde(default = "default_total_cpu_slots")]
    pub cpu_slots: u32,

    /// Total scratch disk in megabytes
    #[serde(default = "default_total_disk_mb")]
    pub disk_mb: u64,
}

impl Default for ResourceTotals {
    fn default() -> Self {
        Self {
            memory_mb: default_total_memory_mb(),
            cpu_slots: default_total_cpu_slots(),
            disk_mb: default_total_disk_mb(),
        }
    }
}

impl ResourceTotals {
    /// Create totals with explicit values
    pub fn new(memory_mb: u64, cpu_slots: u32, disk_mb: u64) -> Self {
        Self {
            memory_mb,
            cpu_slots,
            disk_mb,
        }
    }
}

/// Snapshot of total and reserved capacity.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ResourceLedger {
    /// Configured capacity
    pub total: ResourceTotals,

    /// Currently reserved capacity
    pub reserved: ResourceTotals,
}

impl ResourceLedger {
    fn new(total: ResourceTotals) -> Self {
        Self {
            total,
            reserved: ResourceTotals::new(0, 0, 0),
        }
    }

    /// Free memory in megabytes
    pub fn available_memory_mb(&self) -> u64 {
        self.total.memory_mb.saturating_sub(self.reserved.memory_mb)
    }

    /// Free CPU slots
    pub fn available_cpu_slots(&self) -> u32 {
        self.total.cpu_slots.saturating_sub(self.reserved.cpu_slots)
    }

    /// Free disk in megabytes
    pub fn available_disk_mb(&self) -> u64 {
        self.total.disk_mb.saturating_sub(self.reserved.disk_mb)
    }

    /// True when nothing is reserved
    pub fn is_idle(&self) -> bool {
        self.reserved.memory_mb == 0 && self.reserved.cpu_slots == 0 && self.reserved.disk_mb == 0
    }
}

/// One dimension a denied request fell short on.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ResourceShortfall {
    /// Dimension name
    pub resource: &'static str,

    /// Amount requested
    pub requested: u64,

    /// Amount currently free
    pub available: u64,
}

/// Outcome of an admission attempt.
#[derive(Debug, Clone, PartialEq)]
pub enum Admission {
    /// Every dimension fits; the reservation is recorded
    Granted,

    /// At least one dimension fell short; nothing was reserved
    Denied { missing: Vec<ResourceShortfall> },
}

impl Admission {
    /// Check whether the request was granted
    pub fn is_granted(&self) -> bool {
        matches!(self, Admission::Granted)
    }
}

/// Admission control over the process-wide resource ledger.
///
/// Callers guard mutations with one critical section; the allocator itself
/// is plain owned state.
#[derive(Debug)]
pub struct ResourceAllocator {
    ledger: ResourceLedger,
    reservations: HashMap<JobId, ResourceRequirements>,
}

impl ResourceAllocator {
    /// Create an allocator with the given capacity
    pub fn new(totals: ResourceTotals) -> Self {
        Self {
            ledger: ResourceLedger::new(totals),
            reservations: HashMap::new(),
        }
    }

    /// Try to reserve every dimension a job requires, all-or-nothing.
    ///
    /// Re-admitting a job that already holds a reservation is a no-op
    /// grant.
    pub fn try_reserve(&mut self, job_id: JobId, requirements: &ResourceRequirements) -> Admission {
        if self.reservations.contains_key(&job_id) {
            return Admission::Granted;
        }

        let mut missing = Vec::new();
        if requirements.memory_mb > self.ledger.available_memory_mb() {
            missing.push(ResourceShortfall {
                resource: "memory_mb",
                requested: requirements.memory_mb,
                available: self.ledger.available_memory_mb(),
            });
        }
        if requirements.cpu_slots > self.ledger.available_cpu_slots() {
            missing.push(ResourceShortfall {
                resource: "cpu_slots",
                requested: requirements.cpu_slots as u64,
                available: self.ledger.available_cpu_slots() as u64,
            });
        }
        if requirements.disk_mb > self.ledger.available_disk_mb() {
            missing.push(ResourceShortfall {
                resource: "disk_mb",
                requested: requirements.disk_mb,
                available: self.ledger.available_disk_mb(),
            });
        }

        if !missing.is_empty() {
            return Admission::Denied { missing };
        }

        self.ledger.reserved.memory_mb += requirements.memory_mb;
        self.ledger.reserved.cpu_slots += requirements.cpu_slots;
        self.ledger.reserved.disk_mb += requirements.disk_mb;
        self.reservations.insert(job_id, *requirements);

        debug!(
            job_id = %job_id,
            memory_mb = requirements.memory_mb,
            cpu_slots = requirements.cpu_slots,
            disk_mb = requirements.disk_mb,
            "reserved resources"
        );

        Admission::Granted
    }

    /// Release the reservation held by a job.
    ///
    /// Subtracts exactly what was granted. Releasing a job with no
    /// reservation is a no-op and returns `false`.
    pub fn release(&mut self, job_id: JobId) -> bool {
        let Some(granted) = self.reservations.remove(&job_id) else {
            return false;
        };

        self.ledger.reserved.memory_mb = self.ledger.reserved.memory_mb.saturating_sub(granted.memory_mb);
        self.ledger.reserved.cpu_slots = self.ledger.reserved.cpu_slots.saturating_sub(granted.cpu_slots);
        self.ledger.reserved.disk_mb = self.ledger.reserved.disk_mb.saturating_sub(granted.disk_mb);

        debug!(job_id = %job_id, "released resources");
        true
    }

    /// Release every reservation (shutdown path)
    pub fn release_all(&mut self) {
        if !self.reservations.is_empty() {
            warn!(
                count = self.reservations.len(),
                "force-releasing outstanding reservations"
            );
        }
        self.reservations.clear();
        self.ledger.reserved = ResourceTotals::new(0, 0, 0);
    }

    /// Consistent snapshot of the ledger
    pub fn snapshot(&self) -> ResourceLedger {
        self.ledger
    }

    /// Reservation held by a job, if any
    pub fn reservation(&self, job_id: JobId) -> Option<&ResourceRequirements> {
        self.reservations.get(&job_id)
    }

    /// Number of jobs currently holding reservations
    pub fn reserved_count(&self) -> usize {
        self.reservations.len()
    }
}

fn default_total_memory_mb() -> u64 {
    8_192
}
fn default_total_cpu_slots() -> u32 {
    8
}
fn default_total_disk_mb() -> u64 {
    10_240
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn req(memory_mb: u64, cpu_slots: u32, disk_mb: u64) -> ResourceRequirements {
        ResourceRequirements::new(memory_mb, cpu_slots, disk_mb)
    }

    #[test]
    fn test_grant_and_release() {
        let mut alloc = ResourceAllocator::new(ResourceTotals::new(2048, 4, 1024));
        let job = Uuid::now_v7();

        assert!(alloc.try_reserve(job, &req(512, 1, 128)).is_granted());
        assert_eq!(alloc.snapshot().reserved.memory_mb, 512);
        assert_eq!(alloc.snapshot().available_cpu_slots(), 3);
        assert_eq!(alloc.reserved_count(), 1);

        assert!(alloc.release(job));
        assert!(alloc.snapshot().is_idle());
        assert_eq!(alloc.reserved_count(), 0);
    }

    #[test]
    fn test_all_or_nothing_admission() {
        let mut alloc = ResourceAllocator::new(ResourceTotals::new(1024, 2, 1024));
        let job = Uuid::now_v7();

        // Memory fits, CPU does not: nothing may be reserved.
        let admission = alloc.try_reserve(job, &req(512, 4, 128));
        match admission {
            Admission::Denied { missing } => {
                assert_eq!(missing.len(), 1);
                assert_eq!(missing[0].resource, "cpu_slots");
                assert_eq!(missing[0].requested, 4);
                assert_eq!(missing[0].available, 2);
            }
            Admission::Granted => panic!("expected denial"),
        }
        assert!(alloc.snapshot().is_idle());
    }

    #[test]
    fn test_release_uses_granted_amounts() {
        let mut alloc = ResourceAllocator::new(ResourceTotals::new(2048, 4, 1024));
        let job = Uuid::now_v7();

        let granted = req(512, 1, 128);
        assert!(alloc.try_reserve(job, &granted).is_granted());

        // Even if the caller's requirements were mutated afterwards, release
        // subtracts the recorded reservation.
        assert_eq!(alloc.reservation(job), Some(&granted));
        assert!(alloc.release(job));
        assert!(alloc.snapshot().is_idle());
    }

    #[test]
    fn test_release_is_idempotent() {
        let mut alloc = ResourceAllocator::new(ResourceTotals::default());
        let job = Uuid::now_v7();

        assert!(alloc.try_reserve(job, &req(128, 1, 64)).is_granted());
        assert!(alloc.release(job));
        assert!(!alloc.release(job));
        assert!(alloc.snapshot().is_idle());
    }

    #[test]
    fn test_reserve_twice_is_noop_grant() {
        let mut alloc = ResourceAllocator::new(ResourceTotals::new(1024, 4, 1024));
        let job = Uuid::now_v7();

        assert!(alloc.try_reserve(job, &req(512, 1, 128)).is_granted());
        assert!(alloc.try_reserve(job, &req(512, 1, 128)).is_granted());
        assert_eq!(alloc.snapshot().reserved.memory_mb, 512);
        assert_eq!(alloc.reserved_count(), 1);
    }

    #[test]
    fn test_exhaustion_then_release_unblocks() {
        let mut alloc = ResourceAllocator::new(ResourceTotals::new(2048, 4, 1024));
        let a = Uuid::now_v7();
        let b = Uuid::now_v7();

        assert!(alloc.try_reserve(a, &req(2000, 1, 128)).is_granted());
        assert!(!alloc.try_reserve(b, &req(1500, 1, 128)).is_granted());

        alloc.release(a);
        assert!(alloc.try_reserve(b, &req(1500, 1, 128)).is_granted());
    }

    #[test]
    fn test_release_all() {
        let mut alloc = ResourceAllocator::new(ResourceTotals::new(2048, 4, 1024));
        for _ in 0..3 {
            assert!(alloc
                .try_reserve(Uuid::now_v7(), &req(256, 1, 64))
                .is_granted());
        }
        assert_eq!(alloc.reserved_count(), 3);

        alloc.release_all();
        assert!(alloc.snapshot().is_idle());
        assert_eq!(alloc.reserved_count(), 0);
    }
}
