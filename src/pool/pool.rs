//! Pool of dual-mapped plane buffers
//!
//! Shared by the decoder threads (allocate/release) and the render thread
//! (housekeeping). All bookkeeping sits behind one mutex held only for short
//! critical sections; memory allocation and freeing happen outside it.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use super::buffer::{Buffer, BufferId, BufferLease};
use super::descriptor::PlaneDescriptor;
use crate::error::{PipelineError, Result};

/// Pool sizing and reclamation policy
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolConfig {
    /// Upper bound on bytes held by the pool (live and idle)
    pub max_bytes: usize,
    /// Housekeeping passes an unreferenced buffer survives before it is freed
    pub retention_ticks: u64,
    /// Idle bytes kept warm; oldest idle buffers beyond this are freed early
    pub idle_budget_bytes: usize,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_bytes: 512 * 1024 * 1024,
            retention_ticks: 30,
            idle_budget_bytes: 64 * 1024 * 1024,
        }
    }
}

/// Snapshot of pool occupancy and activity
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PoolStats {
    /// Buffers currently held by the pool
    pub buffers: usize,
    /// Buffers with at least one live lease
    pub in_use: usize,
    /// Bytes of all buffers
    pub total_bytes: usize,
    /// Bytes of unreferenced buffers
    pub idle_bytes: usize,
    /// Fresh allocations since creation
    pub allocations: u64,
    /// Allocations served from the free list
    pub reuses: u64,
    /// Buffers freed by housekeeping
    pub frees: u64,
    /// Housekeeping passes so far
    pub generation: u64,
}

impl PoolStats {
    /// Total memory in megabytes
    pub fn total_mb(&self) -> f64 {
        self.total_bytes as f64 / (1024.0 * 1024.0)
    }
}

/// Result of one housekeeping pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HousekeepingReport {
    pub freed_buffers: usize,
    pub freed_bytes: usize,
}

struct Slot {
    buffer: Arc<Buffer>,
    descriptor: PlaneDescriptor,
    refs: usize,
    last_used: u64,
}

#[derive(Default)]
struct PoolState {
    slots: HashMap<BufferId, Slot>,
    generation: u64,
    /// Bytes of slots plus allocations in flight
    reserved_bytes: usize,
    allocations: u64,
    reuses: u64,
    frees: u64,
}

pub(crate) struct PoolShared {
    config: PoolConfig,
    state: Mutex<PoolState>,
    next_id: AtomicU64,
}

impl PoolShared {
    fn state(&self) -> MutexGuard<'_, PoolState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn retain(&self, id: BufferId) {
        let mut state = self.state();
        match state.slots.get_mut(&id) {
            Some(slot) => slot.refs += 1,
            None => tracing::warn!(?id, "retain of unknown buffer"),
        }
    }

    pub(crate) fn release(&self, id: BufferId) {
        let mut state = self.state();
        let generation = state.generation;
        match state.slots.get_mut(&id) {
            Some(slot) if slot.refs > 0 => {
                slot.refs -= 1;
                if slot.refs == 0 {
                    slot.last_used = generation;
                }
            }
            _ => tracing::warn!(?id, "release of unknown or unreferenced buffer"),
        }
    }
}

/// Thread-safe pool of CPU/GPU plane buffers
///
/// Cheap to clone; all clones share one pool.
#[derive(Clone)]
pub struct BufferPool {
    shared: Arc<PoolShared>,
}

impl BufferPool {
    pub fn new(config: PoolConfig) -> Self {
        tracing::info!(
            max_mb = config.max_bytes as f64 / (1024.0 * 1024.0),
            retention_ticks = config.retention_ticks,
            idle_budget_mb = config.idle_budget_bytes as f64 / (1024.0 * 1024.0),
            "Creating buffer pool"
        );
        Self {
            shared: Arc::new(PoolShared {
                config,
                state: Mutex::new(PoolState::default()),
                next_id: AtomicU64::new(1),
            }),
        }
    }

    pub fn config(&self) -> &PoolConfig {
        &self.shared.config
    }

    /// Get a buffer able to hold `descriptor`'s plane
    ///
    /// Reuses an idle compatible buffer when one exists; otherwise allocates,
    /// failing with [`PipelineError::OutOfMemory`] past `max_bytes`.
    pub fn allocate(&self, descriptor: &PlaneDescriptor) -> Result<BufferLease> {
        let needed = descriptor.byte_len();

        {
            let mut state = self.shared.state();
            let generation = state.generation;

            let reusable = state
                .slots
                .values_mut()
                .filter(|slot| slot.refs == 0)
                .filter(|slot| slot.buffer.byte_len() == needed)
                .filter(|slot| slot.descriptor.is_compatible(descriptor))
                .max_by_key(|slot| slot.last_used);

            if let Some(slot) = reusable {
                slot.refs = 1;
                slot.last_used = generation;
                slot.descriptor = *descriptor;
                let buffer = Arc::clone(&slot.buffer);
                state.reuses += 1;
                drop(state);

                buffer.memory().descriptor = *descriptor;
                tracing::trace!(id = ?buffer.id(), bytes = needed, "Buffer pool: reused buffer");
                return Ok(BufferLease::new(buffer, *descriptor, Arc::clone(&self.shared)));
            }

            let limit = self.shared.config.max_bytes;
            match state.reserved_bytes.checked_add(needed) {
                Some(reserved) if reserved <= limit => state.reserved_bytes = reserved,
                _ => {
                    return Err(PipelineError::OutOfMemory {
                        requested: needed,
                        in_use: state.reserved_bytes,
                        limit,
                    })
                }
            }
        }

        // Allocate outside the lock; the bytes are already reserved
        let mut cpu = Vec::new();
        if cpu.try_reserve_exact(needed).is_err() {
            let mut state = self.shared.state();
            state.reserved_bytes -= needed;
            return Err(PipelineError::OutOfMemory {
                requested: needed,
                in_use: state.reserved_bytes,
                limit: self.shared.config.max_bytes,
            });
        }
        cpu.resize(needed, 0);

        let id = BufferId(self.shared.next_id.fetch_add(1, Ordering::Relaxed));
        let buffer = Arc::new(Buffer::new(id, *descriptor, cpu));

        {
            let mut state = self.shared.state();
            let generation = state.generation;
            state.slots.insert(
                id,
                Slot {
                    buffer: Arc::clone(&buffer),
                    descriptor: *descriptor,
                    refs: 1,
                    last_used: generation,
                },
            );
            state.allocations += 1;
            tracing::debug!(
                ?id,
                bytes = needed,
                format = ?descriptor.format,
                buffers = state.slots.len(),
                "Buffer pool: allocated new buffer"
            );
        }

        Ok(BufferLease::new(buffer, *descriptor, Arc::clone(&self.shared)))
    }

    /// Give a lease back; the buffer stays warm once unreferenced
    pub fn release(&self, lease: BufferLease) {
        debug_assert!(lease.is_from(&self.shared), "lease released to a foreign pool");
        drop(lease);
    }

    /// Free buffers that have been idle past the retention window
    ///
    /// Called once per render tick. Each call advances the pool generation.
    pub fn housekeeping(&self) -> HousekeepingReport {
        let freed: Vec<Arc<Buffer>> = {
            let mut state = self.shared.state();
            state.generation += 1;
            let generation = state.generation;
            let retention = self.shared.config.retention_ticks;

            let mut expired: Vec<BufferId> = state
                .slots
                .iter()
                .filter(|(_, slot)| slot.refs == 0)
                .filter(|(_, slot)| generation.saturating_sub(slot.last_used) > retention)
                .map(|(id, _)| *id)
                .collect();

            // Over the idle budget: also free the oldest idle buffers
            let mut idle: Vec<(u64, BufferId, usize)> = state
                .slots
                .iter()
                .filter(|(id, slot)| slot.refs == 0 && !expired.contains(*id))
                .map(|(id, slot)| (slot.last_used, *id, slot.buffer.byte_len()))
                .collect();
            let mut idle_bytes: usize = idle.iter().map(|(_, _, bytes)| bytes).sum();
            idle.sort();
            for (_, id, bytes) in idle {
                if idle_bytes <= self.shared.config.idle_budget_bytes {
                    break;
                }
                idle_bytes -= bytes;
                expired.push(id);
            }

            let mut freed = Vec::with_capacity(expired.len());
            for id in expired {
                if let Some(slot) = state.slots.remove(&id) {
                    state.reserved_bytes -= slot.buffer.byte_len();
                    state.frees += 1;
                    freed.push(slot.buffer);
                }
            }
            freed
        };

        let report = HousekeepingReport {
            freed_buffers: freed.len(),
            freed_bytes: freed.iter().map(|b| b.byte_len()).sum(),
        };
        if report.freed_buffers > 0 {
            tracing::debug!(
                freed = report.freed_buffers,
                bytes = report.freed_bytes,
                "Buffer pool: housekeeping freed idle buffers"
            );
        }

        // Backing memory and textures are dropped here, outside the lock
        drop(freed);
        report
    }

    pub fn stats(&self) -> PoolStats {
        let state = self.shared.state();
        let mut stats = PoolStats {
            buffers: state.slots.len(),
            allocations: state.allocations,
            reuses: state.reuses,
            frees: state.frees,
            generation: state.generation,
            ..Default::default()
        };
        for slot in state.slots.values() {
            stats.total_bytes += slot.buffer.byte_len();
            if slot.refs == 0 {
                stats.idle_bytes += slot.buffer.byte_len();
            } else {
                stats.in_use += 1;
            }
        }
        stats
    }
}

impl std::fmt::Debug for BufferPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BufferPool")
            .field("config", &self.shared.config)
            .field("stats", &self.stats())
            .finish()
    }
}
