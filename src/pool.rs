//! Frame buffer pools and the sink's pool cache.
//!
//! A [`FramePool`] recycles frame buffers matching one concrete,
//! negotiated format. [`PoolCache`] owns the sink's single active pool
//! and decides, per allocation query, whether the existing pool can be
//! reconfigured in place or a new one has to be built.
//!
//! # Ownership
//!
//! The cache is the sole owner of the active pool. Producers receive a
//! shared reference for the duration of one negotiated session and never
//! mutate the config directly; renegotiation always goes back through
//! [`PoolCache::negotiate`]. Replacing a pool releases the old reference
//! only after the new pool is committed, so no double-active state is
//! ever observable and a failed negotiation leaves the previous pool in
//! place.

use crate::error::{Error, Result};
use crate::format::CapabilitySet;
use smallvec::SmallVec;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

// ============================================================================
// Pool configuration
// ============================================================================

/// Optional behaviors a pool can be configured with.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PoolOption {
    /// Attach explicit GPU synchronization metadata to produced frames.
    SyncMeta,
}

/// Configuration of one frame pool.
#[derive(Clone, Debug, PartialEq, Default)]
pub struct PoolConfig {
    /// The single concrete format frames are produced for.
    pub caps: CapabilitySet,
    /// Byte size of one frame.
    pub size: usize,
    /// Minimum number of frames kept allocated.
    pub min_buffers: u32,
    /// Maximum number of frames, 0 meaning unlimited.
    pub max_buffers: u32,
    /// Enabled options.
    pub options: SmallVec<[PoolOption; 1]>,
}

impl PoolConfig {
    /// Check internal consistency.
    ///
    /// The caps must parse into exactly one concrete format, the frame
    /// size must be non-zero, and `min <= max` unless `max` is 0
    /// (unlimited).
    pub fn is_valid(&self) -> bool {
        self.caps.fixate().is_some()
            && self.size > 0
            && (self.max_buffers == 0 || self.min_buffers <= self.max_buffers)
    }

    /// Check if an option is enabled.
    pub fn has_option(&self, option: PoolOption) -> bool {
        self.options.contains(&option)
    }
}

/// Pool usage counters.
#[derive(Clone, Debug, Default)]
pub struct PoolStats {
    /// Frames currently owned by the pool (free and loaned).
    pub allocated: usize,
    /// Frames ready for immediate acquisition.
    pub available: usize,
    /// Frames currently loaned out.
    pub outstanding: usize,
    /// Total acquisitions over the pool's lifetime.
    pub acquisitions: u64,
}

// ============================================================================
// FramePool trait and the loaned frame
// ============================================================================

/// A live pool producing and recycling frame buffers for one format.
pub trait FramePool: Send + Sync {
    /// The active configuration.
    fn config(&self) -> PoolConfig;

    /// Replace the configuration.
    ///
    /// Returns `false` when the pool rejects it: the config is
    /// inconsistent, or frames are still loaned out. On acceptance the
    /// free list is rebuilt for the new frame size with `min_buffers`
    /// frames preallocated.
    fn set_config(&self, config: PoolConfig) -> bool;

    /// Acquire a frame.
    ///
    /// Never blocks. Returns `None` when the pool is unconfigured or a
    /// bounded pool is exhausted.
    fn acquire(&self) -> Option<PooledFrame>;

    /// Usage counters.
    fn stats(&self) -> PoolStats;
}

/// A frame loaned from a pool, returned on drop.
pub struct PooledFrame {
    data: Option<Vec<u8>>,
    shared: Arc<PoolShared>,
}

impl PooledFrame {
    /// Frame bytes.
    #[inline]
    pub fn data(&self) -> &[u8] {
        self.data.as_deref().unwrap_or(&[])
    }

    /// Mutable frame bytes.
    #[inline]
    pub fn data_mut(&mut self) -> &mut [u8] {
        self.data.as_deref_mut().unwrap_or(&mut [])
    }
}

impl Drop for PooledFrame {
    fn drop(&mut self) {
        if let Some(data) = self.data.take() {
            let mut state = self.shared.state.lock().unwrap();
            state.outstanding -= 1;
            // A frame from a superseded config no longer fits; drop it.
            if data.len() == state.config.size {
                state.free.push(data);
            }
        }
    }
}

impl std::fmt::Debug for PooledFrame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PooledFrame")
            .field("len", &self.data().len())
            .finish()
    }
}

// ============================================================================
// SystemFramePool
// ============================================================================

/// Heap-backed pool for frames delivered in generic or opaque layouts.
///
/// Frames are plain byte buffers sized by the configured format;
/// acquisition pops the free list or allocates while under the
/// `max_buffers` bound.
pub struct SystemFramePool {
    shared: Arc<PoolShared>,
}

struct PoolShared {
    state: Mutex<PoolState>,
    acquisitions: AtomicU64,
}

struct PoolState {
    config: PoolConfig,
    free: Vec<Vec<u8>>,
    outstanding: usize,
}

impl SystemFramePool {
    /// Create an unconfigured pool.
    ///
    /// [`FramePool::set_config`] must be applied before frames can be
    /// acquired.
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            shared: Arc::new(PoolShared {
                state: Mutex::new(PoolState {
                    config: PoolConfig::default(),
                    free: Vec::new(),
                    outstanding: 0,
                }),
                acquisitions: AtomicU64::new(0),
            }),
        })
    }
}

impl FramePool for SystemFramePool {
    fn config(&self) -> PoolConfig {
        self.shared.state.lock().unwrap().config.clone()
    }

    fn set_config(&self, config: PoolConfig) -> bool {
        if !config.is_valid() {
            return false;
        }

        let mut state = self.shared.state.lock().unwrap();
        if state.outstanding > 0 {
            tracing::debug!(
                outstanding = state.outstanding,
                "pool reconfiguration rejected, frames still loaned out"
            );
            return false;
        }

        state.free.clear();
        for _ in 0..config.min_buffers {
            state.free.push(vec![0u8; config.size]);
        }
        state.config = config;
        true
    }

    fn acquire(&self) -> Option<PooledFrame> {
        let mut state = self.shared.state.lock().unwrap();
        if state.config.caps.is_empty() {
            return None;
        }

        let data = match state.free.pop() {
            Some(data) => data,
            None => {
                let max = state.config.max_buffers as usize;
                if max != 0 && state.outstanding >= max {
                    return None;
                }
                vec![0u8; state.config.size]
            }
        };

        state.outstanding += 1;
        self.shared.acquisitions.fetch_add(1, Ordering::Relaxed);

        Some(PooledFrame {
            data: Some(data),
            shared: Arc::clone(&self.shared),
        })
    }

    fn stats(&self) -> PoolStats {
        let state = self.shared.state.lock().unwrap();
        PoolStats {
            allocated: state.free.len() + state.outstanding,
            available: state.free.len(),
            outstanding: state.outstanding,
            acquisitions: self.shared.acquisitions.load(Ordering::Relaxed),
        }
    }
}

// ============================================================================
// PoolCache
// ============================================================================

/// Result of a successful pool negotiation.
#[derive(Clone)]
pub struct PoolLease {
    /// The active pool, shared with the producer for this session.
    pub pool: Arc<dyn FramePool>,
    /// Byte size of one frame.
    pub size: usize,
    /// Negotiated minimum buffer count.
    pub min_buffers: u32,
    /// Negotiated maximum buffer count, 0 meaning unlimited.
    pub max_buffers: u32,
}

impl std::fmt::Debug for PoolLease {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PoolLease")
            .field("size", &self.size)
            .field("min_buffers", &self.min_buffers)
            .field("max_buffers", &self.max_buffers)
            .finish_non_exhaustive()
    }
}

/// Holds the sink's single active pool and decides reuse vs. recreate.
#[derive(Default)]
pub struct PoolCache {
    active: Option<Arc<dyn FramePool>>,
}

impl PoolCache {
    /// Create an empty cache.
    pub fn new() -> Self {
        Self::default()
    }

    /// The currently active pool, if any.
    pub fn active(&self) -> Option<&Arc<dyn FramePool>> {
        self.active.as_ref()
    }

    /// Produce a pool for the requested format.
    ///
    /// `queue_depth` carries the fixed depth of a producer-managed
    /// buffer queue; when set it forces `min = 0, max = depth`,
    /// overriding the caller's values — such a producer sizes its own
    /// queue and the pool must not impose an independent minimum.
    ///
    /// The existing pool is reused when its caps equal `caps` exactly
    /// and it accepts an in-place reconfiguration (same options, new
    /// size/min/max). Otherwise a new pool is built; if its
    /// configuration is rejected the call fails with
    /// [`Error::ConfigFailed`], the half-built pool is dropped, and the
    /// previously active pool remains active.
    pub fn negotiate(
        &mut self,
        caps: &CapabilitySet,
        size: usize,
        min_buffers: u32,
        max_buffers: u32,
        queue_depth: Option<u32>,
    ) -> Result<PoolLease> {
        let (min_buffers, max_buffers) = match queue_depth {
            Some(depth) => (0, depth),
            None => (min_buffers, max_buffers),
        };

        if let Some(active) = &self.active {
            let mut config = active.config();
            if config.caps == *caps {
                config.size = size;
                config.min_buffers = min_buffers;
                config.max_buffers = max_buffers;
                if active.set_config(config) {
                    tracing::debug!(size, min_buffers, max_buffers, "reusing active pool");
                    return Ok(PoolLease {
                        pool: Arc::clone(active),
                        size,
                        min_buffers,
                        max_buffers,
                    });
                }
            }
        }

        tracing::debug!(size, min_buffers, max_buffers, "creating new pool");
        let pool = SystemFramePool::new();
        let config = PoolConfig {
            caps: caps.clone(),
            size,
            min_buffers,
            max_buffers,
            options: smallvec::smallvec![PoolOption::SyncMeta],
        };
        if !pool.set_config(config) {
            // The never-activated pool is the only thing released here;
            // the previous pool, if any, stays active.
            return Err(Error::ConfigFailed(
                "new pool rejected its configuration".into(),
            ));
        }

        let pool: Arc<dyn FramePool> = pool;
        let previous = self.active.replace(Arc::clone(&pool));
        drop(previous);

        Ok(PoolLease {
            pool,
            size,
            min_buffers,
            max_buffers,
        })
    }
}
