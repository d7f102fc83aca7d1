//! Allocation query and response types on the producer/sink boundary.
//!
//! Field names are semantic: the producer asks "how should I allocate
//! and deliver buffers for these caps?", and the sink answers with an
//! optional pool, buffer counts, and the metadata kinds it supports.

use crate::format::CapabilitySet;
use crate::pool::FramePool;
use smallvec::SmallVec;
use std::sync::Arc;

/// An allocation query from the frame producer.
#[derive(Clone, Debug)]
pub struct AllocationQuery {
    /// The concrete capabilities the producer intends to deliver.
    pub caps: Option<CapabilitySet>,
    /// Whether the producer wants the sink to provide a buffer pool.
    pub wants_pool: bool,
}

impl AllocationQuery {
    /// Query for the given caps, requesting a pool.
    pub fn with_pool(caps: CapabilitySet) -> Self {
        Self {
            caps: Some(caps),
            wants_pool: true,
        }
    }

    /// Query for the given caps without requesting a pool.
    pub fn without_pool(caps: CapabilitySet) -> Self {
        Self {
            caps: Some(caps),
            wants_pool: false,
        }
    }
}

/// Metadata kinds the sink advertises in an allocation response.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MetaMarker {
    /// Advisory output dimensions for sizing composited overlay content.
    OverlaySize {
        /// Surface width in device pixels.
        width: u32,
        /// Surface height in device pixels.
        height: u32,
    },
    /// Per-frame region-of-interest metadata is supported.
    FrameRegion,
    /// Explicit GPU synchronization metadata is supported.
    GpuSync,
}

/// The sink's answer to an allocation query.
#[derive(Clone)]
pub struct AllocationResponse {
    /// Pool the producer may allocate from, when one was requested and
    /// negotiated.
    pub pool: Option<Arc<dyn FramePool>>,
    /// Byte size of one frame in the negotiated format.
    pub buffer_size: usize,
    /// Minimum number of buffers.
    pub min_buffers: u32,
    /// Maximum number of buffers, 0 meaning unlimited.
    pub max_buffers: u32,
    /// Supported metadata kinds.
    pub metadata: SmallVec<[MetaMarker; 3]>,
}

impl AllocationResponse {
    /// Check whether a metadata kind is advertised.
    pub fn supports(&self, marker: MetaMarker) -> bool {
        self.metadata.contains(&marker)
    }

    /// The advertised overlay dimensions, if any.
    pub fn overlay_size(&self) -> Option<(u32, u32)> {
        self.metadata.iter().find_map(|m| match m {
            MetaMarker::OverlaySize { width, height } => Some((*width, *height)),
            _ => None,
        })
    }
}

impl std::fmt::Debug for AllocationResponse {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AllocationResponse")
            .field("has_pool", &self.pool.is_some())
            .field("buffer_size", &self.buffer_size)
            .field("min_buffers", &self.min_buffers)
            .field("max_buffers", &self.max_buffers)
            .field("metadata", &self.metadata)
            .finish()
    }
}
