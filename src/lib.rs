//! # Vitrine
//!
//! Negotiation and resource-lifecycle layer for a GPU-backed windowed
//! video sink.
//!
//! Vitrine implements everything that happens around the actual drawing
//! when a pipeline delivers decoded frames into an on-screen surface:
//!
//! - **Capability negotiation**: the sink declares which pixel formats
//!   and memory layouts it accepts; producers intersect against it and
//!   come back with a concrete format.
//! - **Buffer pool lifecycle**: allocation queries are answered with a
//!   pool that is reused in place when nothing semantically changed and
//!   rebuilt otherwise, without ever leaving the sink pool-less on a
//!   failed negotiation.
//! - **Surface tracking**: resize notifications from the UI thread are
//!   folded into a thread-safe size snapshot, and an upstream
//!   reconfigure signal fires exactly once per actual change.
//! - **Context brokering**: the display handle and rendering contexts
//!   created by the embedding widget are acquired all-or-nothing,
//!   shared with the rest of the pipeline, and torn down exactly once.
//!
//! The actual pixel upload, the widget's event loop, and the producer
//! state machine live outside this crate; they connect through the
//! [`context::VideoSurface`] trait and the query types in
//! [`allocation`].
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use vitrine::prelude::*;
//!
//! let (mut sink, reconfigure) = WindowSink::new(WindowSinkConfig::default());
//! sink.start(widget)?;
//!
//! // Producer asks what the sink accepts, then how to allocate.
//! let caps = sink.caps(None);
//! let response = sink.propose_allocation(&AllocationQuery::with_pool(chosen))?;
//!
//! // A surface resize makes `reconfigure.pending()` true; re-run both
//! // queries, then eventually:
//! sink.stop();
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![deny(unsafe_op_in_unsafe_fn)]

pub mod allocation;
pub mod context;
pub mod error;
pub mod format;
pub mod pool;
pub mod sink;
pub mod surface;

/// Prelude for convenient imports
pub mod prelude {
    pub use crate::allocation::{AllocationQuery, AllocationResponse, MetaMarker};
    pub use crate::context::{ContextBundle, DisplayHandle, RenderContext, VideoSurface};
    pub use crate::error::{Error, Result};
    pub use crate::format::{CapabilitySet, FrameCaps, FrameInfo, MemoryLayout, PixelFormat};
    pub use crate::pool::{FramePool, PoolConfig, PoolLease};
    pub use crate::sink::{SinkState, WindowSink, WindowSinkConfig};
    pub use crate::surface::{ReconfigureReceiver, SurfaceSize};
}

pub use error::{Error, Result};
