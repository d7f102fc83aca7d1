//! WindowSink - negotiation and resource lifecycle of a windowed video sink.
//!
//! The sink renders decoded frames into a GPU-backed on-screen surface
//! owned by an embedding widget. This module implements everything that
//! happens *around* the actual drawing: capability queries, allocation
//! queries with pool reuse, surface-size tracking with upstream
//! reconfigure signaling, and context-bundle lifetime.
//!
//! # Architecture
//!
//! Two external threads drive a sink concurrently:
//! - the pipeline thread calls [`WindowSink::start`], [`WindowSink::stop`],
//!   [`WindowSink::caps`] and [`WindowSink::propose_allocation`]
//!   (serialized by the pipeline's state-change discipline);
//! - the widget's UI thread delivers resize and destroy notifications
//!   through the handlers registered during start.
//!
//! Only the surface size is touched from both sides; it lives behind its
//! own mutex in [`SurfaceTracker`]. Everything else is owned by the
//! pipeline thread.
//!
//! # Example
//!
//! ```rust,ignore
//! use vitrine::sink::{WindowSink, WindowSinkConfig};
//! use vitrine::allocation::AllocationQuery;
//!
//! let (mut sink, reconfigure) = WindowSink::new(WindowSinkConfig::default());
//! sink.start(widget)?;
//!
//! // Producer side:
//! let caps = sink.caps(None);
//! let response = sink.propose_allocation(&AllocationQuery::with_pool(chosen))?;
//!
//! // On surface resize, `reconfigure.pending()` turns true and the
//! // producer re-runs the two queries.
//! sink.stop();
//! ```

use crate::allocation::{AllocationQuery, AllocationResponse, MetaMarker};
use crate::context::{ContextBroker, DisplayHandle, SharedDisplay, SubscriptionTable, VideoSurface};
use crate::error::{Error, Result};
use crate::format::{CapabilitySet, CapsValue, FrameCaps, MemoryLayout, PixelFormat};
use crate::pool::{FramePool, PoolCache};
use crate::surface::{ReconfigureReceiver, SurfaceTracker, reconfigure_channel};
use smallvec::SmallVec;
use std::sync::Arc;

/// Context-query kind answered with the sink's display handle.
pub const CONTEXT_TYPE_DISPLAY: &str = "display-context";

/// Default minimum buffer count (double buffering).
const DEFAULT_MIN_BUFFERS: u32 = 2;

/// Sink configuration.
#[derive(Debug, Clone)]
pub struct WindowSinkConfig {
    /// Window title used by the embedding widget.
    pub title: String,
    /// Fixed depth of the producer-managed buffer queue, dictated by the
    /// producer's opaque queue memory.
    pub queue_depth: u32,
}

impl Default for WindowSinkConfig {
    fn default() -> Self {
        Self {
            title: "Video".to_string(),
            queue_depth: 12,
        }
    }
}

impl WindowSinkConfig {
    /// Set the window title.
    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = title.into();
        self
    }

    /// Set the producer queue depth.
    pub fn with_queue_depth(mut self, depth: u32) -> Self {
        self.queue_depth = depth;
        self
    }
}

/// Optional collaborator that composites overlay content into the
/// output and contributes its own capability variants.
pub trait OverlayCompositor: Send + Sync {
    /// Augment the sink's capability set with the variants the
    /// compositor can additionally accept.
    fn augment_caps(&self, caps: CapabilitySet) -> CapabilitySet;
}

/// Lifecycle state of a sink instance.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SinkState {
    /// Not started; no resources held.
    Stopped,
    /// Start in progress (subscriptions registered, context pending).
    Starting,
    /// Context bundle acquired; ready for allocation queries.
    ContextAcquired,
    /// At least one allocation query answered; reentrant.
    Negotiating,
    /// Teardown in progress.
    Stopping,
}

/// Queries the pipeline routes to the sink.
#[derive(Debug)]
pub enum SinkQuery<'a> {
    /// Request for a shared context object of the given kind.
    Context {
        /// Context kind, e.g. [`CONTEXT_TYPE_DISPLAY`].
        kind: &'a str,
    },
}

/// Answer to a [`SinkQuery`].
pub enum QueryResponse {
    /// The sink's display handle.
    Display(Arc<dyn DisplayHandle>),
    /// Not answered here; the caller delegates to its generic fallback
    /// responder.
    Unhandled,
}

/// A video sink's negotiation and resource-lifecycle core.
///
/// Created together with the [`ReconfigureReceiver`] the driving
/// pipeline uses to learn that capability/allocation negotiation must be
/// re-run.
pub struct WindowSink {
    name: String,
    config: WindowSinkConfig,
    state: SinkState,
    widget: Option<Arc<dyn VideoSurface>>,
    broker: ContextBroker,
    pools: PoolCache,
    surface: Arc<SurfaceTracker>,
    subscriptions: Arc<SubscriptionTable>,
    compositor: Option<Arc<dyn OverlayCompositor>>,
    shared_display: SharedDisplay,
}

impl WindowSink {
    /// Create a sink and the receiver for its reconfigure requests.
    pub fn new(config: WindowSinkConfig) -> (Self, ReconfigureReceiver) {
        let (tx, rx) = reconfigure_channel();
        let shared_display = SharedDisplay::new();
        let sink = Self {
            name: "window_sink".to_string(),
            config,
            state: SinkState::Stopped,
            widget: None,
            broker: ContextBroker::new(shared_display.clone()),
            pools: PoolCache::new(),
            surface: Arc::new(SurfaceTracker::new(tx)),
            subscriptions: Arc::new(SubscriptionTable::default()),
            compositor: None,
            shared_display,
        };
        (sink, rx)
    }

    /// Set a custom name.
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Attach an overlay compositor collaborator.
    pub fn with_compositor(mut self, compositor: Arc<dyn OverlayCompositor>) -> Self {
        self.compositor = Some(compositor);
        self
    }

    /// The sink's name (for debugging/logging).
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Current lifecycle state.
    pub fn state(&self) -> SinkState {
        self.state
    }

    /// Snapshot of the tracked surface size.
    pub fn surface_size(&self) -> crate::surface::SurfaceSize {
        self.surface.read()
    }

    /// The slot other pipeline elements read the shared display from.
    pub fn shared_display(&self) -> SharedDisplay {
        self.shared_display.clone()
    }

    /// The currently active pool, if a negotiation produced one.
    pub fn pool(&self) -> Option<&Arc<dyn FramePool>> {
        self.pools.active()
    }

    /// The capability set the sink statically declares.
    ///
    /// Opaque producer layouts accept every format including
    /// [`PixelFormat::Encoded`]; generic system memory accepts only the
    /// formats whose layout the sink can address directly.
    fn template_caps() -> CapabilitySet {
        let opaque_formats = vec![
            PixelFormat::Nv12,
            PixelFormat::Nv21,
            PixelFormat::Yv12,
            PixelFormat::I420,
            PixelFormat::Rgba,
            PixelFormat::Bgra,
            PixelFormat::Encoded,
        ];
        let system_formats = vec![
            PixelFormat::Nv12,
            PixelFormat::Nv21,
            PixelFormat::Yv12,
            PixelFormat::I420,
            PixelFormat::Rgba,
            PixelFormat::Bgra,
        ];

        CapabilitySet::new([
            FrameCaps {
                pixel: CapsValue::List(opaque_formats.clone()),
                ..FrameCaps::any(MemoryLayout::SingleBuffer)
            },
            FrameCaps {
                pixel: CapsValue::List(opaque_formats),
                ..FrameCaps::any(MemoryLayout::QueueBuffer)
            },
            FrameCaps {
                pixel: CapsValue::List(system_formats),
                ..FrameCaps::any(MemoryLayout::System)
            },
        ])
    }

    /// Answer a capability query.
    ///
    /// Returns the declared set, intersected with `filter` when one is
    /// supplied (declared order wins), then augmented with any variants
    /// contributed by the overlay compositor.
    pub fn caps(&self, filter: Option<&CapabilitySet>) -> CapabilitySet {
        let declared = Self::template_caps();
        let result = match filter {
            Some(filter) => {
                tracing::debug!(entries = filter.len(), "intersecting caps with filter");
                declared.intersect(filter)
            }
            None => declared,
        };

        let result = match &self.compositor {
            Some(compositor) => compositor.augment_caps(result),
            None => result,
        };

        tracing::debug!(entries = result.len(), "returning caps");
        result
    }

    /// Start the sink against the given host surface.
    ///
    /// Registers the resize and destroy handlers, primes the surface
    /// size from the widget's current dimensions, then acquires the
    /// context bundle and publishes the display handle. On failure the
    /// registered subscriptions are unwound, the state returns to
    /// [`SinkState::Stopped`] and the error is surfaced to the pipeline,
    /// which must not proceed to streaming.
    pub fn start(&mut self, widget: Arc<dyn VideoSurface>) -> Result<()> {
        self.state = SinkState::Starting;

        let tracker = Arc::clone(&self.surface);
        let resize_id = widget.connect_resize(Box::new(move |width, height| {
            tracker.on_resize(width, height);
        }));
        self.subscriptions.set_resize(resize_id);

        let table = Arc::clone(&self.subscriptions);
        let weak_widget = Arc::downgrade(&widget);
        let destroy_id = widget.connect_destroy(Box::new(move || {
            if let Some(widget) = weak_widget.upgrade() {
                table.disconnect_all(widget.as_ref());
            }
        }));
        self.subscriptions.set_destroy(destroy_id);

        // Apply the current size once so downstream metadata is
        // populated before any real frame flows.
        let size = widget.current_size();
        self.surface.on_resize(size.width, size.height);

        if let Err(err) = self.broker.acquire(widget.as_ref()) {
            tracing::error!("failed to start {} ({}): {}", self.name, self.config.title, err);
            self.subscriptions.disconnect_all(widget.as_ref());
            self.state = SinkState::Stopped;
            return Err(err);
        }

        self.widget = Some(widget);
        self.state = SinkState::ContextAcquired;
        Ok(())
    }

    /// Stop the sink. Always succeeds; teardown is best-effort.
    ///
    /// Event subscriptions are disconnected first, then the context
    /// bundle is released, even when negotiation never completed
    /// cleanly.
    pub fn stop(&mut self) {
        self.state = SinkState::Stopping;

        if let Some(widget) = self.widget.take() {
            self.subscriptions.disconnect_all(widget.as_ref());
        }
        self.broker.release();

        self.state = SinkState::Stopped;
    }

    /// Answer an allocation query from the producer.
    ///
    /// Refused with [`Error::ContextMissing`] until the context bundle
    /// is acquired. Fails with [`Error::NoCaps`] /
    /// [`Error::InvalidCaps`] for an absent or non-concrete capability
    /// set. Reentrant: re-invoked on every renegotiation without state
    /// reset.
    pub fn propose_allocation(&mut self, query: &AllocationQuery) -> Result<AllocationResponse> {
        let supports_sync = match self.broker.bundle() {
            Some(bundle) => bundle.render.supports_fence_sync(),
            None => return Err(Error::ContextMissing),
        };

        let caps = query.caps.as_ref().ok_or(Error::NoCaps)?;
        let info = caps.fixate().ok_or(Error::InvalidCaps)?;
        let size = info.frame_size();
        self.state = SinkState::Negotiating;

        let mut response = AllocationResponse {
            pool: None,
            buffer_size: size,
            min_buffers: 0,
            max_buffers: 0,
            metadata: SmallVec::new(),
        };

        if query.wants_pool {
            let queue_depth =
                (info.memory == MemoryLayout::QueueBuffer).then_some(self.config.queue_depth);
            let lease = self
                .pools
                .negotiate(caps, size, DEFAULT_MIN_BUFFERS, 0, queue_depth)?;
            response.min_buffers = lease.min_buffers;
            response.max_buffers = lease.max_buffers;
            response.pool = Some(lease.pool);
        }

        let surface = self.surface.read();
        if surface.is_valid() {
            tracing::debug!(
                width = surface.width,
                height = surface.height,
                "answering allocation query with overlay size"
            );
            response.metadata.push(MetaMarker::OverlaySize {
                width: surface.width,
                height: surface.height,
            });
        }

        response.metadata.push(MetaMarker::FrameRegion);

        if supports_sync {
            response.metadata.push(MetaMarker::GpuSync);
        }

        Ok(response)
    }

    /// Answer a pipeline query.
    ///
    /// The display-context query is answered while the bundle is
    /// present; everything else returns [`QueryResponse::Unhandled`] so
    /// the caller can delegate to its generic fallback responder.
    pub fn query(&self, query: SinkQuery<'_>) -> QueryResponse {
        match query {
            SinkQuery::Context { kind } => {
                if kind == CONTEXT_TYPE_DISPLAY {
                    if let Some(bundle) = self.broker.bundle() {
                        return QueryResponse::Display(Arc::clone(&bundle.display));
                    }
                }
                QueryResponse::Unhandled
            }
        }
    }
}

impl Drop for WindowSink {
    fn drop(&mut self) {
        // Same teardown the destroy notification performs; idempotent
        // when stop already ran.
        if let Some(widget) = self.widget.take() {
            self.subscriptions.disconnect_all(widget.as_ref());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::{DestroyHandler, RenderContext, ResizeHandler, SubscriptionId};
    use crate::surface::SurfaceSize;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicU64, Ordering};
    use std::sync::Mutex;

    struct FakeDisplay;
    impl DisplayHandle for FakeDisplay {}

    struct FakeContext {
        fence_sync: bool,
    }
    impl RenderContext for FakeContext {
        fn supports_fence_sync(&self) -> bool {
            self.fence_sync
        }
    }

    enum Handler {
        Resize(Arc<dyn Fn(u32, u32) + Send + Sync>),
        Destroy(Arc<dyn Fn() + Send + Sync>),
    }

    /// Widget double that records subscriptions and can dispatch
    /// notifications the way a UI toolkit would.
    struct FakeWidget {
        init_ok: bool,
        provide_host: bool,
        fence_sync: bool,
        size: Mutex<SurfaceSize>,
        handlers: Mutex<HashMap<u64, Handler>>,
        next_id: AtomicU64,
    }

    impl FakeWidget {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                init_ok: true,
                provide_host: true,
                fence_sync: true,
                size: Mutex::new(SurfaceSize::default()),
                handlers: Mutex::new(HashMap::new()),
                next_id: AtomicU64::new(1),
            })
        }

        fn failing_init() -> Arc<Self> {
            Arc::new(Self {
                init_ok: false,
                ..Self::base()
            })
        }

        fn missing_host() -> Arc<Self> {
            Arc::new(Self {
                provide_host: false,
                ..Self::base()
            })
        }

        fn without_fence_sync() -> Arc<Self> {
            Arc::new(Self {
                fence_sync: false,
                ..Self::base()
            })
        }

        fn base() -> Self {
            Self {
                init_ok: true,
                provide_host: true,
                fence_sync: true,
                size: Mutex::new(SurfaceSize::default()),
                handlers: Mutex::new(HashMap::new()),
                next_id: AtomicU64::new(1),
            }
        }

        fn handler_count(&self) -> usize {
            self.handlers.lock().unwrap().len()
        }

        /// Deliver a resize notification on the "UI thread".
        fn dispatch_resize(&self, width: u32, height: u32) {
            *self.size.lock().unwrap() = SurfaceSize::new(width, height);
            let handlers: Vec<_> = self
                .handlers
                .lock()
                .unwrap()
                .values()
                .filter_map(|h| match h {
                    Handler::Resize(f) => Some(Arc::clone(f)),
                    Handler::Destroy(_) => None,
                })
                .collect();
            for handler in handlers {
                handler(width, height);
            }
        }

        /// Deliver a destroy notification.
        fn dispatch_destroy(&self) {
            let handlers: Vec<_> = self
                .handlers
                .lock()
                .unwrap()
                .values()
                .filter_map(|h| match h {
                    Handler::Destroy(f) => Some(Arc::clone(f)),
                    Handler::Resize(_) => None,
                })
                .collect();
            for handler in handlers {
                handler();
            }
        }
    }

    impl VideoSurface for FakeWidget {
        fn init_winsys(&self) -> bool {
            self.init_ok
        }

        fn display(&self) -> Option<Arc<dyn DisplayHandle>> {
            Some(Arc::new(FakeDisplay))
        }

        fn render_context(&self) -> Option<Arc<dyn RenderContext>> {
            Some(Arc::new(FakeContext {
                fence_sync: self.fence_sync,
            }))
        }

        fn host_context(&self) -> Option<Arc<dyn RenderContext>> {
            self.provide_host.then(|| {
                Arc::new(FakeContext {
                    fence_sync: self.fence_sync,
                }) as Arc<dyn RenderContext>
            })
        }

        fn current_size(&self) -> SurfaceSize {
            *self.size.lock().unwrap()
        }

        fn connect_resize(&self, handler: ResizeHandler) -> SubscriptionId {
            let id = self.next_id.fetch_add(1, Ordering::Relaxed);
            self.handlers
                .lock()
                .unwrap()
                .insert(id, Handler::Resize(Arc::from(handler)));
            SubscriptionId(id)
        }

        fn connect_destroy(&self, handler: DestroyHandler) -> SubscriptionId {
            let id = self.next_id.fetch_add(1, Ordering::Relaxed);
            self.handlers
                .lock()
                .unwrap()
                .insert(id, Handler::Destroy(Arc::from(handler)));
            SubscriptionId(id)
        }

        fn disconnect(&self, id: SubscriptionId) {
            self.handlers.lock().unwrap().remove(&id.0);
        }
    }

    fn rgba_caps(width: u32, height: u32) -> CapabilitySet {
        CapabilitySet::single(FrameCaps::concrete(
            PixelFormat::Rgba,
            width,
            height,
            MemoryLayout::System,
        ))
    }

    #[test]
    fn test_start_acquires_context_and_subscribes() {
        let (mut sink, _rx) = WindowSink::new(WindowSinkConfig::default());
        assert_eq!(sink.state(), SinkState::Stopped);

        let widget = FakeWidget::new();
        sink.start(Arc::clone(&widget) as Arc<dyn VideoSurface>).unwrap();

        assert_eq!(sink.state(), SinkState::ContextAcquired);
        assert_eq!(sink.name(), "window_sink");
        assert_eq!(widget.handler_count(), 2);
        assert!(sink.shared_display().get().is_some());
    }

    #[test]
    fn test_start_failure_unwinds_subscriptions() {
        let (mut sink, _rx) = WindowSink::new(WindowSinkConfig::default());
        let widget = FakeWidget::failing_init();

        let err = sink
            .start(Arc::clone(&widget) as Arc<dyn VideoSurface>)
            .unwrap_err();
        assert!(matches!(err, Error::ContextInitFailed));
        assert_eq!(sink.state(), SinkState::Stopped);
        assert_eq!(widget.handler_count(), 0);
        assert!(sink.shared_display().get().is_none());
    }

    #[test]
    fn test_start_with_missing_host_context() {
        let (mut sink, _rx) = WindowSink::new(WindowSinkConfig::default());
        let widget = FakeWidget::missing_host();

        let err = sink
            .start(Arc::clone(&widget) as Arc<dyn VideoSurface>)
            .unwrap_err();
        assert!(matches!(err, Error::ContextMissing));
        assert_eq!(sink.state(), SinkState::Stopped);
        // A stop on the failed sink is a safe no-op.
        sink.stop();
        assert_eq!(sink.state(), SinkState::Stopped);
    }

    #[test]
    fn test_start_primes_surface_size() {
        let (mut sink, rx) = WindowSink::new(WindowSinkConfig::default());
        let widget = FakeWidget::new();
        *widget.size.lock().unwrap() = SurfaceSize::new(640, 480);

        sink.start(Arc::clone(&widget) as Arc<dyn VideoSurface>).unwrap();

        // No notification was dispatched, yet the size is populated.
        assert_eq!(sink.surface_size(), SurfaceSize::new(640, 480));
        assert!(rx.pending());
    }

    #[test]
    fn test_stop_tears_down_and_is_repeatable() {
        let (mut sink, _rx) = WindowSink::new(WindowSinkConfig::default());
        let widget = FakeWidget::new();
        sink.start(Arc::clone(&widget) as Arc<dyn VideoSurface>).unwrap();

        sink.stop();
        assert_eq!(sink.state(), SinkState::Stopped);
        assert_eq!(widget.handler_count(), 0);
        assert!(sink.shared_display().get().is_none());

        sink.stop();
        assert_eq!(sink.state(), SinkState::Stopped);
    }

    #[test]
    fn test_destroy_notification_disconnects_handlers() {
        let (mut sink, _rx) = WindowSink::new(WindowSinkConfig::default());
        let widget = FakeWidget::new();
        sink.start(Arc::clone(&widget) as Arc<dyn VideoSurface>).unwrap();
        assert_eq!(widget.handler_count(), 2);

        widget.dispatch_destroy();
        assert_eq!(widget.handler_count(), 0);

        // Stop afterwards finds the sentinels and does nothing extra.
        sink.stop();
        assert_eq!(widget.handler_count(), 0);
    }

    #[test]
    fn test_context_query() {
        let (mut sink, _rx) = WindowSink::new(WindowSinkConfig::default());

        // Before start, the query is delegated.
        assert!(matches!(
            sink.query(SinkQuery::Context {
                kind: CONTEXT_TYPE_DISPLAY
            }),
            QueryResponse::Unhandled
        ));

        let widget = FakeWidget::new();
        sink.start(Arc::clone(&widget) as Arc<dyn VideoSurface>).unwrap();

        match sink.query(SinkQuery::Context {
            kind: CONTEXT_TYPE_DISPLAY,
        }) {
            QueryResponse::Display(display) => {
                let published = sink.shared_display().get().unwrap();
                assert!(Arc::ptr_eq(&display, &published));
            }
            QueryResponse::Unhandled => panic!("expected display handle"),
        }

        // Unknown context kinds are delegated.
        assert!(matches!(
            sink.query(SinkQuery::Context { kind: "clock" }),
            QueryResponse::Unhandled
        ));
    }

    #[test]
    fn test_allocation_refused_without_context() {
        let (mut sink, _rx) = WindowSink::new(WindowSinkConfig::default());
        let err = sink
            .propose_allocation(&AllocationQuery::with_pool(rgba_caps(800, 600)))
            .unwrap_err();
        assert!(matches!(err, Error::ContextMissing));
    }

    #[test]
    fn test_allocation_error_taxonomy() {
        let (mut sink, _rx) = WindowSink::new(WindowSinkConfig::default());
        sink.start(FakeWidget::new() as Arc<dyn VideoSurface>).unwrap();

        let no_caps = AllocationQuery {
            caps: None,
            wants_pool: true,
        };
        assert!(matches!(
            sink.propose_allocation(&no_caps),
            Err(Error::NoCaps)
        ));

        let unfixed = AllocationQuery::with_pool(CapabilitySet::single(FrameCaps::any(
            MemoryLayout::System,
        )));
        assert!(matches!(
            sink.propose_allocation(&unfixed),
            Err(Error::InvalidCaps)
        ));
    }

    #[test]
    fn test_allocation_defaults_and_metadata() {
        let (mut sink, _rx) = WindowSink::new(WindowSinkConfig::default());
        let widget = FakeWidget::new();
        sink.start(Arc::clone(&widget) as Arc<dyn VideoSurface>).unwrap();
        widget.dispatch_resize(800, 600);

        let response = sink
            .propose_allocation(&AllocationQuery::with_pool(rgba_caps(800, 600)))
            .unwrap();

        assert_eq!(response.buffer_size, 800 * 600 * 4);
        assert_eq!(response.min_buffers, 2);
        assert_eq!(response.max_buffers, 0);
        assert!(response.pool.is_some());
        assert_eq!(response.overlay_size(), Some((800, 600)));
        assert!(response.supports(MetaMarker::FrameRegion));
        assert!(response.supports(MetaMarker::GpuSync));
        assert_eq!(sink.state(), SinkState::Negotiating);
    }

    #[test]
    fn test_allocation_omits_overlay_size_at_zero() {
        let (mut sink, _rx) = WindowSink::new(WindowSinkConfig::default());
        sink.start(FakeWidget::new() as Arc<dyn VideoSurface>).unwrap();

        let response = sink
            .propose_allocation(&AllocationQuery::with_pool(rgba_caps(320, 240)))
            .unwrap();
        assert_eq!(response.overlay_size(), None);
        assert!(response.supports(MetaMarker::FrameRegion));
    }

    #[test]
    fn test_allocation_without_fence_sync_capability() {
        let (mut sink, _rx) = WindowSink::new(WindowSinkConfig::default());
        sink.start(FakeWidget::without_fence_sync() as Arc<dyn VideoSurface>)
            .unwrap();

        // Absence of the capability is not an error; the marker is
        // simply omitted.
        let response = sink
            .propose_allocation(&AllocationQuery::with_pool(rgba_caps(320, 240)))
            .unwrap();
        assert!(!response.supports(MetaMarker::GpuSync));
    }

    #[test]
    fn test_allocation_queue_layout_overrides_counts() {
        let (mut sink, _rx) =
            WindowSink::new(WindowSinkConfig::default().with_queue_depth(4));
        sink.start(FakeWidget::new() as Arc<dyn VideoSurface>).unwrap();

        let caps = CapabilitySet::single(FrameCaps::concrete(
            PixelFormat::Encoded,
            1280,
            720,
            MemoryLayout::QueueBuffer,
        ));
        let response = sink
            .propose_allocation(&AllocationQuery::with_pool(caps))
            .unwrap();

        assert_eq!(response.min_buffers, 0);
        assert_eq!(response.max_buffers, 4);
        // Encoded frames report the contractual placeholder size.
        assert_eq!(response.buffer_size, 1);
    }

    #[test]
    fn test_allocation_without_pool_request() {
        let (mut sink, _rx) = WindowSink::new(WindowSinkConfig::default());
        sink.start(FakeWidget::new() as Arc<dyn VideoSurface>).unwrap();

        let response = sink
            .propose_allocation(&AllocationQuery::without_pool(rgba_caps(800, 600)))
            .unwrap();
        assert!(response.pool.is_none());
        assert_eq!(response.buffer_size, 800 * 600 * 4);
        assert!(sink.pool().is_none());
    }

    #[test]
    fn test_caps_filter_and_compositor() {
        struct AddVariant;
        impl OverlayCompositor for AddVariant {
            fn augment_caps(&self, mut caps: CapabilitySet) -> CapabilitySet {
                caps.push(FrameCaps::concrete(
                    PixelFormat::Rgba,
                    0,
                    0,
                    MemoryLayout::System,
                ));
                caps
            }
        }

        let (sink, _rx) = WindowSink::new(WindowSinkConfig::default());
        let declared = sink.caps(None);
        assert_eq!(declared.len(), 3);
        assert_eq!(declared.entries()[0].memory, MemoryLayout::SingleBuffer);

        // Filtering keeps declared ordering and drops non-intersecting
        // layouts.
        let filter = CapabilitySet::single(FrameCaps {
            pixel: CapsValue::Fixed(PixelFormat::Rgba),
            ..FrameCaps::any(MemoryLayout::System)
        });
        let filtered = sink.caps(Some(&filter));
        assert_eq!(filtered.len(), 1);
        assert_eq!(filtered.entries()[0].memory, MemoryLayout::System);
        assert_eq!(
            filtered.entries()[0].pixel,
            CapsValue::Fixed(PixelFormat::Rgba)
        );

        let (sink, _rx) = WindowSink::new(WindowSinkConfig::default());
        let sink = sink.with_compositor(Arc::new(AddVariant));
        let augmented = sink.caps(Some(&filter));
        assert_eq!(augmented.len(), 2);
    }

    #[test]
    fn test_resize_after_start_signals_once_per_change() {
        let (mut sink, rx) = WindowSink::new(WindowSinkConfig::default());
        let widget = FakeWidget::new();
        sink.start(Arc::clone(&widget) as Arc<dyn VideoSurface>).unwrap();

        // Widget came up at 0x0: the eager probe emitted nothing.
        assert!(!rx.pending());

        widget.dispatch_resize(800, 600);
        assert!(rx.pending());
        assert!(!rx.pending());

        // Same size again: no further signal.
        widget.dispatch_resize(800, 600);
        assert!(!rx.pending());
    }

    #[test]
    fn test_drop_disconnects_subscriptions() {
        let widget = FakeWidget::new();
        {
            let (mut sink, _rx) = WindowSink::new(WindowSinkConfig::default());
            sink.start(Arc::clone(&widget) as Arc<dyn VideoSurface>).unwrap();
            assert_eq!(widget.handler_count(), 2);
        }
        assert_eq!(widget.handler_count(), 0);
    }
}
