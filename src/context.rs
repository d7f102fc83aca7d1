//! Graphics context brokering between the host widget and the pipeline.
//!
//! The sink never talks to the GPU directly. The embedding widget
//! implements [`VideoSurface`] and owns the actual windowing-system
//! objects; this module brokers their lifetime: acquire all three
//! context-bundle members or none, publish the display handle for the
//! rest of the pipeline, and release everything exactly once on stop.

use crate::error::{Error, Result};
use crate::surface::SurfaceSize;
use std::sync::{Arc, Mutex};

/// Handle to the windowing system's GPU display connection.
///
/// Shared read-only across the pipeline so every element renders against
/// the same display instead of opening its own.
pub trait DisplayHandle: Send + Sync {}

/// A GPU rendering context created by the host widget.
pub trait RenderContext: Send + Sync {
    /// Whether the context's function table exposes a fence/sync
    /// capability. Absence is not an error; it only withholds the
    /// GPU-sync allocation marker.
    fn supports_fence_sync(&self) -> bool;
}

/// Handler invoked on the UI thread with the new surface size in device
/// pixels (scale factor already applied).
pub type ResizeHandler = Box<dyn Fn(u32, u32) + Send + Sync>;

/// Handler invoked on the UI thread when the widget is destroyed.
pub type DestroyHandler = Box<dyn Fn() + Send + Sync>;

/// The host surface the sink renders into.
///
/// Implemented by the embedding widget. All methods are synchronous and
/// bounded-time; notification handlers registered here are invoked on
/// the widget's UI thread.
pub trait VideoSurface: Send + Sync {
    /// Initialize the windowing-system side of the GPU context.
    ///
    /// Returns `false` when that initialization step itself fails.
    fn init_winsys(&self) -> bool;

    /// The display connection, once the windowing system is initialized.
    fn display(&self) -> Option<Arc<dyn DisplayHandle>>;

    /// The sink's rendering context.
    fn render_context(&self) -> Option<Arc<dyn RenderContext>>;

    /// The host toolkit's own context, shared with the sink's.
    fn host_context(&self) -> Option<Arc<dyn RenderContext>>;

    /// Current surface size in device pixels.
    fn current_size(&self) -> SurfaceSize;

    /// Register a resize handler; returns its subscription handle.
    fn connect_resize(&self, handler: ResizeHandler) -> SubscriptionId;

    /// Register a destroy handler; returns its subscription handle.
    fn connect_destroy(&self, handler: DestroyHandler) -> SubscriptionId;

    /// Deregister a previously registered handler.
    ///
    /// Unknown or already-disconnected handles are ignored.
    fn disconnect(&self, id: SubscriptionId);
}

/// Opaque handle for a registered notification handler, issued by the
/// widget.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct SubscriptionId(pub u64);

/// Tracks the sink's notification subscriptions.
///
/// `None` marks a slot as not registered, which makes disconnection
/// naturally idempotent: the first caller takes the handle, later
/// callers find the sentinel. Shared between the sink (stop/finalize)
/// and the destroy handler running on the UI thread.
#[derive(Default)]
pub struct SubscriptionTable {
    resize: Mutex<Option<SubscriptionId>>,
    destroy: Mutex<Option<SubscriptionId>>,
}

impl SubscriptionTable {
    /// Record the resize subscription.
    pub fn set_resize(&self, id: SubscriptionId) {
        *self.resize.lock().unwrap() = Some(id);
    }

    /// Record the destroy subscription.
    pub fn set_destroy(&self, id: SubscriptionId) {
        *self.destroy.lock().unwrap() = Some(id);
    }

    /// Disconnect both subscriptions from the widget. Idempotent.
    pub fn disconnect_all(&self, widget: &dyn VideoSurface) {
        if let Some(id) = self.resize.lock().unwrap().take() {
            widget.disconnect(id);
        }
        if let Some(id) = self.destroy.lock().unwrap().take() {
            widget.disconnect(id);
        }
    }

    /// Check whether any subscription is still registered.
    pub fn is_connected(&self) -> bool {
        self.resize.lock().unwrap().is_some() || self.destroy.lock().unwrap().is_some()
    }
}

/// The three context objects required before any GPU work can proceed.
///
/// All members are present by construction; a partially initialized
/// bundle is unrepresentable.
#[derive(Clone)]
pub struct ContextBundle {
    /// Display connection, shared with the rest of the pipeline.
    pub display: Arc<dyn DisplayHandle>,
    /// The sink's rendering context.
    pub render: Arc<dyn RenderContext>,
    /// The host toolkit's context.
    pub host: Arc<dyn RenderContext>,
}

/// Published display handle, readable by any pipeline element.
///
/// The broker publishes here on acquire and clears on release, so other
/// elements reuse the sink's GPU display instead of creating their own.
#[derive(Clone, Default)]
pub struct SharedDisplay {
    slot: Arc<Mutex<Option<Arc<dyn DisplayHandle>>>>,
}

impl SharedDisplay {
    /// Create an empty slot.
    pub fn new() -> Self {
        Self::default()
    }

    /// The published display, if any.
    pub fn get(&self) -> Option<Arc<dyn DisplayHandle>> {
        self.slot.lock().unwrap().clone()
    }

    fn publish(&self, display: Arc<dyn DisplayHandle>) {
        *self.slot.lock().unwrap() = Some(display);
    }

    fn clear(&self) {
        *self.slot.lock().unwrap() = None;
    }
}

/// Sole owner of the context bundle.
///
/// Touched only by the pipeline thread; start/stop serialization is the
/// owning pipeline's responsibility.
pub struct ContextBroker {
    bundle: Option<ContextBundle>,
    shared: SharedDisplay,
}

impl ContextBroker {
    /// Create a broker with an empty bundle.
    pub fn new(shared: SharedDisplay) -> Self {
        Self {
            bundle: None,
            shared,
        }
    }

    /// Acquire the context bundle from the widget.
    ///
    /// Fails with [`Error::ContextInitFailed`] when the widget's
    /// windowing-system initialization reports failure, and with
    /// [`Error::ContextMissing`] when any bundle member is absent
    /// afterwards. On the error paths nothing is retained: members
    /// fetched so far are released and the broker stays empty. On
    /// success the display handle is published through [`SharedDisplay`].
    pub fn acquire(&mut self, widget: &dyn VideoSurface) -> Result<&ContextBundle> {
        if !widget.init_winsys() {
            return Err(Error::ContextInitFailed);
        }

        let display = widget.display();
        let render = widget.render_context();
        let host = widget.host_context();

        let (display, render, host) = match (display, render, host) {
            (Some(d), Some(r), Some(h)) => (d, r, h),
            // Partial state is not acceptable; drop whatever was fetched.
            _ => return Err(Error::ContextMissing),
        };

        self.shared.publish(Arc::clone(&display));
        let bundle = ContextBundle {
            display,
            render,
            host,
        };
        Ok(&*self.bundle.insert(bundle))
    }

    /// Release the bundle and clear the published display.
    ///
    /// Idempotent: releasing an already-released bundle is a no-op.
    pub fn release(&mut self) {
        if self.bundle.take().is_some() {
            tracing::debug!("releasing graphics context bundle");
        }
        self.shared.clear();
    }

    /// The acquired bundle, if present.
    pub fn bundle(&self) -> Option<&ContextBundle> {
        self.bundle.as_ref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU64, Ordering};

    struct StubDisplay;
    impl DisplayHandle for StubDisplay {}

    struct StubContext;
    impl RenderContext for StubContext {
        fn supports_fence_sync(&self) -> bool {
            true
        }
    }

    /// Widget double with configurable failure points.
    struct StubWidget {
        init_ok: bool,
        has_host: bool,
        next_id: AtomicU64,
    }

    impl StubWidget {
        fn new(init_ok: bool, has_host: bool) -> Self {
            Self {
                init_ok,
                has_host,
                next_id: AtomicU64::new(1),
            }
        }
    }

    impl VideoSurface for StubWidget {
        fn init_winsys(&self) -> bool {
            self.init_ok
        }

        fn display(&self) -> Option<Arc<dyn DisplayHandle>> {
            Some(Arc::new(StubDisplay))
        }

        fn render_context(&self) -> Option<Arc<dyn RenderContext>> {
            Some(Arc::new(StubContext))
        }

        fn host_context(&self) -> Option<Arc<dyn RenderContext>> {
            self.has_host.then(|| Arc::new(StubContext) as Arc<dyn RenderContext>)
        }

        fn current_size(&self) -> SurfaceSize {
            SurfaceSize::default()
        }

        fn connect_resize(&self, _handler: ResizeHandler) -> SubscriptionId {
            SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed))
        }

        fn connect_destroy(&self, _handler: DestroyHandler) -> SubscriptionId {
            SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed))
        }

        fn disconnect(&self, _id: SubscriptionId) {}
    }

    #[test]
    fn test_acquire_success_publishes_display() {
        let shared = SharedDisplay::new();
        let mut broker = ContextBroker::new(shared.clone());

        let widget = StubWidget::new(true, true);
        broker.acquire(&widget).unwrap();

        let bundle = broker.bundle().unwrap();
        assert!(bundle.render.supports_fence_sync());
        // The published display is the bundle's display.
        let published = shared.get().unwrap();
        assert!(Arc::ptr_eq(&published, &bundle.display));
    }

    #[test]
    fn test_acquire_init_failure() {
        let mut broker = ContextBroker::new(SharedDisplay::new());
        let widget = StubWidget::new(false, true);

        assert!(matches!(
            broker.acquire(&widget),
            Err(Error::ContextInitFailed)
        ));
        assert!(broker.bundle().is_none());
    }

    #[test]
    fn test_acquire_never_leaves_partial_bundle() {
        let shared = SharedDisplay::new();
        let mut broker = ContextBroker::new(shared.clone());
        // Host context never becomes retrievable.
        let widget = StubWidget::new(true, false);

        assert!(matches!(broker.acquire(&widget), Err(Error::ContextMissing)));
        assert!(broker.bundle().is_none());
        assert!(shared.get().is_none());

        // A release on the empty bundle is a safe no-op.
        broker.release();
        assert!(broker.bundle().is_none());
    }

    #[test]
    fn test_release_is_idempotent() {
        let shared = SharedDisplay::new();
        let mut broker = ContextBroker::new(shared.clone());
        broker.acquire(&StubWidget::new(true, true)).unwrap();

        broker.release();
        assert!(broker.bundle().is_none());
        assert!(shared.get().is_none());

        broker.release();
        assert!(broker.bundle().is_none());
    }

    #[test]
    fn test_subscription_table_idempotent_disconnect() {
        let table = SubscriptionTable::default();
        table.set_resize(SubscriptionId(1));
        table.set_destroy(SubscriptionId(2));
        assert!(table.is_connected());

        let widget = StubWidget::new(true, true);
        table.disconnect_all(&widget);
        assert!(!table.is_connected());

        // Second pass finds the sentinels and does nothing.
        table.disconnect_all(&widget);
        assert!(!table.is_connected());
    }
}
