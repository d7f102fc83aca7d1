//! Surface size tracking and the upstream reconfigure signal.
//!
//! The host widget delivers resize notifications on its own UI thread
//! while the pipeline thread reads the current size during allocation
//! queries. [`SurfaceTracker`] holds the size behind a dedicated mutex
//! and emits a one-way [`reconfigure`](ReconfigureSender) signal when,
//! and only when, the size actually changed.

use std::sync::Mutex;

/// On-screen surface dimensions in device pixels (scale factor already
/// applied by the notifier).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub struct SurfaceSize {
    /// Width in device pixels.
    pub width: u32,
    /// Height in device pixels.
    pub height: u32,
}

impl SurfaceSize {
    /// Create a new surface size.
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    /// Check if both dimensions are non-zero.
    #[inline]
    pub const fn is_valid(&self) -> bool {
        self.width != 0 && self.height != 0
    }
}

/// Create a reconfigure signal pair.
///
/// The sender side lives in the sink; the receiver side is handed to
/// whoever drives the producer so it can re-run negotiation. The channel
/// has capacity 1 and the send never blocks: repeated requests before the
/// receiver drains coalesce into one.
pub fn reconfigure_channel() -> (ReconfigureSender, ReconfigureReceiver) {
    let (tx, rx) = kanal::bounded(1);
    (ReconfigureSender { inner: tx }, ReconfigureReceiver { inner: rx })
}

/// Sender half of the reconfigure signal.
#[derive(Clone)]
pub struct ReconfigureSender {
    inner: kanal::Sender<()>,
}

impl ReconfigureSender {
    /// Request renegotiation.
    ///
    /// One-way and non-blocking: a request that cannot be delivered
    /// (already pending, or the receiver is gone) is dropped.
    pub fn request(&self) {
        let _ = self.inner.try_send(());
    }
}

/// Receiver half of the reconfigure signal.
pub struct ReconfigureReceiver {
    inner: kanal::Receiver<()>,
}

impl ReconfigureReceiver {
    /// Take a pending reconfigure request, if any.
    pub fn pending(&self) -> bool {
        matches!(self.inner.try_recv(), Ok(Some(())))
    }
}

/// Thread-safe holder of the current surface size.
///
/// Writes come from the UI-event thread (resize notifications), reads
/// from the pipeline thread (allocation queries). The mutex guards only
/// the compare-and-store; the reconfigure signal is sent after the lock
/// is released so a handler looping back into the sink cannot deadlock.
pub struct SurfaceTracker {
    size: Mutex<SurfaceSize>,
    reconfigure: ReconfigureSender,
}

impl SurfaceTracker {
    /// Create a tracker starting at 0x0.
    pub fn new(reconfigure: ReconfigureSender) -> Self {
        Self {
            size: Mutex::new(SurfaceSize::default()),
            reconfigure,
        }
    }

    /// Apply a resize notification.
    ///
    /// Stores the new dimensions and requests renegotiation if they
    /// differ from the stored ones. Repeated notifications with an
    /// unchanged size emit nothing, so notification storms from the host
    /// widget do not turn into renegotiation storms.
    pub fn on_resize(&self, width: u32, height: u32) {
        let new = SurfaceSize::new(width, height);
        let changed = {
            let mut size = self.size.lock().unwrap();
            let changed = *size != new;
            *size = new;
            changed
        };

        if changed {
            tracing::debug!(width, height, "surface size changed, requesting reconfigure");
            self.reconfigure.request();
        }
    }

    /// Snapshot of the current size, callable from any thread.
    pub fn read(&self) -> SurfaceSize {
        *self.size.lock().unwrap()
    }
}
