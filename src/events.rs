//! Camera notifications delivered to the `snapshot` event loop.
//!
//! The camera fires events from its own threads; the harness consumes them on
//! the async side. An unbounded `tokio::sync::mpsc` channel bridges the two so
//! a preview thread never blocks on a slow consumer.

use bytes::Bytes;
use tokio::sync::mpsc;
use tracing::{debug, trace};

/// Notification from the camera to whoever drives it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CameraEvent {
    /// The first preview frame was queued.
    PreviewStarted,
    /// Autofocus converged.
    AutoFocused,
    /// Still capture finished; carries the frame bytes.
    ImageCaptured(Bytes),
    /// The user asked to stop.
    Abort,
    /// The camera hit an unrecoverable error.
    Error(String),
}

impl CameraEvent {
    /// Short name for logs.
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            CameraEvent::PreviewStarted => "preview_started",
            CameraEvent::AutoFocused => "auto_focused",
            CameraEvent::ImageCaptured(_) => "image_captured",
            CameraEvent::Abort => "abort",
            CameraEvent::Error(_) => "error",
        }
    }
}

/// Receiving half handed to the event loop.
pub type EventReceiver = mpsc::UnboundedReceiver<CameraEvent>;

/// Sending half; cheap to clone into camera threads.
#[derive(Debug, Clone)]
pub struct EventSink {
    tx: mpsc::UnboundedSender<CameraEvent>,
}

impl EventSink {
    /// Delivers `event`. Dropped silently once the receiver is gone.
    pub fn fire(&self, event: CameraEvent) {
        debug!(event = event.name(), "fire event");
        if self.tx.send(event).is_err() {
            trace!("event receiver closed");
        }
    }

    /// True once the receiving side has been dropped.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// Creates a connected sink/receiver pair.
#[must_use]
pub fn channel() -> (EventSink, EventReceiver) {
    let (tx, rx) = mpsc::unbounded_channel();
    (EventSink { tx }, rx)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_events_arrive_in_order() {
        let (sink, mut rx) = channel();
        sink.fire(CameraEvent::PreviewStarted);
        sink.fire(CameraEvent::ImageCaptured(Bytes::from_static(b"abc")));

        assert_eq!(rx.recv().await, Some(CameraEvent::PreviewStarted));
        assert_eq!(
            rx.recv().await,
            Some(CameraEvent::ImageCaptured(Bytes::from_static(b"abc")))
        );
    }

    #[test]
    fn test_fire_after_receiver_dropped() {
        let (sink, rx) = channel();
        drop(rx);
        assert!(sink.is_closed());
        sink.fire(CameraEvent::Abort);
    }
}
