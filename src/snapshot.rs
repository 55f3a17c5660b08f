//! Event loop of the `snapshot` harness.
//!
//! Drives a [`SimulatedCamera`] from preview to a single still capture:
//!
//! | Event            | Action                                        |
//! |------------------|-----------------------------------------------|
//! | `PreviewStarted` | start autofocus, or capture if it is disabled |
//! | `AutoFocused`    | capture                                       |
//! | `ImageCaptured`  | finish with the image                         |
//! | `Abort`          | finish without an image                       |
//! | `Error`          | fail                                          |

use crate::camera::{CameraError, SimulatedCamera};
use crate::events::{CameraEvent, EventReceiver};
use bytes::Bytes;
use std::path::Path;
use thiserror::Error;
use tracing::{debug, info};

/// How the event loop ended without failing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SnapshotOutcome {
    /// The picture's bytes.
    Captured(Bytes),
    /// Stopped by `Abort` before a picture arrived.
    Aborted,
}

/// Failure of the capture sequence.
#[derive(Error, Debug)]
pub enum SnapshotError {
    /// The camera fired an `Error` event.
    #[error("Camera reported an error: {0}")]
    Camera(String),

    /// The camera refused a request.
    #[error(transparent)]
    Request(#[from] CameraError),

    /// Every event sender was dropped.
    #[error("Camera event channel closed")]
    ChannelClosed,

    /// Saving the picture failed.
    #[error("Failed to write {path}: {source}")]
    Output {
        /// Destination file.
        path: String,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },
}

/// Runs the capture sequence until an image arrives, an abort, or an error.
///
/// # Errors
///
/// `Camera` on an `Error` event, `Request` if the camera refuses a request,
/// `ChannelClosed` if every sender is gone.
pub async fn run_event_loop(
    camera: &SimulatedCamera,
    events: &mut EventReceiver,
    autofocus: bool,
) -> Result<SnapshotOutcome, SnapshotError> {
    debug!("----- Entering event loop -----");
    let outcome = loop {
        let Some(event) = events.recv().await else {
            return Err(SnapshotError::ChannelClosed);
        };
        debug!(event = event.name(), "Got event");

        match event {
            CameraEvent::PreviewStarted if autofocus => {
                info!("Starting autofocus...");
                camera.auto_focus()?;
            }
            CameraEvent::PreviewStarted | CameraEvent::AutoFocused => {
                info!("Taking picture...");
                camera.take_picture()?;
            }
            CameraEvent::ImageCaptured(image) => {
                info!(bytes = image.len(), "Image captured");
                break SnapshotOutcome::Captured(image);
            }
            CameraEvent::Abort => break SnapshotOutcome::Aborted,
            CameraEvent::Error(message) => return Err(SnapshotError::Camera(message)),
        }
    };
    debug!("----- Leaving event loop -----");
    Ok(outcome)
}

/// Writes a captured image, creating parent directories as needed.
///
/// # Errors
///
/// `Output` on any filesystem failure.
pub async fn save_image(path: &Path, image: &[u8]) -> Result<(), SnapshotError> {
    let wrap = |source| SnapshotError::Output {
        path: path.display().to_string(),
        source,
    };

    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent).await.map_err(wrap)?;
    }
    tokio::fs::write(path, image).await.map_err(wrap)?;
    info!(path = %path.display(), bytes = image.len(), "Saved picture");
    Ok(())
}
