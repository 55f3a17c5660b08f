//! Simulated camera producer.
//!
//! Stands in for a camera HAL: once a preview window is attached it runs a
//! preview thread that cycles buffers through the window's
//! dequeue → fill → queue handshake, and answers autofocus and still-capture
//! requests asynchronously through an [`EventSink`].

use crate::allocator::{format, BufferHandle, GraphicBuffer, HeapAllocator, HeapBuffer};
use crate::config::CameraConfig;
use crate::error::PoolError;
use crate::events::{CameraEvent, EventSink};
use crate::pool::BufferPool;
use crate::window::{NativeWindow, WindowOperation};
use bytes::Bytes;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, error, info, warn};

/// Usage bits a HAL requests for preview buffers (SW write, HW texture).
pub const PREVIEW_USAGE: u32 = 0x0000_0030 | 0x0000_0100;

/// Preview frames between progress log lines.
const FRAMES_PER_LOG: u64 = 30;

/// Preview window the simulated camera renders into.
pub type PreviewWindow = BufferPool<HeapAllocator>;

/// Preview sizes the simulated sensor advertises.
pub const SUPPORTED_PREVIEW_SIZES: &[(i32, i32)] =
    &[(176, 144), (320, 240), (640, 480), (1280, 720)];
/// Preview formats the simulated sensor advertises.
pub const SUPPORTED_PREVIEW_FORMATS: &[u32] =
    &[format::YCRCB_420_SP, format::YV12, format::RGB_565];
/// Color effects.
pub const SUPPORTED_EFFECTS: &[&str] = &["none", "mono", "negative", "sepia"];
/// Flash modes.
pub const SUPPORTED_FLASH_MODES: &[&str] = &["off", "auto", "on", "torch"];
/// Focus modes.
pub const SUPPORTED_FOCUS_MODES: &[&str] = &["auto", "fixed"];

/// Failure of a camera request.
#[derive(Error, Debug)]
pub enum CameraError {
    /// The preview window rejected an operation.
    #[error("Preview window error: {0}")]
    Window(#[from] PoolError),

    /// `start_preview` called twice.
    #[error("Preview is already running")]
    PreviewRunning,

    /// Request needs a running preview.
    #[error("Preview is not running")]
    PreviewStopped,

    /// Worker thread could not be started.
    #[error("Failed to spawn camera thread: {0}")]
    Spawn(#[from] std::io::Error),
}

/// Result alias for camera requests.
pub type CameraResult<T> = Result<T, CameraError>;

/// Current camera settings, as reported by the parameter dump.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CameraParameters {
    /// Preview width in pixels.
    pub preview_width: i32,
    /// Preview height in pixels.
    pub preview_height: i32,
    /// Preview HAL pixel format.
    pub preview_format: i32,
    /// Color effect name.
    pub effect: String,
    /// Flash mode name.
    pub flash_mode: String,
    /// `auto` when autofocus runs before capture, else `fixed`.
    pub focus_mode: &'static str,
}

impl CameraParameters {
    /// Parameters selected by `config`.
    #[must_use]
    pub fn from_config(config: &CameraConfig) -> Self {
        Self {
            preview_width: config.preview_width,
            preview_height: config.preview_height,
            preview_format: config.preview_format,
            effect: config.effect.clone(),
            flash_mode: config.flash_mode.clone(),
            focus_mode: if config.autofocus { "auto" } else { "fixed" },
        }
    }

    /// Logs what the simulated sensor supports.
    pub fn log_supported() {
        let sizes: Vec<String> = SUPPORTED_PREVIEW_SIZES
            .iter()
            .map(|(w, h)| format!("{w}x{h}"))
            .collect();
        let formats: Vec<String> = SUPPORTED_PREVIEW_FORMATS
            .iter()
            .map(|f| format!("{f:#x}"))
            .collect();
        info!(
            preview_sizes = %sizes.join(","),
            preview_formats = %formats.join(","),
            effects = %SUPPORTED_EFFECTS.join(","),
            flash_modes = %SUPPORTED_FLASH_MODES.join(","),
            focus_modes = %SUPPORTED_FOCUS_MODES.join(","),
            "Supported camera parameters"
        );
    }

    /// Names of settings outside the supported sets.
    ///
    /// The simulation still honors them; callers only warn.
    #[must_use]
    pub fn unsupported(&self) -> Vec<&'static str> {
        let mut out = Vec::new();
        if !SUPPORTED_PREVIEW_SIZES.contains(&(self.preview_width, self.preview_height)) {
            out.push("preview_size");
        }
        let format_known = u32::try_from(self.preview_format)
            .is_ok_and(|f| SUPPORTED_PREVIEW_FORMATS.contains(&f));
        if !format_known {
            out.push("preview_format");
        }
        if !SUPPORTED_EFFECTS.contains(&self.effect.as_str()) {
            out.push("effect");
        }
        if !SUPPORTED_FLASH_MODES.contains(&self.flash_mode.as_str()) {
            out.push("flash_mode");
        }
        out
    }

    /// Logs the current parameters at info level.
    pub fn log_current(&self) {
        info!(
            preview_size = %format_args!("{}x{}", self.preview_width, self.preview_height),
            preview_format = %format_args!("{:#x}", self.preview_format),
            effect = %self.effect,
            flash_mode = %self.flash_mode,
            focus_mode = self.focus_mode,
            "Current camera parameters"
        );
        for name in self.unsupported() {
            warn!(parameter = name, "Camera parameter outside supported set");
        }
    }
}

/// Camera HAL simulation driving a [`PreviewWindow`].
pub struct SimulatedCamera {
    window: Arc<PreviewWindow>,
    events: EventSink,
    params: CameraParameters,
    frame_interval: Duration,
    autofocus_fails: bool,
    running: Arc<AtomicBool>,
    preview: Option<JoinHandle<()>>,
}

impl SimulatedCamera {
    /// Attaches `window` as the preview window and configures it for preview.
    ///
    /// # Errors
    ///
    /// Returns `Window` if the window rejects the preview geometry.
    pub fn new(
        window: Arc<PreviewWindow>,
        events: EventSink,
        config: &CameraConfig,
    ) -> CameraResult<Self> {
        let params = CameraParameters::from_config(config);

        window.perform(WindowOperation::Connect)?;
        window.perform(WindowOperation::SetUsage(PREVIEW_USAGE))?;
        window.perform(WindowOperation::SetBuffersGeometry {
            width: params.preview_width,
            height: params.preview_height,
            format: params.preview_format,
        })?;
        window.set_swap_interval(0);

        Ok(Self {
            window,
            events,
            params,
            frame_interval: Duration::from_millis(config.frame_interval_ms),
            autofocus_fails: config.autofocus_fails,
            running: Arc::new(AtomicBool::new(false)),
            preview: None,
        })
    }

    /// Parameters in effect.
    #[must_use]
    pub fn parameters(&self) -> &CameraParameters {
        &self.params
    }

    /// The attached preview window.
    #[must_use]
    pub fn window(&self) -> &Arc<PreviewWindow> {
        &self.window
    }

    /// True between `start_preview` and `stop_preview`, or until the preview fails.
    #[must_use]
    pub fn is_previewing(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Starts the preview thread.
    ///
    /// `PreviewStarted` fires once the first frame has been queued.
    ///
    /// # Errors
    ///
    /// `PreviewRunning` if already started, `Spawn` if the thread cannot start.
    pub fn start_preview(&mut self) -> CameraResult<()> {
        if self.running.swap(true, Ordering::SeqCst) {
            return Err(CameraError::PreviewRunning);
        }

        let window = Arc::clone(&self.window);
        let events = self.events.clone();
        let running = Arc::clone(&self.running);
        let interval = self.frame_interval;

        let spawned = std::thread::Builder::new()
            .name("camera-preview".into())
            .spawn(move || preview_loop(&window, &events, &running, interval));

        match spawned {
            Ok(handle) => {
                self.preview = Some(handle);
                info!("Preview started");
                Ok(())
            }
            Err(err) => {
                self.running.store(false, Ordering::SeqCst);
                Err(err.into())
            }
        }
    }

    /// Stops the preview thread and waits for it to exit. Idempotent.
    pub fn stop_preview(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        if let Some(handle) = self.preview.take() {
            if handle.join().is_err() {
                error!("Preview thread panicked");
            }
            info!("Preview stopped");
        }
    }

    /// Starts autofocus; completion arrives as `AutoFocused` or `Error`.
    ///
    /// # Errors
    ///
    /// `PreviewStopped` unless preview is running.
    pub fn auto_focus(&self) -> CameraResult<()> {
        if !self.is_previewing() {
            return Err(CameraError::PreviewStopped);
        }

        let events = self.events.clone();
        let fails = self.autofocus_fails;
        let settle = self.frame_interval * 2;

        std::thread::Builder::new()
            .name("camera-autofocus".into())
            .spawn(move || {
                std::thread::sleep(settle);
                if fails {
                    warn!("Autofocus failed");
                    events.fire(CameraEvent::Error("autofocus failed".to_string()));
                } else {
                    debug!("Autofocus complete");
                    events.fire(CameraEvent::AutoFocused);
                }
            })?;
        Ok(())
    }

    /// Captures one frame; completion arrives as `ImageCaptured` or `Error`.
    ///
    /// The capture borrows a buffer from the preview window alongside the
    /// preview thread and returns it unpublished.
    ///
    /// # Errors
    ///
    /// `PreviewStopped` unless preview is running.
    pub fn take_picture(&self) -> CameraResult<()> {
        if !self.is_previewing() {
            return Err(CameraError::PreviewStopped);
        }

        let window = Arc::clone(&self.window);
        let events = self.events.clone();

        std::thread::Builder::new()
            .name("camera-capture".into())
            .spawn(move || match capture_frame(&window) {
                Ok(image) => {
                    info!(bytes = image.len(), "Picture taken");
                    events.fire(CameraEvent::ImageCaptured(image));
                }
                Err(err) => {
                    error!(%err, "Capture failed");
                    events.fire(CameraEvent::Error(err.to_string()));
                }
            })?;
        Ok(())
    }
}

impl Drop for SimulatedCamera {
    fn drop(&mut self) {
        self.stop_preview();
        if let Err(err) = self.window.perform(WindowOperation::Disconnect) {
            warn!(%err, "Failed to disconnect preview window");
        }
    }
}

fn preview_loop(window: &PreviewWindow, events: &EventSink, running: &AtomicBool, interval: Duration) {
    let mut frames: u64 = 0;

    while running.load(Ordering::SeqCst) {
        if let Err(err) = render_frame(window, frames) {
            error!(%err, frame = frames, "Preview frame failed");
            events.fire(CameraEvent::Error(err.to_string()));
            running.store(false, Ordering::SeqCst);
            break;
        }

        frames += 1;
        if frames == 1 {
            events.fire(CameraEvent::PreviewStarted);
        }
        if frames % FRAMES_PER_LOG == 0 {
            debug!(frames, "Got {FRAMES_PER_LOG} preview frames");
        }

        std::thread::sleep(interval);
    }
}

fn render_frame(window: &PreviewWindow, frame: u64) -> Result<(), PoolError> {
    let dequeued = window.dequeue_buffer()?;
    let handle = dequeued.handle;

    if let Err(err) = window.with_buffer_mut(&handle, |buf| fill_test_pattern(buf, frame)) {
        cancel_quietly(window, &handle);
        return Err(err);
    }
    window.queue_buffer(&handle)
}

fn capture_frame(window: &PreviewWindow) -> Result<Bytes, PoolError> {
    let dequeued = window.dequeue_buffer()?;
    let handle = dequeued.handle;
    window.lock_buffer(&handle)?;

    let image = window.with_buffer_mut(&handle, |buf| Bytes::copy_from_slice(buf.pixels()));
    cancel_quietly(window, &handle);
    image
}

fn cancel_quietly(window: &PreviewWindow, handle: &BufferHandle) {
    if let Err(err) = window.cancel_buffer(handle) {
        warn!(%err, id = %handle.id, "cancel_buffer failed");
    }
}

/// Diagonal gradient that scrolls one step per frame.
fn fill_test_pattern(buf: &mut HeapBuffer, frame: u64) {
    let stride = buf.handle().stride.max(1) as usize;
    for (i, px) in buf.pixels_mut().iter_mut().enumerate() {
        let (row, col) = (i / stride, i % stride);
        *px = (row + col).wrapping_add(frame as usize) as u8;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::{self, EventReceiver};
    use crate::pool::QueryKey;
    use std::time::Duration;
    use tokio::time::timeout;
    use tracing_test::traced_test;

    fn camera_config() -> CameraConfig {
        CameraConfig {
            preview_width: 16,
            preview_height: 8,
            preview_format: crate::allocator::format::RGB_565 as i32,
            frame_interval_ms: 1,
            ..CameraConfig::default()
        }
    }

    fn camera(config: &CameraConfig) -> (SimulatedCamera, EventReceiver) {
        let window = Arc::new(BufferPool::new(HeapAllocator::new()));
        let (sink, rx) = events::channel();
        (SimulatedCamera::new(window, sink, config).unwrap(), rx)
    }

    async fn next_event(rx: &mut EventReceiver) -> CameraEvent {
        timeout(Duration::from_secs(5), rx.recv())
            .await
            .expect("timed out waiting for camera event")
            .expect("event channel closed")
    }

    #[test]
    fn test_attach_configures_window() {
        let (camera, _rx) = camera(&camera_config());
        let window = camera.window();
        assert_eq!(window.query(QueryKey::Width), 16);
        assert_eq!(window.query(QueryKey::Height), 8);
        assert_eq!(window.query(QueryKey::Format), 4);
        assert_eq!(camera.parameters().focus_mode, "auto");
    }

    #[test]
    #[traced_test]
    fn test_parameter_dump_lists_supported_and_current() {
        CameraParameters::log_supported();
        assert!(logs_contain("Supported camera parameters"));
        assert!(logs_contain("640x480"));
        assert!(logs_contain("sepia"));

        let params = CameraParameters::from_config(&CameraConfig {
            effect: "posterize".to_string(),
            ..CameraConfig::default()
        });
        assert_eq!(params.unsupported(), vec!["effect"]);
        params.log_current();
        assert!(logs_contain("Current camera parameters"));
        assert!(logs_contain("Camera parameter outside supported set"));
    }

    #[test]
    fn test_rejects_bad_preview_geometry() {
        let config = CameraConfig {
            preview_width: 0,
            ..camera_config()
        };
        let window = Arc::new(BufferPool::new(HeapAllocator::new()));
        let (sink, _rx) = events::channel();
        let err = SimulatedCamera::new(window, sink, &config).err();
        assert!(matches!(err, Some(CameraError::Window(PoolError::InvalidArgument(_)))));
    }

    #[test]
    fn test_requests_need_running_preview() {
        let (camera, _rx) = camera(&camera_config());
        assert!(matches!(camera.auto_focus(), Err(CameraError::PreviewStopped)));
        assert!(matches!(camera.take_picture(), Err(CameraError::PreviewStopped)));
    }

    #[tokio::test]
    async fn test_preview_publishes_frames() {
        let (mut camera, mut rx) = camera(&camera_config());
        camera.start_preview().unwrap();
        assert!(matches!(camera.start_preview(), Err(CameraError::PreviewRunning)));

        assert_eq!(next_event(&mut rx).await, CameraEvent::PreviewStarted);
        tokio::time::sleep(Duration::from_millis(20)).await;
        camera.stop_preview();

        let stats = camera.window().stats();
        assert!(stats.frame_counter >= 1);
        assert_eq!(stats.dequeued, 0);
        assert!(!camera.is_previewing());
    }

    #[tokio::test]
    async fn test_autofocus_then_capture() {
        let (mut camera, mut rx) = camera(&camera_config());
        camera.start_preview().unwrap();
        assert_eq!(next_event(&mut rx).await, CameraEvent::PreviewStarted);

        camera.auto_focus().unwrap();
        assert_eq!(next_event(&mut rx).await, CameraEvent::AutoFocused);

        camera.take_picture().unwrap();
        match next_event(&mut rx).await {
            // 16x8 RGB_565
            CameraEvent::ImageCaptured(image) => assert_eq!(image.len(), 256),
            other => panic!("unexpected event {other:?}"),
        }
        camera.stop_preview();
        assert_eq!(camera.window().stats().dequeued, 0);
    }

    #[tokio::test]
    async fn test_autofocus_failure_reports_error() {
        let config = CameraConfig {
            autofocus_fails: true,
            ..camera_config()
        };
        let (mut camera, mut rx) = camera(&config);
        camera.start_preview().unwrap();
        assert_eq!(next_event(&mut rx).await, CameraEvent::PreviewStarted);

        camera.auto_focus().unwrap();
        assert!(matches!(next_event(&mut rx).await, CameraEvent::Error(_)));
    }

    #[test]
    fn test_test_pattern_scrolls() {
        let allocator = HeapAllocator::new();
        let spec = crate::allocator::BufferSpec {
            width: 4,
            height: 1,
            format: crate::allocator::format::RGBA_8888,
            usage: 0,
        };
        let mut buf = crate::allocator::BufferAllocator::allocate(&allocator, spec).unwrap();
        fill_test_pattern(&mut buf, 0);
        let first = buf.pixels().to_vec();
        fill_test_pattern(&mut buf, 1);
        assert_ne!(first, buf.pixels());
        assert_eq!(buf.pixels()[0], first[0].wrapping_add(1));
    }
}
