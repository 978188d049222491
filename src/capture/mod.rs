//! Per-camera frame acquisition.
//!
//! Each `CaptureSource` owns one device and runs a dedicated background
//! loop: open the device, grab frames at the configured rate, and park the
//! most recent one in a shared single-slot buffer. Readers take a copy of
//! that slot and never touch the device.
//!
//! Device loss is recovered locally: a failed grab marks the source
//! Disconnected, releases the device handle, and retries opening on a
//! fixed backoff interval instead of every iteration. While Disconnected
//! the frame slot is empty, so `read()` reports "no signal" rather than
//! serving a frame captured before the fault.

use anyhow::Result;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicU8, Ordering};
use std::sync::{mpsc, Arc, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;

use crate::frame::Frame;

mod synthetic;
#[cfg(feature = "ingest-v4l2")]
pub mod v4l2;

pub use synthetic::SyntheticGrabber;
#[cfg(feature = "ingest-v4l2")]
pub use v4l2::V4l2Grabber;

/// Connection state of one camera, owned by its capture loop.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConnectionStatus {
    Connecting,
    Streaming,
    Disconnected,
}

impl ConnectionStatus {
    fn from_u8(value: u8) -> Self {
        match value {
            1 => ConnectionStatus::Streaming,
            2 => ConnectionStatus::Disconnected,
            _ => ConnectionStatus::Connecting,
        }
    }

    fn as_u8(self) -> u8 {
        match self {
            ConnectionStatus::Connecting => 0,
            ConnectionStatus::Streaming => 1,
            ConnectionStatus::Disconnected => 2,
        }
    }
}

/// Device access used by the capture loop.
///
/// `open()` must (re)apply resolution and rate settings every time: some
/// devices reset their configuration when the handle is reopened.
/// Implementations must not block unboundedly in `grab()`.
pub trait FrameGrabber: Send {
    /// Device identifier for log lines (path, index, or stub name).
    fn describe(&self) -> String;

    /// Open or reopen the device, reapplying capture settings.
    fn open(&mut self) -> Result<()>;

    /// Read and decode one frame.
    fn grab(&mut self) -> Result<Frame>;

    /// Release the device handle. Must be safe to call when not open.
    fn close(&mut self);
}

/// Scheduled-retry policy for device reopening.
#[derive(Clone, Copy, Debug)]
pub struct RetryPolicy {
    /// Pause between reopen attempts after a device fault.
    pub reopen_interval: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            reopen_interval: Duration::from_secs(2),
        }
    }
}

/// Capture statistics for health logging.
#[derive(Clone, Debug)]
pub struct CaptureStats {
    pub frames_captured: u64,
    pub device: String,
}

/// State shared between the capture loop and readers.
///
/// The frame slot lock covers only copy-in and copy-out; it is never held
/// across a device call.
struct Shared {
    latest: Mutex<Option<Frame>>,
    status: AtomicU8,
    stop: AtomicBool,
    frames_captured: AtomicU64,
    /// Bits of an f64 epoch timestamp; 0 means "no frame yet".
    last_frame_time: AtomicU64,
}

impl Shared {
    fn new() -> Self {
        Self {
            latest: Mutex::new(None),
            status: AtomicU8::new(ConnectionStatus::Connecting.as_u8()),
            stop: AtomicBool::new(false),
            frames_captured: AtomicU64::new(0),
            last_frame_time: AtomicU64::new(0),
        }
    }

    fn set_status(&self, status: ConnectionStatus) {
        self.status.store(status.as_u8(), Ordering::Release);
    }

    fn status(&self) -> ConnectionStatus {
        ConnectionStatus::from_u8(self.status.load(Ordering::Acquire))
    }

    fn store_frame(&self, frame: Frame) {
        self.last_frame_time
            .store(frame.timestamp.to_bits(), Ordering::Release);
        self.frames_captured.fetch_add(1, Ordering::Relaxed);
        let mut slot = self.latest.lock().unwrap_or_else(|e| e.into_inner());
        *slot = Some(frame);
    }

    fn clear_frame(&self) {
        let mut slot = self.latest.lock().unwrap_or_else(|e| e.into_inner());
        *slot = None;
    }
}

/// One camera: a background acquisition loop plus a latest-frame slot.
pub struct CaptureSource {
    id: String,
    device: String,
    target_fps: u32,
    retry: RetryPolicy,
    shared: Arc<Shared>,
    grabber: Option<Box<dyn FrameGrabber>>,
    handle: Option<JoinHandle<()>>,
    exit_rx: Option<mpsc::Receiver<()>>,
}

impl CaptureSource {
    pub fn new(
        id: impl Into<String>,
        grabber: Box<dyn FrameGrabber>,
        target_fps: u32,
        retry: RetryPolicy,
    ) -> Result<Self> {
        let id = id.into();
        crate::validate_camera_id(&id)?;
        Ok(Self {
            id,
            device: grabber.describe(),
            target_fps,
            retry,
            shared: Arc::new(Shared::new()),
            grabber: Some(grabber),
            handle: None,
            exit_rx: None,
        })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Begin background acquisition. Calling twice is a no-op.
    pub fn start(&mut self) {
        let Some(grabber) = self.grabber.take() else {
            log::debug!("[camera {}] already started", self.id);
            return;
        };
        let shared = Arc::clone(&self.shared);
        let (exit_tx, exit_rx) = mpsc::channel();
        let id = self.id.clone();
        let target_fps = self.target_fps;
        let retry = self.retry;
        let handle = std::thread::spawn(move || {
            capture_loop(&id, grabber, &shared, target_fps, retry);
            let _ = exit_tx.send(());
        });
        self.handle = Some(handle);
        self.exit_rx = Some(exit_rx);
    }

    /// Most recent frame, or `None` when no frame is available - either
    /// because nothing has been captured yet or because the device is
    /// Disconnected. Never blocks on the device.
    pub fn read(&self) -> Option<Frame> {
        let slot = self
            .shared
            .latest
            .lock()
            .unwrap_or_else(|e| e.into_inner());
        slot.clone()
    }

    pub fn status(&self) -> ConnectionStatus {
        self.shared.status()
    }

    /// Capture timestamp of the most recently grabbed frame.
    pub fn last_frame_time(&self) -> Option<f64> {
        let bits = self.shared.last_frame_time.load(Ordering::Acquire);
        if bits == 0 {
            None
        } else {
            Some(f64::from_bits(bits))
        }
    }

    pub fn stats(&self) -> CaptureStats {
        CaptureStats {
            frames_captured: self.shared.frames_captured.load(Ordering::Relaxed),
            device: self.device.clone(),
        }
    }

    /// Request shutdown and wait for the background loop to release the
    /// device. The wait is bounded: the loop observes the stop flag within
    /// one retry/sleep interval, so we allow that plus slack and then give
    /// up with a warning instead of blocking forever. Idempotent.
    pub fn stop(&mut self) {
        self.shared.stop.store(true, Ordering::Release);
        let Some(exit_rx) = self.exit_rx.take() else {
            return;
        };
        let timeout = self.retry.reopen_interval + Duration::from_secs(1);
        match exit_rx.recv_timeout(timeout) {
            Ok(()) => {
                if let Some(handle) = self.handle.take() {
                    let _ = handle.join();
                }
            }
            Err(_) => {
                log::warn!(
                    "[camera {}] capture loop did not exit within {:?}, detaching",
                    self.id,
                    timeout
                );
                self.handle.take();
            }
        }
    }
}

impl Drop for CaptureSource {
    fn drop(&mut self) {
        self.stop();
    }
}

fn capture_loop(
    id: &str,
    mut grabber: Box<dyn FrameGrabber>,
    shared: &Shared,
    target_fps: u32,
    retry: RetryPolicy,
) {
    let frame_interval = if target_fps == 0 {
        Duration::from_millis(50)
    } else {
        Duration::from_secs_f64(1.0 / target_fps as f64)
    };

    'reconnect: while !shared.stop.load(Ordering::Acquire) {
        shared.set_status(ConnectionStatus::Connecting);
        if let Err(e) = grabber.open() {
            log::warn!(
                "[camera {}] open {} failed: {}, retrying in {:?}",
                id,
                grabber.describe(),
                e,
                retry.reopen_interval
            );
            shared.set_status(ConnectionStatus::Disconnected);
            std::thread::sleep(retry.reopen_interval);
            continue;
        }
        log::info!("[camera {}] opened {}", id, grabber.describe());

        while !shared.stop.load(Ordering::Acquire) {
            match grabber.grab() {
                Ok(frame) => {
                    shared.set_status(ConnectionStatus::Streaming);
                    shared.store_frame(frame);
                    std::thread::sleep(frame_interval);
                }
                Err(e) => {
                    log::warn!(
                        "[camera {}] frame read failed: {}, reopening in {:?}",
                        id,
                        e,
                        retry.reopen_interval
                    );
                    shared.set_status(ConnectionStatus::Disconnected);
                    shared.clear_frame();
                    grabber.close();
                    std::thread::sleep(retry.reopen_interval);
                    continue 'reconnect;
                }
            }
        }
    }

    grabber.close();
    shared.set_status(ConnectionStatus::Disconnected);
    shared.clear_frame();
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::anyhow;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Instant;

    /// Grabber with a scripted fault window: grabs fail while the shared
    /// counter is inside [fail_from, fail_until).
    struct ScriptedGrabber {
        grabs: Arc<AtomicUsize>,
        fail_from: usize,
        fail_until: usize,
        opens: Arc<AtomicUsize>,
    }

    impl FrameGrabber for ScriptedGrabber {
        fn describe(&self) -> String {
            "scripted://test".to_string()
        }

        fn open(&mut self) -> Result<()> {
            self.opens.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        fn grab(&mut self) -> Result<Frame> {
            let n = self.grabs.fetch_add(1, Ordering::SeqCst);
            if n >= self.fail_from && n < self.fail_until {
                return Err(anyhow!("simulated device fault"));
            }
            Ok(Frame::new(vec![0u8; 16], 4, 4, n as f64))
        }

        fn close(&mut self) {}
    }

    fn fast_retry() -> RetryPolicy {
        RetryPolicy {
            reopen_interval: Duration::from_millis(20),
        }
    }

    fn wait_until(deadline: Duration, mut cond: impl FnMut() -> bool) -> bool {
        let start = Instant::now();
        while start.elapsed() < deadline {
            if cond() {
                return true;
            }
            std::thread::sleep(Duration::from_millis(5));
        }
        false
    }

    #[test]
    fn read_is_empty_before_first_frame() {
        let grabber = ScriptedGrabber {
            grabs: Arc::new(AtomicUsize::new(0)),
            fail_from: 0,
            fail_until: usize::MAX,
            opens: Arc::new(AtomicUsize::new(0)),
        };
        let source =
            CaptureSource::new("cam0", Box::new(grabber), 100, fast_retry()).unwrap();
        // Not started: no frame, status Connecting.
        assert!(source.read().is_none());
        assert_eq!(source.status(), ConnectionStatus::Connecting);
    }

    #[test]
    fn streams_then_clears_on_fault_then_recovers() {
        let grabs = Arc::new(AtomicUsize::new(0));
        let opens = Arc::new(AtomicUsize::new(0));
        let grabber = ScriptedGrabber {
            grabs: Arc::clone(&grabs),
            fail_from: 3,
            fail_until: 4,
            opens: Arc::clone(&opens),
        };
        // A wide reopen interval keeps the disconnected window observable.
        let retry = RetryPolicy {
            reopen_interval: Duration::from_millis(300),
        };
        let mut source = CaptureSource::new("cam0", Box::new(grabber), 200, retry).unwrap();
        source.start();

        assert!(wait_until(Duration::from_secs(2), || source.read().is_some()));
        assert_eq!(source.status(), ConnectionStatus::Streaming);

        // Let it hit the scripted fault.
        assert!(wait_until(Duration::from_secs(2), || {
            source.status() == ConnectionStatus::Disconnected
        }));
        // No stale frame while disconnected.
        assert!(source.read().is_none());

        // Recovery: reopen happens and frames resume, all post-fault.
        assert!(wait_until(Duration::from_secs(2), || source.read().is_some()));
        assert!(opens.load(Ordering::SeqCst) >= 2);
        let frame = source.read().unwrap();
        assert!(frame.timestamp >= 4.0, "frame predates the disconnect");

        source.stop();
    }

    #[test]
    fn stop_is_idempotent_and_bounded() {
        let grabber = ScriptedGrabber {
            grabs: Arc::new(AtomicUsize::new(0)),
            fail_from: usize::MAX,
            fail_until: usize::MAX,
            opens: Arc::new(AtomicUsize::new(0)),
        };
        let mut source =
            CaptureSource::new("cam1", Box::new(grabber), 100, fast_retry()).unwrap();
        source.start();
        let start = Instant::now();
        source.stop();
        source.stop();
        assert!(start.elapsed() < Duration::from_secs(2));
        assert_eq!(source.status(), ConnectionStatus::Disconnected);
    }

    #[test]
    fn stop_while_retrying_connection_does_not_deadlock() {
        let grabber = ScriptedGrabber {
            grabs: Arc::new(AtomicUsize::new(0)),
            fail_from: 0,
            fail_until: usize::MAX,
            opens: Arc::new(AtomicUsize::new(0)),
        };
        let mut source =
            CaptureSource::new("cam1", Box::new(grabber), 100, fast_retry()).unwrap();
        source.start();
        std::thread::sleep(Duration::from_millis(30));
        let start = Instant::now();
        source.stop();
        assert!(start.elapsed() < Duration::from_secs(2));
    }

    #[test]
    fn rejects_invalid_camera_id() {
        let grabber = ScriptedGrabber {
            grabs: Arc::new(AtomicUsize::new(0)),
            fail_from: usize::MAX,
            fail_until: usize::MAX,
            opens: Arc::new(AtomicUsize::new(0)),
        };
        assert!(CaptureSource::new("cam/0", Box::new(grabber), 10, fast_retry()).is_err());
    }
}
