//! [`Camera`]: the handle applications hold.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use log::debug;

use crate::capture::{self, LoopSettings, Shared, StatsSnapshot, StopHandle};
use crate::stream::mailbox;
use crate::{
    CaptureConfig, CaptureError, DeviceBackend, FormatRegistry, FrameStream, QualityFilter,
    Result, V4l2Backend,
};

/// One capture device and at most one capture run.
///
/// Nothing touches the device until [`stream`](Camera::stream). The run ends
/// when [`close`](Camera::close) is called, the [`FrameStream`] is dropped or
/// a fatal error occurs; the camera cannot be restarted afterwards.
pub struct Camera<B: DeviceBackend = V4l2Backend> {
    device: PathBuf,
    // taken by the capture thread
    backend: Option<B>,
    registry: FormatRegistry,
    filter: Option<QualityFilter>,
    wait_timeout: Duration,
    shared: Arc<Shared>,
    worker: Option<JoinHandle<()>>,
}

impl Camera {
    /// A V4L2 camera with the default settings.
    pub fn open(device: impl AsRef<Path>) -> Self {
        Self::open_with(device, &CaptureConfig::default())
    }

    /// A V4L2 camera at `device`, everything else from `config`.
    pub fn open_with(device: impl AsRef<Path>, config: &CaptureConfig) -> Self {
        Self::with_backend(device, V4l2Backend::new(config.buffer_count), config)
    }

    /// The camera `config` names.
    pub fn from_config(config: &CaptureConfig) -> Self {
        Self::open_with(&config.device, config)
    }
}

impl<B: DeviceBackend> Camera<B> {
    pub fn with_backend(device: impl AsRef<Path>, backend: B, config: &CaptureConfig) -> Self {
        Self {
            device: device.as_ref().to_path_buf(),
            backend: Some(backend),
            registry: FormatRegistry::with_defaults(),
            filter: config.quality_filter(),
            wait_timeout: config.wait_timeout(),
            shared: Arc::default(),
            worker: None,
        }
    }

    /// Replace the formats negotiation may choose from. Only effective before
    /// [`stream`](Camera::stream).
    pub fn with_registry(mut self, registry: FormatRegistry) -> Self {
        self.registry = registry;
        self
    }

    pub fn device(&self) -> &Path {
        &self.device
    }

    /// Start capturing on a background thread.
    ///
    /// Returns as soon as the thread is running; open and negotiation errors
    /// end the stream immediately and are reported by [`err`](Camera::err).
    pub fn stream(&mut self) -> Result<FrameStream> {
        let backend = self.backend.take().ok_or(CaptureError::AlreadyStreaming)?;
        let (mailbox, frames) = mailbox();
        let settings = LoopSettings {
            path: self.device.clone(),
            registry: self.registry.clone(),
            filter: self.filter,
            wait_timeout: self.wait_timeout,
        };
        let shared = Arc::clone(&self.shared);

        let worker = thread::Builder::new()
            .name("redface-capture".into())
            .spawn(move || capture::run(backend, settings, mailbox, shared))
            .map_err(CaptureError::Spawn)?;
        debug!("capture thread started for {}", self.device.display());
        self.worker = Some(worker);
        Ok(frames)
    }

    /// Ask the capture thread to stop. Does not wait; the stream ends once
    /// the thread has released the device, at most one wait timeout later.
    pub fn close(&self) {
        self.shared.stop.stop();
    }

    /// The fatal error that ended the run, if any. A stopped stream with no
    /// error here was closed or dropped.
    pub fn err(&self) -> Option<&CaptureError> {
        self.shared.error()
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.shared.stats.snapshot()
    }

    /// A clonable way to [`close`](Camera::close) from elsewhere, e.g. a
    /// signal handler.
    pub fn stop_handle(&self) -> StopHandle {
        self.shared.stop.clone()
    }

    /// True once the capture thread has exited.
    pub fn is_finished(&self) -> bool {
        self.worker.as_ref().map_or(false, JoinHandle::is_finished)
    }
}

impl<B: DeviceBackend> Drop for Camera<B> {
    fn drop(&mut self) {
        self.close();
    }
}
