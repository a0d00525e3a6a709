// Scripted stand-in for a capture device, driven by tests.
use std::collections::VecDeque;
use std::io;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use crate::device::{
    CaptureDevice, DeviceBackend, FormatDescription, FrameSizeRange, NegotiatedFormat, RawBuffer,
};
use crate::{PixelFormat, StopHandle};

pub(crate) enum Event {
    Frame(Vec<u8>),
    WaitError(io::ErrorKind),
    ReadError,
}

pub(crate) struct FakeState {
    formats: Vec<PixelFormat>,
    sizes: Vec<FrameSizeRange>,
    fail_open: bool,
    reject_format: bool,
    fail_start: bool,
    script: VecDeque<Event>,
    // true while the driver owns the slot
    queued: Vec<bool>,
    // stop requested right after a successful wait / dequeue
    stop_after_wait: Option<StopHandle>,
    stop_after_dequeue: Option<StopHandle>,

    pub requested: Option<(PixelFormat, u32, u32)>,
    pub started: bool,
    pub stopped: bool,
    pub closed: bool,
    pub released: Vec<usize>,
    pub dequeued: usize,
}

#[derive(Clone)]
pub(crate) struct Fake {
    state: Arc<Mutex<FakeState>>,
}

impl Fake {
    pub fn new(formats: &[PixelFormat]) -> Self {
        Self {
            state: Arc::new(Mutex::new(FakeState {
                formats: formats.to_vec(),
                sizes: vec![FrameSizeRange::discrete(640, 480)],
                fail_open: false,
                reject_format: false,
                fail_start: false,
                script: VecDeque::new(),
                queued: vec![false; 4],
                stop_after_wait: None,
                stop_after_dequeue: None,
                requested: None,
                started: false,
                stopped: false,
                closed: false,
                released: Vec::new(),
                dequeued: 0,
            })),
        }
    }

    /// Grayscale camera with a 4 buffer pool.
    pub fn grey() -> Self {
        Self::new(&[PixelFormat::GREY])
    }

    pub fn with_sizes(self, sizes: Vec<FrameSizeRange>) -> Self {
        self.state().sizes = sizes;
        self
    }

    pub fn with_slots(self, count: usize) -> Self {
        self.state().queued = vec![false; count];
        self
    }

    pub fn failing_open(self) -> Self {
        self.state().fail_open = true;
        self
    }

    pub fn rejecting_format(self) -> Self {
        self.state().reject_format = true;
        self
    }

    pub fn failing_start(self) -> Self {
        self.state().fail_start = true;
        self
    }

    pub fn stopping_after_wait(self, stop: StopHandle) -> Self {
        self.state().stop_after_wait = Some(stop);
        self
    }

    pub fn stopping_after_dequeue(self, stop: StopHandle) -> Self {
        self.state().stop_after_dequeue = Some(stop);
        self
    }

    pub fn push(&self, event: Event) -> &Self {
        self.state().script.push_back(event);
        self
    }

    pub fn push_frames<I: IntoIterator<Item = Vec<u8>>>(&self, frames: I) -> &Self {
        let mut state = self.state();
        state.script.extend(frames.into_iter().map(Event::Frame));
        drop(state);
        self
    }

    pub fn backend(&self) -> FakeBackend {
        FakeBackend {
            state: Arc::clone(&self.state),
        }
    }

    pub fn state(&self) -> MutexGuard<'_, FakeState> {
        self.state.lock().unwrap()
    }

    /// Poll `cond` until it holds or two seconds pass.
    pub fn wait_until(&self, cond: impl Fn(&FakeState) -> bool) -> bool {
        eventually(|| cond(&self.state()))
    }
}

/// Poll `cond` until it holds or two seconds pass.
pub(crate) fn eventually(cond: impl Fn() -> bool) -> bool {
    let deadline = Instant::now() + Duration::from_secs(2);
    while Instant::now() < deadline {
        if cond() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(2));
    }
    false
}

/// A frame that passes the default exposure filter: half the samples are
/// dark and the first one is `tag` so tests can tell frames apart.
pub(crate) fn good_frame(tag: u8) -> Vec<u8> {
    assert!(tag < 80);
    let mut raw = Vec::with_capacity(8);
    for _ in 0..4 {
        raw.extend_from_slice(&[tag, 200]);
    }
    raw
}

pub(crate) fn dark_frame() -> Vec<u8> {
    vec![0; 8]
}

pub(crate) fn bright_frame() -> Vec<u8> {
    vec![255; 8]
}

pub(crate) struct FakeBackend {
    state: Arc<Mutex<FakeState>>,
}

impl DeviceBackend for FakeBackend {
    type Device = FakeDevice;

    fn open(&self, _path: &Path) -> io::Result<FakeDevice> {
        if self.state.lock().unwrap().fail_open {
            return Err(io::Error::new(io::ErrorKind::PermissionDenied, "permission denied"));
        }
        Ok(FakeDevice {
            state: Arc::clone(&self.state),
            current: Vec::new(),
        })
    }
}

pub(crate) struct FakeDevice {
    state: Arc<Mutex<FakeState>>,
    current: Vec<u8>,
}

impl FakeDevice {
    fn state(&self) -> MutexGuard<'_, FakeState> {
        self.state.lock().unwrap()
    }
}

impl CaptureDevice for FakeDevice {
    fn formats(&mut self) -> io::Result<Vec<FormatDescription>> {
        Ok(self
            .state()
            .formats
            .iter()
            .map(|&format| FormatDescription {
                format,
                description: format!("fake {format}"),
            })
            .collect())
    }

    fn frame_sizes(&mut self, _format: PixelFormat) -> io::Result<Vec<FrameSizeRange>> {
        Ok(self.state().sizes.clone())
    }

    fn current_format(&mut self) -> io::Result<NegotiatedFormat> {
        let state = self.state();
        Ok(NegotiatedFormat {
            format: state.formats.first().copied().unwrap_or(PixelFormat::GREY),
            width: 320,
            height: 240,
        })
    }

    fn set_format(
        &mut self,
        format: PixelFormat,
        width: u32,
        height: u32,
    ) -> io::Result<NegotiatedFormat> {
        let mut state = self.state();
        state.requested = Some((format, width, height));
        if state.reject_format {
            return Err(io::Error::new(io::ErrorKind::InvalidInput, "EINVAL"));
        }
        Ok(NegotiatedFormat {
            format,
            width,
            height,
        })
    }

    fn start(&mut self) -> io::Result<()> {
        let mut state = self.state();
        if state.fail_start {
            return Err(io::Error::new(io::ErrorKind::Other, "STREAMON failed"));
        }
        state.queued.iter_mut().for_each(|q| *q = true);
        state.started = true;
        Ok(())
    }

    fn stop(&mut self) -> io::Result<()> {
        self.state().stopped = true;
        Ok(())
    }

    fn wait(&mut self, timeout: Duration) -> io::Result<()> {
        {
            let mut state = self.state();
            let slot_free = state.queued.iter().any(|&q| q);
            let ready = match state.script.front() {
                Some(Event::WaitError(kind)) => {
                    let kind = *kind;
                    state.script.pop_front();
                    return Err(io::Error::new(kind, "fake wait error"));
                }
                Some(Event::ReadError) => true,
                Some(Event::Frame(_)) => slot_free,
                None => false,
            };
            if ready {
                if let Some(stop) = &state.stop_after_wait {
                    stop.stop();
                }
                return Ok(());
            }
        }
        std::thread::sleep(timeout);
        Err(io::Error::new(io::ErrorKind::TimedOut, "timed out"))
    }

    fn dequeue(&mut self) -> io::Result<RawBuffer<'_>> {
        let slot = {
            let mut state = self.state.lock().unwrap();
            match state.script.pop_front() {
                Some(Event::Frame(bytes)) => {
                    let slot = state
                        .queued
                        .iter()
                        .position(|&q| q)
                        .ok_or_else(|| io::Error::new(io::ErrorKind::WouldBlock, "no buffer"))?;
                    state.queued[slot] = false;
                    state.dequeued += 1;
                    if let Some(stop) = &state.stop_after_dequeue {
                        stop.stop();
                    }
                    self.current = bytes;
                    slot
                }
                _ => return Err(io::Error::new(io::ErrorKind::Other, "fake read error")),
            }
        };
        Ok(RawBuffer {
            slot,
            bytes: &self.current,
        })
    }

    fn release(&mut self, slot: usize) -> io::Result<()> {
        let mut state = self.state();
        state.queued[slot] = true;
        state.released.push(slot);
        Ok(())
    }
}

impl Drop for FakeDevice {
    fn drop(&mut self) {
        if let Ok(mut state) = self.state.lock() {
            state.closed = true;
        }
    }
}
