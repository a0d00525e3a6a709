//! The producer side: one thread per camera running
//! negotiate → (wait → dequeue → filter → convert → publish)* → shutdown.

use std::io;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use log::{debug, error, info, warn};

use crate::device::{CaptureDevice, DeviceBackend};
use crate::negotiate::{self, Negotiated};
use crate::slots::SlotArena;
use crate::stream::{Mailbox, Publish};
use crate::{CaptureError, Exposure, FormatRegistry, Frame, QualityFilter, Result};

/// Cooperative cancellation token shared by a [`Camera`](crate::Camera) and
/// its capture thread. Checked around every blocking or buffer-owning step,
/// so a stop takes effect within one wait timeout.
#[derive(Debug, Clone, Default)]
pub struct StopHandle(Arc<AtomicBool>);

impl StopHandle {
    pub fn stop(&self) {
        self.0.store(true, Ordering::Release);
    }

    pub fn is_stopped(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

#[derive(Debug, Default)]
pub(crate) struct CaptureStats {
    delivered: AtomicU64,
    quality_dropped: AtomicU64,
    saturation_dropped: AtomicU64,
    discarded: AtomicU64,
}

impl CaptureStats {
    pub(crate) fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            delivered: self.delivered.load(Ordering::Acquire),
            quality_dropped: self.quality_dropped.load(Ordering::Acquire),
            saturation_dropped: self.saturation_dropped.load(Ordering::Acquire),
            discarded: self.discarded.load(Ordering::Acquire),
        }
    }
}

/// Counters for one capture run. Every buffer the device handed over is in
/// exactly one bucket; wait timeouts are not counted.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatsSnapshot {
    pub delivered: u64,
    pub quality_dropped: u64,
    pub saturation_dropped: u64,
    /// Dequeued while shutting down, or after the consumer went away.
    pub discarded: u64,
}

impl StatsSnapshot {
    /// Frames lost while the run was live: exposure rejects and busy consumer.
    pub fn dropped(&self) -> u64 {
        self.quality_dropped + self.saturation_dropped
    }

    pub fn total(&self) -> u64 {
        self.delivered + self.dropped() + self.discarded
    }
}

/// State shared between the facade and the capture thread.
#[derive(Debug, Default)]
pub(crate) struct Shared {
    pub(crate) stop: StopHandle,
    pub(crate) stats: CaptureStats,
    // written once, by the capture thread, before the mailbox closes
    error: OnceLock<CaptureError>,
}

impl Shared {
    pub(crate) fn error(&self) -> Option<&CaptureError> {
        self.error.get()
    }

    fn fail(&self, err: CaptureError) {
        error!("capture stopped: {err}");
        if let Err(err) = self.error.set(err) {
            warn!("ignoring second capture error: {err}");
        }
    }
}

/// Everything the capture thread needs besides the backend.
pub(crate) struct LoopSettings {
    pub(crate) path: PathBuf,
    pub(crate) registry: FormatRegistry,
    pub(crate) filter: Option<QualityFilter>,
    pub(crate) wait_timeout: Duration,
}

/// Capture thread entry point. Returns once the loop reached `Stopped`;
/// dropping `mailbox` on the way out ends the consumer's stream.
pub(crate) fn run<B: DeviceBackend>(
    backend: B,
    settings: LoopSettings,
    mailbox: Mailbox,
    shared: Arc<Shared>,
) {
    let (device, negotiated) =
        match negotiate::open_device(&backend, &settings.path, &settings.registry) {
            Ok(opened) => opened,
            Err(err) => {
                shared.fail(err);
                return;
            }
        };

    CaptureLoop {
        device,
        negotiated,
        filter: settings.filter,
        wait_timeout: settings.wait_timeout,
        slots: SlotArena::new(),
        sequence: 0,
        mailbox,
        shared,
    }
    .run();
}

enum State {
    Streaming,
    Stopping(Option<CaptureError>),
    Stopped,
}

enum Step {
    Continue,
    Stop,
}

struct CaptureLoop<D: CaptureDevice> {
    // dropped first: the device closes before the mailbox does
    device: D,
    negotiated: Negotiated,
    filter: Option<QualityFilter>,
    wait_timeout: Duration,
    slots: SlotArena,
    sequence: u64,
    mailbox: Mailbox,
    shared: Arc<Shared>,
}

impl<D: CaptureDevice> CaptureLoop<D> {
    fn run(mut self) {
        let mut state = State::Streaming;
        loop {
            state = match state {
                State::Streaming => match self.step() {
                    Ok(Step::Continue) => State::Streaming,
                    Ok(Step::Stop) => State::Stopping(None),
                    Err(err) => State::Stopping(Some(err)),
                },
                State::Stopping(err) => {
                    self.shutdown(err);
                    State::Stopped
                }
                State::Stopped => break,
            };
        }
    }

    fn step(&mut self) -> Result<Step> {
        self.requeue_returned();
        if self.shared.stop.is_stopped() {
            return Ok(Step::Stop);
        }

        match self.device.wait(self.wait_timeout) {
            Ok(()) => {}
            Err(e) if is_soft_wait_error(&e) => {
                debug!("no frame yet: {e}");
                return Ok(Step::Continue);
            }
            Err(e) => return Err(CaptureError::FrameWait(e)),
        }
        // Leave the ready buffer with the driver if we are shutting down.
        if self.shared.stop.is_stopped() {
            return Ok(Step::Stop);
        }

        let raw = self.device.dequeue().map_err(CaptureError::FrameRead)?;
        let slot = raw.slot;
        let sequence = self.sequence;
        self.sequence += 1;

        // `raw` borrows the device, so every check goes through `shared` directly.
        if self.shared.stop.is_stopped() {
            self.release(slot);
            self.shared.stats.discarded.fetch_add(1, Ordering::AcqRel);
            return Ok(Step::Stop);
        }

        if let Some(filter) = self.filter {
            let exposure = filter.classify(raw.bytes);
            if exposure != Exposure::Acceptable {
                debug!("frame {sequence} rejected: {exposure:?}");
                self.release(slot);
                self.shared.stats.quality_dropped.fetch_add(1, Ordering::AcqRel);
                return Ok(Step::Continue);
            }
        }

        let rgb = (self.negotiated.converter)(raw.bytes);
        let format = self.negotiated.format;
        let frame = Frame::new(
            rgb,
            format.width,
            format.height,
            format.format,
            sequence,
            self.slots.lease(slot),
        );

        match self.mailbox.publish(frame) {
            Publish::Delivered => {
                self.shared.stats.delivered.fetch_add(1, Ordering::AcqRel);
                Ok(Step::Continue)
            }
            Publish::Saturated(frame) => {
                debug!("consumer busy, dropping frame {sequence}");
                frame.release();
                self.shared.stats.saturation_dropped.fetch_add(1, Ordering::AcqRel);
                Ok(Step::Continue)
            }
            Publish::Closed(frame) => {
                debug!("consumer went away");
                frame.release();
                self.shared.stats.discarded.fetch_add(1, Ordering::AcqRel);
                Ok(Step::Stop)
            }
        }
    }

    /// Give slots the consumer is done with back to the driver.
    fn requeue_returned(&mut self) {
        for slot in self.slots.drain_returned() {
            if let Err(e) = self.device.release(slot) {
                warn!("can not re-queue buffer {slot}: {e}");
            }
        }
    }

    fn release(&mut self, slot: usize) {
        if let Err(e) = self.device.release(slot) {
            warn!("can not re-queue buffer {slot}: {e}");
        }
    }

    fn shutdown(&mut self, err: Option<CaptureError>) {
        self.requeue_returned();
        if let Err(e) = self.device.stop() {
            warn!("can not stop streaming: {e}");
        }
        let stats = self.shared.stats.snapshot();
        match err {
            Some(err) => self.shared.fail(err),
            None => info!(
                "capture stopped: {} delivered, {} too dark/bright, {} dropped while busy, {} discarded, {} still held",
                stats.delivered,
                stats.quality_dropped,
                stats.saturation_dropped,
                stats.discarded,
                self.slots.outstanding()
            ),
        }
    }
}

/// Timeouts, and signals interrupting the wait, just mean "try again".
fn is_soft_wait_error(e: &io::Error) -> bool {
    matches!(
        e.kind(),
        io::ErrorKind::TimedOut | io::ErrorKind::Interrupted | io::ErrorKind::WouldBlock
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fake::{bright_frame, dark_frame, good_frame, eventually, Event, Fake};
    use crate::stream::mailbox;
    use crate::PixelFormat;

    fn settings(filter: Option<QualityFilter>) -> LoopSettings {
        LoopSettings {
            path: PathBuf::from("/dev/fake"),
            registry: FormatRegistry::with_defaults(),
            filter,
            wait_timeout: Duration::from_millis(5),
        }
    }

    // Run the loop on a worker thread and stop it once `frames` buffers have
    // been counted, then collect whatever reached the mailbox.
    fn run_until(fake: &Fake, filter: Option<QualityFilter>, frames: u64) -> (Arc<Shared>, Vec<Frame>) {
        let (mb, mut stream) = mailbox();
        let shared = Arc::new(Shared::default());
        let worker = {
            let backend = fake.backend();
            let shared = Arc::clone(&shared);
            std::thread::spawn(move || run(backend, settings(filter), mb, shared))
        };
        assert!(eventually(|| shared.stats.snapshot().total() == frames));
        shared.stop.stop();
        worker.join().unwrap();

        let mut out = Vec::new();
        while let Some(frame) = stream.blocking_next() {
            out.push(frame);
        }
        (shared, out)
    }

    #[test]
    fn every_notification_is_accounted_for() {
        let fake = Fake::grey();
        fake.push_frames([
            good_frame(1),
            dark_frame(),
            good_frame(2),
            bright_frame(),
            good_frame(3),
            dark_frame(),
        ]);
        let (shared, frames) = run_until(&fake, Some(QualityFilter::default()), 6);
        let stats = shared.stats.snapshot();
        assert_eq!(stats.total(), 6);
        assert_eq!(stats.quality_dropped, 3);
        assert_eq!(stats.delivered as usize, frames.len());
        assert_eq!(stats.delivered + stats.saturation_dropped, 3);
        assert!(shared.error().is_none());
    }

    #[test]
    fn saturated_mailbox_keeps_first_frame() {
        let fake = Fake::grey();
        fake.push_frames([good_frame(10), good_frame(20), good_frame(30)]);
        let (shared, frames) = run_until(&fake, Some(QualityFilter::default()), 3);

        let stats = shared.stats.snapshot();
        assert_eq!(stats.delivered, 1);
        assert_eq!(stats.saturation_dropped, 2);
        assert_eq!(stats.dropped(), 2);
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].sequence(), 0);
        assert_eq!(&frames[0].buffer()[..3], &[10, 10, 10]);
        // the two dropped slots went straight back to the driver
        assert_eq!(fake.state().released.len(), 2);
    }

    #[test]
    fn frames_are_converted_at_negotiated_size() {
        let fake = Fake::grey().with_sizes(vec![crate::FrameSizeRange::discrete(4, 2)]);
        fake.push_frames([good_frame(5)]);
        let (_, frames) = run_until(&fake, Some(QualityFilter::default()), 1);
        let frame = &frames[0];
        assert_eq!((frame.width(), frame.height()), (4, 2));
        assert_eq!(frame.source_format(), PixelFormat::GREY);
        assert_eq!(frame.buffer().len(), 24);
    }

    #[test]
    fn disabled_filter_passes_dark_frames() {
        let fake = Fake::grey();
        fake.push_frames([dark_frame()]);
        let (shared, frames) = run_until(&fake, None, 1);
        assert_eq!(frames.len(), 1);
        assert_eq!(shared.stats.snapshot().quality_dropped, 0);
    }

    #[test]
    fn wait_timeouts_are_not_counted() {
        let fake = Fake::grey();
        fake.push(Event::WaitError(io::ErrorKind::TimedOut))
            .push(Event::WaitError(io::ErrorKind::Interrupted))
            .push(Event::Frame(good_frame(1)));
        let (shared, frames) = run_until(&fake, Some(QualityFilter::default()), 1);
        assert_eq!(frames.len(), 1);
        assert_eq!(shared.stats.snapshot().total(), 1);
        assert!(shared.error().is_none());
    }

    #[test]
    fn wait_failure_is_fatal() {
        let fake = Fake::grey();
        fake.push(Event::WaitError(io::ErrorKind::BrokenPipe));
        let (mb, mut stream) = mailbox();
        let shared = Arc::new(Shared::default());
        run(fake.backend(), settings(None), mb, Arc::clone(&shared));

        assert!(stream.blocking_next().is_none());
        assert!(matches!(shared.error(), Some(CaptureError::FrameWait(_))));
        let state = fake.state();
        assert!(state.stopped && state.closed);
    }

    #[test]
    fn read_failure_is_fatal() {
        let fake = Fake::grey();
        fake.push(Event::ReadError);
        let (mb, mut stream) = mailbox();
        let shared = Arc::new(Shared::default());
        run(fake.backend(), settings(None), mb, Arc::clone(&shared));

        assert!(stream.blocking_next().is_none());
        assert!(matches!(shared.error(), Some(CaptureError::FrameRead(_))));
        assert!(fake.state().closed);
    }

    #[test]
    fn negotiation_failure_publishes_nothing() {
        let fake = Fake::new(&[PixelFormat::new(*b"MJPG")]);
        fake.push_frames([good_frame(1)]);
        let (mb, mut stream) = mailbox();
        let shared = Arc::new(Shared::default());
        run(fake.backend(), settings(None), mb, Arc::clone(&shared));

        assert!(stream.blocking_next().is_none());
        assert!(matches!(shared.error(), Some(CaptureError::UnsupportedFormat { .. })));
        let state = fake.state();
        assert!(!state.started);
        assert_eq!(state.dequeued, 0);
        assert!(state.closed);
    }

    #[test]
    fn consumer_drop_stops_loop_cleanly() {
        let fake = Fake::grey();
        fake.push_frames([good_frame(1)]);
        let (mb, stream) = mailbox();
        drop(stream);
        let shared = Arc::new(Shared::default());
        run(fake.backend(), settings(None), mb, Arc::clone(&shared));

        assert!(shared.error().is_none());
        let stats = shared.stats.snapshot();
        assert_eq!(stats.discarded, 1);
        assert_eq!(stats.delivered, 0);
        assert_eq!(stats.total(), 1);
        let state = fake.state();
        assert!(state.stopped && state.closed);
        assert_eq!(state.released, vec![0]);
    }

    #[test]
    fn stop_after_wait_leaves_buffer_with_driver() {
        let shared = Arc::new(Shared::default());
        let fake = Fake::grey().stopping_after_wait(shared.stop.clone());
        fake.push_frames([good_frame(1)]);
        let (mb, mut stream) = mailbox();
        run(fake.backend(), settings(None), mb, Arc::clone(&shared));

        assert!(stream.blocking_next().is_none());
        assert!(shared.error().is_none());
        assert_eq!(shared.stats.snapshot(), StatsSnapshot::default());
        let state = fake.state();
        assert_eq!(state.dequeued, 0);
        assert!(state.released.is_empty());
        assert!(state.stopped);
    }

    #[test]
    fn stop_after_dequeue_releases_slot() {
        let shared = Arc::new(Shared::default());
        let fake = Fake::grey().stopping_after_dequeue(shared.stop.clone());
        fake.push_frames([good_frame(1)]);
        let (mb, mut stream) = mailbox();
        run(fake.backend(), settings(None), mb, Arc::clone(&shared));

        assert!(stream.blocking_next().is_none());
        assert!(shared.error().is_none());
        let stats = shared.stats.snapshot();
        assert_eq!(stats.delivered, 0);
        assert_eq!(stats.discarded, 1);
        assert_eq!(stats.total(), 1);
        let state = fake.state();
        assert_eq!(state.dequeued, 1);
        assert_eq!(state.released, vec![0]);
    }
}
