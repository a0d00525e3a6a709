// redface-capture/src/stream.rs
//
// Capacity-one mailbox between the capture thread and its consumer.
// The producer never blocks: when the slot is taken the *new* frame is
// handed back to the caller to be dropped, so the consumer always sees the
// oldest undelivered frame and frames stay in capture order.
use std::pin::Pin;
use std::task::{Context, Poll};

use futures_core::Stream;
use tokio::sync::mpsc::{self, error::TrySendError};

use crate::Frame;

const DEPTH: usize = 1;

/// Outcome of a non-blocking publish.
#[derive(Debug)]
pub(crate) enum Publish {
    Delivered,
    /// Mailbox already holds an unconsumed frame; this one was not placed.
    Saturated(Frame),
    /// The consumer dropped its [`FrameStream`].
    Closed(Frame),
}

pub(crate) struct Mailbox {
    tx: mpsc::Sender<Frame>,
}

pub(crate) fn mailbox() -> (Mailbox, FrameStream) {
    let (tx, rx) = mpsc::channel(DEPTH);
    (Mailbox { tx }, FrameStream { rx })
}

impl Mailbox {
    pub(crate) fn publish(&self, frame: Frame) -> Publish {
        match self.tx.try_send(frame) {
            Ok(()) => Publish::Delivered,
            Err(TrySendError::Full(frame)) => Publish::Saturated(frame),
            Err(TrySendError::Closed(frame)) => Publish::Closed(frame),
        }
    }
}

/// Frames from one capture run. Ends when the capture loop stops; check
/// [`Camera::err`](crate::Camera::err) afterwards to learn why.
#[derive(Debug)]
pub struct FrameStream {
    rx: mpsc::Receiver<Frame>,
}

impl FrameStream {
    pub async fn next_frame(&mut self) -> Option<Frame> {
        self.rx.recv().await
    }

    /// For synchronous consumers. Panics if called from inside an async runtime.
    pub fn blocking_next(&mut self) -> Option<Frame> {
        self.rx.blocking_recv()
    }
}

impl Stream for FrameStream {
    type Item = Frame;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Frame>> {
        self.rx.poll_recv(cx)
    }
}
