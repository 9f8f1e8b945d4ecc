use tokio::sync::watch;

use crate::{Error, Result};

/// A single 8-bit grayscale frame.
///
/// Rows are stored contiguously without padding, so `data.len() == width * height`.
#[derive(Clone, PartialEq, Eq)]
pub struct Frame {
    pub width: i32,
    pub height: i32,
    pub data: Vec<u8>,
}

impl Frame {
    pub fn new(width: i32, height: i32, data: Vec<u8>) -> Result<Self> {
        if width <= 0 || height <= 0 || data.len() != (width as usize) * (height as usize) {
            return Err(Error::FrameInvalidSize);
        }

        Ok(Self {
            width,
            height,
            data,
        })
    }
}

impl std::fmt::Debug for Frame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Frame")
            .field("width", &self.width)
            .field("height", &self.height)
            .finish_non_exhaustive()
    }
}

/// A non-blocking source of frames.
pub trait FrameSource {
    /// Returns the next frame or [`Error::FrameNotReady`] if nothing new arrived since the
    /// previous call.
    fn next_frame(&mut self) -> Result<Frame>;
}

/// Producer half of a freshest-frame hand-off.
///
/// Sending replaces whatever frame is pending. Frames the consumer did not pick up in time are
/// dropped, never queued.
#[derive(Debug, Clone)]
pub struct FrameSender {
    tx: watch::Sender<Option<Frame>>,
}

impl FrameSender {
    pub fn send(&self, frame: Frame) {
        self.tx.send_replace(Some(frame));
    }

    /// Whether the consumer half is gone.
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// Consumer half of a freshest-frame hand-off.
#[derive(Debug)]
pub struct LatestFrame {
    rx: watch::Receiver<Option<Frame>>,
}

impl FrameSource for LatestFrame {
    fn next_frame(&mut self) -> Result<Frame> {
        match self.rx.has_changed() {
            Ok(true) => self
                .rx
                .borrow_and_update()
                .clone()
                .ok_or(Error::FrameNotReady),
            Ok(false) => Err(Error::FrameNotReady),
            Err(_) => Err(Error::FrameSourceClosed),
        }
    }
}

/// Creates a freshest-frame channel.
pub fn frame_channel() -> (FrameSender, LatestFrame) {
    let (tx, rx) = watch::channel(None);
    (FrameSender { tx }, LatestFrame { rx })
}
