use std::{
    fmt::Debug,
    thread::{self, JoinHandle},
    time::Duration,
};

use anyhow::{Result, bail};
use log::{debug, info, warn};
#[cfg(test)]
use mockall::automock;
use opencv::{
    core::{Mat, MatTraitConst, MatTraitConstManual},
    imgproc::{COLOR_BGR2GRAY, cvt_color_def},
    videoio::{CAP_ANY, VideoCapture, VideoCaptureTrait, VideoCaptureTraitConst},
};
use platforms::{
    Error,
    capture::{Frame, FrameSender, FrameSource, LatestFrame},
    transport::{DeviceTransport, TcpTransport, Transport},
};

use crate::{CaptureSettings, TransportKind, TransportSettings};

/// The line-oriented link to the pan-tilt mechanism.
#[cfg_attr(test, automock)]
pub trait Link: Debug + Send {
    /// Writes `line` and blocks until the reply line arrives.
    fn write_line(&mut self, line: &str) -> Result<String, Error>;
}

/// Default implementation of [`Link`] over a platform [`Transport`].
#[derive(Debug)]
pub struct DefaultLink {
    inner: Box<dyn Transport>,
}

impl DefaultLink {
    pub fn new(transport: impl Transport + 'static) -> Self {
        Self {
            inner: Box::new(transport),
        }
    }

    pub fn open(settings: &TransportSettings) -> Result<Self> {
        let terminator = settings.command_terminator.as_str();
        let link = match settings.kind {
            TransportKind::Device => {
                Self::new(DeviceTransport::open_device(&settings.address, terminator)?)
            }
            TransportKind::Tcp => {
                let timeout = settings.read_timeout_millis.map(Duration::from_millis);
                Self::new(TcpTransport::connect(
                    settings.address.as_str(),
                    timeout,
                    terminator,
                )?)
            }
        };
        info!(target: "ptu", "connected to {} over {}", settings.address, settings.kind);

        Ok(link)
    }
}

impl Link for DefaultLink {
    #[inline]
    fn write_line(&mut self, line: &str) -> Result<String, Error> {
        self.inner.write_line(line)
    }
}

/// A [`Link`] that never touches hardware.
///
/// Positions and speeds written are remembered and reported back by queries. Everything else is
/// acknowledged without a value.
#[derive(Debug, Default)]
pub struct DryRunLink {
    pan: i32,
    tilt: i32,
    pan_speed: i32,
    tilt_speed: i32,
}

impl Link for DryRunLink {
    fn write_line(&mut self, line: &str) -> Result<String, Error> {
        let reply = if line == "B" {
            format!(
                "* {},{},{},{}",
                self.pan, self.tilt, self.pan_speed, self.tilt_speed
            )
        } else {
            let (code, value) = line.split_at(line.len().min(2));
            let slot = match code {
                "pp" => Some(&mut self.pan),
                "tp" => Some(&mut self.tilt),
                "ps" => Some(&mut self.pan_speed),
                "ts" => Some(&mut self.tilt_speed),
                _ => None,
            };
            match (slot, value.parse::<i32>().ok()) {
                (Some(slot), Some(value)) => {
                    *slot = value;
                    "*".to_string()
                }
                (Some(slot), None) => format!("* {slot}"),
                (None, _) => "*".to_string(),
            }
        };
        debug!(target: "ptu", "dry run {line} -> {reply}");

        Ok(reply)
    }
}

/// The wide-field frame source of the control loop.
#[cfg_attr(test, automock)]
pub trait Capture: Debug + Send {
    /// Grabs the freshest frame, or [`Error::FrameNotReady`] if none arrived since the last grab.
    fn grab(&mut self) -> Result<Frame, Error>;
}

/// Default implementation of [`Capture`] over a freshest-frame channel.
#[derive(Debug)]
pub struct DefaultCapture {
    inner: LatestFrame,
}

impl DefaultCapture {
    pub fn new(inner: LatestFrame) -> Self {
        Self { inner }
    }
}

impl Capture for DefaultCapture {
    #[inline]
    fn grab(&mut self) -> Result<Frame, Error> {
        self.inner.next_frame()
    }
}

/// Opens the configured camera or video and feeds grayscale frames to `sender` on a new thread.
///
/// The thread exits when the video ends, reading fails or the consumer is gone.
pub fn spawn_video_capture(
    settings: &CaptureSettings,
    sender: FrameSender,
) -> Result<JoinHandle<()>> {
    let source = settings.source.trim();
    let (mut capture, is_file) = match source.parse::<i32>() {
        Ok(index) => (VideoCapture::new(index, CAP_ANY)?, false),
        Err(_) => (VideoCapture::from_file(source, CAP_ANY)?, true),
    };
    if !capture.is_opened()? {
        bail!("failed to open video source {source}");
    }
    info!(target: "capture", "opened video source {source}");

    // Files are paced to the configured rate, devices block on their own
    let pacing = (is_file && settings.fps > 0)
        .then(|| Duration::from_secs_f64(1.0 / settings.fps as f64));
    let handle = thread::Builder::new()
        .name("capture".to_string())
        .spawn(move || {
            let mut mat = Mat::default();
            while !sender.is_closed() {
                match capture.read(&mut mat) {
                    Ok(true) if !mat.empty() => (),
                    Ok(_) => {
                        info!(target: "capture", "video source ended");
                        break;
                    }
                    Err(err) => {
                        warn!(target: "capture", "reading frame failed {err}");
                        break;
                    }
                }

                match to_frame(&mat) {
                    Ok(frame) => sender.send(frame),
                    Err(err) => warn!(target: "capture", "dropping frame {err}"),
                }
                if let Some(pacing) = pacing {
                    thread::sleep(pacing);
                }
            }
        })?;

    Ok(handle)
}

fn to_frame(mat: &Mat) -> Result<Frame> {
    let mut gray = match mat.channels() {
        1 => mat.try_clone()?,
        3 => {
            let mut gray = Mat::default();
            cvt_color_def(mat, &mut gray, COLOR_BGR2GRAY)?;
            gray
        }
        channels => bail!("unsupported {channels}-channel frame"),
    };
    if !gray.is_continuous() {
        gray = gray.try_clone()?;
    }

    Ok(Frame::new(
        gray.cols(),
        gray.rows(),
        gray.data_bytes()?.to_vec(),
    )?)
}
