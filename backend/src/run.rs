use std::{
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    thread,
    time::{Duration, Instant as StdInstant},
};

use anyhow::{Result, bail};
use log::{debug, error, info, warn};
use opencv::core::Point;
use platforms::{Error, capture::frame_channel};
use tokio::time::Instant;

use crate::{
    Calibration, PtuSettings, Settings,
    bridge::{Capture, DefaultCapture, DefaultLink, DryRunLink, Link, spawn_video_capture},
    control::{Axis, CommandError, CommandInterface},
    detect::{Detector, MotionDetector},
    mat::OwnedMat,
    predict::{MotionCommand, PredictiveController},
    transform::{MechanismPose, Transform, frame_center, polar_from_pixel},
};

/// What a single control cycle did.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Cycle {
    /// No new frame since the previous cycle.
    NoFrame,
    NoTarget,
    /// A target was detected but its geometry has no defined direction.
    Skipped,
    Commanded(MotionCommand),
}

/// A tracking episode kept open for a while after the last detection.
#[derive(Debug)]
struct Episode {
    linger: Duration,
    started: Option<Instant>,
    last_seen: Option<Instant>,
}

impl Episode {
    fn new(linger: Duration) -> Self {
        Self {
            linger,
            started: None,
            last_seen: None,
        }
    }

    /// Records a detection, returning `true` if it opened a new episode.
    fn seen(&mut self) -> bool {
        let now = Instant::now();
        self.last_seen = Some(now);
        if self.started.is_some() {
            return false;
        }
        self.started = Some(now);
        true
    }

    /// Closes the episode once the linger passed, returning how long it lasted.
    fn update(&mut self) -> Option<Duration> {
        let last_seen = self.last_seen?;
        if last_seen.elapsed() < self.linger {
            return None;
        }

        let started = self.started.take()?;
        self.last_seen = None;
        Some(last_seen.duration_since(started))
    }
}

/// The closed-loop control cycle from wide-field frames to mechanism commands.
#[derive(Debug)]
pub struct Tracker<C: Capture, D: Detector, L: Link> {
    capture: C,
    detector: D,
    transform: Transform,
    controller: PredictiveController,
    interface: CommandInterface<L>,
    ptu: PtuSettings,
    flip_vertical: bool,
    poll_interval: Duration,
    last_poll: Option<(Instant, MechanismPose)>,
    episode: Episode,
}

impl<C: Capture, D: Detector, L: Link> Tracker<C, D, L> {
    pub fn new(settings: &Settings, capture: C, detector: D, link: L) -> Self {
        Self {
            capture,
            detector,
            transform: Transform::new(settings.calibration.clone()),
            controller: PredictiveController::new(&settings.controller),
            interface: CommandInterface::from_settings(link, &settings.ptu),
            ptu: settings.ptu.clone(),
            flip_vertical: settings.capture.flip_vertical,
            poll_interval: Duration::from_millis(settings.ptu.poll_interval_millis),
            last_poll: None,
            episode: Episode::new(Duration::from_millis(
                settings.controller.episode_linger_millis,
            )),
        }
    }

    /// Prepares the mechanism and bounds the controller to its reachable range and rates.
    pub fn start(&mut self) -> Result<(), CommandError> {
        if self.ptu.terse {
            self.interface.set_terse()?;
        }
        self.interface.set_step_mode(Axis::Tilt, self.ptu.step_mode)?;
        self.interface.set_step_mode(Axis::Pan, self.ptu.step_mode)?;
        // Resolution depends on the step mode
        if self.ptu.query_limits {
            self.interface.setup()?;
        }
        let (pan, tilt) = self.interface.limits();
        self.controller.set_limits(pan, tilt);
        let (pan_speed, tilt_speed) = self.interface.speed_limits();
        self.controller.bound_speeds(pan_speed, tilt_speed);

        self.interface.set_speed_units(Axis::Pan, self.ptu.safe_speed)?;
        self.interface.set_speed_units(Axis::Tilt, self.ptu.safe_speed)?;
        Ok(())
    }

    /// Runs one control cycle.
    pub fn tick(&mut self) -> Result<Cycle> {
        let frame = match self.capture.grab() {
            Ok(frame) => frame,
            Err(Error::FrameNotReady) => return Ok(Cycle::NoFrame),
            Err(err) => return Err(err.into()),
        };
        let mat = OwnedMat::new(frame)?.to_mat(self.flip_vertical)?;

        let Some(point) = self.detector.detect(&mat)? else {
            self.idle();
            return Ok(Cycle::NoTarget);
        };
        if self.episode.seen() {
            info!(target: "tracker", "tracking started at {point:?}");
        }

        let center = frame_center(&mat);
        let Some(polar) = polar_from_pixel(point, center) else {
            debug!(target: "tracker", "target at frame center has no direction");
            return Ok(Cycle::Skipped);
        };
        let current = self.current_pose()?;
        if let Some(pixel) = self.transform.pose_to_pixel(current, center) {
            debug!(target: "tracker", "mechanism {current:?} aims at {pixel:?}, target {point:?}");
        }

        let Some(command) = self.controller.step(&self.transform, polar, current) else {
            debug!(target: "tracker", "no pose for {polar:?}");
            return Ok(Cycle::Skipped);
        };
        self.interface.set_speed(Axis::Pan, command.pan_speed)?;
        self.interface.set_speed(Axis::Tilt, command.tilt_speed)?;
        self.interface.set_position(Axis::Pan, command.pose.pan)?;
        self.interface.set_position(Axis::Tilt, command.pose.tilt)?;

        Ok(Cycle::Commanded(command))
    }

    /// Halts the mechanism and restores the safe slew speed.
    pub fn shutdown(&mut self) {
        if let Err(err) = self.interface.stop() {
            error!(target: "tracker", "failed to halt mechanism {err}");
        }
        for axis in [Axis::Pan, Axis::Tilt] {
            if let Err(err) = self.interface.set_speed_units(axis, self.ptu.safe_speed) {
                error!(target: "tracker", "failed to restore {axis} speed {err}");
            }
        }
    }

    fn idle(&mut self) {
        if self.controller.idle() {
            info!(target: "tracker", "target lost");
        }
        if let Some(duration) = self.episode.update() {
            info!(target: "tracker", "tracking ended after {}ms", duration.as_millis());
        }
    }

    fn current_pose(&mut self) -> Result<MechanismPose, CommandError> {
        if let Some((instant, pose)) = self.last_poll
            && instant.elapsed() < self.poll_interval
        {
            return Ok(pose);
        }

        let pose = self.interface.pose_and_speed()?.pose;
        self.last_poll = Some((Instant::now(), pose));
        Ok(pose)
    }
}

/// Runs the tracker until `exit` is set or the frame source closes.
pub fn run(settings: Settings, dry_run: bool, exit: Arc<AtomicBool>) -> Result<()> {
    if dry_run {
        info!(target: "tracker", "dry run, no commands reach the mechanism");
        run_with_link(&settings, DryRunLink::default(), exit)
    } else {
        run_with_link(&settings, DefaultLink::open(&settings.transport)?, exit)
    }
}

fn run_with_link(settings: &Settings, link: impl Link, exit: Arc<AtomicBool>) -> Result<()> {
    let (sender, receiver) = frame_channel();
    let _capture_handle = spawn_video_capture(&settings.capture, sender)?;
    let detector = MotionDetector::new(&settings.detector)?;
    let mut tracker = Tracker::new(settings, DefaultCapture::new(receiver), detector, link);
    tracker.start()?;

    loop_with_fps(settings.capture.fps, &exit, || match tracker.tick() {
        Ok(_) => (),
        Err(err) if err.downcast_ref::<Error>() == Some(&Error::FrameSourceClosed) => {
            warn!(target: "tracker", "frame source closed");
            exit.store(true, Ordering::Release);
        }
        Err(err) => error!(target: "tracker", "cycle failed {err:#}"),
    });
    tracker.shutdown();

    Ok(())
}

/// Recomputes the marker heading from `marker` and the center of the next frame from `capture`.
pub fn calibrate(
    capture: &mut impl Capture,
    calibration: &mut Calibration,
    marker: Point,
    timeout: Duration,
) -> Result<f64> {
    let start = StdInstant::now();
    let frame = loop {
        match capture.grab() {
            Ok(frame) => break frame,
            Err(Error::FrameNotReady) if start.elapsed() < timeout => {
                thread::sleep(Duration::from_millis(10));
            }
            Err(err) => return Err(err.into()),
        }
    };

    let center = Point::new(frame.width / 2, frame.height / 2);
    let mut transform = Transform::new(calibration.clone());
    let Some(heading) = transform.recalibrate(marker, center) else {
        bail!("marker {marker:?} is the frame center");
    };
    *calibration = transform.calibration().clone();

    Ok(heading)
}

/// Recalibrates `settings` against the configured video source.
pub fn calibrate_from_source(settings: &mut Settings, marker: Point) -> Result<f64> {
    let (sender, receiver) = frame_channel();
    let _capture_handle = spawn_video_capture(&settings.capture, sender)?;
    let mut capture = DefaultCapture::new(receiver);

    calibrate(
        &mut capture,
        &mut settings.calibration,
        marker,
        Duration::from_secs(5),
    )
}

#[inline]
fn loop_with_fps(fps: u32, exit: &AtomicBool, mut on_tick: impl FnMut()) {
    #[cfg(debug_assertions)]
    const LOG_INTERVAL_SECS: u64 = 5;

    let nanos_per_frame = (1_000_000_000 / fps.max(1)) as u128;
    #[cfg(debug_assertions)]
    let mut last_logged_instant = StdInstant::now();

    while !exit.load(Ordering::Acquire) {
        let start = StdInstant::now();

        on_tick();

        let now = StdInstant::now();
        let elapsed_duration = now.duration_since(start);
        let elapsed_nanos = elapsed_duration.as_nanos();
        if elapsed_nanos <= nanos_per_frame {
            thread::sleep(Duration::new(0, (nanos_per_frame - elapsed_nanos) as u32));
        } else {
            #[cfg(debug_assertions)]
            if now.duration_since(last_logged_instant).as_secs() >= LOG_INTERVAL_SECS {
                last_logged_instant = now;
                debug!(target: "tracker", "ticking running late at {}ms", elapsed_duration.as_millis());
            }
        }
    }
}
