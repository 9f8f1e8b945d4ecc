use std::{ops::RangeInclusive, time::Duration};

use log::debug;
use tokio::time::Instant;

use crate::{
    ControllerSettings, SpeedLimits,
    transform::{AngleRadius, MechanismPose, Transform, normalize},
};

/// A commanded pose with per-axis slew rates in degrees per second.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct MotionCommand {
    pub pose: MechanismPose,
    pub pan_speed: f64,
    pub tilt_speed: f64,
}

/// Cross-cycle state of the current track.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct TrackState {
    /// Instantaneous pose of the last step, before prediction.
    pub previous: MechanismPose,
    /// Last commanded pose.
    pub target: MechanismPose,
    last_seen: Instant,
}

/// Extrapolates the target one sample ahead to compensate for command latency.
#[derive(Debug)]
pub struct PredictiveController {
    speed_gain: f64,
    pan_speed: SpeedLimits,
    tilt_speed: SpeedLimits,
    pan_limits: RangeInclusive<f64>,
    tilt_limits: RangeInclusive<f64>,
    grace: Duration,
    track: Option<TrackState>,
}

impl PredictiveController {
    pub fn new(settings: &ControllerSettings) -> Self {
        Self {
            speed_gain: settings.speed_gain,
            pan_speed: settings.pan_speed,
            tilt_speed: settings.tilt_speed,
            pan_limits: f64::NEG_INFINITY..=f64::INFINITY,
            tilt_limits: f64::NEG_INFINITY..=f64::INFINITY,
            grace: Duration::from_millis(settings.grace_millis),
            track: None,
        }
    }

    /// Bounds commanded poses to the mechanism's reachable range in degrees.
    pub fn set_limits(&mut self, pan: RangeInclusive<f64>, tilt: RangeInclusive<f64>) {
        debug!(target: "controller", "pose limits pan {pan:?} tilt {tilt:?}");
        self.pan_limits = pan;
        self.tilt_limits = tilt;
    }

    /// Narrows the configured slew rates to the range the mechanism accepts in degrees per second.
    pub fn bound_speeds(&mut self, pan: RangeInclusive<f64>, tilt: RangeInclusive<f64>) {
        self.pan_speed = narrow(self.pan_speed, &pan);
        self.tilt_speed = narrow(self.tilt_speed, &tilt);
        debug!(
            target: "controller",
            "speed limits pan {:?} tilt {:?}",
            self.pan_speed, self.tilt_speed
        );
    }

    #[inline]
    pub fn track(&self) -> Option<&TrackState> {
        self.track.as_ref()
    }

    #[inline]
    pub fn is_tracking(&self) -> bool {
        self.track.is_some()
    }

    /// Computes the next command for the target detected at `polar`.
    ///
    /// Returns `None` without touching the track when the geometry is degenerate.
    pub fn step(
        &mut self,
        transform: &Transform,
        polar: AngleRadius,
        current: MechanismPose,
    ) -> Option<MotionCommand> {
        let instantaneous = transform.calculate_pan_tilt(polar)?;
        let predicted = match self.track {
            Some(track) => extrapolate(track.previous, instantaneous),
            None => {
                debug!(target: "controller", "track started at {instantaneous:?}");
                instantaneous
            }
        };
        let pose = MechanismPose {
            pan: clamp(predicted.pan, &self.pan_limits),
            tilt: clamp(predicted.tilt, &self.tilt_limits),
        };

        let pan_speed = self.speed(pose.pan - current.pan, self.pan_speed);
        let tilt_speed = self.speed(pose.tilt - current.tilt, self.tilt_speed);
        self.track = Some(TrackState {
            previous: instantaneous,
            target: pose,
            last_seen: Instant::now(),
        });

        Some(MotionCommand {
            pose,
            pan_speed,
            tilt_speed,
        })
    }

    /// Called on cycles without a detection, dropping the track once the grace period passes.
    ///
    /// Returns `true` if the track was dropped.
    pub fn idle(&mut self) -> bool {
        let Some(track) = self.track else {
            return false;
        };
        if track.last_seen.elapsed() < self.grace {
            return false;
        }

        debug!(target: "controller", "track lost after {:?}", self.grace);
        self.track = None;
        true
    }

    pub fn reset(&mut self) {
        self.track = None;
    }

    /// Never panics on inverted limits, the maximum wins.
    #[inline]
    fn speed(&self, distance: f64, limits: SpeedLimits) -> f64 {
        (distance.abs() * self.speed_gain)
            .max(limits.min)
            .min(limits.max)
    }
}

/// First-order extrapolation `2 * current - previous`, with pan taken the short way around.
#[inline]
fn extrapolate(previous: MechanismPose, current: MechanismPose) -> MechanismPose {
    let pan_delta = normalize(current.pan - previous.pan);
    MechanismPose {
        pan: normalize(current.pan + pan_delta),
        tilt: current.tilt + (current.tilt - previous.tilt),
    }
}

#[inline]
fn clamp(value: f64, limits: &RangeInclusive<f64>) -> f64 {
    value.max(*limits.start()).min(*limits.end())
}

#[inline]
fn narrow(limits: SpeedLimits, range: &RangeInclusive<f64>) -> SpeedLimits {
    let max = limits.max.min(*range.end());
    SpeedLimits {
        min: limits.min.max(*range.start()).min(max),
        max,
    }
}

#[cfg(test)]
mod tests {
    use tokio::time::advance;

    use super::*;
    use crate::Calibration;

    fn transform() -> Transform {
        Transform::new(Calibration {
            marker_heading: 0.0,
            marker_from_mechanism: 0.0,
            payload_pan_offset: 0.0,
            mount_offset: [0.0, 0.0, 0.0],
            ..Calibration::default()
        })
    }

    fn polar(angle: f64, radius: f64) -> AngleRadius {
        AngleRadius { angle, radius }
    }

    #[test]
    fn step_first_cycle_commands_instantaneous_pose() {
        let transform = transform();
        let mut controller = PredictiveController::new(&ControllerSettings::default());
        let instantaneous = transform.calculate_pan_tilt(polar(0.0, 40.0)).unwrap();

        let command = controller
            .step(&transform, polar(0.0, 40.0), instantaneous)
            .unwrap();

        assert_eq!(command.pose, instantaneous);
        assert_eq!(command.pan_speed, 5.0);
        assert_eq!(command.tilt_speed, 1.0);
        assert!(controller.is_tracking());
    }

    #[test]
    fn step_stationary_target_is_idempotent() {
        let transform = transform();
        let mut controller = PredictiveController::new(&ControllerSettings::default());
        let current = MechanismPose::new(0.0, 0.0);

        let first = controller.step(&transform, polar(33.3, 71.0), current).unwrap();
        let second = controller.step(&transform, polar(33.3, 71.0), current).unwrap();

        assert_eq!(first.pose, second.pose);
        assert_eq!(
            controller.track().unwrap().previous,
            transform.calculate_pan_tilt(polar(33.3, 71.0)).unwrap()
        );
    }

    #[test]
    fn step_extrapolates_constant_velocity() {
        let transform = transform();
        let mut controller = PredictiveController::new(&ControllerSettings::default());
        let current = MechanismPose::new(0.0, 60.0);

        let _ = controller.step(&transform, polar(10.0, 40.0), current);
        let command = controller.step(&transform, polar(20.0, 50.0), current).unwrap();

        assert!((command.pose.pan - 30.0).abs() < 1e-9);
        let expected_tilt = transform.radius_to_tilt_deg(60.0);
        assert!((command.pose.tilt - expected_tilt).abs() < 1e-9);
    }

    #[test]
    fn step_extrapolates_across_pan_wrap() {
        let transform = transform();
        let mut controller = PredictiveController::new(&ControllerSettings::default());
        let current = MechanismPose::default();

        let _ = controller.step(&transform, polar(170.0, 40.0), current);
        let command = controller.step(&transform, polar(-170.0, 40.0), current).unwrap();

        assert!((command.pose.pan + 150.0).abs() < 1e-9);
    }

    #[test]
    fn step_clamps_speeds_per_axis() {
        let transform = transform();
        let mut controller = PredictiveController::new(&ControllerSettings::default());

        let far = controller
            .step(&transform, polar(120.0, 40.0), MechanismPose::new(-120.0, -50.0))
            .unwrap();
        assert_eq!(far.pan_speed, 150.0);
        assert_eq!(far.tilt_speed, 60.0);

        controller.reset();
        let pose = transform.calculate_pan_tilt(polar(10.0, 40.0)).unwrap();
        let near = controller
            .step(
                &transform,
                polar(10.0, 40.0),
                MechanismPose::new(pose.pan - 3.0, pose.tilt - 2.5),
            )
            .unwrap();
        assert!((near.pan_speed - 12.0).abs() < 1e-9);
        assert!((near.tilt_speed - 10.0).abs() < 1e-9);
    }

    #[test]
    fn bound_speeds_narrows_to_mechanism_range() {
        let transform = transform();
        let mut controller = PredictiveController::new(&ControllerSettings::default());
        controller.bound_speeds(0.05..=102.8, 0.05..=0.5);

        let command = controller
            .step(&transform, polar(120.0, 40.0), MechanismPose::new(-120.0, -50.0))
            .unwrap();

        assert_eq!(command.pan_speed, 102.8);
        assert_eq!(command.tilt_speed, 0.5);
    }

    #[test]
    fn step_inverted_speed_limits_do_not_panic() {
        let transform = transform();
        let mut controller = PredictiveController::new(&ControllerSettings {
            pan_speed: SpeedLimits { min: 50.0, max: 10.0 },
            ..ControllerSettings::default()
        });

        let command = controller
            .step(&transform, polar(10.0, 40.0), MechanismPose::default())
            .unwrap();

        assert_eq!(command.pan_speed, 10.0);
    }

    #[test]
    fn step_clamps_pose_to_limits() {
        let transform = transform();
        let mut controller = PredictiveController::new(&ControllerSettings::default());
        controller.set_limits(-100.0..=100.0, 0.0..=45.0);

        let command = controller
            .step(&transform, polar(150.0, 40.0), MechanismPose::default())
            .unwrap();

        assert_eq!(command.pose.pan, 100.0);
        assert_eq!(command.pose.tilt, 45.0);
        // Prediction still follows the unclamped pose
        assert!((controller.track().unwrap().previous.pan - 150.0).abs() < 1e-9);
    }

    #[test]
    fn step_degenerate_radius_keeps_track() {
        let transform = transform();
        let mut controller = PredictiveController::new(&ControllerSettings::default());
        let _ = controller.step(&transform, polar(10.0, 40.0), MechanismPose::default());
        let track = *controller.track().unwrap();

        assert_eq!(
            controller.step(&transform, polar(10.0, 0.0), MechanismPose::default()),
            None
        );
        assert_eq!(controller.track(), Some(&track));
    }

    #[tokio::test(start_paused = true)]
    async fn idle_drops_track_after_grace() {
        let transform = transform();
        let mut controller = PredictiveController::new(&ControllerSettings::default());
        assert!(!controller.idle());
        let _ = controller.step(&transform, polar(10.0, 40.0), MechanismPose::default());

        advance(Duration::from_millis(999)).await;
        assert!(!controller.idle());
        assert!(controller.is_tracking());

        advance(Duration::from_millis(1)).await;
        assert!(controller.idle());
        assert!(!controller.is_tracking());
    }
}
