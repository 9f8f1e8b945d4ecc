mod bridge;
mod control;
mod detect;
mod mat;
mod models;
mod predict;
mod protocol;
mod run;
mod transform;

pub use {
    bridge::{
        Capture, DefaultCapture, DefaultLink, DryRunLink, Link, spawn_video_capture,
    },
    control::{Axis, AxisConfig, CommandError, CommandInterface, PoseReading},
    detect::{Detector, MotionDetector},
    mat::OwnedMat,
    models::*,
    opencv::core::Point,
    predict::{MotionCommand, PredictiveController, TrackState},
    run::{Cycle, Tracker, calibrate, calibrate_from_source, run},
    strum::{IntoEnumIterator, ParseError},
    transform::{
        AngleRadius, MechanismPose, Transform, frame_center, normalize, polar_from_pixel,
        polar_to_pixel,
    },
};
