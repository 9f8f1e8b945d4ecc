use serde::{Deserialize, Serialize};
use strum::{Display, EnumIter, EnumString};

use super::deserialize_with_ok_or_default;

/// Mount geometry and lens coefficients registering the wide-field camera to the mechanism.
///
/// Distances are in meters and angles in degrees. The Cartesian frame is centered on the
/// wide-field camera with `x` pointing along the marker heading and `z` toward the zenith.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Calibration {
    /// Heading of the mechanism marker in the wide-field image, measured from the image `+x`
    /// axis, counter-clockwise positive.
    pub marker_heading: f64,
    /// Pixel position of the mechanism marker used to derive [`Self::marker_heading`].
    pub marker_pixel: Option<(i32, i32)>,
    /// Marker direction relative to the mechanism's pan zero.
    pub marker_from_mechanism: f64,
    /// Payload camera direction relative to the mechanism's pan zero.
    pub payload_pan_offset: f64,
    /// Offset from the wide-field camera to the mechanism pivot.
    pub mount_offset: [f64; 3],
    /// Assumed distance to the target.
    pub target_range: f64,
    /// Angle from the zenith per pixel of radius.
    pub lens_degrees_per_pixel: f64,
    /// `a` in `tilt = a * radius + b`.
    pub tilt_slope: f64,
    /// `b` in `tilt = a * radius + b`.
    pub tilt_intercept: f64,
    #[serde(deserialize_with = "deserialize_with_ok_or_default")]
    pub tilt_model: TiltModel,
}

impl Default for Calibration {
    fn default() -> Self {
        Self {
            marker_heading: -136.63,
            marker_pixel: None,
            marker_from_mechanism: 180.0,
            payload_pan_offset: 90.0,
            mount_offset: [-0.29, 0.09, 0.11],
            target_range: 1.5,
            lens_degrees_per_pixel: 0.4647,
            tilt_slope: -0.464,
            tilt_intercept: 90.351,
            tilt_model: TiltModel::default(),
        }
    }
}

/// How a pixel radius becomes a tilt angle.
#[derive(
    Clone, Copy, PartialEq, Default, Debug, Serialize, Deserialize, EnumIter, Display, EnumString,
)]
pub enum TiltModel {
    /// The fitted linear regression over radius.
    #[default]
    Regression,
    /// Elevation seen from the mechanism pivot after the 3-D registration.
    Spherical,
}
