use log::info;
use nalgebra::Vector3;
use opencv::core::{MatTraitConst, Point};

use crate::{Calibration, TiltModel};

/// Polar position of a pixel around the wide-field optical center.
///
/// `angle` is in degrees from the image `+x` axis, counter-clockwise positive with the image `y`
/// axis pointing up. `radius` is in pixels.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct AngleRadius {
    pub angle: f64,
    pub radius: f64,
}

/// Pan and tilt angles of the mechanism in degrees.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct MechanismPose {
    pub pan: f64,
    pub tilt: f64,
}

impl MechanismPose {
    pub fn new(pan: f64, tilt: f64) -> Self {
        Self { pan, tilt }
    }
}

/// Normalizes `angle` in degrees into `(-180, 180]`.
#[inline]
pub fn normalize(angle: f64) -> f64 {
    if angle > -180.0 && angle <= 180.0 {
        return angle;
    }

    let angle = angle.rem_euclid(360.0);
    if angle > 180.0 { angle - 360.0 } else { angle }
}

/// The optical center of a wide-field frame.
#[inline]
pub fn frame_center(frame: &impl MatTraitConst) -> Point {
    Point::new(frame.cols() / 2, frame.rows() / 2)
}

/// Converts `point` to polar coordinates around `center`.
///
/// Returns `None` when `point` is the center itself since it has no direction.
pub fn polar_from_pixel(point: Point, center: Point) -> Option<AngleRadius> {
    let dx = (point.x - center.x) as f64;
    let dy = (point.y - center.y) as f64;
    let radius = dx.hypot(dy);
    if radius == 0.0 {
        return None;
    }

    // Image y grows downward
    let angle = normalize(-dy.atan2(dx).to_degrees());
    Some(AngleRadius { angle, radius })
}

/// Converts polar coordinates around `center` back to the nearest pixel.
pub fn polar_to_pixel(radius: f64, angle: f64, center: Point) -> Point {
    let angle = angle.to_radians();
    let x = radius * angle.cos() + center.x as f64;
    let y = -radius * angle.sin() + center.y as f64;
    Point::new(x.round() as i32, y.round() as i32)
}

/// Registration between wide-field pixels and mechanism angles.
///
/// Everything is a pure function of the [`Calibration`] except the marker heading, which only
/// [`Transform::recalibrate`] changes.
#[derive(Clone, Debug)]
pub struct Transform {
    calibration: Calibration,
    mount_offset: Vector3<f64>,
    /// Planar distance from the wide-field camera to the pivot.
    mount_distance: f64,
    /// Planar direction from the wide-field camera to the pivot.
    mount_heading: f64,
}

impl Transform {
    pub fn new(calibration: Calibration) -> Self {
        let [dx, dy, dz] = calibration.mount_offset;
        Self {
            mount_offset: Vector3::new(dx, dy, dz),
            mount_distance: dx.hypot(dy),
            mount_heading: dy.atan2(dx).to_degrees(),
            calibration,
        }
    }

    #[inline]
    pub fn calibration(&self) -> &Calibration {
        &self.calibration
    }

    #[inline]
    pub fn marker_heading(&self) -> f64 {
        self.calibration.marker_heading
    }

    /// Recomputes the marker heading from the marker pixel and the frame center.
    ///
    /// Returns the new heading, or `None` and keeps the old one when both pixels coincide.
    pub fn recalibrate(&mut self, marker: Point, center: Point) -> Option<f64> {
        let heading = polar_from_pixel(marker, center)?.angle;
        info!(target: "transform", "marker heading {:.2} -> {heading:.2}", self.marker_heading());
        self.calibration.marker_heading = heading;
        self.calibration.marker_pixel = Some((marker.x, marker.y));
        Some(heading)
    }

    /// Computes the instantaneous mechanism pose aiming at the target seen at `polar`.
    ///
    /// Returns `None` for a zero radius or when the target coincides with the pivot.
    pub fn calculate_pan_tilt(&self, polar: AngleRadius) -> Option<MechanismPose> {
        if !(polar.radius > 0.0) {
            return None;
        }

        let theta = self.angle_to_theta(polar.angle);
        let phi = self.radius_to_phi(polar.radius);
        let camera_to_target = sphere_to_cart(self.calibration.target_range, theta, phi);
        let pivot_to_target = camera_to_target - self.mount_offset;
        let (_, azimuth, zenith) = cart_to_sphere(pivot_to_target)?;

        let pan = normalize(
            azimuth + self.calibration.marker_from_mechanism - self.calibration.payload_pan_offset,
        );
        let tilt = match self.calibration.tilt_model {
            TiltModel::Regression => self.radius_to_tilt_deg(polar.radius),
            TiltModel::Spherical => normalize(90.0 - zenith),
        };

        Some(MechanismPose { pan, tilt })
    }

    /// Converts an image angle to an angle from the marker.
    #[inline]
    pub fn angle_to_theta(&self, angle: f64) -> f64 {
        normalize(angle - self.calibration.marker_heading)
    }

    /// Converts an angle from the marker to an image angle.
    #[inline]
    pub fn theta_to_angle(&self, theta: f64) -> f64 {
        normalize(theta + self.calibration.marker_heading)
    }

    /// Converts a pixel radius to an angle from the zenith.
    #[inline]
    pub fn radius_to_phi(&self, radius: f64) -> f64 {
        normalize(self.calibration.lens_degrees_per_pixel * radius)
    }

    #[inline]
    pub fn radius_to_tilt_deg(&self, radius: f64) -> f64 {
        self.calibration.tilt_slope * radius + self.calibration.tilt_intercept
    }

    /// Inverse of [`Self::radius_to_tilt_deg`], `None` for a flat regression.
    #[inline]
    pub fn tilt_deg_to_radius(&self, tilt: f64) -> Option<f64> {
        if self.calibration.tilt_slope == 0.0 {
            return None;
        }
        Some((tilt - self.calibration.tilt_intercept) / self.calibration.tilt_slope)
    }

    /// Converts an image angle to a pan angle on the ground plane at the target range.
    pub fn angle_to_pan_deg(&self, angle: f64) -> f64 {
        let theta = self.angle_to_theta(angle).to_radians();
        let range = self.calibration.target_range;
        let x = range * theta.cos() - self.mount_offset.x;
        let y = range * theta.sin() - self.mount_offset.y;
        let azimuth = y.atan2(x).to_degrees();

        normalize(azimuth + self.calibration.marker_from_mechanism - self.calibration.payload_pan_offset)
    }

    /// Inverse of [`Self::angle_to_pan_deg`].
    ///
    /// Returns `None` when no point at the target range lies along the pan direction.
    pub fn pan_deg_to_angle(&self, pan: f64) -> Option<f64> {
        let azimuth =
            pan - self.calibration.marker_from_mechanism + self.calibration.payload_pan_offset;
        let sine = self.mount_distance
            * (azimuth + 180.0 - self.mount_heading).to_radians().sin()
            / self.calibration.target_range;
        if !(-1.0..=1.0).contains(&sine) {
            return None;
        }

        let theta = azimuth + sine.asin().to_degrees();
        Some(self.theta_to_angle(theta))
    }

    /// Projects a mechanism pose into the wide-field image.
    pub fn pose_to_pixel(&self, pose: MechanismPose, center: Point) -> Option<Point> {
        let angle = self.pan_deg_to_angle(pose.pan)?;
        let radius = self.tilt_deg_to_radius(pose.tilt)?;
        Some(polar_to_pixel(radius, angle, center))
    }
}

/// Converts spherical degrees (`theta` azimuth, `phi` from the zenith) to Cartesian.
#[inline]
fn sphere_to_cart(rho: f64, theta: f64, phi: f64) -> Vector3<f64> {
    let (theta, phi) = (theta.to_radians(), phi.to_radians());
    Vector3::new(
        rho * theta.cos() * phi.sin(),
        rho * theta.sin() * phi.sin(),
        rho * phi.cos(),
    )
}

/// Converts Cartesian to spherical `(rho, theta, phi)` in degrees, `None` at the origin.
#[inline]
fn cart_to_sphere(v: Vector3<f64>) -> Option<(f64, f64, f64)> {
    let rho = v.norm();
    if rho == 0.0 {
        return None;
    }

    let theta = v.y.atan2(v.x).to_degrees();
    let phi = (v.z / rho).clamp(-1.0, 1.0).acos().to_degrees();
    Some((rho, theta, phi))
}
