use std::{fs, path::Path, path::PathBuf};

use anyhow::{Context, Result, bail};
use log::info;
use serde::{Deserialize, Deserializer, Serialize};
use strum::{Display, EnumIter, EnumString};

use super::{Calibration, deserialize_over, deserialize_with_ok_or_default};

#[derive(Clone, Debug, PartialEq, Default, Serialize, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub transport: TransportSettings,
    #[serde(default)]
    pub capture: CaptureSettings,
    #[serde(default)]
    pub detector: DetectorSettings,
    #[serde(default)]
    pub calibration: Calibration,
    #[serde(default)]
    pub controller: ControllerSettings,
    #[serde(default)]
    pub ptu: PtuSettings,
}

impl Settings {
    /// Loads settings from `path`, writing the defaults there first if the file does not exist.
    pub fn load(path: impl AsRef<Path>) -> Result<Settings> {
        let path = path.as_ref();
        if !path.exists() {
            info!(target: "settings", "{} not found, writing defaults", path.display());
            let settings = Settings::default();
            settings.save(path)?;
            return Ok(settings);
        }

        let json = fs::read_to_string(path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        let settings = serde_json::from_str::<Settings>(&json)
            .with_context(|| format!("failed to parse {}", path.display()))?;
        settings
            .validate()
            .with_context(|| format!("invalid settings in {}", path.display()))?;
        Ok(settings)
    }

    /// Rejects values the control loop cannot work with.
    pub fn validate(&self) -> Result<()> {
        let controller = &self.controller;
        for (name, limits) in [
            ("pan_speed", controller.pan_speed),
            ("tilt_speed", controller.tilt_speed),
        ] {
            if !limits.is_valid() {
                bail!("{name} needs 0 <= min <= max, got {limits:?}");
            }
        }
        if self.detector.min_area > self.detector.max_area {
            bail!(
                "detector min_area {} exceeds max_area {}",
                self.detector.min_area,
                self.detector.max_area
            );
        }
        for (name, axis) in [("pan", self.ptu.pan), ("tilt", self.ptu.tilt)] {
            if !(axis.resolution_arcsec > 0.0) {
                bail!("{name} resolution must be positive");
            }
            let (min_position, max_position) = axis.position_range;
            let (min_speed, max_speed) = axis.speed_range;
            if min_position > max_position || min_speed > max_speed {
                bail!("{name} ranges must be ordered");
            }
        }
        Ok(())
    }

    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let json = serde_json::to_string_pretty(self)?;
        fs::write(path, json).with_context(|| format!("failed to write {}", path.display()))
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransportSettings {
    #[serde(deserialize_with = "deserialize_with_ok_or_default")]
    pub kind: TransportKind,
    /// A device path for [`TransportKind::Device`] or `host:port` for [`TransportKind::Tcp`].
    pub address: String,
    pub command_terminator: String,
    /// Only honored by [`TransportKind::Tcp`].
    pub read_timeout_millis: Option<u64>,
}

impl Default for TransportSettings {
    fn default() -> Self {
        Self {
            kind: TransportKind::default(),
            address: "/dev/ttyS0".to_string(),
            command_terminator: " ".to_string(),
            read_timeout_millis: None,
        }
    }
}

#[derive(
    Clone, Copy, PartialEq, Default, Debug, Serialize, Deserialize, EnumIter, Display, EnumString,
)]
pub enum TransportKind {
    #[default]
    Device,
    Tcp,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureSettings {
    /// A camera index such as `"1"`, or a video file path or stream URL.
    pub source: String,
    pub fps: u32,
    /// Whether wide-field frames arrive upside down.
    pub flip_vertical: bool,
}

impl Default for CaptureSettings {
    fn default() -> Self {
        Self {
            source: "1".to_string(),
            fps: 30,
            flip_vertical: true,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectorSettings {
    /// Minimum frame delta accepted as motion.
    pub threshold: u8,
    pub min_area: i32,
    pub max_area: i32,
    /// Minimum intensity at a region centroid for it to be tracked.
    pub min_intensity: u8,
    /// Grayscale mask image where black pixels are ignored.
    pub mask_path: Option<PathBuf>,
    /// How long without detection before the background is captured again.
    pub background_refresh_millis: u64,
}

impl Default for DetectorSettings {
    fn default() -> Self {
        Self {
            threshold: 5,
            min_area: 2,
            max_area: 1500,
            min_intensity: 20,
            mask_path: None,
            background_refresh_millis: 300_000,
        }
    }
}

/// Slew rate bounds in degrees per second.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct SpeedLimits {
    pub min: f64,
    pub max: f64,
}

impl SpeedLimits {
    #[inline]
    pub fn is_valid(&self) -> bool {
        self.min >= 0.0 && self.min <= self.max
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ControllerSettings {
    /// Multiplier from remaining distance in degrees to slew rate in degrees per second.
    pub speed_gain: f64,
    #[serde(deserialize_with = "pan_speed_over_default")]
    pub pan_speed: SpeedLimits,
    #[serde(deserialize_with = "tilt_speed_over_default")]
    pub tilt_speed: SpeedLimits,
    /// How long without detection before the track is dropped.
    pub grace_millis: u64,
    /// How long a tracking episode stays open after the last detection.
    pub episode_linger_millis: u64,
}

impl Default for ControllerSettings {
    fn default() -> Self {
        Self {
            speed_gain: 4.0,
            pan_speed: SpeedLimits {
                min: 5.0,
                max: 150.0,
            },
            tilt_speed: SpeedLimits { min: 1.0, max: 60.0 },
            grace_millis: 1000,
            episode_linger_millis: 5000,
        }
    }
}

fn pan_speed_over_default<'de, D: Deserializer<'de>>(
    deserializer: D,
) -> Result<SpeedLimits, D::Error> {
    deserialize_over(deserializer, ControllerSettings::default().pan_speed)
}

fn tilt_speed_over_default<'de, D: Deserializer<'de>>(
    deserializer: D,
) -> Result<SpeedLimits, D::Error> {
    deserialize_over(deserializer, ControllerSettings::default().tilt_speed)
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct AxisSettings {
    /// Arc-seconds per native step, replaced by the mechanism's answer at setup.
    pub resolution_arcsec: f64,
    /// Position bounds in native steps, replaced by the mechanism's answer at setup.
    pub position_range: (i32, i32),
    /// Speed bounds in native steps per second.
    pub speed_range: (i32, i32),
    /// Whether positive degrees map to negative steps.
    pub inverted: bool,
    /// Degrees reported at native step zero.
    pub offset_deg: f64,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PtuSettings {
    #[serde(deserialize_with = "pan_over_default")]
    pub pan: AxisSettings,
    #[serde(deserialize_with = "tilt_over_default")]
    pub tilt: AxisSettings,
    /// Query resolution and position bounds from the mechanism at setup.
    pub query_limits: bool,
    /// Enables terse feedback at setup.
    pub terse: bool,
    #[serde(deserialize_with = "deserialize_with_ok_or_default")]
    pub step_mode: StepMode,
    /// Speed in native steps per second set at startup and restored on shutdown.
    pub safe_speed: i32,
    /// Minimum interval between pose read-backs. Zero polls every cycle.
    pub poll_interval_millis: u64,
}

impl Default for PtuSettings {
    fn default() -> Self {
        Self {
            pan: AxisSettings {
                resolution_arcsec: 185.1428,
                position_range: (-3081, 3081),
                speed_range: (1, 4000),
                inverted: false,
                offset_deg: 0.0,
            },
            tilt: AxisSettings {
                resolution_arcsec: 185.1428,
                position_range: (-2324, 2324),
                speed_range: (1, 4000),
                inverted: true,
                offset_deg: 45.0,
            },
            query_limits: true,
            terse: true,
            step_mode: StepMode::Half,
            safe_speed: 500,
            poll_interval_millis: 0,
        }
    }
}

fn pan_over_default<'de, D: Deserializer<'de>>(
    deserializer: D,
) -> Result<AxisSettings, D::Error> {
    deserialize_over(deserializer, PtuSettings::default().pan)
}

fn tilt_over_default<'de, D: Deserializer<'de>>(
    deserializer: D,
) -> Result<AxisSettings, D::Error> {
    deserialize_over(deserializer, PtuSettings::default().tilt)
}

/// Stepper resolution modes understood by the firmware.
#[derive(
    Clone, Copy, PartialEq, Eq, Default, Debug, Serialize, Deserialize, EnumIter, Display, EnumString,
)]
pub enum StepMode {
    #[strum(to_string = "F")]
    Full,
    #[default]
    #[strum(to_string = "H")]
    Half,
    #[strum(to_string = "Q")]
    Quarter,
    #[strum(to_string = "E")]
    Eighth,
    #[strum(to_string = "A")]
    Auto,
}
