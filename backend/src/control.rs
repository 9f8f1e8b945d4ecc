use std::ops::RangeInclusive;

use log::{debug, info, warn};
use strum::{Display, EnumIter};
use thiserror::Error;

use crate::{
    AxisSettings, PtuSettings, StepMode,
    bridge::Link,
    protocol::{Command, Reply, numbers},
    transform::MechanismPose,
};

const ARCSEC_PER_DEGREE: f64 = 3600.0;

#[derive(Error, PartialEq, Clone, Debug)]
pub enum CommandError {
    #[error("{value} is outside {min}..={max}")]
    OutOfRange { value: i64, min: i32, max: i32 },
    #[error("{0} is not a finite number")]
    InvalidInput(f64),
    #[error("reply {0:?} carries no value")]
    MalformedReply(String),
    #[error("command rejected: {0}")]
    Rejected(String),
    #[error(transparent)]
    Transport(#[from] platforms::Error),
}

#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug, Display, EnumIter)]
pub enum Axis {
    Pan,
    Tilt,
}

impl Axis {
    /// The wire code of this axis followed by `suffix`, such as `pp` or `tr`.
    pub(crate) fn code(self, suffix: char) -> String {
        let prefix = match self {
            Axis::Pan => 'p',
            Axis::Tilt => 't',
        };
        format!("{prefix}{suffix}")
    }
}

/// Conversion and bounds of one axis in native steps.
#[derive(Clone, Copy, PartialEq, Debug)]
pub struct AxisConfig {
    pub resolution_arcsec: f64,
    pub position_range: (i32, i32),
    pub speed_range: (i32, i32),
    pub inverted: bool,
    pub offset_deg: f64,
}

impl From<AxisSettings> for AxisConfig {
    fn from(value: AxisSettings) -> Self {
        Self {
            resolution_arcsec: value.resolution_arcsec,
            position_range: value.position_range,
            speed_range: value.speed_range,
            inverted: value.inverted,
            offset_deg: value.offset_deg,
        }
    }
}

impl AxisConfig {
    #[inline]
    fn sign(&self) -> f64 {
        if self.inverted { -1.0 } else { 1.0 }
    }

    /// Converts degrees to native steps, truncating toward zero.
    pub fn deg_to_units(&self, deg: f64) -> Result<i64, CommandError> {
        to_units(
            self.sign() * ARCSEC_PER_DEGREE * (deg - self.offset_deg) / self.resolution_arcsec,
            deg,
        )
    }

    pub fn units_to_deg(&self, units: i32) -> f64 {
        self.sign() * units as f64 * self.resolution_arcsec / ARCSEC_PER_DEGREE + self.offset_deg
    }

    /// Converts a slew rate magnitude in degrees per second to native steps per second.
    ///
    /// Speeds carry neither the inversion nor the offset.
    pub fn speed_to_units(&self, deg_per_sec: f64) -> Result<i64, CommandError> {
        to_units(
            ARCSEC_PER_DEGREE * deg_per_sec / self.resolution_arcsec,
            deg_per_sec,
        )
    }

    pub fn units_to_speed(&self, units: i32) -> f64 {
        units as f64 * self.resolution_arcsec / ARCSEC_PER_DEGREE
    }

    /// The reachable position range in degrees, ordered.
    pub fn position_degrees(&self) -> RangeInclusive<f64> {
        let first = self.units_to_deg(self.position_range.0);
        let second = self.units_to_deg(self.position_range.1);
        first.min(second)..=first.max(second)
    }

    /// The accepted slew rate range in degrees per second.
    pub fn speed_degrees(&self) -> RangeInclusive<f64> {
        self.units_to_speed(self.speed_range.0)..=self.units_to_speed(self.speed_range.1)
    }
}

#[inline]
fn to_units(units: f64, input: f64) -> Result<i64, CommandError> {
    if !units.is_finite() {
        return Err(CommandError::InvalidInput(input));
    }
    Ok(units.trunc().clamp(i64::MIN as f64, i64::MAX as f64) as i64)
}

#[inline]
fn check_range(value: i64, (min, max): (i32, i32)) -> Result<i32, CommandError> {
    if value < min as i64 || value > max as i64 {
        return Err(CommandError::OutOfRange { value, min, max });
    }
    Ok(value as i32)
}

#[inline]
fn round_hundredths(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

/// Positions and instantaneous speeds read back from the mechanism in degrees.
#[derive(Clone, Copy, PartialEq, Debug)]
pub struct PoseReading {
    pub pose: MechanismPose,
    pub pan_speed: f64,
    pub tilt_speed: f64,
}

#[derive(Debug)]
struct AxisState {
    config: AxisConfig,
    last_position: Option<i32>,
    last_speed: Option<i32>,
}

impl AxisState {
    fn new(config: AxisConfig) -> Self {
        Self {
            config,
            last_position: None,
            last_speed: None,
        }
    }
}

/// Range-checked and deduplicated commands to the pan-tilt mechanism.
///
/// Setters only write when the native value differs from the last value the mechanism accepted.
/// A failed write leaves that value untouched so retrying is never skipped.
#[derive(Debug)]
pub struct CommandInterface<L: Link> {
    link: L,
    pan: AxisState,
    tilt: AxisState,
}

impl<L: Link> CommandInterface<L> {
    pub fn new(link: L, pan: AxisConfig, tilt: AxisConfig) -> Self {
        Self {
            link,
            pan: AxisState::new(pan),
            tilt: AxisState::new(tilt),
        }
    }

    pub fn from_settings(link: L, settings: &PtuSettings) -> Self {
        Self::new(link, settings.pan.into(), settings.tilt.into())
    }

    #[inline]
    pub fn config(&self, axis: Axis) -> &AxisConfig {
        &self.axis(axis).config
    }

    /// Reachable pan and tilt ranges in degrees.
    pub fn limits(&self) -> (RangeInclusive<f64>, RangeInclusive<f64>) {
        (
            self.pan.config.position_degrees(),
            self.tilt.config.position_degrees(),
        )
    }

    /// Accepted pan and tilt slew rates in degrees per second.
    pub fn speed_limits(&self) -> (RangeInclusive<f64>, RangeInclusive<f64>) {
        (
            self.pan.config.speed_degrees(),
            self.tilt.config.speed_degrees(),
        )
    }

    /// Queries resolution and position bounds, keeping the configured ones on unusable replies.
    pub fn setup(&mut self) -> Result<(), CommandError> {
        for axis in [Axis::Pan, Axis::Tilt] {
            match self.resolution(axis) {
                Ok(resolution) if resolution > 0.0 => {
                    self.axis_mut(axis).config.resolution_arcsec = resolution;
                }
                Ok(_) | Err(CommandError::MalformedReply(_) | CommandError::Rejected(_)) => {
                    warn!(target: "ptu", "keeping configured {axis} resolution");
                }
                Err(err) => return Err(err),
            }

            let default = self.axis(axis).config.position_range;
            let min = self.query_bound(Command::MinPosition(axis), default.0)?;
            let max = self.query_bound(Command::MaxPosition(axis), default.1)?;
            let config = &mut self.axis_mut(axis).config;
            config.position_range = (min, max);
            info!(
                target: "ptu",
                "{axis} resolution {} arcsec, range {min}..={max}",
                config.resolution_arcsec
            );
        }
        Ok(())
    }

    fn query_bound(&mut self, command: Command, default: i32) -> Result<i32, CommandError> {
        match self.query(command) {
            Ok(value) => Ok(value.round() as i32),
            Err(CommandError::MalformedReply(_) | CommandError::Rejected(_)) => {
                warn!(target: "ptu", "keeping configured bound {default} for {}", command.encode());
                Ok(default)
            }
            Err(err) => Err(err),
        }
    }

    /// Commands `axis` to `deg`, returning the accepted position rounded to hundredths.
    pub fn set_position(&mut self, axis: Axis, deg: f64) -> Result<f64, CommandError> {
        let config = self.axis(axis).config;
        let units = check_range(config.deg_to_units(deg)?, config.position_range)?;
        let accepted = self.set_position_units(axis, units)?;
        Ok(round_hundredths(config.units_to_deg(accepted)))
    }

    /// Commands `axis` to native `units`, returning the echoed native position.
    pub fn set_position_units(&mut self, axis: Axis, units: i32) -> Result<i32, CommandError> {
        let state = self.axis(axis);
        let units = check_range(units as i64, state.config.position_range)?;
        if state.last_position == Some(units) {
            return Ok(units);
        }

        let accepted = self.write_value(Command::Position(axis, Some(units)), units)?;
        self.axis_mut(axis).last_position = Some(units);
        Ok(accepted)
    }

    /// Sets the slew rate magnitude of `axis`, returning the accepted rate rounded to hundredths.
    pub fn set_speed(&mut self, axis: Axis, deg_per_sec: f64) -> Result<f64, CommandError> {
        let config = self.axis(axis).config;
        let units = check_range(config.speed_to_units(deg_per_sec)?, config.speed_range)?;
        let accepted = self.set_speed_units(axis, units)?;
        Ok(round_hundredths(config.units_to_speed(accepted)))
    }

    pub fn set_speed_units(&mut self, axis: Axis, units: i32) -> Result<i32, CommandError> {
        let state = self.axis(axis);
        let units = check_range(units as i64, state.config.speed_range)?;
        if state.last_speed == Some(units) {
            return Ok(units);
        }

        let accepted = self.write_value(Command::Speed(axis, Some(units)), units)?;
        self.axis_mut(axis).last_speed = Some(units);
        Ok(accepted)
    }

    /// Halts both axes, always writing and forgetting the last positions.
    pub fn stop(&mut self) -> Result<(), CommandError> {
        self.pan.last_position = None;
        self.tilt.last_position = None;
        match Reply::parse(&self.send(Command::Halt)?) {
            Reply::Rejected(reply) => Err(CommandError::Rejected(reply)),
            _ => Ok(()),
        }
    }

    /// Reads the current position of `axis` in degrees.
    pub fn position(&mut self, axis: Axis) -> Result<f64, CommandError> {
        let units = self.query(Command::Position(axis, None))?.round() as i32;
        Ok(self.axis(axis).config.units_to_deg(units))
    }

    /// Reads the configured slew rate of `axis` in degrees per second.
    pub fn speed(&mut self, axis: Axis) -> Result<f64, CommandError> {
        let units = self.query(Command::Speed(axis, None))?.round() as i32;
        Ok(self.axis(axis).config.units_to_speed(units))
    }

    /// Reads the arc-seconds per native step of `axis`.
    pub fn resolution(&mut self, axis: Axis) -> Result<f64, CommandError> {
        self.query(Command::Resolution(axis))
    }

    /// Reads both positions and instantaneous speeds in a single round trip.
    pub fn pose_and_speed(&mut self) -> Result<PoseReading, CommandError> {
        let reply = self.send(Command::PositionAndSpeed)?;
        if let Reply::Rejected(reply) = Reply::parse(&reply) {
            return Err(CommandError::Rejected(reply));
        }
        let [pan, tilt, pan_speed, tilt_speed] = numbers(&reply)[..] else {
            return Err(CommandError::MalformedReply(reply));
        };

        let pan_config = &self.pan.config;
        let tilt_config = &self.tilt.config;
        Ok(PoseReading {
            pose: MechanismPose {
                pan: pan_config.units_to_deg(pan.round() as i32),
                tilt: tilt_config.units_to_deg(tilt.round() as i32),
            },
            pan_speed: pan_config.units_to_speed(pan_speed.round() as i32).abs(),
            tilt_speed: tilt_config.units_to_speed(tilt_speed.round() as i32).abs(),
        })
    }

    pub fn set_terse(&mut self) -> Result<(), CommandError> {
        self.acknowledge(Command::Terse)
    }

    /// Switches `axis` to `mode` unless the mechanism already reports it.
    pub fn set_step_mode(&mut self, axis: Axis, mode: StepMode) -> Result<(), CommandError> {
        let reply = self.send(Command::StepMode(axis, None))?;
        if reply.contains(&mode.to_string()) {
            debug!(target: "ptu", "{axis} already in step mode {mode}");
            return Ok(());
        }
        self.acknowledge(Command::StepMode(axis, Some(mode)))
    }

    /// Raises both axis speeds to `speed_units` and re-homes the mechanism.
    pub fn reset(&mut self, speed_units: i32) -> Result<(), CommandError> {
        self.set_speed_units(Axis::Pan, speed_units)?;
        self.set_speed_units(Axis::Tilt, speed_units)?;
        self.pan.last_position = None;
        self.tilt.last_position = None;
        self.acknowledge(Command::Reset)
    }

    fn write_value(&mut self, command: Command, sent: i32) -> Result<i32, CommandError> {
        match Reply::parse(&self.send(command)?) {
            Reply::Value(value) => Ok(value.round() as i32),
            Reply::Ack => Ok(sent),
            Reply::Rejected(reply) => Err(CommandError::Rejected(reply)),
            Reply::Malformed(reply) => Err(CommandError::MalformedReply(reply)),
        }
    }

    fn query(&mut self, command: Command) -> Result<f64, CommandError> {
        match Reply::parse(&self.send(command)?) {
            Reply::Value(value) => Ok(value),
            Reply::Rejected(reply) => Err(CommandError::Rejected(reply)),
            Reply::Ack => Err(CommandError::MalformedReply("*".to_string())),
            Reply::Malformed(reply) => Err(CommandError::MalformedReply(reply)),
        }
    }

    fn acknowledge(&mut self, command: Command) -> Result<(), CommandError> {
        match Reply::parse(&self.send(command)?) {
            Reply::Rejected(reply) => Err(CommandError::Rejected(reply)),
            Reply::Malformed(reply) => Err(CommandError::MalformedReply(reply)),
            Reply::Value(_) | Reply::Ack => Ok(()),
        }
    }

    fn send(&mut self, command: Command) -> Result<String, CommandError> {
        let line = command.encode();
        let reply = self.link.write_line(&line)?;
        debug!(target: "ptu", "{line} -> {reply}");
        Ok(reply)
    }

    #[inline]
    fn axis(&self, axis: Axis) -> &AxisState {
        match axis {
            Axis::Pan => &self.pan,
            Axis::Tilt => &self.tilt,
        }
    }

    #[inline]
    fn axis_mut(&mut self, axis: Axis) -> &mut AxisState {
        match axis {
            Axis::Pan => &mut self.pan,
            Axis::Tilt => &mut self.tilt,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bridge::MockLink;

    fn interface(link: MockLink) -> CommandInterface<MockLink> {
        CommandInterface::from_settings(link, &PtuSettings::default())
    }

    fn coarse_axis() -> AxisConfig {
        AxisConfig {
            resolution_arcsec: 3600.0,
            position_range: (-400, 400),
            speed_range: (1, 100),
            inverted: false,
            offset_deg: 0.0,
        }
    }

    #[test]
    fn set_position_deduplicates_writes() {
        let mut link = MockLink::new();
        link.expect_write_line()
            .withf(|line| line == "pp100")
            .once()
            .returning(|_| Ok("*".to_string()));
        let mut interface = CommandInterface::new(link, coarse_axis(), coarse_axis());

        assert_eq!(interface.set_position(Axis::Pan, 100.4), Ok(100.0));
        assert_eq!(interface.set_position(Axis::Pan, 100.9), Ok(100.0));
    }

    #[test]
    fn set_position_out_of_range_skips_write() {
        let mut link = MockLink::new();
        link.expect_write_line()
            .withf(|line| line == "pp100")
            .once()
            .returning(|_| Ok("* 100".to_string()));
        let mut interface = CommandInterface::new(link, coarse_axis(), coarse_axis());

        assert_eq!(
            interface.set_position(Axis::Pan, 500.0),
            Err(CommandError::OutOfRange {
                value: 500,
                min: -400,
                max: 400
            })
        );
        // Nothing was cached so the next in-range value is written
        assert_eq!(interface.set_position(Axis::Pan, 100.0), Ok(100.0));
    }

    #[test]
    fn set_position_non_finite_is_invalid() {
        let mut interface = CommandInterface::new(MockLink::new(), coarse_axis(), coarse_axis());

        assert!(matches!(
            interface.set_position(Axis::Tilt, f64::NAN),
            Err(CommandError::InvalidInput(_))
        ));
        assert!(matches!(
            interface.set_speed(Axis::Pan, f64::INFINITY),
            Err(CommandError::InvalidInput(_))
        ));
    }

    #[test]
    fn set_position_malformed_reply_keeps_cache() {
        let mut link = MockLink::new();
        link.expect_write_line()
            .withf(|line| line == "pp-20")
            .times(2)
            .returning(|_| Ok("garbage".to_string()));
        let mut interface = CommandInterface::new(link, coarse_axis(), coarse_axis());

        for _ in 0..2 {
            assert_eq!(
                interface.set_position(Axis::Pan, -20.0),
                Err(CommandError::MalformedReply("garbage".to_string()))
            );
        }
    }

    #[test]
    fn set_position_transport_error_keeps_cache() {
        let mut link = MockLink::new();
        let mut replies = vec![Ok("*".to_string()), Err(platforms::Error::TransportTimeout)];
        link.expect_write_line()
            .withf(|line| line == "tp5")
            .times(2)
            .returning(move |_| replies.pop().unwrap());
        let mut interface = CommandInterface::new(link, coarse_axis(), coarse_axis());

        assert_eq!(
            interface.set_position(Axis::Tilt, 5.0),
            Err(CommandError::Transport(platforms::Error::TransportTimeout))
        );
        assert_eq!(interface.set_position(Axis::Tilt, 5.0), Ok(5.0));
    }

    #[test]
    fn set_position_rejected() {
        let mut link = MockLink::new();
        link.expect_write_line()
            .returning(|_| Ok("! Maximum allowable Pan position is 3090".to_string()));
        let mut interface = CommandInterface::new(link, coarse_axis(), coarse_axis());

        assert!(matches!(
            interface.set_position(Axis::Pan, 10.0),
            Err(CommandError::Rejected(_))
        ));
    }

    #[test]
    fn stop_bypasses_deduplication() {
        let mut link = MockLink::new();
        link.expect_write_line()
            .withf(|line| line == "pp10")
            .times(2)
            .returning(|_| Ok("*".to_string()));
        link.expect_write_line()
            .withf(|line| line == "H")
            .times(2)
            .returning(|_| Ok("*".to_string()));
        let mut interface = CommandInterface::new(link, coarse_axis(), coarse_axis());

        assert_eq!(interface.set_position(Axis::Pan, 10.0), Ok(10.0));
        assert_eq!(interface.stop(), Ok(()));
        assert_eq!(interface.stop(), Ok(()));
        assert_eq!(interface.set_position(Axis::Pan, 10.0), Ok(10.0));
    }

    #[test]
    fn set_position_tilt_is_inverted_and_offset() {
        let mut link = MockLink::new();
        link.expect_write_line()
            .withf(|line| line == "tp0")
            .once()
            .returning(|_| Ok("*".to_string()));
        link.expect_write_line()
            .withf(|line| line == "tp291")
            .once()
            .returning(|_| Ok("*".to_string()));
        let mut interface = interface(link);

        assert_eq!(interface.set_position(Axis::Tilt, 45.0), Ok(45.0));
        assert_eq!(interface.set_position(Axis::Tilt, 30.0), Ok(30.03));
    }

    #[test]
    fn set_speed_is_unsigned_magnitude() {
        let mut link = MockLink::new();
        link.expect_write_line()
            .withf(|line| line == "ts2916")
            .once()
            .returning(|_| Ok("*".to_string()));
        let mut interface = interface(link);

        let accepted = interface.set_speed(Axis::Tilt, 150.0).unwrap();
        assert!((accepted - 149.97).abs() < 1e-9);
        assert!(matches!(
            interface.set_speed(Axis::Pan, -5.0),
            Err(CommandError::OutOfRange { .. })
        ));
    }

    #[test]
    fn units_round_trip_within_one_step() {
        let settings = PtuSettings::default();
        for config in [AxisConfig::from(settings.pan), AxisConfig::from(settings.tilt)] {
            let step = config.resolution_arcsec / ARCSEC_PER_DEGREE;
            for deg in (-150..=150).map(|deg| deg as f64 * 0.37) {
                let units = config.deg_to_units(deg).unwrap() as i32;

                assert!((config.units_to_deg(units) - deg).abs() < step, "{deg}");
            }
        }
    }

    #[test]
    fn position_degrees_are_ordered() {
        let tilt = AxisConfig::from(PtuSettings::default().tilt);

        let range = tilt.position_degrees();

        assert!(range.start() < range.end());
        assert!((range.start() - (45.0 - 2324.0 * 185.1428 / 3600.0)).abs() < 1e-9);
    }

    #[test]
    fn setup_replaces_resolution_and_bounds() {
        let mut link = MockLink::new();
        link.expect_write_line()
            .times(6)
            .returning(|line| match line {
                "pr" => Ok("* 92.5714 seconds arc per position".to_string()),
                "pn" => Ok("* -6000".to_string()),
                "px" => Ok("* 6000".to_string()),
                "tr" => Ok("garbage".to_string()),
                "tn" => Ok("* -900".to_string()),
                "tx" => Ok("! not supported".to_string()),
                _ => unreachable!(),
            });
        let mut interface = interface(link);

        interface.setup().unwrap();

        let pan = interface.config(Axis::Pan);
        assert_eq!(pan.resolution_arcsec, 92.5714);
        assert_eq!(pan.position_range, (-6000, 6000));
        let tilt = interface.config(Axis::Tilt);
        assert_eq!(tilt.resolution_arcsec, 185.1428);
        assert_eq!(tilt.position_range, (-900, 2324));
    }

    #[test]
    fn setup_propagates_transport_error() {
        let mut link = MockLink::new();
        link.expect_write_line()
            .once()
            .returning(|_| Err(platforms::Error::TransportClosed));
        let mut interface = interface(link);

        assert_eq!(
            interface.setup(),
            Err(CommandError::Transport(platforms::Error::TransportClosed))
        );
    }

    #[test]
    fn position_tilt_is_inverted_and_offset() {
        let mut link = MockLink::new();
        link.expect_write_line()
            .withf(|line| line == "pp")
            .returning(|_| Ok("* Current Pan position is -40".to_string()));
        link.expect_write_line()
            .withf(|line| line == "tp")
            .returning(|_| Ok("* 40".to_string()));
        let mut interface = CommandInterface::new(
            link,
            coarse_axis(),
            AxisConfig {
                inverted: true,
                offset_deg: 45.0,
                ..coarse_axis()
            },
        );

        assert_eq!(interface.position(Axis::Pan), Ok(-40.0));
        assert_eq!(interface.position(Axis::Tilt), Ok(5.0));
    }

    #[test]
    fn speed_ignores_inversion_and_offset() {
        let mut link = MockLink::new();
        link.expect_write_line()
            .withf(|line| line == "ts")
            .returning(|_| Ok("* Target tilt speed is 30".to_string()));
        let mut interface = CommandInterface::new(
            link,
            coarse_axis(),
            AxisConfig {
                inverted: true,
                offset_deg: 45.0,
                ..coarse_axis()
            },
        );

        assert_eq!(interface.speed(Axis::Tilt), Ok(30.0));
    }

    #[test]
    fn queries_without_value_are_malformed() {
        let mut link = MockLink::new();
        link.expect_write_line()
            .withf(|line| line == "tr")
            .returning(|_| Ok("*".to_string()));
        link.expect_write_line()
            .withf(|line| line == "ps")
            .returning(|_| Ok("! illegal".to_string()));
        let mut interface = interface(link);

        assert_eq!(
            interface.resolution(Axis::Tilt),
            Err(CommandError::MalformedReply("*".to_string()))
        );
        assert_eq!(
            interface.speed(Axis::Pan),
            Err(CommandError::Rejected("! illegal".to_string()))
        );
    }

    #[test]
    fn resolution_reads_arc_seconds() {
        let mut link = MockLink::new();
        link.expect_write_line()
            .withf(|line| line == "pr")
            .returning(|_| Ok("* 92.5714 seconds arc per position".to_string()));
        let mut interface = interface(link);

        assert_eq!(interface.resolution(Axis::Pan), Ok(92.5714));
        // Reading does not replace the configured resolution
        assert_eq!(interface.config(Axis::Pan).resolution_arcsec, 185.1428);
    }

    #[test]
    fn speed_limits_follow_resolution() {
        let mut interface = CommandInterface::new(MockLink::new(), coarse_axis(), coarse_axis());

        let (pan, _) = interface.speed_limits();
        assert_eq!(pan, 1.0..=100.0);

        interface.pan.config.resolution_arcsec = 1800.0;
        let (pan, _) = interface.speed_limits();
        assert_eq!(pan, 0.5..=50.0);
    }

    #[test]
    fn pose_and_speed_converts_all_fields() {
        let mut link = MockLink::new();
        link.expect_write_line()
            .withf(|line| line == "B")
            .returning(|_| Ok("* 3600,-3600,36,-72".to_string()));
        let mut interface = CommandInterface::new(
            link,
            coarse_axis(),
            AxisConfig {
                inverted: true,
                offset_deg: 45.0,
                position_range: (-4000, 4000),
                ..coarse_axis()
            },
        );

        let reading = interface.pose_and_speed().unwrap();
        assert_eq!(reading.pose, MechanismPose::new(3600.0, 3645.0));
        assert_eq!(reading.pan_speed, 36.0);
        assert_eq!(reading.tilt_speed, 72.0);
    }

    #[test]
    fn pose_and_speed_needs_four_values() {
        let mut link = MockLink::new();
        link.expect_write_line()
            .returning(|_| Ok("* 1,2".to_string()));
        let mut interface = interface(link);

        assert_eq!(
            interface.pose_and_speed(),
            Err(CommandError::MalformedReply("* 1,2".to_string()))
        );
    }

    #[test]
    fn set_step_mode_skips_when_already_set() {
        let mut link = MockLink::new();
        link.expect_write_line()
            .withf(|line| line == "WP")
            .once()
            .returning(|_| Ok("* H".to_string()));
        link.expect_write_line()
            .withf(|line| line == "WT")
            .once()
            .returning(|_| Ok("* F".to_string()));
        link.expect_write_line()
            .withf(|line| line == "WTH")
            .once()
            .returning(|_| Ok("*".to_string()));
        let mut interface = interface(link);

        assert_eq!(interface.set_step_mode(Axis::Pan, StepMode::Half), Ok(()));
        assert_eq!(interface.set_step_mode(Axis::Tilt, StepMode::Half), Ok(()));
    }

    #[test]
    fn reset_sets_speeds_then_homes() {
        let mut link = MockLink::new();
        let mut sequence = mockall::Sequence::new();
        for line in ["ps1000", "ts1000", "R"] {
            link.expect_write_line()
                .withf(move |sent| sent == line)
                .once()
                .in_sequence(&mut sequence)
                .returning(|_| Ok("*".to_string()));
        }
        let mut interface = interface(link);

        assert_eq!(interface.reset(1000), Ok(()));
    }
}
