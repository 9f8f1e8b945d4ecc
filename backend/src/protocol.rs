//! Wire format of the pan-tilt firmware.
//!
//! Commands are ASCII `<code><value>` without the space terminator, which the transport appends.
//! Replies are free-form text where `*` acknowledges, `!` rejects and the first signed integer or
//! decimal token carries any value.

use crate::{StepMode, control::Axis};

/// A single firmware command.
///
/// Variants carrying an `Option` query the current value when it is `None`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Command {
    Position(Axis, Option<i32>),
    Speed(Axis, Option<i32>),
    /// Arc-seconds per native step.
    Resolution(Axis),
    MinPosition(Axis),
    MaxPosition(Axis),
    StepMode(Axis, Option<StepMode>),
    /// Positions followed by instantaneous speeds of both axes.
    PositionAndSpeed,
    /// Terse feedback.
    Terse,
    Halt,
    Reset,
}

impl Command {
    pub fn encode(&self) -> String {
        match *self {
            Command::Position(axis, value) => with_value(axis.code('p'), value),
            Command::Speed(axis, value) => with_value(axis.code('s'), value),
            Command::Resolution(axis) => axis.code('r'),
            Command::MinPosition(axis) => axis.code('n'),
            Command::MaxPosition(axis) => axis.code('x'),
            Command::StepMode(axis, mode) => {
                let code = match axis {
                    Axis::Pan => "WP",
                    Axis::Tilt => "WT",
                };
                match mode {
                    Some(mode) => format!("{code}{mode}"),
                    None => code.to_string(),
                }
            }
            Command::PositionAndSpeed => "B".to_string(),
            Command::Terse => "FT".to_string(),
            Command::Halt => "H".to_string(),
            Command::Reset => "R".to_string(),
        }
    }
}

#[inline]
fn with_value(code: String, value: Option<i32>) -> String {
    match value {
        Some(value) => format!("{code}{value}"),
        None => code,
    }
}

/// Classification of a reply line.
#[derive(Clone, Debug, PartialEq)]
pub enum Reply {
    /// The first numeric token of the reply.
    Value(f64),
    /// An acknowledgement without a value.
    Ack,
    Rejected(String),
    Malformed(String),
}

impl Reply {
    pub fn parse(reply: &str) -> Reply {
        if reply.contains('!') {
            return Reply::Rejected(reply.trim().to_string());
        }
        if let Some(value) = first_number(reply) {
            return Reply::Value(value);
        }
        if reply.trim_start().starts_with('*') {
            return Reply::Ack;
        }
        Reply::Malformed(reply.trim().to_string())
    }
}

#[inline]
pub fn first_number(reply: &str) -> Option<f64> {
    Numbers::new(reply).next()
}

/// Extracts every signed integer or decimal token from `reply` in order.
pub fn numbers(reply: &str) -> Vec<f64> {
    Numbers::new(reply).collect()
}

struct Numbers<'a> {
    bytes: &'a [u8],
    position: usize,
}

impl<'a> Numbers<'a> {
    fn new(reply: &'a str) -> Self {
        Self {
            bytes: reply.as_bytes(),
            position: 0,
        }
    }
}

impl Iterator for Numbers<'_> {
    type Item = f64;

    fn next(&mut self) -> Option<f64> {
        while self.position < self.bytes.len() {
            let rest = &self.bytes[self.position..];
            match number_len(rest) {
                Some(len) => {
                    self.position += len;
                    // Only ASCII sign, digits and dot are matched
                    let token = std::str::from_utf8(&rest[..len]).ok()?;
                    return token.parse().ok();
                }
                None => self.position += 1,
            }
        }
        None
    }
}

/// Length of `[-+]?\d*\.\d+|[-+]?\d+` matched at the start of `bytes`.
fn number_len(bytes: &[u8]) -> Option<usize> {
    let digits = |from: usize| {
        bytes[from..]
            .iter()
            .take_while(|byte| byte.is_ascii_digit())
            .count()
    };

    let sign = usize::from(matches!(bytes.first(), Some(b'-' | b'+')));
    let integer = digits(sign);
    let mut len = sign + integer;
    if bytes.get(len) == Some(&b'.') {
        let fraction = digits(len + 1);
        if fraction > 0 {
            len += 1 + fraction;
        }
    }

    (len > sign).then_some(len)
}
