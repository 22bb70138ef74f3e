//! Firmware wire dialects
//!
//! | dialect | banner   | position query           | report line                          | calibration               |
//! |---------|----------|--------------------------|--------------------------------------|---------------------------|
//! | grbl    | `Grbl`   | `?` (no terminator)      | `<Idle\|MPos:0.000,0.000,0.000\|...>` | `$100..$103=1/microstep`  |
//! | marlin  | `Marlin` | `M114\n`, skip two lines | `X:0.00 Y:0.00 Z:0.00 E:0.00 ...`     | none                      |
//!
//! Both dialects move with `G0 G90 G53 X.. Y..` and acknowledge commands with
//! a bare `ok` line. Grbl jogs with a single `$J=` command, Marlin switches to
//! relative mode around a plain `G0`.

use crate::controller::motor::Motor;
use crate::core::axis::{format_position, Axis, Waypoint};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Acknowledgement line sent after every accepted command
pub const ACK: &str = "ok";

/// Soft reset (ctrl-x)
pub const SOFT_RESET: &str = "\x18";

/// First Grbl setting register holding steps per unit
const GRBL_STEPS_REGISTER: usize = 100;

/// Firmware flavour spoken by the controller
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Dialect {
    #[default]
    Grbl,
    Marlin,
}

/// How to ask the firmware where it is
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PositionQuery {
    pub command: &'static str,

    /// Whether the query is followed by a line terminator
    pub terminated: bool,

    /// Lines to discard before the report
    pub skip_lines: usize,
}

impl Dialect {
    /// Text the second line after connecting must contain
    pub fn banner(&self) -> &'static str {
        match self {
            Dialect::Grbl => "Grbl",
            Dialect::Marlin => "Marlin",
        }
    }

    pub fn position_query(&self) -> PositionQuery {
        match self {
            Dialect::Grbl => PositionQuery {
                command: "?",
                terminated: false,
                skip_lines: 0,
            },
            Dialect::Marlin => PositionQuery {
                command: "M114",
                terminated: true,
                skip_lines: 2,
            },
        }
    }

    /// Compile the report pattern for this dialect
    pub fn position_pattern(&self) -> Result<Regex, regex::Error> {
        match self {
            Dialect::Grbl => Regex::new(r"MPos:(?P<values>-?\d+(?:\.\d+)?(?:,-?\d+(?:\.\d+)?)*)"),
            Dialect::Marlin => Regex::new(r"(?P<axis>[XYZW]):\s*(?P<value>-?\d+(?:\.\d+)?)"),
        }
    }

    /// Extract axis values from a position report.
    ///
    /// Grbl values are positional and map onto `axes` in order; Marlin values
    /// are labelled, and everything after `Count` (stepper counts) is ignored.
    /// Returns `None` when the line is not a position report.
    pub fn parse_position(&self, pattern: &Regex, line: &str, axes: &[Axis]) -> Option<Vec<(Axis, f64)>> {
        match self {
            Dialect::Grbl => {
                let caps = pattern.captures(line)?;
                let values = caps.name("values")?.as_str();
                values
                    .split(',')
                    .zip(axes.iter())
                    .map(|(value, axis)| value.parse::<f64>().ok().map(|v| (*axis, v)))
                    .collect()
            }
            Dialect::Marlin => {
                let report = line.split("Count").next().unwrap_or(line);
                let mut parsed: Vec<(Axis, f64)> = Vec::new();
                for caps in pattern.captures_iter(report) {
                    let axis = caps["axis"].parse::<Axis>().ok()?;
                    let value = caps["value"].parse::<f64>().ok()?;
                    if axes.contains(&axis) && !parsed.iter().any(|(a, _)| *a == axis) {
                        parsed.push((axis, value));
                    }
                }
                if parsed.is_empty() {
                    None
                } else {
                    Some(parsed)
                }
            }
        }
    }

    /// Per-motor setup commands sent after the banner check
    pub fn calibration_commands(&self, motors: &[Motor]) -> Vec<String> {
        match self {
            Dialect::Grbl => motors
                .iter()
                .enumerate()
                .map(|(idx, motor)| format!("${}={}", GRBL_STEPS_REGISTER + idx, motor.steps_per_unit()))
                .collect(),
            Dialect::Marlin => Vec::new(),
        }
    }

    /// Absolute rapid move in machine coordinates, e.g. `G0 G90 G53 X1.000 Y2.000`
    pub fn move_command(&self, waypoint: &Waypoint) -> String {
        let targets: Vec<String> = waypoint
            .iter()
            .map(|(axis, value)| format!("{}{}", axis.letter(), format_position(value)))
            .collect();
        format!("G0 G90 G53 {}", targets.join(" "))
    }

    /// Relative jog of one axis, each command acknowledged separately
    pub fn jog_commands(&self, axis: Axis, delta: f64, feed_rate: u32) -> Vec<String> {
        match self {
            Dialect::Grbl => vec![format!("$J=G91{}{:.4}F{}", axis.letter(), delta, feed_rate)],
            Dialect::Marlin => vec![
                "G91".to_string(),
                format!("G0 {}{:.4} F{}", axis.letter(), delta, feed_rate),
                "G90".to_string(),
            ],
        }
    }
}

impl fmt::Display for Dialect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Dialect::Grbl => write!(f, "grbl"),
            Dialect::Marlin => write!(f, "marlin"),
        }
    }
}
