//! Axis symbols, waypoints and the controller position cache

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Decimal places used whenever a position is compared or transmitted
pub const POSITION_DECIMALS: usize = 3;

/// Format a position the way it is sent to and compared against the controller
pub fn format_position(value: f64) -> String {
    format!("{:.*}", POSITION_DECIMALS, value)
}

/// A motion axis
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Axis {
    X,
    Y,
    Z,
    W,
}

#[derive(Debug, Error, PartialEq, Eq)]
#[error("Unknown axis '{0}', expected one of x, y, z, w")]
pub struct UnknownAxis(pub String);

impl Axis {
    /// Every axis the stage can carry, in wire order
    pub const ALL: [Axis; 4] = [Axis::X, Axis::Y, Axis::Z, Axis::W];

    /// Lowercase symbol used in configuration and sequence grammar
    pub fn symbol(&self) -> char {
        match self {
            Axis::X => 'x',
            Axis::Y => 'y',
            Axis::Z => 'z',
            Axis::W => 'w',
        }
    }

    /// Uppercase letter used in G-code
    pub fn letter(&self) -> char {
        self.symbol().to_ascii_uppercase()
    }

    /// Key under which the ambient context exposes this axis' position
    pub fn position_key(&self) -> String {
        format!("{}_pos", self.symbol())
    }

    pub fn from_symbol(symbol: char) -> Option<Axis> {
        match symbol.to_ascii_lowercase() {
            'x' => Some(Axis::X),
            'y' => Some(Axis::Y),
            'z' => Some(Axis::Z),
            'w' => Some(Axis::W),
            _ => None,
        }
    }
}

impl fmt::Display for Axis {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.symbol())
    }
}

impl FromStr for Axis {
    type Err = UnknownAxis;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut chars = s.trim().chars();
        match (chars.next(), chars.next()) {
            (Some(c), None) => Axis::from_symbol(c).ok_or_else(|| UnknownAxis(s.to_string())),
            _ => Err(UnknownAxis(s.to_string())),
        }
    }
}

/// Target position for one or more axes.
///
/// Axes absent from a waypoint are left where they are when it is visited.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Waypoint(BTreeMap<Axis, f64>);

impl Waypoint {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style setter
    pub fn with(mut self, axis: Axis, value: f64) -> Self {
        self.0.insert(axis, value);
        self
    }

    pub fn set(&mut self, axis: Axis, value: f64) {
        self.0.insert(axis, value);
    }

    pub fn get(&self, axis: Axis) -> Option<f64> {
        self.0.get(&axis).copied()
    }

    pub fn contains(&self, axis: Axis) -> bool {
        self.0.contains_key(&axis)
    }

    pub fn axes(&self) -> impl Iterator<Item = Axis> + '_ {
        self.0.keys().copied()
    }

    pub fn iter(&self) -> impl Iterator<Item = (Axis, f64)> + '_ {
        self.0.iter().map(|(axis, value)| (*axis, *value))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Largest absolute per-axis delta over the axes both waypoints define
    pub fn distance_to(&self, other: &Waypoint) -> f64 {
        self.iter()
            .filter_map(|(axis, value)| other.get(axis).map(|o| (o - value).abs()))
            .fold(0.0, f64::max)
    }

    /// Comma separated formatted values, e.g. `1.000,2.000,0.000`
    pub fn to_csv(&self) -> String {
        self.0
            .values()
            .map(|v| format_position(*v))
            .collect::<Vec<_>>()
            .join(",")
    }
}

impl FromIterator<(Axis, f64)> for Waypoint {
    fn from_iter<I: IntoIterator<Item = (Axis, f64)>>(iter: I) -> Self {
        Waypoint(iter.into_iter().collect())
    }
}

impl fmt::Display for Waypoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<String> = self
            .iter()
            .map(|(axis, value)| format!("{}={}", axis, format_position(value)))
            .collect();
        write!(f, "{}", parts.join(", "))
    }
}

/// Last known controller position, one formatted value per configured axis
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Position(BTreeMap<Axis, String>);

impl Position {
    /// Every axis starts at `0.000` until the controller reports otherwise
    pub fn zeroed(axes: &[Axis]) -> Self {
        Position(axes.iter().map(|a| (*a, format_position(0.0))).collect())
    }

    pub fn get(&self, axis: Axis) -> Option<&str> {
        self.0.get(&axis).map(String::as_str)
    }

    /// Numeric value of an axis, if the cached text parses
    pub fn value(&self, axis: Axis) -> Option<f64> {
        self.get(axis).and_then(|v| v.parse().ok())
    }

    /// Store a freshly reported value, formatted at the comparison precision
    pub fn update(&mut self, axis: Axis, value: f64) {
        self.0.insert(axis, format_position(value));
    }

    pub fn axes(&self) -> impl Iterator<Item = Axis> + '_ {
        self.0.keys().copied()
    }

    pub fn iter(&self) -> impl Iterator<Item = (Axis, &str)> + '_ {
        self.0.iter().map(|(axis, value)| (*axis, value.as_str()))
    }

    /// True when every axis of the target matches the cache at 3 decimals
    pub fn matches(&self, target: &Waypoint) -> bool {
        target
            .iter()
            .all(|(axis, value)| self.get(axis) == Some(format_position(value).as_str()))
    }

    /// Numeric copy of the cache
    pub fn to_waypoint(&self) -> Waypoint {
        self.axes()
            .filter_map(|axis| self.value(axis).map(|v| (axis, v)))
            .collect()
    }
}

impl fmt::Display for Position {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<String> = self
            .iter()
            .map(|(axis, value)| format!("{}={}", axis, value))
            .collect();
        write!(f, "{}", parts.join(", "))
    }
}
