//! Waypoint sequences
//!
//! A sequence is built once, either from the compact range grammar
//! (`x(0,10,1)y(0,5,2.5)`), from a list of coordinate tuples, or from a CSV
//! table, and can then be walked from the start any number of times.

use crate::core::axis::{Axis, Waypoint};
use regex::Regex;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Tolerance used when comparing generated values against a range stop
const RANGE_EPSILON: f64 = 1e-9;

/// Upper bound on the number of waypoints a grammar may expand to
pub const MAX_WAYPOINTS: usize = 1_000_000;

/// Errors raised while building a sequence
#[derive(Debug, Error)]
pub enum SequenceError {
    #[error("Invalid sequence grammar: {0}")]
    Grammar(String),

    #[error("Axis '{0}' is not configured")]
    Axis(String),

    #[error("Invalid coordinate '{value}' in row {row}")]
    Coordinate { row: usize, value: String },

    #[error("Failed to read coordinates from {path}: {source}")]
    Csv {
        path: PathBuf,
        #[source]
        source: csv::Error,
    },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// One `axis(start,stop,step)` clause
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AxisRange {
    pub axis: Axis,
    pub start: f64,
    pub stop: f64,
    pub step: f64,
}

impl AxisRange {
    /// Enumerate the values of this range.
    ///
    /// Enumeration always starts at `start`. Ascending ranges include `stop`,
    /// descending ranges stop short of it, and a zero step or a step pointing
    /// away from `stop` yields only `start`.
    pub fn values(&self) -> Result<Vec<f64>, SequenceError> {
        let mut values = vec![self.start];
        if self.step == 0.0 {
            return Ok(values);
        }

        for i in 1u64.. {
            let value = self.start + i as f64 * self.step;
            let within = if self.step > 0.0 {
                value <= self.stop + RANGE_EPSILON
            } else {
                value > self.stop + RANGE_EPSILON
            };
            if !within {
                break;
            }
            if values.len() >= MAX_WAYPOINTS {
                return Err(SequenceError::Grammar(format!(
                    "axis '{}' expands to more than {} values",
                    self.axis, MAX_WAYPOINTS
                )));
            }
            values.push(value);
        }
        Ok(values)
    }
}

/// An ordered, immutable list of waypoints
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Sequence {
    waypoints: Vec<Waypoint>,
}

impl Sequence {
    /// Empty sequence, used by interactive sessions
    pub fn interactive() -> Self {
        Self::default()
    }

    pub fn from_waypoints(waypoints: Vec<Waypoint>) -> Self {
        Self { waypoints }
    }

    /// Parse the range grammar into its clauses, checking every axis against
    /// the configured set
    pub fn parse_grammar(grammar: &str, axes: &[Axis]) -> Result<Vec<AxisRange>, SequenceError> {
        if grammar.trim().is_empty() {
            return Err(SequenceError::Grammar("empty sequence".to_string()));
        }

        let clause = Regex::new(
            r"(?P<axis>[A-Za-z])\s*\(\s*(?P<start>[^,()]+),(?P<stop>[^,()]+),(?P<step>[^,()]+)\)",
        )
        .map_err(|e| SequenceError::Grammar(e.to_string()))?;

        let mut ranges: Vec<AxisRange> = Vec::new();
        let mut cursor = 0;

        for caps in clause.captures_iter(grammar) {
            let whole = caps.get(0).map(|m| (m.start(), m.end())).unwrap_or((cursor, cursor));
            check_separator(&grammar[cursor..whole.0])?;
            cursor = whole.1;

            let symbol = &caps["axis"];
            let axis: Axis = symbol
                .parse()
                .map_err(|_| SequenceError::Axis(symbol.to_string()))?;
            if !axes.contains(&axis) {
                return Err(SequenceError::Axis(symbol.to_string()));
            }
            if ranges.iter().any(|r| r.axis == axis) {
                return Err(SequenceError::Grammar(format!("axis '{}' appears more than once", axis)));
            }

            ranges.push(AxisRange {
                axis,
                start: parse_bound(&caps["start"])?,
                stop: parse_bound(&caps["stop"])?,
                step: parse_bound(&caps["step"])?,
            });
        }
        check_separator(&grammar[cursor..])?;

        if ranges.is_empty() {
            return Err(SequenceError::Grammar(format!("no axis clauses in '{}'", grammar)));
        }
        if ranges.len() > axes.len().min(Axis::ALL.len()) {
            return Err(SequenceError::Grammar(format!(
                "{} clauses for {} configured axes",
                ranges.len(),
                axes.len()
            )));
        }

        Ok(ranges)
    }

    /// Generate the Cartesian traversal described by the grammar.
    ///
    /// The first clause is the outermost, slowest-varying loop.
    pub fn generate(grammar: &str, axes: &[Axis]) -> Result<Self, SequenceError> {
        let ranges = Self::parse_grammar(grammar, axes)?;

        let mut waypoints = vec![Waypoint::new()];
        for range in &ranges {
            let values = range.values()?;
            if waypoints.len().saturating_mul(values.len()) > MAX_WAYPOINTS {
                return Err(SequenceError::Grammar(format!(
                    "sequence expands to more than {} waypoints",
                    MAX_WAYPOINTS
                )));
            }
            waypoints = waypoints
                .iter()
                .flat_map(|wp| values.iter().map(move |v| wp.clone().with(range.axis, *v)))
                .collect();
        }

        Ok(Self { waypoints })
    }

    /// Build a sequence from coordinate tuples.
    ///
    /// Tuple positions map onto the configured axes in order; `None` cells
    /// leave that axis out of the waypoint.
    pub fn from_coordinates(rows: &[Vec<Option<f64>>], axes: &[Axis]) -> Result<Self, SequenceError> {
        let mut waypoints = Vec::with_capacity(rows.len());
        for (row_idx, row) in rows.iter().enumerate() {
            if row.len() > axes.len() {
                return Err(SequenceError::Axis(format!(
                    "row {} has {} values for {} configured axes",
                    row_idx + 1,
                    row.len(),
                    axes.len()
                )));
            }
            let waypoint: Waypoint = axes
                .iter()
                .zip(row.iter())
                .filter_map(|(axis, value)| value.map(|v| (*axis, v)))
                .collect();
            waypoints.push(waypoint);
        }
        Ok(Self { waypoints })
    }

    /// Load coordinates from a headerless CSV file, one waypoint per row
    pub fn from_csv<P: AsRef<Path>>(path: P, axes: &[Axis]) -> Result<Self, SequenceError> {
        let path = path.as_ref();
        let mut reader = csv::ReaderBuilder::new()
            .has_headers(false)
            .flexible(true)
            .trim(csv::Trim::All)
            .from_path(path)
            .map_err(|source| SequenceError::Csv { path: path.to_path_buf(), source })?;

        let mut rows = Vec::new();
        for (row_idx, record) in reader.records().enumerate() {
            let record = record.map_err(|source| SequenceError::Csv { path: path.to_path_buf(), source })?;
            let mut row = Vec::with_capacity(record.len());
            for cell in record.iter() {
                if cell.is_empty() {
                    row.push(None);
                } else {
                    let value = cell.parse::<f64>().map_err(|_| SequenceError::Coordinate {
                        row: row_idx + 1,
                        value: cell.to_string(),
                    })?;
                    row.push(Some(value));
                }
            }
            if row.iter().any(Option::is_some) {
                rows.push(row);
            }
        }

        Self::from_coordinates(&rows, axes)
    }

    /// Estimated travel: for each consecutive pair, the largest per-axis
    /// delta over the axes both waypoints define
    pub fn distance(&self) -> f64 {
        self.waypoints
            .windows(2)
            .map(|pair| pair[0].distance_to(&pair[1]))
            .sum()
    }

    pub fn len(&self) -> usize {
        self.waypoints.len()
    }

    pub fn is_empty(&self) -> bool {
        self.waypoints.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Waypoint> {
        self.waypoints.iter()
    }

    pub fn get(&self, index: usize) -> Option<&Waypoint> {
        self.waypoints.get(index)
    }
}

impl<'a> IntoIterator for &'a Sequence {
    type Item = &'a Waypoint;
    type IntoIter = std::slice::Iter<'a, Waypoint>;

    fn into_iter(self) -> Self::IntoIter {
        self.waypoints.iter()
    }
}

fn check_separator(text: &str) -> Result<(), SequenceError> {
    if text.chars().all(|c| c == ',' || c.is_whitespace()) {
        Ok(())
    } else {
        Err(SequenceError::Grammar(format!("unexpected text '{}'", text.trim())))
    }
}

fn parse_bound(text: &str) -> Result<f64, SequenceError> {
    let value = text
        .trim()
        .parse::<f64>()
        .map_err(|_| SequenceError::Grammar(format!("'{}' is not a number", text.trim())))?;
    if !value.is_finite() {
        return Err(SequenceError::Grammar(format!("'{}' is not a finite number", text.trim())));
    }
    Ok(value)
}
