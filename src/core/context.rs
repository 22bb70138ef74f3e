//! Ambient context - values every step receives as keyword arguments

use crate::core::axis::{Axis, Position};
use crate::core::step::Kwargs;
use serde_json::{Map, Value};

/// Key holding the formatted position map
pub const POSITION_KEY: &str = "pos";
pub const WAYPOINT_INDEX_KEY: &str = "waypoint_index";
pub const SESSION_DIRECTORY_KEY: &str = "session_directory";

/// Execution context for a pipeline run
///
/// Carries the stage position and job metadata; explicit step kwargs of the
/// same name take precedence.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AmbientContext {
    values: Kwargs,
}

impl AmbientContext {
    /// Create a new empty context
    pub fn new() -> Self {
        Self::default()
    }

    /// Context exposing `x_pos` .. `w_pos` and `pos` for the configured axes
    pub fn from_position(position: &Position) -> Self {
        let mut context = Self::new();
        let mut formatted = Map::new();
        for (axis, value) in position.iter() {
            if let Some(number) = position.value(axis) {
                context.set(axis.position_key(), number);
            }
            formatted.insert(axis.symbol().to_string(), Value::String(value.to_string()));
        }
        context.values.insert(POSITION_KEY.to_string(), Value::Object(formatted));
        context
    }

    pub fn with_waypoint_index(mut self, index: usize) -> Self {
        self.set(WAYPOINT_INDEX_KEY, index);
        self
    }

    pub fn with_session_directory(mut self, dir: &std::path::Path) -> Self {
        self.set(SESSION_DIRECTORY_KEY, dir.display().to_string());
        self
    }

    pub fn set(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        self.values.insert(key.into(), value.into());
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.values.get(key)
    }

    /// Numeric position of an axis, if present
    pub fn axis_position(&self, axis: Axis) -> Option<f64> {
        self.values.get(&axis.position_key()).and_then(Value::as_f64)
    }

    /// Ambient values overlaid by the explicit kwargs
    pub fn merged_with(&self, explicit: &Kwargs) -> Kwargs {
        let mut merged = self.values.clone();
        for (key, value) in explicit {
            merged.insert(key.clone(), value.clone());
        }
        merged
    }

    /// Short `x=1.000, y=2.000` rendering of the position map
    pub fn position_summary(&self) -> String {
        match self.values.get(POSITION_KEY) {
            Some(Value::Object(map)) => map
                .iter()
                .map(|(axis, value)| format!("{}={}", axis, value.as_str().unwrap_or_default()))
                .collect::<Vec<_>>()
                .join(", "),
            _ => String::new(),
        }
    }
}
