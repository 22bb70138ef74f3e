//! Registry of processing functions available to pipelines

use crate::core::axis::{format_position, Axis};
use crate::core::context::SESSION_DIRECTORY_KEY;
use crate::core::step::{Kwargs, StepError, StepFunction, StepValue, PIPELINE_MODULE};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::info;

/// Step function backed by a closure
struct FnStep<F> {
    requires_input: bool,
    f: F,
}

impl<F> StepFunction for FnStep<F>
where
    F: Fn(Option<StepValue>, &Kwargs) -> Result<StepValue, StepError> + Send + Sync,
{
    fn requires_input(&self) -> bool {
        self.requires_input
    }

    fn call(&self, input: Option<StepValue>, kwargs: &Kwargs) -> Result<StepValue, StepError> {
        (self.f)(input, kwargs)
    }
}

/// Closed set of `(module, function)` names a pipeline may reference
#[derive(Clone, Default)]
pub struct StepRegistry {
    functions: HashMap<(String, String), Arc<dyn StepFunction>>,
}

impl StepRegistry {
    /// Registry without any functions
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with the guard, kill, logging, capture and frame functions
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();

        registry.register(PIPELINE_MODULE, "noop", false, |_, kw| outside_limits(kw));
        registry.register(PIPELINE_MODULE, "guard", false, |_, kw| outside_limits(kw));
        registry.register(PIPELINE_MODULE, "kill", false, |_, kw| outside_limits(kw));
        registry.register(PIPELINE_MODULE, "log", false, |_, kw| {
            info!("Position {}", position_label(kw));
            Ok(StepValue::Empty)
        });

        registry.register("sensor", "capture", true, |input, _| {
            expect_frame(input).map(StepValue::Frame)
        });
        registry.register("frame", "stats", true, |input, _| {
            let frame = expect_frame(input)?;
            Ok(StepValue::Json(frame_stats(&frame)))
        });

        let saved = AtomicU64::new(0);
        registry.register("frame", "save", true, move |input, kw| {
            let frame = expect_frame(input)?;
            let directory = kw
                .get("directory")
                .or_else(|| kw.get(SESSION_DIRECTORY_KEY))
                .and_then(Value::as_str)
                .ok_or_else(|| StepError::InvalidArgument {
                    name: "directory".to_string(),
                    reason: "no directory or session directory to save into".to_string(),
                })?;
            let counter = saved.fetch_add(1, Ordering::SeqCst);
            let path = PathBuf::from(directory)
                .join(format!("{}_{}.raw", counter, position_label(kw)));
            std::fs::write(&path, frame.to_le_bytes())?;
            info!("Saved {}", path.display());
            Ok(StepValue::Text(path.display().to_string()))
        });

        registry
    }

    /// Register a function under `module.function`, replacing any previous one
    pub fn register<F>(&mut self, module: &str, function: &str, requires_input: bool, f: F)
    where
        F: Fn(Option<StepValue>, &Kwargs) -> Result<StepValue, StepError> + Send + Sync + 'static,
    {
        self.register_function(module, function, Arc::new(FnStep { requires_input, f }));
    }

    pub fn register_function(&mut self, module: &str, function: &str, handler: Arc<dyn StepFunction>) {
        self.functions
            .insert((module.to_string(), function.to_string()), handler);
    }

    pub fn get(&self, module: &str, function: &str) -> Option<Arc<dyn StepFunction>> {
        self.functions
            .get(&(module.to_string(), function.to_string()))
            .cloned()
    }

    pub fn contains(&self, module: &str, function: &str) -> bool {
        self.functions
            .contains_key(&(module.to_string(), function.to_string()))
    }

    /// Sorted `module.function` names
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .functions
            .keys()
            .map(|(module, function)| format!("{}.{}", module, function))
            .collect();
        names.sort();
        names
    }
}

/// True when any `*_pos` value lies outside its `*_min` / `*_max` kwarg
pub fn outside_limits(kwargs: &Kwargs) -> Result<StepValue, StepError> {
    for axis in Axis::ALL {
        let Some(position) = kwargs.get(&axis.position_key()).and_then(Value::as_f64) else {
            continue;
        };
        let min = limit(kwargs, &format!("{}_min", axis.symbol()))?;
        let max = limit(kwargs, &format!("{}_max", axis.symbol()))?;

        if min.is_some_and(|min| position < min) || max.is_some_and(|max| position > max) {
            return Ok(StepValue::Bool(true));
        }
    }
    Ok(StepValue::Bool(false))
}

fn limit(kwargs: &Kwargs, name: &str) -> Result<Option<f64>, StepError> {
    match kwargs.get(name) {
        None | Some(Value::Null) => Ok(None),
        Some(value) => value.as_f64().map(Some).ok_or_else(|| StepError::InvalidArgument {
            name: name.to_string(),
            reason: format!("expected a number, got {}", value),
        }),
    }
}

/// `1.000,2.000,0.000` for the positions present in the kwargs
fn position_label(kwargs: &Kwargs) -> String {
    Axis::ALL
        .iter()
        .filter_map(|axis| kwargs.get(&axis.position_key()).and_then(Value::as_f64))
        .map(format_position)
        .collect::<Vec<_>>()
        .join(",")
}

fn expect_frame(input: Option<StepValue>) -> Result<crate::sensor::Frame, StepError> {
    match input {
        Some(StepValue::Frame(frame)) => Ok(frame),
        Some(other) => Err(StepError::InputType {
            expected: "frame",
            actual: format!("{:?}", other),
        }),
        None => Err(StepError::MissingInput),
    }
}

fn frame_stats(frame: &crate::sensor::Frame) -> Value {
    let min = frame.pixels.iter().copied().min().unwrap_or(0);
    let max = frame.pixels.iter().copied().max().unwrap_or(0);
    let mean = if frame.is_empty() {
        0.0
    } else {
        frame.pixels.iter().map(|p| *p as f64).sum::<f64>() / frame.len() as f64
    };
    json!({
        "width": frame.width,
        "height": frame.height,
        "min": min,
        "max": max,
        "mean": mean,
    })
}
