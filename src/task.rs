//! The task contract: what a filter plugin must provide so the scheduler
//! can drive it.

use std::collections::BTreeMap;

use log::warn;
use ocl::Queue;
use serde::Deserialize;

use crate::buffer::Buffer;
use crate::dims::Dims;
use crate::error::{Error, Result};
use crate::resources::ResourceManager;

/// What a task does with the stream.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TaskMode {
    /// Produces buffers without inputs until it reports exhaustion.
    Generator,
    /// Consumes N inputs per tick and emits M outputs.
    Processor,
    /// Accumulates the whole input stream, then emits during a terminal
    /// flush phase.
    Reductor,
    /// Consumes buffers and emits nothing.
    Sink,
}

/// Where the task's work runs.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Processing {
    Cpu,
    Gpu,
}

/// Verdict of one `process` invocation.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Step {
    /// More output is expected from the current inputs.
    Continue,
    /// The current inputs are exhausted; pop the next set.
    NextInput,
    /// Emit this output, then terminate.
    Finished,
}

/// Static facts about a task instance that the graph validator and the
/// scheduler rely on.
#[derive(Clone, Debug)]
pub struct TaskSpec {
    pub mode: TaskMode,
    pub processing: Processing,
    pub n_inputs: usize,
    pub n_outputs: usize,
    /// Declared dimension count per input port.
    pub in_dims: Vec<u8>,
    /// Declared output dimensionality, if fixed up front.
    pub out_dims: Option<u8>,
    /// Whether the scheduler may clone this task across devices.
    pub replicable: bool,
}

impl TaskSpec {
    pub fn generator(out_dims: u8) -> TaskSpec {
        TaskSpec {
            mode: TaskMode::Generator,
            processing: Processing::Cpu,
            n_inputs: 0,
            n_outputs: 1,
            in_dims: Vec::new(),
            out_dims: Some(out_dims),
            replicable: false,
        }
    }

    pub fn processor(in_dims: u8, out_dims: u8) -> TaskSpec {
        TaskSpec {
            mode: TaskMode::Processor,
            processing: Processing::Cpu,
            n_inputs: 1,
            n_outputs: 1,
            in_dims: vec![in_dims],
            out_dims: Some(out_dims),
            replicable: false,
        }
    }

    pub fn reductor(in_dims: u8, out_dims: u8) -> TaskSpec {
        TaskSpec {
            mode: TaskMode::Reductor,
            processing: Processing::Cpu,
            n_inputs: 1,
            n_outputs: 1,
            in_dims: vec![in_dims],
            out_dims: Some(out_dims),
            replicable: false,
        }
    }

    pub fn sink(in_dims: u8) -> TaskSpec {
        TaskSpec {
            mode: TaskMode::Sink,
            processing: Processing::Cpu,
            n_inputs: 1,
            n_outputs: 0,
            in_dims: vec![in_dims],
            out_dims: None,
            replicable: false,
        }
    }

    pub fn gpu(mut self) -> TaskSpec {
        self.processing = Processing::Gpu;
        self
    }

    pub fn replicable(mut self) -> TaskSpec {
        self.replicable = true;
        self
    }
}

/// A unit of computation behind the plugin boundary.
///
/// The engine never inspects task-internal state; it drives tasks purely
/// through this contract. Capabilities outside a task's mode keep their
/// default implementations.
pub trait Task: Send {
    fn spec(&self) -> &TaskSpec;

    /// Called once before the graph runs. Compile kernels and allocate
    /// persistent auxiliary state here.
    fn setup(&mut self, _resources: &ResourceManager) -> Result<()> {
        Ok(())
    }

    /// Assigns the command queue of the device this instance was placed on.
    /// Called before `setup` for GPU tasks.
    fn set_queue(&mut self, _queue: Queue) {}

    /// The shape of the task's next output, given the current inputs.
    fn requisition(&mut self, _inputs: &[Buffer]) -> Result<Dims> {
        Err(Error::Unsupported("requisition"))
    }

    /// One unit of work: read `inputs`, fill `output`.
    fn process(&mut self, _inputs: &mut [Buffer], _output: &mut Buffer) -> Result<Step> {
        Err(Error::Unsupported("process"))
    }

    /// Absorb inputs without producing output (sinks; reductors while
    /// accumulating).
    fn consume(&mut self, _inputs: &mut [Buffer]) -> Result<()> {
        Err(Error::Unsupported("consume"))
    }

    /// Fill `output` with generated data. Returns `false` once exhausted,
    /// in which case `output` is discarded unread (generators; reductors
    /// while flushing).
    fn generate(&mut self, _output: &mut Buffer) -> Result<bool> {
        Err(Error::Unsupported("generate"))
    }

    /// Called exactly once after the last `process`/`generate`.
    fn finalize(&mut self) {}
}

/// A single configuration value as found in the graph description.
#[derive(Clone, Debug, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum Value {
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
}

impl Value {
    pub fn as_int(&self) -> Option<i64> {
        match *self {
            Value::Int(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_float(&self) -> Option<f64> {
        match *self {
            Value::Float(v) => Some(v),
            Value::Int(v) => Some(v as f64),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match *self {
            Value::Bool(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match *self {
            Value::Str(ref v) => Some(v),
            _ => None,
        }
    }
}

/// The typed configuration map handed to a plugin factory.
#[derive(Clone, Debug, Default, Deserialize)]
#[serde(transparent)]
pub struct Properties(BTreeMap<String, Value>);

impl Properties {
    pub fn new() -> Properties {
        Properties::default()
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.0.get(name)
    }

    pub fn get_int(&self, name: &str) -> Option<i64> {
        self.0.get(name).and_then(Value::as_int)
    }

    pub fn get_float(&self, name: &str) -> Option<f64> {
        self.0.get(name).and_then(Value::as_float)
    }

    pub fn get_bool(&self, name: &str) -> Option<bool> {
        self.0.get(name).and_then(Value::as_bool)
    }

    pub fn get_str(&self, name: &str) -> Option<&str> {
        self.0.get(name).and_then(Value::as_str)
    }

    pub fn set<S: Into<String>>(&mut self, name: S, value: Value) -> &mut Properties {
        self.0.insert(name.into(), value);
        self
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.0.iter()
    }
}

/// Kind tag of a property schema entry.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PropertyKind {
    Int,
    Float,
    Bool,
    Str,
}

/// One entry of a plugin's published property schema.
#[derive(Clone, Debug)]
pub struct PropertySpec {
    pub name: &'static str,
    pub kind: PropertyKind,
    pub min: Option<f64>,
    pub max: Option<f64>,
    pub default: Value,
}

impl PropertySpec {
    pub fn int(name: &'static str, min: i64, max: i64, default: i64) -> PropertySpec {
        PropertySpec {
            name,
            kind: PropertyKind::Int,
            min: Some(min as f64),
            max: Some(max as f64),
            default: Value::Int(default),
        }
    }

    pub fn float(name: &'static str, min: f64, max: f64, default: f64) -> PropertySpec {
        PropertySpec {
            name,
            kind: PropertyKind::Float,
            min: Some(min),
            max: Some(max),
            default: Value::Float(default),
        }
    }

    pub fn bool(name: &'static str, default: bool) -> PropertySpec {
        PropertySpec {
            name,
            kind: PropertyKind::Bool,
            min: None,
            max: None,
            default: Value::Bool(default),
        }
    }

    pub fn str(name: &'static str, default: &str) -> PropertySpec {
        PropertySpec {
            name,
            kind: PropertyKind::Str,
            min: None,
            max: None,
            default: Value::Str(default.to_string()),
        }
    }

    fn clamp(&self, value: Value, plugin: &str) -> Value {
        let numeric = match value {
            Value::Int(v) => v as f64,
            Value::Float(v) => v,
            other => return other,
        };
        let clamped = match (self.min, self.max) {
            (Some(min), _) if numeric < min => min,
            (_, Some(max)) if numeric > max => max,
            _ => return value,
        };
        warn!(
            "plugin '{}': property '{}' value {} outside [{:?}, {:?}], clamping",
            plugin, self.name, numeric, self.min, self.max
        );
        match self.kind {
            PropertyKind::Int => Value::Int(clamped as i64),
            _ => Value::Float(clamped),
        }
    }
}

/// Merges user-supplied properties over a plugin's schema defaults.
///
/// Unknown keys are ignored with a warning; numeric values outside the
/// declared range are clamped with a warning; mismatched kinds fall back to
/// the default with a warning.
pub fn resolve_properties(plugin: &str, schema: &[PropertySpec], given: &Properties) -> Properties {
    let mut resolved = Properties::new();
    for spec in schema {
        resolved.set(spec.name, spec.default.clone());
    }

    for (name, value) in given.iter() {
        let spec = match schema.iter().find(|s| s.name == name.as_str()) {
            Some(spec) => spec,
            None => {
                warn!("plugin '{}': ignoring unknown property '{}'", plugin, name);
                continue;
            }
        };
        let kind_ok = matches!(
            (spec.kind, value),
            (PropertyKind::Int, Value::Int(..))
                | (PropertyKind::Float, Value::Float(..))
                | (PropertyKind::Float, Value::Int(..))
                | (PropertyKind::Bool, Value::Bool(..))
                | (PropertyKind::Str, Value::Str(..))
        );
        if !kind_ok {
            warn!(
                "plugin '{}': property '{}' has kind {:?}, expected {:?}; using default",
                plugin, name, value, spec.kind
            );
            continue;
        }
        resolved.set(spec.name, spec.clamp(value.clone(), plugin));
    }
    resolved
}
