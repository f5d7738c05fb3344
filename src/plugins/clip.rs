//! Clamps every sample of the stream into a configured range.

use crate::buffer::Buffer;
use crate::dims::Dims;
use crate::error::Result;
use crate::task::{Properties, PropertySpec, Step, Task, TaskSpec};

pub struct ClipTask {
    spec: TaskSpec,
    min: f32,
    max: f32,
}

impl ClipTask {
    pub fn new(min: f32, max: f32) -> ClipTask {
        ClipTask {
            spec: TaskSpec::processor(2, 2),
            min,
            max,
        }
    }

    pub fn schema() -> Vec<PropertySpec> {
        vec![
            PropertySpec::float("min", f64::MIN, f64::MAX, 0.0),
            PropertySpec::float("max", f64::MIN, f64::MAX, 1.0),
        ]
    }

    pub fn from_properties(props: &Properties) -> ClipTask {
        ClipTask::new(
            props.get_float("min").unwrap_or(0.0) as f32,
            props.get_float("max").unwrap_or(1.0) as f32,
        )
    }
}

impl Task for ClipTask {
    fn spec(&self) -> &TaskSpec {
        &self.spec
    }

    fn requisition(&mut self, inputs: &[Buffer]) -> Result<Dims> {
        Ok(inputs[0].dims())
    }

    fn process(&mut self, inputs: &mut [Buffer], output: &mut Buffer) -> Result<Step> {
        let src = inputs[0].host_data()?.to_vec();
        let dst = output.host_data_mut()?;
        for (d, s) in dst.iter_mut().zip(src.iter()) {
            *d = s.clamp(self.min, self.max);
        }
        Ok(Step::NextInput)
    }
}
