//! Widens integer-tagged frames into floats.
//!
//! Sources that load 8- or 16-bit data leave a depth tag on the buffer;
//! this filter expands those samples in place on a copy of the frame.

use crate::buffer::{Buffer, Depth};
use crate::dims::Dims;
use crate::error::Result;
use crate::task::{Properties, PropertySpec, Step, Task, TaskSpec};

pub struct ReinterpretTask {
    spec: TaskSpec,
    /// Forced source depth; `None` trusts the buffer's own tag.
    depth: Option<Depth>,
    normalize: bool,
}

impl ReinterpretTask {
    pub fn new(depth: Option<Depth>, normalize: bool) -> ReinterpretTask {
        ReinterpretTask {
            spec: TaskSpec::processor(2, 2),
            depth,
            normalize,
        }
    }

    pub fn schema() -> Vec<PropertySpec> {
        vec![
            // 0 means "use the buffer's depth tag".
            PropertySpec::int("depth", 0, 32, 0),
            PropertySpec::bool("normalize", true),
        ]
    }

    pub fn from_properties(props: &Properties) -> ReinterpretTask {
        let depth = match props.get_int("depth") {
            Some(8) => Some(Depth::U8),
            Some(16) => Some(Depth::U16),
            _ => None,
        };
        ReinterpretTask::new(depth, props.get_bool("normalize").unwrap_or(true))
    }
}

impl Task for ReinterpretTask {
    fn spec(&self) -> &TaskSpec {
        &self.spec
    }

    fn requisition(&mut self, inputs: &[Buffer]) -> Result<Dims> {
        Ok(inputs[0].dims())
    }

    fn process(&mut self, inputs: &mut [Buffer], output: &mut Buffer) -> Result<Step> {
        let input = &mut inputs[0];
        let depth = self.depth.unwrap_or_else(|| input.depth());
        let n = input.len();
        input.copy_into(output)?;
        output.set_depth(depth);
        output.reinterpret(depth, n, self.normalize)?;
        Ok(Step::NextInput)
    }
}
