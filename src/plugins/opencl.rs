//! Generic OpenCL task: runs a named kernel from a named source file over
//! each input buffer.
//!
//! The kernel is expected to take two `__global float *` arguments (input,
//! output) and to be enqueued with one work-item per sample.

use ocl::{Kernel, Queue};

use crate::buffer::Buffer;
use crate::dims::Dims;
use crate::error::{Error, Result};
use crate::resources::ResourceManager;
use crate::task::{Properties, PropertySpec, Step, Task, TaskSpec};

pub struct OpenClTask {
    spec: TaskSpec,
    file: String,
    entry: String,
    build_options: String,
    queue: Option<Queue>,
    kernel: Option<Kernel>,
}

impl OpenClTask {
    pub fn new(file: &str, entry: &str, build_options: &str) -> OpenClTask {
        OpenClTask {
            spec: TaskSpec::processor(2, 2).gpu().replicable(),
            file: file.to_string(),
            entry: entry.to_string(),
            build_options: build_options.to_string(),
            queue: None,
            kernel: None,
        }
    }

    pub fn schema() -> Vec<PropertySpec> {
        vec![
            PropertySpec::str("file", "default.cl"),
            PropertySpec::str("kernel", "process"),
            PropertySpec::str("build-options", ""),
        ]
    }

    pub fn from_properties(props: &Properties) -> OpenClTask {
        OpenClTask::new(
            props.get_str("file").unwrap_or("default.cl"),
            props.get_str("kernel").unwrap_or("process"),
            props.get_str("build-options").unwrap_or(""),
        )
    }
}

impl Task for OpenClTask {
    fn spec(&self) -> &TaskSpec {
        &self.spec
    }

    fn set_queue(&mut self, queue: Queue) {
        self.queue = Some(queue);
    }

    fn setup(&mut self, resources: &ResourceManager) -> Result<()> {
        if self.queue.is_none() {
            self.queue = Some(resources.queue(0)?);
        }
        self.kernel = Some(resources.kernel(&self.file, &self.entry, &self.build_options, 2)?);
        Ok(())
    }

    fn requisition(&mut self, inputs: &[Buffer]) -> Result<Dims> {
        Ok(inputs[0].dims())
    }

    fn process(&mut self, inputs: &mut [Buffer], output: &mut Buffer) -> Result<Step> {
        let queue = self
            .queue
            .clone()
            .ok_or_else(|| Error::Ocl("opencl task has no assigned queue".into()))?;
        let kernel = self
            .kernel
            .as_ref()
            .ok_or(Error::Unsupported("process called before setup"))?;

        let gws = inputs[0].dims();
        let in_mem = inputs[0].device_data(&queue)?;
        let out_mem = output.device_data_mut(&queue)?;
        kernel.set_arg(0, in_mem)?;
        kernel.set_arg(1, out_mem)?;
        unsafe {
            kernel.cmd().queue(&queue).global_work_size(gws).enq()?;
        }
        Ok(Step::NextInput)
    }

    fn finalize(&mut self) {
        self.kernel = None;
        self.queue = None;
    }
}
