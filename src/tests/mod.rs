//! Engine tests, one module per area. Device-touching tests live in `cl`
//! and skip themselves on machines without an OpenCL runtime.

pub mod channel;
pub mod cl;
pub mod pool;
pub mod scheduler;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use crate::buffer::Buffer;
use crate::dims::Dims;
use crate::error::{Error, Result};
use crate::plugins::{CollectedFrame, Frame, MemSource};
use crate::task::{Step, Task, TaskSpec};

/// `count` 2×2 frames, each filled with its index.
pub fn value_frames(count: usize, dims: Dims) -> Vec<Frame> {
    (0..count)
        .map(|i| Frame::F32(dims, vec![i as f32; dims.len()]))
        .collect()
}

pub fn value_source(count: usize) -> MemSource {
    MemSource::new(value_frames(count, Dims::Two(2, 2)))
}

/// First sample of every collected frame.
pub fn first_samples(frames: &[CollectedFrame]) -> Vec<f32> {
    frames.iter().map(|f| f.data[0]).collect()
}

/// A processor that forwards its input unchanged.
pub struct IdTask {
    spec: TaskSpec,
}

impl IdTask {
    pub fn new() -> IdTask {
        IdTask {
            spec: TaskSpec::processor(2, 2),
        }
    }
}

impl Task for IdTask {
    fn spec(&self) -> &TaskSpec {
        &self.spec
    }

    fn requisition(&mut self, inputs: &[Buffer]) -> Result<Dims> {
        Ok(inputs[0].dims())
    }

    fn process(&mut self, inputs: &mut [Buffer], output: &mut Buffer) -> Result<Step> {
        inputs[0].copy_into(output)?;
        Ok(Step::NextInput)
    }
}

/// Forwards its input, counting `finalize` calls into a shared counter.
pub struct CountingId {
    inner: IdTask,
    finalized: Arc<AtomicUsize>,
}

impl CountingId {
    pub fn new(finalized: Arc<AtomicUsize>) -> CountingId {
        CountingId {
            inner: IdTask::new(),
            finalized,
        }
    }
}

impl Task for CountingId {
    fn spec(&self) -> &TaskSpec {
        self.inner.spec()
    }

    fn requisition(&mut self, inputs: &[Buffer]) -> Result<Dims> {
        self.inner.requisition(inputs)
    }

    fn process(&mut self, inputs: &mut [Buffer], output: &mut Buffer) -> Result<Step> {
        self.inner.process(inputs, output)
    }

    fn finalize(&mut self) {
        self.finalized.fetch_add(1, Ordering::SeqCst);
    }
}

/// Forwards its input until the `fail_at`th invocation, which reports a
/// device error.
pub struct FailTask {
    spec: TaskSpec,
    fail_at: usize,
    calls: usize,
}

impl FailTask {
    pub fn new(fail_at: usize) -> FailTask {
        FailTask {
            spec: TaskSpec::processor(2, 2),
            fail_at,
            calls: 0,
        }
    }
}

pub const FAIL_STATUS: i32 = -5;

impl Task for FailTask {
    fn spec(&self) -> &TaskSpec {
        &self.spec
    }

    fn requisition(&mut self, inputs: &[Buffer]) -> Result<Dims> {
        Ok(inputs[0].dims())
    }

    fn process(&mut self, inputs: &mut [Buffer], output: &mut Buffer) -> Result<Step> {
        self.calls += 1;
        if self.calls >= self.fail_at {
            return Err(Error::Cl(FAIL_STATUS));
        }
        inputs[0].copy_into(output)?;
        Ok(Step::NextInput)
    }
}

/// A generator that never runs dry; only cancellation stops it.
pub struct InfiniteSource {
    spec: TaskSpec,
    dims: Dims,
}

impl InfiniteSource {
    pub fn new(dims: Dims) -> InfiniteSource {
        InfiniteSource {
            spec: TaskSpec::generator(2),
            dims,
        }
    }
}

impl Task for InfiniteSource {
    fn spec(&self) -> &TaskSpec {
        &self.spec
    }

    fn requisition(&mut self, _inputs: &[Buffer]) -> Result<Dims> {
        Ok(self.dims)
    }

    fn generate(&mut self, output: &mut Buffer) -> Result<bool> {
        output.set_host_data(&vec![0.0; self.dims.len()])?;
        Ok(true)
    }
}
