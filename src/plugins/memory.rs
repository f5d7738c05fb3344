//! In-memory stream endpoints.
//!
//! These stand in for the reader/writer leaf filters at the edges of a
//! graph: `mem-source` feeds frames from host memory, `null-sink` discards
//! the stream, and `CollectSink` (programmatic only) captures it for
//! inspection.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use crate::buffer::{Buffer, Depth};
use crate::dims::Dims;
use crate::error::Result;
use crate::task::{Properties, PropertySpec, Task, TaskSpec};

/// One frame queued for emission.
#[derive(Clone, Debug)]
pub enum Frame {
    F32(Dims, Vec<f32>),
    U8(Dims, Vec<u8>),
    U16(Dims, Vec<u16>),
}

impl Frame {
    fn dims(&self) -> Dims {
        match *self {
            Frame::F32(dims, ..) | Frame::U8(dims, ..) | Frame::U16(dims, ..) => dims,
        }
    }
}

/// A generator that emits a fixed list of frames, then finishes.
pub struct MemSource {
    spec: TaskSpec,
    frames: VecDeque<Frame>,
    last_dims: Dims,
}

impl MemSource {
    pub fn new(frames: Vec<Frame>) -> MemSource {
        let last_dims = frames.first().map(Frame::dims).unwrap_or(Dims::One(1));
        MemSource {
            spec: TaskSpec::generator(2),
            frames: frames.into(),
            last_dims,
        }
    }

    pub fn schema() -> Vec<PropertySpec> {
        vec![
            PropertySpec::int("count", 0, i64::MAX, 1),
            PropertySpec::int("width", 1, 1 << 20, 1),
            PropertySpec::int("height", 1, 1 << 20, 1),
        ]
    }

    /// Builds a synthetic source from the graph description: `count`
    /// frames of `width`×`height`, each filled with its frame index.
    pub fn from_properties(props: &Properties) -> MemSource {
        let count = props.get_int("count").unwrap_or(1).max(0) as usize;
        let width = props.get_int("width").unwrap_or(1) as usize;
        let height = props.get_int("height").unwrap_or(1) as usize;
        let dims = Dims::Two(width, height);
        let frames = (0..count)
            .map(|i| Frame::F32(dims, vec![i as f32; dims.len()]))
            .collect();
        MemSource::new(frames)
    }
}

impl Task for MemSource {
    fn spec(&self) -> &TaskSpec {
        &self.spec
    }

    fn requisition(&mut self, _inputs: &[Buffer]) -> Result<Dims> {
        if let Some(frame) = self.frames.front() {
            self.last_dims = frame.dims();
        }
        Ok(self.last_dims)
    }

    fn generate(&mut self, output: &mut Buffer) -> Result<bool> {
        match self.frames.pop_front() {
            Some(Frame::F32(_, data)) => output.set_host_data(&data)?,
            Some(Frame::U8(_, data)) => output.set_host_data_u8(&data)?,
            Some(Frame::U16(_, data)) => output.set_host_data_u16(&data)?,
            None => return Ok(false),
        }
        Ok(true)
    }
}

/// A sink that drops everything it receives.
pub struct NullSink {
    spec: TaskSpec,
}

impl NullSink {
    pub fn new() -> NullSink {
        NullSink {
            spec: TaskSpec::sink(2),
        }
    }
}

impl Default for NullSink {
    fn default() -> NullSink {
        NullSink::new()
    }
}

impl Task for NullSink {
    fn spec(&self) -> &TaskSpec {
        &self.spec
    }

    fn consume(&mut self, _inputs: &mut [Buffer]) -> Result<()> {
        Ok(())
    }
}

/// A captured frame: shape, samples, and the depth tag it arrived with.
#[derive(Clone, Debug)]
pub struct CollectedFrame {
    pub dims: Dims,
    pub data: Vec<f32>,
    pub depth: Depth,
}

/// Shared handle to the frames a [`CollectSink`] has received.
pub type Collected = Arc<Mutex<Vec<CollectedFrame>>>;

/// A sink that records every received frame for later inspection.
pub struct CollectSink {
    spec: TaskSpec,
    collected: Collected,
}

impl CollectSink {
    /// Returns the sink and the shared store it appends to.
    pub fn new() -> (CollectSink, Collected) {
        let collected: Collected = Arc::default();
        let sink = CollectSink {
            spec: TaskSpec::sink(2),
            collected: collected.clone(),
        };
        (sink, collected)
    }
}

impl Task for CollectSink {
    fn spec(&self) -> &TaskSpec {
        &self.spec
    }

    fn consume(&mut self, inputs: &mut [Buffer]) -> Result<()> {
        let input = &mut inputs[0];
        let dims = input.dims();
        let depth = input.depth();
        let data = input.host_data()?.to_vec();
        self.collected.lock().unwrap().push(CollectedFrame { dims, data, depth });
        Ok(())
    }
}
