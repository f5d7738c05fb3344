//! # clflow
//!
//! A heterogeneous (CPU+GPU) streaming dataflow engine for image
//! processing.
//!
//! A computation is described as a directed graph of tasks — sources,
//! processors, reducers, sinks — connected by bounded buffer channels. The
//! engine instantiates tasks from a declarative (JSON) description,
//! allocates pooled image buffers that migrate lazily between host and
//! OpenCL device memory, and drives the graph to completion with one
//! worker thread per task instance.
//!
//! ## Overview
//!
//! * [`Buffer`] — a strongly-shaped float array with host/device residency
//!   tracking and lazy transfers.
//! * [`Channel`] — the bounded blocking FIFO between two tasks; closing it
//!   is the sole end-of-stream signal.
//! * [`ResourceManager`] — OpenCL context, one command queue per device,
//!   the compiled-program cache, and the buffer pool.
//! * [`Task`] — the plugin contract (`setup`, `requisition`,
//!   `process`/`consume`/`generate`, `finalize`).
//! * [`Graph`] — the task DAG, built from JSON or programmatically, and
//!   validated before execution.
//! * [`Scheduler`] — graph expansion onto devices, worker threads,
//!   completion and fault propagation.
//!
//! ## Example
//!
//! ```rust,no_run
//! use clflow::{Config, Graph, PluginRegistry, ResourceManager, Scheduler};
//!
//! let registry = PluginRegistry::with_builtins();
//! let resources = ResourceManager::new(Config::from_env());
//! let json = r#"{
//!     "type": "sequence",
//!     "elements": [
//!         { "type": "filter", "plugin": "mem-source",
//!           "properties": { "count": 4, "width": 64, "height": 64 } },
//!         { "type": "filter", "plugin": "null-sink" }
//!     ]
//! }"#;
//! let graph = Graph::from_json(json, &registry).unwrap();
//! let mut scheduler = Scheduler::new(graph, &resources);
//! scheduler.set_registry(&registry);
//! scheduler.run().unwrap();
//! ```

#[cfg(test)]
mod tests;

pub mod buffer;
pub mod channel;
pub mod dims;
pub mod error;
pub mod graph;
pub mod plugins;
pub mod profiler;
pub mod resources;
pub mod sched;
pub mod task;

pub use crate::buffer::{Buffer, Depth, Residency};
pub use crate::channel::{Channel, SendError, TryPop};
pub use crate::dims::Dims;
pub use crate::error::{Error, Result};
pub use crate::graph::{Graph, GraphDesc, NodeId, SplitMode};
pub use crate::plugins::PluginRegistry;
pub use crate::profiler::{ProfileEntry, Profiler};
pub use crate::resources::{Config, DeviceClass, GpuNode, ResourceManager};
pub use crate::sched::{CancelHandle, Scheduler};
pub use crate::task::{
    Processing, Properties, PropertyKind, PropertySpec, Step, Task, TaskMode, TaskSpec, Value,
};
