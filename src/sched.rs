//! The scheduler: expands the graph onto the available devices, wires
//! channels, drives one worker thread per task instance, and propagates
//! completion and faults.

use std::collections::BinaryHeap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use log::{error, info};
use rand::Rng;

use crate::buffer::Buffer;
use crate::channel::{Channel, SendError, TryPop, DEFAULT_CAPACITY};
use crate::error::{Error, Result};
use crate::graph::{Graph, NodeKind, SplitMode};
use crate::plugins::PluginRegistry;
use crate::profiler::Profiler;
use crate::resources::ResourceManager;
use crate::task::{Processing, Step, Task, TaskMode};

/// Requests cooperative termination of a running graph.
///
/// `cancel` closes every source output; workers terminate naturally as the
/// channels drain. In-flight device work is never preempted.
#[derive(Clone)]
pub struct CancelHandle {
    flag: Arc<AtomicBool>,
    sources: Arc<Mutex<Vec<Arc<Channel>>>>,
}

impl CancelHandle {
    fn new() -> CancelHandle {
        CancelHandle {
            flag: Arc::new(AtomicBool::new(false)),
            sources: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
        for channel in self.sources.lock().unwrap().iter() {
            channel.close();
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }
}

/// Drives a validated graph to completion.
///
/// One OS thread per task instance; blocking points are channel operations
/// and blocking OpenCL transfers only. The first error observed aborts the
/// stream (outputs close, peers drain) and is returned from [`run`].
///
/// [`run`]: Scheduler::run
pub struct Scheduler<'a> {
    graph: Graph,
    resources: &'a ResourceManager,
    registry: Option<&'a PluginRegistry>,
    profiler: Option<Arc<Profiler>>,
    channel_capacity: usize,
    cancel: CancelHandle,
}

impl<'a> Scheduler<'a> {
    pub fn new(graph: Graph, resources: &'a ResourceManager) -> Scheduler<'a> {
        Scheduler {
            graph,
            resources,
            registry: None,
            profiler: None,
            channel_capacity: DEFAULT_CAPACITY,
            cancel: CancelHandle::new(),
        }
    }

    /// Enables device expansion: replicable GPU tasks are cloned across
    /// all available devices through this registry.
    pub fn set_registry(&mut self, registry: &'a PluginRegistry) {
        self.registry = Some(registry);
    }

    pub fn set_profiler(&mut self, profiler: Arc<Profiler>) {
        self.profiler = Some(profiler);
    }

    pub fn set_channel_capacity(&mut self, capacity: usize) {
        self.channel_capacity = capacity;
    }

    /// A handle for cancelling the run from another thread.
    pub fn handle(&self) -> CancelHandle {
        self.cancel.clone()
    }

    /// Validates, expands, and runs the graph to completion.
    ///
    /// Returns the first error observed by any worker, or `Ok(())` once
    /// every channel is closed-and-drained and every worker has joined.
    pub fn run(mut self) -> Result<()> {
        self.graph.validate()?;

        if let Some(registry) = self.registry {
            self.expand(registry)?;
        }

        // Queue assignment and one-shot setup, before any worker starts.
        for node in &mut self.graph.nodes {
            if let NodeKind::Task(ref mut task) = node.kind {
                if task.spec().processing == Processing::Gpu {
                    let queue = self.resources.queue(node.device.unwrap_or(0))?;
                    task.set_queue(queue);
                }
                task.setup(self.resources)?;
            }
        }

        let channels: Vec<Arc<Channel>> = self
            .graph
            .edges
            .iter()
            .map(|_| Arc::new(Channel::new(self.channel_capacity)))
            .collect();

        {
            let mut sources = self.cancel.sources.lock().unwrap();
            for node in &self.graph.nodes {
                if let NodeKind::Task(ref task) = node.kind {
                    if task.spec().mode == TaskMode::Generator {
                        for &edge in &node.outputs {
                            sources.push(channels[edge].clone());
                        }
                    }
                }
            }
            if self.cancel.is_cancelled() {
                for channel in sources.iter() {
                    channel.close();
                }
            }
        }

        let status: Mutex<Option<Error>> = Mutex::new(None);
        let resources = self.resources;
        let nodes = std::mem::take(&mut self.graph.nodes);

        crossbeam::thread::scope(|scope| {
            for node in nodes {
                let ins: Vec<Arc<Channel>> =
                    node.inputs.iter().map(|&e| channels[e].clone()).collect();
                let outs: Vec<Arc<Channel>> =
                    node.outputs.iter().map(|&e| channels[e].clone()).collect();
                let worker = Worker {
                    name: node.name,
                    resources,
                    ins,
                    outs,
                    profiler: self.profiler.clone(),
                    cancel: self.cancel.flag.clone(),
                };
                let status = &status;
                let kind = node.kind;
                scope
                    .builder()
                    .name(format!("clflow-{}", worker.name))
                    .spawn(move |_| worker.run(kind, status))
                    .expect("failed to spawn worker thread");
            }
        })
        .expect("a worker thread panicked");

        // Aborted runs may leave checked-out buffers in channels.
        for channel in &channels {
            for buf in channel.drain() {
                resources.release_buffer(buf);
            }
        }

        if let Some(ref profiler) = self.profiler {
            if profiler.enabled() {
                for entry in profiler.report() {
                    info!(
                        "profile: {:<24} {:>8} call(s) {:>12.3?}",
                        entry.name, entry.calls, entry.total
                    );
                }
            }
        }

        match status.into_inner().unwrap() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    /// Replicates eligible GPU tasks across all available devices, fencing
    /// each replicated region with a round-robin copier/collector pair.
    fn expand(&mut self, registry: &PluginRegistry) -> Result<()> {
        let gpus = self.resources.gpu_nodes();
        if gpus.len() < 2 {
            return Ok(());
        }

        let node_count = self.graph.nodes.len();
        for id in 0..node_count {
            let found = {
                let node = &self.graph.nodes[id];
                match node.kind {
                    NodeKind::Task(ref task) => {
                        let spec = task.spec();
                        if spec.processing == Processing::Gpu
                            && spec.replicable
                            && node.inputs.len() == 1
                            && node.outputs.len() == 1
                        {
                            node.plugin.clone().map(|p| (p, node.properties.clone()))
                        } else {
                            None
                        }
                    }
                    _ => None,
                }
            };
            let (plugin, properties) = match found {
                Some(found) => found,
                None => continue,
            };

            let copier = self.graph.add_copier(SplitMode::RoundRobin);
            let collector = self.graph.add_collector(SplitMode::RoundRobin);

            // The original input edge now feeds the copier; the original
            // output edge now drains the collector.
            let in_edge = self.graph.nodes[id].inputs[0];
            let out_edge = self.graph.nodes[id].outputs[0];
            self.graph.edges[in_edge].to = copier;
            self.graph.nodes[copier].inputs.push(in_edge);
            self.graph.edges[out_edge].from = collector;
            self.graph.nodes[collector].outputs.push(out_edge);
            self.graph.nodes[id].inputs.clear();
            self.graph.nodes[id].outputs.clear();

            // The original instance becomes replica 0.
            self.graph.nodes[id].device = Some(gpus[0].index);
            self.graph.connect(copier, id)?;
            self.graph.connect(id, collector)?;

            for gpu in &gpus[1..] {
                let (task, resolved) = registry.instantiate(&plugin, &properties)?;
                let name = format!("{}-dev{}", self.graph.nodes[id].name, gpu.index);
                let clone_id =
                    self.graph
                        .push_node(name, NodeKind::Task(task), Some(plugin.clone()), resolved);
                self.graph.nodes[clone_id].device = Some(gpu.index);
                self.graph.connect(copier, clone_id)?;
                self.graph.connect(clone_id, collector)?;
            }

            info!(
                "expanded task '{}' across {} devices",
                self.graph.nodes[id].name,
                gpus.len()
            );
        }
        Ok(())
    }
}

/// Heap entry for the order-restoring collector; min-seq surfaces first.
struct SeqEntry {
    seq: u64,
    buf: Buffer,
}

impl PartialEq for SeqEntry {
    fn eq(&self, other: &SeqEntry) -> bool {
        self.seq == other.seq
    }
}

impl Eq for SeqEntry {}

impl PartialOrd for SeqEntry {
    fn partial_cmp(&self, other: &SeqEntry) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for SeqEntry {
    fn cmp(&self, other: &SeqEntry) -> std::cmp::Ordering {
        other.seq.cmp(&self.seq)
    }
}

struct Worker<'env> {
    name: String,
    resources: &'env ResourceManager,
    ins: Vec<Arc<Channel>>,
    outs: Vec<Arc<Channel>>,
    profiler: Option<Arc<Profiler>>,
    cancel: Arc<AtomicBool>,
}

impl<'env> Worker<'env> {
    fn run(self, kind: NodeKind, status: &Mutex<Option<Error>>) {
        let result = match kind {
            NodeKind::Task(mut task) => {
                let result = self.drive_task(task.as_mut());
                task.finalize();
                result
            }
            NodeKind::Copier(mode) => self.drive_copier(mode),
            NodeKind::Collector(mode) => self.drive_collector(mode),
        };

        // Closing the outputs is the only end-of-stream signal; closing the
        // inputs wakes producers blocked on a full channel so termination
        // cascades both ways. Stranded buffers are reclaimed at teardown.
        for channel in &self.outs {
            channel.close();
        }
        for channel in &self.ins {
            channel.close();
        }

        match result {
            Ok(()) | Err(Error::Closed) => {}
            Err(err) => {
                error!("task '{}' failed: {}", self.name, err);
                let mut slot = status.lock().unwrap();
                if slot.is_none() {
                    *slot = Some(err);
                }
            }
        }
    }

    fn timed<T>(&self, f: impl FnOnce() -> Result<T>) -> Result<T> {
        match self.profiler {
            Some(ref profiler) if profiler.enabled() => {
                let start = Instant::now();
                let result = f();
                profiler.record(&self.name, start.elapsed());
                result
            }
            _ => f(),
        }
    }

    fn release_all(&self, bufs: Vec<Buffer>) {
        for buf in bufs {
            self.resources.release_buffer(buf);
        }
    }

    /// Pops one buffer from every input port. `None` means some upstream
    /// channel is finished; any buffers already popped go back to the pool.
    fn pop_inputs(&self) -> Option<Vec<Buffer>> {
        let mut bufs = Vec::with_capacity(self.ins.len());
        for channel in &self.ins {
            match channel.pop() {
                Some(buf) => bufs.push(buf),
                None => {
                    self.release_all(bufs);
                    return None;
                }
            }
        }
        Some(bufs)
    }

    /// Sends `buf` downstream, cloning it for every output port beyond the
    /// first. A closed output reports `Error::Closed` (normal termination).
    fn push_outputs(&self, mut buf: Buffer) -> Result<()> {
        if self.outs.is_empty() {
            self.resources.release_buffer(buf);
            return Ok(());
        }

        let mut copies = Vec::with_capacity(self.outs.len() - 1);
        for _ in 1..self.outs.len() {
            let mut copy = match self.resources.request_buffer(buf.dims()) {
                Ok(copy) => copy,
                Err(err) => {
                    self.resources.release_buffer(buf);
                    self.release_all(copies);
                    return Err(err);
                }
            };
            if let Err(err) = buf.copy_into(&mut copy) {
                self.resources.release_buffer(buf);
                self.resources.release_buffer(copy);
                self.release_all(copies);
                return Err(err);
            }
            copies.push(copy);
        }

        if let Err(SendError(rejected)) = self.outs[0].push(buf) {
            self.resources.release_buffer(rejected);
            self.release_all(copies);
            return Err(Error::Closed);
        }
        for (copy, channel) in copies.into_iter().zip(self.outs.iter().skip(1)) {
            if let Err(SendError(rejected)) = channel.push(copy) {
                self.resources.release_buffer(rejected);
                return Err(Error::Closed);
            }
        }
        Ok(())
    }

    fn drive_task(&self, task: &mut dyn Task) -> Result<()> {
        match task.spec().mode {
            TaskMode::Generator => self.drive_generator(task),
            TaskMode::Processor => self.drive_processor(task),
            TaskMode::Reductor => {
                self.drive_accumulate(task)?;
                self.drive_flush(task)
            }
            TaskMode::Sink => self.drive_accumulate(task),
        }
    }

    fn drive_generator(&self, task: &mut dyn Task) -> Result<()> {
        loop {
            if self.cancel.load(Ordering::SeqCst) {
                return Ok(());
            }
            let dims = task.requisition(&[])?;
            let mut out = self.resources.request_buffer(dims)?;
            let more = match self.timed(|| task.generate(&mut out)) {
                Ok(more) => more,
                Err(err) => {
                    self.resources.release_buffer(out);
                    return Err(err);
                }
            };
            if !more {
                self.resources.release_buffer(out);
                return Ok(());
            }
            self.push_outputs(out)?;
        }
    }

    fn drive_processor(&self, task: &mut dyn Task) -> Result<()> {
        'stream: loop {
            let mut inputs = match self.pop_inputs() {
                Some(inputs) => inputs,
                None => return Ok(()),
            };
            loop {
                let dims = match task.requisition(&inputs) {
                    Ok(dims) => dims,
                    Err(err) => {
                        self.release_all(inputs);
                        return Err(err);
                    }
                };
                let mut out = match self.resources.request_buffer(dims) {
                    Ok(out) => out,
                    Err(err) => {
                        self.release_all(inputs);
                        return Err(err);
                    }
                };
                if let Some(first) = inputs.first() {
                    out.inherit_metadata(first);
                }
                let step = match self.timed(|| task.process(&mut inputs, &mut out)) {
                    Ok(step) => step,
                    Err(err) => {
                        self.resources.release_buffer(out);
                        self.release_all(inputs);
                        return Err(err);
                    }
                };
                if let Err(err) = self.push_outputs(out) {
                    self.release_all(inputs);
                    return Err(err);
                }
                match step {
                    Step::Continue => {}
                    Step::NextInput => {
                        self.release_all(inputs);
                        continue 'stream;
                    }
                    Step::Finished => {
                        self.release_all(inputs);
                        return Ok(());
                    }
                }
            }
        }
    }

    /// The input half of sinks and reductors: absorb until upstream closes.
    fn drive_accumulate(&self, task: &mut dyn Task) -> Result<()> {
        loop {
            let mut inputs = match self.pop_inputs() {
                Some(inputs) => inputs,
                None => return Ok(()),
            };
            let result = self.timed(|| task.consume(&mut inputs));
            self.release_all(inputs);
            result?;
        }
    }

    /// The terminal flush phase of a reductor.
    fn drive_flush(&self, task: &mut dyn Task) -> Result<()> {
        loop {
            let dims = task.requisition(&[])?;
            let mut out = self.resources.request_buffer(dims)?;
            let more = match self.timed(|| task.generate(&mut out)) {
                Ok(more) => more,
                Err(err) => {
                    self.resources.release_buffer(out);
                    return Err(err);
                }
            };
            if !more {
                self.resources.release_buffer(out);
                return Ok(());
            }
            self.push_outputs(out)?;
        }
    }

    fn drive_copier(&self, mode: SplitMode) -> Result<()> {
        let n = self.outs.len();
        let mut seq = 0u64;
        let mut rng = rand::thread_rng();

        while let Some(mut buf) = self.ins[0].pop() {
            buf.push_seq(seq);
            let target = match mode {
                SplitMode::RoundRobin => (seq as usize) % n,
                SplitMode::Randomize => rng.gen_range(0..n),
                SplitMode::Broadcast => {
                    seq += 1;
                    // push_outputs clones onto every branch.
                    self.push_outputs(buf)?;
                    continue;
                }
            };
            seq += 1;
            if let Err(SendError(rejected)) = self.outs[target].push(buf) {
                self.resources.release_buffer(rejected);
                return Err(Error::Closed);
            }
        }
        Ok(())
    }

    fn drive_collector(&self, mode: SplitMode) -> Result<()> {
        match mode {
            SplitMode::RoundRobin => self.collect_ordered(),
            SplitMode::Broadcast | SplitMode::Randomize => self.collect_arrival(),
        }
    }

    fn forward(&self, buf: Buffer) -> Result<()> {
        match self.outs[0].push(buf) {
            Ok(()) => Ok(()),
            Err(SendError(rejected)) => {
                self.resources.release_buffer(rejected);
                Err(Error::Closed)
            }
        }
    }

    /// Restores the pre-split order: buffers were stamped on entry and are
    /// emitted strictly by stamp through a small reorder heap.
    fn collect_ordered(&self) -> Result<()> {
        let mut heap: BinaryHeap<SeqEntry> = BinaryHeap::new();
        let result = self.collect_ordered_inner(&mut heap);
        for entry in heap.drain() {
            self.resources.release_buffer(entry.buf);
        }
        result
    }

    fn collect_ordered_inner(&self, heap: &mut BinaryHeap<SeqEntry>) -> Result<()> {
        let n = self.ins.len();
        let mut open = vec![true; n];
        let mut next = 0u64;
        let mut port = 0;

        while open.iter().any(|&o| o) {
            if open[port] {
                match self.ins[port].pop() {
                    Some(mut buf) => match buf.pop_seq() {
                        Some(seq) => heap.push(SeqEntry { seq, buf }),
                        // Unstamped buffers pass through in arrival order.
                        None => self.forward(buf)?,
                    },
                    None => open[port] = false,
                }
                while heap.peek().map_or(false, |entry| entry.seq == next) {
                    self.forward(heap.pop().unwrap().buf)?;
                    next += 1;
                }
            }
            port = (port + 1) % n;
        }

        // A faulted branch can leave gaps; emit the stragglers in order.
        while let Some(entry) = heap.pop() {
            self.forward(entry.buf)?;
        }
        Ok(())
    }

    /// Forwards buffers as they arrive, rotating over the open inputs.
    fn collect_arrival(&self) -> Result<()> {
        let n = self.ins.len();
        let mut open = vec![true; n];
        let mut port = 0;
        let mut idle = 0;

        while open.iter().any(|&o| o) {
            if open[port] {
                match self.ins[port].try_pop() {
                    TryPop::Data(mut buf) => {
                        buf.pop_seq();
                        self.forward(buf)?;
                        idle = 0;
                    }
                    TryPop::Done => open[port] = false,
                    TryPop::Empty => {
                        idle += 1;
                        if idle >= n {
                            std::thread::sleep(Duration::from_micros(100));
                            idle = 0;
                        }
                    }
                }
            }
            port = (port + 1) % n;
        }
        Ok(())
    }
}
