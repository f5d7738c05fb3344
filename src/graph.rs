//! The task graph: construction from the declarative description and
//! validation before execution.

use std::collections::VecDeque;

use serde::Deserialize;

use crate::error::{Error, Result};
use crate::plugins::PluginRegistry;
use crate::task::{Properties, Task, TaskMode};

/// Index of a node within its graph.
pub type NodeId = usize;

/// Fan-out policy of a split composite.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SplitMode {
    /// Buffers are dealt to branches in turn; the paired collector restores
    /// the original order.
    RoundRobin,
    /// Every branch sees a copy of every buffer.
    Broadcast,
    /// Each buffer goes to a uniformly random branch; no order guarantee.
    Randomize,
}

impl Default for SplitMode {
    fn default() -> SplitMode {
        SplitMode::RoundRobin
    }
}

/// The declarative graph description (the JSON schema of the front-end).
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum GraphDesc {
    Filter {
        plugin: String,
        #[serde(default)]
        properties: Properties,
    },
    Sequence {
        elements: Vec<GraphDesc>,
    },
    Split {
        #[serde(default)]
        mode: SplitMode,
        elements: Vec<GraphDesc>,
    },
}

pub(crate) enum NodeKind {
    Task(Box<dyn Task>),
    Copier(SplitMode),
    Collector(SplitMode),
}

pub(crate) struct Node {
    pub(crate) name: String,
    pub(crate) kind: NodeKind,
    /// Plugin name and resolved properties, kept so the scheduler can
    /// re-instantiate the node when replicating across devices.
    pub(crate) plugin: Option<String>,
    pub(crate) properties: Properties,
    /// Edge ids, in port order.
    pub(crate) inputs: Vec<usize>,
    pub(crate) outputs: Vec<usize>,
    /// Device index assigned during expansion.
    pub(crate) device: Option<usize>,
}

pub(crate) struct Edge {
    pub(crate) from: NodeId,
    pub(crate) to: NodeId,
}

/// A DAG of task instances connected by (future) channels.
///
/// Graphs are built either from a [`GraphDesc`] tree or programmatically
/// with [`add_task`](Graph::add_task) and [`connect`](Graph::connect), then
/// validated and handed to the scheduler.
#[derive(Default)]
pub struct Graph {
    pub(crate) nodes: Vec<Node>,
    pub(crate) edges: Vec<Edge>,
}

impl Graph {
    pub fn new() -> Graph {
        Graph::default()
    }

    /// Parses a JSON document and builds the graph it describes.
    ///
    /// Malformed JSON surfaces as `Error::Json`; a well-formed document
    /// that does not match the schema (unknown `type`, missing fields)
    /// surfaces as `BadGraph`.
    pub fn from_json(json: &str, registry: &PluginRegistry) -> Result<Graph> {
        let value: serde_json::Value = serde_json::from_str(json)?;
        let desc: GraphDesc =
            serde_json::from_value(value).map_err(|e| Error::BadGraph(e.to_string()))?;
        Graph::from_desc(&desc, registry)
    }

    pub fn from_desc(desc: &GraphDesc, registry: &PluginRegistry) -> Result<Graph> {
        let mut graph = Graph::new();
        graph.build(desc, registry)?;
        Ok(graph)
    }

    /// Adds a task instance and returns its node id.
    pub fn add_task<S: Into<String>>(&mut self, name: S, task: Box<dyn Task>) -> NodeId {
        self.push_node(name.into(), NodeKind::Task(task), None, Properties::new())
    }

    /// Adds a fan-out copier node.
    pub fn add_copier(&mut self, mode: SplitMode) -> NodeId {
        self.push_node(format!("copy-{:?}", mode), NodeKind::Copier(mode), None, Properties::new())
    }

    /// Adds the fan-in collector paired with a copier.
    pub fn add_collector(&mut self, mode: SplitMode) -> NodeId {
        self.push_node(
            format!("collect-{:?}", mode),
            NodeKind::Collector(mode),
            None,
            Properties::new(),
        )
    }

    pub(crate) fn push_node(
        &mut self,
        name: String,
        kind: NodeKind,
        plugin: Option<String>,
        properties: Properties,
    ) -> NodeId {
        self.nodes.push(Node {
            name,
            kind,
            plugin,
            properties,
            inputs: Vec::new(),
            outputs: Vec::new(),
            device: None,
        });
        self.nodes.len() - 1
    }

    /// Connects an output port of `from` to an input port of `to`. Ports
    /// are assigned in call order.
    pub fn connect(&mut self, from: NodeId, to: NodeId) -> Result<()> {
        if from >= self.nodes.len() || to >= self.nodes.len() {
            return Err(Error::BadGraph("connect: no such node".into()));
        }
        let edge = self.edges.len();
        self.edges.push(Edge { from, to });
        self.nodes[from].outputs.push(edge);
        self.nodes[to].inputs.push(edge);
        Ok(())
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn node_name(&self, id: NodeId) -> &str {
        &self.nodes[id].name
    }

    /// Recursively lowers one description node; returns its (entry, exit).
    fn build(&mut self, desc: &GraphDesc, registry: &PluginRegistry) -> Result<(NodeId, NodeId)> {
        match *desc {
            GraphDesc::Filter { ref plugin, ref properties } => {
                let (task, resolved) = registry.instantiate(plugin, properties)?;
                let instance = self
                    .nodes
                    .iter()
                    .filter(|n| n.plugin.as_deref() == Some(plugin.as_str()))
                    .count();
                let name = format!("{}-{}", plugin, instance);
                let id = self.push_node(name, NodeKind::Task(task), Some(plugin.clone()), resolved);
                Ok((id, id))
            }
            GraphDesc::Sequence { ref elements } => {
                if elements.is_empty() {
                    return Err(Error::BadGraph("empty sequence".into()));
                }
                let mut entry = None;
                let mut prev_exit: Option<NodeId> = None;
                for element in elements {
                    let (first, last) = self.build(element, registry)?;
                    if let Some(prev) = prev_exit {
                        self.connect(prev, first)?;
                    }
                    entry.get_or_insert(first);
                    prev_exit = Some(last);
                }
                Ok((entry.unwrap(), prev_exit.unwrap()))
            }
            GraphDesc::Split { mode, ref elements } => {
                if elements.is_empty() {
                    return Err(Error::BadGraph("split with no branches".into()));
                }
                let copier = self.add_copier(mode);
                let collector = self.add_collector(mode);
                for element in elements {
                    let (first, last) = self.build(element, registry)?;
                    self.connect(copier, first)?;
                    self.connect(last, collector)?;
                }
                Ok((copier, collector))
            }
        }
    }

    fn declared_out_dims(&self, id: NodeId) -> Option<u8> {
        match self.nodes[id].kind {
            NodeKind::Task(ref task) => task.spec().out_dims,
            // Copiers and collectors are shape-transparent.
            NodeKind::Copier(..) | NodeKind::Collector(..) => None,
        }
    }

    /// Type-checks the graph before execution.
    ///
    /// Checks arity agreement on every node, dimensionality agreement on
    /// every edge where both sides declare one, the presence of a source,
    /// reachability of every sink, and acyclicity.
    pub fn validate(&self) -> Result<()> {
        if self.nodes.is_empty() {
            return Err(Error::BadGraph("graph has no nodes".into()));
        }

        let mut has_generator = false;
        for node in &self.nodes {
            match node.kind {
                NodeKind::Task(ref task) => {
                    let spec = task.spec();
                    if node.inputs.len() != spec.n_inputs {
                        return Err(Error::BadGraph(format!(
                            "task '{}' declares {} input(s) but {} are connected",
                            node.name,
                            spec.n_inputs,
                            node.inputs.len()
                        )));
                    }
                    if node.outputs.len() != spec.n_outputs {
                        return Err(Error::BadGraph(format!(
                            "task '{}' declares {} output(s) but {} are connected",
                            node.name,
                            spec.n_outputs,
                            node.outputs.len()
                        )));
                    }
                    let arity_sane = match spec.mode {
                        TaskMode::Generator => spec.n_inputs == 0 && spec.n_outputs >= 1,
                        TaskMode::Processor | TaskMode::Reductor => {
                            spec.n_inputs >= 1 && spec.n_outputs >= 1
                        }
                        TaskMode::Sink => spec.n_inputs >= 1 && spec.n_outputs == 0,
                    };
                    if !arity_sane {
                        return Err(Error::BadGraph(format!(
                            "task '{}' declares arities incompatible with its mode",
                            node.name
                        )));
                    }
                    if spec.mode == TaskMode::Generator {
                        has_generator = true;
                    }
                    for (port, &edge) in node.inputs.iter().enumerate() {
                        let produced = self.declared_out_dims(self.edges[edge].from);
                        let declared = spec.in_dims.get(port).copied();
                        if let (Some(produced), Some(declared)) = (produced, declared) {
                            if produced != declared {
                                return Err(Error::BadGraph(format!(
                                    "task '{}' input {} expects {}-d buffers but its \
                                     producer emits {}-d buffers",
                                    node.name, port, declared, produced
                                )));
                            }
                        }
                    }
                }
                NodeKind::Copier(..) => {
                    if node.inputs.len() != 1 || node.outputs.is_empty() {
                        return Err(Error::BadGraph(format!(
                            "copier '{}' must have one input and at least one output",
                            node.name
                        )));
                    }
                }
                NodeKind::Collector(..) => {
                    if node.inputs.is_empty() || node.outputs.len() != 1 {
                        return Err(Error::BadGraph(format!(
                            "collector '{}' must have at least one input and one output",
                            node.name
                        )));
                    }
                }
            }
        }
        if !has_generator {
            return Err(Error::BadGraph("graph has no source".into()));
        }

        self.check_sinks_reachable()?;
        self.check_acyclic()
    }

    fn check_sinks_reachable(&self) -> Result<()> {
        let mut visited = vec![false; self.nodes.len()];
        let mut frontier: VecDeque<NodeId> = self
            .nodes
            .iter()
            .enumerate()
            .filter(|(_, n)| match n.kind {
                NodeKind::Task(ref task) => task.spec().mode == TaskMode::Generator,
                _ => false,
            })
            .map(|(id, _)| id)
            .collect();

        while let Some(id) = frontier.pop_front() {
            if std::mem::replace(&mut visited[id], true) {
                continue;
            }
            for &edge in &self.nodes[id].outputs {
                frontier.push_back(self.edges[edge].to);
            }
        }

        for (id, node) in self.nodes.iter().enumerate() {
            let is_sink = match node.kind {
                NodeKind::Task(ref task) => task.spec().mode == TaskMode::Sink,
                _ => false,
            };
            if is_sink && !visited[id] {
                return Err(Error::BadGraph(format!(
                    "sink '{}' is not reachable from any source",
                    node.name
                )));
            }
        }
        Ok(())
    }

    fn check_acyclic(&self) -> Result<()> {
        let mut indegree: Vec<usize> = self.nodes.iter().map(|n| n.inputs.len()).collect();
        let mut frontier: VecDeque<NodeId> = indegree
            .iter()
            .enumerate()
            .filter(|(_, &d)| d == 0)
            .map(|(id, _)| id)
            .collect();
        let mut seen = 0;

        while let Some(id) = frontier.pop_front() {
            seen += 1;
            for &edge in &self.nodes[id].outputs {
                let to = self.edges[edge].to;
                indegree[to] -= 1;
                if indegree[to] == 0 {
                    frontier.push_back(to);
                }
            }
        }

        if seen != self.nodes.len() {
            return Err(Error::BadGraph("graph contains a cycle".into()));
        }
        Ok(())
    }
}
