//! Model - the container that owns a graph, its layers and, once built,
//! the compiled machine and parameter storage.
//!
//! A model is assembled by attaching layers one after another, then built
//! exactly once with its named inputs, named outputs and a loss. After
//! building the topology is frozen and the model can predict and fit.

mod build;
mod params;

use std::collections::{BTreeMap, HashMap, HashSet};
use std::fmt::Write as _;
use std::io::{Read, Write};

use burn::optim::Optimizer;
use burn::tensor::{ElementConversion, backend::AutodiffBackend};

use crate::errors::ModelError;
use crate::graph::{Graph, Machine, Mode, Node, NodeId, NodeKind, Value};
use crate::layers::{Input, Layer};
use crate::tensor::{DType, HostTensor, NamedTensors};
use crate::training::batching::{Remainder, split_batches};
use crate::training::{LossContext, Solver};

pub use build::BuildConfig;
pub use params::{ParamHandle, ParamStore};
pub(crate) use params::{ParamSet, ParamSlot};

/// Everything that only exists once the model is built.
struct Built<B: AutodiffBackend> {
    inputs: BTreeMap<String, Node>,
    outputs: BTreeMap<String, Node>,
    loss_required: BTreeMap<String, Node>,
    loss: Node,
    params: ParamSet<B>,
    machine: Machine<B>,
}

/// A neural network assembled from layers over a symbolic graph.
pub struct Model<B: AutodiffBackend> {
    graph: Graph,
    layers: Vec<Box<dyn Layer>>,
    device: B::Device,
    built: Option<Built<B>>,
}

impl<B: AutodiffBackend> Default for Model<B> {
    fn default() -> Self {
        Self::new(B::Device::default())
    }
}

impl<B: AutodiffBackend> std::fmt::Debug for Model<B> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Model")
            .field("graph", &self.graph.id())
            .field("nodes", &self.graph.len())
            .field(
                "layers",
                &self.layers.iter().map(|l| l.name()).collect::<Vec<_>>(),
            )
            .field("built", &self.built.is_some())
            .finish()
    }
}

impl<B: AutodiffBackend> Model<B> {
    /// Creates an empty model whose values live on `device`.
    pub fn new(device: B::Device) -> Self {
        Self {
            graph: Graph::new(),
            layers: Vec::new(),
            device,
            built: None,
        }
    }

    /// Returns the model's graph.
    pub fn graph(&self) -> &Graph {
        &self.graph
    }

    /// Returns the attached layers in attachment order.
    pub fn layers(&self) -> &[Box<dyn Layer>] {
        &self.layers
    }

    pub fn device(&self) -> &B::Device {
        &self.device
    }

    pub fn is_built(&self) -> bool {
        self.built.is_some()
    }

    /// Attaches `layer` to `inputs` and returns its output node.
    ///
    /// The layer is moved into the model. On failure nothing is added to
    /// the graph.
    pub fn attach<L: Layer + 'static>(
        &mut self,
        mut layer: L,
        inputs: &[&Node],
    ) -> Result<Node, ModelError> {
        if self.built.is_some() {
            return Err(ModelError::AlreadyBuilt);
        }
        for node in inputs {
            self.graph.check_owned(node)?;
        }
        let inputs: Vec<Node> = inputs.iter().map(|n| (*n).clone()).collect();
        let mark = self.graph.len();
        match layer.attach(&mut self.graph, &inputs) {
            Ok(output) => {
                log::debug!(
                    "Attached {} layer {} with output shape {:?}",
                    layer.kind(),
                    layer.name(),
                    output.shape()
                );
                self.layers.push(Box::new(layer));
                Ok(output)
            }
            Err(e) => {
                self.graph.truncate(mark);
                Err(e)
            }
        }
    }

    /// Like [`attach`](Self::attach), panicking on error.
    pub fn must_attach<L: Layer + 'static>(&mut self, layer: L, inputs: &[&Node]) -> Node {
        match self.attach(layer, inputs) {
            Ok(node) => node,
            Err(e) => panic!("{}", e),
        }
    }

    /// Attaches an [`Input`] layer called `name`.
    pub fn input(&mut self, name: &str, shape: &[usize], dtype: DType) -> Result<Node, ModelError> {
        self.attach(Input::new(name, shape).with_dtype(dtype), &[])
    }

    /// Like [`input`](Self::input), panicking on error.
    pub fn must_input(&mut self, name: &str, shape: &[usize], dtype: DType) -> Node {
        match self.input(name, shape, dtype) {
            Ok(node) => node,
            Err(e) => panic!("{}", e),
        }
    }

    /// Builds the model: runs the loss construction, checks the graph,
    /// allocates parameters and compiles the machine.
    ///
    /// Any error leaves the model unbuilt with its graph as before.
    pub fn build(&mut self, config: BuildConfig) -> Result<(), ModelError> {
        if self.built.is_some() {
            return Err(ModelError::AlreadyBuilt);
        }
        let mark = self.graph.len();
        match self.build_inner(config) {
            Ok(built) => {
                log::info!(
                    "Built model with {} layers, {} nodes and {} parameter tensors",
                    self.layers.len(),
                    self.graph.len(),
                    built.params.len()
                );
                self.built = Some(built);
                Ok(())
            }
            Err(e) => {
                self.graph.truncate(mark);
                Err(e)
            }
        }
    }

    /// Like [`build`](Self::build), panicking on error.
    pub fn must_build(&mut self, config: BuildConfig) {
        if let Err(e) = self.build(config) {
            panic!("{}", e);
        }
    }

    fn build_inner(&mut self, config: BuildConfig) -> Result<Built<B>, ModelError> {
        let BuildConfig {
            inputs,
            outputs,
            loss,
        } = config;
        if inputs.is_empty() {
            return Err(ModelError::NoInputs);
        }
        if outputs.is_empty() {
            return Err(ModelError::NoOutputs);
        }
        let loss = loss.ok_or(ModelError::NoLoss)?;

        for node in inputs.values().chain(outputs.values()) {
            self.graph.check_owned(node)?;
        }
        for (name, node) in &inputs {
            if !matches!(self.graph.entry(node.id()).kind, NodeKind::Placeholder) {
                return Err(ModelError::config(format!(
                    "input {} must be a placeholder, got {}",
                    name, node
                )));
            }
        }
        let mut layer_names = HashSet::new();
        for layer in &self.layers {
            if !layer_names.insert(layer.name()) {
                return Err(ModelError::DuplicateLayerName {
                    name: layer.name().to_string(),
                });
            }
        }

        let loss_output = {
            let mut ctx = LossContext::new(&mut self.graph, &self.layers);
            loss(&mut ctx)?
        };
        let loss_node = loss_output.loss;
        self.graph.check_owned(&loss_node)?;
        if loss_node.shape() != [1] {
            return Err(ModelError::InvalidShape {
                context: "loss".to_string(),
                shape: loss_node.shape().to_vec(),
                message: "loss must be a single value".to_string(),
            });
        }
        for (name, node) in &loss_output.required {
            self.graph.check_owned(node)?;
            if inputs.contains_key(name) {
                return Err(ModelError::DuplicateLossInput { name: name.clone() });
            }
        }
        if let Some(name) = self.graph.duplicate_name() {
            return Err(ModelError::DuplicateNodeName {
                name: name.to_string(),
            });
        }

        let mut slots = Vec::new();
        let mut owned_params = HashSet::new();
        for layer in &self.layers {
            for (param_name, node) in layer.parameters() {
                let NodeKind::Parameter(init) = self.graph.entry(node.id()).kind else {
                    return Err(ModelError::config(format!(
                        "{}:{} is not a parameter node",
                        layer.name(),
                        param_name
                    )));
                };
                owned_params.insert(node.id());
                slots.push(ParamSlot::new(
                    format!("{}:{}", layer.name(), param_name),
                    node,
                    init,
                    layer.trainable(),
                    &self.device,
                ));
            }
        }
        let trainables: Vec<NodeId> = slots
            .iter()
            .filter(|s| s.trainable)
            .map(|s| s.node.id())
            .collect();
        self.graph
            .check_differentiable(loss_node.id(), &trainables)?;

        let mut roots: Vec<NodeId> = outputs.values().map(Node::id).collect();
        roots.push(loss_node.id());
        let fed: HashSet<NodeId> = inputs
            .values()
            .chain(loss_output.required.values())
            .map(Node::id)
            .collect();
        for id in self.graph.ancestors(&roots) {
            match self.graph.entry(id).kind {
                NodeKind::Placeholder if !fed.contains(&id) => {
                    return Err(ModelError::MissingInput {
                        name: self.graph.node(id).to_string(),
                    });
                }
                NodeKind::Parameter(_) if !owned_params.contains(&id) => {
                    return Err(ModelError::config(format!(
                        "parameter {} does not belong to any layer",
                        self.graph.node(id)
                    )));
                }
                _ => {}
            }
        }

        let machine = Machine::compile(&self.graph, &roots, &self.device)?;
        Ok(Built {
            inputs,
            outputs,
            loss_required: loss_output.required,
            loss: loss_node,
            params: ParamSet::new(slots),
            machine,
        })
    }

    fn built(&self) -> Result<&Built<B>, ModelError> {
        self.built.as_ref().ok_or(ModelError::NotBuilt)
    }

    fn built_mut(&mut self) -> Result<&mut Built<B>, ModelError> {
        self.built.as_mut().ok_or(ModelError::NotBuilt)
    }

    /// Returns the named input nodes.
    pub fn input_nodes(&self) -> Result<&BTreeMap<String, Node>, ModelError> {
        Ok(&self.built()?.inputs)
    }

    /// Returns the named output nodes.
    pub fn output_nodes(&self) -> Result<&BTreeMap<String, Node>, ModelError> {
        Ok(&self.built()?.outputs)
    }

    /// Returns the placeholders the loss needs fed while fitting.
    pub fn loss_required_nodes(&self) -> Result<&BTreeMap<String, Node>, ModelError> {
        Ok(&self.built()?.loss_required)
    }

    /// Returns the scalar loss node.
    pub fn loss_node(&self) -> Result<&Node, ModelError> {
        Ok(&self.built()?.loss)
    }

    /// Parameter nodes of every trainable layer.
    pub fn trainables(&self) -> Vec<Node> {
        self.layers
            .iter()
            .filter(|l| l.trainable())
            .flat_map(|l| l.parameters().into_values())
            .collect()
    }

    /// The fixed batch size, axis 0 of the first input.
    pub fn batch_size(&self) -> Result<usize, ModelError> {
        self.built()?
            .inputs
            .values()
            .next()
            .map(|n| n.shape()[0])
            .ok_or(ModelError::NoInputs)
    }

    /// Runs the model on exactly one batch.
    pub fn predict_batch(&mut self, inputs: &NamedTensors) -> Result<NamedTensors, ModelError> {
        let device = self.device.clone();
        let built = self.built_mut()?;
        check_feeds(&built.inputs, inputs)?;

        let mut feeds = upload(&built.inputs, inputs, &device)?;
        for node in built.loss_required.values() {
            feeds.insert(node.id(), Value::zeros(node.shape(), &device)?);
        }
        let params = built.params.detached_values()?;
        built.machine.reset();
        built.machine.run(feeds, &params, Mode::Infer)?;

        let mut outputs = NamedTensors::new();
        for (name, node) in &built.outputs {
            let value = built
                .machine
                .value(node.id())
                .ok_or_else(|| {
                    ModelError::engine(format!("output {} was not computed", name))
                })?;
            outputs.insert(name.clone(), value.to_host(node.dtype())?);
        }
        built.machine.reset();
        Ok(outputs)
    }

    /// Runs one training step on exactly one batch and returns its loss.
    pub fn fit_batch<O: Optimizer<ParamStore<B>, B>>(
        &mut self,
        inputs: &NamedTensors,
        targets: &NamedTensors,
        solver: &mut Solver<B, O>,
    ) -> Result<f64, ModelError> {
        let device = self.device.clone();
        let built = self.built_mut()?;
        check_feeds(&built.inputs, inputs)?;
        check_feeds(&built.loss_required, targets)?;

        let mut feeds = upload(&built.inputs, inputs, &device)?;
        feeds.extend(upload(&built.loss_required, targets, &device)?);
        let params = built.params.values()?;
        built.machine.reset();
        built.machine.run(feeds, &params, Mode::Train)?;

        let loss = built
            .machine
            .value(built.loss.id())
            .cloned()
            .ok_or_else(|| ModelError::engine("loss was not computed"))?
            .into_rank1()?;
        built.machine.reset();
        let value = loss.clone().into_scalar().elem::<f64>();
        solver.step(loss, &built.params.trainable_handles());
        Ok(value)
    }

    /// Predicts any number of rows. The rows are cut into batches, the last
    /// one zero-padded, and the padding is trimmed from the outputs.
    pub fn predict(&mut self, inputs: &NamedTensors) -> Result<NamedTensors, ModelError> {
        let batch_size = self.batch_size()?;
        let (batches, padded) = split_batches(inputs, batch_size, Remainder::Pad)?;
        if batches.is_empty() {
            return Err(ModelError::InvalidTensor {
                message: "no rows to predict".to_string(),
            });
        }
        let last = batches.len() - 1;

        let mut parts: BTreeMap<String, Vec<HostTensor>> = BTreeMap::new();
        for (i, batch) in batches.iter().enumerate() {
            for (name, output) in self.predict_batch(batch)? {
                let output = if i == last && padded > 0 {
                    output.slice_rows(0, batch_size - padded)?
                } else {
                    output
                };
                parts.entry(name).or_default().push(output);
            }
        }
        parts
            .into_iter()
            .map(|(name, parts)| Ok((name, HostTensor::concat_rows(&parts)?)))
            .collect()
    }

    /// Snapshot of every parameter, keyed `layer:param`.
    pub fn get_params(&self) -> Result<BTreeMap<String, HostTensor>, ModelError> {
        self.built()?.params.get()
    }

    /// Loads parameters with matching keys and ignores the rest, so layers
    /// with equal names can be loaded across architectures.
    pub fn set_params(&mut self, params: &BTreeMap<String, HostTensor>) -> Result<(), ModelError> {
        self.built()?.params.set(params)
    }

    /// Writes [`get_params`](Self::get_params) as JSON.
    pub fn write_params<W: Write>(&self, writer: W) -> Result<(), ModelError> {
        self.built()?.params.write(writer)
    }

    /// Reads JSON written by [`write_params`](Self::write_params) and sets it.
    pub fn read_params<R: Read>(&mut self, reader: R) -> Result<(), ModelError> {
        self.built()?.params.read(reader)
    }

    /// Shares storage with the same-named parameters of `source`. Updates
    /// through either model are visible to both. Later binds override
    /// earlier ones.
    pub fn bind_params_from(&mut self, source: &Model<B>) -> Result<(), ModelError> {
        let source = &source.built()?.params;
        let bound = self.built_mut()?.params.bind_from(source)?;
        log::debug!("Bound {} parameters", bound);
        Ok(())
    }

    /// Copies the same-named parameters of `source` into private storage.
    pub fn copy_params_from(&mut self, source: &Model<B>) -> Result<(), ModelError> {
        let source = &source.built()?.params;
        let copied = self.built_mut()?.params.copy_from(source)?;
        log::debug!("Copied {} parameters", copied);
        Ok(())
    }

    /// Text table of inputs, outputs and layers with parameter counts.
    pub fn summary(&self) -> String {
        let mut s = String::new();
        let empty = BTreeMap::new();
        let (inputs, outputs) = match &self.built {
            Some(built) => (&built.inputs, &built.outputs),
            None => (&empty, &empty),
        };
        let _ = writeln!(s, "================== Inputs ===================");
        for (name, node) in inputs {
            let shape = format!("{:?}", node.shape());
            let _ = writeln!(s, "Input       {:<20}          Shape: {:<20}", name, shape);
        }
        let _ = writeln!(s, "================== Outputs ==================");
        for (name, node) in outputs {
            let shape = format!("{:?}", node.shape());
            let _ = writeln!(s, "Output      {:<20}          Shape: {:<20}", name, shape);
        }
        let _ = writeln!(s, "============= Registered Layers =============");
        let mut total = 0;
        for (i, layer) in self.layers.iter().enumerate() {
            let from: Vec<String> = layer.inputs().iter().map(|n| n.to_string()).collect();
            let count: usize = layer.parameters().values().map(Node::volume).sum();
            total += count;
            let shape = layer
                .output()
                .map(|n| format!("{:?}", n.shape()))
                .unwrap_or_default();
            let _ = writeln!(
                s,
                "Layer {:<3} {:>9}::{:<21}Shape: {:<20} From: {:<20} Num Params {}",
                i,
                layer.name(),
                layer.kind(),
                shape,
                format!("[{}]", from.join(" ")),
                count
            );
        }
        let _ = writeln!(s, "=================== Stats ===================");
        let _ = writeln!(s, "Total number of parameters: {}", total);
        s
    }
}

/// Checks that `given` names exactly the nodes in `expected` with matching
/// shapes and dtypes.
fn check_feeds(expected: &BTreeMap<String, Node>, given: &NamedTensors) -> Result<(), ModelError> {
    if let Some(name) = given.keys().find(|k| !expected.contains_key(*k)) {
        return Err(ModelError::UnknownInput { name: name.clone() });
    }
    for (name, node) in expected {
        let tensor = given
            .get(name)
            .ok_or_else(|| ModelError::MissingInput { name: name.clone() })?;
        if tensor.shape() != node.shape() {
            return Err(ModelError::ShapeMismatch {
                name: name.clone(),
                expected: node.shape().to_vec(),
                actual: tensor.shape().to_vec(),
            });
        }
        if tensor.dtype() != node.dtype() {
            return Err(ModelError::DTypeMismatch {
                name: name.clone(),
                expected: node.dtype().to_string(),
                actual: tensor.dtype().to_string(),
            });
        }
    }
    Ok(())
}

fn upload<B: AutodiffBackend>(
    nodes: &BTreeMap<String, Node>,
    tensors: &NamedTensors,
    device: &B::Device,
) -> Result<HashMap<NodeId, Value<B>>, ModelError> {
    nodes
        .iter()
        .filter_map(|(name, node)| tensors.get(name).map(|t| (node.id(), t)))
        .map(|(id, tensor)| Ok((id, Value::from_host(tensor, device)?)))
        .collect()
}
