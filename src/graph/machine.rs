//! Machine - evaluates a compiled graph on a Burn device.
//!
//! Compilation flattens the part of the graph needed for the requested
//! roots into a list of steps. Each run walks the steps in order and keeps
//! every intermediate value until the next reset, so outputs and the loss
//! can be read afterwards.

use std::collections::HashMap;

use burn::nn::DropoutConfig;
use burn::tensor::activation;
use burn::tensor::module::{conv2d, max_pool2d};
use burn::tensor::ops::ConvOptions;
use burn::tensor::{Tensor, TensorData, backend::Backend};

use super::core::Graph;
use super::node::{NodeId, NodeKind};
use super::operation::Operation;
use super::value::{Value, map_value, with_value, zip_value};
use crate::errors::ModelError;

/// Whether a run is part of training.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Train,
    Infer,
}

/// Execution step in the forward pass.
#[derive(Debug, Clone)]
enum Step {
    Feed(NodeId),
    Param(NodeId),
    Constant(NodeId),
    Op {
        node: NodeId,
        op: Operation,
        inputs: Vec<NodeId>,
    },
}

/// Compiled evaluator for one graph.
#[derive(Debug)]
pub struct Machine<B: Backend> {
    steps: Vec<Step>,
    constants: HashMap<NodeId, Value<B>>,
    values: HashMap<NodeId, Value<B>>,
}

impl<B: Backend> Machine<B> {
    /// Compiles everything `roots` depend on. Constants are uploaded once.
    pub fn compile(
        graph: &Graph,
        roots: &[NodeId],
        device: &B::Device,
    ) -> Result<Self, ModelError> {
        let mut steps = Vec::new();
        let mut constants = HashMap::new();
        for id in graph.ancestors(roots) {
            let step = match &graph.entry(id).kind {
                NodeKind::Placeholder => Step::Feed(id),
                NodeKind::Parameter(_) => Step::Param(id),
                NodeKind::Constant(value) => {
                    constants.insert(id, Value::from_host(value, device)?);
                    Step::Constant(id)
                }
                NodeKind::Op { op, inputs } => Step::Op {
                    node: id,
                    op: op.clone(),
                    inputs: inputs.clone(),
                },
            };
            steps.push(step);
        }
        log::debug!("Compiled machine with {} steps", steps.len());
        Ok(Self {
            steps,
            constants,
            values: HashMap::new(),
        })
    }

    /// Forgets every value from the previous run.
    pub fn reset(&mut self) {
        self.values.clear();
    }

    /// Value computed for `id` by the last run.
    pub fn value(&self, id: NodeId) -> Option<&Value<B>> {
        self.values.get(&id)
    }

    /// Runs every step. `feeds` must cover every placeholder the roots
    /// depend on and `params` every parameter.
    pub fn run(
        &mut self,
        mut feeds: HashMap<NodeId, Value<B>>,
        params: &HashMap<NodeId, Value<B>>,
        mode: Mode,
    ) -> Result<(), ModelError> {
        for step in &self.steps {
            let (id, value) = match step {
                Step::Feed(id) => {
                    let value = feeds.remove(id).ok_or_else(|| {
                        ModelError::engine(format!("no value fed for node #{}", id))
                    })?;
                    (*id, value)
                }
                Step::Param(id) => {
                    let value = params.get(id).cloned().ok_or_else(|| {
                        ModelError::engine(format!("no value bound for parameter #{}", id))
                    })?;
                    (*id, value)
                }
                Step::Constant(id) => {
                    let value = self.constants.get(id).cloned().ok_or_else(|| {
                        ModelError::engine(format!("constant #{} was not uploaded", id))
                    })?;
                    (*id, value)
                }
                Step::Op { node, op, inputs } => {
                    let args = inputs
                        .iter()
                        .map(|i| {
                            self.values.get(i).cloned().ok_or_else(|| {
                                ModelError::engine(format!("#{} evaluated before #{}", node, i))
                            })
                        })
                        .collect::<Result<Vec<_>, _>>()?;
                    let value = eval(op, args, mode).map_err(|e| match e {
                        ModelError::Engine { message } => {
                            ModelError::engine(format!("{} at #{}: {}", op.name(), node, message))
                        }
                        other => other,
                    })?;
                    (*node, value)
                }
            };
            self.values.insert(id, value);
        }
        Ok(())
    }
}

fn eval<B: Backend>(
    op: &Operation,
    args: Vec<Value<B>>,
    mode: Mode,
) -> Result<Value<B>, ModelError> {
    let mut args = args.into_iter();
    let mut next = || {
        args.next()
            .ok_or_else(|| ModelError::engine("missing operand"))
    };

    Ok(match op {
        Operation::MatMul => {
            let a = next()?.into_rank2()?;
            let b = next()?.into_rank2()?;
            Value::R2(a.matmul(b))
        }
        Operation::Concat { axis } => {
            let mut parts = Vec::new();
            while let Ok(part) = next() {
                parts.push(part);
            }
            concat(parts, *axis)?
        }
        Operation::Add => zip_value!(next()?, next()?, |a, b| a + b)?,
        Operation::Sub => zip_value!(next()?, next()?, |a, b| a - b)?,
        Operation::Mul => zip_value!(next()?, next()?, |a, b| a * b)?,
        Operation::Div | Operation::BroadcastDiv => zip_value!(next()?, next()?, |a, b| a / b)?,
        Operation::SumAxis { axis } => map_value!(next()?, |t| t.sum_dim(*axis)),
        Operation::SumAll => Value::R1(with_value!(next()?, |t| t.sum())),
        Operation::MeanAll => Value::R1(with_value!(next()?, |t| t.mean())),
        Operation::Square => map_value!(next()?, |t| t.clone() * t),
        Operation::Neg => map_value!(next()?, |t| t.neg()),
        Operation::Log => map_value!(next()?, |t| t.log()),
        Operation::Exp => map_value!(next()?, |t| t.exp()),
        Operation::Sigmoid => map_value!(next()?, |t| activation::sigmoid(t)),
        Operation::Relu => map_value!(next()?, |t| activation::relu(t)),
        Operation::Tanh => map_value!(next()?, |t| activation::tanh(t)),
        Operation::Clamp { min, max } => map_value!(next()?, |t| t.clamp(*min, *max)),
        Operation::Greater { threshold } => {
            map_value!(next()?, |t| t.greater_elem(*threshold).float())
        }
        Operation::MulScalar(c) => map_value!(next()?, |t| t.mul_scalar(*c)),
        Operation::AddScalar(c) => map_value!(next()?, |t| t.add_scalar(*c)),
        Operation::ScalarSub(c) => map_value!(next()?, |t| t.neg().add_scalar(*c)),
        Operation::Conv2d { stride, padding } => {
            let x = pad_spatial(next()?.into_rank4()?, *padding, 0.0);
            let kernel = next()?.into_rank4()?;
            let options = ConvOptions::new(*stride, [0, 0], [1, 1], 1);
            Value::R4(conv2d(x, kernel, None, options))
        }
        Operation::MaxPool2d {
            pool,
            stride,
            padding,
        } => {
            let x = pad_spatial(next()?.into_rank4()?, *padding, f64::NEG_INFINITY);
            Value::R4(max_pool2d(x, *pool, *stride, [0, 0], [1, 1]))
        }
        Operation::Dropout { probability } => {
            let x = next()?;
            match mode {
                Mode::Infer => x,
                Mode::Train => {
                    let dropout = DropoutConfig::new(*probability).init();
                    map_value!(x, |t| dropout.forward(t))
                }
            }
        }
        Operation::Reshape { shape } => next()?.reshape(shape)?,
        Operation::OneHot { num_classes, .. } => one_hot(next()?, *num_classes)?,
    })
}

fn concat<B: Backend>(parts: Vec<Value<B>>, axis: usize) -> Result<Value<B>, ModelError> {
    let rank = parts
        .first()
        .map(Value::rank)
        .ok_or_else(|| ModelError::engine("nothing to concatenate"))?;
    Ok(match rank {
        1 => Value::R1(Tensor::cat(
            parts.into_iter().map(Value::into_rank1).collect::<Result<_, _>>()?,
            axis,
        )),
        2 => Value::R2(Tensor::cat(
            parts.into_iter().map(Value::into_rank2).collect::<Result<_, _>>()?,
            axis,
        )),
        3 => Value::R3(Tensor::cat(
            parts.into_iter().map(Value::into_rank3).collect::<Result<_, _>>()?,
            axis,
        )),
        _ => Value::R4(Tensor::cat(
            parts.into_iter().map(Value::into_rank4).collect::<Result<_, _>>()?,
            axis,
        )),
    })
}

/// Pads the two spatial axes with `fill`. Padding is `[top, bottom, left, right]`.
fn pad_spatial<B: Backend>(x: Tensor<B, 4>, padding: [usize; 4], fill: f64) -> Tensor<B, 4> {
    let [top, bottom, left, right] = padding;
    if padding == [0; 4] {
        return x;
    }
    let device = x.device();
    let [n, c, h, w] = x.dims();

    let mut rows = Vec::with_capacity(3);
    if top > 0 {
        rows.push(Tensor::full([n, c, top, w], fill, &device));
    }
    rows.push(x);
    if bottom > 0 {
        rows.push(Tensor::full([n, c, bottom, w], fill, &device));
    }
    let x = Tensor::cat(rows, 2);

    let h = h + top + bottom;
    let mut cols = Vec::with_capacity(3);
    if left > 0 {
        cols.push(Tensor::full([n, c, h, left], fill, &device));
    }
    cols.push(x);
    if right > 0 {
        cols.push(Tensor::full([n, c, h, right], fill, &device));
    }
    Tensor::cat(cols, 3)
}

/// Builds indicator rows on the host. Indices outside `0..num_classes` are
/// rejected.
fn one_hot<B: Backend>(indices: Value<B>, num_classes: usize) -> Result<Value<B>, ModelError> {
    let device = with_value!(&indices, |t| t.device());
    let values = indices.to_f64_vec()?;
    let mut out = vec![0.0f64; values.len() * num_classes];
    for (row, &v) in values.iter().enumerate() {
        if v < 0.0 || v.fract() != 0.0 || v as usize >= num_classes {
            return Err(ModelError::engine(format!(
                "class index {} at row {} is outside 0..{}",
                v, row, num_classes
            )));
        }
        out[row * num_classes + v as usize] = 1.0;
    }
    let data = TensorData::new(out, [values.len(), num_classes]).convert::<B::FloatElem>();
    Ok(Value::R2(Tensor::from_data(data, &device)))
}
