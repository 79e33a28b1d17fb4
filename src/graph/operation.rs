//! Operations for the computation graph.
//!
//! Uses a simple enum instead of trait objects. Each variant knows how to
//! infer its output shape and dtype; the numeric work happens in the
//! [`Machine`](super::Machine), which hands it to Burn.

use crate::errors::ModelError;
use crate::tensor::DType;

/// Highest tensor rank the engine evaluates.
pub const MAX_RANK: usize = 4;

/// A computation operation in the graph.
#[derive(Debug, Clone, PartialEq)]
pub enum Operation {
    /// Matrix product of two rank-2 nodes.
    MatMul,
    /// Concatenation along an axis.
    Concat { axis: usize },
    Add,
    Sub,
    /// Element-wise (hadamard) product.
    Mul,
    /// Element-wise (hadamard) division.
    Div,
    /// Division where the divisor may have size-1 axes that broadcast.
    BroadcastDiv,
    /// Sum along one axis, keeping it with size 1.
    SumAxis { axis: usize },
    /// Sum of every element, giving shape `[1]`.
    SumAll,
    /// Mean of every element, giving shape `[1]`.
    MeanAll,
    Square,
    Neg,
    Log,
    Exp,
    Sigmoid,
    Relu,
    Tanh,
    Clamp { min: f64, max: f64 },
    /// 1 where the input is strictly greater than the threshold, 0 elsewhere.
    Greater { threshold: f64 },
    MulScalar(f64),
    AddScalar(f64),
    /// `c - x`.
    ScalarSub(f64),
    /// 2-D convolution of `(batch, channels, h, w)` by a
    /// `(kernels, channels, kh, kw)` kernel. Padding is
    /// `[top, bottom, left, right]` of zeros.
    Conv2d {
        stride: [usize; 2],
        padding: [usize; 4],
    },
    /// 2-D max pooling. Padding is `[top, bottom, left, right]` of `-inf`.
    MaxPool2d {
        pool: [usize; 2],
        stride: [usize; 2],
        padding: [usize; 4],
    },
    /// Inverted dropout, active only in training passes.
    Dropout { probability: f64 },
    Reshape { shape: Vec<usize> },
    /// Rank-1 class indices to `(batch, num_classes)` indicator rows.
    OneHot { num_classes: usize, dtype: DType },
}

impl Operation {
    /// Short name used in errors and summaries.
    pub fn name(&self) -> &'static str {
        match self {
            Self::MatMul => "matmul",
            Self::Concat { .. } => "concat",
            Self::Add => "add",
            Self::Sub => "sub",
            Self::Mul => "mul",
            Self::Div => "div",
            Self::BroadcastDiv => "broadcast_div",
            Self::SumAxis { .. } => "sum_axis",
            Self::SumAll => "sum",
            Self::MeanAll => "mean",
            Self::Square => "square",
            Self::Neg => "neg",
            Self::Log => "log",
            Self::Exp => "exp",
            Self::Sigmoid => "sigmoid",
            Self::Relu => "relu",
            Self::Tanh => "tanh",
            Self::Clamp { .. } => "clamp",
            Self::Greater { .. } => "greater",
            Self::MulScalar(_) => "mul_scalar",
            Self::AddScalar(_) => "add_scalar",
            Self::ScalarSub(_) => "scalar_sub",
            Self::Conv2d { .. } => "conv2d",
            Self::MaxPool2d { .. } => "max_pool2d",
            Self::Dropout { .. } => "dropout",
            Self::Reshape { .. } => "reshape",
            Self::OneHot { .. } => "one_hot",
        }
    }

    /// Whether a gradient can flow back through this operation.
    pub fn is_differentiable(&self) -> bool {
        !matches!(self, Self::OneHot { .. } | Self::Greater { .. })
    }

    fn arity(&self) -> Option<usize> {
        match self {
            Self::Concat { .. } => None,
            Self::MatMul
            | Self::Add
            | Self::Sub
            | Self::Mul
            | Self::Div
            | Self::BroadcastDiv
            | Self::Conv2d { .. } => Some(2),
            _ => Some(1),
        }
    }

    fn error(&self, shape: &[usize], message: impl Into<String>) -> ModelError {
        ModelError::InvalidShape {
            context: self.name().to_string(),
            shape: shape.to_vec(),
            message: message.into(),
        }
    }

    /// Infers the output shape and dtype from the input shapes and dtypes.
    pub fn infer(&self, inputs: &[(&[usize], DType)]) -> Result<(Vec<usize>, DType), ModelError> {
        match self.arity() {
            Some(n) if inputs.len() != n => {
                return Err(ModelError::engine(format!(
                    "{} takes {} inputs, got {}",
                    self.name(),
                    n,
                    inputs.len()
                )));
            }
            None if inputs.is_empty() => {
                return Err(ModelError::engine(format!("{} needs inputs", self.name())));
            }
            _ => {}
        }
        let (first, first_dtype) = inputs[0];
        if !matches!(self, Self::Reshape { .. } | Self::OneHot { .. }) {
            if let Some((shape, _)) = inputs.iter().find(|(_, d)| *d != DType::Float) {
                return Err(self.error(shape, "operation requires float inputs"));
            }
        }

        let shape = match self {
            Self::MatMul => {
                let (b, _) = inputs[1];
                if first.len() != 2 || b.len() != 2 || first[1] != b[0] {
                    return Err(self.error(
                        first,
                        format!("cannot multiply {:?} by {:?}", first, b),
                    ));
                }
                vec![first[0], b[1]]
            }
            Self::Concat { axis } => {
                if *axis >= first.len() {
                    return Err(self.error(first, format!("axis {} out of range", axis)));
                }
                let mut out = first.to_vec();
                for (shape, _) in &inputs[1..] {
                    let compatible = shape.len() == first.len()
                        && shape
                            .iter()
                            .zip(first)
                            .enumerate()
                            .all(|(i, (a, b))| i == *axis || a == b);
                    if !compatible {
                        return Err(self.error(
                            shape,
                            format!("cannot concatenate with {:?} along axis {}", first, axis),
                        ));
                    }
                    out[*axis] += shape[*axis];
                }
                out
            }
            Self::Add | Self::Sub | Self::Mul | Self::Div => {
                let (b, _) = inputs[1];
                if first != b {
                    return Err(self.error(b, format!("expected shape {:?}", first)));
                }
                first.to_vec()
            }
            Self::BroadcastDiv => {
                let (b, _) = inputs[1];
                let ok = first.len() == b.len()
                    && first.iter().zip(b).all(|(x, y)| x == y || *y == 1);
                if !ok {
                    return Err(self.error(b, format!("cannot broadcast onto {:?}", first)));
                }
                first.to_vec()
            }
            Self::SumAxis { axis } => {
                if *axis >= first.len() {
                    return Err(self.error(first, format!("axis {} out of range", axis)));
                }
                let mut out = first.to_vec();
                out[*axis] = 1;
                out
            }
            Self::SumAll | Self::MeanAll => vec![1],
            Self::Square
            | Self::Neg
            | Self::Log
            | Self::Exp
            | Self::Sigmoid
            | Self::Relu
            | Self::Tanh
            | Self::Clamp { .. }
            | Self::Greater { .. }
            | Self::MulScalar(_)
            | Self::AddScalar(_)
            | Self::ScalarSub(_) => first.to_vec(),
            Self::Dropout { probability } => {
                if !(0.0..1.0).contains(probability) {
                    return Err(self.error(
                        first,
                        format!("dropout probability {} must be in [0, 1)", probability),
                    ));
                }
                first.to_vec()
            }
            Self::Conv2d { stride, padding } => {
                let (kernel, _) = inputs[1];
                if first.len() != 4 || kernel.len() != 4 {
                    return Err(self.error(first, "convolution needs rank-4 operands"));
                }
                if first[1] != kernel[1] {
                    return Err(self.error(
                        kernel,
                        format!(
                            "kernel expects {} channels, input has {}",
                            kernel[1], first[1]
                        ),
                    ));
                }
                let h = window_output(first[2], kernel[2], stride[0], padding[0] + padding[1])
                    .ok_or_else(|| self.error(first, "kernel taller than padded input"))?;
                let w = window_output(first[3], kernel[3], stride[1], padding[2] + padding[3])
                    .ok_or_else(|| self.error(first, "kernel wider than padded input"))?;
                vec![first[0], kernel[0], h, w]
            }
            Self::MaxPool2d {
                pool,
                stride,
                padding,
            } => {
                if first.len() != 4 {
                    return Err(self.error(first, "pooling needs a rank-4 input"));
                }
                let h = window_output(first[2], pool[0], stride[0], padding[0] + padding[1])
                    .ok_or_else(|| self.error(first, "pool taller than padded input"))?;
                let w = window_output(first[3], pool[1], stride[1], padding[2] + padding[3])
                    .ok_or_else(|| self.error(first, "pool wider than padded input"))?;
                vec![first[0], first[1], h, w]
            }
            Self::Reshape { shape } => {
                if shape.iter().product::<usize>() != first.iter().product::<usize>() {
                    return Err(self.error(first, format!("cannot reshape to {:?}", shape)));
                }
                shape.clone()
            }
            Self::OneHot { num_classes, .. } => {
                if first.len() != 1 || first_dtype != DType::Int {
                    return Err(self.error(first, "one-hot needs a rank-1 int input"));
                }
                if *num_classes == 0 {
                    return Err(self.error(first, "one-hot needs at least one class"));
                }
                vec![first[0], *num_classes]
            }
        };

        if shape.is_empty() || shape.len() > MAX_RANK {
            return Err(self.error(
                &shape,
                format!("result rank must be between 1 and {}", MAX_RANK),
            ));
        }

        let dtype = match self {
            Self::Reshape { .. } => first_dtype,
            Self::OneHot { dtype, .. } => *dtype,
            _ => DType::Float,
        };
        Ok((shape, dtype))
    }
}

/// Output length of a sliding window, or `None` if the window does not fit.
fn window_output(size: usize, window: usize, stride: usize, padding: usize) -> Option<usize> {
    let padded = size + padding;
    if stride == 0 || window == 0 || padded < window {
        return None;
    }
    Some((padded - window) / stride + 1)
}

/// "same" padding: `out = ceil(in / stride)`, with the total split so the
/// extra cell (if any) goes after the data. Returns `(before, after, out)`.
pub fn same_padding(size: usize, window: usize, stride: usize) -> (usize, usize, usize) {
    let out = size.div_ceil(stride);
    let total = ((out.saturating_sub(1)) * stride + window).saturating_sub(size);
    let before = total / 2;
    (before, total - before, out)
}

/// Convenience functions that apply a single operation to graph nodes.
pub mod ops {
    use super::Operation;
    use crate::errors::ModelError;
    use crate::graph::{Graph, Node};

    pub fn matmul(g: &mut Graph, a: &Node, b: &Node) -> Result<Node, ModelError> {
        g.apply(Operation::MatMul, &[a, b])
    }

    pub fn concat(g: &mut Graph, axis: usize, nodes: &[&Node]) -> Result<Node, ModelError> {
        g.apply(Operation::Concat { axis }, nodes)
    }

    pub fn add(g: &mut Graph, a: &Node, b: &Node) -> Result<Node, ModelError> {
        g.apply(Operation::Add, &[a, b])
    }

    pub fn sub(g: &mut Graph, a: &Node, b: &Node) -> Result<Node, ModelError> {
        g.apply(Operation::Sub, &[a, b])
    }

    pub fn mul(g: &mut Graph, a: &Node, b: &Node) -> Result<Node, ModelError> {
        g.apply(Operation::Mul, &[a, b])
    }

    pub fn div(g: &mut Graph, a: &Node, b: &Node) -> Result<Node, ModelError> {
        g.apply(Operation::Div, &[a, b])
    }

    pub fn sum_axis(g: &mut Graph, x: &Node, axis: usize) -> Result<Node, ModelError> {
        g.apply(Operation::SumAxis { axis }, &[x])
    }

    pub fn sum(g: &mut Graph, x: &Node) -> Result<Node, ModelError> {
        g.apply(Operation::SumAll, &[x])
    }

    pub fn mean(g: &mut Graph, x: &Node) -> Result<Node, ModelError> {
        g.apply(Operation::MeanAll, &[x])
    }

    pub fn square(g: &mut Graph, x: &Node) -> Result<Node, ModelError> {
        g.apply(Operation::Square, &[x])
    }

    pub fn neg(g: &mut Graph, x: &Node) -> Result<Node, ModelError> {
        g.apply(Operation::Neg, &[x])
    }

    pub fn log(g: &mut Graph, x: &Node) -> Result<Node, ModelError> {
        g.apply(Operation::Log, &[x])
    }

    pub fn relu(g: &mut Graph, x: &Node) -> Result<Node, ModelError> {
        g.apply(Operation::Relu, &[x])
    }

    pub fn mul_scalar(g: &mut Graph, x: &Node, c: f64) -> Result<Node, ModelError> {
        g.apply(Operation::MulScalar(c), &[x])
    }

    /// `c - x`.
    pub fn scalar_sub(g: &mut Graph, c: f64, x: &Node) -> Result<Node, ModelError> {
        g.apply(Operation::ScalarSub(c), &[x])
    }

    /// Natural log of `x` clamped into `[eps, 1 - eps]`.
    pub fn safe_log(g: &mut Graph, x: &Node, eps: f64) -> Result<Node, ModelError> {
        let clamped = g.apply(
            Operation::Clamp {
                min: eps,
                max: 1.0 - eps,
            },
            &[x],
        )?;
        log(g, &clamped)
    }
}
