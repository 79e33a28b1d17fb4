//! Activation functions and the layer that applies them.

use serde::{Deserialize, Serialize};

use super::{Layer, LayerBase};
use crate::errors::ModelError;
use crate::graph::{Graph, Node, Operation, ops};

/// Default negative slope of [`Activation::LeakyRelu`].
pub const DEFAULT_LEAKY_SLOPE: f64 = 0.01;

/// Supported activation functions.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Activation {
    /// Sigmoid: f(x) = 1 / (1 + exp(-x))
    Sigmoid,
    /// Rectified Linear Unit: f(x) = max(0, x)
    Relu,
    /// Hyperbolic tangent: f(x) = tanh(x)
    Tanh,
    /// Step: f(x) = 1 if x > 0, else 0. Has no gradient, so building a
    /// model fails with [`ModelError::NonDifferentiable`] when the loss
    /// reaches a trainable parameter through it. Outputs the loss does not
    /// depend on may still use it, e.g. to threshold predictions.
    Binary,
    /// exp(x) normalised over axis 1.
    Softmax,
    /// f(x) = relu(x) - relu(-slope * x)
    LeakyRelu { slope: f64 },
}

impl Activation {
    /// Creates an Activation from a string name.
    pub fn from_name(name: &str) -> Result<Self, ModelError> {
        match name.to_lowercase().as_str() {
            "sigmoid" => Ok(Activation::Sigmoid),
            "relu" => Ok(Activation::Relu),
            "tanh" => Ok(Activation::Tanh),
            "binary" => Ok(Activation::Binary),
            "softmax" => Ok(Activation::Softmax),
            "leakyrelu" | "leaky_relu" => Ok(Activation::LeakyRelu {
                slope: DEFAULT_LEAKY_SLOPE,
            }),
            _ => Err(ModelError::InvalidActivation {
                name: name.to_string(),
            }),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Activation::Sigmoid => "sigmoid",
            Activation::Relu => "relu",
            Activation::Tanh => "tanh",
            Activation::Binary => "binary",
            Activation::Softmax => "softmax",
            Activation::LeakyRelu { .. } => "leakyrelu",
        }
    }

    /// Adds the nodes computing this activation of `x`. The last node is
    /// named `name`.
    pub fn apply(&self, graph: &mut Graph, name: &str, x: &Node) -> Result<Node, ModelError> {
        match self {
            Activation::Sigmoid => graph.apply_named(name, Operation::Sigmoid, &[x]),
            Activation::Relu => graph.apply_named(name, Operation::Relu, &[x]),
            Activation::Tanh => graph.apply_named(name, Operation::Tanh, &[x]),
            Activation::Binary => {
                graph.apply_named(name, Operation::Greater { threshold: 0.0 }, &[x])
            }
            Activation::Softmax => {
                if x.shape().len() < 2 {
                    return Err(ModelError::InvalidShape {
                        context: name.to_string(),
                        shape: x.shape().to_vec(),
                        message: "softmax normalises over axis 1".to_string(),
                    });
                }
                let exp = graph.apply(Operation::Exp, &[x])?;
                let total = ops::sum_axis(graph, &exp, 1)?;
                graph.apply_named(name, Operation::BroadcastDiv, &[&exp, &total])
            }
            Activation::LeakyRelu { slope } => {
                let positive = ops::relu(graph, x)?;
                let scaled = ops::mul_scalar(graph, x, -slope)?;
                let negative = ops::relu(graph, &scaled)?;
                graph.apply_named(name, Operation::Sub, &[&positive, &negative])
            }
        }
    }
}

/// Applies an [`Activation`] to its single input. Any input shape.
#[derive(Debug, Clone)]
pub struct ActivationLayer {
    base: LayerBase,
    activation: Activation,
}

impl ActivationLayer {
    pub fn new(name: impl Into<String>, activation: Activation) -> Self {
        Self {
            base: LayerBase::new(name),
            activation,
        }
    }

    /// Looks the activation up by name, e.g. `"relu"`.
    pub fn from_name(name: impl Into<String>, activation: &str) -> Result<Self, ModelError> {
        Ok(Self::new(name, Activation::from_name(activation)?))
    }

    pub fn sigmoid(name: impl Into<String>) -> Self {
        Self::new(name, Activation::Sigmoid)
    }

    pub fn relu(name: impl Into<String>) -> Self {
        Self::new(name, Activation::Relu)
    }

    pub fn tanh(name: impl Into<String>) -> Self {
        Self::new(name, Activation::Tanh)
    }

    /// Step activation. See [`Activation::Binary`] for where it may appear.
    pub fn binary(name: impl Into<String>) -> Self {
        Self::new(name, Activation::Binary)
    }

    pub fn softmax(name: impl Into<String>) -> Self {
        Self::new(name, Activation::Softmax)
    }

    /// Leaky relu with the given negative slope, or 0.01 when `None`.
    pub fn leaky_relu(name: impl Into<String>, slope: Option<f64>) -> Self {
        Self::new(
            name,
            Activation::LeakyRelu {
                slope: slope.unwrap_or(DEFAULT_LEAKY_SLOPE),
            },
        )
    }

    pub fn activation(&self) -> Activation {
        self.activation
    }
}

impl Layer for ActivationLayer {
    fn name(&self) -> &str {
        self.base.name()
    }

    fn kind(&self) -> String {
        format!("activation({})", self.activation.name())
    }

    fn output(&self) -> Option<&Node> {
        self.base.output()
    }

    fn inputs(&self) -> &[Node] {
        self.base.inputs()
    }

    fn attach(&mut self, graph: &mut Graph, inputs: &[Node]) -> Result<Node, ModelError> {
        self.base.expect_inputs(inputs, 1)?;
        let output = self
            .activation
            .apply(graph, &self.base.node_name("activation"), &inputs[0])?;
        Ok(self.base.finish(inputs, output))
    }
}
