//! Neural network layer implementations.
//!
//! A layer is configured up front and then attached exactly once, through
//! [`Model::attach`](crate::Model::attach), to the nodes it reads from.
//! Attaching validates the input shapes and extends the model's graph with
//! the layer's parameters and operations.

pub mod activation;
pub mod arithmetic;
pub mod conv;
pub mod dense;
pub mod dropout;
pub mod input;
pub mod namer;
pub mod one_hot;
pub mod pooling;
pub mod reshape;

use std::collections::BTreeMap;

use crate::errors::ModelError;
use crate::graph::{Graph, Node};

pub use activation::{Activation, ActivationLayer};
pub use arithmetic::{ArithmeticOp, BinaryArithmetic};
pub use conv::{Conv2D, Padding};
pub use dense::Dense;
pub use dropout::Dropout;
pub use input::Input;
pub use namer::Namer;
pub use one_hot::OneHot;
pub use pooling::MaxPooling2D;
pub use reshape::Reshape;

/// A unit of a model's graph.
pub trait Layer {
    /// Name unique to this layer within its model.
    fn name(&self) -> &str;

    /// Type description used in summaries, e.g. `dense` or `activation(relu)`.
    fn kind(&self) -> String;

    /// Whether the layer's parameters are updated while fitting.
    fn trainable(&self) -> bool {
        false
    }

    /// Parameter nodes by parameter name, e.g. `weights`.
    fn parameters(&self) -> BTreeMap<String, Node> {
        BTreeMap::new()
    }

    /// Output node, once attached.
    fn output(&self) -> Option<&Node>;

    /// Nodes the layer was attached to.
    fn inputs(&self) -> &[Node];

    /// Extends `graph` with this layer applied to `inputs`.
    fn attach(&mut self, graph: &mut Graph, inputs: &[Node]) -> Result<Node, ModelError>;
}

/// State shared by every layer: its name and where it was attached.
#[derive(Debug, Clone)]
pub struct LayerBase {
    name: String,
    inputs: Vec<Node>,
    output: Option<Node>,
}

impl LayerBase {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            inputs: Vec::new(),
            output: None,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn output(&self) -> Option<&Node> {
        self.output.as_ref()
    }

    pub fn inputs(&self) -> &[Node] {
        &self.inputs
    }

    /// Name for a node created by this layer, e.g. `hidden.weights`.
    pub fn node_name(&self, suffix: &str) -> String {
        format!("{}.{}", self.name, suffix)
    }

    /// Checks the layer is not attached yet and receives `count` inputs.
    pub fn expect_inputs(&self, inputs: &[Node], count: usize) -> Result<(), ModelError> {
        if self.output.is_some() {
            return Err(ModelError::config(format!(
                "layer {} is already attached",
                self.name
            )));
        }
        if inputs.len() != count {
            return Err(ModelError::config(format!(
                "layer {} takes {} input(s), got {}",
                self.name,
                count,
                inputs.len()
            )));
        }
        Ok(())
    }

    /// Records the attachment and returns the output node.
    pub fn finish(&mut self, inputs: &[Node], output: Node) -> Node {
        self.inputs = inputs.to_vec();
        self.output = Some(output.clone());
        output
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tensor::DType;

    #[test]
    fn test_layer_base_attaches_once() {
        let mut graph = Graph::new();
        let x = graph.placeholder("x", &[2, 2], DType::Float).unwrap();
        let mut base = LayerBase::new("hidden");
        assert_eq!(base.node_name("weights"), "hidden.weights");
        assert!(base.expect_inputs(&[x.clone()], 2).is_err());
        assert!(base.expect_inputs(&[x.clone()], 1).is_ok());

        base.finish(&[x.clone()], x.clone());
        assert_eq!(base.inputs().len(), 1);
        assert_eq!(base.output(), Some(&x));
        assert!(base.expect_inputs(&[x], 1).is_err());
    }
}
