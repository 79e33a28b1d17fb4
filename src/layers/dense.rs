//! Dense (fully connected) layer implementation.

use std::collections::BTreeMap;

use super::{Layer, LayerBase};
use crate::errors::ModelError;
use crate::graph::{Graph, Init, Node, Operation, ops};
use crate::shape::{ShapeCheck, validate_shape};
use crate::tensor::HostTensor;

/// A dense (fully connected) layer without activation.
///
/// The bias lives in the last row of the weight matrix: the input is
/// extended with a column of ones before the product, so
/// `output = [input, 1] @ weights`.
///
/// - Input shape: `(batch, features)`
/// - Weights: `(features + 1, units)`
/// - Output shape: `(batch, units)`
#[derive(Debug, Clone)]
pub struct Dense {
    base: LayerBase,
    units: usize,
    trainable: bool,
    init: Init,
    weights: Option<Node>,
}

impl Dense {
    pub fn new(name: impl Into<String>, units: usize) -> Self {
        Self {
            base: LayerBase::new(name),
            units,
            trainable: true,
            init: Init::default(),
            weights: None,
        }
    }

    /// Freezes or unfreezes the weights during fitting.
    pub fn with_trainable(mut self, trainable: bool) -> Self {
        self.trainable = trainable;
        self
    }

    /// Sets how the weights are initialised at build.
    pub fn with_init(mut self, init: Init) -> Self {
        self.init = init;
        self
    }

    pub fn units(&self) -> usize {
        self.units
    }
}

impl Layer for Dense {
    fn name(&self) -> &str {
        self.base.name()
    }

    fn kind(&self) -> String {
        "dense".to_string()
    }

    fn trainable(&self) -> bool {
        self.trainable
    }

    fn parameters(&self) -> BTreeMap<String, Node> {
        self.weights
            .iter()
            .map(|w| ("weights".to_string(), w.clone()))
            .collect()
    }

    fn output(&self) -> Option<&Node> {
        self.base.output()
    }

    fn inputs(&self) -> &[Node] {
        self.base.inputs()
    }

    fn attach(&mut self, graph: &mut Graph, inputs: &[Node]) -> Result<Node, ModelError> {
        self.base.expect_inputs(inputs, 1)?;
        let x = &inputs[0];
        validate_shape(self.base.name(), x.shape(), &[ShapeCheck::Rank(2)])?;
        if self.units == 0 {
            return Err(ModelError::config(format!(
                "dense layer {} needs at least one unit",
                self.base.name()
            )));
        }
        let (batch, features) = (x.shape()[0], x.shape()[1]);

        let weights = graph.parameter(
            &self.base.node_name("weights"),
            &[features + 1, self.units],
            self.init,
        )?;
        let ones = HostTensor::from_floats(&[batch, 1], vec![1.0; batch])?;
        let ones = graph.constant(ones)?;
        let with_bias = ops::concat(graph, 1, &[x, &ones])?;
        let output = graph.apply_named(
            &self.base.node_name("dense"),
            Operation::MatMul,
            &[&with_bias, &weights],
        )?;

        self.weights = Some(weights);
        Ok(self.base.finish(inputs, output))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tensor::DType;

    #[test]
    fn test_dense_shapes() {
        let mut graph = Graph::new();
        let x = graph.placeholder("x", &[4, 3], DType::Float).unwrap();
        let mut dense = Dense::new("hidden", 5);
        let out = dense.attach(&mut graph, &[x]).unwrap();
        assert_eq!(out.shape(), &[4, 5]);

        let params = dense.parameters();
        assert_eq!(params["weights"].shape(), &[4, 5]);
        assert_eq!(params["weights"].name(), Some("hidden.weights"));
        assert!(dense.trainable());
        assert_eq!(dense.kind(), "dense");
    }

    #[test]
    fn test_dense_requires_rank_two() {
        let mut graph = Graph::new();
        let x = graph.placeholder("x", &[4, 3, 2], DType::Float).unwrap();
        let err = Dense::new("hidden", 5)
            .attach(&mut graph, &[x])
            .unwrap_err();
        assert!(matches!(err, ModelError::InvalidShape { .. }));
    }

    #[test]
    fn test_dense_can_be_frozen() {
        let dense = Dense::new("frozen", 2).with_trainable(false);
        assert!(!dense.trainable());
        assert!(dense.parameters().is_empty());
    }

    #[test]
    fn test_dense_attaches_once() {
        let mut graph = Graph::new();
        let x = graph.placeholder("x", &[4, 3], DType::Float).unwrap();
        let mut dense = Dense::new("hidden", 5);
        dense.attach(&mut graph, &[x.clone()]).unwrap();
        assert!(dense.attach(&mut graph, &[x]).is_err());
    }
}
