//! Dropout layer.

use super::{Layer, LayerBase};
use crate::errors::ModelError;
use crate::graph::{Graph, Node, Operation};

/// Zeroes each element with the given probability during training passes
/// and scales the survivors up. Prediction passes are the identity.
#[derive(Debug, Clone)]
pub struct Dropout {
    base: LayerBase,
    probability: f64,
}

impl Dropout {
    pub fn new(name: impl Into<String>, probability: f64) -> Self {
        Self {
            base: LayerBase::new(name),
            probability,
        }
    }

    pub fn probability(&self) -> f64 {
        self.probability
    }
}

impl Layer for Dropout {
    fn name(&self) -> &str {
        self.base.name()
    }

    fn kind(&self) -> String {
        "dropout".to_string()
    }

    fn output(&self) -> Option<&Node> {
        self.base.output()
    }

    fn inputs(&self) -> &[Node] {
        self.base.inputs()
    }

    fn attach(&mut self, graph: &mut Graph, inputs: &[Node]) -> Result<Node, ModelError> {
        self.base.expect_inputs(inputs, 1)?;
        if !(0.0..1.0).contains(&self.probability) {
            return Err(ModelError::config(format!(
                "dropout layer {} has probability {}, expected a value in [0, 1)",
                self.base.name(),
                self.probability
            )));
        }
        let output = graph.apply_named(
            &self.base.node_name("dropout"),
            Operation::Dropout {
                probability: self.probability,
            },
            &[&inputs[0]],
        )?;
        Ok(self.base.finish(inputs, output))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tensor::DType;

    #[test]
    fn test_dropout_validates_probability() {
        let mut graph = Graph::new();
        let x = graph.placeholder("x", &[4, 3], DType::Float).unwrap();
        let all_dropped = Dropout::new("d", 1.0).attach(&mut graph, &[x.clone()]);
        assert!(all_dropped.is_err());
        let negative = Dropout::new("d", -0.1).attach(&mut graph, &[x.clone()]);
        assert!(negative.is_err());
        let out = Dropout::new("d", 0.25).attach(&mut graph, &[x]).unwrap();
        assert_eq!(out.shape(), &[4, 3]);
    }
}
