//! Reshape layer.

use super::{Layer, LayerBase};
use crate::errors::ModelError;
use crate::graph::{Graph, Node, Operation};
use crate::shape::{ShapeCheck, validate_shape};

/// Changes the shape of its input without touching the data. The target
/// shape, batch axis included, must hold the same number of elements.
#[derive(Debug, Clone)]
pub struct Reshape {
    base: LayerBase,
    shape: Vec<usize>,
}

impl Reshape {
    pub fn new(name: impl Into<String>, shape: &[usize]) -> Self {
        Self {
            base: LayerBase::new(name),
            shape: shape.to_vec(),
        }
    }
}

impl Layer for Reshape {
    fn name(&self) -> &str {
        self.base.name()
    }

    fn kind(&self) -> String {
        "reshape".to_string()
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
        validate_shape(
            self.base.name(),
            x.shape(),
            &[ShapeCheck::SameVolume(self.shape.clone())],
        )?;
        let output = graph.apply_named(
            &self.base.node_name("reshape"),
            Operation::Reshape {
                shape: self.shape.clone(),
            },
            &[x],
        )?;
        Ok(self.base.finish(inputs, output))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tensor::DType;

    #[test]
    fn test_reshape_checks_volume() {
        let mut graph = Graph::new();
        let x = graph.placeholder("x", &[2, 12], DType::Float).unwrap();
        let out = Reshape::new("r", &[2, 3, 2, 2])
            .attach(&mut graph, &[x.clone()])
            .unwrap();
        assert_eq!(out.shape(), &[2, 3, 2, 2]);

        let err = Reshape::new("r", &[2, 5])
            .attach(&mut graph, &[x])
            .unwrap_err();
        assert!(matches!(err, ModelError::InvalidShape { .. }));
    }
}
