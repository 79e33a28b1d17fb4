//! Input layer: a placeholder fed on every run.

use super::{Layer, LayerBase};
use crate::errors::ModelError;
use crate::graph::{Graph, Node};
use crate::shape::{ShapeCheck, validate_shape};
use crate::tensor::DType;

/// Entry point for data. Axis 0 is the batch size, fixed for the model's
/// lifetime.
#[derive(Debug, Clone)]
pub struct Input {
    base: LayerBase,
    shape: Vec<usize>,
    dtype: DType,
}

impl Input {
    pub fn new(name: impl Into<String>, shape: &[usize]) -> Self {
        Self {
            base: LayerBase::new(name),
            shape: shape.to_vec(),
            dtype: DType::Float,
        }
    }

    /// Sets the element type fed to this input.
    pub fn with_dtype(mut self, dtype: DType) -> Self {
        self.dtype = dtype;
        self
    }
}

impl Layer for Input {
    fn name(&self) -> &str {
        self.base.name()
    }

    fn kind(&self) -> String {
        "input".to_string()
    }

    fn output(&self) -> Option<&Node> {
        self.base.output()
    }

    fn inputs(&self) -> &[Node] {
        self.base.inputs()
    }

    fn attach(&mut self, graph: &mut Graph, inputs: &[Node]) -> Result<Node, ModelError> {
        self.base.expect_inputs(inputs, 0)?;
        validate_shape(self.base.name(), &self.shape, &[ShapeCheck::MinRank(1)])?;
        let name = self.base.node_name("input");
        let node = graph.placeholder(&name, &self.shape, self.dtype)?;
        Ok(self.base.finish(inputs, node))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_input_creates_placeholder() {
        let mut graph = Graph::new();
        let mut input = Input::new("x", &[8]).with_dtype(DType::Int);
        let node = input.attach(&mut graph, &[]).unwrap();
        assert_eq!(node.shape(), &[8]);
        assert_eq!(node.dtype(), DType::Int);
        assert_eq!(node.name(), Some("x.input"));
        assert!(input.parameters().is_empty());
        assert!(!input.trainable());
    }

    #[test]
    fn test_input_rejects_scalars() {
        let mut graph = Graph::new();
        let err = Input::new("x", &[]).attach(&mut graph, &[]).unwrap_err();
        assert!(matches!(err, ModelError::InvalidShape { .. }));
    }
}
