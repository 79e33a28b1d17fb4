//! One-hot encoding layer.

use super::{Layer, LayerBase};
use crate::errors::ModelError;
use crate::graph::{Graph, Node, Operation};
use crate::shape::{ShapeCheck, validate_shape};
use crate::tensor::DType;

/// Turns rank-1 integer class indices `(batch,)` into indicator rows
/// `(batch, num_classes)` of the requested dtype.
///
/// The encoding has no gradient, so it may only sit on paths that do not
/// lead from a trainable parameter to the loss. Indices outside
/// `0..num_classes` fail the run.
#[derive(Debug, Clone)]
pub struct OneHot {
    base: LayerBase,
    num_classes: usize,
    dtype: DType,
}

impl OneHot {
    pub fn new(name: impl Into<String>, num_classes: usize, dtype: DType) -> Self {
        Self {
            base: LayerBase::new(name),
            num_classes,
            dtype,
        }
    }
}

impl Layer for OneHot {
    fn name(&self) -> &str {
        self.base.name()
    }

    fn kind(&self) -> String {
        "onehot".to_string()
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
        if self.num_classes == 0 {
            return Err(ModelError::config(format!(
                "one-hot layer {} needs at least one class",
                self.base.name()
            )));
        }
        validate_shape(self.base.name(), x.shape(), &[ShapeCheck::Rank(1)])?;
        if x.dtype() != DType::Int {
            return Err(ModelError::config(format!(
                "one-hot layer {} only accepts int inputs, got {}",
                self.base.name(),
                x.dtype()
            )));
        }
        let output = graph.apply_named(
            &self.base.node_name("onehot"),
            Operation::OneHot {
                num_classes: self.num_classes,
                dtype: self.dtype,
            },
            &[x],
        )?;
        Ok(self.base.finish(inputs, output))
    }
}
