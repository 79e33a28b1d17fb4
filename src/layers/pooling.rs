//! Max pooling layer.

use super::{Layer, LayerBase, Padding};
use crate::errors::ModelError;
use crate::graph::{Graph, Node, Operation};
use crate::shape::{ShapeCheck, validate_shape};

/// 2-D max pooling over `(batch, channels, height, width)` inputs.
///
/// With [`Padding::Same`] the output is `ceil(in / stride)` along each
/// spatial axis and padded cells never win the max.
#[derive(Debug, Clone)]
pub struct MaxPooling2D {
    base: LayerBase,
    pool: [usize; 2],
    stride: [usize; 2],
    padding: Padding,
}

impl MaxPooling2D {
    pub fn new(
        name: impl Into<String>,
        pool: [usize; 2],
        stride: [usize; 2],
        padding: Padding,
    ) -> Self {
        Self {
            base: LayerBase::new(name),
            pool,
            stride,
            padding,
        }
    }

    /// Stride equal to the pool size, "same" padding.
    pub fn simple(name: impl Into<String>, pool: [usize; 2]) -> Self {
        Self::new(name, pool, pool, Padding::Same)
    }
}

impl Layer for MaxPooling2D {
    fn name(&self) -> &str {
        self.base.name()
    }

    fn kind(&self) -> String {
        "maxpool2d".to_string()
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
        validate_shape(self.base.name(), x.shape(), &[ShapeCheck::Rank(4)])?;
        if self.pool.contains(&0) || self.stride.contains(&0) {
            return Err(ModelError::config(format!(
                "pooling layer {} needs non-zero pool size and stride",
                self.base.name()
            )));
        }
        let padding = self
            .padding
            .resolve([x.shape()[2], x.shape()[3]], self.pool, self.stride);
        let output = graph.apply_named(
            &self.base.node_name("maxpool"),
            Operation::MaxPool2d {
                pool: self.pool,
                stride: self.stride,
                padding,
            },
            &[x],
        )?;
        Ok(self.base.finish(inputs, output))
    }
}
