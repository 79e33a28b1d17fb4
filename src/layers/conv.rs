//! 2-D convolution layer.

use std::collections::BTreeMap;

use super::{Layer, LayerBase};
use crate::errors::ModelError;
use crate::graph::{Graph, Init, Node, Operation, same_padding};
use crate::shape::{ShapeCheck, validate_shape};

/// Padding policy for windowed layers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Padding {
    /// No padding; windows must fit inside the input.
    Valid,
    /// Pad so that `out = ceil(in / stride)`, splitting the padding
    /// before and after the data with any odd cell going after.
    #[default]
    Same,
}

impl Padding {
    pub fn from_name(name: &str) -> Result<Self, ModelError> {
        match name.to_lowercase().as_str() {
            "valid" => Ok(Padding::Valid),
            "same" => Ok(Padding::Same),
            _ => Err(ModelError::config(format!("unknown padding '{}'", name))),
        }
    }

    /// Explicit `[top, bottom, left, right]` padding for a `(h, w)` input.
    pub(crate) fn resolve(
        &self,
        input: [usize; 2],
        window: [usize; 2],
        stride: [usize; 2],
    ) -> [usize; 4] {
        match self {
            Padding::Valid => [0; 4],
            Padding::Same => {
                let (top, bottom, _) = same_padding(input[0], window[0], stride[0]);
                let (left, right, _) = same_padding(input[1], window[1], stride[1]);
                [top, bottom, left, right]
            }
        }
    }
}

/// A 2-D convolution without bias.
///
/// - Input shape: `(batch, channels, height, width)`
/// - Kernels: `(num_kernels, channels, kernel_h, kernel_w)`
/// - Output shape: `(batch, num_kernels, out_h, out_w)`
#[derive(Debug, Clone)]
pub struct Conv2D {
    base: LayerBase,
    num_kernels: usize,
    kernel: [usize; 2],
    stride: [usize; 2],
    padding: Padding,
    trainable: bool,
    kernels: Option<Node>,
}

impl Conv2D {
    pub fn new(
        name: impl Into<String>,
        num_kernels: usize,
        kernel: [usize; 2],
        stride: [usize; 2],
        padding: Padding,
    ) -> Self {
        Self {
            base: LayerBase::new(name),
            num_kernels,
            kernel,
            stride,
            padding,
            trainable: true,
            kernels: None,
        }
    }

    /// Square kernel, unit stride, "same" padding.
    pub fn simple(name: impl Into<String>, kernel_size: usize, num_kernels: usize) -> Self {
        Self::new(
            name,
            num_kernels,
            [kernel_size, kernel_size],
            [1, 1],
            Padding::Same,
        )
    }

    /// Freezes or unfreezes the kernels during fitting.
    pub fn with_trainable(mut self, trainable: bool) -> Self {
        self.trainable = trainable;
        self
    }
}

impl Layer for Conv2D {
    fn name(&self) -> &str {
        self.base.name()
    }

    fn kind(&self) -> String {
        "conv2d".to_string()
    }

    fn trainable(&self) -> bool {
        self.trainable
    }

    fn parameters(&self) -> BTreeMap<String, Node> {
        self.kernels
            .iter()
            .map(|k| ("kernels".to_string(), k.clone()))
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
        validate_shape(self.base.name(), x.shape(), &[ShapeCheck::Rank(4)])?;
        if self.num_kernels == 0 || self.kernel.contains(&0) || self.stride.contains(&0) {
            return Err(ModelError::config(format!(
                "conv2d layer {} needs non-zero kernels, kernel size, and stride",
                self.base.name()
            )));
        }

        let channels = x.shape()[1];
        let kernels = graph.parameter(
            &self.base.node_name("kernels"),
            &[self.num_kernels, channels, self.kernel[0], self.kernel[1]],
            Init::default(),
        )?;
        let padding = self
            .padding
            .resolve([x.shape()[2], x.shape()[3]], self.kernel, self.stride);
        let output = graph.apply_named(
            &self.base.node_name("conv"),
            Operation::Conv2d {
                stride: self.stride,
                padding,
            },
            &[x, &kernels],
        )?;

        self.kernels = Some(kernels);
        Ok(self.base.finish(inputs, output))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tensor::DType;

    #[test]
    fn test_simple_conv_keeps_spatial_size() {
        let mut graph = Graph::new();
        let x = graph.placeholder("x", &[2, 3, 8, 8], DType::Float).unwrap();
        let mut conv = Conv2D::simple("conv", 3, 16);
        let out = conv.attach(&mut graph, &[x]).unwrap();
        assert_eq!(out.shape(), &[2, 16, 8, 8]);
        assert_eq!(conv.parameters()["kernels"].shape(), &[16, 3, 3, 3]);
    }

    #[test]
    fn test_valid_conv_with_stride() {
        let mut graph = Graph::new();
        let x = graph.placeholder("x", &[1, 1, 7, 7], DType::Float).unwrap();
        let mut conv = Conv2D::new("conv", 4, [3, 3], [2, 2], Padding::Valid);
        let out = conv.attach(&mut graph, &[x]).unwrap();
        assert_eq!(out.shape(), &[1, 4, 3, 3]);
    }

    #[test]
    fn test_same_conv_with_stride_rounds_up() {
        let mut graph = Graph::new();
        let x = graph.placeholder("x", &[1, 1, 7, 7], DType::Float).unwrap();
        let mut conv = Conv2D::new("conv", 4, [3, 3], [2, 2], Padding::Same);
        let out = conv.attach(&mut graph, &[x]).unwrap();
        assert_eq!(out.shape(), &[1, 4, 4, 4]);
    }

    #[test]
    fn test_conv_requires_rank_four() {
        let mut graph = Graph::new();
        let x = graph.placeholder("x", &[2, 8, 8], DType::Float).unwrap();
        let result = Conv2D::simple("conv", 3, 4).attach(&mut graph, &[x]);
        assert!(result.is_err());
    }

    #[test]
    fn test_padding_names() {
        assert_eq!(Padding::from_name("SAME").unwrap(), Padding::Same);
        assert_eq!(Padding::from_name("valid").unwrap(), Padding::Valid);
        assert!(Padding::from_name("full").is_err());
    }
}
