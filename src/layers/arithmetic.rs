//! Element-wise arithmetic between two equally shaped nodes.

use super::{Layer, LayerBase};
use crate::errors::ModelError;
use crate::graph::{Graph, Node, Operation, ops};
use crate::shape::{ShapeCheck, validate_shape};

/// Binary element-wise operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArithmeticOp {
    Add,
    Sub,
    HadamardProd,
    HadamardDiv,
    /// Product followed by a sum over axis 1, giving `(batch, 1)`.
    Dot,
}

impl ArithmeticOp {
    pub fn from_name(name: &str) -> Result<Self, ModelError> {
        match name.to_lowercase().as_str() {
            "add" => Ok(ArithmeticOp::Add),
            "sub" => Ok(ArithmeticOp::Sub),
            "hadamard_prod" => Ok(ArithmeticOp::HadamardProd),
            "hadamard_div" => Ok(ArithmeticOp::HadamardDiv),
            "dot" => Ok(ArithmeticOp::Dot),
            _ => Err(ModelError::InvalidArithmetic {
                name: name.to_string(),
            }),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            ArithmeticOp::Add => "add",
            ArithmeticOp::Sub => "sub",
            ArithmeticOp::HadamardProd => "hadamard_prod",
            ArithmeticOp::HadamardDiv => "hadamard_div",
            ArithmeticOp::Dot => "dot",
        }
    }
}

/// Applies an [`ArithmeticOp`] to two inputs of identical shape.
#[derive(Debug, Clone)]
pub struct BinaryArithmetic {
    base: LayerBase,
    op: ArithmeticOp,
}

impl BinaryArithmetic {
    pub fn new(name: impl Into<String>, op: ArithmeticOp) -> Self {
        Self {
            base: LayerBase::new(name),
            op,
        }
    }

    /// Looks the operation up by name, e.g. `"hadamard_prod"`.
    pub fn from_name(name: impl Into<String>, op: &str) -> Result<Self, ModelError> {
        Ok(Self::new(name, ArithmeticOp::from_name(op)?))
    }

    pub fn add(name: impl Into<String>) -> Self {
        Self::new(name, ArithmeticOp::Add)
    }

    pub fn sub(name: impl Into<String>) -> Self {
        Self::new(name, ArithmeticOp::Sub)
    }

    pub fn hadamard_prod(name: impl Into<String>) -> Self {
        Self::new(name, ArithmeticOp::HadamardProd)
    }

    pub fn hadamard_div(name: impl Into<String>) -> Self {
        Self::new(name, ArithmeticOp::HadamardDiv)
    }

    pub fn dot(name: impl Into<String>) -> Self {
        Self::new(name, ArithmeticOp::Dot)
    }
}

impl Layer for BinaryArithmetic {
    fn name(&self) -> &str {
        self.base.name()
    }

    fn kind(&self) -> String {
        format!("arith({})", self.op.name())
    }

    fn output(&self) -> Option<&Node> {
        self.base.output()
    }

    fn inputs(&self) -> &[Node] {
        self.base.inputs()
    }

    fn attach(&mut self, graph: &mut Graph, inputs: &[Node]) -> Result<Node, ModelError> {
        self.base.expect_inputs(inputs, 2)?;
        let (a, b) = (&inputs[0], &inputs[1]);
        validate_shape(
            self.base.name(),
            b.shape(),
            &[ShapeCheck::Equals(a.shape().to_vec())],
        )?;
        let name = self.base.node_name("op");
        let output = match self.op {
            ArithmeticOp::Add => graph.apply_named(&name, Operation::Add, &[a, b])?,
            ArithmeticOp::Sub => graph.apply_named(&name, Operation::Sub, &[a, b])?,
            ArithmeticOp::HadamardProd => graph.apply_named(&name, Operation::Mul, &[a, b])?,
            ArithmeticOp::HadamardDiv => graph.apply_named(&name, Operation::Div, &[a, b])?,
            ArithmeticOp::Dot => {
                validate_shape(self.base.name(), a.shape(), &[ShapeCheck::MinRank(2)])?;
                let product = ops::mul(graph, a, b)?;
                graph
                    .apply_named(&name, Operation::SumAxis { axis: 1 }, &[&product])?
            }
        };
        Ok(self.base.finish(inputs, output))
    }
}
