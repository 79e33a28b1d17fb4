//! Node handles and the entries a [`Graph`](super::Graph) stores for them.

use std::fmt;

use super::core::GraphId;
use super::operation::Operation;
use crate::tensor::{DType, HostTensor};

/// Index of a node inside its graph. Nodes are numbered in creation order,
/// which is also a valid topological order.
pub type NodeId = usize;

/// How a parameter is filled when the model is built.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Init {
    /// Normal distribution with std `gain * sqrt(2 / (fan_in + fan_out))`.
    GlorotNormal { gain: f64 },
    Zeros,
}

impl Default for Init {
    fn default() -> Self {
        Init::GlorotNormal { gain: 1.0 }
    }
}

impl Init {
    /// Standard deviation of the initial values for a parameter of `shape`.
    ///
    /// Rank-2 shapes are `(fan_in, fan_out)`. Rank-4 kernels are
    /// `(out_channels, in_channels, kh, kw)`.
    pub fn std(&self, shape: &[usize]) -> f64 {
        let Init::GlorotNormal { gain } = self else {
            return 0.0;
        };
        let (fan_in, fan_out) = match shape {
            [n] => (*n, *n),
            [fan_in, fan_out] => (*fan_in, *fan_out),
            [out, inp, rest @ ..] => {
                let receptive: usize = rest.iter().product();
                (inp * receptive, out * receptive)
            }
            [] => (1, 1),
        };
        gain * (2.0 / (fan_in + fan_out) as f64).sqrt()
    }
}

/// What produces a node's value.
#[derive(Debug, Clone)]
pub enum NodeKind {
    /// Fed from outside on every run.
    Placeholder,
    /// Learnable value created at build.
    Parameter(Init),
    /// Fixed value baked into the graph.
    Constant(HostTensor),
    /// Result of an operation over earlier nodes.
    Op {
        op: Operation,
        inputs: Vec<NodeId>,
    },
}

/// Everything the graph knows about one node.
#[derive(Debug, Clone)]
pub struct NodeEntry {
    pub name: Option<String>,
    pub shape: Vec<usize>,
    pub dtype: DType,
    pub kind: NodeKind,
}

/// Cheap handle to a node in a specific graph.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Node {
    id: NodeId,
    graph: GraphId,
    shape: Vec<usize>,
    dtype: DType,
    name: Option<String>,
}

impl Node {
    pub(crate) fn new(id: NodeId, graph: GraphId, entry: &NodeEntry) -> Self {
        Self {
            id,
            graph,
            shape: entry.shape.clone(),
            dtype: entry.dtype,
            name: entry.name.clone(),
        }
    }

    pub fn id(&self) -> NodeId {
        self.id
    }

    pub fn graph_id(&self) -> GraphId {
        self.graph
    }

    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    pub fn dtype(&self) -> DType {
        self.dtype
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    /// Number of elements the node holds.
    pub fn volume(&self) -> usize {
        self.shape.iter().product()
    }
}

impl fmt::Display for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.name {
            Some(name) => write!(f, "{}", name),
            None => write!(f, "node#{}", self.id),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_glorot_std() {
        let init = Init::GlorotNormal { gain: 1.0 };
        assert!((init.std(&[3, 5]) - 0.5).abs() < 1e-12);
        // 8 kernels over 2 channels with 3x3 windows
        let expected = (2.0 / ((2 * 9 + 8 * 9) as f64)).sqrt();
        assert!((init.std(&[8, 2, 3, 3]) - expected).abs() < 1e-12);
        assert_eq!(Init::Zeros.std(&[3, 5]), 0.0);
    }

    #[test]
    fn test_display_falls_back_to_id() {
        let entry = NodeEntry {
            name: None,
            shape: vec![2],
            dtype: DType::Float,
            kind: NodeKind::Placeholder,
        };
        let node = Node::new(7, 0, &entry);
        assert_eq!(node.to_string(), "node#7");
        assert_eq!(node.volume(), 2);
    }
}
