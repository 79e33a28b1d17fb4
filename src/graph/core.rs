//! Graph - symbolic structure without values.
//!
//! Nodes are appended in creation order and never removed while a model
//! is being assembled. Values only exist once a [`Machine`](super::Machine)
//! runs the graph on a Burn device.

use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};

use super::node::{Init, Node, NodeEntry, NodeId, NodeKind};
use super::operation::{MAX_RANK, Operation};
use crate::errors::ModelError;
use crate::tensor::{DType, HostTensor};

/// Global counter for unique graph IDs.
static GRAPH_ID_COUNTER: AtomicUsize = AtomicUsize::new(0);

/// Unique identifier for a Graph.
pub type GraphId = usize;

fn next_graph_id() -> GraphId {
    GRAPH_ID_COUNTER.fetch_add(1, Ordering::SeqCst)
}

/// Symbolic computation graph owned by a single model.
#[derive(Debug)]
pub struct Graph {
    id: GraphId,
    nodes: Vec<NodeEntry>,
}

impl Default for Graph {
    fn default() -> Self {
        Self::new()
    }
}

impl Graph {
    pub fn new() -> Self {
        Self {
            id: next_graph_id(),
            nodes: Vec::new(),
        }
    }

    /// Returns the unique ID of this graph.
    pub fn id(&self) -> GraphId {
        self.id
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn entry(&self, id: NodeId) -> &NodeEntry {
        &self.nodes[id]
    }

    pub fn entries(&self) -> &[NodeEntry] {
        &self.nodes
    }

    /// Handle for an existing node.
    pub fn node(&self, id: NodeId) -> Node {
        Node::new(id, self.id, &self.nodes[id])
    }

    /// Errors unless `node` was created by this graph.
    pub fn check_owned(&self, node: &Node) -> Result<(), ModelError> {
        if node.graph_id() != self.id || node.id() >= self.nodes.len() {
            return Err(ModelError::ForeignNode {
                node: node.to_string(),
            });
        }
        Ok(())
    }

    /// Drops every node created after the first `len`.
    pub(crate) fn truncate(&mut self, len: usize) {
        self.nodes.truncate(len);
    }

    fn push(&mut self, entry: NodeEntry) -> Node {
        let id = self.nodes.len();
        self.nodes.push(entry);
        self.node(id)
    }

    fn check_rank(context: &str, shape: &[usize]) -> Result<(), ModelError> {
        if shape.is_empty() || shape.len() > MAX_RANK || shape.contains(&0) {
            return Err(ModelError::InvalidShape {
                context: context.to_string(),
                shape: shape.to_vec(),
                message: format!("expected between 1 and {} non-empty axes", MAX_RANK),
            });
        }
        Ok(())
    }

    /// Adds a node fed from outside on every run.
    pub fn placeholder(
        &mut self,
        name: &str,
        shape: &[usize],
        dtype: DType,
    ) -> Result<Node, ModelError> {
        Self::check_rank(name, shape)?;
        Ok(self.push(NodeEntry {
            name: Some(name.to_string()),
            shape: shape.to_vec(),
            dtype,
            kind: NodeKind::Placeholder,
        }))
    }

    /// Adds a learnable float node, filled according to `init` at build.
    pub fn parameter(
        &mut self,
        name: &str,
        shape: &[usize],
        init: Init,
    ) -> Result<Node, ModelError> {
        Self::check_rank(name, shape)?;
        Ok(self.push(NodeEntry {
            name: Some(name.to_string()),
            shape: shape.to_vec(),
            dtype: DType::Float,
            kind: NodeKind::Parameter(init),
        }))
    }

    /// Adds a fixed value.
    pub fn constant(&mut self, value: HostTensor) -> Result<Node, ModelError> {
        Self::check_rank("constant", value.shape())?;
        Ok(self.push(NodeEntry {
            name: None,
            shape: value.shape().to_vec(),
            dtype: value.dtype(),
            kind: NodeKind::Constant(value),
        }))
    }

    /// Applies `op` to `inputs`, inferring the result's shape and dtype.
    pub fn apply(&mut self, op: Operation, inputs: &[&Node]) -> Result<Node, ModelError> {
        for input in inputs {
            self.check_owned(input)?;
        }
        let described: Vec<(&[usize], DType)> =
            inputs.iter().map(|n| (n.shape(), n.dtype())).collect();
        let (shape, dtype) = op.infer(&described)?;
        Ok(self.push(NodeEntry {
            name: None,
            shape,
            dtype,
            kind: NodeKind::Op {
                op,
                inputs: inputs.iter().map(|n| n.id()).collect(),
            },
        }))
    }

    /// Like [`Graph::apply`], naming the resulting node.
    pub fn apply_named(
        &mut self,
        name: &str,
        op: Operation,
        inputs: &[&Node],
    ) -> Result<Node, ModelError> {
        let node = self.apply(op, inputs)?;
        self.nodes[node.id()].name = Some(name.to_string());
        Ok(self.node(node.id()))
    }

    /// Every node `roots` depend on, roots included, in creation order.
    pub fn ancestors(&self, roots: &[NodeId]) -> Vec<NodeId> {
        let mut seen = HashSet::new();
        let mut stack: Vec<NodeId> = roots.to_vec();
        while let Some(id) = stack.pop() {
            if !seen.insert(id) {
                continue;
            }
            if let NodeKind::Op { inputs, .. } = &self.nodes[id].kind {
                stack.extend(inputs.iter().copied());
            }
        }
        let mut ordered: Vec<NodeId> = seen.into_iter().collect();
        ordered.sort_unstable();
        ordered
    }

    /// First name used by two different nodes, if any.
    pub fn duplicate_name(&self) -> Option<&str> {
        let mut names = HashSet::new();
        self.nodes
            .iter()
            .filter_map(|n| n.name.as_deref())
            .find(|name| !names.insert(*name))
    }

    /// Checks that the gradient of `loss` with respect to every parameter in
    /// `trainables` only flows through differentiable operations.
    pub fn check_differentiable(
        &self,
        loss: NodeId,
        trainables: &[NodeId],
    ) -> Result<(), ModelError> {
        if trainables.is_empty() {
            return Ok(());
        }
        let trainable: HashSet<NodeId> = trainables.iter().copied().collect();
        let mut depends = vec![false; self.nodes.len()];
        for (id, entry) in self.nodes.iter().enumerate() {
            depends[id] = match &entry.kind {
                NodeKind::Parameter(_) => trainable.contains(&id),
                NodeKind::Op { inputs, .. } => inputs.iter().any(|i| depends[*i]),
                _ => false,
            };
        }
        for id in self.ancestors(&[loss]) {
            if let NodeKind::Op { op, inputs } = &self.nodes[id].kind {
                if !op.is_differentiable() && inputs.iter().any(|i| depends[*i]) {
                    return Err(ModelError::NonDifferentiable {
                        node: self.node(id).to_string(),
                        op: op.name().to_string(),
                    });
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::ops;

    #[test]
    fn test_graph_ids_are_unique() {
        assert_ne!(Graph::new().id(), Graph::new().id());
    }

    #[test]
    fn test_foreign_nodes_are_rejected() {
        let mut a = Graph::new();
        let mut b = Graph::new();
        let x = a.placeholder("x", &[2, 2], DType::Float).unwrap();
        let y = b.placeholder("y", &[2, 2], DType::Float).unwrap();
        let err = ops::add(&mut a, &x, &y).unwrap_err();
        assert!(matches!(err, ModelError::ForeignNode { .. }));
    }

    #[test]
    fn test_rank_limits() {
        let mut g = Graph::new();
        assert!(g.placeholder("x", &[], DType::Float).is_err());
        assert!(g.placeholder("x", &[1, 1, 1, 1, 1], DType::Float).is_err());
        assert!(g.placeholder("x", &[2, 0], DType::Float).is_err());
    }

    #[test]
    fn test_ancestors_in_creation_order() {
        let mut g = Graph::new();
        let x = g.placeholder("x", &[2, 2], DType::Float).unwrap();
        let unused = g.placeholder("unused", &[2, 2], DType::Float).unwrap();
        let w = g.parameter("w", &[2, 2], Init::default()).unwrap();
        let y = ops::matmul(&mut g, &x, &w).unwrap();
        let z = ops::relu(&mut g, &y).unwrap();
        let order = g.ancestors(&[z.id()]);
        assert_eq!(order, vec![x.id(), w.id(), y.id(), z.id()]);
        assert!(!order.contains(&unused.id()));
    }

    #[test]
    fn test_duplicate_names() {
        let mut g = Graph::new();
        g.placeholder("x", &[2], DType::Float).unwrap();
        assert!(g.duplicate_name().is_none());
        g.placeholder("x", &[3], DType::Float).unwrap();
        assert_eq!(g.duplicate_name(), Some("x"));
    }

    #[test]
    fn test_non_differentiable_path() {
        let mut g = Graph::new();
        let x = g.placeholder("x", &[2, 2], DType::Float).unwrap();
        let w = g.parameter("w", &[2, 2], Init::default()).unwrap();
        let y = ops::matmul(&mut g, &x, &w).unwrap();
        let step = g
            .apply(Operation::Greater { threshold: 0.0 }, &[&y])
            .unwrap();
        let loss = ops::mean(&mut g, &step).unwrap();
        let err = g.check_differentiable(loss.id(), &[w.id()]).unwrap_err();
        assert!(matches!(err, ModelError::NonDifferentiable { .. }));

        // Nothing to differentiate, nothing to reject.
        assert!(g.check_differentiable(loss.id(), &[]).is_ok());
    }

    #[test]
    fn test_truncate_restores_length() {
        let mut g = Graph::new();
        g.placeholder("x", &[2], DType::Float).unwrap();
        let len = g.len();
        g.placeholder("target", &[2], DType::Float).unwrap();
        g.truncate(len);
        assert_eq!(g.len(), 1);
    }
}
