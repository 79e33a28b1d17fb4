//! Symbolic graph API and the machine that evaluates it.
//!
//! Layers extend a [`Graph`] node by node. A [`Machine`] compiled from the
//! graph evaluates it with Burn, which also records the operations for
//! reverse-mode differentiation when the backend supports it.
//!
//! # Example
//!
//! ```
//! use layergraph::graph::{Graph, Init, ops};
//! use layergraph::tensor::DType;
//!
//! let mut graph = Graph::new();
//! let x = graph.placeholder("x", &[4, 3], DType::Float).unwrap();
//! let w = graph.parameter("w", &[3, 2], Init::default()).unwrap();
//! let y = ops::matmul(&mut graph, &x, &w).unwrap();
//! assert_eq!(y.shape(), &[4, 2]);
//! ```

mod core;
mod machine;
mod node;
mod operation;
mod value;

pub use self::core::{Graph, GraphId};
pub use machine::{Machine, Mode};
pub use node::{Init, Node, NodeEntry, NodeId, NodeKind};
pub use operation::{MAX_RANK, Operation, ops, same_padding};
pub use value::Value;
