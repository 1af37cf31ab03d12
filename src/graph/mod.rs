//! Expression graph
//!
//! A graph is a DAG of immutable [`GraphNode`]s over named, shaped `f32` inputs.
//! Every node's shape is computed once when it is built; binary operations
//! reject mismatched shapes instead of broadcasting implicitly.
//!
//! # Example
//!
//! ```
//! use nestc::graph::input;
//!
//! let x = input("x", [100]);
//! let f = x.sin().sum();
//! assert!(f.is_scalar());
//! ```

mod builder;
mod elementwise;
pub mod eval;
mod node;
mod ops;
mod reduce;
mod traversal;

pub use builder::{constant, full_like, input, ones_like, zeros_like};
pub use eval::evaluate;
pub use node::{GraphInner, GraphNode, NodeId};
pub use ops::{BinaryOp, CustomFn, CustomOp, NodeOp, ReduceOp, UnaryOp};
pub use traversal::{
    collect_inputs, count_nodes, find_common_subexpressions, graph_to_string, topological_sort,
};
