//! Graph node construction utilities

use super::node::GraphNode;
use super::ops::NodeOp;

// ============================================================================
// Input Constructors
// ============================================================================

/// Create a named input placeholder
///
/// # Example
/// ```
/// use nestc::graph::input;
/// let x = input("x", [100]);
/// assert_eq!(x.shape(), &[100]);
/// ```
pub fn input(name: impl Into<String>, shape: impl Into<Vec<usize>>) -> GraphNode {
    GraphNode::new(
        NodeOp::Input { name: name.into() },
        vec![],
        shape.into(),
    )
}

// ============================================================================
// Constant Constructors
// ============================================================================

/// Create a scalar constant
pub fn constant(value: f32) -> GraphNode {
    GraphNode::new(NodeOp::Constant(value), vec![], vec![])
}

/// Create a tensor shaped like `like` filled with `value`
pub fn full_like(like: &GraphNode, value: f32) -> GraphNode {
    let c = constant(value);
    if like.is_scalar() {
        return c;
    }
    GraphNode::new(NodeOp::Expand, vec![c, like.clone()], like.shape().to_vec())
}

/// Create a zero tensor shaped like `like`
pub fn zeros_like(like: &GraphNode) -> GraphNode {
    full_like(like, 0.0)
}

/// Create a tensor of ones shaped like `like`
pub fn ones_like(like: &GraphNode) -> GraphNode {
    full_like(like, 1.0)
}
