//! Full reductions, scalar broadcasting and element counts.

use crate::error::{NestError, Result};

use super::node::GraphNode;
use super::ops::{NodeOp, ReduceOp};

impl GraphNode {
    /// Reduces every element into a 0-d scalar.
    pub fn reduce(&self, op: ReduceOp) -> GraphNode {
        GraphNode::new(NodeOp::Reduce(op), vec![self.clone()], vec![])
    }

    pub fn sum(&self) -> GraphNode {
        self.reduce(ReduceOp::Sum)
    }

    pub fn mean(&self) -> GraphNode {
        self.reduce(ReduceOp::Mean)
    }

    pub fn max(&self) -> GraphNode {
        self.reduce(ReduceOp::Max)
    }

    /// Broadcasts a scalar to the shape of `like`.
    pub fn expand_as(&self, like: &GraphNode) -> Result<GraphNode> {
        if !self.is_scalar() {
            return Err(NestError::Shape(format!(
                "expand_as: only scalars can be expanded, got shape {:?}",
                self.shape()
            )));
        }
        Ok(GraphNode::new(
            NodeOp::Expand,
            vec![self.clone(), like.clone()],
            like.shape().to_vec(),
        ))
    }

    /// Scalar node holding the element count of `self`.
    pub fn numel_node(&self) -> GraphNode {
        GraphNode::new(NodeOp::Numel, vec![self.clone()], vec![])
    }
}
