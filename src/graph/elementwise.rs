//! Elementwise operations on graph nodes.
//!
//! Binary operations require identical shapes; broadcasting a scalar has to be
//! spelled out with [`GraphNode::expand_as`].

use crate::error::{NestError, Result};

use super::builder::constant;
use super::node::GraphNode;
use super::ops::{BinaryOp, CustomFn, NodeOp, UnaryOp};

fn check_same_shape(op: BinaryOp, lhs: &GraphNode, rhs: &GraphNode) -> Result<()> {
    if lhs.shape() != rhs.shape() {
        return Err(NestError::Shape(format!(
            "{}: shape mismatch {:?} and {:?}; broadcasting must be explicit (use expand_as)",
            op.name(),
            lhs.shape(),
            rhs.shape()
        )));
    }
    Ok(())
}

impl GraphNode {
    pub fn unary(&self, op: UnaryOp) -> GraphNode {
        GraphNode::new(NodeOp::Unary(op), vec![self.clone()], self.shape().to_vec())
    }

    pub fn binary(&self, op: BinaryOp, rhs: &GraphNode) -> Result<GraphNode> {
        check_same_shape(op, self, rhs)?;
        Ok(GraphNode::new(
            NodeOp::Binary(op),
            vec![self.clone(), rhs.clone()],
            self.shape().to_vec(),
        ))
    }

    pub fn neg(&self) -> GraphNode {
        self.unary(UnaryOp::Neg)
    }

    pub fn recip(&self) -> GraphNode {
        self.unary(UnaryOp::Recip)
    }

    pub fn sqrt(&self) -> GraphNode {
        self.unary(UnaryOp::Sqrt)
    }

    pub fn exp(&self) -> GraphNode {
        self.unary(UnaryOp::Exp)
    }

    pub fn log(&self) -> GraphNode {
        self.unary(UnaryOp::Log)
    }

    pub fn sin(&self) -> GraphNode {
        self.unary(UnaryOp::Sin)
    }

    pub fn cos(&self) -> GraphNode {
        self.unary(UnaryOp::Cos)
    }

    pub fn add(&self, rhs: &GraphNode) -> Result<GraphNode> {
        self.binary(BinaryOp::Add, rhs)
    }

    pub fn sub(&self, rhs: &GraphNode) -> Result<GraphNode> {
        self.binary(BinaryOp::Sub, rhs)
    }

    pub fn mul(&self, rhs: &GraphNode) -> Result<GraphNode> {
        self.binary(BinaryOp::Mul, rhs)
    }

    pub fn div(&self, rhs: &GraphNode) -> Result<GraphNode> {
        self.binary(BinaryOp::Div, rhs)
    }

    pub fn maximum(&self, rhs: &GraphNode) -> Result<GraphNode> {
        self.binary(BinaryOp::Max, rhs)
    }

    /// `self * c`, with the scalar broadcast to `self`'s shape.
    pub fn mul_scalar(&self, c: f32) -> GraphNode {
        let factor = if self.is_scalar() {
            constant(c)
        } else {
            GraphNode::new(
                NodeOp::Expand,
                vec![constant(c), self.clone()],
                self.shape().to_vec(),
            )
        };
        GraphNode::new(
            NodeOp::Binary(BinaryOp::Mul),
            vec![self.clone(), factor],
            self.shape().to_vec(),
        )
    }

    pub fn map_custom(&self, op: CustomFn) -> GraphNode {
        GraphNode::new(NodeOp::Custom(op), vec![self.clone()], self.shape().to_vec())
    }
}
