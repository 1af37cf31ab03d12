//! VJP (Vector-Jacobian Product) rules for automatic differentiation
//!
//! Each rule maps the adjoint of a node's output to adjoints of its sources,
//! built as new graph nodes.

use crate::error::{NestError, Result, Stage};
use crate::graph::{BinaryOp, GraphNode, NodeOp, ReduceOp, UnaryOp};

/// Result of computing the VJP for a node.
#[derive(Debug)]
pub struct VjpResult {
    /// Adjoints for each source, in order.
    /// `None` means no gradient flows into that source.
    pub input_grads: Vec<Option<GraphNode>>,
}

/// Compute the VJP for a graph node.
///
/// Given the adjoint of the node's output (`grad_output`), computes the
/// adjoints for each source of `node`.
pub fn compute_vjp(node: &GraphNode, grad_output: &GraphNode) -> Result<VjpResult> {
    let sources = node.sources();
    let g = grad_output;

    let input_grads = match node.op() {
        NodeOp::Input { .. } | NodeOp::Constant(_) => vec![],

        // element counts do not depend on element values
        NodeOp::Numel => vec![None],

        NodeOp::Unary(op) => {
            let x = &sources[0];
            let grad = match op {
                UnaryOp::Neg => g.neg(),
                // d(1/x) = -1/x^2 = -y*y
                UnaryOp::Recip => g.mul(node)?.mul(node)?.neg(),
                // d(sqrt x) = 1 / (2 sqrt x)
                UnaryOp::Sqrt => g.div(&node.add(node)?)?,
                UnaryOp::Exp => g.mul(node)?,
                UnaryOp::Log => g.div(x)?,
                UnaryOp::Sin => g.mul(&x.cos())?,
                UnaryOp::Cos => g.mul(&x.sin())?.neg(),
            };
            vec![Some(grad)]
        }

        NodeOp::Binary(op) => {
            let (a, b) = (&sources[0], &sources[1]);
            match op {
                BinaryOp::Add => vec![Some(g.clone()), Some(g.clone())],
                BinaryOp::Sub => vec![Some(g.clone()), Some(g.neg())],
                BinaryOp::Mul => vec![Some(g.mul(b)?), Some(g.mul(a)?)],
                BinaryOp::Div => vec![Some(g.div(b)?), Some(g.mul(a)?.div(&b.mul(b)?)?.neg())],
                BinaryOp::Max => {
                    return Err(NestError::unsupported(Stage::Differentiation, node.op()));
                }
            }
        }

        NodeOp::Reduce(op) => {
            let x = &sources[0];
            match op {
                ReduceOp::Sum => vec![Some(g.expand_as(x)?)],
                ReduceOp::Mean => vec![Some(g.div(&x.numel_node())?.expand_as(x)?)],
                ReduceOp::Max => {
                    return Err(NestError::unsupported(Stage::Differentiation, node.op()));
                }
            }
        }

        // expand(s, like): ds = sum(g); `like` only contributes its shape
        NodeOp::Expand => vec![Some(g.sum()), None],

        NodeOp::Custom(f) => {
            let x = &sources[0];
            let derivative = f
                .0
                .derivative(x)
                .ok_or_else(|| NestError::unsupported(Stage::Differentiation, node.op()))?;
            vec![Some(g.mul(&derivative)?)]
        }
    };

    Ok(VjpResult { input_grads })
}
