//! Loop structure generation
//!
//! A [`LoopGroup`] collects the statements that run inside one row-major loop
//! nest over a shape, together with the scalar statements that must run right
//! before (`pre`) and right after (`post`) it.

use rustc_hash::FxHashSet;

use crate::shape::Expr;
use crate::trace::ValueRef;

use super::loop_nest::{LoopNode, Statement};

pub(crate) struct LoopGroup {
    pub shape: Vec<Expr>,
    pub vars: Vec<String>,
    pub pre: Vec<Statement>,
    pub body: Vec<Statement>,
    pub post: Vec<Statement>,
    /// Reductions whose result is only available after the loop.
    pub finalized: FxHashSet<ValueRef>,
}

impl LoopGroup {
    pub fn new(shape: Vec<Expr>, vars: Vec<String>) -> Self {
        Self {
            shape,
            vars,
            pre: Vec::new(),
            body: Vec::new(),
            post: Vec::new(),
            finalized: FxHashSet::default(),
        }
    }

    /// Whether any of `reads` is produced after the loop of this group.
    pub fn depends_on_post(&self, reads: &[ValueRef]) -> bool {
        reads.iter().any(|r| self.finalized.contains(r))
    }

    /// Emits `pre`, the loops around `body`, then `post`.
    pub fn into_nodes(self) -> Vec<LoopNode> {
        let mut nodes: Vec<LoopNode> = self.pre.into_iter().map(LoopNode::Stmt).collect();
        nodes.extend(generate_loops(
            &self.vars,
            &self.shape,
            self.body.into_iter().map(LoopNode::Stmt).collect(),
        ));
        nodes.extend(self.post.into_iter().map(LoopNode::Stmt));
        nodes
    }
}

/// Wraps `inner` in one loop per dimension, outermost first. A 0-d shape
/// leaves `inner` unwrapped.
///
/// ```text
/// for i0 in 0..shape[0] {
///   for i1 in 0..shape[1] {
///     <inner>
///   }
/// }
/// ```
pub(crate) fn generate_loops(vars: &[String], shape: &[Expr], inner: Vec<LoopNode>) -> Vec<LoopNode> {
    // Build from inside out
    let mut body = inner;
    for (var, extent) in vars.iter().zip(shape).rev() {
        body = vec![LoopNode::Loop {
            var: var.clone(),
            extent: extent.clone(),
            body,
        }];
    }
    body
}
