//! Gradient computation context
//!
//! This module provides the `GradContext` structure that tracks adjoints
//! during backpropagation.

use rustc_hash::{FxHashMap, FxHashSet};

use crate::error::Result;
use crate::graph::{GraphNode, NodeId};

// ============================================================================
// GradContext
// ============================================================================

/// Context for gradient computation during backpropagation.
///
/// `GradContext` maps forward nodes (by identity) to their accumulated
/// adjoint expressions. Input nodes are the exception: every input sharing a
/// name with a parameter is keyed as that parameter, so adjoints reaching
/// any of them are summed into one gradient.
///
/// # How it works
///
/// 1. The output's adjoint is seeded with the constant `1`
/// 2. Nodes are visited in reverse topological order
/// 3. Each node's local rule distributes its adjoint to its sources
/// 4. A source used by several consumers sums the contributions
#[derive(Debug, Default)]
pub struct GradContext {
    /// Mapping from forward node to its adjoint node.
    pub(crate) grad_map: FxHashMap<NodeId, GraphNode>,

    /// Set of nodes that require gradients.
    pub(crate) requires_grad_set: FxHashSet<NodeId>,

    /// Input name of each parameter to the node its adjoint is stored under.
    param_names: FxHashMap<String, NodeId>,

    /// Memoized "lies on a path to a parameter" answers.
    reaches_param: FxHashMap<NodeId, bool>,
}

impl GradContext {
    /// Create a new gradient context.
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark a node as requiring gradients.
    pub fn mark_requires_grad(&mut self, node: &GraphNode) {
        let key = self.key(node);
        if let Some(name) = node.name() {
            self.param_names.entry(name.to_string()).or_insert(key);
        }
        self.requires_grad_set.insert(key);
        self.reaches_param.clear();
    }

    /// Check if a node requires gradients.
    pub fn requires_grad(&self, node: &GraphNode) -> bool {
        self.requires_grad_set.contains(&self.key(node))
    }

    /// Get the adjoint for a node, if it exists.
    pub fn get_grad(&self, node: &GraphNode) -> Option<&GraphNode> {
        self.grad_map.get(&self.key(node))
    }

    /// Set the adjoint for a node.
    pub fn set_grad(&mut self, node: &GraphNode, grad: GraphNode) {
        let key = self.key(node);
        self.grad_map.insert(key, grad);
    }

    /// Same-named inputs of a parameter share its key.
    fn key(&self, node: &GraphNode) -> NodeId {
        node.name()
            .and_then(|name| self.param_names.get(name).copied())
            .unwrap_or_else(|| node.id())
    }

    /// Accumulate an adjoint contribution for a node.
    ///
    /// If the node already has an adjoint, adds to it.
    /// Otherwise, sets the adjoint.
    pub fn accumulate_grad(&mut self, node: &GraphNode, grad: GraphNode) -> Result<()> {
        let id = self.key(node);
        let accumulated = match self.grad_map.get(&id) {
            Some(existing) => existing.add(&grad)?,
            None => grad,
        };
        self.grad_map.insert(id, accumulated);
        Ok(())
    }

    /// Whether `node` is a parameter or has a parameter among its ancestors.
    pub fn needs_grad(&mut self, node: &GraphNode) -> bool {
        if let Some(&known) = self.reaches_param.get(&node.id()) {
            return known;
        }
        let result = self.requires_grad(node)
            || node
                .sources()
                .iter()
                .any(|source| self.needs_grad(source));
        self.reaches_param.insert(node.id(), result);
        result
    }

    /// Get the number of nodes with computed adjoints.
    pub fn num_grads(&self) -> usize {
        self.grad_map.len()
    }
}

// ============================================================================
// GradResult
// ============================================================================

/// Result of a backward pass.
#[derive(Debug)]
pub struct GradResult {
    context: GradContext,
    params: Vec<GraphNode>,
}

impl GradResult {
    pub(crate) fn new(context: GradContext, params: Vec<GraphNode>) -> Self {
        Self { context, params }
    }

    /// Get the gradient for a specific parameter.
    ///
    /// Returns `None` if the parameter is not connected to the output.
    pub fn get(&self, param: &GraphNode) -> Option<GraphNode> {
        self.context.get_grad(param).cloned()
    }

    /// Gradients in the same order as the parameters were provided.
    pub fn grads(&self) -> Vec<Option<GraphNode>> {
        self.params
            .iter()
            .map(|p| self.context.get_grad(p).cloned())
            .collect()
    }

    /// Get the underlying gradient context.
    pub fn context(&self) -> &GradContext {
        &self.context
    }
}
