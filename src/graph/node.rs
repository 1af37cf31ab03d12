use std::fmt;
use std::hash::{Hash, Hasher};
use std::rc::Rc;

use super::ops::NodeOp;

/// Immutable payload of a graph node.
pub struct GraphInner {
    pub(crate) op: NodeOp,
    pub(crate) sources: Vec<GraphNode>,
    pub(crate) shape: Vec<usize>,
}

/// Handle to a node of the expression graph.
///
/// Cloning the handle shares the node; equality and hashing use node identity,
/// so two structurally equal nodes built by separate calls are distinct.
#[derive(Clone)]
pub struct GraphNode(pub(crate) Rc<GraphInner>);

/// Node identifier (using pointer for identity).
pub type NodeId = *const GraphInner;

impl GraphNode {
    /// Nodes can only point at nodes that already exist, which keeps the graph acyclic.
    pub(crate) fn new(op: NodeOp, sources: Vec<GraphNode>, shape: Vec<usize>) -> Self {
        GraphNode(Rc::new(GraphInner { op, sources, shape }))
    }

    pub fn id(&self) -> NodeId {
        Rc::as_ptr(&self.0)
    }

    pub fn op(&self) -> &NodeOp {
        &self.0.op
    }

    pub fn sources(&self) -> &[GraphNode] {
        &self.0.sources
    }

    pub fn shape(&self) -> &[usize] {
        &self.0.shape
    }

    pub fn ndim(&self) -> usize {
        self.0.shape.len()
    }

    /// Number of elements, `1` for a scalar.
    pub fn numel(&self) -> usize {
        self.0.shape.iter().product()
    }

    pub fn is_scalar(&self) -> bool {
        self.0.shape.is_empty()
    }

    pub fn is_input(&self) -> bool {
        matches!(self.0.op, NodeOp::Input { .. })
    }

    /// Input name, `None` for computed nodes.
    pub fn name(&self) -> Option<&str> {
        match &self.0.op {
            NodeOp::Input { name } => Some(name),
            _ => None,
        }
    }
}

impl PartialEq for GraphNode {
    fn eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }
}

impl Eq for GraphNode {}

impl Hash for GraphNode {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id().hash(state);
    }
}

impl fmt::Debug for GraphNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GraphNode")
            .field("op", &self.0.op)
            .field("shape", &self.0.shape)
            .field("sources", &self.0.sources.len())
            .finish()
    }
}
