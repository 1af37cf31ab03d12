//! Operation kinds of the expression graph.

use std::fmt;
use std::sync::Arc;

use super::node::GraphNode;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UnaryOp {
    Neg,
    Recip,
    Sqrt,
    Exp,
    Log,
    Sin,
    Cos,
}

impl UnaryOp {
    pub fn apply(&self, x: f32) -> f32 {
        match self {
            UnaryOp::Neg => -x,
            UnaryOp::Recip => x.recip(),
            UnaryOp::Sqrt => x.sqrt(),
            UnaryOp::Exp => x.exp(),
            UnaryOp::Log => x.ln(),
            UnaryOp::Sin => x.sin(),
            UnaryOp::Cos => x.cos(),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            UnaryOp::Neg => "neg",
            UnaryOp::Recip => "recip",
            UnaryOp::Sqrt => "sqrt",
            UnaryOp::Exp => "exp",
            UnaryOp::Log => "log",
            UnaryOp::Sin => "sin",
            UnaryOp::Cos => "cos",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    /// Elementwise maximum. Not differentiable.
    Max,
}

impl BinaryOp {
    pub fn apply(&self, a: f32, b: f32) -> f32 {
        match self {
            BinaryOp::Add => a + b,
            BinaryOp::Sub => a - b,
            BinaryOp::Mul => a * b,
            BinaryOp::Div => a / b,
            BinaryOp::Max => a.max(b),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            BinaryOp::Add => "add",
            BinaryOp::Sub => "sub",
            BinaryOp::Mul => "mul",
            BinaryOp::Div => "div",
            BinaryOp::Max => "max",
        }
    }
}

/// Full reductions. The result is always a 0-d scalar.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ReduceOp {
    Sum,
    Mean,
    /// Not differentiable.
    Max,
}

impl ReduceOp {
    /// Initial accumulator value.
    pub fn identity(&self) -> f32 {
        match self {
            ReduceOp::Sum | ReduceOp::Mean => 0.0,
            ReduceOp::Max => f32::NEG_INFINITY,
        }
    }

    /// Folds one element into the accumulator.
    pub fn accumulate(&self, acc: f32, x: f32) -> f32 {
        match self {
            ReduceOp::Sum | ReduceOp::Mean => acc + x,
            ReduceOp::Max => acc.max(x),
        }
    }

    /// Turns the accumulator into the result given the element count.
    pub fn finalize(&self, acc: f32, count: usize) -> f32 {
        match self {
            ReduceOp::Sum | ReduceOp::Max => acc,
            ReduceOp::Mean => acc / count as f32,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            ReduceOp::Sum => "sum",
            ReduceOp::Mean => "mean",
            ReduceOp::Max => "reduce_max",
        }
    }
}

/// A user-defined elementwise function.
///
/// `eval` is required; the derivative and the C rendering are optional, and
/// their absence surfaces as `UnsupportedOp` during differentiation and as a
/// `Compilation` error on the C target respectively.
pub trait CustomOp: fmt::Debug + Send + Sync {
    fn name(&self) -> &str;

    fn eval(&self, x: f32) -> f32;

    /// Local derivative `f'(x)` built as a graph over `x`.
    fn derivative(&self, _x: &GraphNode) -> Option<GraphNode> {
        None
    }

    /// C expression computing the function of `arg`.
    fn c_expr(&self, _arg: &str) -> Option<String> {
        None
    }
}

/// Shared handle to a [`CustomOp`]. Two handles compare equal when they name
/// the same function.
#[derive(Debug, Clone)]
pub struct CustomFn(pub Arc<dyn CustomOp>);

impl CustomFn {
    pub fn new(op: impl CustomOp + 'static) -> Self {
        CustomFn(Arc::new(op))
    }

    pub fn name(&self) -> &str {
        self.0.name()
    }

    pub fn eval(&self, x: f32) -> f32 {
        self.0.eval(x)
    }
}

impl PartialEq for CustomFn {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0) || self.name() == other.name()
    }
}

/// The operation performed by a graph node.
#[derive(Debug, Clone, PartialEq)]
pub enum NodeOp {
    /// Named placeholder with a fixed shape.
    Input { name: String },
    /// Scalar literal.
    Constant(f32),
    Unary(UnaryOp),
    Binary(BinaryOp),
    Reduce(ReduceOp),
    /// Broadcasts the scalar `sources[0]` to the shape of `sources[1]`.
    Expand,
    /// Element count of `sources[0]` as a scalar.
    Numel,
    Custom(CustomFn),
}

impl fmt::Display for NodeOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NodeOp::Input { name } => write!(f, "input({name})"),
            NodeOp::Constant(v) => write!(f, "const({v})"),
            NodeOp::Unary(op) => f.write_str(op.name()),
            NodeOp::Binary(op) => f.write_str(op.name()),
            NodeOp::Reduce(op) => f.write_str(op.name()),
            NodeOp::Expand => f.write_str("expand"),
            NodeOp::Numel => f.write_str("numel"),
            NodeOp::Custom(op) => write!(f, "custom({})", op.name()),
        }
    }
}
