//! Explicit loop-nest IR
//!
//! A [`LoopNest`] declares every buffer it touches and describes the
//! computation as nested counted loops around simple statements. Every access
//! is `buffer[index]`, where the index is an affine combination of enclosing
//! loop variables with symbolic strides.

use std::fmt;

use crate::error::{NestError, Result};
use crate::graph::{BinaryOp, CustomFn, ReduceOp, UnaryOp};
use crate::shape::Expr;
use crate::trace::ShapeConstraint;

pub type BufferId = usize;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BufferKind {
    /// The i-th kernel argument. Never written.
    Input(usize),
    /// Intermediate value.
    Temp,
    /// Running value of a reduction.
    Accumulator,
    /// The kernel result.
    Output,
}

#[derive(Debug, Clone, PartialEq)]
pub struct BufferDecl {
    pub name: String,
    pub kind: BufferKind,
    pub shape: Vec<Expr>,
}

impl BufferDecl {
    pub fn numel(&self) -> Expr {
        Expr::product(&self.shape)
    }
}

/// Linear offset `sum(var * stride)`. No terms means element 0.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Index {
    pub terms: Vec<(String, Expr)>,
}

impl Index {
    pub fn scalar() -> Self {
        Self::default()
    }

    /// Row-major index of a buffer of `shape` walked by `vars`, outermost first.
    pub fn row_major(vars: &[String], shape: &[Expr]) -> Self {
        let terms = vars
            .iter()
            .cloned()
            .zip(Expr::row_major_strides(shape))
            .collect();
        Self { terms }
    }

    pub fn vars(&self) -> impl Iterator<Item = &str> {
        self.terms.iter().map(|(var, _)| var.as_str())
    }
}

impl fmt::Display for Index {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.terms.is_empty() {
            return f.write_str("0");
        }
        let terms: Vec<String> = self
            .terms
            .iter()
            .map(|(var, stride)| {
                if stride.is_one() {
                    var.clone()
                } else {
                    format!("{var} * {stride}")
                }
            })
            .collect();
        f.write_str(&terms.join(" + "))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Access {
    pub buffer: BufferId,
    pub index: Index,
}

#[derive(Debug, Clone, PartialEq)]
pub enum StmtOp {
    /// Store a literal.
    Literal(f32),
    /// Store the value of an extent expression.
    Extent(Expr),
    Unary(UnaryOp),
    Binary(BinaryOp),
    Copy,
    /// `write = op.accumulate(write, reads[0])`
    Accumulate(ReduceOp),
    /// `write = op.finalize(reads[0], count)`
    Finalize { reduce: ReduceOp, count: Expr },
    Custom(CustomFn),
}

impl StmtOp {
    pub fn arity(&self) -> usize {
        match self {
            StmtOp::Literal(_) | StmtOp::Extent(_) => 0,
            StmtOp::Binary(_) => 2,
            _ => 1,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Statement {
    pub op: StmtOp,
    pub reads: Vec<Access>,
    pub write: Access,
}

#[derive(Debug, Clone, PartialEq)]
pub enum LoopNode {
    Loop {
        var: String,
        extent: Expr,
        body: Vec<LoopNode>,
    },
    Stmt(Statement),
}

#[derive(Debug, Clone, PartialEq)]
pub struct LoopNest {
    pub buffers: Vec<BufferDecl>,
    /// Dimension variables bound from the input shapes at call time.
    pub dims: Vec<String>,
    pub constraints: Vec<ShapeConstraint>,
    pub body: Vec<LoopNode>,
    pub output: BufferId,
}

impl LoopNest {
    pub fn buffer(&self, id: BufferId) -> &BufferDecl {
        &self.buffers[id]
    }

    /// Input buffers in argument order.
    pub fn inputs(&self) -> Vec<(BufferId, &BufferDecl)> {
        let mut inputs: Vec<(usize, BufferId, &BufferDecl)> = self
            .buffers
            .iter()
            .enumerate()
            .filter_map(|(id, buf)| match buf.kind {
                BufferKind::Input(pos) => Some((pos, id, buf)),
                _ => None,
            })
            .collect();
        inputs.sort_by_key(|(pos, _, _)| *pos);
        inputs.into_iter().map(|(_, id, buf)| (id, buf)).collect()
    }

    pub fn num_inputs(&self) -> usize {
        self.inputs().len()
    }

    pub fn output_shape(&self) -> &[Expr] {
        &self.buffers[self.output].shape
    }

    /// Deepest loop nesting.
    pub fn depth(&self) -> usize {
        fn depth_of(nodes: &[LoopNode]) -> usize {
            nodes
                .iter()
                .map(|node| match node {
                    LoopNode::Loop { body, .. } => 1 + depth_of(body),
                    LoopNode::Stmt(_) => 0,
                })
                .max()
                .unwrap_or(0)
        }
        depth_of(&self.body)
    }

    pub fn count_loops(&self) -> usize {
        fn count(nodes: &[LoopNode]) -> usize {
            nodes
                .iter()
                .map(|node| match node {
                    LoopNode::Loop { body, .. } => 1 + count(body),
                    LoopNode::Stmt(_) => 0,
                })
                .sum()
        }
        count(&self.body)
    }

    /// All statements in execution order.
    pub fn statements(&self) -> Vec<&Statement> {
        fn collect<'a>(nodes: &'a [LoopNode], out: &mut Vec<&'a Statement>) {
            for node in nodes {
                match node {
                    LoopNode::Loop { body, .. } => collect(body, out),
                    LoopNode::Stmt(stmt) => out.push(stmt),
                }
            }
        }
        let mut out = Vec::new();
        collect(&self.body, &mut out);
        out
    }

    /// Checks that accesses only use enclosing loop variables, buffer ids
    /// exist and inputs are never written.
    pub fn validate(&self) -> Result<()> {
        if self.output >= self.buffers.len() {
            return Err(NestError::Compilation(format!(
                "output buffer {} is not declared",
                self.output
            )));
        }
        if self.buffers[self.output].kind != BufferKind::Output {
            return Err(NestError::Compilation(format!(
                "buffer '{}' is the result but not declared as output",
                self.buffers[self.output].name
            )));
        }
        let mut scope = Vec::new();
        self.validate_nodes(&self.body, &mut scope)
    }

    fn validate_nodes<'a>(&'a self, nodes: &'a [LoopNode], scope: &mut Vec<&'a str>) -> Result<()> {
        for node in nodes {
            match node {
                LoopNode::Loop { var, body, .. } => {
                    if scope.contains(&var.as_str()) {
                        return Err(NestError::Compilation(format!(
                            "loop variable '{var}' shadows an enclosing loop"
                        )));
                    }
                    scope.push(var);
                    self.validate_nodes(body, scope)?;
                    scope.pop();
                }
                LoopNode::Stmt(stmt) => {
                    if stmt.reads.len() != stmt.op.arity() {
                        return Err(NestError::Compilation(format!(
                            "statement writing '{}' has {} reads, expected {}",
                            self.describe(&stmt.write),
                            stmt.reads.len(),
                            stmt.op.arity()
                        )));
                    }
                    for access in stmt.reads.iter().chain(std::iter::once(&stmt.write)) {
                        self.validate_access(access, scope)?;
                    }
                    if let Some(buf) = self.buffers.get(stmt.write.buffer)
                        && matches!(buf.kind, BufferKind::Input(_))
                    {
                        return Err(NestError::Compilation(format!(
                            "input buffer '{}' is written",
                            buf.name
                        )));
                    }
                }
            }
        }
        Ok(())
    }

    fn validate_access(&self, access: &Access, scope: &[&str]) -> Result<()> {
        if access.buffer >= self.buffers.len() {
            return Err(NestError::Compilation(format!(
                "access to undeclared buffer {}",
                access.buffer
            )));
        }
        for var in access.index.vars() {
            if !scope.contains(&var) {
                return Err(NestError::Compilation(format!(
                    "'{}' uses loop variable '{var}' outside of its loop",
                    self.describe(access)
                )));
            }
        }
        Ok(())
    }

    fn describe(&self, access: &Access) -> String {
        let name = self
            .buffers
            .get(access.buffer)
            .map(|buf| buf.name.as_str())
            .unwrap_or("?");
        format!("{name}[{}]", access.index)
    }

    fn fmt_stmt(&self, stmt: &Statement) -> String {
        let write = self.describe(&stmt.write);
        let reads: Vec<String> = stmt.reads.iter().map(|a| self.describe(a)).collect();
        match &stmt.op {
            StmtOp::Literal(v) => format!("{write} = {v}"),
            StmtOp::Extent(e) => format!("{write} = extent({e})"),
            StmtOp::Unary(op) => format!("{write} = {}({})", op.name(), reads.join(", ")),
            StmtOp::Binary(op) => format!("{write} = {}({})", op.name(), reads.join(", ")),
            StmtOp::Copy => format!("{write} = {}", reads.join(", ")),
            StmtOp::Accumulate(op) => {
                format!("{write} = {}.acc({write}, {})", op.name(), reads.join(", "))
            }
            StmtOp::Finalize { reduce, count } => {
                format!("{write} = {}.final({}, {count})", reduce.name(), reads.join(", "))
            }
            StmtOp::Custom(f) => format!("{write} = {}({})", f.name(), reads.join(", ")),
        }
    }

    fn fmt_nodes(&self, f: &mut fmt::Formatter<'_>, nodes: &[LoopNode], depth: usize) -> fmt::Result {
        let pad = "  ".repeat(depth);
        for node in nodes {
            match node {
                LoopNode::Loop { var, extent, body } => {
                    writeln!(f, "{pad}for {var} in 0..{extent} {{")?;
                    self.fmt_nodes(f, body, depth + 1)?;
                    writeln!(f, "{pad}}}")?;
                }
                LoopNode::Stmt(stmt) => writeln!(f, "{pad}{}", self.fmt_stmt(stmt))?,
            }
        }
        Ok(())
    }
}

impl fmt::Display for LoopNest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "buffers:")?;
        for buf in &self.buffers {
            let dims: Vec<String> = buf.shape.iter().map(|d| d.to_string()).collect();
            let kind = match buf.kind {
                BufferKind::Input(i) => format!("input {i}"),
                BufferKind::Temp => "temp".to_string(),
                BufferKind::Accumulator => "accumulator".to_string(),
                BufferKind::Output => "output".to_string(),
            };
            writeln!(f, "  {}: f32[{}] ({kind})", buf.name, dims.join(", "))?;
        }
        if !self.dims.is_empty() {
            writeln!(f, "dims: {}", self.dims.join(", "))?;
        }
        for c in &self.constraints {
            let lhs: Vec<String> = c.lhs.iter().map(|d| d.to_string()).collect();
            let rhs: Vec<String> = c.rhs.iter().map(|d| d.to_string()).collect();
            writeln!(f, "assume [{}] == [{}]", lhs.join(", "), rhs.join(", "))?;
        }
        self.fmt_nodes(f, &self.body, 0)
    }
}
