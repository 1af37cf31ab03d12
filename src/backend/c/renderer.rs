//! C source rendering for loop nests.

use std::fmt::Write;

use log::debug;
use rustc_hash::FxHashMap;

use crate::error::{NestError, Result};
use crate::graph::{BinaryOp, ReduceOp, UnaryOp};
use crate::lowerer::{Access, BufferKind, LoopNest, LoopNode, Statement, StmtOp};
use crate::shape::Expr;

use super::ENTRY_POINT;

/// Renders a [`LoopNest`] into a self-contained C translation unit.
///
/// The entry point has the signature
///
/// ```c
/// void kernel_main(const float** inputs, float* output, const long long* dims);
/// ```
///
/// where `dims` holds the values of the nest's dimension variables in order.
/// Buffers, dimensions and loop variables are renamed to `b<id>`, `d<k>` and
/// `ridx<k>` so that input names never have to be valid C identifiers.
#[derive(Default)]
pub struct CRenderer {
    buffer: String,
    indent_level: usize,
    dims: FxHashMap<String, usize>,
    loop_vars: FxHashMap<String, usize>,
}

impl CRenderer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn render(&mut self, nest: &LoopNest) -> Result<String> {
        self.buffer.clear();
        self.indent_level = 0;
        self.dims = nest
            .dims
            .iter()
            .enumerate()
            .map(|(k, name)| (name.clone(), k))
            .collect();
        self.loop_vars.clear();

        self.buffer.push_str("#include <stddef.h>\n");
        self.buffer.push_str("#include <stdlib.h>\n");
        self.buffer.push_str("#include <math.h>\n\n");
        self.writeln(&format!(
            "void {ENTRY_POINT}(const float** inputs, float* output, const long long* dims) {{"
        ));
        self.indent_level += 1;

        for (k, name) in nest.dims.iter().enumerate() {
            self.writeln(&format!("const long long d{k} = dims[{k}]; /* {name} */"));
        }

        let mut heap = Vec::new();
        for (id, buf) in nest.buffers.iter().enumerate() {
            let decl = match buf.kind {
                BufferKind::Input(pos) => format!("const float* b{id} = inputs[{pos}];"),
                BufferKind::Output => format!("float* b{id} = output;"),
                BufferKind::Temp | BufferKind::Accumulator if buf.shape.is_empty() => {
                    format!("float b{id}[1];")
                }
                BufferKind::Temp | BufferKind::Accumulator => {
                    heap.push(id);
                    format!(
                        "float* b{id} = (float*)malloc(sizeof(float) * (size_t)({}));",
                        self.render_expr(&buf.numel())?
                    )
                }
            };
            self.writeln(&format!("{decl} /* {} */", buf.name));
        }

        self.render_nodes(nest, &nest.body)?;

        for id in heap {
            self.writeln(&format!("free(b{id});"));
        }
        self.indent_level -= 1;
        self.writeln("}");

        let code = std::mem::take(&mut self.buffer);
        debug!("Rendered C code:\n{code}");
        Ok(code)
    }

    fn render_nodes(&mut self, nest: &LoopNest, nodes: &[LoopNode]) -> Result<()> {
        for node in nodes {
            match node {
                LoopNode::Loop { var, extent, body } => {
                    let next = self.loop_vars.len();
                    let k = *self.loop_vars.entry(var.clone()).or_insert(next);
                    let stop = self.render_expr(extent)?;
                    self.writeln(&format!(
                        "for (long long ridx{k} = 0; ridx{k} < {stop}; ridx{k}++) {{"
                    ));
                    self.indent_level += 1;
                    self.render_nodes(nest, body)?;
                    self.indent_level -= 1;
                    self.writeln("}");
                }
                LoopNode::Stmt(stmt) => {
                    let line = self.render_stmt(stmt)?;
                    self.writeln(&line);
                }
            }
        }
        Ok(())
    }

    fn render_stmt(&self, stmt: &Statement) -> Result<String> {
        let write = self.render_access(&stmt.write)?;
        let reads = stmt
            .reads
            .iter()
            .map(|a| self.render_access(a))
            .collect::<Result<Vec<_>>>()?;
        let arg = |k: usize| reads.get(k).cloned().unwrap_or_default();

        let value = match &stmt.op {
            StmtOp::Literal(v) => render_f32(*v),
            StmtOp::Extent(e) => format!("(float)({})", self.render_expr(e)?),
            StmtOp::Unary(op) => render_unary(*op, &arg(0)),
            StmtOp::Binary(op) => render_binary(*op, &arg(0), &arg(1)),
            StmtOp::Copy => arg(0),
            StmtOp::Accumulate(ReduceOp::Max) => format!("fmaxf({write}, {})", arg(0)),
            StmtOp::Accumulate(_) => format!("{write} + {}", arg(0)),
            StmtOp::Finalize {
                reduce: ReduceOp::Mean,
                count,
            } => format!("{} / (float)({})", arg(0), self.render_expr(count)?),
            StmtOp::Finalize { .. } => arg(0),
            StmtOp::Custom(f) => f.0.c_expr(&arg(0)).ok_or_else(|| {
                NestError::Compilation(format!(
                    "custom operation '{}' has no C rendering",
                    f.name()
                ))
            })?,
        };
        Ok(format!("{write} = {value};"))
    }

    fn render_access(&self, access: &Access) -> Result<String> {
        if access.index.terms.is_empty() {
            return Ok(format!("b{}[0]", access.buffer));
        }
        let mut terms = Vec::with_capacity(access.index.terms.len());
        for (var, stride) in &access.index.terms {
            let k = self.loop_vars.get(var).ok_or_else(|| {
                NestError::Compilation(format!("loop variable '{var}' is not in scope"))
            })?;
            if stride.is_one() {
                terms.push(format!("ridx{k}"));
            } else {
                terms.push(format!("ridx{k} * {}", self.render_expr(stride)?));
            }
        }
        Ok(format!("b{}[{}]", access.buffer, terms.join(" + ")))
    }

    fn render_expr(&self, expr: &Expr) -> Result<String> {
        Ok(match expr {
            Expr::Const(c) => format!("{c}LL"),
            Expr::Var(name) => {
                let k = self.dims.get(name).ok_or_else(|| {
                    NestError::Compilation(format!("dimension '{name}' is not bound"))
                })?;
                format!("d{k}")
            }
            Expr::Add(l, r) => format!("({} + {})", self.render_expr(l)?, self.render_expr(r)?),
            Expr::Mul(l, r) => format!("({} * {})", self.render_expr(l)?, self.render_expr(r)?),
        })
    }

    fn write_indent(&mut self) {
        for _ in 0..self.indent_level {
            self.buffer.push_str("    ");
        }
    }

    fn writeln(&mut self, s: &str) {
        self.write_indent();
        // writing into a String cannot fail
        let _ = writeln!(self.buffer, "{s}");
    }
}

fn render_f32(v: f32) -> String {
    if v.is_nan() {
        "NAN".to_string()
    } else if v == f32::INFINITY {
        "INFINITY".to_string()
    } else if v == f32::NEG_INFINITY {
        "(-INFINITY)".to_string()
    } else {
        format!("({v:?}f)")
    }
}

fn render_unary(op: UnaryOp, a: &str) -> String {
    match op {
        UnaryOp::Neg => format!("-({a})"),
        UnaryOp::Recip => format!("1.0f / ({a})"),
        UnaryOp::Sqrt => format!("sqrtf({a})"),
        UnaryOp::Exp => format!("expf({a})"),
        UnaryOp::Log => format!("logf({a})"),
        UnaryOp::Sin => format!("sinf({a})"),
        UnaryOp::Cos => format!("cosf({a})"),
    }
}

fn render_binary(op: BinaryOp, a: &str, b: &str) -> String {
    match op {
        BinaryOp::Add => format!("{a} + {b}"),
        BinaryOp::Sub => format!("{a} - {b}"),
        BinaryOp::Mul => format!("{a} * {b}"),
        BinaryOp::Div => format!("{a} / {b}"),
        BinaryOp::Max => format!("fmaxf({a}, {b})"),
    }
}
