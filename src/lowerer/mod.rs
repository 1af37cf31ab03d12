//! Trace to loop-nest lowering
//!
//! Every trace value gets its own buffer. Tensor instructions are grouped into
//! row-major loop nests over their shape: with loop fusion enabled,
//! consecutive instructions over the same symbolic shape share one nest.
//! Scalar instructions run in front of the open nest when their operands are
//! already available and close it otherwise.
//!
//! Reductions are split into three statements: the accumulator is set to the
//! identity before the loop, accumulated inside it and finalized after it.

mod config;
mod loop_gen;
pub mod loop_nest;


use log::{debug, trace};
use rustc_hash::FxHashMap;

use crate::error::{NestError, Result};
use crate::graph::ReduceOp;
use crate::shape::Expr;
use crate::trace::{Instruction, Opcode, Trace, ValueRef};

use loop_gen::LoopGroup;

pub use config::LoweringConfig;
pub use loop_nest::{
    Access, BufferDecl, BufferId, BufferKind, Index, LoopNest, LoopNode, Statement, StmtOp,
};

/// Lowers a [`Trace`] into a [`LoopNest`].
#[derive(Debug, Clone, Default)]
pub struct Lowerer {
    config: LoweringConfig,
}

impl Lowerer {
    pub fn new(config: LoweringConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &LoweringConfig {
        &self.config
    }

    pub fn lower(&self, trace: &Trace) -> Result<LoopNest> {
        trace.validate()?;

        let mut state = LowerState::new(&self.config, trace);
        for (j, inst) in trace.instructions.iter().enumerate() {
            state.lower_instruction(j, inst)?;
        }
        if let ValueRef::Input(i) = trace.output {
            state.copy_input_to_output(i)?;
        }
        state.close_group();

        let nest = LoopNest {
            buffers: state.buffers,
            dims: trace.dim_vars(),
            constraints: trace.constraints.clone(),
            body: state.body,
            output: state.output,
        };

        debug!(
            "Lowered {} instructions into {} loop groups ({} buffers, depth {})",
            trace.instructions.len(),
            state.groups,
            nest.buffers.len(),
            nest.depth()
        );
        trace!("\n{nest}");
        Ok(nest)
    }
}

struct LowerState<'a> {
    config: &'a LoweringConfig,
    trace: &'a Trace,
    buffers: Vec<BufferDecl>,
    value_buffer: FxHashMap<ValueRef, BufferId>,
    accumulators: FxHashMap<ValueRef, BufferId>,
    output: BufferId,
    body: Vec<LoopNode>,
    group: Option<LoopGroup>,
    groups: usize,
}

impl<'a> LowerState<'a> {
    fn new(config: &'a LoweringConfig, trace: &'a Trace) -> Self {
        let mut buffers = Vec::new();
        let mut value_buffer = FxHashMap::default();
        let mut accumulators = FxHashMap::default();

        for (i, input) in trace.inputs.iter().enumerate() {
            value_buffer.insert(ValueRef::Input(i), buffers.len());
            buffers.push(BufferDecl {
                name: input.name.clone(),
                kind: BufferKind::Input(i),
                shape: input.shape.clone(),
            });
        }

        for (j, inst) in trace.instructions.iter().enumerate() {
            let is_output = trace.output == ValueRef::Value(j);
            value_buffer.insert(ValueRef::Value(j), buffers.len());
            buffers.push(BufferDecl {
                name: if is_output { "out".to_string() } else { format!("t{j}") },
                kind: if is_output { BufferKind::Output } else { BufferKind::Temp },
                shape: inst.shape.clone(),
            });
            if matches!(inst.opcode, Opcode::Reduce(_)) {
                accumulators.insert(ValueRef::Value(j), buffers.len());
                buffers.push(BufferDecl {
                    name: format!("acc{j}"),
                    kind: BufferKind::Accumulator,
                    shape: vec![],
                });
            }
        }

        let output = match trace.output {
            ValueRef::Input(_) => {
                buffers.push(BufferDecl {
                    name: "out".to_string(),
                    kind: BufferKind::Output,
                    shape: trace.output_shape().to_vec(),
                });
                buffers.len() - 1
            }
            value => value_buffer.get(&value).copied().unwrap_or_default(),
        };

        Self {
            config,
            trace,
            buffers,
            value_buffer,
            accumulators,
            output,
            body: Vec::new(),
            group: None,
            groups: 0,
        }
    }

    fn loop_vars(&self, rank: usize) -> Vec<String> {
        (0..rank).map(|d| self.config.loop_var(d)).collect()
    }

    fn shape_of(&self, value: ValueRef) -> &'a [Expr] {
        self.trace.shape_of(value).unwrap_or(&[])
    }

    /// Access to `buffer` of `shape` from inside loops over `vars`.
    fn access_buffer(&self, buffer: BufferId, shape: &[Expr], vars: &[String]) -> Result<Access> {
        if shape.is_empty() {
            return Ok(Access {
                buffer,
                index: Index::scalar(),
            });
        }
        if shape.len() != vars.len() {
            return Err(NestError::MalformedTrace(format!(
                "'{}' of rank {} is read inside a rank {} loop nest",
                self.buffers[buffer].name,
                shape.len(),
                vars.len()
            )));
        }
        Ok(Access {
            buffer,
            index: Index::row_major(vars, shape),
        })
    }

    fn access(&self, value: ValueRef, vars: &[String]) -> Result<Access> {
        let buffer = self.value_buffer.get(&value).copied().ok_or_else(|| {
            NestError::MalformedTrace(format!("{value} has no buffer"))
        })?;
        self.access_buffer(buffer, self.shape_of(value), vars)
    }

    fn close_group(&mut self) {
        if let Some(group) = self.group.take() {
            self.body.extend(group.into_nodes());
            self.groups += 1;
        }
    }

    /// Returns the loop group over `shape`, opening a new one unless the
    /// current group can take statements reading `reads`.
    fn open_group(&mut self, shape: &[Expr], reads: &[ValueRef]) -> &mut LoopGroup {
        let joinable = self.group.as_ref().is_some_and(|group| {
            self.config.fuse_loops && group.shape == shape && !group.depends_on_post(reads)
        });
        if !joinable {
            self.close_group();
            trace!("opening loop group over {shape:?}");
        }
        let vars = self.loop_vars(shape.len());
        self.group
            .get_or_insert_with(|| LoopGroup::new(shape.to_vec(), vars))
    }

    /// Places scalar statements in front of the open group when possible.
    fn emit_scalar(&mut self, reads: &[ValueRef], stmts: Vec<Statement>) {
        if let Some(group) = self.group.as_mut() {
            if !group.depends_on_post(reads) {
                group.pre.extend(stmts);
                return;
            }
            trace!("scalar statement reads a reduction of the open group, closing it");
            self.close_group();
        }
        self.body.extend(stmts.into_iter().map(LoopNode::Stmt));
    }

    fn lower_instruction(&mut self, j: usize, inst: &Instruction) -> Result<()> {
        let value = ValueRef::Value(j);

        let op = match &inst.opcode {
            Opcode::Reduce(op) => return self.lower_reduce(value, *op, inst.operands[0]),
            Opcode::Const(v) => StmtOp::Literal(*v),
            Opcode::Numel => StmtOp::Extent(Expr::product(self.shape_of(inst.operands[0]))),
            Opcode::Unary(op) => StmtOp::Unary(*op),
            Opcode::Binary(op) => StmtOp::Binary(*op),
            Opcode::Expand => StmtOp::Copy,
            Opcode::Custom(f) => StmtOp::Custom(f.clone()),
        };
        let reads: Vec<ValueRef> = match inst.opcode {
            // only the scalar is read; the second operand supplies the shape
            Opcode::Expand => vec![inst.operands[0]],
            Opcode::Numel => vec![],
            _ => inst.operands.clone(),
        };

        let vars = self.loop_vars(inst.shape.len());
        let stmt = Statement {
            op,
            reads: reads
                .iter()
                .map(|r| self.access(*r, &vars))
                .collect::<Result<_>>()?,
            write: self.access(value, &vars)?,
        };

        if inst.shape.is_empty() {
            self.emit_scalar(&reads, vec![stmt]);
        } else {
            self.open_group(&inst.shape, &reads).body.push(stmt);
        }
        Ok(())
    }

    fn lower_reduce(&mut self, value: ValueRef, op: ReduceOp, x: ValueRef) -> Result<()> {
        let x_shape = self.shape_of(x);
        let acc_buffer = self.accumulators.get(&value).copied().ok_or_else(|| {
            NestError::MalformedTrace(format!("reduction {value} has no accumulator"))
        })?;
        let acc = Access {
            buffer: acc_buffer,
            index: Index::scalar(),
        };
        let vars = self.loop_vars(x_shape.len());

        let init = Statement {
            op: StmtOp::Literal(op.identity()),
            reads: vec![],
            write: acc.clone(),
        };
        let accumulate = Statement {
            op: StmtOp::Accumulate(op),
            reads: vec![self.access(x, &vars)?],
            write: acc.clone(),
        };
        let finalize = Statement {
            op: StmtOp::Finalize {
                reduce: op,
                count: Expr::product(x_shape),
            },
            reads: vec![acc],
            write: self.access(value, &[])?,
        };

        if x_shape.is_empty() {
            self.emit_scalar(&[x], vec![init, accumulate, finalize]);
        } else {
            let group = self.open_group(x_shape, &[x]);
            group.pre.push(init);
            group.body.push(accumulate);
            group.post.push(finalize);
            group.finalized.insert(value);
        }
        Ok(())
    }

    fn copy_input_to_output(&mut self, input: usize) -> Result<()> {
        let value = ValueRef::Input(input);
        let shape = self.shape_of(value);
        let vars = self.loop_vars(shape.len());
        let stmt = Statement {
            op: StmtOp::Copy,
            reads: vec![self.access(value, &vars)?],
            write: self.access_buffer(self.output, shape, &vars)?,
        };
        if shape.is_empty() {
            self.emit_scalar(&[value], vec![stmt]);
        } else {
            self.open_group(shape, &[value]).body.push(stmt);
        }
        Ok(())
    }
}
