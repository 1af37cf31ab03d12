//! Loop-nest interpreter
//!
//! Every call resolves the symbolic extents and strides of the nest against
//! the bound dimension variables, then walks the loops.

use std::sync::Arc;

use log::trace;
use ndarray::{ArrayD, CowArray, IxDyn};
use rustc_hash::FxHashMap;

use crate::error::{NestError, Result};
use crate::lowerer::{Access, BufferKind, LoopNest, LoopNode, StmtOp};

use super::{Compiler, DEFAULT_MAX_RANK, Kernel, bind_shapes, check_compilable, resolve};

/// Compiles loop nests into [`InterpKernel`]s.
#[derive(Debug, Clone)]
pub struct InterpCompiler {
    pub max_rank: usize,
}

impl Default for InterpCompiler {
    fn default() -> Self {
        Self {
            max_rank: DEFAULT_MAX_RANK,
        }
    }
}

impl InterpCompiler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_max_rank(mut self, max_rank: usize) -> Self {
        self.max_rank = max_rank;
        self
    }
}

impl Compiler for InterpCompiler {
    type Kernel = InterpKernel;

    fn is_available(&self) -> bool {
        true
    }

    fn compile(&self, nest: &LoopNest) -> Result<InterpKernel> {
        check_compilable(nest, self.max_rank)?;
        Ok(InterpKernel {
            nest: Arc::new(nest.clone()),
        })
    }
}

/// A loop nest executed by walking it.
#[derive(Debug, Clone)]
pub struct InterpKernel {
    nest: Arc<LoopNest>,
}

impl Kernel for InterpKernel {
    fn loop_nest(&self) -> &LoopNest {
        &self.nest
    }

    fn call(&self, inputs: &[&ArrayD<f32>]) -> Result<ArrayD<f32>> {
        let vars = bind_shapes(&self.nest, inputs)?;
        let program = Program::resolve(&self.nest, &vars)?;

        let standard: Vec<CowArray<'_, f32, IxDyn>> =
            inputs.iter().map(|a| a.as_standard_layout()).collect();
        let mut memory = Memory::new(&self.nest, &program, &standard)?;

        let mut idx = vec![0usize; program.num_slots];
        run(&program.body, &mut idx, &mut memory)?;

        let output = std::mem::take(&mut memory.owned[self.nest.output]);
        ArrayD::from_shape_vec(IxDyn(&program.shapes[self.nest.output]), output)
            .map_err(|e| NestError::Shape(e.to_string()))
    }
}

/// A loop nest with every extent and stride resolved to a number.
struct Program<'n> {
    body: Vec<Node<'n>>,
    shapes: Vec<Vec<usize>>,
    num_slots: usize,
}

enum Node<'n> {
    Loop {
        slot: usize,
        extent: usize,
        body: Vec<Node<'n>>,
    },
    Stmt(Stmt<'n>),
}

struct Stmt<'n> {
    op: &'n StmtOp,
    /// Pre-evaluated `Extent` or `Finalize` count.
    count: usize,
    reads: Vec<Slot>,
    write: Slot,
}

/// Buffer plus `(loop slot, stride)` terms.
struct Slot {
    buffer: usize,
    terms: Vec<(usize, usize)>,
}

impl Slot {
    fn offset(&self, idx: &[usize]) -> usize {
        self.terms.iter().map(|&(slot, stride)| idx[slot] * stride).sum()
    }
}

impl<'n> Program<'n> {
    fn resolve(nest: &'n LoopNest, vars: &FxHashMap<String, i64>) -> Result<Self> {
        let shapes = nest
            .buffers
            .iter()
            .map(|b| super::resolve_shape(&b.shape, vars))
            .collect::<Result<Vec<_>>>()?;
        let mut slots: FxHashMap<&'n str, usize> = FxHashMap::default();
        let body = resolve_nodes(&nest.body, vars, &mut slots)?;
        Ok(Self {
            body,
            shapes,
            num_slots: slots.len(),
        })
    }
}

fn resolve_nodes<'n>(
    nodes: &'n [LoopNode],
    vars: &FxHashMap<String, i64>,
    slots: &mut FxHashMap<&'n str, usize>,
) -> Result<Vec<Node<'n>>> {
    let mut out = Vec::with_capacity(nodes.len());
    for node in nodes {
        match node {
            LoopNode::Loop { var, extent, body } => {
                let next = slots.len();
                let slot = *slots.entry(var.as_str()).or_insert(next);
                out.push(Node::Loop {
                    slot,
                    extent: resolve(extent, vars)?,
                    body: resolve_nodes(body, vars, slots)?,
                });
            }
            LoopNode::Stmt(stmt) => {
                let count = match &stmt.op {
                    StmtOp::Extent(e) => resolve(e, vars)?,
                    StmtOp::Finalize { count, .. } => resolve(count, vars)?,
                    _ => 0,
                };
                let slot_of = |access: &'n Access| -> Result<Slot> {
                    let terms = access
                        .index
                        .terms
                        .iter()
                        .map(|(var, stride)| -> Result<(usize, usize)> {
                            let slot = slots.get(var.as_str()).copied().ok_or_else(|| {
                                NestError::Compilation(format!("unbound loop variable '{var}'"))
                            })?;
                            Ok((slot, resolve(stride, vars)?))
                        })
                        .collect::<Result<_>>()?;
                    Ok(Slot {
                        buffer: access.buffer,
                        terms,
                    })
                };
                out.push(Node::Stmt(Stmt {
                    op: &stmt.op,
                    count,
                    reads: stmt.reads.iter().map(&slot_of).collect::<Result<_>>()?,
                    write: slot_of(&stmt.write)?,
                }));
            }
        }
    }
    Ok(out)
}

/// Input slices plus one owned vector per non-input buffer.
struct Memory<'a> {
    inputs: Vec<Option<&'a [f32]>>,
    owned: Vec<Vec<f32>>,
}

impl<'a> Memory<'a> {
    fn new(
        nest: &LoopNest,
        program: &Program<'_>,
        standard: &'a [CowArray<'_, f32, IxDyn>],
    ) -> Result<Self> {
        let mut inputs = Vec::with_capacity(nest.buffers.len());
        let mut owned = Vec::with_capacity(nest.buffers.len());
        for (buf, shape) in nest.buffers.iter().zip(&program.shapes) {
            match buf.kind {
                BufferKind::Input(pos) => {
                    let slice = standard.get(pos).and_then(|a| a.as_slice()).ok_or_else(|| {
                        NestError::InvalidInput(format!("input '{}' is not contiguous", buf.name))
                    })?;
                    inputs.push(Some(slice));
                    owned.push(Vec::new());
                }
                _ => {
                    inputs.push(None);
                    owned.push(vec![0.0; shape.iter().product()]);
                }
            }
        }
        trace!("allocated {} scratch buffers", owned.iter().filter(|b| !b.is_empty()).count());
        Ok(Self { inputs, owned })
    }

    fn read(&self, slot: &Slot, idx: &[usize]) -> Result<f32> {
        let offset = slot.offset(idx);
        let value = match self.inputs[slot.buffer] {
            Some(data) => data.get(offset),
            None => self.owned[slot.buffer].get(offset),
        };
        value
            .copied()
            .ok_or_else(|| NestError::Shape(format!("read out of bounds at offset {offset}")))
    }

    fn write(&mut self, slot: &Slot, idx: &[usize], value: f32) -> Result<()> {
        let offset = slot.offset(idx);
        let cell = self.owned[slot.buffer]
            .get_mut(offset)
            .ok_or_else(|| NestError::Shape(format!("write out of bounds at offset {offset}")))?;
        *cell = value;
        Ok(())
    }
}

fn run(nodes: &[Node<'_>], idx: &mut [usize], memory: &mut Memory<'_>) -> Result<()> {
    for node in nodes {
        match node {
            Node::Loop { slot, extent, body } => {
                for i in 0..*extent {
                    idx[*slot] = i;
                    run(body, idx, memory)?;
                }
            }
            Node::Stmt(stmt) => {
                let arg = |k: usize| memory.read(&stmt.reads[k], idx);
                let value = match stmt.op {
                    StmtOp::Literal(v) => *v,
                    StmtOp::Extent(_) => stmt.count as f32,
                    StmtOp::Unary(op) => op.apply(arg(0)?),
                    StmtOp::Binary(op) => op.apply(arg(0)?, arg(1)?),
                    StmtOp::Copy => arg(0)?,
                    StmtOp::Accumulate(op) => {
                        op.accumulate(memory.read(&stmt.write, idx)?, arg(0)?)
                    }
                    StmtOp::Finalize { reduce, .. } => {
                        reduce.finalize(arg(0)?, stmt.count)
                    }
                    StmtOp::Custom(f) => f.eval(arg(0)?),
                };
                memory.write(&stmt.write, idx, value)?;
            }
        }
    }
    Ok(())
}
