//! Kernel compilation targets
//!
//! A [`Compiler`] turns a [`LoopNest`] into a [`Kernel`] that can be invoked
//! many times with concrete arrays. Two targets are provided:
//!
//! - [`InterpCompiler`] executes the loop nest directly and is always available.
//! - [`CCompiler`] renders the loop nest to C, builds a shared library with the
//!   system C compiler and loads it.

pub mod c;
pub mod interp;

use ndarray::ArrayD;

use crate::error::{NestError, Result};
use crate::lowerer::LoopNest;
use crate::shape::{Bindings, Expr, bind_dims};

pub use crate::shape::{resolve, resolve_shape};

pub use c::{CCompiler, CKernel, CRenderer};
pub use interp::{InterpCompiler, InterpKernel};

/// Deepest loop nest a compiler accepts unless configured otherwise.
pub const DEFAULT_MAX_RANK: usize = 8;

/// A compilation target for loop nests.
pub trait Compiler {
    type Kernel: Kernel;

    /// Whether the target can be used on this machine.
    fn is_available(&self) -> bool;

    fn compile(&self, nest: &LoopNest) -> Result<Self::Kernel>;
}

/// A compiled loop nest.
///
/// Kernels are immutable and allocate all scratch memory per call, so one
/// kernel can be shared between threads.
pub trait Kernel: Send + Sync {
    fn loop_nest(&self) -> &LoopNest;

    /// Runs the kernel on arrays given in input order.
    fn call(&self, inputs: &[&ArrayD<f32>]) -> Result<ArrayD<f32>>;
}

/// Rejects nests that fail validation or are deeper than `max_rank`.
pub(crate) fn check_compilable(nest: &LoopNest, max_rank: usize) -> Result<()> {
    nest.validate()?;
    let depth = nest.depth();
    let rank = nest.buffers.iter().map(|b| b.shape.len()).max().unwrap_or(0);
    if depth.max(rank) > max_rank {
        return Err(NestError::Compilation(format!(
            "loop nest of rank {} exceeds the maximum rank {max_rank}",
            depth.max(rank)
        )));
    }
    Ok(())
}

/// Binds the dimension variables of `nest` from the shapes of `inputs`.
///
/// Constant dimensions must match exactly, every variable must bind to one
/// value and all shape constraints must hold.
pub fn bind_shapes(nest: &LoopNest, inputs: &[&ArrayD<f32>]) -> Result<Bindings> {
    let declared: Vec<(&str, &[Expr])> = nest
        .inputs()
        .into_iter()
        .map(|(_, decl)| (decl.name.as_str(), decl.shape.as_slice()))
        .collect();
    let constraints = nest
        .constraints
        .iter()
        .map(|c| (c.lhs.as_slice(), c.rhs.as_slice()));
    bind_dims(&declared, constraints, inputs)
}
