//! nestc: a function-tracing and kernel-lowering micro-compiler
//!
//! nestc builds numeric expression graphs over shaped `f32` inputs,
//! differentiates them symbolically and compiles them into loop-nest kernels.
//!
//! # Architecture
//!
//! - **graph**: immutable expression DAG and a reference evaluator
//! - **grad**: reverse-mode differentiation producing new graphs
//! - **trace**: flattening a graph into a single-static-assignment trace
//! - **lowerer**: turning a trace into an explicit loop nest
//! - **backend**: interpreter and C targets producing callable kernels
//! - **shape**: symbolic extents shared by traces and loop nests
//!
//! # Example
//!
//! ```
//! use nestc::prelude::*;
//! use ndarray::{ArrayD, IxDyn};
//!
//! let x = input("x", [8]);
//! let f = x.sin().sum();
//! let dx = nestc::grad(&f, &x).unwrap();
//!
//! let kernel = Pipeline::new()
//!     .with_skip_specialization(true)
//!     .compile(&dx)
//!     .unwrap();
//! let out = kernel.call(&[&ArrayD::zeros(IxDyn(&[3]))]).unwrap();
//! assert_eq!(out.shape(), &[3]);
//! ```

// ============================================================================
// Core Modules
// ============================================================================

pub mod backend;
pub mod error;
pub mod grad;
pub mod graph;
pub mod lowerer;
pub mod pipeline;
pub mod shape;
pub mod trace;

// ============================================================================
// Re-exports
// ============================================================================

pub use backend::{Compiler, Kernel};
pub use error::{NestError, Result, Stage};
pub use graph::GraphNode;
pub use pipeline::{
    Pipeline, compile, compile_trace, grad, jit, lower, make_loop_nest, trace,
};

/// Installs `env_logger` as the `log` backend, honouring `RUST_LOG`.
///
/// Safe to call more than once.
pub fn init_logger() {
    let _ = env_logger::builder().try_init();
}

// ============================================================================
// Prelude
// ============================================================================

/// Prelude module with commonly used types and traits
pub mod prelude {
    pub use crate::backend::{CCompiler, Compiler, InterpCompiler, Kernel};
    pub use crate::error::{NestError, Result};
    pub use crate::grad::Differentiable;
    pub use crate::graph::{GraphNode, constant, evaluate, input};
    pub use crate::lowerer::{LoopNest, LoweringConfig};
    pub use crate::pipeline::Pipeline;
    pub use crate::shape::Expr;
    pub use crate::trace::{Trace, TraceOptions};
}
