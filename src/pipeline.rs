//! Caller-facing entry points chaining the stages together.
//!
//! ```text
//! GraphNode --grad--> GraphNode --trace--> Trace --lower--> LoopNest --compile--> Kernel
//! ```
//!
//! The free functions use the default configuration of every stage and the
//! interpreter target. [`Pipeline`] binds trace options, a lowering
//! configuration and any [`Compiler`] together.

use log::debug;

use crate::backend::{Compiler, InterpCompiler, InterpKernel};
use crate::error::Result;
use crate::graph::GraphNode;
use crate::lowerer::{LoopNest, Lowerer, LoweringConfig};
use crate::trace::{Trace, TraceOptions, Tracer};

/// Gradient of the scalar `output` with respect to `wrt`.
pub fn grad(output: &GraphNode, wrt: &GraphNode) -> Result<GraphNode> {
    crate::grad::grad(output, wrt)
}

pub fn trace(output: &GraphNode, options: &TraceOptions) -> Result<Trace> {
    Tracer::new(options.clone()).trace(output)
}

pub fn lower(trace: &Trace, config: &LoweringConfig) -> Result<LoopNest> {
    Lowerer::new(config.clone()).lower(trace)
}

/// Compiles a loop nest with the interpreter target.
pub fn compile(nest: &LoopNest) -> Result<InterpKernel> {
    InterpCompiler::default().compile(nest)
}

/// Lowers and compiles an existing trace with the interpreter target.
pub fn compile_trace(trace: &Trace) -> Result<InterpKernel> {
    compile(&lower(trace, &LoweringConfig::default())?)
}

/// Traces and lowers `output` without compiling it.
pub fn make_loop_nest(output: &GraphNode, options: &TraceOptions) -> Result<LoopNest> {
    lower(&trace(output, options)?, &LoweringConfig::default())
}

/// Traces, lowers and compiles `output` in one step.
///
/// # Example
///
/// ```
/// use nestc::backend::Kernel;
/// use nestc::graph::input;
/// use nestc::trace::TraceOptions;
/// use ndarray::{ArrayD, IxDyn};
///
/// let x = input("x", [100]);
/// let f = x.sin().sum();
/// let dx = nestc::grad(&f, &x).unwrap();
///
/// let options = TraceOptions::new().with_skip_specialization(true);
/// let kernel = nestc::jit(&dx, &options).unwrap();
///
/// let out = kernel.call(&[&ArrayD::zeros(IxDyn(&[100]))]).unwrap();
/// assert!(out.iter().all(|&v| v == 1.0));
/// ```
pub fn jit(output: &GraphNode, options: &TraceOptions) -> Result<InterpKernel> {
    compile(&make_loop_nest(output, options)?)
}

/// Trace options, lowering configuration and a compilation target.
#[derive(Debug, Clone, Default)]
pub struct Pipeline<C: Compiler = InterpCompiler> {
    pub trace_options: TraceOptions,
    pub lowering: LoweringConfig,
    pub compiler: C,
}

impl Pipeline<InterpCompiler> {
    pub fn new() -> Self {
        Self::default()
    }
}

impl<C: Compiler> Pipeline<C> {
    /// Same stages, different target.
    pub fn with_compiler<D: Compiler>(self, compiler: D) -> Pipeline<D> {
        Pipeline {
            trace_options: self.trace_options,
            lowering: self.lowering,
            compiler,
        }
    }

    pub fn with_trace_options(mut self, options: TraceOptions) -> Self {
        self.trace_options = options;
        self
    }

    pub fn with_lowering_config(mut self, config: LoweringConfig) -> Self {
        self.lowering = config;
        self
    }

    pub fn with_skip_specialization(mut self, skip: bool) -> Self {
        self.trace_options.skip_specialization = skip;
        self
    }

    pub fn trace(&self, output: &GraphNode) -> Result<Trace> {
        trace(output, &self.trace_options)
    }

    pub fn lower(&self, output: &GraphNode) -> Result<LoopNest> {
        lower(&self.trace(output)?, &self.lowering)
    }

    pub fn compile(&self, output: &GraphNode) -> Result<C::Kernel> {
        self.compile_trace(&self.trace(output)?)
    }

    /// Lowers and compiles a trace recorded elsewhere, skipping the tracer.
    pub fn compile_trace(&self, trace: &Trace) -> Result<C::Kernel> {
        let nest = lower(trace, &self.lowering)?;
        debug!(
            "Compiling loop nest with {} buffers and {} loops",
            nest.buffers.len(),
            nest.count_loops()
        );
        self.compiler.compile(&nest)
    }

    /// Compiles the gradient of `output` with respect to `wrt`.
    pub fn compile_grad(&self, output: &GraphNode, wrt: &GraphNode) -> Result<C::Kernel> {
        self.compile(&grad(output, wrt)?)
    }
}
