use std::fmt;
use std::sync::Arc;

use libloading::Library;
use ndarray::{ArrayD, CowArray, IxDyn};
use tempfile::TempDir;

use crate::backend::{Kernel, bind_shapes, resolve_shape};
use crate::error::{NestError, Result};
use crate::lowerer::LoopNest;

/// `void kernel_main(const float** inputs, float* output, const long long* dims)`
pub(crate) type KernelFn = unsafe extern "C" fn(*const *const f32, *mut f32, *const i64);

/// A loop nest compiled to native code.
///
/// Holds the loaded library for as long as the function pointer is reachable,
/// and the build directory until the kernel is dropped.
pub struct CKernel {
    nest: Arc<LoopNest>,
    source: String,
    func: KernelFn,
    _library: Arc<Library>,
    _dir: TempDir,
}

impl CKernel {
    pub(crate) fn new(
        nest: Arc<LoopNest>,
        source: String,
        func: KernelFn,
        library: Arc<Library>,
        dir: TempDir,
    ) -> Self {
        Self {
            nest,
            source,
            func,
            _library: library,
            _dir: dir,
        }
    }

    /// The rendered C source.
    pub fn source(&self) -> &str {
        &self.source
    }
}

impl Kernel for CKernel {
    fn loop_nest(&self) -> &LoopNest {
        &self.nest
    }

    fn call(&self, inputs: &[&ArrayD<f32>]) -> Result<ArrayD<f32>> {
        let vars = bind_shapes(&self.nest, inputs)?;
        let dims: Vec<i64> = self
            .nest
            .dims
            .iter()
            .map(|name| {
                vars.get(name).copied().ok_or_else(|| {
                    NestError::InvalidInput(format!("dimension '{name}' is not bound by any input"))
                })
            })
            .collect::<Result<_>>()?;

        let standard: Vec<CowArray<'_, f32, IxDyn>> =
            inputs.iter().map(|a| a.as_standard_layout()).collect();
        let pointers: Vec<*const f32> = standard.iter().map(|a| a.as_ptr()).collect();

        let out_shape = resolve_shape(self.nest.output_shape(), &vars)?;
        let mut output = vec![0.0f32; out_shape.iter().product::<usize>().max(1)];

        // SAFETY: inputs match the declared shapes after binding, and every
        // buffer the kernel touches is sized from the same extents.
        unsafe {
            (self.func)(pointers.as_ptr(), output.as_mut_ptr(), dims.as_ptr());
        }

        output.truncate(out_shape.iter().product());
        ArrayD::from_shape_vec(IxDyn(&out_shape), output)
            .map_err(|e| NestError::Shape(e.to_string()))
    }
}

impl fmt::Debug for CKernel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CKernel")
            .field("buffers", &self.nest.buffers.len())
            .field("dims", &self.nest.dims)
            .field("build_dir", &self._dir.path())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{CCompiler, Compiler};
    use crate::graph::{GraphNode, evaluate, input};
    use crate::lowerer::Lowerer;
    use crate::trace::{TraceOptions, Tracer};
    use ndarray::array;

    fn compile(f: &GraphNode, skip_specialization: bool) -> Option<CKernel> {
        let _ = env_logger::builder().is_test(true).try_init();
        let compiler = CCompiler::from_env();
        if !compiler.is_available() {
            eprintln!("Skipping: no C compiler available");
            return None;
        }
        let options = TraceOptions::new().with_skip_specialization(skip_specialization);
        let trace = Tracer::new(options).trace(f).unwrap();
        let nest = Lowerer::default().lower(&trace).unwrap();
        Some(compiler.compile(&nest).unwrap())
    }

    #[test]
    fn test_c_kernel_matches_reference() {
        let x = input("x", [2, 3]);
        let f = x.sin().mul(&x).unwrap().mean();
        let Some(kernel) = compile(&f, false) else {
            return;
        };

        let data = array![[0.1f32, 0.2, 0.3], [1.0, 2.0, 3.0]].into_dyn();
        let got = kernel.call(&[&data]).unwrap();
        let want = evaluate(&f, &[("x", &data)]).unwrap();
        assert!((got[[]] - want[[]]).abs() < 1e-5);
    }

    #[test]
    fn test_c_kernel_symbolic_extents() {
        let x = input("x", [4]);
        let dx = crate::grad::grad(&x.sin().sum(), &x).unwrap();
        let Some(kernel) = compile(&dx, true) else {
            return;
        };

        for n in [1usize, 7, 64] {
            let zeros = ArrayD::<f32>::zeros(IxDyn(&[n]));
            let out = kernel.call(&[&zeros]).unwrap();
            assert_eq!(out.shape(), &[n]);
            assert!(out.iter().all(|&v| (v - 1.0).abs() < 1e-6));
        }
    }

    #[test]
    fn test_c_compile_failure_is_reported() {
        let x = input("x", [4]);
        let trace = Tracer::default().trace(&x.sum()).unwrap();
        let nest = Lowerer::default().lower(&trace).unwrap();
        let compiler = CCompiler::default().with_cc("nestc-no-such-compiler");
        assert!(!compiler.is_available());
        assert!(matches!(
            compiler.compile(&nest),
            Err(NestError::Compilation(_))
        ));
    }
}
