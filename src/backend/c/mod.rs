//! C backend
//!
//! Loop nests are rendered to C by [`CRenderer`], built into a shared library
//! by [`CCompiler`] and invoked through [`CKernel`].

pub mod compiler;
pub mod kernel;
pub mod renderer;

pub use compiler::CCompiler;
pub use kernel::CKernel;
pub use renderer::CRenderer;

/// Name of the function every rendered translation unit exports.
pub const ENTRY_POINT: &str = "kernel_main";
