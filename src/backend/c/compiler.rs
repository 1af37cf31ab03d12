use std::process::Command;
use std::sync::Arc;

use libloading::Library;
use log::{debug, info};

use crate::backend::{Compiler, DEFAULT_MAX_RANK, check_compilable};
use crate::error::{NestError, Result};
use crate::lowerer::LoopNest;

use super::kernel::{CKernel, KernelFn};
use super::{CRenderer, ENTRY_POINT};

fn lib_name() -> &'static str {
    if cfg!(target_os = "macos") {
        "kernel.dylib"
    } else {
        "kernel.so"
    }
}

/// Builds loop nests into shared libraries with the system C compiler.
#[derive(Debug, Clone)]
pub struct CCompiler {
    /// Compiler executable.
    pub cc: String,
    /// Extra flags, added after `-shared -fPIC`.
    pub flags: Vec<String>,
    pub max_rank: usize,
}

impl Default for CCompiler {
    fn default() -> Self {
        Self {
            cc: "cc".to_string(),
            flags: vec!["-O3".to_string()],
            max_rank: DEFAULT_MAX_RANK,
        }
    }
}

impl CCompiler {
    /// Default configuration with the compiler taken from `CC` when set.
    pub fn from_env() -> Self {
        let cc = std::env::var("CC").unwrap_or_else(|_| "cc".to_string());
        Self::default().with_cc(cc)
    }

    pub fn with_cc(mut self, cc: impl Into<String>) -> Self {
        self.cc = cc.into();
        self
    }

    pub fn with_flags<I, S>(mut self, flags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.flags = flags.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_max_rank(mut self, max_rank: usize) -> Self {
        self.max_rank = max_rank;
        self
    }
}

impl Compiler for CCompiler {
    type Kernel = CKernel;

    fn is_available(&self) -> bool {
        Command::new(&self.cc)
            .arg("--version")
            .output()
            .map(|output| output.status.success())
            .unwrap_or(false)
    }

    fn compile(&self, nest: &LoopNest) -> Result<CKernel> {
        check_compilable(nest, self.max_rank)?;
        let source = CRenderer::new().render(nest)?;

        let io_err = |what: &str, e: std::io::Error| NestError::Compilation(format!("{what}: {e}"));
        let dir = tempfile::Builder::new()
            .prefix("nestc")
            .tempdir()
            .map_err(|e| io_err("cannot create build directory", e))?;
        let source_path = dir.path().join("kernel.c");
        let lib_path = dir.path().join(lib_name());
        std::fs::write(&source_path, &source).map_err(|e| io_err("cannot write source", e))?;

        debug!(
            "Running compile command: {} -shared -fPIC {} -o {} {} -lm",
            self.cc,
            self.flags.join(" "),
            lib_path.display(),
            source_path.display()
        );
        let output = Command::new(&self.cc)
            .args(["-shared", "-fPIC"])
            .args(&self.flags)
            .arg("-o")
            .arg(&lib_path)
            .arg(&source_path)
            .arg("-lm")
            .output()
            .map_err(|e| io_err(&format!("cannot run '{}'", self.cc), e))?;
        if !output.status.success() {
            return Err(NestError::Compilation(format!(
                "{} failed with status {}:\n{}",
                self.cc,
                output.status,
                String::from_utf8_lossy(&output.stderr)
            )));
        }

        let library = unsafe { Library::new(&lib_path) }
            .map_err(|e| NestError::Compilation(format!("cannot load kernel library: {e}")))?;
        let func: KernelFn = unsafe {
            *library.get::<KernelFn>(ENTRY_POINT.as_bytes()).map_err(|e| {
                NestError::Compilation(format!("missing entry point '{ENTRY_POINT}': {e}"))
            })?
        };
        info!("Compiled C kernel {}", lib_path.display());

        Ok(CKernel::new(
            Arc::new(nest.clone()),
            source,
            func,
            Arc::new(library),
            dir,
        ))
    }
}
