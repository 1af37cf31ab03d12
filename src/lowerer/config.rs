//! Lowering configuration

/// Parameters of the trace to loop-nest lowering.
#[derive(Debug, Clone)]
pub struct LoweringConfig {
    /// Let consecutive instructions over the same shape share one loop nest.
    ///
    /// With `false` every tensor instruction gets its own loops, which is
    /// handy when reading the rendered nest while debugging.
    pub fuse_loops: bool,

    /// Prefix of generated loop variables (`i0`, `i1`, ...).
    pub loop_var_prefix: String,
}

impl Default for LoweringConfig {
    fn default() -> Self {
        Self {
            fuse_loops: true,
            loop_var_prefix: "i".to_string(),
        }
    }
}

impl LoweringConfig {
    pub fn with_fuse_loops(mut self, fuse: bool) -> Self {
        self.fuse_loops = fuse;
        self
    }

    pub fn with_loop_var_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.loop_var_prefix = prefix.into();
        self
    }

    pub(crate) fn loop_var(&self, dim: usize) -> String {
        format!("{}{}", self.loop_var_prefix, dim)
    }
}
