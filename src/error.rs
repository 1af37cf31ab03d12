//! Error type shared by every pipeline stage.

use std::fmt;

/// Pipeline stage that rejected an operation it has no rule for.
///
/// Tracing and lowering have a rule for every node kind and opcode, so only
/// differentiation can reject one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Differentiation,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::Differentiation => "differentiation",
        };
        f.write_str(name)
    }
}

/// Errors raised while building, differentiating, tracing, lowering, compiling
/// or invoking a computation.
#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum NestError {
    /// Operand shapes are incompatible.
    #[error("shape error: {0}")]
    Shape(String),

    /// Differentiation was requested for an output that is not a 0-d scalar.
    #[error("cannot differentiate a non-scalar output of shape {0:?}")]
    NonScalarOutput(Vec<usize>),

    /// An operation has no rule in the stage that encountered it.
    #[error("operation '{op}' is not supported during {stage}")]
    UnsupportedOp { stage: Stage, op: String },

    /// The target cannot realize the loop nest.
    #[error("compilation failed: {0}")]
    Compilation(String),

    /// The caller passed the wrong number of buffers or an unknown input name.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// A hand-built trace violates the single static assignment ordering.
    #[error("malformed trace: {0}")]
    MalformedTrace(String),
}

impl NestError {
    pub(crate) fn unsupported(stage: Stage, op: impl fmt::Display) -> Self {
        NestError::UnsupportedOp {
            stage,
            op: op.to_string(),
        }
    }
}

pub type Result<T> = std::result::Result<T, NestError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unsupported_op_message() {
        let err = NestError::unsupported(Stage::Differentiation, "reduce_max");
        assert_eq!(
            err.to_string(),
            "operation 'reduce_max' is not supported during differentiation"
        );
    }
}
