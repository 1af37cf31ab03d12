//! Flat single-static-assignment traces
//!
//! A [`Trace`] is what remains of an expression graph once node identities are
//! gone: an ordered list of [`Instruction`]s whose operands are indices into
//! the declared inputs or into earlier instruction outputs.

mod eval;
mod tracer;

use std::fmt;

use crate::error::{NestError, Result};
use crate::graph::{BinaryOp, CustomFn, ReduceOp, UnaryOp};
use crate::shape::Expr;

pub use tracer::{TraceOptions, Tracer};

/// Reference to a value inside a trace.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ValueRef {
    /// The i-th declared input.
    Input(usize),
    /// The output of the i-th instruction.
    Value(usize),
}

impl fmt::Display for ValueRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ValueRef::Input(i) => write!(f, "%in{i}"),
            ValueRef::Value(i) => write!(f, "%{i}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Opcode {
    /// Scalar literal.
    Const(f32),
    /// Element count of the operand, kept symbolic.
    Numel,
    Unary(UnaryOp),
    Binary(BinaryOp),
    Reduce(ReduceOp),
    /// Broadcast of the scalar operand 0 to the shape of operand 1.
    Expand,
    Custom(CustomFn),
}

impl Opcode {
    pub fn arity(&self) -> usize {
        match self {
            Opcode::Const(_) => 0,
            Opcode::Numel | Opcode::Unary(_) | Opcode::Reduce(_) | Opcode::Custom(_) => 1,
            Opcode::Binary(_) | Opcode::Expand => 2,
        }
    }
}

impl fmt::Display for Opcode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Opcode::Const(v) => write!(f, "const {v}"),
            Opcode::Numel => f.write_str("numel"),
            Opcode::Unary(op) => f.write_str(op.name()),
            Opcode::Binary(op) => f.write_str(op.name()),
            Opcode::Reduce(op) => f.write_str(op.name()),
            Opcode::Expand => f.write_str("expand"),
            Opcode::Custom(op) => write!(f, "custom<{}>", op.name()),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Instruction {
    pub opcode: Opcode,
    pub operands: Vec<ValueRef>,
    pub output: ValueRef,
    pub shape: Vec<Expr>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TraceInput {
    pub name: String,
    pub shape: Vec<Expr>,
}

/// Two symbolic shapes that must be equal at run time.
///
/// Recorded when a binary operation combines values whose symbolic shapes are
/// spelled differently, e.g. dimensions of two distinct inputs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShapeConstraint {
    pub lhs: Vec<Expr>,
    pub rhs: Vec<Expr>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Trace {
    pub inputs: Vec<TraceInput>,
    pub instructions: Vec<Instruction>,
    pub output: ValueRef,
    pub constraints: Vec<ShapeConstraint>,
    /// Whether concrete extents were baked into shapes and constants.
    pub specialized: bool,
}

impl Trace {
    pub fn shape_of(&self, value: ValueRef) -> Option<&[Expr]> {
        match value {
            ValueRef::Input(i) => self.inputs.get(i).map(|input| input.shape.as_slice()),
            ValueRef::Value(i) => self.instructions.get(i).map(|inst| inst.shape.as_slice()),
        }
    }

    pub fn output_shape(&self) -> &[Expr] {
        self.shape_of(self.output).unwrap_or(&[])
    }

    /// Symbolic dimension variables in the order they appear in the inputs.
    pub fn dim_vars(&self) -> Vec<String> {
        let mut vars = Vec::new();
        for input in &self.inputs {
            for dim in &input.shape {
                dim.collect_variables(&mut vars);
            }
        }
        vars
    }

    fn has_constraint(&self, lhs: &[Expr], rhs: &[Expr]) -> bool {
        self.constraints.iter().any(|c| {
            (c.lhs == lhs && c.rhs == rhs) || (c.lhs == rhs && c.rhs == lhs)
        })
    }

    /// Checks SSA ordering, operand arity and shape rules.
    pub fn validate(&self) -> Result<()> {
        let malformed = |msg: String| Err(NestError::MalformedTrace(msg));

        for (i, inst) in self.instructions.iter().enumerate() {
            if inst.output != ValueRef::Value(i) {
                return malformed(format!(
                    "instruction {i} writes {} instead of %{i}",
                    inst.output
                ));
            }
            if inst.operands.len() != inst.opcode.arity() {
                return malformed(format!(
                    "instruction {i} ({}) has {} operands, expected {}",
                    inst.opcode,
                    inst.operands.len(),
                    inst.opcode.arity()
                ));
            }
            let mut shapes = Vec::with_capacity(inst.operands.len());
            for operand in &inst.operands {
                let defined = match operand {
                    ValueRef::Input(k) => *k < self.inputs.len(),
                    ValueRef::Value(j) => *j < i,
                };
                if !defined {
                    return malformed(format!(
                        "instruction {i} uses {operand} before it is defined"
                    ));
                }
                shapes.push(self.shape_of(*operand).unwrap_or(&[]));
            }

            let shape_ok = match &inst.opcode {
                Opcode::Const(_) | Opcode::Numel | Opcode::Reduce(_) => inst.shape.is_empty(),
                Opcode::Unary(_) | Opcode::Custom(_) => inst.shape == shapes[0],
                Opcode::Binary(_) => {
                    inst.shape == shapes[0]
                        && (shapes[0] == shapes[1] || self.has_constraint(shapes[0], shapes[1]))
                }
                Opcode::Expand => shapes[0].is_empty() && inst.shape == shapes[1],
            };
            if !shape_ok {
                return malformed(format!(
                    "instruction {i} ({}) has inconsistent shapes",
                    inst.opcode
                ));
            }
        }

        let output_defined = match self.output {
            ValueRef::Input(k) => k < self.inputs.len(),
            ValueRef::Value(j) => j < self.instructions.len(),
        };
        if !output_defined {
            return malformed(format!("output {} is not defined", self.output));
        }
        Ok(())
    }
}

fn fmt_shape(shape: &[Expr]) -> String {
    let dims: Vec<String> = shape.iter().map(|d| d.to_string()).collect();
    format!("[{}]", dims.join(", "))
}

impl fmt::Display for Trace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let params: Vec<String> = self
            .inputs
            .iter()
            .map(|input| format!("{}: f32{}", input.name, fmt_shape(&input.shape)))
            .collect();
        writeln!(f, "trace({}) {{", params.join(", "))?;

        let name_of = |r: &ValueRef| match r {
            ValueRef::Input(i) => self
                .inputs
                .get(*i)
                .map(|input| input.name.clone())
                .unwrap_or_else(|| r.to_string()),
            ValueRef::Value(_) => r.to_string(),
        };

        for constraint in &self.constraints {
            writeln!(
                f,
                "  assume {} == {}",
                fmt_shape(&constraint.lhs),
                fmt_shape(&constraint.rhs)
            )?;
        }
        for inst in &self.instructions {
            let operands: Vec<String> = inst.operands.iter().map(name_of).collect();
            writeln!(
                f,
                "  {} = {}({}) : {}",
                inst.output,
                inst.opcode,
                operands.join(", "),
                fmt_shape(&inst.shape)
            )?;
        }
        writeln!(f, "  return {}", name_of(&self.output))?;
        write!(f, "}}")
    }
}
