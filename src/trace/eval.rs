//! Instruction-by-instruction execution of a trace with `ndarray`.
//!
//! Every instruction materializes its own array, so this is the traced
//! counterpart of [`crate::graph::evaluate`]: no loop fusion, no compilation.

use log::trace;
use ndarray::{ArrayD, IxDyn, Zip, arr0};

use crate::error::{NestError, Result};
use crate::shape::{Expr, bind_dims};

use super::{Opcode, Trace, ValueRef};

impl Trace {
    /// Runs the trace on arrays given in input order.
    ///
    /// Input shapes are checked against the declared ones the same way a
    /// compiled kernel checks them, so a trace recorded with
    /// `skip_specialization` accepts any consistent extents.
    pub fn evaluate(&self, inputs: &[&ArrayD<f32>]) -> Result<ArrayD<f32>> {
        self.validate()?;
        let declared: Vec<(&str, &[Expr])> = self
            .inputs
            .iter()
            .map(|input| (input.name.as_str(), input.shape.as_slice()))
            .collect();
        let constraints = self
            .constraints
            .iter()
            .map(|c| (c.lhs.as_slice(), c.rhs.as_slice()));
        bind_dims(&declared, constraints, inputs)?;

        let mut values: Vec<ArrayD<f32>> = Vec::with_capacity(self.instructions.len());
        for inst in &self.instructions {
            let value = {
                let operand = |k: usize| value_of(inputs, &values, inst.operands[k]);
                match &inst.opcode {
                    Opcode::Const(v) => arr0(*v).into_dyn(),
                    Opcode::Numel => arr0(operand(0).len() as f32).into_dyn(),
                    Opcode::Unary(op) => operand(0).mapv(|x| op.apply(x)),
                    Opcode::Binary(op) => {
                        let (a, b) = (operand(0), operand(1));
                        if a.shape() != b.shape() {
                            return Err(NestError::Shape(format!(
                                "{} of shapes {:?} and {:?}",
                                inst.opcode,
                                a.shape(),
                                b.shape()
                            )));
                        }
                        Zip::from(a).and(b).map_collect(|&a, &b| op.apply(a, b))
                    }
                    Opcode::Reduce(op) => {
                        let x = operand(0);
                        let acc = x.iter().fold(op.identity(), |acc, &v| op.accumulate(acc, v));
                        arr0(op.finalize(acc, x.len())).into_dyn()
                    }
                    Opcode::Expand => {
                        let s = operand(0).iter().next().copied().unwrap_or_default();
                        ArrayD::from_elem(IxDyn(operand(1).shape()), s)
                    }
                    Opcode::Custom(f) => operand(0).mapv(|x| f.eval(x)),
                }
            };
            trace!("{} = {} -> shape {:?}", inst.output, inst.opcode, value.shape());
            values.push(value);
        }

        Ok(match self.output {
            ValueRef::Input(i) => inputs[i].clone(),
            ValueRef::Value(j) => values.swap_remove(j),
        })
    }
}

fn value_of<'a>(
    inputs: &[&'a ArrayD<f32>],
    values: &'a [ArrayD<f32>],
    value: ValueRef,
) -> &'a ArrayD<f32> {
    match value {
        ValueRef::Input(i) => inputs[i],
        ValueRef::Value(j) => &values[j],
    }
}

#[cfg(test)]
mod tests {
    use crate::error::NestError;
    use crate::graph::{evaluate, input};
    use crate::trace::{TraceOptions, Tracer};
    use ndarray::{ArrayD, IxDyn, array};

    #[test]
    fn test_matches_graph_evaluation() {
        let x = input("x", [2, 3]);
        let f = x.sin().mul(&x.exp()).unwrap().mean();
        let dx = crate::grad::grad(&f, &x).unwrap();
        let trace = Tracer::default().trace(&dx).unwrap();

        let data = array![[0.1f32, -0.2, 0.3], [1.0, 0.5, -1.5]].into_dyn();
        let got = trace.evaluate(&[&data]).unwrap();
        let want = evaluate(&dx, &[("x", &data)]).unwrap();
        assert_eq!(got.shape(), want.shape());
        for (g, w) in got.iter().zip(want.iter()) {
            assert!((g - w).abs() < 1e-6);
        }
    }

    #[test]
    fn test_symbolic_trace_on_any_extent() {
        let x = input("x", [4]);
        let dx = crate::grad::grad(&x.sin().sum(), &x).unwrap();
        let trace = Tracer::new(TraceOptions::new().with_skip_specialization(true))
            .trace(&dx)
            .unwrap();

        for n in [1usize, 9] {
            let out = trace.evaluate(&[&ArrayD::zeros(IxDyn(&[n]))]).unwrap();
            assert_eq!(out.shape(), &[n]);
            assert!(out.iter().all(|&v| v == 1.0));
        }
    }

    #[test]
    fn test_rejects_mismatched_inputs() {
        let x = input("x", [3]);
        let trace = Tracer::default().trace(&x.exp().sum()).unwrap();
        let wrong = ArrayD::zeros(IxDyn(&[4]));
        assert!(matches!(trace.evaluate(&[&wrong]), Err(NestError::Shape(_))));
        assert!(matches!(trace.evaluate(&[]), Err(NestError::InvalidInput(_))));
    }
}
