use log::{debug, trace};
use rustc_hash::{FxHashMap, FxHashSet};

use crate::error::{NestError, Result};
use crate::graph::{GraphNode, NodeOp, topological_sort};
use crate::shape::Expr;

use super::{Instruction, Opcode, ShapeConstraint, Trace, TraceInput, ValueRef};

/// Options controlling how a graph is traced.
#[derive(Debug, Clone, Default)]
pub struct TraceOptions {
    /// Keep input dimensions symbolic instead of baking in the extents.
    pub skip_specialization: bool,
    /// Concrete shapes overriding the ones the inputs were declared with.
    pub input_shapes: FxHashMap<String, Vec<usize>>,
}

impl TraceOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_skip_specialization(mut self, skip: bool) -> Self {
        self.skip_specialization = skip;
        self
    }

    pub fn with_input_shape(mut self, name: impl Into<String>, shape: impl Into<Vec<usize>>) -> Self {
        self.input_shapes.insert(name.into(), shape.into());
        self
    }
}

/// Turns an expression graph into a [`Trace`].
#[derive(Debug, Clone, Default)]
pub struct Tracer {
    options: TraceOptions,
}

impl Tracer {
    pub fn new(options: TraceOptions) -> Self {
        Self { options }
    }

    pub fn options(&self) -> &TraceOptions {
        &self.options
    }

    pub fn trace(&self, output: &GraphNode) -> Result<Trace> {
        let mut state = TraceState::new(&self.options);

        for node in topological_sort(std::slice::from_ref(output)) {
            let value = state.emit(&node)?;
            state.memo.insert(node, value);
        }

        let unknown: Vec<&String> = self
            .options
            .input_shapes
            .keys()
            .filter(|name| !state.input_index.contains_key(*name))
            .collect();
        if !unknown.is_empty() {
            return Err(NestError::Shape(format!(
                "shape override for unknown input(s) {unknown:?}"
            )));
        }

        let output_ref = state.memo[output];
        let trace = Trace {
            inputs: state.inputs,
            instructions: state.instructions,
            output: output_ref,
            constraints: state.constraints,
            specialized: !self.options.skip_specialization,
        };

        debug!(
            "Traced {} instructions over {} inputs (specialized = {}, {} shape constraints)",
            trace.instructions.len(),
            trace.inputs.len(),
            trace.specialized,
            trace.constraints.len()
        );
        trace!("{trace}");
        Ok(trace)
    }
}

struct TraceState<'a> {
    options: &'a TraceOptions,
    memo: FxHashMap<GraphNode, ValueRef>,
    inputs: Vec<TraceInput>,
    instructions: Vec<Instruction>,
    constraints: Vec<ShapeConstraint>,
    /// Input name -> (index, shape the first node was declared with).
    input_index: FxHashMap<String, (usize, Vec<usize>)>,
    /// Concrete shape of every traced value, after overrides.
    concrete: FxHashMap<ValueRef, Vec<usize>>,
    seen_constraints: FxHashSet<(Vec<Expr>, Vec<Expr>)>,
}

impl<'a> TraceState<'a> {
    fn new(options: &'a TraceOptions) -> Self {
        Self {
            options,
            memo: FxHashMap::default(),
            inputs: Vec::new(),
            instructions: Vec::new(),
            constraints: Vec::new(),
            input_index: FxHashMap::default(),
            concrete: FxHashMap::default(),
            seen_constraints: FxHashSet::default(),
        }
    }

    fn operand(&self, node: &GraphNode, i: usize) -> ValueRef {
        self.memo[&node.sources()[i]]
    }

    fn symbolic(&self, value: ValueRef) -> &[Expr] {
        match value {
            ValueRef::Input(i) => &self.inputs[i].shape,
            ValueRef::Value(i) => &self.instructions[i].shape,
        }
    }

    fn concrete(&self, value: ValueRef) -> &[usize] {
        self.concrete.get(&value).map(Vec::as_slice).unwrap_or(&[])
    }

    fn push(
        &mut self,
        opcode: Opcode,
        operands: Vec<ValueRef>,
        shape: Vec<Expr>,
        concrete: Vec<usize>,
    ) -> ValueRef {
        let output = ValueRef::Value(self.instructions.len());
        self.instructions.push(Instruction {
            opcode,
            operands,
            output,
            shape,
        });
        self.concrete.insert(output, concrete);
        output
    }

    fn declare_input(&mut self, name: &str, declared: &[usize]) -> Result<ValueRef> {
        if let Some((index, first)) = self.input_index.get(name) {
            if first.as_slice() != declared {
                return Err(NestError::Shape(format!(
                    "input '{name}' is used with shapes {first:?} and {declared:?}"
                )));
            }
            return Ok(ValueRef::Input(*index));
        }

        let concrete = self
            .options
            .input_shapes
            .get(name)
            .cloned()
            .unwrap_or_else(|| declared.to_vec());
        let shape = if self.options.skip_specialization {
            (0..concrete.len())
                .map(|axis| Expr::var(format!("{name}_dim{axis}")))
                .collect()
        } else {
            concrete.iter().map(|&d| Expr::from(d)).collect()
        };

        let index = self.inputs.len();
        self.inputs.push(TraceInput {
            name: name.to_string(),
            shape,
        });
        self.input_index
            .insert(name.to_string(), (index, declared.to_vec()));
        let value = ValueRef::Input(index);
        self.concrete.insert(value, concrete);
        Ok(value)
    }

    fn emit(&mut self, node: &GraphNode) -> Result<ValueRef> {
        let value = match node.op() {
            NodeOp::Input { name } => self.declare_input(name, node.shape())?,

            NodeOp::Constant(v) => self.push(Opcode::Const(*v), vec![], vec![], vec![]),

            NodeOp::Numel => {
                let x = self.operand(node, 0);
                if self.options.skip_specialization {
                    self.push(Opcode::Numel, vec![x], vec![], vec![])
                } else {
                    let count: usize = self.concrete(x).iter().product();
                    self.push(Opcode::Const(count as f32), vec![], vec![], vec![])
                }
            }

            NodeOp::Unary(op) => {
                let x = self.operand(node, 0);
                let shape = self.symbolic(x).to_vec();
                let concrete = self.concrete(x).to_vec();
                self.push(Opcode::Unary(*op), vec![x], shape, concrete)
            }

            NodeOp::Custom(f) => {
                let x = self.operand(node, 0);
                let shape = self.symbolic(x).to_vec();
                let concrete = self.concrete(x).to_vec();
                self.push(Opcode::Custom(f.clone()), vec![x], shape, concrete)
            }

            NodeOp::Binary(op) => {
                let (a, b) = (self.operand(node, 0), self.operand(node, 1));
                if self.concrete(a) != self.concrete(b) {
                    return Err(NestError::Shape(format!(
                        "{} of shapes {:?} and {:?}",
                        op.name(),
                        self.concrete(a),
                        self.concrete(b)
                    )));
                }
                let lhs = self.symbolic(a).to_vec();
                let rhs = self.symbolic(b).to_vec();
                if lhs != rhs && self.seen_constraints.insert((lhs.clone(), rhs.clone())) {
                    trace!("assuming {lhs:?} == {rhs:?} for {}", op.name());
                    self.constraints.push(ShapeConstraint {
                        lhs: lhs.clone(),
                        rhs,
                    });
                }
                let concrete = self.concrete(a).to_vec();
                self.push(Opcode::Binary(*op), vec![a, b], lhs, concrete)
            }

            NodeOp::Reduce(op) => {
                let x = self.operand(node, 0);
                self.push(Opcode::Reduce(*op), vec![x], vec![], vec![])
            }

            NodeOp::Expand => {
                let (s, like) = (self.operand(node, 0), self.operand(node, 1));
                if !self.concrete(s).is_empty() {
                    return Err(NestError::Shape(format!(
                        "expand of non-scalar shape {:?}",
                        self.concrete(s)
                    )));
                }
                let shape = self.symbolic(like).to_vec();
                let concrete = self.concrete(like).to_vec();
                self.push(Opcode::Expand, vec![s, like], shape, concrete)
            }
        };
        Ok(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::{constant, input};

    fn specialized() -> Tracer {
        Tracer::new(TraceOptions::new())
    }

    fn symbolic() -> Tracer {
        Tracer::new(TraceOptions::new().with_skip_specialization(true))
    }

    #[test]
    fn test_trace_sum_sin() {
        let x = input("x", [4]);
        let trace = specialized().trace(&x.sin().sum()).unwrap();

        assert_eq!(trace.inputs.len(), 1);
        assert_eq!(trace.inputs[0].shape, vec![Expr::Const(4)]);
        assert_eq!(trace.instructions.len(), 2);
        assert_eq!(trace.output, ValueRef::Value(1));
        assert!(trace.specialized);
        assert!(trace.validate().is_ok());
    }

    #[test]
    fn test_shared_node_emitted_once() {
        let x = input("x", [4]);
        let s = x.sin();
        let f = s.mul(&s).unwrap().sum();
        let trace = specialized().trace(&f).unwrap();

        let sins = trace
            .instructions
            .iter()
            .filter(|inst| inst.opcode == Opcode::Unary(crate::graph::UnaryOp::Sin))
            .count();
        assert_eq!(sins, 1);
        assert_eq!(trace.instructions[1].operands, vec![ValueRef::Value(0); 2]);
    }

    #[test]
    fn test_inputs_with_same_name_share_declaration() {
        let a = input("x", [3]);
        let b = input("x", [3]);
        let trace = specialized().trace(&a.add(&b).unwrap().sum()).unwrap();
        assert_eq!(trace.inputs.len(), 1);
        assert_eq!(
            trace.instructions[0].operands,
            vec![ValueRef::Input(0), ValueRef::Input(0)]
        );
    }

    #[test]
    fn test_same_name_different_shape() {
        let a = input("x", [3]);
        let b = input("x", [4]);
        let f = a.sum().add(&b.sum()).unwrap();
        let err = specialized().trace(&f).unwrap_err();
        assert!(matches!(err, NestError::Shape(_)));
    }

    #[test]
    fn test_skip_specialization_keeps_dims_symbolic() {
        let x = input("x", [4, 2]);
        let trace = symbolic().trace(&x.exp().mean()).unwrap();

        assert!(!trace.specialized);
        assert_eq!(
            trace.inputs[0].shape,
            vec![Expr::var("x_dim0"), Expr::var("x_dim1")]
        );
        assert_eq!(trace.instructions[0].shape, trace.inputs[0].shape);
        assert_eq!(trace.dim_vars(), vec!["x_dim0", "x_dim1"]);
    }

    #[test]
    fn test_numel_specialized_vs_symbolic() {
        let x = input("x", [5]);
        let f = x.numel_node();

        let baked = specialized().trace(&f).unwrap();
        assert_eq!(baked.instructions.last().unwrap().opcode, Opcode::Const(5.0));

        let kept = symbolic().trace(&f).unwrap();
        let last = kept.instructions.last().unwrap();
        assert_eq!(last.opcode, Opcode::Numel);
        assert_eq!(last.operands, vec![ValueRef::Input(0)]);
    }

    #[test]
    fn test_binary_of_distinct_inputs_records_constraint() {
        let a = input("a", [3]);
        let b = input("b", [3]);
        let f = a.mul(&b).unwrap().add(&b).unwrap().sum();

        let trace = symbolic().trace(&f).unwrap();
        assert_eq!(trace.constraints.len(), 1);
        assert_eq!(trace.constraints[0].lhs, vec![Expr::var("a_dim0")]);
        assert_eq!(trace.constraints[0].rhs, vec![Expr::var("b_dim0")]);
        assert!(trace.validate().is_ok());

        assert!(specialized().trace(&f).unwrap().constraints.is_empty());
    }

    #[test]
    fn test_input_shape_override() {
        let x = input("x", [4]);
        let one = constant(1.0).expand_as(&x).unwrap();
        let f = x.add(&one).unwrap().sum();

        let tracer = Tracer::new(TraceOptions::new().with_input_shape("x", [7, 2]));
        let trace = tracer.trace(&f).unwrap();
        assert_eq!(trace.inputs[0].shape, vec![Expr::Const(7), Expr::Const(2)]);
        assert_eq!(trace.instructions[1].shape, vec![Expr::Const(7), Expr::Const(2)]);
    }

    #[test]
    fn test_override_causing_mismatch() {
        let a = input("a", [3]);
        let b = input("b", [3]);
        let f = a.add(&b).unwrap().sum();
        let tracer = Tracer::new(TraceOptions::new().with_input_shape("a", [4]));
        assert!(matches!(tracer.trace(&f), Err(NestError::Shape(_))));
    }

    #[test]
    fn test_override_of_unknown_input() {
        let x = input("x", [3]);
        let tracer = Tracer::new(TraceOptions::new().with_input_shape("y", [3]));
        assert!(matches!(tracer.trace(&x.sum()), Err(NestError::Shape(_))));
    }

    #[test]
    fn test_trace_is_deterministic() {
        let build = || {
            let x = input("x", [3]);
            let y = input("y", [3]);
            x.mul(&y).unwrap().sin().add(&x).unwrap().mean()
        };
        let first = symbolic().trace(&build()).unwrap();
        let second = symbolic().trace(&build()).unwrap();
        assert_eq!(first, second);
        assert_eq!(first.to_string(), second.to_string());
    }
}
