// tests/pipeline_e2e.rs

use ndarray::{ArrayD, IxDyn};
use nestc::backend::{InterpCompiler, Kernel};
use nestc::graph::{BinaryOp, GraphNode, ReduceOp, UnaryOp, evaluate, full_like, input};
use nestc::lowerer::LoweringConfig;
use nestc::shape::Expr;
use nestc::trace::{Instruction, Opcode, Trace, TraceInput, TraceOptions, ValueRef};
use nestc::{NestError, Pipeline};
use rstest::rstest;

fn ramp(shape: &[usize], scale: f32) -> ArrayD<f32> {
    let n: usize = shape.iter().product();
    let data = (0..n).map(|i| (i as f32 - n as f32 / 2.0) * scale).collect();
    ArrayD::from_shape_vec(IxDyn(shape), data).unwrap()
}

fn assert_close(got: &ArrayD<f32>, want: &ArrayD<f32>) {
    assert_eq!(got.shape(), want.shape());
    for (g, w) in got.iter().zip(want.iter()) {
        assert!((g - w).abs() <= 1e-4 * (1.0 + w.abs()), "got {g}, want {w}");
    }
}

fn build(name: &str, x: &GraphNode, y: &GraphNode) -> GraphNode {
    match name {
        "sum_sin" => x.sin().sum(),
        "grad_sum_sin" => nestc::grad(&x.sin().sum(), x).unwrap(),
        "mean_product" => x.mul(y).unwrap().mean(),
        "grad_mean_product" => nestc::grad(&x.mul(y).unwrap().mean(), y).unwrap(),
        "softmax_like" => {
            let e = x.sub(&x.max().expand_as(x).unwrap()).unwrap().exp();
            e.div(&e.sum().expand_as(&e).unwrap()).unwrap()
        }
        "centered" => x.sub(&x.mean().expand_as(x).unwrap()).unwrap(),
        "elementwise" => x
            .maximum(y)
            .unwrap()
            .add(&full_like(x, 0.25))
            .unwrap()
            .sqrt()
            .neg(),
        "identity" => x.clone(),
        other => panic!("unknown function {other}"),
    }
}

fn call_by_name(kernel: &impl Kernel, x: &ArrayD<f32>, y: &ArrayD<f32>) -> ArrayD<f32> {
    let inputs: Vec<&ArrayD<f32>> = kernel
        .loop_nest()
        .inputs()
        .into_iter()
        .map(|(_, decl)| if decl.name == "x" { x } else { y })
        .collect();
    kernel.call(&inputs).unwrap()
}

#[rstest]
#[case("sum_sin")]
#[case("grad_sum_sin")]
#[case("mean_product")]
#[case("grad_mean_product")]
#[case("softmax_like")]
#[case("centered")]
#[case("elementwise")]
#[case("identity")]
fn test_kernel_matches_reference(
    #[case] name: &str,
    #[values(false, true)] skip_specialization: bool,
    #[values(false, true)] fuse_loops: bool,
) {
    let _ = env_logger::builder().is_test(true).try_init();

    let x = input("x", [3, 4]);
    let y = input("y", [3, 4]);
    let f = build(name, &x, &y);

    let kernel = Pipeline::new()
        .with_skip_specialization(skip_specialization)
        .with_lowering_config(LoweringConfig::default().with_fuse_loops(fuse_loops))
        .compile(&f)
        .unwrap();

    let xs = ramp(&[3, 4], 0.3);
    let ys = ramp(&[3, 4], -0.2).mapv(f32::abs);
    let got = call_by_name(&kernel, &xs, &ys);
    let want = evaluate(&f, &[("x", &xs), ("y", &ys)]).unwrap();
    assert_close(&got, &want);
}

#[test]
fn test_trace_is_deterministic() {
    let build = || {
        let x = input("x", [16]);
        nestc::grad(&x.sin().sum(), &x).unwrap()
    };
    let options = TraceOptions::new().with_skip_specialization(true);

    let a = nestc::trace(&build(), &options).unwrap();
    let b = nestc::trace(&build(), &options).unwrap();
    assert_eq!(a, b);
    assert_eq!(a.to_string(), b.to_string());

    let nest_a = nestc::make_loop_nest(&build(), &options).unwrap();
    let nest_b = nestc::make_loop_nest(&build(), &options).unwrap();
    assert_eq!(nest_a, nest_b);
    assert_eq!(nest_a.to_string(), nest_b.to_string());
}

#[test]
fn test_shared_subexpression_is_traced_once() {
    let x = input("x", [8]);
    let s = x.sin();
    let f = s.mul(&s).unwrap().add(&s).unwrap().sum();

    let trace = nestc::trace(&f, &TraceOptions::default()).unwrap();
    let sines = trace
        .instructions
        .iter()
        .filter(|inst| inst.opcode.to_string() == "sin")
        .count();
    assert_eq!(sines, 1);
    assert_eq!(trace.instructions.len(), 4);
    trace.validate().unwrap();
}

#[test]
fn test_same_name_inputs_share_one_slot() {
    let f = input("x", [4]).exp().add(&input("x", [4]).cos()).unwrap().sum();
    let trace = nestc::trace(&f, &TraceOptions::default()).unwrap();
    assert_eq!(trace.inputs.len(), 1);

    let kernel = nestc::jit(&f, &TraceOptions::default()).unwrap();
    assert_eq!(kernel.loop_nest().num_inputs(), 1);
}

#[test]
fn test_skip_specialization_gives_one_nest_for_every_extent() {
    let _ = env_logger::builder().is_test(true).try_init();
    let options = TraceOptions::new().with_skip_specialization(true);

    let grad_at = |n: usize| {
        let x = input("x", [n]);
        nestc::grad(&x.sin().mean(), &x).unwrap()
    };
    let small = nestc::make_loop_nest(&grad_at(4), &options).unwrap();
    let large = nestc::make_loop_nest(&grad_at(100), &options).unwrap();
    assert_eq!(small, large);
    assert_eq!(small.dims, vec!["x_dim0".to_string()]);

    let kernel = nestc::compile(&small).unwrap();
    for n in [1usize, 4, 37, 100] {
        let out = kernel.call(&[&ArrayD::zeros(IxDyn(&[n]))]).unwrap();
        assert_eq!(out.shape(), &[n]);
        let expected = 1.0 / n as f32;
        assert!(out.iter().all(|&v| (v - expected).abs() < 1e-6));
    }
}

#[test]
fn test_specialized_trace_bakes_in_extents() {
    let x = input("x", [6]);
    let dx = nestc::grad(&x.exp().mean(), &x).unwrap();

    let trace = nestc::trace(&dx, &TraceOptions::default()).unwrap();
    assert!(trace.dim_vars().is_empty());
    assert!(trace.instructions.iter().all(|inst| inst.opcode != Opcode::Numel));
    assert!(trace.instructions.iter().any(|inst| inst.opcode == Opcode::Const(6.0)));

    let symbolic = nestc::trace(&dx, &TraceOptions::new().with_skip_specialization(true)).unwrap();
    assert!(symbolic.instructions.iter().any(|inst| inst.opcode == Opcode::Numel));

    let kernel = nestc::jit(&dx, &TraceOptions::default()).unwrap();
    let err = kernel.call(&[&ArrayD::zeros(IxDyn(&[7]))]).unwrap_err();
    assert!(matches!(err, NestError::Shape(_)));
}

#[test]
fn test_input_shape_override() {
    let x = input("x", [2]);
    let f = x.sin().sum();
    let options = TraceOptions::new().with_input_shape("x", [5]);

    let kernel = nestc::jit(&f, &options).unwrap();
    let data = ramp(&[5], 0.1);
    let want: f32 = data.iter().map(|v| v.sin()).sum();
    assert!((kernel.call(&[&data]).unwrap().sum() - want).abs() < 1e-5);

    let unknown = TraceOptions::new().with_input_shape("z", [5]);
    assert!(matches!(nestc::trace(&f, &unknown), Err(NestError::Shape(_))));
}

#[test]
fn test_kernel_rejects_bad_calls() {
    let x = input("x", [2, 2]);
    let y = input("y", [2, 2]);
    let f = x.add(&y).unwrap().sum();
    let kernel = Pipeline::new().with_skip_specialization(true).compile(&f).unwrap();

    let a = ArrayD::zeros(IxDyn(&[2, 2]));
    let b = ArrayD::zeros(IxDyn(&[2, 3]));
    let flat = ArrayD::zeros(IxDyn(&[4]));

    assert!(matches!(kernel.call(&[&a]), Err(NestError::InvalidInput(_))));
    assert!(matches!(kernel.call(&[&a, &flat]), Err(NestError::Shape(_))));
    assert!(matches!(kernel.call(&[&a, &b]), Err(NestError::Shape(_))));
    assert_eq!(kernel.call(&[&a, &a]).unwrap().sum(), 0.0);
}

#[test]
fn test_interp_max_rank() {
    let x = input("x", [1, 1, 1]);
    let pipeline = Pipeline::new().with_compiler(InterpCompiler::new().with_max_rank(2));
    assert!(matches!(
        pipeline.compile(&x.exp().sum()),
        Err(NestError::Compilation(_))
    ));
}

fn inst(j: usize, opcode: Opcode, operands: Vec<ValueRef>, shape: Vec<Expr>) -> Instruction {
    Instruction {
        opcode,
        operands,
        output: ValueRef::Value(j),
        shape,
    }
}

/// `sum(sin(x) * expand(2, x))` over `x: f32[n]`.
fn hand_built_trace() -> Trace {
    let n = vec![Expr::var("n")];
    Trace {
        inputs: vec![TraceInput {
            name: "x".to_string(),
            shape: n.clone(),
        }],
        instructions: vec![
            inst(0, Opcode::Unary(UnaryOp::Sin), vec![ValueRef::Input(0)], n.clone()),
            inst(1, Opcode::Const(2.0), vec![], vec![]),
            inst(2, Opcode::Expand, vec![ValueRef::Value(1), ValueRef::Input(0)], n.clone()),
            inst(
                3,
                Opcode::Binary(BinaryOp::Mul),
                vec![ValueRef::Value(0), ValueRef::Value(2)],
                n,
            ),
            inst(4, Opcode::Reduce(ReduceOp::Sum), vec![ValueRef::Value(3)], vec![]),
        ],
        output: ValueRef::Value(4),
        constraints: vec![],
        specialized: false,
    }
}

#[test]
fn test_compile_hand_built_trace() {
    let trace = hand_built_trace();
    let kernel = nestc::compile_trace(&trace).unwrap();
    let pipelined = Pipeline::new().compile_trace(&trace).unwrap();
    assert_eq!(kernel.loop_nest().dims, vec!["n".to_string()]);

    for n in [1usize, 6, 33] {
        let data = ramp(&[n], 0.1);
        let want: f32 = data.iter().map(|v| 2.0 * v.sin()).sum();
        let got = kernel.call(&[&data]).unwrap();
        assert!(got.shape().is_empty());
        assert!((got.sum() - want).abs() < 1e-4);
        assert_eq!(pipelined.call(&[&data]).unwrap(), got);
        assert!((trace.evaluate(&[&data]).unwrap().sum() - want).abs() < 1e-4);
    }
}

#[test]
fn test_compile_malformed_trace() {
    let mut trace = hand_built_trace();
    trace.instructions[0].operands = vec![ValueRef::Value(3)];
    assert!(matches!(
        nestc::compile_trace(&trace),
        Err(NestError::MalformedTrace(_))
    ));
}

#[test]
fn test_kernel_called_from_many_threads() {
    let x = input("x", [8]);
    let dx = nestc::grad(&x.sin().sum(), &x).unwrap();
    let kernel = Pipeline::new().with_skip_specialization(true).compile(&dx).unwrap();

    std::thread::scope(|s| {
        for t in 0..7usize {
            let kernel = &kernel;
            s.spawn(move || {
                for call in 0..50usize {
                    let n = 1 + (t * 13 + call) % 64;
                    let out = kernel.call(&[&ArrayD::zeros(IxDyn(&[n]))]).unwrap();
                    assert_eq!(out.shape(), &[n]);
                    assert!(out.iter().all(|&v| v == 1.0));
                }
            });
        }
    });
}
