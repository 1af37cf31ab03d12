// tests/gradient_check.rs

use ndarray::{ArrayD, IxDyn};
use nestc::graph::{GraphNode, evaluate, full_like, input, ones_like};
use nestc::{NestError, Stage};
use rstest::rstest;

const EPS: f32 = 1e-2;
const TOL: f32 = 2e-2;

fn build(name: &str, x: &GraphNode) -> GraphNode {
    match name {
        "sum_sin" => x.sin().sum(),
        "mean_exp_x" => x.exp().mul(x).unwrap().mean(),
        "log_square_plus_one" => x.mul(x).unwrap().add(&ones_like(x)).unwrap().log().sum(),
        "rational" => x
            .mul(x)
            .unwrap()
            .div(&x.add(&full_like(x, 3.0)).unwrap())
            .unwrap()
            .sum(),
        "sqrt_cos" => x
            .mul(x)
            .unwrap()
            .add(&ones_like(x))
            .unwrap()
            .sqrt()
            .mul(&x.cos())
            .unwrap()
            .sum(),
        "recip_minus_x" => x
            .mul(x)
            .unwrap()
            .add(&ones_like(x))
            .unwrap()
            .recip()
            .sub(x)
            .unwrap()
            .mean(),
        other => panic!("unknown function {other}"),
    }
}

fn scalar(a: &ArrayD<f32>) -> f32 {
    assert!(a.shape().is_empty(), "expected a scalar, got {:?}", a.shape());
    a.sum()
}

fn finite_difference(f: &GraphNode, data: &ArrayD<f32>, i: usize) -> f32 {
    let mut plus = data.clone();
    plus[[i]] += EPS;
    let mut minus = data.clone();
    minus[[i]] -= EPS;
    let fp = scalar(&evaluate(f, &[("x", &plus)]).unwrap());
    let fm = scalar(&evaluate(f, &[("x", &minus)]).unwrap());
    (fp - fm) / (2.0 * EPS)
}

#[rstest]
#[case("sum_sin")]
#[case("mean_exp_x")]
#[case("log_square_plus_one")]
#[case("rational")]
#[case("sqrt_cos")]
#[case("recip_minus_x")]
fn test_grad_matches_finite_difference(#[case] name: &str) {
    let _ = env_logger::builder().is_test(true).try_init();

    let x = input("x", [5]);
    let f = build(name, &x);
    let dx = nestc::grad(&f, &x).unwrap();
    assert_eq!(dx.shape(), x.shape());

    let data = ArrayD::from_shape_vec(IxDyn(&[5]), vec![0.3f32, -1.2, 0.7, 2.0, -0.45]).unwrap();
    let analytic = evaluate(&dx, &[("x", &data)]).unwrap();

    for i in 0..5 {
        let numeric = finite_difference(&f, &data, i);
        let got = analytic[[i]];
        assert!(
            (got - numeric).abs() <= TOL * (1.0 + numeric.abs()),
            "{name}: d/dx[{i}] analytic {got} vs numeric {numeric}"
        );
    }
}

#[test]
fn test_grad_of_sum_sin_at_zero_is_one() {
    let x = input("x", [100]);
    let dx = nestc::grad(&x.sin().sum(), &x).unwrap();
    let out = evaluate(&dx, &[("x", &ArrayD::zeros(IxDyn(&[100])))]).unwrap();
    assert!(out.iter().all(|&v| v == 1.0));
}

#[test]
fn test_grad_of_unrelated_input_is_zero() {
    let x = input("x", [3]);
    let y = input("y", [3]);
    let dy = nestc::grad(&x.exp().sum(), &y).unwrap();

    let data = ArrayD::from_elem(IxDyn(&[3]), 2.0f32);
    let out = evaluate(&dy, &[("x", &data), ("y", &data)]).unwrap();
    assert_eq!(out.shape(), &[3]);
    assert!(out.iter().all(|&v| v == 0.0));
}

#[test]
fn test_same_named_inputs_are_one_parameter() {
    let a = input("x", [5]);
    let b = input("x", [5]);
    let f = a.exp().add(&b.sin()).unwrap().sum();

    let zeros = ArrayD::zeros(IxDyn(&[5]));
    for wrt in [&a, &b] {
        let dx = nestc::grad(&f, wrt).unwrap();
        let out = evaluate(&dx, &[("x", &zeros)]).unwrap();
        assert!(out.iter().all(|&v| v == 2.0), "exp(0) + cos(0) expected, got {out}");
    }

    let data = ArrayD::from_shape_vec(IxDyn(&[5]), vec![0.3f32, -1.2, 0.7, 2.0, -0.45]).unwrap();
    let analytic = evaluate(&nestc::grad(&f, &a).unwrap(), &[("x", &data)]).unwrap();
    for i in 0..5 {
        let numeric = finite_difference(&f, &data, i);
        assert!((analytic[[i]] - numeric).abs() <= TOL * (1.0 + numeric.abs()));
    }
}

#[test]
fn test_grad_rejects_non_scalar_output() {
    let x = input("x", [2, 3]);
    let result = nestc::grad(&x.sin(), &x);
    assert!(matches!(result, Err(NestError::NonScalarOutput(shape)) if shape == vec![2, 3]));
}

#[rstest]
#[case::reduce_max(false)]
#[case::elementwise_max(true)]
fn test_grad_of_max_is_unsupported(#[case] elementwise: bool) {
    let x = input("x", [4]);
    let f = if elementwise {
        x.maximum(&full_like(&x, 0.0)).unwrap().sum()
    } else {
        x.max()
    };
    assert!(matches!(
        nestc::grad(&f, &x),
        Err(NestError::UnsupportedOp {
            stage: Stage::Differentiation,
            ..
        })
    ));
}

#[derive(Debug)]
struct Opaque;

impl nestc::graph::CustomOp for Opaque {
    fn name(&self) -> &str {
        "opaque"
    }

    fn eval(&self, x: f32) -> f32 {
        x.tanh()
    }
}

#[test]
fn test_grad_through_op_without_derivative() {
    let x = input("x", [4]);
    let f = x.map_custom(nestc::graph::CustomFn::new(Opaque)).sum();

    // Forward evaluation still works.
    let data = ArrayD::zeros(IxDyn(&[4]));
    assert_eq!(scalar(&evaluate(&f, &[("x", &data)]).unwrap()), 0.0);

    let result = nestc::grad(&f, &x);
    assert!(matches!(
        result,
        Err(NestError::UnsupportedOp {
            stage: Stage::Differentiation,
            ..
        })
    ));
}
