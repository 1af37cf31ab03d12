//! Backward pass implementation for automatic differentiation
//!
//! This module provides the `backward()` function that computes gradients
//! by propagating adjoints through the computation graph in reverse order.

use log::debug;

use crate::error::{NestError, Result};
use crate::graph::{GraphNode, constant, topological_sort, zeros_like};

use super::context::{GradContext, GradResult};
use super::rules::compute_vjp;

// ============================================================================
// Backward Function
// ============================================================================

/// Compute gradients for the given parameters with respect to the output.
///
/// The returned gradients are new graph nodes; nothing is evaluated.
///
/// # Errors
///
/// * `NonScalarOutput` if `output` is not 0-d
/// * `UnsupportedOp` if an adjoint has to flow through an operation without a rule
///
/// # Example
///
/// ```
/// use nestc::grad::backward;
/// use nestc::graph::input;
///
/// let x = input("x", [10]);
/// let y = x.mul(&x).unwrap().sum(); // y = sum(x^2)
///
/// let grads = backward(&y, &[&x]).unwrap();
/// let dx = grads.get(&x).unwrap(); // dx = 2x
/// assert_eq!(dx.shape(), &[10]);
/// ```
pub fn backward(output: &GraphNode, params: &[&GraphNode]) -> Result<GradResult> {
    if !output.is_scalar() {
        return Err(NestError::NonScalarOutput(output.shape().to_vec()));
    }

    let mut ctx = GradContext::new();
    for param in params {
        ctx.mark_requires_grad(param);
    }

    ctx.set_grad(output, constant(1.0));

    let sorted = topological_sort(std::slice::from_ref(output));

    // Traverse from the output back to the inputs
    for node in sorted.into_iter().rev() {
        let grad_output = match ctx.get_grad(&node) {
            Some(g) => g.clone(),
            None => continue,
        };

        let sources = node.sources();
        if sources.is_empty() {
            continue;
        }

        // Nothing upstream of this node is a parameter
        if !sources.iter().any(|s| ctx.needs_grad(s)) {
            continue;
        }

        let vjp = compute_vjp(&node, &grad_output)?;

        for (source, grad_input) in sources.iter().zip(vjp.input_grads) {
            if let Some(grad) = grad_input
                && ctx.needs_grad(source)
            {
                ctx.accumulate_grad(source, grad)?;
            }
        }
    }

    debug!(
        "Backward pass computed {} adjoints for {} parameters",
        ctx.num_grads(),
        params.len()
    );

    let param_nodes: Vec<GraphNode> = params.iter().map(|p| (*p).clone()).collect();
    Ok(GradResult::new(ctx, param_nodes))
}

// ============================================================================
// Convenience Functions
// ============================================================================

/// Gradient of a scalar `output` with respect to `wrt`, shaped like `wrt`.
///
/// A parameter that does not influence the output gets an all-zero gradient.
pub fn grad(output: &GraphNode, wrt: &GraphNode) -> Result<GraphNode> {
    let result = backward(output, &[wrt])?;
    Ok(result.get(wrt).unwrap_or_else(|| zeros_like(wrt)))
}

/// Gradients of `output` with respect to several parameters, in order.
pub fn grads(output: &GraphNode, params: &[&GraphNode]) -> Result<Vec<GraphNode>> {
    let result = backward(output, params)?;
    Ok(params
        .iter()
        .zip(result.grads())
        .map(|(p, g)| g.unwrap_or_else(|| zeros_like(p)))
        .collect())
}

// ============================================================================
// Extension Trait for GraphNode
// ============================================================================

/// Extension trait to add backward() method to GraphNode.
pub trait Differentiable {
    /// Compute gradients with respect to the given parameters.
    fn backward(&self, params: &[&GraphNode]) -> Result<GradResult>;

    /// Compute gradient with respect to a single parameter.
    fn grad(&self, param: &GraphNode) -> Result<GraphNode>;
}

impl Differentiable for GraphNode {
    fn backward(&self, params: &[&GraphNode]) -> Result<GradResult> {
        backward(self, params)
    }

    fn grad(&self, param: &GraphNode) -> Result<GraphNode> {
        grad(self, param)
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Stage;
    use crate::graph::{NodeOp, evaluate, input};
    use ndarray::{ArrayD, array};

    fn eval1(node: &GraphNode, name: &str, data: &ArrayD<f32>) -> ArrayD<f32> {
        evaluate(node, &[(name, data)]).unwrap()
    }

    #[test]
    fn test_backward_simple_add() {
        // y = sum(a + b)
        let a = input("a", [10]);
        let b = input("b", [10]);
        let y = a.add(&b).unwrap().sum();

        let grads = backward(&y, &[&a, &b]).unwrap();
        let da = grads.get(&a).expect("Should have gradient for a");
        let db = grads.get(&b).expect("Should have gradient for b");

        assert_eq!(da.shape(), a.shape());
        assert_eq!(db.shape(), b.shape());
    }

    #[test]
    fn test_backward_non_scalar_output() {
        let x = input("x", [10]);
        let err = backward(&x.sin(), &[&x]).unwrap_err();
        assert_eq!(err, NestError::NonScalarOutput(vec![10]));
    }

    #[test]
    fn test_backward_sum_sin_is_cos() {
        let x = input("x", [4]);
        let f = x.sin().sum();
        let dx = grad(&f, &x).unwrap();

        let data = array![0.0f32, 0.5, 1.0, 2.0].into_dyn();
        let out = eval1(&dx, "x", &data);
        for (g, v) in out.iter().zip(data.iter()) {
            assert!((g - v.cos()).abs() < 1e-6);
        }
    }

    #[test]
    fn test_backward_reused_node() {
        // y = sum(a * a), dy/da = 2a
        let a = input("a", [3]);
        let y = a.mul(&a).unwrap().sum();
        let da = grad(&y, &a).unwrap();

        let data = array![1.0f32, -2.0, 3.0].into_dyn();
        let out = eval1(&da, "a", &data);
        assert_eq!(out, array![2.0f32, -4.0, 6.0].into_dyn());
    }

    #[test]
    fn test_backward_mean() {
        let x = input("x", [4]);
        let dx = grad(&x.mean(), &x).unwrap();
        let data = ArrayD::zeros(ndarray::IxDyn(&[4]));
        let out = eval1(&dx, "x", &data);
        assert!(out.iter().all(|&g| (g - 0.25).abs() < 1e-7));
    }

    #[test]
    fn test_unreachable_param_gets_zeros() {
        let x = input("x", [3]);
        let y = input("y", [3]);
        let f = x.sin().sum();
        let dy = grad(&f, &y).unwrap();
        assert_eq!(dy.shape(), &[3]);

        let data = array![1.0f32, 2.0, 3.0].into_dyn();
        assert!(eval1(&dy, "y", &data).iter().all(|&g| g == 0.0));
    }

    #[test]
    fn test_unsupported_on_gradient_path() {
        let x = input("x", [3]);
        let err = grad(&x.max(), &x).unwrap_err();
        assert!(matches!(
            err,
            NestError::UnsupportedOp {
                stage: Stage::Differentiation,
                ..
            }
        ));
    }

    #[test]
    fn test_unsupported_off_gradient_path_is_ignored() {
        let x = input("x", [3]);
        let y = input("y", [3]);
        let f = x.sum().add(&y.max()).unwrap();
        let dx = grad(&f, &x).unwrap();
        assert_eq!(dx.op(), &NodeOp::Expand);
    }

    #[test]
    fn test_grad_of_output_itself() {
        let x = input("x", Vec::<usize>::new());
        let dx = grad(&x, &x).unwrap();
        assert_eq!(dx.op(), &NodeOp::Constant(1.0));
    }

    #[test]
    fn test_differentiable_trait() {
        let a = input("a", [10]);
        let y = a.mul(&a).unwrap().sum();
        let da = y.grad(&a).expect("Should have gradient");
        assert_eq!(da.shape(), a.shape());

        let result = y.backward(&[&a]).unwrap();
        assert!(result.get(&a).is_some());
    }

    #[test]
    fn test_grads_multiple_params() {
        let a = input("a", [2]);
        let b = input("b", [2]);
        let y = a.mul(&b).unwrap().sum();
        let gs = grads(&y, &[&a, &b]).unwrap();

        let da = array![1.0f32, 2.0].into_dyn();
        let db = array![3.0f32, 4.0].into_dyn();
        let inputs = [("a", &da), ("b", &db)];
        assert_eq!(evaluate(&gs[0], &inputs).unwrap(), db);
        assert_eq!(evaluate(&gs[1], &inputs).unwrap(), da);
    }
}
