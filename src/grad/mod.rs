//! Symbolic reverse-mode differentiation
//!
//! `backward()` does not compute numbers: it builds a new expression graph for
//! each requested gradient, which can then be traced, lowered and compiled like
//! any other graph.
//!
//! # Example
//!
//! ```
//! use nestc::grad::grad;
//! use nestc::graph::input;
//!
//! let x = input("x", [100]);
//! let f = x.sin().sum();
//! let dx = grad(&f, &x).unwrap(); // cos(x)
//! assert_eq!(dx.shape(), x.shape());
//! ```
//!
//! # Supported Operations
//!
//! ## Elementwise Operations
//! - `add(a, b)`: `∂a = ∂out`, `∂b = ∂out`
//! - `sub(a, b)`: `∂a = ∂out`, `∂b = -∂out`
//! - `mul(a, b)`: `∂a = ∂out * b`, `∂b = ∂out * a`
//! - `div(a, b)`: `∂a = ∂out / b`, `∂b = -∂out * a / b²`
//! - `neg(a)`: `∂a = -∂out`
//! - `recip(a)`: `∂a = -∂out / a²`
//! - `sqrt(a)`: `∂a = ∂out / (2 * sqrt(a))`
//! - `exp(a)`: `∂a = ∂out * exp(a)`
//! - `log(a)`: `∂a = ∂out / a`
//! - `sin(a)`: `∂a = ∂out * cos(a)`
//! - `cos(a)`: `∂a = -∂out * sin(a)`
//! - custom ops that provide a derivative: `∂a = ∂out * f'(a)`
//!
//! ## Reductions and Broadcasting
//! - `sum(a)`: `∂a = expand(∂out)`
//! - `mean(a)`: `∂a = expand(∂out / numel(a))`
//! - `expand(s)`: `∂s = sum(∂out)`
//!
//! `max` (elementwise and reduction) has no rule.

mod backward;
mod context;
mod rules;

pub use backward::{Differentiable, backward, grad, grads};
pub use context::{GradContext, GradResult};
pub use rules::{VjpResult, compute_vjp};
