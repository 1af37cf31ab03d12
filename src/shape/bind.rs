//! Binding symbolic dimensions to the extents of concrete arrays.

use ndarray::ArrayD;
use rustc_hash::FxHashMap;

use crate::error::{NestError, Result};

use super::Expr;

/// Dimension variable bindings, name to extent.
pub type Bindings = FxHashMap<String, i64>;

/// Binds the dimension variables of `declared` input shapes from `inputs`.
///
/// Constant dimensions must match exactly, every variable must bind to one
/// value, compound dimensions must evaluate to the actual extent and every
/// `(lhs, rhs)` constraint must resolve to equal shapes.
pub fn bind_dims<'a>(
    declared: &[(&'a str, &'a [Expr])],
    constraints: impl IntoIterator<Item = (&'a [Expr], &'a [Expr])>,
    inputs: &[&ArrayD<f32>],
) -> Result<Bindings> {
    if inputs.len() != declared.len() {
        return Err(NestError::InvalidInput(format!(
            "expected {} inputs, got {}",
            declared.len(),
            inputs.len()
        )));
    }

    let mut vars = Bindings::default();
    let mut deferred: Vec<(&str, &Expr, i64)> = Vec::new();

    for (&(name, shape), array) in declared.iter().zip(inputs) {
        if array.ndim() != shape.len() {
            return Err(NestError::Shape(format!(
                "input '{name}' expects rank {}, got shape {:?}",
                shape.len(),
                array.shape()
            )));
        }
        for (dim, &actual) in shape.iter().zip(array.shape()) {
            let actual = actual as i64;
            match dim {
                Expr::Const(expected) if *expected != actual => {
                    return Err(NestError::Shape(format!(
                        "input '{name}' expects extent {expected}, got shape {:?}",
                        array.shape()
                    )));
                }
                Expr::Const(_) => {}
                Expr::Var(var) => match vars.get(var) {
                    Some(&bound) if bound != actual => {
                        return Err(NestError::Shape(format!(
                            "dimension '{var}' is bound to both {bound} and {actual}"
                        )));
                    }
                    Some(_) => {}
                    None => {
                        vars.insert(var.clone(), actual);
                    }
                },
                compound => deferred.push((name, compound, actual)),
            }
        }
    }

    for (input, dim, actual) in deferred {
        if dim.evaluate(&vars) != Some(actual) {
            return Err(NestError::Shape(format!(
                "input '{input}' expects extent {dim}, got {actual}"
            )));
        }
    }

    for (lhs, rhs) in constraints {
        let lhs = resolve_shape(lhs, &vars)?;
        let rhs = resolve_shape(rhs, &vars)?;
        if lhs != rhs {
            return Err(NestError::Shape(format!(
                "operand shapes {lhs:?} and {rhs:?} differ"
            )));
        }
    }
    Ok(vars)
}

/// Evaluates an extent under `vars`.
///
/// Extents are only resolved once inputs are bound, so an unbound variable
/// means the inputs did not supply it.
pub fn resolve(expr: &Expr, vars: &Bindings) -> Result<usize> {
    let value = expr.evaluate(vars).ok_or_else(|| {
        NestError::InvalidInput(format!("extent '{expr}' uses a dimension no input binds"))
    })?;
    usize::try_from(value).map_err(|_| NestError::Shape(format!("extent '{expr}' is negative")))
}

pub fn resolve_shape(shape: &[Expr], vars: &Bindings) -> Result<Vec<usize>> {
    shape.iter().map(|dim| resolve(dim, vars)).collect()
}
