use rustc_hash::FxHashMap;
use std::fmt;
use std::ops::{Add, Mul};

/// Symbolic integer expression used for trace shapes, loop extents and strides.
///
/// Specialized traces only ever contain `Const` dimensions. Traces produced with
/// `skip_specialization` name every input dimension with a `Var` which is bound
/// from the concrete input arrays when a kernel is invoked.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Expr {
    Const(i64),
    Var(String),
    Add(Box<Self>, Box<Self>),
    Mul(Box<Self>, Box<Self>),
}

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expr::Const(c) => write!(f, "{c}"),
            Expr::Var(v) => write!(f, "{v}"),
            Expr::Add(l, r) => write!(f, "({l} + {r})"),
            Expr::Mul(l, r) => write!(f, "({l} * {r})"),
        }
    }
}

impl Expr {
    pub fn var(name: impl Into<String>) -> Self {
        Self::Var(name.into())
    }

    pub fn is_zero(&self) -> bool {
        matches!(self, Expr::Const(0))
    }

    pub fn is_one(&self) -> bool {
        matches!(self, Expr::Const(1))
    }

    pub fn as_const(&self) -> Option<i64> {
        match self {
            Expr::Const(v) => Some(*v),
            _ => None,
        }
    }

    /// Product of a list of dimensions, `1` for an empty (scalar) shape.
    pub fn product(dims: &[Expr]) -> Expr {
        dims.iter()
            .cloned()
            .fold(Expr::Const(1), |acc, d| acc * d)
            .simplify()
    }

    /// Row-major strides for the given shape.
    pub fn row_major_strides(dims: &[Expr]) -> Vec<Expr> {
        let mut strides = vec![Expr::Const(1); dims.len()];
        for axis in (0..dims.len().saturating_sub(1)).rev() {
            strides[axis] = (strides[axis + 1].clone() * dims[axis + 1].clone()).simplify();
        }
        strides
    }

    pub fn simplify(self) -> Self {
        match self {
            Expr::Add(lhs, rhs) => {
                let lhs = lhs.simplify();
                let rhs = rhs.simplify();
                match (lhs, rhs) {
                    (Expr::Const(0), e) | (e, Expr::Const(0)) => e,
                    (Expr::Const(l), Expr::Const(r)) => Expr::Const(l + r),
                    (l, r) => l + r,
                }
            }
            Expr::Mul(lhs, rhs) => {
                let lhs = lhs.simplify();
                let rhs = rhs.simplify();
                match (lhs, rhs) {
                    (Expr::Const(0), _) | (_, Expr::Const(0)) => Expr::Const(0),
                    (Expr::Const(1), e) | (e, Expr::Const(1)) => e,
                    (Expr::Const(l), Expr::Const(r)) => Expr::Const(l * r),
                    (l, r) => l * r,
                }
            }
            e => e,
        }
    }

    /// Collects the names of all `Var` nodes in first-seen order.
    pub fn collect_variables(&self, vars: &mut Vec<String>) {
        match self {
            Expr::Var(name) => {
                if !vars.contains(name) {
                    vars.push(name.clone());
                }
            }
            Expr::Add(l, r) | Expr::Mul(l, r) => {
                l.collect_variables(vars);
                r.collect_variables(vars);
            }
            Expr::Const(_) => {}
        }
    }

    /// Evaluates the expression, `None` if a variable is unbound.
    pub fn evaluate(&self, vars: &FxHashMap<String, i64>) -> Option<i64> {
        match self {
            Expr::Const(c) => Some(*c),
            Expr::Var(v) => vars.get(v).copied(),
            Expr::Add(l, r) => Some(l.evaluate(vars)? + r.evaluate(vars)?),
            Expr::Mul(l, r) => Some(l.evaluate(vars)? * r.evaluate(vars)?),
        }
    }
}

macro_rules! impl_from_integer_for_expr {
    ($($t:ty),*) => {
        $(
            impl From<$t> for Expr {
                fn from(n: $t) -> Self {
                    Expr::Const(n as i64)
                }
            }
        )*
    };
}

impl_from_integer_for_expr!(u8, u16, u32, u64, usize, i8, i16, i32, i64, isize);

macro_rules! impl_expr_binary_op {
    ($trait:ident, $fname:ident, $variant:expr) => {
        impl<T: Into<Expr>> $trait<T> for Expr {
            type Output = Expr;
            fn $fname(self, rhs: T) -> Self::Output {
                $variant(Box::new(self), Box::new(rhs.into()))
            }
        }
    };
}

impl_expr_binary_op!(Add, add, Expr::Add);
impl_expr_binary_op!(Mul, mul, Expr::Mul);
