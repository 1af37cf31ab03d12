//! Symbolic shape expressions
//!
//! Shapes inside traces and loop nests are lists of [`Expr`]s so that a single
//! trace can describe a whole family of concrete extents.

pub mod bind;
pub mod expr;

pub use bind::{Bindings, bind_dims, resolve, resolve_shape};
pub use expr::Expr;
