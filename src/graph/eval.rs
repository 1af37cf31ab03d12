//! Direct evaluation of an expression graph with `ndarray`.
//!
//! This is the reference semantics every compiled kernel is checked against.

use log::trace;
use ndarray::{ArrayD, IxDyn, Zip, arr0};
use rustc_hash::FxHashMap;

use crate::error::{NestError, Result};

use super::node::GraphNode;
use super::ops::NodeOp;
use super::traversal::topological_sort;

/// Evaluate `output` with the given named input arrays.
pub fn evaluate(output: &GraphNode, inputs: &[(&str, &ArrayD<f32>)]) -> Result<ArrayD<f32>> {
    let mut cache: FxHashMap<GraphNode, ArrayD<f32>> = FxHashMap::default();

    for node in topological_sort(std::slice::from_ref(output)) {
        let value = {
            let src = |i: usize| source(&cache, &node, i);
            match node.op() {
                NodeOp::Input { name } => {
                    let (_, data) = inputs
                        .iter()
                        .find(|(n, _)| *n == name.as_str())
                        .ok_or_else(|| {
                            NestError::InvalidInput(format!("no value bound for input '{name}'"))
                        })?;
                    if data.shape() != node.shape() {
                        return Err(NestError::Shape(format!(
                            "input '{}' expects shape {:?}, got {:?}",
                            name,
                            node.shape(),
                            data.shape()
                        )));
                    }
                    (*data).clone()
                }
                NodeOp::Constant(v) => arr0(*v).into_dyn(),
                NodeOp::Unary(op) => src(0).mapv(|x| op.apply(x)),
                NodeOp::Binary(op) => {
                    Zip::from(src(0)).and(src(1)).map_collect(|&a, &b| op.apply(a, b))
                }
                NodeOp::Reduce(op) => {
                    let x = src(0);
                    let acc = x.iter().fold(op.identity(), |acc, &v| op.accumulate(acc, v));
                    arr0(op.finalize(acc, x.len())).into_dyn()
                }
                NodeOp::Expand => {
                    let s = src(0).iter().next().copied().unwrap_or_default();
                    ArrayD::from_elem(IxDyn(node.shape()), s)
                }
                NodeOp::Numel => arr0(node.sources()[0].numel() as f32).into_dyn(),
                NodeOp::Custom(f) => src(0).mapv(|x| f.eval(x)),
            }
        };
        trace!("evaluated {} -> shape {:?}", node.op(), value.shape());
        cache.insert(node, value);
    }

    cache
        .remove(output)
        .ok_or_else(|| NestError::InvalidInput("output was not evaluated".to_string()))
}

fn source<'a>(
    cache: &'a FxHashMap<GraphNode, ArrayD<f32>>,
    node: &GraphNode,
    i: usize,
) -> &'a ArrayD<f32> {
    &cache[&node.sources()[i]]
}
