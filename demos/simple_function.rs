//! Differentiates `f(x) = sum(sin(x))`, prints the trace and loop nest of the
//! gradient, and times the graph evaluator, the trace evaluator and the
//! compiled kernels against each other.
//!
//! Usage: `cargo run --example simple_function [iterations]`
//! Set `RUST_LOG=debug` to see what each stage does.

use std::time::Instant;

use ndarray::{ArrayD, IxDyn};
use nestc::prelude::*;

const WARMUP: usize = 3;

fn bench(name: &str, iters: usize, mut f: impl FnMut() -> ArrayD<f32>) {
    for _ in 0..WARMUP {
        f();
    }
    let begin = Instant::now();
    for _ in 0..iters {
        std::hint::black_box(f());
    }
    println!("{name:<12} {:?}", begin.elapsed());
}

fn main() -> nestc::Result<()> {
    nestc::init_logger();

    let iters = std::env::args()
        .nth(1)
        .and_then(|arg| arg.parse().ok())
        .unwrap_or(10_000usize);

    let x = input("x", [100]);
    let f = x.sin().sum();
    let dx = f.grad(&x)?;

    let inp = ArrayD::from_shape_vec(
        IxDyn(&[100]),
        (0..100).map(|i| (i as f32 * 12.9898).sin() * 2.0).collect(),
    )
    .map_err(|e| NestError::Shape(e.to_string()))?;

    let pipeline = Pipeline::new().with_skip_specialization(true);
    let traced = pipeline.trace(&dx)?;
    println!("{traced}");
    let nest = pipeline.lower(&dx)?;
    println!("{nest}");

    let interp = pipeline.compile_trace(&traced)?;

    println!("=== {iters} iterations ===");
    bench("evaluate:", iters, || {
        evaluate(&dx, &[("x", &inp)]).unwrap_or_default()
    });
    bench("trace:", iters, || traced.evaluate(&[&inp]).unwrap_or_default());
    bench("interp:", iters, || interp.call(&[&inp]).unwrap_or_default());

    let c_pipeline = pipeline.clone().with_compiler(CCompiler::from_env());
    if c_pipeline.compiler.is_available() {
        let native = c_pipeline.compile_trace(&traced)?;
        bench("native:", iters, || native.call(&[&inp]).unwrap_or_default());
    } else {
        println!("native:      skipped (no C compiler found)");
    }

    Ok(())
}
