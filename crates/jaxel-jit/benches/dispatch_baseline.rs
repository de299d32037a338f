//! Cache-hit dispatch latency for a trivial jit-compiled function.

use criterion::{Criterion, criterion_group, criterion_main};
use jaxel_core::CoreError;
use jaxel_jit::jit;
use jaxel_lax::ops;
use jaxel_trace::Tracer;
use jaxel_tree::Tree;

fn bench_cached_dispatch(c: &mut Criterion) {
    let square = jit("square", |args: &[Tree<Tracer>]| {
        let Some(x) = args[0].as_leaf() else {
            return Err(CoreError::pytree("expected a leaf"));
        };
        Ok(Tree::Leaf(ops::mul(x, x)?))
    });
    let x = Tree::Leaf(Tracer::scalar_f64(3.0));

    // Warm the cache so the loop measures the hit path only.
    square.call(std::slice::from_ref(&x)).expect("warmup");

    c.bench_function("jit_cached_dispatch_scalar", |b| {
        b.iter(|| square.call(std::slice::from_ref(&x)).expect("dispatch"));
    });
}

criterion_group!(benches, bench_cached_dispatch);
criterion_main!(benches);
