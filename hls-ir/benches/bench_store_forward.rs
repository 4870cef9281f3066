use criterion::{black_box, criterion_group, criterion_main, BatchSize, Criterion};
use hls_core::{Literal, Type};
use hls_ir::passes::{AffineLoopPerfection, AffineStoreForward};
use hls_ir::{AffineMap, ArithOp, Builder, Function};

/// `depth` nested loops; the innermost body stores into a local buffer,
/// reads the element back twice and accumulates into `out`.
fn stencil(depth: usize, size: i64) -> Function {
    let out_ty = Type::memref(&[size], Type::F32);
    let mut func = Function::new("stencil", &[out_ty], &[]);
    let out = func.arguments()[0];
    let entry = func.entry_block();
    let mut b = Builder::at_end(&mut func.graph, entry);
    let tmp = b.alloc(Type::memref(&[size], Type::F32));
    let outer = b.affine_for_const(0, size, 1);
    b.set_insertion_point_to_body(outer.body);
    // sits in the outer body, leaving the nest imperfect
    let one = b.constant(Literal::F32(1.0));
    let mut iv = outer.iv;
    for _ in 1..depth {
        let lp = b.affine_for_const(0, size, 1);
        b.set_insertion_point_to_body(lp.body);
        iv = lp.iv;
    }
    let prev = b.affine_load(out, AffineMap::identity(1), vec![iv]);
    let next = b.arith(ArithOp::AddF, prev, one);
    b.affine_store(next, tmp, AffineMap::identity(1), vec![iv]);
    let again = b.affine_load(tmp, AffineMap::identity(1), vec![iv]);
    let twice = b.affine_load(tmp, AffineMap::identity(1), vec![iv]);
    let sum = b.arith(ArithOp::AddF, again, twice);
    b.affine_store(sum, out, AffineMap::identity(1), vec![iv]);
    b.set_insertion_point_to_end(entry);
    b.dealloc(tmp);
    b.ret(vec![]);
    func
}

fn bench_store_forward(c: &mut Criterion) {
    let func = stencil(3, 16);
    c.bench_function("store_forward_stencil_3", |b| {
        b.iter_batched(
            || func.clone(),
            |mut f| black_box(AffineStoreForward::new().run_on_function(&mut f)),
            BatchSize::SmallInput,
        )
    });
}

fn bench_loop_perfection(c: &mut Criterion) {
    let func = stencil(4, 8);
    c.bench_function("loop_perfection_stencil_4", |b| {
        b.iter_batched(
            || func.clone(),
            |mut f| {
                let mut pass = AffineLoopPerfection::new();
                pass.run_on_function(&mut f);
                black_box(pass.perfected())
            },
            BatchSize::SmallInput,
        )
    });
}

criterion_group!(benches, bench_store_forward, bench_loop_perfection);
criterion_main!(benches);
