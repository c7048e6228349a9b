//! Benchmarks for quantified evaluation and training steps.

use std::sync::Arc;

use candle_core::Device;
use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};
use ftlogic::structure::{embedding, CosinePredicate, MlpPredicate};
use ftlogic::{
    parse, Assignment, Interpretation, KnowledgeBase, Model, OperatorSet, Signature, Structure,
    TablePredicate, TrainConfig,
};

/// Domain of `n` integer elements with a learnable binary table `R`.
fn table_interpretation(n: usize) -> Interpretation {
    let dev = Device::Cpu;
    let sig = Signature::builder()
        .sort("D")
        .predicate("R", &["D", "D"])
        .build()
        .unwrap();
    let mut s = Structure::new(Arc::new(sig), &dev);
    s.set_domain("D", embedding::index_domain(n, &dev).unwrap()).unwrap();
    s.set_predicate("R", TablePredicate::learnable(&[n, n], &dev).unwrap()).unwrap();
    Interpretation::new(Arc::new(s), Arc::new(OperatorSet::standard_product()))
}

/// `n` embedded objects with a cosine similarity and an MLP predicate.
fn embedded_interpretation(n: usize, dim: usize) -> Interpretation {
    let dev = Device::Cpu;
    let sig = Signature::builder()
        .sort("Obj")
        .predicate("Similar", &["Obj", "Obj"])
        .predicate("Red", &["Obj"])
        .build()
        .unwrap();
    let mut s = Structure::new(Arc::new(sig), &dev);
    s.set_domain("Obj", embedding::random_unit_embeddings(n, dim, &dev).unwrap())
        .unwrap();
    s.set_predicate("Similar", CosinePredicate).unwrap();
    s.set_predicate("Red", MlpPredicate::new(dim, 16, &dev).unwrap()).unwrap();
    Interpretation::new(Arc::new(s), Arc::new(OperatorSet::standard_product()))
}

fn bench_nested_quantifiers(c: &mut Criterion) {
    let mut group = c.benchmark_group("forall_exists_table");

    for n in [8, 32, 128] {
        let interp = table_interpretation(n);
        let formula = parse("forall x. exists y. R(x, y) & !R(y, x)", interp.structure().signature()).unwrap();
        let empty = Assignment::new();
        group.bench_with_input(BenchmarkId::from_parameter(n), &formula, |b, f| {
            b.iter(|| interp.evaluate(f, &empty).unwrap());
        });
    }
    group.finish();
}

fn bench_embedded_predicates(c: &mut Criterion) {
    let mut group = c.benchmark_group("similar_red_embedded");

    for n in [16, 64, 256] {
        let interp = embedded_interpretation(n, 32);
        let formula = parse(
            "forall x. forall y. Similar(x, y) & Red(x) -> Red(y)",
            interp.structure().signature(),
        )
        .unwrap();
        let empty = Assignment::new();
        group.bench_with_input(BenchmarkId::from_parameter(n), &formula, |b, f| {
            b.iter(|| interp.evaluate(f, &empty).unwrap());
        });
    }
    group.finish();
}

fn bench_training_step(c: &mut Criterion) {
    let mut group = c.benchmark_group("training_step");

    for n in [8, 32] {
        let interp = table_interpretation(n);
        let mut kb = KnowledgeBase::new(Arc::new(interp));
        kb.add_formula("forall x. exists y. R(x, y)", 1.0).unwrap();
        kb.add_formula("forall x. !R(x, x)", 1.0).unwrap();
        let mut model = Model::new(kb, TrainConfig::default()).unwrap();
        model.compile().unwrap();

        group.bench_function(BenchmarkId::from_parameter(n), |b| {
            b.iter(|| model.step(&[]).unwrap());
        });
    }
    group.finish();
}

criterion_group!(benches, bench_nested_quantifiers, bench_embedded_predicates, bench_training_step);
criterion_main!(benches);
