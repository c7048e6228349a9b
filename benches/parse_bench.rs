//! Benchmarks for formula parsing.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use ftlogic::{parse, Signature};

fn signature() -> Signature {
    Signature::builder()
        .sort("Person")
        .predicate("Friend", &["Person", "Person"])
        .predicate("Smokes", &["Person"])
        .predicate("Cancer", &["Person"])
        .functor("mother", &["Person"], "Person")
        .constant("alice", "Person")
        .build()
        .unwrap()
}

/// `Smokes(x) & Smokes(x) & ...` with `n` conjuncts under one quantifier.
fn conjunction(n: usize) -> String {
    let body = vec!["Smokes(x)"; n].join(" & ");
    format!("forall x. {}", body)
}

fn bench_parse_rules(c: &mut Criterion) {
    let sig = signature();
    let rules = [
        ("atom", "Smokes(alice)"),
        ("smokers", "forall x. forall y. Friend(x, y) & Smokes(x) -> Smokes(y)"),
        ("cancer", "forall x: Person. Smokes(x) -> Cancer(x)"),
        ("functor", "exists x. Friend(mother(x), mother(mother(alice))) <-> !Smokes(x)"),
        ("unicode", "∀x. ∃y. Friend(x, y) ∧ ¬Cancer(y)"),
    ];

    let mut group = c.benchmark_group("parse_rules");
    for (name, text) in rules {
        group.bench_function(name, |b| b.iter(|| parse(black_box(text), &sig).unwrap()));
    }
    group.finish();
}

fn bench_parse_scaling(c: &mut Criterion) {
    let sig = signature();
    let mut group = c.benchmark_group("parse_conjunction");

    for n in [4, 16, 64, 256] {
        let text = conjunction(n);
        group.bench_with_input(BenchmarkId::from_parameter(n), &text, |b, text| {
            b.iter(|| parse(black_box(text), &sig).unwrap());
        });
    }
    group.finish();
}

fn bench_display_round_trip(c: &mut Criterion) {
    let sig = signature();
    let formula = parse("forall x. forall y. Friend(x, y) & Smokes(x) -> Smokes(y)", &sig).unwrap();
    c.bench_function("display_reparse", |b| {
        b.iter(|| parse(&formula.to_string(), &sig).unwrap());
    });
}

criterion_group!(benches, bench_parse_rules, bench_parse_scaling, bench_display_round_trip);
criterion_main!(benches);
