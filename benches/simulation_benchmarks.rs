use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};
use PlasmaSim::*;

/// Resistor ladder with `sections` rungs, a capacitor on every node
fn rc_ladder(sections: usize) -> Circuit {
    let mut circuit = Circuit::new(format!("RC ladder ({})", sections));
    circuit
        .add_element(Element::voltage_source("V1", 1, 0, 5.0).unwrap())
        .unwrap();
    for k in 1..=sections {
        circuit
            .add_element(Element::resistor(format!("R{}", k), k, k + 1, 1000.0).unwrap())
            .unwrap();
        circuit
            .add_element(Element::resistor(format!("RG{}", k), k + 1, 0, 10_000.0).unwrap())
            .unwrap();
        circuit
            .add_element(Element::capacitor(format!("C{}", k), k + 1, 0, 1e-9).unwrap())
            .unwrap();
    }
    circuit
}

fn bench_simple_circuit(c: &mut Criterion) {
    let mut group = c.benchmark_group("simple_circuit");
    let circuit = rc_ladder(1);

    group.bench_function("operating_point", |b| {
        b.iter(|| circuit.solve_dc().unwrap());
    });

    group.bench_function("dae_initial_state", |b| {
        b.iter(|| circuit.build_dae_system().unwrap());
    });

    group.finish();
}

fn bench_matrix_sizes(c: &mut Criterion) {
    let mut group = c.benchmark_group("ladder_dc");

    for sections in [10, 50, 100].iter() {
        let circuit = rc_ladder(*sections);
        group.bench_with_input(BenchmarkId::new("assemble", sections), &circuit, |b, circuit| {
            b.iter(|| circuit.assemble_dc(&DcOptions::default()).unwrap());
        });
        group.bench_with_input(BenchmarkId::new("solve", sections), &circuit, |b, circuit| {
            b.iter(|| circuit.solve_dc().unwrap());
        });
    }

    group.finish();
}

fn bench_transient_analysis(c: &mut Criterion) {
    let mut group = c.benchmark_group("transient_analysis");
    let circuit = rc_ladder(3);
    let options = IntegratorOptions {
        output: OutputPoints::Count(100),
        ..IntegratorOptions::default()
    };

    group.bench_function("backward_euler_100_steps", |b| {
        b.iter(|| {
            circuit
                .solve_transient((0.0, 100e-9), &mut BackwardEuler::new(), &options)
                .unwrap()
        });
    });

    group.finish();
}

criterion_group!(benches, bench_simple_circuit, bench_matrix_sizes, bench_transient_analysis);
criterion_main!(benches);
