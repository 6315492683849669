//! Benchmarks for graph propagation, compilation and optimization
//!
//! Run with: cargo bench

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use sensorgraph_rs::{compile_source, optimize, DataStream, DeviceModel, Reading, Simulator};

const PROGRAM: &str = r#"
    every 10 seconds {
        copy average input 1 => output 1;
        copy count input 2 => output 2;
    }
    every 1 minute {
        copy all input 1 => output 3;
    }
    on value(input 1) > 100 {
        copy => unbuffered 4;
    }
    on unbuffered 4 {
        copy => output 4;
    }
    streamer on all outputs;
"#;

fn rollover_model() -> DeviceModel {
    DeviceModel {
        storage_rollover: true,
        ..DeviceModel::default()
    }
}

/// A program with `blocks` independent tick blocks
fn wide_program(blocks: usize) -> String {
    (1..=blocks)
        .map(|i| format!("every {} seconds {{ copy average input {} => output {}; }}\n", i * 10, i, i))
        .collect()
}

fn bench_process_input(c: &mut Criterion) {
    let mut group = c.benchmark_group("process_input");
    group.throughput(Throughput::Elements(1));

    let input: DataStream = "input 1".parse().unwrap();
    for optimized in [false, true] {
        let mut graph = compile_source(PROGRAM, &rollover_model()).unwrap();
        if optimized {
            graph = optimize(&graph).unwrap();
        }
        let name = if optimized { "optimized" } else { "compiled" };

        let mut value = 0i32;
        group.bench_function(name, |b| {
            b.iter(|| {
                value = value.wrapping_add(37) % 200;
                graph
                    .process_input(input, black_box(Reading::new(input, 0, value)), None)
                    .unwrap();
            });
        });
    }

    group.finish();
}

fn bench_simulation(c: &mut Criterion) {
    let mut group = c.benchmark_group("simulation");
    group.sample_size(20);

    for seconds in [600u64, 3600].iter() {
        group.throughput(Throughput::Elements(*seconds));
        group.bench_with_input(BenchmarkId::new("run", seconds), seconds, |b, &seconds| {
            b.iter(|| {
                let graph = compile_source(PROGRAM, &rollover_model()).unwrap();
                let mut sim = Simulator::new(graph);
                sim.stimulus("input 1 = 150").unwrap();
                sim.stop_condition(&format!("run_time {} seconds", seconds)).unwrap();
                sim.run().unwrap();
                black_box(sim.tick_count())
            });
        });
    }

    group.finish();
}

fn bench_compile(c: &mut Criterion) {
    let mut group = c.benchmark_group("compile");
    let model = DeviceModel::default();

    for blocks in [4usize, 16].iter() {
        let source = wide_program(*blocks);
        group.bench_with_input(BenchmarkId::new("compile", blocks), &source, |b, source| {
            b.iter(|| black_box(compile_source(source, &model).unwrap()));
        });

        let graph = compile_source(&source, &model).unwrap();
        group.bench_with_input(BenchmarkId::new("optimize", blocks), &graph, |b, graph| {
            b.iter(|| black_box(optimize(graph).unwrap()));
        });
    }

    group.finish();
}

criterion_group!(benches, bench_process_input, bench_simulation, bench_compile);
criterion_main!(benches);
