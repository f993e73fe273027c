use anyhow::Result;
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use rand::prelude::*;

use image_conv::{
    create_backend, BackendKind, BlockShape, Conv2d, ConvolutionBackend, ExecutionOptions,
    ImageFormat, Matrix,
};

// =====================================================================
// Problem setup
// =====================================================================

/// One benchmarked convolution, in NCHW sizes
struct ConvBench {
    name: &'static str,
    batch: usize,
    channels: usize,
    filters: usize,
    image: (usize, usize),
    filter: (usize, usize),
}

const BENCHES: [ConvBench; 3] = [
    ConvBench { name: "32x16_c5_f7_n4", batch: 4, channels: 5, filters: 7, image: (32, 16), filter: (4, 8) },
    ConvBench { name: "57x33_c22_f15_n3", batch: 3, channels: 22, filters: 15, image: (57, 33), filter: (7, 3) },
    ConvBench { name: "64x64_c16_f32_n8", batch: 8, channels: 16, filters: 32, image: (64, 64), filter: (3, 3) },
];

fn random_matrix(rng: &mut StdRng, rows: usize, cols: usize) -> Result<Matrix<f32>> {
    let values = (0..rows * cols).map(|_| rng.gen_range(-1.0..1.0)).collect();
    Ok(Matrix::from_shape_vec(rows, cols, values)?)
}

struct Inputs {
    image: Matrix<f32>,
    image_shape: BlockShape,
    filter: Matrix<f32>,
    filter_shape: BlockShape,
}

fn prepare(bench: &ConvBench, format: ImageFormat) -> Result<Inputs> {
    let mut rng = StdRng::seed_from_u64(42);
    let (image_rows, image_shape) = match format {
        ImageFormat::NCHW => (bench.batch, BlockShape::new(bench.channels, bench.image.0, bench.image.1)),
        ImageFormat::CNHW => (bench.channels, BlockShape::new(bench.batch, bench.image.0, bench.image.1)),
    };
    let (filter_rows, filter_shape) = match format {
        ImageFormat::NCHW => (bench.filters, BlockShape::new(bench.channels, bench.filter.0, bench.filter.1)),
        ImageFormat::CNHW => (bench.channels, BlockShape::new(bench.filters, bench.filter.0, bench.filter.1)),
    };
    Ok(Inputs {
        image: random_matrix(&mut rng, image_rows, image_shape.row_len())?,
        image_shape,
        filter: random_matrix(&mut rng, filter_rows, filter_shape.row_len())?,
        filter_shape,
    })
}

fn run(conv: &Conv2d, backend: &dyn ConvolutionBackend<f32>, inputs: &Inputs, output: &mut Matrix<f32>, output_shape: BlockShape) -> Result<()> {
    conv.compute(
        backend,
        &inputs.image,
        &inputs.filter,
        output,
        inputs.image_shape,
        inputs.filter_shape,
        output_shape,
    )?;
    Ok(())
}

// =====================================================================
// Criterion Benchmark Functions
// =====================================================================

fn criterion_benchmark(c: &mut Criterion) {
    let mut group = c.benchmark_group("convolution");
    group.sample_size(10);

    let backends: Vec<(BackendKind, Box<dyn ConvolutionBackend<f32>>)> = [BackendKind::Reference, BackendKind::Parallel]
        .into_iter()
        .map(|kind| {
            let options = ExecutionOptions::new().set_backend(kind).set_workspace_size(0);
            let backend = create_backend(&options).expect("failed to create backend");
            (kind, backend)
        })
        .collect();

    for bench in &BENCHES {
        for format in [ImageFormat::NCHW, ImageFormat::CNHW] {
            let inputs = prepare(bench, format).expect("failed to prepare inputs");
            let conv = Conv2d::new()
                .with_same_padding(bench.filter.0, bench.filter.1)
                .with_formats(format, format, format)
                .with_flip(true);
            let (mut output, output_shape) = conv
                .allocate_output(&inputs.image, inputs.image_shape, &inputs.filter, inputs.filter_shape)
                .expect("failed to allocate output");

            for (kind, backend) in &backends {
                let id = BenchmarkId::new(format!("{}/{}", kind, format), bench.name);
                group.bench_function(id, |b| {
                    b.iter(|| {
                        run(&conv, backend.as_ref(), black_box(&inputs), &mut output, output_shape)
                            .expect("convolution failed");
                    });
                });
            }
        }
    }

    group.finish();
}

criterion_group!(benches, criterion_benchmark);
criterion_main!(benches);
