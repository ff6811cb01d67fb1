use criterion::{black_box, criterion_group, criterion_main, Criterion};
use sprd_pp::pp::planner;
use sprd_pp::{BufferConfig, ConversionSpec, PixelFormat, PpConfig, Roadmap, Size, Transform};

fn bench_plan(c: &mut Criterion) {
    let config = PpConfig::default();

    c.bench_function("plan single pass", |b| {
        b.iter(|| planner::plan(black_box(Size::FHD_1080P), black_box(Size::HD_720P), &config))
    });

    c.bench_function("plan two pass", |b| {
        b.iter(|| {
            planner::plan(
                black_box(Size::FHD_1080P),
                black_box(Size::new(200, 100)),
                &config,
            )
        })
    });
}

fn bench_roadmap(c: &mut Criterion) {
    let config = PpConfig::default();
    let spec = ConversionSpec::new(
        BufferConfig::full(PixelFormat::NV12, Size::new(1080, 1920)),
        BufferConfig::full(PixelFormat::XRGB8888, Size::new(200, 1080)),
    )
    .with_transform(Transform::Rotate90);

    c.bench_function("roadmap rotated downscale", |b| {
        b.iter(|| Roadmap::build(black_box(&spec), &config))
    });
}

criterion_group!(benches, bench_plan, bench_roadmap);
criterion_main!(benches);
