use anpr_core::association::{associate, AssociationMethod};
use anpr_core::fusion::{fuse, PlateSample};
use anpr_core::{AnprConfig, BBox, CameraId, CameraPipeline, Detection, Frame, MemorySink, VehicleClass};
use criterion::{black_box, criterion_group, criterion_main, Criterion};

/// `n` vehicles side by side in lanes, all moving down at the same speed.
fn make_frame(n: usize, index: u64) -> Frame {
    let t = index as f64 / 20.0;
    let width = 1.0 / n as f64;
    let detections = (0..n)
        .map(|i| {
            let cx = (i as f64 + 0.5) * width;
            let cy = 0.1 + 0.01 * index as f64;
            Detection::new(
                BBox::from_center_size(cx, cy, width * 0.8, 0.08),
                0.9,
                VehicleClass::Car,
            )
        })
        .collect();
    Frame::new(index, t, 1.0).with_detections(detections)
}

fn bench_pipeline(c: &mut Criterion) {
    let mut group = c.benchmark_group("pipeline");

    for n in [5, 20, 50, 100] {
        group.bench_function(format!("{n}_vehicles"), |b| {
            b.iter(|| {
                let mut pipeline = CameraPipeline::new(CameraId(0), AnprConfig::default())
                    .expect("default config is valid");
                let mut sink = MemorySink::new();
                // Warm up so tracks exist and are confirmed
                for i in 0..3 {
                    pipeline.process_frame(&make_frame(n, i), &mut sink);
                }
                black_box(pipeline.process_frame(&make_frame(n, 3), &mut sink));
            });
        });
    }

    group.finish();
}

fn bench_association(c: &mut Criterion) {
    let mut group = c.benchmark_group("association");
    let n = 100;
    let tracks: Vec<BBox> = make_frame(n, 0).detections.iter().map(|d| d.bbox).collect();
    let dets: Vec<BBox> = make_frame(n, 1).detections.iter().map(|d| d.bbox).collect();
    let confs = vec![0.9; n];

    for method in [AssociationMethod::Greedy, AssociationMethod::Optimal] {
        group.bench_function(format!("{method:?}_{n}"), |b| {
            b.iter(|| black_box(associate(&tracks, &dets, &confs, 0.3, method)));
        });
    }
    group.finish();
}

fn bench_fusion(c: &mut Criterion) {
    let samples: Vec<PlateSample> = ["ABC1234", "A8C1234", "ABC1Z34", "XYZ999", "ABC1234"]
        .iter()
        .enumerate()
        .map(|(i, t)| PlateSample {
            text: t.to_string(),
            confidence: 0.7 + 0.05 * i as f64,
            timestamp: i as f64,
        })
        .collect();
    c.bench_function("fuse_5_samples", |b| b.iter(|| black_box(fuse(&samples, 2, 3))));
}

criterion_group!(benches, bench_pipeline, bench_association, bench_fusion);
criterion_main!(benches);
