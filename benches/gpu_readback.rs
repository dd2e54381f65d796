use criterion::*;
use std::hint::black_box;

use gpu_runtime::{DataType, GpuError, GpuRuntime, RuntimeOptions};

const ELEMENTS: usize = 1 << 18;

fn runtime() -> Option<GpuRuntime> {
    let runtime = GpuRuntime::new(RuntimeOptions::default());
    match runtime.initialize() {
        Ok(()) => Some(runtime),
        Err(GpuError::DriverUnavailable { .. }) => {
            eprintln!("no gpu adapter available; skipping gpu benches");
            None
        }
        Err(e) => panic!("initialization failed: {e}"),
    }
}

fn readback_benchmark(c: &mut Criterion) {
    let Some(rt) = runtime() else { return };

    let mut group = c.benchmark_group("readback");

    {
        let buffer = rt.create_buffer(ELEMENTS, DataType::F32).unwrap();
        let data: Vec<f32> = (0..ELEMENTS).map(|i| i as f32).collect();
        buffer.write(&data).unwrap();
        let mut out = vec![0.0f32; ELEMENTS];

        group.bench_function("read_f32_256k", |b| {
            b.iter(|| {
                buffer.read(&mut out, 0).unwrap();
                black_box(out[ELEMENTS - 1]);
            });
        });
    }

    {
        // Packed path: word staging plus lane extraction on the host.
        let buffer = rt.create_buffer(ELEMENTS, DataType::U8).unwrap();
        let data: Vec<u8> = (0..ELEMENTS).map(|i| i as u8).collect();
        buffer.write(&data).unwrap();
        let mut out = vec![0u8; ELEMENTS];

        group.bench_function("read_u8_packed_256k", |b| {
            b.iter(|| {
                buffer.read(&mut out, 0).unwrap();
                black_box(out[ELEMENTS - 1]);
            });
        });
    }

    group.finish();
}

fn upload_benchmark(c: &mut Criterion) {
    let Some(rt) = runtime() else { return };

    let mut group = c.benchmark_group("upload");

    {
        let buffer = rt.create_buffer(ELEMENTS, DataType::F32).unwrap();
        let data: Vec<f32> = (0..ELEMENTS).map(|i| i as f32).collect();
        group.bench_function("write_f32_256k", |b| {
            b.iter(|| buffer.write(black_box(&data)).unwrap());
        });
    }

    {
        let buffer = rt.create_buffer(ELEMENTS, DataType::I16).unwrap();
        let data: Vec<i16> = (0..ELEMENTS).map(|i| i as i16).collect();
        group.bench_function("write_i16_packed_256k", |b| {
            b.iter(|| buffer.write(black_box(&data)).unwrap());
        });
    }

    group.finish();
}

criterion_group!(benches, readback_benchmark, upload_benchmark);
criterion_main!(benches);
