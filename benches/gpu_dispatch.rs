use criterion::*;
use std::hint::black_box;

use gpu_runtime::{DataType, GpuError, GpuRuntime, RuntimeOptions};

const SCALE_KERNEL: &str = r#"
@group(0) @binding(0) var<storage, read_write> inp: array<f32>;
@group(0) @binding(1) var<storage, read_write> out: array<f32>;

@compute @workgroup_size(256)
fn main(@builtin(global_invocation_id) gid: vec3<u32>) {
    let i = gid.x;
    if (i < arrayLength(&inp)) {
        out[i] = inp[i] * 1.0001;
    }
}
"#;

const ELEMENTS: usize = 1 << 20;

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

fn dispatch_hot_benchmark(c: &mut Criterion) {
    let Some(rt) = runtime() else { return };

    let input = rt.create_buffer(ELEMENTS, DataType::F32).unwrap();
    let output = rt.create_buffer(ELEMENTS, DataType::F32).unwrap();
    input
        .write(&(0..ELEMENTS).map(|i| i as f32).collect::<Vec<_>>())
        .unwrap();

    let shader = rt.create_shader();
    shader.load_kernel(SCALE_KERNEL);
    shader.set_buffer(0, &input);
    shader.set_buffer(1, &output);

    let groups = (ELEMENTS as u32).div_ceil(256);

    // Warm the pipeline cache so the loop measures cached dispatches.
    shader.dispatch(groups, 1, 1).unwrap();
    let mut flush = [0.0f32; 1];
    output.read(&mut flush, 0).unwrap();

    c.bench_function("dispatch_cached_1M", |b| {
        b.iter(|| {
            shader.dispatch(groups, 1, 1).unwrap();
            output.read(&mut flush, 0).unwrap();
            black_box(flush[0]);
        });
    });
}

criterion_group!(benches, dispatch_hot_benchmark);
criterion_main!(benches);
