//! Kernel dispatch, pipeline-cache invalidation, and the on-device
//! conversion kernels, exercised against a real adapter. Tests skip when
//! the host has none.

use gpu_runtime::kernels;
use gpu_runtime::{DataType, GpuError, GpuRuntime, RuntimeOptions};

const ADD_SCALAR_KERNEL: &str = r#"
@group(0) @binding(0) var<storage, read_write> inp: array<f32>;
@group(0) @binding(1) var<storage, read_write> out: array<f32>;

@compute @workgroup_size(256)
fn main(@builtin(global_invocation_id) gid: vec3<u32>) {
    let i = gid.x;
    if (i < arrayLength(&inp)) {
        out[i] = inp[i] + 0.2;
    }
}
"#;

const SCALE_KERNEL: &str = r#"
@group(0) @binding(0) var<storage, read_write> inp: array<f32>;
@group(0) @binding(1) var<storage, read_write> out: array<f32>;

@compute @workgroup_size(256)
fn main(@builtin(global_invocation_id) gid: vec3<u32>) {
    let i = gid.x;
    if (i < arrayLength(&inp)) {
        out[i] = inp[i] * 2.0;
    }
}
"#;

fn runtime() -> Option<GpuRuntime> {
    let _ = env_logger::builder().is_test(true).try_init();
    let runtime = GpuRuntime::new(RuntimeOptions::default());
    match runtime.initialize() {
        Ok(()) => Some(runtime),
        Err(GpuError::DriverUnavailable { .. }) => {
            eprintln!("no gpu adapter available; skipping");
            None
        }
        Err(e) => panic!("unexpected initialization failure: {e}"),
    }
}

#[test]
fn dispatch_applies_the_kernel_to_every_element() {
    let Some(rt) = runtime() else { return };

    let input = rt.create_buffer(100, DataType::F32).unwrap();
    let output = rt.create_buffer(100, DataType::F32).unwrap();
    let data: Vec<f32> = (0..100).map(|i| i as f32).collect();
    input.write(&data).unwrap();

    let shader = rt.create_shader();
    shader.load_kernel(ADD_SCALAR_KERNEL);
    shader.set_buffer(0, &input);
    shader.set_buffer(1, &output);
    shader.dispatch(1, 1, 1).unwrap();

    // The read is enqueued after the dispatch, so FIFO ordering makes the
    // result visible without explicit synchronization.
    let mut out = vec![0.0f32; 100];
    output.read(&mut out, 0).unwrap();
    for (i, value) in out.iter().enumerate() {
        assert_eq!(*value, i as f32 + 0.2, "element {i}");
    }
}

#[test]
fn repeat_dispatches_build_artifacts_exactly_once() {
    let Some(rt) = runtime() else { return };

    let input = rt.create_buffer(64, DataType::F32).unwrap();
    let output = rt.create_buffer(64, DataType::F32).unwrap();
    input.write(&[1.0f32; 64]).unwrap();

    let shader = rt.create_shader();
    shader.load_kernel(ADD_SCALAR_KERNEL);
    shader.set_buffer(0, &input);
    shader.set_buffer(1, &output);

    for _ in 0..16 {
        shader.dispatch(1, 1, 1).unwrap();
    }

    // Flush the worker queue behind the dispatches.
    let mut out = vec![0.0f32; 64];
    output.read(&mut out, 0).unwrap();

    assert_eq!(shader.pipeline_builds(), 1);
    assert_eq!(shader.bind_group_builds(), 1);
}

#[test]
fn source_changes_rebuild_the_pipeline_and_bind_group() {
    let Some(rt) = runtime() else { return };

    let input = rt.create_buffer(8, DataType::F32).unwrap();
    let output = rt.create_buffer(8, DataType::F32).unwrap();
    input.write(&[1.0f32; 8]).unwrap();

    let shader = rt.create_shader();
    shader.load_kernel(ADD_SCALAR_KERNEL);
    shader.set_buffer(0, &input);
    shader.set_buffer(1, &output);
    shader.dispatch(1, 1, 1).unwrap();

    let mut out = [0.0f32; 8];
    output.read(&mut out, 0).unwrap();
    assert_eq!(shader.pipeline_builds(), 1);
    assert_eq!(shader.bind_group_builds(), 1);

    // New source: full pipeline rebuild, which forces a bind-group rebuild.
    shader.load_kernel(SCALE_KERNEL);
    shader.dispatch(1, 1, 1).unwrap();
    output.read(&mut out, 0).unwrap();
    assert_eq!(shader.pipeline_builds(), 2);
    assert_eq!(shader.bind_group_builds(), 2);
    assert_eq!(out, [2.0f32; 8]);
}

#[test]
fn binding_changes_rebuild_only_the_bind_group() {
    let Some(rt) = runtime() else { return };

    let input = rt.create_buffer(8, DataType::F32).unwrap();
    let output_a = rt.create_buffer(8, DataType::F32).unwrap();
    let output_b = rt.create_buffer(8, DataType::F32).unwrap();
    input.write(&[3.0f32; 8]).unwrap();

    let shader = rt.create_shader();
    shader.load_kernel(SCALE_KERNEL);
    shader.set_buffer(0, &input);
    shader.set_buffer(1, &output_a);
    shader.dispatch(1, 1, 1).unwrap();

    let mut out = [0.0f32; 8];
    output_a.read(&mut out, 0).unwrap();
    assert_eq!(out, [6.0f32; 8]);

    // Rebinding the same buffer is a no-op.
    shader.set_buffer(1, &output_a);
    shader.dispatch(1, 1, 1).unwrap();
    output_a.read(&mut out, 0).unwrap();
    assert_eq!(shader.bind_group_builds(), 1);

    // A different buffer dirties only the bind group.
    shader.set_buffer(1, &output_b);
    shader.dispatch(1, 1, 1).unwrap();
    output_b.read(&mut out, 0).unwrap();
    assert_eq!(out, [6.0f32; 8]);
    assert_eq!(shader.pipeline_builds(), 1);
    assert_eq!(shader.bind_group_builds(), 2);
}

#[test]
fn async_dispatch_invokes_the_callback_after_submission() {
    let Some(rt) = runtime() else { return };

    let input = rt.create_buffer(8, DataType::F32).unwrap();
    let output = rt.create_buffer(8, DataType::F32).unwrap();
    input.write(&[1.5f32; 8]).unwrap();

    let shader = rt.create_shader();
    shader.load_kernel(SCALE_KERNEL);
    shader.set_buffer(0, &input);
    shader.set_buffer(1, &output);

    let (tx, rx) = std::sync::mpsc::channel();
    shader
        .dispatch_async(1, 1, 1, move || {
            let _ = tx.send(());
        })
        .unwrap();
    rx.recv_timeout(std::time::Duration::from_secs(30))
        .expect("callback never fired");

    let mut out = [0.0f32; 8];
    output.read(&mut out, 0).unwrap();
    assert_eq!(out, [3.0f32; 8]);
}

#[test]
fn packed_i8_unpacks_to_sign_extended_i32_on_device() {
    let Some(rt) = runtime() else { return };

    let packed = rt.create_buffer(10, DataType::I8).unwrap();
    let wide = rt.create_buffer(10, DataType::I32).unwrap();
    let input: Vec<i8> = (1..=10).map(|i| -i).collect();
    packed.write(&input).unwrap();

    kernels::unpack_i8(&rt, &packed, &wide).unwrap();

    let mut out = [0i32; 10];
    wide.read(&mut out, 0).unwrap();
    let expected: Vec<i32> = input.iter().map(|&v| v as i32).collect();
    assert_eq!(out.as_slice(), expected.as_slice());
}

#[test]
fn wide_i32_packs_back_to_i8_on_device() {
    let Some(rt) = runtime() else { return };

    let wide = rt.create_buffer(6, DataType::I32).unwrap();
    let packed = rt.create_buffer(6, DataType::I8).unwrap();
    wide.write(&[-1i32, -2, 3, 4, -5, 6]).unwrap();

    kernels::pack_i8(&rt, &wide, &packed).unwrap();

    let mut out = [0i8; 6];
    packed.read(&mut out, 0).unwrap();
    assert_eq!(out, [-1, -2, 3, 4, -5, 6]);
}

#[test]
fn packed_u16_unpacks_to_u32_on_device() {
    let Some(rt) = runtime() else { return };

    let packed = rt.create_buffer(5, DataType::U16).unwrap();
    let wide = rt.create_buffer(5, DataType::U32).unwrap();
    packed.write(&[100u16, 200, 300, 400, 500]).unwrap();

    kernels::unpack_u16(&rt, &packed, &wide).unwrap();

    let mut out = [0u32; 5];
    wide.read(&mut out, 0).unwrap();
    assert_eq!(out, [100, 200, 300, 400, 500]);
}

#[test]
fn f64_pairs_split_and_merge_on_device() {
    let Some(rt) = runtime() else { return };

    let source = rt.create_buffer(4, DataType::F64).unwrap();
    let planes = rt.create_buffer(8, DataType::U32).unwrap();
    let rebuilt = rt.create_buffer(4, DataType::F64).unwrap();
    let input = [1.25f64, -2.5, 3.75, 1e300];
    source.write(&input).unwrap();

    kernels::split_word_pairs(&rt, &source, &planes).unwrap();
    kernels::merge_word_pairs(&rt, &planes, &rebuilt).unwrap();

    let mut out = [0.0f64; 4];
    rebuilt.read(&mut out, 0).unwrap();
    for (expected, actual) in input.iter().zip(out.iter()) {
        assert_eq!(expected.to_bits(), actual.to_bits());
    }

    // The planar layout puts every low word before every high word.
    let mut words = [0u32; 8];
    planes.read(&mut words, 0).unwrap();
    for (i, value) in input.iter().enumerate() {
        assert_eq!(words[i], value.to_bits() as u32);
        assert_eq!(words[4 + i], (value.to_bits() >> 32) as u32);
    }
}

#[test]
fn conversion_dispatches_reject_oversized_grids() {
    let too_many = kernels::MAX_TOTAL_INVOCATIONS + 1;
    assert!(matches!(
        kernels::workgroups_for(too_many),
        Err(GpuError::DispatchTooLarge { .. })
    ));
    assert_eq!(kernels::workgroups_for(256).unwrap(), 1);
    assert_eq!(kernels::workgroups_for(257).unwrap(), 2);
    assert_eq!(
        kernels::workgroups_for(kernels::MAX_TOTAL_INVOCATIONS).unwrap(),
        kernels::MAX_WORKGROUPS_X as u32
    );
}

#[test]
fn conversion_kernels_validate_buffer_types() {
    let Some(rt) = runtime() else { return };

    let not_packed = rt.create_buffer(4, DataType::F32).unwrap();
    let wide = rt.create_buffer(4, DataType::I32).unwrap();
    assert!(matches!(
        kernels::unpack_i8(&rt, &not_packed, &wide),
        Err(GpuError::InvalidArgument { .. })
    ));

    let packed = rt.create_buffer(8, DataType::I8).unwrap();
    let too_small = rt.create_buffer(4, DataType::I32).unwrap();
    assert!(matches!(
        kernels::unpack_i8(&rt, &packed, &too_small),
        Err(GpuError::SizeMismatch { .. })
    ));
}

#[test]
fn writes_from_other_threads_serialize_against_dispatches() {
    let Some(rt) = runtime() else { return };

    let input = rt.create_buffer(256, DataType::F32).unwrap();
    let output = rt.create_buffer(256, DataType::F32).unwrap();
    input.write(&[0.0f32; 256]).unwrap();

    let shader = rt.create_shader();
    shader.load_kernel(SCALE_KERNEL);
    shader.set_buffer(0, &input);
    shader.set_buffer(1, &output);

    // Interleave writes and dispatches from two threads; the shared lock
    // and worker FIFO must keep every read observing a consistent doubling
    // of some written value.
    std::thread::scope(|scope| {
        let writer = {
            let input = &input;
            scope.spawn(move || {
                for round in 1..=8 {
                    input.write(&[round as f32; 256]).unwrap();
                }
            })
        };
        for _ in 0..8 {
            shader.dispatch(1, 1, 1).unwrap();
        }
        writer.join().unwrap();
    });

    shader.dispatch(1, 1, 1).unwrap();
    let mut out = [0.0f32; 256];
    output.read(&mut out, 0).unwrap();
    // The final dispatch ran after the last write.
    assert_eq!(out, [16.0f32; 256]);
}
