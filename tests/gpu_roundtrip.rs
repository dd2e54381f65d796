//! Write/read round trips through real device storage, including the
//! packed layouts, offset clamping, and buffer lifecycle. Tests skip when
//! the host has no usable adapter.

use gpu_runtime::{DataType, GpuError, GpuRuntime, RuntimeOptions};

/// Builds an initialized runtime, or `None` when the host has no adapter.
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
fn u8_round_trip() {
    let Some(rt) = runtime() else { return };

    let buffer = rt.create_buffer(10, DataType::U8).unwrap();
    let input: Vec<u8> = (1..=10).collect();
    buffer.write(&input).unwrap();

    let mut out = [0u8; 10];
    let read = buffer.read(&mut out, 0).unwrap();
    assert_eq!(read, 10);
    assert_eq!(out.as_slice(), input.as_slice());
}

#[test]
fn i8_round_trip_preserves_sign() {
    let Some(rt) = runtime() else { return };

    let buffer = rt.create_buffer(10, DataType::I8).unwrap();
    let input: Vec<i8> = (1..=10).map(|i| -i).collect();
    buffer.write(&input).unwrap();

    let mut out = [0i8; 10];
    buffer.read(&mut out, 0).unwrap();
    assert_eq!(out.as_slice(), input.as_slice());

    // The extremes must not wrap.
    let buffer = rt.create_buffer(2, DataType::I8).unwrap();
    buffer.write(&[-128i8, 127]).unwrap();
    let mut out = [0i8; 2];
    buffer.read(&mut out, 0).unwrap();
    assert_eq!(out, [-128, 127]);
}

#[test]
fn f64_round_trip_is_bit_exact() {
    let Some(rt) = runtime() else { return };

    let buffer = rt.create_buffer(10, DataType::F64).unwrap();
    let input = [1.1f64, 2.2, 3.3, 4.4, 5.5, 6.6, 7.7, 8.8, 9.9, 10.0];
    buffer.write(&input).unwrap();

    let mut out = [0.0f64; 10];
    buffer.read(&mut out, 0).unwrap();
    for (expected, actual) in input.iter().zip(out.iter()) {
        assert_eq!(expected.to_bits(), actual.to_bits());
    }
}

#[test]
fn i64_round_trip_preserves_sign() {
    let Some(rt) = runtime() else { return };

    let buffer = rt.create_buffer(4, DataType::I64).unwrap();
    let input = [i64::MIN, -1, 1, i64::MAX];
    buffer.write(&input).unwrap();

    let mut out = [0i64; 4];
    buffer.read(&mut out, 0).unwrap();
    assert_eq!(out, input);
}

#[test]
fn f32_round_trip() {
    let Some(rt) = runtime() else { return };

    let buffer = rt.create_buffer(100, DataType::F32).unwrap();
    let input: Vec<f32> = (0..100).map(|i| i as f32 * 0.5).collect();
    buffer.write(&input).unwrap();

    let mut out = vec![0.0f32; 100];
    buffer.read(&mut out, 0).unwrap();
    assert_eq!(out, input);
}

#[test]
fn u16_offset_read_returns_the_requested_window() {
    let Some(rt) = runtime() else { return };

    let buffer = rt.create_buffer(10, DataType::U16).unwrap();
    let input: Vec<u16> = (1..=10).map(|i| i * 100).collect();
    buffer.write(&input).unwrap();

    // Elements 2..6, starting mid-word in the packed layout.
    let mut out = [0u16; 4];
    let read = buffer.read(&mut out, 2).unwrap();
    assert_eq!(read, 4);
    assert_eq!(out, [300, 400, 500, 600]);
}

#[test]
fn reads_clamp_to_the_stored_count() {
    let Some(rt) = runtime() else { return };

    let buffer = rt.create_buffer(10, DataType::I16).unwrap();
    let input: Vec<i16> = (0..10).map(|i| i - 5).collect();
    buffer.write(&input).unwrap();

    // Offset past the end: zero elements, output untouched.
    let mut out = [7i16; 4];
    assert_eq!(buffer.read(&mut out, 10).unwrap(), 0);
    assert_eq!(buffer.read(&mut out, 100).unwrap(), 0);
    assert_eq!(out, [7; 4]);

    // Window crossing the end clamps to the remainder.
    let mut out = [0i16; 8];
    let read = buffer.read(&mut out, 7).unwrap();
    assert_eq!(read, 3);
    assert_eq!(&out[..3], &input[7..]);
    assert_eq!(&out[3..], &[0; 5]);
}

#[test]
fn physical_sizes_respect_the_packing_invariants() {
    let Some(rt) = runtime() else { return };

    for (data_type, count, expected) in [
        (DataType::U8, 10, 12),
        (DataType::I8, 1, 4),
        (DataType::U16, 5, 12),
        (DataType::F32, 3, 12),
        (DataType::F64, 3, 24),
        (DataType::U64, 1, 8),
    ] {
        let buffer = rt.create_buffer(count, data_type).unwrap();
        assert_eq!(buffer.physical_size(), expected, "{data_type} x{count}");
        assert_eq!(buffer.physical_size() % 4, 0);
        assert!(buffer.physical_size() >= data_type.required_bytes(count));
        assert_eq!(buffer.is_packed(), data_type.needs_packing());
        assert_eq!(buffer.len(), count);
    }
}

#[test]
fn zero_count_buffers_are_inert() {
    let Some(rt) = runtime() else { return };

    let mut buffer = rt.create_buffer(0, DataType::F32).unwrap();
    assert_eq!(buffer.physical_size(), 0);
    assert!(buffer.is_empty());

    buffer.write(&[1.0f32, 2.0]).unwrap();
    let mut out = [9.0f32; 2];
    assert_eq!(buffer.read(&mut out, 0).unwrap(), 0);
    assert_eq!(out, [9.0; 2]);

    buffer.release();
    buffer.release(); // idempotent
}

#[test]
fn oversized_writes_fail_without_touching_the_device() {
    let Some(rt) = runtime() else { return };

    let buffer = rt.create_buffer(4, DataType::F32).unwrap();
    let err = buffer.write(&[0.0f32; 5]).unwrap_err();
    match err {
        GpuError::SizeMismatch {
            required,
            available,
            ..
        } => {
            assert_eq!(required, 20);
            assert_eq!(available, 16);
        }
        other => panic!("expected SizeMismatch, got {other}"),
    }
}

#[test]
fn released_buffers_reject_further_operations() {
    let Some(rt) = runtime() else { return };

    let mut buffer = rt.create_buffer(4, DataType::U32).unwrap();
    buffer.write(&[1u32, 2, 3, 4]).unwrap();
    buffer.release();

    assert!(matches!(
        buffer.write(&[1u32]),
        Err(GpuError::InvalidState { .. })
    ));
    let mut out = [0u32; 4];
    assert!(matches!(
        buffer.read(&mut out, 0),
        Err(GpuError::InvalidState { .. })
    ));
}

#[test]
fn mismatched_read_type_is_rejected() {
    let Some(rt) = runtime() else { return };

    let buffer = rt.create_buffer(4, DataType::U32).unwrap();
    buffer.write(&[1u32, 2, 3, 4]).unwrap();

    let mut out = [0i32; 4];
    assert!(matches!(
        buffer.read(&mut out, 0),
        Err(GpuError::InvalidArgument { .. })
    ));
}

#[test]
fn async_read_delivers_on_the_worker() {
    let Some(rt) = runtime() else { return };

    let buffer = rt.create_buffer(6, DataType::U16).unwrap();
    buffer.write(&[10u16, 20, 30, 40, 50, 60]).unwrap();

    let (tx, rx) = std::sync::mpsc::channel();
    buffer
        .read_async::<u16>(3, 1, move |result| {
            let _ = tx.send(result);
        })
        .unwrap();

    let values = rx
        .recv_timeout(std::time::Duration::from_secs(30))
        .expect("callback never fired")
        .expect("read failed");
    assert_eq!(values, vec![20, 30, 40]);
}

#[test]
fn device_loss_invalidates_old_buffers_and_recovers() {
    let Some(rt) = runtime() else { return };

    let stale = rt.create_buffer(4, DataType::F32).unwrap();
    stale.write(&[1.0f32, 2.0, 3.0, 4.0]).unwrap();
    let generation_before = rt.context_generation();

    rt.simulate_device_loss();

    // The next driver access re-initializes; the pre-loss handle fails.
    assert!(matches!(
        stale.write(&[5.0f32]),
        Err(GpuError::InvalidState { .. })
    ));
    assert!(rt.context_generation() > generation_before);

    // A buffer created on the recovered device works end to end.
    let fresh = rt.create_buffer(4, DataType::F32).unwrap();
    fresh.write(&[5.0f32, 6.0, 7.0, 8.0]).unwrap();
    let mut out = [0.0f32; 4];
    fresh.read(&mut out, 0).unwrap();
    assert_eq!(out, [5.0, 6.0, 7.0, 8.0]);
}
