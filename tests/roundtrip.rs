//! End-to-end write/read round trips through real files.

use std::sync::Arc;

use tiffstack::prelude::*;

fn calibration() -> Calibration {
    Calibration {
        pixel_width: 0.25,
        pixel_height: 0.25,
        pixel_depth: 2.0,
        unit: Some("um".to_owned()),
        frame_interval: 0.5,
    }
}

fn write_and_reopen(
    options: WriteOptions,
    kind: PixelKind,
    depth: usize,
    make_plane: impl Fn(usize) -> PixelBuffer,
) -> (tempfile::TempDir, SliceAccessor) {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("stack.tif");
    let writer = SliceAccessor::open_for_write(&path, 8, 6, depth, kind, calibration(), options)
        .expect("open for write");
    for i in 0..depth {
        writer.put_slice(i, &make_plane(i)).expect("put slice");
    }
    drop(writer);
    let stack = SliceAccessor::open_for_read(&path).expect("reopen for read");
    // The accessor reopens the file on demand, so the tempdir must outlive it.
    (dir, stack)
}

fn u16_plane(i: usize) -> PixelBuffer {
    PixelBuffer::U16((0..48).map(|p| (i * 500 + p) as u16).collect())
}

fn u8_plane(i: usize) -> PixelBuffer {
    PixelBuffer::U8((0..48).map(|p| (i * 10 + p) as u8).collect())
}

fn f32_plane(i: usize) -> PixelBuffer {
    PixelBuffer::F32((0..48).map(|p| i as f32 + p as f32 / 100.0).collect())
}

#[test]
fn roundtrip_short_classic_little() {
    let (_dir, stack) = write_and_reopen(WriteOptions::default(), PixelKind::U16, 4, u16_plane);
    assert_eq!(stack.n_slices(), 4);
    assert_eq!(stack.pixel_kind(), PixelKind::U16);
    for i in 0..4 {
        assert_eq!(*stack.get_slice(i, true).unwrap(), u16_plane(i));
    }
}

#[test]
fn roundtrip_short_classic_big() {
    let options = WriteOptions {
        wide: false,
        little_endian: false,
    };
    let (_dir, stack) = write_and_reopen(options, PixelKind::U16, 3, u16_plane);
    assert!(!stack.metadata().little_endian);
    for i in 0..3 {
        assert_eq!(*stack.get_slice(i, true).unwrap(), u16_plane(i));
    }
}

#[test]
fn roundtrip_byte_wide_little() {
    let options = WriteOptions {
        wide: true,
        little_endian: true,
    };
    let (_dir, stack) = write_and_reopen(options, PixelKind::U8, 5, u8_plane);
    assert!(stack.metadata().wide);
    for i in 0..5 {
        assert_eq!(*stack.get_slice(i, true).unwrap(), u8_plane(i));
    }
}

#[test]
fn roundtrip_float_wide_big() {
    let options = WriteOptions {
        wide: true,
        little_endian: false,
    };
    let (_dir, stack) = write_and_reopen(options, PixelKind::F32, 3, f32_plane);
    assert_eq!(stack.pixel_kind(), PixelKind::F32);
    for i in 0..3 {
        assert_eq!(*stack.get_slice(i, true).unwrap(), f32_plane(i));
    }
}

#[test]
fn calibration_survives_roundtrip() {
    let (_dir, stack) = write_and_reopen(WriteOptions::default(), PixelKind::U16, 4, u16_plane);
    let cal = stack.calibration();
    assert!((cal.pixel_width - 0.25).abs() < 1e-6);
    assert!((cal.pixel_height - 0.25).abs() < 1e-6);
    assert!((cal.pixel_depth - 2.0).abs() < 1e-9);
    assert_eq!(cal.unit.as_deref(), Some("um"));
    assert!((cal.frame_interval - 0.5).abs() < 1e-9);
}

#[test]
fn early_close_truncates_and_reopens() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("partial.tif");
    let writer = SliceAccessor::open_for_write(
        &path,
        8,
        6,
        10,
        PixelKind::U16,
        calibration(),
        WriteOptions::default(),
    )
    .unwrap();
    for i in 0..3 {
        writer.put_slice(i, &u16_plane(i)).unwrap();
    }
    writer.close_early().unwrap();

    let stack = SliceAccessor::open_for_read(&path).unwrap();
    assert_eq!(stack.n_slices(), 3);
    for i in 0..3 {
        assert_eq!(*stack.get_slice(i, true).unwrap(), u16_plane(i));
    }
    assert!(stack.get_slice(3, true).is_err());
}

#[test]
fn read_before_write_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("stack.tif");
    let writer = SliceAccessor::open_for_write(
        &path,
        8,
        6,
        2,
        PixelKind::U16,
        calibration(),
        WriteOptions::default(),
    )
    .unwrap();
    assert!(writer.get_slice(0, true).is_err());
    writer.put_slice(0, &u16_plane(0)).unwrap();
    assert!(writer.get_slice(0, true).is_ok());
    assert!(writer.get_slice(1, true).is_err());
}

#[test]
fn out_of_order_write_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("stack.tif");
    let writer = SliceAccessor::open_for_write(
        &path,
        8,
        6,
        3,
        PixelKind::U16,
        calibration(),
        WriteOptions::default(),
    )
    .unwrap();
    writer.put_slice(0, &u16_plane(0)).unwrap();
    assert!(writer.put_slice(2, &u16_plane(2)).is_err());
    // Repeating an index is just as out of order.
    assert!(writer.put_slice(0, &u16_plane(0)).is_err());
    writer.put_slice(1, &u16_plane(1)).unwrap();
}

#[test]
fn concurrent_readers_agree() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("stack.tif");
    let writer = SliceAccessor::open_for_write(
        &path,
        8,
        6,
        4,
        PixelKind::U16,
        calibration(),
        WriteOptions::default(),
    )
    .unwrap();
    for i in 0..4 {
        writer.put_slice(i, &u16_plane(i)).unwrap();
    }
    drop(writer);

    let stack = Arc::new(SliceAccessor::open_for_read(&path).unwrap());
    let mut handles = Vec::new();
    for t in 0..8 {
        let stack = Arc::clone(&stack);
        handles.push(std::thread::spawn(move || {
            let index = t % 4;
            let got = stack.get_slice(index, true).unwrap();
            assert_eq!(*got, u16_plane(index));
        }));
    }
    for h in handles {
        h.join().unwrap();
    }
}

#[test]
fn dump_buffer_matches_encoded_write() {
    let dir = tempfile::tempdir().unwrap();
    let a = dir.path().join("a.tif");
    let b = dir.path().join("b.tif");

    let writer = SliceAccessor::open_for_write(
        &a,
        8,
        6,
        1,
        PixelKind::U8,
        calibration(),
        WriteOptions::default(),
    )
    .unwrap();
    writer.put_slice(0, &u8_plane(0)).unwrap();

    let raw = match u8_plane(0) {
        PixelBuffer::U8(v) => v,
        _ => unreachable!(),
    };
    let dumper = SliceAccessor::open_for_write(
        &b,
        8,
        6,
        1,
        PixelKind::U8,
        calibration(),
        WriteOptions::default(),
    )
    .unwrap();
    dumper.dump_buffer(0, &raw).unwrap();

    assert_eq!(std::fs::read(&a).unwrap(), std::fs::read(&b).unwrap());
}
