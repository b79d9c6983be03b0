//! Frame-boundary stability: values round-trip identically no matter how
//! the underlying buffer size splits them across reads and writes.

use nandroid_bridge::wire::{FrameReader, FrameWriter};

fn round_trip_strings(buffer_size: usize, strings: &[&str]) {
    let mut bytes = Vec::new();
    {
        let mut writer = FrameWriter::with_buffer_size(&mut bytes, buffer_size);
        for s in strings {
            writer.write_utf8_string(s).unwrap();
        }
        writer.flush().unwrap();
    }

    let mut reader = FrameReader::with_buffer_size(bytes.as_slice(), buffer_size);
    for expected in strings {
        let got = reader.read_utf8_string().unwrap();
        assert_eq!(&got, expected);
    }
}

#[test]
fn strings_round_trip_across_varied_buffer_sizes() {
    let strings = ["", "a", "hello world", &"x".repeat(10_000)];
    for buffer_size in [1usize, 7, 4096, 65536] {
        round_trip_strings(buffer_size, &strings);
    }
}

#[test]
fn mixed_scalar_and_string_frames_round_trip() {
    let mut bytes = Vec::new();
    {
        let mut writer = FrameWriter::with_buffer_size(&mut bytes, 1);
        writer.write_u8(7).unwrap();
        writer.write_u16(300).unwrap();
        writer.write_u32(70_000).unwrap();
        writer.write_u64(5_000_000_000).unwrap();
        writer.write_i64(-42).unwrap();
        writer.write_bool(true).unwrap();
        writer.write_utf8_string("payload").unwrap();
        writer.flush().unwrap();
    }

    let mut reader = FrameReader::with_buffer_size(bytes.as_slice(), 3);
    assert_eq!(reader.read_u8().unwrap(), 7);
    assert_eq!(reader.read_u16().unwrap(), 300);
    assert_eq!(reader.read_u32().unwrap(), 70_000);
    assert_eq!(reader.read_u64().unwrap(), 5_000_000_000);
    assert_eq!(reader.read_i64().unwrap(), -42);
    assert!(reader.read_bool().unwrap());
    assert_eq!(reader.read_utf8_string().unwrap(), "payload");
}

#[test]
fn oversized_string_is_a_hard_write_failure() {
    let mut bytes = Vec::new();
    let mut writer = FrameWriter::with_buffer_size(&mut bytes, 4096);
    let too_long = "x".repeat(70_000);
    assert!(writer.write_utf8_string(&too_long).is_err());
}
