//! Fuzz target for byte cursor reads.
//!
//! Every read must return a value or a typed error, never panic, whatever
//! the offsets and lengths.

#![no_main]

use dissect_core::{ByteCursor, ChecksumAlgorithm, Endianness};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    if data.len() < 4 {
        return;
    }

    let offset = usize::from(data[0]);
    let length = usize::from(data[1]);
    let width = u32::from(data[2] % 40);
    let reported = data.len() + usize::from(data[3]);
    let cursor = ByteCursor::new(&data[4..], reported - 4);

    let _ = cursor.bytes(offset, length);
    let _ = cursor.read_u16_be(offset);
    let _ = cursor.read_i24_le(offset);
    let _ = cursor.read_u64_be(offset);
    let _ = cursor.read_bits(offset, width);
    let _ = cursor.read_length_indicator(offset);
    let _ = cursor.ascii_line(offset);
    let _ = cursor.find_byte(offset, b'\n');

    if let Ok(view) = cursor.sub_view(offset, length) {
        assert!(view.captured_len() == length);
        let _ = view.read_u32_le(0);
    }
    if let Ok(partial) = cursor.sub_view_partial(offset, length) {
        assert_eq!(partial.cursor.captured_len() + partial.missing, length);
    }
    if let Ok(tail) = cursor.tail(offset) {
        assert!(tail.reported_len() >= tail.captured_len());
    }

    for algorithm in [
        ChecksumAlgorithm::Internet,
        ChecksumAlgorithm::Crc16Ccitt,
        ChecksumAlgorithm::Crc32,
    ] {
        let _ = cursor.verify_checksum(0, offset, length, algorithm, Endianness::Big);
    }
});
