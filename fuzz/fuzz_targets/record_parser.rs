//! Fuzz target for record parsing
//!
//! Tests that the record parser handles arbitrary input without panicking.

#![no_main]

use libfuzzer_sys::fuzz_target;
use shroud_seal::record::{RecordHeader, parse_record};

fuzz_target!(|data: &[u8]| {
    if let Ok(Some(record)) = parse_record(data, 16384 + 16) {
        // A parsed record never claims more bytes than the input holds
        assert!(record.wire_len() <= data.len());
        assert_eq!(record.header.encode(), record.header_bytes);
    }
    let _ = RecordHeader::decode(data);
});
