//! Fuzz target for wire record decoding and payload truncation.
//!
//! Run with: cargo +nightly fuzz run fuzz_record_decode

#![no_main]

use libfuzzer_sys::fuzz_target;
use msgpass_core::message::{Message, Payload, RECORD_LEN};

fuzz_target!(|data: &[u8]| {
    for chunk in data.chunks_exact(RECORD_LEN) {
        let Ok(record) = <&[u8; RECORD_LEN]>::try_from(chunk) else {
            continue;
        };
        let msg = Message::decode(record);
        assert!(msg.payload.len() <= Payload::MAX_LEN);
        // A decoded record re-encodes to something that decodes the same.
        assert_eq!(Message::decode(&msg.encode()), msg);
    }

    if let Ok(text) = std::str::from_utf8(data) {
        let payload = Payload::truncating(text);
        assert!(payload.len() <= Payload::MAX_LEN);
        assert!(text.starts_with(payload.as_str()));
    }
});
