//! Fuzz target for `AppConfig::parse`.
//!
//! Run with: cargo +nightly fuzz run fuzz_config_parser

#![no_main]

use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    if let Ok(s) = std::str::from_utf8(data) {
        if let Ok(config) = msgpass_config::AppConfig::parse(s) {
            // Anything that parses has already passed validation.
            assert!(msgpass_config::is_valid_service_name(&config.service.name));
        }
    }
});
