// SPDX-License-Identifier: AGPL-3.0-or-later
//! Fuzz target for native payload and error normalization

#![no_main]

use arbitrary::Arbitrary;
use gloc_core::normalize::{fix_from_json, normalize_error, normalize_fix, normalize_json};
use gloc_core::{ErrorDomain, NativeError};
use libfuzzer_sys::fuzz_target;

#[derive(Debug, Arbitrary)]
struct Input<'a> {
    domain: u8,
    code: i64,
    payload: &'a str,
}

fuzz_target!(|input: Input| {
    let domain = match input.domain % 5 {
        0 => ErrorDomain::W3c,
        1 => ErrorDomain::CoreLocation,
        2 => ErrorDomain::PlayServices,
        3 => ErrorDomain::LocationSettings,
        _ => ErrorDomain::Host,
    };

    // Every native failure maps to a caller-facing code
    let err = normalize_error(&NativeError::new(domain, input.code, input.payload));
    assert!(err.code().starts_with("OS-"));

    if let Ok(value) = serde_json::from_str::<serde_json::Value>(input.payload) {
        let direct = normalize_json(&value);
        if let Ok(fix) = fix_from_json(&value) {
            let position = normalize_fix(&fix);
            assert!(position.speed.map_or(true, |s| s >= 0.0));
            assert!(position.heading.map_or(true, |h| h >= 0.0));
            assert_eq!(direct.ok().map(|p| p.latitude), Some(position.latitude));
        }
    }
});
