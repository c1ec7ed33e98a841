//! Fuzz harness for the ownership manifest parser.
//!
//! Feeds arbitrary text to `parse_manifest` and, when it parses, to
//! `Manifest::from_raw`, ensuring neither panics and that every reported
//! parse error points at a line that exists.

#![no_main]
use std::path::Path;

use libfuzzer_sys::fuzz_target;
use tenantry_core::Violation;
use tenantry_core::manifest::{Manifest, parse_manifest};

fuzz_target!(|data: &[u8]| {
    let Ok(text) = std::str::from_utf8(data) else {
        return;
    };
    let path = Path::new("apps/fuzz/ownership.yaml");

    match parse_manifest(path, text) {
        Ok(raw) => {
            let (manifest, _) = Manifest::from_raw(&raw, "fuzz", path);
            let _ = manifest.app();
        },
        Err(Violation::Parse { line, .. }) => {
            assert!(line >= 1 && line <= text.lines().count());
        },
        Err(other) => panic!("unexpected violation: {other}"),
    }
});
