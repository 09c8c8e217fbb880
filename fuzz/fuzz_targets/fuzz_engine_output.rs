#![no_main]

use dp_conformance::{classify, parse_engine_output};
use dp_types::DetectorMode;
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    if let Ok(pair) = parse_engine_output(data) {
        let tier = classify(&pair, DetectorMode::Sqli);
        assert!(!tier.is_inconclusive());
        if pair.reference.is_positive != pair.candidate.is_positive {
            assert!(tier.is_mismatch());
        }
    }
});
