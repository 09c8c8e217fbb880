#![no_main]

use dp_conformance::{CorpusLines, PreparedLine, prepare_line};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    for line in CorpusLines::new(std::io::Cursor::new(data.to_vec())) {
        let Ok(raw) = line else { continue };
        assert!(!raw.contains(&b'\n'));
        match prepare_line(&raw) {
            PreparedLine::Skip => {}
            PreparedLine::Case {
                input,
                decode_fallback,
            } => {
                assert!(!input.is_empty());
                if !decode_fallback {
                    assert!(std::str::from_utf8(&input).is_ok());
                }
            }
        }
    }
});
