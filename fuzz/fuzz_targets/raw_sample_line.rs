#![no_main]

use libfuzzer_sys::fuzz_target;
use tmatrace::sample::{RawLog, RawSample};

fuzz_target!(|data: &[u8]| {
    // Arbitrary bytes never fail a whole log
    let log = RawLog::from_reader("fuzz", data).expect("in-memory read cannot fail");
    assert!(log.samples.iter().enumerate().all(|(i, s)| s.id == i));

    if let Ok(line) = std::str::from_utf8(data) {
        if let Ok(sample) = RawSample::parse_line(0, line) {
            let _ = sample.duration_ms();
            let _ = sample.core_migrated();
        }
    }
});
