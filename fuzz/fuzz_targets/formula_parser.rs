#![no_main]

use libfuzzer_sys::fuzz_target;
use tmatrace::equation::parse_formula;

fuzz_target!(|data: &[u8]| {
    if let Ok(input) = std::str::from_utf8(data) {
        // Any accepted formula must also evaluate without panicking
        if let Ok(expr) = parse_formula(input) {
            let _ = expr.eval(&|alias: &String| Ok(alias.len() as f64));
        }
    }
});
