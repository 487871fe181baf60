#![no_main]

use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    if let Ok(s) = std::str::from_utf8(data) {
        if let Ok(forms) = lispx::parser::parse_program(s) {
            let mut interp = lispx::Interpreter::new();
            for form in &forms {
                let _ = interp.eval(form);
            }
        }
    }
});
