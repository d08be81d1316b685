// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

#![no_main]

use asec::calc::{compile, evaluate};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    // CALC source is text
    if let Ok(text) = std::str::from_utf8(data) {
        if let Ok(program) = compile(text) {
            // Inputs derived from the expression length keep runs deterministic
            let seed = text.len() as f64;
            let inputs = std::array::from_fn(|i| seed - i as f64);
            let _ = evaluate(&program, &inputs);
        }
    }
});
