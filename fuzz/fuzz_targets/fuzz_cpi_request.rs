//! Fuzz target: CPI request decoding.
//!
//! Errors are expected; panics are not.

#![no_main]

use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    if let Err(e) = vbox_cpi::parse_request(data) {
        let response = vbox_cpi::Response::failure(&e);
        serde_json::to_vec(&response).expect("responses always serialize");
    }
});
