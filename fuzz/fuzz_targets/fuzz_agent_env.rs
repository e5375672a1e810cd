//! Fuzz target: `env.json` decoding.
//!
//! Decoding, re-encoding and building the disc must never panic.

#![no_main]

use libfuzzer_sys::fuzz_target;
use vbox_core::AgentEnv;

fuzz_target!(|data: &[u8]| {
    let Ok(env) = AgentEnv::from_json(data) else {
        return;
    };
    if let Ok(json) = env.to_json() {
        let _ = AgentEnv::from_json(&json);
        let _ = env.to_iso();
    }
});
