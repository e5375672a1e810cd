//! Fuzz target: `showvminfo --machinereadable` parsers.
//!
//! State, free SCSI slots and MAC addresses are read from the same output;
//! none of them may panic on arbitrary text.

#![no_main]

use libfuzzer_sys::fuzz_target;
use vbox_driver::info;

fuzz_target!(|data: &[u8]| {
    let Ok(output) = std::str::from_utf8(data) else {
        return;
    };

    let _ = info::parse_state(output);
    let _ = info::empty_scsi_slots(output);

    for mac in info::parse_macs(output).values() {
        assert!(!mac.is_empty(), "empty MAC values are skipped");
    }
});
