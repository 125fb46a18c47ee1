#![no_main]

use libfuzzer_sys::fuzz_target;

// parse_records is a total function: arbitrary bytes must never panic and
// output ordering must be stable across reparses of the same input.
fuzz_target!(|data: &[u8]| {
    let first = claude_pulse_core::parse_records(data);
    let second = claude_pulse_core::parse_records(data);
    assert_eq!(first.len(), second.len());
    for (a, b) in first.iter().zip(second.iter()) {
        assert_eq!(a.id, b.id);
    }
});
