#![no_main]

use libfuzzer_sys::fuzz_target;
use meshlink::core::packet::unpack;

fuzz_target!(|data: &[u8]| {
    // Packet deserialization must never panic
    let _ = unpack(data);
});
