#![no_main]

use bytes::Bytes;
use libfuzzer_sys::fuzz_target;
use meshlink::core::frame::Frame;
use meshlink::protocol::handshake::{expect_hello, hello_frame};

fuzz_target!(|data: &[u8]| {
    // Validate arbitrary HELLO payloads
    let Ok(frame) = Frame::system(Bytes::copy_from_slice(data)) else {
        return;
    };

    if let Ok(peer_id) = expect_hello(&frame) {
        // An accepted id must survive a fresh HELLO unchanged
        let Ok(again) = hello_frame(&peer_id) else {
            return;
        };
        assert_eq!(expect_hello(&again).ok().as_deref(), Some(peer_id.as_str()));
    }
});
