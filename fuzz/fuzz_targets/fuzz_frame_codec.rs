#![no_main]

use bytes::BytesMut;
use libfuzzer_sys::fuzz_target;
use meshlink::core::codec::FrameCodec;
use tokio_util::codec::Decoder;

fuzz_target!(|data: &[u8]| {
    // Decode arbitrary stream bytes until the codec stalls or errors
    let mut codec = FrameCodec::new(64 * 1024);
    let mut buf = BytesMut::from(data);
    while let Ok(Some(frame)) = codec.decode(&mut buf) {
        assert_eq!(frame.header.payload_length as usize, frame.payload.len());
    }
});
