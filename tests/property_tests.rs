//! Property-based tests using proptest
//!
//! These tests validate wire and policy invariants across a wide range of randomly
//! generated inputs.

#![allow(clippy::expect_used, clippy::unwrap_used)]

use bytes::{Bytes, BytesMut};
use meshlink::core::codec::FrameCodec;
use meshlink::core::frame::{Frame, FrameFlags, FrameHeader, MessageType, FRAME_HEADER_SIZE};
use meshlink::core::packet::{pack, unpack, Command};
use meshlink::protocol::acl::Acl;
use proptest::prelude::*;
use tokio_util::codec::{Decoder, Encoder};

fn header_strategy() -> impl Strategy<Value = FrameHeader> {
    (
        any::<u8>(),
        any::<u32>(),
        prop_oneof![Just(MessageType::System), Just(MessageType::App)],
        any::<u8>(),
        any::<u32>(),
    )
        .prop_map(|(version, application_id, message_type, flags, payload_length)| {
            FrameHeader {
                version,
                application_id,
                message_type,
                flags: FrameFlags::from_bits_retain(flags),
                payload_length,
            }
        })
}

// Property: every header survives encode/decode unchanged
proptest! {
    #[test]
    fn prop_frame_header_roundtrip(header in header_strategy()) {
        let encoded = header.encode();
        prop_assert_eq!(encoded.len(), FRAME_HEADER_SIZE);
        prop_assert_eq!(FrameHeader::decode(&encoded).expect("valid header"), header);
    }
}

// Property: pack/unpack preserves command, data and token
proptest! {
    #[test]
    fn prop_packet_roundtrip(
        code in any::<u8>(),
        data in prop::collection::vec(any::<u8>(), 0..4096),
        token in ".{0,32}",
    ) {
        let command = Command::from(code);
        let bytes = pack(command, data.clone(), token.clone()).expect("pack should not fail");
        let packet = unpack(&bytes).expect("unpack should not fail");

        prop_assert_eq!(packet.command, command);
        prop_assert_eq!(packet.data.as_ref(), data.as_slice());
        prop_assert_eq!(packet.token, token);
    }
}

// Property: unpack never panics on arbitrary bytes
proptest! {
    #[test]
    fn prop_unpack_total(data in prop::collection::vec(any::<u8>(), 0..512)) {
        let _ = unpack(&data);
    }
}

// Property: the ACL answers every (command, token) pair and only the secret unlocks SET
proptest! {
    #[test]
    fn prop_acl_total(code in any::<u8>(), token in ".{0,16}") {
        let acl = Acl::default().with_privileged(
            "token",
            [Command::Hello, Command::Exit, Command::Id, Command::Set],
        );
        let command = Command::from(code);
        let allowed = acl.authorize(command, &token);

        if matches!(command, Command::Unknown(_) | Command::Deny | Command::Reply) {
            prop_assert!(!allowed);
        }
        if token != "token" && !token.is_empty() {
            prop_assert!(!allowed);
        }
        if command == Command::Set {
            prop_assert_eq!(allowed, token == "token");
        }
    }
}

// Property: frames split at any point decode to the original
proptest! {
    #[test]
    fn prop_codec_split_reads(
        application_id in 1u32..,
        payload in prop::collection::vec(any::<u8>(), 0..2048),
        split in 0usize..2059,
    ) {
        let frame = Frame::app(application_id, Bytes::from(payload.clone())).unwrap();
        let mut wire = BytesMut::new();
        FrameCodec::default().encode(frame, &mut wire).unwrap();

        let split = split.min(wire.len());
        let mut codec = FrameCodec::default();
        let mut buf = BytesMut::from(&wire[..split]);
        let first = codec.decode(&mut buf).unwrap();
        if split < wire.len() {
            prop_assert!(first.is_none());
            buf.extend_from_slice(&wire[split..]);
        } else {
            prop_assert!(first.is_some());
            return Ok(());
        }

        let decoded = codec.decode(&mut buf).unwrap().expect("complete frame");
        prop_assert_eq!(decoded.header.application_id, application_id);
        prop_assert_eq!(decoded.payload.as_ref(), payload.as_slice());
    }
}
