// test-only module included via protocol/mod.rs
#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

use std::time::Duration;

use bytes::Bytes;
use futures::SinkExt;
use tokio::io::{duplex, split, DuplexStream, ReadHalf, WriteHalf};
use tokio_util::codec::{FramedRead, FramedWrite};

use crate::core::codec::FrameCodec;
use crate::core::frame::Frame;
use crate::core::packet::{Command, Packet};
use crate::error::{constants, ProtocolError};
use crate::protocol::acl::Acl;
use crate::protocol::dispatcher::{policy_denial, Dispatcher};
use crate::protocol::handshake::*;
use crate::protocol::store::DataStore;

type Reader = FramedRead<ReadHalf<DuplexStream>, FrameCodec>;
type Writer = FramedWrite<WriteHalf<DuplexStream>, FrameCodec>;

fn framed(stream: DuplexStream) -> (Reader, Writer) {
    let (r, w) = split(stream);
    (
        FramedRead::new(r, FrameCodec::default()),
        FramedWrite::new(w, FrameCodec::default()),
    )
}

fn dispatcher() -> Dispatcher {
    let acl = Acl::default().with_privileged(
        "token",
        [Command::Hello, Command::Exit, Command::Id, Command::Set],
    );
    Dispatcher::new("node-a", acl, DataStore::new())
}

const HANDSHAKE_TIMEOUT: Duration = Duration::from_millis(500);

#[tokio::test]
async fn test_handshake_exchanges_ids() {
    let (a, b) = duplex(4096);
    let (mut ar, mut aw) = framed(a);
    let (mut br, mut bw) = framed(b);

    let server = tokio::spawn(async move {
        server_handshake(&mut ar, &mut aw, "A", HANDSHAKE_TIMEOUT).await
    });
    let client = client_handshake(&mut br, &mut bw, "B", HANDSHAKE_TIMEOUT)
        .await
        .expect("client handshake should succeed");
    let server = server.await.unwrap().expect("server handshake should succeed");

    assert_eq!(client, "A");
    assert_eq!(server, "B");
}

#[tokio::test]
async fn test_handshake_times_out_on_silent_peer() {
    let (a, _b) = duplex(4096);
    let (mut ar, mut aw) = framed(a);

    let result = server_handshake(&mut ar, &mut aw, "A", Duration::from_millis(50)).await;
    assert!(matches!(result, Err(ProtocolError::Timeout)));
}

#[tokio::test]
async fn test_handshake_fails_on_eof() {
    let (a, b) = duplex(4096);
    let (mut ar, mut aw) = framed(a);
    drop(b);

    let result = client_handshake(&mut ar, &mut aw, "A", HANDSHAKE_TIMEOUT).await;
    assert!(matches!(result, Err(ProtocolError::ConnectionClosed)));
}

#[tokio::test]
async fn test_handshake_rejects_wrong_command() {
    let (a, b) = duplex(4096);
    let (mut ar, mut aw) = framed(a);
    let (_br, mut bw) = framed(b);

    let get = Packet::new(Command::Get, Bytes::from_static(b"B"), "");
    bw.send(Frame::system(get.encode().unwrap()).unwrap())
        .await
        .unwrap();

    let result = server_handshake(&mut ar, &mut aw, "A", HANDSHAKE_TIMEOUT).await;
    assert!(matches!(result, Err(ProtocolError::HandshakeError(_))));
}

#[test]
fn test_expect_hello_validation() {
    let good = hello_frame("peer").unwrap();
    assert_eq!(expect_hello(&good).unwrap(), "peer");

    let app = Frame::app(3, good.payload.clone()).unwrap();
    assert!(matches!(
        expect_hello(&app),
        Err(ProtocolError::HandshakeError(msg)) if msg == constants::ERR_HANDSHAKE_NOT_SYSTEM
    ));

    let empty = hello_frame("").unwrap();
    assert!(matches!(
        expect_hello(&empty),
        Err(ProtocolError::HandshakeError(msg)) if msg == constants::ERR_HANDSHAKE_EMPTY_ID
    ));

    let long = hello_frame(&"x".repeat(MAX_NODE_ID_LEN + 1)).unwrap();
    assert!(expect_hello(&long).is_err());

    let garbage = Frame::system(Bytes::from_static(b"\xC1\xC1")).unwrap();
    assert!(expect_hello(&garbage).is_err());
}

#[tokio::test]
async fn test_set_then_get_roundtrip() {
    let dispatcher = dispatcher();

    let set = Packet::new(Command::Set, Bytes::from_static(b"hello"), "token");
    let outcome = dispatcher.dispatch(&set).await.unwrap();
    assert!(!outcome.close);
    let reply = &outcome.replies[0];
    assert_eq!(reply.command, Command::Reply);
    assert_eq!(reply.id, set.id);
    assert!(!reply.data.is_empty());

    let get = Packet::new(Command::Get, reply.data.clone(), "");
    let outcome = dispatcher.dispatch(&get).await.unwrap();
    assert_eq!(outcome.replies[0].command, Command::Reply);
    assert_eq!(outcome.replies[0].data.as_ref(), b"hello");
}

#[tokio::test]
async fn test_get_missing_key_is_empty_reply() {
    let outcome = dispatcher()
        .dispatch(&Packet::new(Command::Get, Bytes::from_static(b"nope"), ""))
        .await
        .unwrap();
    assert_eq!(outcome.replies[0].command, Command::Reply);
    assert!(outcome.replies[0].data.is_empty());
}

#[tokio::test]
async fn test_anonymous_set_is_denied() {
    let set = Packet::new(Command::Set, Bytes::from_static(b"hello"), "");
    let outcome = dispatcher().dispatch(&set).await.unwrap();

    assert!(!outcome.close);
    assert_eq!(outcome.replies.len(), 1);
    assert_eq!(outcome.replies[0].command, Command::Deny);
    assert_eq!(outcome.replies[0].data.as_ref(), constants::ERR_UNAUTHORIZED.as_bytes());
}

#[tokio::test]
async fn test_id_and_exit() {
    let dispatcher = dispatcher();

    let outcome = dispatcher
        .dispatch(&Packet::new(Command::Id, Bytes::new(), "token"))
        .await
        .unwrap();
    assert_eq!(outcome.replies[0].data.as_ref(), b"node-a");
    assert_eq!(outcome.replies[0].token, "token");

    let outcome = dispatcher
        .dispatch(&Packet::new(Command::Exit, Bytes::new(), ""))
        .await
        .unwrap();
    assert!(outcome.close);
    assert_eq!(outcome.replies[0].command, Command::Reply);
}

#[tokio::test]
async fn test_replies_are_never_answered() {
    let dispatcher = dispatcher();
    for command in [Command::Deny, Command::Reply] {
        let outcome = dispatcher
            .dispatch(&Packet::new(command, Bytes::new(), "bogus"))
            .await
            .unwrap();
        assert!(outcome.replies.is_empty());
        assert!(!outcome.close);
    }
}

#[tokio::test]
async fn test_hello_after_handshake_is_denied() {
    let hello = Packet::new(Command::Hello, Bytes::from_static(b"x"), "");
    let err = dispatcher().dispatch(&hello).await.unwrap_err();
    assert!(matches!(err, ProtocolError::UnexpectedMessage));

    let deny = policy_denial(&hello, &err).expect("protocol violation is reported");
    assert_eq!(deny.command, Command::Deny);
    assert_eq!(deny.id, hello.id);

    assert!(policy_denial(&hello, &ProtocolError::EncodeError("x".into())).is_none());
}
