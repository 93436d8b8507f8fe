//! Unit tests for `CommandCodec` line framing.

use bytes::BytesMut;
use scene_sync::protocol::codec::MAX_LINE_BYTES;
use scene_sync::protocol::{Command, CommandCodec};
use scene_sync::AppError;
use tokio_util::codec::{Decoder, Encoder};

#[test]
fn partial_line_waits_for_newline() {
    let mut codec = CommandCodec::new();
    let mut buf = BytesMut::from("SYNC::Screen1::bool::vis");

    assert!(codec.decode(&mut buf).expect("no error").is_none());

    buf.extend_from_slice(b"ible::true\n");
    let cmd = codec.decode(&mut buf).expect("no error").expect("one frame");
    assert_eq!(cmd, Command::sync("Screen1", "bool", "visible", "true"));
}

#[test]
fn batched_lines_decode_in_order() {
    let mut codec = CommandCodec::new();
    let mut buf = BytesMut::from("SYNC::A::int::x::1\nASYNC::B::int::y::2\nSCREENSHOT::/s.png\n");

    let first = codec.decode(&mut buf).expect("ok").expect("frame");
    let second = codec.decode(&mut buf).expect("ok").expect("frame");
    let third = codec.decode(&mut buf).expect("ok").expect("frame");

    assert_eq!(first, Command::sync("A", "int", "x", "1"));
    assert_eq!(second, Command::asynchronous("B", "int", "y", "2"));
    assert_eq!(third, Command::screenshot("/s.png"));
    assert!(codec.decode(&mut buf).expect("ok").is_none());
}

#[test]
fn overlong_line_is_a_protocol_violation() {
    let mut codec = CommandCodec::new();
    let mut buf = BytesMut::from("x".repeat(MAX_LINE_BYTES + 1).as_str());

    let err = codec.decode(&mut buf).expect_err("too long");
    assert!(matches!(err, AppError::ProtocolViolation(_)));
    assert!(err.to_string().contains("line too long"), "{err}");
}

#[test]
fn unterminated_last_line_decodes_at_eof() {
    let mut codec = CommandCodec::new();
    let mut buf = BytesMut::from("SCREENSHOT::/last.png");

    let cmd = codec.decode_eof(&mut buf).expect("ok").expect("frame");
    assert_eq!(cmd, Command::screenshot("/last.png"));
    assert!(codec.decode_eof(&mut buf).expect("ok").is_none());
}

#[test]
fn encoder_appends_newline() {
    let mut codec = CommandCodec::new();
    let mut buf = BytesMut::new();

    codec
        .encode(Command::sync("Screen1", "bool", "visible", "0"), &mut buf)
        .expect("encodes");

    assert_eq!(&buf[..], b"SYNC::Screen1::bool::visible::false\n");
}

#[test]
fn encode_line_matches_encoder() {
    let cmd = Command::screenshot("/tmp/a.png");
    let frame = CommandCodec::encode_line(&cmd).expect("encodes");
    assert_eq!(frame, b"SCREENSHOT::/tmp/a.png\n");
}
