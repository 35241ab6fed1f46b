// tests/unit_resp_test.rs

//! Wire protocol framing.

use bytes::BytesMut;
use tokio_util::codec::{Decoder, Encoder};
use vigil::protocol::{RespFrame, RespFrameCodec};
use vigil::VigilError;

fn encode(frame: RespFrame) -> BytesMut {
    let mut buf = BytesMut::new();
    RespFrameCodec.encode(frame, &mut buf).unwrap();
    buf
}

#[test]
fn test_command_encoding() {
    let buf = encode(RespFrame::command(["PING"]));
    assert_eq!(&buf[..], b"*1\r\n$4\r\nPING\r\n");

    let buf = encode(RespFrame::command(["SLAVEOF", "NO", "ONE"]));
    assert_eq!(&buf[..], b"*3\r\n$7\r\nSLAVEOF\r\n$2\r\nNO\r\n$3\r\nONE\r\n");
}

#[test]
fn test_decode_reply_shapes() {
    let mut buf = BytesMut::from(&b"+PONG\r\n"[..]);
    let frame = RespFrameCodec.decode(&mut buf).unwrap().unwrap();
    assert_eq!(frame, RespFrame::SimpleString("PONG".to_string()));

    let mut buf = BytesMut::from(&b":42\r\n"[..]);
    let frame = RespFrameCodec.decode(&mut buf).unwrap().unwrap();
    assert_eq!(frame, RespFrame::Integer(42));

    let mut buf = BytesMut::from(&b"$-1\r\n"[..]);
    let frame = RespFrameCodec.decode(&mut buf).unwrap().unwrap();
    assert_eq!(frame, RespFrame::Null);

    let mut buf = BytesMut::from(&b"-ERR nope\r\n"[..]);
    let frame = RespFrameCodec.decode(&mut buf).unwrap().unwrap();
    assert_eq!(frame, RespFrame::Error("ERR nope".to_string()));
}

#[test]
fn test_decode_nested_vote_reply() {
    let mut buf = encode(RespFrame::Array(vec![
        RespFrame::Integer(1),
        RespFrame::bulk("candidate-a"),
        RespFrame::Integer(7),
    ]));
    let frame = RespFrameCodec.decode(&mut buf).unwrap().unwrap();
    let RespFrame::Array(parts) = frame else {
        panic!("expected an array");
    };
    assert_eq!(parts[0], RespFrame::Integer(1));
    assert_eq!(parts[1].text().as_deref(), Some("candidate-a"));
    assert_eq!(parts[2], RespFrame::Integer(7));
    assert!(buf.is_empty());
}

#[test]
fn test_partial_frames_wait_for_more_data() {
    let full = encode(RespFrame::command(["INFO", "replication"]));
    let mut buf = BytesMut::from(&full[..full.len() - 4]);
    assert!(RespFrameCodec.decode(&mut buf).unwrap().is_none());

    buf.extend_from_slice(&full[full.len() - 4..]);
    assert!(RespFrameCodec.decode(&mut buf).unwrap().is_some());
}

#[test]
fn test_invalid_prefix_is_a_protocol_error() {
    let mut buf = BytesMut::from(&b"?what\r\n"[..]);
    let err = RespFrameCodec.decode(&mut buf).unwrap_err();
    assert!(matches!(err, VigilError::Protocol(_)));
}
