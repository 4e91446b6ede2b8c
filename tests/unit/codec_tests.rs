//! Unit tests for envelope framing and line parsing.
//!
//! Covers:
//! - encoding produces exactly one newline-terminated JSON object
//! - arbitrary chunk boundaries are buffered until a full line arrives
//! - malformed lines are reported and skipped without stopping decoding
//! - blank lines and unknown tags are tolerated
//! - oversized lines are rejected as malformed

use bytes::BytesMut;
use serde_json::json;
use tokio_util::codec::Decoder;

use canvas_spawn::ipc::{
    decode_buffer, parse_line, to_line, CanvasMessage, ControllerMessage, Decoded, EnvelopeCodec,
};
use canvas_spawn::AppError;

// ── Encoding ────────────────────────────────────────────────────────────────

#[test]
fn encoding_emits_single_terminated_line() {
    let line = to_line(&CanvasMessage::Ready {
        scenario: "meeting-picker".into(),
    });

    assert!(line.ends_with('\n'), "line must end with a newline");
    assert_eq!(line.matches('\n').count(), 1, "exactly one newline");
    let value: serde_json::Value =
        serde_json::from_str(line.trim_end()).expect("line must be valid json");
    assert_eq!(value, json!({"type": "ready", "scenario": "meeting-picker"}));
}

#[test]
fn nested_newlines_in_payload_are_escaped() {
    let line = to_line(&CanvasMessage::Error {
        message: "first\nsecond".into(),
    });
    assert_eq!(line.matches('\n').count(), 1, "payload newline must be escaped");
}

#[test]
fn unit_controller_messages_carry_only_type() {
    assert_eq!(to_line(&ControllerMessage::Close), "{\"type\":\"close\"}\n");
    assert_eq!(to_line(&ControllerMessage::Ping), "{\"type\":\"ping\"}\n");
    assert_eq!(
        to_line(&ControllerMessage::GetSelection),
        "{\"type\":\"getSelection\"}\n"
    );
}

// ── parse_line ──────────────────────────────────────────────────────────────

#[test]
fn blank_line_is_not_a_message() {
    let parsed = parse_line::<CanvasMessage>("   ").expect("blank line is not an error");
    assert!(parsed.is_none());
}

#[test]
fn non_json_line_is_codec_error() {
    let err = parse_line::<CanvasMessage>("not json").expect_err("must fail");
    assert!(matches!(err, AppError::Codec(ref msg) if msg.contains("malformed json")));
}

#[test]
fn missing_type_is_codec_error() {
    let err = parse_line::<CanvasMessage>(r#"{"data":1}"#).expect_err("must fail");
    assert!(matches!(err, AppError::Codec(ref msg) if msg.contains("type")));
}

#[test]
fn non_string_type_is_codec_error() {
    let err = parse_line::<CanvasMessage>(r#"{"type":7}"#).expect_err("must fail");
    assert!(matches!(err, AppError::Codec(_)));
}

#[test]
fn non_object_json_is_codec_error() {
    let err = parse_line::<CanvasMessage>("[1,2,3]").expect_err("must fail");
    assert!(matches!(err, AppError::Codec(_)));
}

#[test]
fn known_tag_with_bad_fields_is_codec_error() {
    let err = parse_line::<CanvasMessage>(r#"{"type":"error"}"#).expect_err("must fail");
    assert!(matches!(err, AppError::Codec(ref msg) if msg.contains("`error`")));
}

#[test]
fn unknown_tag_decodes_to_unknown_variant() {
    let parsed = parse_line::<CanvasMessage>(r#"{"type":"resize","cols":80}"#)
        .expect("unknown tags are not errors")
        .expect("a message");
    assert_eq!(parsed, CanvasMessage::Unknown);
}

// ── Stream decoding ─────────────────────────────────────────────────────────

#[test]
fn partial_line_waits_for_newline() {
    let mut codec = EnvelopeCodec::<CanvasMessage>::new();
    let mut buf = BytesMut::from(r#"{"type":"selected","da"#);

    let first = codec.decode(&mut buf).expect("decode must not fail");
    assert!(first.is_none(), "no complete line yet");

    buf.extend_from_slice(b"ta\":{\"duration\":30}}\n");
    let second = codec.decode(&mut buf).expect("decode must not fail");
    match second {
        Some(Decoded::Message(CanvasMessage::Selected { data })) => {
            assert_eq!(data, json!({"duration": 30}));
        }
        other => panic!("expected selected, got {other:?}"),
    }
}

#[test]
fn decode_buffer_drains_lines_and_keeps_tail() {
    let mut codec = EnvelopeCodec::<CanvasMessage>::new();
    let mut buf = BytesMut::from(concat!(
        "{\"type\":\"ready\",\"scenario\":\"s\"}\n",
        "{\"type\":\"pong\"}\n",
        "{\"type\":\"cance",
    ));

    let mut errors = Vec::new();
    let messages = decode_buffer(&mut codec, &mut buf, |err| errors.push(err));

    assert_eq!(
        messages,
        vec![
            CanvasMessage::Ready {
                scenario: "s".into()
            },
            CanvasMessage::Pong
        ]
    );
    assert!(errors.is_empty());
    assert_eq!(&buf[..], b"{\"type\":\"cance", "partial tail must remain");
}

#[test]
fn decode_buffer_skips_malformed_lines() {
    let mut codec = EnvelopeCodec::<CanvasMessage>::new();
    let mut buf = BytesMut::from(concat!(
        "garbage\n",
        "\n",
        "{\"type\":\"cancelled\",\"reason\":\"esc\"}\n",
        "{\"no_type\":true}\n",
        "{\"type\":\"pong\"}\n",
    ));

    let mut errors = Vec::new();
    let messages = decode_buffer(&mut codec, &mut buf, |err| errors.push(err.to_string()));

    assert_eq!(
        messages,
        vec![
            CanvasMessage::Cancelled {
                reason: Some("esc".into())
            },
            CanvasMessage::Pong
        ]
    );
    assert_eq!(errors.len(), 2, "one callback per malformed line");
    assert!(buf.is_empty());
}

#[test]
fn oversized_line_is_malformed_and_stream_continues() {
    let mut codec = EnvelopeCodec::<CanvasMessage>::with_max_length(32);
    let mut raw = format!("{{\"type\":\"error\",\"message\":\"{}\"}}\n", "x".repeat(64));
    raw.push_str("{\"type\":\"pong\"}\n");
    let mut buf = BytesMut::from(raw.as_str());

    let mut errors = Vec::new();
    let messages = decode_buffer(&mut codec, &mut buf, |err| errors.push(err));

    assert_eq!(messages, vec![CanvasMessage::Pong]);
    assert_eq!(errors.len(), 1);
    assert!(matches!(errors[0], AppError::Codec(ref msg) if msg.contains("too long")));
}

#[test]
fn trailing_line_without_newline_decodes_at_eof() {
    let mut codec = EnvelopeCodec::<ControllerMessage>::new();
    let mut buf = BytesMut::from("{\"type\":\"close\"}");

    let item = codec.decode_eof(&mut buf).expect("decode_eof must not fail");
    assert!(matches!(
        item,
        Some(Decoded::Message(ControllerMessage::Close))
    ));
}
