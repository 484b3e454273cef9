// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;

#[tokio::test]
async fn reads_fields_until_blank_line() -> anyhow::Result<()> {
    let mut input: &[u8] = b"Response: Success\r\nMessage: Authentication accepted\r\n\r\nEvent: Next\r\n\r\n";
    let frame = read_frame(&mut input).await?;
    assert_eq!(frame.get("Response"), Some("Success"));
    assert_eq!(frame.get("Message"), Some("Authentication accepted"));
    assert_eq!(frame.len(), 2);
    assert_eq!(frame.kind(), FrameKind::Response);

    let next = read_frame(&mut input).await?;
    assert_eq!(next.get("Event"), Some("Next"));
    Ok(())
}

#[tokio::test]
async fn skips_lines_without_separator() -> anyhow::Result<()> {
    let mut input: &[u8] = b"Event: Newchannel\r\ngarbage line\r\nKey:NoSpace\r\nChannel: PJSIP/1000-0001\r\n\r\n";
    let frame = read_frame(&mut input).await?;
    assert_eq!(frame.len(), 2);
    assert_eq!(frame.get("Key"), None);
    assert_eq!(frame.get("Channel"), Some("PJSIP/1000-0001"));
    Ok(())
}

#[tokio::test]
async fn duplicate_keys_overwrite() -> anyhow::Result<()> {
    let mut input: &[u8] = b"Variable: A=1\r\nVariable: B=2\r\n\r\n";
    let frame = read_frame(&mut input).await?;
    assert_eq!(frame.len(), 1);
    assert_eq!(frame.get("Variable"), Some("B=2"));
    Ok(())
}

#[tokio::test]
async fn splits_on_first_separator_only() -> anyhow::Result<()> {
    let mut input: &[u8] = b"Message: Channel: not found\r\n\r\n";
    let frame = read_frame(&mut input).await?;
    assert_eq!(frame.get("Message"), Some("Channel: not found"));
    Ok(())
}

#[tokio::test]
async fn keys_are_case_sensitive() -> anyhow::Result<()> {
    let mut input: &[u8] = b"response: Success\r\n\r\n";
    let frame = read_frame(&mut input).await?;
    assert_eq!(frame.get("Response"), None);
    assert_eq!(frame.kind(), FrameKind::Other);
    Ok(())
}

#[tokio::test]
async fn accepts_bare_newlines() -> anyhow::Result<()> {
    let mut input: &[u8] = b"Event: Hangup\nCause: 16\n\n";
    let frame = read_frame(&mut input).await?;
    assert_eq!(frame.get("Cause"), Some("16"));
    assert_eq!(frame.kind(), FrameKind::Event);
    Ok(())
}

#[tokio::test]
async fn eof_mid_frame_is_an_error() {
    let mut input: &[u8] = b"Response: Success\r\n";
    let err = read_frame(&mut input).await.err();
    assert_eq!(err.map(|e| e.kind()), Some(std::io::ErrorKind::UnexpectedEof));
}

#[tokio::test]
async fn eof_before_any_line_is_an_error() {
    let mut input: &[u8] = b"";
    assert!(read_frame(&mut input).await.is_err());
}

#[test]
fn event_takes_precedence_over_response() {
    let frame = Frame::from(fields([("Response", "Success"), ("Event", "FullyBooted")]));
    assert_eq!(frame.kind(), FrameKind::Event);
}

#[test]
fn encodes_action_then_fields_then_blank_line() {
    let bytes = encode_action("Login", &fields([("Username", "admin"), ("Secret", "x")]));
    assert_eq!(bytes, b"Action: Login\r\nUsername: admin\r\nSecret: x\r\n\r\n");
}

#[test]
fn encodes_action_without_fields() {
    assert_eq!(encode_action("Ping", &Fields::new()), b"Action: Ping\r\n\r\n");
}

#[tokio::test]
async fn encoded_command_reads_back_as_frame() -> anyhow::Result<()> {
    let bytes = encode_action("Hangup", &fields([("Channel", "PJSIP/1000-0001")]));
    let mut input: &[u8] = &bytes;
    let frame = read_frame(&mut input).await?;
    assert_eq!(frame.get("Action"), Some("Hangup"));
    assert_eq!(frame.get("Channel"), Some("PJSIP/1000-0001"));
    Ok(())
}
