//! Control-channel wire format.
//!
//! Every message travels as `[u32 LE body length][tag byte][payload]`. The
//! tag values and payload encodings below are the wire contract; both sides
//! must reject frames they cannot decode rather than guess. Payload integers
//! are little-endian, strings are UTF-8 with no terminator.

use std::error::Error;
use std::fmt;

/// Upper bound on `tag + payload` length. Frames above this are a protocol
/// violation and the connection carrying them should be dropped.
pub const MAX_FRAME_LEN: usize = 8192;

const TAG_RESIZE: u8 = 0x01;
const TAG_INPUT: u8 = 0x02;
const TAG_LOAD_PLUGIN: u8 = 0x03;
const TAG_PING: u8 = 0x04;
const TAG_DETACH: u8 = 0x05;

const TAG_SEGMENT_READY: u8 = 0x81;
const TAG_SESSION_CLOSED: u8 = 0x82;
const TAG_PONG: u8 = 0x83;

/// Wire codec failures.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FrameError {
    /// Body shorter than its encoding requires.
    Truncated,
    /// Body longer than [`MAX_FRAME_LEN`].
    Oversized { len: usize },
    /// Tag byte not assigned in this direction.
    UnknownTag(u8),
    /// String payload is not valid UTF-8.
    BadUtf8,
}

impl fmt::Display for FrameError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FrameError::Truncated => write!(f, "frame body truncated"),
            FrameError::Oversized { len } => {
                write!(f, "frame body of {len} bytes exceeds {MAX_FRAME_LEN}")
            }
            FrameError::UnknownTag(tag) => write!(f, "unknown frame tag {tag:#04x}"),
            FrameError::BadUtf8 => write!(f, "frame string payload is not UTF-8"),
        }
    }
}

impl Error for FrameError {}

/// Client-to-daemon requests.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControlMessage {
    /// Change the grid dimensions. Idempotent when the size is unchanged.
    Resize { cols: u16, rows: u16 },
    /// Raw bytes destined for the session's input (keystrokes, paste).
    Input { bytes: Vec<u8> },
    /// Load a plugin library from the given path.
    LoadPlugin { path: String },
    /// Liveness probe; the daemon answers with [`DaemonMessage::Pong`].
    Ping,
    /// Orderly goodbye before the client closes its end.
    Detach,
}

/// Daemon-to-client announcements.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DaemonMessage {
    /// A segment is ready to attach under `path` with the given dimensions.
    /// Sent on attach and again after every resize.
    SegmentReady { cols: u16, rows: u16, path: String },
    /// The hosted session exited; no further frames will be published.
    SessionClosed { exit_code: i32 },
    Pong,
}

impl ControlMessage {
    /// Encode into a complete frame, length prefix included.
    pub fn encode(&self) -> Result<Vec<u8>, FrameError> {
        let mut body = Vec::with_capacity(16);
        match self {
            ControlMessage::Resize { cols, rows } => {
                body.push(TAG_RESIZE);
                body.extend_from_slice(&cols.to_le_bytes());
                body.extend_from_slice(&rows.to_le_bytes());
            }
            ControlMessage::Input { bytes } => {
                body.push(TAG_INPUT);
                body.extend_from_slice(bytes);
            }
            ControlMessage::LoadPlugin { path } => {
                body.push(TAG_LOAD_PLUGIN);
                body.extend_from_slice(path.as_bytes());
            }
            ControlMessage::Ping => body.push(TAG_PING),
            ControlMessage::Detach => body.push(TAG_DETACH),
        }
        finish_frame(body)
    }

    /// Decode a frame body (tag plus payload, length prefix stripped).
    pub fn decode(body: &[u8]) -> Result<Self, FrameError> {
        let (tag, payload) = split_tag(body)?;
        match tag {
            TAG_RESIZE => {
                let cols = take_u16(payload, 0)?;
                let rows = take_u16(payload, 2)?;
                Ok(ControlMessage::Resize { cols, rows })
            }
            TAG_INPUT => Ok(ControlMessage::Input {
                bytes: payload.to_vec(),
            }),
            TAG_LOAD_PLUGIN => Ok(ControlMessage::LoadPlugin {
                path: take_string(payload)?,
            }),
            TAG_PING => Ok(ControlMessage::Ping),
            TAG_DETACH => Ok(ControlMessage::Detach),
            other => Err(FrameError::UnknownTag(other)),
        }
    }
}

impl DaemonMessage {
    /// Encode into a complete frame, length prefix included.
    pub fn encode(&self) -> Result<Vec<u8>, FrameError> {
        let mut body = Vec::with_capacity(16);
        match self {
            DaemonMessage::SegmentReady { cols, rows, path } => {
                body.push(TAG_SEGMENT_READY);
                body.extend_from_slice(&cols.to_le_bytes());
                body.extend_from_slice(&rows.to_le_bytes());
                body.extend_from_slice(path.as_bytes());
            }
            DaemonMessage::SessionClosed { exit_code } => {
                body.push(TAG_SESSION_CLOSED);
                body.extend_from_slice(&exit_code.to_le_bytes());
            }
            DaemonMessage::Pong => body.push(TAG_PONG),
        }
        finish_frame(body)
    }

    /// Decode a frame body (tag plus payload, length prefix stripped).
    pub fn decode(body: &[u8]) -> Result<Self, FrameError> {
        let (tag, payload) = split_tag(body)?;
        match tag {
            TAG_SEGMENT_READY => {
                let cols = take_u16(payload, 0)?;
                let rows = take_u16(payload, 2)?;
                let path = take_string(payload.get(4..).ok_or(FrameError::Truncated)?)?;
                Ok(DaemonMessage::SegmentReady { cols, rows, path })
            }
            TAG_SESSION_CLOSED => {
                let raw = payload
                    .get(..4)
                    .and_then(|b| <[u8; 4]>::try_from(b).ok())
                    .ok_or(FrameError::Truncated)?;
                Ok(DaemonMessage::SessionClosed {
                    exit_code: i32::from_le_bytes(raw),
                })
            }
            TAG_PONG => Ok(DaemonMessage::Pong),
            other => Err(FrameError::UnknownTag(other)),
        }
    }
}

/// Validate a received body length before reading the body itself.
pub fn check_body_len(len: usize) -> Result<(), FrameError> {
    if len == 0 {
        return Err(FrameError::Truncated);
    }
    if len > MAX_FRAME_LEN {
        return Err(FrameError::Oversized { len });
    }
    Ok(())
}

fn finish_frame(body: Vec<u8>) -> Result<Vec<u8>, FrameError> {
    if body.len() > MAX_FRAME_LEN {
        return Err(FrameError::Oversized { len: body.len() });
    }
    let mut frame = Vec::with_capacity(4 + body.len());
    frame.extend_from_slice(&(body.len() as u32).to_le_bytes());
    frame.extend_from_slice(&body);
    Ok(frame)
}

fn split_tag(body: &[u8]) -> Result<(u8, &[u8]), FrameError> {
    if body.len() > MAX_FRAME_LEN {
        return Err(FrameError::Oversized { len: body.len() });
    }
    match body.split_first() {
        Some((tag, payload)) => Ok((*tag, payload)),
        None => Err(FrameError::Truncated),
    }
}

fn take_u16(payload: &[u8], at: usize) -> Result<u16, FrameError> {
    payload
        .get(at..at + 2)
        .and_then(|b| <[u8; 2]>::try_from(b).ok())
        .map(u16::from_le_bytes)
        .ok_or(FrameError::Truncated)
}

fn take_string(payload: &[u8]) -> Result<String, FrameError> {
    String::from_utf8(payload.to_vec()).map_err(|_| FrameError::BadUtf8)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn body(frame: &[u8]) -> &[u8] {
        let len = u32::from_le_bytes(frame[..4].try_into().unwrap()) as usize;
        assert_eq!(frame.len(), 4 + len);
        &frame[4..]
    }

    #[test]
    fn resize_has_fixed_wire_bytes() {
        let frame = ControlMessage::Resize {
            cols: 120,
            rows: 40,
        }
        .encode()
        .unwrap();
        assert_eq!(frame, [5, 0, 0, 0, 0x01, 120, 0, 40, 0]);
    }

    #[test]
    fn input_carries_raw_bytes() {
        let frame = ControlMessage::Input {
            bytes: b"\x1b[A".to_vec(),
        }
        .encode()
        .unwrap();
        let decoded = ControlMessage::decode(body(&frame)).unwrap();
        assert_eq!(
            decoded,
            ControlMessage::Input {
                bytes: b"\x1b[A".to_vec()
            }
        );
    }

    #[test]
    fn segment_ready_roundtrip() {
        let msg = DaemonMessage::SegmentReady {
            cols: 200,
            rows: 100,
            path: "/gridlink_grid_v1.3".into(),
        };
        let frame = msg.encode().unwrap();
        assert_eq!(DaemonMessage::decode(body(&frame)).unwrap(), msg);
    }

    #[test]
    fn session_closed_encodes_negative_exit_codes() {
        let frame = DaemonMessage::SessionClosed { exit_code: -1 }.encode().unwrap();
        assert_eq!(
            DaemonMessage::decode(body(&frame)).unwrap(),
            DaemonMessage::SessionClosed { exit_code: -1 }
        );
    }

    #[test]
    fn empty_tag_only_messages() {
        for (frame, expect) in [
            (ControlMessage::Ping.encode().unwrap(), ControlMessage::Ping),
            (
                ControlMessage::Detach.encode().unwrap(),
                ControlMessage::Detach,
            ),
        ] {
            assert_eq!(ControlMessage::decode(body(&frame)).unwrap(), expect);
        }
        let frame = DaemonMessage::Pong.encode().unwrap();
        assert_eq!(
            DaemonMessage::decode(body(&frame)).unwrap(),
            DaemonMessage::Pong
        );
    }

    #[test]
    fn oversized_input_is_rejected_at_encode() {
        let msg = ControlMessage::Input {
            bytes: vec![0u8; MAX_FRAME_LEN],
        };
        assert!(matches!(
            msg.encode(),
            Err(FrameError::Oversized { len }) if len == MAX_FRAME_LEN + 1
        ));
    }

    #[test]
    fn unknown_tag_and_truncation_are_errors() {
        assert_eq!(
            ControlMessage::decode(&[0x7f]),
            Err(FrameError::UnknownTag(0x7f))
        );
        assert_eq!(ControlMessage::decode(&[]), Err(FrameError::Truncated));
        // Resize needs four payload bytes.
        assert_eq!(
            ControlMessage::decode(&[0x01, 120, 0]),
            Err(FrameError::Truncated)
        );
        // SegmentReady needs at least the dimension prefix.
        assert_eq!(
            DaemonMessage::decode(&[0x81, 0, 0]),
            Err(FrameError::Truncated)
        );
    }

    #[test]
    fn non_utf8_plugin_path_is_rejected() {
        assert_eq!(
            ControlMessage::decode(&[0x03, 0xff, 0xfe]),
            Err(FrameError::BadUtf8)
        );
    }

    #[test]
    fn body_length_validation() {
        assert_eq!(check_body_len(0), Err(FrameError::Truncated));
        assert!(check_body_len(1).is_ok());
        assert!(check_body_len(MAX_FRAME_LEN).is_ok());
        assert_eq!(
            check_body_len(MAX_FRAME_LEN + 1),
            Err(FrameError::Oversized {
                len: MAX_FRAME_LEN + 1
            })
        );
    }
}
