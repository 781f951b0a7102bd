//! Wire codec and typed message variants for the file-transfer protocol.
//!
//! A datagram is `1-byte type | 4-byte big-endian seq_number | payload`.
//! [`RawFrame`] is that generic shape; [`Message`] is the typed,
//! exhaustively-matched view the engine actually works with.

use thiserror::Error;

/// Maximum payload carried by a single DATA packet.
pub const DATA_MAX_SIZE: usize = 2947;
const SEQ_NUMBER_BYTES: usize = 4;
const HEADER_BYTES: usize = 1 + SEQ_NUMBER_BYTES;
/// Largest well-formed datagram on the wire (header + max payload).
pub const MAX_FRAME_SIZE: usize = HEADER_BYTES + DATA_MAX_SIZE;

#[derive(Debug, Error)]
pub enum CodecError {
    #[error("datagram too short: {0} bytes")]
    TooShort(usize),
    #[error("unknown message type byte {0}")]
    UnknownType(u8),
    #[error("payload of {0} bytes exceeds DATA_MAX_SIZE ({DATA_MAX_SIZE})")]
    PayloadTooLarge(usize),
    #[error("malformed payload for {0:?}: {1}")]
    MalformedPayload(MessageType, String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum MessageType {
    Upload = 0,
    Download = 1,
    Data = 2,
    Ack = 3,
    AckDownload = 4,
    AckEnd = 5,
    Error = 6,
    End = 7,
}

impl MessageType {
    fn from_byte(b: u8) -> Result<Self, CodecError> {
        Ok(match b {
            0 => Self::Upload,
            1 => Self::Download,
            2 => Self::Data,
            3 => Self::Ack,
            4 => Self::AckDownload,
            5 => Self::AckEnd,
            6 => Self::Error,
            7 => Self::End,
            other => return Err(CodecError::UnknownType(other)),
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum WireErrorCode {
    FileNotFound = 0,
    FileTooBig = 1,
    FileAlreadyExists = 2,
    FileWriteError = 3,
}

impl WireErrorCode {
    fn from_byte(b: u8) -> Option<Self> {
        Some(match b {
            0 => Self::FileNotFound,
            1 => Self::FileTooBig,
            2 => Self::FileAlreadyExists,
            3 => Self::FileWriteError,
            _ => return None,
        })
    }
}

/// The generic wire frame: a message type, a sequence number, and raw payload
/// bytes. This is the layer §4.1's `encode`/`decode` operations work on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawFrame {
    pub msg_type: MessageType,
    pub seq_number: u32,
    pub payload: Vec<u8>,
}

impl RawFrame {
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(HEADER_BYTES + self.payload.len());
        out.push(self.msg_type as u8);
        out.extend_from_slice(&self.seq_number.to_be_bytes());
        out.extend_from_slice(&self.payload);
        out
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, CodecError> {
        if bytes.len() < HEADER_BYTES {
            return Err(CodecError::TooShort(bytes.len()));
        }
        let msg_type = MessageType::from_byte(bytes[0])?;
        let seq_number = u32::from_be_bytes([bytes[1], bytes[2], bytes[3], bytes[4]]);
        let payload = bytes[HEADER_BYTES..].to_vec();
        if payload.len() > DATA_MAX_SIZE {
            return Err(CodecError::PayloadTooLarge(payload.len()));
        }
        Ok(Self {
            msg_type,
            seq_number,
            payload,
        })
    }
}

/// A fully parsed, type-safe protocol message. Each variant carries exactly
/// the fields that are meaningful for it (§9 "Message as tagged variant").
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    Upload {
        file_size: u64,
        filename: String,
        md5_hex: String,
    },
    Download {
        filename: String,
    },
    Data {
        seq: u32,
        payload: Vec<u8>,
    },
    /// `digest` is `Some` only for the closing ACK of a download (the
    /// receiver's 32-char hex MD5, §3).
    Ack {
        seq: u32,
        digest: Option<String>,
    },
    AckDownload {
        file_size: u64,
    },
    AckEnd {
        seq: u32,
    },
    Error {
        code: WireErrorCode,
    },
    /// `digest` is `Some` only when the server (sender) reports its MD5 at
    /// the end of a download (§4.5 Download-integrity teardown).
    End {
        digest: Option<String>,
    },
}

impl Message {
    pub fn msg_type(&self) -> MessageType {
        match self {
            Message::Upload { .. } => MessageType::Upload,
            Message::Download { .. } => MessageType::Download,
            Message::Data { .. } => MessageType::Data,
            Message::Ack { .. } => MessageType::Ack,
            Message::AckDownload { .. } => MessageType::AckDownload,
            Message::AckEnd { .. } => MessageType::AckEnd,
            Message::Error { .. } => MessageType::Error,
            Message::End { .. } => MessageType::End,
        }
    }

    /// The `seq_number` this message carries on the wire.
    pub fn seq_number(&self) -> u32 {
        match self {
            Message::Data { seq, .. } => *seq,
            Message::Ack { seq, .. } => *seq,
            Message::AckEnd { seq } => *seq,
            Message::Upload { .. }
            | Message::Download { .. }
            | Message::AckDownload { .. }
            | Message::Error { .. }
            | Message::End { .. } => 0,
        }
    }

    pub fn to_frame(&self) -> RawFrame {
        let seq_number = self.seq_number();
        let payload = match self {
            Message::Upload {
                file_size,
                filename,
                md5_hex,
            } => format!("{file_size}|{filename}|{md5_hex}").into_bytes(),
            Message::Download { filename } => filename.clone().into_bytes(),
            Message::Data { payload, .. } => payload.clone(),
            Message::Ack { digest, .. } => digest.clone().unwrap_or_default().into_bytes(),
            Message::AckDownload { file_size } => file_size.to_string().into_bytes(),
            Message::AckEnd { .. } => Vec::new(),
            Message::Error { code } => vec![*code as u8],
            Message::End { digest } => digest.clone().unwrap_or_default().into_bytes(),
        };
        RawFrame {
            msg_type: self.msg_type(),
            seq_number,
            payload,
        }
    }

    pub fn encode(&self) -> Vec<u8> {
        self.to_frame().encode()
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, CodecError> {
        Self::from_frame(RawFrame::decode(bytes)?)
    }

    pub fn from_frame(frame: RawFrame) -> Result<Self, CodecError> {
        let RawFrame {
            msg_type,
            seq_number,
            payload,
        } = frame;
        Ok(match msg_type {
            MessageType::Upload => {
                let text = payload_as_utf8(MessageType::Upload, &payload)?;
                let mut parts = text.splitn(3, '|');
                let (Some(size_str), Some(filename), Some(md5_hex)) =
                    (parts.next(), parts.next(), parts.next())
                else {
                    return Err(CodecError::MalformedPayload(
                        MessageType::Upload,
                        "expected <size>|<filename>|<md5hex>".into(),
                    ));
                };
                let file_size = size_str.parse().map_err(|_| {
                    CodecError::MalformedPayload(MessageType::Upload, "bad size".into())
                })?;
                Message::Upload {
                    file_size,
                    filename: filename.to_string(),
                    md5_hex: md5_hex.to_string(),
                }
            }
            MessageType::Download => Message::Download {
                filename: payload_as_utf8(MessageType::Download, &payload)?,
            },
            MessageType::Data => Message::Data {
                seq: seq_number,
                payload,
            },
            MessageType::Ack => Message::Ack {
                seq: seq_number,
                digest: if payload.is_empty() {
                    None
                } else {
                    Some(payload_as_utf8(MessageType::Ack, &payload)?)
                },
            },
            MessageType::AckDownload => {
                let text = payload_as_utf8(MessageType::AckDownload, &payload)?;
                let file_size = text.parse().map_err(|_| {
                    CodecError::MalformedPayload(MessageType::AckDownload, "bad size".into())
                })?;
                Message::AckDownload { file_size }
            }
            MessageType::AckEnd => Message::AckEnd { seq: seq_number },
            MessageType::Error => {
                let byte = *payload.first().ok_or_else(|| {
                    CodecError::MalformedPayload(MessageType::Error, "missing code byte".into())
                })?;
                let code = WireErrorCode::from_byte(byte).ok_or_else(|| {
                    CodecError::MalformedPayload(
                        MessageType::Error,
                        format!("unknown error code {byte}"),
                    )
                })?;
                Message::Error { code }
            }
            MessageType::End => Message::End {
                digest: if payload.is_empty() {
                    None
                } else {
                    Some(payload_as_utf8(MessageType::End, &payload)?)
                },
            },
        })
    }

    // ---- constructors mirroring the protocol's factory functions ----

    pub fn upload(file_size: u64, filename: impl Into<String>, md5_hex: impl Into<String>) -> Self {
        Message::Upload {
            file_size,
            filename: filename.into(),
            md5_hex: md5_hex.into(),
        }
    }

    pub fn download(filename: impl Into<String>) -> Self {
        Message::Download {
            filename: filename.into(),
        }
    }

    pub fn data(seq: u32, payload: Vec<u8>) -> Self {
        Message::Data { seq, payload }
    }

    pub fn ack(seq: u32) -> Self {
        Message::Ack { seq, digest: None }
    }

    pub fn ack_with_digest(seq: u32, digest: impl Into<String>) -> Self {
        Message::Ack {
            seq,
            digest: Some(digest.into()),
        }
    }

    pub fn ack_download(file_size: u64) -> Self {
        Message::AckDownload { file_size }
    }

    pub fn ack_end(seq: u32) -> Self {
        Message::AckEnd { seq }
    }

    pub fn error(code: WireErrorCode) -> Self {
        Message::Error { code }
    }

    pub fn end() -> Self {
        Message::End { digest: None }
    }

    pub fn end_with_digest(digest: impl Into<String>) -> Self {
        Message::End {
            digest: Some(digest.into()),
        }
    }
}

fn payload_as_utf8(ty: MessageType, payload: &[u8]) -> Result<String, CodecError> {
    String::from_utf8(payload.to_vec())
        .map_err(|e| CodecError::MalformedPayload(ty, e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn round_trip(msg: Message) {
        let bytes = msg.encode();
        assert!(bytes.len() <= MAX_FRAME_SIZE);
        let decoded = Message::decode(&bytes).unwrap();
        assert_eq!(msg, decoded);
    }

    #[test]
    fn round_trip_all_variants() {
        round_trip(Message::upload(1234, "file.bin", "d41d8cd98f00b204e9800998ecf8427e"));
        round_trip(Message::download("file.bin"));
        round_trip(Message::data(7, vec![1, 2, 3]));
        round_trip(Message::ack(7));
        round_trip(Message::ack_with_digest(0, "d41d8cd98f00b204e9800998ecf8427e"));
        round_trip(Message::ack_download(4096));
        round_trip(Message::ack_end(0));
        round_trip(Message::error(WireErrorCode::FileNotFound));
        round_trip(Message::end());
        round_trip(Message::end_with_digest("d41d8cd98f00b204e9800998ecf8427e"));
    }

    #[test]
    fn data_payload_may_be_empty() {
        round_trip(Message::data(1, Vec::new()));
    }

    #[test]
    fn decode_rejects_short_datagram() {
        assert!(matches!(
            Message::decode(&[0, 0, 0, 0]),
            Err(CodecError::TooShort(4))
        ));
    }

    #[test]
    fn decode_rejects_unknown_type() {
        let mut bytes = vec![200u8];
        bytes.extend_from_slice(&0u32.to_be_bytes());
        assert!(matches!(
            Message::decode(&bytes),
            Err(CodecError::UnknownType(200))
        ));
    }

    #[test]
    fn decode_rejects_oversized_payload() {
        let mut bytes = vec![MessageType::Data as u8];
        bytes.extend_from_slice(&0u32.to_be_bytes());
        bytes.extend(vec![0u8; DATA_MAX_SIZE + 1]);
        assert!(matches!(
            Message::decode(&bytes),
            Err(CodecError::PayloadTooLarge(_))
        ));
    }

    #[test]
    fn data_seq_number_round_trips_through_frame() {
        let frame = Message::data(99, vec![9, 9]).to_frame();
        assert_eq!(frame.seq_number, 99);
        assert_eq!(frame.msg_type, MessageType::Data);
    }
}
