// Copyright 2025 The Chronod Authors
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! HTTP/2 framing: the 9-byte frame header, frame payloads, flags, error
//! codes, and the protocol defaults this server announces. All multi-byte
//! fields are network byte order.

use bytes::{BufMut, BytesMut};

/// The literal 24-byte client greeting that begins every HTTP/2 connection.
pub const CLIENT_PREFACE: &[u8; 24] = b"PRI * HTTP/2.0\r\n\r\nSM\r\n\r\n";

/// Size of the fixed frame header.
pub const FRAME_HEADER_SIZE: usize = 9;

/// Size of a PING payload.
pub const PING_PAYLOAD_SIZE: usize = 8;

/// Size of one serialized settings entry (32-bit identifier, 32-bit value).
pub const SETTINGS_ENTRY_SIZE: usize = 8;

/// Size of a GOAWAY payload (without debug data).
pub const GO_AWAY_PAYLOAD_SIZE: usize = 8;

/// Size of a RST_STREAM payload.
pub const RESET_STREAM_PAYLOAD_SIZE: usize = 4;

/// Size of a WINDOW_UPDATE payload.
pub const WINDOW_UPDATE_PAYLOAD_SIZE: usize = 4;

/// Size of a PRIORITY payload.
pub const PRIORITY_PAYLOAD_SIZE: usize = 5;

/// END_STREAM flag (DATA, HEADERS).
pub const FLAG_END_STREAM: u8 = 0x01;

/// ACK flag (SETTINGS, PING).
pub const FLAG_ACK: u8 = 0x01;

/// END_HEADERS flag (HEADERS, PUSH_PROMISE, CONTINUATION).
pub const FLAG_END_HEADERS: u8 = 0x04;

/// PADDED flag (DATA, HEADERS, PUSH_PROMISE).
pub const FLAG_PADDED: u8 = 0x08;

/// PRIORITY flag (HEADERS).
pub const FLAG_PRIORITY: u8 = 0x20;

/// Default maximum size of the HPACK dynamic table we announce.
pub const DEFAULT_MAX_DYNAMIC_HEADER_TABLE_SIZE: u32 = 4096;

/// Default initial flow-control window size of a stream.
pub const DEFAULT_INITIAL_WINDOW_SIZE: u32 = 65535;

/// Default largest frame payload we accept.
pub const DEFAULT_MAX_FRAME_PAYLOAD_SIZE: u32 = 16384;

/// Default largest header list we advertise willingness to accept.
pub const DEFAULT_MAX_HEADER_LIST_SIZE: u32 = 8192;

/// HTTP/2 frame types (RFC 7540 §6).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum FrameType {
    /// DATA
    Data = 0,
    /// HEADERS
    Headers = 1,
    /// PRIORITY (deprecated)
    Priority = 2,
    /// RST_STREAM
    ResetStream = 3,
    /// SETTINGS
    Settings = 4,
    /// PUSH_PROMISE
    PushPromise = 5,
    /// PING
    Ping = 6,
    /// GOAWAY
    GoAway = 7,
    /// WINDOW_UPDATE
    WindowUpdate = 8,
    /// CONTINUATION
    Continuation = 9,
}

impl FrameType {
    /// Maps a wire byte to a frame type, `None` for unknown types.
    pub fn from_u8(value: u8) -> Option<FrameType> {
        Some(match value {
            0 => FrameType::Data,
            1 => FrameType::Headers,
            2 => FrameType::Priority,
            3 => FrameType::ResetStream,
            4 => FrameType::Settings,
            5 => FrameType::PushPromise,
            6 => FrameType::Ping,
            7 => FrameType::GoAway,
            8 => FrameType::WindowUpdate,
            9 => FrameType::Continuation,
            _ => return None,
        })
    }
}

/// Connection- and stream-level error codes (RFC 7540 §7).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum ErrorCode {
    /// Graceful shutdown.
    NoError = 0,
    /// Protocol error detected.
    ProtocolError = 1,
    /// Implementation fault.
    InternalError = 2,
    /// Flow-control limits exceeded.
    FlowControlError = 3,
    /// Settings not acknowledged in time.
    SettingsTimeout = 4,
    /// Frame received for a closed stream.
    StreamClosed = 5,
    /// Frame size incorrect.
    FrameSizeError = 6,
    /// Stream not processed.
    RefusedStream = 7,
    /// Stream cancelled.
    Cancel = 8,
    /// Compression state not updated.
    CompressionError = 9,
    /// TCP connection error for CONNECT method.
    ConnectError = 10,
    /// Processing capacity exceeded.
    EnhanceYourCalm = 11,
    /// Negotiated TLS parameters not acceptable.
    InadequateSecurity = 12,
    /// Use HTTP/1.1 for the request.
    Http11Required = 13,
}

impl ErrorCode {
    /// Returns the wire value.
    pub fn code(self) -> u32 {
        self as u32
    }

    /// Maps a wire value to an error code, `None` for unknown codes.
    pub fn from_u32(value: u32) -> Option<ErrorCode> {
        Some(match value {
            0 => ErrorCode::NoError,
            1 => ErrorCode::ProtocolError,
            2 => ErrorCode::InternalError,
            3 => ErrorCode::FlowControlError,
            4 => ErrorCode::SettingsTimeout,
            5 => ErrorCode::StreamClosed,
            6 => ErrorCode::FrameSizeError,
            7 => ErrorCode::RefusedStream,
            8 => ErrorCode::Cancel,
            9 => ErrorCode::CompressionError,
            10 => ErrorCode::ConnectError,
            11 => ErrorCode::EnhanceYourCalm,
            12 => ErrorCode::InadequateSecurity,
            13 => ErrorCode::Http11Required,
            _ => return None,
        })
    }
}

/// SETTINGS parameter identifiers (RFC 7540 §6.5.2).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum SettingsIdentifier {
    /// SETTINGS_HEADER_TABLE_SIZE
    HeaderTableSize = 1,
    /// SETTINGS_ENABLE_PUSH
    EnablePush = 2,
    /// SETTINGS_MAX_CONCURRENT_STREAMS
    MaxConcurrentStreams = 3,
    /// SETTINGS_INITIAL_WINDOW_SIZE
    InitialWindowSize = 4,
    /// SETTINGS_MAX_FRAME_SIZE
    MaxFrameSize = 5,
    /// SETTINGS_MAX_HEADER_LIST_SIZE
    MaxHeaderListSize = 6,
}

impl SettingsIdentifier {
    /// Maps a wire value to an identifier, `None` for unknown identifiers.
    pub fn from_u32(value: u32) -> Option<SettingsIdentifier> {
        Some(match value {
            1 => SettingsIdentifier::HeaderTableSize,
            2 => SettingsIdentifier::EnablePush,
            3 => SettingsIdentifier::MaxConcurrentStreams,
            4 => SettingsIdentifier::InitialWindowSize,
            5 => SettingsIdentifier::MaxFrameSize,
            6 => SettingsIdentifier::MaxHeaderListSize,
            _ => return None,
        })
    }
}

/// The fixed 9-byte frame header: 24-bit payload length, 8-bit type, 8-bit
/// flags, and a 31-bit stream id (the remaining bit is reserved).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    /// Payload length in bytes (24 bits on the wire).
    pub length: u32,
    /// Raw frame type byte; see [`FrameHeader::frame_type`].
    pub kind: u8,
    /// Frame flags.
    pub flags: u8,
    /// Stream identifier; 0 addresses the connection.
    pub stream_id: u32,
}

impl FrameHeader {
    /// Builds a header for a known frame type.
    pub fn new(kind: FrameType, flags: u8, stream_id: u32, length: u32) -> FrameHeader {
        FrameHeader {
            length,
            kind: kind as u8,
            flags,
            stream_id,
        }
    }

    /// Returns the frame type, `None` for unknown type bytes.
    pub fn frame_type(&self) -> Option<FrameType> {
        FrameType::from_u8(self.kind)
    }

    /// Returns whether `flag` is set.
    pub fn has_flag(&self, flag: u8) -> bool {
        self.flags & flag != 0
    }

    /// Serializes the header.
    pub fn encode(&self) -> [u8; FRAME_HEADER_SIZE] {
        let mut bytes = [0u8; FRAME_HEADER_SIZE];
        bytes[0] = (self.length >> 16) as u8;
        bytes[1] = (self.length >> 8) as u8;
        bytes[2] = self.length as u8;
        bytes[3] = self.kind;
        bytes[4] = self.flags;
        bytes[5..9].copy_from_slice(&(self.stream_id & 0x7fff_ffff).to_be_bytes());
        bytes
    }

    /// Parses a header from the first [`FRAME_HEADER_SIZE`] bytes of
    /// `bytes`.
    ///
    /// Panics if `bytes` is shorter than a frame header.
    pub fn decode(bytes: &[u8]) -> FrameHeader {
        assert!(bytes.len() >= FRAME_HEADER_SIZE, "short frame header");
        FrameHeader {
            length: u32::from(bytes[0]) << 16 | u32::from(bytes[1]) << 8 | u32::from(bytes[2]),
            kind: bytes[3],
            flags: bytes[4],
            stream_id: u32::from_be_bytes([bytes[5], bytes[6], bytes[7], bytes[8]]) & 0x7fff_ffff,
        }
    }
}

/// One SETTINGS parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SettingsEntry {
    /// The parameter being set.
    pub identifier: SettingsIdentifier,
    /// The parameter value.
    pub value: u32,
}

impl SettingsEntry {
    /// Serializes the entry.
    pub fn encode(&self, buffer: &mut BytesMut) {
        buffer.put_u32(self.identifier as u32);
        buffer.put_u32(self.value);
    }

    /// Parses an entry from the first [`SETTINGS_ENTRY_SIZE`] bytes of
    /// `bytes`. Returns `None` for short input or unknown identifiers.
    pub fn decode(bytes: &[u8]) -> Option<SettingsEntry> {
        if bytes.len() < SETTINGS_ENTRY_SIZE {
            return None;
        }
        let identifier =
            u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]);
        let value = u32::from_be_bytes([bytes[4], bytes[5], bytes[6], bytes[7]]);
        Some(SettingsEntry {
            identifier: SettingsIdentifier::from_u32(identifier)?,
            value,
        })
    }
}

/// GOAWAY payload: the last stream id the sender processed and an error
/// code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GoAwayPayload {
    /// Highest stream id the sender has processed (31 bits).
    pub last_stream_id: u32,
    /// Raw error code; see [`ErrorCode::from_u32`].
    pub error_code: u32,
}

impl GoAwayPayload {
    /// Serializes the payload.
    pub fn encode(&self, buffer: &mut BytesMut) {
        buffer.put_u32(self.last_stream_id & 0x7fff_ffff);
        buffer.put_u32(self.error_code);
    }

    /// Parses the fixed part of a GOAWAY payload; `None` for short input.
    pub fn decode(bytes: &[u8]) -> Option<GoAwayPayload> {
        if bytes.len() < GO_AWAY_PAYLOAD_SIZE {
            return None;
        }
        Some(GoAwayPayload {
            last_stream_id: u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]])
                & 0x7fff_ffff,
            error_code: u32::from_be_bytes([bytes[4], bytes[5], bytes[6], bytes[7]]),
        })
    }
}

/// RST_STREAM payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResetStreamPayload {
    /// Raw error code.
    pub error_code: u32,
}

impl ResetStreamPayload {
    /// Serializes the payload.
    pub fn encode(&self, buffer: &mut BytesMut) {
        buffer.put_u32(self.error_code);
    }

    /// Parses a RST_STREAM payload; `None` for short input.
    pub fn decode(bytes: &[u8]) -> Option<ResetStreamPayload> {
        if bytes.len() < RESET_STREAM_PAYLOAD_SIZE {
            return None;
        }
        Some(ResetStreamPayload {
            error_code: u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]),
        })
    }
}

/// WINDOW_UPDATE payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowUpdatePayload {
    /// Window size increment (31 bits; zero is a protocol error).
    pub window_size_increment: u32,
}

impl WindowUpdatePayload {
    /// Serializes the payload.
    pub fn encode(&self, buffer: &mut BytesMut) {
        buffer.put_u32(self.window_size_increment & 0x7fff_ffff);
    }

    /// Parses a WINDOW_UPDATE payload; `None` for short input.
    pub fn decode(bytes: &[u8]) -> Option<WindowUpdatePayload> {
        if bytes.len() < WINDOW_UPDATE_PAYLOAD_SIZE {
            return None;
        }
        Some(WindowUpdatePayload {
            window_size_increment: u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]])
                & 0x7fff_ffff,
        })
    }
}

/// PRIORITY payload. The scheme is deprecated; the payload is only
/// validated for size, never acted upon.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PriorityPayload {
    /// Exclusive-dependency bit.
    pub exclusive: bool,
    /// Stream this one depends on (31 bits).
    pub stream_dependency: u32,
    /// Priority weight.
    pub weight: u8,
}

impl PriorityPayload {
    /// Serializes the payload.
    pub fn encode(&self, buffer: &mut BytesMut) {
        let mut dependency = self.stream_dependency & 0x7fff_ffff;
        if self.exclusive {
            dependency |= 0x8000_0000;
        }
        buffer.put_u32(dependency);
        buffer.put_u8(self.weight);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_layout() {
        let header = FrameHeader::new(FrameType::Settings, 0, 0, 40);
        assert_eq!(header.encode(), [0, 0, 40, 4, 0, 0, 0, 0, 0]);
        let header = FrameHeader::new(FrameType::Ping, FLAG_ACK, 0, 8);
        assert_eq!(header.encode(), [0, 0, 8, 6, 1, 0, 0, 0, 0]);
        let header = FrameHeader::new(FrameType::Data, FLAG_END_STREAM, 3, 0x012345);
        assert_eq!(header.encode(), [0x01, 0x23, 0x45, 0, 1, 0, 0, 0, 3]);
    }

    #[test]
    fn header_roundtrip() {
        let header = FrameHeader::new(FrameType::Headers, FLAG_END_HEADERS, 0x7fff_ffff, 16384);
        assert_eq!(FrameHeader::decode(&header.encode()), header);
    }

    #[test]
    fn decode_masks_the_reserved_bit() {
        let mut bytes = FrameHeader::new(FrameType::Data, 0, 1, 0).encode();
        bytes[5] |= 0x80;
        assert_eq!(FrameHeader::decode(&bytes).stream_id, 1);
    }

    #[test]
    fn settings_entry_roundtrip() {
        let entry = SettingsEntry {
            identifier: SettingsIdentifier::MaxFrameSize,
            value: 16384,
        };
        let mut buffer = BytesMut::new();
        entry.encode(&mut buffer);
        assert_eq!(buffer.len(), SETTINGS_ENTRY_SIZE);
        assert_eq!(SettingsEntry::decode(&buffer), Some(entry));
    }

    #[test]
    fn goaway_payload_layout() {
        let payload = GoAwayPayload {
            last_stream_id: 0,
            error_code: ErrorCode::FrameSizeError.code(),
        };
        let mut buffer = BytesMut::new();
        payload.encode(&mut buffer);
        assert_eq!(&buffer[..], [0, 0, 0, 0, 0, 0, 0, 6]);
        assert_eq!(GoAwayPayload::decode(&buffer), Some(payload));
        assert_eq!(GoAwayPayload::decode(&buffer[..7]), None);
    }

    #[test]
    fn unknown_frame_type() {
        let header = FrameHeader {
            length: 0,
            kind: 250,
            flags: 0,
            stream_id: 0,
        };
        assert_eq!(header.frame_type(), None);
    }
}
