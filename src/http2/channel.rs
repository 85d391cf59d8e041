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

//! A single HTTP/2 connection with multiplexed streams.
//!
//! [`Channel`] owns the frame read loop: it reads the fixed 9-byte frame
//! header, has the [`Processor`] validate it, then either skips the payload
//! (invalid frames) or reads it (with the connection's I/O timeout) and
//! hands it to the processor. Frame headers themselves are read without a
//! timeout; an idle connection is allowed to stay quiet indefinitely.

use std::fmt;
use std::sync::{Arc, Weak};
use std::time::Duration;

use bytes::Bytes;

use crate::http2::frame::{ErrorCode, FrameHeader, FrameType, CLIENT_PREFACE, FRAME_HEADER_SIZE};
use crate::http2::handler::{Handler, Request, ServerStream};
use crate::http2::hpack::HeaderSet;
use crate::http2::processor::{ChannelCore, Processor};
use crate::http2::ChannelOptions;
use crate::net::socket::AsyncStream;
use crate::refcount::RefPtr;
use crate::status::Result;

/// The owner of a set of channels: looks up request handlers and is told
/// when a channel shuts down.
pub trait ChannelManager: Send + Sync {
    /// Forgets a channel that has shut down.
    fn remove_channel(&self, channel: &Channel);

    /// Returns the handler registered for `path`, `NotFound` otherwise.
    fn handler(&self, path: &str) -> Result<Arc<dyn Handler>>;
}

/// Manages a single HTTP/2 connection over any streaming transport.
pub struct Channel {
    socket: RefPtr<dyn AsyncStream>,
    manager: Weak<dyn ChannelManager>,
    processor: Processor,
    io_timeout: Duration,
    weak_self: Weak<Channel>,
}

impl Channel {
    /// Creates a channel over `socket`. Nothing is read or written until
    /// [`start_server`](Channel::start_server).
    pub fn new(
        socket: RefPtr<dyn AsyncStream>,
        manager: Weak<dyn ChannelManager>,
        options: ChannelOptions,
    ) -> Arc<Channel> {
        Arc::new_cyclic(|weak: &Weak<Channel>| {
            let core: Weak<dyn ChannelCore> = weak.clone();
            Channel {
                socket: socket.clone(),
                manager,
                processor: Processor::new(core, socket.clone(), options.io_timeout),
                io_timeout: options.io_timeout,
                weak_self: weak.clone(),
            }
        })
    }

    /// Starts the server side of the connection: reads the client preface
    /// (closing the connection on a mismatch), sends this endpoint's
    /// SETTINGS, and begins the frame read loop.
    pub fn start_server(self: &Arc<Self>) {
        let this = Arc::clone(self);
        self.read_with_timeout(CLIENT_PREFACE.len(), move |data| {
            if data[..] != CLIENT_PREFACE[..] {
                log::error!("HTTP/2 client preface error: {:?}", &data[..]);
                this.shutdown();
            } else {
                this.processor.send_settings();
                this.next_frame();
            }
        });
    }

    /// Returns whether the underlying socket is open.
    pub fn is_open(&self) -> bool {
        self.socket.is_open()
    }

    /// Closes the connection and removes it from its manager.
    pub fn close(&self) {
        self.shutdown();
    }

    fn shutdown(&self) {
        self.socket.close();
        if let (Some(manager), Some(this)) = (self.manager.upgrade(), self.weak_self.upgrade()) {
            manager.remove_channel(&this);
        }
    }

    fn read(self: &Arc<Self>, length: usize, callback: impl FnOnce(Bytes) + Send + 'static) {
        let this = Arc::clone(self);
        let status = self.socket.read(
            length,
            Box::new(move |result| match result {
                Ok(buffer) => callback(buffer),
                Err(_) => this.shutdown(),
            }),
        );
        if status.is_err() {
            self.shutdown();
        }
    }

    fn read_with_timeout(
        self: &Arc<Self>,
        length: usize,
        callback: impl FnOnce(Bytes) + Send + 'static,
    ) {
        let this = Arc::clone(self);
        let status = self.socket.read_with_timeout(
            length,
            Box::new(move |result| match result {
                Ok(buffer) => callback(buffer),
                Err(_) => this.shutdown(),
            }),
            self.io_timeout,
        );
        if status.is_err() {
            self.shutdown();
        }
    }

    fn skip(self: &Arc<Self>, length: usize, callback: impl FnOnce() + Send + 'static) {
        let this = Arc::clone(self);
        let status = self.socket.skip_with_timeout(
            length,
            Box::new(move |result| match result {
                Ok(()) => callback(),
                Err(_) => this.shutdown(),
            }),
            self.io_timeout,
        );
        if status.is_err() {
            self.shutdown();
        }
    }

    fn next_frame(self: &Arc<Self>) {
        let this = Arc::clone(self);
        self.read(FRAME_HEADER_SIZE, move |buffer| {
            let header = FrameHeader::decode(&buffer);
            let error = this.processor.validate_frame_header(&header);
            let length = header.length as usize;
            if error != ErrorCode::NoError && header.frame_type() != Some(FrameType::GoAway) {
                if length > 0 {
                    let next = Arc::clone(&this);
                    this.skip(length, move || next.next_frame());
                } else {
                    this.next_frame();
                }
            } else if length > 0 {
                let next = Arc::clone(&this);
                this.read_with_timeout(length, move |payload| {
                    next.processor.process_frame(&header, payload);
                });
            } else {
                this.processor.process_frame(&header, Bytes::new());
            }
        });
    }

    fn continuation_frame(self: &Arc<Self>, stream_id: u32) {
        let this = Arc::clone(self);
        self.read(FRAME_HEADER_SIZE, move |buffer| {
            let header = FrameHeader::decode(&buffer);
            // TODO: keep accepting high-priority frames like PING and
            // GOAWAY while a stream is receiving fields.
            let going_away = if header.frame_type() != Some(FrameType::Continuation) {
                this.processor.go_away(ErrorCode::ProtocolError);
                true
            } else {
                this.processor.validate_continuation_header(stream_id, &header)
                    != ErrorCode::NoError
            };
            let length = header.length as usize;
            if going_away {
                if length > 0 {
                    let next = Arc::clone(&this);
                    this.skip(length, move || next.next_frame());
                } else {
                    this.next_frame();
                }
            } else if length > 0 {
                let next = Arc::clone(&this);
                this.read_with_timeout(length, move |payload| {
                    next.processor
                        .process_continuation_frame(stream_id, &header, payload);
                });
            } else {
                this.processor
                    .process_continuation_frame(stream_id, &header, Bytes::new());
            }
        });
    }
}

impl ChannelCore for Channel {
    fn read_next_frame(&self) {
        if let Some(this) = self.weak_self.upgrade() {
            this.next_frame();
        }
    }

    fn read_continuation_frame(&self, stream_id: u32) {
        if let Some(this) = self.weak_self.upgrade() {
            this.continuation_frame(stream_id);
        }
    }

    fn close_connection(&self) {
        self.shutdown();
    }

    fn dispatch_request(&self, stream_id: u32, request: Request) {
        let Some(manager) = self.manager.upgrade() else {
            return;
        };
        match manager.handler(&request.path) {
            Ok(handler) => {
                let mut stream = StreamHandle {
                    processor: &self.processor,
                    stream_id,
                };
                handler.handle(&mut stream, &request);
            }
            Err(status) => {
                log::error!("no handler for {:?}: {status}", request.path);
            }
        }
    }
}

impl fmt::Debug for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Channel")
            .field("open", &self.is_open())
            .field("processor", &self.processor)
            .finish()
    }
}

// The per-stream sending surface handed to handlers.
struct StreamHandle<'a> {
    processor: &'a Processor,
    stream_id: u32,
}

impl ServerStream for StreamHandle<'_> {
    fn send_fields(&mut self, fields: &HeaderSet, end_stream: bool) -> Result<()> {
        self.processor.send_fields(self.stream_id, fields, end_stream)
    }

    fn send_data(&mut self, data: Bytes, end_stream: bool) -> Result<()> {
        self.processor.send_data(self.stream_id, data, end_stream)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http2::frame::{
        GoAwayPayload, SettingsEntry, SettingsIdentifier, WindowUpdatePayload,
        DEFAULT_INITIAL_WINDOW_SIZE, DEFAULT_MAX_DYNAMIC_HEADER_TABLE_SIZE,
        DEFAULT_MAX_FRAME_PAYLOAD_SIZE, DEFAULT_MAX_HEADER_LIST_SIZE, FLAG_ACK, FLAG_END_HEADERS,
        GO_AWAY_PAYLOAD_SIZE, PING_PAYLOAD_SIZE, SETTINGS_ENTRY_SIZE,
    };
    use crate::net::socket::tests::{read_result, sync_read, sync_write};
    use crate::net::socket::UnixSocket;
    use crate::status::Status;
    use bytes::{BufMut, BytesMut};
    use std::collections::HashMap;
    use std::time::Duration;

    struct NoHandlers;

    impl ChannelManager for NoHandlers {
        fn remove_channel(&self, _channel: &Channel) {}

        fn handler(&self, path: &str) -> Result<Arc<dyn Handler>> {
            Err(Status::not_found(path.to_owned()))
        }
    }

    struct Fixture {
        channel: Arc<Channel>,
        peer: RefPtr<UnixSocket>,
        _manager: Arc<NoHandlers>,
    }

    impl Fixture {
        fn new() -> Fixture {
            let (socket, peer) = UnixSocket::pair().unwrap();
            let stream = RefPtr::<dyn AsyncStream>::new(&*socket);
            let manager = Arc::new(NoHandlers);
            let weak = Arc::downgrade(&manager) as Weak<dyn ChannelManager>;
            let channel = Channel::new(stream, weak, ChannelOptions::default());
            Fixture {
                channel,
                peer,
                _manager: manager,
            }
        }

        // Runs the preface + SETTINGS exchange and acknowledges the
        // server's settings.
        fn started() -> Fixture {
            let fixture = Fixture::new();
            fixture.channel.start_server();
            fixture.peer_write(&CLIENT_PREFACE[..]);
            let _settings = fixture.peer_read(FRAME_HEADER_SIZE + 5 * SETTINGS_ENTRY_SIZE);
            let ack = FrameHeader::new(FrameType::Settings, FLAG_ACK, 0, 0);
            fixture.peer_write(&ack.encode());
            fixture
        }

        fn peer_write(&self, data: &[u8]) {
            sync_write(&*self.peer, data).unwrap();
        }

        fn peer_read(&self, length: usize) -> Bytes {
            sync_read(&*self.peer, length).unwrap()
        }

        fn peer_write_frame(&self, header: FrameHeader, payload: &[u8]) {
            let mut buffer = BytesMut::with_capacity(FRAME_HEADER_SIZE + payload.len());
            buffer.put_slice(&header.encode());
            buffer.put_slice(payload);
            self.peer_write(&buffer);
        }

        fn expect_go_away(&self, last_stream_id: u32, error: ErrorCode) {
            let header = FrameHeader::decode(&self.peer_read(FRAME_HEADER_SIZE));
            assert_eq!(header.frame_type(), Some(FrameType::GoAway));
            assert_eq!(header.length as usize, GO_AWAY_PAYLOAD_SIZE);
            assert_eq!(header.flags, 0);
            assert_eq!(header.stream_id, 0);
            let payload = GoAwayPayload::decode(&self.peer_read(GO_AWAY_PAYLOAD_SIZE)).unwrap();
            assert_eq!(payload.last_stream_id, last_stream_id);
            assert_eq!(payload.error_code, error.code());
        }
    }

    #[test]
    fn start_server_sends_settings() {
        let fixture = Fixture::new();
        fixture.channel.start_server();
        fixture.peer_write(&CLIENT_PREFACE[..]);
        let header = FrameHeader::decode(&fixture.peer_read(FRAME_HEADER_SIZE));
        assert_eq!(header.length as usize, 5 * SETTINGS_ENTRY_SIZE);
        assert_eq!(header.frame_type(), Some(FrameType::Settings));
        assert_eq!(header.flags, 0);
        assert_eq!(header.stream_id, 0);
        let payload = fixture.peer_read(5 * SETTINGS_ENTRY_SIZE);
        let mut settings = HashMap::new();
        for chunk in payload.chunks(SETTINGS_ENTRY_SIZE) {
            let entry = SettingsEntry::decode(chunk).unwrap();
            settings.insert(entry.identifier, entry.value);
        }
        assert_eq!(
            settings.get(&SettingsIdentifier::HeaderTableSize),
            Some(&DEFAULT_MAX_DYNAMIC_HEADER_TABLE_SIZE)
        );
        assert_eq!(settings.get(&SettingsIdentifier::EnablePush), Some(&1));
        assert_eq!(
            settings.get(&SettingsIdentifier::InitialWindowSize),
            Some(&DEFAULT_INITIAL_WINDOW_SIZE)
        );
        assert_eq!(
            settings.get(&SettingsIdentifier::MaxFrameSize),
            Some(&DEFAULT_MAX_FRAME_PAYLOAD_SIZE)
        );
        assert_eq!(
            settings.get(&SettingsIdentifier::MaxHeaderListSize),
            Some(&DEFAULT_MAX_HEADER_LIST_SIZE)
        );
    }

    #[test]
    fn settings_ack_gets_no_reply() {
        let fixture = Fixture::started();
        // The ACK was already sent by started(); nothing must come back.
        let pending = read_result(&*fixture.peer, 1);
        assert!(pending.recv_timeout(Duration::from_millis(300)).is_err());
    }

    #[test]
    fn bad_preface_closes_the_connection() {
        let fixture = Fixture::new();
        fixture.channel.start_server();
        fixture.peer_write(b"PRI * HTTP/1.1\r\n\r\nSM\r\n\r\n");
        let result = read_result(&*fixture.peer, 1)
            .recv_timeout(Duration::from_secs(5))
            .unwrap();
        assert!(result.is_err());
        assert!(!fixture.channel.is_open());
    }

    #[test]
    fn oversized_frame_yields_frame_size_error() {
        let fixture = Fixture::started();
        let header = FrameHeader::new(
            FrameType::Data,
            0,
            1,
            DEFAULT_MAX_FRAME_PAYLOAD_SIZE + 1,
        );
        fixture.peer_write(&header.encode());
        fixture.peer_write(&vec![0u8; (DEFAULT_MAX_FRAME_PAYLOAD_SIZE + 1) as usize]);
        fixture.expect_go_away(0, ErrorCode::FrameSizeError);
    }

    #[test]
    fn empty_settings_without_ack_is_a_frame_size_error() {
        let fixture = Fixture::started();
        let header = FrameHeader::new(FrameType::Settings, 0, 0, 0);
        fixture.peer_write(&header.encode());
        fixture.expect_go_away(0, ErrorCode::FrameSizeError);
    }

    #[test]
    fn settings_ack_with_payload_is_a_frame_size_error() {
        let fixture = Fixture::started();
        let header = FrameHeader::new(
            FrameType::Settings,
            FLAG_ACK,
            0,
            SETTINGS_ENTRY_SIZE as u32,
        );
        let entry = SettingsEntry {
            identifier: SettingsIdentifier::EnablePush,
            value: 0,
        };
        let mut payload = BytesMut::new();
        entry.encode(&mut payload);
        fixture.peer_write_frame(header, &payload);
        fixture.expect_go_away(0, ErrorCode::FrameSizeError);
    }

    #[test]
    fn settings_with_stream_id_is_a_protocol_error() {
        let fixture = Fixture::started();
        let header = FrameHeader::new(FrameType::Settings, 0, 123, SETTINGS_ENTRY_SIZE as u32);
        let entry = SettingsEntry {
            identifier: SettingsIdentifier::EnablePush,
            value: 0,
        };
        let mut payload = BytesMut::new();
        entry.encode(&mut payload);
        fixture.peer_write_frame(header, &payload);
        fixture.expect_go_away(0, ErrorCode::ProtocolError);
    }

    #[test]
    fn settings_are_acknowledged() {
        let fixture = Fixture::started();
        let header = FrameHeader::new(FrameType::Settings, 0, 0, SETTINGS_ENTRY_SIZE as u32);
        let entry = SettingsEntry {
            identifier: SettingsIdentifier::EnablePush,
            value: 0,
        };
        let mut payload = BytesMut::new();
        entry.encode(&mut payload);
        fixture.peer_write_frame(header, &payload);
        let reply = FrameHeader::decode(&fixture.peer_read(FRAME_HEADER_SIZE));
        assert_eq!(reply.length, 0);
        assert_eq!(reply.frame_type(), Some(FrameType::Settings));
        assert_eq!(reply.flags, FLAG_ACK);
        assert_eq!(reply.stream_id, 0);
    }

    #[test]
    fn ping_is_echoed_with_ack() {
        let fixture = Fixture::started();
        let header = FrameHeader::new(FrameType::Ping, 0, 0, PING_PAYLOAD_SIZE as u32);
        let payload = 0x7110400071104000u64.to_be_bytes();
        fixture.peer_write_frame(header, &payload);
        let reply = FrameHeader::decode(&fixture.peer_read(FRAME_HEADER_SIZE));
        assert_eq!(reply.length as usize, PING_PAYLOAD_SIZE);
        assert_eq!(reply.frame_type(), Some(FrameType::Ping));
        assert_eq!(reply.flags, FLAG_ACK);
        assert_eq!(reply.stream_id, 0);
        assert_eq!(&fixture.peer_read(PING_PAYLOAD_SIZE)[..], &payload[..]);
    }

    #[test]
    fn ping_with_stream_id_is_a_protocol_error() {
        let fixture = Fixture::started();
        let header = FrameHeader::new(FrameType::Ping, 0, 123, PING_PAYLOAD_SIZE as u32);
        fixture.peer_write_frame(header, &0x7110400071104000u64.to_be_bytes());
        fixture.expect_go_away(0, ErrorCode::ProtocolError);
    }

    #[test]
    fn ping_with_wrong_size_is_a_frame_size_error() {
        let fixture = Fixture::started();
        let header = FrameHeader::new(FrameType::Ping, 0, 0, 2 * PING_PAYLOAD_SIZE as u32);
        let mut payload = Vec::new();
        payload.extend_from_slice(&0x7110400071104000u64.to_be_bytes());
        payload.extend_from_slice(&0x7110400071104000u64.to_be_bytes());
        fixture.peer_write_frame(header, &payload);
        fixture.expect_go_away(0, ErrorCode::FrameSizeError);
    }

    #[test]
    fn unsolicited_ping_ack_is_a_protocol_error() {
        let fixture = Fixture::started();
        let header = FrameHeader::new(FrameType::Ping, FLAG_ACK, 0, PING_PAYLOAD_SIZE as u32);
        fixture.peer_write_frame(header, &0x7110400071104000u64.to_be_bytes());
        fixture.expect_go_away(0, ErrorCode::ProtocolError);
    }

    #[test]
    fn window_update_with_wrong_size_is_a_frame_size_error() {
        let fixture = Fixture::started();
        let header = FrameHeader::new(FrameType::WindowUpdate, 0, 0, 8);
        let mut payload = BytesMut::new();
        WindowUpdatePayload {
            window_size_increment: 123,
        }
        .encode(&mut payload);
        WindowUpdatePayload {
            window_size_increment: 123,
        }
        .encode(&mut payload);
        fixture.peer_write_frame(header, &payload);
        fixture.expect_go_away(0, ErrorCode::FrameSizeError);
    }

    #[test]
    fn window_update_with_zero_increment_is_a_protocol_error() {
        let fixture = Fixture::started();
        let header = FrameHeader::new(FrameType::WindowUpdate, 0, 0, 4);
        let mut payload = BytesMut::new();
        WindowUpdatePayload {
            window_size_increment: 0,
        }
        .encode(&mut payload);
        fixture.peer_write_frame(header, &payload);
        fixture.expect_go_away(0, ErrorCode::ProtocolError);
    }

    #[test]
    fn go_away_is_echoed() {
        let fixture = Fixture::started();
        let header = FrameHeader::new(FrameType::GoAway, 0, 0, GO_AWAY_PAYLOAD_SIZE as u32);
        let mut payload = BytesMut::new();
        GoAwayPayload {
            last_stream_id: 0,
            error_code: ErrorCode::InternalError.code(),
        }
        .encode(&mut payload);
        fixture.peer_write_frame(header, &payload);
        fixture.expect_go_away(0, ErrorCode::InternalError);
    }

    #[test]
    fn second_go_away_closes_the_connection() {
        let fixture = Fixture::started();
        let mut payload = BytesMut::new();
        GoAwayPayload {
            last_stream_id: 0,
            error_code: ErrorCode::NoError.code(),
        }
        .encode(&mut payload);
        let header = FrameHeader::new(FrameType::GoAway, 0, 0, GO_AWAY_PAYLOAD_SIZE as u32);
        fixture.peer_write_frame(header, &payload);
        fixture.expect_go_away(0, ErrorCode::NoError);
        fixture.peer_write_frame(header, &payload);
        let result = read_result(&*fixture.peer, 1)
            .recv_timeout(Duration::from_secs(5))
            .unwrap();
        assert!(result.is_err());
        assert!(!fixture.channel.is_open());
    }

    #[test]
    fn priority_without_stream_id_is_a_protocol_error() {
        let fixture = Fixture::started();
        let header = FrameHeader::new(FrameType::Priority, 0, 0, 5);
        fixture.peer_write_frame(header, &[0, 0, 1, 65, 42]);
        fixture.expect_go_away(0, ErrorCode::ProtocolError);
    }

    #[test]
    fn data_on_idle_stream_is_reset() {
        let fixture = Fixture::started();
        let header = FrameHeader::new(FrameType::Data, 0, 1, 3);
        fixture.peer_write_frame(header, b"abc");
        let reply = FrameHeader::decode(&fixture.peer_read(FRAME_HEADER_SIZE));
        assert_eq!(reply.frame_type(), Some(FrameType::ResetStream));
        assert_eq!(reply.stream_id, 1);
        let payload = fixture.peer_read(4);
        assert_eq!(
            u32::from_be_bytes([payload[0], payload[1], payload[2], payload[3]]),
            ErrorCode::StreamClosed.code()
        );
    }

    #[test]
    fn non_continuation_while_receiving_fields_is_a_protocol_error() {
        let fixture = Fixture::started();
        // HEADERS without END_HEADERS opens a field block on stream 1.
        let headers = FrameHeader::new(FrameType::Headers, 0, 1, 0);
        fixture.peer_write(&headers.encode());
        // Anything but CONTINUATION must now tear the connection down.
        let ping = FrameHeader::new(FrameType::Ping, 0, 0, PING_PAYLOAD_SIZE as u32);
        fixture.peer_write_frame(ping, &0x7110400071104000u64.to_be_bytes());
        fixture.expect_go_away(1, ErrorCode::ProtocolError);
    }

    #[test]
    fn header_block_spanning_continuations_is_reassembled() {
        let fixture = Fixture::started();
        // An empty block still exercises reassembly; the HPACK stub decodes
        // it to zero fields and request validation resets the stream.
        let headers = FrameHeader::new(FrameType::Headers, 0, 1, 0);
        fixture.peer_write(&headers.encode());
        let continuation = FrameHeader::new(FrameType::Continuation, FLAG_END_HEADERS, 1, 0);
        fixture.peer_write(&continuation.encode());
        let reply = FrameHeader::decode(&fixture.peer_read(FRAME_HEADER_SIZE));
        assert_eq!(reply.frame_type(), Some(FrameType::ResetStream));
        assert_eq!(reply.stream_id, 1);
        let payload = fixture.peer_read(4);
        assert_eq!(
            u32::from_be_bytes([payload[0], payload[1], payload[2], payload[3]]),
            ErrorCode::ProtocolError.code()
        );
    }

    #[test]
    fn non_empty_header_block_is_a_compression_error() {
        let fixture = Fixture::started();
        let headers = FrameHeader::new(FrameType::Headers, FLAG_END_HEADERS, 1, 1);
        fixture.peer_write_frame(headers, &[0x82]);
        let reply = FrameHeader::decode(&fixture.peer_read(FRAME_HEADER_SIZE));
        assert_eq!(reply.frame_type(), Some(FrameType::ResetStream));
        assert_eq!(reply.stream_id, 1);
        let payload = fixture.peer_read(4);
        assert_eq!(
            u32::from_be_bytes([payload[0], payload[1], payload[2], payload[3]]),
            ErrorCode::CompressionError.code()
        );
    }
}
