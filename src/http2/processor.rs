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

//! Per-connection frame processing: header validation, the stream state
//! machine, header-block reassembly, and construction of outbound frames.

use std::collections::BTreeMap;
use std::fmt;
use std::mem;
use std::sync::{Mutex, MutexGuard, Weak};
use std::time::Duration;

use bytes::{BufMut, Bytes, BytesMut};

use crate::http2::frame::{
    ErrorCode, FrameHeader, FrameType, GoAwayPayload, ResetStreamPayload, SettingsEntry,
    SettingsIdentifier, WindowUpdatePayload, DEFAULT_INITIAL_WINDOW_SIZE,
    DEFAULT_MAX_FRAME_PAYLOAD_SIZE, DEFAULT_MAX_HEADER_LIST_SIZE, FLAG_ACK, FLAG_END_HEADERS,
    FLAG_END_STREAM, FLAG_PADDED, FLAG_PRIORITY, FRAME_HEADER_SIZE, GO_AWAY_PAYLOAD_SIZE,
    PING_PAYLOAD_SIZE, PRIORITY_PAYLOAD_SIZE, RESET_STREAM_PAYLOAD_SIZE, SETTINGS_ENTRY_SIZE,
    WINDOW_UPDATE_PAYLOAD_SIZE,
};
use crate::http2::handler::Request;
use crate::http2::hpack;
use crate::http2::write_queue::WriteQueue;
use crate::net::socket::AsyncStream;
use crate::refcount::RefPtr;
use crate::status::Result;
use crate::sync::lock;

// The channel surface the processor drives: continuing the frame read loop
// and tearing the connection down.
pub(crate) trait ChannelCore: Send + Sync {
    fn read_next_frame(&self);
    fn read_continuation_frame(&self, stream_id: u32);
    fn close_connection(&self);
    fn dispatch_request(&self, stream_id: u32, request: Request);
}

/// Server-side HTTP/2 stream states (RFC 7540 §5.1).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StreamState {
    Idle,
    Open,
    HalfClosedLocal,
    HalfClosedRemote,
    ReservedLocal,
    ReservedRemote,
    Closed,
}

// Per-stream state.
struct Stream {
    state: StreamState,
    // Flow-control window (receive direction).
    window_size: u32,
    // True while we expect CONTINUATION frames for this stream.
    receiving_fields: bool,
    // Concatenation of the field fragments received so far.
    field_block: Vec<u8>,
    // If true the stream closes from the remote side once the current
    // field set completes.
    last_field_block: bool,
}

impl Stream {
    fn new(window_size: u32) -> Stream {
        Stream {
            state: StreamState::Idle,
            window_size,
            receiving_fields: false,
            field_block: Vec::new(),
            last_field_block: false,
        }
    }
}

struct ProcessorState {
    enable_push: bool,
    max_concurrent_streams: Option<u32>,
    initial_stream_window_size: u32,
    max_frame_payload_size: u32,
    max_header_list_size: u32,
    decoder: hpack::Decoder,
    streams: BTreeMap<u32, Stream>,
    last_processed_stream_id: u32,
    going_away: bool,
}

/// Frame-level brain of a [`Channel`](crate::http2::channel::Channel):
/// validates inbound frame headers, applies stream state transitions,
/// reassembles header blocks, and queues outbound frames.
pub struct Processor {
    parent: Weak<dyn ChannelCore>,
    write_queue: WriteQueue,
    state: Mutex<ProcessorState>,
}

impl Processor {
    pub(crate) fn new(
        parent: Weak<dyn ChannelCore>,
        socket: RefPtr<dyn AsyncStream>,
        io_timeout: Duration,
    ) -> Processor {
        Processor {
            parent,
            write_queue: WriteQueue::new(socket, io_timeout),
            state: Mutex::new(ProcessorState {
                enable_push: true,
                max_concurrent_streams: None,
                initial_stream_window_size: DEFAULT_INITIAL_WINDOW_SIZE,
                max_frame_payload_size: DEFAULT_MAX_FRAME_PAYLOAD_SIZE,
                max_header_list_size: DEFAULT_MAX_HEADER_LIST_SIZE,
                decoder: hpack::Decoder::new(),
                streams: BTreeMap::new(),
                last_processed_stream_id: 0,
                going_away: false,
            }),
        }
    }

    fn parent(&self) -> Option<std::sync::Arc<dyn ChannelCore>> {
        self.parent.upgrade()
    }

    fn read_next(&self) {
        if let Some(parent) = self.parent() {
            parent.read_next_frame();
        }
    }

    /// Queues this endpoint's initial SETTINGS frame.
    pub(crate) fn send_settings(&self) {
        let state = lock(&self.state);
        self.write_queue.append_frame(Self::make_settings_frame(&state));
    }

    /// Emits a GOAWAY with the current last processed stream id and marks
    /// the connection as going away.
    pub(crate) fn go_away(&self, error: ErrorCode) {
        let mut state = lock(&self.state);
        self.go_away_locked(&mut state, error);
    }

    fn go_away_locked(&self, state: &mut ProcessorState, error: ErrorCode) {
        state.going_away = true;
        // GOAWAY skips the queue so outbound users still see it promptly.
        self.write_queue
            .append_frame_skipping_queue(Self::make_go_away_frame(state, error));
    }

    // Takes the state borrow so resets always happen under the lock, like
    // every other stream transition.
    fn reset_stream_locked(&self, _state: &mut ProcessorState, stream_id: u32, error: ErrorCode) {
        self.write_queue
            .append_frame(Self::make_reset_stream_frame(stream_id, error));
    }

    fn ack_settings(&self) {
        self.write_queue.append_frame(Self::make_settings_ack_frame());
    }

    // Looks up or creates the stream, updating `last_processed_stream_id`
    // on creation.
    fn stream_mut(state: &mut ProcessorState, stream_id: u32) -> &mut Stream {
        if !state.streams.contains_key(&stream_id) {
            let window_size = state.initial_stream_window_size;
            state.streams.insert(stream_id, Stream::new(window_size));
            state.last_processed_stream_id = stream_id;
        }
        state
            .streams
            .get_mut(&stream_id)
            .expect("stream vanished under lock")
    }

    /// Validates a frame header before its payload has been read. On
    /// failure a GOAWAY with the returned code has already been queued; the
    /// caller decides whether to skip or still process the payload.
    pub(crate) fn validate_frame_header(&self, header: &FrameHeader) -> ErrorCode {
        let mut state = lock(&self.state);
        let error = Self::validate_frame_header_locked(&state, header);
        if error != ErrorCode::NoError {
            self.go_away_locked(&mut state, error);
        }
        error
    }

    /// Validates the header of a frame that arrived while `stream_id` was
    /// receiving fields. Only CONTINUATION for that same stream is valid.
    pub(crate) fn validate_continuation_header(
        &self,
        stream_id: u32,
        header: &FrameHeader,
    ) -> ErrorCode {
        let mut state = lock(&self.state);
        let error = Self::validate_continuation_header_locked(&state, stream_id, header);
        if error != ErrorCode::NoError {
            self.go_away_locked(&mut state, error);
        }
        error
    }

    fn validate_frame_header_locked(state: &ProcessorState, header: &FrameHeader) -> ErrorCode {
        if header.length > state.max_frame_payload_size {
            return ErrorCode::FrameSizeError;
        }
        match header.frame_type() {
            Some(FrameType::Data) => Self::validate_data_header(header),
            Some(FrameType::Headers) => Self::validate_headers_header(header),
            Some(FrameType::Priority) => Self::validate_priority_header(header),
            Some(FrameType::ResetStream) => Self::validate_reset_stream_header(header),
            Some(FrameType::Settings) => Self::validate_settings_header(header),
            Some(FrameType::PushPromise) => Self::validate_push_promise_header(header),
            Some(FrameType::Ping) => Self::validate_ping_header(header),
            Some(FrameType::GoAway) => Self::validate_go_away_header(header),
            Some(FrameType::WindowUpdate) => Self::validate_window_update_header(header),
            // Orderly CONTINUATION frames are consumed by the header
            // reassembly path; one here is out of sequence.
            Some(FrameType::Continuation) => ErrorCode::ProtocolError,
            None => ErrorCode::ProtocolError,
        }
    }

    fn validate_continuation_header_locked(
        state: &ProcessorState,
        stream_id: u32,
        header: &FrameHeader,
    ) -> ErrorCode {
        if header.stream_id != stream_id {
            return ErrorCode::ProtocolError;
        }
        match state.streams.get(&stream_id) {
            Some(stream) if stream.receiving_fields => ErrorCode::NoError,
            _ => ErrorCode::InternalError,
        }
    }

    fn validate_data_header(header: &FrameHeader) -> ErrorCode {
        if header.stream_id == 0 {
            return ErrorCode::ProtocolError;
        }
        if header.has_flag(FLAG_PADDED) && header.length < 1 {
            return ErrorCode::FrameSizeError;
        }
        ErrorCode::NoError
    }

    fn validate_headers_header(header: &FrameHeader) -> ErrorCode {
        if header.stream_id == 0 {
            return ErrorCode::ProtocolError;
        }
        let mut min_size = 0;
        if header.has_flag(FLAG_PRIORITY) {
            min_size += PRIORITY_PAYLOAD_SIZE as u32;
        }
        if header.has_flag(FLAG_PADDED) {
            min_size += 1;
        }
        if header.length < min_size {
            return ErrorCode::FrameSizeError;
        }
        ErrorCode::NoError
    }

    fn validate_priority_header(header: &FrameHeader) -> ErrorCode {
        if header.stream_id == 0 {
            return ErrorCode::ProtocolError;
        }
        if header.length != PRIORITY_PAYLOAD_SIZE as u32 {
            return ErrorCode::FrameSizeError;
        }
        ErrorCode::NoError
    }

    fn validate_reset_stream_header(header: &FrameHeader) -> ErrorCode {
        if header.stream_id == 0 {
            return ErrorCode::ProtocolError;
        }
        if header.length != RESET_STREAM_PAYLOAD_SIZE as u32 {
            return ErrorCode::FrameSizeError;
        }
        ErrorCode::NoError
    }

    fn validate_settings_header(header: &FrameHeader) -> ErrorCode {
        if header.stream_id != 0 {
            return ErrorCode::ProtocolError;
        }
        if header.has_flag(FLAG_ACK) {
            if header.length != 0 {
                return ErrorCode::FrameSizeError;
            }
        } else if header.length == 0 || header.length % SETTINGS_ENTRY_SIZE as u32 != 0 {
            return ErrorCode::FrameSizeError;
        }
        ErrorCode::NoError
    }

    fn validate_push_promise_header(_header: &FrameHeader) -> ErrorCode {
        // TODO: check the promised-stream-id and padding constraints of
        // RFC 7540 §6.6.
        ErrorCode::NoError
    }

    fn validate_ping_header(header: &FrameHeader) -> ErrorCode {
        if header.stream_id != 0 {
            return ErrorCode::ProtocolError;
        }
        if header.length != PING_PAYLOAD_SIZE as u32 {
            return ErrorCode::FrameSizeError;
        }
        if header.has_flag(FLAG_ACK) {
            // We never originate pings, so an ACK is unexpected.
            return ErrorCode::ProtocolError;
        }
        ErrorCode::NoError
    }

    fn validate_go_away_header(header: &FrameHeader) -> ErrorCode {
        if header.stream_id != 0 {
            return ErrorCode::ProtocolError;
        }
        if header.length < GO_AWAY_PAYLOAD_SIZE as u32 {
            return ErrorCode::FrameSizeError;
        }
        ErrorCode::NoError
    }

    fn validate_window_update_header(header: &FrameHeader) -> ErrorCode {
        if header.length != WINDOW_UPDATE_PAYLOAD_SIZE as u32 {
            return ErrorCode::FrameSizeError;
        }
        ErrorCode::NoError
    }

    /// Processes a validated frame whose payload has been fully read, then
    /// continues the connection's read loop.
    pub(crate) fn process_frame(&self, header: &FrameHeader, payload: Bytes) {
        match header.frame_type() {
            Some(FrameType::Data) => self.process_data_frame(header, &payload),
            // NOTE: the HEADERS path continues the read loop itself (it has
            // to choose between the next frame and a CONTINUATION), so it
            // returns early and skips the final read_next below.
            Some(FrameType::Headers) => return self.process_headers_frame(header, &payload),
            Some(FrameType::Priority) => {
                // PRIORITY is deprecated, nothing to do here.
            }
            Some(FrameType::ResetStream) => self.process_reset_stream_frame(header),
            Some(FrameType::Settings) => self.process_settings_frame(header, &payload),
            Some(FrameType::PushPromise) => self.process_push_promise_frame(header),
            Some(FrameType::Ping) => self.process_ping_frame(header, &payload),
            Some(FrameType::GoAway) => self.process_go_away_frame(header, &payload),
            Some(FrameType::WindowUpdate) => self.process_window_update_frame(header, &payload),
            Some(FrameType::Continuation) => {
                // Orderly CONTINUATION frames are consumed by the header
                // reassembly path, so this one is out of sequence.
                self.go_away(ErrorCode::ProtocolError);
            }
            None => self.go_away(ErrorCode::InternalError),
        }
        self.read_next();
    }

    /// Processes a CONTINUATION frame for the stream currently receiving
    /// fields, then continues the read loop.
    pub(crate) fn process_continuation_frame(
        &self,
        stream_id: u32,
        header: &FrameHeader,
        payload: Bytes,
    ) {
        let mut state = lock(&self.state);
        let stream = Self::stream_mut(&mut state, stream_id);
        if (stream.state != StreamState::Idle && stream.state != StreamState::ReservedRemote)
            || !stream.receiving_fields
        {
            let error = match stream.state {
                StreamState::HalfClosedRemote | StreamState::Closed => ErrorCode::StreamClosed,
                _ => ErrorCode::ProtocolError,
            };
            stream.state = StreamState::Closed;
            self.reset_stream_locked(&mut state, stream_id, error);
            drop(state);
            return self.read_next();
        }
        stream.field_block.extend_from_slice(&payload);
        if header.has_flag(FLAG_END_HEADERS) {
            let block = mem::take(&mut stream.field_block);
            self.finish_field_block(state, stream_id, &block);
        } else {
            drop(state);
            if let Some(parent) = self.parent() {
                parent.read_continuation_frame(stream_id);
            }
        }
    }

    fn process_data_frame(&self, header: &FrameHeader, payload: &Bytes) {
        let mut offset = 0usize;
        let mut pad = 0usize;
        if header.has_flag(FLAG_PADDED) {
            if payload.is_empty() {
                return self.go_away(ErrorCode::FrameSizeError);
            }
            offset = 1;
            pad = payload[0] as usize;
        }
        if offset + pad > payload.len() {
            return self.go_away(ErrorCode::FrameSizeError);
        }
        let stream_id = header.stream_id;
        let mut state = lock(&self.state);
        let reset = {
            let stream = Self::stream_mut(&mut state, stream_id);
            if stream.state != StreamState::Open && stream.state != StreamState::HalfClosedLocal {
                stream.state = StreamState::Closed;
                Some(ErrorCode::StreamClosed)
            } else if header.has_flag(FLAG_END_STREAM) {
                match stream.state {
                    StreamState::Open => {
                        stream.state = StreamState::HalfClosedRemote;
                        None
                    }
                    StreamState::HalfClosedLocal => {
                        stream.state = StreamState::Closed;
                        None
                    }
                    _ => {
                        stream.state = StreamState::Closed;
                        Some(ErrorCode::StreamClosed)
                    }
                }
            } else {
                None
            }
        };
        if let Some(error) = reset {
            return self.reset_stream_locked(&mut state, stream_id, error);
        }
        drop(state);
        self.on_data(stream_id, &payload[offset..payload.len() - pad]);
    }

    fn process_headers_frame(&self, header: &FrameHeader, payload: &Bytes) {
        let mut offset = 0usize;
        let mut pad = 0usize;
        if header.has_flag(FLAG_PADDED) {
            if payload.is_empty() {
                self.go_away(ErrorCode::FrameSizeError);
                return self.read_next();
            }
            offset = 1;
            pad = payload[0] as usize;
        }
        if header.has_flag(FLAG_PRIORITY) {
            offset += PRIORITY_PAYLOAD_SIZE;
        }
        if offset + pad > payload.len() {
            self.go_away(ErrorCode::FrameSizeError);
            return self.read_next();
        }
        let fragment = &payload[offset..payload.len() - pad];
        let stream_id = header.stream_id;
        let mut state = lock(&self.state);
        {
            let stream = Self::stream_mut(&mut state, stream_id);
            if (stream.state != StreamState::Idle && stream.state != StreamState::ReservedRemote)
                || stream.receiving_fields
            {
                // Pick the reset reason from the state the stream was in,
                // then close it.
                let error = match stream.state {
                    StreamState::HalfClosedRemote | StreamState::Closed => ErrorCode::StreamClosed,
                    _ => ErrorCode::ProtocolError,
                };
                stream.state = StreamState::Closed;
                self.reset_stream_locked(&mut state, stream_id, error);
                drop(state);
                return self.read_next();
            }
            stream.receiving_fields = true;
            stream.last_field_block = header.has_flag(FLAG_END_STREAM);
        }
        if header.has_flag(FLAG_END_HEADERS) {
            self.finish_field_block(state, stream_id, fragment);
        } else {
            let stream = Self::stream_mut(&mut state, stream_id);
            stream.field_block.clear();
            stream.field_block.extend_from_slice(fragment);
            drop(state);
            if let Some(parent) = self.parent() {
                parent.read_continuation_frame(stream_id);
            }
        }
    }

    // Completes a header block: applies the stream state transitions,
    // decodes the block, and hands the fields to the request dispatcher.
    // Continues the read loop.
    fn finish_field_block(
        &self,
        mut state: MutexGuard<'_, ProcessorState>,
        stream_id: u32,
        block: &[u8],
    ) {
        let decoded = {
            let ProcessorState {
                streams, decoder, ..
            } = &mut *state;
            let Some(stream) = streams.get_mut(&stream_id) else {
                drop(state);
                return self.read_next();
            };
            match stream.state {
                StreamState::Idle => stream.state = StreamState::Open,
                StreamState::ReservedRemote => stream.state = StreamState::HalfClosedLocal,
                _ => {}
            }
            stream.receiving_fields = false;
            let decoded = decoder.decode(block);
            match &decoded {
                Ok(_) => {
                    if stream.last_field_block {
                        // The field set carried END_STREAM; the remote side
                        // is done.
                        stream.state = match stream.state {
                            StreamState::Open => StreamState::HalfClosedRemote,
                            StreamState::HalfClosedLocal => StreamState::Closed,
                            other => other,
                        };
                    }
                }
                Err(_) => stream.state = StreamState::Closed,
            }
            decoded
        };
        match decoded {
            Ok(fields) => {
                drop(state);
                self.on_fields(stream_id, fields);
            }
            Err(_) => {
                self.reset_stream_locked(&mut state, stream_id, ErrorCode::CompressionError);
                drop(state);
            }
        }
        self.read_next();
    }

    fn process_reset_stream_frame(&self, header: &FrameHeader) {
        let mut state = lock(&self.state);
        let stream = Self::stream_mut(&mut state, header.stream_id);
        stream.state = StreamState::Closed;
    }

    fn process_settings_frame(&self, header: &FrameHeader, _payload: &Bytes) {
        if !header.has_flag(FLAG_ACK) {
            // TODO: apply the peer's settings (initial window size, max
            // frame size) before acknowledging them.
            self.ack_settings();
        }
    }

    fn process_push_promise_frame(&self, header: &FrameHeader) {
        let stream_id = header.stream_id;
        let mut state = lock(&self.state);
        let stream = Self::stream_mut(&mut state, stream_id);
        if stream.state != StreamState::Idle {
            return self.reset_stream_locked(&mut state, stream_id, ErrorCode::ProtocolError);
        }
        stream.state = StreamState::ReservedRemote;
    }

    fn process_ping_frame(&self, header: &FrameHeader, payload: &Bytes) {
        if header.has_flag(FLAG_ACK) {
            self.go_away(ErrorCode::ProtocolError);
        } else {
            self.write_queue
                .append_frame_skipping_queue(Self::make_ping_frame(true, payload));
        }
    }

    fn process_go_away_frame(&self, _header: &FrameHeader, payload: &Bytes) {
        let mut state = lock(&self.state);
        if state.going_away {
            drop(state);
            if let Some(parent) = self.parent() {
                parent.close_connection();
            }
            return;
        }
        match GoAwayPayload::decode(payload) {
            Some(payload) => {
                let error =
                    ErrorCode::from_u32(payload.error_code).unwrap_or(ErrorCode::ProtocolError);
                self.go_away_locked(&mut state, error);
            }
            None => {
                drop(state);
                if let Some(parent) = self.parent() {
                    parent.close_connection();
                }
            }
        }
    }

    fn process_window_update_frame(&self, _header: &FrameHeader, payload: &Bytes) {
        let Some(payload) = WindowUpdatePayload::decode(payload) else {
            return self.go_away(ErrorCode::FrameSizeError);
        };
        let mut state = lock(&self.state);
        if payload.window_size_increment == 0 {
            return self.go_away_locked(&mut state, ErrorCode::ProtocolError);
        }
        // TODO: apply the increment to the stream window (or the connection
        // window for stream 0) and unblock pending writes.
    }

    fn on_data(&self, _stream_id: u32, _data: &[u8]) {
        // TODO: buffer the payload for delivery through the stream's read
        // interface once request bodies are wired up.
    }

    fn on_fields(&self, stream_id: u32, fields: hpack::HeaderSet) {
        match Request::from_fields(fields) {
            Ok(request) => {
                if let Some(parent) = self.parent() {
                    parent.dispatch_request(stream_id, request);
                }
            }
            Err(status) => {
                log::error!("malformed request on stream {stream_id}: {status}");
                let mut state = lock(&self.state);
                self.reset_stream_locked(&mut state, stream_id, ErrorCode::ProtocolError);
            }
        }
    }

    /// Encodes and queues a field block on `stream_id`.
    ///
    /// Currently always fails with `Unimplemented`: HPACK encoding is a
    /// stub.
    pub(crate) fn send_fields(
        &self,
        stream_id: u32,
        fields: &hpack::HeaderSet,
        end_stream: bool,
    ) -> Result<()> {
        let block = hpack::encode(fields)?;
        let mut flags = FLAG_END_HEADERS;
        if end_stream {
            flags |= FLAG_END_STREAM;
        }
        let header = FrameHeader::new(FrameType::Headers, flags, stream_id, block.len() as u32);
        let mut buffer = BytesMut::with_capacity(FRAME_HEADER_SIZE + block.len());
        buffer.put_slice(&header.encode());
        buffer.put_slice(&block);
        self.write_queue.append_frame(buffer.freeze());
        Ok(())
    }

    /// Queues DATA frames carrying `data` on `stream_id`, chunked to the
    /// connection's maximum frame payload size.
    pub(crate) fn send_data(&self, stream_id: u32, data: Bytes, end_stream: bool) -> Result<()> {
        let max_payload = lock(&self.state).max_frame_payload_size as usize;
        let mut frames = Vec::new();
        let mut remaining = data;
        loop {
            let take = remaining.len().min(max_payload);
            let chunk = remaining.split_to(take);
            let last = remaining.is_empty();
            let flags = if last && end_stream { FLAG_END_STREAM } else { 0 };
            let header = FrameHeader::new(FrameType::Data, flags, stream_id, chunk.len() as u32);
            let mut buffer = BytesMut::with_capacity(FRAME_HEADER_SIZE + chunk.len());
            buffer.put_slice(&header.encode());
            buffer.put_slice(&chunk);
            frames.push(buffer.freeze());
            if last {
                break;
            }
        }
        self.write_queue.append_frames(frames);
        Ok(())
    }

    fn make_settings_frame(state: &ProcessorState) -> Bytes {
        let mut entries = vec![
            SettingsEntry {
                identifier: SettingsIdentifier::HeaderTableSize,
                value: state.decoder.max_dynamic_table_size(),
            },
            SettingsEntry {
                identifier: SettingsIdentifier::EnablePush,
                value: state.enable_push as u32,
            },
            SettingsEntry {
                identifier: SettingsIdentifier::InitialWindowSize,
                value: state.initial_stream_window_size,
            },
            SettingsEntry {
                identifier: SettingsIdentifier::MaxFrameSize,
                value: state.max_frame_payload_size,
            },
            SettingsEntry {
                identifier: SettingsIdentifier::MaxHeaderListSize,
                value: state.max_header_list_size,
            },
        ];
        if let Some(max_concurrent_streams) = state.max_concurrent_streams {
            entries.push(SettingsEntry {
                identifier: SettingsIdentifier::MaxConcurrentStreams,
                value: max_concurrent_streams,
            });
        }
        let header = FrameHeader::new(
            FrameType::Settings,
            0,
            0,
            (entries.len() * SETTINGS_ENTRY_SIZE) as u32,
        );
        let mut buffer =
            BytesMut::with_capacity(FRAME_HEADER_SIZE + entries.len() * SETTINGS_ENTRY_SIZE);
        buffer.put_slice(&header.encode());
        for entry in &entries {
            entry.encode(&mut buffer);
        }
        buffer.freeze()
    }

    fn make_settings_ack_frame() -> Bytes {
        let header = FrameHeader::new(FrameType::Settings, FLAG_ACK, 0, 0);
        Bytes::copy_from_slice(&header.encode())
    }

    fn make_ping_frame(ack: bool, payload: &Bytes) -> Bytes {
        let header = FrameHeader::new(
            FrameType::Ping,
            if ack { FLAG_ACK } else { 0 },
            0,
            PING_PAYLOAD_SIZE as u32,
        );
        let mut buffer = BytesMut::with_capacity(FRAME_HEADER_SIZE + PING_PAYLOAD_SIZE);
        buffer.put_slice(&header.encode());
        buffer.put_slice(&payload[..PING_PAYLOAD_SIZE]);
        buffer.freeze()
    }

    fn make_go_away_frame(state: &ProcessorState, error: ErrorCode) -> Bytes {
        let header = FrameHeader::new(FrameType::GoAway, 0, 0, GO_AWAY_PAYLOAD_SIZE as u32);
        let payload = GoAwayPayload {
            last_stream_id: state.last_processed_stream_id,
            error_code: error.code(),
        };
        let mut buffer = BytesMut::with_capacity(FRAME_HEADER_SIZE + GO_AWAY_PAYLOAD_SIZE);
        buffer.put_slice(&header.encode());
        payload.encode(&mut buffer);
        buffer.freeze()
    }

    fn make_reset_stream_frame(stream_id: u32, error: ErrorCode) -> Bytes {
        let header = FrameHeader::new(
            FrameType::ResetStream,
            0,
            stream_id,
            RESET_STREAM_PAYLOAD_SIZE as u32,
        );
        let payload = ResetStreamPayload {
            error_code: error.code(),
        };
        let mut buffer = BytesMut::with_capacity(FRAME_HEADER_SIZE + RESET_STREAM_PAYLOAD_SIZE);
        buffer.put_slice(&header.encode());
        payload.encode(&mut buffer);
        buffer.freeze()
    }
}

impl fmt::Debug for Processor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = lock(&self.state);
        f.debug_struct("Processor")
            .field("streams", &state.streams.len())
            .field("last_processed_stream_id", &state.last_processed_stream_id)
            .field("going_away", &state.going_away)
            .finish()
    }
}
