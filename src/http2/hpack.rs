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

//! HPACK header compression (RFC 7541), decode side.
//!
//! Only the scaffolding is in place: the static table and the decoder
//! state. Decoding any non-empty field block currently fails, and encoding
//! is not provided beyond a stub. Handlers that try to send fields observe
//! an `Unimplemented` status until the encoder lands.

use bytes::Bytes;

use crate::status::{Result, Status};

/// A decoded (or to-be-encoded) ordered list of header fields.
pub type HeaderSet = Vec<(String, String)>;

/// Number of entries in the HPACK static table.
pub const NUM_STATIC_HEADERS: usize = 61;

/// The HPACK static table (RFC 7541 appendix A).
pub const STATIC_HEADERS: [(&str, &str); NUM_STATIC_HEADERS] = [
    (":authority", ""),
    (":method", "GET"),
    (":method", "POST"),
    (":path", "/"),
    (":path", "/index.html"),
    (":scheme", "http"),
    (":scheme", "https"),
    (":status", "200"),
    (":status", "204"),
    (":status", "206"),
    (":status", "304"),
    (":status", "400"),
    (":status", "404"),
    (":status", "500"),
    ("accept-charset", ""),
    ("accept-encoding", "gzip,deflate"),
    ("accept-language", ""),
    ("accept-ranges", ""),
    ("accept", ""),
    ("access-control-allow-origin", ""),
    ("age", ""),
    ("allow", ""),
    ("authorization", ""),
    ("cache-control", ""),
    ("content-disposition", ""),
    ("content-encoding", ""),
    ("content-language", ""),
    ("content-length", ""),
    ("content-location", ""),
    ("content-range", ""),
    ("content-type", ""),
    ("cookie", ""),
    ("date", ""),
    ("etag", ""),
    ("expect", ""),
    ("expires", ""),
    ("from", ""),
    ("host", ""),
    ("if-match", ""),
    ("if-modified-since", ""),
    ("if-none-match", ""),
    ("if-range", ""),
    ("if-unmodified-since", ""),
    ("last-modified", ""),
    ("link", ""),
    ("location", ""),
    ("max-forwards", ""),
    ("proxy-authenticate", ""),
    ("proxy-authorization", ""),
    ("range", ""),
    ("referer", ""),
    ("refresh", ""),
    ("retry-after", ""),
    ("server", ""),
    ("set-cookie", ""),
    ("strict-transport-security", ""),
    ("transfer-encoding", ""),
    ("user-agent", ""),
    ("vary", ""),
    ("via", ""),
    ("www-authenticate", ""),
];

/// Stateful HPACK decoder, one per connection.
#[derive(Debug, Default)]
pub struct Decoder {
    dynamic_headers: HeaderSet,
    max_dynamic_table_size: Option<u32>,
}

impl Decoder {
    /// Creates a decoder with the default dynamic table size.
    pub fn new() -> Decoder {
        Decoder::default()
    }

    /// Returns the maximum dynamic table size this decoder announces in the
    /// connection's SETTINGS.
    pub fn max_dynamic_table_size(&self) -> u32 {
        self.max_dynamic_table_size
            .unwrap_or(crate::http2::frame::DEFAULT_MAX_DYNAMIC_HEADER_TABLE_SIZE)
    }

    /// Decodes a complete field block.
    pub fn decode(&mut self, data: &[u8]) -> Result<HeaderSet> {
        // TODO: implement indexed and literal field representations and the
        // dynamic table (self.dynamic_headers), per RFC 7541 §6.
        if !data.is_empty() {
            return Err(Status::invalid_argument("invalid HPACK encoding"));
        }
        Ok(HeaderSet::new())
    }
}

/// Encodes a field block.
///
/// Encoding is a stub: callers receive `Unimplemented` and are expected to
/// log and drop the response.
pub fn encode(_fields: &HeaderSet) -> Result<Bytes> {
    Err(Status::unimplemented("HPACK encoding is not implemented"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::status::StatusKind;

    #[test]
    fn static_table_shape() {
        assert_eq!(STATIC_HEADERS.len(), NUM_STATIC_HEADERS);
        assert_eq!(STATIC_HEADERS[0].0, ":authority");
        assert_eq!(STATIC_HEADERS[1], (":method", "GET"));
        assert_eq!(STATIC_HEADERS[60].0, "www-authenticate");
    }

    #[test]
    fn empty_block_decodes_to_no_fields() {
        let mut decoder = Decoder::new();
        assert_eq!(decoder.decode(&[]).unwrap(), HeaderSet::new());
    }

    #[test]
    fn any_payload_is_rejected() {
        let mut decoder = Decoder::new();
        let status = decoder.decode(&[0x82]).unwrap_err();
        assert_eq!(status.kind(), StatusKind::InvalidArgument);
        assert_eq!(status.message(), "invalid HPACK encoding");
    }

    #[test]
    fn encode_is_stubbed() {
        let status = encode(&vec![(String::from(":status"), String::from("200"))]).unwrap_err();
        assert_eq!(status.kind(), StatusKind::Unimplemented);
    }
}
