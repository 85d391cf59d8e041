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

//! The request-handler surface of the HTTP/2 server.

use std::fmt::{self, Display};
use std::str::FromStr;

use bytes::Bytes;

use crate::http2::hpack::HeaderSet;
use crate::status::{Result, Status};

/// The request method
/// ([IETF RFC 9110 Section 9](https://www.rfc-editor.org/rfc/rfc9110#section-9)).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    /// RFC 9110 9.3.1
    Get,
    /// RFC 9110 9.3.2
    Head,
    /// RFC 9110 9.3.3
    Post,
    /// RFC 9110 9.3.4
    Put,
    /// RFC 9110 9.3.5
    Delete,
    /// RFC 9110 9.3.6
    Connect,
    /// RFC 9110 9.3.7
    Options,
    /// RFC 9110 9.3.8
    Trace,
}

impl Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Method::Get => "GET",
            Method::Head => "HEAD",
            Method::Post => "POST",
            Method::Put => "PUT",
            Method::Delete => "DELETE",
            Method::Connect => "CONNECT",
            Method::Options => "OPTIONS",
            Method::Trace => "TRACE",
        })
    }
}

impl FromStr for Method {
    type Err = Status;

    fn from_str(name: &str) -> Result<Method> {
        Ok(match name {
            "GET" => Method::Get,
            "HEAD" => Method::Head,
            "POST" => Method::Post,
            "PUT" => Method::Put,
            "DELETE" => Method::Delete,
            "CONNECT" => Method::Connect,
            "OPTIONS" => Method::Options,
            "TRACE" => Method::Trace,
            _ => return Err(Status::invalid_argument(format!("unknown method {name:?}"))),
        })
    }
}

/// A decoded request, assembled from the pseudo-headers and regular fields
/// of a stream's header block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
    /// The request method (`:method`).
    pub method: Method,
    /// The request target (`:path`).
    pub path: String,
    /// The authority, if the client sent one (`:authority`).
    pub authority: Option<String>,
    /// All non-pseudo header fields, in order.
    pub headers: HeaderSet,
}

impl Request {
    /// Builds a request from a decoded field block. Fails if `:method` or
    /// `:path` is missing or malformed.
    pub fn from_fields(fields: HeaderSet) -> Result<Request> {
        let mut method = None;
        let mut path = None;
        let mut authority = None;
        let mut headers = HeaderSet::new();
        for (name, value) in fields {
            match name.as_str() {
                ":method" => method = Some(Method::from_str(&value)?),
                ":path" => path = Some(value),
                ":authority" => authority = Some(value),
                _ if name.starts_with(':') => {}
                _ => headers.push((name, value)),
            }
        }
        Ok(Request {
            method: method.ok_or_else(|| Status::invalid_argument("missing :method"))?,
            path: path.ok_or_else(|| Status::invalid_argument("missing :path"))?,
            authority,
            headers,
        })
    }
}

/// The per-stream sending surface handed to request handlers.
pub trait ServerStream {
    /// Sends a field block on the stream, optionally closing it.
    fn send_fields(&mut self, fields: &HeaderSet, end_stream: bool) -> Result<()>;

    /// Sends a chunk of body data on the stream, optionally closing it.
    fn send_data(&mut self, data: Bytes, end_stream: bool) -> Result<()>;

    /// Sends a field block followed by the final body data.
    fn send_response(&mut self, fields: &HeaderSet, data: Bytes) -> Result<()> {
        self.send_fields(fields, false)?;
        self.send_data(data, true)
    }

    /// Like [`send_fields`](ServerStream::send_fields), logging failures
    /// instead of returning them.
    fn send_fields_or_log(&mut self, fields: &HeaderSet, end_stream: bool) {
        if let Err(status) = self.send_fields(fields, end_stream) {
            log::error!("failed to send fields: {status}");
        }
    }

    /// Like [`send_data`](ServerStream::send_data), logging failures
    /// instead of returning them.
    fn send_data_or_log(&mut self, data: Bytes, end_stream: bool) {
        if let Err(status) = self.send_data(data, end_stream) {
            log::error!("failed to send data: {status}");
        }
    }

    /// Like [`send_response`](ServerStream::send_response), logging
    /// failures instead of returning them.
    fn send_response_or_log(&mut self, fields: &HeaderSet, data: Bytes) {
        if let Err(status) = self.send_response(fields, data) {
            log::error!("failed to send response: {status}");
        }
    }
}

/// A registered request handler. Handlers run on reactor workers, so they
/// must not block for long and must be safe to call concurrently.
pub trait Handler: Send + Sync {
    /// Handles one request on `stream`.
    fn handle(&self, stream: &mut dyn ServerStream, request: &Request);
}

impl fmt::Debug for dyn Handler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("dyn Handler")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::status::StatusKind;

    #[test]
    fn method_names() {
        assert_eq!(Method::Get.to_string(), "GET");
        assert_eq!("DELETE".parse::<Method>().unwrap(), Method::Delete);
        assert!("PATCH".parse::<Method>().is_err());
    }

    #[test]
    fn request_from_fields() {
        let request = Request::from_fields(vec![
            (":method".into(), "POST".into()),
            (":scheme".into(), "https".into()),
            (":path".into(), "/write".into()),
            (":authority".into(), "db.example.com".into()),
            ("content-type".into(), "application/x-protobuf".into()),
        ])
        .unwrap();
        assert_eq!(request.method, Method::Post);
        assert_eq!(request.path, "/write");
        assert_eq!(request.authority.as_deref(), Some("db.example.com"));
        assert_eq!(
            request.headers,
            vec![(
                String::from("content-type"),
                String::from("application/x-protobuf")
            )]
        );
    }

    #[test]
    fn request_requires_method_and_path() {
        let status = Request::from_fields(vec![(":path".into(), "/".into())]).unwrap_err();
        assert_eq!(status.kind(), StatusKind::InvalidArgument);
        let status = Request::from_fields(vec![(":method".into(), "GET".into())]).unwrap_err();
        assert_eq!(status.kind(), StatusKind::InvalidArgument);
    }
}
