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

//! Error model shared by every chronod subsystem.
//!
//! A [`Status`] pairs a coarse [`StatusKind`] with a human-readable message.
//! The kinds are the ones callers are expected to branch on; anything a
//! syscall produces that has no better mapping lands in
//! [`StatusKind::Unknown`].

use std::borrow::Cow;
use std::fmt::{self, Display};
use std::io;

/// Convenience alias used throughout the crate.
pub type Result<T, E = Status> = std::result::Result<T, E>;

/// Coarse classification of a [`Status`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StatusKind {
    /// A caller-supplied parameter is unusable (empty callback, zero length,
    /// non-positive timeout, malformed address).
    InvalidArgument,
    /// The operation cannot run in the object's current state (socket closed,
    /// another operation of the same class still in flight).
    FailedPrecondition,
    /// The underlying transport was shut down or the peer hung up.
    Aborted,
    /// The peer closed gracefully (TLS close_notify) or a wait was abandoned.
    Cancelled,
    /// A per-operation timeout fired without progress.
    DeadlineExceeded,
    /// A named entity (handler path, realm) does not exist.
    NotFound,
    /// A named entity is already registered.
    AlreadyExists,
    /// A protocol or internal invariant was violated.
    Internal,
    /// The operation is recognized but not implemented.
    Unimplemented,
    /// Anything else, typically an errno with no better mapping.
    Unknown,
}

impl Display for StatusKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            StatusKind::InvalidArgument => "invalid argument",
            StatusKind::FailedPrecondition => "failed precondition",
            StatusKind::Aborted => "aborted",
            StatusKind::Cancelled => "cancelled",
            StatusKind::DeadlineExceeded => "deadline exceeded",
            StatusKind::NotFound => "not found",
            StatusKind::AlreadyExists => "already exists",
            StatusKind::Internal => "internal",
            StatusKind::Unimplemented => "unimplemented",
            StatusKind::Unknown => "unknown",
        })
    }
}

/// An error produced by the scheduler, the reactor, a socket, or the HTTP/2
/// core.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{kind}: {message}")]
pub struct Status {
    kind: StatusKind,
    message: Cow<'static, str>,
}

macro_rules! constructor {
    ($(#[$doc:meta])* $name:ident, $kind:ident) => {
        $(#[$doc])*
        pub fn $name(message: impl Into<Cow<'static, str>>) -> Self {
            Self {
                kind: StatusKind::$kind,
                message: message.into(),
            }
        }
    };
}

impl Status {
    /// Builds a status with an explicit kind.
    pub fn new(kind: StatusKind, message: impl Into<Cow<'static, str>>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    constructor!(
        /// Builds an [`StatusKind::InvalidArgument`] status.
        invalid_argument,
        InvalidArgument
    );
    constructor!(
        /// Builds a [`StatusKind::FailedPrecondition`] status.
        failed_precondition,
        FailedPrecondition
    );
    constructor!(
        /// Builds an [`StatusKind::Aborted`] status.
        aborted,
        Aborted
    );
    constructor!(
        /// Builds a [`StatusKind::Cancelled`] status.
        cancelled,
        Cancelled
    );
    constructor!(
        /// Builds a [`StatusKind::DeadlineExceeded`] status.
        deadline_exceeded,
        DeadlineExceeded
    );
    constructor!(
        /// Builds a [`StatusKind::NotFound`] status.
        not_found,
        NotFound
    );
    constructor!(
        /// Builds an [`StatusKind::AlreadyExists`] status.
        already_exists,
        AlreadyExists
    );
    constructor!(
        /// Builds an [`StatusKind::Internal`] status.
        internal,
        Internal
    );
    constructor!(
        /// Builds an [`StatusKind::Unimplemented`] status.
        unimplemented,
        Unimplemented
    );
    constructor!(
        /// Builds an [`StatusKind::Unknown`] status.
        unknown,
        Unknown
    );

    /// Maps an I/O error to a status, prefixing the message with the name of
    /// the failing operation.
    pub fn from_io(error: io::Error, context: &str) -> Self {
        let kind = match error.kind() {
            io::ErrorKind::NotFound => StatusKind::NotFound,
            io::ErrorKind::AlreadyExists => StatusKind::AlreadyExists,
            io::ErrorKind::InvalidInput => StatusKind::InvalidArgument,
            io::ErrorKind::TimedOut => StatusKind::DeadlineExceeded,
            io::ErrorKind::BrokenPipe
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::NotConnected => StatusKind::Aborted,
            _ => StatusKind::Unknown,
        };
        Self {
            kind,
            message: Cow::Owned(format!("{context}: {error}")),
        }
    }

    /// Returns the kind of this status.
    pub fn kind(&self) -> StatusKind {
        self.kind
    }

    /// Returns the message carried by this status.
    pub fn message(&self) -> &str {
        &self.message
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_and_message() {
        let status = Status::invalid_argument("zero length");
        assert_eq!(status.kind(), StatusKind::InvalidArgument);
        assert_eq!(status.message(), "zero length");
        assert_eq!(status.to_string(), "invalid argument: zero length");
    }

    #[test]
    fn io_mapping() {
        let status = Status::from_io(io::Error::from(io::ErrorKind::BrokenPipe), "send");
        assert_eq!(status.kind(), StatusKind::Aborted);
        assert!(status.message().starts_with("send: "));

        let status = Status::from_io(io::Error::from(io::ErrorKind::TimedOut), "recv");
        assert_eq!(status.kind(), StatusKind::DeadlineExceeded);
    }
}
