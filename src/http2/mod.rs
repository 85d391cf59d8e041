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

//! The HTTP/2 connection core: frame codec, per-connection processor with
//! stream state machine and flow-control bookkeeping, HPACK header
//! reassembly, and the outbound frame write queue.
//!
//! Wire format per RFC 7540; header compression per RFC 7541 (decode side
//! only, and currently stubbed).

use std::time::Duration;

pub mod channel;
pub mod frame;
pub mod handler;
pub mod hpack;
pub mod processor;
pub mod write_queue;

/// Default timeout for HTTP/2 I/O operations. The timeout is reset every
/// time some data is transferred, so it should be okay to set a low value
/// even when transferring large amounts of data; its purpose is to prevent
/// a peer from parking us in a pending I/O state indefinitely.
pub const DEFAULT_IO_TIMEOUT: Duration = Duration::from_secs(60);

/// Per-connection tunables.
#[derive(Debug, Clone, Copy)]
pub struct ChannelOptions {
    /// Timeout applied to every payload read and every queued write on the
    /// connection.
    pub io_timeout: Duration,
}

impl Default for ChannelOptions {
    fn default() -> Self {
        Self {
            io_timeout: DEFAULT_IO_TIMEOUT,
        }
    }
}
