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

//! Low-level asynchronous IPC: TCP/IP and Unix-domain stream sockets, with
//! optional TLS for the former.
//!
//! All sockets are driven by the process-wide [`reactor::Reactor`], which
//! watches every file descriptor in edge-triggered mode and runs socket
//! callbacks on a fixed worker pool (`ReactorOptions::num_workers` threads).
//! Unencrypted TCP/IP is supported but discouraged; prefer
//! [`tls::TlsSocket`].

use std::time::Duration;

pub mod listener;
pub mod reactor;
pub mod socket;
pub mod tls;

/// IPv6 loopback, the address local test servers bind to.
pub const LOCALHOST: &str = "::1";

/// Default `TCP_KEEPIDLE` time.
pub const DEFAULT_KEEP_ALIVE_IDLE: Duration = Duration::from_secs(45);

/// Default `TCP_KEEPINTVL` time.
pub const DEFAULT_KEEP_ALIVE_INTERVAL: Duration = Duration::from_secs(6);

/// Default `TCP_KEEPCNT` value.
pub const DEFAULT_KEEP_ALIVE_COUNT: u32 = 5;

/// Default timeout for TLS handshakes.
pub const DEFAULT_HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(120);

/// Longest permitted Unix-domain socket path (`sizeof(sun_path) - 1`).
pub const MAX_UNIX_SOCKET_PATH: usize = 107;

/// Parameters configuring TCP keep-alives. Set these inside
/// [`SocketOptions`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeepAliveParams {
    /// Sets the `TCP_KEEPIDLE` time.
    pub idle: Duration,
    /// Sets the `TCP_KEEPINTVL` time.
    pub interval: Duration,
    /// Sets the `TCP_KEEPCNT` value.
    pub count: u32,
}

impl Default for KeepAliveParams {
    fn default() -> Self {
        Self {
            idle: DEFAULT_KEEP_ALIVE_IDLE,
            interval: DEFAULT_KEEP_ALIVE_INTERVAL,
            count: DEFAULT_KEEP_ALIVE_COUNT,
        }
    }
}

/// Options applied to TCP/IP sockets when they are created or accepted.
#[derive(Debug, Clone, Default)]
pub struct SocketOptions {
    /// Enables `SO_KEEPALIVE` with the parameters below.
    pub keep_alive: bool,
    /// Behavior of the keep-alive probes, if enabled.
    pub keep_alive_params: KeepAliveParams,
    /// Optionally sets the IP type of service (see RFC 791).
    pub ip_tos: Option<u8>,
}
