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

//! TLS streaming sockets.
//!
//! [`TlsSocket`] offers the same [`AsyncStream`] capability set as the
//! plaintext [`Socket`](crate::net::socket::Socket), with a rustls session
//! in between. The handshake is driven by `wants_read`/`wants_write`: a
//! record layer that wants more input re-arms read readiness, one with
//! pending output re-arms write readiness. Sockets accepted by a TLS
//! listener are parked in a process-wide handshaking set and delivered to
//! the accept callback only once the handshake completes; the handshake has
//! its own timeout.
//!
//! Closing performs a *fast* shutdown: close_notify is sent but the peer's
//! close_notify is not awaited. This avoids hanging on misbehaving peers at
//! the cost of not distinguishing truncation from closure on the way out.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::io::{Read, Write};
use std::mem;
use std::net::ToSocketAddrs;
use std::sync::{Arc, Mutex, MutexGuard, OnceLock};
use std::time::Duration;

use bytes::Bytes;
use mio::{Interest, Registry, Token};
use rustls::pki_types::ServerName;

use crate::net::reactor::{EventTarget, Reactor};
use crate::net::socket::{
    configure_inet_socket, AsyncStream, ConnectCallback, ReadCallback, ReadState, SkipCallback,
    StreamSource, WriteCallback, WriteState, READ_TIMEOUT_MESSAGE, WRITE_TIMEOUT_MESSAGE,
};
use crate::net::SocketOptions;
use crate::refcount::{RefCount, RefCounted, RefPtr, Reclaimed};
use crate::scheduler::{self, default_scheduler, INVALID_HANDLE};
use crate::status::{Result, Status};
use crate::sync::lock;

const HANDSHAKE_TIMEOUT_MESSAGE: &str = "TLS handshake timeout";

// Internal handshake-completion callback; receives the socket so listener
// plumbing can extract it from the handshaking set.
pub(crate) type HandshakeCallback<S> = Box<dyn FnOnce(&TlsSocket<S>, Result<()>) + Send>;

struct HandshakeState<S: StreamSource> {
    callback: HandshakeCallback<S>,
    timeout_handle: scheduler::Handle,
}

struct TlsInner<S: StreamSource> {
    stream: Option<S>,
    conn: rustls::Connection,
    handshake: Option<HandshakeState<S>>,
    read: Option<ReadState>,
    write: Option<WriteState>,
    timeouts: HashSet<scheduler::Handle>,
}

type PendingStates<S> = (
    Option<HandshakeState<S>>,
    Option<ReadState>,
    Option<WriteState>,
);

/// A TLS socket, client- or server-side. See [`AsyncStream`] for the I/O
/// model and the module documentation for handshake and shutdown behavior.
pub struct TlsSocket<S: StreamSource> {
    token: Token,
    refs: RefCount,
    inner: Mutex<TlsInner<S>>,
}

/// A TLS socket over TCP.
pub type TlsTcpSocket = TlsSocket<mio::net::TcpStream>;

/// A TLS socket over a Unix-domain stream, for socketpair-based tests.
pub type TlsUnixSocket = TlsSocket<mio::net::UnixStream>;

// Sockets whose handshake is still in flight, keyed by address. Pinning
// them here keeps them alive between acceptance and delivery.
fn handshaking_sockets() -> &'static Mutex<HashMap<usize, RefPtr<TlsTcpSocket>>> {
    static HANDSHAKING: OnceLock<Mutex<HashMap<usize, RefPtr<TlsTcpSocket>>>> = OnceLock::new();
    HANDSHAKING.get_or_init(|| Mutex::new(HashMap::new()))
}

pub(crate) fn park_handshaking(socket: RefPtr<TlsTcpSocket>) {
    let key = socket.as_ptr() as *const () as usize;
    lock(handshaking_sockets()).insert(key, socket);
}

pub(crate) fn extract_handshaking(socket: &TlsTcpSocket) -> Option<RefPtr<TlsTcpSocket>> {
    let key = socket as *const TlsTcpSocket as *const () as usize;
    lock(handshaking_sockets()).remove(&key)
}

impl TlsTcpSocket {
    /// Opens a TLS connection to `address:port`. The callback is notified
    /// once the whole handshake is complete, not just the TCP SYN-ACK
    /// sequence.
    pub fn connect(
        address: &str,
        port: u16,
        options: &SocketOptions,
        config: Arc<rustls::ClientConfig>,
        server_name: ServerName<'static>,
        handshake_timeout: Duration,
        callback: ConnectCallback,
    ) -> Result<RefPtr<TlsTcpSocket>> {
        let mut addresses = (address, port)
            .to_socket_addrs()
            .map_err(|error| Status::from_io(error, "getaddrinfo"))?;
        let resolved = addresses
            .next()
            .ok_or_else(|| Status::invalid_argument(format!("cannot resolve {address:?}")))?;
        let stream = mio::net::TcpStream::connect(resolved)
            .map_err(|error| Status::from_io(error, "connect"))?;
        configure_inet_socket(&stream, options)?;
        let conn = rustls::ClientConnection::new(config, server_name)
            .map_err(|error| Status::internal(format!("TLS client setup: {error}")))?;
        let handshake: HandshakeCallback<mio::net::TcpStream> =
            Box::new(move |_, result| callback(result));
        let socket = Reactor::get().add(move |token| {
            Ok(Box::new(TlsSocket::new(token, stream, conn.into(), handshake)))
        })?;
        socket.start_handshake(handshake_timeout);
        Ok(socket)
    }
}

impl TlsUnixSocket {
    /// TEST ONLY: creates a connected server/client TLS pair over a
    /// socketpair. The callbacks observe handshake completion.
    pub fn pair_for_testing(
        server_config: Arc<rustls::ServerConfig>,
        client_config: Arc<rustls::ClientConfig>,
        server_name: ServerName<'static>,
        server_callback: ConnectCallback,
        client_callback: ConnectCallback,
    ) -> Result<(RefPtr<TlsUnixSocket>, RefPtr<TlsUnixSocket>)> {
        let (server_stream, client_stream) =
            mio::net::UnixStream::pair().map_err(|error| Status::from_io(error, "socketpair"))?;
        let server_conn = rustls::ServerConnection::new(server_config)
            .map_err(|error| Status::internal(format!("TLS server setup: {error}")))?;
        let client_conn = rustls::ClientConnection::new(client_config, server_name)
            .map_err(|error| Status::internal(format!("TLS client setup: {error}")))?;
        let server_handshake: HandshakeCallback<mio::net::UnixStream> =
            Box::new(move |_, result| server_callback(result));
        let client_handshake: HandshakeCallback<mio::net::UnixStream> =
            Box::new(move |_, result| client_callback(result));
        let server = Reactor::get().add(move |token| {
            Ok(Box::new(TlsSocket::new(
                token,
                server_stream,
                server_conn.into(),
                server_handshake,
            )))
        })?;
        let client = Reactor::get().add(move |token| {
            Ok(Box::new(TlsSocket::new(
                token,
                client_stream,
                client_conn.into(),
                client_handshake,
            )))
        })?;
        server.start_handshake(crate::net::DEFAULT_HANDSHAKE_TIMEOUT);
        client.start_handshake(crate::net::DEFAULT_HANDSHAKE_TIMEOUT);
        Ok((server, client))
    }
}

impl<S: StreamSource> TlsSocket<S> {
    pub(crate) fn new(
        token: Token,
        stream: S,
        conn: rustls::Connection,
        callback: HandshakeCallback<S>,
    ) -> Self {
        Self {
            token,
            refs: RefCount::new(),
            inner: Mutex::new(TlsInner {
                stream: Some(stream),
                conn,
                handshake: Some(HandshakeState {
                    callback,
                    timeout_handle: INVALID_HANDLE,
                }),
                read: None,
                write: None,
                timeouts: HashSet::new(),
            }),
        }
    }

    /// Arms the handshake timeout and pumps the handshake as far as the
    /// transport currently allows. Failures are reported through the
    /// handshake callback.
    pub(crate) fn start_handshake(&self, timeout: Duration) {
        let mut inner = lock(&self.inner);
        if inner.handshake.is_none() {
            return;
        }
        let handle = self.schedule_timeout(&mut inner, timeout, HANDSHAKE_TIMEOUT_MESSAGE);
        if let Some(state) = inner.handshake.as_mut() {
            state.timeout_handle = handle;
        }
        self.continue_handshake(inner);
    }

    fn schedule_timeout(
        &self,
        inner: &mut TlsInner<S>,
        timeout: Duration,
        message: &'static str,
    ) -> scheduler::Handle {
        let this = RefPtr::new(self);
        let handle = default_scheduler().schedule_in(move || this.handle_timeout(message), timeout);
        inner.timeouts.insert(handle);
        handle
    }

    fn cancel_timeout(inner: &mut TlsInner<S>, handle: scheduler::Handle) {
        if handle != INVALID_HANDLE {
            inner.timeouts.remove(&handle);
            default_scheduler().cancel(handle);
        }
    }

    fn handle_timeout(&self, message: &'static str) {
        let current = scheduler::current_task_handle();
        let mut inner = lock(&self.inner);
        if !inner.timeouts.remove(&current) {
            return;
        }
        let states = Self::expunge_all(&mut inner);
        self.kill_locked(&mut inner);
        drop(inner);
        self.abort_callbacks(states, Status::deadline_exceeded(message));
    }

    fn expunge_all(inner: &mut TlsInner<S>) -> PendingStates<S> {
        if let Some(state) = inner.handshake.as_mut() {
            let handle = mem::replace(&mut state.timeout_handle, INVALID_HANDLE);
            Self::cancel_timeout(inner, handle);
        }
        if let Some(state) = inner.read.as_mut() {
            let handle = mem::replace(state.timeout_handle_mut(), INVALID_HANDLE);
            Self::cancel_timeout(inner, handle);
        }
        if let Some(state) = inner.write.as_mut() {
            let handle = mem::replace(&mut state.timeout_handle, INVALID_HANDLE);
            Self::cancel_timeout(inner, handle);
        }
        (
            inner.handshake.take(),
            inner.read.take(),
            inner.write.take(),
        )
    }

    fn abort_callbacks(&self, states: PendingStates<S>, status: Status) {
        let (handshake, read, write) = states;
        if let Some(state) = handshake {
            (state.callback)(self, Err(status.clone()));
        }
        if let Some(state) = read {
            state.abort(status.clone());
        }
        if let Some(state) = write {
            (state.callback)(Err(status));
        }
    }

    fn kill_locked(&self, inner: &mut TlsInner<S>) {
        if let Some(mut stream) = inner.stream.take() {
            let _ = stream.shutdown_both();
            let _ = Reactor::get().registry().deregister(&mut stream);
            Reactor::get().kill(self.token);
        }
    }

    fn abort_and_close(&self, mut inner: MutexGuard<'_, TlsInner<S>>, status: Status) {
        let states = Self::expunge_all(&mut inner);
        self.kill_locked(&mut inner);
        drop(inner);
        self.abort_callbacks(states, status);
    }

    fn close_internal(&self, status: Status) -> bool {
        let mut inner = lock(&self.inner);
        let states = Self::expunge_all(&mut inner);
        let mut result = false;
        if inner.stream.is_some() {
            result = true;
            // Fast shutdown: queue close_notify and flush what fits, but do
            // not wait for the peer's close_notify.
            let TlsInner { stream, conn, .. } = &mut *inner;
            conn.send_close_notify();
            if let Some(stream) = stream.as_mut() {
                let _ = conn.write_tls(stream);
            }
            self.kill_locked(&mut inner);
        }
        drop(inner);
        self.abort_callbacks(states, status);
        result
    }

    // Pumps handshake records in both directions until the transport blocks
    // or the handshake completes; invokes the completion callback outside
    // the lock.
    fn continue_handshake(&self, mut inner: MutexGuard<'_, TlsInner<S>>) {
        loop {
            let TlsInner { stream, conn, .. } = &mut *inner;
            let Some(stream) = stream.as_mut() else {
                let states = Self::expunge_all(&mut inner);
                drop(inner);
                return self
                    .abort_callbacks(states, Status::aborted("this socket has been shut down"));
            };
            if conn.wants_write() {
                match conn.write_tls(stream) {
                    Ok(0) => {
                        return self.abort_and_close(inner, Status::aborted("the peer hung up"));
                    }
                    Ok(_) => continue,
                    Err(error) if error.kind() == std::io::ErrorKind::WouldBlock => return,
                    Err(error) if error.kind() == std::io::ErrorKind::Interrupted => continue,
                    Err(error) => {
                        return self.abort_and_close(inner, Status::from_io(error, "SSL_write"));
                    }
                }
            }
            if !conn.is_handshaking() {
                break;
            }
            if conn.wants_read() {
                match conn.read_tls(stream) {
                    Ok(0) => {
                        return self.abort_and_close(inner, Status::aborted("the peer hung up"));
                    }
                    Ok(_) => match conn.process_new_packets() {
                        Ok(_) => continue,
                        Err(error) => {
                            return self.abort_and_close(
                                inner,
                                Status::internal(format!("TLS handshake error: {error}")),
                            );
                        }
                    },
                    Err(error) if error.kind() == std::io::ErrorKind::WouldBlock => return,
                    Err(error) if error.kind() == std::io::ErrorKind::Interrupted => continue,
                    Err(error) => {
                        return self.abort_and_close(inner, Status::from_io(error, "SSL_read"));
                    }
                }
            } else {
                break;
            }
        }
        let Some(mut state) = inner.handshake.take() else {
            return;
        };
        let handle = mem::replace(&mut state.timeout_handle, INVALID_HANDLE);
        Self::cancel_timeout(&mut inner, handle);
        drop(inner);
        (state.callback)(self, Ok(()));
    }

    fn read_internal(
        &self,
        length: usize,
        callback: ReadCallback,
        timeout: Option<Duration>,
    ) -> Result<()> {
        if length == 0 {
            return Err(Status::invalid_argument(
                "the number of bytes to read must be at least 1",
            ));
        }
        check_timeout(timeout)?;
        let mut inner = lock(&self.inner);
        if inner.stream.is_none() {
            return Err(Status::failed_precondition("this socket has been shut down"));
        }
        if inner.read.is_some() {
            return Err(Status::failed_precondition(
                "another read operation is already in progress",
            ));
        }
        inner.read = Some(ReadState::Fill {
            buffer: vec![0u8; length],
            filled: 0,
            callback,
            timeout,
            timeout_handle: INVALID_HANDLE,
        });
        self.drive_read(inner);
        Ok(())
    }

    fn skip_internal(
        &self,
        length: usize,
        callback: SkipCallback,
        timeout: Option<Duration>,
    ) -> Result<()> {
        if length == 0 {
            return Err(Status::invalid_argument(
                "the number of bytes to skip must be at least 1",
            ));
        }
        check_timeout(timeout)?;
        let mut inner = lock(&self.inner);
        if inner.stream.is_none() {
            return Err(Status::failed_precondition("this socket has been shut down"));
        }
        if inner.read.is_some() {
            return Err(Status::failed_precondition(
                "another read operation is already in progress",
            ));
        }
        inner.read = Some(ReadState::Discard {
            remaining: length,
            callback,
            timeout,
            timeout_handle: INVALID_HANDLE,
        });
        self.drive_read(inner);
        Ok(())
    }

    fn write_internal(
        &self,
        buffer: Bytes,
        callback: WriteCallback,
        timeout: Option<Duration>,
    ) -> Result<()> {
        if buffer.is_empty() {
            return Err(Status::invalid_argument(
                "the number of bytes to write must be at least 1",
            ));
        }
        check_timeout(timeout)?;
        let mut inner = lock(&self.inner);
        if inner.stream.is_none() {
            return Err(Status::failed_precondition("this socket has been shut down"));
        }
        if inner.write.is_some() {
            return Err(Status::failed_precondition(
                "another write operation is already in progress",
            ));
        }
        inner.write = Some(WriteState {
            buffer,
            written: 0,
            callback,
            timeout,
            timeout_handle: INVALID_HANDLE,
        });
        self.drive_write(inner);
        Ok(())
    }

    // Moves plaintext out of the record layer into the pending read, pulling
    // TLS records off the socket as needed.
    fn drive_read(&self, mut inner: MutexGuard<'_, TlsInner<S>>) {
        if inner.read.is_none() {
            return;
        }
        if let Some(state) = inner.read.as_mut() {
            let handle = mem::replace(state.timeout_handle_mut(), INVALID_HANDLE);
            Self::cancel_timeout(&mut inner, handle);
        }
        let mut scratch = [0u8; 4096];
        loop {
            let TlsInner {
                stream, conn, read, ..
            } = &mut *inner;
            let (Some(stream), Some(state)) = (stream.as_mut(), read.as_mut()) else {
                return;
            };
            let result = match state {
                ReadState::Fill { buffer, filled, .. } => conn.reader().read(&mut buffer[*filled..]),
                ReadState::Discard { remaining, .. } => {
                    let want = (*remaining).min(scratch.len());
                    conn.reader().read(&mut scratch[..want])
                }
            };
            match result {
                Ok(0) => {
                    // Graceful close_notify from the peer.
                    return self.abort_and_close(inner, Status::cancelled("SSL peer hung up"));
                }
                Ok(count) => {
                    let complete = match state {
                        ReadState::Fill { buffer, filled, .. } => {
                            *filled += count;
                            *filled == buffer.len()
                        }
                        ReadState::Discard { remaining, .. } => {
                            *remaining -= count;
                            *remaining == 0
                        }
                    };
                    if complete {
                        let state = inner.read.take().expect("read state vanished");
                        drop(inner);
                        match state {
                            ReadState::Fill { buffer, callback, .. } => {
                                callback(Ok(Bytes::from(buffer)));
                            }
                            ReadState::Discard { callback, .. } => callback(Ok(())),
                        }
                        return;
                    }
                }
                Err(error) if error.kind() == std::io::ErrorKind::WouldBlock => {
                    match conn.read_tls(stream) {
                        Ok(0) => {
                            return self
                                .abort_and_close(inner, Status::aborted("the peer hung up"));
                        }
                        Ok(_) => match conn.process_new_packets() {
                            Ok(_) => continue,
                            Err(error) => {
                                return self.abort_and_close(
                                    inner,
                                    Status::internal(format!("TLS protocol error: {error}")),
                                );
                            }
                        },
                        Err(error) if error.kind() == std::io::ErrorKind::WouldBlock => {
                            let timeout = inner.read.as_ref().and_then(ReadState::timeout);
                            if let Some(timeout) = timeout {
                                let handle =
                                    self.schedule_timeout(&mut inner, timeout, READ_TIMEOUT_MESSAGE);
                                if let Some(state) = inner.read.as_mut() {
                                    *state.timeout_handle_mut() = handle;
                                }
                            }
                            return;
                        }
                        Err(error) if error.kind() == std::io::ErrorKind::Interrupted => continue,
                        Err(error) => {
                            return self.abort_and_close(inner, Status::from_io(error, "SSL_read"));
                        }
                    }
                }
                Err(error) => {
                    return self.abort_and_close(inner, Status::from_io(error, "SSL_read"));
                }
            }
        }
    }

    // Feeds the pending write into the record layer and flushes records
    // onto the socket until everything is out or the transport blocks.
    fn drive_write(&self, mut inner: MutexGuard<'_, TlsInner<S>>) {
        if inner.write.is_none() {
            return;
        }
        if let Some(state) = inner.write.as_mut() {
            let handle = mem::replace(&mut state.timeout_handle, INVALID_HANDLE);
            Self::cancel_timeout(&mut inner, handle);
        }
        loop {
            let TlsInner {
                stream, conn, write, ..
            } = &mut *inner;
            let (Some(stream), Some(state)) = (stream.as_mut(), write.as_mut()) else {
                return;
            };
            if state.written < state.buffer.len() {
                match conn.writer().write(&state.buffer[state.written..]) {
                    Ok(0) => {}
                    Ok(count) => state.written += count,
                    Err(error) => {
                        return self.abort_and_close(
                            inner,
                            Status::internal(format!("SSL_write: {error}")),
                        );
                    }
                }
            }
            if conn.wants_write() {
                match conn.write_tls(stream) {
                    Ok(0) => {
                        return self.abort_and_close(inner, Status::aborted("the peer hung up"));
                    }
                    Ok(_) => continue,
                    Err(error) if error.kind() == std::io::ErrorKind::WouldBlock => {
                        let timeout = inner.write.as_ref().and_then(|state| state.timeout);
                        if let Some(timeout) = timeout {
                            let handle =
                                self.schedule_timeout(&mut inner, timeout, WRITE_TIMEOUT_MESSAGE);
                            if let Some(state) = inner.write.as_mut() {
                                state.timeout_handle = handle;
                            }
                        }
                        return;
                    }
                    Err(error) if error.kind() == std::io::ErrorKind::Interrupted => continue,
                    Err(error) => {
                        return self.abort_and_close(inner, Status::from_io(error, "SSL_write"));
                    }
                }
            }
            if state.written == state.buffer.len() {
                let state = inner.write.take().expect("write state vanished");
                drop(inner);
                (state.callback)(Ok(()));
                return;
            }
        }
    }
}

fn check_timeout(timeout: Option<Duration>) -> Result<()> {
    match timeout {
        Some(timeout) if timeout.is_zero() => Err(Status::invalid_argument(
            "the I/O timeout must be greater than zero",
        )),
        _ => Ok(()),
    }
}

impl<S: StreamSource> AsyncStream for TlsSocket<S> {
    fn read(&self, length: usize, callback: ReadCallback) -> Result<()> {
        self.read_internal(length, callback, None)
    }

    fn read_with_timeout(
        &self,
        length: usize,
        callback: ReadCallback,
        timeout: Duration,
    ) -> Result<()> {
        self.read_internal(length, callback, Some(timeout))
    }

    fn skip(&self, length: usize, callback: SkipCallback) -> Result<()> {
        self.skip_internal(length, callback, None)
    }

    fn skip_with_timeout(
        &self,
        length: usize,
        callback: SkipCallback,
        timeout: Duration,
    ) -> Result<()> {
        self.skip_internal(length, callback, Some(timeout))
    }

    fn write(&self, buffer: Bytes, callback: WriteCallback) -> Result<()> {
        self.write_internal(buffer, callback, None)
    }

    fn write_with_timeout(
        &self,
        buffer: Bytes,
        callback: WriteCallback,
        timeout: Duration,
    ) -> Result<()> {
        self.write_internal(buffer, callback, Some(timeout))
    }

    fn close(&self) -> bool {
        self.close_internal(Status::aborted("socket shutdown"))
    }

    fn is_open(&self) -> bool {
        lock(&self.inner).stream.is_some()
    }
}

impl<S: StreamSource> EventTarget for TlsSocket<S> {
    fn token(&self) -> Token {
        self.token
    }

    fn register(&self, registry: &Registry) -> std::io::Result<()> {
        let mut inner = lock(&self.inner);
        match inner.stream.as_mut() {
            Some(stream) => registry.register(
                stream,
                self.token,
                Interest::READABLE | Interest::WRITABLE,
            ),
            None => Err(std::io::Error::from(std::io::ErrorKind::NotConnected)),
        }
    }

    fn on_error(&self) {
        let inner = lock(&self.inner);
        self.abort_and_close(inner, Status::aborted("SSL socket shutdown"));
    }

    fn on_input(&self) {
        let mut inner = lock(&self.inner);
        if inner.stream.is_none() {
            let states = Self::expunge_all(&mut inner);
            drop(inner);
            return self.abort_callbacks(states, Status::aborted("this socket has been shut down"));
        }
        if inner.handshake.is_some() {
            return self.continue_handshake(inner);
        }
        self.drive_read(inner);
    }

    fn on_output(&self) {
        let mut inner = lock(&self.inner);
        if inner.stream.is_none() {
            let states = Self::expunge_all(&mut inner);
            drop(inner);
            return self.abort_callbacks(states, Status::aborted("this socket has been shut down"));
        }
        if inner.handshake.is_some() {
            return self.continue_handshake(inner);
        }
        self.drive_write(inner);
    }
}

unsafe impl<S: StreamSource> RefCounted for TlsSocket<S> {
    fn retain(&self) {
        self.refs.increment();
    }

    fn release(&self) -> bool {
        self.refs.decrement()
    }

    fn is_referenced(&self) -> bool {
        self.refs.is_referenced()
    }

    fn on_last_ref(&self) -> Option<Reclaimed> {
        self.close_internal(Status::aborted("socket shutdown"));
        Reactor::get()
            .destroy(self.token, self)
            .map(|target| Box::new(target) as Reclaimed)
    }
}

impl<S: StreamSource> fmt::Debug for TlsSocket<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TlsSocket")
            .field("token", &self.token.0)
            .field("open", &self.is_open())
            .finish()
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::net::socket::tests::{sync_read, sync_write};
    use crate::status::StatusKind;
    use crossbeam_channel::{bounded, Receiver};
    use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
    use rustls::crypto::ring::default_provider;
    use rustls::pki_types::{CertificateDer, PrivateKeyDer, PrivatePkcs8KeyDer, UnixTime};
    use rustls::{DigitallySignedStruct, SignatureScheme};

    #[derive(Debug)]
    struct AcceptAnyCertificate;

    impl ServerCertVerifier for AcceptAnyCertificate {
        fn verify_server_cert(
            &self,
            _end_entity: &CertificateDer<'_>,
            _intermediates: &[CertificateDer<'_>],
            _server_name: &ServerName<'_>,
            _ocsp_response: &[u8],
            _now: UnixTime,
        ) -> std::result::Result<ServerCertVerified, rustls::Error> {
            Ok(ServerCertVerified::assertion())
        }

        fn verify_tls12_signature(
            &self,
            _message: &[u8],
            _cert: &CertificateDer<'_>,
            _dss: &DigitallySignedStruct,
        ) -> std::result::Result<HandshakeSignatureValid, rustls::Error> {
            Ok(HandshakeSignatureValid::assertion())
        }

        fn verify_tls13_signature(
            &self,
            _message: &[u8],
            _cert: &CertificateDer<'_>,
            _dss: &DigitallySignedStruct,
        ) -> std::result::Result<HandshakeSignatureValid, rustls::Error> {
            Ok(HandshakeSignatureValid::assertion())
        }

        fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
            default_provider()
                .signature_verification_algorithms
                .supported_schemes()
        }
    }

    pub(crate) fn test_server_config() -> Arc<rustls::ServerConfig> {
        let certified = rcgen::generate_simple_self_signed(vec!["localhost".to_owned()]).unwrap();
        let certificate = certified.cert.der().clone();
        let key = PrivateKeyDer::Pkcs8(PrivatePkcs8KeyDer::from(
            certified.key_pair.serialize_der(),
        ));
        Arc::new(
            rustls::ServerConfig::builder()
                .with_no_client_auth()
                .with_single_cert(vec![certificate], key)
                .unwrap(),
        )
    }

    pub(crate) fn test_client_config() -> Arc<rustls::ClientConfig> {
        Arc::new(
            rustls::ClientConfig::builder()
                .dangerous()
                .with_custom_certificate_verifier(Arc::new(AcceptAnyCertificate))
                .with_no_client_auth(),
        )
    }

    pub(crate) fn test_pair() -> (RefPtr<TlsUnixSocket>, RefPtr<TlsUnixSocket>) {
        let (server_tx, server_rx) = bounded(1);
        let (client_tx, client_rx) = bounded(1);
        let (server, client) = TlsUnixSocket::pair_for_testing(
            test_server_config(),
            test_client_config(),
            ServerName::try_from("localhost".to_owned()).unwrap(),
            Box::new(move |result| {
                let _ = server_tx.send(result);
            }),
            Box::new(move |result| {
                let _ = client_tx.send(result);
            }),
        )
        .unwrap();
        recv_ok(&server_rx);
        recv_ok(&client_rx);
        (server, client)
    }

    fn recv_ok(receiver: &Receiver<Result<()>>) {
        receiver
            .recv_timeout(Duration::from_secs(10))
            .expect("handshake did not complete")
            .expect("handshake failed");
    }

    #[test]
    fn handshake_and_roundtrip() {
        let (server, client) = test_pair();
        sync_write(&*client, b"hello over tls").unwrap();
        assert_eq!(&sync_read(&*server, 14).unwrap()[..], b"hello over tls");
        sync_write(&*server, b"right back at you").unwrap();
        assert_eq!(&sync_read(&*client, 17).unwrap()[..], b"right back at you");
    }

    #[test]
    fn skip_over_tls() {
        let (server, client) = test_pair();
        sync_write(&*client, b"0123456789").unwrap();
        let (sender, receiver) = bounded(1);
        server
            .skip(
                6,
                Box::new(move |result| {
                    let _ = sender.send(result);
                }),
            )
            .unwrap();
        receiver.recv_timeout(Duration::from_secs(5)).unwrap().unwrap();
        assert_eq!(&sync_read(&*server, 4).unwrap()[..], b"6789");
    }

    #[test]
    fn graceful_close_cancels_pending_read() {
        let (server, client) = test_pair();
        let (sender, receiver) = bounded(1);
        server
            .read(
                10,
                Box::new(move |result| {
                    let _ = sender.send(result);
                }),
            )
            .unwrap();
        assert!(client.close());
        let result = receiver.recv_timeout(Duration::from_secs(5)).unwrap();
        assert_eq!(result.unwrap_err().kind(), StatusKind::Cancelled);
        assert!(!server.is_open());
    }

    #[test]
    fn overlapping_reads_fail_precondition() {
        let (server, _client) = test_pair();
        let (sender, receiver) = bounded(1);
        server
            .read(
                1,
                Box::new(move |result| {
                    let _ = sender.send(result);
                }),
            )
            .unwrap();
        let status = server.read(1, Box::new(|_| {})).unwrap_err();
        assert_eq!(status.kind(), StatusKind::FailedPrecondition);
        server.close();
        assert!(receiver.recv_timeout(Duration::from_secs(5)).unwrap().is_err());
    }

    #[test]
    fn read_timeout_over_tls() {
        let (server, _client) = test_pair();
        let (sender, receiver) = bounded(1);
        server
            .read_with_timeout(
                10,
                Box::new(move |result| {
                    let _ = sender.send(result);
                }),
                Duration::from_millis(50),
            )
            .unwrap();
        let result = receiver.recv_timeout(Duration::from_secs(5)).unwrap();
        assert_eq!(result.unwrap_err().kind(), StatusKind::DeadlineExceeded);
        assert!(!server.is_open());
    }
}
