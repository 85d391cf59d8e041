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

//! Plaintext streaming sockets.
//!
//! [`Socket`] provides fully asynchronous exact-length reads, skips, and
//! writes over any non-blocking stream the reactor can watch. At most one
//! read *or* skip and at most one write may be in flight at a time; a read
//! and a write may overlap. Callbacks fire exactly once, outside the
//! socket's internal mutex, so they are free to issue the next operation.
//!
//! Per-operation timeouts are one-shot tasks on the default scheduler,
//! re-armed whenever the operation makes progress; an expired timeout
//! aborts the operation and closes the socket.

use std::collections::HashSet;
use std::fmt;
use std::io::{Read, Write};
use std::mem;
use std::net::{Shutdown, ToSocketAddrs};
use std::os::fd::{AsRawFd, BorrowedFd};
use std::path::Path;
use std::sync::Mutex;
use std::time::Duration;

use bytes::Bytes;
use mio::event::Source;
use mio::{Interest, Registry, Token};

use crate::net::reactor::{EventTarget, Reactor};
use crate::net::{SocketOptions, MAX_UNIX_SOCKET_PATH};
use crate::refcount::{RefCount, RefCounted, RefPtr, Reclaimed};
use crate::scheduler::{self, default_scheduler, INVALID_HANDLE};
use crate::status::{Result, Status};
use crate::sync::lock;

pub(crate) const READ_TIMEOUT_MESSAGE: &str = "read timeout";
pub(crate) const WRITE_TIMEOUT_MESSAGE: &str = "write timeout";

/// Callback type of [`AsyncStream::read`]. Receives the requested bytes or
/// the error that closed the socket.
pub type ReadCallback = Box<dyn FnOnce(Result<Bytes>) + Send>;

/// Callback type of [`AsyncStream::skip`].
pub type SkipCallback = Box<dyn FnOnce(Result<()>) + Send>;

/// Callback type of [`AsyncStream::write`].
pub type WriteCallback = Box<dyn FnOnce(Result<()>) + Send>;

/// Callback notified when an asynchronous connect (or TLS handshake)
/// finishes.
pub type ConnectCallback = Box<dyn FnOnce(Result<()>) + Send>;

/// A non-blocking stream the reactor can watch: the mio TCP and Unix-domain
/// stream types.
pub trait StreamSource: Read + Write + Source + Send + 'static {
    /// Shuts down both directions of the stream.
    fn shutdown_both(&self) -> std::io::Result<()>;

    /// Returns and clears the pending socket error, if any
    /// (`SO_ERROR`; used to finalize asynchronous connects).
    fn take_socket_error(&self) -> std::io::Result<Option<std::io::Error>>;
}

impl StreamSource for mio::net::TcpStream {
    fn shutdown_both(&self) -> std::io::Result<()> {
        self.shutdown(Shutdown::Both)
    }

    fn take_socket_error(&self) -> std::io::Result<Option<std::io::Error>> {
        self.take_error()
    }
}

impl StreamSource for mio::net::UnixStream {
    fn shutdown_both(&self) -> std::io::Result<()> {
        self.shutdown(Shutdown::Both)
    }

    fn take_socket_error(&self) -> std::io::Result<Option<std::io::Error>> {
        self.take_error()
    }
}

/// The capability set shared by all streaming sockets, plaintext and TLS.
///
/// Obtain trait-object handles by coercing at construction:
/// `RefPtr::<dyn AsyncStream>::new(&*socket)`.
pub trait AsyncStream: RefCounted + Send + Sync {
    /// Starts an asynchronous read of exactly `length` bytes.
    ///
    /// Only one read (or skip) at a time is supported; starting a second
    /// one fails with `FailedPrecondition` without invoking the callback.
    /// If the operation fails the socket is closed and the callback
    /// receives the error; no further I/O is possible.
    fn read(&self, length: usize, callback: ReadCallback) -> Result<()>;

    /// Like [`read`](AsyncStream::read), but fails (closing the socket) if
    /// no data arrives for more than `timeout`. The timeout is re-armed
    /// every time some data is received, so a low value is safe even for
    /// large transfers.
    fn read_with_timeout(
        &self,
        length: usize,
        callback: ReadCallback,
        timeout: Duration,
    ) -> Result<()>;

    /// Starts an asynchronous read that discards exactly `length` bytes
    /// without retaining them. Counts as a read for the one-at-a-time rule.
    fn skip(&self, length: usize, callback: SkipCallback) -> Result<()>;

    /// Like [`skip`](AsyncStream::skip) with a progress-re-armed timeout.
    fn skip_with_timeout(
        &self,
        length: usize,
        callback: SkipCallback,
        timeout: Duration,
    ) -> Result<()>;

    /// Starts an asynchronous write of the whole buffer. Only one write at
    /// a time is supported; a write may overlap a read.
    fn write(&self, buffer: Bytes, callback: WriteCallback) -> Result<()>;

    /// Like [`write`](AsyncStream::write) with a progress-re-armed timeout.
    fn write_with_timeout(
        &self,
        buffer: Bytes,
        callback: WriteCallback,
        timeout: Duration,
    ) -> Result<()>;

    /// Shuts the socket down and aborts both pending operations with
    /// `Aborted`. Idempotent and thread-safe; returns true only from the
    /// call that performed the closure.
    ///
    /// Callbacks run outside the socket's mutex, so one may still be
    /// running when `close` returns.
    fn close(&self) -> bool;

    /// Returns whether the socket is open and registered for I/O.
    fn is_open(&self) -> bool;
}

pub(crate) enum ReadState {
    Fill {
        buffer: Vec<u8>,
        filled: usize,
        callback: ReadCallback,
        timeout: Option<Duration>,
        timeout_handle: scheduler::Handle,
    },
    Discard {
        remaining: usize,
        callback: SkipCallback,
        timeout: Option<Duration>,
        timeout_handle: scheduler::Handle,
    },
}

impl ReadState {
    pub(crate) fn timeout(&self) -> Option<Duration> {
        match self {
            ReadState::Fill { timeout, .. } | ReadState::Discard { timeout, .. } => *timeout,
        }
    }

    pub(crate) fn timeout_handle_mut(&mut self) -> &mut scheduler::Handle {
        match self {
            ReadState::Fill { timeout_handle, .. } | ReadState::Discard { timeout_handle, .. } => {
                timeout_handle
            }
        }
    }

    pub(crate) fn abort(self, status: Status) {
        match self {
            ReadState::Fill { callback, .. } => callback(Err(status)),
            ReadState::Discard { callback, .. } => callback(Err(status)),
        }
    }
}

pub(crate) struct WriteState {
    pub(crate) buffer: Bytes,
    pub(crate) written: usize,
    pub(crate) callback: WriteCallback,
    pub(crate) timeout: Option<Duration>,
    pub(crate) timeout_handle: scheduler::Handle,
}

struct ConnectState {
    callback: ConnectCallback,
}

struct Inner<S> {
    stream: Option<S>,
    connect: Option<ConnectState>,
    read: Option<ReadState>,
    write: Option<WriteState>,
    // Handles of scheduled timeout tasks; a firing timeout checks itself
    // against this set to disambiguate from concurrent completion.
    timeouts: HashSet<scheduler::Handle>,
}

type PendingStates = (
    Option<ConnectState>,
    Option<ReadState>,
    Option<WriteState>,
);

/// Generic unencrypted socket, used for both client-side and server-side
/// connections.
///
/// Server-side sockets are constructed by listeners and delivered through
/// the accept callback; client-side sockets are created with
/// [`TcpSocket::connect`] or [`UnixSocket::connect_unix`]. See
/// [`AsyncStream`] for the I/O model.
pub struct Socket<S: StreamSource> {
    token: Token,
    refs: RefCount,
    inner: Mutex<Inner<S>>,
}

/// A plaintext socket over TCP.
pub type TcpSocket = Socket<mio::net::TcpStream>;

/// A plaintext socket over a Unix-domain stream.
pub type UnixSocket = Socket<mio::net::UnixStream>;

impl TcpSocket {
    /// Opens an asynchronous TCP connection. `address` may be numeric or a
    /// DNS name; resolution happens synchronously. `callback` is notified
    /// once the connection is established or has failed.
    pub fn connect(
        address: &str,
        port: u16,
        options: &SocketOptions,
        callback: ConnectCallback,
    ) -> Result<RefPtr<TcpSocket>> {
        let mut addresses = (address, port)
            .to_socket_addrs()
            .map_err(|error| Status::from_io(error, "getaddrinfo"))?;
        let address = addresses
            .next()
            .ok_or_else(|| Status::invalid_argument(format!("cannot resolve {address:?}")))?;
        let stream = mio::net::TcpStream::connect(address)
            .map_err(|error| Status::from_io(error, "connect"))?;
        configure_inet_socket(&stream, options)?;
        Reactor::get().add(move |token| Ok(Box::new(Socket::new(token, stream, Some(callback)))))
    }

    /// Returns whether TCP keep-alives are enabled for this socket.
    pub fn is_keep_alive(&self) -> Result<bool> {
        let inner = lock(&self.inner);
        let stream = inner
            .stream
            .as_ref()
            .ok_or_else(|| Status::failed_precondition("this socket has been shut down"))?;
        sock_ref(stream, |sock| sock.keepalive())
            .map_err(|error| Status::from_io(error, "getsockopt(SO_KEEPALIVE)"))
    }

    /// Returns the IP type of service configured for this socket.
    pub fn ip_tos(&self) -> Result<u8> {
        let inner = lock(&self.inner);
        let stream = inner
            .stream
            .as_ref()
            .ok_or_else(|| Status::failed_precondition("this socket has been shut down"))?;
        sock_ref(stream, |sock| sock.tos())
            .map(|tos| tos as u8)
            .map_err(|error| Status::from_io(error, "getsockopt(IP_TOS)"))
    }
}

impl UnixSocket {
    /// Opens an asynchronous connection to a Unix-domain socket path.
    pub fn connect_unix(
        path: impl AsRef<Path>,
        callback: ConnectCallback,
    ) -> Result<RefPtr<UnixSocket>> {
        let path = path.as_ref();
        if path.as_os_str().len() > MAX_UNIX_SOCKET_PATH {
            return Err(Status::invalid_argument(format!(
                "path {path:?} exceeds the maximum length of {MAX_UNIX_SOCKET_PATH}"
            )));
        }
        let stream = mio::net::UnixStream::connect(path)
            .map_err(|error| Status::from_io(error, "connect"))?;
        Reactor::get().add(move |token| Ok(Box::new(Socket::new(token, stream, Some(callback)))))
    }

    /// Creates a pair of connected sockets with the `socketpair` syscall.
    /// Mainly useful for deterministic tests.
    pub fn pair() -> Result<(RefPtr<UnixSocket>, RefPtr<UnixSocket>)> {
        let (first, second) =
            mio::net::UnixStream::pair().map_err(|error| Status::from_io(error, "socketpair"))?;
        let first = Reactor::get().add(move |token| Ok(Box::new(Socket::new(token, first, None))))?;
        let second =
            Reactor::get().add(move |token| Ok(Box::new(Socket::new(token, second, None))))?;
        Ok((first, second))
    }
}

impl<S: StreamSource> Socket<S> {
    pub(crate) fn new(token: Token, stream: S, connect: Option<ConnectCallback>) -> Self {
        Self {
            token,
            refs: RefCount::new(),
            inner: Mutex::new(Inner {
                stream: Some(stream),
                connect: connect.map(|callback| ConnectState { callback }),
                read: None,
                write: None,
                timeouts: HashSet::new(),
            }),
        }
    }

    /// Wraps a stream accepted by a listener.
    pub(crate) fn accepted(stream: S) -> Result<RefPtr<Self>> {
        Reactor::get().add(move |token| Ok(Box::new(Socket::new(token, stream, None))))
    }

    fn schedule_timeout(
        &self,
        inner: &mut Inner<S>,
        timeout: Duration,
        message: &'static str,
    ) -> scheduler::Handle {
        let this = RefPtr::new(self);
        let handle = default_scheduler().schedule_in(move || this.handle_timeout(message), timeout);
        inner.timeouts.insert(handle);
        handle
    }

    fn cancel_timeout(inner: &mut Inner<S>, handle: scheduler::Handle) {
        if handle != INVALID_HANDLE {
            inner.timeouts.remove(&handle);
            default_scheduler().cancel(handle);
        }
    }

    fn handle_timeout(&self, message: &'static str) {
        let current = scheduler::current_task_handle();
        let mut inner = lock(&self.inner);
        if !inner.timeouts.remove(&current) {
            // The operation settled while this task was queued.
            return;
        }
        let states = Self::expunge_all(&mut inner);
        self.kill_locked(&mut inner);
        drop(inner);
        Self::abort_callbacks(states, Status::deadline_exceeded(message));
    }

    fn expunge_all(inner: &mut Inner<S>) -> PendingStates {
        if let Some(state) = inner.read.as_mut() {
            let handle = mem::replace(state.timeout_handle_mut(), INVALID_HANDLE);
            Self::cancel_timeout(inner, handle);
        }
        if let Some(state) = inner.write.as_mut() {
            let handle = mem::replace(&mut state.timeout_handle, INVALID_HANDLE);
            Self::cancel_timeout(inner, handle);
        }
        (inner.connect.take(), inner.read.take(), inner.write.take())
    }

    fn abort_callbacks(states: PendingStates, status: Status) {
        let (connect, read, write) = states;
        if let Some(state) = connect {
            (state.callback)(Err(status.clone()));
        }
        if let Some(state) = read {
            state.abort(status.clone());
        }
        if let Some(state) = write {
            (state.callback)(Err(status));
        }
    }

    // Shuts down the descriptor, removes it from the reactor, and closes
    // it. The socket moves to the reactor's dead set until the last handle
    // is dropped.
    fn kill_locked(&self, inner: &mut Inner<S>) {
        if let Some(mut stream) = inner.stream.take() {
            let _ = stream.shutdown_both();
            let _ = Reactor::get().registry().deregister(&mut stream);
            Reactor::get().kill(self.token);
        }
    }

    fn abort_and_close(&self, mut inner: std::sync::MutexGuard<'_, Inner<S>>, status: Status) {
        let states = Self::expunge_all(&mut inner);
        self.kill_locked(&mut inner);
        drop(inner);
        Self::abort_callbacks(states, status);
    }

    fn close_internal(&self, status: Status) -> bool {
        let mut inner = lock(&self.inner);
        let states = Self::expunge_all(&mut inner);
        let mut result = false;
        if inner.stream.is_some() {
            result = true;
            self.kill_locked(&mut inner);
        }
        drop(inner);
        Self::abort_callbacks(states, status);
        result
    }

    fn finalize_connect(inner: &mut Inner<S>) -> Option<(ConnectCallback, Result<()>)> {
        inner.connect.as_ref()?;
        let result = match inner.stream.as_ref() {
            None => Err(Status::aborted("this socket has been shut down")),
            Some(stream) => match stream.take_socket_error() {
                Ok(None) => Ok(()),
                Ok(Some(error)) => Err(Status::from_io(error, "connect")),
                Err(error) => Err(Status::from_io(error, "connect")),
            },
        };
        let state = inner.connect.take()?;
        Some((state.callback, result))
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
        let mut buffer = vec![0u8; length];
        let mut filled = 0;
        loop {
            let stream = inner.stream.as_mut().expect("stream vanished under lock");
            match stream.read(&mut buffer[filled..]) {
                Ok(0) => {
                    let status = Status::aborted("the peer hung up");
                    self.abort_and_close(inner, status.clone());
                    return Err(status);
                }
                Ok(count) => {
                    filled += count;
                    if filled == length {
                        drop(inner);
                        callback(Ok(Bytes::from(buffer)));
                        return Ok(());
                    }
                }
                Err(error) if error.kind() == std::io::ErrorKind::WouldBlock => {
                    let timeout_handle = match timeout {
                        Some(timeout) => self.schedule_timeout(&mut inner, timeout, READ_TIMEOUT_MESSAGE),
                        None => INVALID_HANDLE,
                    };
                    inner.read = Some(ReadState::Fill {
                        buffer,
                        filled,
                        callback,
                        timeout,
                        timeout_handle,
                    });
                    return Ok(());
                }
                Err(error) if error.kind() == std::io::ErrorKind::Interrupted => {}
                Err(error) => {
                    let status = Status::from_io(error, "recv");
                    self.abort_and_close(inner, status.clone());
                    return Err(status);
                }
            }
        }
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
        let mut scratch = [0u8; 4096];
        let mut remaining = length;
        loop {
            let stream = inner.stream.as_mut().expect("stream vanished under lock");
            let want = remaining.min(scratch.len());
            match stream.read(&mut scratch[..want]) {
                Ok(0) => {
                    let status = Status::aborted("the peer hung up");
                    self.abort_and_close(inner, status.clone());
                    return Err(status);
                }
                Ok(count) => {
                    remaining -= count;
                    if remaining == 0 {
                        drop(inner);
                        callback(Ok(()));
                        return Ok(());
                    }
                }
                Err(error) if error.kind() == std::io::ErrorKind::WouldBlock => {
                    let timeout_handle = match timeout {
                        Some(timeout) => self.schedule_timeout(&mut inner, timeout, READ_TIMEOUT_MESSAGE),
                        None => INVALID_HANDLE,
                    };
                    inner.read = Some(ReadState::Discard {
                        remaining,
                        callback,
                        timeout,
                        timeout_handle,
                    });
                    return Ok(());
                }
                Err(error) if error.kind() == std::io::ErrorKind::Interrupted => {}
                Err(error) => {
                    let status = Status::from_io(error, "recv");
                    self.abort_and_close(inner, status.clone());
                    return Err(status);
                }
            }
        }
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
        let mut written = 0;
        loop {
            let stream = inner.stream.as_mut().expect("stream vanished under lock");
            match stream.write(&buffer[written..]) {
                Ok(0) => {
                    let status = Status::aborted("the peer hung up");
                    self.abort_and_close(inner, status.clone());
                    return Err(status);
                }
                Ok(count) => {
                    written += count;
                    if written == buffer.len() {
                        drop(inner);
                        callback(Ok(()));
                        return Ok(());
                    }
                }
                Err(error) if error.kind() == std::io::ErrorKind::WouldBlock => {
                    let timeout_handle = match timeout {
                        Some(timeout) => {
                            self.schedule_timeout(&mut inner, timeout, WRITE_TIMEOUT_MESSAGE)
                        }
                        None => INVALID_HANDLE,
                    };
                    inner.write = Some(WriteState {
                        buffer,
                        written,
                        callback,
                        timeout,
                        timeout_handle,
                    });
                    return Ok(());
                }
                Err(error) if error.kind() == std::io::ErrorKind::Interrupted => {}
                Err(error) => {
                    let status = Status::from_io(error, "send");
                    self.abort_and_close(inner, status.clone());
                    return Err(status);
                }
            }
        }
    }

    fn handle_input(&self) {
        let mut inner = lock(&self.inner);
        if inner.stream.is_none() {
            let states = Self::expunge_all(&mut inner);
            drop(inner);
            return Self::abort_callbacks(states, Status::aborted("this socket has been shut down"));
        }
        if let Some((callback, result)) = Self::finalize_connect(&mut inner) {
            drop(inner);
            callback(result);
            inner = lock(&self.inner);
            if inner.stream.is_none() {
                return;
            }
        }
        if inner.read.is_none() {
            return;
        }
        if let Some(state) = inner.read.as_mut() {
            let handle = mem::replace(state.timeout_handle_mut(), INVALID_HANDLE);
            Self::cancel_timeout(&mut inner, handle);
        }
        let mut scratch = [0u8; 4096];
        loop {
            let Inner { stream, read, .. } = &mut *inner;
            let (Some(stream), Some(state)) = (stream.as_mut(), read.as_mut()) else {
                return;
            };
            let result = match state {
                ReadState::Fill { buffer, filled, .. } => stream.read(&mut buffer[*filled..]),
                ReadState::Discard { remaining, .. } => {
                    let want = (*remaining).min(scratch.len());
                    stream.read(&mut scratch[..want])
                }
            };
            match result {
                Ok(0) => {
                    return self.abort_and_close(inner, Status::aborted("the peer hung up"));
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
                    let timeout = state.timeout();
                    if let Some(timeout) = timeout {
                        let handle = self.schedule_timeout(&mut inner, timeout, READ_TIMEOUT_MESSAGE);
                        if let Some(state) = inner.read.as_mut() {
                            *state.timeout_handle_mut() = handle;
                        }
                    }
                    return;
                }
                Err(error) if error.kind() == std::io::ErrorKind::Interrupted => {}
                Err(error) => {
                    return self.abort_and_close(inner, Status::from_io(error, "recv"));
                }
            }
        }
    }

    fn handle_output(&self) {
        let mut inner = lock(&self.inner);
        if inner.stream.is_none() {
            let states = Self::expunge_all(&mut inner);
            drop(inner);
            return Self::abort_callbacks(states, Status::aborted("this socket has been shut down"));
        }
        if let Some((callback, result)) = Self::finalize_connect(&mut inner) {
            drop(inner);
            callback(result);
            inner = lock(&self.inner);
            if inner.stream.is_none() {
                return;
            }
        }
        if inner.write.is_none() {
            return;
        }
        if let Some(state) = inner.write.as_mut() {
            let handle = mem::replace(&mut state.timeout_handle, INVALID_HANDLE);
            Self::cancel_timeout(&mut inner, handle);
        }
        loop {
            let Inner { stream, write, .. } = &mut *inner;
            let (Some(stream), Some(state)) = (stream.as_mut(), write.as_mut()) else {
                return;
            };
            match stream.write(&state.buffer[state.written..]) {
                Ok(0) => {
                    return self.abort_and_close(inner, Status::aborted("the peer hung up"));
                }
                Ok(count) => {
                    state.written += count;
                    if state.written == state.buffer.len() {
                        let state = inner.write.take().expect("write state vanished");
                        drop(inner);
                        (state.callback)(Ok(()));
                        return;
                    }
                }
                Err(error) if error.kind() == std::io::ErrorKind::WouldBlock => {
                    let timeout = state.timeout;
                    if let Some(timeout) = timeout {
                        let handle =
                            self.schedule_timeout(&mut inner, timeout, WRITE_TIMEOUT_MESSAGE);
                        if let Some(state) = inner.write.as_mut() {
                            state.timeout_handle = handle;
                        }
                    }
                    return;
                }
                Err(error) if error.kind() == std::io::ErrorKind::Interrupted => {}
                Err(error) => {
                    return self.abort_and_close(inner, Status::from_io(error, "send"));
                }
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

pub(crate) fn sock_ref<S: AsRawFd, T>(
    stream: &S,
    action: impl FnOnce(socket2::SockRef<'_>) -> std::io::Result<T>,
) -> std::io::Result<T> {
    // The descriptor is owned by `stream` and stays open for the borrow.
    let fd = unsafe { BorrowedFd::borrow_raw(stream.as_raw_fd()) };
    action(socket2::SockRef::from(&fd))
}

/// Applies `options` to an accepted or connecting TCP stream.
pub(crate) fn configure_inet_socket(
    stream: &mio::net::TcpStream,
    options: &SocketOptions,
) -> Result<()> {
    sock_ref(stream, |sock| {
        if options.keep_alive {
            let params = &options.keep_alive_params;
            sock.set_keepalive(true)?;
            sock.set_tcp_keepalive(
                &socket2::TcpKeepalive::new()
                    .with_time(params.idle)
                    .with_interval(params.interval)
                    .with_retries(params.count),
            )?;
        }
        if let Some(tos) = options.ip_tos {
            sock.set_tos(tos as u32)?;
        }
        Ok(())
    })
    .map_err(|error| Status::from_io(error, "setsockopt"))
}

impl<S: StreamSource> AsyncStream for Socket<S> {
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

impl<S: StreamSource> EventTarget for Socket<S> {
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
        self.abort_and_close(inner, Status::aborted("socket shutdown"));
    }

    fn on_input(&self) {
        self.handle_input();
    }

    fn on_output(&self) {
        self.handle_output();
    }
}

unsafe impl<S: StreamSource> RefCounted for Socket<S> {
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

impl<S: StreamSource> fmt::Debug for Socket<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Socket")
            .field("token", &self.token.0)
            .field("open", &self.is_open())
            .finish()
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::status::StatusKind;
    use crossbeam_channel::{bounded, Receiver};

    pub(crate) fn read_result(socket: &dyn AsyncStream, length: usize) -> Receiver<Result<Bytes>> {
        let (sender, receiver) = bounded(1);
        socket
            .read(
                length,
                Box::new(move |result| {
                    let _ = sender.send(result);
                }),
            )
            .unwrap();
        receiver
    }

    pub(crate) fn sync_read(socket: &dyn AsyncStream, length: usize) -> Result<Bytes> {
        read_result(socket, length).recv().unwrap()
    }

    pub(crate) fn sync_write(socket: &dyn AsyncStream, data: &[u8]) -> Result<()> {
        let (sender, receiver) = bounded(1);
        socket.write(
            Bytes::copy_from_slice(data),
            Box::new(move |result| {
                let _ = sender.send(result);
            }),
        )?;
        receiver.recv().unwrap()
    }

    #[test]
    fn roundtrip() {
        let (first, second) = UnixSocket::pair().unwrap();
        sync_write(&*first, b"hello world").unwrap();
        let data = sync_read(&*second, 11).unwrap();
        assert_eq!(&data[..], b"hello world");
    }

    #[test]
    fn split_reads() {
        let (first, second) = UnixSocket::pair().unwrap();
        sync_write(&*first, b"0123456789").unwrap();
        assert_eq!(&sync_read(&*second, 4).unwrap()[..], b"0123");
        assert_eq!(&sync_read(&*second, 6).unwrap()[..], b"456789");
    }

    #[test]
    fn skip_discards_exactly() {
        let (first, second) = UnixSocket::pair().unwrap();
        sync_write(&*first, b"0123456789").unwrap();
        let (sender, receiver) = bounded(1);
        second
            .skip(
                7,
                Box::new(move |result| {
                    let _ = sender.send(result);
                }),
            )
            .unwrap();
        receiver.recv().unwrap().unwrap();
        assert_eq!(&sync_read(&*second, 3).unwrap()[..], b"789");
    }

    #[test]
    fn zero_length_read_is_invalid() {
        let (first, _second) = UnixSocket::pair().unwrap();
        let status = first.read(0, Box::new(|_| {})).unwrap_err();
        assert_eq!(status.kind(), StatusKind::InvalidArgument);
    }

    #[test]
    fn zero_timeout_is_invalid() {
        let (first, _second) = UnixSocket::pair().unwrap();
        let status = first
            .read_with_timeout(1, Box::new(|_| {}), Duration::ZERO)
            .unwrap_err();
        assert_eq!(status.kind(), StatusKind::InvalidArgument);
    }

    #[test]
    fn overlapping_reads_fail_precondition() {
        let (first, _second) = UnixSocket::pair().unwrap();
        let pending = read_result(&*first, 10);
        let status = first.read(1, Box::new(|_| {})).unwrap_err();
        assert_eq!(status.kind(), StatusKind::FailedPrecondition);
        first.close();
        assert_eq!(
            pending.recv().unwrap().unwrap_err().kind(),
            StatusKind::Aborted
        );
    }

    #[test]
    fn read_and_write_may_overlap() {
        let (first, second) = UnixSocket::pair().unwrap();
        let pending = read_result(&*first, 5);
        sync_write(&*first, b"ad astra").unwrap();
        assert_eq!(&sync_read(&*second, 8).unwrap()[..], b"ad astra");
        sync_write(&*second, b"per aspera").unwrap();
        assert_eq!(&pending.recv().unwrap().unwrap()[..], b"per a");
    }

    #[test]
    fn read_timeout_closes_the_socket() {
        let (first, _second) = UnixSocket::pair().unwrap();
        let (sender, receiver) = bounded(1);
        first
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
        assert!(!first.is_open());
        let status = first.read(1, Box::new(|_| {})).unwrap_err();
        assert_eq!(status.kind(), StatusKind::FailedPrecondition);
    }

    #[test]
    fn timeout_is_rearmed_on_progress() {
        let (first, second) = UnixSocket::pair().unwrap();
        let (sender, receiver) = bounded(1);
        second
            .read_with_timeout(
                6,
                Box::new(move |result| {
                    let _ = sender.send(result);
                }),
                Duration::from_millis(500),
            )
            .unwrap();
        for chunk in [b"ab".as_slice(), b"cd", b"ef"] {
            std::thread::sleep(Duration::from_millis(250));
            sync_write(&*first, chunk).unwrap();
        }
        let data = receiver.recv_timeout(Duration::from_secs(5)).unwrap().unwrap();
        assert_eq!(&data[..], b"abcdef");
    }

    #[test]
    fn peer_hangup_aborts_pending_read() {
        let (first, second) = UnixSocket::pair().unwrap();
        let pending = read_result(&*first, 10);
        second.close();
        assert_eq!(
            pending.recv().unwrap().unwrap_err().kind(),
            StatusKind::Aborted
        );
        assert!(!first.is_open());
    }

    #[test]
    fn close_wins_exactly_once() {
        let (first, _second) = UnixSocket::pair().unwrap();
        assert!(first.is_open());
        assert!(first.close());
        assert!(!first.close());
        assert!(!first.is_open());
        let status = first.read(1, Box::new(|_| {})).unwrap_err();
        assert_eq!(status.kind(), StatusKind::FailedPrecondition);
        let status = first
            .write(Bytes::from_static(b"x"), Box::new(|_| {}))
            .unwrap_err();
        assert_eq!(status.kind(), StatusKind::FailedPrecondition);
    }

    #[test]
    fn large_write_completes() {
        let (first, second) = UnixSocket::pair().unwrap();
        let payload = vec![0x5a_u8; 1 << 20];
        let (sender, receiver) = bounded(1);
        {
            let payload = Bytes::from(payload.clone());
            first
                .write(
                    payload,
                    Box::new(move |result| {
                        let _ = sender.send(result);
                    }),
                )
                .unwrap();
        }
        let data = sync_read(&*second, payload.len()).unwrap();
        receiver.recv_timeout(Duration::from_secs(5)).unwrap().unwrap();
        assert_eq!(data.len(), payload.len());
        assert!(data.iter().all(|byte| *byte == 0x5a));
    }

    #[test]
    fn tcp_connect_applies_options() {
        use crate::net::listener::tests::spawn_tcp_listener;
        let (listener, accepted) = spawn_tcp_listener(SocketOptions::default());
        let (sender, receiver) = bounded(1);
        let options = SocketOptions {
            keep_alive: true,
            ..SocketOptions::default()
        };
        let socket = TcpSocket::connect(
            crate::net::LOCALHOST,
            listener.port(),
            &options,
            Box::new(move |result| {
                let _ = sender.send(result);
            }),
        )
        .unwrap();
        receiver.recv_timeout(Duration::from_secs(5)).unwrap().unwrap();
        assert!(socket.is_keep_alive().unwrap());
        let server_side = accepted.recv_timeout(Duration::from_secs(5)).unwrap();
        sync_write(&*socket, b"ping").unwrap();
        assert_eq!(&sync_read(&*server_side, 4).unwrap()[..], b"ping");
    }
}
