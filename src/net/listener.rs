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

//! Listener sockets.
//!
//! Listeners accept connections in a loop until the kernel reports no more
//! pending ones, apply per-connection options (keep-alive parameters, IP
//! TOS), and hand each accepted socket to the user callback. The callback
//! may be invoked many times concurrently; anything in its closure must be
//! thread-safe.
//!
//! TCP listeners are dual-stack: they bind an `AF_INET6` socket with
//! `IPV6_V6ONLY` off, so both IPv4 and IPv6 clients can connect. TLS
//! listeners run the handshake before delivery; see [`TlsListener`].

use std::fmt;
use std::io::ErrorKind;
use std::net::{Ipv6Addr, SocketAddr, SocketAddrV6};
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use mio::{Interest, Registry, Token};

use crate::net::reactor::{EventTarget, Reactor};
use crate::net::socket::{configure_inet_socket, Socket, StreamSource};
use crate::net::tls::{self, HandshakeCallback, TlsSocket, TlsTcpSocket};
use crate::net::{SocketOptions, MAX_UNIX_SOCKET_PATH};
use crate::refcount::{RefCount, RefCounted, RefPtr, Reclaimed};
use crate::status::{Result, Status};
use crate::sync::lock;

/// Callback invoked for every accepted connection (or accept failure other
/// than "no more pending connections").
pub type AcceptCallback<S> = Box<dyn Fn(Result<RefPtr<Socket<S>>>) + Send + Sync>;

/// Callback invoked for every TLS connection whose handshake completed (or
/// failed).
pub type TlsAcceptCallback = Arc<dyn Fn(Result<RefPtr<TlsTcpSocket>>) + Send + Sync>;

/// A listening event source the reactor can watch.
pub trait ListenSource: mio::event::Source + Send + 'static {
    /// The stream type produced by accepting a connection.
    type Stream: StreamSource;

    /// Accepts one pending connection.
    fn accept_stream(&self) -> std::io::Result<Self::Stream>;

    /// Applies per-connection options to an accepted stream.
    fn configure(stream: &Self::Stream, options: &SocketOptions) -> Result<()>;
}

impl ListenSource for mio::net::TcpListener {
    type Stream = mio::net::TcpStream;

    fn accept_stream(&self) -> std::io::Result<Self::Stream> {
        self.accept().map(|(stream, _)| stream)
    }

    fn configure(stream: &Self::Stream, options: &SocketOptions) -> Result<()> {
        configure_inet_socket(stream, options)
    }
}

impl ListenSource for mio::net::UnixListener {
    type Stream = mio::net::UnixStream;

    fn accept_stream(&self) -> std::io::Result<Self::Stream> {
        self.accept().map(|(stream, _)| stream)
    }

    fn configure(_stream: &Self::Stream, _options: &SocketOptions) -> Result<()> {
        Ok(())
    }
}

/// A listener socket delivering plaintext [`Socket`]s.
pub struct ListenerSocket<L: ListenSource> {
    token: Token,
    refs: RefCount,
    address: String,
    port: u16,
    options: Option<SocketOptions>,
    callback: AcceptCallback<L::Stream>,
    inner: Mutex<Option<L>>,
}

/// A listener for unencrypted dual-stack TCP/IP connections.
pub type TcpListener = ListenerSocket<mio::net::TcpListener>;

/// A listener for Unix-domain stream connections.
pub type UnixListener = ListenerSocket<mio::net::UnixListener>;

impl TcpListener {
    /// Binds a dual-stack TCP listener. An empty `address` binds to
    /// `in6addr_any`; otherwise it must be a numeric IPv6 address. The
    /// options are applied to every accepted connection.
    pub fn bind(
        address: &str,
        port: u16,
        options: SocketOptions,
        callback: AcceptCallback<mio::net::TcpStream>,
    ) -> Result<RefPtr<TcpListener>> {
        let (listener, local_port) = create_inet_listener(address, port)?;
        let address = address.to_owned();
        Reactor::get().add(move |token| {
            Ok(Box::new(ListenerSocket {
                token,
                refs: RefCount::new(),
                address,
                port: local_port,
                options: Some(options),
                callback,
                inner: Mutex::new(Some(listener)),
            }))
        })
    }
}

impl UnixListener {
    /// Binds a Unix-domain stream listener at `path`.
    pub fn bind_unix(
        path: impl AsRef<Path>,
        callback: AcceptCallback<mio::net::UnixStream>,
    ) -> Result<RefPtr<UnixListener>> {
        let path = path.as_ref();
        if path.as_os_str().len() > MAX_UNIX_SOCKET_PATH {
            return Err(Status::invalid_argument(format!(
                "path {path:?} exceeds the maximum length of {MAX_UNIX_SOCKET_PATH}"
            )));
        }
        let listener =
            mio::net::UnixListener::bind(path).map_err(|error| Status::from_io(error, "bind"))?;
        let address = path.to_string_lossy().into_owned();
        Reactor::get().add(move |token| {
            Ok(Box::new(ListenerSocket {
                token,
                refs: RefCount::new(),
                address,
                port: 0,
                options: None,
                callback,
                inner: Mutex::new(Some(listener)),
            }))
        })
    }
}

impl<L: ListenSource> ListenerSocket<L> {
    /// Returns the local address this listener is bound to. For TCP an
    /// empty string means `in6addr_any`; for Unix-domain listeners this is
    /// the socket path.
    pub fn address(&self) -> &str {
        &self.address
    }

    /// Returns the local TCP port this listener accepts connections on
    /// (zero for Unix-domain listeners).
    pub fn port(&self) -> u16 {
        self.port
    }

    /// Stops accepting and removes the listener from the reactor. Returns
    /// true only from the winning call.
    pub fn close(&self) -> bool {
        let mut inner = lock(&self.inner);
        if inner.is_some() {
            self.kill_locked(&mut inner);
            true
        } else {
            false
        }
    }

    /// Returns whether the listener is still accepting connections.
    pub fn is_open(&self) -> bool {
        lock(&self.inner).is_some()
    }

    fn kill_locked(&self, inner: &mut MutexGuard<'_, Option<L>>) {
        if let Some(mut listener) = inner.take() {
            let _ = Reactor::get().registry().deregister(&mut listener);
            Reactor::get().kill(self.token);
        }
    }

    fn accept_all(&self) -> Result<Vec<L::Stream>> {
        let mut streams = Vec::new();
        let mut inner = lock(&self.inner);
        let Some(listener) = inner.as_ref() else {
            return Err(Status::failed_precondition("this socket has been shut down"));
        };
        loop {
            match listener.accept_stream() {
                Ok(stream) => streams.push(stream),
                Err(error) if error.kind() == ErrorKind::WouldBlock => return Ok(streams),
                Err(error) if error.kind() == ErrorKind::Interrupted => continue,
                Err(error) => {
                    self.kill_locked(&mut inner);
                    return Err(Status::from_io(error, "accept4"));
                }
            }
        }
    }
}

impl<L: ListenSource> EventTarget for ListenerSocket<L> {
    fn token(&self) -> Token {
        self.token
    }

    fn register(&self, registry: &Registry) -> std::io::Result<()> {
        let mut inner = lock(&self.inner);
        match inner.as_mut() {
            Some(listener) => registry.register(listener, self.token, Interest::READABLE),
            None => Err(std::io::Error::from(ErrorKind::NotConnected)),
        }
    }

    fn on_error(&self) {
        self.close();
        (self.callback)(Err(Status::aborted("socket shutdown")));
    }

    fn on_input(&self) {
        match self.accept_all() {
            Ok(streams) => {
                for stream in streams {
                    if let Some(options) = &self.options {
                        if let Err(status) = L::configure(&stream, options) {
                            (self.callback)(Err(status));
                            continue;
                        }
                    }
                    (self.callback)(Socket::accepted(stream));
                }
            }
            Err(status) => (self.callback)(Err(status)),
        }
    }

    fn on_output(&self) {
        // Nothing to do here.
    }
}

unsafe impl<L: ListenSource> RefCounted for ListenerSocket<L> {
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
        self.close();
        Reactor::get()
            .destroy(self.token, self)
            .map(|target| Box::new(target) as Reclaimed)
    }
}

impl<L: ListenSource> fmt::Debug for ListenerSocket<L> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ListenerSocket")
            .field("address", &self.address)
            .field("port", &self.port)
            .field("open", &self.is_open())
            .finish()
    }
}

/// A listener for TLS connections over dual-stack TCP/IP.
///
/// Accepted sockets begin the server-side handshake immediately and are
/// parked in the handshaking set until it completes; only then does the
/// accept callback receive the socket. The handshake has its own timeout.
pub struct TlsListener {
    token: Token,
    refs: RefCount,
    address: String,
    port: u16,
    options: SocketOptions,
    config: Arc<rustls::ServerConfig>,
    handshake_timeout: Duration,
    callback: TlsAcceptCallback,
    inner: Mutex<Option<mio::net::TcpListener>>,
}

impl TlsListener {
    /// Binds a TLS listener. See [`TcpListener::bind`] for the address
    /// semantics.
    pub fn bind(
        address: &str,
        port: u16,
        options: SocketOptions,
        config: Arc<rustls::ServerConfig>,
        handshake_timeout: Duration,
        callback: TlsAcceptCallback,
    ) -> Result<RefPtr<TlsListener>> {
        let (listener, local_port) = create_inet_listener(address, port)?;
        let address = address.to_owned();
        Reactor::get().add(move |token| {
            Ok(Box::new(TlsListener {
                token,
                refs: RefCount::new(),
                address,
                port: local_port,
                options,
                config,
                handshake_timeout,
                callback,
                inner: Mutex::new(Some(listener)),
            }))
        })
    }

    /// Returns the local address this listener is bound to.
    pub fn address(&self) -> &str {
        &self.address
    }

    /// Returns the local TCP port this listener accepts connections on.
    pub fn port(&self) -> u16 {
        self.port
    }

    /// Stops accepting and removes the listener from the reactor. Returns
    /// true only from the winning call.
    pub fn close(&self) -> bool {
        let mut inner = lock(&self.inner);
        if inner.is_some() {
            self.kill_locked(&mut inner);
            true
        } else {
            false
        }
    }

    /// Returns whether the listener is still accepting connections.
    pub fn is_open(&self) -> bool {
        lock(&self.inner).is_some()
    }

    fn kill_locked(&self, inner: &mut MutexGuard<'_, Option<mio::net::TcpListener>>) {
        if let Some(mut listener) = inner.take() {
            let _ = Reactor::get().registry().deregister(&mut listener);
            Reactor::get().kill(self.token);
        }
    }

    fn accept_all(&self) -> Result<Vec<mio::net::TcpStream>> {
        let mut streams = Vec::new();
        let mut inner = lock(&self.inner);
        let Some(listener) = inner.as_ref() else {
            return Err(Status::failed_precondition("this socket has been shut down"));
        };
        loop {
            match listener.accept() {
                Ok((stream, _)) => streams.push(stream),
                Err(error) if error.kind() == ErrorKind::WouldBlock => return Ok(streams),
                Err(error) if error.kind() == ErrorKind::Interrupted => continue,
                Err(error) => {
                    self.kill_locked(&mut inner);
                    return Err(Status::from_io(error, "accept4"));
                }
            }
        }
    }

    fn start_accepted(&self, stream: mio::net::TcpStream) {
        if let Err(status) = configure_inet_socket(&stream, &self.options) {
            return (self.callback)(Err(status));
        }
        let conn = match rustls::ServerConnection::new(Arc::clone(&self.config)) {
            Ok(conn) => conn,
            Err(error) => {
                return (self.callback)(Err(Status::internal(format!(
                    "TLS server setup: {error}"
                ))));
            }
        };
        let accept_callback = Arc::clone(&self.callback);
        let handshake: HandshakeCallback<mio::net::TcpStream> =
            Box::new(move |socket, result| {
                let parked = tls::extract_handshaking(socket);
                match (result, parked) {
                    (Ok(()), Some(socket)) => accept_callback(Ok(socket)),
                    (Ok(()), None) => {}
                    (Err(status), parked) => {
                        drop(parked);
                        accept_callback(Err(status));
                    }
                }
            });
        let socket = Reactor::get().add(move |token| {
            Ok(Box::new(TlsSocket::new(token, stream, conn.into(), handshake)))
        });
        match socket {
            Ok(socket) => {
                tls::park_handshaking(socket.clone());
                socket.start_handshake(self.handshake_timeout);
            }
            Err(status) => (self.callback)(Err(status)),
        }
    }
}

impl EventTarget for TlsListener {
    fn token(&self) -> Token {
        self.token
    }

    fn register(&self, registry: &Registry) -> std::io::Result<()> {
        let mut inner = lock(&self.inner);
        match inner.as_mut() {
            Some(listener) => registry.register(listener, self.token, Interest::READABLE),
            None => Err(std::io::Error::from(ErrorKind::NotConnected)),
        }
    }

    fn on_error(&self) {
        self.close();
        (self.callback)(Err(Status::aborted("socket shutdown")));
    }

    fn on_input(&self) {
        match self.accept_all() {
            Ok(streams) => {
                for stream in streams {
                    self.start_accepted(stream);
                }
            }
            Err(status) => (self.callback)(Err(status)),
        }
    }

    fn on_output(&self) {
        // Nothing to do here.
    }
}

unsafe impl RefCounted for TlsListener {
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
        self.close();
        Reactor::get()
            .destroy(self.token, self)
            .map(|target| Box::new(target) as Reclaimed)
    }
}

impl fmt::Debug for TlsListener {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TlsListener")
            .field("address", &self.address)
            .field("port", &self.port)
            .field("open", &self.is_open())
            .finish()
    }
}

// Creates a dual-stack, non-blocking, close-on-exec AF_INET6 listener.
// Returns the mio listener and the actual bound port.
fn create_inet_listener(address: &str, port: u16) -> Result<(mio::net::TcpListener, u16)> {
    let ip: Ipv6Addr = if address.is_empty() {
        Ipv6Addr::UNSPECIFIED
    } else {
        address
            .parse()
            .map_err(|_| Status::invalid_argument(format!("invalid address: {address:?}")))?
    };
    let socket = socket2::Socket::new(
        socket2::Domain::IPV6,
        socket2::Type::STREAM,
        Some(socket2::Protocol::TCP),
    )
    .map_err(|error| Status::from_io(error, "socket(AF_INET6, SOCK_STREAM)"))?;
    socket
        .set_only_v6(false)
        .map_err(|error| Status::from_io(error, "setsockopt(IPPROTO_IPV6, IPV6_V6ONLY, 0)"))?;
    socket
        .set_cloexec(true)
        .map_err(|error| Status::from_io(error, "fcntl(FD_CLOEXEC)"))?;
    socket
        .set_nonblocking(true)
        .map_err(|error| Status::from_io(error, "fcntl(O_NONBLOCK)"))?;
    let bind_address = SocketAddr::V6(SocketAddrV6::new(ip, port, 0, 0));
    socket
        .bind(&bind_address.into())
        .map_err(|error| Status::from_io(error, "bind"))?;
    socket
        .listen(libc::SOMAXCONN)
        .map_err(|error| Status::from_io(error, "listen"))?;
    let local_port = socket
        .local_addr()
        .ok()
        .and_then(|address| address.as_socket())
        .map(|address| address.port())
        .unwrap_or(port);
    let listener: std::net::TcpListener = socket.into();
    Ok((mio::net::TcpListener::from_std(listener), local_port))
}
