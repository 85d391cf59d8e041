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

//! The HTTP/2 server: listener wiring, the connection set, and the request
//! handler registry.
//!
//! The listener sockets are dual-stack, so the server is reachable over
//! both IPv4 and IPv6. Every accepted connection becomes a
//! [`Channel`] retained in the server's connection set until it shuts
//! down.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::{Arc, Condvar, Mutex, Weak};
use std::time::Duration;

use crate::http2::channel::{Channel, ChannelManager};
use crate::http2::handler::Handler;
use crate::http2::ChannelOptions;
use crate::net::listener::{AcceptCallback, TcpListener, TlsAcceptCallback, TlsListener};
use crate::net::socket::AsyncStream;
use crate::net::{SocketOptions, DEFAULT_HANDSHAKE_TIMEOUT};
use crate::refcount::RefPtr;
use crate::status::{Result, Status};
use crate::sync::{lock, wait};

/// The request handlers of a server, keyed by path.
#[derive(Default)]
pub struct HandlerSet {
    map: BTreeMap<String, Arc<dyn Handler>>,
}

impl HandlerSet {
    /// Creates an empty set.
    pub fn new() -> HandlerSet {
        HandlerSet::default()
    }

    /// Registers a handler for `path`. Duplicate registration is an
    /// `AlreadyExists` error.
    pub fn register(&mut self, path: impl Into<String>, handler: Arc<dyn Handler>) -> Result<()> {
        let path = path.into();
        if self.map.contains_key(&path) {
            return Err(Status::already_exists(path));
        }
        self.map.insert(path, handler);
        Ok(())
    }
}

impl fmt::Debug for HandlerSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.map.keys()).finish()
    }
}

/// Configuration of a [`Server`].
#[derive(Clone)]
pub struct ServerOptions {
    /// Local address to bind; an empty string means `in6addr_any`.
    pub address: String,
    /// TCP port to bind; 0 picks a free port.
    pub port: u16,
    /// Serve TLS with this configuration; `None` serves plaintext.
    pub tls: Option<Arc<rustls::ServerConfig>>,
    /// Options applied to every accepted connection.
    pub socket_options: SocketOptions,
    /// Per-connection HTTP/2 tunables.
    pub channel_options: ChannelOptions,
    /// TLS handshake timeout (ignored for plaintext servers).
    pub handshake_timeout: Duration,
}

impl Default for ServerOptions {
    fn default() -> Self {
        Self {
            address: String::new(),
            port: 0,
            tls: None,
            socket_options: SocketOptions::default(),
            channel_options: ChannelOptions::default(),
            handshake_timeout: DEFAULT_HANDSHAKE_TIMEOUT,
        }
    }
}

impl fmt::Debug for ServerOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServerOptions")
            .field("address", &self.address)
            .field("port", &self.port)
            .field("tls", &self.tls.is_some())
            .field("socket_options", &self.socket_options)
            .field("channel_options", &self.channel_options)
            .finish()
    }
}

enum ListenerHold {
    Tcp(RefPtr<TcpListener>),
    Tls(RefPtr<TlsListener>),
}

/// An HTTP/2 server.
pub struct Server {
    handlers: HandlerSet,
    channel_options: ChannelOptions,
    channels: Mutex<HashMap<usize, Arc<Channel>>>,
    termination: Mutex<Option<Status>>,
    terminated: Condvar,
    binding: Mutex<(String, u16)>,
    listener: Mutex<Option<ListenerHold>>,
}

impl Server {
    /// Creates a server bound per `options`, serving `handlers`.
    pub fn create(options: ServerOptions, handlers: HandlerSet) -> Result<Arc<Server>> {
        let server = Arc::new(Server {
            handlers,
            channel_options: options.channel_options,
            channels: Mutex::new(HashMap::new()),
            termination: Mutex::new(None),
            terminated: Condvar::new(),
            binding: Mutex::new((String::new(), 0)),
            listener: Mutex::new(None),
        });
        server.listen(&options)?;
        Ok(server)
    }

    /// Returns the local address and TCP port the server is bound to. An
    /// empty address indicates `in6addr_any`.
    pub fn local_binding(&self) -> (String, u16) {
        lock(&self.binding).clone()
    }

    /// Blocks until the server terminates and returns the final status: an
    /// error if the listener failed, OK for an orderly shutdown.
    pub fn wait_for_termination(&self) -> Result<()> {
        let mut termination = lock(&self.termination);
        loop {
            if let Some(status) = termination.clone() {
                if status.kind() == crate::status::StatusKind::Cancelled {
                    return Ok(());
                }
                return Err(status);
            }
            termination = wait(&self.terminated, termination);
        }
    }

    /// Stops accepting connections and wakes
    /// [`wait_for_termination`](Server::wait_for_termination) callers with
    /// an OK status. Established connections keep running.
    pub fn shutdown(&self) {
        if let Some(hold) = lock(&self.listener).as_ref() {
            match hold {
                ListenerHold::Tcp(listener) => {
                    listener.close();
                }
                ListenerHold::Tls(listener) => {
                    listener.close();
                }
            }
        }
        self.terminate(Status::cancelled("server shutdown"));
    }

    pub(crate) fn channel_count(&self) -> usize {
        lock(&self.channels).len()
    }

    fn terminate(&self, status: Status) {
        let mut termination = lock(&self.termination);
        if termination.is_none() {
            *termination = Some(status);
            self.terminated.notify_all();
        }
    }

    fn listen(self: &Arc<Self>, options: &ServerOptions) -> Result<()> {
        match &options.tls {
            Some(config) => {
                let weak = Arc::downgrade(self);
                let callback: TlsAcceptCallback = Arc::new(move |result| {
                    if let Some(server) = weak.upgrade() {
                        server.accept(result.map(|socket| RefPtr::<dyn AsyncStream>::new(&*socket)));
                    }
                });
                let listener = TlsListener::bind(
                    &options.address,
                    options.port,
                    options.socket_options.clone(),
                    Arc::clone(config),
                    options.handshake_timeout,
                    callback,
                )?;
                *lock(&self.binding) = (listener.address().to_owned(), listener.port());
                *lock(&self.listener) = Some(ListenerHold::Tls(listener));
            }
            None => {
                let weak = Arc::downgrade(self);
                let callback: AcceptCallback<mio::net::TcpStream> = Box::new(move |result| {
                    if let Some(server) = weak.upgrade() {
                        server.accept(result.map(|socket| RefPtr::<dyn AsyncStream>::new(&*socket)));
                    }
                });
                let listener = TcpListener::bind(
                    &options.address,
                    options.port,
                    options.socket_options.clone(),
                    callback,
                )?;
                *lock(&self.binding) = (listener.address().to_owned(), listener.port());
                *lock(&self.listener) = Some(ListenerHold::Tcp(listener));
            }
        }
        Ok(())
    }

    fn accept(self: &Arc<Self>, result: Result<RefPtr<dyn AsyncStream>>) {
        match result {
            Ok(stream) => {
                let manager = Arc::downgrade(self) as Weak<dyn ChannelManager>;
                let channel = Channel::new(stream, manager, self.channel_options);
                lock(&self.channels).insert(Arc::as_ptr(&channel) as usize, Arc::clone(&channel));
                channel.start_server();
            }
            Err(status) => {
                log::error!("failed to accept HTTP/2 connection: {status}");
                let listener_open = match lock(&self.listener).as_ref() {
                    Some(ListenerHold::Tcp(listener)) => listener.is_open(),
                    Some(ListenerHold::Tls(listener)) => listener.is_open(),
                    None => false,
                };
                if !listener_open {
                    self.terminate(status);
                }
            }
        }
    }
}

impl ChannelManager for Server {
    fn remove_channel(&self, channel: &Channel) {
        lock(&self.channels).remove(&(channel as *const Channel as usize));
    }

    fn handler(&self, path: &str) -> Result<Arc<dyn Handler>> {
        self.handlers
            .map
            .get(path)
            .cloned()
            .ok_or_else(|| Status::not_found(path.to_owned()))
    }
}

impl fmt::Debug for Server {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Server")
            .field("binding", &self.local_binding())
            .field("handlers", &self.handlers)
            .field("channels", &self.channel_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http2::frame::{
        FrameHeader, FrameType, CLIENT_PREFACE, FLAG_ACK, FRAME_HEADER_SIZE, PING_PAYLOAD_SIZE,
        SETTINGS_ENTRY_SIZE,
    };
    use crate::http2::handler::{Request, ServerStream};
    use crate::net::socket::tests::{sync_read, sync_write};
    use crate::net::tls::tests::{test_client_config, test_server_config};
    use crate::net::tls::TlsTcpSocket;
    use crate::net::LOCALHOST;
    use crate::status::StatusKind;
    use bytes::BytesMut;
    use std::io::{Read, Write};
    use std::time::Duration;

    struct NullHandler;

    impl Handler for NullHandler {
        fn handle(&self, _stream: &mut dyn ServerStream, _request: &Request) {}
    }

    #[test]
    fn duplicate_handler_registration_fails() {
        let mut handlers = HandlerSet::new();
        handlers.register("/healthz", Arc::new(NullHandler)).unwrap();
        let status = handlers
            .register("/healthz", Arc::new(NullHandler))
            .unwrap_err();
        assert_eq!(status.kind(), StatusKind::AlreadyExists);
    }

    #[test]
    fn unknown_path_is_not_found() {
        let server = Server::create(
            ServerOptions {
                address: LOCALHOST.to_owned(),
                ..ServerOptions::default()
            },
            HandlerSet::new(),
        )
        .unwrap();
        let status = server.handler("/nope").unwrap_err();
        assert_eq!(status.kind(), StatusKind::NotFound);
    }

    #[test]
    fn plaintext_end_to_end_handshake() {
        let server = Server::create(
            ServerOptions {
                address: LOCALHOST.to_owned(),
                ..ServerOptions::default()
            },
            HandlerSet::new(),
        )
        .unwrap();
        let (_, port) = server.local_binding();
        assert_ne!(port, 0);

        let mut client = std::net::TcpStream::connect((LOCALHOST, port)).unwrap();
        client
            .set_read_timeout(Some(Duration::from_secs(10)))
            .unwrap();
        client.write_all(CLIENT_PREFACE).unwrap();

        let mut settings = vec![0u8; FRAME_HEADER_SIZE + 5 * SETTINGS_ENTRY_SIZE];
        client.read_exact(&mut settings).unwrap();
        let header = FrameHeader::decode(&settings);
        assert_eq!(header.frame_type(), Some(FrameType::Settings));
        assert_eq!(header.length as usize, 5 * SETTINGS_ENTRY_SIZE);

        let ack = FrameHeader::new(FrameType::Settings, FLAG_ACK, 0, 0);
        client.write_all(&ack.encode()).unwrap();

        // The channel must be retained in the server's connection set.
        for _ in 0..50 {
            if server.channel_count() == 1 {
                break;
            }
            std::thread::sleep(Duration::from_millis(20));
        }
        assert_eq!(server.channel_count(), 1);

        // PING round-trip through the whole stack.
        let ping = FrameHeader::new(FrameType::Ping, 0, 0, PING_PAYLOAD_SIZE as u32);
        client.write_all(&ping.encode()).unwrap();
        client.write_all(&0x7110400071104000u64.to_be_bytes()).unwrap();
        let mut reply = vec![0u8; FRAME_HEADER_SIZE + PING_PAYLOAD_SIZE];
        client.read_exact(&mut reply).unwrap();
        let header = FrameHeader::decode(&reply);
        assert_eq!(header.frame_type(), Some(FrameType::Ping));
        assert_eq!(header.flags, FLAG_ACK);
        assert_eq!(
            &reply[FRAME_HEADER_SIZE..],
            &0x7110400071104000u64.to_be_bytes()[..]
        );
    }

    #[test]
    fn tls_end_to_end_handshake() {
        let server = Server::create(
            ServerOptions {
                address: LOCALHOST.to_owned(),
                tls: Some(test_server_config()),
                ..ServerOptions::default()
            },
            HandlerSet::new(),
        )
        .unwrap();
        let (_, port) = server.local_binding();

        let (connect_tx, connect_rx) = crossbeam_channel::bounded(1);
        let client = TlsTcpSocket::connect(
            LOCALHOST,
            port,
            &SocketOptions::default(),
            test_client_config(),
            rustls::pki_types::ServerName::try_from("localhost".to_owned()).unwrap(),
            Duration::from_secs(30),
            Box::new(move |result| {
                let _ = connect_tx.send(result);
            }),
        )
        .unwrap();
        connect_rx
            .recv_timeout(Duration::from_secs(10))
            .unwrap()
            .unwrap();

        sync_write(&*client, CLIENT_PREFACE).unwrap();
        let settings = sync_read(&*client, FRAME_HEADER_SIZE + 5 * SETTINGS_ENTRY_SIZE).unwrap();
        let header = FrameHeader::decode(&settings);
        assert_eq!(header.frame_type(), Some(FrameType::Settings));

        let mut ack = BytesMut::new();
        ack.extend_from_slice(&FrameHeader::new(FrameType::Settings, FLAG_ACK, 0, 0).encode());
        sync_write(&*client, &ack).unwrap();

        let ping = FrameHeader::new(FrameType::Ping, 0, 0, PING_PAYLOAD_SIZE as u32);
        let mut frame = BytesMut::new();
        frame.extend_from_slice(&ping.encode());
        frame.extend_from_slice(&0x7110400071104000u64.to_be_bytes());
        sync_write(&*client, &frame).unwrap();
        let reply = sync_read(&*client, FRAME_HEADER_SIZE + PING_PAYLOAD_SIZE).unwrap();
        let header = FrameHeader::decode(&reply);
        assert_eq!(header.frame_type(), Some(FrameType::Ping));
        assert_eq!(header.flags, FLAG_ACK);
    }

    #[test]
    fn shutdown_terminates_waiters() {
        let server = Server::create(
            ServerOptions {
                address: LOCALHOST.to_owned(),
                ..ServerOptions::default()
            },
            HandlerSet::new(),
        )
        .unwrap();
        let waiter = {
            let server = Arc::clone(&server);
            std::thread::spawn(move || server.wait_for_termination())
        };
        std::thread::sleep(Duration::from_millis(50));
        server.shutdown();
        waiter.join().unwrap().unwrap();
    }
}
