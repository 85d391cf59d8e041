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

//! The process-wide I/O reactor.
//!
//! One thread owns the [`mio::Poll`] instance (edge-triggered on epoll
//! platforms) and fans readiness out over a channel to a fixed pool of
//! dispatch workers, which look the socket up and run its readiness
//! handlers. All sockets are created through the reactor and live in its
//! registry until the last handle to them is dropped.
//!
//! The reactor is instantiated lazily and never destroyed: unblocking the
//! poll thread for an orderly shutdown would need a signal protocol, and a
//! server with a dead reactor cannot do anything useful anyway, so the
//! workers simply run forever.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Mutex, OnceLock};
use std::thread;

use crossbeam_channel::{Receiver, Sender};
use mio::{Events, Poll, Registry, Token};
use slab::Slab;

use crate::refcount::{RefCounted, RefPtr};
use crate::status::{Result, Status};
use crate::sync::lock;

/// Default size of the reactor's dispatch worker pool.
#[cfg(not(debug_assertions))]
pub const DEFAULT_IO_WORKERS: u16 = 10;

/// Default size of the reactor's dispatch worker pool.
#[cfg(debug_assertions)]
pub const DEFAULT_IO_WORKERS: u16 = 1;

const MAX_EVENTS: usize = 1024;

/// Reactor configuration. Apply with [`Reactor::init`] before the first
/// [`Reactor::get`] call.
#[derive(Debug, Clone, Copy)]
pub struct ReactorOptions {
    /// Number of dispatch worker threads. Must be > 0.
    pub num_workers: u16,
}

impl Default for ReactorOptions {
    fn default() -> Self {
        Self {
            num_workers: DEFAULT_IO_WORKERS,
        }
    }
}

/// A socket registered in the reactor.
///
/// Readiness handlers are invoked from the dispatch workers; they must
/// acquire the target's own mutex, drain until `WouldBlock`, and release it
/// before running user callbacks.
pub(crate) trait EventTarget: RefCounted + Send + Sync {
    /// The token this target was registered under.
    fn token(&self) -> Token;

    /// Registers the target's event source with the poll registry.
    fn register(&self, registry: &Registry) -> std::io::Result<()>;

    /// Called on `EPOLLERR`-class readiness.
    fn on_error(&self);

    /// Called when the file descriptor may be readable.
    fn on_input(&self);

    /// Called when the file descriptor may be writable.
    fn on_output(&self);
}

struct Dispatch {
    target: RefPtr<dyn EventTarget>,
    error: bool,
    readable: bool,
    writable: bool,
}

struct Targets {
    // Live targets, indexed by token. A target is in `live` or `dead`,
    // never both.
    live: Slab<Box<dyn EventTarget>>,
    // Killed targets still referenced from outside, keyed by address.
    dead: HashMap<usize, Box<dyn EventTarget>>,
}

/// The process-wide reactor. See the module documentation.
pub struct Reactor {
    registry: Registry,
    num_workers: u16,
    targets: Mutex<Targets>,
    dispatch: Sender<Dispatch>,
}

static OPTIONS: OnceLock<ReactorOptions> = OnceLock::new();
static INSTANCE: OnceLock<&'static Reactor> = OnceLock::new();

fn target_key(target: &dyn EventTarget) -> usize {
    target as *const dyn EventTarget as *const () as usize
}

impl Reactor {
    /// Configures the reactor. Fails if the reactor has already been
    /// instantiated (options are consulted exactly once).
    pub fn init(options: ReactorOptions) -> Result<()> {
        assert!(options.num_workers > 0, "reactor needs at least 1 worker");
        OPTIONS
            .set(options)
            .map_err(|_| Status::failed_precondition("the reactor is already running"))
    }

    /// Returns the singleton instance, starting its threads on first use.
    pub fn get() -> &'static Reactor {
        INSTANCE.get_or_init(|| {
            let options = *OPTIONS.get_or_init(ReactorOptions::default);
            let poll = Poll::new().expect("failed to create poll instance");
            let registry = poll
                .registry()
                .try_clone()
                .expect("failed to clone poll registry");
            let (sender, receiver) = crossbeam_channel::unbounded();
            let reactor: &'static Reactor = Box::leak(Box::new(Reactor {
                registry,
                num_workers: options.num_workers,
                targets: Mutex::new(Targets {
                    live: Slab::new(),
                    dead: HashMap::new(),
                }),
                dispatch: sender,
            }));
            reactor.start(poll, receiver);
            reactor
        })
    }

    pub(crate) fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Creates a target and registers it. `build` receives the token the
    /// target will be dispatched under.
    pub(crate) fn add<T, F>(&self, build: F) -> Result<RefPtr<T>>
    where
        T: EventTarget + 'static,
        F: FnOnce(Token) -> Result<Box<T>>,
    {
        let handle = {
            let mut targets = lock(&self.targets);
            let entry = targets.live.vacant_entry();
            let token = Token(entry.key());
            let target = build(token)?;
            let handle = RefPtr::new(&*target);
            entry.insert(target);
            handle
        };
        // On failure the handle is dropped right here and the last-ref
        // protocol removes the target again.
        handle
            .register(&self.registry)
            .map_err(|error| Status::from_io(error, "register"))?;
        Ok(handle)
    }

    /// Moves a target from the live set to the dead set. No further
    /// readiness is dispatched to it. Called by targets closing their file
    /// descriptor.
    pub(crate) fn kill(&self, token: Token) {
        let mut targets = lock(&self.targets);
        if targets.live.contains(token.0) {
            let target = targets.live.remove(token.0);
            let key = target_key(target.as_ref());
            targets.dead.insert(key, target);
        } else {
            log::error!("token {} not found among live sockets", token.0);
        }
    }

    /// Extracts a target whose last handle was dropped so the caller can
    /// destroy it outside the reactor lock. Returns `None` if the target
    /// was re-referenced concurrently; the next release to zero retries.
    pub(crate) fn destroy(
        &self,
        token: Token,
        target: &dyn EventTarget,
    ) -> Option<Box<dyn EventTarget>> {
        let key = target_key(target);
        let mut targets = lock(&self.targets);
        if let Some(dead) = targets.dead.get(&key) {
            if dead.is_referenced() {
                return None;
            }
            return targets.dead.remove(&key);
        }
        match targets.live.get(token.0) {
            Some(live) if target_key(live.as_ref()) == key && !live.is_referenced() => {
                targets.live.try_remove(token.0)
            }
            _ => None,
        }
    }

    fn lookup(&self, token: Token) -> Option<RefPtr<dyn EventTarget>> {
        let targets = lock(&self.targets);
        targets
            .live
            .get(token.0)
            .map(|target| RefPtr::new(&**target))
    }

    fn start(&'static self, poll: Poll, receiver: Receiver<Dispatch>) {
        for index in 0..self.num_workers {
            let receiver = receiver.clone();
            thread::Builder::new()
                .name(format!("reactor-worker-{index}"))
                .spawn(move || worker_loop(&receiver))
                .expect("failed to spawn reactor worker");
        }
        thread::Builder::new()
            .name("reactor-poll".to_owned())
            .spawn(move || self.poll_loop(poll))
            .expect("failed to spawn reactor poll thread");
    }

    fn poll_loop(&'static self, mut poll: Poll) {
        let mut events = Events::with_capacity(MAX_EVENTS);
        loop {
            match poll.poll(&mut events, None) {
                Ok(()) => {}
                Err(error) if error.kind() == std::io::ErrorKind::Interrupted => continue,
                Err(error) => {
                    log::error!("failed to poll for events: {error}");
                    return;
                }
            }
            for event in events.iter() {
                let Some(target) = self.lookup(event.token()) else {
                    continue;
                };
                let dispatch = Dispatch {
                    target,
                    error: event.is_error(),
                    readable: event.is_readable() || event.is_read_closed(),
                    writable: event.is_writable() || event.is_write_closed(),
                };
                if self.dispatch.send(dispatch).is_err() {
                    return;
                }
            }
        }
    }
}

fn worker_loop(receiver: &Receiver<Dispatch>) {
    while let Ok(event) = receiver.recv() {
        if event.error {
            event.target.on_error();
        } else {
            if event.readable {
                event.target.on_input();
            }
            if event.writable {
                event.target.on_output();
            }
        }
    }
}

impl fmt::Debug for Reactor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let targets = lock(&self.targets);
        f.debug_struct("Reactor")
            .field("num_workers", &self.num_workers)
            .field("live", &targets.live.len())
            .field("dead", &targets.dead.len())
            .finish()
    }
}
