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

//! The per-connection outbound frame serializer.
//!
//! At most one write is outstanding on the socket at any time; further
//! frames queue up and are written in order as previous writes complete.
//! GOAWAY uses the head-skipping append so it still goes out promptly on a
//! busy connection. A write failure closes the socket. Every write carries
//! the connection's I/O timeout.

use std::collections::VecDeque;
use std::fmt;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use bytes::Bytes;

use crate::net::socket::AsyncStream;
use crate::refcount::RefPtr;
use crate::sync::lock;

/// Callback invoked once the frame it was enqueued with has been fully
/// transmitted.
pub type FrameCallback = Box<dyn FnOnce() + Send>;

struct Inner {
    writing: bool,
    frames: VecDeque<(Bytes, Option<FrameCallback>)>,
}

struct Shared {
    socket: RefPtr<dyn AsyncStream>,
    io_timeout: Duration,
    inner: Mutex<Inner>,
}

/// Serializes outbound frames onto a socket. See the module documentation.
pub struct WriteQueue {
    shared: Arc<Shared>,
}

impl WriteQueue {
    /// Creates a queue writing to `socket` with the given per-write
    /// timeout.
    pub fn new(socket: RefPtr<dyn AsyncStream>, io_timeout: Duration) -> WriteQueue {
        WriteQueue {
            shared: Arc::new(Shared {
                socket,
                io_timeout,
                inner: Mutex::new(Inner {
                    writing: false,
                    frames: VecDeque::new(),
                }),
            }),
        }
    }

    /// Enqueues a frame at the tail.
    pub fn append_frame(&self, buffer: Bytes) {
        self.shared.append(buffer, None, false);
    }

    /// Enqueues a frame at the tail; `callback` runs once it has been
    /// written out.
    pub fn append_frame_with(&self, buffer: Bytes, callback: FrameCallback) {
        self.shared.append(buffer, Some(callback), false);
    }

    /// Enqueues a batch of frames atomically, preserving their order.
    pub fn append_frames(&self, buffers: Vec<Bytes>) {
        self.shared.append_many(buffers);
    }

    /// Enqueues a frame at the head, ahead of everything not yet on the
    /// socket. Used for GOAWAY.
    pub fn append_frame_skipping_queue(&self, buffer: Bytes) {
        self.shared.append(buffer, None, true);
    }

    /// Head-skipping append with a completion callback.
    pub fn append_frame_skipping_queue_with(&self, buffer: Bytes, callback: FrameCallback) {
        self.shared.append(buffer, Some(callback), true);
    }
}

impl Drop for Shared {
    fn drop(&mut self) {
        self.socket.close();
    }
}

impl fmt::Debug for WriteQueue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = lock(&self.shared.inner);
        f.debug_struct("WriteQueue")
            .field("writing", &inner.writing)
            .field("queued", &inner.frames.len())
            .finish()
    }
}

impl Shared {
    fn append(self: &Arc<Self>, buffer: Bytes, callback: Option<FrameCallback>, front: bool) {
        {
            let mut inner = lock(&self.inner);
            if inner.writing {
                if front {
                    inner.frames.push_front((buffer, callback));
                } else {
                    inner.frames.push_back((buffer, callback));
                }
                return;
            }
            inner.writing = true;
        }
        self.write(buffer, callback);
    }

    fn append_many(self: &Arc<Self>, buffers: Vec<Bytes>) {
        let mut buffers = buffers.into_iter();
        let Some(first) = buffers.next() else {
            return;
        };
        {
            let mut inner = lock(&self.inner);
            if inner.writing {
                inner.frames.push_back((first, None));
                for buffer in buffers {
                    inner.frames.push_back((buffer, None));
                }
                return;
            }
            for buffer in buffers {
                inner.frames.push_back((buffer, None));
            }
            inner.writing = true;
        }
        self.write(first, None);
    }

    fn write(self: &Arc<Self>, buffer: Bytes, callback: Option<FrameCallback>) {
        let this = Arc::clone(self);
        let status = self.socket.write_with_timeout(
            buffer,
            Box::new(move |status| {
                if status.is_err() {
                    this.socket.close();
                    return;
                }
                if let Some(callback) = callback {
                    callback();
                }
                let (next, next_callback) = {
                    let mut inner = lock(&this.inner);
                    match inner.frames.pop_front() {
                        Some(frame) => frame,
                        None => {
                            inner.writing = false;
                            return;
                        }
                    }
                };
                this.write(next, next_callback);
            }),
            self.io_timeout,
        );
        if status.is_err() {
            self.socket.close();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::net::socket::tests::sync_read;
    use crate::net::socket::UnixSocket;

    fn make_queue() -> (WriteQueue, RefPtr<UnixSocket>) {
        let (first, second) = UnixSocket::pair().unwrap();
        let stream = RefPtr::<dyn AsyncStream>::new(&*first);
        (WriteQueue::new(stream, Duration::from_secs(60)), second)
    }

    #[test]
    fn write_notifies_callback() {
        let (queue, peer) = make_queue();
        let (sender, receiver) = crossbeam_channel::bounded(1);
        queue.append_frame_with(
            Bytes::from_static(b"01234567890123456789"),
            Box::new(move || {
                let _ = sender.send(());
            }),
        );
        assert_eq!(
            &sync_read(&*peer, 20).unwrap()[..],
            b"01234567890123456789"
        );
        receiver.recv_timeout(Duration::from_secs(5)).unwrap();
    }

    #[test]
    fn write_without_callback() {
        let (queue, peer) = make_queue();
        queue.append_frame(Bytes::from_static(b"01234567890123456789"));
        assert_eq!(
            &sync_read(&*peer, 20).unwrap()[..],
            b"01234567890123456789"
        );
    }

    #[test]
    fn two_appends_preserve_order() {
        let (queue, peer) = make_queue();
        queue.append_frame(Bytes::from_static(b"01234567890123456789"));
        queue.append_frame(Bytes::from_static(b"9876543210"));
        assert_eq!(
            &sync_read(&*peer, 30).unwrap()[..],
            b"012345678901234567899876543210"
        );
    }

    #[test]
    fn batch_append_of_nothing() {
        let (queue, peer) = make_queue();
        queue.append_frames(Vec::new());
        queue.append_frame(Bytes::from_static(b"abcdef"));
        assert_eq!(&sync_read(&*peer, 6).unwrap()[..], b"abcdef");
    }

    #[test]
    fn batch_append_of_one() {
        let (queue, peer) = make_queue();
        queue.append_frames(vec![Bytes::from_static(b"9876543210")]);
        queue.append_frame(Bytes::from_static(b"abcdef"));
        assert_eq!(&sync_read(&*peer, 16).unwrap()[..], b"9876543210abcdef");
    }

    #[test]
    fn batch_append_of_two() {
        let (queue, peer) = make_queue();
        queue.append_frames(vec![
            Bytes::from_static(b"01234567890123456789"),
            Bytes::from_static(b"9876543210"),
        ]);
        queue.append_frame(Bytes::from_static(b"abcdef"));
        assert_eq!(
            &sync_read(&*peer, 36).unwrap()[..],
            b"012345678901234567899876543210abcdef"
        );
    }

    #[test]
    fn write_failure_closes_the_socket() {
        let (first, second) = UnixSocket::pair().unwrap();
        let stream = RefPtr::<dyn AsyncStream>::new(&*first);
        let queue = WriteQueue::new(stream, Duration::from_secs(60));
        second.close();
        first.close();
        queue.append_frame(Bytes::from_static(b"01234567890123456789"));
        assert!(!first.is_open());
    }

    #[test]
    fn head_skipping_append() {
        let (queue, peer) = make_queue();
        queue.append_frame(Bytes::from_static(b"01234567890123456789"));
        queue.append_frame_skipping_queue(Bytes::from_static(b"9876543210"));
        let data = sync_read(&*peer, 30).unwrap();
        assert!(
            &data[..] == b"012345678901234567899876543210"
                || &data[..] == b"987654321001234567890123456789"
        );
    }
}
