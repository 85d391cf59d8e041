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

//! Intrusive reference counting.
//!
//! [`RefPtr`] behaves much like `Arc` except that it defers all reference
//! counting to the pointee rather than allocating a control block of its
//! own. The pointee decides what happens when the count drops to zero: I/O
//! objects hand their storage back to the reactor for destruction, while
//! [`BlockingRefCounted`] objects stay owned by their creator and block that
//! owner's drop until every handle is gone.

use std::any::Any;
use std::fmt;
use std::ops::Deref;
use std::ptr::NonNull;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Condvar, Mutex};

use crate::sync::{lock, wait};

/// Storage reclaimed by [`RefCounted::on_last_ref`], dropped by the
/// [`RefPtr`] that observed the count reach zero, after the hook returns.
pub type Reclaimed = Box<dyn Any + Send>;

/// A type that manages its own reference count.
///
/// # Safety
///
/// Implementations must guarantee that the object remains valid for as long
/// as its count is positive: memory backing an object with a positive count
/// must not be freed or reused. [`RefPtr`] relies on this to hand out `&T`
/// for the lifetime of a handle.
pub unsafe trait RefCounted {
    /// Increments the reference count.
    fn retain(&self);

    /// Decrements the reference count, returning true iff it reached zero.
    /// Decrementing a zero count is a programming error.
    fn release(&self) -> bool;

    /// Returns true iff the reference count is positive.
    fn is_referenced(&self) -> bool;

    /// Invoked by the [`RefPtr`] whose release dropped the count to zero.
    ///
    /// The object owner may use this to reclaim the object's storage: any
    /// returned box is dropped by the caller once no reference into the
    /// object remains. The count can concurrently become positive again (a
    /// registry handing out a new handle under its own lock), in which case
    /// the implementation must return `None` and the hook runs again on the
    /// next release to zero.
    fn on_last_ref(&self) -> Option<Reclaimed> {
        None
    }
}

/// A smart pointer to an intrusively reference-counted object.
///
/// The handle retains on construction and clone, releases on drop, and is
/// safe to move across threads. It never allocates.
pub struct RefPtr<T: RefCounted + ?Sized> {
    ptr: NonNull<T>,
}

impl<T: RefCounted + ?Sized> RefPtr<T> {
    /// Wraps `target` in a new handle, incrementing its count.
    ///
    /// To hand out trait-object handles, coerce at construction:
    /// `RefPtr::<dyn Trait>::new(&*concrete)`.
    pub fn new(target: &T) -> Self {
        target.retain();
        Self {
            ptr: NonNull::from(target),
        }
    }

    /// Returns the raw pointer without touching the count.
    pub fn as_ptr(&self) -> *const T {
        self.ptr.as_ptr()
    }

    /// Returns true iff both handles point at the same object.
    pub fn ptr_eq(&self, other: &Self) -> bool {
        std::ptr::eq(
            self.ptr.as_ptr() as *const (),
            other.ptr.as_ptr() as *const (),
        )
    }
}

impl<T: RefCounted + ?Sized> Deref for RefPtr<T> {
    type Target = T;

    fn deref(&self) -> &T {
        // The positive count guaranteed by this handle keeps the pointee
        // valid (see the RefCounted safety contract).
        unsafe { self.ptr.as_ref() }
    }
}

impl<T: RefCounted + ?Sized> Clone for RefPtr<T> {
    fn clone(&self) -> Self {
        self.retain();
        Self { ptr: self.ptr }
    }
}

impl<T: RefCounted + ?Sized> Drop for RefPtr<T> {
    fn drop(&mut self) {
        let reclaimed = {
            let target = unsafe { self.ptr.as_ref() };
            if target.release() {
                target.on_last_ref()
            } else {
                None
            }
        };
        drop(reclaimed);
    }
}

unsafe impl<T: RefCounted + Send + Sync + ?Sized> Send for RefPtr<T> {}
unsafe impl<T: RefCounted + Send + Sync + ?Sized> Sync for RefPtr<T> {}

impl<T: RefCounted + ?Sized> fmt::Debug for RefPtr<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("RefPtr").field(&self.ptr).finish()
    }
}

/// A plain atomic reference count, for objects whose storage outlives the
/// count by construction (registry-owned I/O objects).
#[derive(Debug, Default)]
pub struct RefCount {
    count: AtomicUsize,
}

impl RefCount {
    /// Creates a zero count.
    pub const fn new() -> Self {
        Self {
            count: AtomicUsize::new(0),
        }
    }

    /// Increments the count.
    pub fn increment(&self) {
        self.count.fetch_add(1, Ordering::AcqRel);
    }

    /// Decrements the count and returns true iff it reached zero.
    ///
    /// Panics if the count is already zero.
    pub fn decrement(&self) -> bool {
        let previous = self.count.fetch_sub(1, Ordering::AcqRel);
        assert!(previous > 0, "reference count underflow");
        previous == 1
    }

    /// Returns the current count.
    pub fn get(&self) -> usize {
        self.count.load(Ordering::Acquire)
    }

    /// Returns true iff the count is positive.
    pub fn is_referenced(&self) -> bool {
        self.get() > 0
    }
}

/// A reference count whose owner can block until it reaches zero.
#[derive(Debug, Default)]
pub struct BlockingRefCount {
    count: Mutex<usize>,
    zero: Condvar,
}

impl BlockingRefCount {
    /// Creates a zero count.
    pub fn new() -> Self {
        Self::default()
    }

    /// Increments the count.
    pub fn increment(&self) {
        *lock(&self.count) += 1;
    }

    /// Decrements the count and returns true iff it reached zero, waking any
    /// [`wait_zero`](BlockingRefCount::wait_zero) callers.
    ///
    /// Panics if the count is already zero.
    pub fn decrement(&self) -> bool {
        let mut count = lock(&self.count);
        assert!(*count > 0, "reference count underflow");
        *count -= 1;
        if *count == 0 {
            self.zero.notify_all();
            true
        } else {
            false
        }
    }

    /// Returns the current count.
    pub fn get(&self) -> usize {
        *lock(&self.count)
    }

    /// Returns true iff the count is positive.
    pub fn is_referenced(&self) -> bool {
        self.get() > 0
    }

    /// Blocks the caller until the count is zero.
    pub fn wait_zero(&self) {
        let mut count = lock(&self.count);
        while *count > 0 {
            count = wait(&self.zero, count);
        }
    }
}

/// Adds reference counting to a type without deleting-self on last release.
///
/// The owner keeps the wrapped object wherever it likes (stack, static,
/// field) while users hold [`RefPtr`] handles; dropping the wrapper blocks
/// until the count is zero, so no handle can outlive the object. Destruction
/// performance is bounded by the slowest handle holder.
///
/// ```
/// use chronod::refcount::{BlockingRefCounted, RefPtr};
///
/// let object = BlockingRefCounted::new(String::from("payload"));
/// let handle = RefPtr::new(&object);
/// assert_eq!(&**handle, "payload");
/// drop(handle); // without this, dropping `object` would block
/// ```
pub struct BlockingRefCounted<T> {
    refs: BlockingRefCount,
    inner: T,
}

impl<T> BlockingRefCounted<T> {
    /// Wraps `inner`, starting with a zero count.
    pub fn new(inner: T) -> Self {
        Self {
            refs: BlockingRefCount::new(),
            inner,
        }
    }

    /// Returns the current reference count.
    pub fn ref_count(&self) -> usize {
        self.refs.get()
    }
}

impl<T> Deref for BlockingRefCounted<T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.inner
    }
}

impl<T> Drop for BlockingRefCounted<T> {
    fn drop(&mut self) {
        // Runs before the inner value is torn down, so handles never observe
        // a partially destroyed object.
        self.refs.wait_zero();
    }
}

unsafe impl<T> RefCounted for BlockingRefCounted<T> {
    fn retain(&self) {
        self.refs.increment();
    }

    fn release(&self) -> bool {
        self.refs.decrement()
    }

    fn is_referenced(&self) -> bool {
        self.refs.is_referenced()
    }
}

impl<T: fmt::Debug> fmt::Debug for BlockingRefCounted<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BlockingRefCounted")
            .field("ref_count", &self.ref_count())
            .field("inner", &self.inner)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn counts_balance() {
        let object = BlockingRefCounted::new(());
        assert_eq!(object.ref_count(), 0);
        object.retain();
        assert_eq!(object.ref_count(), 1);
        object.retain();
        assert_eq!(object.ref_count(), 2);
        assert!(!object.release());
        assert_eq!(object.ref_count(), 1);
        assert!(object.release());
        assert_eq!(object.ref_count(), 0);
    }

    #[test]
    fn handles_retain_and_release() {
        let object = BlockingRefCounted::new(String::from("foo"));
        {
            let first = RefPtr::new(&object);
            assert_eq!(object.ref_count(), 1);
            let second = first.clone();
            assert_eq!(object.ref_count(), 2);
            assert_eq!(&**second, "foo");
            assert!(first.ptr_eq(&second));
        }
        assert_eq!(object.ref_count(), 0);
    }

    #[test]
    #[should_panic(expected = "reference count underflow")]
    fn release_from_zero_panics() {
        let count = BlockingRefCount::new();
        count.decrement();
    }

    #[test]
    fn drop_blocks_until_unreferenced() {
        let (handle_tx, handle_rx) = mpsc::channel::<RefPtr<BlockingRefCounted<String>>>();
        let (finished_tx, finished_rx) = mpsc::channel::<()>();
        let owner = thread::spawn(move || {
            {
                let object = BlockingRefCounted::new(String::from("foo"));
                handle_tx.send(RefPtr::new(&object)).unwrap();
                // Dropping `object` blocks until the receiver lets go.
            }
            finished_tx.send(()).unwrap();
        });
        let handle = handle_rx.recv().unwrap();
        assert_eq!(&**handle, "foo");
        assert!(finished_rx
            .recv_timeout(Duration::from_millis(100))
            .is_err());
        drop(handle);
        finished_rx.recv().unwrap();
        owner.join().unwrap();
    }
}
