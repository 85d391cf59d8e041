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

//! Locking helpers.

use std::sync::{Condvar, Mutex, MutexGuard, PoisonError, WaitTimeoutResult};
use std::time::Duration;

/// Locks a mutex, recovering the guard if a previous holder panicked.
pub fn lock<T: ?Sized>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Blocks on a condition variable, recovering the guard on poison.
pub fn wait<'a, T>(condvar: &Condvar, guard: MutexGuard<'a, T>) -> MutexGuard<'a, T> {
    condvar.wait(guard).unwrap_or_else(PoisonError::into_inner)
}

/// Blocks on a condition variable with a timeout, recovering the guard on
/// poison.
pub fn wait_timeout<'a, T>(
    condvar: &Condvar,
    guard: MutexGuard<'a, T>,
    timeout: Duration,
) -> (MutexGuard<'a, T>, WaitTimeoutResult) {
    condvar
        .wait_timeout(guard, timeout)
        .unwrap_or_else(PoisonError::into_inner)
}

/// Acquires two mutexes in address order, preventing lock cycles regardless
/// of the order callers name them in.
///
/// The returned guards are in argument order. The two mutexes must be
/// distinct objects.
pub fn lock_ordered<'a, A: ?Sized, B: ?Sized>(
    a: &'a Mutex<A>,
    b: &'a Mutex<B>,
) -> (MutexGuard<'a, A>, MutexGuard<'a, B>) {
    let address_a = a as *const Mutex<A> as *const () as usize;
    let address_b = b as *const Mutex<B> as *const () as usize;
    assert_ne!(address_a, address_b, "lock_ordered needs distinct mutexes");
    if address_a < address_b {
        let guard_a = lock(a);
        let guard_b = lock(b);
        (guard_a, guard_b)
    } else {
        let guard_b = lock(b);
        let guard_a = lock(a);
        (guard_a, guard_b)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn guards_are_in_argument_order() {
        let first = Mutex::new(1);
        let second = Mutex::new(2);
        let (a, b) = lock_ordered(&first, &second);
        assert_eq!(*a, 1);
        assert_eq!(*b, 2);
        drop((a, b));
        let (b, a) = lock_ordered(&second, &first);
        assert_eq!(*a, 1);
        assert_eq!(*b, 2);
    }

    #[test]
    fn opposite_orders_do_not_deadlock() {
        let first = Arc::new(Mutex::new(0));
        let second = Arc::new(Mutex::new(0));
        let mut threads = Vec::new();
        for flip in [false, true] {
            let first = Arc::clone(&first);
            let second = Arc::clone(&second);
            threads.push(thread::spawn(move || {
                for _ in 0..1000 {
                    if flip {
                        let (mut a, mut b) = lock_ordered(&*second, &*first);
                        *a += 1;
                        *b += 1;
                    } else {
                        let (mut a, mut b) = lock_ordered(&*first, &*second);
                        *a += 1;
                        *b += 1;
                    }
                }
            }));
        }
        for thread in threads {
            thread.join().unwrap();
        }
        assert_eq!(*lock(&first), 2000);
        assert_eq!(*lock(&second), 2000);
    }

    #[test]
    fn recovers_from_poison() {
        let mutex = Arc::new(Mutex::new(7));
        let clone = Arc::clone(&mutex);
        let _ = thread::spawn(move || {
            let _guard = clone.lock().unwrap();
            panic!("poison the mutex");
        })
        .join();
        assert_eq!(*lock(&mutex), 7);
    }
}
