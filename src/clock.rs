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

//! Injectable monotonic time.
//!
//! Components that sleep on deadlines take a [`Clock`] so that tests can
//! drive them deterministically with a [`MockClock`]. Time is expressed as a
//! [`Duration`] since the clock's own epoch; only differences are meaningful.

use std::fmt;
use std::sync::{Mutex, OnceLock};
use std::time::{Duration, Instant};

use crate::sync::lock;

/// Callback registered by a deadline sleeper, invoked when the clock's time
/// changes discontinuously.
///
/// A waker must synchronize with the sleeper before signalling — acquire and
/// release the mutex the sleeper blocks under, then notify. A sleeper that
/// has checked the time but not yet blocked still holds that mutex, so the
/// waker cannot slip into the gap and get lost.
pub type Waker = Box<dyn Fn() + Send + Sync>;

/// A monotonic time source.
pub trait Clock: fmt::Debug + Send + Sync {
    /// Returns the time elapsed since the clock's epoch.
    fn now(&self) -> Duration;

    /// Registers a waker to be invoked whenever this clock's notion of time
    /// changes discontinuously. Real clocks advance continuously and never
    /// invoke wakers.
    fn watch(&self, waker: Waker) {
        let _ = waker;
    }
}

/// The process monotonic clock.
#[derive(Debug)]
pub struct RealClock {
    _private: (),
}

static REAL_CLOCK_EPOCH: OnceLock<Instant> = OnceLock::new();
static REAL_CLOCK: RealClock = RealClock { _private: () };

impl RealClock {
    /// Returns the singleton instance.
    pub fn get() -> &'static RealClock {
        REAL_CLOCK_EPOCH.get_or_init(Instant::now);
        &REAL_CLOCK
    }
}

impl Clock for RealClock {
    fn now(&self) -> Duration {
        REAL_CLOCK_EPOCH.get_or_init(Instant::now).elapsed()
    }
}

/// A clock whose time only moves when the test advances it.
///
/// Every [`advance`](MockClock::advance) runs the wakers registered through
/// [`Clock::watch`], so deadline sleepers re-check against the new time
/// instead of waiting out a real-time timeout.
#[derive(Default)]
pub struct MockClock {
    now: Mutex<Duration>,
    watchers: Mutex<Vec<Waker>>,
}

impl MockClock {
    /// Creates a clock whose time starts at zero.
    pub fn new() -> Self {
        Self::default()
    }

    /// Moves time forward by `amount` and runs all registered wakers.
    pub fn advance(&self, amount: Duration) {
        *lock(&self.now) += amount;
        let watchers = lock(&self.watchers);
        for waker in watchers.iter() {
            waker();
        }
    }
}

impl Clock for MockClock {
    fn now(&self) -> Duration {
        *lock(&self.now)
    }

    fn watch(&self, waker: Waker) {
        lock(&self.watchers).push(waker);
    }
}

impl fmt::Debug for MockClock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MockClock")
            .field("now", &*lock(&self.now))
            .field("watchers", &lock(&self.watchers).len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Condvar};

    #[test]
    fn real_clock_advances() {
        let clock = RealClock::get();
        let before = clock.now();
        let after = clock.now();
        assert!(after >= before);
    }

    #[test]
    fn mock_clock_starts_at_zero() {
        let clock = MockClock::new();
        assert_eq!(clock.now(), Duration::ZERO);
    }

    #[test]
    fn mock_clock_advances_on_demand() {
        let clock = MockClock::new();
        clock.advance(Duration::from_secs(12));
        assert_eq!(clock.now(), Duration::from_secs(12));
        clock.advance(Duration::from_secs(34));
        assert_eq!(clock.now(), Duration::from_secs(46));
    }

    #[test]
    fn mock_clock_runs_wakers() {
        let clock = Arc::new(MockClock::new());
        let gate = Arc::new(Mutex::new(()));
        let condvar = Arc::new(Condvar::new());
        {
            let gate = Arc::clone(&gate);
            let condvar = Arc::clone(&condvar);
            clock.watch(Box::new(move || {
                // Synchronize with the sleeper, then signal.
                drop(lock(&gate));
                condvar.notify_all();
            }));
        }
        let sleeper = {
            let clock = Arc::clone(&clock);
            let gate = Arc::clone(&gate);
            let condvar = Arc::clone(&condvar);
            std::thread::spawn(move || {
                let mut guard = lock(&gate);
                while clock.now() < Duration::from_secs(1) {
                    guard = condvar.wait(guard).unwrap_or_else(|e| e.into_inner());
                }
            })
        };
        std::thread::sleep(Duration::from_millis(50));
        clock.advance(Duration::from_secs(1));
        sleeper.join().unwrap();
    }
}
