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

//! Thread-safe incremental number generation.

use std::sync::atomic::{AtomicU64, Ordering};

/// Thread-safe incremental number generator.
///
/// The sequence starts at 1 by default so that 0 can be used as a sentinel
/// value for invalid handles.
#[derive(Debug)]
pub struct SequenceNumber {
    next: AtomicU64,
}

impl SequenceNumber {
    /// Creates a generator whose first number is `first`.
    pub const fn new(first: u64) -> Self {
        Self {
            next: AtomicU64::new(first),
        }
    }

    /// Generates the next number.
    pub fn get_next(&self) -> u64 {
        self.next.fetch_add(1, Ordering::Relaxed)
    }
}

impl Default for SequenceNumber {
    fn default() -> Self {
        Self::new(1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn starts_at_one() {
        let sequence = SequenceNumber::default();
        assert_eq!(sequence.get_next(), 1);
        assert_eq!(sequence.get_next(), 2);
        assert_eq!(sequence.get_next(), 3);
    }

    #[test]
    fn starts_at_custom_value() {
        let sequence = SequenceNumber::new(42);
        assert_eq!(sequence.get_next(), 42);
        assert_eq!(sequence.get_next(), 43);
    }
}
