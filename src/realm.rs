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

//! Metric realms.
//!
//! A [`Realm`] is a named, reference-counted category tag attached to
//! metrics. Realm names are globally unique within the process; creating a
//! second realm with an existing name is a programming error and panics.
//! Realms are handed around as [`RefPtr`]s and their destruction blocks
//! until no handle remains, so a metric can never outlive its realm.

use std::collections::HashSet;
use std::fmt;
use std::sync::{Mutex, OnceLock};

use crate::refcount::{BlockingRefCount, RefCounted, RefPtr};
use crate::sync::lock;

fn registry() -> &'static Mutex<HashSet<String>> {
    static REGISTRY: OnceLock<Mutex<HashSet<String>>> = OnceLock::new();
    REGISTRY.get_or_init(|| Mutex::new(HashSet::new()))
}

/// A named metric category tag.
///
/// The owner keeps the `Realm` itself (typically in a static); users hold
/// [`RefPtr<Realm>`] handles obtained from [`Realm::get_ref`]. Dropping the
/// realm blocks until every handle is released.
pub struct Realm {
    name: String,
    refs: BlockingRefCount,
}

impl Realm {
    /// Registers and returns a new realm.
    ///
    /// Panics if a realm named `name` already exists; realm names identify
    /// metric categories process-wide and must be unique.
    pub fn new(name: impl Into<String>) -> Self {
        let name = name.into();
        let inserted = lock(registry()).insert(name.clone());
        assert!(inserted, "duplicate realm name: {name:?}");
        Self {
            name,
            refs: BlockingRefCount::new(),
        }
    }

    /// Default realm for most metrics.
    pub fn default_realm() -> RefPtr<Realm> {
        static DEFAULT: OnceLock<&'static Realm> = OnceLock::new();
        DEFAULT.get_or_init(|| Box::leak(Box::new(Realm::new("default")))).get_ref()
    }

    /// Realm for metamonitoring metrics.
    pub fn meta() -> RefPtr<Realm> {
        static META: OnceLock<&'static Realm> = OnceLock::new();
        META.get_or_init(|| Box::leak(Box::new(Realm::new("meta")))).get_ref()
    }

    /// Realm for metrics with very large cardinality.
    pub fn huge() -> RefPtr<Realm> {
        static HUGE: OnceLock<&'static Realm> = OnceLock::new();
        HUGE.get_or_init(|| Box::leak(Box::new(Realm::new("huge")))).get_ref()
    }

    /// Returns the name of the realm.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the current reference count.
    pub fn ref_count(&self) -> usize {
        self.refs.get()
    }

    /// Returns a handle to this realm.
    pub fn get_ref(&self) -> RefPtr<Realm> {
        RefPtr::new(self)
    }
}

unsafe impl RefCounted for Realm {
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

impl Drop for Realm {
    fn drop(&mut self) {
        self.refs.wait_zero();
        lock(registry()).remove(&self.name);
    }
}

impl fmt::Debug for Realm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Realm")
            .field("name", &self.name)
            .field("ref_count", &self.ref_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn name_and_handles() {
        let realm = Realm::new("test-name-and-handles");
        assert_eq!(realm.name(), "test-name-and-handles");
        assert_eq!(realm.ref_count(), 0);
        let handle = realm.get_ref();
        assert_eq!(realm.ref_count(), 1);
        assert_eq!(handle.name(), "test-name-and-handles");
        drop(handle);
        assert_eq!(realm.ref_count(), 0);
    }

    #[test]
    fn name_is_released_on_drop() {
        {
            let _realm = Realm::new("test-release");
        }
        let _realm = Realm::new("test-release");
    }

    #[test]
    #[should_panic(expected = "duplicate realm name")]
    fn duplicate_name_panics() {
        let _first = Realm::new("test-duplicate");
        let _second = Realm::new("test-duplicate");
    }

    #[test]
    fn predefined_realms() {
        assert_eq!(Realm::default_realm().name(), "default");
        assert_eq!(Realm::meta().name(), "meta");
        assert_eq!(Realm::huge().name(), "huge");
        assert!(Realm::default_realm().is_referenced());
    }
}
