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

#![deny(
    missing_docs,
    missing_debug_implementations,
    rust_2018_idioms,
    unused_imports
)]
// temporary
#![allow(dead_code)]
// Disallow warnings in examples.
#![doc(test(attr(deny(warnings))))]

//! chronod is the concurrency and networking core of a time-series database
//! server: reference-counted object lifecycles, a delayed-task scheduler, an
//! edge-triggered I/O reactor with plaintext and TLS transports, and an
//! HTTP/2 connection core.
//!
//! The crate does not install a logger; link a `log` backend of your choice.

pub mod clock;
pub mod healthz;
pub mod http2;
pub mod net;
pub mod realm;
pub mod refcount;
pub mod scheduler;
pub mod sequence;
pub mod server;
pub mod status;
pub mod sync;
