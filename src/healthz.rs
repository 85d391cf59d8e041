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

//! The health-check registry and the `/healthz` handler.
//!
//! `GET /healthz` returns 200 with the concatenated status of every
//! registered check; any other method gets a 405.

use std::sync::{Arc, Mutex, OnceLock};

use bytes::Bytes;

use crate::http2::handler::{Handler, Method, Request, ServerStream};
use crate::http2::hpack::HeaderSet;
use crate::server::HandlerSet;
use crate::status::Result;
use crate::sync::lock;

/// A registered health check. Returns OK when healthy.
pub type CheckFn = Box<dyn Fn() -> Result<()> + Send + Sync>;

/// The process-wide health-check registry.
#[derive(Default)]
pub struct Healthz {
    checks: Mutex<Vec<(String, CheckFn)>>,
}

impl Healthz {
    /// Returns the singleton instance.
    pub fn get() -> &'static Healthz {
        static INSTANCE: OnceLock<Healthz> = OnceLock::new();
        INSTANCE.get_or_init(Healthz::default)
    }

    /// Registers a named check.
    pub fn add_check(&self, name: impl Into<String>, check: CheckFn) {
        lock(&self.checks).push((name.into(), check));
    }

    /// Runs all checks. Returns whether every check passed and one report
    /// line per check.
    pub fn run_checks(&self) -> (bool, String) {
        let checks = lock(&self.checks);
        let mut healthy = true;
        let mut report = String::new();
        for (name, check) in checks.iter() {
            match check() {
                Ok(()) => {
                    report.push_str(name);
                    report.push_str(": ok\n");
                }
                Err(status) => {
                    healthy = false;
                    report.push_str(name);
                    report.push_str(": ");
                    report.push_str(&status.to_string());
                    report.push('\n');
                }
            }
        }
        if checks.is_empty() {
            report.push_str("ok\n");
        }
        (healthy, report)
    }
}

impl std::fmt::Debug for Healthz {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Healthz")
            .field("checks", &lock(&self.checks).len())
            .finish()
    }
}

/// The `GET /healthz` handler.
#[derive(Debug, Default)]
pub struct HealthzHandler;

impl Handler for HealthzHandler {
    fn handle(&self, stream: &mut dyn ServerStream, request: &Request) {
        if request.method != Method::Get {
            return stream.send_fields_or_log(
                &vec![(String::from(":status"), String::from("405"))],
                true,
            );
        }
        let (_healthy, report) = Healthz::get().run_checks();
        let fields: HeaderSet = vec![
            (String::from(":status"), String::from("200")),
            (String::from("content-type"), String::from("text/plain")),
            (String::from("content-disposition"), String::from("inline")),
            (String::from("content-length"), report.len().to_string()),
        ];
        stream.send_response_or_log(&fields, Bytes::from(report));
    }
}

/// Registers the `/healthz` handler in `handlers`.
pub fn register(handlers: &mut HandlerSet) -> Result<()> {
    handlers.register("/healthz", Arc::new(HealthzHandler))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::status::Status;

    #[derive(Default)]
    struct FakeStream {
        fields: Vec<(HeaderSet, bool)>,
        data: Vec<(Bytes, bool)>,
    }

    impl ServerStream for FakeStream {
        fn send_fields(&mut self, fields: &HeaderSet, end_stream: bool) -> Result<()> {
            self.fields.push((fields.clone(), end_stream));
            Ok(())
        }

        fn send_data(&mut self, data: Bytes, end_stream: bool) -> Result<()> {
            self.data.push((data, end_stream));
            Ok(())
        }
    }

    fn request(method: Method) -> Request {
        Request {
            method,
            path: String::from("/healthz"),
            authority: None,
            headers: Vec::new(),
        }
    }

    #[test]
    fn get_reports_check_results() {
        Healthz::get().add_check("healthz-test-passing", Box::new(|| Ok(())));
        Healthz::get().add_check(
            "healthz-test-failing",
            Box::new(|| Err(Status::internal("storage offline"))),
        );
        let mut stream = FakeStream::default();
        HealthzHandler.handle(&mut stream, &request(Method::Get));
        assert_eq!(stream.fields.len(), 1);
        let (fields, end_stream) = &stream.fields[0];
        assert!(!end_stream);
        assert!(fields.contains(&(String::from(":status"), String::from("200"))));
        assert_eq!(stream.data.len(), 1);
        let (body, end_stream) = &stream.data[0];
        assert!(end_stream);
        let body = std::str::from_utf8(body).unwrap();
        assert!(body.contains("healthz-test-passing: ok\n"));
        assert!(body.contains("healthz-test-failing: internal: storage offline\n"));
    }

    #[test]
    fn other_methods_get_405() {
        let mut stream = FakeStream::default();
        HealthzHandler.handle(&mut stream, &request(Method::Post));
        assert_eq!(stream.fields.len(), 1);
        let (fields, end_stream) = &stream.fields[0];
        assert!(end_stream);
        assert_eq!(
            fields[0],
            (String::from(":status"), String::from("405"))
        );
        assert!(stream.data.is_empty());
    }
}
