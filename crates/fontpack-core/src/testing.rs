//! In-memory upstream for exercising the pipeline without a network.
//!
//! # Example
//!
//! ```
//! use fontpack_core::testing::MockTransport;
//!
//! let transport = MockTransport::new()
//!     .with_ok("http://api/css?family=Roboto", "a{url(http://x/f.woff)}")
//!     .with_ok("http://x/f.woff", vec![0u8, 1, 2])
//!     .with_status("http://x/missing.woff", 404);
//!
//! assert_eq!(transport.max_in_flight(), 0);
//! ```

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use http::StatusCode;
use parking_lot::Mutex;

use crate::identity::Identity;
use crate::transport::{FetchedBody, Transport, TransportError};

/// Canned answer for one URL.
#[derive(Debug, Clone)]
enum Route {
    Respond {
        status: StatusCode,
        body: Bytes,
        delay: Duration,
    },
    Fail {
        message: String,
        delay: Duration,
    },
}

#[derive(Debug, Default)]
struct Recorder {
    requests: Mutex<Vec<(String, String)>>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

/// [`Transport`] answering from a fixed route table.
///
/// URLs without a route fail like an unreachable host. Clones share the
/// request log and concurrency counters.
#[derive(Debug, Clone, Default)]
pub struct MockTransport {
    routes: Arc<HashMap<String, Route>>,
    recorder: Arc<Recorder>,
}

impl MockTransport {
    /// Empty route table.
    pub fn new() -> Self {
        Self::default()
    }

    fn with_route(mut self, url: impl Into<String>, route: Route) -> Self {
        Arc::make_mut(&mut self.routes).insert(url.into(), route);
        self
    }

    /// Answer `url` with `200 OK` and `body`.
    #[must_use]
    pub fn with_ok(self, url: impl Into<String>, body: impl Into<Bytes>) -> Self {
        self.with_delayed_ok(url, body, Duration::ZERO)
    }

    /// Answer `url` with `200 OK` after `delay`.
    #[must_use]
    pub fn with_delayed_ok(
        self,
        url: impl Into<String>,
        body: impl Into<Bytes>,
        delay: Duration,
    ) -> Self {
        self.with_route(
            url,
            Route::Respond {
                status: StatusCode::OK,
                body: body.into(),
                delay,
            },
        )
    }

    /// Answer `url` with `status` and an empty body.
    #[must_use]
    pub fn with_status(self, url: impl Into<String>, status: u16) -> Self {
        self.with_delayed_status(url, status, Duration::ZERO)
    }

    /// Answer `url` with `status` after `delay`.
    #[must_use]
    pub fn with_delayed_status(self, url: impl Into<String>, status: u16, delay: Duration) -> Self {
        let status = StatusCode::from_u16(status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        self.with_route(
            url,
            Route::Respond {
                status,
                body: Bytes::new(),
                delay,
            },
        )
    }

    /// Fail `url` at the transport level.
    #[must_use]
    pub fn with_failure(self, url: impl Into<String>, message: impl Into<String>) -> Self {
        self.with_route(
            url,
            Route::Fail {
                message: message.into(),
                delay: Duration::ZERO,
            },
        )
    }

    /// URLs requested so far, in request order.
    pub fn requests(&self) -> Vec<String> {
        self.recorder
            .requests
            .lock()
            .iter()
            .map(|(url, _)| url.clone())
            .collect()
    }

    /// User agents presented so far, in request order.
    pub fn user_agents(&self) -> Vec<String> {
        self.recorder
            .requests
            .lock()
            .iter()
            .map(|(_, ua)| ua.clone())
            .collect()
    }

    /// Highest number of requests observed in flight at once.
    pub fn max_in_flight(&self) -> usize {
        self.recorder.max_in_flight.load(Ordering::SeqCst)
    }
}

/// Decrements the in-flight counter even if the request future is dropped.
struct InFlight<'a>(&'a Recorder);

impl<'a> InFlight<'a> {
    fn enter(recorder: &'a Recorder) -> Self {
        let now = recorder.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        recorder.max_in_flight.fetch_max(now, Ordering::SeqCst);
        Self(recorder)
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.in_flight.fetch_sub(1, Ordering::SeqCst);
    }
}

impl Transport for MockTransport {
    async fn get(&self, url: &str, identity: &Identity) -> Result<FetchedBody, TransportError> {
        self.recorder
            .requests
            .lock()
            .push((url.to_string(), identity.user_agent().to_string()));
        let _guard = InFlight::enter(&self.recorder);

        // Always yield so concurrent callers genuinely overlap.
        tokio::task::yield_now().await;

        match self.routes.get(url).cloned() {
            Some(Route::Respond {
                status,
                body,
                delay,
            }) => {
                if !delay.is_zero() {
                    tokio::time::sleep(delay).await;
                }
                Ok(FetchedBody { status, body })
            }
            Some(Route::Fail { message, delay }) => {
                if !delay.is_zero() {
                    tokio::time::sleep(delay).await;
                }
                Err(TransportError::new(message))
            }
            None => Err(TransportError::new(format!("no route to {url}"))),
        }
    }
}
