//! Scripted transport for unit tests.

use crate::upstream::{RawResponse, Transport, TransportError};
use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

/// Scripted reply of a [`MockTransport`].
#[derive(Debug, Clone)]
pub enum MockReply {
    /// Respond with a status and body.
    Response(u16, String),
    /// Fail with a transport error.
    Fail(String),
    /// Never respond.
    Hang,
    /// Panic inside the call.
    Panic,
}

impl MockReply {
    pub fn json(status: u16, body: &str) -> Self {
        MockReply::Response(status, body.to_string())
    }
}

/// Transport that answers from a script and records what it was asked.
pub struct MockTransport {
    routes: Vec<(String, MockReply)>,
    fallback: MockReply,
    delay: Duration,
    calls: AtomicUsize,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
    urls: Mutex<Vec<String>>,
}

impl MockTransport {
    pub fn new(fallback: MockReply) -> Self {
        Self {
            routes: Vec::new(),
            fallback,
            delay: Duration::ZERO,
            calls: AtomicUsize::new(0),
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
            urls: Mutex::new(Vec::new()),
        }
    }

    /// Reply with `reply` for URLs containing `pattern`.
    pub fn route(mut self, pattern: &str, reply: MockReply) -> Self {
        self.routes.push((pattern.to_string(), reply));
        self
    }

    /// Delay every reply by `delay`.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    pub fn urls(&self) -> Vec<String> {
        self.urls.lock().unwrap().clone()
    }

    fn reply_for(&self, url: &str) -> MockReply {
        self.routes
            .iter()
            .find(|(pattern, _)| url.contains(pattern.as_str()))
            .map(|(_, reply)| reply.clone())
            .unwrap_or_else(|| self.fallback.clone())
    }
}

struct InFlightGuard<'a>(&'a AtomicUsize);

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn get(&self, url: &str) -> Result<RawResponse, TransportError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.urls.lock().unwrap().push(url.to_string());

        let current = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(current, Ordering::SeqCst);
        let _guard = InFlightGuard(&self.in_flight);

        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }

        match self.reply_for(url) {
            MockReply::Response(status, body) => Ok(RawResponse { status, body }),
            MockReply::Fail(message) => Err(TransportError::Other(message)),
            MockReply::Hang => std::future::pending().await,
            MockReply::Panic => panic!("mock transport panic for {url}"),
        }
    }
}
