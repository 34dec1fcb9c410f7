//! Request-level lookup: validate, admit, fan out.

use crate::config::Config;
use crate::fanout::{FanOut, QueryMode, SourceResults, SourceTable};
use crate::limiter::RateLimiter;
use crate::upstream::{HttpTransport, Transport};
use crate::validate::is_valid_ip;
use serde::Serialize;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info};

/// Errors that abort a whole lookup. Per-source failures are reported in
/// the result instead.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum LookupError {
    /// The IP parameter is missing or not an IP literal.
    #[error("Invalid IP")]
    InvalidInput,
    /// The client exceeded its admission budget.
    #[error("Rate limit exceeded")]
    RateLimited,
}

/// Parameters of one lookup.
#[derive(Debug, Clone, Default)]
pub struct LookupRequest {
    /// Address to look up.
    pub ip: String,
    /// Single source filter. `None` queries every configured source.
    pub api: Option<String>,
    /// Caller-supplied key for sources that require one.
    pub api_key: Option<String>,
    /// Scheduling of the upstream calls.
    pub mode: QueryMode,
}

impl LookupRequest {
    pub fn new(ip: &str) -> Self {
        Self {
            ip: ip.to_string(),
            ..Self::default()
        }
    }

    pub fn with_api(mut self, api: &str) -> Self {
        self.api = Some(api.to_string());
        self
    }

    pub fn with_api_key(mut self, key: &str) -> Self {
        self.api_key = Some(key.to_string());
        self
    }

    pub fn with_mode(mut self, mode: QueryMode) -> Self {
        self.mode = mode;
        self
    }
}

/// Response to one lookup.
#[derive(Debug, Clone, Serialize)]
pub struct AggregatedResult {
    pub ip: String,
    pub results: SourceResults,
}

/// Owns the admission gate and the fan-out engine.
pub struct LookupService {
    fanout: FanOut,
    limiter: Option<RateLimiter>,
}

impl LookupService {
    /// Build a service that reaches upstreams through `transport`.
    pub fn new(config: &Config, transport: Arc<dyn Transport>) -> Self {
        let sources = Arc::new(SourceTable::new(config.sources.clone()));
        let fanout = FanOut::new(sources, transport, &config.fanout);

        let limiter = if config.rate_limit.enabled {
            Some(RateLimiter::new(&config.rate_limit))
        } else {
            None
        };

        info!(
            sources = fanout.sources().len(),
            max_concurrent = config.fanout.max_concurrent,
            timeout_ms = config.fanout.timeout_ms,
            rate_limit = config.rate_limit.enabled,
            "Lookup service initialized"
        );

        Self { fanout, limiter }
    }

    /// Build a service backed by the reqwest transport.
    pub fn from_config(config: &Config) -> anyhow::Result<Self> {
        let transport = HttpTransport::new(config.fanout.timeout())?;
        Ok(Self::new(config, Arc::new(transport)))
    }

    pub fn limiter(&self) -> Option<&RateLimiter> {
        self.limiter.as_ref()
    }

    pub fn fanout(&self) -> &FanOut {
        &self.fanout
    }

    /// Run one lookup on behalf of `client_id`.
    ///
    /// Invalid input is rejected before the limiter is consulted, so it
    /// does not consume budget.
    pub async fn lookup(
        &self,
        client_id: &str,
        request: LookupRequest,
    ) -> Result<AggregatedResult, LookupError> {
        if !is_valid_ip(&request.ip) {
            debug!(ip = %request.ip, "Rejecting invalid IP");
            return Err(LookupError::InvalidInput);
        }

        if let Some(ref limiter) = self.limiter {
            if !limiter.admit(client_id) {
                return Err(LookupError::RateLimited);
            }
        }

        let names = self.target_sources(request.api.as_deref());
        let results = self
            .fanout
            .query(&request.ip, &names, request.mode, request.api_key.as_deref())
            .await;

        Ok(AggregatedResult {
            ip: request.ip,
            results,
        })
    }

    /// Expand the optional source filter. Names are matched lower-cased.
    fn target_sources(&self, api: Option<&str>) -> Vec<String> {
        match api.map(str::trim).filter(|a| !a.is_empty()) {
            Some(api) => vec![api.to_lowercase()],
            None => self.fanout.sources().names().to_vec(),
        }
    }
}
