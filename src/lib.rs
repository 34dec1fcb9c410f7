//! IP intelligence aggregator.
//!
//! Asks a configurable set of third-party geolocation and risk-scoring APIs
//! what they know about one IP address, normalizes their answers into a
//! common schema and returns them keyed by source.
//!
//! # Features
//!
//! - **Bounded fan-out** - Up to `max_concurrent` upstream calls in flight, or
//!   strictly sequential, with a hard per-call timeout
//! - **Admission control** - Per-client sliding-window limiter with
//!   self-pruning memory
//! - **Normalization** - Per-source schemas mapped onto common fields, tolerant
//!   of malformed encodings
//! - **Failure isolation** - Every requested source yields exactly one
//!   outcome; a failing source never affects its siblings
//!
//! # Example Configuration
//!
//! ```yaml
//! fanout:
//!   max_concurrent: 3
//!   timeout_ms: 5000
//!
//! rate_limit:
//!   limit: 20
//!   window_ms: 60000
//!
//! sources:
//!   - name: ipinfo
//!     url_template: "https://ipinfo.io/{ip}/json"
//!   - name: ipqs
//!     url_template: "https://www.ipqualityscore.com/api/json/ip/{apiKey}/{ip}"
//!     requires_key: true
//!     weight: 2
//! ```

pub mod config;
pub mod fanout;
pub mod limiter;
pub mod normalize;
pub mod server;
pub mod service;
pub mod upstream;
pub mod validate;

#[cfg(test)]
mod test_utils;

pub use config::Config;
pub use fanout::{FanOut, QueryMode, SourceResults};
pub use limiter::RateLimiter;
pub use service::{AggregatedResult, LookupError, LookupRequest, LookupService};
pub use upstream::{FetchOutcome, HttpTransport, Transport};
