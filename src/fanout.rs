//! Fan-out of one lookup across the configured sources.

use crate::config::{FanoutConfig, SourceConfig};
use crate::normalize::normalize;
use crate::upstream::{fetch_one, FetchOutcome, Transport};
use serde::{Serialize, Serializer};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, warn};

/// How the sources of one lookup are scheduled.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum QueryMode {
    /// One source at a time, in request order.
    Sequential,
    /// Up to `max_concurrent` sources in flight.
    #[default]
    Concurrent,
}

impl QueryMode {
    /// Parse the `order` request parameter. Anything but "sequential" is concurrent.
    pub fn parse(order: Option<&str>) -> Self {
        match order {
            Some(o) if o.eq_ignore_ascii_case("sequential") => QueryMode::Sequential,
            _ => QueryMode::Concurrent,
        }
    }
}

/// Read-only source table, keyed by name.
#[derive(Debug, Default)]
pub struct SourceTable {
    order: Vec<String>,
    by_name: HashMap<String, SourceConfig>,
}

impl SourceTable {
    pub fn new(sources: Vec<SourceConfig>) -> Self {
        let order = sources.iter().map(|s| s.name.clone()).collect();
        let by_name = sources.into_iter().map(|s| (s.name.clone(), s)).collect();
        Self { order, by_name }
    }

    pub fn get(&self, name: &str) -> Option<&SourceConfig> {
        self.by_name.get(name)
    }

    /// Source names in configuration order.
    pub fn names(&self) -> &[String] {
        &self.order
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }
}

/// Per-source outcomes of one lookup, in insertion order.
///
/// Sequential lookups insert in request order, concurrent lookups in
/// completion order. Serializes as a JSON object keyed by source name.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SourceResults(Vec<(String, FetchOutcome)>);

impl SourceResults {
    /// Insert or replace the outcome for `name`.
    pub fn insert(&mut self, name: String, outcome: FetchOutcome) {
        match self.0.iter_mut().find(|(n, _)| *n == name) {
            Some(entry) => entry.1 = outcome,
            None => self.0.push((name, outcome)),
        }
    }

    pub fn get(&self, name: &str) -> Option<&FetchOutcome> {
        self.0.iter().find(|(n, _)| n == name).map(|(_, o)| o)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(|(n, _)| n.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &FetchOutcome)> {
        self.0.iter().map(|(n, o)| (n.as_str(), o))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl Serialize for SourceResults {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_map(self.0.iter().map(|(n, o)| (n, o)))
    }
}

/// Dispatches lookups to upstream sources.
///
/// Cheap to clone; clones share the source table and transport.
#[derive(Clone)]
pub struct FanOut {
    sources: Arc<SourceTable>,
    transport: Arc<dyn Transport>,
    max_concurrent: usize,
    timeout: Duration,
}

impl FanOut {
    pub fn new(sources: Arc<SourceTable>, transport: Arc<dyn Transport>, config: &FanoutConfig) -> Self {
        Self {
            sources,
            transport,
            max_concurrent: config.max_concurrent.clamp(1, Semaphore::MAX_PERMITS),
            timeout: config.timeout(),
        }
    }

    pub fn sources(&self) -> &SourceTable {
        &self.sources
    }

    /// Query every source in `names` for `ip`.
    ///
    /// Each distinct name yields exactly one entry. Unknown sources and
    /// key-requiring sources without a key get a configuration error and no
    /// upstream call.
    pub async fn query(
        &self,
        ip: &str,
        names: &[String],
        mode: QueryMode,
        api_key: Option<&str>,
    ) -> SourceResults {
        let mut seen = HashSet::new();
        let names: Vec<&String> = names.iter().filter(|n| seen.insert(n.as_str())).collect();
        let api_key = api_key.filter(|k| !k.is_empty());

        debug!(ip = %ip, sources = names.len(), ?mode, "Starting lookup");

        match mode {
            QueryMode::Sequential => {
                let mut results = SourceResults::default();
                for name in names {
                    let outcome = self.query_one(name, ip, api_key).await;
                    results.insert(name.clone(), outcome);
                }
                results
            }
            QueryMode::Concurrent => self.query_concurrent(ip, &names, api_key).await,
        }
    }

    async fn query_concurrent(&self, ip: &str, names: &[&String], api_key: Option<&str>) -> SourceResults {
        let permits = Arc::new(Semaphore::new(self.max_concurrent));
        let mut tasks = JoinSet::new();
        let mut pending = HashMap::new();

        for name in names {
            let this = self.clone();
            let permits = permits.clone();
            let task_name = (*name).clone();
            let ip = ip.to_string();
            let api_key = api_key.map(str::to_string);

            let handle = tasks.spawn(async move {
                // Held until the call finishes; the semaphore is never closed.
                let _permit = permits.acquire_owned().await.ok();
                this.query_one(&task_name, &ip, api_key.as_deref()).await
            });
            pending.insert(handle.id(), (*name).clone());
        }

        let mut results = SourceResults::default();
        while let Some(joined) = tasks.join_next_with_id().await {
            match joined {
                Ok((id, outcome)) => {
                    if let Some(name) = pending.remove(&id) {
                        results.insert(name, outcome);
                    }
                }
                Err(e) => {
                    if let Some(name) = pending.remove(&e.id()) {
                        warn!(source = %name, error = %e, "Source task failed");
                        results.insert(
                            name,
                            FetchOutcome::failure(format!("Source task failed: {}", e)),
                        );
                    }
                }
            }
        }

        results
    }

    /// Query a single source.
    pub async fn query_one(&self, name: &str, ip: &str, api_key: Option<&str>) -> FetchOutcome {
        let Some(source) = self.sources.get(name) else {
            debug!(source = %name, "Unknown source requested");
            return FetchOutcome::failure(format!("Unknown source: {}", name));
        };

        let key = if source.requires_key {
            match api_key {
                Some(key) => Some(key),
                None => {
                    debug!(source = %name, "Source requires an API key");
                    return FetchOutcome::failure(format!(
                        "Source '{}' requires an API key (apiKey) but none was supplied",
                        name
                    ));
                }
            }
        } else {
            None
        };

        let url = source.render_url(ip, key);
        let mut outcome = fetch_one(self.transport.as_ref(), &url, self.timeout).await;

        if let Some(ref data) = outcome.raw_data {
            outcome.standardized = normalize(source.schema_name(), data);
        }

        outcome
    }
}
