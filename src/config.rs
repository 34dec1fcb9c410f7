//! Configuration types for the IP intelligence aggregator.

use crate::normalize::Schema;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;
use std::time::Duration;
use tokio::sync::Semaphore;

/// Placeholder substituted with the queried IP.
pub const IP_PLACEHOLDER: &str = "{ip}";

/// Placeholder substituted with the caller-supplied API key.
pub const API_KEY_PLACEHOLDER: &str = "{apiKey}";

/// Root configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    /// HTTP listener settings.
    #[serde(default)]
    pub server: ServerConfig,

    /// Upstream fan-out settings.
    #[serde(default)]
    pub fanout: FanoutConfig,

    /// Per-client admission control.
    #[serde(default)]
    pub rate_limit: RateLimitConfig,

    /// How the client identifier is derived from request headers.
    #[serde(default)]
    pub client_id: ClientIdConfig,

    /// Upstream source table. Order is the default query order.
    #[serde(default = "default_sources")]
    pub sources: Vec<SourceConfig>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            fanout: FanoutConfig::default(),
            rate_limit: RateLimitConfig::default(),
            client_id: ClientIdConfig::default(),
            sources: default_sources(),
        }
    }
}

/// HTTP listener settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    /// Socket address to bind.
    #[serde(default = "default_listen")]
    pub listen: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen: default_listen(),
        }
    }
}

fn default_listen() -> String {
    "0.0.0.0:8787".to_string()
}

/// Upstream fan-out settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct FanoutConfig {
    /// Maximum upstream calls in flight per request in concurrent mode.
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent: usize,

    /// Hard deadline for a single upstream call, in milliseconds.
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
}

impl FanoutConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

impl Default for FanoutConfig {
    fn default() -> Self {
        Self {
            max_concurrent: default_max_concurrent(),
            timeout_ms: default_timeout_ms(),
        }
    }
}

fn default_max_concurrent() -> usize {
    3
}

fn default_timeout_ms() -> u64 {
    5000
}

/// Sliding-window rate limit settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RateLimitConfig {
    /// Master switch for admission control.
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Maximum admitted weight per client within the window.
    #[serde(default = "default_limit")]
    pub limit: u32,

    /// Window length in milliseconds.
    #[serde(default = "default_window_ms")]
    pub window_ms: u64,

    /// Timestamps kept per client.
    #[serde(default = "default_max_timestamps")]
    pub max_timestamps: usize,
}

impl RateLimitConfig {
    pub fn window(&self) -> Duration {
        Duration::from_millis(self.window_ms)
    }
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            limit: default_limit(),
            window_ms: default_window_ms(),
            max_timestamps: default_max_timestamps(),
        }
    }
}

fn default_limit() -> u32 {
    20
}

fn default_window_ms() -> u64 {
    60_000
}

fn default_max_timestamps() -> usize {
    100
}

/// Client identifier extraction.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ClientIdConfig {
    /// Headers to check, in order of preference. For comma-separated
    /// values (X-Forwarded-For) the first entry is used.
    #[serde(default = "default_client_headers")]
    pub headers: Vec<String>,
}

impl Default for ClientIdConfig {
    fn default() -> Self {
        Self {
            headers: default_client_headers(),
        }
    }
}

fn default_client_headers() -> Vec<String> {
    vec![
        "cf-connecting-ip".to_string(),
        "x-forwarded-for".to_string(),
        "x-real-ip".to_string(),
    ]
}

/// One upstream IP intelligence API.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
pub struct SourceConfig {
    /// Unique source name, used as the result key.
    pub name: String,

    /// URL with `{ip}` and optionally `{apiKey}` placeholders.
    #[serde(alias = "url")]
    pub url_template: String,

    /// Whether the caller must supply an API key.
    #[serde(default)]
    pub requires_key: bool,

    /// Rate budget cost of querying this source.
    #[serde(default = "default_weight")]
    pub weight: u32,

    /// Response schema used for standardization. Defaults to `name`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub schema: Option<String>,
}

impl SourceConfig {
    pub fn new(name: &str, url_template: &str) -> Self {
        Self {
            name: name.to_string(),
            url_template: url_template.to_string(),
            requires_key: false,
            weight: default_weight(),
            schema: None,
        }
    }

    pub fn with_key(mut self) -> Self {
        self.requires_key = true;
        self
    }

    pub fn with_weight(mut self, weight: u32) -> Self {
        self.weight = weight;
        self
    }

    /// Name of the schema used to standardize this source's responses.
    pub fn schema_name(&self) -> &str {
        self.schema.as_deref().unwrap_or(&self.name)
    }

    /// Substitute the IP (and key, if any) into the URL template.
    pub fn render_url(&self, ip: &str, api_key: Option<&str>) -> String {
        let url = self.url_template.replace(IP_PLACEHOLDER, ip);
        match api_key {
            Some(key) => url.replace(API_KEY_PLACEHOLDER, key),
            None => url,
        }
    }
}

fn default_weight() -> u32 {
    1
}

fn default_true() -> bool {
    true
}

/// The built-in source table.
pub fn default_sources() -> Vec<SourceConfig> {
    vec![
        SourceConfig::new("ipinfo", "https://ipinfo.io/{ip}/json"),
        SourceConfig::new("ipapi", "http://ip-api.com/json/{ip}?lang=zh-CN"),
        SourceConfig::new("ipsb", "https://api.ip.sb/geoip?ip={ip}"),
        SourceConfig::new("ipgs", "https://ip.gs/json?ip={ip}"),
        SourceConfig::new("skk", "https://api.skk.moe/ip?ip={ip}"),
        SourceConfig::new("ipzx", "https://ip.zxinc.org/?ip={ip}"),
        SourceConfig::new("ipregistry", "https://api.ipregistry.co/{ip}?key=tryout"),
        SourceConfig::new("ipdata", "https://api.ipdata.co/{ip}?api-key=test"),
        SourceConfig::new("ipwhois", "https://ipwhois.app/json/{ip}"),
        SourceConfig::new(
            "ipqs",
            "https://www.ipqualityscore.com/api/json/ip/{apiKey}/{ip}",
        )
        .with_key()
        .with_weight(2),
        SourceConfig::new("scamalytics", "https://scamalytics.com/ip/{ip}"),
        SourceConfig::new(
            "abuseipdb",
            "https://api.abuseipdb.com/api/v2/check?ipAddress={ip}",
        ),
        SourceConfig::new("cloudflare", "https://ip.nodeget.com/json?ip={ip}"),
    ]
}

impl Config {
    /// Load configuration from a YAML file.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml(&content)
    }

    /// Load configuration from a YAML file, or use defaults if it does not exist.
    pub fn load_or_default(path: &Path) -> anyhow::Result<Self> {
        if path.exists() {
            Self::load(path)
        } else {
            let config = Self::default();
            config.validate()?;
            Ok(config)
        }
    }

    /// Parse and validate YAML configuration text.
    pub fn from_yaml(content: &str) -> anyhow::Result<Self> {
        let expanded = expand_env_vars(content)?;
        let config: Config = serde_yaml::from_str(&expanded)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate configuration.
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.fanout.max_concurrent == 0 {
            anyhow::bail!("fanout.max_concurrent must be at least 1");
        }
        if self.fanout.max_concurrent > Semaphore::MAX_PERMITS {
            anyhow::bail!(
                "fanout.max_concurrent must be at most {}",
                Semaphore::MAX_PERMITS
            );
        }
        if self.fanout.timeout_ms == 0 {
            anyhow::bail!("fanout.timeout_ms must be greater than 0");
        }

        if self.rate_limit.limit == 0 {
            anyhow::bail!("rate_limit.limit must be greater than 0");
        }
        if self.rate_limit.window_ms == 0 {
            anyhow::bail!("rate_limit.window_ms must be greater than 0");
        }
        if self.rate_limit.max_timestamps == 0 {
            anyhow::bail!("rate_limit.max_timestamps must be at least 1");
        }

        let mut seen = HashSet::new();
        for source in &self.sources {
            if source.name.is_empty() {
                anyhow::bail!("Source name must not be empty");
            }
            if !seen.insert(source.name.as_str()) {
                anyhow::bail!("Duplicate source name: {}", source.name);
            }
            if !source.url_template.contains(IP_PLACEHOLDER) {
                anyhow::bail!(
                    "Source '{}' url_template is missing {}",
                    source.name,
                    IP_PLACEHOLDER
                );
            }
            if source.requires_key && !source.url_template.contains(API_KEY_PLACEHOLDER) {
                anyhow::bail!(
                    "Source '{}' requires a key but url_template has no {}",
                    source.name,
                    API_KEY_PLACEHOLDER
                );
            }
            if source.weight == 0 {
                anyhow::bail!("Source '{}' weight must be at least 1", source.name);
            }
            if let Some(ref schema) = source.schema {
                if Schema::from_name(schema).is_none() {
                    anyhow::bail!("Source '{}' has unknown schema: {}", source.name, schema);
                }
            }
        }

        Ok(())
    }

    /// Generate example configuration YAML.
    pub fn example() -> String {
        r#"# IP Intelligence Aggregator Configuration

server:
  listen: "0.0.0.0:8787"

# Upstream fan-out
fanout:
  max_concurrent: 3            # Upstream calls in flight per request
  timeout_ms: 5000             # Hard deadline per upstream call

# Per-client sliding window (in-process only, not shared between instances)
rate_limit:
  enabled: true
  limit: 20                    # Admitted requests per window
  window_ms: 60000
  max_timestamps: 100          # Memory bound per client

# Client identifier headers, in order of preference
client_id:
  headers:
    - "cf-connecting-ip"
    - "x-forwarded-for"
    - "x-real-ip"

# Upstream sources. {ip} is replaced with the queried address and
# {apiKey} with the caller-supplied key. `schema` selects the response
# transform (defaults to the source name).
sources:
  - name: ipinfo
    url_template: "https://ipinfo.io/{ip}/json"
  - name: ipapi
    url_template: "http://ip-api.com/json/{ip}?lang=zh-CN"
  - name: ipregistry
    url_template: "https://api.ipregistry.co/{ip}?key=${IPREGISTRY_KEY}"
  - name: ipqs
    url_template: "https://www.ipqualityscore.com/api/json/ip/{apiKey}/{ip}"
    requires_key: true
    weight: 2
  - name: abuseipdb
    url_template: "https://api.abuseipdb.com/api/v2/check?ipAddress={ip}"
"#
        .to_string()
    }
}

/// Expand environment variables in the format ${VAR_NAME}.
fn expand_env_vars(content: &str) -> anyhow::Result<String> {
    let re = regex::Regex::new(r"\$\{([^}]+)\}")?;
    let expanded = re.replace_all(content, |caps: &regex::Captures<'_>| {
        std::env::var(&caps[1]).unwrap_or_default()
    });
    Ok(expanded.into_owned())
}
