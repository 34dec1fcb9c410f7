//! Standardization of upstream responses.
//!
//! Every source speaks its own JSON dialect. A [`Schema`] knows the field
//! paths of one dialect and maps them onto a flat common object. Fields the
//! schema declares but the payload lacks come out as `null`.

mod geo;
mod risk;

use serde::Serialize;
use serde_json::{Map, Value};

/// Replacement character left behind by lossy UTF-8 decoding.
const REPLACEMENT_CHAR: char = '\u{FFFD}';

/// Standardized fields extracted from one upstream response.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(transparent)]
pub struct Standardized(Map<String, Value>);

impl Standardized {
    pub fn new() -> Self {
        Self::default()
    }

    /// Declare a field. A missing value is stored as `null`.
    pub fn set(mut self, key: &str, value: Option<Value>) -> Self {
        self.0.insert(key.to_string(), value.unwrap_or(Value::Null));
        self
    }

    /// Value of a declared field (`Some(&Value::Null)` when declared but missing).
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    /// String value of a field, if it is a string.
    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.0.get(key).and_then(Value::as_str)
    }

    /// Names of the declared fields.
    pub fn fields(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(String::as_str)
    }

    pub fn into_inner(self) -> Map<String, Value> {
        self.0
    }
}

/// Response schema of a known upstream source.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Schema {
    IpInfo,
    IpApi,
    IpSb,
    IpGs,
    Skk,
    IpZx,
    IpRegistry,
    IpData,
    IpWhois,
    Ipqs,
    Scamalytics,
    AbuseIpDb,
    Cloudflare,
}

impl Schema {
    pub const ALL: [Schema; 13] = [
        Schema::IpInfo,
        Schema::IpApi,
        Schema::IpSb,
        Schema::IpGs,
        Schema::Skk,
        Schema::IpZx,
        Schema::IpRegistry,
        Schema::IpData,
        Schema::IpWhois,
        Schema::Ipqs,
        Schema::Scamalytics,
        Schema::AbuseIpDb,
        Schema::Cloudflare,
    ];

    /// Look up a schema by its registered name.
    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|s| s.name() == name)
    }

    /// Registered name of this schema.
    pub fn name(&self) -> &'static str {
        match self {
            Schema::IpInfo => "ipinfo",
            Schema::IpApi => "ipapi",
            Schema::IpSb => "ipsb",
            Schema::IpGs => "ipgs",
            Schema::Skk => "skk",
            Schema::IpZx => "ipzx",
            Schema::IpRegistry => "ipregistry",
            Schema::IpData => "ipdata",
            Schema::IpWhois => "ipwhois",
            Schema::Ipqs => "ipqs",
            Schema::Scamalytics => "scamalytics",
            Schema::AbuseIpDb => "abuseipdb",
            Schema::Cloudflare => "cloudflare",
        }
    }

    /// Map a cleaned payload onto the common fields.
    pub fn standardize(&self, data: &Map<String, Value>) -> Standardized {
        match self {
            Schema::IpInfo => geo::ipinfo(data),
            Schema::IpApi => geo::ipapi(data),
            Schema::IpSb => geo::ipsb(data),
            Schema::IpGs | Schema::Skk | Schema::IpZx => geo::basic(data),
            Schema::IpRegistry => geo::ipregistry(data),
            Schema::IpData => geo::ipdata(data),
            Schema::IpWhois => geo::ipwhois(data),
            Schema::Ipqs => risk::ipqs(data),
            Schema::Scamalytics => risk::scamalytics(data),
            Schema::AbuseIpDb => risk::abuseipdb(data),
            Schema::Cloudflare => risk::cloudflare(data),
        }
    }
}

/// Standardize a raw payload using the schema registered under `schema_name`.
///
/// Returns `None` when the payload is not an object, carries an `error`
/// key, or no schema is registered under that name.
pub fn normalize(schema_name: &str, raw: &Value) -> Option<Standardized> {
    let object = raw.as_object()?;
    if object.contains_key("error") {
        return None;
    }

    let schema = Schema::from_name(schema_name)?;
    Some(schema.standardize(&clean(object)))
}

/// Drop top-level string fields that look garbled by a bad decode.
pub fn clean(raw: &Map<String, Value>) -> Map<String, Value> {
    raw.iter()
        .filter(|(_, value)| !is_garbled(value))
        .map(|(key, value)| (key.clone(), value.clone()))
        .collect()
}

fn is_garbled(value: &Value) -> bool {
    match value {
        Value::String(s) => s == "?" || s.contains(REPLACEMENT_CHAR),
        _ => false,
    }
}

/// Walk `path` through nested objects. Missing keys, non-object
/// intermediates and `null` all yield `None`.
fn lookup<'a>(data: &'a Map<String, Value>, path: &[&str]) -> Option<&'a Value> {
    let (last, parents) = path.split_last()?;
    let mut current = data;
    for key in parents {
        current = current.get(*key)?.as_object()?;
    }
    current.get(*last).filter(|v| !v.is_null())
}

fn field(data: &Map<String, Value>, path: &[&str]) -> Option<Value> {
    lookup(data, path).cloned()
}

/// First whitespace-separated word of a string field ("AS15169 Google LLC" -> "AS15169").
fn first_word(data: &Map<String, Value>, path: &[&str]) -> Option<Value> {
    lookup(data, path)?
        .as_str()?
        .split(' ')
        .next()
        .map(|word| Value::String(word.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn object(value: Value) -> Map<String, Value> {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn test_schema_names_round_trip() {
        for schema in Schema::ALL {
            assert_eq!(Schema::from_name(schema.name()), Some(schema));
        }
        assert_eq!(Schema::from_name("unknown"), None);
        assert_eq!(Schema::from_name("IPINFO"), None);
    }

    #[test]
    fn test_error_payload_is_not_standardized() {
        assert!(normalize("ipinfo", &json!({"error": "x"})).is_none());
        assert!(normalize("ipapi", &json!({"error": "x", "country": "US"})).is_none());
        assert!(normalize(
            "ipinfo",
            &json!({"error": "Invalid JSON", "rawText": "<html>"})
        )
        .is_none());
    }

    #[test]
    fn test_unknown_schema_is_not_standardized() {
        assert!(normalize("mystery", &json!({"country": "US"})).is_none());
    }

    #[test]
    fn test_non_object_is_not_standardized() {
        assert!(normalize("ipinfo", &Value::Null).is_none());
        assert!(normalize("ipinfo", &json!(["US"])).is_none());
        assert!(normalize("ipinfo", &json!("US")).is_none());
    }

    #[test]
    fn test_clean_drops_question_mark_fields() {
        let raw = object(json!({
            "country": "?",
            "city": "Mountain View",
            "isp": "??",
            "asn": 15169,
        }));

        let cleaned = clean(&raw);
        assert!(!cleaned.contains_key("country"));
        assert_eq!(cleaned["city"], "Mountain View");
        assert_eq!(cleaned["isp"], "??");
        assert_eq!(cleaned["asn"], 15169);
    }

    #[test]
    fn test_clean_drops_replacement_characters() {
        let raw = object(json!({"city": "Bei\u{FFFD}jing", "country": "CN"}));
        let cleaned = clean(&raw);
        assert!(!cleaned.contains_key("city"));
        assert_eq!(cleaned["country"], "CN");
    }

    #[test]
    fn test_clean_is_top_level_only() {
        let raw = object(json!({"location": {"city": "?"}}));
        let cleaned = clean(&raw);
        assert_eq!(cleaned["location"]["city"], "?");
    }

    #[test]
    fn test_garbled_field_becomes_null_after_transform() {
        let standardized =
            normalize("ipgs", &json!({"country": "?", "city": "Tokyo", "isp": "KDDI"})).unwrap();
        assert_eq!(standardized.get("country"), Some(&Value::Null));
        assert_eq!(standardized.get_str("city"), Some("Tokyo"));
    }

    #[test]
    fn test_lookup_is_null_safe() {
        let data = object(json!({"a": {"b": {"c": 1}}, "n": null, "s": "x"}));
        assert_eq!(lookup(&data, &["a", "b", "c"]), Some(&json!(1)));
        assert_eq!(lookup(&data, &["a", "x", "c"]), None);
        assert_eq!(lookup(&data, &["s", "b"]), None);
        assert_eq!(lookup(&data, &["n"]), None);
        assert_eq!(lookup(&data, &[]), None);
    }

    #[test]
    fn test_first_word() {
        let data = object(json!({"org": "AS15169 Google LLC", "n": 1}));
        assert_eq!(first_word(&data, &["org"]), Some(json!("AS15169")));
        assert_eq!(first_word(&data, &["n"]), None);
        assert_eq!(first_word(&data, &["missing"]), None);
    }

    #[test]
    fn test_standardized_serializes_flat() {
        let standardized = Standardized::new()
            .set("country", Some(json!("US")))
            .set("city", None);
        assert_eq!(
            serde_json::to_value(&standardized).unwrap(),
            json!({"country": "US", "city": null})
        );
        assert_eq!(standardized.fields().count(), 2);
    }
}
