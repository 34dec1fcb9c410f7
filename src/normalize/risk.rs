//! Risk-scoring and proxy-detection schemas.

use super::{field, Standardized};
use serde_json::{Map, Value};

pub(super) fn ipqs(data: &Map<String, Value>) -> Standardized {
    Standardized::new()
        .set("country", field(data, &["country"]))
        .set("city", field(data, &["city"]))
        .set("isp", field(data, &["organization"]))
        .set("fraud_score", field(data, &["fraud_score"]))
        .set("proxy", field(data, &["proxy"]))
        .set("vpn", field(data, &["vpn"]))
        .set("tor", field(data, &["tor"]))
}

pub(super) fn scamalytics(data: &Map<String, Value>) -> Standardized {
    Standardized::new()
        .set("fraud_score", field(data, &["score", "risk"]))
        .set("proxy", field(data, &["signals", "proxy"]))
        .set("vpn", field(data, &["signals", "vpn"]))
        .set("tor", field(data, &["signals", "tor"]))
}

pub(super) fn abuseipdb(data: &Map<String, Value>) -> Standardized {
    Standardized::new()
        .set("abuse_score", field(data, &["data", "abuseConfidenceScore"]))
        .set("isp", field(data, &["data", "isp"]))
        .set("country", field(data, &["data", "countryCode"]))
}

pub(super) fn cloudflare(data: &Map<String, Value>) -> Standardized {
    Standardized::new()
        .set("risk_score", field(data, &["ip", "riskScore"]))
        .set("proxy", field(data, &["ip", "proxy"]))
}
