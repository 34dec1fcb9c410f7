//! Geolocation database schemas.

use super::{field, first_word, Standardized};
use serde_json::{Map, Value};

pub(super) fn ipinfo(data: &Map<String, Value>) -> Standardized {
    Standardized::new()
        .set("country", field(data, &["country"]))
        .set("city", field(data, &["city"]))
        .set("isp", field(data, &["org"]))
        .set("asn", first_word(data, &["org"]))
        .set("loc", field(data, &["loc"]))
}

pub(super) fn ipapi(data: &Map<String, Value>) -> Standardized {
    Standardized::new()
        .set("country", field(data, &["country"]))
        .set("city", field(data, &["city"]))
        .set("isp", field(data, &["isp"]))
        .set("org", field(data, &["org"]))
        .set("asn", first_word(data, &["as"]))
}

pub(super) fn ipsb(data: &Map<String, Value>) -> Standardized {
    Standardized::new()
        .set("country", field(data, &["country"]))
        .set("city", field(data, &["city"]))
        .set("isp", field(data, &["organization"]))
        .set("asn", field(data, &["asn"]))
}

/// ip.gs, skk.moe and zxinc share the flat country/city/isp layout.
pub(super) fn basic(data: &Map<String, Value>) -> Standardized {
    Standardized::new()
        .set("country", field(data, &["country"]))
        .set("city", field(data, &["city"]))
        .set("isp", field(data, &["isp"]))
}

pub(super) fn ipregistry(data: &Map<String, Value>) -> Standardized {
    Standardized::new()
        .set("country", field(data, &["location", "country", "code"]))
        .set("city", field(data, &["location", "city"]))
        .set("isp", field(data, &["company", "name"]))
        .set("asn", field(data, &["connection", "asn"]))
}

pub(super) fn ipdata(data: &Map<String, Value>) -> Standardized {
    Standardized::new()
        .set("country", field(data, &["country_code"]))
        .set("city", field(data, &["city"]))
        .set("isp", field(data, &["org"]))
        .set("asn", field(data, &["asn", "asn"]))
}

pub(super) fn ipwhois(data: &Map<String, Value>) -> Standardized {
    Standardized::new()
        .set("country", field(data, &["country_code"]))
        .set("city", field(data, &["city"]))
        .set("isp", field(data, &["isp"]))
        .set("asn", field(data, &["connection", "asn"]))
}
