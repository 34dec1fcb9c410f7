//! Syntactic IP literal checks.
//!
//! This is a sieve for obvious garbage, not an address-space validator.
//! IPv4 segments may carry leading zeros ("010", "00") and IPv6 segments
//! are checked one by one without validating where `::` appears or how
//! often.

/// Returns true if `s` looks like an IPv4 or IPv6 literal.
pub fn is_valid_ip(s: &str) -> bool {
    is_valid_ipv4(s) || is_valid_ipv6(s)
}

fn is_valid_ipv4(s: &str) -> bool {
    let parts: Vec<&str> = s.split('.').collect();
    if parts.len() != 4 {
        return false;
    }

    parts.iter().all(|part| {
        !part.is_empty()
            && part.bytes().all(|b| b.is_ascii_digit())
            // Long zero-padded segments still count; overflow means > 255.
            && part.parse::<u64>().map_or(false, |n| n <= 255)
    })
}

fn is_valid_ipv6(s: &str) -> bool {
    let parts: Vec<&str> = s.split(':').collect();
    if parts.len() < 3 || parts.len() > 8 {
        return false;
    }

    parts
        .iter()
        .all(|part| part.len() <= 4 && part.bytes().all(|b| b.is_ascii_hexdigit()))
}
