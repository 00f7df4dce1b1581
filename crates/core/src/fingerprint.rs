//! Alert fingerprinting.
//!
//! The fingerprint is the primary key for every interaction: sort the label
//! pairs lexicographically by name, join them as `name=value` with `,`, hash
//! with MD5, emit lowercase hex. The algorithm is part of the external
//! contract and must match byte-for-byte across the backend and all clients.

use std::collections::HashMap;

/// Computes the fingerprint of an alert's full label set.
///
/// Absent labels are simply not part of the input; empty string values are
/// included.
pub fn alert_fingerprint(labels: &HashMap<String, String>) -> String {
    let mut pairs: Vec<(&str, &str)> = labels
        .iter()
        .map(|(name, value)| (name.as_str(), value.as_str()))
        .collect();
    pairs.sort_by(|a, b| a.0.cmp(b.0));

    let joined = pairs
        .iter()
        .map(|(name, value)| format!("{}={}", name, value))
        .collect::<Vec<_>>()
        .join(",");

    format!("{:x}", md5::compute(joined.as_bytes()))
}
