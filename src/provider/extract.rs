//! Price extraction from provider payloads.
//!
//! Providers encode the current price in different places. Each extractor is a
//! pure function that looks in one place; chains are tried in order and the
//! first strictly positive value wins.

use serde_json::Value;

pub type Extractor = fn(&Value) -> Option<f64>;

/// Layer 1: price fields at the top level of a product payload.
pub const DIRECT_CHAIN: &[(&str, Extractor)] = &[("direct", direct_price)];

/// Layer 2: alternate endpoint, tolerant of several payload shapes.
pub const ALTERNATE_CHAIN: &[(&str, Extractor)] = &[
    ("time_series", time_series_price),
    ("stats", aggregated_stats_price),
    ("data", generic_data_price),
];

/// First strictly positive price in `chain`, with the name of the extractor that found it.
pub fn first_price(payload: &Value, chain: &[(&'static str, Extractor)]) -> Option<(&'static str, f64)> {
    chain
        .iter()
        .find_map(|&(name, extract)| extract(payload).map(|p| (name, p)))
}

/// `{"buy_box_price": 12.5}`, `{"price": "12.50"}` or `{"current_price": 12.5}`.
pub fn direct_price(v: &Value) -> Option<f64> {
    ["buy_box_price", "price", "current_price"]
        .iter()
        .find_map(|k| v.get(*k).and_then(as_price))
}

/// `{"price_history": [[ts, price], ...]}` or `[{"ts": .., "price": ..}, ...]`.
/// Only the most recent point counts; an old price is not a current price.
pub fn time_series_price(v: &Value) -> Option<f64> {
    let last = v.get("price_history")?.as_array()?.last()?;
    match last {
        Value::Array(pair) => pair.get(1).and_then(as_price),
        Value::Object(_) => last.get("price").and_then(as_price),
        other => as_price(other),
    }
}

/// `{"stats": {"current": .., "buy_box": .., "avg30": ..}}`, first present wins.
pub fn aggregated_stats_price(v: &Value) -> Option<f64> {
    let stats = v.get("stats")?;
    ["current", "buy_box", "avg30"]
        .iter()
        .find_map(|k| stats.get(*k).and_then(as_price))
}

/// `{"data": {"price": ..}}`, `{"data": {"amount": ..}}` or `{"data": 12.5}`.
pub fn generic_data_price(v: &Value) -> Option<f64> {
    let data = v.get("data")?;
    match data {
        Value::Object(_) => ["price", "amount"]
            .iter()
            .find_map(|k| data.get(*k).and_then(as_price)),
        other => as_price(other),
    }
}

/// Strictly positive, finite number from a JSON number or numeric string.
pub fn as_price(v: &Value) -> Option<f64> {
    v.as_f64()
        .or_else(|| v.as_str().and_then(|s| s.trim().parse::<f64>().ok()))
        .filter(|p| p.is_finite() && *p > 0.0)
}
