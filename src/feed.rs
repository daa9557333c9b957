//! Product feed parsing
//!
//! Feeds are RSS 2.0 channels whose items carry Google merchant fields in the `g:`
//! namespace (`g:id`, `g:title`, `g:price`). Plain `<guid>` and `<title>` are used when the
//! namespaced field is missing.

use crate::error::{Error, Result};
use crate::types::Product;
use tracing::debug;

const MERCHANT_PREFIX: &str = "g";

/// Parse an uploaded feed into products, in document order
///
/// Every item must yield an id and a numeric price; otherwise the whole feed is rejected
/// with [`Error::InvalidFeed`] naming the offending item.
pub fn parse_feed(bytes: &[u8], price_difference: f64) -> Result<Vec<Product>> {
    let channel = rss::Channel::read_from(bytes)
        .map_err(|e| Error::InvalidFeed(format!("RSS parse error: {}", e)))?;

    let products = channel
        .items()
        .iter()
        .enumerate()
        .map(|(index, item)| {
            let id = merchant_field(item, "id")
                .or_else(|| item.guid().map(|g| g.value().to_string()))
                .ok_or_else(|| Error::InvalidFeed(format!("item {index} has no id")))?;

            let title = merchant_field(item, "title")
                .or_else(|| item.title().map(|t| t.to_string()))
                .unwrap_or_default();

            let raw_price = merchant_field(item, "price")
                .ok_or_else(|| Error::InvalidFeed(format!("item {index} ({id}) has no price")))?;
            let approximate_price = parse_price(&raw_price).ok_or_else(|| {
                Error::InvalidFeed(format!(
                    "item {index} ({id}) has unparseable price '{raw_price}'"
                ))
            })?;

            Ok(Product {
                id,
                title,
                approximate_price,
                price_difference,
                note: None,
            })
        })
        .collect::<Result<Vec<_>>>()?;

    debug!(count = products.len(), "parsed product feed");
    Ok(products)
}

/// Value of a `g:<name>` element on an item, trimmed
fn merchant_field(item: &rss::Item, name: &str) -> Option<String> {
    item.extensions()
        .get(MERCHANT_PREFIX)?
        .get(name)?
        .first()?
        .value()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

/// Keep digits, dots and minus signs, then parse ("1 299.00 UAH" -> 1299.0)
fn parse_price(raw: &str) -> Option<f64> {
    let numeric: String = raw
        .chars()
        .filter(|c| c.is_ascii_digit() || *c == '.' || *c == '-')
        .collect();
    numeric.parse::<f64>().ok().filter(|p| p.is_finite())
}
