//! Feed, product and artifact fixtures

use feedmatch::error::Result;
use feedmatch::{JsonReportSink, Product, RecordSink};
use serde_json::value::RawValue;
use std::io::{Cursor, Write};
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Feed with three items in the Google merchant namespace
pub const MERCHANT_FEED: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<rss version="2.0" xmlns:g="http://base.google.com/ns/1.0">
  <channel>
    <title>Test Shop</title>
    <link>https://shop.example.com</link>
    <description>Test products</description>
    <item>
      <g:id>p0</g:id>
      <g:title>Electric Kettle</g:title>
      <g:price>1299.00 UAH</g:price>
    </item>
    <item>
      <g:id>p1</g:id>
      <g:title>Toaster</g:title>
      <g:price>899 UAH</g:price>
    </item>
    <item>
      <g:id>p2</g:id>
      <g:title>Blender</g:title>
      <g:price>2450.50 UAH</g:price>
    </item>
  </channel>
</rss>"#;

/// `n` products with ids `p0..p{n-1}`
pub fn products(n: usize) -> Vec<Product> {
    (0..n)
        .map(|i| Product {
            id: format!("p{i}"),
            title: format!("Product {i}"),
            approximate_price: 100.0 + i as f64,
            price_difference: 300.0,
            note: None,
        })
        .collect()
}

/// ZIP archive holding the given `(name, content)` entries, in order
pub fn zip_archive(entries: &[(&str, &str)]) -> Vec<u8> {
    let mut writer = zip::ZipWriter::new(Cursor::new(Vec::new()));
    for (name, content) in entries {
        writer
            .start_file(*name, zip::write::FileOptions::default())
            .unwrap();
        writer.write_all(content.as_bytes()).unwrap();
    }
    writer.finish().unwrap().into_inner()
}

/// A matched-records entry body listing one `{"id": ...}` record per id
pub fn matched_records(ids: &[String]) -> String {
    let records: Vec<serde_json::Value> = ids
        .iter()
        .map(|id| serde_json::json!({ "id": id }))
        .collect();
    serde_json::json!({
        "matchedProducts": records,
        "matchingProductErrors": null
    })
    .to_string()
}

/// Ids of the records in a sealed output document
pub fn document_ids(path: &Path) -> Vec<String> {
    let text = std::fs::read_to_string(path).unwrap();
    let document: serde_json::Value = serde_json::from_str(&text).unwrap();
    assert!(document["matchingProductErrors"].is_null());
    document["matchedProducts"]
        .as_array()
        .unwrap()
        .iter()
        .map(|r| r["id"].as_str().unwrap().to_string())
        .collect()
}

/// [`JsonReportSink`] that counts how often it is sealed
pub struct CountingSink {
    inner: JsonReportSink,
    seals: Arc<AtomicUsize>,
}

impl CountingSink {
    /// Wrap a new file sink; the counter is shared with the caller
    pub fn create(path: &Path) -> (Self, Arc<AtomicUsize>) {
        let seals = Arc::new(AtomicUsize::new(0));
        let sink = Self {
            inner: JsonReportSink::create(path).unwrap(),
            seals: seals.clone(),
        };
        (sink, seals)
    }
}

impl RecordSink for CountingSink {
    fn append(&mut self, record: &RawValue) -> Result<()> {
        self.inner.append(record)
    }

    fn checkpoint(&mut self) -> Result<()> {
        self.inner.checkpoint()
    }

    fn rollback(&mut self) -> Result<()> {
        self.inner.rollback()
    }

    fn records(&self) -> u64 {
        self.inner.records()
    }

    fn seal(self) -> Result<u64> {
        self.seals.fetch_add(1, Ordering::SeqCst);
        self.inner.seal()
    }
}
