//! Barcode-link adapter.
//!
//! The plant runs a lookup service that maps scanned barcodes to their
//! canonical form. The call is best-effort by design: a 3-second timeout,
//! and every failure mode collapses to `None` so the aggregator can fall
//! back to the raw value. An unreachable link service must never block or
//! fail an inspection.

use std::time::Duration;

use tracing::{debug, warn};

pub const LINK_TIMEOUT: Duration = Duration::from_secs(3);

#[derive(Clone)]
pub struct BarcodeLinker {
    client: reqwest::Client,
    url: Option<String>,
    enabled: bool,
}

impl BarcodeLinker {
    pub fn new(url: Option<String>, enabled: bool) -> Self {
        let client = reqwest::Client::builder()
            .timeout(LINK_TIMEOUT)
            .build()
            .unwrap_or_else(|e| {
                warn!("barcode-link client builder failed ({e}), using defaults");
                reqwest::Client::new()
            });
        Self { client, url, enabled }
    }

    /// Look up the linked form of a scanned barcode.
    ///
    /// The request body is the barcode as a JSON string (quoted). The
    /// response is plain text that may itself carry one level of JSON
    /// quoting; a literal `null` (case-insensitive) or an empty body means
    /// "no linked data".
    pub async fn lookup(&self, raw_barcode: &str) -> Option<String> {
        if !self.enabled {
            debug!("barcode linking disabled");
            return None;
        }
        let url = self.url.as_deref()?;

        let barcode = raw_barcode.trim();
        if barcode.is_empty() {
            return None;
        }

        let response = match self
            .client
            .post(url)
            .json(&barcode)
            .header("accept", "*/*")
            .send()
            .await
        {
            Ok(response) => response,
            Err(e) => {
                warn!("barcode-link request failed for {barcode:?}: {e}");
                return None;
            }
        };

        if !response.status().is_success() {
            warn!(
                "barcode-link returned status {} for {barcode:?}",
                response.status()
            );
            return None;
        }

        let body = match response.text().await {
            Ok(body) => body,
            Err(e) => {
                warn!("barcode-link body read failed for {barcode:?}: {e}");
                return None;
            }
        };

        let linked = strip_quotes(body.trim());
        if linked.is_empty() || linked.eq_ignore_ascii_case("null") {
            debug!("barcode-link has no data for {barcode:?}");
            return None;
        }
        debug!("barcode-link: {barcode:?} -> {linked:?}");
        Some(linked.to_string())
    }

    /// Linked value, or the raw barcode when linking yields nothing.
    pub async fn lookup_with_fallback(&self, raw_barcode: &str) -> String {
        match self.lookup(raw_barcode).await {
            Some(linked) => linked,
            None => raw_barcode.to_string(),
        }
    }
}

/// Remove one level of surrounding double quotes, if present.
fn strip_quotes(s: &str) -> &str {
    if s.len() >= 2 && s.starts_with('"') && s.ends_with('"') {
        &s[1..s.len() - 1]
    } else {
        s
    }
}
