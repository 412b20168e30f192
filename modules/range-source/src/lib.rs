//! Where raw address ranges come from: a remote text endpoint or a local file.

use anyhow::{anyhow, Result};
use reqwest::Client;
use std::path::Path;
use std::time::Duration;
use tracing::{info, warn};

/// Split a newline-delimited range list; trims lines, drops blanks and `#` comments.
pub fn parse_range_list(text: &str) -> Vec<String> {
    text.lines()
        .map(|l| l.trim())
        .filter(|l| !l.is_empty() && !l.starts_with('#'))
        .map(|l| l.to_string())
        .collect()
}

/// Fetches the published range list over HTTP(S).
#[derive(Debug, Clone)]
pub struct HttpRangeSource {
    client: Client,
    url: String,
}

impl HttpRangeSource {
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .user_agent(format!("edgepick/{}", env!("CARGO_PKG_VERSION")))
            .gzip(true)
            .brotli(true)
            .deflate(true)
            .build()
            .map_err(|e| anyhow!("failed to build http client: {}", e))?;
        Ok(HttpRangeSource { client, url: url.into() })
    }

    pub fn url(&self) -> &str { &self.url }

    /// Never fails: network errors and non-200 answers yield an empty list.
    pub async fn fetch_ranges(&self) -> Vec<String> {
        match self.try_fetch().await {
            Ok(ranges) => {
                info!(url = %self.url, ranges = ranges.len(), "fetched address ranges");
                ranges
            }
            Err(e) => {
                warn!(url = %self.url, error = %e, "range fetch failed");
                Vec::new()
            }
        }
    }

    async fn try_fetch(&self) -> Result<Vec<String>> {
        let resp = self.client.get(&self.url).send().await?;
        let status = resp.status();
        if status != reqwest::StatusCode::OK {
            return Err(anyhow!("unexpected status {}", status));
        }
        let body = resp.text().await?;
        Ok(parse_range_list(&body))
    }
}

/// Read ranges from a newline-delimited file.
pub fn read_ranges_file(path: &Path) -> Result<Vec<String>> {
    let text = std::fs::read_to_string(path).map_err(|e| anyhow!("failed to read {}: {}", path.display(), e))?;
    Ok(parse_range_list(&text))
}
