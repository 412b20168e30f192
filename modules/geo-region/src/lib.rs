//! Offline country lookup for candidate blocks and region filtering.

use edgepick_core::CandidateBlock;
use maxminddb::{geoip2, Reader};
use std::collections::{BTreeMap, HashSet};
use std::net::{IpAddr, Ipv4Addr};
use std::path::Path;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info};

pub const UNKNOWN_COUNTRY: &str = "Unknown";

#[derive(Debug, thiserror::Error)]
pub enum GeoError {
    #[error("failed to open geo database: {0}")]
    Open(#[from] maxminddb::MaxMindDBError),
    #[error("failed to download geo database from {url}: {reason}")]
    Download { url: String, reason: String },
    #[error("geo database io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Maps an address to an English country name.
pub trait CountryResolver: Send + Sync {
    /// Falls back to [`UNKNOWN_COUNTRY`] on any failure.
    fn resolve_country(&self, addr: Ipv4Addr) -> String;
}

/// MaxMind country/city database reader.
pub struct GeoResolver {
    reader: Reader<Vec<u8>>,
}

impl GeoResolver {
    pub fn open<P: AsRef<Path>>(db_path: P) -> Result<Self, GeoError> {
        let reader = Reader::open_readfile(db_path)?;
        Ok(GeoResolver { reader })
    }

    fn lookup(&self, addr: Ipv4Addr) -> Option<String> {
        let rec: geoip2::Country = self.reader.lookup(IpAddr::V4(addr)).ok()?;
        rec.country
            .and_then(|c| c.names)
            .and_then(|n| n.get("en").map(|s| s.to_string()))
    }
}

impl CountryResolver for GeoResolver {
    fn resolve_country(&self, addr: Ipv4Addr) -> String {
        self.lookup(addr).unwrap_or_else(|| UNKNOWN_COUNTRY.to_string())
    }
}

/// Download the database to `path` unless it already exists.
pub async fn ensure_database(path: &Path, url: &str, timeout: Duration) -> Result<(), GeoError> {
    if path.exists() {
        return Ok(());
    }
    info!(%url, path = %path.display(), "downloading geo database");
    let download_err = |reason: String| GeoError::Download { url: url.to_string(), reason };
    let client = reqwest::Client::builder().timeout(timeout).build().map_err(|e| download_err(e.to_string()))?;
    let resp = client.get(url).send().await.map_err(|e| download_err(e.to_string()))?;
    let resp = resp.error_for_status().map_err(|e| download_err(e.to_string()))?;
    let bytes = resp.bytes().await.map_err(|e| download_err(e.to_string()))?;
    // `path` only ever holds a complete file.
    let partial = path.with_extension("part");
    let mut f = tokio::fs::File::create(&partial).await?;
    f.write_all(&bytes).await?;
    f.flush().await?;
    drop(f);
    tokio::fs::rename(&partial, path).await?;
    Ok(())
}

/// Resolve each block's network address and keep those whose country is in `regions`.
/// An empty `regions` keeps everything. Order of `blocks` is preserved.
pub fn filter_blocks<R: CountryResolver + ?Sized>(
    resolver: &R,
    blocks: &[CandidateBlock],
    regions: &[String],
) -> Vec<(CandidateBlock, String)> {
    let wanted: HashSet<&str> = regions.iter().map(|s| s.as_str()).collect();
    let kept: Vec<(CandidateBlock, String)> = blocks
        .iter()
        .map(|b| (*b, resolver.resolve_country(b.address)))
        .filter(|(_, c)| wanted.is_empty() || wanted.contains(c.as_str()))
        .collect();
    debug!(total = blocks.len(), kept = kept.len(), "region filter applied");
    kept
}

/// Country -> block strings, for the region grouping output.
pub fn group_by_country(tagged: &[(CandidateBlock, String)]) -> BTreeMap<String, Vec<String>> {
    let mut out: BTreeMap<String, Vec<String>> = BTreeMap::new();
    for (b, c) in tagged {
        out.entry(c.clone()).or_default().push(b.to_string());
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    struct ByFirstOctet;

    impl CountryResolver for ByFirstOctet {
        fn resolve_country(&self, addr: Ipv4Addr) -> String {
            match addr.octets()[0] {
                1 => "Hong Kong".into(),
                2 => "Japan".into(),
                _ => UNKNOWN_COUNTRY.into(),
            }
        }
    }

    fn blk(s: &str) -> CandidateBlock {
        CandidateBlock { address: s.parse().unwrap(), mask: 24 }
    }

    #[test]
    fn filter_keeps_wanted_regions_in_order() {
        let blocks = [blk("2.0.0.0"), blk("9.0.0.0"), blk("1.0.0.0"), blk("2.0.1.0")];
        let kept = filter_blocks(&ByFirstOctet, &blocks, &["Japan".into(), "Hong Kong".into()]);
        let addrs: Vec<_> = kept.iter().map(|(b, _)| b.to_string()).collect();
        assert_eq!(addrs, vec!["2.0.0.0/24", "1.0.0.0/24", "2.0.1.0/24"]);
    }

    #[test]
    fn empty_region_list_keeps_all() {
        let blocks = [blk("2.0.0.0"), blk("9.0.0.0")];
        assert_eq!(filter_blocks(&ByFirstOctet, &blocks, &[]).len(), 2);
    }

    #[test]
    fn grouping_by_country() {
        let tagged = vec![(blk("2.0.0.0"), "Japan".to_string()), (blk("1.0.0.0"), "Hong Kong".into()), (blk("2.0.1.0"), "Japan".into())];
        let g = group_by_country(&tagged);
        assert_eq!(g["Japan"], vec!["2.0.0.0/24", "2.0.1.0/24"]);
        assert_eq!(g["Hong Kong"], vec!["1.0.0.0/24"]);
    }

    #[test]
    fn missing_database_is_an_error() {
        assert!(matches!(GeoResolver::open("/nonexistent/GeoLite2-Country.mmdb"), Err(GeoError::Open(_))));
    }

    #[tokio::test]
    async fn existing_database_is_not_downloaded() {
        let path = std::env::temp_dir().join(format!("edgepick-geo-{}.mmdb", std::process::id()));
        std::fs::write(&path, b"placeholder").unwrap();
        // The URL is never contacted when the file exists.
        ensure_database(&path, "http://127.0.0.1:9/db.mmdb", Duration::from_millis(200)).await.unwrap();
        let _ = std::fs::remove_file(&path);
    }
}
