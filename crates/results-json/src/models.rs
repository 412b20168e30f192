use edgepick_core::{ScoredCandidate, Selection};
use serde::Serialize;
use std::collections::BTreeMap;
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;

pub const TOP_IPS_FILE: &str = "top_ips.json";
pub const TOP_IPS_CSV_FILE: &str = "top_ips.csv";
pub const TOP_BLOCKS_FILE: &str = "top_blocks.json";
pub const REGION_BLOCKS_FILE: &str = "region_blocks.json";

/// Summary of one run, printed as JSON by the CLI.
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub tool_version: String,
    pub backend: String,
    pub started_at: String,
    pub ended_at: String,
    pub duration_ms: u128,
    pub ranges: usize,
    pub blocks: usize,
    pub top_blocks: Vec<String>,
    pub top_ips: Vec<ScoredCandidate>,
}

impl RunReport {
    pub fn new(tool_version: &str, backend: &str, started_at: String, duration_ms: u128, ranges: usize, blocks: usize, selection: &Selection) -> Self {
        RunReport {
            tool_version: tool_version.to_string(),
            backend: backend.to_string(),
            started_at,
            ended_at: now_rfc3339(),
            duration_ms,
            ranges,
            blocks,
            top_blocks: selection.top_blocks.iter().map(|b| b.to_string()).collect(),
            top_ips: selection.top_hosts.clone(),
        }
    }
}

/// Country -> block strings.
pub type RegionGroups = BTreeMap<String, Vec<String>>;

pub fn now_rfc3339() -> String {
    OffsetDateTime::now_utc().format(&Rfc3339).unwrap_or_else(|_| String::new())
}
