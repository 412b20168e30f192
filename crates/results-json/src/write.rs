use crate::{RegionGroups, REGION_BLOCKS_FILE, TOP_BLOCKS_FILE, TOP_IPS_CSV_FILE, TOP_IPS_FILE};
use anyhow::{anyhow, Result};
use edgepick_core::{ScoredCandidate, Selection};
use serde::Serialize;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use tracing::info;

fn write_json<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<()> {
    let file = File::create(path).map_err(|e| anyhow!("failed to create {}: {}", path.display(), e))?;
    let mut w = BufWriter::new(file);
    serde_json::to_writer_pretty(&mut w, value)?;
    writeln!(w)?;
    w.flush()?;
    Ok(())
}

pub fn write_top_ips_csv(path: &Path, hosts: &[ScoredCandidate]) -> Result<()> {
    let mut wtr = csv::Writer::from_writer(File::create(path)?);
    wtr.write_record(["ip", "score", "avg_delay", "loss_rate"])?;
    for h in hosts {
        wtr.write_record([h.address.to_string(), format!("{:.2}", h.score), format!("{:.3}", h.avg_latency_ms), h.loss_percent.to_string()])?;
    }
    wtr.flush()?;
    Ok(())
}

/// Write the ranked hosts, the ranked blocks and, when given, the region grouping into `dir`.
/// Returns the paths written.
pub fn persist(dir: &Path, selection: &Selection, regions: Option<&RegionGroups>, with_csv: bool) -> Result<Vec<PathBuf>> {
    std::fs::create_dir_all(dir).map_err(|e| anyhow!("failed to create {}: {}", dir.display(), e))?;
    let mut written = Vec::new();

    let p = dir.join(TOP_IPS_FILE);
    write_json(&p, &selection.top_hosts)?;
    written.push(p);

    let p = dir.join(TOP_BLOCKS_FILE);
    write_json(&p, &selection.top_blocks)?;
    written.push(p);

    if let Some(groups) = regions {
        let p = dir.join(REGION_BLOCKS_FILE);
        write_json(&p, groups)?;
        written.push(p);
    }
    if with_csv {
        let p = dir.join(TOP_IPS_CSV_FILE);
        write_top_ips_csv(&p, &selection.top_hosts)?;
        written.push(p);
    }
    info!(dir = %dir.display(), files = written.len(), "results written");
    Ok(written)
}

#[cfg(test)]
mod tests {
    use super::*;
    use edgepick_core::CandidateBlock;
    use std::net::Ipv4Addr;

    fn scratch(name: &str) -> PathBuf {
        std::env::temp_dir().join(format!("edgepick-{}-{}", name, std::process::id()))
    }

    fn selection() -> Selection {
        Selection {
            top_hosts: vec![
                ScoredCandidate { address: Ipv4Addr::new(104, 16, 1, 9), score: 98.0, avg_latency_ms: 10.0, loss_percent: 0 },
                ScoredCandidate { address: Ipv4Addr::new(104, 16, 1, 3), score: 0.0, avg_latency_ms: 9999.0, loss_percent: 100 },
            ],
            top_blocks: vec![CandidateBlock { address: Ipv4Addr::new(104, 16, 1, 0), mask: 13 }],
        }
    }

    #[test]
    fn writes_json_files() {
        let dir = scratch("persist");
        let mut groups = RegionGroups::new();
        groups.insert("Japan".into(), vec!["104.16.1.0/13".into()]);
        let files = persist(&dir, &selection(), Some(&groups), false).unwrap();
        assert_eq!(files.len(), 3);

        let ips: serde_json::Value = serde_json::from_str(&std::fs::read_to_string(dir.join(TOP_IPS_FILE)).unwrap()).unwrap();
        assert_eq!(ips[0]["ip"], "104.16.1.9");
        assert_eq!(ips[1]["loss_rate"], 100);
        let blocks: Vec<String> = serde_json::from_str(&std::fs::read_to_string(dir.join(TOP_BLOCKS_FILE)).unwrap()).unwrap();
        assert_eq!(blocks, vec!["104.16.1.0/13"]);
        let regions: RegionGroups = serde_json::from_str(&std::fs::read_to_string(dir.join(REGION_BLOCKS_FILE)).unwrap()).unwrap();
        assert_eq!(regions["Japan"].len(), 1);
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn csv_is_optional() {
        let dir = scratch("csv");
        let files = persist(&dir, &selection(), None, true).unwrap();
        assert_eq!(files.len(), 3);
        let text = std::fs::read_to_string(dir.join(TOP_IPS_CSV_FILE)).unwrap();
        let mut lines = text.lines();
        assert_eq!(lines.next(), Some("ip,score,avg_delay,loss_rate"));
        assert_eq!(lines.next(), Some("104.16.1.9,98.00,10.000,0"));
        assert!(!dir.join(REGION_BLOCKS_FILE).exists());
        let _ = std::fs::remove_dir_all(&dir);
    }
}
