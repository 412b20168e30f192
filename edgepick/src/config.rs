use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::warn;

pub const DEFAULT_CONFIG_FILE: &str = "edgepick.yaml";

/// `select:` section of the config file. Every field is optional; CLI flags win.
#[derive(Debug, Default, Deserialize, Clone, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct SelectConfig {
    pub ranges_url: Option<String>,
    pub ranges_file: Option<PathBuf>,
    pub workers: Option<usize>,
    pub block_workers: Option<usize>,
    pub ping_count: Option<u32>,
    pub ping_wait_ms: Option<u64>,
    pub probe_timeout_ms: Option<u64>,
    pub port_timeout_ms: Option<u64>,
    pub port: Option<u16>,
    pub top_blocks: Option<usize>,
    pub top_hosts: Option<usize>,
    pub qps: Option<u32>,
    pub backend: Option<String>,
    pub regions: Option<Vec<String>>,
    pub geo_db: Option<PathBuf>,
    pub geo_db_url: Option<String>,
    pub out_dir: Option<PathBuf>,
    pub format: Option<String>,
    pub csv: Option<bool>,
}

#[derive(Debug, Default, Deserialize, Clone, PartialEq)]
pub struct Config {
    pub select: Option<SelectConfig>,
}

/// Load `path`, or `./edgepick.yaml` when no path is given and that file exists.
/// An explicit path that cannot be read or parsed is an error.
pub fn load_config(path: Option<&Path>) -> anyhow::Result<Option<Config>> {
    let (path, explicit) = match path {
        Some(p) => (p.to_path_buf(), true),
        None => {
            let p = Path::new(DEFAULT_CONFIG_FILE);
            if p.exists() { (p.to_path_buf(), false) } else { return Ok(None); }
        }
    };
    let parsed = fs::read_to_string(&path)
        .map_err(anyhow::Error::from)
        .and_then(|s| serde_yaml::from_str::<Config>(&s).map_err(anyhow::Error::from));
    match parsed {
        Ok(cfg) => Ok(Some(cfg)),
        Err(e) if explicit => Err(anyhow::anyhow!("failed to load config {}: {}", path.display(), e)),
        Err(e) => {
            warn!(path = %path.display(), error = %e, "ignoring unreadable config");
            Ok(None)
        }
    }
}
