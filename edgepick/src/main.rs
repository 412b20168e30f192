use anyhow::{anyhow, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};
use edgepick_core::{score_measurement, CandidateBlock, Measurement, SelectError, SelectorConfig};
use funnel::Selector;
use probe::{build_prober, ProbeBackend};
use results_json::{now_rfc3339, persist, RegionGroups, RunReport};
use std::net::Ipv4Addr;
use std::path::PathBuf;
use std::time::{Duration, Instant};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

mod config;

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
enum OutputFormat { Text, Json, Jsonl }

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
enum Backend { Auto, Icmp, Ping }

impl From<Backend> for ProbeBackend {
    fn from(b: Backend) -> Self {
        match b {
            Backend::Auto => ProbeBackend::Auto,
            Backend::Icmp => ProbeBackend::Icmp,
            Backend::Ping => ProbeBackend::Ping,
        }
    }
}

#[derive(Debug, Parser)]
#[command(name = "edgepick", version, about = "Pick the fastest edge addresses out of published address ranges")]
struct Cli {
    /// Optional config file (YAML). If omitted, loads ./edgepick.yaml if present.
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    /// More log output (-v debug, -vv trace). RUST_LOG takes precedence.
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Print version information
    Version,
    /// Run the block and host funnel and print the best addresses
    Select(SelectArgs),
    /// Expand CIDR ranges into deduplicated /24 candidate blocks
    Expand {
        /// CIDR ranges (e.g., 104.16.0.0/13)
        #[arg(required = true)]
        ranges: Vec<String>,
        /// Output format: text, json, or jsonl
        #[arg(long, value_enum, default_value_t = OutputFormat::Text)]
        format: OutputFormat,
    },
    /// Measure, port-check and score a single address
    Probe {
        address: Ipv4Addr,
        /// Service port to check
        #[arg(long, default_value_t = 443)]
        port: u16,
        #[arg(long, value_enum, default_value_t = Backend::Auto)]
        backend: Backend,
        /// Echo requests to send
        #[arg(long, default_value_t = 3)]
        count: u32,
        /// Overall probe timeout in milliseconds
        #[arg(long, default_value_t = 3000)]
        timeout_ms: u64,
        /// Port check timeout in milliseconds
        #[arg(long, default_value_t = 2000)]
        port_timeout_ms: u64,
        #[arg(long, value_enum, default_value_t = OutputFormat::Text)]
        format: OutputFormat,
    },
}

#[derive(Debug, Args, Default, Clone)]
struct SelectArgs {
    /// CIDR ranges to consider; takes precedence over --ranges-file and --ranges-url
    ranges: Vec<String>,
    /// File with newline-delimited ranges (comments with # and blanks ignored)
    #[arg(long, value_name = "FILE")]
    ranges_file: Option<PathBuf>,
    /// URL serving a newline-delimited range list
    #[arg(long, value_name = "URL")]
    ranges_url: Option<String>,
    /// Max concurrent probes in the host stage [default: 50]
    #[arg(long)]
    workers: Option<usize>,
    /// Max concurrent probes in the block stage [default: half of --workers]
    #[arg(long)]
    block_workers: Option<usize>,
    /// Echo requests per probe [default: 3]
    #[arg(long)]
    ping_count: Option<u32>,
    /// Wait for each echo reply in milliseconds [default: 1000]
    #[arg(long)]
    ping_wait_ms: Option<u64>,
    /// Overall latency probe timeout in milliseconds [default: 3000]
    #[arg(long)]
    probe_timeout_ms: Option<u64>,
    /// Port check timeout in milliseconds [default: 2000]
    #[arg(long)]
    port_timeout_ms: Option<u64>,
    /// Service port that must accept connections [default: 443]
    #[arg(long)]
    port: Option<u16>,
    /// Blocks kept after the block stage [default: 5]
    #[arg(long)]
    top_blocks: Option<usize>,
    /// Hosts kept after the host stage [default: 15]
    #[arg(long)]
    top_hosts: Option<usize>,
    /// QPS cap for probe launches; 0 disables pacing
    #[arg(long)]
    qps: Option<u32>,
    /// Latency backend [default: auto]
    #[arg(long, value_enum)]
    backend: Option<Backend>,
    /// Keep only blocks located in this country (repeatable, English name)
    #[arg(long = "region", value_name = "COUNTRY")]
    regions: Vec<String>,
    /// MaxMind country database used by --region [default: ./GeoLite2-Country.mmdb]
    #[arg(long, value_name = "FILE")]
    geo_db: Option<PathBuf>,
    /// Download the geo database from here when the file is missing
    #[arg(long, value_name = "URL")]
    geo_db_url: Option<String>,
    /// Output format: text, json, or jsonl [default: text]
    #[arg(long, value_enum)]
    format: Option<OutputFormat>,
    /// Directory for top_ips.json, top_blocks.json and region_blocks.json
    #[arg(long, value_name = "DIR")]
    out_dir: Option<PathBuf>,
    /// Also write top_ips.csv into --out-dir
    #[arg(long, default_value_t = false)]
    csv: bool,
}

const DEFAULT_GEO_DB: &str = "GeoLite2-Country.mmdb";

/// Everything a select run needs, after CLI flags, config file and defaults are merged.
#[derive(Debug, Clone, PartialEq)]
struct SelectSettings {
    selector: SelectorConfig,
    backend: ProbeBackend,
    ranges: Vec<String>,
    ranges_file: Option<PathBuf>,
    ranges_url: Option<String>,
    regions: Vec<String>,
    geo_db: PathBuf,
    geo_db_url: Option<String>,
    out_dir: Option<PathBuf>,
    format: OutputFormat,
    csv: bool,
}

fn resolve_select(args: SelectArgs, file: Option<&config::SelectConfig>) -> Result<SelectSettings> {
    let f = file.cloned().unwrap_or_default();
    let ms = Duration::from_millis;

    let d = match args.workers.or(f.workers) {
        Some(w) => SelectorConfig::with_workers(w),
        None => SelectorConfig::default(),
    };
    let qps = args.qps.or(f.qps).filter(|q| *q > 0);
    let selector = SelectorConfig {
        workers: d.workers,
        block_workers: args.block_workers.or(f.block_workers).unwrap_or(d.block_workers),
        ping_count: args.ping_count.or(f.ping_count).unwrap_or(d.ping_count),
        ping_wait: args.ping_wait_ms.or(f.ping_wait_ms).map(ms).unwrap_or(d.ping_wait),
        probe_timeout: args.probe_timeout_ms.or(f.probe_timeout_ms).map(ms).unwrap_or(d.probe_timeout),
        port_timeout: args.port_timeout_ms.or(f.port_timeout_ms).map(ms).unwrap_or(d.port_timeout),
        port: args.port.or(f.port).unwrap_or(d.port),
        top_blocks: args.top_blocks.or(f.top_blocks).unwrap_or(d.top_blocks),
        top_hosts: args.top_hosts.or(f.top_hosts).unwrap_or(d.top_hosts),
        qps,
    };
    let backend = match (args.backend, f.backend.as_deref()) {
        (Some(b), _) => b.into(),
        (None, Some(s)) => s.parse()?,
        (None, None) => ProbeBackend::Auto,
    };
    let format = match (args.format, f.format.as_deref()) {
        (Some(fmt), _) => fmt,
        (None, Some(s)) => OutputFormat::from_str(s, true).map_err(|e| anyhow!("invalid format in config: {}", e))?,
        (None, None) => OutputFormat::Text,
    };
    let regions = if args.regions.is_empty() { f.regions.unwrap_or_default() } else { args.regions };
    Ok(SelectSettings {
        selector,
        backend,
        ranges: args.ranges,
        ranges_file: args.ranges_file.or(f.ranges_file),
        ranges_url: args.ranges_url.or(f.ranges_url),
        regions,
        geo_db: args.geo_db.or(f.geo_db).unwrap_or_else(|| PathBuf::from(DEFAULT_GEO_DB)),
        geo_db_url: args.geo_db_url.or(f.geo_db_url),
        out_dir: args.out_dir.or(f.out_dir),
        format,
        csv: args.csv || f.csv.unwrap_or(false),
    })
}

/// Positional ranges first, then a ranges file, then the remote source.
async fn gather_ranges(s: &SelectSettings) -> Result<Vec<String>> {
    if !s.ranges.is_empty() {
        return Ok(s.ranges.clone());
    }
    if let Some(path) = &s.ranges_file {
        return range_source_file(path);
    }
    if let Some(url) = &s.ranges_url {
        return fetch_ranges(url).await;
    }
    Err(anyhow!("provide ranges, --ranges-file <FILE> or --ranges-url <URL>"))
}

#[cfg(feature = "fetch")]
fn range_source_file(path: &std::path::Path) -> Result<Vec<String>> {
    range_source::read_ranges_file(path)
}

#[cfg(not(feature = "fetch"))]
fn range_source_file(path: &std::path::Path) -> Result<Vec<String>> {
    let text = std::fs::read_to_string(path)?;
    Ok(text.lines().map(str::trim).filter(|l| !l.is_empty() && !l.starts_with('#')).map(String::from).collect())
}

#[cfg(feature = "fetch")]
async fn fetch_ranges(url: &str) -> Result<Vec<String>> {
    let src = range_source::HttpRangeSource::new(url, Duration::from_secs(10))?;
    Ok(src.fetch_ranges().await)
}

#[cfg(not(feature = "fetch"))]
async fn fetch_ranges(_url: &str) -> Result<Vec<String>> {
    Err(anyhow!("--ranges-url requires the `fetch` feature"))
}

/// Drop blocks outside the wanted regions; returns the country grouping of what was kept.
#[cfg(feature = "geo")]
async fn apply_region_filter(s: &SelectSettings, blocks: &mut Vec<CandidateBlock>) -> Result<Option<RegionGroups>> {
    if s.regions.is_empty() {
        return Ok(None);
    }
    if let Some(url) = &s.geo_db_url {
        geo_region::ensure_database(&s.geo_db, url, Duration::from_secs(60)).await?;
    }
    let resolver = geo_region::GeoResolver::open(&s.geo_db)?;
    let tagged = geo_region::filter_blocks(&resolver, blocks, &s.regions);
    info!(before = blocks.len(), after = tagged.len(), regions = %s.regions.join(","), "region filter");
    *blocks = tagged.iter().map(|(b, _)| *b).collect();
    Ok(Some(geo_region::group_by_country(&tagged)))
}

#[cfg(not(feature = "geo"))]
async fn apply_region_filter(s: &SelectSettings, _blocks: &mut Vec<CandidateBlock>) -> Result<Option<RegionGroups>> {
    if s.regions.is_empty() { Ok(None) } else { Err(anyhow!("--region requires the `geo` feature")) }
}

async fn run_select(s: SelectSettings) -> Result<()> {
    let started = Instant::now();
    let started_at = now_rfc3339();

    let ranges = gather_ranges(&s).await?;
    if ranges.is_empty() {
        error!(reason = %SelectError::NoRanges, "run halted");
        return Err(SelectError::NoRanges.into());
    }
    let mut blocks: Vec<CandidateBlock> = address_expander::expand_all(&ranges).into_iter().collect();
    info!(ranges = ranges.len(), blocks = blocks.len(), "expanded address ranges");
    let groups = apply_region_filter(&s, &mut blocks).await?;

    let prober = build_prober(s.backend, &s.selector)?;
    let selector = Selector::new(s.selector.clone(), prober.clone());
    let selection = match selector.select_from_blocks(&blocks).await {
        Ok(sel) => sel,
        Err(e) => {
            error!(reason = %e, "run halted");
            return Err(e.into());
        }
    };

    if let Some(dir) = &s.out_dir {
        persist(dir, &selection, groups.as_ref(), s.csv)?;
    }
    let report = RunReport::new(
        env!("CARGO_PKG_VERSION"),
        prober.name(),
        started_at,
        started.elapsed().as_millis(),
        ranges.len(),
        blocks.len(),
        &selection,
    );
    print_report(&report, s.format)
}

fn print_report(r: &RunReport, format: OutputFormat) -> Result<()> {
    match format {
        OutputFormat::Text => {
            println!("top blocks ({}): {}", r.top_blocks.len(), r.top_blocks.join(", "));
            println!("{:<16} {:>7} {:>10} {:>6}", "ip", "score", "avg_ms", "loss%");
            for c in &r.top_ips {
                println!("{:<16} {:>7.2} {:>10.1} {:>6}", c.address, c.score, c.avg_latency_ms, c.loss_percent);
            }
            println!("({} ranges, {} blocks, backend {}, took {} ms)", r.ranges, r.blocks, r.backend, r.duration_ms);
        }
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(r)?),
        OutputFormat::Jsonl => {
            for c in &r.top_ips {
                println!("{}", serde_json::to_string(c)?);
            }
        }
    }
    Ok(())
}

fn print_blocks(blocks: &[CandidateBlock], format: OutputFormat) -> Result<()> {
    match format {
        OutputFormat::Text => {
            for b in blocks { println!("{}", b); }
            println!("({} blocks)", blocks.len());
        }
        OutputFormat::Json => println!("{}", serde_json::to_string(blocks)?),
        OutputFormat::Jsonl => {
            for b in blocks { println!("{}", serde_json::json!({ "block": b })); }
        }
    }
    Ok(())
}

fn init_logging(verbose: u8) {
    let default = match verbose { 0 => "info", 1 => "debug", _ => "trace" };
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);
    let loaded_cfg = config::load_config(cli.config.as_deref())?;
    match cli.command {
        Commands::Version => {
            println!("edgepick {} (core {})", env!("CARGO_PKG_VERSION"), edgepick_core::version());
        }
        Commands::Expand { ranges, format } => {
            let blocks: Vec<CandidateBlock> = address_expander::expand_all(&ranges).into_iter().collect();
            if blocks.is_empty() {
                return Err(SelectError::NoCandidates.into());
            }
            print_blocks(&blocks, format)?;
        }
        Commands::Probe { address, port, backend, count, timeout_ms, port_timeout_ms, format } => {
            let cfg = SelectorConfig {
                ping_count: count,
                probe_timeout: Duration::from_millis(timeout_ms),
                port_timeout: Duration::from_millis(port_timeout_ms),
                port,
                ..SelectorConfig::default()
            };
            let rt = tokio::runtime::Runtime::new()?;
            let (name, m, took, open) = rt.block_on(async {
                let prober = build_prober(backend.into(), &cfg)?;
                let (m, took) = prober.probe_timed(address).await;
                let open = prober.check_port(address, cfg.port, cfg.port_timeout).await;
                Ok::<_, anyhow::Error>((prober.name(), m, took, open))
            })?;
            let duration_ms = took.as_millis();
            let score = score_measurement(&m, open);
            match format {
                OutputFormat::Text => match m {
                    Measurement::Measured { avg_latency_ms, loss_percent } => println!(
                        "{}: {:.1} ms, {}% loss, port {} {}, score {:.2} ({}, {} ms)",
                        address, avg_latency_ms, loss_percent, port, if open { "open" } else { "closed" },
                        score.unwrap_or(0.0), name, duration_ms
                    ),
                    Measurement::Unmeasurable => println!(
                        "{}: unmeasurable, port {} {} ({}, {} ms)",
                        address, port, if open { "open" } else { "closed" }, name, duration_ms
                    ),
                },
                OutputFormat::Json | OutputFormat::Jsonl => {
                    let obj = serde_json::json!({
                        "ip": address,
                        "avg_delay": m.latency_ms(),
                        "loss_rate": m.loss_percent(),
                        "port": port,
                        "port_open": open,
                        "score": score,
                        "backend": name,
                        "duration_ms": duration_ms,
                    });
                    println!("{}", serde_json::to_string(&obj)?);
                }
            }
        }
        Commands::Select(args) => {
            let settings = resolve_select(args, loaded_cfg.as_ref().and_then(|c| c.select.as_ref()))?;
            let rt = tokio::runtime::Runtime::new()?;
            rt.block_on(run_select(settings))?;
        }
    }
    Ok(())
}
