//! stockaid CLI: cached API access and windowed dataset export.
//!
//! Commands:
//! - `fetch`: call a registered API through the cache
//! - `index`: list the constituents of a market index
//! - `window`: build fit/test windows for an index and export them as CSV
//! - `cache status`: list cached entries with age, rows and size
//! - `cache clear`: remove every cached entry

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use log::{info, warn};
use polars::prelude::{DataFrame, ParquetWriter};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use stockaid_core::api::Params;
use stockaid_core::providers::{register_builtin_with, ReqwestTransport};
use stockaid_core::table::read_strings;
use stockaid_core::{ApiCache, KeyChain, StockaidConfig};
use stockaid_dataset::{DatasetConfig, WindowedDataset};

#[derive(Parser)]
#[command(
    name = "stockaid",
    about = "stockaid: rate-limited API cache and windowed datasets"
)]
struct Cli {
    /// Path to a TOML config file.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Cache directory. Defaults to the config's `cache.path`, then ~/.cache/stockaid.
    #[arg(long, global = true)]
    cache_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Call an API through the cache and print the result.
    Fetch {
        /// Provider, e.g. TDA or index.
        provider: String,

        /// API name, e.g. history, quote, chains, sp500.
        name: String,

        /// Request parameter as key=value (repeatable).
        #[arg(long = "param", short = 'p')]
        params: Vec<String>,

        /// Bypass the cache and refetch.
        #[arg(long, default_value_t = false)]
        refresh: bool,

        /// Also write the table as Parquet to this path.
        #[arg(long)]
        out: Option<PathBuf>,
    },
    /// List the constituents of an index (sp500, OEX, midcap, smallcap, nasdaq100, DJIA).
    Index { name: String },
    /// Build windowed fit/test data for an index and export it as CSV.
    Window {
        /// Index name.
        index: String,

        /// History length, in `unit`s.
        #[arg(long, default_value_t = 1)]
        amount: u32,

        /// History unit: day, month, year, ytd.
        #[arg(long, default_value = "year")]
        unit: String,

        /// Bar granularity: minute, daily, weekly, monthly.
        #[arg(long, default_value = "daily")]
        granularity: String,

        /// Look-back window length. Defaults to the config's `dataset.look_back`.
        #[arg(long)]
        look_back: Option<usize>,

        /// Look-ahead window length. Defaults to the config's `dataset.look_ahead`.
        #[arg(long)]
        look_ahead: Option<usize>,

        /// Tickers to leave out (repeatable).
        #[arg(long)]
        omit: Vec<String>,

        /// Write fit.csv and test.csv to this directory.
        #[arg(long)]
        out: Option<PathBuf>,
    },
    /// Cache management commands.
    Cache {
        #[command(subcommand)]
        action: CacheAction,
    },
}

#[derive(Subcommand)]
enum CacheAction {
    /// List cached entries.
    Status,
    /// Remove every cached entry.
    Clear {
        /// Actually delete (without this flag, only previews what would be removed).
        #[arg(long, default_value_t = false)]
        confirm: bool,
    },
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => StockaidConfig::from_file(path)?,
        None => StockaidConfig::default(),
    };
    let cache = build_cache(&config, cli.cache_dir.as_deref())?;

    match cli.command {
        Commands::Fetch {
            provider,
            name,
            params,
            refresh,
            out,
        } => run_fetch(&cache, &provider, &name, &params, refresh, out.as_deref()),
        Commands::Index { name } => run_index(&cache, &name),
        Commands::Window {
            index,
            amount,
            unit,
            granularity,
            look_back,
            look_ahead,
            omit,
            out,
        } => {
            let request = HistoryRequest {
                amount,
                unit,
                granularity,
            };
            run_window(
                Arc::new(cache),
                &config,
                &index,
                &request,
                look_back,
                look_ahead,
                &omit,
                out.as_deref(),
            )
        }
        Commands::Cache { action } => match action {
            CacheAction::Status => run_cache_status(&cache),
            CacheAction::Clear { confirm } => run_cache_clear(&cache, confirm),
        },
    }
}

fn resolve_cache_dir(config: &StockaidConfig, flag: Option<&Path>) -> PathBuf {
    if let Some(dir) = flag {
        return dir.to_path_buf();
    }
    if let Some(dir) = &config.cache.path {
        return dir.clone();
    }
    match std::env::var_os("HOME") {
        Some(home) => PathBuf::from(home).join(".cache").join("stockaid"),
        None => PathBuf::from(".stockaid-cache"),
    }
}

/// Credentials come from environment variables named in `[credentials]`,
/// defaulting to `STOCKAID_<PROVIDER>_KEY`.
fn load_key_chain(config: &StockaidConfig) -> KeyChain {
    let mut providers: Vec<String> = config.credentials.keys().cloned().collect();
    if !providers.iter().any(|p| p == "TDA") {
        providers.push("TDA".into());
    }

    let mut keys = KeyChain::new();
    for provider in providers {
        let var = config.credential_var(&provider);
        match std::env::var(&var) {
            Ok(secret) if !secret.is_empty() => keys.insert(provider, secret),
            _ => info!("no credential for {provider} (set {var})"),
        }
    }
    keys
}

fn build_cache(config: &StockaidConfig, flag: Option<&Path>) -> Result<ApiCache> {
    let dir = resolve_cache_dir(config, flag);
    let cache = ApiCache::new(&dir, load_key_chain(config));
    if !cache.can_cache() {
        warn!("caching in memory only; {} is not writable", dir.display());
    }
    register_builtin_with(&cache, Arc::new(ReqwestTransport::new()), config)?;
    Ok(cache)
}

fn parse_params(pairs: &[String]) -> Result<Params> {
    let mut params = Params::new();
    for pair in pairs {
        let Some((key, value)) = pair.split_once('=') else {
            bail!("parameter '{pair}' is not key=value");
        };
        if key.is_empty() {
            bail!("parameter '{pair}' has an empty key");
        }
        params.insert(key.to_string(), value.to_string());
    }
    Ok(params)
}

fn run_fetch(
    cache: &ApiCache,
    provider: &str,
    name: &str,
    params: &[String],
    refresh: bool,
    out: Option<&Path>,
) -> Result<()> {
    let params = parse_params(params)?;
    let entry = if refresh {
        cache.refresh(provider, name, &params)?
    } else {
        cache.entry(provider, name, &params)?
    };

    println!(
        "{provider}/{name}: {} rows, fetched {} (expires {})",
        entry.payload.height(),
        entry.fetched_at.format("%Y-%m-%d %H:%M:%S UTC"),
        entry.expires_at().format("%Y-%m-%d %H:%M:%S UTC"),
    );
    println!("{}", entry.payload);

    if let Some(path) = out {
        write_parquet(&entry.payload, path)?;
        println!("Written to: {}", path.display());
    }
    Ok(())
}

fn write_parquet(df: &DataFrame, path: &Path) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }
    let file = std::fs::File::create(path)
        .with_context(|| format!("create {}", path.display()))?;
    let mut df = df.clone();
    ParquetWriter::new(file).finish(&mut df)?;
    Ok(())
}

fn run_index(cache: &ApiCache, name: &str) -> Result<()> {
    let members = cache.api("index", name, &Params::new())?;
    let symbols = read_strings(&members, "symbol")?;
    println!("{name}: {} constituents", symbols.len());
    for chunk in symbols.chunks(10) {
        println!("  {}", chunk.join(" "));
    }
    Ok(())
}

struct HistoryRequest {
    amount: u32,
    unit: String,
    granularity: String,
}

#[allow(clippy::too_many_arguments)]
fn run_window(
    cache: Arc<ApiCache>,
    config: &StockaidConfig,
    index: &str,
    request: &HistoryRequest,
    look_back: Option<usize>,
    look_ahead: Option<usize>,
    omit: &[String],
    out: Option<&Path>,
) -> Result<()> {
    let mut settings = config.dataset.clone();
    if let Some(b) = look_back {
        settings.look_back = b;
    }
    if let Some(a) = look_ahead {
        settings.look_ahead = a;
    }
    let dataset_config = DatasetConfig::from_settings(&settings)?;
    let (b, width) = (dataset_config.look_back, dataset_config.target_width());

    let mut dataset = WindowedDataset::new(cache, dataset_config)?;
    let omit: Vec<&str> = omit.iter().map(String::as_str).collect();
    let report = dataset.ingest_index_except(
        index,
        request.amount,
        &request.unit,
        &request.granularity,
        &omit,
    )?;

    let counts = dataset.counts();
    println!();
    println!("=== {index} windows ===");
    println!("Tickers:        {}", counts.tickers);
    println!("Skipped:        {}", report.skipped.len());
    println!("Fit windows:    {}", counts.fit);
    println!("Test windows:   {}", counts.test);
    for (ticker, reason) in &report.skipped {
        println!("  skipped {ticker}: {reason}");
    }

    let Some(out) = out else {
        return Ok(());
    };
    std::fs::create_dir_all(out)?;
    let (fit_x, fit_y) = dataset.fit_data();
    let fit_path = out.join("fit.csv");
    write_windows(&fit_path, b, width, fit_x.rows().into_iter().zip(fit_y.rows()))?;

    let (test_x, test_y) = (dataset.test_data(), dataset.test_targets());
    let test_path = out.join("test.csv");
    write_windows(&test_path, b, width, test_x.rows().into_iter().zip(test_y.rows()))?;

    println!("Windows saved to: {}", out.display());
    Ok(())
}

/// One row per window: `x0..x{B-1}` then `y0..y{W-1}`.
fn write_windows<'a, X, Y>(
    path: &Path,
    look_back: usize,
    width: usize,
    rows: impl Iterator<Item = (X, Y)>,
) -> Result<()>
where
    X: IntoIterator<Item = &'a f64>,
    Y: IntoIterator<Item = &'a f64>,
{
    let mut writer =
        csv::Writer::from_path(path).with_context(|| format!("create {}", path.display()))?;
    let header = (0..look_back)
        .map(|i| format!("x{i}"))
        .chain((0..width).map(|i| format!("y{i}")));
    writer.write_record(header)?;
    for (x, y) in rows {
        writer.write_record(x.into_iter().chain(y).map(|v| v.to_string()))?;
    }
    writer.flush()?;
    Ok(())
}

fn run_cache_status(cache: &ApiCache) -> Result<()> {
    let Some(dir) = cache.cache_dir() else {
        println!("Cache is in memory only; nothing persisted.");
        return Ok(());
    };

    let entries = cache.status()?;
    if entries.is_empty() {
        println!("Cache is empty: {}", dir.display());
        return Ok(());
    }

    let now = chrono::Utc::now();
    let total: u64 = entries.iter().map(|e| e.bytes).sum();
    println!("Cache: {}", dir.display());
    println!("Entries: {}", entries.len());
    println!("Total size: {}", format_size(total));
    println!();
    println!(
        "{:<8} {:<10} {:<30} {:>8} {:>10} {:>8}",
        "Provider", "API", "Params", "Rows", "Age", "Status"
    );
    println!("{}", "-".repeat(79));
    for e in &entries {
        let age = now.signed_duration_since(e.fetched_at);
        let fresh = chrono::Duration::from_std(e.ttl)
            .map(|ttl| now < e.fetched_at + ttl)
            .unwrap_or(true);
        let status = if fresh { "fresh" } else { "stale" };
        println!(
            "{:<8} {:<10} {:<30} {:>8} {:>10} {:>8}",
            e.key.provider,
            e.key.name,
            truncate(&e.key.params, 30),
            e.rows,
            format_age(age),
            status
        );
    }
    Ok(())
}

fn run_cache_clear(cache: &ApiCache, confirm: bool) -> Result<()> {
    let entries = cache.status()?;
    if entries.is_empty() {
        println!("Nothing to remove.");
        return Ok(());
    }
    let total: u64 = entries.iter().map(|e| e.bytes).sum();
    println!("Found {} cached entries ({}).", entries.len(), format_size(total));

    if !confirm {
        println!();
        println!("Dry run: pass --confirm to actually delete.");
        return Ok(());
    }

    let removed = cache.clear()?;
    println!("Done. Removed {removed} entries.");
    Ok(())
}

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        let head: String = s.chars().take(max.saturating_sub(1)).collect();
        format!("{head}…")
    }
}

fn format_age(age: chrono::Duration) -> String {
    let secs = age.num_seconds().max(0);
    if secs < 60 {
        format!("{secs}s")
    } else if secs < 3600 {
        format!("{}m", secs / 60)
    } else if secs < 86_400 {
        format!("{}h", secs / 3600)
    } else {
        format!("{}d", secs / 86_400)
    }
}

fn format_size(bytes: u64) -> String {
    if bytes < 1024 {
        format!("{bytes} B")
    } else if bytes < 1024 * 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else {
        format!("{:.1} MB", bytes as f64 / (1024.0 * 1024.0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn params_parse_key_value_pairs() {
        let params = parse_params(&["symbol=AAPL".into(), "period=6".into()]).unwrap();
        assert_eq!(params.get("symbol").map(String::as_str), Some("AAPL"));
        assert_eq!(params.len(), 2);
        assert!(parse_params(&["novalue".into()]).is_err());
        assert!(parse_params(&["=x".into()]).is_err());
    }

    #[test]
    fn cache_dir_flag_wins_over_config() {
        let mut config = StockaidConfig::default();
        config.cache.path = Some(PathBuf::from("/from/config"));
        assert_eq!(
            resolve_cache_dir(&config, Some(Path::new("/from/flag"))),
            PathBuf::from("/from/flag")
        );
        assert_eq!(resolve_cache_dir(&config, None), PathBuf::from("/from/config"));
    }

    #[test]
    fn windows_csv_has_header_and_rows() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("fit.csv");
        let x = [[1.0, 2.0], [3.0, 4.0]];
        let y = [[5.0], [6.0]];
        write_windows(&path, 2, 1, x.iter().zip(y.iter())).unwrap();
        let text = std::fs::read_to_string(&path).unwrap();
        assert_eq!(text, "x0,x1,y0\n1,2,5\n3,4,6\n");
    }

    #[test]
    fn ages_are_compact() {
        assert_eq!(format_age(chrono::Duration::seconds(42)), "42s");
        assert_eq!(format_age(chrono::Duration::hours(5)), "5h");
        assert_eq!(format_age(chrono::Duration::days(3)), "3d");
    }
}
