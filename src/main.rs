use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::{ArgAction, Args, Parser, Subcommand};
use tracing::info;
use tracing_subscriber::EnvFilter;

use cert_recon_rs::ports::{parse_port_list, DEFAULT_PORTS};
use cert_recon_rs::scanner::{self, ScanConfig, DEFAULT_CONCURRENCY, DEFAULT_TIMEOUT_SECS};
use cert_recon_rs::sink::{OutputFormat, StreamSink};
use cert_recon_rs::store::{CertStore, QueryFilter, DEFAULT_DB_PATH};
use cert_recon_rs::targets::TargetSpec;
use cert_recon_rs::types::ScanSummary;

/// cert-recon-rs — harvest organization, CN and SAN names from the TLS certificates of hosts and CIDR blocks.
#[derive(Debug, Parser)]
#[command(
    name = "cert-recon-rs",
    version,
    about = "Harvest organization, CN and SAN names from TLS certificates of hosts and CIDR blocks.",
    long_about = None
)]
struct Cli {
    /// Log verbosity on stderr (-v info, -vv debug, -vvv trace). RUST_LOG overrides.
    #[arg(short, long, action = ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Scan targets and print CNs & SANs to stdout.
    #[command(visible_alias = "scrape")]
    Scan {
        #[command(flatten)]
        scan: ScanArgs,

        /// Print one JSON object per certificate instead of plain text.
        #[arg(short, long, default_value_t = false)]
        json: bool,
    },
    /// Scan targets and upsert organization, CN and SANs into a local SQLite file.
    Store {
        #[command(flatten)]
        scan: ScanArgs,

        /// SQLite file to create or reuse.
        #[arg(long, default_value = DEFAULT_DB_PATH)]
        db: PathBuf,
    },
    /// Query a local SQLite file for stored results.
    #[command(visible_alias = "retr")]
    Query(QueryArgs),
}

#[derive(Debug, Clone, Args)]
struct ScanArgs {
    /// Number of concurrent handshake workers.
    #[arg(short, long, default_value_t = DEFAULT_CONCURRENCY)]
    concurrency: usize,

    /// TLS ports to check, comma separated; ranges like 8000-8010 are allowed.
    #[arg(short, long, default_value = DEFAULT_PORTS)]
    ports: String,

    /// Per-attempt connect + handshake timeout in seconds.
    #[arg(short, long, default_value_t = DEFAULT_TIMEOUT_SECS)]
    timeout: u64,

    /// IPs, host[:port] and CIDRs separated by commas, or a file with one per line.
    #[arg(short, long)]
    input: String,

    /// Show failed targets too.
    #[arg(short = 'a', long = "all-output", default_value_t = false)]
    all_output: bool,
}

impl ScanArgs {
    fn to_spec_and_config(&self, format: OutputFormat) -> Result<(TargetSpec, ScanConfig)> {
        if self.concurrency == 0 {
            bail!("concurrency must be a positive integer");
        }
        if self.timeout == 0 {
            bail!("timeout must be at least one second");
        }
        let ports = parse_port_list(&self.ports)
            .with_context(|| format!("invalid port list: {}", self.ports))?;
        let spec = TargetSpec::parse(&self.input, &ports).context("invalid scan input")?;
        let config = ScanConfig {
            concurrency: self.concurrency,
            timeout: Duration::from_secs(self.timeout),
            show_failures: self.all_output,
            format,
        };
        Ok((spec, config))
    }
}

#[derive(Debug, Clone, Args)]
struct QueryArgs {
    /// SQLite file to read.
    #[arg(long, default_value = DEFAULT_DB_PATH)]
    db: PathBuf,

    /// Print the number of stored rows.
    #[arg(long, default_value_t = false, conflicts_with_all = ["all", "ip", "org", "cn", "san"])]
    num: bool,

    /// Print every stored row.
    #[arg(long, default_value_t = false, conflicts_with_all = ["ip", "org", "cn", "san"])]
    all: bool,

    /// Rows whose IP starts with this prefix.
    #[arg(long, conflicts_with_all = ["org", "cn", "san"])]
    ip: Option<String>,

    /// Rows whose organization contains this text.
    #[arg(long, conflicts_with_all = ["cn", "san"])]
    org: Option<String>,

    /// Rows whose common name contains this text.
    #[arg(long, conflicts_with = "san")]
    cn: Option<String>,

    /// Rows whose SAN list contains this text.
    #[arg(long)]
    san: Option<String>,
}

impl QueryArgs {
    fn filter(&self) -> Option<QueryFilter> {
        if let Some(t) = &self.ip {
            return Some(QueryFilter::IpPrefix(t.clone()));
        }
        if let Some(t) = &self.org {
            return Some(QueryFilter::Organization(t.clone()));
        }
        if let Some(t) = &self.cn {
            return Some(QueryFilter::CommonName(t.clone()));
        }
        self.san.clone().map(QueryFilter::San)
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    match cli.command {
        Command::Scan { scan, json } => {
            let format = if json { OutputFormat::Json } else { OutputFormat::Plain };
            let (spec, config) = scan.to_spec_and_config(format)?;
            log_config(&scan, &config, None);
            let out = StreamSink::stdout(config.format, config.show_failures);
            let summary = scanner::scan_to_stream(&spec, &config, out).await?;
            log_summary(&summary);
        }
        Command::Store { scan, db } => {
            let (spec, config) = scan.to_spec_and_config(OutputFormat::Plain)?;
            log_config(&scan, &config, Some(&db));
            let store = CertStore::open(&db)
                .with_context(|| format!("failed to open database {}", db.display()))?;
            let summary = scanner::scan_to_store(&spec, &config, store)
                .await
                .with_context(|| format!("scan aborted writing to {}", db.display()))?;
            log_summary(&summary);
            eprintln!(
                "Stored {} certificates in {} ({} targets, {} failed)",
                summary.persisted,
                db.display(),
                summary.dispatched,
                summary.failed
            );
        }
        Command::Query(q) => run_query(&q)?,
    }

    Ok(())
}

fn run_query(q: &QueryArgs) -> Result<()> {
    if !q.db.exists() {
        bail!("database file {} does not exist", q.db.display());
    }
    let store = CertStore::open_read_only(&q.db)
        .with_context(|| format!("failed to open database {}", q.db.display()))?;

    if q.num {
        println!("Cert DB has results for {} IPs", store.count()?);
        return Ok(());
    }
    let rows = if q.all {
        store.all()?
    } else if let Some(filter) = q.filter() {
        store.query(&filter)?
    } else {
        bail!("nothing to query: pass --num, --all, --ip, --org, --cn or --san");
    };
    println!("{}", serde_json::to_string_pretty(&rows)?);
    Ok(())
}

fn init_tracing(verbose: u8) {
    let filter = match verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .with_writer(std::io::stderr)
        .init();
}

fn log_config(scan: &ScanArgs, config: &ScanConfig, db: Option<&Path>) {
    info!(
        input = %scan.input,
        ports = %scan.ports,
        concurrency = config.concurrency,
        timeout_s = config.timeout.as_secs(),
        show_failures = config.show_failures,
        db = %db.map(|p| p.display().to_string()).unwrap_or_else(|| "<none>".to_string()),
        "scan configuration"
    );
}

fn log_summary(summary: &ScanSummary) {
    info!(
        dispatched = summary.dispatched,
        succeeded = summary.succeeded,
        failed = summary.failed,
        persisted = summary.persisted,
        "done"
    );
}
