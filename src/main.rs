use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use indicatif::MultiProgress;
use mdf_ingest::{
    init_tracing_once, set_global_multiprogress, BatchLimit, FeedstockReader, IngestOptions, MdfPipeline,
    SearchClient, SearchParams, SourceSelection, Validator,
};
use serde_json::Value;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

/// Validate metadata into feedstock files and ingest them into the search index.
#[derive(Parser)]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Directory holding `<source>_all.json` feedstock files
    #[arg(long, global = true, env = "MDF_FEEDSTOCK_DIR")]
    feedstock_dir: Option<PathBuf>,

    /// Base URL of the search service
    #[arg(long, global = true, env = "MDF_SEARCH_URL")]
    search_url: Option<String>,

    /// Search index to use when a command does not name one
    #[arg(long, global = true, env = "MDF_SEARCH_INDEX")]
    index: Option<String>,

    /// JSON file with access and refresh tokens
    #[arg(long, global = true, env = "MDF_CREDENTIALS")]
    credentials: Option<PathBuf>,

    /// HTTP timeout in seconds
    #[arg(long, global = true)]
    timeout: Option<u64>,

    /// Progress bars and per-source summaries
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Ingest feedstocks into the search index
    Drive {
        /// Source names to ingest
        sources: Vec<String>,
        /// Ingest every feedstock in the directory
        #[arg(long, conflicts_with = "sources")]
        all: bool,
        /// Entries per ingest call, or -1 for a single call per source
        #[arg(long, allow_negative_numbers = true)]
        batch_size: Option<i64>,
        /// Sources driven in parallel
        #[arg(long, default_value_t = 1)]
        concurrency: usize,
    },
    /// Free-text search; prints one result per line
    Search {
        query: String,
        #[arg(long)]
        limit: Option<u32>,
        #[arg(long)]
        offset: Option<u32>,
        /// Restrict to one resource type
        #[arg(long = "type")]
        resource_type: Option<String>,
        /// Treat the query as advanced query syntax
        #[arg(long)]
        advanced: bool,
    },
    /// Remove one entry by subject
    Remove { subject: String },
    /// Write a feedstock from a dataset header and an NDJSON file of records
    Validate {
        /// Dataset header (one JSON object)
        header: PathBuf,
        /// Records, one JSON object per line
        records: Option<PathBuf>,
        /// Treat warnings as errors
        #[arg(long)]
        strict: bool,
        /// Accept records that draw warnings but exit non-zero; a header warning cancels the dataset
        #[arg(long, conflicts_with = "strict")]
        deny_warnings: bool,
    },
}

fn main() -> ExitCode {
    init_tracing_once();
    let cli = Cli::parse();
    match run(cli) {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::from(1),
        Err(e) => {
            eprintln!("error: {e:#}");
            ExitCode::from(1)
        }
    }
}

fn options(cli: &Cli) -> Result<IngestOptions> {
    let mut opts = IngestOptions::from_env()?;
    if let Some(dir) = &cli.feedstock_dir {
        opts = opts.with_feedstock_dir(dir);
    }
    if let Some(url) = &cli.search_url {
        opts = opts.with_search_base_url(url.clone());
    }
    if let Some(index) = cli.index.as_ref().filter(|s| !s.trim().is_empty()) {
        opts = opts.with_default_index(Some(index.clone()));
    }
    if let Some(path) = &cli.credentials {
        opts = opts.with_credential_file(path);
    }
    if let Some(secs) = cli.timeout {
        opts = opts.with_http_timeout(Duration::from_secs(secs.max(1)));
    }
    Ok(opts.with_verbose(cli.verbose))
}

fn run(cli: Cli) -> Result<bool> {
    let opts = options(&cli)?;
    match cli.command {
        Commands::Drive { sources, all, batch_size, concurrency } => {
            let selection = match (all, sources.len()) {
                (true, _) => SourceSelection::All,
                (false, 0) => bail!("name at least one source or pass --all"),
                (false, 1) => SourceSelection::One(sources[0].clone()),
                (false, _) => SourceSelection::Many(sources),
            };
            let mut opts = opts.with_source_concurrency(concurrency);
            if let Some(n) = batch_size {
                opts = opts.with_batch_size(BatchLimit::from_i64(n)?);
            }
            if opts.verbose {
                // One bar per source; parallel sources share the terminal.
                set_global_multiprogress(Arc::new(MultiProgress::new()));
            }
            let summary = MdfPipeline::from_options(opts).drive(selection)?;
            for r in &summary.reports {
                match &r.error {
                    None => println!("{}: {} records in {} batches", r.source_name, r.records_ingested, r.batches_sent),
                    Some(e) => println!(
                        "{}: FAILED after {} records in {} batches: {e}",
                        r.source_name, r.records_ingested, r.batches_sent
                    ),
                }
            }
            println!(
                "total: {} records, {} batches, {} failed source(s)",
                summary.records_ingested(),
                summary.batches_sent(),
                summary.failed().count()
            );
            Ok(summary.ok())
        }
        Commands::Search { query, limit, offset, resource_type, advanced } => {
            let client = SearchClient::from_options(&opts)?;
            let mut params = SearchParams::default().advanced(advanced);
            if let Some(n) = limit {
                params = params.limit(n);
            }
            if let Some(n) = offset {
                params = params.offset(n);
            }
            if let Some(t) = resource_type {
                params = params.resource_type(t);
            }
            let results = client.search(&query, &params)?;
            for content in results.contents() {
                println!("{}", serde_json::to_string(&content)?);
            }
            eprintln!("{} of {} results", results.count(), results.total());
            Ok(true)
        }
        Commands::Remove { subject } => {
            let client = SearchClient::from_options(&opts)?;
            let resp = client.remove(&subject, None)?;
            println!("{}", serde_json::to_string(&resp)?);
            Ok(true)
        }
        Commands::Validate { header, records, strict, deny_warnings } => {
            let raw = std::fs::read_to_string(&header).with_context(|| format!("read {}", header.display()))?;
            let header: Value = serde_json::from_str(&raw).with_context(|| format!("parse {}", header.display()))?;
            let opts = opts.with_strict(strict);

            let (mut validator, started) = Validator::construct(header, &opts)?;
            for w in &started.warnings {
                eprintln!("warning: {w}");
            }
            if deny_warnings {
                if let Err(e) = started.deny_warnings() {
                    validator.cancel_validation()?;
                    return Err(e.into());
                }
            }
            let mut warned = 0u64;
            if let Some(path) = records {
                let mut rdr = FeedstockReader::open(&path, opts.read_buffer_bytes)?;
                while let Some(record) = rdr.next_value()? {
                    let outcome = validator.write_record(record)?;
                    if !outcome.success {
                        eprintln!("line {}: {}", rdr.line_no(), outcome.message.clone().unwrap_or_default());
                    } else if let (true, Err(e)) = (deny_warnings, outcome.deny_warnings()) {
                        warned += 1;
                        eprintln!("line {}: {e}", rdr.line_no());
                    }
                }
            }
            let (accepted, rejected) = (validator.accepted(), validator.rejected());
            let path = validator.close()?;
            println!("{}: {accepted} accepted, {rejected} rejected, {warned} denied for warnings", path.display());
            Ok(rejected == 0 && warned == 0)
        }
    }
}
