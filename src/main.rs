use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use dimensions_records::config::{env_config, find_config_file, load_config, CONFIG_FILE_NAME};
use dimensions_records::{Config, DimensionsError, RecordRef, Session};
use serde_json::{Map, Value};
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Query the Dimensions search API and print lazily resolved records
#[derive(Parser, Debug)]
#[command(name = "dimensions-records")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Query the Dimensions search API and print lazily resolved records", long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Enable verbose logging (can be used multiple times for more verbosity: -v, -vv)
    #[arg(long, short, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Suppress non-error output
    #[arg(long, short, global = true)]
    quiet: bool,

    /// Configuration file path
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Previously issued API token
    #[arg(long, env = "DIMENSIONS_TOKEN", hide_env_values = true, global = true)]
    token: Option<String>,

    /// Account name, used when no token is available
    #[arg(long, global = true)]
    username: Option<String>,

    /// Account password, used when no token is available
    #[arg(long, global = true)]
    password: Option<String>,

    /// Enable the on-disk response cache for this run
    #[arg(long, global = true)]
    cache: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run a search and print one JSON object per result
    #[command(alias = "q")]
    Query {
        /// Search text, e.g. 'search publications for "SBML" return researchers'
        search: String,

        /// Stop after this many results
        #[arg(long, short)]
        limit: Option<usize>,

        /// Results fetched per request (default: from configuration)
        #[arg(long)]
        page_size: Option<usize>,

        /// Comma-separated fields to print; these are read lazily and may
        /// trigger follow-up searches
        #[arg(long, short, value_delimiter = ',')]
        fields: Vec<String>,
    },

    /// Write a configuration file holding the current settings
    InitConfig {
        /// Where to write it
        #[arg(default_value = CONFIG_FILE_NAME)]
        path: PathBuf,
    },
}

/// Filter directive for the library's log output
fn log_filter(verbose: u8, quiet: bool, configured: &str) -> String {
    let level = if quiet {
        "error"
    } else {
        match verbose {
            0 => configured,
            1 => "debug",
            _ => "trace",
        }
    };
    format!("dimensions_records={}", level)
}

fn init_tracing(cli: &Cli, config: &Config) {
    let filter = EnvFilter::new(std::env::var("RUST_LOG").unwrap_or_else(|_| {
        log_filter(cli.verbose, cli.quiet, &config.logging.level)
    }));

    // Records go to stdout, so logs go to stderr
    let registry = tracing_subscriber::registry().with(filter);
    if config.logging.format.as_deref() == Some("json") {
        registry
            .with(tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        registry
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .init();
    }
}

fn resolve_config(cli: &Cli) -> Result<Config> {
    let mut config = if let Some(path) = &cli.config {
        load_config(path).with_context(|| format!("loading {}", path.display()))?
    } else if let Some(path) = find_config_file() {
        load_config(&path).with_context(|| format!("loading {}", path.display()))?
    } else {
        env_config()?
    };

    if let Some(token) = &cli.token {
        config.api.token = Some(token.clone());
    }
    if let Some(username) = &cli.username {
        config.api.username = Some(username.clone());
    }
    if let Some(password) = &cli.password {
        config.api.password = Some(password.clone());
    }
    if cli.cache {
        config.cache.enabled = true;
    }
    Ok(config)
}

/// JSON for one record: the requested fields, read lazily, or a snapshot
fn render(record: &RecordRef, fields: &[String]) -> dimensions_records::Result<Value> {
    if fields.is_empty() {
        return Ok(record.snapshot());
    }
    let mut out = Map::new();
    for field in fields {
        out.insert(field.clone(), record.get(field)?.to_json());
    }
    Ok(Value::Object(out))
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = resolve_config(&cli)?;
    init_tracing(&cli, &config);

    match &cli.command {
        Commands::Query {
            search,
            limit,
            page_size,
            fields,
        } => {
            let session = Session::from_config(&config).context("opening session")?;
            let page_size = page_size.unwrap_or(config.query.fetch_size);
            let results = session.query_paged(search, *limit, page_size)?;
            let total = results.total_count();

            let mut failures = 0;
            for result in results {
                match result.and_then(|record| render(&record, fields)) {
                    Ok(json) => println!("{}", json),
                    Err(e) => {
                        failures += 1;
                        tracing::error!("{}", e);
                        // Bad data spoils one record; anything else would spoil them all
                        let per_record = matches!(
                            e,
                            DimensionsError::DataMismatch(_) | DimensionsError::MalformedData(_)
                        );
                        if !per_record {
                            return Err(e.into());
                        }
                    }
                }
            }

            if !cli.quiet {
                eprintln!("{} results ({} failed)", total, failures);
                eprintln!(
                    "{} distinct records cached",
                    session.cache_stats().distinct_identifiers
                );
            }
        }
        Commands::InitConfig { path } => {
            config.save(path)?;
            if !cli.quiet {
                eprintln!("Wrote {}", path.display());
            }
        }
    }
    Ok(())
}
