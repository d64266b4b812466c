//! S3 Gzip Compressor - compress one S3 object per notification
//!
//! Reads an S3 event notification, compresses the referenced object and
//! prints the source content type on success.

use anyhow::Context;
use clap::{Parser, ValueEnum};
use s3_gzip_compressor::config::{Config, EnvSource, LayeredSource, TransferConfig};
use s3_gzip_compressor::event::S3Event;
use s3_gzip_compressor::metrics;
use s3_gzip_compressor::pipeline::{parse_event, Pipeline};
use s3_gzip_compressor::s3::S3Client;
use s3_gzip_compressor::telemetry::{init_subscriber, InvocationContext, LogFormat};
use std::io::Read;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;

#[derive(Debug, Clone, Copy, ValueEnum)]
enum FormatArg {
    Json,
    Pretty,
}

/// Compress an S3 object with gzip and re-upload it with multipart upload
#[derive(Parser, Debug)]
#[command(name = "s3-gzip-compressor")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to the notification JSON, or "-" for stdin
    #[arg(short, long, default_value = "-")]
    event: String,

    /// Optional YAML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, default_value = "info")]
    log_level: String,

    /// Log output format
    #[arg(long, value_enum, default_value = "json")]
    log_format: FormatArg,

    /// Request id used to correlate log lines; generated when absent
    #[arg(long)]
    request_id: Option<String>,

    /// Write Prometheus metrics in text format to this file on exit
    #[arg(long)]
    metrics_out: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let format = match args.log_format {
        FormatArg::Json => LogFormat::Json,
        FormatArg::Pretty => LogFormat::Pretty,
    };
    init_subscriber(&args.log_level, format)?;

    info!("Starting s3-gzip-compressor v{}", env!("CARGO_PKG_VERSION"));

    let result = run(&args).await;

    // Failed invocations are counted too, so export on every exit path.
    if let Some(ref path) = args.metrics_out {
        let text = metrics::render()?;
        std::fs::write(path, text)
            .with_context(|| format!("writing metrics to {}", path.display()))?;
    }

    if let Some(content_type) = result? {
        println!("{}", content_type);
    }

    Ok(())
}

async fn run(args: &Args) -> anyhow::Result<Option<String>> {
    let config = match args.config {
        Some(ref path) => {
            let config = Config::load(path)
                .with_context(|| format!("loading configuration from {}", path.display()))?;
            info!("Loaded configuration from {:?}", path);
            config
        }
        None => Config::default(),
    };

    let event = read_event(&args.event)?;

    let source = LayeredSource::new(EnvSource, config.variables.clone());
    let transfer = TransferConfig::from_source(&source);

    let ctx = match args.request_id {
        Some(ref id) => InvocationContext::new(id.clone()),
        None => InvocationContext::generate(),
    };

    let store = S3Client::from_config(&config.store).await;
    let pipeline = Pipeline::new(Arc::new(store), transfer);
    Ok(pipeline.handle_event(&event, &ctx).await?)
}

fn read_event(location: &str) -> anyhow::Result<S3Event> {
    let json = if location == "-" {
        let mut buf = String::new();
        std::io::stdin()
            .read_to_string(&mut buf)
            .context("reading notification from stdin")?;
        buf
    } else {
        std::fs::read_to_string(location)
            .with_context(|| format!("reading notification from {}", location))?
    };

    parse_event(&json).context("parsing notification")
}
