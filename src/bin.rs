//! Binary entry point for `intent-normalizer`.
//!
//! This module provides the command-line interface with options for the
//! configuration file path, logging verbosity and trace export. Directives
//! are written to stdout as one JSON object per line; logs go to stderr.

use clap::Parser;
use intent_normalizer::prelude::{Config, Void};
use opentelemetry::trace::TracerProvider;
use opentelemetry_otlp::{Protocol, WithExportConfig};
use tracing_subscriber::{fmt::format::FmtSpan, layer::SubscriberExt, util::SubscriberInitExt};

/// Intent normalizer – a deterministic gate in front of a hosted analytics agent.
///
/// Configuration can come from `config.toml` or `INTENT_NORMALIZER_*` environment
/// variables. Questions are read one per line from stdin unless `--question`
/// is given.
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Args {
    /// Override the config file path (optional).
    ///
    /// By default, the normalizer will look for a config file at `.hidden/config.toml`
    /// in the current directory.
    #[arg(short, long)]
    config: Option<std::path::PathBuf>,
    /// Increase log verbosity (-v, -vv, etc.).
    ///
    /// Use multiple times to increase verbosity:
    /// - No flag: INFO level
    /// - -v: DEBUG level
    /// - -vv or more: TRACE level
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
    /// Export spans over OTLP (HTTP) to the collector named by the standard
    /// `OTEL_EXPORTER_OTLP_*` environment variables.
    #[arg(long)]
    otlp: bool,
    /// Answer a single question and exit instead of reading stdin.
    #[arg(short, long)]
    question: Option<String>,
}

/// Main entry point for the intent-normalizer binary.
///
/// Sets up logging based on verbosity, loads configuration, and starts the runtime.
#[tokio::main]
async fn main() -> Void {
    let args = Args::parse();

    // Construct the level filter.

    let level = match args.verbose {
        0 => tracing::Level::INFO,
        1 => tracing::Level::DEBUG,
        _ => tracing::Level::TRACE,
    };

    let level_filter = tracing_subscriber::filter::LevelFilter::from_level(level);

    // Prepare the log layer; stdout is reserved for directives.

    let stderr = tracing_subscriber::fmt::layer()
        .with_writer(std::io::stderr)
        .without_time()
        .with_ansi(true)
        .with_level(true)
        .with_file(false)
        .with_target(false)
        .with_thread_ids(false)
        .with_thread_names(false)
        .with_span_events(FmtSpan::NEW | FmtSpan::CLOSE);

    // Prepare the otlp layer.

    let otel = if args.otlp {
        let exporter = opentelemetry_otlp::SpanExporter::builder().with_http().with_protocol(Protocol::HttpBinary).build()?;
        let tracer = opentelemetry_sdk::trace::SdkTracerProvider::builder().with_simple_exporter(exporter).build().tracer("intent-normalizer");
        Some(tracing_opentelemetry::layer().with_tracer(tracer))
    } else {
        None
    };

    tracing_subscriber::registry().with(otel).with(level_filter).with(stderr).init();

    let config = Config::load(args.config.as_deref())?;

    intent_normalizer::start(config, args.question).await
}
