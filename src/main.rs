//! `doc-jail`: run one sandboxed build from the command line.
//!
//! Reads a TOML config and a JSON request, prints the JSON result on stdout,
//! and waits for the session directory to be removed before exiting.

use std::io::{IsTerminal, Read};
use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use doc_jail::{BuildConfig, BuildRequest, BuildService};
use tracing::error;

#[derive(Debug, Parser)]
#[command(name = "doc-jail", version, about = "Run a sandboxed document build")]
struct Args {
    /// Configuration file (TOML)
    #[arg(short, long, env = "DOC_JAIL_CONFIG")]
    config: PathBuf,

    /// Request file (JSON); read from stdin when omitted
    #[arg(short, long)]
    request: Option<PathBuf>,

    /// Force a full build regardless of the request
    #[arg(long)]
    pdf: bool,

    /// Override the cleanup grace delay in milliseconds
    #[arg(long)]
    cleanup_delay_ms: Option<u64>,

    /// Emit logs as JSON
    #[arg(long)]
    json_log: bool,

    /// More verbose logging (-v debug, -vv trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

fn init_logging(args: &Args) {
    use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

    let level = match args.verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("doc_jail={level}")));

    if args.json_log {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr))
            .try_init()
            .ok();
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(
                tracing_subscriber::fmt::layer()
                    .with_writer(std::io::stderr)
                    .with_ansi(std::io::stderr().is_terminal()),
            )
            .try_init()
            .ok();
    }
}

fn read_request(args: &Args) -> Result<BuildRequest, Box<dyn std::error::Error>> {
    let text = match &args.request {
        Some(path) => std::fs::read_to_string(path)?,
        None => {
            let mut text = String::new();
            std::io::stdin().read_to_string(&mut text)?;
            text
        }
    };
    let mut request: BuildRequest = serde_json::from_str(&text)?;
    request.pdf |= args.pdf;
    Ok(request)
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();
    init_logging(&args);

    let mut config = match BuildConfig::load(&args.config) {
        Ok(config) => config,
        Err(e) => {
            error!(error = %e, "cannot load configuration");
            return ExitCode::from(2);
        }
    };
    if let Some(delay) = args.cleanup_delay_ms {
        config.limits.cleanup_delay_ms = delay;
    }

    let request = match read_request(&args) {
        Ok(request) => request,
        Err(e) => {
            error!(error = %e, "cannot read request");
            return ExitCode::from(2);
        }
    };

    let service = match BuildService::builder(config).build() {
        Ok(service) => service,
        Err(e) => {
            error!(error = %e, "invalid configuration");
            return ExitCode::from(2);
        }
    };

    let (result, cleanup) = service.run_tracked(request).await;
    let (json, code) = match &result {
        Ok(output) => (serde_json::to_string_pretty(output), ExitCode::SUCCESS),
        Err(failure) => (serde_json::to_string_pretty(failure), ExitCode::FAILURE),
    };
    match json {
        Ok(json) => println!("{}", json),
        Err(e) => error!(error = %e, "cannot serialize result"),
    }

    cleanup.wait().await;
    code
}
