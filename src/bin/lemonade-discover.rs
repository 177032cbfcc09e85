//! Find a local Lemonade server and list its models.
//!
//! Without `CONFIG` the config is looked up via `LEMONADE_CLIENT_CONFIG` or
//! a `lemonade.yaml` in the current directory or its parents, falling back
//! to defaults. `--all` lists every live endpoint instead of stopping at the
//! first. Set `LEMONADE_LOG_FORMAT=json` for JSON logs.

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::Parser;

use lemonade_client::{
    load_config, load_or_default, ClientConfig, ConnectionSession, HttpLivenessChecker,
    LemonadeClient, PortScanner, SessionError,
};

/// Find a local Lemonade server and list its models.
#[derive(Debug, Parser)]
#[command(name = "lemonade-discover", version, about)]
struct Args {
    /// List every live endpoint instead of stopping at the first.
    #[arg(long)]
    all: bool,

    /// Config file. Defaults to LEMONADE_CLIENT_CONFIG, then a
    /// lemonade.yaml in the current directory or its parents.
    config: Option<PathBuf>,
}

fn init_tracing() {
    use tracing_subscriber::fmt;
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("lemonade_client=info,warn"));

    let json = std::env::var("LEMONADE_LOG_FORMAT").is_ok_and(|v| v == "json");
    let builder = fmt::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_ansi(false)
        .with_target(true);

    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

fn load(args: &Args) -> Result<ClientConfig> {
    match &args.config {
        Some(path) => load_config(path).with_context(|| format!("loading {}", path.display())),
        None => {
            let cwd = std::env::current_dir().context("reading current directory")?;
            Ok(load_or_default(&cwd)?)
        }
    }
}

async fn list_all(config: &ClientConfig) -> Result<()> {
    let checker = HttpLivenessChecker::new(config.liveness.clone())?;
    let scanner = PortScanner::new(Arc::new(checker));
    let found = scanner.scan_all(&config.scan).await?;
    if found.is_empty() {
        bail!(
            "no live server among {} candidates",
            config.scan.candidate_count()
        );
    }
    for endpoint in found {
        println!("{}", endpoint.base_url());
    }
    Ok(())
}

async fn discover(config: &ClientConfig) -> Result<()> {
    let session = ConnectionSession::from_config(config)?;
    let client = match session.discover().await {
        Ok(endpoint) => {
            println!("server: {}", endpoint.base_url());
            LemonadeClient::from_session(Arc::new(session))
        }
        Err(SessionError::NotFound {
            candidates,
            elapsed_ms,
        }) => bail!(
            "no live server found on {:?} ports {}-{} ({candidates} candidates, {elapsed_ms}ms)",
            config.scan.host_candidates,
            config.scan.port_range.start,
            config.scan.port_range.end,
        ),
        Err(e) => return Err(e.into()),
    };

    let models = client.list_models().await.context("listing models")?;
    if models.is_empty() {
        println!("no models available");
    }
    for model in &models {
        println!("  {}", model.id);
    }
    if let Some(current) = client.current_model().await? {
        println!("current: {current}");
    }
    Ok(())
}

async fn run(args: Args) -> Result<()> {
    let config = load(&args)?;
    if args.all {
        list_all(&config).await
    } else {
        discover(&config).await
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();
    init_tracing();

    match run(args).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {e:#}");
            ExitCode::FAILURE
        }
    }
}
