//! nel-server - evaluation kernel speaking line-framed JSON on stdio
//!
//! Stdout carries protocol frames only; diagnostics go to stderr.

use anyhow::{Context as _, Result};
use clap::Parser;
use nel::runtime::ServerConfig;
use std::path::PathBuf;
use tracing::info;

#[derive(Parser)]
#[command(name = "nel-server")]
#[command(about = "Out-of-process code evaluation kernel", long_about = None)]
struct Cli {
    /// JSON configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Mirror every received message as a log frame
    #[arg(long)]
    debug: bool,

    /// Deliver run results through the low-level sender for new contexts
    #[arg(long)]
    await_execution: bool,

    /// Nesting depth of text/plain result renderings
    #[arg(long)]
    inspect_depth: Option<usize>,

    /// Recursion limit of the evaluator; the serving thread's stack is sized to match
    #[arg(long)]
    max_eval_depth: Option<usize>,
}

impl Cli {
    fn server_config(&self) -> Result<ServerConfig> {
        let mut config = match &self.config {
            Some(path) => ServerConfig::from_file(path)?,
            None => ServerConfig::default(),
        };
        config.apply_env();
        if self.debug {
            config.debug = true;
        }
        if self.await_execution {
            config.await_execution = true;
        }
        if let Some(depth) = self.inspect_depth {
            config.inspect_depth = depth;
        }
        if let Some(depth) = self.max_eval_depth {
            config.max_eval_depth = depth;
        }
        Ok(config)
    }
}

fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    let cli = Cli::parse();
    let config = cli.server_config()?;

    info!(
        session = %uuid::Uuid::new_v4(),
        started = %chrono::Utc::now().to_rfc3339(),
        version = nel::VERSION,
        protocol = nel::PROTOCOL_VERSION,
        debug = config.debug,
        await_execution = config.await_execution,
        max_eval_depth = config.max_eval_depth,
        "nel-server starting"
    );

    // Evaluation recurses on the serving thread, so it gets a stack sized
    // for the configured depth.
    let server = std::thread::Builder::new()
        .name("nel-server".to_string())
        .stack_size(config.stack_size())
        .spawn(move || -> Result<()> {
            let runtime = tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
                .context("failed to start the async runtime")?;
            runtime
                .block_on(nel::service::serve_stdio(config))
                .context("stdio transport failed")
        })
        .context("failed to spawn the serving thread")?;

    server
        .join()
        .map_err(|_| anyhow::anyhow!("serving thread panicked"))??;

    info!("input closed; shutting down");
    Ok(())
}
