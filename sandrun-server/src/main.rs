//! The sandrun service binary.
#![allow(missing_docs)]
#![allow(clippy::missing_docs_in_private_items)]

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use anyhow::Result;
use clap::Parser;
use clap_verbosity_flag::Verbosity;
use sandrun_config::Config;
use sandrun_docker::Docker;
use sandrun_engine::Engine;
use sandrun_languages::LanguageRegistry;
use tracing::info;
use tracing_log::AsTrace;
use tracing_subscriber::EnvFilter;

/// The command line arguments.
#[derive(Parser)]
#[command(about = "A sandboxed, multi-language code execution service")]
struct Args {
    /// The address to listen on.
    #[arg(long, default_value = "0.0.0.0")]
    host: String,

    /// The port to listen on.
    #[arg(long, default_value_t = 8000)]
    port: u16,

    #[command(flatten)]
    verbose: Verbosity,
}

/// Initializes the process and serves until interrupted.
async fn run(args: Args) -> Result<()> {
    let config = Arc::new(Config::load()?);
    let languages = Arc::new(LanguageRegistry::new());

    let docker = Docker::with_defaults()
        .context("error connecting to the Docker daemon—is it running?")?;
    docker
        .ping()
        .await
        .context("error reaching the Docker daemon—is it running?")?;

    let engine = Engine::new(docker, languages, config.clone());

    // Reap sandboxes left behind by a previous crash before taking traffic.
    let swept = engine.sweep_orphans().await?;
    if swept > 0 {
        info!("removed {swept} orphaned sandbox containers");
    }

    if config.pull_on_startup() {
        info!("pre-pulling sandbox images");
        engine.pull_images().await;
    }

    let addr: SocketAddr = format!("{}:{}", args.host, args.port)
        .parse()
        .context("invalid listen address")?;

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;

    info!("listening on {addr}");
    axum::serve(listener, sandrun_server::router(engine))
        .await
        .context("server error")?;

    Ok(())
}

pub fn main() -> Result<()> {
    let args = Args::parse();

    match std::env::var("RUST_LOG") {
        Ok(_) => tracing_subscriber::fmt()
            .with_env_filter(EnvFilter::from_default_env())
            .init(),
        Err(_) => tracing_subscriber::fmt()
            .with_max_level(args.verbose.log_level_filter().as_trace())
            .init(),
    };

    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .unwrap()
        .block_on(run(args))
}
