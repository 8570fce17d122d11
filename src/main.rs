use std::net::SocketAddr;
use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::Context as _;
use clap::Parser as _;

#[derive(Debug, clap::Parser)]
#[command(author, version, about)]
struct AppArgs {
    #[arg(long, default_value = "127.0.0.1:3001")]
    addr: SocketAddr,

    /// Directory holding book namespaces, the config file, and upload
    /// scratch space.
    #[arg(long, default_value = "data")]
    data_dir: PathBuf,
}

#[tokio::main]
async fn main() -> ExitCode {
    if let Err(err) = try_main().await {
        eprintln!("{err:#}");
        return ExitCode::FAILURE;
    }

    ExitCode::SUCCESS
}

async fn try_main() -> anyhow::Result<()> {
    readspan::logging::init().context("init logging")?;

    let args = AppArgs::parse();
    tracing::info!(?args, "starting readspan");

    tokio::fs::create_dir_all(&args.data_dir)
        .await
        .with_context(|| format!("create data dir: {}", args.data_dir.display()))?;

    let state = readspan::server::AppState::local(&args.data_dir);
    let app = readspan::server::router(state);

    let listener = tokio::net::TcpListener::bind(args.addr)
        .await
        .map_err(|err| anyhow::anyhow!("bind {}: {err}", args.addr))?;
    tracing::info!(addr = %args.addr, "listening");
    axum::serve(listener, app).await?;
    Ok(())
}
