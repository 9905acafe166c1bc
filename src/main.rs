use anyhow::{anyhow, Context, Result};
use clap::Parser;
use log::info;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::Level;
use tracing_subscriber::{fmt, EnvFilter};

use graceful::{
    config::Args, echo::Echo, server::run_tcp_server, shutdown::ShutdownController, signals,
    supervisor::Supervisor,
};

fn init_tracing(verbosity: u8) -> Result<()> {
    let level = match verbosity {
        0 => Level::INFO,
        1 => Level::DEBUG,
        _ => Level::TRACE,
    };
    let filter = EnvFilter::from_default_env().add_directive(format!("graceful={level}").parse()?);
    fmt()
        .with_env_filter(filter)
        .try_init()
        .map_err(|e| anyhow!(e))
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_tracing(args.verbose)?;
    log_panics::init();

    let addr = args.listen_addr();
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("binding {addr}"))?;
    info!("Listening on {addr}, pid {}", std::process::id());

    let signals = signals::listen()?;
    let controller = ShutdownController::new();
    let server = run_tcp_server(listener, &controller, &CancellationToken::new(), Echo);

    Supervisor::new(controller, args.grace.0)
        .run(signals)
        .await
        .context("graceful shutdown")?;

    server.await.context("server task")?;
    info!("Stopped");
    Ok(())
}
