#![deny(unsafe_code)]

//! The `dw4d` daemon: a DriveWire 4 server bridged over TCP.
//!
//! The vintage host's UART is expected to reach us through a
//! serial-over-TCP bridge (ser2net, a WiFi modem, or a USB adapter
//! driver); `dw4d` accepts one host connection at a time and serves it
//! until disconnect or ctrl-c.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use daemon::{DwConfig, Server};
use tokio::net::TcpListener;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "dw4d", version, about = "DriveWire 4 protocol server")]
struct Args {
    /// Path to the JSON configuration file.
    #[arg(long, default_value = "dw4d.json")]
    config: PathBuf,

    /// Address the serial bridge listens on.
    #[arg(long, default_value = "127.0.0.1:65504")]
    listen: SocketAddr,
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();
    let runtime = match tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(build_error) => {
            error!(%build_error, "failed to build the runtime");
            return ExitCode::FAILURE;
        }
    };

    match runtime.block_on(run(&args)) {
        Ok(()) => ExitCode::SUCCESS,
        Err(run_error) => {
            error!(%run_error, "daemon failed");
            ExitCode::FAILURE
        }
    }
}

async fn run(args: &Args) -> std::io::Result<()> {
    let config = DwConfig::load_or_default(&args.config);
    let listener = TcpListener::bind(args.listen).await?;
    info!(listen = %args.listen, "serial bridge listening");

    loop {
        let (stream, peer) = tokio::select! {
            result = tokio::signal::ctrl_c() => {
                result?;
                info!("shutting down");
                return Ok(());
            }
            accepted = listener.accept() => accepted?,
        };
        info!(%peer, "host connected");
        let _ = stream.set_nodelay(true);

        let mut server = Server::start(config.clone(), stream);
        let interrupted = tokio::select! {
            result = tokio::signal::ctrl_c() => {
                result.map(|()| true)?
            }
            () = server.serve() => {
                info!(%peer, "host disconnected");
                false
            }
        };
        server.stop().await;
        if interrupted {
            info!("shutting down");
            return Ok(());
        }
    }
}
