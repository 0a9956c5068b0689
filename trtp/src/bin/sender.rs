//! `sender [-f FILE] HOSTNAME PORT`
//!
//! Sends `FILE` (or stdin) to a `receiver` listening on `HOSTNAME:PORT`.
//! Set `RUST_LOG` to control verbosity; logs go to stderr.

use anyhow::Context;
use clap::Parser;
use tokio::fs::File;
use tokio::io::{stdin, AsyncRead};

use trtp::cli::Args;
use trtp::socket::resolve;
use trtp::{Sender, Socket, TransportConfig};

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    env_logger::init();
    let args = Args::parse();

    let peer = resolve(&args.hostname, args.port)
        .await
        .with_context(|| format!("resolving {}", args.hostname))?;
    let socket = Socket::connect(peer).await.context("opening UDP socket")?;

    let input: Box<dyn AsyncRead + Unpin> = match &args.file {
        Some(path) => Box::new(
            File::open(path)
                .await
                .with_context(|| format!("opening {}", path.display()))?,
        ),
        None => Box::new(stdin()),
    };

    log::info!("[sender] sending to {peer}");
    let mut sender = Sender::new(socket, TransportConfig::default())?;
    let report = sender.run(input).await.context("transfer failed")?;
    log::info!("[sender] {report:?}");
    Ok(())
}
