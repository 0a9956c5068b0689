//! `receiver [-f FILE] HOSTNAME PORT`
//!
//! Listens on `HOSTNAME:PORT` and writes the received stream to `FILE`
//! (created or truncated) or stdout.  Logs go to stderr.

use anyhow::Context;
use clap::Parser;
use tokio::fs::File;
use tokio::io::{stdout, AsyncWrite};

use trtp::cli::Args;
use trtp::socket::resolve;
use trtp::{Receiver, Socket, TransportConfig};

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    env_logger::init();
    let args = Args::parse();

    let local = resolve(&args.hostname, args.port)
        .await
        .with_context(|| format!("resolving {}", args.hostname))?;
    let socket = Socket::bind(local)
        .await
        .with_context(|| format!("binding {local}"))?;

    let mut sink: Box<dyn AsyncWrite + Unpin> = match &args.file {
        Some(path) => Box::new(
            File::create(path)
                .await
                .with_context(|| format!("creating {}", path.display()))?,
        ),
        None => Box::new(stdout()),
    };

    let mut receiver = Receiver::new(socket, TransportConfig::default())?;
    let report = receiver.run(&mut sink).await.context("transfer failed")?;
    log::info!("[receiver] {report:?}");
    Ok(())
}
