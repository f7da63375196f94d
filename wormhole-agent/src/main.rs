use anyhow::Context as _;

use clap::Parser;
use tokio::signal::unix::{signal, SignalKind};
use url::Url;

use wormhole_agent::{ClientBuilder, Executor, Session};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// The node identifier announced to the hub.
    identifier: String,

    /// URL of the hub's QUIC endpoint.
    #[arg(long, default_value = "https://127.0.0.1:4242")]
    server: Url,

    /// Skip TLS verification on the hub connection and on inward https calls.
    #[arg(long)]
    insecure: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Enable info logging.
    let env = env_logger::Env::default().default_filter_or("info");
    env_logger::init_from_env(env);

    let args = Args::parse();

    let executor =
        Executor::new(args.insecure).context("failed to build the inward http client")?;

    let client = if args.insecure {
        // Hubs commonly run on a generated self-signed certificate.
        unsafe { ClientBuilder::new().with_no_certificate_verification() }
    } else {
        ClientBuilder::new().with_system_roots()
    }
    .context("failed to build the quic client")?;

    log::info!("connecting to {} as {}", args.server, args.identifier);
    let session = Session::connect(&client, &args.server, &args.identifier, executor)
        .await
        .context("failed to establish the hub session")?;

    tokio::select! {
        res = session.run() => res.context("session failed")?,
        _ = shutdown_signal() => log::info!("shutting down"),
    }

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();

    match signal(SignalKind::terminate()) {
        Ok(mut terminate) => {
            tokio::select! {
                _ = ctrl_c => {}
                _ = terminate.recv() => {}
            }
        }
        Err(err) => {
            log::error!("failed to install the SIGTERM handler: {err}");
            let _ = ctrl_c.await;
        }
    }
}
