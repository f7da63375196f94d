use std::time::Duration;
use std::{fs, io, path};

use anyhow::Context as _;

use clap::Parser;
use rustls::pki_types::CertificateDer;
use tokio::signal::unix::{signal, SignalKind};

use wormhole_hub::{bridge, Context, ServerBuilder};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Address agents connect to over QUIC.
    #[arg(long, default_value = "0.0.0.0:4242")]
    quic_addr: std::net::SocketAddr,

    /// Address of the HTTP control plane.
    #[arg(long, default_value = "0.0.0.0:9999")]
    http_addr: std::net::SocketAddr,

    /// Use the certificates at this path, encoded as PEM.
    /// A self-signed certificate is generated when omitted.
    #[arg(long, requires = "tls_key")]
    tls_cert: Option<path::PathBuf>,

    /// Use the private key at this path, encoded as PEM.
    #[arg(long, requires = "tls_cert")]
    tls_key: Option<path::PathBuf>,

    /// Seconds to wait for an agent's answer before failing a tunneled call.
    #[arg(long, default_value_t = 10)]
    command_timeout: u64,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Enable info logging.
    let env = env_logger::Env::default().default_filter_or("info");
    env_logger::init_from_env(env);

    let args = Args::parse();

    let ctx = Context::new(Duration::from_secs(args.command_timeout));

    let builder = ServerBuilder::new().with_addr(args.quic_addr);
    let server = match (&args.tls_cert, &args.tls_key) {
        (Some(tls_cert), Some(tls_key)) => {
            // Read the PEM certificate chain
            let chain = fs::File::open(tls_cert).context("failed to open cert file")?;
            let mut chain = io::BufReader::new(chain);

            let chain: Vec<CertificateDer> = rustls_pemfile::certs(&mut chain)
                .collect::<Result<_, _>>()
                .context("failed to load certs")?;

            anyhow::ensure!(!chain.is_empty(), "could not find certificate");

            // Read the PEM private key
            let keys = fs::File::open(tls_key).context("failed to open key file")?;

            let key = rustls_pemfile::private_key(&mut io::BufReader::new(keys))
                .context("failed to load private key")?
                .context("missing private key")?;

            builder.with_certificate(chain, key)?
        }
        _ => {
            log::info!("no certificate supplied, generating a self-signed one");
            builder.with_self_signed()?
        }
    };

    log::info!("listening for agents on {}", args.quic_addr);

    let listener = tokio::net::TcpListener::bind(args.http_addr)
        .await
        .context("failed to bind the control plane")?;
    log::info!("control plane on {}", args.http_addr);

    let app = bridge::router(ctx.clone());

    tokio::select! {
        _ = server.run(ctx.clone()) => {}
        res = axum::serve(listener, app).with_graceful_shutdown(shutdown_signal()) => {
            res.context("control plane failed")?;
        }
    }

    // Graceful teardown: every session is cancelled (failing its waiters),
    // then the endpoint goes away.
    log::info!("shutting down");
    for (identifier, session) in ctx.registry.snapshot() {
        log::debug!("closing session for agent {identifier}");
        session.shutdown();
    }
    server.close();

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
