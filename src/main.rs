// ABOUTME: Main entry point for the Matrix <-> IRC bridge
// ABOUTME: Initializes logging and config, registers with the homeserver, runs listener and webhook server

use anyhow::{Context, Result};
use clap::Parser;
use matrix_irc_bridge::{
    config::Config,
    identity::IdentityMapper,
    irc::{self, TcpConnector},
    matrix_client::{self, AppServiceClient},
    metrics,
    webhook::{self, WebhookState},
    RelayEngine, RelaySettings,
};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Debug, Parser)]
#[command(name = "matrix-irc-bridge", version, about = "Bridge one Matrix room to one IRC channel")]
struct Args {
    /// Path to config.toml (defaults to the usual search path)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Skip the registration handshake with the homeserver
    #[arg(long)]
    skip_registration: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Set up panic hook to log panics before they crash the process
    std::panic::set_hook(Box::new(|panic_info| {
        eprintln!("\nPANIC! Bridge crashed with the following error:\n");
        eprintln!("{}", panic_info);
        eprintln!("\nBacktrace:");
        eprintln!("{:?}", std::backtrace::Backtrace::force_capture());
    }));

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,hyper=warn,reqwest=warn".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args = Args::parse();

    tracing::info!("Starting Matrix-IRC bridge");

    dotenvy::dotenv().ok();
    let mut config = Config::load_from(args.config.as_deref())?;

    tracing::info!(
        homeserver = %config.matrix.homeserver,
        room_id = %config.matrix.room_id,
        irc_server = %config.irc.server_addr(),
        channel = %config.irc.channel,
        nick = %config.irc.nick,
        webhook_port = config.webhook.port,
        "Configuration loaded"
    );

    if config.bridge.register && !args.skip_registration {
        let hs_token = matrix_client::register(
            &config.matrix.homeserver,
            &config.matrix.token,
            &config.bridge.url,
        )
        .await
        .context("Registration with the homeserver failed")?;
        if config.webhook.hs_token.is_none() {
            config.webhook.hs_token = hs_token;
        }
    } else {
        tracing::info!("Skipping registration handshake");
    }

    let metrics_handle = match metrics::init_metrics() {
        Ok(handle) => Some(handle),
        Err(e) => {
            tracing::warn!(error = %e, "Metrics disabled");
            None
        }
    };

    let room = AppServiceClient::new(
        &config.matrix.homeserver,
        &config.matrix.token,
        &config.matrix.room_id,
    )
    .context("Failed to build homeserver client")?;
    let connector = TcpConnector::from_config(&config.irc);

    let engine = Arc::new(RelayEngine::new(
        RelaySettings {
            room_id: config.matrix.room_id.clone(),
            channel: config.irc.channel.clone(),
            bridge_nick: config.irc.nick.clone(),
        },
        IdentityMapper::new(&config.matrix.homeserver_domain),
        Arc::new(room),
        Arc::new(connector),
    ));

    let shutdown = CancellationToken::new();

    // IRC -> Matrix: one listener connection feeding the relay in order.
    // Unbounded so a slow homeserver never keeps the socket from answering PINGs.
    let (tx, rx) = mpsc::unbounded_channel();
    let listener_task = tokio::spawn(irc::supervise_listener(
        irc::listener_context(&config.irc),
        tx,
        shutdown.clone(),
    ));
    let relay_engine = Arc::clone(&engine);
    let relay_task = tokio::spawn(async move { relay_engine.run_irc_listener(rx).await });

    // Matrix -> IRC: transactions pushed by the homeserver
    let state = WebhookState::new(Arc::clone(&engine), config.webhook.hs_token.clone());
    let signal_token = shutdown.clone();
    let server_result = webhook::start_webhook_server(
        &config.webhook.host,
        config.webhook.port,
        state,
        metrics_handle,
        async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!(error = %e, "Failed to listen for shutdown signal");
            }
            tracing::info!("Shutdown signal received");
            signal_token.cancel();
        },
    )
    .await;

    shutdown.cancel();
    engine.shutdown("Bridge shutting down").await;
    if let Err(e) = listener_task.await {
        tracing::warn!(error = %e, "Listener task panicked");
    }
    if let Err(e) = relay_task.await {
        tracing::warn!(error = %e, "Relay task panicked");
    }

    server_result.context("Webhook server failed")?;
    tracing::info!("Bridge stopped");
    Ok(())
}
