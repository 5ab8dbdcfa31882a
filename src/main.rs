use std::sync::Arc;

use anyhow::Context;
use tokio_util::sync::CancellationToken;

use noncer::config::Config;
use noncer::convert::MarkdownConverter;
use noncer::cycle::{CycleRunner, CycleSettings, spawn_listener};
use noncer::handoff;
use noncer::mailbox::ImapMailbox;
use noncer::webhook::{WebhookSink, spawn_sink};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Install rustls crypto provider before any TLS usage
    rustls::crypto::ring::default_provider()
        .install_default()
        .map_err(|_| anyhow::anyhow!("Failed to install rustls crypto provider"))?;

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    let config = Config::from_env().context("invalid configuration")?;

    eprintln!("📣 noncer v{}", env!("CARGO_PKG_VERSION"));
    eprintln!("   IMAP: {}:{}", config.imap.host, config.imap.port);
    eprintln!("   Folder: {}", config.folder);
    eprintln!("   Period: {}s", config.period.as_secs());
    eprintln!("   Max segment: {} bytes", config.max_segment_len);
    eprintln!(
        "   Allowed: {}",
        if config.allowed_domains.is_empty() {
            "none (deny all)".to_string()
        } else {
            config.allowed_domains.join(", ")
        }
    );

    let mailbox = Arc::new(
        ImapMailbox::connect(&config.imap)
            .await
            .context("could not connect to imap")?,
    );

    let cancel = CancellationToken::new();
    let (tx, rx) = handoff::channel();

    let sink_handle = spawn_sink(WebhookSink::new(&config.webhook_url), rx, cancel.clone());

    let runner = CycleRunner::new(
        mailbox.clone(),
        Arc::new(MarkdownConverter::new()),
        CycleSettings {
            folder: config.folder.clone(),
            max_segment_len: config.max_segment_len,
            allowed_domains: config.allowed_domains.clone(),
        },
        tx,
    );
    let mut listener = spawn_listener(runner, config.period, cancel.clone());

    let outcome = tokio::select! {
        res = &mut listener => Some(res),
        _ = shutdown_signal() => None,
    };

    cancel.cancel();
    let result = match outcome {
        Some(res) => res,
        None => listener.await,
    };
    let _ = sink_handle.await;
    mailbox.logout().await;

    result
        .context("listener task panicked")?
        .context("mailbox polling stopped")?;
    Ok(())
}

/// Resolve on Ctrl-C or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to listen for Ctrl-C: {e}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to listen for SIGTERM: {e}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
    tracing::info!("Shutdown signal received");
}
