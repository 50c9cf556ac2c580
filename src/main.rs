use anyhow::{Context, Result};
use clap::Parser;
use peerlist_lib::config::{Backend, Command, Config};
use peerlist_lib::discovery::Discovery;
use peerlist_lib::service::{EventSender, RegistryService, DEFAULT_INBOUND_BUFFER};
use peerlist_lib::{multicast, LocalPeer, PeerRegistry, Subscription, SubscriptionError};
use std::io::Write;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::parse();
    let _guard = peerlist_lib::logging::init(&config.logging());

    let local = config.local_peer()?;
    tracing::info!(id = %local.id, alias = %local.alias, port = local.port, "Starting peerlist");

    let shutdown = CancellationToken::new();
    {
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::info!("Interrupted");
            }
            shutdown.cancel();
        });
    }

    let mut tasks = JoinSet::new();
    match config.command {
        Command::Announce => {
            announce(&config, &local, &shutdown, &mut tasks)?;
        }
        Command::Listen | Command::Run => {
            let registry = PeerRegistry::with_config(config.registry());
            let view_done = CancellationToken::new();
            let printer = tokio::spawn(print_changes(
                registry.clone(),
                registry.subscribe(),
                view_done.clone(),
            ));

            let (events, service) =
                RegistryService::spawn(registry, DEFAULT_INBOUND_BUFFER, shutdown.clone());
            listen(&config, &local, events, &shutdown, &mut tasks);
            if config.command == Command::Run {
                announce(&config, &local, &shutdown, &mut tasks)?;
            }

            while let Some(joined) = tasks.join_next().await {
                if let Err(e) = joined.context("discovery task panicked")? {
                    tracing::error!(cause = %e, "discovery error");
                    shutdown.cancel();
                }
            }
            let stats = service.await.context("registry service panicked")?;
            tracing::info!(?stats, "Registry service stopped");
            view_done.cancel();
            printer.await.context("peer view panicked")?;
            return Ok(());
        }
    }

    while let Some(joined) = tasks.join_next().await {
        joined.context("announce task panicked")??;
    }
    Ok(())
}

fn listen(
    config: &Config,
    local: &LocalPeer,
    events: EventSender,
    shutdown: &CancellationToken,
    tasks: &mut JoinSet<Result<(), peerlist_lib::DiscoveryError>>,
) {
    let local = local.clone();
    let shutdown = shutdown.clone();
    match config.backend {
        Backend::Mdns => {
            tasks.spawn(async move {
                // Construct on the task so a daemon failure surfaces as a task error
                let discovery = Discovery::new()?;
                discovery.run(local, events, shutdown).await
            });
        }
        Backend::Multicast => {
            tasks.spawn(multicast::listen(local, events, shutdown));
        }
    }
}

fn announce(
    config: &Config,
    local: &LocalPeer,
    shutdown: &CancellationToken,
    tasks: &mut JoinSet<Result<(), peerlist_lib::DiscoveryError>>,
) -> Result<()> {
    match config.backend {
        Backend::Multicast => {
            tasks.spawn(multicast::announce(local.clone(), shutdown.clone()));
        }
        Backend::Mdns => {
            // mDNS registration already happens as part of listening
            if config.command == Command::Announce {
                let mut discovery = Discovery::new().context("failed to start mDNS daemon")?;
                discovery
                    .register(local)
                    .context("failed to register mDNS service")?;
                let shutdown = shutdown.clone();
                tasks.spawn(async move {
                    shutdown.cancelled().await;
                    let _ = tokio::task::spawn_blocking(move || drop(discovery)).await;
                    Ok(())
                });
            }
        }
    }
    Ok(())
}

/// The peer list "view": prints the current list, then one line per change.
/// Once `done` fires it drains whatever is still buffered and returns.
async fn print_changes(registry: PeerRegistry, mut sub: Subscription, done: CancellationToken) {
    emit(sub.snapshot());
    loop {
        let received = tokio::select! {
            biased;
            received = sub.recv() => received,
            _ = done.cancelled() => break,
        };
        match received {
            Ok(notification) => emit(&notification),
            Err(SubscriptionError::Lagged { missed }) => {
                tracing::warn!("Peer view missed {} changes, resyncing", missed);
                emit(sub.resync(&registry));
            }
            Err(SubscriptionError::Closed) => return,
        }
    }
    while let Ok(Some(notification)) = sub.try_recv() {
        emit(&notification);
    }
}

fn emit<T: serde::Serialize>(value: &T) {
    match serde_json::to_string(value) {
        Ok(line) => {
            let mut stdout = std::io::stdout().lock();
            let _ = writeln!(stdout, "{line}");
        }
        Err(e) => tracing::error!("Failed to encode peer list update: {}", e),
    }
}
