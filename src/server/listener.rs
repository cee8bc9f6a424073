use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::net::TcpListener;

use crate::catalog::Catalog;
use crate::config::Config;
use crate::server::connection::{self, Port};
use crate::statistics::Statistics;
use service::Registry;

/// Binds the client-facing and internal (game-server) ports and accepts
/// connections on both concurrently. A bind failure on either port is
/// fatal: the whole startup aborts.
pub async fn start(
    config: Arc<Config>,
    registry: Arc<Registry>,
    catalog: Arc<dyn Catalog>,
    statistics: Arc<Statistics>,
) -> Result<()> {
    let ip = IpAddr::V4(config.server_ip);
    let client_addr = SocketAddr::new(ip, config.auth_client_port);
    let internal_addr = SocketAddr::new(ip, config.internal_port);

    let client_listener = TcpListener::bind(client_addr)
        .await
        .with_context(|| format!("failed to bind auth client port on {client_addr}"))?;

    let internal_listener = TcpListener::bind(internal_addr)
        .await
        .with_context(|| format!("failed to bind internal port on {internal_addr}"))?;

    log::info!("auth client listening: {client_addr}");
    log::info!("internal (game server) listening: {internal_addr}");

    tokio::try_join!(
        accept_loop(
            client_listener,
            Port::AuthClient,
            registry.clone(),
            catalog.clone(),
            statistics.clone(),
        ),
        accept_loop(internal_listener, Port::Internal, registry, catalog, statistics),
    )?;

    Ok(())
}

async fn accept_loop(
    listener: TcpListener,
    port: Port,
    registry: Arc<Registry>,
    catalog: Arc<dyn Catalog>,
    statistics: Arc<Statistics>,
) -> Result<()> {
    let local_addr = listener.local_addr()?;

    loop {
        let (socket, address) = listener.accept().await?;

        if let Err(error) = socket.set_nodelay(true) {
            log::warn!("failed to set nodelay for {address}: {error}");
        }

        log::info!("accepted connection: addr={address:?}, interface={local_addr:?}, port={port:?}");

        let registry = registry.clone();
        let catalog = catalog.clone();
        let statistics = statistics.clone();

        tokio::spawn(async move {
            if let Err(error) =
                connection::handle(socket, address, port, registry, catalog, statistics).await
            {
                log::error!("connection {address} ended with an error: {error}");
            }
        });
    }
}
