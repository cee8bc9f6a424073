//! Per-socket connection handling.
//!
//! The read loop owns the socket and is the only task that ever calls
//! `write_all` or tears the connection down. Every decoded frame is handed
//! off to its own spawned task so a slow catalog round-trip never blocks
//! the loop from reading the next frame; those tasks talk back to the loop
//! through an unbounded side channel carrying an optional reply frame plus
//! a close flag.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Result;
use bytes::BytesMut;
use codec::{Decoder, Inbound, ids};
use parking_lot::Mutex;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc::{UnboundedSender, unbounded_channel};

use crate::catalog::Catalog;
use crate::handlers::{self, ClientIdentity, HandlerContext, NodeIdentity, Outbound};
use crate::statistics::Statistics;
use service::Registry;

const MAX_FRAME_SIZE: usize = 4096;

/// Which of the two listening ports a connection arrived on. Each side
/// uses a different XOR key pair and a different handler set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Port {
    AuthClient,
    Internal,
}

/// A message a spawned handler task sends back to the read loop: the bytes
/// to write (already encoded), if any, and whether the loop should then
/// close the connection.
type ReplyMessage = (Option<Vec<u8>>, bool);

/// Drives one accepted connection until disconnect, then cleans up any
/// registry state the connection had accumulated.
pub async fn handle(
    mut socket: TcpStream,
    address: SocketAddr,
    port: Port,
    registry: Arc<Registry>,
    catalog: Arc<dyn Catalog>,
    statistics: Arc<Statistics>,
) -> Result<()> {
    statistics.connection_opened();

    let (reply_tx, mut reply_rx) = unbounded_channel::<ReplyMessage>();
    let client_identity: Arc<Mutex<Option<ClientIdentity>>> = Arc::new(Mutex::new(None));
    let node_identity: Arc<Mutex<Option<NodeIdentity>>> = Arc::new(Mutex::new(None));

    if port == Port::AuthClient {
        let hello = codec::hello(ids::CLIENT_XOR_SEND);
        if socket.write_all(&hello).await.is_err() {
            return Ok(());
        }
    }

    let decode_key = match port {
        Port::AuthClient => ids::CLIENT_XOR_RECV,
        Port::Internal => ids::InternalKeys::XOR_GAME_SEND,
    };

    let decoder = Decoder::default();
    let mut buffer = BytesMut::with_capacity(MAX_FRAME_SIZE);

    'read: loop {
        tokio::select! {
            read = socket.read_buf(&mut buffer) => {
                match read {
                    Ok(0) | Err(_) => break 'read,
                    Ok(_) => {}
                }

                if buffer.len() > MAX_FRAME_SIZE * 4 {
                    log::warn!("{address} exceeded the inbound buffer limit, closing");
                    break 'read;
                }

                loop {
                    if buffer.len() < codec::HEADER_LEN {
                        break;
                    }

                    let frame_len = match Decoder::message_size(&buffer, decode_key) {
                        Ok(len) => len,
                        Err(_) => break,
                    };

                    if frame_len > MAX_FRAME_SIZE {
                        log::warn!("frame from {address} exceeds max size, closing");
                        break 'read;
                    }

                    if frame_len > buffer.len() {
                        break;
                    }

                    let frame = buffer.split_to(frame_len);
                    let inbound = match decoder.decode(&frame, decode_key) {
                        Ok(inbound) => inbound,
                        Err(error) => {
                            log::warn!("undecryptable frame from {address}, disconnecting: {error}");
                            statistics.malformed_frame();
                            break 'read;
                        }
                    };

                    statistics.frame_received();

                    spawn_handler(
                        inbound,
                        port,
                        registry.clone(),
                        catalog.clone(),
                        client_identity.clone(),
                        node_identity.clone(),
                        reply_tx.clone(),
                    );
                }
            }
            Some((bytes, close)) = reply_rx.recv() => {
                if let Some(bytes) = bytes {
                    if socket.write_all(&bytes).await.is_err() {
                        break 'read;
                    }
                    statistics.frame_sent();
                }

                if close {
                    break 'read;
                }
            }
            else => break 'read,
        }
    }

    if let Some(identity) = client_identity.lock().take() {
        registry.unauthorize_user(&identity.username);
    }

    if let Some(identity) = node_identity.lock().take() {
        registry.unauthorize_server(&identity.node_id);
    }

    log::info!("connection closed: addr={address:?}, port={port:?}");

    Ok(())
}

fn spawn_handler(
    inbound: Inbound,
    port: Port,
    registry: Arc<Registry>,
    catalog: Arc<dyn Catalog>,
    client_identity: Arc<Mutex<Option<ClientIdentity>>>,
    node_identity: Arc<Mutex<Option<NodeIdentity>>>,
    reply_tx: UnboundedSender<ReplyMessage>,
) {
    tokio::spawn(async move {
        let ctx = HandlerContext { registry, catalog };

        let outbound = match port {
            Port::AuthClient => dispatch_client(&ctx, inbound, &client_identity).await,
            Port::Internal => dispatch_internal(&ctx, inbound, &node_identity).await,
        };

        let encode_key = match port {
            Port::AuthClient => ids::CLIENT_XOR_SEND,
            Port::Internal => ids::InternalKeys::XOR_AUTH_SEND,
        };

        let Outbound { reply, close } = outbound;
        let bytes = reply.map(|(id, blocks)| codec::encode(id, &blocks, encode_key));

        let _ = reply_tx.send((bytes, close));
    });
}

async fn dispatch_client(
    ctx: &HandlerContext,
    inbound: Inbound,
    client_identity: &Arc<Mutex<Option<ClientIdentity>>>,
) -> Outbound {
    match inbound.id {
        ids::LAUNCHER => handlers::handle_launcher(),
        ids::SERVER_LIST => {
            let (outbound, identity) = handlers::handle_server_list(ctx, &inbound.blocks).await;
            if let Some(identity) = identity {
                *client_identity.lock() = Some(identity);
            }
            outbound
        }
        ids::SET_NICKNAME => {
            let identity = client_identity.lock().clone();
            match identity {
                Some(identity) => handlers::handle_set_nickname(ctx, &identity, &inbound.blocks).await,
                None => {
                    log::warn!("set-nickname from an unauthorized client");
                    Outbound::close()
                }
            }
        }
        other => {
            log::warn!("unknown client packet id {other:#06x}");
            Outbound::none()
        }
    }
}

async fn dispatch_internal(
    ctx: &HandlerContext,
    inbound: Inbound,
    node_identity: &Arc<Mutex<Option<NodeIdentity>>>,
) -> Outbound {
    match inbound.id {
        ids::internal::GAME_SERVER_AUTHENTICATION => {
            let (outbound, identity) = handlers::handle_game_server_auth(ctx, &inbound.blocks).await;
            if let Some(identity) = identity {
                *node_identity.lock() = Some(identity);
            }
            outbound
        }
        ids::internal::GAME_SERVER_STATUS => {
            let identity = node_identity.lock().clone();
            handlers::handle_game_server_status(ctx, identity.as_ref(), &inbound.blocks)
        }
        ids::internal::CLIENT_AUTHENTICATION => {
            let identity = node_identity.lock().clone();
            handlers::handle_internal_client_auth(ctx, identity.as_ref(), &inbound.blocks)
        }
        other => {
            log::warn!("unknown internal packet id {other:#06x}");
            Outbound::none()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use tokio::net::TcpListener;

    use crate::catalog::{ActiveServer, UserRecord};

    struct EmptyCatalog;

    #[async_trait]
    impl Catalog for EmptyCatalog {
        async fn lookup_user(&self, _username: &str) -> anyhow::Result<Option<UserRecord>> {
            Ok(None)
        }

        async fn displayname_taken(&self, _name: &str) -> anyhow::Result<bool> {
            Ok(false)
        }

        async fn update_displayname(&self, _username: &str, _new: &str) -> anyhow::Result<()> {
            Ok(())
        }

        async fn list_active_servers(&self) -> anyhow::Result<Vec<ActiveServer>> {
            Ok(Vec::new())
        }
    }

    #[tokio::test]
    async fn a_malformed_checksum_frame_disconnects_the_connection() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let registry = Arc::new(Registry::new());
        let catalog: Arc<dyn Catalog> = Arc::new(EmptyCatalog);
        let statistics = Arc::new(Statistics::default());

        let server = tokio::spawn(async move {
            let (socket, peer) = listener.accept().await.unwrap();
            handle(socket, peer, Port::AuthClient, registry, catalog, statistics).await
        });

        let mut client = TcpStream::connect(addr).await.unwrap();

        // A well-formed Launcher frame with its trailing checksum byte
        // corrupted, encoded with the client's send key (what the server
        // decodes with on the AuthClient port).
        let mut frame = codec::encode(ids::LAUNCHER, &[], ids::CLIENT_XOR_RECV);
        let last = frame.len() - 1;
        frame[last] ^= 0xFF;
        client.write_all(&frame).await.unwrap();

        // The server must tear the connection down rather than keep
        // dispatching on it; drain whatever it sent (the hello packet) and
        // confirm the stream ends in EOF.
        let mut buf = [0u8; 256];
        loop {
            let n = client.read(&mut buf).await.unwrap();
            if n == 0 {
                break;
            }
        }

        server.await.unwrap().unwrap();
    }
}
