//! TCP listener for weft relays.
//!
//! Accepts connections and runs one task per connection: read `Hello`, join
//! the room, then pump frames between the socket and the room until either
//! side goes away.

use std::net::SocketAddr;

use futures::{SinkExt, StreamExt};
use thiserror::Error;
use tokio::net::{TcpListener, TcpStream};
use tokio::time::timeout;
use tokio_util::bytes::Bytes;
use tokio_util::codec::{Framed, LengthDelimitedCodec};
use tracing::{debug, error, info, warn};
use weft_types::{ClientFrame, MAX_FRAME_LEN, ServerFrame, WireError};

use crate::config::RelayConfig;
use crate::constants::HELLO_TIMEOUT;
use crate::registry::RoomRegistry;
use crate::room::{RoomError, RoomSettings};
use crate::store::SharedStore;

type Transport = Framed<TcpStream, LengthDelimitedCodec>;

#[derive(Debug, Error)]
pub enum RelayError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Wire(#[from] WireError),
    #[error(transparent)]
    Room(#[from] RoomError),
    #[error("protocol violation: {0}")]
    Protocol(String),
    #[error("no hello within {0:?}")]
    HelloTimeout(std::time::Duration),
}

/// Relay server
pub struct RelayServer {
    config: RelayConfig,
    registry: RoomRegistry,
}

impl RelayServer {
    pub fn new(config: RelayConfig, store: SharedStore) -> Self {
        let registry = RoomRegistry::new(store, RoomSettings::from(&config));
        Self { config, registry }
    }

    pub fn registry(&self) -> &RoomRegistry {
        &self.registry
    }

    /// Bind the configured address and serve until the listener fails.
    pub async fn run(&self) -> Result<(), RelayError> {
        let listener = TcpListener::bind(self.config.listen).await?;
        self.serve(listener).await
    }

    /// Serve on an already bound listener.
    pub async fn serve(&self, listener: TcpListener) -> Result<(), RelayError> {
        info!(addr = %listener.local_addr()?, "relay listening");
        loop {
            let (stream, peer) = listener.accept().await?;
            let registry = self.registry.clone();
            tokio::spawn(async move {
                if let Err(e) = handle_connection(stream, peer, registry).await {
                    debug!(%peer, error = %e, "connection ended with error");
                }
            });
        }
    }
}

async fn send_frame(transport: &mut Transport, frame: &ServerFrame) -> Result<(), RelayError> {
    let bytes = frame.encode()?;
    transport.send(Bytes::from(bytes)).await?;
    Ok(())
}

/// Tell the peer why before hanging up. Best effort.
async fn refuse(transport: &mut Transport, message: String) {
    let _ = send_frame(transport, &ServerFrame::Error { message }).await;
}

async fn handle_connection(
    stream: TcpStream,
    peer: SocketAddr,
    registry: RoomRegistry,
) -> Result<(), RelayError> {
    stream.set_nodelay(true)?;
    let codec = LengthDelimitedCodec::builder()
        .max_frame_length(MAX_FRAME_LEN)
        .new_codec();
    let mut transport = Framed::new(stream, codec);

    let first = match timeout(HELLO_TIMEOUT, transport.next()).await {
        Ok(Some(frame)) => frame?,
        Ok(None) => return Ok(()),
        Err(_) => {
            refuse(&mut transport, "hello timeout".into()).await;
            return Err(RelayError::HelloTimeout(HELLO_TIMEOUT));
        }
    };
    let (room_name, replica, state_vector) = match ClientFrame::decode(&first) {
        Ok(ClientFrame::Hello {
            room,
            replica,
            state_vector,
        }) => (room, replica, state_vector),
        Ok(_) => {
            refuse(&mut transport, "expected hello".into()).await;
            return Err(RelayError::Protocol("first frame was not hello".into()));
        }
        Err(e) => {
            refuse(&mut transport, format!("undecodable hello: {e}")).await;
            return Err(e.into());
        }
    };

    let (room, mut membership) = match registry.join(&room_name, replica, state_vector).await {
        Ok(joined) => joined,
        Err(e) => {
            warn!(%peer, room = %room_name, %replica, error = %e, "join failed");
            refuse(&mut transport, e.to_string()).await;
            return Err(e.into());
        }
    };
    let conn = membership.conn;
    info!(%peer, room = %room_name, %replica, conn, "connection joined room");

    let result: Result<(), RelayError> = async {
        loop {
            tokio::select! {
                frame = transport.next() => {
                    let bytes = match frame {
                        Some(Ok(bytes)) => bytes,
                        Some(Err(e)) => return Err(e.into()),
                        None => return Ok(()),
                    };
                    match ClientFrame::decode(&bytes) {
                        Ok(ClientFrame::Update { update }) => room.update(conn, update).await?,
                        Ok(ClientFrame::Presence(update)) => room.presence(conn, update).await?,
                        Ok(ClientFrame::Hello { .. }) => {
                            refuse(&mut transport, "duplicate hello".into()).await;
                            return Err(RelayError::Protocol("duplicate hello".into()));
                        }
                        Err(e) => warn!(%peer, %replica, error = %e, "dropping undecodable frame"),
                    }
                }
                out = membership.frames.recv() => {
                    match out {
                        Some(frame) => send_frame(&mut transport, &frame).await?,
                        // Dropped by the room (slow consumer) or the room closed.
                        None => return Ok(()),
                    }
                }
            }
        }
    }
    .await;

    if let Err(e) = room.leave(conn).await {
        debug!(room = %room_name, conn, error = %e, "leave after room closed");
    }
    match &result {
        Ok(()) => info!(%peer, room = %room_name, %replica, "connection closed"),
        Err(RelayError::Io(e)) => debug!(%peer, %replica, error = %e, "connection dropped"),
        Err(e) => error!(%peer, %replica, error = %e, "connection failed"),
    }
    result
}
