//! Direct peer acceptor: a plain TCP handshake endpoint on its own port, for
//! peers that already know this node's address and skip the tracker.

use std::time::Duration;

use ferry_core::Message;
use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, info, warn};

use crate::net::{read_frame_timeout, write_frame};

pub async fn run_direct_acceptor(port: u16, read_limit: Duration) -> anyhow::Result<()> {
    let listener = TcpListener::bind(("0.0.0.0", port)).await?;
    info!(port, "direct peer port open");
    loop {
        match listener.accept().await {
            Ok((stream, peer)) => {
                tokio::spawn(async move {
                    if let Err(e) = greet(stream, read_limit).await {
                        debug!(%peer, error = %e, "direct handshake failed");
                    }
                });
            }
            Err(e) => warn!(error = %e, "accept failed"),
        }
    }
}

/// Answer CONNECT with the handshake ACK; anything else closes the socket.
async fn greet(mut stream: TcpStream, read_limit: Duration) -> anyhow::Result<()> {
    match read_frame_timeout(&mut stream, read_limit).await? {
        Message::Connect { peer_id, .. } => {
            info!(%peer_id, "direct peer connected");
            write_frame(&mut stream, &Message::ack_for("CONNECT")).await
        }
        other => anyhow::bail!("expected CONNECT, got {other:?}"),
    }
}
