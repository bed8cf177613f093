//! The rendezvous tracker: one UDP socket, one owning loop. The bounded
//! receive timeout doubles as the housekeeping tick, so bursts of datagrams
//! are processed between ticks and there is no busy polling.

use std::time::Instant;

use ferry_core::registry::{Registry, RegistryConfig};
use ferry_core::wire;
use tokio::net::UdpSocket;
use tokio::time::timeout;
use tracing::{debug, info, warn};

use crate::config::Config;

pub async fn run_tracker(cfg: &Config) -> anyhow::Result<()> {
    let socket = UdpSocket::bind(("0.0.0.0", cfg.udp_port)).await?;
    info!(port = cfg.udp_port, "tracker is online");

    let mut registry = Registry::new(RegistryConfig {
        offline_threshold: cfg.offline_threshold(),
        unmatch_buffer: cfg.unmatch_buffer(),
    });
    let mut buf = vec![0u8; 64 * 1024];

    loop {
        match timeout(cfg.refresh_interval(), socket.recv_from(&mut buf)).await {
            Ok(Ok((n, from))) => match wire::decode_frame(&buf[..n]) {
                Ok((msg, _)) => {
                    debug!(%from, ?msg, "datagram");
                    registry.handle_message(from, msg, Instant::now());
                }
                // Malformed datagrams are dropped; UDP peers get no reply.
                Err(e) => warn!(%from, error = %e, "dropping malformed datagram"),
            },
            Ok(Err(e)) => return Err(e.into()),
            Err(_) => {
                let sends = registry.housekeeping(Instant::now());
                info!(
                    seeders = registry.seeder_count(),
                    leechers = registry.leecher_count(),
                    matches = registry.match_count(),
                    "housekeeping tick"
                );
                for (addr, msg) in sends {
                    match wire::encode_frame(&msg) {
                        Ok(frame) => {
                            if let Err(e) = socket.send_to(&frame, addr).await {
                                warn!(%addr, error = %e, "send failed");
                            }
                        }
                        Err(e) => warn!(error = %e, "encode failed"),
                    }
                }
            }
        }
    }
}
