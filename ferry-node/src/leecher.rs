//! Leecher role: discover a seed source through the tracker, fetch the file
//! over TCP, then optionally turn seed source for it.

use std::net::IpAddr;

use anyhow::{bail, Context};
use ferry_core::session::{FileResponse, LeecherController, LeecherPhase, TrackerReaction};
use ferry_core::transfer::{ChunkOutcome, LeecherSession};
use ferry_core::wire;
use ferry_core::Message;
use tokio::net::{TcpStream, UdpSocket};
use tokio::time::timeout;
use tracing::{info, warn};

use crate::config::Config;
use crate::net::{read_frame_timeout, write_frame};
use crate::seeder::run_seeder_with;

/// Fetch `file_id` from the network into the download directory.
pub async fn run_leecher(cfg: &Config, file_id: String) -> anyhow::Result<()> {
    let udp = UdpSocket::bind(("0.0.0.0", 0)).await?;
    udp.connect((cfg.tracker_host.as_str(), cfg.udp_port))
        .await
        .context("tracker unreachable")?;

    let peer_id = udp.local_addr()?.ip().to_string();
    let mut controller = LeecherController::new(peer_id, cfg.client_name.clone(), file_id);

    send(&udp, &controller.discover_message()).await?;
    info!(file = controller.file_id(), "looking for a seed source");

    let mut buf = vec![0u8; 64 * 1024];
    while controller.phase() != LeecherPhase::Done {
        match timeout(cfg.waiting_time(), udp.recv(&mut buf)).await {
            Err(_) => send(&udp, &controller.available_message()).await?,
            Ok(Ok(n)) => {
                let msg = match wire::decode_frame(&buf[..n]) {
                    Ok((msg, _)) => msg,
                    Err(e) => {
                        warn!(error = %e, "dropping malformed datagram");
                        continue;
                    }
                };
                match controller.on_tracker_message(&msg) {
                    TrackerReaction::Reply(reply) => send(&udp, &reply).await?,
                    TrackerReaction::ConnectSeeder(ip) => {
                        match download_from(&mut controller, ip, cfg).await {
                            Ok(()) => {
                                // This leecher registration is spent either way.
                                send(&udp, &Message::RemoveMatch).await?;
                            }
                            Err(e) => {
                                warn!(%ip, error = %e, "download failed; back to discovery");
                                send(&udp, &Message::RemoveMatch).await?;
                                send(&udp, &controller.discover_message()).await?;
                            }
                        }
                    }
                    TrackerReaction::AcceptIncoming | TrackerReaction::Ignore => {}
                }
            }
            Ok(Err(e)) => return Err(e.into()),
        }
    }

    if cfg.seed_after_download {
        // Fresh sockets and a fresh registration; the leecher record at the
        // tracker simply ages out.
        drop(udp);
        info!(file = controller.file_id(), "download done; turning seed source");
        let catalog = vec![controller.file_id().to_string()];
        return run_seeder_with(cfg, catalog, cfg.download_dir.clone()).await;
    }
    Ok(())
}

async fn send(udp: &UdpSocket, msg: &Message) -> anyhow::Result<()> {
    udp.send(&wire::encode_frame(msg)?).await?;
    Ok(())
}

/// One TCP attempt against a matched seeder. On any error the partial output
/// is discarded and the controller is reset to discovery.
async fn download_from(
    controller: &mut LeecherController,
    ip: IpAddr,
    cfg: &Config,
) -> anyhow::Result<()> {
    let result = try_download(controller, ip, cfg).await;
    if result.is_err() {
        controller.reset();
    }
    result
}

async fn try_download(
    controller: &mut LeecherController,
    ip: IpAddr,
    cfg: &Config,
) -> anyhow::Result<()> {
    let mut stream = timeout(cfg.waiting_time(), TcpStream::connect((ip, cfg.seeder_port)))
        .await
        .context("seeder connect timed out")??;

    write_frame(&mut stream, &controller.connect_message()).await?;
    let ack = read_frame_timeout(&mut stream, cfg.waiting_time()).await?;
    if !controller.on_connect_ack(&ack) {
        bail!("handshake refused: {ack:?}");
    }

    write_frame(&mut stream, &controller.request_file_message()).await?;
    let response = read_frame_timeout(&mut stream, cfg.waiting_time()).await?;
    match controller.on_file_response(&response) {
        FileResponse::Begin => {}
        FileResponse::NotFound {
            error_code,
            error_message,
        } => bail!("seeder refused file: {error_code} {error_message}"),
        FileResponse::Unexpected => bail!("expected BEGIN or ERROR"),
    }

    let Message::FileSize { file_size } = read_frame_timeout(&mut stream, cfg.waiting_time()).await?
    else {
        bail!("expected FILE_SIZE");
    };
    std::fs::create_dir_all(&cfg.download_dir)?;
    let dest = cfg.download_dir.join(controller.file_id());
    let (mut session, count) =
        LeecherSession::start(&dest, file_size, cfg.chunk_size, cfg.max_chunk_retries)?;
    write_frame(&mut stream, &count).await?;
    info!(file = controller.file_id(), file_size, "transfer started");

    if let Err(e) = pull_chunks(&mut stream, &mut session, cfg.waiting_time()).await {
        if let Err(cleanup) = session.abort() {
            warn!(error = %cleanup, "could not remove partial download");
        }
        return Err(e);
    }

    controller.on_download_complete();
    info!(file = controller.file_id(), path = %dest.display(), "download complete");
    Ok(())
}

async fn pull_chunks(
    stream: &mut TcpStream,
    session: &mut LeecherSession,
    read_limit: std::time::Duration,
) -> anyhow::Result<()> {
    while let Some(request) = session.next_request() {
        write_frame(stream, &request).await?;
        // Stay on this index until a clean chunk lands or the budget runs out.
        loop {
            let msg = read_frame_timeout(stream, read_limit).await?;
            let Message::Chunk {
                chunk_index,
                data,
                checksum,
            } = msg
            else {
                bail!("expected CHUNK, got {msg:?}");
            };
            match session.on_chunk(chunk_index, &data, &checksum)? {
                ChunkOutcome::Accepted { ack, progress } => {
                    write_frame(stream, &ack).await?;
                    info!(progress = format!("{progress:.1}%"), "chunk accepted");
                    break;
                }
                ChunkOutcome::Mismatch { retransmit } => {
                    warn!(chunk_index, "checksum mismatch; asking for a resend");
                    write_frame(stream, &retransmit).await?;
                }
            }
        }
    }
    Ok(())
}
