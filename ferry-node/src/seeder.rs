//! Seeder role: register the catalog with the tracker, stay available, and
//! serve one matched leecher at a time over TCP.

use std::path::{Path, PathBuf};

use anyhow::{bail, Context};
use ferry_core::session::{FileDecision, SeederController, TrackerReaction};
use ferry_core::store::ChunkReader;
use ferry_core::transfer::SeederSession;
use ferry_core::wire;
use tokio::net::{TcpListener, TcpStream, UdpSocket};
use tokio::time::timeout;
use tracing::{info, warn};

use crate::config::Config;
use crate::net::{read_frame_timeout, write_frame};

/// Seed the files found in `share_dir`.
pub async fn run_seeder(cfg: &Config) -> anyhow::Result<()> {
    let catalog = scan_catalog(&cfg.share_dir)?;
    if catalog.is_empty() {
        bail!("nothing to seed in {}", cfg.share_dir.display());
    }
    run_seeder_with(cfg, catalog, cfg.share_dir.clone()).await
}

/// Seed an explicit catalog out of `serve_dir`. The leecher role reuses this
/// after a finished download, with a fresh controller and sockets.
pub async fn run_seeder_with(
    cfg: &Config,
    catalog: Vec<String>,
    serve_dir: PathBuf,
) -> anyhow::Result<()> {
    let udp = UdpSocket::bind(("0.0.0.0", 0)).await?;
    udp.connect((cfg.tracker_host.as_str(), cfg.udp_port))
        .await
        .context("tracker unreachable")?;
    let listener = TcpListener::bind(("0.0.0.0", cfg.seeder_port)).await?;

    let peer_id = udp.local_addr()?.ip().to_string();
    let controller = SeederController::new(peer_id, cfg.client_name.clone(), catalog);

    let direct_port = cfg.peer_port;
    let direct_limit = cfg.waiting_time();
    tokio::spawn(async move {
        if let Err(e) = crate::direct::run_direct_acceptor(direct_port, direct_limit).await {
            warn!(error = %e, "direct acceptor stopped");
        }
    });

    send(&udp, &controller.register_message()).await?;
    info!(
        port = cfg.seeder_port,
        dir = %serve_dir.display(),
        "seeding; registered with tracker"
    );

    let mut buf = vec![0u8; 64 * 1024];
    loop {
        match timeout(cfg.waiting_time(), udp.recv(&mut buf)).await {
            // Idle: re-announce the catalog. DISCOVER_PEER is an upsert, so
            // this both refreshes liveness and recovers the record after the
            // tracker reaped it or restarted.
            Err(_) => send(&udp, &controller.register_message()).await?,
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
                    TrackerReaction::AcceptIncoming => {
                        match timeout(cfg.waiting_time(), listener.accept()).await {
                            Ok(Ok((stream, peer))) => {
                                info!(%peer, "leecher connected");
                                if let Err(e) =
                                    serve_connection(stream, &controller, &serve_dir, cfg).await
                                {
                                    warn!(%peer, error = %e, "transfer failed");
                                }
                            }
                            Ok(Err(e)) => warn!(error = %e, "accept failed"),
                            Err(_) => warn!("matched leecher never connected"),
                        }
                        // A transfer can outlive the offline threshold, so the
                        // record may be gone; a fresh registration restores it.
                        send(&udp, &controller.register_message()).await?;
                    }
                    TrackerReaction::ConnectSeeder(_) | TrackerReaction::Ignore => {}
                }
            }
            Ok(Err(e)) => return Err(e.into()),
        }
    }
}

async fn send(udp: &UdpSocket, msg: &ferry_core::Message) -> anyhow::Result<()> {
    udp.send(&wire::encode_frame(msg)?).await?;
    Ok(())
}

/// One accepted connection: handshake, file request, then the seeder half of
/// the transfer. Every read is bounded by the waiting time, so a stalled
/// leecher cannot wedge the owning loop. The session and its file handle are
/// dropped on any exit.
async fn serve_connection(
    mut stream: TcpStream,
    controller: &SeederController,
    serve_dir: &Path,
    cfg: &Config,
) -> anyhow::Result<()> {
    let opener = read_frame_timeout(&mut stream, cfg.waiting_time()).await?;
    let Some(ack) = controller.on_handshake(&opener) else {
        bail!("handshake rejected: expected CONNECT");
    };
    write_frame(&mut stream, &ack).await?;

    let request = read_frame_timeout(&mut stream, cfg.waiting_time()).await?;
    let file = match controller.on_file_request(&request) {
        FileDecision::Serve(file) => file,
        FileDecision::Reject(reply) => {
            info!("requested file not in catalog; sending 404");
            write_frame(&mut stream, &reply).await?;
            return Ok(());
        }
        FileDecision::Malformed => bail!("expected REQUEST_FILE"),
    };

    write_frame(&mut stream, &ferry_core::Message::Begin).await?;

    let reader = ChunkReader::open(&serve_dir.join(&file), cfg.chunk_size)?;
    let mut session = SeederSession::new(reader, cfg.max_chunk_retries);
    write_frame(&mut stream, &session.opening_message()).await?;

    while !session.is_complete() {
        let msg = read_frame_timeout(&mut stream, cfg.waiting_time()).await?;
        match session.on_message(msg) {
            Ok(Some(reply)) => write_frame(&mut stream, &reply).await?,
            Ok(None) => {}
            Err(e) => return Err(e).context("transfer aborted"),
        }
    }
    info!(%file, "transfer complete");
    Ok(())
}

/// The catalog is the set of plain files in the share directory.
fn scan_catalog(dir: &Path) -> anyhow::Result<Vec<String>> {
    let mut files = Vec::new();
    for entry in std::fs::read_dir(dir)
        .with_context(|| format!("cannot read share dir {}", dir.display()))?
    {
        let entry = entry?;
        if entry.file_type()?.is_file() {
            if let Some(name) = entry.file_name().to_str() {
                files.push(name.to_string());
            }
        }
    }
    files.sort();
    Ok(files)
}
