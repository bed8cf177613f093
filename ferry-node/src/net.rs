//! Framed message I/O over tokio streams: 4-byte LE length + JSON payload,
//! the same frame shape the codec uses for datagrams.

use std::time::Duration;

use anyhow::{bail, Context};
use ferry_core::wire::{self, LEN_SIZE, MAX_FRAME_LEN};
use ferry_core::Message;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::time::timeout;

pub async fn write_frame<W: AsyncWrite + Unpin>(writer: &mut W, msg: &Message) -> anyhow::Result<()> {
    let frame = wire::encode_frame(msg)?;
    writer.write_all(&frame).await?;
    writer.flush().await?;
    Ok(())
}

pub async fn read_frame<R: AsyncRead + Unpin>(reader: &mut R) -> anyhow::Result<Message> {
    let mut len_buf = [0u8; LEN_SIZE];
    reader
        .read_exact(&mut len_buf)
        .await
        .context("connection closed while reading frame length")?;
    let len = u32::from_le_bytes(len_buf);
    if len > MAX_FRAME_LEN {
        bail!("frame of {len} bytes exceeds limit");
    }
    let mut payload = vec![0u8; len as usize];
    reader
        .read_exact(&mut payload)
        .await
        .context("connection closed mid-frame")?;
    Ok(wire::decode_payload(&payload)?)
}

/// `read_frame` with an upper bound on how long the peer may stall. Every
/// read on an established connection goes through this, so a silent peer can
/// never wedge the owning loop.
pub async fn read_frame_timeout<R: AsyncRead + Unpin>(
    reader: &mut R,
    limit: Duration,
) -> anyhow::Result<Message> {
    timeout(limit, read_frame(reader))
        .await
        .context("peer stalled; read timed out")?
}
