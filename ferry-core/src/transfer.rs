//! Chunked-transfer state machines for both ends of one TCP connection.
//!
//! Sans-I/O: callers feed decoded messages in and send the returned ones.
//! Each session owns its own chunk cursor and file handle, so concurrent
//! transfers are one session instance per connection.

use crate::integrity;
use crate::protocol::Message;
use crate::store::{ChunkReader, ChunkWriter, StoreError};

/// Resend budget for a single chunk. A peer that keeps rejecting the same
/// chunk past this bound aborts the session instead of looping forever.
pub const DEFAULT_MAX_CHUNK_RETRIES: u32 = 5;

#[derive(Debug, thiserror::Error)]
pub enum TransferError {
    #[error("unexpected message in state {state}")]
    UnexpectedMessage { state: &'static str },
    #[error("chunk retry budget exhausted at index {index}")]
    RetryExhausted { index: u64 },
    #[error("chunk count mismatch: ours {ours}, peer sent {theirs}")]
    ChunkCountMismatch { ours: u64, theirs: u64 },
    #[error("chunk {index} is {got} bytes, expected {expected}")]
    ChunkLengthMismatch { index: u64, expected: u64, got: u64 },
    #[error(transparent)]
    Store(#[from] StoreError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SeederState {
    /// FILE_SIZE sent, waiting for the peer's CHUNK_COUNT.
    AwaitingCount,
    /// Waiting for REQUEST of chunk `next`.
    AwaitingRequest { next: u64 },
    /// Chunk `index` sent, waiting for ACK or RETRANSMIT.
    AwaitingAck { index: u64 },
    Complete,
    Aborted,
}

/// Seeder half: serve chunk requests in strictly increasing index order.
pub struct SeederSession {
    reader: ChunkReader,
    state: SeederState,
    retries: u32,
    max_retries: u32,
}

impl SeederSession {
    pub fn new(reader: ChunkReader, max_retries: u32) -> Self {
        Self {
            reader,
            state: SeederState::AwaitingCount,
            retries: 0,
            max_retries,
        }
    }

    /// The opening message of every transfer: the file size. The peer answers
    /// with its own ceil(size / chunk) computation.
    pub fn opening_message(&self) -> Message {
        Message::FileSize {
            file_size: self.reader.file_size(),
        }
    }

    pub fn is_complete(&self) -> bool {
        self.state == SeederState::Complete
    }

    pub fn is_aborted(&self) -> bool {
        self.state == SeederState::Aborted
    }

    /// Advance on a peer message; returns the reply to send, if any.
    /// Any error leaves the session aborted.
    pub fn on_message(&mut self, msg: Message) -> Result<Option<Message>, TransferError> {
        match self.step(msg) {
            Ok(reply) => Ok(reply),
            Err(e) => {
                self.state = SeederState::Aborted;
                Err(e)
            }
        }
    }

    fn step(&mut self, msg: Message) -> Result<Option<Message>, TransferError> {
        let total = self.reader.total_chunks();
        match (self.state, msg) {
            (SeederState::AwaitingCount, Message::ChunkCount { total_chunks }) => {
                if total_chunks != total {
                    return Err(TransferError::ChunkCountMismatch {
                        ours: total,
                        theirs: total_chunks,
                    });
                }
                self.state = if total == 0 {
                    SeederState::Complete
                } else {
                    SeederState::AwaitingRequest { next: 0 }
                };
                Ok(None)
            }
            (SeederState::AwaitingRequest { next }, Message::Request { chunk_index })
                if chunk_index == next =>
            {
                let packet = self.chunk_packet(chunk_index)?;
                self.state = SeederState::AwaitingAck { index: chunk_index };
                Ok(Some(packet))
            }
            (SeederState::AwaitingAck { index }, Message::Ack { received_chunk, .. })
                if received_chunk == Some(index) =>
            {
                self.retries = 0;
                self.state = if index + 1 == total {
                    SeederState::Complete
                } else {
                    SeederState::AwaitingRequest { next: index + 1 }
                };
                Ok(None)
            }
            (SeederState::AwaitingAck { index }, Message::Retransmit { chunk_index })
                if chunk_index == index =>
            {
                self.retries += 1;
                if self.retries > self.max_retries {
                    return Err(TransferError::RetryExhausted { index });
                }
                let packet = self.chunk_packet(index)?;
                Ok(Some(packet))
            }
            (state, _) => Err(TransferError::UnexpectedMessage {
                state: seeder_state_name(state),
            }),
        }
    }

    fn chunk_packet(&mut self, index: u64) -> Result<Message, TransferError> {
        let data = self.reader.read_chunk(index)?;
        let checksum = integrity::compute_checksum(&data);
        Ok(Message::Chunk {
            chunk_index: index,
            data,
            checksum,
        })
    }
}

fn seeder_state_name(state: SeederState) -> &'static str {
    match state {
        SeederState::AwaitingCount => "awaiting-count",
        SeederState::AwaitingRequest { .. } => "awaiting-request",
        SeederState::AwaitingAck { .. } => "awaiting-ack",
        SeederState::Complete => "complete",
        SeederState::Aborted => "aborted",
    }
}

/// What the leecher should do with a received chunk packet.
pub enum ChunkOutcome {
    /// Verified and written: send the ack, then the next request.
    Accepted { ack: Message, progress: f64 },
    /// Checksum mismatch: send the retransmit, do not advance.
    Mismatch { retransmit: Message },
}

/// Leecher half: request chunks in order, verify, write, acknowledge.
pub struct LeecherSession {
    writer: ChunkWriter,
    file_size: u64,
    chunk_size: u64,
    retries: u32,
    max_retries: u32,
}

impl LeecherSession {
    /// Start a session from the announced file size. Returns the session and
    /// the CHUNK_COUNT reply acknowledging the size.
    pub fn start(
        dest: &std::path::Path,
        file_size: u64,
        chunk_size: u64,
        max_retries: u32,
    ) -> Result<(Self, Message), TransferError> {
        let writer = ChunkWriter::create(dest, file_size, chunk_size)?;
        let reply = Message::ChunkCount {
            total_chunks: writer.total_chunks(),
        };
        Ok((
            Self {
                writer,
                file_size,
                chunk_size,
                retries: 0,
                max_retries,
            },
            reply,
        ))
    }

    pub fn is_complete(&self) -> bool {
        self.writer.is_complete()
    }

    /// Percentage of chunks received so far.
    pub fn progress(&self) -> f64 {
        if self.writer.total_chunks() == 0 {
            return 100.0;
        }
        100.0 * self.writer.next_index() as f64 / self.writer.total_chunks() as f64
    }

    /// The next chunk request, or `None` once the transfer is complete.
    pub fn next_request(&self) -> Option<Message> {
        if self.is_complete() {
            return None;
        }
        Some(Message::Request {
            chunk_index: self.writer.next_index(),
        })
    }

    /// Handle a chunk packet: verify the checksum, then either write + ack or
    /// ask for a retransmit. Retries on one index are bounded.
    pub fn on_chunk(
        &mut self,
        chunk_index: u64,
        data: &[u8],
        checksum: &str,
    ) -> Result<ChunkOutcome, TransferError> {
        if self.is_complete() {
            return Err(TransferError::UnexpectedMessage { state: "complete" });
        }
        if chunk_index != self.writer.next_index() {
            return Err(StoreError::OutOfOrderChunk {
                expected: self.writer.next_index(),
                got: chunk_index,
            }
            .into());
        }
        if !integrity::verify_checksum(data, checksum) {
            self.retries += 1;
            if self.retries > self.max_retries {
                return Err(TransferError::RetryExhausted { index: chunk_index });
            }
            return Ok(ChunkOutcome::Mismatch {
                retransmit: Message::Retransmit { chunk_index },
            });
        }
        // Checksum holds, so the peer sent exactly what it hashed. A length
        // off the announced file size is a misbehaving peer, not line noise.
        let expected = self
            .chunk_size
            .min(self.file_size - chunk_index * self.chunk_size);
        if data.len() as u64 != expected {
            return Err(TransferError::ChunkLengthMismatch {
                index: chunk_index,
                expected,
                got: data.len() as u64,
            });
        }
        self.writer.write_chunk(chunk_index, data)?;
        self.retries = 0;
        Ok(ChunkOutcome::Accepted {
            ack: Message::chunk_ack(chunk_index),
            progress: self.progress(),
        })
    }

    /// Abort: remove the partially written output.
    pub fn abort(&mut self) -> Result<(), TransferError> {
        self.writer.discard()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::integrity::compute_checksum;
    use crate::store::total_chunks;
    use std::io::Write as _;

    fn seed_file(bytes: &[u8]) -> tempfile::NamedTempFile {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        f.write_all(bytes).unwrap();
        f.flush().unwrap();
        f
    }

    fn seeder_for(bytes: &[u8], chunk_size: u64) -> (SeederSession, tempfile::NamedTempFile) {
        let f = seed_file(bytes);
        let reader = ChunkReader::open(f.path(), chunk_size).unwrap();
        (SeederSession::new(reader, DEFAULT_MAX_CHUNK_RETRIES), f)
    }

    /// Run both halves against each other, optionally corrupting one packet.
    fn run_pair(bytes: &[u8], chunk_size: u64, corrupt_once_at: Option<u64>) -> Vec<u8> {
        let (mut seeder, _src) = seeder_for(bytes, chunk_size);
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("out.bin");

        let Message::FileSize { file_size } = seeder.opening_message() else {
            panic!("expected FILE_SIZE");
        };
        assert_eq!(file_size, bytes.len() as u64);

        let (mut leecher, count) =
            LeecherSession::start(&dest, file_size, chunk_size, DEFAULT_MAX_CHUNK_RETRIES).unwrap();
        assert!(seeder.on_message(count).unwrap().is_none());

        let mut corrupted = false;
        let mut retransmits = 0u32;
        while let Some(request) = leecher.next_request() {
            let mut packet = seeder.on_message(request).unwrap().unwrap();
            if let Message::Chunk {
                chunk_index,
                ref mut data,
                ..
            } = packet
            {
                if Some(chunk_index) == corrupt_once_at && !corrupted {
                    data[0] ^= 0xff;
                    corrupted = true;
                }
            }
            let Message::Chunk {
                chunk_index,
                data,
                checksum,
            } = packet
            else {
                panic!("expected CHUNK");
            };
            match leecher.on_chunk(chunk_index, &data, &checksum).unwrap() {
                ChunkOutcome::Accepted { ack, .. } => {
                    assert!(seeder.on_message(ack).unwrap().is_none());
                }
                ChunkOutcome::Mismatch { retransmit } => {
                    retransmits += 1;
                    // Resend of the same chunk, uncorrupted this time.
                    let resent = seeder.on_message(retransmit).unwrap().unwrap();
                    let Message::Chunk {
                        chunk_index,
                        data,
                        checksum,
                    } = resent
                    else {
                        panic!("expected CHUNK resend");
                    };
                    match leecher.on_chunk(chunk_index, &data, &checksum).unwrap() {
                        ChunkOutcome::Accepted { ack, .. } => {
                            assert!(seeder.on_message(ack).unwrap().is_none());
                        }
                        ChunkOutcome::Mismatch { .. } => panic!("clean resend rejected"),
                    }
                }
            }
        }
        assert!(leecher.is_complete());
        assert!(seeder.is_complete());
        if corrupt_once_at.is_some() {
            assert_eq!(retransmits, 1, "exactly one RETRANSMIT expected");
        }
        std::fs::read(&dest).unwrap()
    }

    #[test]
    fn clean_transfer_roundtrip() {
        let bytes: Vec<u8> = (0..10_000u64).map(|i| (i % 251) as u8).collect();
        let out = run_pair(&bytes, 4096, None);
        assert_eq!(out, bytes);
        assert_eq!(compute_checksum(&out), compute_checksum(&bytes));
    }

    #[test]
    fn corrupted_chunk_retransmitted_once_then_accepted() {
        let bytes: Vec<u8> = (0..10_000u64).map(|i| (i % 17) as u8).collect();
        let out = run_pair(&bytes, 4096, Some(1));
        assert_eq!(out, bytes);
    }

    #[test]
    fn exact_multiple_of_chunk_size() {
        let bytes = vec![9u8; 8192];
        assert_eq!(total_chunks(8192, 4096), 2);
        let out = run_pair(&bytes, 4096, None);
        assert_eq!(out, bytes);
    }

    #[test]
    fn empty_file_completes_without_requests() {
        let out = run_pair(&[], 4096, None);
        assert!(out.is_empty());
    }

    #[test]
    fn seeder_rejects_count_mismatch() {
        let (mut seeder, _f) = seeder_for(&[1u8; 100], 30);
        let err = seeder
            .on_message(Message::ChunkCount { total_chunks: 99 })
            .unwrap_err();
        assert!(matches!(
            err,
            TransferError::ChunkCountMismatch { ours: 4, theirs: 99 }
        ));
        assert!(seeder.is_aborted());
    }

    #[test]
    fn seeder_retry_budget_is_bounded() {
        let (mut seeder, _f) = seeder_for(&[1u8; 100], 30);
        seeder
            .on_message(Message::ChunkCount { total_chunks: 4 })
            .unwrap();
        seeder
            .on_message(Message::Request { chunk_index: 0 })
            .unwrap();
        let mut aborted = false;
        for _ in 0..=DEFAULT_MAX_CHUNK_RETRIES {
            match seeder.on_message(Message::Retransmit { chunk_index: 0 }) {
                Ok(Some(Message::Chunk { .. })) => {}
                Err(TransferError::RetryExhausted { index: 0 }) => {
                    aborted = true;
                    break;
                }
                other => panic!("unexpected step result: {other:?}"),
            }
        }
        assert!(aborted);
        assert!(seeder.is_aborted());
    }

    #[test]
    fn seeder_rejects_out_of_order_request() {
        let (mut seeder, _f) = seeder_for(&[1u8; 100], 30);
        seeder
            .on_message(Message::ChunkCount { total_chunks: 4 })
            .unwrap();
        let err = seeder
            .on_message(Message::Request { chunk_index: 2 })
            .unwrap_err();
        assert!(matches!(err, TransferError::UnexpectedMessage { .. }));
    }

    #[test]
    fn leecher_retry_budget_is_bounded() {
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("out.bin");
        let (mut leecher, _count) = LeecherSession::start(&dest, 100, 30, 2).unwrap();
        let data = vec![5u8; 30];
        let bad_sum = "0000";
        assert!(matches!(
            leecher.on_chunk(0, &data, bad_sum),
            Ok(ChunkOutcome::Mismatch { .. })
        ));
        assert!(matches!(
            leecher.on_chunk(0, &data, bad_sum),
            Ok(ChunkOutcome::Mismatch { .. })
        ));
        assert!(matches!(
            leecher.on_chunk(0, &data, bad_sum),
            Err(TransferError::RetryExhausted { index: 0 })
        ));
        leecher.abort().unwrap();
        assert!(!dest.exists());
    }

    #[test]
    fn leecher_rejects_wrong_length_chunk_with_valid_checksum() {
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("out.bin");
        let (mut leecher, _count) =
            LeecherSession::start(&dest, 100, 30, DEFAULT_MAX_CHUNK_RETRIES).unwrap();
        // Chunk 0 must be 30 bytes; a 10-byte payload hashed correctly by the
        // sender is still rejected.
        let short = vec![5u8; 10];
        let sum = compute_checksum(&short);
        assert!(matches!(
            leecher.on_chunk(0, &short, &sum),
            Err(TransferError::ChunkLengthMismatch {
                index: 0,
                expected: 30,
                got: 10
            })
        ));
        // Final chunk is the remainder: 100 - 3*30 = 10 bytes, so 30 bytes
        // there is just as wrong.
        let (mut leecher, _count) =
            LeecherSession::start(&dest, 100, 30, DEFAULT_MAX_CHUNK_RETRIES).unwrap();
        for i in 0..3 {
            let data = vec![i as u8; 30];
            let sum = compute_checksum(&data);
            assert!(matches!(
                leecher.on_chunk(i, &data, &sum),
                Ok(ChunkOutcome::Accepted { .. })
            ));
        }
        let long_tail = vec![9u8; 30];
        let sum = compute_checksum(&long_tail);
        assert!(matches!(
            leecher.on_chunk(3, &long_tail, &sum),
            Err(TransferError::ChunkLengthMismatch {
                index: 3,
                expected: 10,
                got: 30
            })
        ));
    }

    #[test]
    fn leecher_progress_by_chunk() {
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("out.bin");
        let (mut leecher, count) =
            LeecherSession::start(&dest, 100, 30, DEFAULT_MAX_CHUNK_RETRIES).unwrap();
        assert_eq!(count, Message::ChunkCount { total_chunks: 4 });
        let data = vec![5u8; 30];
        let sum = compute_checksum(&data);
        match leecher.on_chunk(0, &data, &sum).unwrap() {
            ChunkOutcome::Accepted { progress, .. } => assert_eq!(progress, 25.0),
            _ => panic!("expected accept"),
        }
    }
}
