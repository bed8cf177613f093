//! Chunk store: seeder-side indexed reads, leecher-side sequential reassembly.

use std::fs::{self, File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

/// Default chunk size in bytes.
pub const DEFAULT_CHUNK_SIZE: u64 = 4096;

/// Number of chunks a file of `file_size` bytes splits into. Both ends of a
/// transfer must compute this identically.
pub fn total_chunks(file_size: u64, chunk_size: u64) -> u64 {
    file_size.div_ceil(chunk_size)
}

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("chunk index {index} out of range (total {total})")]
    ChunkIndexOutOfRange { index: u64, total: u64 },
    #[error("out-of-order chunk: expected {expected}, got {got}")]
    OutOfOrderChunk { expected: u64, got: u64 },
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Seeder side: read a file by chunk index.
pub struct ChunkReader {
    file: File,
    file_size: u64,
    chunk_size: u64,
}

impl ChunkReader {
    pub fn open(path: &Path, chunk_size: u64) -> Result<Self, StoreError> {
        let file = File::open(path)?;
        let file_size = file.metadata()?.len();
        Ok(Self {
            file,
            file_size,
            chunk_size,
        })
    }

    pub fn file_size(&self) -> u64 {
        self.file_size
    }

    pub fn total_chunks(&self) -> u64 {
        total_chunks(self.file_size, self.chunk_size)
    }

    /// Read the chunk at `index`: exactly `chunk_size` bytes at offset
    /// `index * chunk_size`, fewer for the final chunk.
    pub fn read_chunk(&mut self, index: u64) -> Result<Vec<u8>, StoreError> {
        let total = self.total_chunks();
        if index >= total {
            return Err(StoreError::ChunkIndexOutOfRange { index, total });
        }
        let offset = index * self.chunk_size;
        let len = self.chunk_size.min(self.file_size - offset) as usize;
        let mut buf = vec![0u8; len];
        self.file.seek(SeekFrom::Start(offset))?;
        self.file.read_exact(&mut buf)?;
        Ok(buf)
    }
}

/// Leecher side: append verified chunks to the destination file in index
/// order. The protocol never pipelines, so out-of-order indices are rejected.
pub struct ChunkWriter {
    file: File,
    path: PathBuf,
    total: u64,
    next_index: u64,
}

impl ChunkWriter {
    pub fn create(path: &Path, file_size: u64, chunk_size: u64) -> Result<Self, StoreError> {
        let file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(path)?;
        Ok(Self {
            file,
            path: path.to_path_buf(),
            total: total_chunks(file_size, chunk_size),
            next_index: 0,
        })
    }

    pub fn total_chunks(&self) -> u64 {
        self.total
    }

    pub fn next_index(&self) -> u64 {
        self.next_index
    }

    pub fn is_complete(&self) -> bool {
        self.next_index == self.total
    }

    /// Append the chunk at `index`. Only `index == next_index` is accepted.
    pub fn write_chunk(&mut self, index: u64, data: &[u8]) -> Result<(), StoreError> {
        if index != self.next_index {
            return Err(StoreError::OutOfOrderChunk {
                expected: self.next_index,
                got: index,
            });
        }
        if index >= self.total {
            return Err(StoreError::ChunkIndexOutOfRange {
                index,
                total: self.total,
            });
        }
        self.file.write_all(data)?;
        self.next_index += 1;
        if self.is_complete() {
            self.file.flush()?;
        }
        Ok(())
    }

    /// Remove the half-written output on abort.
    pub fn discard(&mut self) -> Result<(), StoreError> {
        fs::remove_file(&self.path)?;
        Ok(())
    }
}
