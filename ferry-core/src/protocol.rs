//! ferry wire protocol: message types and the role vocabulary.

use std::net::IpAddr;

use serde::{Deserialize, Serialize};

/// Peer role, spelled on the wire exactly as the tracker expects it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PeerRole {
    /// A peer that finished a download and re-registered as a seed source.
    #[serde(rename = "S")]
    Seeder,
    /// Content seeder: holds a complete catalog and serves chunk requests.
    #[serde(rename = "CS")]
    ContentSeeder,
    /// Leecher: downloading a file, potentially a seeder afterwards.
    #[serde(rename = "L")]
    Leecher,
}

impl PeerRole {
    pub fn is_seeding(self) -> bool {
        matches!(self, PeerRole::Seeder | PeerRole::ContentSeeder)
    }
}

/// All wire message types. Payload encoding is JSON; framing is length-prefix
/// (see the wire module). `message_type` is the discriminator on every frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "message_type")]
pub enum Message {
    /// Registration with the tracker (UDP). A seeder advertises its whole
    /// catalog; a leecher names the single file it wants.
    #[serde(rename = "DISCOVER_PEER")]
    DiscoverPeer {
        peer_id: String,
        type_of_peer: PeerRole,
        #[serde(rename = "file_id")]
        file_ids: Vec<String>,
        client_name: String,
    },
    /// Liveness refresh, sent in answer to PING (UDP).
    #[serde(rename = "AVAILABLE")]
    Available { type_of_peer: PeerRole },
    /// Tracker liveness probe (UDP).
    #[serde(rename = "PING")]
    Ping,
    /// Pairing announcement: the counterpart's role and callback address.
    #[serde(rename = "MATCH_FOUND")]
    MatchFound { id: PeerRole, ip: IpAddr, port: u16 },
    /// Explicit unmatch request from either endpoint (UDP).
    #[serde(rename = "REMOVE_MATCH")]
    RemoveMatch,
    /// TCP handshake opener.
    #[serde(rename = "CONNECT")]
    Connect {
        peer_id: String,
        type_of_peer: PeerRole,
    },
    /// Acknowledgment of a handshake message or of a received chunk.
    #[serde(rename = "ACK")]
    Ack {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        requested_message_type: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        received_chunk: Option<u64>,
    },
    /// File request by id.
    #[serde(rename = "REQUEST_FILE")]
    RequestFile { requested_file: String },
    /// Transfer start.
    #[serde(rename = "BEGIN")]
    Begin,
    /// Terminal error for one request; 404 is file-not-found.
    #[serde(rename = "ERROR")]
    Error {
        error_code: u16,
        error_message: String,
    },
    /// File size, sent before any chunk exchange.
    #[serde(rename = "FILE_SIZE")]
    FileSize { file_size: u64 },
    /// The receiver's own ceil(size / chunk) result, acknowledging FILE_SIZE.
    /// Both sides must arrive at the same count.
    #[serde(rename = "CHUNK_COUNT")]
    ChunkCount { total_chunks: u64 },
    /// Chunk request by index.
    #[serde(rename = "REQUEST")]
    Request { chunk_index: u64 },
    /// Chunk delivery. Payload travels hex-encoded; the checksum covers the
    /// payload bytes only, never the metadata.
    #[serde(rename = "CHUNK")]
    Chunk {
        chunk_index: u64,
        #[serde(with = "hex_payload")]
        data: Vec<u8>,
        checksum: String,
    },
    /// Checksum failure on the receiver: resend the same chunk.
    #[serde(rename = "RETRANSMIT")]
    Retransmit { chunk_index: u64 },
    /// Progress beacon. Carried in the vocabulary; the tracker ignores it.
    #[serde(rename = "PROGRESSION")]
    Progression { time_stamp: String },
}

impl Message {
    /// Handshake acknowledgment for a given message type.
    pub fn ack_for(message_type: &str) -> Self {
        Message::Ack {
            requested_message_type: Some(message_type.to_string()),
            received_chunk: None,
        }
    }

    /// Acknowledgment that a chunk arrived intact.
    pub fn chunk_ack(chunk_index: u64) -> Self {
        Message::Ack {
            requested_message_type: None,
            received_chunk: Some(chunk_index),
        }
    }

    pub fn file_not_found() -> Self {
        Message::Error {
            error_code: 404,
            error_message: "File Not Found".to_string(),
        }
    }
}

/// Chunk payload bytes as a hex string in JSON.
mod hex_payload {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&hex::encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let s = String::deserialize(deserializer)?;
        hex::decode(&s).map_err(serde::de::Error::custom)
    }
}
