//! Per-role control logic: what a leecher or seeder does with each tracker
//! datagram and each handshake frame. The node owns the sockets; these
//! controllers own the phase transitions.

use std::net::IpAddr;

use tracing::debug;

use crate::protocol::{Message, PeerRole};

/// Reaction to a tracker datagram.
#[derive(Debug, PartialEq)]
pub enum TrackerReaction {
    /// Answer the tracker (liveness).
    Reply(Message),
    /// Open a TCP connection to the matched seeder.
    ConnectSeeder(IpAddr),
    /// Accept one inbound TCP connection.
    AcceptIncoming,
    /// Nothing actionable.
    Ignore,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LeecherPhase {
    Discovering,
    Connecting,
    AwaitingConnectAck,
    RequestingFile,
    Downloading,
    Done,
}

/// Outcome of the REQUEST_FILE exchange.
#[derive(Debug, PartialEq)]
pub enum FileResponse {
    Begin,
    NotFound { error_code: u16, error_message: String },
    Unexpected,
}

/// Drives a leecher from discovery through download and, optionally, into a
/// fresh registration as a seed source.
pub struct LeecherController {
    peer_id: String,
    client_name: String,
    file_id: String,
    phase: LeecherPhase,
}

impl LeecherController {
    pub fn new(peer_id: String, client_name: String, file_id: String) -> Self {
        Self {
            peer_id,
            client_name,
            file_id,
            phase: LeecherPhase::Discovering,
        }
    }

    pub fn phase(&self) -> LeecherPhase {
        self.phase
    }

    pub fn file_id(&self) -> &str {
        &self.file_id
    }

    /// Registration with the tracker.
    pub fn discover_message(&self) -> Message {
        Message::DiscoverPeer {
            peer_id: self.peer_id.clone(),
            type_of_peer: PeerRole::Leecher,
            file_ids: vec![self.file_id.clone()],
            client_name: self.client_name.clone(),
        }
    }

    pub fn available_message(&self) -> Message {
        Message::Available {
            type_of_peer: PeerRole::Leecher,
        }
    }

    /// A datagram from the tracker while discovering.
    pub fn on_tracker_message(&mut self, msg: &Message) -> TrackerReaction {
        match msg {
            Message::Ping => TrackerReaction::Reply(self.available_message()),
            Message::MatchFound { id, ip, .. }
                if self.phase == LeecherPhase::Discovering && *id == PeerRole::ContentSeeder =>
            {
                self.phase = LeecherPhase::Connecting;
                TrackerReaction::ConnectSeeder(*ip)
            }
            other => {
                debug!(?other, phase = ?self.phase, "ignoring tracker message");
                TrackerReaction::Ignore
            }
        }
    }

    /// TCP handshake opener, once connected.
    pub fn connect_message(&mut self) -> Message {
        self.phase = LeecherPhase::AwaitingConnectAck;
        Message::Connect {
            peer_id: self.peer_id.clone(),
            type_of_peer: PeerRole::Leecher,
        }
    }

    /// Handshake answer. Anything but an ACK sends the controller back to
    /// discovery.
    pub fn on_connect_ack(&mut self, msg: &Message) -> bool {
        match msg {
            Message::Ack { .. } => {
                self.phase = LeecherPhase::RequestingFile;
                true
            }
            _ => {
                self.phase = LeecherPhase::Discovering;
                false
            }
        }
    }

    pub fn request_file_message(&self) -> Message {
        Message::RequestFile {
            requested_file: self.file_id.clone(),
        }
    }

    pub fn on_file_response(&mut self, msg: &Message) -> FileResponse {
        match msg {
            Message::Begin => {
                self.phase = LeecherPhase::Downloading;
                FileResponse::Begin
            }
            Message::Error {
                error_code,
                error_message,
            } => {
                self.phase = LeecherPhase::Discovering;
                FileResponse::NotFound {
                    error_code: *error_code,
                    error_message: error_message.clone(),
                }
            }
            _ => {
                self.phase = LeecherPhase::Discovering;
                FileResponse::Unexpected
            }
        }
    }

    pub fn on_download_complete(&mut self) {
        self.phase = LeecherPhase::Done;
    }

    /// Any failure on the TCP side: drop back to discovery.
    pub fn reset(&mut self) {
        self.phase = LeecherPhase::Discovering;
    }

    /// The registration a finished leecher sends when it turns seed source
    /// for the file it just fetched. The old controller is discarded; the
    /// caller builds a fresh seeder session around this.
    pub fn reseed_controller(&self) -> SeederController {
        SeederController::new(
            self.peer_id.clone(),
            self.client_name.clone(),
            vec![self.file_id.clone()],
        )
    }
}

/// Drives a seeder: register, stay available, accept matched leechers.
pub struct SeederController {
    peer_id: String,
    client_name: String,
    catalog: Vec<String>,
}

/// Outcome of a leecher's REQUEST_FILE on the seeder side.
#[derive(Debug, PartialEq)]
pub enum FileDecision {
    /// File is cataloged; reply BEGIN and run the transfer.
    Serve(String),
    /// Not cataloged; send this reply and close.
    Reject(Message),
    /// Not a file request at all.
    Malformed,
}

impl SeederController {
    pub fn new(peer_id: String, client_name: String, catalog: Vec<String>) -> Self {
        Self {
            peer_id,
            client_name,
            catalog,
        }
    }

    pub fn register_message(&self) -> Message {
        Message::DiscoverPeer {
            peer_id: self.peer_id.clone(),
            type_of_peer: PeerRole::ContentSeeder,
            file_ids: self.catalog.clone(),
            client_name: self.client_name.clone(),
        }
    }

    pub fn available_message(&self) -> Message {
        Message::Available {
            type_of_peer: PeerRole::ContentSeeder,
        }
    }

    pub fn on_tracker_message(&self, msg: &Message) -> TrackerReaction {
        match msg {
            Message::Ping => TrackerReaction::Reply(self.available_message()),
            Message::MatchFound { .. } => TrackerReaction::AcceptIncoming,
            other => {
                debug!(?other, "ignoring tracker message");
                TrackerReaction::Ignore
            }
        }
    }

    /// First frame on an accepted connection must be CONNECT; the reply is
    /// the handshake ACK. The same contract serves the direct-peer acceptor.
    pub fn on_handshake(&self, msg: &Message) -> Option<Message> {
        match msg {
            Message::Connect { .. } => Some(Message::ack_for("CONNECT")),
            _ => None,
        }
    }

    pub fn on_file_request(&self, msg: &Message) -> FileDecision {
        match msg {
            Message::RequestFile { requested_file } => {
                if self.catalog.iter().any(|f| f == requested_file) {
                    FileDecision::Serve(requested_file.clone())
                } else {
                    FileDecision::Reject(Message::file_not_found())
                }
            }
            _ => FileDecision::Malformed,
        }
    }
}
