//! ferry protocol engine.
//! Sans-I/O: the node owns every socket; this crate owns the wire vocabulary,
//! the tracker registry, and the transfer/role state machines.

pub mod integrity;
pub mod protocol;
pub mod registry;
pub mod session;
pub mod store;
pub mod transfer;
pub mod wire;

pub use protocol::{Message, PeerRole};
pub use wire::{decode_frame, decode_payload, encode_frame, FrameDecodeError, FrameEncodeError};
