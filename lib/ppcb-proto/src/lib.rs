//! Shared protocol types for ppcb: wire codec, packet validation, session
//! bookkeeping, and the handful of config helpers (port parsing, IPv4
//! resolution) that are protocol-adjacent enough to live here rather than
//! in the binaries.

pub mod config;
pub mod error;
pub mod logging;
pub mod session;
pub mod validate;
pub mod wire;

pub const MAX_PACKET_SIZE: usize = 64_000;
pub const BUFFER_SIZE: usize = 64_500;
pub const MAX_WAIT_SECS: u64 = 5;
pub const MAX_RETRANSMITS: u32 = 3;
pub const QUEUE_LENGTH: i32 = 5;

pub use error::{Error, ErrorUtils, Kind, Result};
pub use session::Session;
pub use wire::{Conn, Data, DataHeader, Packet, PacketId, PacketResponse, ProtocolId, Response};
