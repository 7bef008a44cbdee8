use crate::wire::ProtocolId;
use std::net::SocketAddr;

/// One end-to-end transfer. Exists only in memory: created on `CONN`
/// send (client) or `CONN` accept (server), destroyed on terminal `RCVD`
/// or any fatal error.
#[derive(Debug, Clone)]
pub struct Session {
    pub session_id: u64,
    pub protocol: ProtocolId,
    pub total_bytes: u64,
    pub peer_addr: SocketAddr,
    pub bytes_transferred: u64,
    pub next_packet_number: u64,
}

impl Session {
    pub fn new(session_id: u64, protocol: ProtocolId, total_bytes: u64, peer_addr: SocketAddr) -> Session {
        Session {
            session_id,
            protocol,
            total_bytes,
            peer_addr,
            bytes_transferred: 0,
            next_packet_number: 0,
        }
    }

    #[inline]
    pub fn remaining(&self) -> u64 {
        self.total_bytes - self.bytes_transferred
    }

    #[inline]
    pub fn is_complete(&self) -> bool {
        self.bytes_transferred == self.total_bytes
    }

    /// Record a fully accepted `DATA` packet and advance to the next
    /// expected packet number.
    pub fn advance(&mut self, payload_len: u64) {
        self.bytes_transferred += payload_len;
        self.next_packet_number += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_advance_tracks_completion() {
        let addr: SocketAddr = "127.0.0.1:9000".parse().unwrap();
        let mut session = Session::new(1, ProtocolId::Tcp, 10, addr);

        assert!(!session.is_complete());
        assert_eq!(session.remaining(), 10);

        session.advance(6);
        assert_eq!(session.next_packet_number, 1);
        assert_eq!(session.remaining(), 4);

        session.advance(4);
        assert!(session.is_complete());
    }
}
