//! Field-level predicates on decoded packets. Pure functions: given the
//! packet and the session context, decide accept/reject/duplicate.

use crate::error::{Error, Kind, Result};
use crate::wire::{Conn, Data, ProtocolId, Response, PacketId};
use crate::MAX_PACKET_SIZE;

/// Outcome of validating an in-order-or-duplicate `DATA` packet. Only
/// UDPR ever produces `Duplicate`: TCP and UDP require strict ordering and
/// treat anything else as fatal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataCheck {
    New,
    Duplicate,
}

/// `CONN` is valid iff its id is `CONN` (the caller already knows this by
/// construction), its protocol id is one of `expected`, and the announced
/// length is nonzero.
pub fn validate_conn(conn: &Conn, expected: &[ProtocolId]) -> Result<ProtocolId> {
    let protocol = conn
        .protocol()
        .filter(|p| expected.contains(p))
        .ok_or(Error::Fatal(Kind::InvalidProtocolId(conn.protocol_id)))?;

    if conn.byte_sequence_length == 0 {
        return Err(Error::Fatal(Kind::ZeroLength));
    }

    Ok(protocol)
}

/// `RESPONSE` matches iff it carries the expected id and session.
pub fn validate_response(response: &Response, expected_id: PacketId, session_id: u64) -> Result<()> {
    if response.id != expected_id {
        return Err(Error::Fatal(Kind::UnexpectedPacket {
            context: "awaiting a response",
            id: response.id.as_u8(),
        }));
    }
    if response.session_id != session_id {
        return Err(Error::Fatal(Kind::SessionMismatch {
            expected: session_id,
            actual: response.session_id,
        }));
    }
    Ok(())
}

/// `DATA` is valid iff the session matches, the payload length is within
/// bounds, and it fits in what's left of the announced byte sequence.
/// Ordering is variant-dependent: TCP/UDP require `packet_number ==
/// expected`; UDPR additionally tolerates `packet_number < expected` as a
/// duplicate to discard, and only a `packet_number > expected` is fatal.
pub fn validate_data(
    data: &Data,
    session_id: u64,
    expected_packet_number: u64,
    remaining: u64,
    tolerate_duplicates: bool,
) -> Result<DataCheck> {
    if data.session_id != session_id {
        return Err(Error::Fatal(Kind::SessionMismatch {
            expected: session_id,
            actual: data.session_id,
        }));
    }

    let payload_length = data.payload.len() as u32;
    if payload_length == 0 {
        return Err(Error::Fatal(Kind::EmptyPayload));
    }
    if payload_length as usize > MAX_PACKET_SIZE {
        return Err(Error::Fatal(Kind::PayloadTooLarge(payload_length)));
    }
    if u64::from(payload_length) > remaining {
        return Err(Error::Fatal(Kind::PayloadOverrun { payload_length, remaining }));
    }

    if data.packet_number == expected_packet_number {
        return Ok(DataCheck::New);
    }

    if tolerate_duplicates && data.packet_number < expected_packet_number {
        return Ok(DataCheck::Duplicate);
    }

    Err(Error::Fatal(Kind::OutOfWindow {
        expected: expected_packet_number,
        actual: data.packet_number,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wire::Data;

    fn data(session_id: u64, packet_number: u64, len: usize) -> Data {
        Data { session_id, packet_number, payload: vec![1u8; len] }
    }

    #[test]
    fn test_validate_conn_rejects_zero_length() {
        let conn = Conn { session_id: 1, protocol_id: ProtocolId::Tcp.as_u8(), byte_sequence_length: 0 };
        assert!(matches!(
            validate_conn(&conn, &[ProtocolId::Tcp]),
            Err(Error::Fatal(Kind::ZeroLength))
        ));
    }

    #[test]
    fn test_validate_conn_rejects_wrong_protocol() {
        let conn = Conn { session_id: 1, protocol_id: ProtocolId::Tcp.as_u8(), byte_sequence_length: 5 };
        assert!(matches!(
            validate_conn(&conn, &[ProtocolId::Udp, ProtocolId::Udpr]),
            Err(Error::Fatal(Kind::InvalidProtocolId(_)))
        ));
    }

    #[test]
    fn test_validate_data_strict_order_rejects_skip() {
        let d = data(1, 1, 10);
        assert!(matches!(
            validate_data(&d, 1, 0, 100, false),
            Err(Error::Fatal(Kind::OutOfWindow { expected: 0, actual: 1 }))
        ));
    }

    #[test]
    fn test_validate_data_udpr_tolerates_duplicate() {
        let d = data(1, 0, 10);
        assert_eq!(validate_data(&d, 1, 1, 100, true).unwrap(), DataCheck::Duplicate);
    }

    #[test]
    fn test_validate_data_udpr_rejects_future_packet() {
        let d = data(1, 2, 10);
        assert!(matches!(
            validate_data(&d, 1, 1, 100, true),
            Err(Error::Fatal(Kind::OutOfWindow { expected: 1, actual: 2 }))
        ));
    }

    #[test]
    fn test_validate_data_rejects_overrun() {
        let d = data(1, 0, 50);
        assert!(matches!(
            validate_data(&d, 1, 0, 10, false),
            Err(Error::Fatal(Kind::PayloadOverrun { payload_length: 50, remaining: 10 }))
        ));
    }
}
