//! Wire codec for the four ppcb packet shapes. Layouts are packed, no
//! padding, and every multi-byte integer (other than the opaque
//! `session_id`) is big-endian on the wire.

use crate::error::{Error, Kind, Result};
use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use std::io::{self, Read, Write};

use crate::MAX_PACKET_SIZE;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PacketId {
    Conn = 1,
    Conacc = 2,
    Conrjt = 3,
    Data = 4,
    Acc = 5,
    Rjt = 6,
    Rcvd = 7,
}

impl PacketId {
    #[inline]
    pub fn from_u8(value: u8) -> Option<PacketId> {
        Some(match value {
            1 => PacketId::Conn,
            2 => PacketId::Conacc,
            3 => PacketId::Conrjt,
            4 => PacketId::Data,
            5 => PacketId::Acc,
            6 => PacketId::Rjt,
            7 => PacketId::Rcvd,
            _ => return None,
        })
    }

    #[inline]
    pub fn as_u8(self) -> u8 {
        self as u8
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProtocolId {
    Tcp = 1,
    Udp = 2,
    Udpr = 3,
}

impl ProtocolId {
    #[inline]
    pub fn from_u8(value: u8) -> Option<ProtocolId> {
        Some(match value {
            1 => ProtocolId::Tcp,
            2 => ProtocolId::Udp,
            3 => ProtocolId::Udpr,
            _ => return None,
        })
    }

    #[inline]
    pub fn as_u8(self) -> u8 {
        self as u8
    }
}

pub const CONN_SIZE: usize = 1 + 8 + 1 + 8;
pub const RESPONSE_SIZE: usize = 1 + 8;
pub const DATA_HEADER_SIZE: usize = 1 + 8 + 8 + 4;
pub const PACKET_RESPONSE_SIZE: usize = 1 + 8 + 8;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Conn {
    pub session_id: u64,
    /// Kept as the raw wire byte: an unrecognized protocol id is a
    /// validation concern, not a decode failure.
    pub protocol_id: u8,
    pub byte_sequence_length: u64,
}

impl Conn {
    #[inline]
    pub fn protocol(&self) -> Option<ProtocolId> {
        ProtocolId::from_u8(self.protocol_id)
    }

    pub fn encode<W: Write>(&self, w: &mut W) -> io::Result<()> {
        w.write_u8(PacketId::Conn.as_u8())?;
        w.write_u64::<BigEndian>(self.session_id)?;
        w.write_u8(self.protocol_id)?;
        w.write_u64::<BigEndian>(self.byte_sequence_length)
    }

    fn decode_body<R: Read>(r: &mut R) -> Result<Conn> {
        let session_id = r.read_u64::<BigEndian>()?;
        let protocol_id = r.read_u8()?;
        let byte_sequence_length = r.read_u64::<BigEndian>()?;
        Ok(Conn { session_id, protocol_id, byte_sequence_length })
    }
}

/// Used for `CONACC`, `CONRJT` and `RCVD`: any packet that carries only an
/// id and a session id.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Response {
    pub id: PacketId,
    pub session_id: u64,
}

impl Response {
    #[inline]
    pub fn new(id: PacketId, session_id: u64) -> Response {
        debug_assert!(matches!(id, PacketId::Conacc | PacketId::Conrjt | PacketId::Rcvd));
        Response { id, session_id }
    }

    pub fn encode<W: Write>(&self, w: &mut W) -> io::Result<()> {
        w.write_u8(self.id.as_u8())?;
        w.write_u64::<BigEndian>(self.session_id)
    }

    fn decode_body<R: Read>(id: PacketId, r: &mut R) -> Result<Response> {
        let session_id = r.read_u64::<BigEndian>()?;
        Ok(Response { id, session_id })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Data {
    pub session_id: u64,
    pub packet_number: u64,
    pub payload: Vec<u8>,
}

impl Data {
    pub fn encode<W: Write>(&self, w: &mut W) -> io::Result<()> {
        w.write_u8(PacketId::Data.as_u8())?;
        w.write_u64::<BigEndian>(self.session_id)?;
        w.write_u64::<BigEndian>(self.packet_number)?;
        w.write_u32::<BigEndian>(self.payload.len() as u32)?;
        w.write_all(&self.payload)
    }

    /// Decodes the body given the header has already announced `id == DATA`.
    /// `max_payload` bounds the allocation driven by the on-wire length
    /// field, so a hostile or corrupt `payload_length` can never make this
    /// read more than `max_payload` bytes.
    fn decode_body<R: Read>(r: &mut R, max_payload: usize) -> Result<Data> {
        let header = DataHeader::decode(r)?;

        if header.payload_length == 0 {
            return Err(Error::Fatal(Kind::EmptyPayload));
        }
        if header.payload_length as usize > max_payload {
            return Err(Error::Fatal(Kind::PayloadTooLarge(header.payload_length)));
        }

        let mut payload = vec![0u8; header.payload_length as usize];
        r.read_exact(&mut payload)?;

        Ok(Data { session_id: header.session_id, packet_number: header.packet_number, payload })
    }
}

/// The fixed-size part of a `DATA` packet (everything but the payload
/// bytes themselves). Session handlers decode this first so they can
/// validate `payload_length` against the remaining sequence length
/// before committing to reading, and allocating for, the payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DataHeader {
    pub session_id: u64,
    pub packet_number: u64,
    pub payload_length: u32,
}

impl DataHeader {
    /// Decodes assuming the leading `DATA` id byte has already been
    /// consumed.
    pub fn decode<R: Read>(r: &mut R) -> Result<DataHeader> {
        let session_id = r.read_u64::<BigEndian>()?;
        let packet_number = r.read_u64::<BigEndian>()?;
        let payload_length = r.read_u32::<BigEndian>()?;
        Ok(DataHeader { session_id, packet_number, payload_length })
    }
}

/// Used for `ACC` and `RJT`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PacketResponse {
    pub id: PacketId,
    pub session_id: u64,
    pub packet_number: u64,
}

impl PacketResponse {
    #[inline]
    pub fn new(id: PacketId, session_id: u64, packet_number: u64) -> PacketResponse {
        debug_assert!(matches!(id, PacketId::Acc | PacketId::Rjt));
        PacketResponse { id, session_id, packet_number }
    }

    pub fn encode<W: Write>(&self, w: &mut W) -> io::Result<()> {
        w.write_u8(self.id.as_u8())?;
        w.write_u64::<BigEndian>(self.session_id)?;
        w.write_u64::<BigEndian>(self.packet_number)
    }

    fn decode_body<R: Read>(id: PacketId, r: &mut R) -> Result<PacketResponse> {
        let session_id = r.read_u64::<BigEndian>()?;
        let packet_number = r.read_u64::<BigEndian>()?;
        Ok(PacketResponse { id, session_id, packet_number })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Packet {
    Conn(Conn),
    Response(Response),
    Data(Data),
    PacketResponse(PacketResponse),
}

impl Packet {
    pub fn encode<W: Write>(&self, w: &mut W) -> io::Result<()> {
        match self {
            Packet::Conn(p) => p.encode(w),
            Packet::Response(p) => p.encode(w),
            Packet::Data(p) => p.encode(w),
            Packet::PacketResponse(p) => p.encode(w),
        }
    }

    /// Dispatches on the leading id byte, the same shape as a
    /// `Frame::read`'s match on a category byte.
    pub fn decode<R: Read>(r: &mut R) -> Result<Packet> {
        Self::decode_with_limit(r, MAX_PACKET_SIZE)
    }

    pub fn decode_with_limit<R: Read>(r: &mut R, max_payload: usize) -> Result<Packet> {
        let id_byte = r.read_u8()?;
        let id = PacketId::from_u8(id_byte).ok_or(Error::Fatal(Kind::InvalidPacketId(id_byte)))?;

        Ok(match id {
            PacketId::Conn => Packet::Conn(Conn::decode_body(r)?),
            PacketId::Conacc | PacketId::Conrjt | PacketId::Rcvd => {
                Packet::Response(Response::decode_body(id, r)?)
            }
            PacketId::Data => Packet::Data(Data::decode_body(r, max_payload)?),
            PacketId::Acc | PacketId::Rjt => Packet::PacketResponse(PacketResponse::decode_body(id, r)?),
        })
    }

    pub fn id(&self) -> PacketId {
        match self {
            Packet::Conn(_) => PacketId::Conn,
            Packet::Response(p) => p.id,
            Packet::Data(_) => PacketId::Data,
            Packet::PacketResponse(p) => p.id,
        }
    }

    pub fn session_id(&self) -> u64 {
        match self {
            Packet::Conn(p) => p.session_id,
            Packet::Response(p) => p.session_id,
            Packet::Data(p) => p.session_id,
            Packet::PacketResponse(p) => p.session_id,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn roundtrip(packet: Packet) {
        let mut buf = Vec::new();
        packet.encode(&mut buf).unwrap();

        let mut cursor = Cursor::new(buf);
        let decoded = Packet::decode(&mut cursor).unwrap();
        assert_eq!(decoded, packet);
    }

    #[test]
    fn test_roundtrip_conn() {
        roundtrip(Packet::Conn(Conn {
            session_id: 0xDEAD_BEEF_0BAD_F00D,
            protocol_id: ProtocolId::Udpr.as_u8(),
            byte_sequence_length: 5,
        }));
    }

    #[test]
    fn test_roundtrip_response() {
        roundtrip(Packet::Response(Response::new(PacketId::Conacc, 42)));
        roundtrip(Packet::Response(Response::new(PacketId::Conrjt, 42)));
        roundtrip(Packet::Response(Response::new(PacketId::Rcvd, 42)));
    }

    #[test]
    fn test_roundtrip_data() {
        roundtrip(Packet::Data(Data {
            session_id: 7,
            packet_number: 0,
            payload: b"hello".to_vec(),
        }));
    }

    #[test]
    fn test_roundtrip_packet_response() {
        roundtrip(Packet::PacketResponse(PacketResponse::new(PacketId::Acc, 7, 3)));
        roundtrip(Packet::PacketResponse(PacketResponse::new(PacketId::Rjt, 7, 3)));
    }

    #[test]
    fn test_decode_rejects_invalid_id() {
        let mut cursor = Cursor::new(vec![99u8, 0, 0, 0, 0, 0, 0, 0, 0]);
        let err = Packet::decode(&mut cursor).unwrap_err();
        assert!(matches!(err, Error::Fatal(Kind::InvalidPacketId(99))));
    }

    #[test]
    fn test_decode_rejects_short_buffer() {
        let mut cursor = Cursor::new(vec![PacketId::Conacc.as_u8(), 0, 0]);
        let err = Packet::decode(&mut cursor).unwrap_err();
        assert!(matches!(err, Error::Fatal(Kind::Eof)));
    }

    #[test]
    fn test_decode_rejects_empty_payload() {
        let mut buf = vec![PacketId::Data.as_u8()];
        buf.extend_from_slice(&7u64.to_be_bytes());
        buf.extend_from_slice(&0u64.to_be_bytes());
        buf.extend_from_slice(&0u32.to_be_bytes());
        let mut cursor = Cursor::new(buf);
        let err = Packet::decode(&mut cursor).unwrap_err();
        assert!(matches!(err, Error::Fatal(Kind::EmptyPayload)));
    }

    #[test]
    fn test_decode_rejects_oversize_payload() {
        let mut buf = vec![PacketId::Data.as_u8()];
        buf.extend_from_slice(&7u64.to_be_bytes());
        buf.extend_from_slice(&0u64.to_be_bytes());
        buf.extend_from_slice(&(MAX_PACKET_SIZE as u32 + 1).to_be_bytes());
        let mut cursor = Cursor::new(buf);
        let err = Packet::decode(&mut cursor).unwrap_err();
        assert!(matches!(err, Error::Fatal(Kind::PayloadTooLarge(_))));
    }

    #[test]
    fn test_session_id_not_byte_swapped_meaning_preserved() {
        // An opaque session id is whatever 8 bytes round through unchanged,
        // regardless of host endianness interpretation.
        let packet = Packet::Response(Response::new(PacketId::Rcvd, 0x0102030405060708));
        let mut buf = Vec::new();
        packet.encode(&mut buf).unwrap();
        assert_eq!(&buf[1..9], &[1, 2, 3, 4, 5, 6, 7, 8]);
    }
}
