//! Plain UDP: one datagram per packet, no retransmission. A lost datagram
//! is a lost transfer: the client simply times out waiting on whatever
//! it expected next and the session dies.

use crate::io::{recv_datagram, send_datagram, set_udp_timeout};
use ppcb_proto::logging::{debug, warn, Logger};
use ppcb_proto::validate::{validate_conn, validate_data, validate_response, DataCheck};
use ppcb_proto::wire::{Conn, Packet, PacketId, PacketResponse, ProtocolId, Response};
use ppcb_proto::{Error, Kind, Result, Session, BUFFER_SIZE, MAX_PACKET_SIZE, MAX_WAIT_SECS};
use std::io::{Cursor, Write};
use std::net::{SocketAddr, UdpSocket};
use std::time::Duration;

fn recv_from(socket: &UdpSocket, server: SocketAddr) -> Result<Packet> {
    let mut buf = [0u8; BUFFER_SIZE];
    let (n, from) = recv_datagram(socket, &mut buf)?;
    if from != server {
        // A datagram from somewhere other than the server we're talking to:
        // not part of this exchange, ignore and keep waiting once more.
        return Err(Error::Wait);
    }
    Packet::decode(&mut Cursor::new(&buf[..n]))
}

/// Client: send `CONN`, await `CONACC`, send each `DATA` chunk as its own
/// datagram, await the final `RCVD`. No retransmission: any timeout or
/// framing mismatch is fatal.
pub fn client_send(socket: &UdpSocket, server: SocketAddr, session_id: u64, payload: &[u8], log: &Logger) -> Result<()> {
    set_udp_timeout(socket, Some(Duration::from_secs(MAX_WAIT_SECS)))?;

    let conn = Conn { session_id, protocol_id: ProtocolId::Udp.as_u8(), byte_sequence_length: payload.len() as u64 };
    let mut buf = Vec::new();
    Packet::Conn(conn).encode(&mut buf)?;
    send_datagram(socket, &buf, server)?;
    debug!(log, "sent CONN"; "session_id" => session_id);

    loop {
        match recv_from(socket, server) {
            Ok(Packet::Response(r)) => {
                validate_response(&r, PacketId::Conacc, session_id)?;
                break;
            }
            Ok(other) => {
                return Err(Error::Fatal(Kind::UnexpectedPacket {
                    context: "awaiting CONACC over UDP",
                    id: other.id().as_u8(),
                }))
            }
            Err(Error::Wait) => continue,
            Err(e) => return Err(e),
        }
    }
    debug!(log, "received CONACC"; "session_id" => session_id);

    let mut offset = 0usize;
    let mut packet_number = 0u64;
    while offset < payload.len() {
        let chunk_len = (payload.len() - offset).min(MAX_PACKET_SIZE);
        let data = ppcb_proto::Data {
            session_id,
            packet_number,
            payload: payload[offset..offset + chunk_len].to_vec(),
        };
        let mut frame = Vec::new();
        Packet::Data(data).encode(&mut frame)?;
        send_datagram(socket, &frame, server)?;

        offset += chunk_len;
        packet_number += 1;
    }
    debug!(log, "sent all DATA"; "session_id" => session_id, "packets" => packet_number);

    loop {
        match recv_from(socket, server) {
            Ok(Packet::Response(r)) => {
                validate_response(&r, PacketId::Rcvd, session_id)?;
                break;
            }
            Ok(other) => {
                return Err(Error::Fatal(Kind::UnexpectedPacket {
                    context: "awaiting RCVD over UDP",
                    id: other.id().as_u8(),
                }))
            }
            Err(Error::Wait) => continue,
            Err(e) => return Err(e),
        }
    }
    debug!(log, "received RCVD"; "session_id" => session_id);

    Ok(())
}

/// Server: runs one already-accepted session to completion on a socket
/// dedicated to that peer (see `dispatch::run_datagram_server` for how the
/// shared listening socket gets split into per-peer sessions upstream of
/// this call: UDP has no real per-peer socket, so the dispatcher instead
/// filters incoming datagrams by source address once a session starts).
///
/// Returns once the session finishes (successfully or not). Datagrams
/// from addresses other than `session.peer_addr` are reported back to the
/// caller as `Ok(None)` so the dispatcher can handle them as a stray peer
/// without tearing down the in-progress session.
pub fn recv_one<W: Write>(
    socket: &UdpSocket,
    session: &mut Session,
    buf: &[u8],
    from: SocketAddr,
    out: &mut W,
    log: &Logger,
) -> Result<Option<()>> {
    if from != session.peer_addr {
        return Ok(None);
    }

    let packet = Packet::decode(&mut Cursor::new(buf))?;
    let data = match packet {
        Packet::Data(data) => data,
        other => {
            warn!(log, "unexpected packet mid UDP session"; "id" => other.id().as_u8());
            return Err(Error::Fatal(Kind::UnexpectedPacket {
                context: "mid UDP session",
                id: other.id().as_u8(),
            }));
        }
    };

    match validate_data(&data, session.session_id, session.next_packet_number, session.remaining(), false) {
        Ok(DataCheck::New) => {
            out.write_all(&data.payload)?;
            out.flush()?;
            session.advance(data.payload.len() as u64);
            Ok(Some(()))
        }
        Ok(DataCheck::Duplicate) => unreachable!("UDP never tolerates duplicates"),
        Err(_) => {
            let rjt = PacketResponse::new(PacketId::Rjt, session.session_id, session.next_packet_number);
            let mut frame = Vec::new();
            Packet::PacketResponse(rjt).encode(&mut frame)?;
            send_datagram(socket, &frame, session.peer_addr)?;
            Err(Error::Fatal(Kind::Rejected))
        }
    }
}

pub fn send_conacc(socket: &UdpSocket, addr: SocketAddr, session_id: u64) -> Result<()> {
    let mut buf = Vec::new();
    Packet::Response(Response::new(PacketId::Conacc, session_id)).encode(&mut buf)?;
    send_datagram(socket, &buf, addr)
}

pub fn send_conrjt(socket: &UdpSocket, addr: SocketAddr, session_id: u64) -> Result<()> {
    let mut buf = Vec::new();
    Packet::Response(Response::new(PacketId::Conrjt, session_id)).encode(&mut buf)?;
    send_datagram(socket, &buf, addr)
}

pub fn send_rcvd(socket: &UdpSocket, addr: SocketAddr, session_id: u64) -> Result<()> {
    let mut buf = Vec::new();
    Packet::Response(Response::new(PacketId::Rcvd, session_id)).encode(&mut buf)?;
    send_datagram(socket, &buf, addr)
}

/// Reply to a stray `DATA` that doesn't belong to any known session with
/// `session_id` zeroed out, per the stray-peer handling rule shared by
/// plain UDP and UDPR.
pub fn send_stray_rjt(socket: &UdpSocket, addr: SocketAddr, packet_number: u64) -> Result<()> {
    let mut buf = Vec::new();
    Packet::PacketResponse(PacketResponse::new(PacketId::Rjt, 0, packet_number)).encode(&mut buf)?;
    send_datagram(socket, &buf, addr)
}

pub fn validate_incoming_conn(conn: &Conn) -> Result<ProtocolId> {
    validate_conn(conn, &[ProtocolId::Udp])
}
