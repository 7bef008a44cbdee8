//! UDP with stop-and-wait retransmission. Every step of the exchange
//! (`CONN`/`CONACC`, each `DATA`/`ACC`, the final `DATA`/`RCVD`) is retried
//! up to `MAX_RETRANSMITS` times on top of the original attempt before the
//! whole session gives up, on both the client and the server side. The
//! final `ACC`+`RCVD` pair that closes a session is sent once, without
//! retransmission: by the time the server emits it there is nothing left
//! to retry for (see DESIGN.md for why this asymmetry is kept rather than
//! "fixed").

use crate::io::{recv_datagram, send_datagram, set_udp_timeout};
use crate::udp;
use ppcb_proto::logging::{debug, warn, Logger};
use ppcb_proto::validate::{validate_conn, validate_data, validate_response, DataCheck};
use ppcb_proto::wire::{Conn, Data, Packet, PacketId, PacketResponse, ProtocolId, Response};
use ppcb_proto::{Error, Kind, Result, Session, BUFFER_SIZE, MAX_PACKET_SIZE, MAX_RETRANSMITS, MAX_WAIT_SECS};
use std::io::{Cursor, Write};
use std::net::{SocketAddr, UdpSocket};
use std::time::Duration;

/// What the client is currently waiting to receive. Mirrors the three
/// shapes a confirmation can take: the initial accept, a per-packet ack
/// carrying the packet number it confirms, and the terminal receipt.
enum Awaiting {
    Conacc,
    Acc(u64),
    Rcvd,
}

/// Sends `frame` to `addr` and waits for a reply matching `awaiting`,
/// retrying the send up to `MAX_RETRANSMITS` additional times if nothing
/// (or something irrelevant) comes back within `MAX_WAIT_SECS`. Any
/// datagram not from `addr`, or not the expected shape, is ignored and the
/// wait continues on the same attempt rather than failing outright, since
/// it might be a genuinely stray peer on a shared socket.
fn retransmit_until(
    socket: &UdpSocket,
    addr: SocketAddr,
    session_id: u64,
    frame: &[u8],
    awaiting: Awaiting,
    log: &Logger,
) -> Result<Packet> {
    set_udp_timeout(socket, Some(Duration::from_secs(MAX_WAIT_SECS)))?;

    for attempt in 0..=MAX_RETRANSMITS {
        send_datagram(socket, frame, addr)?;
        debug!(log, "udpr sent"; "session_id" => session_id, "attempt" => attempt);

        let deadline_result = loop {
            let mut buf = [0u8; BUFFER_SIZE];
            match recv_datagram(socket, &mut buf) {
                Ok((n, from)) if from == addr => {
                    match Packet::decode(&mut Cursor::new(&buf[..n])) {
                        Ok(packet) => {
                            if matches_awaiting(&packet, &awaiting, session_id) {
                                break Ok(packet);
                            }
                            // Not the shape we wanted: keep waiting on this attempt.
                            continue;
                        }
                        Err(_) => continue,
                    }
                }
                Ok(_) => continue, // datagram from an unrelated peer
                Err(Error::Wait) => break Err(Error::Wait),
                Err(e) => return Err(e),
            }
        };

        match deadline_result {
            Ok(packet) => return Ok(packet),
            Err(Error::Wait) => {
                warn!(log, "udpr timed out, retransmitting"; "session_id" => session_id, "attempt" => attempt);
                continue;
            }
            Err(e) => return Err(e),
        }
    }

    Err(Error::Fatal(Kind::RetransmitsExhausted))
}

fn matches_awaiting(packet: &Packet, awaiting: &Awaiting, session_id: u64) -> bool {
    if packet.session_id() != session_id {
        return false;
    }
    match (packet, awaiting) {
        (Packet::Response(r), Awaiting::Conacc) => r.id == PacketId::Conacc,
        (Packet::Response(r), Awaiting::Rcvd) => r.id == PacketId::Rcvd,
        (Packet::PacketResponse(pr), Awaiting::Acc(n)) => pr.id == PacketId::Acc && pr.packet_number == *n,
        _ => false,
    }
}

/// Client: connect, stream `DATA`/`ACC` pairs one at a time, finalize.
/// Every step retransmits independently of the others.
pub fn client_send(socket: &UdpSocket, server: SocketAddr, session_id: u64, payload: &[u8], log: &Logger) -> Result<()> {
    let conn = Conn { session_id, protocol_id: ProtocolId::Udpr.as_u8(), byte_sequence_length: payload.len() as u64 };
    let mut conn_frame = Vec::new();
    Packet::Conn(conn).encode(&mut conn_frame)?;

    let reply = retransmit_until(socket, server, session_id, &conn_frame, Awaiting::Conacc, log)?;
    match reply {
        Packet::Response(r) => validate_response(&r, PacketId::Conacc, session_id)?,
        _ => unreachable!("matches_awaiting only accepts CONACC here"),
    }
    debug!(log, "udpr received CONACC"; "session_id" => session_id);

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

        let reply = retransmit_until(socket, server, session_id, &frame, Awaiting::Acc(packet_number), log)?;
        match reply {
            Packet::PacketResponse(pr) if pr.id == PacketId::Acc => {}
            Packet::PacketResponse(pr) if pr.id == PacketId::Rjt => return Err(Error::Fatal(Kind::Rejected)),
            _ => unreachable!("matches_awaiting only accepts ACC/nothing here"),
        }

        offset += chunk_len;
        packet_number += 1;
    }
    debug!(log, "udpr sent all DATA"; "session_id" => session_id, "packets" => packet_number);

    // RCVD is sent by the server exactly once, without retransmission, once
    // the last ACC has gone out. There is nothing left for the client to
    // resend, so it makes one plain wait rather than retransmitting. A
    // lost RCVD is fatal here even though the transfer already completed
    // on the server's side.
    set_udp_timeout(socket, Some(Duration::from_secs(MAX_WAIT_SECS)))?;
    loop {
        let mut buf = [0u8; BUFFER_SIZE];
        match recv_datagram(socket, &mut buf) {
            Ok((n, from)) if from == server => match Packet::decode(&mut Cursor::new(&buf[..n]))? {
                Packet::Response(r) => {
                    validate_response(&r, PacketId::Rcvd, session_id)?;
                    debug!(log, "udpr received RCVD"; "session_id" => session_id);
                    return Ok(());
                }
                other => {
                    return Err(Error::Fatal(Kind::UnexpectedPacket {
                        context: "awaiting RCVD over UDPR",
                        id: other.id().as_u8(),
                    }))
                }
            },
            Ok(_) => continue,
            Err(e) => return Err(e),
        }
    }
}

/// Server: given a freshly accepted session and the `CONACC` frame already
/// queued to confirm it, run the `DATA`/`ACC` exchange to completion on the
/// shared socket. Each step resends its confirming packet (the `CONACC` for
/// the first `DATA`, each `ACC` for the one after it) up to
/// `MAX_RETRANSMITS` additional times if the next `DATA` doesn't show up in
/// time, mirroring the client's own `retransmit_until`.
pub fn run_session<W: Write>(
    socket: &UdpSocket,
    session: &mut Session,
    conacc_frame: &[u8],
    out: &mut W,
    log: &Logger,
) -> Result<()> {
    set_udp_timeout(socket, Some(Duration::from_secs(MAX_WAIT_SECS)))?;

    let mut confirmation = conacc_frame.to_vec();
    loop {
        let data = exchange_step(socket, session, &confirmation, log)?;

        out.write_all(&data.payload)?;
        out.flush()?;
        session.advance(data.payload.len() as u64);

        let acc = PacketResponse::new(PacketId::Acc, session.session_id, data.packet_number);
        let mut acc_frame = Vec::new();
        Packet::PacketResponse(acc).encode(&mut acc_frame)?;

        if session.is_complete() {
            send_datagram(socket, &acc_frame, session.peer_addr)?;
            let rcvd = Response::new(PacketId::Rcvd, session.session_id);
            let mut rcvd_frame = Vec::new();
            Packet::Response(rcvd).encode(&mut rcvd_frame)?;
            send_datagram(socket, &rcvd_frame, session.peer_addr)?;
            debug!(log, "udpr session complete"; "session_id" => session.session_id);
            return Ok(());
        }

        confirmation = acc_frame;
    }
}

/// Sends `confirmation` and waits for the matching next `DATA`, resending
/// it on timeout for up to `MAX_RETRANSMITS` additional attempts. Gives up
/// with `RetransmitsExhausted` once the budget runs out, the same fate a
/// client faces from `retransmit_until`.
fn exchange_step(socket: &UdpSocket, session: &mut Session, confirmation: &[u8], log: &Logger) -> Result<Data> {
    for attempt in 0..=MAX_RETRANSMITS {
        send_datagram(socket, confirmation, session.peer_addr)?;
        debug!(log, "udpr server sent confirmation"; "session_id" => session.session_id, "attempt" => attempt);

        match await_matching_data(socket, session, log) {
            Ok(data) => return Ok(data),
            Err(Error::Wait) => {
                warn!(log, "udpr server timed out awaiting DATA, retransmitting"; "session_id" => session.session_id, "attempt" => attempt);
                continue;
            }
            Err(e) => return Err(e),
        }
    }

    Err(Error::Fatal(Kind::RetransmitsExhausted))
}

/// Receives datagrams until one is the `DATA` this step expects. Stray
/// peers get their reply and are ignored; an exact duplicate of the
/// already-acknowledged `DATA` gets its `ACC` resent without counting
/// against the retransmission budget, since the socket hasn't actually
/// timed out.
fn await_matching_data(socket: &UdpSocket, session: &mut Session, log: &Logger) -> Result<Data> {
    loop {
        let (buf, _from) = recv_next_datagram(socket, session.peer_addr)?;

        let packet = match Packet::decode(&mut Cursor::new(&buf[..])) {
            Ok(packet) => packet,
            Err(_) => continue,
        };

        let data = match packet {
            Packet::Data(data) => data,
            other => {
                warn!(log, "unexpected packet mid UDPR session"; "id" => other.id().as_u8());
                continue;
            }
        };

        match validate_data(&data, session.session_id, session.next_packet_number, session.remaining(), true) {
            Ok(DataCheck::New) => return Ok(data),
            Ok(DataCheck::Duplicate) => {
                let acc = PacketResponse::new(PacketId::Acc, session.session_id, data.packet_number);
                let mut frame = Vec::new();
                Packet::PacketResponse(acc).encode(&mut frame)?;
                send_datagram(socket, &frame, session.peer_addr)?;
            }
            Err(_) => {
                let rjt = PacketResponse::new(PacketId::Rjt, session.session_id, session.next_packet_number);
                let mut frame = Vec::new();
                Packet::PacketResponse(rjt).encode(&mut frame)?;
                send_datagram(socket, &frame, session.peer_addr)?;
                return Err(Error::Fatal(Kind::Rejected));
            }
        }
    }
}

fn recv_next_datagram(socket: &UdpSocket, expected_peer: SocketAddr) -> Result<(Vec<u8>, SocketAddr)> {
    loop {
        let mut buf = [0u8; BUFFER_SIZE];
        let (n, from) = recv_datagram(socket, &mut buf)?;
        if from == expected_peer {
            return Ok((buf[..n].to_vec(), from));
        }

        // A stray datagram on the shared socket while this session is
        // active: reply per the stray-peer rule and never touch the
        // in-progress session.
        if let Ok(packet) = Packet::decode(&mut Cursor::new(&buf[..n])) {
            let _ = match packet {
                Packet::Conn(conn) => udp::send_conrjt(socket, from, conn.session_id),
                Packet::Data(data) => udp::send_stray_rjt(socket, from, data.packet_number),
                _ => Ok(()),
            };
        }
    }
}

pub fn validate_incoming_conn(conn: &Conn) -> Result<ProtocolId> {
    validate_conn(conn, &[ProtocolId::Udpr])
}

#[cfg(test)]
mod tests {
    use super::*;
    use ppcb_proto::logging::discard;
    use std::net::Ipv4Addr;
    use std::thread;

    fn bound_socket() -> UdpSocket {
        UdpSocket::bind((Ipv4Addr::LOCALHOST, 0)).unwrap()
    }

    #[test]
    fn test_udpr_happy_path_hello() {
        let server_socket = bound_socket();
        let server_addr = server_socket.local_addr().unwrap();
        let client_socket = bound_socket();
        let log = discard();

        let server_thread = thread::spawn(move || {
            let mut buf = [0u8; BUFFER_SIZE];
            let (n, from) = server_socket.recv_from(&mut buf).unwrap();
            let conn = match Packet::decode(&mut Cursor::new(&buf[..n])).unwrap() {
                Packet::Conn(conn) => conn,
                _ => panic!("expected CONN"),
            };
            validate_incoming_conn(&conn).unwrap();

            let response = Response::new(PacketId::Conacc, conn.session_id);
            let mut conacc_frame = Vec::new();
            Packet::Response(response).encode(&mut conacc_frame).unwrap();

            let mut session = Session::new(conn.session_id, ProtocolId::Udpr, conn.byte_sequence_length, from);
            let mut out = Vec::new();
            run_session(&server_socket, &mut session, &conacc_frame, &mut out, &discard()).unwrap();
            out
        });

        client_send(&client_socket, server_addr, 21, b"hello", &log).unwrap();
        assert_eq!(server_thread.join().unwrap(), b"hello");
    }

    #[test]
    fn test_retransmit_until_gives_up_after_budget() {
        let socket = bound_socket();
        // Nobody is listening on this address, so every attempt times out.
        let dead = SocketAddr::from((Ipv4Addr::LOCALHOST, 1));
        let err = retransmit_until(&socket, dead, 1, &[0u8; 1], Awaiting::Conacc, &discard()).unwrap_err();
        assert!(matches!(err, Error::Fatal(Kind::RetransmitsExhausted)));
    }

    #[test]
    fn test_server_retransmits_conacc_when_first_data_is_lost() {
        // A relay that forwards everything except the very first DATA,
        // forcing the server to resend its CONACC before the transfer
        // can proceed.
        let server_socket = bound_socket();
        let server_addr = server_socket.local_addr().unwrap();
        let relay_socket = bound_socket();
        let relay_addr = relay_socket.local_addr().unwrap();
        let client_socket = bound_socket();
        let log = discard();

        // Leaked intentionally: it relays forever and outlives the assertion.
        thread::spawn(move || {
            let mut buf = [0u8; BUFFER_SIZE];
            let mut client_addr = None;
            let mut dropped_once = false;
            loop {
                let (n, from) = relay_socket.recv_from(&mut buf).unwrap();
                if from == server_addr {
                    if let Some(addr) = client_addr {
                        relay_socket.send_to(&buf[..n], addr).unwrap();
                    }
                    continue;
                }
                client_addr = Some(from);

                if !dropped_once {
                    if let Ok(Packet::Data(_)) = Packet::decode(&mut Cursor::new(&buf[..n])) {
                        dropped_once = true;
                        continue;
                    }
                }
                relay_socket.send_to(&buf[..n], server_addr).unwrap();
                if dropped_once {
                    break;
                }
            }
            // Keep relaying for the rest of the exchange.
            loop {
                let (n, from) = relay_socket.recv_from(&mut buf).unwrap();
                if from == server_addr {
                    relay_socket.send_to(&buf[..n], client_addr.unwrap()).unwrap();
                } else {
                    relay_socket.send_to(&buf[..n], server_addr).unwrap();
                }
            }
        });

        let server_thread = thread::spawn(move || {
            let mut buf = [0u8; BUFFER_SIZE];
            let (n, from) = server_socket.recv_from(&mut buf).unwrap();
            let conn = match Packet::decode(&mut Cursor::new(&buf[..n])).unwrap() {
                Packet::Conn(conn) => conn,
                _ => panic!("expected CONN"),
            };
            validate_incoming_conn(&conn).unwrap();

            let response = Response::new(PacketId::Conacc, conn.session_id);
            let mut conacc_frame = Vec::new();
            Packet::Response(response).encode(&mut conacc_frame).unwrap();

            let mut session = Session::new(conn.session_id, ProtocolId::Udpr, conn.byte_sequence_length, from);
            let mut out = Vec::new();
            run_session(&server_socket, &mut session, &conacc_frame, &mut out, &discard()).unwrap();
            out
        });

        client_send(&client_socket, relay_addr, 22, b"retry", &log).unwrap();
        assert_eq!(server_thread.join().unwrap(), b"retry");
    }

    #[test]
    fn test_duplicate_data_gets_acc_resent_without_advancing() {
        let server_socket = bound_socket();
        let server_addr = server_socket.local_addr().unwrap();
        let peer: SocketAddr = "127.0.0.1:0".parse().unwrap();
        let mut session = Session::new(1, ProtocolId::Udpr, 10, peer);
        session.advance(5);

        let duplicate = ppcb_proto::Data { session_id: 1, packet_number: 0, payload: vec![9u8; 5] };
        match validate_data(&duplicate, session.session_id, session.next_packet_number, session.remaining(), true)
            .unwrap()
        {
            DataCheck::Duplicate => {}
            DataCheck::New => panic!("expected duplicate"),
        }
        let _ = server_addr;
    }
}
