//! Top-level server loops: one per transport, each blocking and
//! single-threaded. A session fully runs to completion (or failure)
//! before the server goes back to waiting for the next `CONN`. There is
//! no concurrent session handling, a fully synchronous model in place
//! of a nonblocking, multiplexed poll loop.

use crate::io::{recv_datagram, set_udp_timeout};
use crate::{tcp, udp, udpr};
use ppcb_proto::logging::{debug, info, warn, Logger};
use ppcb_proto::validate::validate_conn;
use ppcb_proto::wire::{Conn, Packet, PacketId, Response};
use ppcb_proto::{Error, ProtocolId, Result, Session, BUFFER_SIZE};
use std::io::{Cursor, Write};
use std::net::{TcpListener, UdpSocket};

/// Accept loop for TCP. Each connection is handled to completion, one at
/// a time; further clients queue in the listen backlog until the current
/// session ends.
pub fn run_tcp_server<W: Write>(listener: &TcpListener, mut out: W, log: &Logger) -> Result<()> {
    info!(log, "tcp server listening"; "addr" => %listener.local_addr()?);
    loop {
        let (mut stream, peer) = listener.accept()?;
        debug!(log, "accepted tcp connection"; "peer" => %peer);
        if let Err(e) = tcp::handle_connection(&mut stream, &mut out, log) {
            warn!(log, "tcp session ended with an error"; "peer" => %peer, "error" => %e);
        }
    }
}

/// Shared receive loop for UDP and UDPR. Both share the same idle-state
/// framing: wait (blocking, no timeout) for a `CONN`; a valid one starts a
/// session and runs it to completion; anything else while idle is a
/// stray and gets the stray-peer reply without starting anything.
pub fn run_datagram_server<W: Write>(socket: &UdpSocket, protocol: ProtocolId, mut out: W, log: &Logger) -> Result<()> {
    info!(log, "datagram server listening"; "addr" => %socket.local_addr()?, "protocol" => ?protocol);
    loop {
        set_udp_timeout(socket, None)?;
        let mut buf = [0u8; BUFFER_SIZE];
        let (n, from) = recv_datagram(socket, &mut buf)?;

        let packet = match Packet::decode(&mut Cursor::new(&buf[..n])) {
            Ok(packet) => packet,
            Err(_) => continue,
        };

        match packet {
            Packet::Conn(conn) => handle_conn(socket, protocol, conn, from, &mut out, log),
            Packet::Data(data) => {
                warn!(log, "stray DATA while idle"; "peer" => %from, "packet_number" => data.packet_number);
                udp::send_stray_rjt(socket, from, data.packet_number)
            }
            other => {
                debug!(log, "ignoring unexpected packet while idle"; "peer" => %from, "id" => other.id().as_u8());
                Ok(())
            }
        }?;
    }
}

fn handle_conn<W: Write>(
    socket: &UdpSocket,
    protocol: ProtocolId,
    conn: Conn,
    from: std::net::SocketAddr,
    out: &mut W,
    log: &Logger,
) -> Result<()> {
    match validate_conn(&conn, &[protocol]) {
        Ok(_) => {
            debug!(log, "accepted CONN"; "session_id" => conn.session_id, "peer" => %from);
            let mut session = Session::new(conn.session_id, protocol, conn.byte_sequence_length, from);

            let result = match protocol {
                ProtocolId::Udp => {
                    udp::send_conacc(socket, from, conn.session_id)?;
                    run_udp_session(socket, &mut session, out, log)
                }
                ProtocolId::Udpr => {
                    let mut conacc_frame = Vec::new();
                    Packet::Response(Response::new(PacketId::Conacc, conn.session_id)).encode(&mut conacc_frame)?;
                    udpr::run_session(socket, &mut session, &conacc_frame, out, log)
                }
                ProtocolId::Tcp => unreachable!("datagram server never handles TCP"),
            };
            if let Err(e) = &result {
                warn!(log, "session ended with an error"; "session_id" => conn.session_id, "error" => %e);
            }
            Ok(())
        }
        Err(_) => {
            warn!(log, "rejected invalid CONN"; "session_id" => conn.session_id, "peer" => %from);
            udp::send_conrjt(socket, from, conn.session_id)
        }
    }
}

fn run_udp_session<W: Write>(socket: &UdpSocket, session: &mut Session, out: &mut W, log: &Logger) -> Result<()> {
    use std::time::Duration;
    set_udp_timeout(socket, Some(Duration::from_secs(ppcb_proto::MAX_WAIT_SECS)))?;

    while !session.is_complete() {
        let mut buf = [0u8; BUFFER_SIZE];
        let (n, from) = match recv_datagram(socket, &mut buf) {
            Ok(pair) => pair,
            Err(Error::Wait) => return Err(Error::Fatal(ppcb_proto::Kind::Eof)),
            Err(e) => return Err(e),
        };

        if from != session.peer_addr {
            if let Ok(packet) = Packet::decode(&mut Cursor::new(&buf[..n])) {
                match packet {
                    Packet::Conn(stray) => udp::send_conrjt(socket, from, stray.session_id)?,
                    Packet::Data(stray) => udp::send_stray_rjt(socket, from, stray.packet_number)?,
                    _ => {}
                }
            }
            continue;
        }

        match udp::recv_one(socket, session, &buf[..n], from, out, log)? {
            Some(()) => {}
            None => unreachable!("from == session.peer_addr was already checked"),
        }
    }

    udp::send_rcvd(socket, session.peer_addr, session.session_id)
}
