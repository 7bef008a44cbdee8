//! TCP session: client state machine `Idle -> Connected -> Acked ->
//! Sending -> Receipted`, server side reading one `CONN`, a run of
//! `DATA`, then replying `RCVD`. Grounded on the shape of
//! `neutronium::net::channel::Channel`, but simplified to direct blocking
//! `TcpStream` calls. There is no poll loop and no handshake timeout
//! state: each side just works through the exchange synchronously.

use crate::io::{read_exact_or_eof, set_tcp_timeout};
use ppcb_proto::logging::{debug, warn, Logger};
use ppcb_proto::validate::{validate_conn, validate_data, validate_response, DataCheck};
use ppcb_proto::wire::{
    Conn, DataHeader, Packet, PacketId, PacketResponse, ProtocolId, Response, CONN_SIZE, DATA_HEADER_SIZE,
    RESPONSE_SIZE,
};
use ppcb_proto::{Error, Kind, Result, Session, MAX_PACKET_SIZE, MAX_WAIT_SECS};
use std::io::{Cursor, Write};
use std::net::TcpStream;
use std::time::Duration;

fn recv_response(stream: &mut TcpStream) -> Result<Response> {
    let mut buf = [0u8; RESPONSE_SIZE];
    let n = read_exact_or_eof(stream, &mut buf)?;
    if n < RESPONSE_SIZE {
        return Err(Error::Fatal(Kind::Eof));
    }

    match Packet::decode(&mut Cursor::new(&buf[..]))? {
        Packet::Response(response) => Ok(response),
        other => Err(Error::Fatal(Kind::UnexpectedPacket {
            context: "awaiting a TCP response",
            id: other.id().as_u8(),
        })),
    }
}

/// Client: connect, send `CONN`, await `CONACC`, stream the payload as a
/// run of `DATA` packets, await the final `RCVD`.
pub fn client_send(stream: &mut TcpStream, session_id: u64, payload: &[u8], log: &Logger) -> Result<()> {
    set_tcp_timeout(stream, Some(Duration::from_secs(MAX_WAIT_SECS)))?;

    let conn = Conn { session_id, protocol_id: ProtocolId::Tcp.as_u8(), byte_sequence_length: payload.len() as u64 };
    Packet::Conn(conn).encode(stream)?;
    debug!(log, "sent CONN"; "session_id" => session_id, "length" => payload.len());

    let conacc = recv_response(stream)?;
    validate_response(&conacc, PacketId::Conacc, session_id)?;
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

        let mut frame = Vec::with_capacity(DATA_HEADER_SIZE + chunk_len);
        Packet::Data(data).encode(&mut frame)?;
        stream.write_all(&frame)?;

        offset += chunk_len;
        packet_number += 1;
    }
    debug!(log, "sent all DATA"; "session_id" => session_id, "packets" => packet_number);

    let rcvd = recv_response(stream)?;
    validate_response(&rcvd, PacketId::Rcvd, session_id)?;
    debug!(log, "received RCVD"; "session_id" => session_id);

    Ok(())
}

/// Server: read and validate one `CONN`, reply, then loop reading `DATA`
/// until the announced length is fully received, writing each payload to
/// `out` and flushing after each one. Any framing error or EOF before
/// completion ends the session silently: no response beyond a rejected
/// packet's explicit `RJT` is sent.
pub fn handle_connection<W: Write>(stream: &mut TcpStream, out: &mut W, log: &Logger) -> Result<()> {
    let mut header = [0u8; CONN_SIZE];
    let n = read_exact_or_eof(stream, &mut header)?;
    if n < CONN_SIZE {
        debug!(log, "tcp session abandoned: short CONN read");
        return Ok(());
    }

    let packet = match Packet::decode(&mut Cursor::new(&header[..])) {
        Ok(packet) => packet,
        Err(_) => {
            debug!(log, "tcp session abandoned: undecodable CONN");
            return Ok(());
        }
    };

    let conn = match packet {
        Packet::Conn(conn) => conn,
        other => {
            debug!(log, "tcp session abandoned: expected CONN"; "id" => other.id().as_u8());
            return Ok(());
        }
    };

    match validate_conn(&conn, &[ProtocolId::Tcp]) {
        Ok(_) => {
            Packet::Response(Response::new(PacketId::Conacc, conn.session_id)).encode(stream)?;
            debug!(log, "accepted CONN"; "session_id" => conn.session_id, "length" => conn.byte_sequence_length);
        }
        Err(_) => {
            warn!(log, "rejected invalid CONN"; "session_id" => conn.session_id);
            let _ = Packet::Response(Response::new(PacketId::Conrjt, conn.session_id)).encode(stream);
            return Ok(());
        }
    }

    let peer_addr = stream.peer_addr()?;
    let mut session = Session::new(conn.session_id, ProtocolId::Tcp, conn.byte_sequence_length, peer_addr);

    loop {
        let mut data_header = [0u8; DATA_HEADER_SIZE];
        let n = read_exact_or_eof(stream, &mut data_header)?;
        if n < DATA_HEADER_SIZE {
            debug!(log, "tcp session abandoned: short DATA header"; "session_id" => session.session_id);
            return Ok(());
        }

        if ppcb_proto::PacketId::from_u8(data_header[0]) != Some(PacketId::Data) {
            debug!(log, "tcp session abandoned: expected DATA"; "session_id" => session.session_id);
            return Ok(());
        }

        let fields = DataHeader::decode(&mut Cursor::new(&data_header[1..]))?;
        let rejected = fields.session_id != session.session_id
            || fields.packet_number != session.next_packet_number
            || fields.payload_length == 0
            || fields.payload_length as usize > MAX_PACKET_SIZE
            || u64::from(fields.payload_length) > session.remaining();

        if rejected {
            warn!(log, "rejecting malformed DATA"; "session_id" => session.session_id, "expected" => session.next_packet_number);
            let _ = Packet::PacketResponse(PacketResponse::new(
                PacketId::Rjt,
                session.session_id,
                session.next_packet_number,
            ))
            .encode(stream);
            return Ok(());
        }

        let mut payload = vec![0u8; fields.payload_length as usize];
        let n = read_exact_or_eof(stream, &mut payload)?;
        if n < payload.len() {
            debug!(log, "tcp session abandoned: short DATA payload"; "session_id" => session.session_id);
            return Ok(());
        }

        // Re-run the general validator for parity with the other transports
        // even though the fields above already enforced the TCP-specific
        // strict ordering rule.
        let data = ppcb_proto::Data { session_id: fields.session_id, packet_number: fields.packet_number, payload };
        match validate_data(&data, session.session_id, session.next_packet_number, session.remaining(), false)? {
            DataCheck::New => {}
            DataCheck::Duplicate => unreachable!("TCP never tolerates duplicates"),
        }

        out.write_all(&data.payload)?;
        out.flush()?;
        session.advance(data.payload.len() as u64);

        if session.is_complete() {
            Packet::Response(Response::new(PacketId::Rcvd, session.session_id)).encode(stream)?;
            debug!(log, "tcp session complete"; "session_id" => session.session_id);
            return Ok(());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ppcb_proto::logging::discard;
    use std::io::Cursor as IoCursor;
    use std::net::{TcpListener, TcpStream};
    use std::thread;

    fn loopback_pair() -> (TcpStream, TcpStream) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let client = thread::spawn(move || TcpStream::connect(addr).unwrap());
        let (server, _) = listener.accept().unwrap();
        (client.join().unwrap(), server)
    }

    #[test]
    fn test_tcp_happy_path_hello() {
        let (mut client, mut server) = loopback_pair();
        let log = discard();

        let server_thread = thread::spawn(move || {
            let mut out = Vec::new();
            handle_connection(&mut server, &mut out, &log).unwrap();
            out
        });

        client_send(&mut client, 1, b"hello", &discard()).unwrap();
        let received = server_thread.join().unwrap();
        assert_eq!(received, b"hello");
    }

    #[test]
    fn test_tcp_rejects_out_of_order_data() {
        let (mut client, mut server) = loopback_pair();
        let log = discard();

        let server_thread = thread::spawn(move || {
            let mut out = Vec::new();
            let result = handle_connection(&mut server, &mut out, &log);
            (result, out)
        });

        set_tcp_timeout(&client, Some(Duration::from_secs(1))).unwrap();
        let conn = Conn { session_id: 9, protocol_id: ProtocolId::Tcp.as_u8(), byte_sequence_length: 3 };
        Packet::Conn(conn).encode(&mut client).unwrap();

        let mut resp_buf = [0u8; RESPONSE_SIZE];
        read_exact_or_eof(&mut client, &mut resp_buf).unwrap();
        match Packet::decode(&mut IoCursor::new(&resp_buf[..])).unwrap() {
            Packet::Response(r) => assert_eq!(r.id, PacketId::Conacc),
            _ => panic!("expected CONACC"),
        }

        // Send DATA with packet_number = 1 instead of the expected 0.
        let bad = ppcb_proto::Data { session_id: 9, packet_number: 1, payload: vec![1, 2, 3] };
        Packet::Data(bad).encode(&mut client).unwrap();

        let mut rjt_buf = [0u8; ppcb_proto::wire::PACKET_RESPONSE_SIZE];
        read_exact_or_eof(&mut client, &mut rjt_buf).unwrap();
        match Packet::decode(&mut IoCursor::new(&rjt_buf[..])).unwrap() {
            Packet::PacketResponse(pr) => {
                assert_eq!(pr.id, PacketId::Rjt);
                assert_eq!(pr.packet_number, 0);
            }
            _ => panic!("expected RJT"),
        }

        let (result, out) = server_thread.join().unwrap();
        assert!(result.is_ok());
        assert!(out.is_empty());
    }

    #[test]
    fn test_tcp_boundary_max_packet_size() {
        let (mut client, mut server) = loopback_pair();
        let log = discard();
        let payload = vec![b'x'; MAX_PACKET_SIZE];
        let expected = payload.clone();

        let server_thread = thread::spawn(move || {
            let mut out = Vec::new();
            handle_connection(&mut server, &mut out, &log).unwrap();
            out
        });

        client_send(&mut client, 2, &payload, &discard()).unwrap();
        assert_eq!(server_thread.join().unwrap(), expected);
    }

    #[test]
    fn test_tcp_boundary_max_packet_size_plus_one_splits_in_two() {
        let (mut client, mut server) = loopback_pair();
        let log = discard();
        let payload = vec![b'x'; MAX_PACKET_SIZE + 1];
        let expected = payload.clone();

        let server_thread = thread::spawn(move || {
            let mut out = Vec::new();
            handle_connection(&mut server, &mut out, &log).unwrap();
            out
        });

        client_send(&mut client, 3, &payload, &discard()).unwrap();
        assert_eq!(server_thread.join().unwrap(), expected);
    }
}
