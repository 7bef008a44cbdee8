//! Client entry point: `ppcbc <protocol> <host> <port>`, payload on stdin.
//! A server that closes the connection mid-transfer surfaces as an
//! ordinary I/O error. Rust's runtime already ignores `SIGPIPE` on Unix,
//! so there is no signal-handling setup to do here.

use clap::Parser;
use ppcb_net::{tcp, udp, udpr};
use ppcb_proto::config::{parse_port, resolve_ipv4};
use ppcb_proto::logging;
use ppcb_proto::{ErrorUtils, ProtocolId};
use rand::rngs::OsRng;
use rand::RngCore;
use std::io::{self, Read};
use std::net::{TcpStream, UdpSocket};
use std::process;

/// Sends a byte sequence to a ppcb server.
#[derive(Parser, Debug)]
#[command(name = "ppcbc", version, about)]
struct Args {
    /// tcp, udp, or udpr
    protocol: String,
    /// Server hostname or IPv4 address
    host: String,
    /// Server port
    port: String,
}

fn parse_protocol(value: &str) -> Option<ProtocolId> {
    match value {
        "tcp" => Some(ProtocolId::Tcp),
        "udp" => Some(ProtocolId::Udp),
        "udpr" => Some(ProtocolId::Udpr),
        _ => None,
    }
}

fn read_byte_sequence() -> io::Result<Vec<u8>> {
    let mut buf = Vec::new();
    io::stdin().read_to_end(&mut buf)?;
    Ok(buf)
}

fn generate_session_id() -> u64 {
    OsRng.next_u64()
}

fn main() {
    let args = Args::parse();

    let protocol = match parse_protocol(&args.protocol) {
        Some(protocol) => protocol,
        None => {
            eprintln!("inappropriate protocol: {}", args.protocol);
            process::exit(1);
        }
    };

    let log = logging::init();

    let port = parse_port(&args.port).unwrap_or_else(|e| {
        eprintln!("{}", e);
        process::exit(1);
    });
    let server_addr = resolve_ipv4(&args.host, port).unwrap_or_else(|e| {
        eprintln!("{}", e);
        process::exit(1);
    });

    let payload = read_byte_sequence().unwrap_or_else(|e| {
        eprintln!("failed to read byte sequence from stdin: {}", e);
        process::exit(1);
    });
    if payload.is_empty() {
        eprintln!("refusing to send an empty byte sequence");
        process::exit(1);
    }

    let session_id = generate_session_id();

    let result = match protocol {
        ProtocolId::Tcp => TcpStream::connect(server_addr)
            .map_err(ppcb_proto::Error::from)
            .and_then(|mut stream| tcp::client_send(&mut stream, session_id, &payload, &log)),
        ProtocolId::Udp => UdpSocket::bind("0.0.0.0:0")
            .map_err(ppcb_proto::Error::from)
            .and_then(|socket| udp::client_send(&socket, server_addr, session_id, &payload, &log)),
        ProtocolId::Udpr => UdpSocket::bind("0.0.0.0:0")
            .map_err(ppcb_proto::Error::from)
            .and_then(|socket| udpr::client_send(&socket, server_addr, session_id, &payload, &log)),
    };

    if result.has_failed() {
        if let Err(e) = result {
            eprintln!("transfer failed: {}", e);
        }
        process::exit(1);
    }
}
