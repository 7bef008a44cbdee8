//! Server entry point: `ppcbs <protocol> <port>`. Received bytes are
//! written straight to stdout, unbuffered beyond what `Stdout` itself
//! does, so a downstream pipe sees them as they arrive.

use clap::Parser;
use ppcb_net::dispatch;
use ppcb_proto::config::parse_port;
use ppcb_proto::{logging, ProtocolId, QUEUE_LENGTH};
use socket2::{Domain, Socket, Type};
use std::io;
use std::net::{SocketAddr, TcpListener, UdpSocket};
use std::process;

/// Receives a byte sequence over ppcb and writes it to stdout.
#[derive(Parser, Debug)]
#[command(name = "ppcbs", version, about)]
struct Args {
    /// tcp, udp, or udpr
    protocol: String,
    /// Port to listen on
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

/// Binds and listens with the original implementation's exact backlog
/// instead of whatever `std::net::TcpListener::bind` picks implicitly.
fn bind_tcp_listener(addr: SocketAddr) -> io::Result<TcpListener> {
    let socket = Socket::new(Domain::for_address(addr), Type::STREAM, None)?;
    socket.set_reuse_address(true)?;
    socket.bind(&addr.into())?;
    socket.listen(QUEUE_LENGTH)?;
    Ok(socket.into())
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
    let port = parse_port(&args.port).unwrap_or_else(|e| {
        eprintln!("{}", e);
        process::exit(1);
    });

    let log = logging::init();
    let bind_addr = SocketAddr::from(([0, 0, 0, 0], port));
    let stdout = io::stdout();

    let result = match protocol {
        ProtocolId::Tcp => bind_tcp_listener(bind_addr)
            .map_err(ppcb_proto::Error::from)
            .and_then(|listener| dispatch::run_tcp_server(&listener, stdout.lock(), &log)),
        ProtocolId::Udp | ProtocolId::Udpr => UdpSocket::bind(bind_addr)
            .map_err(ppcb_proto::Error::from)
            .and_then(|socket| dispatch::run_datagram_server(&socket, protocol, stdout.lock(), &log)),
    };

    if let Err(e) = result {
        eprintln!("server terminated: {}", e);
        process::exit(1);
    }
}
