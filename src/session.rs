// A Session is the transport half of one transfer. It owns the socket bound for the transfer and
// remembers which port the server is talking to us from.
//
// Requests go to the server's well-known port. The server answers from a port it picked for
// this transfer, and the first DATA (block 1) or ACK (block 0) it sends tells us which one.
// From then on every packet goes to that port, until the transfer ends and the session is reset.

use crate::config::TransferOptions;
use crate::tftp::{Packet, PacketError, SocketError, TftpSocket};
use rand::Rng;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use std::time::Duration;
use tokio::time::Instant;

/// How many random ports are tried before giving up on binding.
const BIND_ATTEMPTS: usize = 16;

pub struct Session {
    sock: TftpSocket,

    /// The server's address, with the well-known port it was reached on.
    server: SocketAddr,

    /// The port packets are currently sent to.
    remote_port: u16,

    /// How long a receive may wait before failing.
    timeout: Option<Duration>,
}

/// Attempts to bind to a random unprivileged UDP port until one succeeds.
fn bind_random_socket(ip: IpAddr) -> Result<TftpSocket, SocketError> {
    let mut rng = rand::thread_rng();
    let mut last_err = None;
    for _ in 0..BIND_ATTEMPTS {
        match TftpSocket::bind((ip, rng.gen_range(1024..65535)).into()) {
            Ok(sock) => return Ok(sock),
            Err(e) => {
                log::warn!("Couldn't bind socket: {}", e);
                last_err = Some(e);
            }
        }
    }
    // Let the OS choose if every random pick was taken.
    match TftpSocket::bind((ip, 0).into()) {
        Ok(sock) => Ok(sock),
        Err(e) => Err(last_err.unwrap_or(e)),
    }
}

impl Session {
    /// Binds a local endpoint suitable for talking to `server`.
    pub fn bind(server: SocketAddr, options: &TransferOptions) -> Result<Session, SocketError> {
        let ip = match server {
            SocketAddr::V4(_) => IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            SocketAddr::V6(_) => IpAddr::V6(Ipv6Addr::UNSPECIFIED),
        };
        let sock = match options.local_port {
            Some(port) => TftpSocket::bind((ip, port).into())?,
            None => bind_random_socket(ip)?,
        };
        log::debug!("Bound {} for transfer with {}", sock.local_addr()?, server);

        Ok(Session {
            sock,
            server,
            remote_port: server.port(),
            timeout: options.timeout,
        })
    }

    pub fn remote_port(&self) -> u16 {
        self.remote_port
    }

    pub fn local_addr(&self) -> Result<SocketAddr, SocketError> {
        self.sock.local_addr()
    }

    /// Points the session back at the well-known port, ready for the next transfer.
    pub fn reset(&mut self) {
        self.remote_port = self.server.port();
    }

    pub async fn send(&mut self, packet: &Packet) -> Result<(), SocketError> {
        let dst = SocketAddr::new(self.server.ip(), self.remote_port);
        log::debug!("Sending {:?} to {}", packet, dst);
        self.sock.send(packet, dst).await
    }

    /// When a wait starting now should give up, or `None` to wait forever.
    pub fn deadline(&self) -> Option<Instant> {
        self.timeout.map(|timeout| Instant::now() + timeout)
    }

    /// Waits for the next packet from the server, for at most the configured timeout.
    pub async fn receive(&mut self) -> Result<Packet, SocketError> {
        let deadline = self.deadline();
        self.receive_until(deadline).await
    }

    /// Waits for the next packet from the server until `deadline` passes.
    ///
    /// A server never sends requests to a client, so those are rejected like any other
    /// unrecognised datagram.
    pub async fn receive_until(&mut self, deadline: Option<Instant>) -> Result<Packet, SocketError> {
        let ttl = deadline.map(|deadline| deadline.saturating_duration_since(Instant::now()));
        let (packet, src) = self.sock.recv(ttl).await?;
        log::debug!("Got packet from {}: {:?}", src, packet);

        match packet {
            Packet::ReadReq { .. } | Packet::WriteReq { .. } => {
                return Err(SocketError::PacketParse(PacketError::Malformed(format!(
                    "Unexpected {:?} request received from {}",
                    packet.opcode(),
                    src
                ))));
            }
            Packet::Data { block: 1, .. } | Packet::Ack { block: 0 } => {
                if src.port() != self.remote_port {
                    log::debug!("Server switched transfer to port {}", src.port());
                }
                self.remote_port = src.port();
            }
            _ => {}
        }

        Ok(packet)
    }
}
