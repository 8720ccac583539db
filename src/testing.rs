//! A scripted TFTP server on the loopback interface, for exercising the client end to end.
//!
//! The server listens on one socket standing in for the well-known port and answers from a
//! second one, the way a real server hands each transfer its own port.

use crate::tftp::{Packet, MAX_PACKET_SIZE};
use std::net::{Ipv4Addr, SocketAddr, UdpSocket};
use std::panic;
use std::thread::{self, JoinHandle};
use std::time::Duration;

const SERVER_TIMEOUT: Duration = Duration::from_secs(3);

pub struct ServerCtx {
    listener: UdpSocket,
    transfer: UdpSocket,
    client: Option<SocketAddr>,
}

fn recv_on(sock: &UdpSocket) -> (Packet, SocketAddr) {
    let mut buf = [0; MAX_PACKET_SIZE];
    let (len, src) = sock.recv_from(&mut buf).expect("fake server timed out waiting for the client");
    let packet = Packet::decode(&buf[..len]).expect("client sent an undecodable packet");
    (packet, src)
}

fn try_recv_on(sock: &UdpSocket, wait: Duration) -> Option<Packet> {
    sock.set_read_timeout(Some(wait)).expect("set timeout");
    let mut buf = [0; MAX_PACKET_SIZE];
    let received = sock.recv_from(&mut buf).ok();
    sock.set_read_timeout(Some(SERVER_TIMEOUT)).expect("set timeout");
    received.map(|(len, _)| Packet::decode(&buf[..len]).expect("client sent an undecodable packet"))
}

impl ServerCtx {
    /// Receives the next packet on the well-known port and remembers who sent it.
    pub fn recv_request(&mut self) -> (Packet, SocketAddr) {
        let (packet, src) = recv_on(&self.listener);
        self.client = Some(src);
        (packet, src)
    }

    /// Receives the next packet on the transfer port.
    pub fn recv_transfer(&mut self) -> (Packet, SocketAddr) {
        recv_on(&self.transfer)
    }

    /// Like `recv_request`, but returns `None` if nothing arrives within `wait`.
    pub fn try_recv_request(&mut self, wait: Duration) -> Option<Packet> {
        try_recv_on(&self.listener, wait)
    }

    /// Like `recv_transfer`, but returns `None` if nothing arrives within `wait`.
    pub fn try_recv_transfer(&mut self, wait: Duration) -> Option<Packet> {
        try_recv_on(&self.transfer, wait)
    }

    /// Sends a packet to the client from the transfer port.
    pub fn reply(&self, packet: &Packet) {
        self.reply_raw(&packet.encode().expect("fake server packet must encode"));
    }

    /// Like `reply`, but reports failure instead of panicking, for a client that may be gone.
    pub fn try_reply(&self, packet: &Packet) -> bool {
        match (self.client, packet.encode()) {
            (Some(client), Ok(buf)) => self.transfer.send_to(&buf, client).is_ok(),
            _ => false,
        }
    }

    pub fn reply_raw(&self, buf: &[u8]) {
        let client = self.client.expect("no request received yet");
        self.transfer.send_to(buf, client).expect("fake server send");
    }

    /// Sends a packet to the client from the well-known port.
    pub fn reply_from_listener(&self, packet: &Packet) {
        let client = self.client.expect("no request received yet");
        let buf = packet.encode().expect("fake server packet must encode");
        self.listener.send_to(&buf, client).expect("fake server send");
    }
}

pub struct FakeServer {
    addr: SocketAddr,
    transfer_port: u16,
    handle: JoinHandle<()>,
}

impl FakeServer {
    pub fn start<F>(script: F) -> FakeServer
    where
        F: FnOnce(&mut ServerCtx) + Send + 'static,
    {
        let listener = UdpSocket::bind((Ipv4Addr::LOCALHOST, 0)).expect("bind listener");
        let transfer = UdpSocket::bind((Ipv4Addr::LOCALHOST, 0)).expect("bind transfer socket");
        listener.set_read_timeout(Some(SERVER_TIMEOUT)).expect("set timeout");
        transfer.set_read_timeout(Some(SERVER_TIMEOUT)).expect("set timeout");

        let addr = listener.local_addr().expect("listener address");
        let transfer_port = transfer.local_addr().expect("transfer address").port();

        let handle = thread::spawn(move || {
            let mut ctx = ServerCtx { listener, transfer, client: None };
            script(&mut ctx);
        });

        FakeServer { addr, transfer_port, handle }
    }

    /// The well-known address requests are sent to.
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    pub fn transfer_port(&self) -> u16 {
        self.transfer_port
    }

    /// Waits for the script to finish, re-raising any assertion it failed.
    pub fn join(self) {
        if let Err(e) = self.handle.join() {
            panic::resume_unwind(e);
        }
    }
}
