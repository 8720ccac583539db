// Client side of TFTP (RFC 1350), octet mode only.
//
// Every packet starts with a 2-byte opcode:
//
// 1        Read req (RRQ)
// 2        Write req (WRQ)
// 3        Data (DATA)
// 4        ACK
// 5        ERROR
//
// RRQ/WRQ packet format:
// 0x01/0x02 | Filename | 0x00 | Mode | 0x00
//
// DATA packet:
// 0x03 | Block # (2 bytes) | Data (0-512 bytes)
//
// ACK packet format:
// 0x04 | Block # (2 bytes)
//
// ERROR packet format:
// 0x05 | ErrorCode (2 bytes) | ErrMsg | 0x00
//
// The requester sends its RRQ/WRQ to the well-known port. The server answers from a port chosen
// for this transfer alone, and every later packet of the transfer goes to that port.
//
// A DATA packet shorter than 512 bytes ends the transfer, so a file whose size is an exact
// multiple of 512 is followed by one empty DATA packet.

use async_io::Async;
use std::error;
use std::fmt;
use std::io;
use std::net::{SocketAddr, UdpSocket};
use std::time::Duration;
use tokio::time::error::Elapsed;
use tokio::time::timeout;

/// Maximum number of payload bytes carried by one DATA packet.
pub const DATA_BUFFER_SIZE: usize = 512;

/// Largest datagram a peer may legitimately send us: 4 header bytes plus a full data block.
pub const MAX_PACKET_SIZE: usize = DATA_BUFFER_SIZE + 4;

/// The only transfer mode this client speaks.
pub const OCTET_MODE: &str = "octet";

///////////////////////////////////////////////////////////////
// Error-handling objects

/// Represents a failure to convert between a Packet and its wire representation.
#[derive(Debug, PartialEq)]
pub enum PacketError {
    /// The bytes received are not a recognised TFTP message.
    Malformed(String),

    /// The packet value cannot be put on the wire as-is.
    Unencodable(String),
}

impl error::Error for PacketError {}

impl fmt::Display for PacketError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            PacketError::Malformed(e) => write!(f, "Malformed packet: {}", e),
            PacketError::Unencodable(e) => write!(f, "Cannot encode packet: {}", e),
        }
    }
}

/// Represents an error returned from the TFTP Socket handler
#[derive(Debug)]
pub enum SocketError {
    IO(io::Error),
    PacketParse(PacketError),
    Timeout(Elapsed),
}

impl error::Error for SocketError {}

impl fmt::Display for SocketError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            SocketError::IO(e) => write!(f, "Socket IO error: {}", e),
            SocketError::PacketParse(e) => write!(f, "Packet parsing error: {}", e),
            SocketError::Timeout(_) => write!(f, "Socket IO timeout"),
        }
    }
}

impl From<io::Error> for SocketError {
    fn from(e: io::Error) -> Self {
        SocketError::IO(e)
    }
}

impl From<Elapsed> for SocketError {
    fn from(e: Elapsed) -> Self {
        SocketError::Timeout(e)
    }
}

impl From<PacketError> for SocketError {
    fn from(e: PacketError) -> Self {
        SocketError::PacketParse(e)
    }
}

type PacketResult<T> = Result<T, PacketError>;
type TftpResult<T> = Result<T, SocketError>;

/// The TFTP opcode, serialized as the first two bytes of every packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpCode { Rrq = 1, Wrq = 2, Data = 3, Ack = 4, Error = 5 }

impl OpCode {
    fn from_u16(raw: u16) -> Option<OpCode> {
        match raw {
            1 => Some(OpCode::Rrq),
            2 => Some(OpCode::Wrq),
            3 => Some(OpCode::Data),
            4 => Some(OpCode::Ack),
            5 => Some(OpCode::Error),
            _ => None,
        }
    }
}

/// Represents a TFTP Error code surfaced by a TFTP Error packet
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    Undefined,
    FileNotFound,
    AccessViolation,
    DiskFull,
    IllegalOperation,
    UnknownTid,
    FileAlreadyExists,
    NoSuchUser,
    /// A code outside the range defined by RFC 1350, kept verbatim.
    Unknown(u16),
}

impl From<u16> for ErrorCode {
    fn from(raw: u16) -> Self {
        match raw {
            0 => ErrorCode::Undefined,
            1 => ErrorCode::FileNotFound,
            2 => ErrorCode::AccessViolation,
            3 => ErrorCode::DiskFull,
            4 => ErrorCode::IllegalOperation,
            5 => ErrorCode::UnknownTid,
            6 => ErrorCode::FileAlreadyExists,
            7 => ErrorCode::NoSuchUser,
            n => ErrorCode::Unknown(n),
        }
    }
}

impl From<ErrorCode> for u16 {
    fn from(code: ErrorCode) -> u16 {
        match code {
            ErrorCode::Undefined => 0,
            ErrorCode::FileNotFound => 1,
            ErrorCode::AccessViolation => 2,
            ErrorCode::DiskFull => 3,
            ErrorCode::IllegalOperation => 4,
            ErrorCode::UnknownTid => 5,
            ErrorCode::FileAlreadyExists => 6,
            ErrorCode::NoSuchUser => 7,
            ErrorCode::Unknown(n) => n,
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            ErrorCode::Undefined => write!(f, "not defined"),
            ErrorCode::FileNotFound => write!(f, "file not found"),
            ErrorCode::AccessViolation => write!(f, "access violation"),
            ErrorCode::DiskFull => write!(f, "disk full or allocation exceeded"),
            ErrorCode::IllegalOperation => write!(f, "illegal TFTP operation"),
            ErrorCode::UnknownTid => write!(f, "unknown transfer ID"),
            ErrorCode::FileAlreadyExists => write!(f, "file already exists"),
            ErrorCode::NoSuchUser => write!(f, "no such user"),
            ErrorCode::Unknown(n) => write!(f, "unknown error code {n}"),
        }
    }
}

/// An enum representing a TFTP packet and its associated data.
///
/// Requests always carry the octet mode, so the mode is implied rather than stored.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Packet {
    /// A read request packet
    ReadReq {
        /// The file the client wants to read.
        filename: String,
    },

    /// A write request packet
    WriteReq {
        filename: String,
    },

    /// A data packet
    Data {
        /// The block number for this data packet.
        block: u16,

        /// The contents of the data itself.
        data: Vec<u8>,
    },

    /// An acknowledgment packet
    Ack {
        /// The block being acknowledged.
        block: u16,
    },

    /// An error packet.
    Error {
        code: u16,
        message: String,
    },
}

/// Encodes a 16 bit unsigned value into its two byte, big-endian wire form.
pub fn encode_u16(value: u16) -> [u8; 2] {
    [(value >> 8) as u8, (value & 0xFF) as u8]
}

/// Reassembles a big-endian 16 bit unsigned value from the first two bytes of `buf`.
pub fn decode_u16(buf: &[u8]) -> u16 {
    (u16::from(buf[0]) << 8) | u16::from(buf[1])
}

/// Given a buffer, assumes the string begins at the beginning of the buffer and concatenates until
/// it finds a 0 byte, which it assumes terminates the string.
///
/// Returns the string extracted from the buffer as well as the position of the 0 byte in the
/// buffer it was given (or the size of the buffer, if no 0 byte was encountered)
fn string_from_buffer(buf: &[u8]) -> (String, usize) {
    match buf.iter().position(|&c| c == 0x00) {
        Some(end) => (buf[..end].iter().map(|&c| char::from(c)).collect(), end),
        None => (buf.iter().map(|&c| char::from(c)).collect(), buf.len()),
    }
}

fn push_netascii(buf: &mut Vec<u8>, field: &str, s: &str) -> PacketResult<()> {
    if !s.is_ascii() || s.contains('\0') {
        return Err(PacketError::Unencodable(format!(
            "{field} must be ASCII without NUL bytes: {s:?}"
        )));
    }
    buf.extend_from_slice(s.as_bytes());
    buf.push(0x00);
    Ok(())
}

fn parse_filename_and_mode(buf: &[u8]) -> PacketResult<String> {
    let (filename, filename_end) = string_from_buffer(buf);

    if filename_end == buf.len() {
        return Err(PacketError::Malformed("Request does not contain a mode, but it needs to!".to_string()));
    }

    let (raw_mode, mode_end) = string_from_buffer(&buf[filename_end + 1..]);

    if filename_end + 1 + mode_end >= buf.len() {
        return Err(PacketError::Malformed("Mode must be terminated with a null byte!".to_string()));
    }

    if !raw_mode.eq_ignore_ascii_case(OCTET_MODE) {
        return Err(PacketError::Malformed(format!("Unsupported file mode: '{raw_mode}'")));
    }

    Ok(filename)
}

fn parse_read_req(buf: &[u8]) -> PacketResult<Packet> {
    let filename = parse_filename_and_mode(&buf[2..])?;
    Ok(Packet::ReadReq { filename })
}

fn parse_write_req(buf: &[u8]) -> PacketResult<Packet> {
    let filename = parse_filename_and_mode(&buf[2..])?;
    Ok(Packet::WriteReq { filename })
}

fn parse_data(buf: &[u8]) -> PacketResult<Packet> {
    let block = decode_u16(&buf[2..4]);
    let payload = &buf[4..];
    if payload.len() > DATA_BUFFER_SIZE {
        return Err(PacketError::Malformed(format!(
            "Data block {block} holds {} bytes, at most {DATA_BUFFER_SIZE} are allowed",
            payload.len()
        )));
    }
    Ok(Packet::Data { block, data: Vec::from(payload) })
}

fn parse_ack(buf: &[u8]) -> PacketResult<Packet> {
    let block = decode_u16(&buf[2..4]);
    Ok(Packet::Ack { block })
}

fn parse_error(buf: &[u8]) -> PacketResult<Packet> {
    let code = decode_u16(&buf[2..4]);
    let (message, _) = string_from_buffer(&buf[4..]);
    Ok(Packet::Error { code, message })
}

impl Packet {
    pub fn opcode(&self) -> OpCode {
        match self {
            Packet::ReadReq { .. } => OpCode::Rrq,
            Packet::WriteReq { .. } => OpCode::Wrq,
            Packet::Data { .. } => OpCode::Data,
            Packet::Ack { .. } => OpCode::Ack,
            Packet::Error { .. } => OpCode::Error,
        }
    }

    /// Serializes the packet into the bytes that go into a single datagram.
    pub fn encode(&self) -> PacketResult<Vec<u8>> {
        let mut buf = Vec::with_capacity(MAX_PACKET_SIZE);
        buf.extend_from_slice(&encode_u16(self.opcode() as u16));

        match self {
            Packet::ReadReq { filename } | Packet::WriteReq { filename } => {
                push_netascii(&mut buf, "filename", filename)?;
                push_netascii(&mut buf, "mode", OCTET_MODE)?;
            }
            Packet::Data { block, data } => {
                if data.len() > DATA_BUFFER_SIZE {
                    return Err(PacketError::Unencodable(format!(
                        "data block {block} holds {} bytes, at most {DATA_BUFFER_SIZE} are allowed",
                        data.len()
                    )));
                }
                buf.extend_from_slice(&encode_u16(*block));
                buf.extend_from_slice(data);
            }
            Packet::Ack { block } => {
                buf.extend_from_slice(&encode_u16(*block));
            }
            Packet::Error { code, message } => {
                buf.extend_from_slice(&encode_u16(*code));
                push_netascii(&mut buf, "error message", message)?;
            }
        }

        Ok(buf)
    }

    /// Parses one received datagram. `buf` must be exactly the bytes that were received.
    pub fn decode(buf: &[u8]) -> PacketResult<Packet> {
        if buf.len() < 4 {
            return Err(PacketError::Malformed(format!("Packet too short! ({} bytes)", buf.len())));
        }

        let rawcode = decode_u16(&buf[..2]);
        match OpCode::from_u16(rawcode) {
            Some(OpCode::Rrq) => parse_read_req(buf),
            Some(OpCode::Wrq) => parse_write_req(buf),
            Some(OpCode::Data) => parse_data(buf),
            Some(OpCode::Ack) => parse_ack(buf),
            Some(OpCode::Error) => parse_error(buf),
            None => Err(PacketError::Malformed(format!("Unknown opcode retrieved: {rawcode}"))),
        }
    }
}

///////////////////////////////////////////////////////////////
/// Wrapper around a UDP socket that parses TFTP headers and
/// returns the packets in a more structured format.
pub struct TftpSocket {
    sock: Async<UdpSocket>,
}

impl TftpSocket {
    pub fn bind(addr: SocketAddr) -> TftpResult<TftpSocket> {
        Ok(TftpSocket {
            sock: Async::<UdpSocket>::bind(addr)?,
        })
    }

    pub fn local_addr(&self) -> TftpResult<SocketAddr> {
        Ok(self.sock.get_ref().local_addr()?)
    }

    pub async fn send(&mut self, packet: &Packet, dst: SocketAddr) -> TftpResult<()> {
        let buf = packet.encode()?;
        self.sock.send_to(&buf, dst).await?;
        Ok(())
    }

    /// Waits for one datagram, forever if `ttl` is `None`.
    pub async fn recv(&mut self, ttl: Option<Duration>) -> TftpResult<(Packet, SocketAddr)> {
        let mut buf = [0; MAX_PACKET_SIZE];
        let (total_written, src) = match ttl {
            Some(ttl) => timeout(ttl, self.sock.recv_from(&mut buf)).await??,
            None => self.sock.recv_from(&mut buf).await?,
        };

        let packet = Packet::decode(&buf[..total_written])?;
        Ok((packet, src))
    }
}
