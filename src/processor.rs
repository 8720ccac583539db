use crate::tftp::{self, ErrorCode, Packet, PacketError, SocketError};
use std::error;
use std::fmt;
use std::io;
use std::path::PathBuf;

/// Why a transfer was abandoned.
#[derive(Debug)]
pub enum TransferError {
    /// The server sent a datagram that is not a TFTP message we understand.
    MalformedPacket(String),

    /// The server ended the transfer with an ERROR packet.
    ServerError { code: u16, message: String },

    /// The server replied with the wrong packet type or block number.
    ProtocolViolation(String),

    /// The local file to upload does not exist.
    FileNotFound(PathBuf),

    /// A request could not be put on the wire, e.g. a non-ASCII filename.
    Unencodable(String),

    /// Socket or local file I/O failed.
    Io(io::Error),

    /// The server stopped answering.
    Timeout,
}

impl error::Error for TransferError {}

impl fmt::Display for TransferError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::MalformedPacket(msg) => write!(f, "Malformed packet: {}", msg),
            Self::ServerError { code, message } => {
                write!(f, "Server: {} ({}, code {})", message, ErrorCode::from(*code), code)
            }
            Self::ProtocolViolation(msg) => write!(f, "Server error: {}", msg),
            Self::FileNotFound(path) => write!(f, "File does not exist: {}", path.display()),
            Self::Unencodable(msg) => write!(f, "Invalid request: {}", msg),
            Self::Io(e) => write!(f, "I/O error: {}", e),
            Self::Timeout => write!(f, "Timed out waiting for the server"),
        }
    }
}

impl From<io::Error> for TransferError {
    fn from(e: io::Error) -> TransferError {
        TransferError::Io(e)
    }
}

impl From<SocketError> for TransferError {
    fn from(e: SocketError) -> TransferError {
        match e {
            SocketError::IO(e) => TransferError::Io(e),
            SocketError::PacketParse(PacketError::Malformed(msg)) => TransferError::MalformedPacket(msg),
            SocketError::PacketParse(PacketError::Unencodable(msg)) => TransferError::Unencodable(msg),
            SocketError::Timeout(_) => TransferError::Timeout,
        }
    }
}

/// Number of DATA packets needed to carry `len` bytes. A length that is an exact multiple of the
/// block size (zero included) needs one extra, empty, block to mark the end.
pub fn block_count(len: usize) -> usize {
    len / tftp::DATA_BUFFER_SIZE + 1
}

/// Splits file contents into the payloads of consecutive DATA packets.
pub fn split_blocks(data: &[u8]) -> impl Iterator<Item = &[u8]> {
    (0..block_count(data.len())).map(move |index| block_slice(data, index))
}

fn block_slice(data: &[u8], index: usize) -> &[u8] {
    let start = index * tftp::DATA_BUFFER_SIZE;
    let end = (start + tftp::DATA_BUFFER_SIZE).min(data.len());
    &data[start..end]
}

/// One side of a transfer, fed one packet at a time.
#[derive(Debug)]
pub enum PacketProcessor {
    Download(DownloadProcessor),
    Upload(UploadProcessor),
}

impl PacketProcessor {
    pub fn new_download(filename: &str) -> PacketProcessor {
        PacketProcessor::Download(DownloadProcessor::new(filename))
    }

    pub fn new_upload(filename: &str, data: Vec<u8>) -> PacketProcessor {
        PacketProcessor::Upload(UploadProcessor::new(filename, data))
    }

    /// The request that opens the transfer.
    pub fn first_packet(&self) -> Packet {
        match self {
            PacketProcessor::Download(p) => Packet::ReadReq { filename: p.filename.clone() },
            PacketProcessor::Upload(p) => Packet::WriteReq { filename: p.filename.clone() },
        }
    }

    /// The file contents received from the server. Uploads receive nothing.
    pub fn into_received(self) -> Vec<u8> {
        match self {
            PacketProcessor::Download(p) => p.into_data(),
            PacketProcessor::Upload(_) => Vec::new(),
        }
    }

    /// Given an incoming packet, processes it and describes the action the caller should take.
    pub fn process_packet(&mut self, packet: &Packet) -> Result<ResultAction, TransferError> {
        match self {
            PacketProcessor::Download(p) => p.process_data(packet),
            PacketProcessor::Upload(p) => p.process_ack(packet),
        }
    }
}

/// Represents an action that the caller of PacketProcessor should take in
/// response to processing a packet.
#[derive(Debug, PartialEq)]
pub enum ResultAction {
    /// Caller should send the packet and await a response.
    SendPacketAndAwait(Packet),

    /// Caller should ignore the packet and keep waiting.
    RetryRecv,

    /// Caller should send the packet and finish the transfer.
    TerminateWithPacket(Packet),

    /// The transfer is complete, nothing left to send.
    CloseConnection,
}

#[derive(Debug)]
pub struct DownloadProcessor {
    filename: String,
    data: Vec<u8>,
    /// The last block appended to `data`.
    curr_block: u16,
    /// Whether any block has been appended yet. Block numbers wrap, so `curr_block == 0` alone
    /// does not say so.
    received_any: bool,
}

impl DownloadProcessor {
    fn new(filename: &str) -> DownloadProcessor {
        DownloadProcessor {
            filename: filename.to_string(),
            data: Vec::new(),
            curr_block: 0,
            received_any: false,
        }
    }

    /// Everything received so far, in block order.
    pub fn into_data(self) -> Vec<u8> {
        self.data
    }

    fn process_data(&mut self, packet: &Packet) -> Result<ResultAction, TransferError> {
        match packet {
            Packet::Data { block, data } => {
                match *block {
                    block if block == self.curr_block.wrapping_add(1) => {
                        self.data.extend_from_slice(data);
                        self.curr_block = block;
                        self.received_any = true;
                        let ack = Packet::Ack { block };

                        if data.len() < tftp::DATA_BUFFER_SIZE {
                            log::debug!("Final block {} received, {} bytes in total", block, self.data.len());
                            Ok(ResultAction::TerminateWithPacket(ack))
                        } else {
                            Ok(ResultAction::SendPacketAndAwait(ack))
                        }
                    }
                    block if block == self.curr_block && self.received_any => {
                        // The server missed our ACK and sent the block again.
                        log::debug!("Duplicate data block {}, acknowledging again", block);
                        Ok(ResultAction::SendPacketAndAwait(Packet::Ack { block }))
                    }
                    block => Err(TransferError::ProtocolViolation(format!(
                        "Data blocks must arrive in sequence. Received block {block}, but the last block received was {cb}",
                        cb = self.curr_block
                    ))),
                }
            }
            Packet::Error { code, message } => Err(TransferError::ServerError {
                code: *code,
                message: message.clone(),
            }),
            _ => {
                log::debug!("Ignoring {:?} while waiting for data", packet.opcode());
                Ok(ResultAction::RetryRecv)
            }
        }
    }
}

#[derive(Debug)]
pub struct UploadProcessor {
    filename: String,
    data: Vec<u8>,
    /// The block awaiting acknowledgement; 0 while the write request itself is unacknowledged.
    curr_block: u16,
    /// How many DATA packets have been sent.
    sent: usize,
}

impl UploadProcessor {
    fn new(filename: &str, data: Vec<u8>) -> UploadProcessor {
        UploadProcessor {
            filename: filename.to_string(),
            data,
            curr_block: 0,
            sent: 0,
        }
    }

    fn next_data_packet(&mut self) -> Packet {
        let data = block_slice(&self.data, self.sent).to_vec();
        self.sent += 1;
        self.curr_block = self.curr_block.wrapping_add(1);
        Packet::Data { block: self.curr_block, data }
    }

    fn process_ack(&mut self, packet: &Packet) -> Result<ResultAction, TransferError> {
        match packet {
            &Packet::Ack { block } => {
                if self.sent == 0 && block != 0 {
                    return Err(TransferError::ProtocolViolation(format!(
                        "received wrong ACK block {block} for the write request, expected 0"
                    )));
                }
                if block != self.curr_block {
                    return Err(TransferError::ProtocolViolation(format!(
                        "Wrong ACK: expected block {cb}, but got block {block}",
                        cb = self.curr_block
                    )));
                }
                if self.sent == block_count(self.data.len()) {
                    log::debug!("Final block {} acknowledged", block);
                    return Ok(ResultAction::CloseConnection);
                }
                Ok(ResultAction::SendPacketAndAwait(self.next_data_packet()))
            }
            Packet::Error { code, message } => Err(TransferError::ServerError {
                code: *code,
                message: message.clone(),
            }),
            _ => Err(TransferError::ProtocolViolation(format!(
                "not received ACK, got {:?} instead",
                packet.opcode()
            ))),
        }
    }
}
