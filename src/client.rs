// This module drives transfers against a TFTP server.
//
// A transfer is started by sending a read or write request to the server's well-known port. The
// Client handles this by binding a fresh Session for the transfer and feeding every packet the
// server sends into a PacketProcessor. Each transfer works in roughly the following stages:
//
// 1. Send the request produced by the processor.
// 2. Enter a phase of send and wait cycles. Each packet received is handed to the processor,
//    which says whether to answer and keep waiting, to ignore the packet, or to finish.
// 3. The transfer ends when the processor says so, or when anything goes wrong. Errors are never
//    recovered from, except that a receive timeout re-sends the last packet while retries remain.
//
// Downloads keep the received bytes in memory and hand them back only once the final block has
// arrived, so a failed download never leaves a partial file behind.

use crate::config::TransferOptions;
use crate::processor::{PacketProcessor, ResultAction, TransferError};
use crate::session::Session;
use crate::tftp::SocketError;
use std::io;
use std::net::SocketAddr;
use std::path::Path;
use tokio::fs;

/// A TFTP client talking to a single server.
///
/// # Example
///
/// ```rust,no_run
/// use tftp_client::{Client, TransferOptions};
///
/// # async fn run() -> Result<(), tftp_client::TransferError> {
/// let client = Client::new("192.168.1.100", 69, TransferOptions::default()).await?;
/// let contents = client.download("pxelinux.cfg").await?;
/// client.upload("copy.cfg", &contents).await?;
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct Client {
    /// The server, addressed at its well-known port.
    server: SocketAddr,

    options: TransferOptions,
}

/// Downloads `filename` from the server at `host:port`.
pub async fn download(host: &str, port: u16, filename: &str) -> Result<Vec<u8>, TransferError> {
    Client::new(host, port, TransferOptions::default())
        .await?
        .download(filename)
        .await
}

/// Uploads `data` to the server at `host:port`, naming it `filename`.
pub async fn upload(host: &str, port: u16, filename: &str, data: &[u8]) -> Result<(), TransferError> {
    Client::new(host, port, TransferOptions::default())
        .await?
        .upload(filename, data)
        .await
}

/// The name the server gets to see for a local file.
fn remote_name(path: &Path) -> Result<&str, TransferError> {
    path.file_name()
        .and_then(|name| name.to_str())
        .ok_or_else(|| TransferError::Unencodable(format!("{} has no usable file name", path.display())))
}

/// Sends and receives packets until the processor finishes or fails.
async fn drive(
    session: &mut Session,
    processor: &mut PacketProcessor,
    retries: u32,
) -> Result<(), TransferError> {
    let mut out_packet = processor.first_packet();
    let mut attempts = 0;

    // This loop is used for message sending as well as retries, depending on whether
    // |out_packet| has been overwritten.
    loop {
        session.send(&out_packet).await?;

        // Packets the processor ignores do not extend the wait.
        let deadline = session.deadline();
        loop {
            let packet = match session.receive_until(deadline).await {
                Ok(packet) => packet,
                Err(SocketError::Timeout(_)) if attempts < retries => {
                    attempts += 1;
                    log::warn!(
                        "Timed out, sending {:?} again (attempt {}/{})",
                        out_packet.opcode(),
                        attempts,
                        retries
                    );
                    break;
                }
                Err(e) => return Err(e.into()),
            };

            match processor.process_packet(&packet)? {
                ResultAction::SendPacketAndAwait(p) => {
                    out_packet = p;
                    attempts = 0;
                    break;
                }
                ResultAction::RetryRecv => continue,
                ResultAction::TerminateWithPacket(p) => {
                    session.send(&p).await?;
                    return Ok(());
                }
                ResultAction::CloseConnection => return Ok(()),
            }
        }
    }
}

impl Client {
    /// Resolves `host` and prepares a client for the server listening on `port`.
    pub async fn new(host: &str, port: u16, options: TransferOptions) -> Result<Client, TransferError> {
        let server = tokio::net::lookup_host((host, port))
            .await?
            .next()
            .ok_or_else(|| {
                TransferError::Io(io::Error::new(
                    io::ErrorKind::NotFound,
                    format!("{host} did not resolve to any address"),
                ))
            })?;
        Ok(Client::with_addr(server, options))
    }

    pub fn with_addr(server: SocketAddr, options: TransferOptions) -> Client {
        Client { server, options }
    }

    pub fn server(&self) -> SocketAddr {
        self.server
    }

    /// Runs one transfer on its own session. The session always goes back to the well-known
    /// port afterwards, whether the transfer worked or not.
    async fn transfer(&self, mut processor: PacketProcessor) -> Result<PacketProcessor, TransferError> {
        let mut session = Session::bind(self.server, &self.options)?;
        let result = drive(&mut session, &mut processor, self.options.retries).await;
        session.reset();
        result.map(|_| processor)
    }

    /// Fetches `filename` from the server and returns its contents.
    pub async fn download(&self, filename: &str) -> Result<Vec<u8>, TransferError> {
        log::info!("Downloading {} from {}", filename, self.server);
        let data = self
            .transfer(PacketProcessor::new_download(filename))
            .await?
            .into_received();
        log::info!("Download of {} complete, {} bytes", filename, data.len());
        Ok(data)
    }

    /// Stores `data` on the server as `filename`.
    pub async fn upload(&self, filename: &str, data: &[u8]) -> Result<(), TransferError> {
        log::info!("Uploading {} bytes to {} as {}", data.len(), self.server, filename);
        self.transfer(PacketProcessor::new_upload(filename, data.to_vec())).await?;
        log::info!("Upload of {} complete", filename);
        Ok(())
    }

    /// Downloads the file named like `local`'s last component and writes it to `local`,
    /// replacing any existing file. Nothing is written if the transfer fails.
    pub async fn get_file(&self, local: &Path) -> Result<usize, TransferError> {
        let data = self.download(remote_name(local)?).await?;
        fs::write(local, &data).await?;
        Ok(data.len())
    }

    /// Uploads `local` under its last path component.
    pub async fn put_file(&self, local: &Path) -> Result<usize, TransferError> {
        if !fs::try_exists(local).await? {
            return Err(TransferError::FileNotFound(local.to_path_buf()));
        }
        let filename = remote_name(local)?;
        let data = fs::read(local).await?;
        self.upload(filename, &data).await?;
        Ok(data.len())
    }
}
