use std::time::Duration;

/// How long a receive waits by default before the transfer gives up on the server.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

/// Well-known TFTP server port.
pub const DEFAULT_SERVER_PORT: u16 = 69;

/// Knobs for a single transfer.
///
/// # Example
///
/// ```rust
/// use std::time::Duration;
/// use tftp_client::TransferOptions;
///
/// let options = TransferOptions::default()
///     .with_timeout(Some(Duration::from_secs(2)))
///     .with_retries(3);
/// assert_eq!(options.retries, 3);
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferOptions {
    /// How long to wait for each reply. `None` waits forever.
    pub timeout: Option<Duration>,
    /// How many times the last packet is sent again after a receive times out.
    /// Zero makes the first timeout fatal.
    pub retries: u32,
    /// Local port to bind. A random unprivileged port is used when unset.
    pub local_port: Option<u16>,
}

impl TransferOptions {
    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_retries(mut self, retries: u32) -> Self {
        self.retries = retries;
        self
    }

    pub fn with_local_port(mut self, local_port: Option<u16>) -> Self {
        self.local_port = local_port;
        self
    }
}

impl Default for TransferOptions {
    fn default() -> Self {
        Self {
            timeout: Some(DEFAULT_TIMEOUT),
            retries: 0,
            local_port: None,
        }
    }
}
