use std::io::Write;
use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::io::{AsyncBufReadExt, BufReader, Lines, Stdin};

use tftp_client::config::DEFAULT_SERVER_PORT;
use tftp_client::{Client, TransferOptions};

/// Interactive TFTP client. Reads `get`, `put` and `quit` commands from standard input.
#[derive(Parser, Debug)]
#[command(version)]
struct Cli {
    /// Server host name or IP address
    host: String,

    /// Server port
    #[arg(default_value_t = DEFAULT_SERVER_PORT)]
    port: u16,

    /// Seconds to wait for each reply from the server, 0 waits forever
    #[arg(long, default_value_t = 5)]
    timeout: u64,

    /// How many times to resend the last packet when the server does not answer
    #[arg(long, default_value_t = 0)]
    retries: u32,

    /// Local UDP port to bind (random if unset)
    #[arg(long)]
    local_port: Option<u16>,
}

impl Cli {
    fn options(&self) -> TransferOptions {
        let timeout = (self.timeout > 0).then(|| Duration::from_secs(self.timeout));
        TransferOptions::default()
            .with_timeout(timeout)
            .with_retries(self.retries)
            .with_local_port(self.local_port)
    }
}

fn prompt(text: &str) -> Result<()> {
    let mut stdout = std::io::stdout();
    stdout.write_all(text.as_bytes())?;
    stdout.flush()?;
    Ok(())
}

async fn read_filename(lines: &mut Lines<BufReader<Stdin>>) -> Result<Option<String>> {
    prompt("Filename: ")?;
    Ok(lines.next_line().await?.map(|line| line.trim().to_string()))
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::init();
    let cli = Cli::parse();

    let client = Client::new(&cli.host, cli.port, cli.options())
        .await
        .with_context(|| format!("Cannot reach {}:{}", cli.host, cli.port))?;
    log::info!("Using TFTP server {}", client.server());

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        prompt("Command: ")?;
        let Some(command) = lines.next_line().await? else { break };

        match command.trim() {
            "" => continue,
            "quit" => break,
            "get" => {
                let Some(filename) = read_filename(&mut lines).await? else { break };
                match client.get_file(Path::new(&filename)).await {
                    Ok(len) => println!("Received {} ({} bytes)", filename, len),
                    Err(e) => println!("{}", e),
                }
            }
            "put" => {
                let Some(filename) = read_filename(&mut lines).await? else { break };
                match client.put_file(Path::new(&filename)).await {
                    Ok(len) => println!("Sent {} ({} bytes)", filename, len),
                    Err(e) => println!("{}", e),
                }
            }
            other => println!("Unknown command: {}", other),
        }
    }

    Ok(())
}
