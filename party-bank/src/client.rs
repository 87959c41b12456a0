use std::net::{IpAddr, SocketAddr};

use anyhow::{Context, Result, bail};
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::{TcpSocket, TcpStream},
};
use tracing::{debug, info, warn};

use crate::protocol::{ACK, Command};

/// Peer side of the ledger protocol. Every command waits for its `OK` before
/// returning, which keeps frames one-per-read on the server.
pub struct BankClient {
    stream: TcpStream,
}

impl BankClient {
    pub async fn connect(server: SocketAddr) -> Result<Self> {
        let stream = TcpStream::connect(server)
            .await
            .with_context(|| format!("failed to connect to {server}"))?;
        info!("connected to {}", server);
        Ok(Self { stream })
    }

    /// Connects from a specific local IP. The server keys players by source
    /// IP, so this picks which player the connection speaks for.
    pub async fn connect_from(source: IpAddr, server: SocketAddr) -> Result<Self> {
        let socket = match source {
            IpAddr::V4(_) => TcpSocket::new_v4(),
            IpAddr::V6(_) => TcpSocket::new_v6(),
        }
        .context("failed to create socket")?;
        socket
            .bind(SocketAddr::new(source, 0))
            .with_context(|| format!("failed to bind local address {source}"))?;
        let stream = socket
            .connect(server)
            .await
            .with_context(|| format!("failed to connect to {server} from {source}"))?;
        info!("connected to {} from {}", server, source);
        Ok(Self { stream })
    }

    /// The address the server will register this connection under.
    pub fn address(&self) -> Result<String> {
        let local = self
            .stream
            .local_addr()
            .context("failed to read local address")?;
        Ok(local.ip().to_canonical().to_string())
    }

    pub async fn send(&mut self, command: &Command) -> Result<()> {
        debug!(%command, "sending command");
        self.stream
            .write_all(&command.encode())
            .await
            .with_context(|| format!("failed to send '{command}'"))?;
        self.stream.flush().await?;

        let mut ack = [0u8; 2];
        self.stream
            .read_exact(&mut ack)
            .await
            .with_context(|| format!("no acknowledgment for '{command}'"))?;
        if &ack != ACK {
            bail!(
                "unexpected response to '{command}': {:?}",
                String::from_utf8_lossy(&ack)
            );
        }
        Ok(())
    }

    pub async fn join(&mut self, name: &str, avatar_id: i32) -> Result<()> {
        self.send(&Command::Join {
            name: name.to_string(),
            avatar_id,
        })
        .await
    }

    pub async fn credit(&mut self, address: &str, amount: u64) -> Result<()> {
        self.send(&Command::Add {
            address: address.to_string(),
            amount,
        })
        .await
    }

    pub async fn debit(&mut self, address: &str, amount: u64) -> Result<()> {
        self.send(&Command::Rem {
            address: address.to_string(),
            amount,
        })
        .await
    }

    /// Moves money between players as two independent commands: REM on
    /// `from`, then ADD on `to`. The server emits one MoneyChanged for each.
    ///
    /// The pair is not atomic and `OK` does not say whether the REM applied,
    /// so the caller passes the sender's last known balance and nothing is
    /// sent when it cannot cover `amount`. A balance that moved since it was
    /// observed can still let the REM be rejected while the ADD applies.
    pub async fn transfer(
        &mut self,
        from: &str,
        to: &str,
        amount: u64,
        available: u64,
    ) -> Result<()> {
        if amount > available {
            bail!("{from} has {available}, cannot transfer {amount}");
        }
        self.debit(from, amount).await?;
        self.credit(to, amount).await
    }

    /// Asks the server to stop. Consumes the client; the server closes the
    /// connection after acknowledging.
    pub async fn stop(mut self) -> Result<()> {
        self.send(&Command::Stop).await?;
        if let Err(error) = self.stream.shutdown().await {
            warn!(?error, "failed to shutdown client stream cleanly");
        }
        Ok(())
    }
}
