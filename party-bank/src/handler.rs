//! Per-connection read/apply/acknowledge loop.
//!
//! Framing is one read per command: whatever a single read returns, up to the
//! configured buffer size, is decoded as one frame. Peers must wait for the
//! `OK` of a command before sending the next one. Two commands coalesced into
//! one read, or one command split across reads, are not reassembled.

use std::{net::SocketAddr, sync::Arc, time::Duration};

use anyhow::{Context, Result};
use tokio::{
    io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt},
    select,
    sync::watch,
    time::timeout,
};
use tracing::{debug, info, warn};

use crate::{
    config::ServerConfig,
    error::CommandError,
    protocol::{self, Command},
    registry::{BalanceError, Registration, User},
    server::LedgerState,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Continue,
    Stop,
}

pub struct ConnectionHandler<S> {
    stream: S,
    peer: SocketAddr,
    state: Arc<LedgerState>,
    shutdown: watch::Receiver<bool>,
    buffer: Vec<u8>,
    idle_timeout: Option<Duration>,
}

impl<S> ConnectionHandler<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    pub fn new(
        stream: S,
        peer: SocketAddr,
        state: Arc<LedgerState>,
        shutdown: watch::Receiver<bool>,
        config: &ServerConfig,
    ) -> Self {
        Self {
            stream,
            peer,
            state,
            shutdown,
            buffer: vec![0; config.read_buffer.max(1)],
            idle_timeout: config.idle_timeout,
        }
    }

    /// Runs until the peer disconnects, goes idle, sends STOP, or the server
    /// shuts down.
    pub async fn run(mut self) -> Result<()> {
        let peer = self.peer;
        debug!(peer = %peer, "connection opened");

        loop {
            let read = select! {
                _ = self.shutdown.wait_for(|stop| *stop) => {
                    debug!(peer = %peer, "server stopping, closing connection");
                    break;
                }
                read = read_frame(&mut self.stream, &mut self.buffer, self.idle_timeout) => read,
            };

            let len = match read.context("failed to read command")? {
                Some(0) => {
                    debug!(peer = %peer, "peer closed the connection");
                    break;
                }
                Some(len) => len,
                None => {
                    warn!(peer = %peer, "closing idle connection");
                    break;
                }
            };

            let flow = apply_frame(&self.state, peer, &self.buffer[..len]);
            let acked = write_ack(&mut self.stream).await;
            if flow == Flow::Stop {
                // A peer that hung up right after STOP still stops the server.
                self.state.shutdown();
            }
            acked?;
            if flow == Flow::Stop {
                break;
            }
        }

        if let Err(err) = self.stream.shutdown().await {
            debug!(peer = %peer, error = ?err, "failed to shut down connection cleanly");
        }
        Ok(())
    }
}

async fn write_ack<S>(stream: &mut S) -> Result<()>
where
    S: AsyncWrite + Unpin,
{
    stream
        .write_all(protocol::encode_ack())
        .await
        .context("failed to write acknowledgment")?;
    stream
        .flush()
        .await
        .context("failed to flush acknowledgment")
}

/// `Ok(None)` means the idle timeout elapsed.
async fn read_frame<S>(
    stream: &mut S,
    buffer: &mut [u8],
    idle_timeout: Option<Duration>,
) -> std::io::Result<Option<usize>>
where
    S: AsyncRead + Unpin,
{
    match idle_timeout {
        Some(limit) => match timeout(limit, stream.read(buffer)).await {
            Ok(read) => read.map(Some),
            Err(_) => Ok(None),
        },
        None => stream.read(buffer).await.map(Some),
    }
}

/// Decodes and applies one frame. Per-command failures are reported through
/// the notifier and never end the connection.
pub fn apply_frame(state: &LedgerState, peer: SocketAddr, frame: &[u8]) -> Flow {
    debug!(peer = %peer, frame = %String::from_utf8_lossy(frame), "received frame");

    let command = match protocol::decode(frame) {
        Ok(command) => command,
        Err(err) => {
            reject(state, peer, err.into());
            return Flow::Continue;
        }
    };

    match command {
        Command::Join { name, avatar_id } => {
            // The key comes from the transport, never from the payload.
            let address = peer.ip().to_canonical().to_string();
            match state.registry().add(User::new(address, name, avatar_id)) {
                Registration::Created(user) => {
                    info!(peer = %peer, name = %user.name, avatar_id, "player joined");
                    state.events().emit_player_joined(user);
                }
                Registration::AlreadyJoined(user) => {
                    debug!(peer = %peer, name = %user.name, "player already joined");
                    state.events().emit_player_joined(user);
                }
            }
        }
        Command::Add { address, amount } => {
            apply_balance(state, peer, state.registry().credit(&address, amount));
        }
        Command::Rem { address, amount } => {
            apply_balance(state, peer, state.registry().debit(&address, amount));
        }
        Command::Stop => {
            info!(peer = %peer, "stop requested");
            return Flow::Stop;
        }
        Command::Unknown(token) => {
            debug!(peer = %peer, token = %token, "ignoring unknown command");
        }
    }

    Flow::Continue
}

fn apply_balance(state: &LedgerState, peer: SocketAddr, result: Result<User, BalanceError>) {
    match result {
        Ok(user) => {
            debug!(peer = %peer, address = %user.address, money = user.money, "balance changed");
            state.events().emit_money_changed(user);
        }
        Err(err) => reject(state, peer, err.into()),
    }
}

fn reject(state: &LedgerState, peer: SocketAddr, error: CommandError) {
    warn!(peer = %peer, error = %error, "command rejected");
    state.events().emit_command_rejected(peer, error);
}
