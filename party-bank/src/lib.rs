//! Shared ledger of player balances for a party banking game.
//!
//! One device hosts the ledger; the others connect over TCP on the local
//! network and send short comma-separated ASCII commands (`JOIN`, `ADD`,
//! `REM`, `STOP`). Every command is answered with a 2-byte `OK`.
//!
//! - [`server`] owns the listener, the lifecycle state and the accept loop.
//! - [`handler`] runs one connection: read a frame, apply it, acknowledge.
//! - [`protocol`] encodes and decodes command frames.
//! - [`registry`] holds the players, serializing concurrent mutation.
//! - [`events`] fans `PlayerJoined` / `MoneyChanged` out to subscribers.
//! - [`client`] is the peer side used by joining devices and the CLI.
//! - [`cli`] and [`config`] describe how the binary is driven.

pub mod cli;
pub mod client;
pub mod config;
pub mod error;
pub mod events;
pub mod handler;
pub mod protocol;
pub mod registry;
pub mod server;

pub use client::BankClient;
pub use config::ServerConfig;
pub use error::{CommandError, StartError};
pub use events::{EventKind, EventNotifier, LedgerEvent, SubscriptionId};
pub use registry::{User, UserRegistry};
pub use server::{LedgerServer, ServerHandle, ServerState};
