use std::{
    net::{IpAddr, SocketAddr},
    time::Duration,
};

use clap::{Args, Parser, Subcommand};

use crate::config::{DEFAULT_READ_BUFFER, ServerConfig};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Host the ledger, accepting player connections over TCP.
    Host(HostArgs),
    /// Send one command to a running ledger.
    Client(ClientArgs),
}

#[derive(Args, Debug, Clone)]
pub struct HostArgs {
    /// Local address to bind. 0.0.0.0 listens on every interface.
    #[arg(long, default_value = "0.0.0.0")]
    pub bind: IpAddr,

    /// Port to listen on. Use 0 for an ephemeral port.
    #[arg(long, default_value_t = crate::config::DEFAULT_PORT)]
    pub port: u16,

    /// Close connections that stay silent this long. 0 disables the timeout.
    #[arg(long, default_value_t = 300)]
    pub idle_timeout_secs: u64,
}

impl HostArgs {
    pub fn to_config(&self) -> ServerConfig {
        let idle_timeout =
            (self.idle_timeout_secs > 0).then(|| Duration::from_secs(self.idle_timeout_secs));
        ServerConfig {
            bind: self.bind,
            port: self.port,
            read_buffer: DEFAULT_READ_BUFFER,
            idle_timeout,
        }
    }
}

#[derive(Args, Debug, Clone)]
pub struct ClientArgs {
    /// Address of the ledger host.
    #[arg(long, default_value = "127.0.0.1:13000")]
    pub server: SocketAddr,

    /// Local IP to connect from; decides which player JOIN registers.
    #[arg(long)]
    pub source: Option<IpAddr>,

    #[command(subcommand)]
    pub action: Action,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Action {
    /// Register this device as a player.
    Join {
        #[arg(long)]
        name: String,
        #[arg(long, default_value_t = 0)]
        avatar: i32,
    },
    /// Credit a player.
    Add {
        #[arg(long)]
        address: String,
        #[arg(long)]
        amount: u64,
    },
    /// Debit a player.
    Rem {
        #[arg(long)]
        address: String,
        #[arg(long)]
        amount: u64,
    },
    /// Move money from one player to another.
    Transfer {
        #[arg(long)]
        from: String,
        #[arg(long)]
        to: String,
        #[arg(long)]
        amount: u64,
        /// Sender's current balance; the transfer is refused if it is short.
        #[arg(long)]
        balance: u64,
    },
    /// Stop the host and clear every player.
    Stop,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn host_defaults_match_server_defaults() {
        let cli = Cli::try_parse_from(["party-bank", "host"]).unwrap();
        let Command::Host(args) = cli.command else {
            panic!("expected host command");
        };
        assert_eq!(args.to_config(), ServerConfig::default());
    }

    #[test]
    fn zero_idle_timeout_disables_it() {
        let cli =
            Cli::try_parse_from(["party-bank", "host", "--port", "0", "--idle-timeout-secs", "0"])
                .unwrap();
        let Command::Host(args) = cli.command else {
            panic!("expected host command");
        };
        assert_eq!(args.to_config().idle_timeout, None);
    }

    #[test]
    fn parses_client_transfer() {
        let cli = Cli::try_parse_from([
            "party-bank",
            "client",
            "--server",
            "192.168.1.4:13000",
            "transfer",
            "--from",
            "192.168.1.5",
            "--to",
            "192.168.1.6",
            "--amount",
            "25",
            "--balance",
            "100",
        ])
        .unwrap();
        let Command::Client(args) = cli.command else {
            panic!("expected client command");
        };
        assert_eq!(args.server, "192.168.1.4:13000".parse().unwrap());
        assert!(matches!(
            args.action,
            Action::Transfer {
                amount: 25,
                balance: 100,
                ..
            }
        ));
    }

    #[test]
    fn transfer_requires_the_sender_balance() {
        let parsed = Cli::try_parse_from([
            "party-bank",
            "client",
            "--server",
            "192.168.1.4:13000",
            "transfer",
            "--from",
            "192.168.1.5",
            "--to",
            "192.168.1.6",
            "--amount",
            "25",
        ]);
        assert!(parsed.is_err());
    }
}
