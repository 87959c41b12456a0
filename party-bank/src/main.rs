use anyhow::{Context, Result};
use clap::Parser;
use tracing::{info, warn};

use party_bank::{
    BankClient, LedgerServer, UserRegistry,
    cli::{Action, Cli, ClientArgs, Command, HostArgs},
};

fn init_tracing() {
    use tracing_subscriber::{EnvFilter, fmt};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = fmt().with_env_filter(filter).with_target(false).try_init();
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();

    let cli = Cli::parse();
    match cli.command {
        Command::Host(args) => host(args).await?,
        Command::Client(args) => client(args).await?,
    }

    Ok(())
}

async fn host(args: HostArgs) -> Result<()> {
    let server = LedgerServer::new(args.to_config());

    server.events().on_player_joined(|user| {
        info!(address = %user.address, name = %user.name, avatar_id = user.avatar_id, "welcome");
    });
    server.events().on_money_changed(|user| {
        info!(address = %user.address, name = %user.name, money = %user.formatted_money(), "money changed");
    });
    server.events().on_command_rejected(|peer, error| {
        warn!(peer = %peer, "could not apply command: {error}");
    });

    let handle = server.start().await?;
    info!("ledger listening on {}", handle.local_addr());
    if !server.config().is_local_network() {
        warn!(
            bind = %server.config().bind,
            "bind address is not on a private network; other devices may not reach the ledger"
        );
    }

    let roster = tokio::spawn(log_roster(server.registry().clone()));

    tokio::select! {
        _ = handle.stopped() => {}
        ctrl_c = tokio::signal::ctrl_c() => {
            if let Err(err) = ctrl_c {
                warn!(error = ?err, "failed to install ctrl-c handler");
            }
            handle.stop();
            handle.stopped().await;
        }
    }

    roster.abort();
    Ok(())
}

async fn log_roster(registry: UserRegistry) {
    let mut roster = registry.watch();
    while roster.changed().await.is_ok() {
        let users = roster.borrow_and_update().clone();
        match serde_json::to_string(&users) {
            Ok(json) => info!(players = users.len(), roster = %json, "roster updated"),
            Err(err) => warn!(error = ?err, "failed to encode roster"),
        }
    }
}

async fn client(args: ClientArgs) -> Result<()> {
    let mut client = match args.source {
        Some(source) => BankClient::connect_from(source, args.server).await?,
        None => BankClient::connect(args.server).await?,
    };

    match args.action {
        Action::Join { name, avatar } => {
            client.join(&name, avatar).await?;
            let address = client.address()?;
            println!("joined as {name} ({address})");
        }
        Action::Add { address, amount } => {
            client.credit(&address, amount).await?;
            println!("added {amount} to {address}");
        }
        Action::Rem { address, amount } => {
            client.debit(&address, amount).await?;
            println!("removed {amount} from {address}");
        }
        Action::Transfer {
            from,
            to,
            amount,
            balance,
        } => {
            client
                .transfer(&from, &to, amount, balance)
                .await
                .with_context(|| format!("transfer of {amount} from {from} to {to} failed"))?;
            println!("moved {amount} from {from} to {to}");
        }
        Action::Stop => {
            client.stop().await?;
            println!("ledger stopped");
        }
    }

    Ok(())
}
