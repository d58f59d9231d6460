mod cli;
mod config;
mod storage;

use crate::cli::{Command, ConfigCommand};
use clap::Parser;
use color_eyre::{eyre::bail, Result};
use kvbox_core::{Store, StoreExt};
use serde_json::Value;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

const PROBE_KEY: &str = "health/probe";

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;
    init_tracing();

    let cli = cli::Cli::parse();
    let config = config::load()?;
    let command = cli.command.unwrap_or(Command::Dump);

    match command {
        Command::Version => print_version(),
        Command::Config(ConfigCommand::Init) => init_config(&config)?,
        command => {
            let store = storage::open_store(&config, cli.secure, cli.box_name.as_deref()).await?;
            run(store.as_ref(), command).await?;
        }
    }

    Ok(())
}

fn init_tracing() {
    // Respect user-provided filters, default to info to avoid noisy stdout.
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let fmt_layer = tracing_subscriber::fmt::layer().with_target(false);
    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt_layer)
        .init();
}

fn print_version() {
    println!("kvbox {}", env!("CARGO_PKG_VERSION"));
}

fn init_config(config: &config::Config) -> Result<()> {
    let path = config::write_default_if_missing(config)?;
    println!("Config initialized at {}", path.display());
    Ok(())
}

/// Execute a store subcommand against an initialized store.
async fn run(store: &dyn Store, command: Command) -> Result<()> {
    match command {
        Command::Get { key } => match store.get(&key) {
            Some(value) => println!("{}", serde_json::to_string_pretty(&value)?),
            None => bail!("no value for {key}"),
        },
        Command::Set { key, value, encode } => {
            let value = parse_value(&value);
            let written = if encode {
                store.set_encoded(&key, &value).await
            } else {
                store.set(&key, value).await
            };
            if !written {
                bail!("failed to write {key}");
            }
        }
        Command::Delete { key } => {
            if !store.delete(&key).await {
                bail!("failed to delete {key}");
            }
        }
        Command::Clear => {
            if !store.clear().await {
                bail!("failed to clear {}", store.name());
            }
        }
        Command::List => {
            let entries = store.get_all().await;
            println!("{}", serde_json::to_string_pretty(&entries)?);
        }
        Command::Dump => {
            store.log().await;
            println!("{}", store.as_string().await);
        }
        Command::Health => {
            run_store_health(store).await?;
            println!("Storage: ok");
        }
        Command::Version | Command::Config(_) => {}
    }
    Ok(())
}

/// Command-line values are JSON when they parse, plain text otherwise.
fn parse_value(raw: &str) -> Value {
    serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()))
}

async fn run_store_health(store: &dyn Store) -> Result<()> {
    let payload = Value::String("ok".to_string());
    if !store.set(PROBE_KEY, payload.clone()).await {
        bail!("storage write failed");
    }
    let round_trip = store.get(PROBE_KEY);
    if !store.delete(PROBE_KEY).await {
        bail!("storage delete failed");
    }

    if round_trip.as_ref() != Some(&payload) {
        bail!("storage round-trip failed");
    }
    Ok(())
}
