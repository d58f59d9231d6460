use clap::{Parser, Subcommand};

/// CLI surface definition.
#[derive(Parser, Debug)]
#[command(
    name = "kvbox",
    about = "Local key-value boxes, plain or encrypted with a keyring-held key",
    version,
    propagate_version = true
)]
pub struct Cli {
    /// Use the encrypted box whose key lives in the OS keyring.
    #[arg(long, global = true)]
    pub secure: bool,
    /// Box to operate on (defaults to the configured box name).
    #[arg(long = "box", global = true, value_name = "NAME")]
    pub box_name: Option<String>,
    /// Optional subcommand; defaults to `dump` when absent.
    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Print the value stored under a key.
    Get { key: String },
    /// Store a value. VALUE is parsed as JSON when possible, otherwise kept as text.
    Set {
        key: String,
        value: String,
        /// Store the value as encoded JSON text instead of verbatim.
        #[arg(long)]
        encode: bool,
    },
    /// Remove a key.
    Delete { key: String },
    /// Remove every entry in the box.
    Clear,
    /// Print all entries as a JSON object.
    List,
    /// Print a human-readable dump of the box.
    Dump,
    /// Print version and exit.
    Version,
    /// Write, read back, and delete a probe entry.
    Health,
    /// Manage CLI configuration.
    #[command(subcommand)]
    Config(ConfigCommand),
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum ConfigCommand {
    /// Create a default config file if one does not exist.
    Init,
}
