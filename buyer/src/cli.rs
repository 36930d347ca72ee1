//! # CLI Interface
//!
//! Command-line structure for `conduit-buyer`, via `clap` derive.
//! Connection flags are global so they can follow any subcommand.

use clap::{ArgAction, Args, Parser, Subcommand};
use std::path::PathBuf;

use crate::logging::LogFormat;

/// Conduit marketplace buyer.
///
/// Browses the registry catalog, buys content through the local settlement
/// agent and keeps a ledger of what has been bought.
#[derive(Parser, Debug)]
#[command(
    name = "conduit-buyer",
    about = "Conduit marketplace buyer client",
    version,
    propagate_version = true
)]
pub struct BuyerCli {
    #[command(flatten)]
    pub connection: ConnectionArgs,

    /// Subcommand to execute.
    #[command(subcommand)]
    pub command: Commands,
}

/// Where the collaborators live and where local state goes.
#[derive(Args, Debug)]
pub struct ConnectionArgs {
    /// Base URL of the local settlement agent.
    #[arg(
        long,
        global = true,
        env = "CONDUIT_NODE_URL",
        default_value = "http://127.0.0.1:3000"
    )]
    pub node_url: String,

    /// Base URL of the content registry.
    #[arg(
        long,
        global = true,
        env = "CONDUIT_REGISTRY_URL",
        default_value = "http://127.0.0.1:3003"
    )]
    pub registry_url: String,

    /// Directory holding the purchase ledger.
    #[arg(
        long,
        short = 'd',
        global = true,
        env = "CONDUIT_DATA_DIR",
        default_value = ".conduit"
    )]
    pub data_dir: PathBuf,

    /// Directory the agent writes decrypted files into.
    #[arg(long, global = true, env = "CONDUIT_OUTPUT_DIR", default_value = "/tmp")]
    pub output_dir: String,

    /// Log output format.
    #[arg(
        long,
        global = true,
        env = "CONDUIT_LOG_FORMAT",
        value_enum,
        default_value_t = LogFormat::Pretty
    )]
    pub log_format: LogFormat,

    /// More log output; repeat for more (-v, -vv, -vvv).
    #[arg(short, long, global = true, action = ArgAction::Count)]
    pub verbose: u8,
}

/// Top-level subcommands.
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// List the registry catalog.
    Catalog,
    /// Show the sources the agent knows for an asset.
    Sources(SourcesArgs),
    /// Buy an asset and follow the purchase to the end.
    Buy(BuyArgs),
    /// List purchased content, newest first.
    Library(LibraryArgs),
    /// Forget a purchase.
    Remove(RemoveArgs),
    /// Print the agent's push events as they arrive.
    Watch,
    /// Print version information and exit.
    Version,
}

#[derive(Parser, Debug)]
pub struct SourcesArgs {
    /// Plaintext content fingerprint.
    pub content_hash: String,
}

/// Arguments for the `buy` subcommand.
#[derive(Parser, Debug)]
pub struct BuyArgs {
    /// Plaintext content fingerprint.
    pub content_hash: String,

    /// Protocol: direct, pre, chunked, seeder or ad.
    #[arg(long, short = 'm', default_value = "direct")]
    pub mode: String,

    /// PRE download source: smart, creator, or a peer URL.
    #[arg(long, short = 's', default_value = "smart")]
    pub source: String,

    /// Advertiser endpoint for ad-subsidized purchases.
    #[arg(long, env = "CONDUIT_ADVERTISER_URL")]
    pub advertiser: Option<String>,

    /// Buy even if the ledger already has this asset.
    #[arg(long)]
    pub force: bool,

    /// Print the final snapshot as JSON instead of text.
    #[arg(long)]
    pub json: bool,
}

#[derive(Parser, Debug)]
pub struct LibraryArgs {
    /// Print records as JSON.
    #[arg(long)]
    pub json: bool,
}

#[derive(Parser, Debug)]
pub struct RemoveArgs {
    /// Plaintext content fingerprint.
    pub content_hash: String,
}
