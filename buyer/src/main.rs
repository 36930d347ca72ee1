// Copyright (c) 2026 ALAS Technology. MIT License.
// See LICENSE for details.

//! # Conduit Buyer
//!
//! Entry point for the `conduit-buyer` binary. Parses CLI arguments,
//! initializes logging, and runs one command against the local settlement
//! agent and the registry.
//!
//! - `catalog` — list what the registry sells
//! - `sources` — ICS source summary for one asset
//! - `buy`     — run a purchase to completion, rendering each step
//! - `library` — purchased content from the ledger
//! - `remove`  — forget a purchase
//! - `watch`   — dump the agent's push events
//! - `version` — print build version information

mod cli;
mod logging;

use anyhow::{bail, Context, Result};
use clap::Parser;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tokio::sync::mpsc;

use conduit_checkout::config::{format_size, EVENT_CHANNEL_CAPACITY};
use conduit_checkout::purchase::{render, SourceResolver};
use conduit_checkout::remote::{
    Collaborators, EventStreamSupervisor, HttpGateway, PushSource, RegistryApi,
};
use conduit_checkout::{
    CatalogItem, CheckoutConfig, Orchestrator, ProtocolMode, PurchaseLedger, PurchaseOptions,
    SourceMode,
};

use cli::{BuyArgs, BuyerCli, Commands, ConnectionArgs};

/// How often the purchase view is redrawn while a purchase runs.
const RENDER_INTERVAL: Duration = Duration::from_millis(250);

#[tokio::main]
async fn main() -> Result<()> {
    let cli = BuyerCli::parse();

    logging::init_logging(
        &logging::filter_for(cli.connection.verbose),
        cli.connection.log_format,
    );

    let config = checkout_config(&cli.connection);
    let gateway = Arc::new(HttpGateway::new(&config));

    match cli.command {
        Commands::Catalog => list_catalog(&gateway).await,
        Commands::Sources(args) => show_sources(&gateway, &config, &args.content_hash).await,
        Commands::Buy(args) => buy(gateway, config, &cli.connection, args).await,
        Commands::Library(args) => show_library(&cli.connection, args.json),
        Commands::Remove(args) => remove(&cli.connection, &args.content_hash),
        Commands::Watch => watch(gateway, &config).await,
        Commands::Version => {
            print_version();
            Ok(())
        }
    }
}

fn checkout_config(conn: &ConnectionArgs) -> CheckoutConfig {
    CheckoutConfig {
        output_dir: conn.output_dir.clone(),
        ..CheckoutConfig::new(&conn.node_url, &conn.registry_url)
    }
}

fn open_ledger(conn: &ConnectionArgs) -> Result<PurchaseLedger> {
    let path = conn.data_dir.join("purchases");
    std::fs::create_dir_all(&path)
        .with_context(|| format!("failed to create ledger directory: {}", path.display()))?;
    let ledger = PurchaseLedger::open(&path)
        .with_context(|| format!("failed to open ledger at {}", path.display()))?;
    tracing::debug!(path = %path.display(), records = ledger.len(), "ledger opened");
    Ok(ledger)
}

async fn list_catalog(gateway: &HttpGateway) -> Result<()> {
    let items = gateway
        .listings()
        .await
        .context("failed to fetch catalog")?;
    if items.is_empty() {
        println!("Catalog is empty.");
        return Ok(());
    }
    for item in items {
        let pre = if item.supports_pre() { " PRE" } else { "" };
        println!(
            "{}  {:>8} sats  {:>9}  {}{}",
            item.content_hash,
            item.price_sats,
            format_size(item.size_bytes),
            item.display_name(),
            pre
        );
    }
    Ok(())
}

async fn find_item(gateway: &HttpGateway, content_hash: &str) -> Result<CatalogItem> {
    let items = gateway
        .listings()
        .await
        .context("failed to fetch catalog")?;
    match items.into_iter().find(|i| i.content_hash == content_hash) {
        Some(item) => Ok(item),
        None => bail!("no listing with content hash {}", content_hash),
    }
}

async fn show_sources(
    gateway: &Arc<HttpGateway>,
    config: &CheckoutConfig,
    content_hash: &str,
) -> Result<()> {
    let resolver = SourceResolver::new(gateway.clone(), gateway.clone(), config);
    let summary = resolver
        .describe_sources(content_hash)
        .await
        .context("source discovery failed")?;
    println!("{}", summary.headline());
    for (url, label) in &summary.seeders {
        println!("  {}  {}", label, url);
    }
    println!("  best: {}", resolver.best_source(content_hash).await.describe());
    Ok(())
}

async fn buy(
    gateway: Arc<HttpGateway>,
    config: CheckoutConfig,
    conn: &ConnectionArgs,
    args: BuyArgs,
) -> Result<()> {
    let mode: ProtocolMode = args.mode.parse()?;
    let options = PurchaseOptions {
        source: args.source.parse::<SourceMode>()?,
        advertiser_url: args.advertiser.clone(),
    };

    let ledger = open_ledger(conn)?;
    if !args.force {
        if let Some(record) = ledger.get(&args.content_hash)? {
            println!(
                "Already purchased on {} ({}). Use --force to buy again.",
                record.purchased_at.format("%Y-%m-%d %H:%M"),
                record.output_path
            );
            return Ok(());
        }
    }

    let item = find_item(&gateway, &args.content_hash).await?;
    if let Some(notice) = item.playback_policy.notice() {
        println!("{}", notice);
    }

    let orchestrator = Orchestrator::new(
        Collaborators::from_gateway(gateway.clone()),
        ledger,
        config.clone(),
    );

    // Anything already in the agent's history predates this purchase.
    match gateway.history(config.history_limit).await {
        Ok(history) => {
            for event in &history {
                orchestrator.handle_event(event)?;
            }
        }
        Err(e) => tracing::warn!(error = %e, "could not read event history"),
    }

    let (tx, mut rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
    let supervisor = EventStreamSupervisor::new(gateway.clone(), &config).spawn(tx);

    let purchase = orchestrator.run_purchase(item, mode, options, &mut rx);
    tokio::pin!(purchase);
    let shutdown = shutdown_signal();
    tokio::pin!(shutdown);
    let mut ticker = tokio::time::interval(RENDER_INTERVAL);
    let mut shown = String::new();

    let result = loop {
        tokio::select! {
            result = &mut purchase => break result,
            _ = ticker.tick() => redraw(&orchestrator, &mut shown, args.json),
            _ = &mut shutdown => {
                supervisor.abort();
                bail!("interrupted");
            }
        }
    };
    supervisor.abort();

    if args.json {
        if let Some(snapshot) = orchestrator.snapshot() {
            println!("{}", serde_json::to_string_pretty(&snapshot)?);
        }
    } else {
        redraw(&orchestrator, &mut shown, false);
    }

    let outcome = result.context("purchase did not complete")?;
    if !outcome.is_success() {
        bail!("{}", outcome.message());
    }
    Ok(())
}

fn redraw(orchestrator: &Orchestrator, shown: &mut String, quiet: bool) {
    if quiet {
        return;
    }
    let Some(snapshot) = orchestrator.snapshot() else {
        return;
    };
    let text = render::render(&snapshot);
    if text != *shown {
        print!("{}", text);
        println!();
        *shown = text;
    }
}

fn show_library(conn: &ConnectionArgs, json: bool) -> Result<()> {
    let ledger = open_ledger(conn)?;
    let records = ledger.list()?;

    if json {
        println!("{}", serde_json::to_string_pretty(&records)?);
        return Ok(());
    }
    if records.is_empty() {
        println!("No purchases yet.");
        return Ok(());
    }
    for record in records {
        println!(
            "{}  {:<13}  {:>8} sats  {:>9}  {}",
            record.purchased_at.format("%Y-%m-%d %H:%M"),
            record.mode.label(),
            record.price_sats,
            format_size(record.size_bytes),
            record.file_name
        );
        println!("    {}  {}", record.content_hash, record.output_path);
    }
    Ok(())
}

fn remove(conn: &ConnectionArgs, content_hash: &str) -> Result<()> {
    let ledger = open_ledger(conn)?;
    match ledger.remove(content_hash)? {
        Some(record) => println!("Removed {} ({})", record.file_name, record.content_hash),
        None => println!("No purchase recorded for {}", content_hash),
    }
    Ok(())
}

async fn watch(gateway: Arc<HttpGateway>, config: &CheckoutConfig) -> Result<()> {
    let (tx, mut rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
    let supervisor = EventStreamSupervisor::new(gateway, config)
        .replay_history(true)
        .spawn(tx);

    let shutdown = shutdown_signal();
    tokio::pin!(shutdown);
    loop {
        tokio::select! {
            next = rx.recv() => match next {
                Some(event) => println!("{}", serde_json::to_string(&event)?),
                None => break,
            },
            _ = &mut shutdown => break,
        }
    }
    supervisor.abort();
    Ok(())
}

fn print_version() {
    println!("conduit-buyer {}", env!("CARGO_PKG_VERSION"));
    println!("rustc         {}", rustc_version());
}

/// Returns the Rust compiler version used to build this binary.
fn rustc_version() -> &'static str {
    option_env!("RUSTC_VERSION").unwrap_or("unknown")
}

/// Waits for SIGINT (Ctrl+C) or SIGTERM, whichever comes first.
///
/// If a handler cannot be installed, that signal is never reported.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::warn!(error = %e, "failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                tracing::warn!(error = %e, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}
