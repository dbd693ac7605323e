//! asset-sync: command-line client for the collection sync engine.
//!
//! Usage: asset-sync [--config PATH] <command>
//!   status                        load every collection and report its state
//!   pull <collection>             print a collection as JSON
//!   push <collection> <file.json> save a JSON file through the engine
//!   example-config                print the default configuration

use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use futures_util::future::{join_all, FutureExt, LocalBoxFuture};
use tracing_subscriber::EnvFilter;

use asset_sync::collections::{self, CollectionSpec, CollectionValue};
use asset_sync::{Config, SyncContext, SyncPhase};

const USAGE: &str = "\
Usage: asset-sync [--config PATH] <command>

Commands:
  status                          load every collection and report its state
  pull <collection>               print a collection as JSON
  push <collection> <file.json>   save a JSON file through the sync engine
  example-config                  print the default configuration";

enum Command {
    Status,
    Pull(String),
    Push(String, PathBuf),
    ExampleConfig,
}

/// Run `$body` with `$spec` bound to the catalog entry named `$name`.
macro_rules! with_collection {
    ($name:expr, $spec:ident => $body:expr) => {
        match $name {
            collections::TEMPLATES => {
                let $spec = collections::templates();
                $body
            }
            collections::SAVED_ITEMS => {
                let $spec = collections::saved_items();
                $body
            }
            collections::CUSTOM_CLOUDS => {
                let $spec = collections::custom_clouds();
                $body
            }
            collections::CLOUD_CATEGORIES => {
                let $spec = collections::cloud_categories();
                $body
            }
            collections::STATUS_SYMBOLS => {
                let $spec = collections::status_symbols();
                $body
            }
            collections::CONTACTS => {
                let $spec = collections::contacts();
                $body
            }
            collections::LINKS => {
                let $spec = collections::links();
                $body
            }
            other => bail!(
                "Unknown collection {:?} (known: {})",
                other,
                collections::ALL.join(", ")
            ),
        }
    };
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("asset_sync=info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let args: Vec<String> = std::env::args().skip(1).collect();
    let (config_path, command) = match parse_args(&args) {
        Ok(parsed) => parsed,
        Err(e) => {
            eprintln!("{}\n\n{}", e, USAGE);
            std::process::exit(2);
        }
    };

    if let Command::ExampleConfig = command {
        print!("{}", Config::example_config());
        return Ok(());
    }

    let config = match config_path {
        Some(ref path) => Config::load_from(path)?,
        None => Config::load()?,
    };
    let ctx = SyncContext::from_config(&config).context("Failed to set up sync context")?;
    tracing::debug!("Syncing against {} as {:?}", config.remote.base_url, ctx.identity());

    match command {
        Command::Status => status(&ctx).await,
        Command::Pull(name) => with_collection!(name.as_str(), spec => pull(&ctx, spec).await),
        Command::Push(name, file) => {
            with_collection!(name.as_str(), spec => push(&ctx, spec, &file).await)
        }
        Command::ExampleConfig => Ok(()),
    }
}

fn parse_args(args: &[String]) -> Result<(Option<PathBuf>, Command)> {
    let mut config_path = None;
    let mut rest = Vec::new();
    let mut iter = args.iter();
    while let Some(arg) = iter.next() {
        match arg.as_str() {
            "--config" | "-c" => {
                let path = iter.next().context("--config needs a path")?;
                config_path = Some(PathBuf::from(path));
            }
            "--help" | "-h" => bail!("asset-sync {}", env!("CARGO_PKG_VERSION")),
            _ => rest.push(arg.as_str()),
        }
    }

    let command = match rest.as_slice() {
        ["status"] => Command::Status,
        ["pull", name] => Command::Pull(name.to_string()),
        ["push", name, file] => Command::Push(name.to_string(), PathBuf::from(file)),
        ["example-config"] => Command::ExampleConfig,
        [] => bail!("No command given"),
        other => bail!("Unrecognized arguments: {}", other.join(" ")),
    };
    Ok((config_path, command))
}

struct StatusRow {
    name: String,
    count: usize,
    phase: SyncPhase,
    using_fallback: bool,
}

async fn summarize<T: CollectionValue>(ctx: &SyncContext, spec: CollectionSpec<T>) -> StatusRow {
    let engine = ctx.engine(spec);
    let state = engine.load().await;
    engine.shutdown();
    StatusRow {
        name: engine.name().to_string(),
        count: state.value.item_count(),
        phase: state.phase,
        using_fallback: state.using_fallback,
    }
}

async fn status(ctx: &SyncContext) -> Result<()> {
    let loads: Vec<LocalBoxFuture<'_, StatusRow>> = vec![
        summarize(ctx, collections::templates()).boxed_local(),
        summarize(ctx, collections::saved_items()).boxed_local(),
        summarize(ctx, collections::custom_clouds()).boxed_local(),
        summarize(ctx, collections::cloud_categories()).boxed_local(),
        summarize(ctx, collections::status_symbols()).boxed_local(),
        summarize(ctx, collections::contacts()).boxed_local(),
        summarize(ctx, collections::links()).boxed_local(),
    ];
    let rows = join_all(loads).await;

    println!("{:<20} {:>6}  {:<15} SOURCE", "COLLECTION", "ITEMS", "PHASE");
    for row in &rows {
        let phase = format!("{:?}", row.phase);
        let source = if row.using_fallback { "local cache" } else { "remote" };
        println!("{:<20} {:>6}  {:<15} {}", row.name, row.count, phase, source);
    }

    let ledger = ctx.ledger().all().await;
    if !ledger.is_empty() {
        println!();
        println!("Last known good:");
        for (key, entry) in &ledger {
            println!(
                "  {:<28} {:>6}  {}",
                key,
                entry.item_count,
                entry.observed_at.format("%Y-%m-%d %H:%M:%S UTC")
            );
        }
    }
    Ok(())
}

async fn pull<T: CollectionValue>(ctx: &SyncContext, spec: CollectionSpec<T>) -> Result<()> {
    let engine = ctx.engine(spec);
    let state = engine.load().await;
    engine.shutdown();

    if state.using_fallback {
        eprintln!("warning: {} is the locally cached copy; the remote store did not confirm it", engine.name());
    }
    let json = serde_json::to_string_pretty(&state.value).context("Failed to serialize collection")?;
    println!("{}", json);
    Ok(())
}

async fn push<T: CollectionValue>(ctx: &SyncContext, spec: CollectionSpec<T>, file: &Path) -> Result<()> {
    let contents = std::fs::read_to_string(file)
        .with_context(|| format!("Failed to read {}", file.display()))?;
    let next: T = serde_json::from_str(&contents)
        .with_context(|| format!("{} is not a valid {} value", file.display(), spec.name))?;

    let engine = ctx.engine(spec);
    engine.load().await;
    engine
        .save(next)
        .await
        .with_context(|| format!("Write to {} refused", engine.name()))?;
    engine.settle().await;
    let state = engine.snapshot();
    engine.shutdown();

    if state.using_fallback {
        println!(
            "{}: kept {} items in the local cache; the remote store is unreachable",
            engine.name(),
            state.value.item_count()
        );
    } else {
        println!("{}: synced {} items", engine.name(), state.value.item_count());
    }
    Ok(())
}
