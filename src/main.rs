//! favsync: command-line front end for the favorites engine.
//!
//! Usage: favsync [-v] [-c <config>] <list | toggle <key>... | status | demo | config>

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use chrono::{TimeZone, Utc};
use tokio::sync::broadcast::error::RecvError;

use favsync::remote::FavoritesRemote;
use favsync::{cache, Config, FavoritesEngine, FavoritesEvent, HttpFavoritesClient, MemoryRemote};

const USAGE: &str = "Usage: favsync [-v] [-c <config>] <command>

Commands:
  list            Show the effective favorites
  toggle <key>... Toggle keys and wait until the remote agrees
  status          Show load status and pending changes
  demo            Run the sync scenarios against an in-memory remote
  config          Print the config path and an example config";

/// How long `toggle` waits past the overlay TTL before giving up.
const SETTLE_MARGIN: Duration = Duration::from_secs(5);

enum Command {
    List,
    Toggle(Vec<String>),
    Status,
    Demo,
    ShowConfig,
}

struct Args {
    verbose: bool,
    config: Option<PathBuf>,
    command: Command,
}

fn parse_args() -> Result<Args> {
    let mut verbose = false;
    let mut config = None;
    let mut rest = Vec::new();

    let mut args = std::env::args().skip(1);
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "-v" | "--verbose" => verbose = true,
            "-c" | "--config" => {
                let path = args.next().context("-c requires a path")?;
                config = Some(PathBuf::from(path));
            }
            "-h" | "--help" => {
                println!("{USAGE}");
                std::process::exit(0);
            }
            _ => rest.push(arg),
        }
    }

    let mut rest = rest.into_iter();
    let command = match rest.next().as_deref() {
        Some("list") => Command::List,
        Some("toggle") => {
            let keys: Vec<String> = rest.collect();
            if keys.is_empty() {
                bail!("toggle needs at least one key");
            }
            Command::Toggle(keys)
        }
        Some("status") => Command::Status,
        Some("demo") => Command::Demo,
        Some("config") => Command::ShowConfig,
        Some(other) => bail!("unknown command {other:?}"),
        None => bail!("missing command"),
    };

    Ok(Args {
        verbose,
        config,
        command,
    })
}

#[tokio::main(flavor = "current_thread")]
async fn main() {
    let args = match parse_args() {
        Ok(args) => args,
        Err(e) => {
            eprintln!("{e}\n\n{USAGE}");
            std::process::exit(2);
        }
    };

    let level = if args.verbose {
        tracing::Level::DEBUG
    } else {
        tracing::Level::INFO
    };
    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_writer(std::io::stderr)
        .init();

    if let Err(e) = run(args).await {
        eprintln!("Error: {e:#}");
        std::process::exit(1);
    }
}

async fn run(args: Args) -> Result<()> {
    let config = match args.config {
        Some(ref path) => Config::load_from(path)?,
        None => Config::load()?,
    };

    match args.command {
        Command::List => cmd_list(&config).await,
        Command::Toggle(keys) => cmd_toggle(&config, &keys).await,
        Command::Status => cmd_status(&config).await,
        Command::Demo => cmd_demo(&config).await,
        Command::ShowConfig => cmd_config(args.config),
    }
}

async fn connect(config: &Config) -> Result<FavoritesEngine> {
    let client = HttpFavoritesClient::new(&config.remote)?;
    if !client.has_token() {
        tracing::warn!(
            env = %config.remote.token_env,
            "No API token configured; requests are sent unauthenticated"
        );
    }
    let remote: Arc<dyn FavoritesRemote> = Arc::new(client);
    let engine = FavoritesEngine::new(remote, cache::open(&config.cache), config);
    engine.start().await;
    Ok(engine)
}

async fn cmd_list(config: &Config) -> Result<()> {
    let engine = connect(config).await?;
    if let Some(error) = engine.load_error() {
        eprintln!("Warning: {error}");
    }

    for key in engine.effective_favorites() {
        let marker = if engine.is_pending(&key) { " (pending)" } else { "" };
        println!("{key}{marker}");
    }
    Ok(())
}

async fn cmd_toggle(config: &Config, keys: &[String]) -> Result<()> {
    let engine = connect(config).await?;

    let mut failed = 0;
    for key in keys {
        match engine.toggle_favorite(key).await {
            Ok(true) => println!("★ {key}"),
            Ok(false) => println!("☆ {key}"),
            Err(e) => {
                eprintln!("{e:#}");
                failed += 1;
            }
        }
    }

    let deadline = config.sync.overlay_ttl() + SETTLE_MARGIN;
    settle(&engine, deadline).await;

    if failed > 0 {
        bail!("{failed} of {} toggles failed", keys.len());
    }
    Ok(())
}

/// Wait until no overlay entries remain, reporting convergence as it happens.
async fn settle(engine: &FavoritesEngine, deadline: Duration) {
    let mut events = engine.subscribe();
    let wait = async {
        while !engine.overlay_entries().is_empty() {
            match events.recv().await {
                Ok(FavoritesEvent::Converged { key }) => println!("✓ {key} confirmed by server"),
                Ok(FavoritesEvent::Expired { key }) => {
                    println!("? {key} not confirmed yet, server may still catch up")
                }
                Ok(_) | Err(RecvError::Lagged(_)) => {}
                Err(RecvError::Closed) => break,
            }
        }
    };

    if tokio::time::timeout(deadline, wait).await.is_err() {
        tracing::warn!("Gave up waiting for pending favorites to converge");
    }
}

async fn cmd_status(config: &Config) -> Result<()> {
    let engine = connect(config).await?;

    println!("load status:    {}", engine.load_status());
    if let Some(error) = engine.load_error() {
        println!("load error:     {error}");
    }
    match engine.server_snapshot() {
        Some(keys) => {
            let fetched = engine
                .snapshot_fetched_at()
                .map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string())
                .unwrap_or_default();
            println!("server keys:    {} (fetched {fetched})", keys.len());
        }
        None => println!("server keys:    (not loaded)"),
    }
    println!("effective keys: {}", engine.effective_favorites().len());
    println!(
        "overlay cache:  {}",
        if engine.overlay_is_durable() { "persistent" } else { "memory only" }
    );

    let entries = engine.overlay_entries();
    if entries.is_empty() {
        println!("pending:        none");
        return Ok(());
    }
    println!("pending:");
    let now_ms = Utc::now().timestamp_millis();
    for (key, entry) in entries.iter() {
        let updated = Utc
            .timestamp_millis_opt(entry.updated_at)
            .single()
            .map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string())
            .unwrap_or_else(|| entry.updated_at.to_string());
        println!(
            "  {key}: {} ({:?}, attempt {}, since {updated}, {}s ago)",
            if entry.desired { "favorite" } else { "unfavorite" },
            entry.status,
            entry.attempts,
            entry.age_ms(now_ms) / 1000,
        );
    }
    Ok(())
}

/// Replays the two reference scenarios: a toggle that converges and one
/// whose write fails.
async fn cmd_demo(config: &Config) -> Result<()> {
    let memory = Arc::new(MemoryRemote::new(Duration::from_millis(500)));
    memory.seed(["a.mp4"]);
    let remote: Arc<dyn FavoritesRemote> = memory.clone();
    let engine = FavoritesEngine::new(remote, None, config);
    engine.start().await;

    println!("server:    {:?}", engine.effective_favorites());

    let pending = engine.toggle_favorite("b.mp4");
    println!("toggled b: {:?}", engine.effective_favorites());
    pending.await?;
    settle(&engine, config.sync.overlay_ttl() + SETTLE_MARGIN).await;
    println!("converged: {:?} (overlay: {} entries)", engine.effective_favorites(), engine.overlay_entries().len());

    memory.fail_next_writes(1);
    let pending = engine.toggle_favorite("c.mp4");
    println!("toggled c: {:?}", engine.effective_favorites());
    match pending.await {
        Ok(_) => bail!("write to c.mp4 was expected to fail"),
        Err(e) => println!("failed:    {e:#}"),
    }
    println!("reverted:  {:?}", engine.effective_favorites());
    Ok(())
}

fn cmd_config(explicit: Option<PathBuf>) -> Result<()> {
    let path = match explicit {
        Some(path) => path,
        None => Config::config_path()?,
    };
    println!("# {}", path.display());
    println!("{}", Config::example_config());
    Ok(())
}
