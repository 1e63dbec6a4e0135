use clap::{Parser, Subcommand};
use color_eyre::eyre::eyre;
use color_eyre::Result;
use serde_json::json;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::sync::mpsc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use offsync::config::Config;
use offsync::engine::{CacheEngine, ControlMessage, Effect, Event};
use offsync::event::{render_effect, render_outcome, EventHandler, Input};
use offsync::http::{Method, Request};
use offsync::network::{HttpNetwork, Network};
use offsync::notify::LogSurface;
use offsync::{SqliteStorage, Storage, UnavailableStorage};

#[derive(Parser, Debug)]
#[command(name = "offsync")]
#[command(about = "Offline resource cache and mutation replay for web clients")]
#[command(version)]
struct Args {
  /// Path to config file (default: ./offsync.yaml, then $XDG_CONFIG_HOME/offsync/config.yaml)
  #[arg(short, long)]
  config: Option<PathBuf>,

  #[command(subcommand)]
  command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
  /// Pre-warm the static partition of the configured generation
  Install,
  /// Activate the installed generation and delete stale partitions
  Activate,
  /// Resolve a GET request through the cache strategies
  Fetch { url: String },
  /// Send a mutating request, queueing it if the network is unreachable
  Send {
    method: Method,
    url: String,
    #[arg(short, long)]
    body: Option<String>,
    /// Request header as `name:value`
    #[arg(short = 'H', long = "header")]
    headers: Vec<String>,
  },
  /// Replay queued mutations now
  Drain,
  /// Best-effort pre-cache of URLs into the dynamic partition
  Prime { urls: Vec<String> },
  /// List cache partitions and their entry counts
  Partitions,
  /// List queued mutations
  Queue {
    /// Show dead-lettered mutations instead
    #[arg(long)]
    dead: bool,
  },
  /// Decode and display a push payload
  Push { payload: String },
  /// Serve the NDJSON host protocol on stdin/stdout
  Serve,
}

#[tokio::main]
async fn main() -> Result<()> {
  color_eyre::install()?;

  let args = Args::parse();
  let config = Config::load(args.config.as_deref())?;
  let _guard = init_tracing()?;

  let network = HttpNetwork::with_timeout(config.network_timeout())?;
  let surface = Arc::new(LogSurface);

  let path = config.resolved_storage_path()?;
  match SqliteStorage::open(&path) {
    Ok(store) => {
      info!("using cache database at {}", path.display());
      let engine = CacheEngine::new(config, store, network, surface)?;
      run(engine, args.command).await
    }
    Err(e) => {
      warn!("storage unavailable, running network-only: {}", e);
      let engine = CacheEngine::new(config, UnavailableStorage, network, surface)?;
      run(engine, args.command).await
    }
  }
}

/// Log to a daily file in the data directory; stdout carries command output.
fn init_tracing() -> Result<tracing_appender::non_blocking::WorkerGuard> {
  let dir = Config::data_dir()?;
  std::fs::create_dir_all(&dir)
    .map_err(|e| eyre!("Failed to create log directory {}: {}", dir.display(), e))?;

  let appender = tracing_appender::rolling::daily(&dir, "offsync.log");
  let (writer, guard) = tracing_appender::non_blocking(appender);

  let filter = EnvFilter::try_from_env("OFFSYNC_LOG").unwrap_or_else(|_| EnvFilter::new("info"));
  tracing_subscriber::fmt()
    .with_env_filter(filter)
    .with_writer(writer)
    .with_ansi(false)
    .init();

  Ok(guard)
}

async fn run<S, N>(engine: CacheEngine<S, N>, command: Command) -> Result<()>
where
  S: Storage + 'static,
  N: Network + 'static,
{
  // install starts a fresh generation; everything else resumes from disk
  if !matches!(command, Command::Install) {
    match engine.restore() {
      Ok(state) => info!("generation {} resumed as {}", engine.generation().version, state),
      Err(e) => warn!("could not resume from storage: {}", e),
    }
  }

  match command {
    Command::Install => emit(&engine.handle(Event::Install).await),
    Command::Activate => emit(&engine.handle(Event::Activate).await),
    Command::Fetch { url } => {
      let outcome = engine.fetch(Request::get(url)).await;
      println!("{}", render_outcome(&outcome));
    }
    Command::Send {
      method,
      url,
      body,
      headers,
    } => {
      let mut request = Request::new(method, url);
      for header in headers {
        let (name, value) = header
          .split_once(':')
          .ok_or_else(|| eyre!("Invalid header '{}', expected name:value", header))?;
        request = request.with_header(name.trim(), value.trim());
      }
      if let Some(body) = body {
        request = request.with_body(body);
      }
      let outcome = engine.fetch(request).await;
      println!("{}", render_outcome(&outcome));
    }
    Command::Drain => {
      let outcomes = engine.drain().await?;
      emit(&Effect::Drained(outcomes));
    }
    Command::Prime { urls } => {
      emit(&engine.handle(Event::Control(ControlMessage::Prime { urls })).await)
    }
    Command::Partitions => {
      for name in engine.partitions()? {
        let count = engine.entries(&name)?.len();
        println!("{}", json!({ "partition": name, "entries": count }));
      }
    }
    Command::Queue { dead } => {
      let mutations = if dead {
        engine.dead_letters()?
      } else {
        engine.pending_mutations()?
      };
      for mutation in mutations {
        println!("{}", serde_json::to_string(&mutation)?);
      }
    }
    Command::Push { payload } => emit(&engine.handle(Event::Push(payload.into_bytes())).await),
    Command::Serve => serve(engine).await?,
  }

  Ok(())
}

fn emit(effect: &Effect) {
  println!("{}", render_effect(None, effect));
}

/// Lifecycle events run in arrival order; everything else runs concurrently.
fn is_sequential(event: &Event) -> bool {
  matches!(
    event,
    Event::Install | Event::Activate | Event::Control(_) | Event::NewerGeneration(_)
  )
}

async fn serve<S, N>(engine: CacheEngine<S, N>) -> Result<()>
where
  S: Storage + 'static,
  N: Network + 'static,
{
  let retry_interval = Duration::from_secs(engine.config().queue.retry_interval_secs.max(1));
  let mut events = EventHandler::new(retry_interval);

  let (out_tx, mut out_rx) = mpsc::unbounded_channel::<String>();
  let writer = tokio::spawn(async move {
    let mut stdout = tokio::io::stdout();
    while let Some(line) = out_rx.recv().await {
      if stdout.write_all(line.as_bytes()).await.is_err()
        || stdout.write_all(b"\n").await.is_err()
        || stdout.flush().await.is_err()
      {
        break;
      }
    }
  });

  info!("serving host protocol");
  while let Some(input) = events.next().await {
    match input {
      Input::Host { id, event } if is_sequential(&event) => {
        let effect = engine.handle(event).await;
        let _ = out_tx.send(render_effect(id.as_ref(), &effect).to_string());
      }
      Input::Host { id, event } => {
        let engine = engine.clone();
        let tx = out_tx.clone();
        tokio::spawn(async move {
          let effect = engine.handle(event).await;
          let _ = tx.send(render_effect(id.as_ref(), &effect).to_string());
        });
      }
      Input::Tick => {
        let engine = engine.clone();
        let tx = out_tx.clone();
        tokio::spawn(async move {
          if let Effect::Drained(outcomes) = engine.handle(Event::RetryTick).await {
            if !outcomes.is_empty() {
              let _ = tx.send(render_effect(None, &Effect::Drained(outcomes)).to_string());
            }
          }
        });
      }
      Input::Malformed { error } => {
        warn!("malformed host message: {}", error);
        let _ = out_tx.send(render_effect(None, &Effect::Failed(error)).to_string());
      }
      Input::Closed => break,
    }
  }

  info!("host closed stdin, shutting down");
  drop(out_tx);
  writer
    .await
    .map_err(|e| eyre!("Output writer failed: {}", e))?;
  Ok(())
}
