use clap::{Parser, Subcommand};
use color_eyre::{eyre::eyre, Result};
use serde::Serialize;
use serde_json::Value;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;
use url::Url;

use syncvault::config::Config;
use syncvault::intercept::{BackgroundAgent, Interceptor, ReqwestTransport, RouteTable};
use syncvault::orchestrator::{Orchestrator, ReadOutcome, ReadStrategy, WriteRequest};
use syncvault::queue::{EnqueueOptions, QueueStatus};
use syncvault::reconcile::Resource;
use syncvault::remote::{Credentials, HttpRemote};
use syncvault::store::Store;
use syncvault::{logging, Connectivity, EventBus, EventKind, SyncEvent};

#[derive(Parser, Debug)]
#[command(name = "syncvault")]
#[command(about = "Offline-first sync and caching engine for a remote tooling service")]
#[command(version)]
struct Args {
  /// Path to config file (default: $XDG_CONFIG_HOME/syncvault/config.yaml)
  #[arg(short, long, global = true)]
  config: Option<PathBuf>,

  /// Log to stderr instead of the log file
  #[arg(short, long, global = true)]
  verbose: bool,

  /// Start disconnected: writes are queued without contacting the service
  #[arg(long, global = true)]
  offline: bool,

  #[command(subcommand)]
  command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
  /// List the catalog, or show one entry
  Catalog {
    name: Option<String>,
    #[arg(short, long, default_value = "cache-first")]
    strategy: ReadStrategy,
    /// Only entries in this category (local data)
    #[arg(long, conflicts_with = "name")]
    category: Option<String>,
  },
  /// List operation records, or show one
  Records {
    id: Option<String>,
    #[arg(short, long, default_value = "network-first")]
    strategy: ReadStrategy,
    /// Only records with this status (local data)
    #[arg(long, conflicts_with = "id")]
    status: Option<String>,
  },
  /// Submit an operation
  Execute {
    name: String,
    /// Parameters as a JSON object
    #[arg(short, long, default_value = "{}")]
    params: String,
    /// Queue priority if the operation has to be deferred
    #[arg(long, default_value_t = 0)]
    priority: i64,
  },
  /// Apply a JSON merge patch to a record
  Update { id: String, patch: String },
  /// Delete a record
  Delete { id: String },
  /// Log in; prints the session token
  Login { username: String },
  /// Refetch everything and replay the queue
  Sync,
  /// Storage and queue statistics
  Stats,
  /// Inspect and maintain the offline queue
  Queue {
    #[command(subcommand)]
    action: QueueAction,
  },
  /// Read or write a preference
  Pref {
    #[command(subcommand)]
    action: PrefAction,
  },
  /// Run the background agent until interrupted; SIGUSR1 forces a pass
  Agent,
}

#[derive(Subcommand, Debug)]
enum QueueAction {
  /// List queued items
  List {
    #[arg(long)]
    status: Option<String>,
  },
  /// Give a failed item a fresh retry budget
  Retry { id: String },
  /// Remove a pending item
  Remove { id: String },
  /// Purge completed and failed items
  Cleanup {
    /// Only items finished more than this many days ago
    #[arg(long)]
    older_than_days: Option<i64>,
  },
}

#[derive(Subcommand, Debug)]
enum PrefAction {
  Get { key: String },
  /// VALUE is parsed as JSON, falling back to a plain string
  Set { key: String, value: String },
  List,
}

struct Engine {
  orchestrator: Orchestrator,
  interceptor: Arc<Interceptor>,
}

async fn build(config: &Config, offline: bool) -> Result<Engine> {
  let store = match &config.storage.path {
    Some(path) => Store::open(path),
    None => Store::open_default(),
  };

  let transport = ReqwestTransport::new(config.timeout(), Config::get_api_token())?;
  let base_url = Url::parse(&config.service.url)
    .map_err(|e| eyre!("Invalid service URL {}: {}", config.service.url, e))?;
  let interceptor = Arc::new(Interceptor::new(
    Arc::new(transport),
    store.as_ref().ok().cloned(),
    base_url,
    RouteTable::with_overrides(config.intercept.routes.clone()),
    config.interceptor_options(),
  ));
  interceptor.start().await?;

  let events = EventBus::new();
  events.on(EventKind::StorageUnavailable, |event| {
    if let SyncEvent::StorageUnavailable { reason } = event {
      eprintln!("warning: local storage unavailable ({}); running network-only", reason);
    }
  });

  let orchestrator = Orchestrator::new(
    Arc::new(HttpRemote::new(Arc::clone(&interceptor))),
    store,
    events,
    Connectivity::new(!offline),
    config.orchestrator_options(),
  );

  Ok(Engine {
    orchestrator,
    interceptor,
  })
}

fn print<T: Serialize>(value: &T) -> Result<()> {
  println!("{}", serde_json::to_string_pretty(value)?);
  Ok(())
}

fn print_outcome(outcome: ReadOutcome<Value>) -> Result<()> {
  if !outcome.is_available() {
    eprintln!("Service unreachable and nothing stored locally");
  }
  print(&outcome)
}

/// Block until Ctrl-C. On unix, SIGUSR1 requests an immediate agent pass.
#[cfg(unix)]
async fn wait_for_shutdown(agent: &BackgroundAgent) -> Result<()> {
  use tokio::signal::unix::{signal, SignalKind};

  let mut wake = signal(SignalKind::user_defined1())?;
  loop {
    tokio::select! {
      result = tokio::signal::ctrl_c() => return Ok(result?),
      _ = wake.recv() => {
        info!("sync requested by signal");
        agent.wake();
      }
    }
  }
}

#[cfg(not(unix))]
async fn wait_for_shutdown(_agent: &BackgroundAgent) -> Result<()> {
  Ok(tokio::signal::ctrl_c().await?)
}

fn parse_json(input: &str, what: &str) -> Result<Value> {
  serde_json::from_str(input).map_err(|e| eyre!("Invalid {} JSON: {}", what, e))
}

fn parse_status(status: &str) -> Result<QueueStatus> {
  serde_json::from_value(Value::String(status.to_string()))
    .map_err(|_| eyre!("Unknown queue status '{}'", status))
}

async fn run(command: Command, engine: Engine, config: &Config) -> Result<()> {
  let orchestrator = &engine.orchestrator;

  match command {
    Command::Catalog {
      name,
      strategy,
      category,
    } => match category {
      Some(category) => print(&orchestrator.catalog_by_category(&category)?)?,
      None => print_outcome(
        orchestrator
          .read(Resource::Catalog, name.as_deref(), strategy)
          .await?,
      )?,
    },
    Command::Records {
      id,
      strategy,
      status,
    } => match status {
      Some(status) => print(&orchestrator.records_by_status(&status)?)?,
      None => print_outcome(
        orchestrator
          .read(Resource::Records, id.as_deref(), strategy)
          .await?,
      )?,
    },
    Command::Execute {
      name,
      params,
      priority,
    } => {
      let request = WriteRequest::execute(name, parse_json(&params, "parameters")?);
      let options = EnqueueOptions::default()
        .with_priority(priority)
        .with_max_retries(config.queue.max_retries);
      print(&orchestrator.write_with(request, options).await?)?;
    }
    Command::Update { id, patch } => {
      let patch = parse_json(&patch, "patch")?;
      print(&orchestrator.write(WriteRequest::UpdateRecord { id, patch }).await?)?;
    }
    Command::Delete { id } => {
      print(&orchestrator.write(WriteRequest::DeleteRecord { id }).await?)?;
    }
    Command::Login { username } => {
      let credentials = Credentials {
        username,
        password: Config::get_password()?,
      };
      let session = orchestrator.login(&credentials).await?;
      println!("{}", session.token);
    }
    Command::Sync => print(&orchestrator.force_sync().await?)?,
    Command::Stats => print(&orchestrator.get_stats()?)?,
    Command::Queue { action } => {
      let queue = orchestrator
        .queue()
        .ok_or_else(|| eyre!("Local storage unavailable; there is no offline queue"))?;
      match action {
        QueueAction::List { status } => match status {
          Some(status) => print(&queue.get_by_status(parse_status(&status)?)?)?,
          None => print(&queue.get_all()?)?,
        },
        QueueAction::Retry { id } => print(&queue.retry_item(&id)?)?,
        QueueAction::Remove { id } => {
          queue.remove_item(&id)?;
          println!("removed {}", id);
        }
        QueueAction::Cleanup { older_than_days } => {
          let before = older_than_days.map(|days| chrono::Utc::now() - chrono::Duration::days(days));
          let removed = queue.cleanup(before)?;
          println!("removed {} item(s)", removed);
        }
      }
    }
    Command::Pref { action } => match action {
      PrefAction::Get { key } => print(&orchestrator.get_preference::<Value>(&key)?)?,
      PrefAction::Set { key, value } => {
        let value = serde_json::from_str(&value).unwrap_or(Value::String(value));
        orchestrator.set_preference(&key, &value)?;
      }
      PrefAction::List => {
        let store = orchestrator
          .store()
          .ok_or_else(|| eyre!("Local storage unavailable"))?;
        let prefs: serde_json::Map<String, Value> = store.preferences()?.into_iter().collect();
        print(&prefs)?;
      }
    },
    Command::Agent => {
      let agent = BackgroundAgent::spawn(
        Arc::clone(&engine.interceptor),
        orchestrator.clone(),
        config.agent_interval(),
      );
      orchestrator.on(EventKind::SyncCompleted, |event| {
        if let SyncEvent::SyncCompleted {
          completed,
          failed,
          requeued,
        } = event
        {
          if completed + failed + requeued > 0 {
            println!("sync: {} completed, {} failed, {} requeued", completed, failed, requeued);
          }
        }
      });
      info!("agent running, press Ctrl-C to stop");
      wait_for_shutdown(&agent).await?;
      agent.shutdown().await;
    }
  }

  Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
  color_eyre::install()?;

  let args = Args::parse();

  // Load configuration
  let config = Config::load(args.config.as_deref())?;
  let _log_guard = logging::init(config.log.as_deref(), args.verbose, None)?;

  let engine = build(&config, args.offline).await?;
  run(args.command, engine, &config).await
}
