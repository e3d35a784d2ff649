//! Headless viewer: open one log, print its filtered view, optionally
//! follow it live.

use crate::render::{write_event, OutputFormat};
use anyhow::Context;
use evlens_core::config::{Config, ResolverKind};
use evlens_core::dispatcher::{self, Collaborators};
use evlens_core::resolver::{ProviderDatabase, ResolverFactory};
use evlens_core::source::{LiveSubscriber, RecordSource, StatusSink};
use evlens_core::{Action, EventLogState, Filter, LogId, LogSpecifier};
use evlens_feeds::{load_database, JsonlSource, ProviderDirectory, TracingStatusSink};
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

/// What to open and how to show it.
#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    pub spec: Option<LogSpecifier>,
    pub filter: Option<String>,
    /// Keep printing live events after the initial view.
    pub follow: bool,
    /// Stop following after this long. `None` follows until Ctrl-C.
    pub duration: Option<Duration>,
    /// Start with continuous update off; live events are held in the
    /// pending buffer and flushed on exit.
    pub paused: bool,
    pub provider_dir: Option<PathBuf>,
    pub databases: Vec<PathBuf>,
    pub format: OutputFormat,
}

/// Record source, live subscriber and status sink for one run.
pub struct Feeds {
    pub source: Arc<dyn RecordSource>,
    pub live: Option<Arc<dyn LiveSubscriber>>,
    pub status: Arc<dyn StatusSink>,
}

impl Feeds {
    /// JSON-lines files from disk, status to the log.
    pub fn files() -> Self {
        let source = Arc::new(JsonlSource::new());
        Self {
            source: source.clone(),
            live: Some(source),
            status: Arc::new(TracingStatusSink),
        }
    }
}

/// Pick the resolver variant from the CLI and the `[resolver]` section.
/// Database files given on the command line win over everything else.
pub fn resolver_factory(options: &RunOptions, config: &Config) -> anyhow::Result<ResolverFactory> {
    let databases = if options.databases.is_empty() {
        config.resolver.database_paths.clone()
    } else {
        options.databases.clone()
    };
    let provider_dir = options
        .provider_dir
        .clone()
        .or_else(|| config.resolver.provider_dir.clone());

    let use_database = !options.databases.is_empty() || config.resolver.kind == ResolverKind::Database;
    if use_database {
        let db = load_database(&databases)?;
        tracing::info!(providers = db.len(), files = databases.len(), "using provider database");
        return Ok(ResolverFactory::Database(Arc::new(db)));
    }

    match provider_dir {
        Some(dir) => {
            tracing::info!(dir = %dir.display(), "using provider directory");
            Ok(ResolverFactory::Local(Arc::new(ProviderDirectory::new(dir))))
        }
        None => {
            tracing::debug!("no provider metadata configured");
            Ok(ResolverFactory::Database(Arc::new(ProviderDatabase::default())))
        }
    }
}

/// Run the viewer against `feeds`, writing events to `out`.
pub async fn run(options: RunOptions, config: Config, feeds: Feeds, out: &mut dyn Write) -> anyhow::Result<()> {
    let spec = options.spec.clone().context("no log given")?;
    let filter = match &options.filter {
        Some(query) => Filter::parse(query).with_context(|| format!("invalid filter {query:?}"))?,
        None => Filter::default(),
    };

    let mut initial = EventLogState::from_config(&config);
    if options.paused {
        initial.continuously_update = false;
    }
    let collaborators = Collaborators {
        source: feeds.source,
        live: feeds.live,
        resolvers: resolver_factory(&options, &config)?,
        status: feeds.status,
        scanner: config.scanner.clone(),
    };
    let (handle, mut snapshots, task) = dispatcher::spawn(initial, collaborators);

    if !filter.is_empty() {
        handle.send(Action::SetFilters(filter))?;
    }
    let open = Action::open_log(spec.clone());
    let Action::OpenLog { id, .. } = &open else {
        unreachable!("open_log builds OpenLog")
    };
    let id = *id;
    handle.send(open)?;

    let loaded = wait_until(&mut snapshots, |s| !s.is_loading(id)).await?;
    if !loaded.logs.contains(id) {
        let reason = loaded
            .last_error
            .clone()
            .unwrap_or_else(|| format!("opening {} was cancelled", spec.name));
        anyhow::bail!(reason);
    }

    let mut printer = Printer::new(id, options.format);
    printer.print_initial(&loaded, out)?;

    if options.follow {
        follow(&mut snapshots, &mut printer, options.duration, out).await?;

        if !snapshots.borrow().new_events.is_empty() {
            handle.send(Action::LoadNewEvents)?;
            let flushed = wait_until(&mut snapshots, |s| s.new_events.is_empty()).await?;
            printer.print_new(&flushed, out)?;
        }
    }

    drop(handle);
    task.await.context("dispatcher task failed")?;
    out.flush()?;
    Ok(())
}

async fn follow(
    snapshots: &mut watch::Receiver<Arc<EventLogState>>,
    printer: &mut Printer,
    duration: Option<Duration>,
    out: &mut dyn Write,
) -> anyhow::Result<()> {
    let deadline = async {
        match duration {
            Some(d) => tokio::time::sleep(d).await,
            None => std::future::pending().await,
        }
    };
    tokio::pin!(deadline);

    loop {
        tokio::select! {
            _ = &mut deadline => break,
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("interrupted");
                break;
            }
            changed = snapshots.changed() => {
                if changed.is_err() {
                    break;
                }
                let state = Arc::clone(&snapshots.borrow_and_update());
                printer.print_new(&state, out)?;
                if !state.continuously_update && state.is_buffer_full() {
                    tracing::info!(pending = state.new_events.len(), "pending buffer full; live updates paused");
                }
            }
        }
    }
    Ok(())
}

async fn wait_until(
    snapshots: &mut watch::Receiver<Arc<EventLogState>>,
    ready: impl Fn(&EventLogState) -> bool,
) -> anyhow::Result<Arc<EventLogState>> {
    let state = snapshots
        .wait_for(|s| ready(s))
        .await
        .context("dispatcher stopped")?;
    Ok(Arc::clone(&state))
}

/// Prints the visible events of one log, remembering how many it has shown
/// so later snapshots only print what is new.
struct Printer {
    id: LogId,
    format: OutputFormat,
    shown: usize,
}

impl Printer {
    fn new(id: LogId, format: OutputFormat) -> Self {
        Self { id, format, shown: 0 }
    }

    /// Newest-first, like the list view.
    fn print_initial(&mut self, state: &EventLogState, out: &mut dyn Write) -> anyhow::Result<()> {
        let visible = state.visible_events(self.id);
        for event in visible {
            write_event(out, event, self.format)?;
        }
        self.shown = visible.len();
        Ok(())
    }

    /// Events added since the last call, oldest-first like a tail.
    fn print_new(&mut self, state: &EventLogState, out: &mut dyn Write) -> anyhow::Result<()> {
        let visible = state.visible_events(self.id);
        let fresh = visible.len().saturating_sub(self.shown);
        for event in visible[..fresh].iter().rev() {
            write_event(out, event, self.format)?;
        }
        self.shown = visible.len();
        Ok(())
    }
}
