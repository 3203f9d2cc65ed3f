// Copyright 2025 Tomoki Hayashi
// MIT License (https://opensource.org/licenses/MIT)

//! Application entry point and event loop.
//!
//! This module:
//! - parses CLI args (paths to import, workspace, headless options)
//! - sets up logging and the tokio runtime
//! - runs either the terminal UI loop or a headless batch
//!
//! All state lives in the library; this file only wires it together.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use ratatui::Terminal;
use ratatui::backend::CrosstermBackend;
use ratatui::crossterm::event::{self, Event, KeyEventKind};
use tokio::runtime::Runtime;
use tokio::task::JoinHandle;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

use batchtag::app::App;
use batchtag::backend::HttpBackend;
use batchtag::config::Config;
use batchtag::export::{self, ExportFormat};
use batchtag::import::{self, ImportError, ImportSummary};
use batchtag::model::Scope;
use batchtag::persist::{AutoSaver, DirectoryStore, Persistence, SaveStatus};
use batchtag::scheduler::{SchedulerEvent, TagScheduler};
use batchtag::store::{ProjectStore, StoreHandle};
use batchtag::ui;
use batchtag::view;

const TICK: Duration = Duration::from_millis(50);

#[derive(Parser, Debug)]
#[command(name = "batchtag", about = "Batch image captioning workspace in the terminal")]
struct Cli {
    /// Image file(s) and/or directory path(s) to import
    paths: Vec<PathBuf>,

    /// Workspace directory (overrides config and BATCHTAG_WORKSPACE)
    #[arg(long)]
    workspace: Option<PathBuf>,

    /// Caption every pending image without the UI, then exit
    #[arg(long)]
    run: bool,

    /// Write a dataset archive to this file and exit
    #[arg(long)]
    export: Option<PathBuf>,

    /// Caption sidecar format for --export
    #[arg(long, value_enum, default_value_t = ExportFormat::Txt)]
    format: ExportFormat,

    /// Name of the project that receives loose files
    #[arg(long)]
    name: Option<String>,
}

impl Cli {
    fn headless(&self) -> bool {
        self.run || self.export.is_some()
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let mut config = Config::load();
    if let Some(dir) = &cli.workspace {
        config.workspace_dir = Some(dir.clone());
    }
    let workspace = config.workspace_dir();
    std::fs::create_dir_all(&workspace).with_context(|| format!("Failed to create workspace {workspace:?}"))?;

    let log_file = (!cli.headless()).then(|| workspace.join("batchtag.log"));
    init_tracing(&config, log_file.as_deref())?;

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .thread_name("batchtag")
        .build()?;

    if cli.headless() {
        runtime.block_on(run_headless(cli, config))
    } else {
        run_tui(&runtime, cli, config)
    }
}

/// Logs go to a file under the UI so they never land on the screen.
fn init_tracing(config: &Config, log_file: Option<&Path>) -> Result<()> {
    let default = if config.debug { "batchtag=debug" } else { "batchtag=info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| default.into());
    let registry = tracing_subscriber::registry().with(filter);
    match log_file {
        Some(path) => {
            let file = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("Failed to open log file {path:?}"))?;
            registry
                .with(fmt::layer().with_ansi(false).with_writer(Mutex::new(file)))
                .init();
        }
        None => registry.with(fmt::layer().with_writer(std::io::stderr)).init(),
    }
    Ok(())
}

async fn open_workspace(config: &Config) -> Result<(StoreHandle, AutoSaver)> {
    let dir = config.workspace_dir();
    let persistence: Arc<dyn Persistence> = Arc::new(DirectoryStore::new(&dir));
    let projects = persistence
        .load()
        .await
        .with_context(|| format!("Failed to load workspace {dir:?}"))?;
    tracing::info!(projects = projects.len(), workspace = ?dir, "workspace loaded");
    let store = StoreHandle::new(ProjectStore::from_projects(projects));
    let saver = AutoSaver::spawn(store.clone(), persistence, Duration::from_millis(config.autosave_ms));
    Ok((store, saver))
}

async fn import_cli_paths(store: &StoreHandle, cli: &Cli, config: &Config) -> Result<ImportSummary, ImportError> {
    import::import_paths(store, &cli.paths, Scope::All, cli.name.as_deref(), config.import_chunk_size).await
}

async fn run_headless(cli: Cli, config: Config) -> Result<()> {
    let (store, saver) = open_workspace(&config).await?;
    if !cli.paths.is_empty() {
        let summary = import_cli_paths(&store, &cli, &config).await?;
        eprintln!("Imported {} image(s) into {} project(s)", summary.added, summary.projects.len());
        if summary.failed > 0 {
            eprintln!("{} file(s) could not be read", summary.failed);
        }
    }

    if cli.run {
        let scheduler = TagScheduler::new(store.clone(), Arc::new(HttpBackend::new()), config.clone());
        let progress = spawn_progress(&scheduler);
        let mut missing = false;
        let run = scheduler.start_batch(Scope::All, || missing = true);
        if missing {
            saver.flush().await;
            anyhow::bail!("No API key configured. Set BATCHTAG_API_KEY or api_key in config.toml");
        }
        if let Some(run) = run {
            let end = run.wait().await;
            tracing::info!(?end, "headless run ended");
        }
        progress.abort();
    }

    if saver.flush().await == SaveStatus::Unsaved {
        eprintln!("Warning: workspace could not be saved (see log)");
    }

    if let Some(path) = &cli.export {
        let projects = store.snapshot();
        let (path, format) = (path.clone(), cli.format);
        let (path, stats) = tokio::task::spawn_blocking(move || export::export_all_to(&projects, format, path)).await??;
        eprintln!(
            "Exported {} image(s) and {} caption file(s) from {} project(s) to {}",
            stats.images,
            stats.sidecars,
            stats.projects,
            path.display()
        );
    }

    let stats = view::context_stats(&store.snapshot(), Scope::All);
    println!(
        "{} image(s): {} done, {} pending, {} error(s)",
        stats.total, stats.completed, stats.pending, stats.errors
    );
    Ok(())
}

/// Print one line per finished image.
fn spawn_progress(scheduler: &TagScheduler) -> JoinHandle<()> {
    let mut events = scheduler.subscribe();
    let store = scheduler.store().clone();
    tokio::spawn(async move {
        let (mut done, mut queued) = (0usize, 0usize);
        loop {
            match events.recv().await {
                Ok(SchedulerEvent::RunStarted { queued: n, .. }) => queued = n,
                Ok(SchedulerEvent::ItemFinished {
                    project_id,
                    image_id,
                    status,
                }) => {
                    done += 1;
                    let name = store
                        .read(|s| s.image(project_id, image_id).map(|i| i.name().to_string()))
                        .unwrap_or_default();
                    eprintln!("[{done}/{queued}] {name}: {}", status.label());
                }
                Ok(_) => {}
                Err(tokio::sync::broadcast::error::RecvError::Lagged(_)) => {}
                Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
            }
        }
    })
}

fn run_tui(runtime: &Runtime, cli: Cli, config: Config) -> Result<()> {
    let _guard = runtime.enter();
    let (store, saver) = runtime.block_on(open_workspace(&config))?;

    // Import in the background so the UI comes up at once.
    let mut import = (!cli.paths.is_empty()).then(|| {
        let store = store.clone();
        let config = config.clone();
        tokio::spawn(async move { import_cli_paths(&store, &cli, &config).await })
    });

    let scheduler = TagScheduler::new(store, Arc::new(HttpBackend::new()), config);
    let mut app = App::new(scheduler, saver, std::env::current_dir()?);

    init_terminal()?;
    let result = Terminal::new(CrosstermBackend::new(std::io::stdout()))
        .map_err(anyhow::Error::from)
        .and_then(|mut terminal| event_loop(&mut terminal, &mut app, runtime, &mut import));
    restore_terminal();

    if runtime.block_on(app.shutdown()) == SaveStatus::Unsaved {
        eprintln!("Warning: workspace could not be saved (see batchtag.log)");
    }
    result
}

fn event_loop<B: ratatui::backend::Backend>(
    terminal: &mut Terminal<B>,
    app: &mut App,
    runtime: &Runtime,
    import: &mut Option<JoinHandle<Result<ImportSummary, ImportError>>>,
) -> Result<()> {
    loop {
        app.poll_events();

        if let Some(handle) = import.take_if(|h| h.is_finished()) {
            app.message = Some(match runtime.block_on(handle) {
                Ok(Ok(summary)) => format!("Imported {} image(s)", summary.added),
                Ok(Err(err)) => err.to_string(),
                Err(err) => format!("Import failed: {err}"),
            });
        }

        terminal.draw(|frame| ui::draw(frame, app))?;
        if app.should_quit {
            break;
        }

        if event::poll(TICK)? {
            // Drain queued input before the next frame.
            loop {
                match event::read()? {
                    Event::Key(key) if key.kind == KeyEventKind::Press => app.handle_key(key),
                    Event::Mouse(mouse) => app.handle_mouse(mouse),
                    _ => {}
                }
                if app.should_quit || !event::poll(Duration::ZERO)? {
                    break;
                }
            }
        }
    }
    Ok(())
}

fn init_terminal() -> std::io::Result<()> {
    use std::io::stdout;

    use ratatui::crossterm::{
        cursor::Hide,
        event::EnableMouseCapture,
        execute,
        terminal::{Clear, ClearType, EnterAlternateScreen, enable_raw_mode},
    };

    enable_raw_mode()?;
    execute!(stdout(), EnterAlternateScreen, EnableMouseCapture, Clear(ClearType::All), Hide)?;
    Ok(())
}

fn restore_terminal() {
    use std::io::stdout;

    use ratatui::crossterm::{
        cursor::Show,
        event::DisableMouseCapture,
        execute,
        terminal::{LeaveAlternateScreen, disable_raw_mode},
    };

    let _ = disable_raw_mode();
    let _ = execute!(stdout(), DisableMouseCapture, LeaveAlternateScreen, Show);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_parses_paths() {
        let cli = Cli::try_parse_from(["batchtag", "shoot/", "a.png"]).unwrap();
        assert_eq!(cli.paths, vec![PathBuf::from("shoot/"), PathBuf::from("a.png")]);
        assert!(!cli.headless());
    }

    #[test]
    fn test_cli_allows_no_paths() {
        let cli = Cli::try_parse_from(["batchtag"]).unwrap();
        assert!(cli.paths.is_empty());
        assert_eq!(cli.format, ExportFormat::Txt);
    }

    #[test]
    fn test_cli_headless_options() {
        let cli = Cli::try_parse_from([
            "batchtag",
            "--run",
            "--export",
            "out.zip",
            "--format",
            "json",
            "--name",
            "Loose",
            "--workspace",
            "/tmp/ws",
            "pics",
        ])
        .unwrap();
        assert!(cli.run);
        assert!(cli.headless());
        assert_eq!(cli.export, Some(PathBuf::from("out.zip")));
        assert_eq!(cli.format, ExportFormat::Json);
        assert_eq!(cli.name.as_deref(), Some("Loose"));
        assert_eq!(cli.workspace, Some(PathBuf::from("/tmp/ws")));
    }

    #[test]
    fn test_export_alone_is_headless() {
        let cli = Cli::try_parse_from(["batchtag", "--export", "out.zip"]).unwrap();
        assert!(!cli.run);
        assert!(cli.headless());
    }

    #[test]
    fn test_cli_rejects_unknown_format() {
        assert!(Cli::try_parse_from(["batchtag", "--format", "csv"]).is_err());
    }
}
