//! periscope - remote agent monitor
//!
//! Terminal UI for watching a long-running agent backend: live output log,
//! session roster, notifications, and a message box for steering the agent
//! mid-task.

mod app;
mod ui;

use std::io;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use crossterm::{
    event::{self, Event},
    execute,
    terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen},
};
use periscope_core::{Config, HttpGateway, SyncEngine};
use ratatui::{backend::CrosstermBackend, Terminal};

use crate::app::App;

#[derive(Parser)]
#[command(name = "periscope")]
#[command(about = "Monitor and steer a remote agent backend")]
#[command(version)]
struct Args {
    /// Backend base URL (overrides the config file)
    #[arg(short, long)]
    server: Option<String>,

    /// Path to an alternate config file
    #[arg(long)]
    config: Option<PathBuf>,

    /// Context id to select on startup
    #[arg(long)]
    context: Option<String>,
}

fn main() -> Result<()> {
    let args = Args::parse();

    // Load configuration
    let mut config = match &args.config {
        Some(path) => Config::load_from(path).context("failed to load configuration")?,
        None => Config::load().context("failed to load configuration")?,
    };
    if let Some(server) = args.server {
        config.server.url = Some(server);
    }
    config.validate().context("invalid configuration")?;

    // Initialize logging (to file, not stdout since we have a TUI)
    let _log_guard =
        periscope_core::logging::init(&config.logging).context("failed to initialize logging")?;

    tracing::info!("periscope TUI starting up");

    // Build the engine on its own runtime; the UI thread stays synchronous.
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(2)
        .enable_all()
        .build()
        .context("failed to create async runtime")?;

    let gateway = Arc::new(HttpGateway::new(&config.server).context("failed to create gateway")?);
    let engine = Arc::new(SyncEngine::new(gateway, &config));

    if let Some(context) = args.context {
        runtime.block_on(engine.select_context(Some(context)));
    }

    {
        let _enter = runtime.enter();
        Arc::clone(&engine).start();
    }

    // Create app state
    let mut app = App::new(
        Arc::clone(&engine),
        runtime.handle().clone(),
        &config.ui.hidden_kinds,
    );

    // Setup terminal
    enable_raw_mode().context("failed to enable raw mode")?;
    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen).context("failed to enter alternate screen")?;
    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend).context("failed to create terminal")?;

    // Run the main loop
    let result = run_app(&mut terminal, &mut app);

    // Stop the poll loop before tearing down the terminal
    engine.stop();

    // Restore terminal
    disable_raw_mode().context("failed to disable raw mode")?;
    execute!(terminal.backend_mut(), LeaveAlternateScreen)
        .context("failed to leave alternate screen")?;
    terminal.show_cursor().context("failed to show cursor")?;

    tracing::info!("periscope TUI shutting down");

    result
}

/// Run the main application loop.
fn run_app(terminal: &mut Terminal<CrosstermBackend<io::Stdout>>, app: &mut App) -> Result<()> {
    loop {
        // Pull a fresh snapshot from the engine each frame
        app.refresh();

        // Render
        terminal.draw(|frame| ui::render(frame, app))?;

        // Handle events
        if event::poll(std::time::Duration::from_millis(100))? {
            if let Event::Key(key) = event::read()? {
                app.handle_key(key);
            }
        }

        // Check if we should quit
        if app.should_quit {
            break;
        }
    }

    Ok(())
}
