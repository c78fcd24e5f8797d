//! Application state for the TUI.

use std::collections::HashSet;
use std::sync::Arc;

use crossterm::event::{KeyCode, KeyEvent, KeyModifiers};
use periscope_core::{Connectivity, EngineSnapshot, LogEntry, SyncEngine};
use tokio::runtime::Handle;

/// Current input mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Mode {
    /// Navigation keys active
    #[default]
    Normal,
    /// Keystrokes go to the message box
    Editing,
    /// Context picker overlay open
    Contexts,
}

/// Main application state.
pub struct App {
    /// Engine owning all synchronization state
    engine: Arc<SyncEngine>,
    /// Handle for driving engine operations from the UI thread
    runtime: Handle,
    /// Latest engine snapshot, refreshed each frame
    pub snapshot: EngineSnapshot,
    /// Latest connectivity state
    pub connectivity: Connectivity,
    /// Current input mode
    pub mode: Mode,
    /// Message box contents
    pub input: String,
    /// Lines scrolled up from the bottom of the log
    pub scroll_offset: usize,
    /// Selected row in the context picker
    pub context_index: usize,
    /// Entry kinds hidden from the log view
    hidden_kinds: HashSet<String>,
    /// Show hidden kinds anyway (toggled with `f`)
    pub show_all_kinds: bool,
    /// Last operation error, shown in the status line until the next one
    pub last_error: Option<String>,
    /// Whether the app should exit
    pub should_quit: bool,
}

impl App {
    /// Create a new App around a running engine.
    pub fn new(engine: Arc<SyncEngine>, runtime: Handle, hidden_kinds: &[String]) -> Self {
        let snapshot = engine.snapshot();
        let connectivity = engine.connectivity_now();
        Self {
            engine,
            runtime,
            snapshot,
            connectivity,
            mode: Mode::default(),
            input: String::new(),
            scroll_offset: 0,
            context_index: 0,
            hidden_kinds: hidden_kinds.iter().cloned().collect(),
            show_all_kinds: false,
            last_error: None,
            should_quit: false,
        }
    }

    /// Pull the latest state from the engine.
    pub fn refresh(&mut self) {
        self.snapshot = self.engine.snapshot();
        self.connectivity = self.engine.connectivity_now();
        if self.context_index >= self.snapshot.contexts.len() {
            self.context_index = self.snapshot.contexts.len().saturating_sub(1);
        }
    }

    /// Entries to display: the merged view minus hidden kinds.
    ///
    /// Filtering happens here, at the rendering edge; the engine never
    /// special-cases kinds.
    pub fn visible_entries(&self) -> Vec<&LogEntry> {
        self.snapshot
            .entries
            .iter()
            .filter(|entry| self.show_all_kinds || !self.hidden_kinds.contains(&entry.kind))
            .collect()
    }

    /// Seconds until the next poll attempt, for the disconnected banner.
    pub fn retry_in_secs(&self) -> u64 {
        self.engine.current_interval().as_secs()
    }

    /// Handle a key event.
    pub fn handle_key(&mut self, key: KeyEvent) {
        // Ctrl-C always quits, regardless of mode
        if key.code == KeyCode::Char('c') && key.modifiers.contains(KeyModifiers::CONTROL) {
            self.should_quit = true;
            return;
        }

        match self.mode {
            Mode::Normal => self.handle_normal_key(key),
            Mode::Editing => self.handle_editing_key(key),
            Mode::Contexts => self.handle_contexts_key(key),
        }
    }

    fn handle_normal_key(&mut self, key: KeyEvent) {
        match key.code {
            KeyCode::Char('q') => self.should_quit = true,
            KeyCode::Char('i') | KeyCode::Enter => self.mode = Mode::Editing,
            KeyCode::Tab => {
                self.mode = Mode::Contexts;
                self.context_index = 0;
            }
            KeyCode::Char('n') => self.new_session(),
            KeyCode::Char('R') => self.reset_session(),
            KeyCode::Char('p') => self.toggle_paused(),
            KeyCode::Char('g') => self.nudge(),
            KeyCode::Char('r') => self.engine.mark_notifications_read(),
            KeyCode::Char('f') => self.show_all_kinds = !self.show_all_kinds,
            KeyCode::Up | KeyCode::Char('k') => {
                self.scroll_offset = self.scroll_offset.saturating_add(1)
            }
            KeyCode::Down | KeyCode::Char('j') => {
                self.scroll_offset = self.scroll_offset.saturating_sub(1)
            }
            KeyCode::PageUp => self.scroll_offset = self.scroll_offset.saturating_add(10),
            KeyCode::PageDown => self.scroll_offset = self.scroll_offset.saturating_sub(10),
            KeyCode::End => self.scroll_offset = 0,
            _ => {}
        }
    }

    fn handle_editing_key(&mut self, key: KeyEvent) {
        match key.code {
            KeyCode::Esc => self.mode = Mode::Normal,
            KeyCode::Enter => self.submit_message(),
            KeyCode::Backspace => {
                self.input.pop();
            }
            KeyCode::Char(c) => self.input.push(c),
            _ => {}
        }
    }

    fn handle_contexts_key(&mut self, key: KeyEvent) {
        let count = self.snapshot.contexts.len();
        match key.code {
            KeyCode::Esc | KeyCode::Tab => self.mode = Mode::Normal,
            KeyCode::Up | KeyCode::Char('k') => {
                self.context_index = self.context_index.saturating_sub(1)
            }
            KeyCode::Down | KeyCode::Char('j') => {
                if count > 0 && self.context_index + 1 < count {
                    self.context_index += 1;
                }
            }
            KeyCode::Enter => {
                if let Some(context) = self.snapshot.contexts.get(self.context_index) {
                    let id = context.id.clone();
                    self.runtime
                        .block_on(self.engine.select_context(Some(id)));
                    self.scroll_offset = 0;
                }
                self.mode = Mode::Normal;
            }
            KeyCode::Char('x') => {
                if let Some(context) = self.snapshot.contexts.get(self.context_index) {
                    let id = context.id.clone();
                    let result = self.runtime.block_on(self.engine.remove_session(&id));
                    self.note_result(result);
                }
            }
            _ => {}
        }
    }

    /// Send the message box contents. The provisional entry shows up on
    /// the next frame; errors land in the status line without retracting it.
    fn submit_message(&mut self) {
        let text = self.input.trim().to_string();
        if text.is_empty() {
            return;
        }
        self.input.clear();
        self.scroll_offset = 0;

        let result = self
            .runtime
            .block_on(self.engine.send_message(&text, Vec::new()));
        self.note_result(result);
    }

    fn new_session(&mut self) {
        let result = self.runtime.block_on(self.engine.new_session());
        self.note_result(result.map(|_| ()));
        self.scroll_offset = 0;
    }

    fn reset_session(&mut self) {
        let result = self.runtime.block_on(self.engine.reset_session());
        self.note_result(result);
        self.scroll_offset = 0;
    }

    fn toggle_paused(&mut self) {
        let paused = self.snapshot.activity.paused;
        let result = self.runtime.block_on(self.engine.set_paused(!paused));
        self.note_result(result.map(|_| ()));
    }

    fn nudge(&mut self) {
        let result = self.runtime.block_on(self.engine.nudge());
        self.note_result(result);
    }

    fn note_result(&mut self, result: periscope_core::Result<()>) {
        match result {
            Ok(()) => self.last_error = None,
            Err(e) => {
                tracing::warn!(error = %e, "Engine operation failed");
                self.last_error = Some(e.to_string());
            }
        }
    }
}
