//! UI rendering for the TUI.

use chrono::Local;
use periscope_core::{Connectivity, LogEntry};
use ratatui::{
    layout::{Constraint, Layout, Rect},
    style::{Color, Modifier, Style, Stylize},
    text::{Line, Span},
    widgets::{Block, BorderType, Borders, Clear, List, ListItem, ListState, Paragraph, Wrap},
    Frame,
};

use crate::app::{App, Mode};

/// Accent color for user entries
const KIND_USER: Color = Color::Cyan;
/// Accent color for final responses
const KIND_RESPONSE: Color = Color::Green;
/// Accent color for tool/browser/code activity
const KIND_TOOL: Color = Color::Magenta;
/// Accent color for agent reasoning
const KIND_AGENT: Color = Color::Blue;
/// Dim color for informational noise
const KIND_DIM: Color = Color::DarkGray;
/// Separator/label color
const LABEL_COLOR: Color = Color::Rgb(100, 180, 180);

/// Render the application UI.
pub fn render(frame: &mut Frame, app: &mut App) {
    let area = frame.area();

    // Layout: header, log, status, input box
    let chunks = Layout::vertical([
        Constraint::Length(2), // Header
        Constraint::Min(5),    // Log
        Constraint::Length(1), // Status line
        Constraint::Length(3), // Input box
    ])
    .split(area);

    render_header(frame, app, chunks[0]);
    render_log(frame, app, chunks[1]);
    render_status(frame, app, chunks[2]);
    render_input(frame, app, chunks[3]);

    if app.mode == Mode::Contexts {
        render_contexts_overlay(frame, app, area);
    }
}

/// Render the header: app name, selected context, unread badge.
fn render_header(frame: &mut Frame, app: &App, area: Rect) {
    let context_label = match &app.snapshot.context {
        Some(id) => {
            // Prefer the roster name when the backend supplied one
            let name = app
                .snapshot
                .contexts
                .iter()
                .find(|c| &c.id == id)
                .and_then(|c| c.name.clone());
            match name {
                Some(name) => format!("{} ({})", name, id),
                None => id.clone(),
            }
        }
        None => "no context".to_string(),
    };

    let mut spans = vec![
        Span::styled("periscope", Style::default().fg(Color::Cyan).bold()),
        Span::raw("  "),
        Span::styled(context_label, Style::default().fg(LABEL_COLOR)),
    ];

    if app.snapshot.unread_notifications > 0 {
        spans.push(Span::raw("  "));
        spans.push(Span::styled(
            format!("({} new)", app.snapshot.unread_notifications),
            Style::default().fg(Color::Yellow).bold(),
        ));
    }

    let header = Paragraph::new(Line::from(spans)).block(Block::default().borders(Borders::BOTTOM));
    frame.render_widget(header, area);
}

/// Render the merged log view.
fn render_log(frame: &mut Frame, app: &App, area: Rect) {
    let mut lines: Vec<Line> = Vec::new();
    for entry in app.visible_entries() {
        lines.extend(entry_lines(entry));
    }

    // Keep the newest output on screen unless the user scrolled up.
    let height = area.height as usize;
    let bottom = lines.len().saturating_sub(height);
    let scroll = bottom.saturating_sub(app.scroll_offset);

    let log = Paragraph::new(lines)
        .wrap(Wrap { trim: false })
        .scroll((scroll as u16, 0));
    frame.render_widget(log, area);
}

/// Lines for one log entry: a labeled header line, the content, and any
/// structured key/value pairs.
fn entry_lines(entry: &LogEntry) -> Vec<Line<'_>> {
    let color = kind_color(&entry.kind);
    let time = entry
        .received_at
        .with_timezone(&Local)
        .format("%H:%M:%S")
        .to_string();

    let mut header = vec![
        Span::styled(time, Style::default().fg(KIND_DIM)),
        Span::raw(" "),
        Span::styled(
            format!("[{}]", entry.kind),
            Style::default().fg(color).bold(),
        ),
    ];
    if let Some(heading) = &entry.heading {
        if !heading.is_empty() {
            header.push(Span::raw(" "));
            header.push(Span::styled(heading.as_str(), Style::default().fg(color)));
        }
    }
    if entry.provisional {
        header.push(Span::styled(
            " (sending...)",
            Style::default().fg(KIND_DIM).add_modifier(Modifier::ITALIC),
        ));
    }

    let mut lines = vec![Line::from(header)];

    if let Some(content) = &entry.content {
        for text_line in content.lines() {
            lines.push(Line::from(Span::raw(format!("  {}", text_line))));
        }
    }

    if let Some(kvps) = &entry.kvps {
        for (key, value) in kvps {
            let rendered = match value {
                serde_json::Value::String(s) => s.clone(),
                other => other.to_string(),
            };
            lines.push(Line::from(Span::styled(
                format!("  {}: {}", key, rendered),
                Style::default().fg(KIND_DIM),
            )));
        }
    }

    lines
}

/// Render the status line: connectivity, activity, pending count, errors.
fn render_status(frame: &mut Frame, app: &App, area: Rect) {
    let mut spans: Vec<Span> = Vec::new();

    match app.connectivity {
        Connectivity::Online => {
            spans.push(Span::styled("Online", Style::default().fg(Color::Green)));
        }
        Connectivity::Degraded {
            consecutive_failures,
        } => {
            let label = if consecutive_failures == 0 {
                "Connecting...".to_string()
            } else {
                format!("Disconnected (retry in {}s)", app.retry_in_secs())
            };
            spans.push(Span::styled(label, Style::default().fg(Color::Red).bold()));
        }
        Connectivity::AuthRequired => {
            spans.push(Span::styled(
                "Auth required - check api_key",
                Style::default().fg(Color::Red).bold(),
            ));
        }
    }

    if app.snapshot.activity.paused {
        spans.push(Span::raw("  "));
        spans.push(Span::styled("PAUSED", Style::default().fg(Color::Yellow).bold()));
    } else if app.snapshot.activity.progress_active {
        spans.push(Span::raw("  "));
        spans.push(Span::styled("working", Style::default().fg(Color::Yellow)));
    }

    if app.snapshot.pending_count > 0 {
        spans.push(Span::raw("  "));
        spans.push(Span::styled(
            format!("{} unconfirmed", app.snapshot.pending_count),
            Style::default().fg(KIND_DIM),
        ));
    }

    if app.snapshot.unread_notifications > 0 {
        if let Some(latest) = app.snapshot.notifications.last() {
            if let Some(title) = &latest.title {
                spans.push(Span::raw("  "));
                spans.push(Span::styled(
                    title.as_str(),
                    Style::default().fg(KIND_DIM),
                ));
            }
        }
    }

    if let Some(error) = &app.last_error {
        spans.push(Span::raw("  "));
        spans.push(Span::styled(
            error.as_str(),
            Style::default().fg(Color::Red),
        ));
    }

    frame.render_widget(Paragraph::new(Line::from(spans)), area);
}

/// Render the message input box.
fn render_input(frame: &mut Frame, app: &App, area: Rect) {
    let (title, border_color) = match app.mode {
        Mode::Editing => (" message (Enter to send, Esc to cancel) ", Color::Cyan),
        _ => (" i: write  Tab: contexts  n: new  p: pause  q: quit ", KIND_DIM),
    };

    let mut text = app.input.clone();
    if app.mode == Mode::Editing {
        text.push('\u{2588}'); // block cursor
    }

    let input = Paragraph::new(text).block(
        Block::default()
            .borders(Borders::ALL)
            .border_type(BorderType::Rounded)
            .border_style(Style::default().fg(border_color))
            .title(title),
    );
    frame.render_widget(input, area);
}

/// Render the context picker as a centered overlay.
fn render_contexts_overlay(frame: &mut Frame, app: &App, area: Rect) {
    let overlay = centered_rect(60, 60, area);
    frame.render_widget(Clear, overlay);

    let items: Vec<ListItem> = if app.snapshot.contexts.is_empty() {
        vec![ListItem::new("no contexts yet")]
    } else {
        app.snapshot
            .contexts
            .iter()
            .map(|context| {
                let label = match &context.name {
                    Some(name) => format!("{}  {}", name, context.id),
                    None => context.id.clone(),
                };
                let selected = app.snapshot.context.as_deref() == Some(context.id.as_str());
                let style = if selected {
                    Style::default().fg(Color::Cyan)
                } else {
                    Style::default()
                };
                ListItem::new(label).style(style)
            })
            .collect()
    };

    let mut state = ListState::default();
    state.select(Some(app.context_index));

    let list = List::new(items)
        .block(
            Block::default()
                .borders(Borders::ALL)
                .border_type(BorderType::Rounded)
                .title(" contexts (Enter: switch, x: remove, Esc: close) "),
        )
        .highlight_style(Style::default().add_modifier(Modifier::REVERSED));

    frame.render_stateful_widget(list, overlay, &mut state);
}

/// Centered sub-rectangle taking the given percentages of the area.
fn centered_rect(percent_x: u16, percent_y: u16, area: Rect) -> Rect {
    let vertical = Layout::vertical([
        Constraint::Percentage((100 - percent_y) / 2),
        Constraint::Percentage(percent_y),
        Constraint::Percentage((100 - percent_y) / 2),
    ])
    .split(area);
    let horizontal = Layout::horizontal([
        Constraint::Percentage((100 - percent_x) / 2),
        Constraint::Percentage(percent_x),
        Constraint::Percentage((100 - percent_x) / 2),
    ])
    .split(vertical[1]);
    horizontal[1]
}

/// Accent color for an entry kind. Open-ended: unknown kinds render dim.
fn kind_color(kind: &str) -> Color {
    match kind {
        "user" => KIND_USER,
        "response" => KIND_RESPONSE,
        "agent" => KIND_AGENT,
        "tool" | "code_exe" | "browser" => KIND_TOOL,
        "error" => Color::Red,
        "warning" | "rate_limit" => Color::Yellow,
        "info" | "hint" | "util" => KIND_DIM,
        _ => KIND_DIM,
    }
}
