use std::time::Instant;

use ratatui::{
    layout::{Constraint, Layout, Rect},
    style::{Color, Modifier, Style, Stylize},
    text::{Line, Span, Text},
    widgets::{Block, Borders, Clear, List, ListItem, Paragraph, Wrap},
    Frame,
};
use sidechat_core::model::display_name;
use sidechat_core::settings::mask_api_key;
use sidechat_core::transcript::{Status, StatusKind};
use sidechat_core::{ChatRole, RequestState};

use crate::app::{App, InputMode, SettingsField};
use crate::markup::{markup_lines, wrapped_height};

const MAX_INPUT_ROWS: u16 = 4;

pub fn render(app: &mut App, frame: &mut Frame) {
    let area = frame.area();

    // Main layout: header, body, footer
    let [header_area, body_area, footer_area] = Layout::vertical([
        Constraint::Length(1),
        Constraint::Min(0),
        Constraint::Length(1),
    ])
    .areas(area);

    render_header(app, frame, header_area);

    if app.panel_open() {
        render_panel(app, frame, body_area);
    } else {
        render_closed_panel(frame, body_area);
    }

    render_footer(app, frame, footer_area);

    // Render popups (in order of priority)
    if app.settings_form.is_some() {
        render_settings(app, frame, area);
    } else if app.model_picker.is_some() {
        render_model_picker(app, frame, area);
    }
}

fn render_header(app: &App, frame: &mut Frame, area: Rect) {
    let activity = match app.session.state() {
        RequestState::Requesting => " waiting for reply",
        RequestState::Streaming => " streaming",
        RequestState::Finalizing => " saving",
        RequestState::Idle | RequestState::Errored => "",
    };

    let title = Line::from(vec![
        Span::styled(" sidechat ", Style::default().fg(Color::Cyan).bold()),
        Span::styled(display_name(&app.settings.model), Style::default().fg(Color::White)),
        Span::styled(activity, Style::default().fg(Color::Yellow)),
        Span::raw(" "),
        Span::styled(
            format!("v{}", env!("CARGO_PKG_VERSION")),
            Style::default().fg(Color::DarkGray),
        ),
    ]);

    let header = Paragraph::new(title).style(Style::default().bg(Color::DarkGray));
    frame.render_widget(header, area);
}

fn render_footer(app: &App, frame: &mut Frame, area: Rect) {
    let mode_style = match app.input_mode {
        InputMode::Normal => Style::default().bg(Color::Blue).fg(Color::White),
        InputMode::Editing => Style::default().bg(Color::Yellow).fg(Color::Black),
    };
    let mode_text = match app.input_mode {
        InputMode::Normal => " NORMAL ",
        InputMode::Editing => " INSERT ",
    };

    // Key style: dark background with bright text for visibility on both light/dark terminals
    let key_style = Style::default().bg(Color::DarkGray).fg(Color::White);
    let label_style = Style::default().bg(Color::Black).fg(Color::White);

    let hints: Vec<(&str, &str)> = if app.settings_form.is_some() {
        vec![("Enter", "save"), ("Tab", "field"), ("Esc", "close")]
    } else if app.model_picker.is_some() {
        vec![("j/k", "move"), ("Enter", "select"), ("Esc", "cancel")]
    } else if !app.panel_open() {
        vec![("F2", "open panel"), ("s", "settings"), ("q", "quit")]
    } else {
        match app.input_mode {
            InputMode::Editing => vec![
                ("Enter", "send"),
                ("Alt+Enter", "newline"),
                ("Esc", if app.session.is_busy() { "stop" } else { "normal" }),
                ("F2", "hide"),
            ],
            InputMode::Normal => vec![
                ("i", "type"),
                ("j/k", "scroll"),
                ("Tab", "code"),
                ("y", "copy"),
                ("x", "clear"),
                ("m", "model"),
                ("s", "settings"),
                ("q", "quit"),
            ],
        }
    };

    let mut spans = vec![Span::styled(mode_text, mode_style), Span::raw(" ")];
    for (key, label) in hints {
        spans.push(Span::styled(format!(" {} ", key), key_style));
        spans.push(Span::styled(format!(" {} ", label), label_style));
        spans.push(Span::raw(" "));
    }

    frame.render_widget(Paragraph::new(Line::from(spans)), area);
}

fn render_closed_panel(frame: &mut Frame, area: Rect) {
    let text = Text::from(vec![
        Line::default(),
        Line::from(Span::styled("The chat panel is hidden.", Style::default().fg(Color::Gray))),
        Line::from(Span::styled(
            "Press F2 to open it, s for settings.",
            Style::default().fg(Color::DarkGray),
        )),
    ]);
    let placeholder = Paragraph::new(text).centered().block(
        Block::default()
            .borders(Borders::ALL)
            .border_style(Style::default().fg(Color::DarkGray)),
    );
    frame.render_widget(placeholder, area);
}

fn render_panel(app: &mut App, frame: &mut Frame, area: Rect) {
    let status = app.transcript.lock().status().cloned();
    let input_rows = (app.input.split('\n').count() as u16).clamp(1, MAX_INPUT_ROWS);

    let [chat_area, status_area, input_area] = Layout::vertical([
        Constraint::Min(0),
        Constraint::Length(if status.is_some() { 1 } else { 0 }),
        Constraint::Length(input_rows + 2),
    ])
    .areas(area);

    render_transcript(app, frame, chat_area);
    if let Some(status) = status {
        render_status(&status, frame, status_area);
    }
    render_input(app, frame, input_area);
}

fn render_transcript(app: &mut App, frame: &mut Frame, area: Rect) {
    let border_color = if app.input_mode == InputMode::Normal {
        Color::Cyan
    } else {
        Color::DarkGray
    };
    let block = Block::default()
        .borders(Borders::ALL)
        .border_style(Style::default().fg(border_color))
        .title(" Conversation ");
    let inner = block.inner(area);
    app.transcript_area = inner;

    let now = Instant::now();
    let lines = {
        let transcript = app.transcript.lock();
        if transcript.nodes().is_empty() && !transcript.is_typing() {
            None
        } else {
            let mut lines: Vec<Line<'static>> = Vec::new();
            for node in transcript.nodes() {
                lines.push(role_line(node.role));
                let controls = |index: usize| app.copy_control(node.id, index, now);
                lines.extend(markup_lines(&node.markup.html, Style::default(), &controls));
                lines.push(Line::default());
            }

            if transcript.is_typing() {
                lines.push(role_line(ChatRole::Assistant));
                // Animated ellipsis: cycles through ".", "..", "..."
                let dots = ".".repeat(usize::from(app.animation_frame / 3 % 3) + 1);
                lines.push(Line::from(Span::styled(
                    format!("Thinking{}", dots),
                    Style::default().fg(Color::DarkGray).add_modifier(Modifier::ITALIC),
                )));
            }
            Some(lines)
        }
    };

    let Some(lines) = lines else {
        let placeholder = Paragraph::new(Span::styled(
            "Ask anything...",
            Style::default().fg(Color::DarkGray),
        ))
        .block(block);
        frame.render_widget(placeholder, area);
        return;
    };

    let scroll = {
        let mut transcript = app.transcript.lock();
        transcript.set_layout(inner.height, wrapped_height(&lines, inner.width));
        transcript.scroll_offset()
    };

    let chat = Paragraph::new(Text::from(lines))
        .block(block)
        .wrap(Wrap { trim: false })
        .scroll((scroll, 0));
    frame.render_widget(chat, area);
}

fn role_line(role: ChatRole) -> Line<'static> {
    match role {
        ChatRole::User => Line::from(Span::styled(
            "You:",
            Style::default().fg(Color::Cyan).add_modifier(Modifier::BOLD),
        )),
        ChatRole::Assistant => Line::from(Span::styled(
            "Assistant:",
            Style::default().fg(Color::Yellow).add_modifier(Modifier::BOLD),
        )),
    }
}

fn status_style(kind: StatusKind) -> Style {
    match kind {
        StatusKind::Error => Style::default().fg(Color::Red),
        StatusKind::Success => Style::default().fg(Color::Green),
        StatusKind::Info => Style::default().fg(Color::Gray),
    }
}

fn render_status(status: &Status, frame: &mut Frame, area: Rect) {
    let line = Paragraph::new(format!(" {}", status.text)).style(status_style(status.kind));
    frame.render_widget(line, area);
}

fn render_input(app: &App, frame: &mut Frame, area: Rect) {
    let editing = app.input_mode == InputMode::Editing;
    let input_block = Block::default()
        .borders(Borders::ALL)
        .border_style(Style::default().fg(if editing { Color::Yellow } else { Color::DarkGray }))
        .title(" Message ");

    let inner_width = area.width.saturating_sub(2) as usize;
    let inner_height = area.height.saturating_sub(2) as usize;

    // Cursor row and column within the (possibly multi-line) input
    let before_cursor: String = app.input.chars().take(app.input_cursor).collect();
    let cursor_row = before_cursor.matches('\n').count();
    let cursor_col = before_cursor
        .rsplit('\n')
        .next()
        .map_or(0, |line| line.chars().count());

    // Scroll so the cursor stays visible
    let row_offset = (cursor_row + 1).saturating_sub(inner_height.max(1));
    let col_offset = if inner_width == 0 {
        0
    } else if cursor_col >= inner_width {
        cursor_col - inner_width + 1
    } else {
        0
    };

    let visible: Vec<Line> = app
        .input
        .split('\n')
        .skip(row_offset)
        .take(inner_height.max(1))
        .map(|line| Line::from(line.chars().skip(col_offset).take(inner_width).collect::<String>()))
        .collect();

    let input = Paragraph::new(visible)
        .style(Style::default().fg(Color::Cyan))
        .block(input_block);
    frame.render_widget(input, area);

    // Show cursor when editing
    if editing && app.settings_form.is_none() && app.model_picker.is_none() {
        frame.set_cursor_position((
            area.x + 1 + (cursor_col - col_offset) as u16,
            area.y + 1 + (cursor_row - row_offset) as u16,
        ));
    }
}

fn centered(area: Rect, width: u16, height: u16) -> Rect {
    let width = width.min(area.width.saturating_sub(4));
    let height = height.min(area.height.saturating_sub(2));
    let x = area.x + (area.width.saturating_sub(width)) / 2;
    let y = area.y + (area.height.saturating_sub(height)) / 2;
    Rect::new(x, y, width, height)
}

fn render_settings(app: &mut App, frame: &mut Frame, area: Rect) {
    let models = app.available_models.clone();
    let current_model = app.settings.model.clone();
    let Some(form) = app.settings_form.as_mut() else {
        return;
    };

    let popup_area = centered(area, 60, models.len() as u16 + 10);

    // Clear the area behind the popup
    frame.render_widget(Clear, popup_area);

    let block = Block::default()
        .borders(Borders::ALL)
        .border_style(Style::default().fg(Color::Yellow))
        .title(" Settings ");
    let inner = block.inner(popup_area);
    frame.render_widget(block, popup_area);

    let [key_label, key_input, _, model_area, status_area] = Layout::vertical([
        Constraint::Length(1),
        Constraint::Length(1),
        Constraint::Length(1),
        Constraint::Min(3),
        Constraint::Length(1),
    ])
    .areas(inner);

    let focus_style = |field: SettingsField| {
        if form.field == field {
            Style::default().fg(Color::Yellow).add_modifier(Modifier::BOLD)
        } else {
            Style::default().fg(Color::DarkGray)
        }
    };

    frame.render_widget(
        Paragraph::new("OpenAI API key").style(focus_style(SettingsField::ApiKey)),
        key_label,
    );

    // Mask the key with asterisks (show last 4 chars)
    let display_text = if form.api_key.is_empty() {
        Span::styled("sk-...", Style::default().fg(Color::DarkGray))
    } else {
        Span::styled(mask_api_key(&form.api_key), Style::default().fg(Color::Cyan))
    };
    frame.render_widget(Paragraph::new(display_text), key_input);

    if form.field == SettingsField::ApiKey {
        let shown = mask_api_key(&form.api_key).chars().count();
        let cursor_x = shown.min(key_input.width as usize) as u16;
        frame.set_cursor_position((key_input.x + cursor_x, key_input.y));
    }

    let items: Vec<ListItem> = models
        .iter()
        .map(|model| {
            let style = if *model == current_model {
                Style::default().fg(Color::Green).add_modifier(Modifier::BOLD)
            } else {
                Style::default()
            };
            ListItem::new(format!(" {} ", display_name(model))).style(style)
        })
        .collect();

    let list = List::new(items)
        .block(
            Block::default()
                .borders(Borders::TOP)
                .border_style(focus_style(SettingsField::Model))
                .title(" Model "),
        )
        .highlight_style(
            Style::default()
                .bg(Color::Blue)
                .fg(Color::White)
                .add_modifier(Modifier::BOLD),
        )
        .highlight_symbol("> ");
    frame.render_stateful_widget(list, model_area, &mut form.models);

    let status = match form.status.as_ref() {
        Some((status, _)) => Paragraph::new(status.text.clone()).style(status_style(status.kind)),
        None => Paragraph::new("Enter to save, Tab to switch field, Esc to close")
            .style(Style::default().fg(Color::DarkGray)),
    };
    frame.render_widget(status, status_area);
}

fn render_model_picker(app: &mut App, frame: &mut Frame, area: Rect) {
    let popup_area = centered(area, 40, app.available_models.len() as u16 + 2);

    // Clear the area behind the popup
    frame.render_widget(Clear, popup_area);

    let block = Block::default()
        .borders(Borders::ALL)
        .border_style(Style::default().fg(Color::Cyan))
        .title(" Select Model ");

    let items: Vec<ListItem> = app
        .available_models
        .iter()
        .map(|model| {
            let style = if *model == app.settings.model {
                Style::default().fg(Color::Green).add_modifier(Modifier::BOLD)
            } else {
                Style::default()
            };
            ListItem::new(format!(" {} ", display_name(model))).style(style)
        })
        .collect();

    let list = List::new(items)
        .block(block)
        .highlight_style(
            Style::default()
                .bg(Color::Blue)
                .fg(Color::White)
                .add_modifier(Modifier::BOLD),
        )
        .highlight_symbol("> ");

    if let Some(state) = app.model_picker.as_mut() {
        frame.render_stateful_widget(list, popup_area, state);
    }
}
