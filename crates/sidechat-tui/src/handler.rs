use anyhow::Result;
use crossterm::event::{KeyCode, KeyEvent, KeyModifiers, MouseEvent, MouseEventKind};
use ratatui::layout::Rect;

use crate::app::{App, InputMode, SettingsField};
use crate::tui::AppEvent;

/// Convert a character index to a byte index for UTF-8 safe string operations
fn char_to_byte_index(s: &str, char_idx: usize) -> usize {
    s.char_indices()
        .nth(char_idx)
        .map(|(i, _)| i)
        .unwrap_or(s.len())
}

/// Single-line text field editing shared by the message input and the
/// settings form. Returns false for keys it doesn't handle.
fn edit_text(text: &mut String, cursor: &mut usize, key: KeyEvent) -> bool {
    match key.code {
        KeyCode::Char('u') if key.modifiers.contains(KeyModifiers::CONTROL) => {
            text.clear();
            *cursor = 0;
        }
        KeyCode::Char(c) if !key.modifiers.contains(KeyModifiers::CONTROL) => {
            insert_text(text, cursor, &c.to_string());
        }
        KeyCode::Backspace => {
            if *cursor > 0 {
                *cursor -= 1;
                let idx = char_to_byte_index(text, *cursor);
                text.remove(idx);
            }
        }
        KeyCode::Delete => {
            if *cursor < text.chars().count() {
                let idx = char_to_byte_index(text, *cursor);
                text.remove(idx);
            }
        }
        KeyCode::Left => *cursor = cursor.saturating_sub(1),
        KeyCode::Right => *cursor = (*cursor + 1).min(text.chars().count()),
        KeyCode::Home => *cursor = 0,
        KeyCode::End => *cursor = text.chars().count(),
        _ => return false,
    }
    true
}

fn insert_text(text: &mut String, cursor: &mut usize, inserted: &str) {
    let idx = char_to_byte_index(text, *cursor);
    text.insert_str(idx, inserted);
    *cursor += inserted.chars().count();
}

pub async fn handle_event(app: &mut App, event: AppEvent) -> Result<()> {
    match event {
        AppEvent::Key(key) => handle_key(app, key).await?,
        AppEvent::Mouse(mouse) => handle_mouse(app, mouse),
        AppEvent::Paste(text) => handle_paste(app, &text),
        AppEvent::Resize(_, _) => {}
        AppEvent::Tick => app.tick(),
    }
    Ok(())
}

async fn handle_key(app: &mut App, key: KeyEvent) -> Result<()> {
    // Global keys that work in any mode
    if key.code == KeyCode::Char('c') && key.modifiers.contains(KeyModifiers::CONTROL) {
        app.should_quit = true;
        return Ok(());
    }
    if key.code == KeyCode::F(2) {
        if app.settings_form.is_some() {
            app.close_settings();
        } else {
            app.activate_panel();
        }
        return Ok(());
    }

    if app.settings_form.is_some() {
        handle_settings_key(app, key).await;
        return Ok(());
    }
    if app.model_picker.is_some() {
        handle_model_picker_key(app, key);
        return Ok(());
    }
    if !app.panel_open() {
        handle_closed_panel_key(app, key);
        return Ok(());
    }

    match app.input_mode {
        InputMode::Normal => handle_normal_mode(app, key),
        InputMode::Editing => handle_editing_mode(app, key),
    }

    Ok(())
}

fn handle_closed_panel_key(app: &mut App, key: KeyEvent) {
    match key.code {
        KeyCode::Char('q') | KeyCode::Esc => app.should_quit = true,
        KeyCode::Char('s') => app.open_settings(),
        KeyCode::Enter => app.activate_panel(),
        _ => {}
    }
}

fn handle_normal_mode(app: &mut App, key: KeyEvent) {
    match key.code {
        KeyCode::Char('q') => app.should_quit = true,
        KeyCode::Char('i') | KeyCode::Enter => app.input_mode = InputMode::Editing,
        KeyCode::Esc => {
            app.cancel_reply();
        }

        // Scrolling
        KeyCode::Char('j') | KeyCode::Down => app.scroll_down(1),
        KeyCode::Char('k') | KeyCode::Up => app.scroll_up(1),
        KeyCode::Char('d') if key.modifiers.contains(KeyModifiers::CONTROL) => {
            app.scroll_down(app.page_rows())
        }
        KeyCode::Char('u') if key.modifiers.contains(KeyModifiers::CONTROL) => {
            app.scroll_up(app.page_rows())
        }
        KeyCode::PageDown => app.scroll_down(app.page_rows()),
        KeyCode::PageUp => app.scroll_up(app.page_rows()),
        KeyCode::Char('g') | KeyCode::Home => app.scroll_up(u16::MAX),
        KeyCode::Char('G') | KeyCode::End => app.scroll_to_bottom(),

        // Code blocks
        KeyCode::Tab => app.select_code(true),
        KeyCode::BackTab => app.select_code(false),
        KeyCode::Char('y') => app.copy_selected_code(),

        KeyCode::Char('x') => app.clear_conversation(),
        KeyCode::Char('l') if key.modifiers.contains(KeyModifiers::CONTROL) => {
            app.clear_conversation()
        }
        KeyCode::Char('s') => app.open_settings(),
        KeyCode::Char('m') => app.open_model_picker(),
        _ => {}
    }
}

fn handle_editing_mode(app: &mut App, key: KeyEvent) {
    match key.code {
        KeyCode::Enter if key.modifiers.intersects(KeyModifiers::ALT | KeyModifiers::SHIFT) => {
            insert_text(&mut app.input, &mut app.input_cursor, "\n");
        }
        KeyCode::Enter => app.submit_input(),
        KeyCode::Esc => {
            // First Esc stops a streaming reply, the next one leaves the input.
            if !app.cancel_reply() {
                app.input_mode = InputMode::Normal;
            }
        }
        KeyCode::Up => app.scroll_up(1),
        KeyCode::Down => app.scroll_down(1),
        KeyCode::PageUp => app.scroll_up(app.page_rows()),
        KeyCode::PageDown => app.scroll_down(app.page_rows()),
        _ => {
            edit_text(&mut app.input, &mut app.input_cursor, key);
        }
    }
}

async fn handle_settings_key(app: &mut App, key: KeyEvent) {
    if key.code == KeyCode::Esc {
        app.close_settings();
        return;
    }
    if key.code == KeyCode::Enter {
        app.save_settings().await;
        return;
    }

    let models = app.available_models.len();
    let Some(form) = app.settings_form.as_mut() else {
        return;
    };

    match (key.code, form.field) {
        (KeyCode::Tab | KeyCode::BackTab, SettingsField::ApiKey) => form.field = SettingsField::Model,
        (KeyCode::Tab | KeyCode::BackTab, SettingsField::Model) => form.field = SettingsField::ApiKey,
        (KeyCode::Down | KeyCode::Char('j'), SettingsField::Model) => {
            let next = form.models.selected().map_or(0, |i| (i + 1) % models.max(1));
            form.models.select(Some(next));
        }
        (KeyCode::Up | KeyCode::Char('k'), SettingsField::Model) => {
            let prev = form
                .models
                .selected()
                .map_or(0, |i| (i + models.max(1) - 1) % models.max(1));
            form.models.select(Some(prev));
        }
        (_, SettingsField::ApiKey) => {
            edit_text(&mut form.api_key, &mut form.cursor, key);
        }
        _ => {}
    }
}

fn handle_model_picker_key(app: &mut App, key: KeyEvent) {
    let models = app.available_models.len().max(1);
    let Some(picker) = app.model_picker.as_mut() else {
        return;
    };

    match key.code {
        KeyCode::Esc | KeyCode::Char('q') => app.model_picker = None,
        KeyCode::Enter => app.select_model(),
        KeyCode::Down | KeyCode::Char('j') => {
            let next = picker.selected().map_or(0, |i| (i + 1) % models);
            picker.select(Some(next));
        }
        KeyCode::Up | KeyCode::Char('k') => {
            let prev = picker.selected().map_or(0, |i| (i + models - 1) % models);
            picker.select(Some(prev));
        }
        _ => {}
    }
}

fn handle_paste(app: &mut App, text: &str) {
    if let Some(form) = app.settings_form.as_mut() {
        if form.field == SettingsField::ApiKey {
            insert_text(&mut form.api_key, &mut form.cursor, text.trim());
        }
        return;
    }
    if app.panel_open() && app.input_mode == InputMode::Editing {
        insert_text(&mut app.input, &mut app.input_cursor, text);
    }
}

fn point_in_rect(x: u16, y: u16, rect: Rect) -> bool {
    x >= rect.x && x < rect.x + rect.width && y >= rect.y && y < rect.y + rect.height
}

fn handle_mouse(app: &mut App, mouse: MouseEvent) {
    if !app.panel_open() || !point_in_rect(mouse.column, mouse.row, app.transcript_area) {
        return;
    }
    match mouse.kind {
        MouseEventKind::ScrollUp => app.scroll_up(3),
        MouseEventKind::ScrollDown => app.scroll_down(3),
        _ => {}
    }
}
