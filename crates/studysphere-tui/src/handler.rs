use anyhow::Result;
use crossterm::event::{KeyCode, KeyEvent, KeyModifiers, MouseEvent, MouseEventKind};
use ratatui::layout::Rect;

use crate::app::{parse_paths, App, FocusPane, Overlay};
use crate::tui::AppEvent;

/// Convert a character index to a byte index for UTF-8 safe string operations
fn char_to_byte_index(s: &str, char_idx: usize) -> usize {
    s.char_indices()
        .nth(char_idx)
        .map(|(i, _)| i)
        .unwrap_or(s.len())
}

pub async fn handle_event(app: &mut App, event: AppEvent) -> Result<()> {
    match event {
        AppEvent::Key(key) => handle_key(app, key),
        AppEvent::Mouse(mouse) => handle_mouse(app, mouse),
        AppEvent::Paste(text) => handle_paste(app, &text),
        AppEvent::Resize(_, _) => {}
        AppEvent::Tick => {
            app.tick_animation();
            app.poll_background().await;
        }
    }
    Ok(())
}

fn handle_key(app: &mut App, key: KeyEvent) {
    // Global keys that work in any mode
    if key.code == KeyCode::Char('c') && key.modifiers.contains(KeyModifiers::CONTROL) {
        app.should_quit = true;
        return;
    }

    app.notice = None;

    match app.overlay {
        Overlay::AttachPrompt => handle_attach_prompt(app, key),
        Overlay::Camera => handle_camera(app, key),
        Overlay::None => match app.focus {
            FocusPane::History => handle_history(app, key),
            FocusPane::Input => handle_input(app, key),
        },
    }
}

fn handle_history(app: &mut App, key: KeyEvent) {
    match key.code {
        KeyCode::Char('q') => app.should_quit = true,

        KeyCode::Char('j') | KeyCode::Down => app.history_nav_down(),
        KeyCode::Char('k') | KeyCode::Up => app.history_nav_up(),
        KeyCode::Enter | KeyCode::Char('l') | KeyCode::Right => app.select_history(),
        KeyCode::Char('d') | KeyCode::Delete => app.delete_selected(),
        KeyCode::Char('n') => app.new_chat(),

        // Welcome-screen suggestions
        KeyCode::Char(c @ '1'..='6') if app.controller.active_id().is_none() => {
            app.apply_suggestion(c as usize - '1' as usize);
        }

        KeyCode::Char('i') | KeyCode::Tab | KeyCode::Esc => app.focus = FocusPane::Input,
        _ => {}
    }
}

fn handle_input(app: &mut App, key: KeyEvent) {
    if key.modifiers.contains(KeyModifiers::CONTROL) {
        match key.code {
            KeyCode::Char('o') => app.open_attach_prompt(),
            KeyCode::Char('k') => app.open_camera(),
            KeyCode::Char('x') => app.remove_last_attachment(),
            KeyCode::Char('n') => app.new_chat(),
            KeyCode::Char('d') => app.scroll_chat_down(app.chat_height / 2),
            KeyCode::Char('u') => app.scroll_chat_up(app.chat_height / 2),
            _ => {}
        }
        return;
    }

    match key.code {
        KeyCode::Tab | KeyCode::Esc => app.focus = FocusPane::History,
        KeyCode::Enter => app.send_draft(),
        KeyCode::PageDown => app.scroll_chat_down(app.chat_height / 2),
        KeyCode::PageUp => app.scroll_chat_up(app.chat_height / 2),
        _ => {
            let mut cursor = app.input_cursor;
            edit_line(app.controller.draft_mut(), &mut cursor, key.code);
            app.input_cursor = cursor;
        }
    }
}

fn handle_attach_prompt(app: &mut App, key: KeyEvent) {
    match key.code {
        KeyCode::Esc => {
            app.attach_input.clear();
            app.attach_cursor = 0;
            app.overlay = Overlay::None;
        }
        KeyCode::Enter => app.attach_from_prompt(),
        code => edit_line(&mut app.attach_input, &mut app.attach_cursor, code),
    }
}

fn handle_camera(app: &mut App, key: KeyEvent) {
    match key.code {
        KeyCode::Esc | KeyCode::Char('q') => app.close_camera(),
        KeyCode::Char(' ') | KeyCode::Enter => {
            if app.capture_session.is_some() {
                app.capture_photo();
            } else if !app.is_capturing() {
                // Retry after an access error
                app.open_camera();
            }
        }
        _ => {}
    }
}

/// Single-line editing shared by the composer and the attach prompt
fn edit_line(line: &mut String, cursor: &mut usize, code: KeyCode) {
    match code {
        KeyCode::Backspace => {
            if *cursor > 0 {
                *cursor -= 1;
                let byte_pos = char_to_byte_index(line, *cursor);
                line.remove(byte_pos);
            }
        }
        KeyCode::Delete => {
            let char_count = line.chars().count();
            if *cursor < char_count {
                let byte_pos = char_to_byte_index(line, *cursor);
                line.remove(byte_pos);
            }
        }
        KeyCode::Left => {
            *cursor = cursor.saturating_sub(1);
        }
        KeyCode::Right => {
            let char_count = line.chars().count();
            *cursor = (*cursor + 1).min(char_count);
        }
        KeyCode::Home => {
            *cursor = 0;
        }
        KeyCode::End => {
            *cursor = line.chars().count();
        }
        KeyCode::Char(c) => {
            let byte_pos = char_to_byte_index(line, *cursor);
            line.insert(byte_pos, c);
            *cursor += 1;
        }
        _ => {}
    }
}

fn insert_str(line: &mut String, cursor: &mut usize, text: &str) {
    let byte_pos = char_to_byte_index(line, *cursor);
    line.insert_str(byte_pos, text);
    *cursor += text.chars().count();
}

fn handle_paste(app: &mut App, text: &str) {
    // Newlines would submit half a message; flatten them
    let text = text.replace(['\r', '\n'], " ");

    match app.overlay {
        Overlay::AttachPrompt => insert_str(&mut app.attach_input, &mut app.attach_cursor, &text),
        Overlay::Camera => {}
        Overlay::None => {
            // Files dropped onto the terminal arrive as pasted, quoted paths
            let paths = parse_paths(&text);
            if !paths.is_empty() && paths.iter().all(|path| path.is_file()) {
                for path in paths {
                    app.attachments.begin_encode(path);
                }
            } else {
                let mut cursor = app.input_cursor;
                insert_str(app.controller.draft_mut(), &mut cursor, &text);
                app.input_cursor = cursor;
            }
            app.focus = FocusPane::Input;
        }
    }
}

/// Check if a point is within a rectangle
fn point_in_rect(x: u16, y: u16, rect: Rect) -> bool {
    x >= rect.x && x < rect.x + rect.width && y >= rect.y && y < rect.y + rect.height
}

fn handle_mouse(app: &mut App, mouse: MouseEvent) {
    let x = mouse.column;
    let y = mouse.row;

    // Position-based scrolling
    let in_history = app.history_area.map(|r| point_in_rect(x, y, r)).unwrap_or(false);
    let in_chat = app.chat_area.map(|r| point_in_rect(x, y, r)).unwrap_or(false);

    match mouse.kind {
        MouseEventKind::ScrollDown => {
            if in_chat {
                app.scroll_chat_down(3);
            } else if in_history {
                app.history_nav_down();
            }
        }
        MouseEventKind::ScrollUp => {
            if in_chat {
                app.scroll_chat_up(3);
            } else if in_history {
                app.history_nav_up();
            }
        }
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_edit_line_handles_multibyte() {
        let mut line = String::from("héllo");
        let mut cursor = 2;

        edit_line(&mut line, &mut cursor, KeyCode::Backspace);
        assert_eq!(line, "hllo");
        assert_eq!(cursor, 1);

        edit_line(&mut line, &mut cursor, KeyCode::Char('ë'));
        assert_eq!(line, "hëllo");
        assert_eq!(cursor, 2);

        edit_line(&mut line, &mut cursor, KeyCode::End);
        edit_line(&mut line, &mut cursor, KeyCode::Delete);
        assert_eq!(line, "hëllo");
        assert_eq!(cursor, 5);
    }

    #[test]
    fn test_insert_str_advances_cursor() {
        let mut line = String::from("ab");
        let mut cursor = 1;
        insert_str(&mut line, &mut cursor, "xyz");
        assert_eq!(line, "axyzb");
        assert_eq!(cursor, 4);
    }

    #[test]
    fn test_point_in_rect() {
        let rect = Rect::new(2, 2, 3, 3);
        assert!(point_in_rect(2, 2, rect));
        assert!(point_in_rect(4, 4, rect));
        assert!(!point_in_rect(5, 2, rect));
    }
}
