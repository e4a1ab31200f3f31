use ratatui::{
    Frame,
    layout::{Constraint, Layout, Rect},
    style::{Color, Modifier, Style, Stylize},
    text::{Line, Span, Text},
    widgets::{Block, Borders, Clear, List, ListItem, ListState, Paragraph, Wrap},
};
use crate::app::{App, FocusPane, Overlay, SUGGESTIONS};
use studysphere_core::{Role, UploadCandidate};

const TRAY_BAR_WIDTH: usize = 10;

/// Ensure the selected item in a list is visible by adjusting the ListState offset.
fn ensure_selected_visible(state: &mut ListState, visible_height: usize) {
    let visible_height = visible_height.max(1);

    if let Some(selected) = state.selected() {
        // Valid offsets put the selection anywhere from the bottom to the top row
        let min_offset = selected.saturating_sub(visible_height - 1);
        let max_offset = selected;

        let new_offset = state.offset().clamp(min_offset, max_offset);
        if new_offset != state.offset() {
            *state.offset_mut() = new_offset;
        }
    }
}

/// Parse inline markdown (`**bold**` and `` `code` ``) into styled spans
fn parse_inline(text: &str, base: Style) -> Vec<Span<'static>> {
    let mut spans: Vec<Span<'static>> = Vec::new();
    let mut chars = text.chars().peekable();
    let mut current_text = String::new();

    while let Some(c) = chars.next() {
        if c == '*' && chars.peek() == Some(&'*') {
            // Consume the second *
            chars.next();

            // Find closing **
            let mut bold_text = String::new();
            let mut found_close = false;
            while let Some(c) = chars.next() {
                if c == '*' && chars.peek() == Some(&'*') {
                    chars.next();
                    found_close = true;
                    break;
                }
                bold_text.push(c);
            }

            if found_close && !bold_text.is_empty() {
                if !current_text.is_empty() {
                    spans.push(Span::styled(std::mem::take(&mut current_text), base));
                }
                spans.push(Span::styled(bold_text, base.add_modifier(Modifier::BOLD)));
            } else {
                // No closing **, treat as literal
                current_text.push_str("**");
                current_text.push_str(&bold_text);
            }
        } else if c == '`' {
            let mut code_text = String::new();
            let mut found_close = false;
            for c in chars.by_ref() {
                if c == '`' {
                    found_close = true;
                    break;
                }
                code_text.push(c);
            }

            if found_close && !code_text.is_empty() {
                if !current_text.is_empty() {
                    spans.push(Span::styled(std::mem::take(&mut current_text), base));
                }
                spans.push(Span::styled(code_text, base.fg(Color::Green)));
            } else {
                current_text.push('`');
                current_text.push_str(&code_text);
                if found_close {
                    current_text.push('`');
                }
            }
        } else {
            current_text.push(c);
        }
    }

    if !current_text.is_empty() {
        spans.push(Span::styled(current_text, base));
    }

    spans
}

/// Render one line of a model reply: headings, bullets and inline markup
fn parse_markdown_line(text: &str) -> Line<'static> {
    let trimmed = text.trim_start();

    if trimmed.starts_with('#') {
        let heading = trimmed.trim_start_matches('#').trim_start();
        let style = Style::default().fg(Color::Cyan).add_modifier(Modifier::BOLD);
        return Line::from(parse_inline(heading, style));
    }

    if let Some(item) = trimmed
        .strip_prefix("* ")
        .or_else(|| trimmed.strip_prefix("- "))
    {
        let indent = " ".repeat(text.len() - trimmed.len());
        let mut spans = vec![Span::raw(format!("{}• ", indent))];
        spans.extend(parse_inline(item, Style::default()));
        return Line::from(spans);
    }

    let spans = parse_inline(text, Style::default());
    if spans.is_empty() {
        Line::default()
    } else {
        Line::from(spans)
    }
}

fn progress_bar(progress: u8) -> String {
    let filled = (progress as usize * TRAY_BAR_WIDTH) / 100;
    format!(
        "[{}{}] {:>3}%",
        "█".repeat(filled),
        "░".repeat(TRAY_BAR_WIDTH - filled),
        progress
    )
}

fn tray_entry(candidate: &UploadCandidate) -> Line<'static> {
    let (marker, style) = if candidate.is_ready() {
        ("✓", Style::default().fg(Color::Green))
    } else {
        ("…", Style::default().fg(Color::Yellow))
    };
    Line::from(vec![
        Span::styled(format!(" {} ", marker), style),
        Span::raw(format!("{} ", candidate.preview)),
        Span::styled(progress_bar(candidate.progress), Style::default().fg(Color::DarkGray)),
    ])
}

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

    let [history_area, main_area] = Layout::horizontal([
        Constraint::Length(32),
        Constraint::Min(0),
    ])
    .areas(body_area);

    render_history(app, frame, history_area);
    render_chat_pane(app, frame, main_area);
    render_footer(app, frame, footer_area);

    match app.overlay {
        Overlay::AttachPrompt => render_attach_prompt(app, frame, area),
        Overlay::Camera => render_camera(app, frame, area),
        Overlay::None => {}
    }
}

fn render_header(app: &App, frame: &mut Frame, area: Rect) {
    let title = Line::from(vec![
        Span::styled(" StudySphere AI ", Style::default().fg(Color::Cyan).bold()),
        Span::styled(format!("[{}]", app.model_name), Style::default().fg(Color::Gray)),
        Span::raw(" "),
        Span::styled(
            format!("v{}", env!("CARGO_PKG_VERSION")),
            Style::default().fg(Color::Gray),
        ),
    ]);

    let header = Paragraph::new(title).style(Style::default().bg(Color::DarkGray));
    frame.render_widget(header, area);
}

fn render_footer(app: &App, frame: &mut Frame, area: Rect) {
    // Key style: dark background with bright text for visibility on both light/dark terminals
    let key_style = Style::default().bg(Color::DarkGray).fg(Color::White);
    let label_style = Style::default().bg(Color::Black).fg(Color::White);

    let hint = |key: &str, label: &str| {
        vec![
            Span::styled(format!(" {} ", key), key_style),
            Span::styled(format!(" {} ", label), label_style),
        ]
    };

    let (mode_text, mode_style, hints): (&str, Style, Vec<Span>) = match (app.overlay, app.focus) {
        (Overlay::AttachPrompt, _) => (
            " ATTACH ",
            Style::default().bg(Color::Magenta).fg(Color::White),
            [hint("Enter", "attach"), hint("Esc", "cancel")].concat(),
        ),
        (Overlay::Camera, _) => (
            " CAMERA ",
            Style::default().bg(Color::Magenta).fg(Color::White),
            [hint("Space", "capture"), hint("Esc", "cancel")].concat(),
        ),
        (Overlay::None, FocusPane::History) => (
            " HISTORY ",
            Style::default().bg(Color::Blue).fg(Color::White),
            [
                hint("j/k", "move"),
                hint("Enter", "open"),
                hint("d", "delete"),
                hint("n", "new chat"),
                hint("Tab", "compose"),
                hint("q", "quit"),
            ]
            .concat(),
        ),
        (Overlay::None, FocusPane::Input) => (
            " COMPOSE ",
            Style::default().bg(Color::Yellow).fg(Color::Black),
            [
                hint("Enter", "send"),
                hint("^O", "attach"),
                hint("^K", "camera"),
                hint("^X", "remove image"),
                hint("Tab", "history"),
                hint("^C", "quit"),
            ]
            .concat(),
        ),
    };

    let mut spans = vec![Span::styled(mode_text, mode_style), Span::styled(" ", label_style)];
    if let Some(notice) = &app.notice {
        // A notice replaces the hints until the next key press
        spans.push(Span::styled(notice.clone(), Style::default().bg(Color::Black).fg(Color::Red)));
    } else {
        spans.extend(hints);
    }

    let footer = Paragraph::new(Line::from(spans)).style(Style::default().bg(Color::Black));
    frame.render_widget(footer, area);
}

fn render_history(app: &mut App, frame: &mut Frame, area: Rect) {
    app.history_area = Some(area);

    let focused = app.focus == FocusPane::History && app.overlay == Overlay::None;
    let border_color = if focused { Color::Cyan } else { Color::DarkGray };

    let block = Block::default()
        .borders(Borders::ALL)
        .border_style(Style::default().fg(border_color))
        .title(" History ");

    let active = app.controller.active_id();
    let mut items = vec![ListItem::new(Line::from(Span::styled(
        "+ New Chat",
        Style::default().fg(Color::Green),
    )))];
    items.extend(app.controller.store().conversations().iter().map(|c| {
        let marker = if Some(&c.id) == active { "● " } else { "  " };
        ListItem::new(format!("{}{}", marker, c.title))
    }));

    let list = List::new(items)
        .block(block)
        .highlight_style(
            Style::default()
                .bg(Color::Blue)
                .fg(Color::White)
                .add_modifier(Modifier::BOLD),
        )
        .highlight_symbol("> ");

    let visible_height = area.height.saturating_sub(2) as usize;
    ensure_selected_visible(&mut app.history_state, visible_height);

    frame.render_stateful_widget(list, area, &mut app.history_state);
}

fn render_chat_pane(app: &mut App, frame: &mut Frame, area: Rect) {
    let tray_height = if app.attachments.is_empty() {
        0
    } else {
        (app.attachments.candidates().len().min(4) + 2) as u16 // +2 for borders
    };

    let [chat_area, tray_area, input_area] = Layout::vertical([
        Constraint::Min(0),
        Constraint::Length(tray_height),
        Constraint::Length(3),
    ])
    .areas(area);

    app.chat_area = Some(chat_area);

    // Inner size minus borders, for scroll calculations
    app.chat_height = chat_area.height.saturating_sub(2);
    app.chat_width = chat_area.width.saturating_sub(2);

    render_chat(app, frame, chat_area);
    if tray_height > 0 {
        render_tray(app, frame, tray_area);
    }
    render_input(app, frame, input_area);
}

fn welcome_text() -> Text<'static> {
    let mut lines = vec![
        Line::default(),
        Line::from(Span::styled(
            "How can I help you today?",
            Style::default().fg(Color::Cyan).add_modifier(Modifier::BOLD),
        )),
        Line::from(Span::styled(
            "Ask a question, attach a photo of your homework, or pick a suggestion.",
            Style::default().fg(Color::DarkGray),
        )),
        Line::default(),
    ];
    for (i, suggestion) in SUGGESTIONS.iter().enumerate() {
        lines.push(Line::from(vec![
            Span::styled(format!("  {} ", i + 1), Style::default().fg(Color::Yellow)),
            Span::raw(*suggestion),
        ]));
    }
    lines.push(Line::default());
    lines.push(Line::from(Span::styled(
        "Press Tab then a number to use a suggestion.",
        Style::default().fg(Color::DarkGray),
    )));
    Text::from(lines)
}

fn render_chat(app: &App, frame: &mut Frame, area: Rect) {
    let title = app
        .controller
        .active_conversation()
        .map(|c| format!(" {} ", c.title))
        .unwrap_or_else(|| " New Chat ".to_string());

    let chat_block = Block::default()
        .borders(Borders::ALL)
        .border_style(Style::default().fg(Color::DarkGray))
        .title(title);

    let thinking = app.is_thinking_here();

    let chat_text = match app.controller.active_conversation() {
        None if !thinking => welcome_text(),
        conversation => {
            let mut lines: Vec<Line> = Vec::new();

            for msg in conversation.map(|c| c.messages.as_slice()).unwrap_or_default() {
                match msg.role {
                    Role::User => {
                        lines.push(Line::from(Span::styled(
                            "You:",
                            Style::default().fg(Color::Cyan).add_modifier(Modifier::BOLD),
                        )));
                        for line in msg.text.lines() {
                            lines.push(Line::from(line.to_string()));
                        }
                        let images = msg.image_count();
                        if images > 0 {
                            let label = if images == 1 { "image" } else { "images" };
                            lines.push(Line::from(Span::styled(
                                format!("[{} {} attached]", images, label),
                                Style::default().fg(Color::Magenta),
                            )));
                        }
                        lines.push(Line::default());
                    }
                    Role::Model => {
                        lines.push(Line::from(Span::styled(
                            "AI:",
                            Style::default().fg(Color::Yellow).add_modifier(Modifier::BOLD),
                        )));
                        // Split response into lines and parse markdown
                        for line in msg.text.lines() {
                            lines.push(parse_markdown_line(line));
                        }
                        lines.push(Line::default());
                    }
                }
            }

            if thinking {
                lines.push(Line::from(Span::styled(
                    "AI:",
                    Style::default().fg(Color::Yellow).add_modifier(Modifier::BOLD),
                )));
                // Animated ellipsis: cycles through ".", "..", "..."
                let dots = ".".repeat((app.animation_frame as usize) + 1);
                lines.push(Line::from(Span::styled(
                    format!("Thinking{}", dots),
                    Style::default().fg(Color::DarkGray).add_modifier(Modifier::ITALIC),
                )));
            }

            Text::from(lines)
        }
    };

    let chat = Paragraph::new(chat_text)
        .block(chat_block)
        .wrap(Wrap { trim: false })
        .scroll((app.chat_scroll, 0));

    frame.render_widget(chat, area);
}

fn render_tray(app: &App, frame: &mut Frame, area: Rect) {
    let pending = app.attachments.has_pending();
    let title = if pending {
        " Attachments (encoding...) "
    } else {
        " Attachments "
    };

    let block = Block::default()
        .borders(Borders::ALL)
        .border_style(Style::default().fg(Color::Magenta))
        .title(title);

    // Newest attachments stay visible when the tray overflows
    let visible = area.height.saturating_sub(2) as usize;
    let candidates = app.attachments.candidates();
    let skip = candidates.len().saturating_sub(visible);
    let lines: Vec<Line> = candidates.iter().skip(skip).map(tray_entry).collect();

    frame.render_widget(Paragraph::new(lines).block(block), area);
}

fn render_input(app: &App, frame: &mut Frame, area: Rect) {
    let focused = app.focus == FocusPane::Input && app.overlay == Overlay::None;
    let border_color = if focused { Color::Yellow } else { Color::DarkGray };

    let title = if app.controller.is_in_flight() {
        " Message (waiting for reply) "
    } else {
        " Message "
    };

    let input_block = Block::default()
        .borders(Borders::ALL)
        .border_style(Style::default().fg(border_color))
        .title(title);

    // Horizontal scrolling keeps the cursor visible
    let inner_width = area.width.saturating_sub(2) as usize;
    let cursor_pos = app.input_cursor;
    let scroll_offset = if inner_width == 0 {
        0
    } else if cursor_pos >= inner_width {
        cursor_pos - inner_width + 1
    } else {
        0
    };

    let draft = app.controller.draft();
    let input = if draft.is_empty() && !focused {
        Paragraph::new("Ask anything...").style(Style::default().fg(Color::DarkGray))
    } else {
        let visible_text: String = draft.chars().skip(scroll_offset).take(inner_width).collect();
        Paragraph::new(visible_text).style(Style::default().fg(Color::Cyan))
    };

    frame.render_widget(input.block(input_block), area);

    if focused {
        let cursor_x = (cursor_pos - scroll_offset) as u16;
        frame.set_cursor_position((area.x + cursor_x + 1, area.y + 1));
    }
}

fn centered_popup(area: Rect, width: u16, height: u16) -> Rect {
    let popup_width = width.min(area.width.saturating_sub(4));
    let popup_height = height.min(area.height);
    let popup_x = (area.width.saturating_sub(popup_width)) / 2;
    let popup_y = (area.height.saturating_sub(popup_height)) / 2;
    Rect::new(popup_x, popup_y, popup_width, popup_height)
}

fn render_attach_prompt(app: &App, frame: &mut Frame, area: Rect) {
    let popup_area = centered_popup(area, 70, 7);

    // Clear the area behind the popup
    frame.render_widget(Clear, popup_area);

    let block = Block::default()
        .borders(Borders::ALL)
        .border_style(Style::default().fg(Color::Magenta))
        .title(" Attach Images ");

    let inner = block.inner(popup_area);
    frame.render_widget(block, popup_area);

    let instructions = Paragraph::new("Type or drop image paths, separated by spaces. Enter to attach.")
        .style(Style::default().fg(Color::DarkGray));
    frame.render_widget(instructions, Rect::new(inner.x, inner.y, inner.width, 1));

    let input_area = Rect::new(inner.x, inner.y + 2, inner.width, 1);
    let width = input_area.width as usize;
    let scroll_offset = (app.attach_cursor + 1).saturating_sub(width);
    let visible_text: String = app
        .attach_input
        .chars()
        .skip(scroll_offset)
        .take(width)
        .collect();
    frame.render_widget(
        Paragraph::new(visible_text).style(Style::default().fg(Color::Cyan)),
        input_area,
    );

    let cursor_x = app.attach_cursor.saturating_sub(scroll_offset) as u16;
    frame.set_cursor_position((input_area.x + cursor_x, input_area.y));
}

fn render_camera(app: &App, frame: &mut Frame, area: Rect) {
    let popup_area = centered_popup(area, 56, 7);
    frame.render_widget(Clear, popup_area);

    let block = Block::default()
        .borders(Borders::ALL)
        .border_style(Style::default().fg(Color::Magenta))
        .title(" Camera ");

    let (status, style) = if let Some(error) = &app.camera_error {
        (
            format!("{}\n\nEnter to retry, Esc to close.", error),
            Style::default().fg(Color::Red),
        )
    } else if app.is_capturing() {
        ("Capturing...".to_string(), Style::default().fg(Color::Yellow))
    } else if app.capture_session.is_some() {
        (
            "● Camera is live.\n\nSpace to take a photo, Esc to cancel.".to_string(),
            Style::default().fg(Color::Green),
        )
    } else {
        ("Opening camera...".to_string(), Style::default().fg(Color::DarkGray))
    };

    let body = Paragraph::new(status)
        .style(style)
        .wrap(Wrap { trim: true })
        .block(block);
    frame.render_widget(body, popup_area);
}

#[cfg(test)]
mod tests {
    use super::*;

    fn line_text(line: &Line) -> String {
        line.spans.iter().map(|s| s.content.as_ref()).collect()
    }

    #[test]
    fn test_bold_and_code_spans() {
        let line = parse_markdown_line("Use **F = ma** and `x^2` here");
        assert_eq!(line_text(&line), "Use F = ma and x^2 here");
        assert!(line.spans[1].style.add_modifier.contains(Modifier::BOLD));
        assert_eq!(line.spans[3].style.fg, Some(Color::Green));
    }

    #[test]
    fn test_unclosed_markers_stay_literal() {
        let line = parse_markdown_line("2 ** 3 and a `tick");
        assert_eq!(line_text(&line), "2 ** 3 and a `tick");
    }

    #[test]
    fn test_headings_and_bullets() {
        let heading = parse_markdown_line("## Step 1");
        assert_eq!(line_text(&heading), "Step 1");
        assert!(heading.spans[0].style.add_modifier.contains(Modifier::BOLD));

        let bullet = parse_markdown_line("  * **Mitosis** makes two cells");
        assert_eq!(line_text(&bullet), "  • Mitosis makes two cells");
    }

    #[test]
    fn test_progress_bar() {
        assert_eq!(progress_bar(0), "[░░░░░░░░░░]   0%");
        assert_eq!(progress_bar(55), "[█████░░░░░]  55%");
        assert_eq!(progress_bar(100), "[██████████] 100%");
    }
}
