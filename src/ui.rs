use anyhow::Result;
use chrono::{DateTime, Local, Utc};
use crossterm::{
    event::{self, Event, KeyCode, KeyEvent, KeyEventKind, KeyModifiers},
    execute,
    terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen},
};
use log::debug;
use ratatui::{
    prelude::*,
    widgets::{Block, Borders, Clear, List, ListItem, ListState, Paragraph},
    Frame,
};
use std::{io, path::PathBuf, time::Duration};
use textwrap::wrap;
use tui_input::{backend::crossterm::EventHandler, Input};

use chatroom::models::{ChatroomId, Message, MessageKind, Presence};
use chatroom::{ChatBackend, ChatSession};

use crate::utils::format_size;

pub use ratatui::backend::CrosstermBackend;
pub use ratatui::Terminal;

/// What the user asked for; the main loop carries it out.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UiAction {
    Quit,
    SendText(String),
    /// The message input changed.
    Composing,
    SelectChatroom(ChatroomId),
    ChatroomPage(i32),
    MessagePage(i32),
    Refresh,
    UploadFiles(Vec<PathBuf>),
    MarkRead(i64),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotificationKind {
    Info,
    Error,
}

struct Notification {
    text: String,
    kind: NotificationKind,
    timestamp: DateTime<Utc>,
}

struct UploadDialog {
    input: Input,
}

enum Tab {
    Messages,
    Chatrooms,
}

pub struct ChatUI {
    input: Input,
    active_tab: Tab,
    help_open: bool,
    upload_dialog: Option<UploadDialog>,
    notification: Option<Notification>,
}

impl ChatUI {
    pub fn new() -> Self {
        ChatUI {
            input: Input::default(),
            active_tab: Tab::Messages,
            help_open: false,
            upload_dialog: None,
            notification: None,
        }
    }

    pub fn notify(&mut self, text: &str, kind: NotificationKind) {
        debug!("UI notification: {}", text);
        self.notification = Some(Notification {
            text: text.to_string(),
            kind,
            timestamp: Utc::now(),
        });
    }

    #[cfg(test)]
    pub fn notification_text(&self) -> Option<&str> {
        self.notification.as_ref().map(|n| n.text.as_str())
    }

    pub fn clean_notifications(&mut self, timeout_secs: i64) {
        if let Some(n) = &self.notification {
            if (Utc::now() - n.timestamp).num_seconds() >= timeout_secs {
                self.notification = None;
            }
        }
    }

    fn read_key() -> Result<Option<KeyEvent>> {
        if event::poll(Duration::from_millis(10))? {
            if let Event::Key(key) = event::read()? {
                if key.kind == KeyEventKind::Press {
                    return Ok(Some(key));
                }
            }
        }
        Ok(None)
    }

    pub fn handle_input<B: ChatBackend + 'static>(&mut self, session: &ChatSession<B>) -> Result<Option<UiAction>> {
        let Some(key) = Self::read_key()? else {
            return Ok(None);
        };

        if self.help_open {
            self.help_open = false;
            return Ok(None);
        }

        if let Some(dialog) = self.upload_dialog.as_mut() {
            match key.code {
                KeyCode::Esc => self.upload_dialog = None,
                KeyCode::Enter => {
                    let path = dialog.input.value().trim().to_string();
                    self.upload_dialog = None;
                    if !path.is_empty() {
                        return Ok(Some(UiAction::UploadFiles(vec![PathBuf::from(path)])));
                    }
                }
                _ => {
                    dialog.input.handle_event(&Event::Key(key));
                }
            }
            return Ok(None);
        }

        let ctrl = key.modifiers.contains(KeyModifiers::CONTROL);
        let action = match key.code {
            KeyCode::Esc => Some(UiAction::Quit),
            KeyCode::Tab => {
                self.active_tab = match self.active_tab {
                    Tab::Messages => Tab::Chatrooms,
                    Tab::Chatrooms => Tab::Messages,
                };
                None
            }
            KeyCode::F(1) => {
                self.help_open = true;
                None
            }
            KeyCode::Char('h') if ctrl => {
                self.help_open = true;
                None
            }
            KeyCode::Char('u') if ctrl => {
                self.upload_dialog = Some(UploadDialog { input: Input::default() });
                None
            }
            KeyCode::Char('r') if ctrl => Some(UiAction::Refresh),
            KeyCode::Char('l') if ctrl => last_unread_incoming(session).map(UiAction::MarkRead),
            KeyCode::PageUp => Some(self.page_action(-1)),
            KeyCode::PageDown => Some(self.page_action(1)),
            KeyCode::Up | KeyCode::Down if matches!(self.active_tab, Tab::Chatrooms) => {
                let step = if key.code == KeyCode::Up { -1 } else { 1 };
                neighbour_chatroom(session, step).map(UiAction::SelectChatroom)
            }
            KeyCode::Enter if matches!(self.active_tab, Tab::Messages) => {
                let text = self.input.value().to_string();
                if text.trim().is_empty() {
                    None
                } else {
                    self.input.reset();
                    Some(UiAction::SendText(text))
                }
            }
            _ if matches!(self.active_tab, Tab::Messages) => self
                .input
                .handle_event(&Event::Key(key))
                .filter(|changed| changed.value)
                .map(|_| UiAction::Composing),
            _ => None,
        };
        Ok(action)
    }

    fn page_action(&self, delta: i32) -> UiAction {
        match self.active_tab {
            Tab::Chatrooms => UiAction::ChatroomPage(delta),
            Tab::Messages => UiAction::MessagePage(delta),
        }
    }

    pub fn draw<B: Backend, C: ChatBackend + 'static>(&self, frame: &mut Frame<B>, session: &ChatSession<C>) {
        let size = frame.size();

        let chunks = Layout::default()
            .direction(Direction::Horizontal)
            .constraints([Constraint::Percentage(20), Constraint::Percentage(80)])
            .split(size);

        let chat_chunks = Layout::default()
            .direction(Direction::Vertical)
            .constraints([
                Constraint::Min(5),    // Messages area
                Constraint::Length(3), // Input box
                Constraint::Length(1), // Help line
            ])
            .split(chunks[1]);

        self.draw_chatrooms(frame, session, chunks[0]);
        self.draw_messages(frame, session, chat_chunks[0]);

        let input_block = Block::default()
            .title("Message")
            .borders(Borders::ALL)
            .border_style(focus_style(matches!(self.active_tab, Tab::Messages)));
        frame.render_widget(Paragraph::new(self.input.value()).block(input_block), chat_chunks[1]);

        let who = session
            .self_info()
            .map(|s| s.username.as_str())
            .unwrap_or("not signed in");
        let help = Line::from(vec![
            Span::styled(format!("[{}] ", who), Style::default().fg(Color::Cyan)),
            Span::styled(
                "ESC quit | TAB switch | PgUp/PgDn page | Ctrl+U upload | Ctrl+L mark read | Ctrl+R refresh | Ctrl+H help",
                Style::default().fg(Color::Gray),
            ),
        ]);
        frame.render_widget(Paragraph::new(help), chat_chunks[2]);

        if let Tab::Messages = self.active_tab {
            frame.set_cursor(
                chat_chunks[1].x + self.input.visual_cursor() as u16 + 1,
                chat_chunks[1].y + 1,
            );
        }

        if let Some(dialog) = &self.upload_dialog {
            draw_upload_dialog(frame, dialog, size);
        }
        if self.help_open {
            draw_help_dialog(frame, size);
        }
        if let Some(notification) = &self.notification {
            draw_notification(frame, notification, size);
        }
    }

    fn draw_chatrooms<B: Backend, C: ChatBackend + 'static>(&self, frame: &mut Frame<B>, session: &ChatSession<C>, area: Rect) {
        let active = session.active_chatroom().map(|c| c.id);
        let items: Vec<ListItem> = session
            .chatrooms()
            .iter()
            .map(|room| {
                let online = room
                    .other_user_ids
                    .iter()
                    .any(|pk| session.presence(*pk) == Presence::Online);
                let marker = if Some(room.id) == active { "> " } else { "  " };
                let dot = if online { "● " } else { "○ " };
                let mut spans = vec![
                    Span::raw(marker),
                    Span::styled(dot, Style::default().fg(if online { Color::Green } else { Color::DarkGray })),
                    Span::raw(room.display_name()),
                ];
                if room.unread_count > 0 {
                    spans.push(Span::styled(
                        format!(" ({})", room.unread_count),
                        Style::default().fg(Color::Yellow).add_modifier(Modifier::BOLD),
                    ));
                }
                ListItem::new(Line::from(spans))
            })
            .collect();

        let title = match session.chatroom_page() {
            Some(p) => format!("Chatrooms {}/{}", p.page, p.pages),
            None => "Chatrooms".to_string(),
        };
        let list = List::new(items).block(
            Block::default()
                .title(title)
                .borders(Borders::ALL)
                .border_style(focus_style(matches!(self.active_tab, Tab::Chatrooms))),
        );
        frame.render_widget(list, area);
    }

    fn draw_messages<B: Backend, C: ChatBackend + 'static>(&self, frame: &mut Frame<B>, session: &ChatSession<C>, area: Rect) {
        let chunks = Layout::default()
            .direction(Direction::Vertical)
            .constraints([Constraint::Min(1), Constraint::Length(1)])
            .split(area);

        let wrap_width = chunks[0].width.saturating_sub(2).max(1) as usize;
        let rows: Vec<ListItem> = session
            .visible_messages()
            .into_iter()
            .flat_map(|m| {
                let style = message_style(m);
                wrap(&message_line(m), wrap_width)
                    .into_iter()
                    .map(|l| l.into_owned())
                    .collect::<Vec<_>>()
                    .into_iter()
                    .map(move |line| ListItem::new(Text::from(line)).style(style))
            })
            .collect();

        let room = session
            .active_chatroom()
            .map(|c| c.display_name())
            .unwrap_or_else(|| "no chatroom".to_string());
        let page = session
            .message_page()
            .map(|p| format!(" [page {}/{}]", p.page, p.pages))
            .unwrap_or_default();
        let title = format!("{}{}", room, page);

        // Select the last row so the list follows new messages.
        let mut list_state = ListState::default();
        if !rows.is_empty() {
            list_state.select(Some(rows.len() - 1));
        }
        let list = List::new(rows)
            .block(Block::default().borders(Borders::ALL).title(title))
            .highlight_style(Style::default());
        frame.render_stateful_widget(list, chunks[0], &mut list_state);

        let typing: Vec<String> = session
            .visible_typing()
            .iter()
            .map(|t| t.sender_username.clone())
            .collect();
        let typing_line = match typing.len() {
            0 => String::new(),
            1 => format!("{} is typing...", typing[0]),
            _ => format!("{} are typing...", typing.join(", ")),
        };
        frame.render_widget(
            Paragraph::new(typing_line).style(Style::default().fg(Color::DarkGray).add_modifier(Modifier::ITALIC)),
            chunks[1],
        );
    }
}

fn focus_style(focused: bool) -> Style {
    if focused {
        Style::default().fg(Color::Yellow)
    } else {
        Style::default()
    }
}

fn message_line(m: &Message) -> String {
    let time = m.sent.with_timezone(&Local).format("%Y-%m-%d %H:%M");
    let who = if m.out { "You" } else { m.sender_username.as_str() };
    let body = match (&m.kind, &m.file) {
        (MessageKind::File, Some(file)) => format!("[file] {} ({})", file.name, format_size(file.size)),
        _ => m.text.clone(),
    };
    let status = if !m.out {
        ""
    } else if m.is_pending() {
        " …"
    } else if m.read {
        " ✓✓"
    } else {
        " ✓"
    };
    format!("[{}] {}: {}{}", time, who, body, status)
}

fn message_style(m: &Message) -> Style {
    if m.out && m.is_pending() {
        Style::default().fg(Color::Blue)
    } else if m.out {
        Style::default().fg(Color::Green)
    } else if !m.read {
        Style::default().add_modifier(Modifier::BOLD)
    } else {
        Style::default()
    }
}

fn last_unread_incoming<B: ChatBackend + 'static>(session: &ChatSession<B>) -> Option<i64> {
    session
        .visible_messages()
        .into_iter()
        .rev()
        .find(|m| !m.out && !m.read && !m.is_pending())
        .map(|m| m.id)
}

fn neighbour_chatroom<B: ChatBackend + 'static>(session: &ChatSession<B>, step: isize) -> Option<ChatroomId> {
    let rooms = session.chatrooms();
    if rooms.is_empty() {
        return None;
    }
    let len = rooms.len() as isize;
    let current = session
        .active_chatroom()
        .and_then(|active| rooms.iter().position(|r| r.id == active.id))
        .map(|i| i as isize)
        .unwrap_or(-1);
    let next = (current + step).rem_euclid(len) as usize;
    Some(rooms[next].id)
}

fn centered(area: Rect, width: u16, height: u16) -> Rect {
    let width = width.min(area.width.saturating_sub(4));
    let height = height.min(area.height.saturating_sub(4));
    Rect::new(
        area.x + (area.width - width) / 2,
        area.y + (area.height - height) / 2,
        width,
        height,
    )
}

fn draw_upload_dialog<B: Backend>(f: &mut Frame<B>, dialog: &UploadDialog, area: Rect) {
    let popup_area = centered(area, 70, 5);
    let block = Block::default()
        .title("Upload file (Enter to send, Esc to cancel)")
        .borders(Borders::ALL)
        .border_style(Style::default().fg(Color::Cyan));

    f.render_widget(Clear, popup_area);
    f.render_widget(block, popup_area);

    let inner = popup_area.inner(&Margin { vertical: 1, horizontal: 2 });
    f.render_widget(Paragraph::new(dialog.input.value()), inner);
    f.set_cursor(inner.x + dialog.input.visual_cursor() as u16, inner.y);
}

fn draw_help_dialog<B: Backend>(f: &mut Frame<B>, area: Rect) {
    let popup_area = centered(area, 70, 22);
    let block = Block::default()
        .title("Keyboard Shortcuts")
        .borders(Borders::ALL)
        .border_style(Style::default().fg(Color::Cyan));

    f.render_widget(Clear, popup_area);
    f.render_widget(block, popup_area);

    let inner = popup_area.inner(&Margin { vertical: 1, horizontal: 2 });
    let shortcuts = [
        ("General", ""),
        ("ESC", "Quit"),
        ("Tab", "Switch between Messages and Chatrooms"),
        ("Ctrl+R", "Reload chatrooms and messages"),
        ("", ""),
        ("Chatrooms", ""),
        ("↑/↓", "Select chatroom (when Chatrooms is focused)"),
        ("PgUp/PgDn", "Previous/next page of chatrooms"),
        ("", ""),
        ("Messages", ""),
        ("Enter", "Send message"),
        ("PgUp/PgDn", "Previous/next page of history"),
        ("Ctrl+U", "Upload a file to the active chatroom"),
        ("Ctrl+L", "Mark the latest incoming message as read"),
        ("", ""),
        ("Ctrl+H, F1", "Show this help"),
        ("", ""),
        ("Press any key to close this dialog", ""),
    ];

    let items: Vec<ListItem> = shortcuts
        .iter()
        .map(|(key, desc)| {
            if desc.is_empty() {
                ListItem::new(Text::styled(
                    key.to_string(),
                    Style::default().fg(Color::Yellow).add_modifier(Modifier::BOLD),
                ))
            } else {
                ListItem::new(Line::from(vec![
                    Span::styled(format!("{:<12}", key), Style::default().fg(Color::Green)),
                    Span::raw(desc.to_string()),
                ]))
            }
        })
        .collect();
    f.render_widget(List::new(items), inner);
}

fn draw_notification<B: Backend>(f: &mut Frame<B>, notification: &Notification, area: Rect) {
    let width = 40.min(area.width.saturating_sub(4));
    // Row 0 is skipped, so the popup gets whatever is left below it.
    let height = 3.min(area.height.saturating_sub(1));
    if width == 0 || height == 0 {
        return;
    }
    let popup_area = Rect::new(area.x + area.width.saturating_sub(width + 2), area.y + 1, width, height);

    let color = match notification.kind {
        NotificationKind::Info => Color::Green,
        NotificationKind::Error => Color::Red,
    };
    let block = Block::default().borders(Borders::ALL).border_style(Style::default().fg(color));

    f.render_widget(Clear, popup_area);
    f.render_widget(
        Paragraph::new(notification.text.as_str())
            .block(block)
            .style(Style::default().fg(color)),
        popup_area,
    );
}

pub fn setup_terminal() -> Result<Terminal<CrosstermBackend<io::Stdout>>> {
    enable_raw_mode()?;
    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen)?;
    let backend = CrosstermBackend::new(stdout);
    let terminal = Terminal::new(backend)?;
    Ok(terminal)
}

pub fn restore_terminal(mut terminal: Terminal<CrosstermBackend<io::Stdout>>) -> Result<()> {
    disable_raw_mode()?;
    execute!(terminal.backend_mut(), LeaveAlternateScreen)?;
    terminal.show_cursor()?;
    Ok(())
}
