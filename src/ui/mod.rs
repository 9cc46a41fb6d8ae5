use ratatui::layout::{Constraint, Direction, Layout, Rect};
use ratatui::style::{Color, Modifier, Style};
use ratatui::text::{Line, Span, Text};
use ratatui::widgets::{Block, Borders, Clear, List, ListItem, ListState, Paragraph, Wrap};
use ratatui::Frame;
use regex::Regex;
use time::format_description::FormatItem;

use crate::app::state::{AppState, FocusPane, InputLine, InputPurpose, OverlayState, SettingsEntry};
use crate::config::AppConfig;
use crate::highlight::{build_highlight_regex, segment, Segment};
use crate::model::{format_timestamp, Message};
use crate::search::SearchQuery;
use crate::store::views::{self, MessageContext};
use crate::store::EntityStore;

const TAG_CLOUD_LIMIT: usize = 12;

pub fn draw_app(frame: &mut Frame, store: &EntityStore, state: &AppState, config: &AppConfig) {
    let time_format = config.display.timestamp_items();
    let time_format = time_format.as_deref();

    let vertical = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Min(3),
            Constraint::Length(if config.display.show_tag_cloud { 1 } else { 0 }),
            Constraint::Length(3),
            Constraint::Length(1),
        ])
        .split(frame.size());

    let columns = Layout::default()
        .direction(Direction::Horizontal)
        .constraints([
            Constraint::Percentage(20),
            Constraint::Percentage(22),
            Constraint::Percentage(58),
        ])
        .split(vertical[0]);

    draw_servers(frame, columns[0], store, state);
    draw_channels(frame, columns[1], store, state);
    draw_messages(frame, columns[2], store, state, time_format);
    if config.display.show_tag_cloud {
        frame.render_widget(Paragraph::new(tag_cloud_line(store)), vertical[1]);
    }
    draw_composer(frame, vertical[2], store, state);
    frame.render_widget(Paragraph::new(build_status_line(store, state)), vertical[3]);

    render_overlay(frame, store, state, config, time_format);
}

fn pane_block(title: String, focused: bool) -> Block<'static> {
    let border_style = if focused {
        Style::default().fg(Color::Cyan)
    } else {
        Style::default()
    };
    Block::default()
        .title(title)
        .borders(Borders::ALL)
        .border_style(border_style)
}

fn cursor_style(focused: bool) -> Style {
    if focused {
        Style::default()
            .bg(Color::DarkGray)
            .add_modifier(Modifier::BOLD)
    } else {
        Style::default().add_modifier(Modifier::UNDERLINED)
    }
}

fn draw_servers(frame: &mut Frame, area: Rect, store: &EntityStore, state: &AppState) {
    let selected = store.selection().server.as_deref();
    let items: Vec<ListItem> = store
        .servers()
        .map(|server| {
            let marker = if Some(server.id.as_str()) == selected {
                "▸ "
            } else {
                "  "
            };
            ListItem::new(Line::from(vec![
                Span::raw(marker),
                Span::styled(
                    format!("[{}] ", server.icon_or_default()),
                    Style::default().fg(Color::Magenta),
                ),
                Span::raw(server.name.clone()),
            ]))
        })
        .collect();
    draw_column(frame, area, items, "Servers", state, FocusPane::Servers, state.server_cursor);
}

fn draw_channels(frame: &mut Frame, area: Rect, store: &EntityStore, state: &AppState) {
    let selected = store.selection().channel.as_deref();
    let items: Vec<ListItem> = match store.selection().server.as_deref() {
        Some(server_id) => store
            .channels_for_server(server_id)
            .map(|channel| {
                let marker = if Some(channel.id.as_str()) == selected {
                    "▸ "
                } else {
                    "  "
                };
                ListItem::new(format!("{marker}#{}", channel.name))
            })
            .collect(),
        None => Vec::new(),
    };
    draw_column(frame, area, items, "Channels", state, FocusPane::Channels, state.channel_cursor);
}

fn draw_column(
    frame: &mut Frame,
    area: Rect,
    mut items: Vec<ListItem<'static>>,
    title: &str,
    state: &AppState,
    pane: FocusPane,
    cursor: usize,
) {
    let focused = state.focus == pane;
    let mut list_state = ListState::default();
    if items.is_empty() {
        items.push(ListItem::new(Span::styled(
            "(empty, press a)",
            Style::default().fg(Color::Gray),
        )));
    } else {
        list_state.select(Some(cursor));
    }
    let list = List::new(items)
        .block(pane_block(title.to_string(), focused))
        .highlight_style(cursor_style(focused));
    frame.render_stateful_widget(list, area, &mut list_state);
}

fn draw_messages(
    frame: &mut Frame,
    area: Rect,
    store: &EntityStore,
    state: &AppState,
    time_format: Option<&[FormatItem<'_>]>,
) {
    let focused = state.focus == FocusPane::Messages;
    let selection = store.selection();
    let mut title = selection
        .channel
        .as_deref()
        .and_then(|id| store.channel(id))
        .map(|channel| format!("#{}", channel.name))
        .unwrap_or_else(|| "Messages".to_string());
    if let Some(tag) = selection.tag.as_deref() {
        title.push_str(&format!("  [filter #{tag}]"));
    }

    let messages = views::current_channel_messages(store);
    let mut list_state = ListState::default();
    let items: Vec<ListItem> = if messages.is_empty() {
        let hint = if selection.channel.is_some() {
            "No messages yet. Press i to write one."
        } else {
            "Select a channel to read its messages."
        };
        vec![ListItem::new(Span::styled(hint, Style::default().fg(Color::Gray)))]
    } else {
        list_state.select(Some(state.message_cursor));
        messages
            .iter()
            .map(|message| ListItem::new(message_lines(message, time_format)))
            .collect()
    };
    let list = List::new(items)
        .block(pane_block(title, focused))
        .highlight_style(cursor_style(focused));
    frame.render_stateful_widget(list, area, &mut list_state);
}

fn message_lines(message: &Message, time_format: Option<&[FormatItem<'_>]>) -> Vec<Line<'static>> {
    let mut header = vec![Span::styled(
        format_timestamp(message.created_at, time_format),
        Style::default().fg(Color::Gray),
    )];
    if message.is_pinned() {
        header.push(Span::styled(
            " ★",
            Style::default()
                .fg(Color::Yellow)
                .add_modifier(Modifier::BOLD),
        ));
    }
    if message.is_bookmarked() {
        header.push(Span::styled(" ⚑", Style::default().fg(Color::Cyan)));
    }
    if message.is_edited() {
        header.push(Span::styled(
            " (edited)",
            Style::default()
                .fg(Color::Gray)
                .add_modifier(Modifier::ITALIC),
        ));
    }
    let mut lines = vec![Line::from(header)];
    for line in message.content.lines() {
        lines.push(Line::from(content_spans(line)));
    }
    lines
}

/// Colours `#tag` spans inside a line of message content.
fn content_spans(text: &str) -> Vec<Span<'static>> {
    let tag_style = Style::default()
        .fg(Color::Green)
        .add_modifier(Modifier::BOLD);
    segment(text)
        .into_iter()
        .map(|part| match part {
            Segment::Text(text) => Span::raw(text.to_string()),
            Segment::Tag { raw, .. } => Span::styled(raw.to_string(), tag_style),
        })
        .collect()
}

fn tag_cloud_line(store: &EntityStore) -> Line<'static> {
    let stats = views::tag_stats(store);
    if stats.is_empty() {
        return Line::from(Span::styled(
            " No tags yet. Write #something in a message.",
            Style::default().fg(Color::Gray),
        ));
    }
    let active = store.selection().tag.as_deref();
    let mut spans = vec![Span::raw(" ")];
    for stat in stats.iter().take(TAG_CLOUD_LIMIT) {
        let mut style = Style::default().fg(Color::Green);
        if Some(stat.tag.as_str()) == active {
            style = style.add_modifier(Modifier::REVERSED);
        }
        spans.push(Span::styled(format!("#{}", stat.tag), style));
        spans.push(Span::styled(
            format!("({}) ", stat.count),
            Style::default().fg(Color::Gray),
        ));
    }
    Line::from(spans)
}

fn draw_composer(frame: &mut Frame, area: Rect, store: &EntityStore, state: &AppState) {
    let block = Block::default().borders(Borders::ALL);
    match state.overlay() {
        Some(OverlayState::Input { purpose, line }) if purpose.is_composer() => {
            let block = block
                .title(purpose.title())
                .border_style(Style::default().fg(Color::Cyan));
            frame.render_widget(Paragraph::new(line.as_str().to_string()).block(block), area);
            place_cursor(frame, area, line);
        }
        _ => {
            let hint = match store
                .selection()
                .channel
                .as_deref()
                .and_then(|id| store.channel(id))
            {
                Some(channel) => format!("Press i to message #{}", channel.name),
                None => "Select a channel to start writing".to_string(),
            };
            frame.render_widget(
                Paragraph::new(Span::styled(hint, Style::default().fg(Color::Gray))).block(block),
                area,
            );
        }
    }
}

fn place_cursor(frame: &mut Frame, area: Rect, line: &InputLine) {
    let max_col = area.width.saturating_sub(3) as usize;
    let col = line.cursor_column().min(max_col) as u16;
    frame.set_cursor(area.x + 1 + col, area.y + 1);
}

fn build_status_line(store: &EntityStore, state: &AppState) -> Text<'static> {
    let selection = store.selection();
    let server = selection
        .server
        .as_deref()
        .and_then(|id| store.server(id))
        .map(|server| server.name.clone())
        .unwrap_or_else(|| "-".to_string());
    let channel = selection
        .channel
        .as_deref()
        .and_then(|id| store.channel(id))
        .map(|channel| format!("#{}", channel.name))
        .unwrap_or_else(|| "-".to_string());

    let mut spans = vec![
        Span::styled(
            format!(" {} ", state.focus.label()),
            Style::default()
                .fg(Color::Black)
                .bg(Color::Cyan)
                .add_modifier(Modifier::BOLD),
        ),
        Span::raw(format!(" {server} / {channel}")),
    ];
    if let Some(tag) = selection.tag.as_deref() {
        spans.push(Span::styled(
            format!("  #{tag}"),
            Style::default().fg(Color::Green),
        ));
    }
    if let Some(message) = state.status_message() {
        let style = if state.status_is_warning() {
            Style::default().fg(Color::Red).add_modifier(Modifier::BOLD)
        } else {
            Style::default().fg(Color::Gray)
        };
        spans.push(Span::raw(" | "));
        spans.push(Span::styled(message.to_string(), style));
    }
    Text::from(Line::from(spans))
}

fn highlight_line(
    text: &str,
    regex: Option<&Regex>,
    highlight_style: Style,
    base_style: Style,
) -> Vec<Span<'static>> {
    if let Some(re) = regex {
        let mut spans = Vec::new();
        let mut last = 0;
        for mat in re.find_iter(text) {
            if mat.start() > last {
                spans.push(Span::styled(
                    text[last..mat.start()].to_string(),
                    base_style,
                ));
            }
            spans.push(Span::styled(mat.as_str().to_string(), highlight_style));
            last = mat.end();
        }
        if last < text.len() {
            spans.push(Span::styled(text[last..].to_string(), base_style));
        }
        if spans.is_empty() {
            spans.push(Span::styled(text.to_string(), base_style));
        }
        spans
    } else {
        vec![Span::styled(text.to_string(), base_style)]
    }
}

fn context_item(
    ctx: &MessageContext<'_>,
    regex: Option<&Regex>,
    time_format: Option<&[FormatItem<'_>]>,
) -> ListItem<'static> {
    let highlight_style = Style::default()
        .fg(Color::Yellow)
        .add_modifier(Modifier::BOLD);
    let header = Line::from(vec![
        Span::styled(
            format!("{} / #{}", ctx.server.name, ctx.channel.name),
            Style::default().fg(Color::Magenta),
        ),
        Span::styled(
            format!("  {}", format_timestamp(ctx.message.created_at, time_format)),
            Style::default().fg(Color::Gray),
        ),
    ]);
    let body = ctx.message.content.replace('\n', " ");
    ListItem::new(vec![
        header,
        Line::from(highlight_line(&body, regex, highlight_style, Style::default())),
    ])
}

fn render_overlay(
    frame: &mut Frame,
    store: &EntityStore,
    state: &AppState,
    config: &AppConfig,
    time_format: Option<&[FormatItem<'_>]>,
) {
    match state.overlay() {
        Some(OverlayState::Input { purpose, line }) if !purpose.is_composer() => {
            let area = Rect {
                height: 3,
                ..centered_rect(60, 20, frame.size())
            }
            .intersection(frame.size());
            frame.render_widget(Clear, area);
            let hint = match purpose {
                InputPurpose::ImportPath => {
                    "Path to a notecord backup • Enter import • Esc cancel"
                }
                _ => "Enter save • Esc cancel",
            };
            let paragraph = Paragraph::new(line.as_str().to_string()).block(
                Block::default()
                    .title(format!("{} ({hint})", purpose.title()))
                    .borders(Borders::ALL)
                    .border_style(Style::default().fg(Color::Cyan)),
            );
            frame.render_widget(paragraph, area);
            place_cursor(frame, area, line);
        }
        Some(OverlayState::ConfirmDelete(target)) => {
            let area = centered_rect(50, 20, frame.size());
            frame.render_widget(Clear, area);
            let lines = vec![
                Line::from(target.prompt()),
                Line::from(""),
                Line::from(Span::styled(
                    "Enter/y delete • n/Esc cancel",
                    Style::default().fg(Color::Gray),
                )),
            ];
            let paragraph = Paragraph::new(lines).wrap(Wrap { trim: true }).block(
                Block::default()
                    .title("Confirm")
                    .borders(Borders::ALL)
                    .border_style(Style::default().fg(Color::Red)),
            );
            frame.render_widget(paragraph, area);
        }
        Some(OverlayState::Search { line, selected }) => {
            let area = centered_rect(70, 70, frame.size());
            frame.render_widget(Clear, area);
            let parts = Layout::default()
                .direction(Direction::Vertical)
                .constraints([Constraint::Length(3), Constraint::Min(1)])
                .split(area);
            let input = Paragraph::new(line.as_str().to_string()).block(
                Block::default()
                    .title("Search (Enter jump • Esc close)")
                    .borders(Borders::ALL)
                    .border_style(Style::default().fg(Color::Cyan)),
            );
            frame.render_widget(input, parts[0]);
            place_cursor(frame, parts[0], line);

            let query = SearchQuery::new(line.as_str());
            let regex = build_highlight_regex(&query.highlight_terms());
            let found = views::search(store, line.as_str());
            let items: Vec<ListItem> = found
                .iter()
                .take(config.search.max_results)
                .map(|ctx| context_item(ctx, regex.as_ref(), time_format))
                .collect();
            let title = if query.is_empty() {
                "Results".to_string()
            } else {
                format!("Results ({})", found.len())
            };
            draw_overlay_list(frame, parts[1], title, items, *selected, "No matches.");
        }
        Some(OverlayState::Bookmarks { selected }) => {
            let area = centered_rect(70, 70, frame.size());
            frame.render_widget(Clear, area);
            let items: Vec<ListItem> = views::bookmarked_messages(store)
                .iter()
                .map(|ctx| context_item(ctx, None, time_format))
                .collect();
            draw_overlay_list(
                frame,
                area,
                "Bookmarks".into(),
                items,
                *selected,
                "No bookmarks. Press m on a message.",
            );
        }
        Some(OverlayState::Pinned { selected }) => {
            let area = centered_rect(60, 60, frame.size());
            frame.render_widget(Clear, area);
            let items: Vec<ListItem> = views::current_pinned_messages(store)
                .into_iter()
                .map(|message| ListItem::new(message_lines(message, time_format)))
                .collect();
            draw_overlay_list(
                frame,
                area,
                "Pinned".into(),
                items,
                *selected,
                "Nothing pinned in this channel.",
            );
        }
        Some(OverlayState::Tags { selected }) => {
            let area = centered_rect(40, 60, frame.size());
            frame.render_widget(Clear, area);
            let items: Vec<ListItem> = views::tag_stats(store)
                .into_iter()
                .map(|stat| {
                    ListItem::new(Line::from(vec![
                        Span::styled(format!("#{}", stat.tag), Style::default().fg(Color::Green)),
                        Span::styled(format!("  {}", stat.count), Style::default().fg(Color::Gray)),
                    ]))
                })
                .collect();
            draw_overlay_list(
                frame,
                area,
                "Filter by tag".into(),
                items,
                *selected,
                "No tags yet.",
            );
        }
        Some(OverlayState::Settings { selected }) => {
            let area = centered_rect(40, 30, frame.size());
            frame.render_widget(Clear, area);
            let items: Vec<ListItem> = SettingsEntry::all()
                .into_iter()
                .map(|entry| ListItem::new(entry.to_string()))
                .collect();
            draw_overlay_list(frame, area, "Settings".into(), items, *selected, "");
        }
        Some(OverlayState::Input { .. }) | None => {}
    }
}

fn draw_overlay_list(
    frame: &mut Frame,
    area: Rect,
    title: String,
    items: Vec<ListItem<'static>>,
    selected: usize,
    empty: &'static str,
) {
    let block = Block::default()
        .title(title)
        .borders(Borders::ALL)
        .border_style(Style::default().fg(Color::Magenta));
    if items.is_empty() {
        let paragraph = Paragraph::new(Span::styled(empty, Style::default().fg(Color::Gray)))
            .block(block);
        frame.render_widget(paragraph, area);
        return;
    }
    let mut list_state = ListState::default();
    list_state.select(Some(selected.min(items.len() - 1)));
    let list = List::new(items).block(block).highlight_style(
        Style::default()
            .bg(Color::DarkGray)
            .add_modifier(Modifier::BOLD),
    );
    frame.render_stateful_widget(list, area, &mut list_state);
}

fn centered_rect(percent_x: u16, percent_y: u16, area: Rect) -> Rect {
    let vertical = Layout::default()
        .direction(Direction::Vertical)
        .constraints(
            [
                Constraint::Percentage((100 - percent_y) / 2),
                Constraint::Percentage(percent_y),
                Constraint::Percentage((100 - percent_y) / 2),
            ]
            .as_ref(),
        )
        .split(area);

    Layout::default()
        .direction(Direction::Horizontal)
        .constraints(
            [
                Constraint::Percentage((100 - percent_x) / 2),
                Constraint::Percentage(percent_x),
                Constraint::Percentage((100 - percent_x) / 2),
            ]
            .as_ref(),
        )
        .split(vertical[1])[1]
}
