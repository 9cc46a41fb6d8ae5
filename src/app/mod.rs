use std::io::Stdout;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use crossbeam_channel::{unbounded, Receiver};
use crossterm::event::{
    self, DisableMouseCapture, EnableMouseCapture, Event, KeyCode, KeyEvent, KeyEventKind,
    KeyModifiers,
};
use crossterm::execute;
use crossterm::terminal::{
    disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen,
};
use ratatui::backend::CrosstermBackend;
use ratatui::Terminal;

use crate::config::{AppConfig, ConfigPaths};
use crate::store::views;
use crate::store::{EntityStore, StoreEvent, SubscriptionId};
use crate::ui;

mod actions;
pub mod state;

pub use state::{
    AppState, ConfirmTarget, FocusPane, InputLine, InputPurpose, OverlayState, SettingsEntry,
};

use self::actions::ActionDispatcher;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Action {
    Quit,
    SelectNext,
    SelectPrevious,
    ToggleFocus,
    Activate,
    Add,
    Compose,
    Edit,
    Delete,
    TogglePin,
    ToggleBookmark,
    ShowTags,
    ClearTagFilter,
    ShowPinned,
    StartSearch,
    ShowBookmarks,
    ShowSettings,
}

fn action_for_key(key: &KeyEvent) -> Option<Action> {
    if key.modifiers.contains(KeyModifiers::CONTROL) {
        return match key.code {
            KeyCode::Char('c') => Some(Action::Quit),
            KeyCode::Char('f') => Some(Action::StartSearch),
            _ => None,
        };
    }
    if key.modifiers.intersects(KeyModifiers::ALT | KeyModifiers::SUPER) {
        return None;
    }
    let action = match key.code {
        KeyCode::Char('q') => Action::Quit,
        KeyCode::Char('j') | KeyCode::Down => Action::SelectNext,
        KeyCode::Char('k') | KeyCode::Up => Action::SelectPrevious,
        KeyCode::Tab => Action::ToggleFocus,
        KeyCode::Enter => Action::Activate,
        KeyCode::Char('a') => Action::Add,
        KeyCode::Char('i') => Action::Compose,
        KeyCode::Char('e') => Action::Edit,
        KeyCode::Char('d') => Action::Delete,
        KeyCode::Char('p') => Action::TogglePin,
        KeyCode::Char('m') => Action::ToggleBookmark,
        KeyCode::Char('#') => Action::ShowTags,
        KeyCode::Esc => Action::ClearTagFilter,
        KeyCode::Char('P') => Action::ShowPinned,
        KeyCode::Char('/') => Action::StartSearch,
        KeyCode::Char('b') => Action::ShowBookmarks,
        KeyCode::Char(',') => Action::ShowSettings,
        _ => return None,
    };
    Some(action)
}

fn is_plain(key: &KeyEvent) -> bool {
    !key.modifiers
        .intersects(KeyModifiers::CONTROL | KeyModifiers::ALT | KeyModifiers::SUPER)
}

pub struct App {
    pub config: Arc<AppConfig>,
    store: EntityStore,
    state: AppState,
    paths: ConfigPaths,
    events: Receiver<StoreEvent>,
    subscription: SubscriptionId,
    should_quit: bool,
    tick_rate: Duration,
}

impl App {
    pub fn new(config: Arc<AppConfig>, mut store: EntityStore, paths: ConfigPaths) -> Result<Self> {
        let (sender, events) = unbounded();
        let subscription = store.subscribe(move |event| {
            let _ = sender.send(event.clone());
        });
        let mut app = Self {
            config,
            store,
            state: AppState::default(),
            paths,
            events,
            subscription,
            should_quit: false,
            tick_rate: Duration::from_millis(250),
        };
        app.drain_events();
        app.state.set_status_message(Some(
            "Tab focus • Enter select • a add • i write • , settings • q quit",
        ));
        Ok(app)
    }

    pub fn store(&self) -> &EntityStore {
        &self.store
    }

    pub fn state(&self) -> &AppState {
        &self.state
    }

    pub fn run(&mut self) -> Result<()> {
        let mut terminal = setup_terminal()?;
        let result = self.event_loop(&mut terminal);
        restore_terminal(&mut terminal)?;
        self.store.unsubscribe(self.subscription);
        result
    }

    fn event_loop(&mut self, terminal: &mut Terminal<CrosstermBackend<Stdout>>) -> Result<()> {
        let mut last_tick = Instant::now();
        loop {
            terminal
                .draw(|frame| ui::draw_app(frame, &self.store, &self.state, &self.config))
                .context("rendering frame")?;

            if self.should_quit {
                break;
            }

            let timeout = self
                .tick_rate
                .checked_sub(last_tick.elapsed())
                .unwrap_or_else(|| Duration::from_millis(0));

            if event::poll(timeout).context("polling for terminal events")? {
                if let Event::Key(key) = event::read().context("reading terminal event")? {
                    self.handle_key(key);
                }
            }

            if last_tick.elapsed() >= self.tick_rate {
                self.drain_events();
                last_tick = Instant::now();
            }
        }
        Ok(())
    }

    pub(crate) fn handle_key(&mut self, key: KeyEvent) {
        if key.kind != KeyEventKind::Press {
            return;
        }
        if self.state.overlay().is_some() {
            self.handle_overlay_key(key);
        } else if let Some(action) = action_for_key(&key) {
            self.handle_action(action);
        }
        self.drain_events();
        self.clamp_cursors();
    }

    fn handle_action(&mut self, action: Action) {
        match action {
            Action::Quit => self.should_quit = true,
            Action::SelectNext => self.move_cursor(1),
            Action::SelectPrevious => self.move_cursor(-1),
            Action::ToggleFocus => self.state.toggle_focus(),
            Action::Activate => self.activate(),
            Action::Add => self.begin_add(),
            Action::Compose => self.begin_compose(),
            Action::Edit => self.begin_edit(),
            Action::Delete => self.begin_delete(),
            Action::TogglePin => {
                if let Some(id) = self.message_under_cursor() {
                    let result = self.dispatcher().toggle_pin(&id);
                    self.report(result);
                }
            }
            Action::ToggleBookmark => {
                if let Some(id) = self.message_under_cursor() {
                    let result = self.dispatcher().toggle_bookmark(&id);
                    self.report(result);
                }
            }
            Action::ShowTags => self.state.toggle_overlay(OverlayState::Tags { selected: 0 }),
            Action::ClearTagFilter => {
                if self.store.selection().tag.is_some() {
                    self.store.select_tag(None);
                    self.state.message_cursor = 0;
                    self.state.set_status_message(Some("Tag filter cleared"));
                }
            }
            Action::ShowPinned => {
                if self.store.selection().channel.is_none() {
                    self.state.set_status_message(Some("No channel selected"));
                } else {
                    self.state.toggle_overlay(OverlayState::Pinned { selected: 0 });
                }
            }
            Action::StartSearch => self.state.toggle_overlay(OverlayState::search()),
            Action::ShowBookmarks => {
                self.state.toggle_overlay(OverlayState::Bookmarks { selected: 0 })
            }
            Action::ShowSettings => {
                self.state.toggle_overlay(OverlayState::Settings { selected: 0 })
            }
        }
    }

    fn handle_overlay_key(&mut self, key: KeyEvent) {
        let Some(overlay) = self.state.overlay() else {
            return;
        };
        let is_input = matches!(overlay, OverlayState::Input { .. });
        let is_search = matches!(overlay, OverlayState::Search { .. });
        let is_confirm = matches!(overlay, OverlayState::ConfirmDelete(_));

        if key.code == KeyCode::Esc {
            self.state.close_overlay();
            return;
        }
        if is_confirm {
            match key.code {
                KeyCode::Enter | KeyCode::Char('y') => self.submit_confirm(),
                KeyCode::Char('n') => {
                    self.state.close_overlay();
                }
                _ => {}
            }
            return;
        }
        if is_input || is_search {
            if self.edit_line(&key) {
                if let Some(OverlayState::Search { selected, .. }) = self.state.overlay_mut() {
                    *selected = 0;
                }
                return;
            }
            if is_input {
                if key.code == KeyCode::Enter {
                    self.submit_input();
                }
                return;
            }
        }
        match key.code {
            KeyCode::Down => self.move_overlay(1),
            KeyCode::Up => self.move_overlay(-1),
            KeyCode::Char('j') if !is_search => self.move_overlay(1),
            KeyCode::Char('k') if !is_search => self.move_overlay(-1),
            KeyCode::Enter => self.submit_overlay_choice(),
            _ => {}
        }
    }

    /// Routes text-editing keys into the open input line. Returns `true` when
    /// the key was consumed.
    fn edit_line(&mut self, key: &KeyEvent) -> bool {
        let Some(line) = self.state.overlay_mut().and_then(OverlayState::line_mut) else {
            return false;
        };
        match key.code {
            KeyCode::Char(ch) if is_plain(key) => {
                line.insert_char(ch);
            }
            KeyCode::Backspace => {
                line.backspace();
            }
            KeyCode::Delete => {
                line.delete();
            }
            KeyCode::Left => line.move_left(),
            KeyCode::Right => line.move_right(),
            KeyCode::Home => line.move_home(),
            KeyCode::End => line.move_end(),
            _ => return false,
        }
        true
    }

    fn move_overlay(&mut self, delta: isize) {
        let len = self.overlay_len();
        self.state.move_overlay_selection(delta, len);
    }

    fn overlay_len(&self) -> usize {
        match self.state.overlay() {
            Some(OverlayState::Search { line, .. }) => self.search_results(line.as_str()).len(),
            Some(OverlayState::Bookmarks { .. }) => views::bookmarked_messages(&self.store).len(),
            Some(OverlayState::Pinned { .. }) => views::current_pinned_messages(&self.store).len(),
            Some(OverlayState::Tags { .. }) => views::tag_stats(&self.store).len(),
            Some(OverlayState::Settings { .. }) => SettingsEntry::all().len(),
            _ => 0,
        }
    }

    fn search_results(&self, query: &str) -> Vec<String> {
        views::search(&self.store, query)
            .into_iter()
            .take(self.config.search.max_results)
            .map(|ctx| ctx.message.id.clone())
            .collect()
    }

    fn submit_overlay_choice(&mut self) {
        let Some(overlay) = self.state.overlay().cloned() else {
            return;
        };
        match overlay {
            OverlayState::Search { line, selected } => {
                if let Some(id) = self.search_results(line.as_str()).get(selected).cloned() {
                    self.jump_to_message(&id);
                }
            }
            OverlayState::Bookmarks { selected } => {
                let id = views::bookmarked_messages(&self.store)
                    .get(selected)
                    .map(|ctx| ctx.message.id.clone());
                if let Some(id) = id {
                    self.jump_to_message(&id);
                }
            }
            OverlayState::Pinned { selected } => {
                let id = views::current_pinned_messages(&self.store)
                    .get(selected)
                    .map(|message| message.id.clone());
                if let Some(id) = id {
                    self.jump_to_message(&id);
                }
            }
            OverlayState::Tags { selected } => {
                let tag = views::tag_stats(&self.store)
                    .into_iter()
                    .nth(selected)
                    .map(|stat| stat.tag);
                self.state.close_overlay();
                if let Some(tag) = tag {
                    self.store.select_tag(Some(&tag));
                    self.state.message_cursor = 0;
                    self.state.focus = FocusPane::Messages;
                    self.state
                        .set_status_message(Some(format!("Filtering by #{tag} • Esc clears")));
                }
            }
            OverlayState::Settings { selected } => {
                self.state.close_overlay();
                match SettingsEntry::all().get(selected) {
                    Some(SettingsEntry::Export) => {
                        let result = self.dispatcher().export();
                        self.report(result);
                    }
                    Some(SettingsEntry::Import) => self
                        .state
                        .open_overlay(OverlayState::input(InputPurpose::ImportPath, "")),
                    Some(SettingsEntry::Reset) => self
                        .state
                        .open_overlay(OverlayState::ConfirmDelete(ConfirmTarget::Reset)),
                    None => {}
                }
            }
            OverlayState::Input { .. } | OverlayState::ConfirmDelete(_) => {}
        }
    }

    fn submit_input(&mut self) {
        let Some(OverlayState::Input { purpose, mut line }) = self.state.close_overlay() else {
            return;
        };
        let text = line.take();
        let result = self.dispatcher().submit_input(&purpose, &text);
        if result.is_err() {
            // keep the draft so the user can fix it
            self.state.open_overlay(OverlayState::Input {
                purpose: purpose.clone(),
                line: InputLine::with_text(&text),
            });
        } else {
            self.after_input(&purpose);
        }
        self.report(result);
    }

    fn after_input(&mut self, purpose: &InputPurpose) {
        match purpose {
            InputPurpose::NewServer => {
                self.state.server_cursor = self.store.servers().count().saturating_sub(1);
                self.state.channel_cursor = 0;
                self.state.message_cursor = 0;
            }
            InputPurpose::NewChannel { .. } => {
                self.state.channel_cursor = self.visible_channel_ids().len().saturating_sub(1);
                self.state.message_cursor = 0;
            }
            InputPurpose::ComposeMessage { .. } => {
                self.state.message_cursor = self.visible_message_ids().len().saturating_sub(1);
            }
            InputPurpose::ImportPath => self.reset_cursors(),
            _ => {}
        }
    }

    fn submit_confirm(&mut self) {
        let Some(OverlayState::ConfirmDelete(target)) = self.state.close_overlay() else {
            return;
        };
        let result = self.dispatcher().confirm_delete(&target);
        if matches!(target, ConfirmTarget::Reset) {
            self.reset_cursors();
        }
        self.report(result);
    }

    fn activate(&mut self) {
        match self.state.focus {
            FocusPane::Servers => {
                let Some(id) = self.visible_server_ids().get(self.state.server_cursor).cloned()
                else {
                    return;
                };
                self.store.select_server(Some(&id));
                self.store.select_tag(None);
                self.state.channel_cursor = 0;
                self.state.message_cursor = 0;
                self.state.focus = FocusPane::Channels;
            }
            FocusPane::Channels => {
                let Some(id) = self.visible_channel_ids().get(self.state.channel_cursor).cloned()
                else {
                    return;
                };
                self.store.select_channel(Some(&id));
                self.store.select_tag(None);
                self.state.message_cursor = 0;
                self.state.focus = FocusPane::Messages;
            }
            FocusPane::Messages => self.begin_compose(),
        }
    }

    fn begin_add(&mut self) {
        match self.state.focus {
            FocusPane::Servers => self
                .state
                .open_overlay(OverlayState::input(InputPurpose::NewServer, "")),
            FocusPane::Channels => match self.store.selection().server.clone() {
                Some(server_id) => self.state.open_overlay(OverlayState::input(
                    InputPurpose::NewChannel { server_id },
                    "",
                )),
                None => self.state.set_status_message(Some("Select a server first")),
            },
            FocusPane::Messages => self.begin_compose(),
        }
    }

    fn begin_compose(&mut self) {
        match self.store.selection().channel.clone() {
            Some(channel_id) => self.state.open_overlay(OverlayState::input(
                InputPurpose::ComposeMessage { channel_id },
                "",
            )),
            None => self.state.set_status_message(Some("Select a channel first")),
        }
    }

    fn begin_edit(&mut self) {
        let overlay = match self.state.focus {
            FocusPane::Servers => self
                .server_under_cursor()
                .and_then(|id| self.store.server(&id))
                .map(|server| {
                    OverlayState::input(
                        InputPurpose::RenameServer {
                            id: server.id.clone(),
                        },
                        &server.name,
                    )
                }),
            FocusPane::Channels => self
                .channel_under_cursor()
                .and_then(|id| self.store.channel(&id))
                .map(|channel| {
                    OverlayState::input(
                        InputPurpose::RenameChannel {
                            id: channel.id.clone(),
                        },
                        &channel.name,
                    )
                }),
            FocusPane::Messages => self
                .message_under_cursor()
                .and_then(|id| self.store.message(&id))
                .map(|message| {
                    OverlayState::input(
                        InputPurpose::EditMessage {
                            id: message.id.clone(),
                        },
                        &message.content,
                    )
                }),
        };
        match overlay {
            Some(overlay) => self.state.open_overlay(overlay),
            None => self.state.set_status_message(Some("Nothing selected")),
        }
    }

    fn begin_delete(&mut self) {
        let target = match self.state.focus {
            FocusPane::Servers => self
                .server_under_cursor()
                .and_then(|id| self.store.server(&id))
                .map(|server| ConfirmTarget::Server {
                    id: server.id.clone(),
                    name: server.name.clone(),
                }),
            FocusPane::Channels => self
                .channel_under_cursor()
                .and_then(|id| self.store.channel(&id))
                .map(|channel| ConfirmTarget::Channel {
                    id: channel.id.clone(),
                    name: channel.name.clone(),
                }),
            FocusPane::Messages => self
                .message_under_cursor()
                .and_then(|id| self.store.message(&id))
                .map(|message| ConfirmTarget::Message {
                    id: message.id.clone(),
                    preview: message.content.chars().take(40).collect(),
                }),
        };
        match target {
            Some(target) => self.state.open_overlay(OverlayState::ConfirmDelete(target)),
            None => self.state.set_status_message(Some("Nothing selected")),
        }
    }

    fn jump_to_message(&mut self, message_id: &str) {
        let Some((channel_id, server_id)) = self
            .store
            .message(message_id)
            .and_then(|message| views::resolve(&self.store, message))
            .map(|ctx| (ctx.channel.id.clone(), ctx.server.id.clone()))
        else {
            return;
        };
        self.state.close_overlay();
        self.store.select_server(Some(&server_id));
        self.store.select_channel(Some(&channel_id));
        self.store.select_tag(None);
        self.state.server_cursor = position(&self.visible_server_ids(), &server_id);
        self.state.channel_cursor = position(&self.visible_channel_ids(), &channel_id);
        self.state.message_cursor = position(&self.visible_message_ids(), message_id);
        self.state.focus = FocusPane::Messages;
    }

    fn move_cursor(&mut self, delta: isize) {
        let len = match self.state.focus {
            FocusPane::Servers => self.visible_server_ids().len(),
            FocusPane::Channels => self.visible_channel_ids().len(),
            FocusPane::Messages => self.visible_message_ids().len(),
        };
        self.state.move_cursor(delta, len);
    }

    fn clamp_cursors(&mut self) {
        let servers = self.visible_server_ids().len();
        let channels = self.visible_channel_ids().len();
        let messages = self.visible_message_ids().len();
        self.state.clamp_cursors(servers, channels, messages);
    }

    fn reset_cursors(&mut self) {
        self.state.server_cursor = 0;
        self.state.channel_cursor = 0;
        self.state.message_cursor = 0;
        self.state.focus = FocusPane::Servers;
    }

    fn visible_server_ids(&self) -> Vec<String> {
        self.store.servers().map(|server| server.id.clone()).collect()
    }

    fn visible_channel_ids(&self) -> Vec<String> {
        match self.store.selection().server.as_deref() {
            Some(server_id) => self
                .store
                .channels_for_server(server_id)
                .map(|channel| channel.id.clone())
                .collect(),
            None => Vec::new(),
        }
    }

    fn visible_message_ids(&self) -> Vec<String> {
        views::current_channel_messages(&self.store)
            .into_iter()
            .map(|message| message.id.clone())
            .collect()
    }

    fn server_under_cursor(&self) -> Option<String> {
        self.visible_server_ids().get(self.state.server_cursor).cloned()
    }

    fn channel_under_cursor(&self) -> Option<String> {
        self.visible_channel_ids().get(self.state.channel_cursor).cloned()
    }

    fn message_under_cursor(&self) -> Option<String> {
        self.visible_message_ids().get(self.state.message_cursor).cloned()
    }

    fn dispatcher(&mut self) -> ActionDispatcher<'_> {
        ActionDispatcher::new(&mut self.store, &self.config)
    }

    fn report(&mut self, result: Result<String>) {
        match result {
            Ok(message) => self.state.set_status_message(Some(message)),
            Err(err) => {
                tracing::warn!(?err, "action failed");
                self.state.set_warning(format!("{err:#}"));
            }
        }
    }

    fn drain_events(&mut self) {
        while let Ok(event) = self.events.try_recv() {
            match event {
                StoreEvent::PersistFailed(reason) => {
                    self.state.set_warning(format!(
                        "Changes kept in memory but not saved ({reason}); see {}",
                        self.paths.log_dir.display()
                    ));
                }
                StoreEvent::Replaced => self.reset_cursors(),
                _ => {}
            }
        }
    }
}

fn position(ids: &[String], id: &str) -> usize {
    ids.iter().position(|candidate| candidate == id).unwrap_or(0)
}

fn setup_terminal() -> Result<Terminal<CrosstermBackend<Stdout>>> {
    enable_raw_mode().context("enabling raw mode")?;
    let mut stdout = std::io::stdout();
    execute!(stdout, EnterAlternateScreen, EnableMouseCapture)
        .context("switching to alternate screen")?;
    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend).context("creating terminal backend")?;
    terminal.hide_cursor().context("hiding cursor")?;
    Ok(terminal)
}

fn restore_terminal(terminal: &mut Terminal<CrosstermBackend<Stdout>>) -> Result<()> {
    terminal.show_cursor().ok();
    disable_raw_mode().context("disabling raw mode")?;
    execute!(
        terminal.backend_mut(),
        LeaveAlternateScreen,
        DisableMouseCapture
    )
    .context("restoring screen state")?;
    Ok(())
}
