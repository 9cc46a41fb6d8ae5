use strum::{Display, EnumIter, IntoEnumIterator};
use unicode_segmentation::UnicodeSegmentation;
use unicode_width::UnicodeWidthStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FocusPane {
    Servers,
    Channels,
    Messages,
}

impl FocusPane {
    pub fn next(self) -> Self {
        match self {
            FocusPane::Servers => FocusPane::Channels,
            FocusPane::Channels => FocusPane::Messages,
            FocusPane::Messages => FocusPane::Servers,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            FocusPane::Servers => "Servers",
            FocusPane::Channels => "Channels",
            FocusPane::Messages => "Messages",
        }
    }
}

/// Single-line text input that edits by grapheme cluster.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InputLine {
    buffer: String,
    cursor: usize,
}

impl InputLine {
    pub fn with_text(text: &str) -> Self {
        Self {
            buffer: text.to_string(),
            cursor: text.len(),
        }
    }

    pub fn as_str(&self) -> &str {
        &self.buffer
    }

    pub fn cursor(&self) -> usize {
        self.cursor
    }

    pub fn insert_char(&mut self, ch: char) {
        let mut scratch = [0u8; 4];
        let encoded = ch.encode_utf8(&mut scratch);
        self.buffer.insert_str(self.cursor, encoded);
        self.cursor += encoded.len();
    }

    pub fn backspace(&mut self) -> bool {
        if self.cursor == 0 {
            return false;
        }
        let prev = prev_grapheme_boundary(&self.buffer, self.cursor);
        self.buffer.drain(prev..self.cursor);
        self.cursor = prev;
        true
    }

    pub fn delete(&mut self) -> bool {
        if self.cursor >= self.buffer.len() {
            return false;
        }
        let next = next_grapheme_boundary(&self.buffer, self.cursor);
        self.buffer.drain(self.cursor..next);
        true
    }

    pub fn move_left(&mut self) {
        self.cursor = prev_grapheme_boundary(&self.buffer, self.cursor);
    }

    pub fn move_right(&mut self) {
        self.cursor = next_grapheme_boundary(&self.buffer, self.cursor);
    }

    pub fn move_home(&mut self) {
        self.cursor = 0;
    }

    pub fn move_end(&mut self) {
        self.cursor = self.buffer.len();
    }

    /// Terminal columns occupied by the text left of the cursor.
    pub fn cursor_column(&self) -> usize {
        UnicodeWidthStr::width(&self.buffer[..self.cursor])
    }

    pub fn take(&mut self) -> String {
        self.cursor = 0;
        std::mem::take(&mut self.buffer)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InputPurpose {
    NewServer,
    RenameServer { id: String },
    NewChannel { server_id: String },
    RenameChannel { id: String },
    ComposeMessage { channel_id: String },
    EditMessage { id: String },
    ImportPath,
}

impl InputPurpose {
    pub fn title(&self) -> &'static str {
        match self {
            InputPurpose::NewServer => "New server",
            InputPurpose::RenameServer { .. } => "Rename server",
            InputPurpose::NewChannel { .. } => "New channel",
            InputPurpose::RenameChannel { .. } => "Rename channel",
            InputPurpose::ComposeMessage { .. } => "Message",
            InputPurpose::EditMessage { .. } => "Edit message",
            InputPurpose::ImportPath => "Import backup from file",
        }
    }

    /// Message input lives in the composer row; everything else is a popup.
    pub fn is_composer(&self) -> bool {
        matches!(
            self,
            InputPurpose::ComposeMessage { .. } | InputPurpose::EditMessage { .. }
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfirmTarget {
    Server { id: String, name: String },
    Channel { id: String, name: String },
    Message { id: String, preview: String },
    Reset,
}

impl ConfirmTarget {
    pub fn prompt(&self) -> String {
        match self {
            ConfirmTarget::Server { name, .. } => {
                format!("Delete server '{name}' with all of its channels and messages?")
            }
            ConfirmTarget::Channel { name, .. } => {
                format!("Delete channel #{name} and all of its messages?")
            }
            ConfirmTarget::Message { preview, .. } => format!("Delete message \"{preview}\"?"),
            ConfirmTarget::Reset => "Erase every server, channel and message?".to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, EnumIter)]
pub enum SettingsEntry {
    #[strum(to_string = "Export backup")]
    Export,
    #[strum(to_string = "Import backup")]
    Import,
    #[strum(to_string = "Reset all data")]
    Reset,
}

impl SettingsEntry {
    pub fn all() -> Vec<SettingsEntry> {
        SettingsEntry::iter().collect()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OverlayState {
    Input {
        purpose: InputPurpose,
        line: InputLine,
    },
    ConfirmDelete(ConfirmTarget),
    Search {
        line: InputLine,
        selected: usize,
    },
    Bookmarks {
        selected: usize,
    },
    Pinned {
        selected: usize,
    },
    Tags {
        selected: usize,
    },
    Settings {
        selected: usize,
    },
}

impl OverlayState {
    pub fn input(purpose: InputPurpose, initial: &str) -> Self {
        OverlayState::Input {
            purpose,
            line: InputLine::with_text(initial),
        }
    }

    pub fn search() -> Self {
        OverlayState::Search {
            line: InputLine::default(),
            selected: 0,
        }
    }

    pub fn selected_mut(&mut self) -> Option<&mut usize> {
        match self {
            OverlayState::Search { selected, .. }
            | OverlayState::Bookmarks { selected }
            | OverlayState::Pinned { selected }
            | OverlayState::Tags { selected }
            | OverlayState::Settings { selected } => Some(selected),
            OverlayState::Input { .. } | OverlayState::ConfirmDelete(_) => None,
        }
    }

    pub fn line_mut(&mut self) -> Option<&mut InputLine> {
        match self {
            OverlayState::Input { line, .. } | OverlayState::Search { line, .. } => Some(line),
            _ => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct AppState {
    pub focus: FocusPane,
    pub server_cursor: usize,
    pub channel_cursor: usize,
    pub message_cursor: usize,
    overlay: Option<OverlayState>,
    status_message: Option<String>,
    status_is_warning: bool,
}

impl Default for AppState {
    fn default() -> Self {
        Self {
            focus: FocusPane::Servers,
            server_cursor: 0,
            channel_cursor: 0,
            message_cursor: 0,
            overlay: None,
            status_message: None,
            status_is_warning: false,
        }
    }
}

impl AppState {
    pub fn toggle_focus(&mut self) {
        self.focus = self.focus.next();
    }

    pub fn cursor_mut(&mut self) -> &mut usize {
        match self.focus {
            FocusPane::Servers => &mut self.server_cursor,
            FocusPane::Channels => &mut self.channel_cursor,
            FocusPane::Messages => &mut self.message_cursor,
        }
    }

    /// Moves the focused column's cursor, clamped to `len` entries.
    pub fn move_cursor(&mut self, delta: isize, len: usize) {
        let cursor = self.cursor_mut();
        *cursor = step(*cursor, delta, len);
    }

    /// Keeps every cursor inside its column after the data changed.
    pub fn clamp_cursors(&mut self, servers: usize, channels: usize, messages: usize) {
        self.server_cursor = clamp(self.server_cursor, servers);
        self.channel_cursor = clamp(self.channel_cursor, channels);
        self.message_cursor = clamp(self.message_cursor, messages);
    }

    pub fn overlay(&self) -> Option<&OverlayState> {
        self.overlay.as_ref()
    }

    pub fn overlay_mut(&mut self) -> Option<&mut OverlayState> {
        self.overlay.as_mut()
    }

    pub fn open_overlay(&mut self, overlay: OverlayState) {
        self.overlay = Some(overlay);
    }

    pub fn close_overlay(&mut self) -> Option<OverlayState> {
        self.overlay.take()
    }

    /// Opens `overlay`, or closes it if the same kind is already showing.
    pub fn toggle_overlay(&mut self, overlay: OverlayState) {
        let same_kind = self
            .overlay
            .as_ref()
            .is_some_and(|current| {
                std::mem::discriminant(current) == std::mem::discriminant(&overlay)
            });
        if same_kind {
            self.overlay = None;
        } else {
            self.overlay = Some(overlay);
        }
    }

    pub fn move_overlay_selection(&mut self, delta: isize, len: usize) {
        if let Some(selected) = self.overlay.as_mut().and_then(OverlayState::selected_mut) {
            *selected = step(*selected, delta, len);
        }
    }

    pub fn status_message(&self) -> Option<&str> {
        self.status_message.as_deref()
    }

    pub fn status_is_warning(&self) -> bool {
        self.status_is_warning
    }

    pub fn set_status_message<S: Into<String>>(&mut self, message: Option<S>) {
        self.status_message = message.map(Into::into);
        self.status_is_warning = false;
    }

    pub fn set_warning<S: Into<String>>(&mut self, message: S) {
        self.status_message = Some(message.into());
        self.status_is_warning = true;
    }
}

fn step(current: usize, delta: isize, len: usize) -> usize {
    if len == 0 {
        return 0;
    }
    let max = (len - 1) as isize;
    (current as isize + delta).clamp(0, max) as usize
}

fn clamp(current: usize, len: usize) -> usize {
    current.min(len.saturating_sub(1))
}

fn prev_grapheme_boundary(text: &str, cursor: usize) -> usize {
    if cursor == 0 {
        return 0;
    }
    let mut last = 0;
    for (idx, _) in text[..cursor].grapheme_indices(true) {
        last = idx;
    }
    last
}

fn next_grapheme_boundary(text: &str, cursor: usize) -> usize {
    if cursor >= text.len() {
        return text.len();
    }
    let mut iter = text[cursor..].graphemes(true);
    if let Some(grapheme) = iter.next() {
        cursor + grapheme.len()
    } else {
        text.len()
    }
}
