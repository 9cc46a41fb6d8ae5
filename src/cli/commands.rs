use std::fmt::Write as _;
use std::io::{self, Read};
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use clap::{Args, Subcommand};
use crossterm::style::Stylize;
use time::format_description::FormatItem;

use crate::app::App;
use crate::config::AppConfig;
use crate::highlight::{segment, Segment};
use crate::model::{format_timestamp, normalize_channel_name, Message, Timestamp};
use crate::store::views::{self, MessageContext};
use crate::store::EntityStore;

const SHORT_ID_LEN: usize = 8;

#[derive(Subcommand, Debug, Clone)]
pub enum ServerCommand {
    /// Create a server
    Add {
        name: String,
        /// Icon shown in listings (defaults to the name's first letter)
        #[arg(long)]
        icon: Option<String>,
    },
    /// List servers with their channel counts
    List,
    /// Rename a server, optionally replacing its icon
    Rename {
        id: String,
        name: String,
        #[arg(long)]
        icon: Option<String>,
    },
    /// Delete a server with all of its channels and messages
    Delete { id: String },
}

#[derive(Subcommand, Debug, Clone)]
pub enum ChannelCommand {
    /// Create a channel inside a server
    Add { server: String, name: String },
    /// List the channels of a server
    List { server: String },
    /// Rename a channel
    Rename { id: String, name: String },
    /// Delete a channel with all of its messages
    Delete { id: String },
}

#[derive(Subcommand, Debug, Clone)]
pub enum MessageCommand {
    /// Post a message. Reads stdin when no content is given.
    Add {
        channel: String,
        content: Option<String>,
    },
    /// Replace a message's content
    Edit { id: String, content: String },
    /// Delete a message
    Delete { id: String },
    /// Toggle the pin flag
    Pin { id: String },
    /// Toggle the bookmark flag
    Bookmark { id: String },
    /// Print a channel's messages, oldest first
    List {
        channel: String,
        /// Only show messages carrying this tag
        #[arg(long)]
        tag: Option<String>,
    },
}

#[derive(Args, Debug, Clone)]
pub struct SearchArgs {
    /// Text to look for (case-insensitive)
    #[arg(required = true)]
    pub query: Vec<String>,
    /// Limit the number of results printed (defaults to search.max_results)
    #[arg(long)]
    pub limit: Option<usize>,
}

#[derive(Args, Debug, Clone)]
pub struct ExportArgs {
    /// Target file or directory (defaults to the backup directory)
    #[arg(long)]
    pub out: Option<PathBuf>,
}

#[derive(Args, Debug, Clone)]
pub struct ResetArgs {
    /// Skip the confirmation prompt
    #[arg(long)]
    pub yes: bool,
}

pub fn run_tui(app: &mut App) -> Result<()> {
    app.run()
}

pub fn server_command(store: &mut EntityStore, command: ServerCommand) -> Result<String> {
    let mut out = String::new();
    match command {
        ServerCommand::Add { name, icon } => {
            let name = require_name(&name, "server")?;
            let server = store.add_server(&name, icon.as_deref());
            writeln!(
                out,
                "Created server {} {} [{}]",
                server.icon_or_default(),
                server.name,
                short_id(&server.id)
            )?;
        }
        ServerCommand::List => {
            let servers: Vec<_> = store.servers().collect();
            if servers.is_empty() {
                out.push_str("No servers.\n");
            }
            for server in servers {
                let channels = store.channels_for_server(&server.id).count();
                writeln!(
                    out,
                    "{}  {}  [{}]  {} channel{}",
                    server.icon_or_default(),
                    server.name,
                    short_id(&server.id),
                    channels,
                    plural(channels)
                )?;
            }
        }
        ServerCommand::Rename { id, name, icon } => {
            let id = resolve_id(store.servers().map(|s| s.id.as_str()), &id, "server")?;
            let name = require_name(&name, "server")?;
            store.update_server(&id, &name, icon.as_deref());
            writeln!(out, "Renamed server [{}] to {}", short_id(&id), name)?;
        }
        ServerCommand::Delete { id } => {
            let id = resolve_id(store.servers().map(|s| s.id.as_str()), &id, "server")?;
            if let Some(report) = store.delete_server(&id) {
                writeln!(
                    out,
                    "Deleted server [{}] ({} channel{}, {} message{})",
                    short_id(&id),
                    report.channels.len(),
                    plural(report.channels.len()),
                    report.messages.len(),
                    plural(report.messages.len())
                )?;
            }
        }
    }
    Ok(out)
}

pub fn channel_command(
    store: &mut EntityStore,
    config: &AppConfig,
    command: ChannelCommand,
) -> Result<String> {
    let mut out = String::new();
    match command {
        ChannelCommand::Add { server, name } => {
            let server_id = resolve_id(store.servers().map(|s| s.id.as_str()), &server, "server")?;
            let name = channel_name(config, &name)?;
            let channel = store.add_channel(&server_id, &name);
            writeln!(out, "Created channel #{} [{}]", channel.name, short_id(&channel.id))?;
        }
        ChannelCommand::List { server } => {
            let server_id = resolve_id(store.servers().map(|s| s.id.as_str()), &server, "server")?;
            let channels: Vec<_> = store.channels_for_server(&server_id).collect();
            if channels.is_empty() {
                out.push_str("No channels.\n");
            }
            for channel in channels {
                let messages = views::channel_messages(store, &channel.id, None).len();
                writeln!(
                    out,
                    "#{}  [{}]  {} message{}",
                    channel.name,
                    short_id(&channel.id),
                    messages,
                    plural(messages)
                )?;
            }
        }
        ChannelCommand::Rename { id, name } => {
            let id = resolve_id(store.channels().map(|c| c.id.as_str()), &id, "channel")?;
            let name = channel_name(config, &name)?;
            store.update_channel(&id, &name);
            writeln!(out, "Renamed channel [{}] to #{}", short_id(&id), name)?;
        }
        ChannelCommand::Delete { id } => {
            let id = resolve_id(store.channels().map(|c| c.id.as_str()), &id, "channel")?;
            if let Some(report) = store.delete_channel(&id) {
                writeln!(
                    out,
                    "Deleted channel [{}] ({} message{})",
                    short_id(&id),
                    report.messages.len(),
                    plural(report.messages.len())
                )?;
            }
        }
    }
    Ok(out)
}

pub fn message_command(
    store: &mut EntityStore,
    printer: &Printer<'_>,
    command: MessageCommand,
) -> Result<String> {
    let mut out = String::new();
    match command {
        MessageCommand::Add { channel, content } => {
            let channel_id =
                resolve_id(store.channels().map(|c| c.id.as_str()), &channel, "channel")?;
            let content = match content {
                Some(content) => content,
                None => read_stdin()?.unwrap_or_default(),
            };
            let content = require_content(&content)?;
            let message = store.add_message(&channel_id, &content);
            writeln!(
                out,
                "Posted [{}]{}",
                short_id(&message.id),
                format_tag_suffix(message.tags())
            )?;
        }
        MessageCommand::Edit { id, content } => {
            let id = resolve_message(store, &id)?;
            let content = require_content(&content)?;
            store.update_message(&id, &content);
            let tags = store.message(&id).map(|m| m.tags().to_vec()).unwrap_or_default();
            writeln!(out, "Edited [{}]{}", short_id(&id), format_tag_suffix(&tags))?;
        }
        MessageCommand::Delete { id } => {
            let id = resolve_message(store, &id)?;
            store.delete_message(&id);
            writeln!(out, "Deleted message [{}]", short_id(&id))?;
        }
        MessageCommand::Pin { id } => {
            let id = resolve_message(store, &id)?;
            let pinned = store.toggle_pin(&id).unwrap_or(false);
            writeln!(out, "{} [{}]", if pinned { "Pinned" } else { "Unpinned" }, short_id(&id))?;
        }
        MessageCommand::Bookmark { id } => {
            let id = resolve_message(store, &id)?;
            let bookmarked = store.toggle_bookmark(&id).unwrap_or(false);
            writeln!(
                out,
                "{} [{}]",
                if bookmarked { "Bookmarked" } else { "Removed bookmark from" },
                short_id(&id)
            )?;
        }
        MessageCommand::List { channel, tag } => {
            let channel_id =
                resolve_id(store.channels().map(|c| c.id.as_str()), &channel, "channel")?;
            let tag = tag.map(|tag| crate::tags::normalize_token(&tag));
            let messages = views::channel_messages(store, &channel_id, tag.as_deref());
            printer.messages(&mut out, &messages)?;
        }
    }
    Ok(out)
}

pub fn pinned(store: &EntityStore, printer: &Printer<'_>, channel: &str) -> Result<String> {
    let channel_id = resolve_id(store.channels().map(|c| c.id.as_str()), channel, "channel")?;
    let mut out = String::new();
    printer.messages(&mut out, &views::pinned_messages(store, &channel_id))?;
    Ok(out)
}

pub fn bookmarks(store: &EntityStore, printer: &Printer<'_>) -> Result<String> {
    let mut out = String::new();
    printer.contexts(&mut out, &views::bookmarked_messages(store), None)?;
    Ok(out)
}

pub fn tags(store: &EntityStore) -> Result<String> {
    let stats = views::tag_stats(store);
    if stats.is_empty() {
        return Ok("No tags yet.\n".to_string());
    }
    let mut out = String::new();
    for stat in stats {
        writeln!(out, "#{}  {}", stat.tag, stat.count)?;
    }
    Ok(out)
}

pub fn search(
    store: &EntityStore,
    config: &AppConfig,
    printer: &Printer<'_>,
    args: &SearchArgs,
) -> Result<String> {
    let query = args.query.join(" ");
    if query.trim().is_empty() {
        bail!("search query cannot be empty");
    }
    let limit = args.limit.unwrap_or(config.search.max_results);
    let found = views::search(store, &query);
    let mut out = String::new();
    printer.contexts(&mut out, &found, Some(limit))?;
    Ok(out)
}

pub fn export(store: &EntityStore, args: &ExportArgs) -> Result<String> {
    let path = store
        .storage()
        .export_to(args.out.as_deref())
        .context("exporting backup")?;
    Ok(format!("Exported backup to {}\n", path.display()))
}

pub fn import(store: &mut EntityStore, file: &Path) -> Result<String> {
    let snapshot = store
        .storage()
        .import_file(file)
        .with_context(|| format!("importing {}", file.display()))?;
    store.replace_snapshot(snapshot);
    let snapshot = store.snapshot();
    Ok(format!(
        "Imported {} server{}, {} channel{}, {} message{}\n",
        snapshot.servers.len(),
        plural(snapshot.servers.len()),
        snapshot.channels.len(),
        plural(snapshot.channels.len()),
        snapshot.messages.len(),
        plural(snapshot.messages.len())
    ))
}

pub fn reset(store: &mut EntityStore, args: &ResetArgs) -> Result<String> {
    if !args.yes {
        let answer =
            prompt("This deletes every server, channel and message. Type 'yes' to continue")?;
        if answer.trim() != "yes" {
            return Ok("Reset cancelled.\n".to_string());
        }
    }
    store.reset().context("resetting storage")?;
    Ok("All data cleared; starting fresh.\n".to_string())
}

/// Formats message rows. Colour is only applied when writing to a terminal.
pub struct Printer<'a> {
    format: Option<Vec<FormatItem<'a>>>,
    color: bool,
}

impl<'a> Printer<'a> {
    pub fn new(config: &'a AppConfig, color: bool) -> Self {
        Self {
            format: config.display.timestamp_items(),
            color,
        }
    }

    pub fn messages(&self, out: &mut String, messages: &[&Message]) -> Result<()> {
        if messages.is_empty() {
            out.push_str("No messages.\n");
        }
        for message in messages {
            self.line(out, message)?;
        }
        Ok(())
    }

    pub fn contexts(
        &self,
        out: &mut String,
        found: &[MessageContext<'_>],
        limit: Option<usize>,
    ) -> Result<()> {
        if found.is_empty() {
            out.push_str("No matches found.\n");
            return Ok(());
        }
        let limit = limit.unwrap_or(found.len());
        for ctx in found.iter().take(limit) {
            writeln!(
                out,
                "{} {} / #{}",
                ctx.server.icon_or_default(),
                ctx.server.name,
                ctx.channel.name
            )?;
            out.push_str("    ");
            self.line(out, ctx.message)?;
        }
        if found.len() > limit {
            writeln!(out, "... {} more", found.len() - limit)?;
        }
        Ok(())
    }

    fn line(&self, out: &mut String, message: &Message) -> Result<()> {
        write!(
            out,
            "[{}] {}  {}",
            short_id(&message.id),
            self.timestamp(message.created_at),
            self.content(&message.content)
        )?;
        if message.is_pinned() {
            out.push_str("  [pinned]");
        }
        if message.is_bookmarked() {
            out.push_str("  [bookmarked]");
        }
        if message.is_edited() {
            out.push_str("  (edited)");
        }
        out.push('\n');
        Ok(())
    }

    fn content(&self, content: &str) -> String {
        let single_line = content.replace('\n', " ");
        if !self.color {
            return single_line;
        }
        segment(&single_line)
            .into_iter()
            .map(|part| match part {
                Segment::Text(text) => text.to_string(),
                Segment::Tag { raw, .. } => raw.cyan().bold().to_string(),
            })
            .collect()
    }

    fn timestamp(&self, millis: Timestamp) -> String {
        format_timestamp(millis, self.format.as_deref())
    }
}

pub fn stdout_is_terminal() -> bool {
    atty::is(atty::Stream::Stdout)
}

/// Resolves a full id or a unique prefix of one.
pub fn resolve_id<'a>(
    ids: impl Iterator<Item = &'a str>,
    needle: &str,
    kind: &str,
) -> Result<String> {
    let needle = needle.trim();
    if needle.is_empty() {
        bail!("{kind} id cannot be empty");
    }
    let mut matches = Vec::new();
    for id in ids {
        if id == needle {
            return Ok(id.to_string());
        }
        if id.starts_with(needle) {
            matches.push(id);
        }
    }
    match matches.as_slice() {
        [] => bail!("no {kind} matches '{needle}'"),
        [only] => Ok(only.to_string()),
        _ => bail!("'{needle}' matches {} {kind}s; use a longer prefix", matches.len()),
    }
}

fn resolve_message(store: &EntityStore, needle: &str) -> Result<String> {
    resolve_id(store.messages().map(|m| m.id.as_str()), needle, "message")
}

fn require_name(raw: &str, kind: &str) -> Result<String> {
    let name = raw.trim();
    if name.is_empty() {
        bail!("{kind} name cannot be empty");
    }
    Ok(name.to_string())
}

fn channel_name(config: &AppConfig, raw: &str) -> Result<String> {
    let name = require_name(raw, "channel")?;
    if config.display.normalize_channel_names {
        Ok(normalize_channel_name(&name))
    } else {
        Ok(name)
    }
}

fn require_content(raw: &str) -> Result<String> {
    let content = raw.trim();
    if content.is_empty() {
        bail!("message content cannot be empty");
    }
    Ok(content.to_string())
}

fn format_tag_suffix(tags: &[String]) -> String {
    if tags.is_empty() {
        return String::new();
    }
    let joined = tags
        .iter()
        .map(|tag| format!("#{tag}"))
        .collect::<Vec<_>>()
        .join(" ");
    format!("  tags: {joined}")
}

fn short_id(id: &str) -> &str {
    id.get(..SHORT_ID_LEN).unwrap_or(id)
}

fn plural(count: usize) -> &'static str {
    if count == 1 {
        ""
    } else {
        "s"
    }
}

fn prompt(label: &str) -> Result<String> {
    use std::io::Write;
    let mut stdout = io::stdout();
    write!(stdout, "{}: ", label)?;
    stdout.flush()?;
    let mut input = String::new();
    io::stdin().read_line(&mut input)?;
    Ok(input.trim_end().to_owned())
}

fn read_stdin() -> Result<Option<String>> {
    if atty::is(atty::Stream::Stdin) {
        return Ok(None);
    }
    let mut buf = String::new();
    io::stdin().read_to_string(&mut buf)?;
    Ok(Some(buf))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ConfigPaths, StorageOptions};
    use crate::model::SystemClock;
    use crate::storage;
    use std::sync::Arc;
    use tempfile::TempDir;

    type TestResult<T = ()> = Result<T>;

    fn setup_store() -> TestResult<(TempDir, EntityStore, AppConfig)> {
        let temp = TempDir::new().context("creating temp dir")?;
        let paths = ConfigPaths::under(temp.path());
        paths.ensure_directories()?;
        let handle = storage::init(&paths, &StorageOptions::default())?;
        let store = EntityStore::open(handle, Arc::new(SystemClock));
        Ok((temp, store, AppConfig::default()))
    }

    fn add_server(store: &mut EntityStore, name: &str) -> TestResult<String> {
        server_command(
            store,
            ServerCommand::Add {
                name: name.into(),
                icon: None,
            },
        )?;
        let server = store
            .servers()
            .find(|server| server.name == name)
            .context("server created")?;
        Ok(server.id.clone())
    }

    #[test]
    fn resolve_id_accepts_unique_prefixes() -> TestResult {
        let ids = ["abc123", "abd456", "xyz"];
        assert_eq!(resolve_id(ids.into_iter(), "abc", "server")?, "abc123");
        assert_eq!(resolve_id(ids.into_iter(), "xyz", "server")?, "xyz");
        assert!(resolve_id(ids.into_iter(), "ab", "server").is_err());
        assert!(resolve_id(ids.into_iter(), "q", "server").is_err());
        assert!(resolve_id(ids.into_iter(), "  ", "server").is_err());
        Ok(())
    }

    #[test]
    fn cli_channel_names_are_normalized_and_blank_rejected() -> TestResult {
        let (_temp, mut store, config) = setup_store()?;
        let server_id = add_server(&mut store, "Work")?;

        let output = channel_command(
            &mut store,
            &config,
            ChannelCommand::Add {
                server: server_id[..6].to_string(),
                name: "Weekly Sync".into(),
            },
        )?;
        assert!(output.contains("#weekly-sync"));

        let blank = channel_command(
            &mut store,
            &config,
            ChannelCommand::Add {
                server: server_id.clone(),
                name: "   ".into(),
            },
        );
        assert!(blank.is_err());
        assert!(server_command(
            &mut store,
            ServerCommand::Add {
                name: "".into(),
                icon: None
            }
        )
        .is_err());
        Ok(())
    }

    #[test]
    fn cli_message_flow_lists_filters_and_marks() -> TestResult {
        let (_temp, mut store, config) = setup_store()?;
        let server_id = add_server(&mut store, "Lab")?;
        let channel = store.add_channel(&server_id, "notes");

        let printer = Printer::new(&config, false);
        let posted = message_command(
            &mut store,
            &printer,
            MessageCommand::Add {
                channel: channel.id.clone(),
                content: Some("try #Rust today".into()),
            },
        )?;
        assert!(posted.contains("tags: #rust"));
        store.add_message(&channel.id, "untagged");

        let message_id = store
            .messages()
            .find(|m| m.content.contains("#Rust"))
            .map(|m| m.id.clone())
            .context("message stored")?;
        message_command(&mut store, &printer, MessageCommand::Pin { id: message_id })?;

        let listed = message_command(
            &mut store,
            &printer,
            MessageCommand::List {
                channel: channel.id.clone(),
                tag: Some("#RUST".into()),
            },
        )?;
        assert!(listed.contains("try #Rust today"));
        assert!(listed.contains("[pinned]"));
        assert!(!listed.contains("untagged"));

        let pinned_out = pinned(&store, &printer, &channel.id)?;
        assert!(pinned_out.contains("try #Rust today"));
        Ok(())
    }

    #[test]
    fn cli_search_respects_limit_and_context() -> TestResult {
        let (_temp, mut store, config) = setup_store()?;
        let server_id = add_server(&mut store, "Lab")?;
        let channel = store.add_channel(&server_id, "notes");
        for n in 0..3 {
            store.add_message(&channel.id, &format!("Hello number {n}"));
        }

        let printer = Printer::new(&config, false);
        let output = search(
            &store,
            &config,
            &printer,
            &SearchArgs {
                query: vec!["hello".into()],
                limit: Some(2),
            },
        )?;
        assert!(output.contains("Lab / #notes"));
        assert!(output.contains("... 1 more"));

        let none = search(
            &store,
            &config,
            &printer,
            &SearchArgs {
                query: vec!["absent".into()],
                limit: None,
            },
        )?;
        assert_eq!(none, "No matches found.\n");
        Ok(())
    }

    #[test]
    fn cli_server_delete_reports_cascade() -> TestResult {
        let (_temp, mut store, _config) = setup_store()?;
        let server_id = add_server(&mut store, "Doomed")?;
        let channel = store.add_channel(&server_id, "a");
        store.add_message(&channel.id, "one");
        store.add_message(&channel.id, "two");

        let output = server_command(&mut store, ServerCommand::Delete { id: server_id })?;
        assert!(output.contains("1 channel, 2 messages"));
        Ok(())
    }

    #[test]
    fn cli_tags_lists_counts() -> TestResult {
        let (_temp, mut store, _config) = setup_store()?;
        let server_id = add_server(&mut store, "Test")?;
        let channel = store.add_channel(&server_id, "general");
        store.add_message(&channel.id, "#foo bar");

        let output = tags(&store)?;
        assert!(output.contains("#foo  1"));
        Ok(())
    }

    #[test]
    fn cli_export_import_round_trip() -> TestResult {
        let (temp, mut store, _config) = setup_store()?;
        add_server(&mut store, "Backed up")?;
        let before = store.snapshot();

        let out_dir = temp.path().join("exports");
        let output = export(&store, &ExportArgs { out: Some(out_dir.clone()) })?;
        assert!(output.contains("notecord-backup-"));
        let file = std::fs::read_dir(&out_dir)?
            .next()
            .context("export written")??
            .path();

        reset(&mut store, &ResetArgs { yes: true })?;
        assert_ne!(store.snapshot(), before);

        let summary = import(&mut store, &file)?;
        assert!(summary.contains("Imported 2 servers"));
        assert_eq!(store.snapshot(), before);
        Ok(())
    }

    #[test]
    fn printer_colours_only_tag_spans() {
        let config = AppConfig::default();
        let plain = Printer::new(&config, false).content("see #a\nnext");
        assert_eq!(plain, "see #a next");
        let coloured = Printer::new(&config, true).content("see #a");
        assert!(coloured.starts_with("see "));
        assert!(coloured.contains("#a"));
        assert_ne!(coloured, "see #a");
    }
}
