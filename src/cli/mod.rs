use std::env;
use std::fs::{self, OpenOptions};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use once_cell::sync::OnceCell;
use tracing_subscriber::{fmt, EnvFilter};

use crate::app::App;
use crate::config::ConfigLoader;
use crate::model::SystemClock;
use crate::storage;
use crate::store::EntityStore;

pub mod commands;

use self::commands::{
    ChannelCommand, ExportArgs, MessageCommand, Printer, ResetArgs, SearchArgs, ServerCommand,
};

const LOG_FILE: &str = "notecord.log";

#[derive(Parser, Debug)]
#[command(
    name = "notecord",
    version,
    about = "Offline organizer for servers, channels and #tagged messages"
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,

    /// Override the config file location (takes precedence over NOTECORD_CONFIG)
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Override the data directory (takes precedence over NOTECORD_DATA)
    #[arg(long)]
    pub data_dir: Option<PathBuf>,

    /// Minimum log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    pub log_level: String,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Launch the interactive TUI (default)
    Tui,
    /// Manage servers
    #[command(subcommand)]
    Server(ServerCommand),
    /// Manage channels
    #[command(subcommand)]
    Channel(ChannelCommand),
    /// Post, edit, pin and bookmark messages
    #[command(subcommand)]
    Message(MessageCommand),
    /// Show a channel's pinned messages
    Pinned { channel: String },
    /// Show bookmarked messages across all servers, newest first
    Bookmarks,
    /// Show tag usage counts
    Tags,
    /// Search message content
    Search(SearchArgs),
    /// Write a JSON backup
    Export(ExportArgs),
    /// Replace all data with a JSON backup
    Import { file: PathBuf },
    /// Delete everything and start over with the welcome data
    Reset(ResetArgs),
}

enum LogTarget<'a> {
    Stderr,
    File(&'a Path),
}

pub fn run() -> Result<()> {
    let cli = Cli::parse();

    if let Some(path) = &cli.config {
        env::set_var("NOTECORD_CONFIG", path);
    }
    if let Some(path) = &cli.data_dir {
        env::set_var("NOTECORD_DATA", path);
    }

    let loader = ConfigLoader::discover()?;
    loader.paths().ensure_directories()?;
    let paths = loader.paths().clone();
    let command = cli.command.unwrap_or(Commands::Tui);
    let target = match command {
        Commands::Tui => LogTarget::File(&paths.log_dir),
        _ => LogTarget::Stderr,
    };
    init_tracing(&cli.log_level, target)
        .with_context(|| format!("initialising logging at level {}", cli.log_level))?;
    let config = loader.load_or_init()?;
    let storage = storage::init(&paths, &config.storage)?;
    let mut store = EntityStore::open(storage, Arc::new(SystemClock));

    let printer = Printer::new(&config, commands::stdout_is_terminal());
    let output = match command {
        Commands::Tui => {
            let mut app = App::new(Arc::new(config.clone()), store, paths.clone())?;
            commands::run_tui(&mut app)?;
            return Ok(());
        }
        Commands::Server(command) => commands::server_command(&mut store, command)?,
        Commands::Channel(command) => commands::channel_command(&mut store, &config, command)?,
        Commands::Message(command) => commands::message_command(&mut store, &printer, command)?,
        Commands::Pinned { channel } => commands::pinned(&store, &printer, &channel)?,
        Commands::Bookmarks => commands::bookmarks(&store, &printer)?,
        Commands::Tags => commands::tags(&store)?,
        Commands::Search(args) => commands::search(&store, &config, &printer, &args)?,
        Commands::Export(args) => commands::export(&store, &args)?,
        Commands::Import { file } => commands::import(&mut store, &file)?,
        Commands::Reset(args) => commands::reset(&mut store, &args)?,
    };
    print!("{output}");
    Ok(())
}

fn init_tracing(level: &str, target: LogTarget<'_>) -> Result<()> {
    static INIT: OnceCell<()> = OnceCell::new();
    INIT.get_or_try_init(|| {
        let env_filter = EnvFilter::try_new(level).unwrap_or_else(|_| EnvFilter::new("info"));
        match target {
            LogTarget::Stderr => fmt()
                .with_env_filter(env_filter)
                .with_writer(std::io::stderr)
                .init(),
            LogTarget::File(dir) => {
                fs::create_dir_all(dir)
                    .with_context(|| format!("creating log directory {}", dir.display()))?;
                let path = dir.join(LOG_FILE);
                let file = OpenOptions::new()
                    .create(true)
                    .append(true)
                    .open(&path)
                    .with_context(|| format!("opening log file {}", path.display()))?;
                fmt()
                    .with_env_filter(env_filter)
                    .with_ansi(false)
                    .with_writer(Mutex::new(file))
                    .init()
            }
        }
        Ok::<(), anyhow::Error>(())
    })
    .map(|_| ())
}
