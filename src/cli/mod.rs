pub mod commands;

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "tankobon")]
#[command(about = "A manga catalog client with library sync", long_about = None)]
pub struct Cli {
    /// Source (driver) to use; defaults to the first source of the default server
    #[arg(short, long, global = true)]
    pub source: Option<String>,

    /// Config file path (default: ~/.config/tankobon/config.toml)
    #[arg(long, global = true)]
    pub config: Option<std::path::PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// List known sources and their status
    Sources,
    /// Browse a source's listing
    Browse {
        /// Category filter
        #[arg(short, long)]
        category: Option<String>,

        /// Status filter understood by the driver (0 = any)
        #[arg(long, default_value = "0")]
        status: String,

        /// Page number, starting at 1
        #[arg(short, long, default_value_t = 1)]
        page: u32,
    },
    /// Search a source
    Search {
        keyword: String,

        /// Page number, starting at 1
        #[arg(short, long, default_value_t = 1)]
        page: u32,
    },
    /// Keyword completions from a source
    Suggest { keyword: String },
    /// Show an item's details and chapters
    Show { id: String },
    /// Print the page URLs of a chapter
    Chapter {
        id: String,

        /// Chapter comes from the extra list
        #[arg(long)]
        extra: bool,
    },
    /// Save an item to the library
    Save { id: String },
    /// Remove an item from the library
    Unsave { id: String },
    /// Record reading progress for an item
    Read {
        id: String,

        /// Chapter id that was opened
        chapter: String,

        /// Page within the chapter
        #[arg(short, long)]
        page: Option<i64>,
    },
    /// List saved items
    Library,
    /// List reading history, most recent first
    History {
        /// Maximum number of records to show
        #[arg(short = 'n', long, default_value_t = 20)]
        limit: usize,
    },
    /// Refresh saved items and flag new chapters
    Refresh,
    /// Sync settings, history and library with the sync server
    Sync,
    /// Log in to the sync server
    Login {
        email: String,

        #[arg(long)]
        password: String,
    },
    /// Create an account on the sync server
    Register {
        email: String,

        #[arg(long)]
        password: String,
    },
    /// Show or replace the synced settings blob
    Settings {
        /// New settings content
        #[arg(long)]
        set: Option<String>,
    },
    /// Forget the sync session
    Logout,
    /// Show the logged-in account
    Whoami,
    /// Delete everything stored on the sync server for this account
    ClearRemote {
        /// Confirm the deletion
        #[arg(long)]
        yes: bool,
    },
    /// Background daemon for health checks, refresh and sync
    Daemon {
        #[command(subcommand)]
        action: DaemonAction,
    },
}

#[derive(Subcommand)]
pub enum DaemonAction {
    /// Start the background daemon
    Start {
        /// Refresh interval for saved items (e.g., "1h", "30m", "6h", "1d");
        /// defaults to `engine.freshness_interval_secs` from the config
        #[arg(short, long)]
        interval: Option<String>,

        /// Skip initial refresh on start
        #[arg(long)]
        no_initial_refresh: bool,

        /// Log file path (default: stdout)
        #[arg(short, long)]
        log: Option<std::path::PathBuf>,

        /// Run in foreground (don't detach)
        #[arg(short, long)]
        foreground: bool,
    },
    /// Stop the running daemon
    Stop,
    /// Check daemon status
    Status,
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_global_source_flag() {
        let cli = Cli::parse_from(["tankobon", "search", "one piece", "--source", "mangadex"]);
        assert_eq!(cli.source.as_deref(), Some("mangadex"));
        match cli.command {
            Commands::Search { keyword, page } => {
                assert_eq!(keyword, "one piece");
                assert_eq!(page, 1);
            }
            _ => panic!("expected search"),
        }
    }

    #[test]
    fn test_daemon_interval_is_optional() {
        let cli = Cli::parse_from(["tankobon", "daemon", "start", "-f"]);
        match cli.command {
            Commands::Daemon {
                action: DaemonAction::Start {
                    interval,
                    foreground,
                    ..
                },
            } => {
                assert_eq!(interval, None);
                assert!(foreground);
            }
            _ => panic!("expected daemon start"),
        }
    }

    #[test]
    fn test_read_with_page() {
        let cli = Cli::parse_from(["tankobon", "read", "m1", "c7", "-p", "12"]);
        match cli.command {
            Commands::Read { id, chapter, page } => {
                assert_eq!(id, "m1");
                assert_eq!(chapter, "c7");
                assert_eq!(page, Some(12));
            }
            _ => panic!("expected read"),
        }
    }
}
