pub mod commands;

use crate::error::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "subwatch")]
#[command(about = "Keyword alerts for subreddit listings, delivered as Discord DMs")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(author = env!("CARGO_PKG_AUTHORS"))]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Configuration file path
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Enable debug output
    #[arg(short, long, global = true)]
    pub debug: bool,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Initialize subwatch configuration
    Init {
        /// Overwrite an existing configuration file
        #[arg(long)]
        force: bool,
    },

    /// Run the monitor loop until interrupted
    Run {
        /// Poll interval override in seconds
        #[arg(short, long)]
        interval: Option<u64>,
    },

    /// Add or update a keyword filter
    AddFilter {
        /// Discord user id to notify
        user_id: String,

        /// Display name used in logs and messages
        display_name: String,

        /// Subreddit to watch (with or without the r/ prefix)
        subreddit: String,

        /// Filter name
        name: String,

        /// Keywords that must all appear in a post title
        #[arg(required = true, num_args = 1..)]
        keywords: Vec<String>,
    },

    /// Remove a keyword filter
    RemoveFilter {
        /// Discord user id owning the filter
        user_id: String,

        /// Subreddit the filter watches
        subreddit: String,

        /// Filter name
        name: String,
    },

    /// Show all filters for a user
    Profile {
        /// Discord user id
        user_id: String,
    },

    /// List watched subreddits
    Sources,

    /// Show subwatch status
    Status,

    /// Generate shell completions
    Completions {
        /// Shell type
        #[arg(value_enum)]
        shell: clap_complete::Shell,
    },
}

impl Cli {
    pub async fn run(self) -> Result<()> {
        // The run command derives its logging setup from the config file.
        if !matches!(self.command, Commands::Run { .. }) {
            commands::init_logging(self.debug, self.verbose)?;
        }

        match self.command {
            Commands::Init { force } => commands::init(force).await,
            Commands::Run { interval } => {
                commands::run(interval, self.config, self.debug, self.verbose).await
            }
            Commands::AddFilter {
                user_id,
                display_name,
                subreddit,
                name,
                keywords,
            } => {
                commands::add_filter(user_id, display_name, subreddit, name, keywords, self.config)
                    .await
            }
            Commands::RemoveFilter {
                user_id,
                subreddit,
                name,
            } => commands::remove_filter(user_id, subreddit, name, self.config).await,
            Commands::Profile { user_id } => commands::profile(user_id, self.config).await,
            Commands::Sources => commands::sources(self.config).await,
            Commands::Status => commands::status(self.config).await,
            Commands::Completions { shell } => {
                commands::generate_completions(shell);
                Ok(())
            }
        }
    }
}
