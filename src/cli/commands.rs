use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use clap::CommandFactory;
use clap_complete::{generate, Shell};
use tokio::sync::watch;
use tracing::{debug, error, info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use url::Url;

use crate::cli::Cli;
use crate::config::{Config, LoggingConfig};
use crate::error::{Error, Result};
use crate::monitor::Monitor;
use crate::notify::{DiscordMessenger, Dispatcher};
use crate::service::FilterService;
use crate::source::fetcher::RedditFetcher;
use crate::storage::{FilterStore, ListingCache, SqliteFilterStore};

/// Initialize subwatch configuration and directory structure
pub async fn init(force: bool) -> Result<()> {
    info!("Initializing subwatch configuration");

    let config_dir = Config::config_dir()?;
    if !config_dir.exists() {
        fs::create_dir_all(&config_dir)?;
        info!("Created configuration directory: {}", config_dir.display());
    }

    let data_dir = Config::data_dir()?;
    if !data_dir.exists() {
        fs::create_dir_all(&data_dir)?;
        info!("Created data directory: {}", data_dir.display());
    }

    let config_file = config_dir.join("config.toml");
    if config_file.exists() && !force {
        warn!("Configuration file already exists: {}", config_file.display());
        println!("⚠️  Configuration file already exists: {}", config_file.display());
        println!("   Use --force to overwrite it");
        return Ok(());
    }

    let database_path = data_dir.join("subwatch.db");
    let default_config = create_default_config(&database_path)?;
    fs::write(&config_file, default_config)?;
    info!("Created default configuration: {}", config_file.display());

    let logs_dir = config_dir.join("logs");
    if !logs_dir.exists() {
        fs::create_dir_all(&logs_dir)?;
        info!("Created logs directory: {}", logs_dir.display());
    }

    println!("✅ Subwatch initialized successfully!");
    println!("   Config file: {}", config_file.display());
    println!("   Database: {}", database_path.display());
    println!();
    println!("Next steps:");
    println!("   1. Put your Discord bot token in config.toml (or set DISCORD_TOKEN)");
    println!("   2. Add a filter: subwatch add-filter <user-id> <display-name> <subreddit> <name> <keywords>...");
    println!("   3. Start the monitor: subwatch run");

    Ok(())
}

/// Run the monitor loop until Ctrl-C
pub async fn run(
    interval: Option<u64>,
    config_path: Option<PathBuf>,
    debug_flag: bool,
    verbose: bool,
) -> Result<()> {
    let mut config = load_config(config_path)?;
    if let Some(secs) = interval {
        config.monitor.poll_interval = secs;
    }
    config.validate()?;

    if config.discord.token.is_empty() {
        return Err(Error::Config(
            "Discord token is not set. Add it to config.toml or set DISCORD_TOKEN.".to_string(),
        ));
    }

    let _guard = init_monitor_logging(&config.logging, debug_flag, verbose)?;

    info!("Starting subwatch v{}", env!("CARGO_PKG_VERSION"));
    debug!("Database: {}", config.database.path.display());
    debug!("Listing endpoint: {}", config.reddit.base_url);

    let store = Arc::new(open_store(&config).await?);

    let fetcher = RedditFetcher::new(&config.reddit.base_url)
        .with_timeout(Duration::from_secs(config.reddit.request_timeout))
        .with_user_agent(config.reddit.user_agent.clone())
        .with_rate_limit_backoff(Duration::from_secs(config.reddit.rate_limit_backoff));

    let link_base = Url::parse(&config.reddit.link_base_url)
        .map_err(|_| Error::InvalidUrl(config.reddit.link_base_url.clone()))?;
    let messenger = DiscordMessenger::new(&config.discord.api_base_url, &config.discord.token);
    let dispatcher = Dispatcher::new(Arc::new(messenger), link_base);

    let cache = ListingCache::new(
        config.monitor.cache_capacity,
        Duration::from_secs(config.monitor.cache_ttl),
    );

    let monitor = Monitor::new(
        store,
        Arc::new(fetcher),
        dispatcher,
        cache,
        Duration::from_secs(config.monitor.poll_interval),
        config.monitor.max_posts,
    );

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let handle = tokio::spawn(async move { monitor.run(shutdown_rx).await });

    println!(
        "🛰️  Subwatch monitoring every {}s. Press Ctrl-C to stop.",
        config.monitor.poll_interval
    );

    tokio::signal::ctrl_c().await?;
    info!("Shutdown signal received");
    let _ = shutdown_tx.send(true);

    if let Err(e) = handle.await {
        error!("Monitor task ended abnormally: {}", e);
    }

    println!("👋 Stopped.");
    Ok(())
}

/// Add or update a keyword filter
pub async fn add_filter(
    user_id: String,
    display_name: String,
    subreddit: String,
    name: String,
    keywords: Vec<String>,
    config_path: Option<PathBuf>,
) -> Result<()> {
    info!("Adding filter '{}' for r/{}", name, subreddit);

    let config = load_config(config_path)?;
    let store = open_store(&config).await?;
    let service = FilterService::new(Arc::new(store));

    let message = service
        .add_filter(&user_id, &display_name, &subreddit, &name, &keywords)
        .await;
    println!("{}", message);

    Ok(())
}

/// Remove a keyword filter
pub async fn remove_filter(
    user_id: String,
    subreddit: String,
    name: String,
    config_path: Option<PathBuf>,
) -> Result<()> {
    info!("Removing filter '{}' from r/{}", name, subreddit);

    let config = load_config(config_path)?;
    let store = open_store(&config).await?;
    let service = FilterService::new(Arc::new(store));

    let message = service.remove_filter(&user_id, &subreddit, &name).await;
    println!("{}", message);

    Ok(())
}

/// Show all filters a user has set up
pub async fn profile(user_id: String, config_path: Option<PathBuf>) -> Result<()> {
    info!("Showing profile for user {}", user_id);

    let config = load_config(config_path)?;
    let store = open_store(&config).await?;
    let service = FilterService::new(Arc::new(store));

    println!("{}", service.profile(&user_id).await);

    Ok(())
}

/// List watched subreddits with watcher and filter counts
pub async fn sources(config_path: Option<PathBuf>) -> Result<()> {
    info!("Listing watched subreddits");

    let config = load_config(config_path)?;
    if !config.database.path.exists() {
        println!("📋 No subreddits watched yet.");
        println!("   Add filters with: subwatch add-filter <user-id> <display-name> <subreddit> <name> <keywords>...");
        return Ok(());
    }

    let store = open_store(&config).await?;
    let watched = store.distinct_subreddits().await?;

    if watched.is_empty() {
        println!("📋 No subreddits watched yet.");
        println!("   Add filters with: subwatch add-filter <user-id> <display-name> <subreddit> <name> <keywords>...");
        return Ok(());
    }

    println!("📋 Watched subreddits:");
    for source in &watched {
        let watchers = store.subscriptions_for_subreddit(source).await?;
        let filter_count: usize = watchers.iter().map(|w| w.filters.len()).sum();

        println!("\n📡 r/{}", source);
        println!("   Watchers: {}", watchers.len());
        println!("   Filters: {}", filter_count);
    }

    Ok(())
}

/// Show subwatch status
pub async fn status(config_path: Option<PathBuf>) -> Result<()> {
    info!("Showing status");

    println!("📊 Subwatch Status");
    println!("==================");

    let config_file = get_config_file(config_path)?;
    if config_file.exists() {
        println!("✅ Configuration: {}", config_file.display());

        let config = Config::load_with_env(&config_file)?;
        println!("   ⏱️  Poll interval: {}s", config.monitor.poll_interval);
        println!("   📄 Max posts per fetch: {}", config.monitor.max_posts);
        println!(
            "   🤖 Discord token: {}",
            if config.discord.token.is_empty() {
                "not set"
            } else {
                "configured"
            }
        );

        if config.database.path.exists() {
            println!("✅ Database: {}", config.database.path.display());

            let store = SqliteFilterStore::open(&config.database.path).await?;
            let stats = store.stats().await?;
            println!("   👥 Subscriptions: {}", stats.subscriptions);
            println!("   🔍 Filters: {}", stats.filters);
            println!("   📡 Watched subreddits: {}", stats.sources);
        } else {
            println!("❌ Database: not created yet");
            println!("   Expected at: {}", config.database.path.display());
            println!("   Add a filter or start the monitor to create it");
        }
    } else {
        println!("❌ Configuration: Not initialized");
        println!("   Run 'subwatch init' to initialize");
    }

    println!("\n🖥️  System Information:");
    println!("   📍 Config directory: {}", Config::config_dir()?.display());
    println!("   🔧 Version: {}", env!("CARGO_PKG_VERSION"));
    println!("   🐧 Platform: {}", std::env::consts::OS);

    Ok(())
}

/// Generate shell completions
pub fn generate_completions(shell: Shell) {
    let mut cmd = Cli::command();
    let cmd_name = cmd.get_name().to_string();
    generate(shell, &mut cmd, cmd_name, &mut std::io::stdout());
}

/// Initialize logging based on verbosity flags
pub fn init_logging(debug: bool, verbose: bool) -> Result<()> {
    use tracing_subscriber::{fmt, EnvFilter};

    let filter = if debug {
        EnvFilter::new("debug")
    } else if verbose {
        EnvFilter::new("info")
    } else {
        EnvFilter::new("warn")
    };

    fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_file(debug)
        .with_line_number(debug)
        .init();

    debug!("Logging initialized");
    Ok(())
}

/// Initialize logging for the monitor from the config file, with an optional
/// non-blocking file layer. The returned guard must stay alive for the file
/// layer to flush.
fn init_monitor_logging(
    logging: &LoggingConfig,
    debug: bool,
    verbose: bool,
) -> Result<Option<WorkerGuard>> {
    use tracing_subscriber::layer::SubscriberExt;
    use tracing_subscriber::util::SubscriberInitExt;
    use tracing_subscriber::{fmt, EnvFilter};

    let level = if debug {
        "debug"
    } else if verbose {
        "info"
    } else {
        logging.level.as_str()
    };
    let filter = EnvFilter::try_new(level).unwrap_or_else(|_| EnvFilter::new("info"));

    let console = fmt::layer().with_target(false);

    if !logging.log_to_file {
        tracing_subscriber::registry()
            .with(filter)
            .with(console)
            .init();
        return Ok(None);
    }

    let log_path = resolve_log_path(&logging.log_file)?;
    if let Some(parent) = log_path.parent() {
        fs::create_dir_all(parent)?;
    }
    let file_name = log_path
        .file_name()
        .map(|name| name.to_os_string())
        .unwrap_or_else(|| "subwatch.log".into());
    let log_dir = log_path
        .parent()
        .unwrap_or_else(|| Path::new("."))
        .to_path_buf();

    let appender = tracing_appender::rolling::never(log_dir, file_name);
    let (writer, guard) = tracing_appender::non_blocking(appender);

    if logging.json_format {
        tracing_subscriber::registry()
            .with(filter)
            .with(console)
            .with(fmt::layer().json().with_writer(writer).with_ansi(false))
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(console)
            .with(fmt::layer().with_writer(writer).with_ansi(false))
            .init();
    }

    Ok(Some(guard))
}

fn resolve_log_path(log_file: &str) -> Result<PathBuf> {
    let path = PathBuf::from(log_file);
    if path.is_absolute() {
        Ok(path)
    } else {
        Ok(Config::config_dir()?.join(path))
    }
}

/// Get the configuration file path
fn get_config_file(config_path: Option<PathBuf>) -> Result<PathBuf> {
    match config_path {
        Some(path) => Ok(path),
        None => Ok(Config::config_dir()?.join("config.toml")),
    }
}

fn load_config(config_path: Option<PathBuf>) -> Result<Config> {
    let config_file = get_config_file(config_path)?;
    if !config_file.exists() {
        return Err(Error::Config(
            "Configuration file not found. Run 'subwatch init' first.".to_string(),
        ));
    }
    Config::load_with_env(config_file)
}

async fn open_store(config: &Config) -> Result<SqliteFilterStore> {
    if let Some(parent) = config.database.path.parent() {
        if !parent.as_os_str().is_empty() && !parent.exists() {
            fs::create_dir_all(parent)?;
        }
    }
    SqliteFilterStore::open(&config.database.path).await
}

/// Create default configuration content
fn create_default_config(database_path: &Path) -> Result<String> {
    let default_config = format!(
        r#"# Subwatch Configuration File
# Generated on {}

[database]
# SQLite database location
path = "{}"

[reddit]
# Listing endpoint base URL
base_url = "https://www.reddit.com"

# Base URL used when building notification links
link_base_url = "https://reddit.com"

# User agent sent with every listing request
user_agent = "subwatch/{}"

# Per-request timeout in seconds
request_timeout = 30

# Seconds to wait after a rate-limit response before the single retry
rate_limit_backoff = 60

[discord]
# Discord REST API base URL
api_base_url = "https://discord.com/api/v10"

# Bot token used for sending DMs.
# Prefer the DISCORD_TOKEN environment variable over storing it here.
token = ""

[monitor]
# Seconds between poll cycles
poll_interval = 120

# Newest posts fetched per subreddit each cycle
max_posts = 100

# Listing cache lifetime in seconds
cache_ttl = 600

# Maximum number of cached listings
cache_capacity = 64

[logging]
# Log level: error, warn, info, debug, trace
level = "info"

# Log to file
log_to_file = false

# Log file path (relative to config directory)
log_file = "logs/subwatch.log"

# Write file logs as JSON
json_format = false
"#,
        chrono::Utc::now().format("%Y-%m-%d %H:%M:%S UTC"),
        database_path.display(),
        env!("CARGO_PKG_VERSION"),
    );

    Ok(default_config)
}
