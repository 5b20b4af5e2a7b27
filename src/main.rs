use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, level_filters::LevelFilter, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use hms_notifications::api::{HttpNotificationsApi, NotificationsApi};
use hms_notifications::config::{AppConfig, CliConfig, FileConfig};
use hms_notifications::notifications::{NotificationRecord, TerminalEffects};
use hms_notifications::NotificationSession;

#[derive(Parser, Debug)]
#[clap(name = "hms-notify", version = concat!(env!("CARGO_PKG_VERSION"), "-", env!("GIT_HASH")))]
struct CliArgs {
    /// Path to a TOML config file. Values in the file override flags.
    #[clap(long, global = true)]
    pub config: Option<PathBuf>,

    /// Base URL of the backend API (e.g. https://hms.example.org/api).
    #[clap(long = "api-url", global = true)]
    pub api_base_url: Option<String>,

    /// Push channel endpoint. Derived from the API URL when omitted.
    #[clap(long, global = true)]
    pub ws_url: Option<String>,

    /// Bearer token of the authenticated user.
    #[clap(long, global = true)]
    pub token: Option<String>,

    /// Id of the authenticated user.
    #[clap(long, global = true)]
    pub user_id: Option<String>,

    /// Page size for notification listings.
    #[clap(long, global = true, default_value_t = 20)]
    pub per_page: u32,

    /// Timeout of every REST call, in seconds.
    #[clap(long, global = true, default_value_t = 30)]
    pub request_timeout_sec: u64,

    /// Do not ring the terminal bell on new notifications.
    #[clap(long, global = true)]
    pub no_sound: bool,

    /// Ask for desktop notifications on new arrivals.
    #[clap(long, global = true)]
    pub desktop_notifications: bool,

    #[clap(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Follow new notifications live until interrupted.
    Watch,
    /// Print one page of notifications.
    List {
        #[clap(long, default_value_t = 1)]
        page: u32,
    },
    /// Mark a notification as read.
    Read { id: String },
    /// Mark every notification as read.
    ReadAll,
    /// Delete a notification.
    Delete { id: String },
    /// Delete every notification.
    ClearAll,
}

impl CliArgs {
    fn cli_config(&self) -> CliConfig {
        CliConfig {
            api_base_url: self.api_base_url.clone(),
            ws_url: self.ws_url.clone(),
            token: self.token.clone(),
            user_id: self.user_id.clone(),
            per_page: self.per_page,
            request_timeout_sec: self.request_timeout_sec,
            sound_enabled: !self.no_sound,
            desktop_notifications_enabled: self.desktop_notifications,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli_args = CliArgs::parse();

    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(
            EnvFilter::builder()
                .with_default_directive(LevelFilter::INFO.into())
                .with_env_var("LOG_LEVEL")
                .from_env_lossy(),
        )
        .try_init()
        .context("Failed to initialize logging")?;

    let file_config = match &cli_args.config {
        Some(path) => {
            info!("Loading config from {:?}", path);
            Some(FileConfig::load(path)?)
        }
        None => None,
    };
    let config = AppConfig::resolve(&cli_args.cli_config(), file_config)?;

    run(&config, cli_args.command).await
}

async fn watch(config: &AppConfig) -> Result<()> {
    info!("Watching notifications of user {} at {}", config.user_id, config.ws_url);
    let session = NotificationSession::from_config(config, Arc::new(TerminalEffects));
    let mut updates = session.store().subscribe();
    let mut channel_state = session.watch_channel_state();
    let mut seen: HashSet<String> = HashSet::new();
    let mut last_unread: Option<u64> = None;

    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            changed = updates.changed() => {
                if changed.is_err() {
                    break;
                }
                let snapshot = updates.borrow_and_update().clone();
                // Oldest first so the terminal reads top to bottom.
                for record in snapshot.records.iter().rev() {
                    if seen.insert(record.id.clone()) {
                        println!("{}", format_record(record));
                    }
                }
                if last_unread != Some(snapshot.unread_count) {
                    println!("-- {} unread", snapshot.unread_count);
                    last_unread = Some(snapshot.unread_count);
                }
                if let Some(error) = &snapshot.error {
                    warn!("{}", error);
                }
            }
            changed = channel_state.changed() => {
                if changed.is_err() {
                    break;
                }
                let state = *channel_state.borrow_and_update();
                info!("Channel {:?}", state);
            }
            result = &mut shutdown => {
                if let Err(e) = result {
                    warn!("Failed to listen for Ctrl-C: {}", e);
                }
                break;
            }
        }
    }

    info!("Shutting down");
    session.logout().await;
    Ok(())
}

async fn run(config: &AppConfig, command: Command) -> Result<()> {
    if let Command::Watch = command {
        return watch(config).await;
    }

    let api = HttpNotificationsApi::new(
        config.api_base_url.clone(),
        config.token.clone(),
        config.user_id.clone(),
        config.request_timeout_sec,
    );

    match command {
        Command::Watch => {}
        Command::List { page } => {
            let result = api
                .fetch_page(page.max(1), config.per_page)
                .await
                .context("Failed to list notifications")?;
            for record in result.records() {
                println!("{}", format_record(record));
            }
            let last_page = result
                .data
                .last_page
                .map(|p| p.to_string())
                .unwrap_or_else(|| "?".to_string());
            println!(
                "-- page {} of {}, {} unread",
                page.max(1),
                last_page,
                result.unread_count
            );
        }
        Command::Read { id } => {
            api.mark_read(&id)
                .await
                .with_context(|| format!("Failed to mark {} as read", id))?;
            println!("Marked {} as read", id);
        }
        Command::ReadAll => {
            api.mark_all_read()
                .await
                .context("Failed to mark notifications as read")?;
            println!("Marked all notifications as read");
        }
        Command::Delete { id } => {
            api.delete(&id)
                .await
                .with_context(|| format!("Failed to delete {}", id))?;
            println!("Deleted {}", id);
        }
        Command::ClearAll => {
            api.clear_all()
                .await
                .context("Failed to clear notifications")?;
            println!("Cleared all notifications");
        }
    }
    Ok(())
}

fn format_record(record: &NotificationRecord) -> String {
    let marker = if record.is_unread() { "*" } else { " " };
    let title = record.payload.title.as_deref().unwrap_or("New notification");
    let mut line = format!(
        "{} {} [{}] {}",
        marker,
        record.created_at.format("%Y-%m-%d %H:%M"),
        record.id,
        title
    );
    if let Some(message) = &record.payload.message {
        line.push_str(" - ");
        line.push_str(message);
    }
    if let Some(url) = &record.payload.action_url {
        line.push_str(&format!(" ({})", url));
    }
    line
}
