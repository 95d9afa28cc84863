//! `courier` command-line client.

use std::io::BufRead;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};

use courier::credentials::{CredentialStore, FileBackend, KeyringBackend};
use courier::env::{should_skip_keyring, Environment};
use courier::{App, Config, NotificationRecord, SessionEvent, SessionState};

/// Name of the credentials file used instead of the keyring in test mode.
const CREDENTIALS_FILE: &str = "credentials.json";

// CLI
#[derive(Parser)]
#[command(name = "courier")]
#[command(version)]
#[command(about = "Session and notification client")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Sign in. The secret is read from COURIER_SECRET or the first line of stdin.
    Login {
        /// Account identifier (email or username)
        #[arg(long)]
        identifier: String,
    },
    /// Sign out and forget stored credentials
    Logout,
    /// Show the signed-in account
    Whoami,
    /// List notifications, newest first
    Notifications {
        /// Keep running and print notifications as they arrive
        #[arg(long)]
        watch: bool,
    },
    /// Mark one notification as read
    Read {
        /// Notification id
        id: i64,
    },
    /// Mark every notification as read
    ReadAll,
    /// Print the effective configuration
    Config,
}

fn init_logging() -> Result<()> {
    let mut builder =
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"));
    builder.format_timestamp_secs();
    if let Ok(path) = std::env::var("COURIER_LOG_FILE") {
        let log_file = std::fs::File::create(&path)
            .with_context(|| format!("Failed to create log file at {path}"))?;
        builder.target(env_logger::Target::Pipe(Box::new(log_file)));
    }
    builder.init();
    Ok(())
}

fn open_credentials() -> Result<CredentialStore> {
    let store = if should_skip_keyring() {
        let path = Config::config_dir()?.join(CREDENTIALS_FILE);
        log::debug!("Using file credential storage at {}", path.display());
        CredentialStore::load(FileBackend::new(path))
    } else {
        CredentialStore::load(KeyringBackend::default())
    };
    store.context("Failed to load stored credentials")
}

fn read_secret() -> Result<String> {
    if let Ok(secret) = std::env::var("COURIER_SECRET") {
        return Ok(secret);
    }
    eprint!("Secret: ");
    let mut line = String::new();
    std::io::stdin()
        .lock()
        .read_line(&mut line)
        .context("Failed to read secret from stdin")?;
    Ok(line.trim_end_matches(['\r', '\n']).to_string())
}

fn print_record(record: &NotificationRecord) {
    println!(
        "{} {:>6}  {}  {}",
        if record.is_read { " " } else { "*" },
        record.id,
        record.received_at.format("%Y-%m-%d %H:%M"),
        record.title().unwrap_or("(no title)")
    );
}

async fn require_session(app: &mut App) -> Result<()> {
    if app.start().await != SessionState::Authenticated {
        anyhow::bail!("Not signed in. Run `courier login --identifier <id>` first.");
    }
    Ok(())
}

async fn watch_notifications(app: &App) -> Result<()> {
    let mut unread = app.notifications().watch_unread();
    let mut session = app.session().subscribe();
    let mut seen: std::collections::HashSet<i64> =
        app.notifications().feed().iter().map(|r| r.id).collect();

    loop {
        tokio::select! {
            changed = unread.changed() => {
                changed.context("Notification store closed")?;
                for record in app.notifications().feed().iter().rev() {
                    if seen.insert(record.id) {
                        print_record(record);
                    }
                }
            }
            event = session.recv() => {
                if let Ok(SessionEvent::ForcedLogout { reason }) = event {
                    eprintln!("{}", reason.notice());
                    return Ok(());
                }
            }
            _ = tokio::signal::ctrl_c() => return Ok(()),
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    init_logging()?;
    let cli = Cli::parse();
    let config = Config::load()?;
    log::debug!("Environment: {}", Environment::current());

    if let Commands::Config = cli.command {
        println!("{}", serde_json::to_string_pretty(&config)?);
        return Ok(());
    }

    let mut app = App::new(&config, open_credentials()?).context("Failed to build client")?;

    match cli.command {
        Commands::Login { identifier } => {
            let secret = read_secret()?;
            let profile = app
                .login(&identifier, &secret)
                .await
                .context("Login failed")?;
            println!("Signed in as {}", profile.display_name());
        }
        Commands::Logout => {
            app.start().await;
            app.logout().await;
            println!("Signed out");
        }
        Commands::Whoami => {
            require_session(&mut app).await?;
            let profile = app
                .session()
                .current_user()
                .context("Session has no profile")?;
            println!("{}", serde_json::to_string_pretty(&profile)?);
        }
        Commands::Notifications { watch } => {
            require_session(&mut app).await?;
            let feed = app.notifications().feed();
            for record in &feed {
                print_record(record);
            }
            println!("{} unread", app.notifications().unread_count());
            if watch {
                watch_notifications(&app).await?;
            }
        }
        Commands::Read { id } => {
            require_session(&mut app).await?;
            app.notifications()
                .mark_read(id)
                .await
                .with_context(|| format!("Failed to mark notification {id} read"))?;
            println!("{} unread", app.notifications().unread_count());
        }
        Commands::ReadAll => {
            require_session(&mut app).await?;
            app.notifications()
                .mark_all_read()
                .await
                .context("Failed to mark notifications read")?;
            println!("0 unread");
        }
        Commands::Config => {}
    }

    // Let the push task send its close frame.
    app.push().close();
    tokio::time::sleep(Duration::from_millis(50)).await;
    Ok(())
}
