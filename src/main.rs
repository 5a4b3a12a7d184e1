use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use kinkeep_client::messages::{format_last_message, format_message_time};
use kinkeep_client::types::{Credentials, RegisterRequest};
use kinkeep_client::{
    ClientConfig, FileStorage, KeyringStorage, KinKeepClient, MessageService, SessionStorage,
};
use serde_json::Value;
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

const SESSION_FILE_RELATIVE_PATH: &str = ".kinkeep/session.json";

#[derive(Debug, Clone, Copy, ValueEnum)]
enum StorageKind {
    File,
    Keyring,
}

#[derive(Debug, Parser)]
#[command(name = "kinkeep", version, about = "Command-line access to a KinKeep backend")]
struct Cli {
    /// Backend base URL.
    #[arg(long, env = "KINKEEP_API_URL")]
    api_url: Option<String>,

    /// Where the session is kept.
    #[arg(long, value_enum, default_value = "file")]
    storage: StorageKind,

    /// Session file used with `--storage file`.
    #[arg(long, env = "KINKEEP_SESSION_FILE")]
    session_file: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    Login {
        #[arg(long)]
        email: String,
        #[arg(long, env = "KINKEEP_PASSWORD")]
        password: String,
    },
    Register {
        #[arg(long)]
        name: String,
        #[arg(long)]
        email: String,
        #[arg(long, env = "KINKEEP_PASSWORD")]
        password: String,
    },
    Logout,
    /// Print the signed-in user.
    Whoami,
    Families,
    Conversations,
    /// Force an access-token refresh.
    Refresh,
}

fn default_session_file() -> Result<PathBuf> {
    dirs::home_dir()
        .map(|home| home.join(SESSION_FILE_RELATIVE_PATH))
        .context("could not determine home directory; pass --session-file")
}

fn storage(cli: &Cli) -> Result<Arc<dyn SessionStorage>> {
    match cli.storage {
        StorageKind::File => {
            let path = match &cli.session_file {
                Some(p) => p.clone(),
                None => default_session_file()?,
            };
            Ok(Arc::new(FileStorage::new(path)))
        }
        StorageKind::Keyring => {
            let keyring = KeyringStorage::default();
            if !keyring.is_available() {
                bail!("OS keychain/secret service is unavailable");
            }
            Ok(Arc::new(keyring))
        }
    }
}

fn print_json(value: &Value) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let mut config = ClientConfig::from_env();
    if let Some(url) = &cli.api_url {
        config = config.with_base_url(url);
    }
    let client = KinKeepClient::new(&config, storage(&cli)?)?;

    match cli.command {
        Command::Login { email, password } => {
            let outcome = client.login(&Credentials { email, password }).await;
            if !outcome.success {
                bail!(outcome.error.unwrap_or_else(|| "Login failed".to_string()));
            }
            println!("Logged in.");
        }
        Command::Register {
            name,
            email,
            password,
        } => {
            let outcome = client
                .register(&RegisterRequest {
                    name,
                    email,
                    password,
                })
                .await;
            if !outcome.success {
                bail!(outcome
                    .error
                    .unwrap_or_else(|| "Registration failed".to_string()));
            }
            println!("Registered. Finish onboarding in the app.");
        }
        Command::Logout => {
            client.logout()?;
            println!("Logged out.");
        }
        Command::Whoami => {
            if client.restore()?.is_none() {
                bail!("not logged in");
            }
            print_json(&client.get_current_user().await?)?;
        }
        Command::Families => print_json(&client.get_families().await?)?,
        Command::Conversations => {
            let now = chrono::Local::now();
            for conversation in MessageService::new(client).conversations().await? {
                let name = conversation
                    .get("name")
                    .and_then(Value::as_str)
                    .unwrap_or("(unnamed)");
                let last = conversation.get("last_message");
                let when = last
                    .and_then(|m| m.get("created_at"))
                    .and_then(Value::as_str)
                    .map(|ts| format_message_time(ts, now))
                    .unwrap_or_default();
                println!("{name}\t{}\t{when}", format_last_message(last));
            }
        }
        Command::Refresh => {
            client.refresh().await?;
            println!("Access token refreshed.");
        }
    }

    Ok(())
}
