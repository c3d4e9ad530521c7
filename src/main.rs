
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use clap::{ArgGroup, Parser, Subcommand};
use serde::Serialize;
use tracing::{debug, warn};
use tracing_subscriber::EnvFilter;

use passgen::account::AuthOperationError;
use passgen::auth::rest::RestAuthBackend;
use passgen::auth::{AuthBackend, AuthError, OfflineAuthBackend};
use passgen::config::{AppConfig, ConfigError};
use passgen::counter::CounterStore;
use passgen::generator::fallback::FallbackGenerator;
use passgen::generator::gemini::GeminiGenerator;
use passgen::generator::{Complexity, GenerateError, GeneratedPassword, PasswordGenerator, generate_gated};
use passgen::identity::Identity;
use passgen::lifecycle::{ControllerConfig, ReadyTrigger, SessionController, SessionView};
use passgen::storage::{FileStorage, KeyValueStorage};

#[derive(Debug, thiserror::Error)]
enum CliError {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),
    #[error("auth service setup failed: {0}")]
    AuthSetup(#[from] AuthError),
    #[error("{0}")]
    Account(#[from] AuthOperationError),
    #[error("{0}")]
    Generate(#[from] GenerateError),
    #[error("timed out waiting for the session to update")]
    SessionTimeout,
    #[error("invalid JSON output: {0}")]
    Json(#[from] serde_json::Error),
}

#[derive(Parser, Debug)]
#[command(name = "passgen", about = "Generate memorable passwords from a word")]
struct Cli {
    /// Print machine-readable JSON.
    #[arg(long, global = true, default_value_t = false)]
    json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Show who is signed in and how many guest generations remain.
    Status,
    /// Suggest passwords built from WORD.
    Generate {
        word: String,
        #[arg(long, value_enum, default_value_t = Complexity::Easy)]
        style: Complexity,
    },
    Login {
        email: String,
        #[arg(long, env = "PASSGEN_PASSWORD", hide_env_values = true)]
        password: String,
    },
    Register {
        #[arg(long)]
        name: String,
        email: String,
        #[arg(long, env = "PASSGEN_PASSWORD", hide_env_values = true)]
        password: String,
    },
    Logout,
    /// Change the display name or avatar of the signed-in account.
    #[command(group(ArgGroup::new("fields").required(true).multiple(true).args(["name", "avatar"])))]
    Profile {
        #[arg(long)]
        name: Option<String>,
        /// Image URL to show as the avatar.
        #[arg(long)]
        avatar: Option<String>,
    },
}

#[derive(Serialize)]
struct StatusReport {
    signed_in: bool,
    user_id: Option<String>,
    email: Option<String>,
    display_name: Option<String>,
    avatar: Option<String>,
    ready_trigger: Option<&'static str>,
    guest_usage_count: u32,
    remaining_attempts: Option<u32>,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    let dotenv = dotenvy::dotenv();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();
    match dotenv {
        Ok(path) => debug!(path = %path.display(), "loaded .env"),
        Err(e) if e.not_found() => {}
        Err(e) => warn!(error = %e, "failed to read .env"),
    }

    match run(Cli::parse()).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {e}");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<(), CliError> {
    let config = AppConfig::from_env()?;
    let storage: Arc<dyn KeyValueStorage> = Arc::new(FileStorage::open(&config.data_dir));
    let backend: Arc<dyn AuthBackend> = match &config.auth {
        Some(auth) => Arc::new(RestAuthBackend::new(auth, config.http, Arc::clone(&storage))?),
        None => {
            debug!("auth service not configured; guest mode only");
            Arc::new(OfflineAuthBackend::new())
        }
    };
    let generator: Box<dyn PasswordGenerator> = match &config.generator {
        Some(gemini) => Box::new(GeminiGenerator::new(gemini, config.http)?),
        None => Box::new(FallbackGenerator),
    };

    let controller = SessionController::start(
        backend,
        CounterStore::new(storage),
        ControllerConfig { safety_timeout: config.safety_timeout },
    );
    controller.wait_until_ready().await;

    let result = match cli.command {
        Command::Status => print_status(&controller, cli.json),
        Command::Generate { word, style } => {
            let passwords = generate_gated(&controller, generator.as_ref(), &word, style).await?;
            print_passwords(&passwords, cli.json)
        }
        Command::Login { email, password } => {
            controller.sign_in(&email, &password).await?;
            await_identity(&controller, config.safety_timeout, Identity::is_authenticated).await?;
            print_status(&controller, cli.json)
        }
        Command::Register { name, email, password } => {
            controller.register(&name, &email, &password).await?;
            await_identity(&controller, config.safety_timeout, Identity::is_authenticated).await?;
            print_status(&controller, cli.json)
        }
        Command::Logout => {
            controller.sign_out().await;
            print_status(&controller, cli.json)
        }
        Command::Profile { name, avatar } => {
            if let Some(name) = name {
                controller.update_profile(&name).await?;
            }
            if let Some(avatar) = avatar {
                controller.update_avatar(&avatar).await?;
            }
            print_status(&controller, cli.json)
        }
    };
    controller.teardown();
    result
}

/// Wait for the change stream to deliver an identity matching `predicate`.
async fn await_identity(
    controller: &SessionController,
    limit: Duration,
    predicate: fn(&Identity) -> bool,
) -> Result<SessionView, CliError> {
    match tokio::time::timeout(limit, controller.wait_for(|view| predicate(&view.identity))).await {
        Ok(view) => Ok(view),
        Err(_) => Err(CliError::SessionTimeout),
    }
}

fn status_report(controller: &SessionController) -> StatusReport {
    let view = controller.current();
    let user = view.identity.user();
    StatusReport {
        signed_in: view.identity.is_authenticated(),
        user_id: user.map(|u| u.id.clone()),
        email: user.map(|u| u.email.clone()).filter(|e| !e.is_empty()),
        display_name: user.map(|u| u.display_name.clone()),
        avatar: user.and_then(|u| u.avatar_ref.clone()),
        ready_trigger: view.ready_trigger.map(trigger_name),
        guest_usage_count: controller.guest_usage_count(),
        remaining_attempts: controller.remaining_attempts(),
    }
}

fn trigger_name(trigger: ReadyTrigger) -> &'static str {
    match trigger {
        ReadyTrigger::SessionCheck => "session_check",
        ReadyTrigger::SessionEvent => "session_event",
        ReadyTrigger::SafetyTimeout => "safety_timeout",
    }
}

fn print_status(controller: &SessionController, json: bool) -> Result<(), CliError> {
    let report = status_report(controller);
    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }
    match (&report.display_name, &report.email) {
        (Some(name), Some(email)) => println!("Signed in as {name} <{email}>"),
        (Some(name), None) => println!("Signed in as {name}"),
        _ => println!("Guest"),
    }
    if let Some(avatar) = &report.avatar {
        println!("Avatar: {avatar}");
    }
    if let Some(remaining) = report.remaining_attempts {
        println!("Free generations left: {remaining}");
    }
    Ok(())
}

fn print_passwords(passwords: &[GeneratedPassword], json: bool) -> Result<(), CliError> {
    if json {
        println!("{}", serde_json::to_string_pretty(passwords)?);
        return Ok(());
    }
    for suggestion in passwords {
        println!("{:<24} {:<7} {}", suggestion.password, suggestion.strength, suggestion.explanation);
    }
    Ok(())
}
