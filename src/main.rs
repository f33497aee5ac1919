//! SmartMail Agent: HTTP service entry point.
//!
//! Startup sequence:
//!   1. Load .env (if present)
//!   2. Load config
//!   3. Resolve effective log level (CLI `-v` flags > env > config)
//!   4. Init logger once
//!   5. Open the email store
//!   6. Build the LLM provider and the Gmail client
//!   7. Spawn the daily scheduler
//!   8. Spawn Ctrl-C → shutdown signal watcher
//!   9. Serve HTTP until shutdown

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use smartmail_agent::assistant::Assistant;
use smartmail_agent::error::AppError;
use smartmail_agent::gmail::GmailClient;
use smartmail_agent::server::{self, AppState};
use smartmail_agent::store::EmailStore;
use smartmail_agent::triage::Triage;
use smartmail_agent::{config, llm, logger};

struct CliArgs {
    log_level: Option<&'static str>,
    config_path: Option<String>,
}

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        eprintln!("error: {e}");
        std::process::exit(1);
    }
}

async fn run() -> Result<(), AppError> {
    // .env is optional.
    let _ = dotenvy::dotenv();

    let args = parse_cli_args();

    let config = config::load(args.config_path.as_deref())?;

    let effective_log_level = args.log_level.unwrap_or(config.log_level.as_str());
    logger::init(effective_log_level, args.log_level.is_some(), config.log_file.as_deref())?;

    info!(
        service = %config.service_name,
        work_dir = %config.work_dir.display(),
        configured_log_level = %config.log_level,
        effective_log_level = %effective_log_level,
        "config loaded"
    );

    let store = EmailStore::open(&config.database.path)?;
    info!(path = %store.path().display(), "email store ready");

    if config.llm.provider != "dummy" && config.llm_api_key.is_none() {
        warn!("OPENAI_API_KEY is not set, AI steps will fall back to failure markers");
    }
    let provider = llm::providers::build(&config.llm, config.llm_api_key.clone())?;
    let assistant = Assistant::new(provider, &config.triage);
    info!(provider = assistant.provider_name(), "assistant ready");

    let gmail = match GmailClient::from_token_file(&config.gmail) {
        Ok(client) => {
            info!(token_file = %config.gmail.token_file.display(), "gmail client ready");
            Some(client)
        }
        Err(e) => {
            warn!(error = %e, "not authenticated with Google, run 'smartmail-auth' first");
            None
        }
    };

    let triage = Arc::new(Triage::new(gmail, store, assistant, &config));

    // Ctrl-C cancels this; the server and the scheduler watch it.
    let shutdown = CancellationToken::new();

    #[cfg(feature = "scheduler")]
    let scheduler = smartmail_agent::scheduler::spawn(triage.clone(), &config.scheduler, shutdown.clone());

    {
        let token = shutdown.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("ctrl-c received, shutting down");
                token.cancel();
            }
        });
    }

    let state = AppState {
        triage,
        triage_max_results: config.gmail.triage_max_results,
    };
    let served = server::serve(&config.server.bind, state, shutdown.clone()).await;

    // A failed bind must still stop the scheduler.
    shutdown.cancel();
    #[cfg(feature = "scheduler")]
    if let Some(handle) = scheduler {
        if let Err(e) = handle.await {
            warn!(error = %e, "scheduler task ended abnormally");
        }
    }

    served
}

fn parse_cli_args() -> CliArgs {
    let mut verbosity = 0u8;
    let mut config_path = None;

    let mut iter = std::env::args().skip(1);
    while let Some(arg) = iter.next() {
        if arg == "--" {
            break;
        }

        match arg.as_str() {
            "-h" | "--help" => {
                println!("Usage: smartmail-agent [OPTIONS]");
                println!();
                println!("Options:");
                println!("  -h, --help                 Print help");
                println!("  -f, --config <PATH>        Path to configuration file (default: config/default.toml)");
                println!("  -v, -vv, -vvv, -vvvv       Increase logging verbosity");
                std::process::exit(0);
            }
            "-f" | "--config" => {
                if let Some(path) = iter.next() {
                    config_path = Some(path);
                } else {
                    eprintln!("error: -f/--config requires a path argument");
                    std::process::exit(1);
                }
            }
            "--verbose" => verbosity = verbosity.saturating_add(1),
            a if a.starts_with('-') && a.len() > 1 && a.chars().skip(1).all(|c| c == 'v') => {
                verbosity = verbosity.saturating_add((a.len() - 1) as u8);
            }
            _ => {}
        }
    }

    CliArgs {
        log_level: logger::level_for_verbosity(verbosity),
        config_path,
    }
}
