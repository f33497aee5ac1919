//! `smartmail-auth`: one-time Google OAuth consent for the SmartMail service.
//!
//! Opens the consent page, waits for the loopback redirect and writes the
//! token file the service reads at startup.
//!
//! ```text
//! smartmail-auth [-f <config.toml>]
//! ```

use anyhow::{Context, Result, bail};

use smartmail_agent::{config, gmail, logger};

#[tokio::main]
async fn main() -> Result<()> {
    let _ = dotenvy::dotenv();

    let mut config_path = None;
    let mut args = std::env::args().skip(1);
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "-h" | "--help" => {
                println!("Usage: smartmail-auth [-f <config.toml>]");
                println!();
                println!("Runs the Google consent flow and saves the Gmail token file.");
                return Ok(());
            }
            "-f" | "--config" => {
                config_path = Some(args.next().context("-f/--config requires a path argument")?);
            }
            other => bail!("unexpected argument: {other}"),
        }
    }

    let config = config::load(config_path.as_deref()).context("loading configuration")?;
    logger::init("warn", false, None).context("initialising logger")?;

    if !config.gmail.credentials_file.exists() && config.gmail.client_id.is_none() {
        bail!(
            "'{}' not found. Download your OAuth client from the Google Cloud console.",
            config.gmail.credentials_file.display()
        );
    }

    println!("Starting authentication flow...");
    let token = gmail::auth::run_installed_app_flow(&config.gmail, |url| {
        println!();
        println!("Open this URL in your browser to authorise SmartMail:");
        println!("  {url}");
        println!();
    })
    .await
    .context("authentication failed")?;

    println!(
        "Authentication successful! Token saved to '{}'.",
        config.gmail.token_file.display()
    );
    if token.refresh_token.is_none() {
        println!("warning: Google returned no refresh token; the service will need re-authorisation once it expires.");
    }
    println!("You can now start the service with: smartmail-agent");
    Ok(())
}
