//! `smog` - SMTP relay for Gmail
//!
//! Accepts mail from legacy devices over SMTP and delivers it through the
//! Gmail API.

#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![forbid(unsafe_code)]

mod cli;
mod logging;

use std::path::Path;
use std::process::ExitCode;

use anyhow::{Context, Result};
use structopt::StructOpt;
use tracing::{error, info};

use cli::{AuthCommand, Command, ConfigCommand, Opt};
use smog_core::{Config, CredentialManager, LogLevel};

#[tokio::main]
async fn main() -> ExitCode {
    let opt = Opt::from_args();

    match run(&opt).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = %format!("{e:#}"), "smog failed");
            eprintln!("Error: {e:#}");
            ExitCode::FAILURE
        }
    }
}

async fn run(opt: &Opt) -> Result<()> {
    match opt.command() {
        Command::Serve => serve(opt).await,
        Command::Auth(AuthCommand::Login { force }) => login(opt, *force).await,
        Command::Auth(AuthCommand::Revoke) => revoke(opt),
        Command::Config(ConfigCommand::Create { dir }) => create_config(opt, dir.as_deref()),
    }
}

fn load_config(opt: &Opt) -> Result<Config> {
    Config::load(opt.config.as_deref()).context("failed to load configuration")
}

const fn level(opt: &Opt, configured: LogLevel) -> LogLevel {
    if opt.silent {
        LogLevel::Disabled
    } else {
        configured
    }
}

async fn serve(opt: &Opt) -> Result<()> {
    let config = load_config(opt)?;
    logging::init(
        level(opt, config.log_level),
        config.log_file().as_deref(),
        opt.verbose,
    );

    if let Err(e) = config.validate() {
        error!("please fix the configuration before running the server");
        return Err(e.into());
    }

    info!(
        address = %config.listen_address,
        port = config.smtp_port,
        "starting smog"
    );
    smog_core::app::run(&config)
        .await
        .context("failed to start server")
}

async fn login(opt: &Opt, force: bool) -> Result<()> {
    let config = load_config(opt)?;
    // Guide the operator through the flow on the console.
    logging::init(
        level(opt, LogLevel::Verbose),
        config.log_file().as_deref(),
        true,
    );

    CredentialManager::from_config(&config)
        .login(force)
        .await
        .context("failed to authenticate")?;
    info!("authorization complete; smog can now send mail");
    Ok(())
}

fn revoke(opt: &Opt) -> Result<()> {
    let config = load_config(opt)?;
    logging::init(level(opt, LogLevel::Minimal), None, true);

    CredentialManager::from_config(&config)
        .revoke()
        .context("failed to revoke authorization")?;
    Ok(())
}

fn create_config(opt: &Opt, dir: Option<&Path>) -> Result<()> {
    logging::init(level(opt, LogLevel::Minimal), None, true);

    let dir = match dir {
        Some(dir) => dir.to_path_buf(),
        None => smog_core::config::system_config_dir()?,
    };
    let path = Config::create_default(&dir).context("failed to create config file")?;
    info!(
        path = %path.display(),
        "set SmtpPassword and GoogleCredentialsPath, then run 'smog auth login'"
    );
    Ok(())
}
