//! Command line.

use std::path::PathBuf;

use structopt::StructOpt;

#[derive(Debug, StructOpt)]
#[structopt(
    name = "smog",
    about = "A fast and simple SMTP relay for Gmail",
    long_about = "Accepts mail over SMTP from devices and applications that cannot speak \
                  OAuth and delivers it through the Gmail API."
)]
pub struct Opt {
    /// Path to configuration file
    #[structopt(short = "c", long = "config", parse(from_os_str), global = true)]
    pub config: Option<PathBuf>,

    /// Enable verbose logging to the console
    #[structopt(short = "v", long = "verbose", global = true)]
    pub verbose: bool,

    /// Disable all logging
    #[structopt(short = "s", long = "silent", global = true)]
    pub silent: bool,

    #[structopt(subcommand)]
    pub command: Option<Command>,
}

#[derive(Debug, PartialEq, Eq, StructOpt)]
pub enum Command {
    /// Starts the SMTP relay server (the default)
    Serve,
    /// Manages Gmail authorization
    Auth(AuthCommand),
    /// Manages the configuration file
    Config(ConfigCommand),
}

#[derive(Debug, PartialEq, Eq, StructOpt)]
pub enum AuthCommand {
    /// Authorizes smog to send mail as your Gmail account
    Login {
        /// Request a new token even if a usable one is stored
        #[structopt(short = "f", long = "force")]
        force: bool,
    },
    /// Deletes the stored token and its backup
    Revoke,
}

#[derive(Debug, PartialEq, Eq, StructOpt)]
pub enum ConfigCommand {
    /// Writes a default configuration file
    Create {
        /// Directory to write smog.json into (platform default if omitted)
        #[structopt(long = "dir", parse(from_os_str))]
        dir: Option<PathBuf>,
    },
}

impl Opt {
    /// Subcommand to run; `serve` when none was given.
    pub fn command(&self) -> &Command {
        self.command.as_ref().unwrap_or(&Command::Serve)
    }
}
