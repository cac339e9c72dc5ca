//! Command-line interface
//!
//! Every connection setting can also come from the environment, so the same
//! binary can target a staging authority without flags.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

use crate::config::{
    parse_loopback_port, Config, DEFAULT_API_URL, DEFAULT_AUTH_URL, DEFAULT_CLIENT_ID,
    DEFAULT_LOOPBACK_PORT,
};

/// Eremos CLI
#[derive(Parser, Debug)]
#[command(name = "eremos")]
#[command(about = "Command-line client for the Eremos platform", long_about = None)]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    #[command(flatten)]
    pub connection: ConnectionArgs,

    /// Enable verbose logging (includes request tracing)
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Only log errors
    #[arg(long, global = true, conflicts_with = "verbose")]
    pub quiet: bool,
}

#[derive(Args, Debug)]
pub struct ConnectionArgs {
    /// Base URL of the OAuth authority
    #[arg(long, env = "EREMOS_AUTH_URL", default_value = DEFAULT_AUTH_URL, global = true)]
    pub auth_url: String,

    /// Base URL of the REST API
    #[arg(long, env = "EREMOS_API_URL", default_value = DEFAULT_API_URL, global = true)]
    pub api_url: String,

    /// OAuth client id
    #[arg(long, env = "EREMOS_CLIENT_ID", default_value = DEFAULT_CLIENT_ID, global = true)]
    pub client_id: String,

    /// Port for the loopback redirect listener
    #[arg(
        long,
        env = "EREMOS_LOOPBACK_PORT",
        default_value_t = DEFAULT_LOOPBACK_PORT,
        value_parser = parse_loopback_port,
        global = true
    )]
    pub loopback_port: u16,

    /// Directory holding credentials.json (defaults to ~/.eremos)
    #[arg(long, env = "EREMOS_CREDENTIALS_DIR", global = true)]
    pub credentials_dir: Option<PathBuf>,
}

impl ConnectionArgs {
    pub fn into_config(self) -> Config {
        Config {
            auth_url: self.auth_url,
            api_url: self.api_url,
            client_id: self.client_id,
            loopback_port: self.loopback_port,
            credentials_dir: self.credentials_dir,
        }
    }
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Authenticate via OAuth 2.1 with PKCE
    Login(LoginArgs),
    /// Sign out and remove stored tokens
    Logout,
    /// Show current authentication status
    Status(ShowEmailArgs),
    /// Show the signed-in user's profile
    Me(ShowEmailArgs),
}

#[derive(Args, Debug)]
pub struct LoginArgs {
    /// Do not start a local server; paste the callback URL instead
    #[arg(long)]
    pub manual: bool,
}

#[derive(Args, Debug)]
pub struct ShowEmailArgs {
    /// Include the email address (may be sensitive)
    #[arg(long)]
    pub show_email: bool,
}
