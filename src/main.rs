//! eremos: command-line client for the Eremos platform
//!
//! Authentication uses OAuth 2.1 Authorization Code with PKCE and a loopback
//! redirect; tokens live in `~/.eremos/credentials.json` and are refreshed
//! transparently before API calls.

mod api;
mod auth;
mod cli;
mod commands;
mod config;
mod error;
mod http;
mod sanitize;
mod utils;

use clap::Parser;
use cli::{Cli, Commands};
use error::EXIT_USAGE;
use sanitize::strip_terminal_escapes;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) => {
            let code = if e.use_stderr() { EXIT_USAGE } else { 0 };
            let _ = e.print();
            std::process::exit(code);
        }
    };

    let log_level = if cli.quiet {
        "error"
    } else if cli.verbose {
        "debug"
    } else {
        "warn"
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr) // Log to stderr to keep stdout clean
        .init();

    let config = cli.connection.into_config();

    let result = match cli.command {
        Commands::Login(args) => commands::login::run(&config, args.manual).await,
        Commands::Logout => commands::logout::run(&config).await,
        Commands::Status(args) => commands::status::run(&config, args.show_email).await,
        Commands::Me(args) => commands::me::run(&config, args.show_email).await,
    };

    match result {
        Ok(output) => println!("{}", output),
        Err(e) => {
            eprintln!("Error: {}", strip_terminal_escapes(&e.to_string()));
            std::process::exit(e.exit_code());
        }
    }
}
