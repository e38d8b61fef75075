//! simguide CLI: the main entry point.
//!
//! Commands:
//! - `serve`: Start the HTTP gateway
//! - `ask`: Send one message through the full pipeline
//! - `config`: Print the effective (or default) configuration

use clap::{Parser, Subcommand, ValueEnum};
use simguide_core::Style;

mod commands;

#[derive(Parser)]
#[command(
    name = "simguide",
    about = "simguide: simulation guidance assistant",
    version,
    author
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Log output format
    #[arg(long, value_enum, default_value_t = LogFormat::Text, global = true)]
    log_format: LogFormat,
}

#[derive(Clone, Copy, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the HTTP gateway server
    Serve {
        /// Override the port
        #[arg(short, long)]
        port: Option<u16>,
    },

    /// Ask a single question and print the answer
    Ask {
        /// The question
        message: String,

        /// Answer style: simple, advanced, concise, detailed
        #[arg(short, long)]
        style: Option<Style>,

        /// Session to read context from and append to
        #[arg(long)]
        session: Option<String>,
    },

    /// Show the configuration (API key redacted)
    Config {
        /// Print the built-in defaults instead of the loaded config
        #[arg(long)]
        default: bool,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Initialize tracing
    let filter = if cli.verbose { "debug" } else { "info" };
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(filter));
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .with_target(false);
    match cli.log_format {
        LogFormat::Text => subscriber.init(),
        LogFormat::Json => subscriber.json().init(),
    }

    match cli.command {
        Commands::Serve { port } => commands::serve::run(port).await?,
        Commands::Ask {
            message,
            style,
            session,
        } => commands::ask::run(message, style, session).await?,
        Commands::Config { default } => commands::config_cmd::run(default)?,
    }

    Ok(())
}
