use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

mod commands;

#[derive(Parser)]
#[command(name = "careloop-cli", version, about = "Careloop reminder and escalation CLI")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Support-circle members
    Member {
        #[command(subcommand)]
        action: commands::member::MemberAction,
    },
    /// Reminder management
    Reminder {
        #[command(subcommand)]
        action: commands::reminder::ReminderAction,
    },
    /// Run one scheduler evaluation
    Tick(commands::tick::TickArgs),
    /// Mark an occurrence done
    Resolve(commands::resolve::ResolveArgs),
    /// Alerts and acknowledgments
    Alert {
        #[command(subcommand)]
        action: commands::alert::AlertAction,
    },
    /// Configuration management
    Config {
        #[command(subcommand)]
        action: commands::config::ConfigAction,
    },
}

fn init_tracing() {
    let filter = EnvFilter::try_from_env("CARELOOP_LOG").unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn main() {
    init_tracing();
    let cli = Cli::parse();
    let result = match cli.command {
        Commands::Member { action } => commands::member::run(action),
        Commands::Reminder { action } => commands::reminder::run(action),
        Commands::Tick(args) => commands::tick::run(args),
        Commands::Resolve(args) => commands::resolve::run(args),
        Commands::Alert { action } => commands::alert::run(action),
        Commands::Config { action } => commands::config::run(action),
    };

    if let Err(e) = result {
        eprintln!("error: {e}");
        std::process::exit(1);
    }
}
