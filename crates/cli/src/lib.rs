pub mod commands;

use clap::{Parser, Subcommand};
use std::process::ExitCode;

#[derive(Debug, Parser)]
#[command(
    name = "medidesk",
    about = "Medidesk operator CLI",
    long_about = "Check runtime readiness, apply migrations, inspect configuration, list free \
                  appointment slots, and talk to the assistant from a terminal.",
    after_help = "Examples:\n  medidesk doctor --json\n  medidesk slots --date 2026-11-02\n  \
                  medidesk chat --user alice"
)]
pub struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    #[command(about = "Run startup preflight checks and return structured status output")]
    Start,
    #[command(about = "Apply pending database migrations and return structured status output")]
    Migrate,
    #[command(
        about = "Inspect effective configuration values with source attribution and redaction"
    )]
    Config,
    #[command(about = "Validate config, FAQ corpus readiness, and DB connectivity")]
    Doctor {
        #[arg(long, help = "Emit machine-readable JSON output")]
        json: bool,
    },
    #[command(about = "List free appointment slots for a date")]
    Slots {
        #[arg(long, help = "Date formatted YYYY-MM-DD")]
        date: String,
    },
    #[command(about = "Chat with the assistant on stdin using in-memory storage")]
    Chat {
        #[arg(long, help = "User id the conversation is attributed to")]
        user: String,
    },
}

pub fn run() -> ExitCode {
    let cli = Cli::parse();

    let result = match cli.command {
        Command::Start => commands::start::run(),
        Command::Migrate => commands::migrate::run(),
        Command::Config => {
            commands::CommandResult { exit_code: 0, output: commands::config::run() }
        }
        Command::Doctor { json } => {
            commands::CommandResult { exit_code: 0, output: commands::doctor::run(json) }
        }
        Command::Slots { date } => commands::slots::run(&date),
        Command::Chat { user } => commands::chat::run(&user),
    };

    if !result.output.is_empty() {
        println!("{}", result.output);
    }
    ExitCode::from(result.exit_code)
}
