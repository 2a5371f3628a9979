//! depclone CLI - fetch a dependency closure into one tar archive
//!
//! ```text
//! depclone fetch -e npm left-pad@1.3.0 react -o bundle.tar
//! depclone config set fetch.include_types true
//! ```

mod commands;
mod error;
mod ui;

use clap::{Parser, Subcommand};

use commands::config::ConfigCommands;
use commands::fetch::FetchArgs;
use error::CliError;

#[derive(Debug, Parser)]
#[command(name = "depclone", version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Fetch modules and their dependencies into a tar archive
    Fetch(FetchArgs),

    /// View or change configuration settings
    #[command(subcommand)]
    Config(ConfigCommands),
}

fn main() {
    let cli = Cli::parse();

    let result: Result<(), CliError> = match cli.command {
        Commands::Fetch(args) => commands::fetch::run(args),
        Commands::Config(command) => commands::config::run(command),
    };

    if let Err(e) = result {
        ui::print_error(&e);
        std::process::exit(e.exit_code());
    }
}
