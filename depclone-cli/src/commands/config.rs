//! Config command - read and edit `config.ini` from the command line.

use clap::Subcommand;
use console::style;
use depclone::config::config_file_path;
use depclone::{ConfigFile, ConfigKey};

use crate::error::CliError;

/// Config subcommands.
#[derive(Debug, Subcommand)]
pub enum ConfigCommands {
    /// Print one setting
    Get {
        /// Key as section.key (e.g. fetch.ecosystem)
        key: String,
    },

    /// Change one setting; an empty value clears optional settings
    Set {
        /// Key as section.key (e.g. registry.npm_url)
        key: String,

        value: String,
    },

    /// Print every setting
    List,

    /// Print the configuration file path
    Path,
}

pub fn run(command: ConfigCommands) -> Result<(), CliError> {
    match command {
        ConfigCommands::Get { key } => {
            let key = parse_key(&key)?;
            let config = ConfigFile::load()?;
            println!("{}", display_value(&key.get(&config)));
        }
        ConfigCommands::Set { key, value } => {
            let key = parse_key(&key)?;
            let mut config = ConfigFile::load()?;
            key.set(&mut config, &value)?;
            config.save()?;
            println!("{} = {}", key, display_value(&key.get(&config)));
        }
        ConfigCommands::List => {
            let config = ConfigFile::load()?;
            for line in listing(&config) {
                println!("{}", line);
            }
        }
        ConfigCommands::Path => println!("{}", config_file_path().display()),
    }
    Ok(())
}

fn parse_key(key: &str) -> Result<ConfigKey, CliError> {
    key.parse().map_err(|_| {
        CliError::Config(format!(
            "unknown key '{}'; run 'depclone config list' to see available keys",
            key
        ))
    })
}

fn display_value(value: &str) -> &str {
    if value.is_empty() {
        "(not set)"
    } else {
        value
    }
}

/// Every key grouped under its `[section]` header.
fn listing(config: &ConfigFile) -> Vec<String> {
    let mut lines = Vec::new();
    let mut section = "";
    for key in ConfigKey::all() {
        if key.section() != section {
            if !section.is_empty() {
                lines.push(String::new());
            }
            section = key.section();
            lines.push(style(format!("[{}]", section)).bold().to_string());
        }
        lines.push(format!(
            "  {} = {}",
            key.key_name(),
            display_value(&key.get(config))
        ));
    }
    lines
}
