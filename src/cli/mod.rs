//! Command-line interface for sitesieve
//!
//! clap derive parsing, logging setup and dispatch to the command modules.

use anyhow::Result;
use clap::{CommandFactory, Parser, Subcommand};

pub mod commands;
mod output;

pub use output::Output;

/// sitesieve - narrow RNA editing candidates with tracked filter lineage
#[derive(Parser)]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Configuration file path (toml, json or yaml)
    #[arg(short, long, value_name = "FILE", global = true)]
    pub config: Option<std::path::PathBuf>,

    /// Increase verbosity (can be repeated)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress non-error output
    #[arg(short, long, global = true)]
    pub quiet: bool,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// List available filters with their options
    Filters,
    /// Load sites and run a chain of filters over them
    Run(commands::run::RunArgs),
    /// Print the lineage tree stored in a project file
    Tree(commands::tree::TreeArgs),
    /// Configuration management
    #[command(subcommand)]
    Config(ConfigCommands),
}

/// Configuration subcommands
#[derive(Subcommand)]
pub enum ConfigCommands {
    /// Show the merged configuration
    Show {
        /// Output format (toml, json, yaml)
        #[arg(long, default_value = "toml")]
        format: String,
    },
    /// Validate the merged configuration
    Validate,
}

impl Cli {
    /// Execute the CLI command
    pub async fn run(self) -> Result<()> {
        setup_logging(self.verbose, self.quiet);
        let output = Output::new(self.verbose > 0, self.quiet);
        let config = self.config.as_deref();

        match self.command {
            Some(Commands::Filters) => commands::filters::execute(&output),
            Some(Commands::Run(args)) => commands::run::execute(args, config, &output).await,
            Some(Commands::Tree(args)) => commands::tree::execute(args, &output),
            Some(Commands::Config(cmd)) => commands::config::execute(cmd, config, &output),
            None => {
                let mut cmd = Cli::command();
                cmd.print_help()?;
                Ok(())
            }
        }
    }
}

fn setup_logging(verbose: u8, quiet: bool) {
    if quiet {
        return;
    }

    let filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        match verbose {
            0 => tracing_subscriber::EnvFilter::new("warn"),
            1 => tracing_subscriber::EnvFilter::new("info"),
            2 => tracing_subscriber::EnvFilter::new("debug"),
            _ => tracing_subscriber::EnvFilter::new("trace"),
        }
    });

    // Progress bars own stdout, so logs go to stderr
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .try_init();
}
