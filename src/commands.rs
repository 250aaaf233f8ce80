//! Command-line interface, parsed with `clap`.
//!
//! # Examples
//!
//! ```no_run
//! use clap::Parser;
//! use docqa::commands::{Cli, Commands};
//!
//! let cli = Cli::parse();
//! match cli.command {
//!     Commands::Serve => { /* start the web UI */ }
//!     Commands::Ask { question } => println!("asking {question}"),
//!     Commands::Index => { /* build and save the index */ }
//!     Commands::Init => { /* write default config */ }
//! }
//! ```

use std::path::PathBuf;

use clap::{Parser, Subcommand};

use crate::config::DocQaConfig;

/// Parsed command-line arguments.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None, propagate_version = true, color = clap::ColorChoice::Always)]
pub struct Cli {
    /// Path to a YAML config file (default: `config.yaml` in the config directory).
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// OpenAI API key; overrides the config file.
    #[arg(long = "api-key", env = "OPENAI_API_KEY", global = true, hide_env_values = true)]
    pub api_key: Option<String>,

    /// PDF to answer questions about; overrides `pdf_path`.
    #[arg(long, global = true)]
    pub pdf: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
#[command(about, long_about = None, color = clap::ColorChoice::Always)]
pub enum Commands {
    /// Index the document, then serve the question page until Ctrl-C.
    #[clap(name = "serve", alias = "s")]
    Serve,

    /// Ask one question from the terminal.
    #[clap(name = "ask", alias = "a")]
    Ask {
        /// The question. Empty input prints nothing.
        question: String,
    },

    /// Build the index and save it to `vector_store_path`.
    Index,

    /// Write a default config file and prompt template.
    Init,
}

impl Cli {
    /// Apply the command-line overrides on top of a loaded config.
    pub fn apply_overrides(&self, config: &mut DocQaConfig) {
        if let Some(key) = &self.api_key {
            config.api_key = key.clone();
        }
        if let Some(pdf) = &self.pdf {
            config.pdf_path = pdf.clone();
        }
    }
}
