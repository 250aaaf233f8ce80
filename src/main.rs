//! Main module for the docqa CLI.
//!
//! Parses the command line, loads configuration, and runs the chosen command.
//!
//! # Examples
//!
//! Serving the question page:
//!
//! ```sh
//! OPENAI_API_KEY=sk-... docqa serve
//! ```
//!
//! Asking one question from the terminal:
//!
//! ```sh
//! docqa ask "What is the TIN format?"
//! ```
//!
//! Writing the default configuration and prompt template:
//!
//! ```sh
//! docqa init
//! ```

use std::error::Error;
use std::fs;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use indicatif::{ProgressBar, ProgressStyle};
use once_cell::sync::OnceCell;
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

use docqa::commands::{Cli, Commands};
use docqa::config::{self, DocQaConfig};
use docqa::config_dir;
use docqa::error::QaError;
use docqa::pipeline::AppContext;
use docqa::pretty::print_answer;
use docqa::server::{AppState, handle_query, start_http_server};
use docqa::template::ChatTemplate;

static TRACING: OnceCell<()> = OnceCell::new();

fn main() -> Result<(), Box<dyn Error>> {
    TRACING.get_or_init(|| {
        let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .init();
    });
    let runtime = tokio::runtime::Runtime::new()?;
    runtime.block_on(run())?;
    Ok(())
}

async fn run() -> Result<(), QaError> {
    let cli = Cli::parse();

    if let Commands::Init = cli.command {
        debug!("Initializing configuration");
        return init();
    }

    let mut config = resolve_config(cli.config.as_ref())?;
    cli.apply_overrides(&mut config);
    debug!("Config loaded: pdf_path = {}", config.pdf_path.display());

    match cli.command {
        Commands::Serve => serve(config).await,
        Commands::Ask { question } => ask(config, &question).await,
        Commands::Index => index(config).await,
        Commands::Init => Ok(()),
    }
}

/// An explicit `--config` must exist; the default location may be absent.
fn resolve_config(explicit: Option<&PathBuf>) -> Result<DocQaConfig, QaError> {
    if let Some(path) = explicit {
        return config::load_config(&path.to_string_lossy());
    }

    let path = config_dir()?.join("config.yaml");
    if path.exists() {
        config::load_config(&path.to_string_lossy())
    } else {
        info!("No config at {}, using defaults", path.display());
        Ok(DocQaConfig::default())
    }
}

fn spinner(message: &str) -> ProgressBar {
    let bar = ProgressBar::new_spinner().with_style(
        ProgressStyle::with_template("{spinner} {msg} [{elapsed}]")
            .unwrap_or_else(|_| ProgressStyle::default_spinner()),
    );
    bar.set_message(message.to_string());
    bar.enable_steady_tick(Duration::from_millis(120));
    bar
}

async fn serve(config: DocQaConfig) -> Result<(), QaError> {
    let bind: SocketAddr = config
        .bind
        .parse()
        .map_err(|e| QaError::Configuration(format!("invalid bind address {}: {e}", config.bind)))?;
    let ctx = AppContext::from_config(config)?;

    let bar = spinner("Indexing document");
    let built = ctx.pipeline().await;
    bar.finish_and_clear();
    let pipeline = built?;
    info!("Indexed {} segments", pipeline.segment_count());

    let state = Arc::new(AppState::new(ctx)?);
    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
    let handle = start_http_server(bind, state, shutdown_rx).await?;
    println!("Serving on http://{bind} (Ctrl-C to stop)");

    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("Cannot listen for Ctrl-C: {}", e);
    }
    info!("Shutting down");
    let _ = shutdown_tx.send(true);
    if let Err(e) = handle.await {
        warn!("Server task ended abnormally: {}", e);
    }
    Ok(())
}

async fn ask(config: DocQaConfig, question: &str) -> Result<(), QaError> {
    if question.trim().is_empty() {
        return Ok(());
    }
    let ctx = AppContext::from_config(config)?;

    let bar = spinner("Reading the document");
    let answered = handle_query(&ctx, question).await;
    bar.finish_and_clear();

    if let Some(answer) = answered? {
        print_answer(&answer)?;
    }
    Ok(())
}

async fn index(config: DocQaConfig) -> Result<(), QaError> {
    let index_file = config.index_file();
    let ctx = AppContext::from_config(config)?;

    let bar = spinner("Indexing document");
    let written = ctx.write_index().await;
    bar.finish_and_clear();

    println!("Indexed {} segments into {}", written?, index_file.display());
    Ok(())
}

fn write_err(path: &Path, e: std::io::Error) -> QaError {
    QaError::Configuration(format!("cannot write {}: {e}", path.display()))
}

/// Write a default config and prompt template under the config directory.
///
/// Existing files are left untouched.
fn init() -> Result<(), QaError> {
    let dir = config_dir()?;
    let templates = dir.join("templates");
    info!("Creating template directory: {}", templates.display());
    fs::create_dir_all(&templates).map_err(|e| write_err(&templates, e))?;

    let template_path = templates.join("qa.yaml");
    if template_path.exists() {
        warn!("{} exists, leaving it alone", template_path.display());
    } else {
        info!("Creating template file: {}", template_path.display());
        let yaml = serde_yaml::to_string(&ChatTemplate::default())
            .map_err(|e| QaError::Configuration(format!("cannot serialize template: {e}")))?;
        fs::write(&template_path, yaml).map_err(|e| write_err(&template_path, e))?;
    }

    let config_path = dir.join("config.yaml");
    if config_path.exists() {
        warn!("{} exists, leaving it alone", config_path.display());
    } else {
        info!("Creating config file: {}", config_path.display());
        let config = DocQaConfig {
            api_key: "CHANGEME".to_string(),
            template_path: Some(template_path),
            ..DocQaConfig::default()
        };
        let yaml = serde_yaml::to_string(&config)
            .map_err(|e| QaError::Configuration(format!("cannot serialize config: {e}")))?;
        fs::write(&config_path, yaml).map_err(|e| write_err(&config_path, e))?;
    }

    println!("Configuration written to {}", dir.display());
    Ok(())
}
