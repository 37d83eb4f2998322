use anyhow::{Context, Result, anyhow};
use clap::{Parser, Subcommand};
use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::PathBuf;
use std::sync::Mutex;
use tokio::time::Duration;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

mod app;
mod config;
mod events;
mod llm;
mod session;
mod transcript;
mod tui;
mod ui;

use app::App;
use config::{Config, LogConfig};
use llm::{CompletionProvider, EchoProvider, LlmClient};
use session::{ChatSession, StreamUpdate};

#[derive(Parser)]
#[command(name = "chatline")]
#[command(version)]
#[command(about = "Minimal streaming chat client for the terminal", long_about = None)]
struct Cli {
    /// Config file (defaults to ~/.chatline/config.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Override the configured model
    #[arg(long, global = true)]
    model: Option<String>,

    /// Override the provider base URL
    #[arg(long, global = true)]
    base_url: Option<String>,

    /// Use the offline echo provider instead of the network
    #[arg(long, global = true)]
    offline: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Send one prompt and print the streamed reply
    Ask { prompt: String },
    /// Write a default config file
    Init {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
}

enum LogSink {
    File(PathBuf),
    Stderr,
}

fn init_logging(config: &LogConfig, sink: LogSink) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.filter))
        .context("Invalid log filter")?;

    match sink {
        LogSink::File(path) => {
            if let Some(parent) = path.parent() {
                fs::create_dir_all(parent).context("Failed to create log directory")?;
            }
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(&path)
                .with_context(|| format!("Failed to open log file {}", path.display()))?;
            tracing_subscriber::registry()
                .with(fmt::layer().with_writer(Mutex::new(file)).with_ansi(false))
                .with(filter)
                .init();
        }
        LogSink::Stderr => {
            tracing_subscriber::registry()
                .with(fmt::layer().with_writer(io::stderr).with_target(false))
                .with(filter)
                .init();
        }
    }
    Ok(())
}

fn load_config(cli: &Cli) -> Result<Config> {
    let mut config = match &cli.config {
        Some(path) => Config::load_from(path)?,
        None => Config::load()?,
    };
    if let Some(model) = &cli.model {
        config.provider.model = model.clone();
    }
    if let Some(base_url) = &cli.base_url {
        config.provider.base_url = base_url.clone();
    }
    Ok(config)
}

async fn run_tui<P: CompletionProvider>(config: &Config, provider: P) -> Result<()> {
    let mut app = App::new(ChatSession::new(provider), config.ui.placeholder.clone());
    let tick_rate = Duration::from_millis(config.ui.tick_rate_ms.max(1));

    let mut terminal = tui::init()?;
    let result = app.run(&mut terminal, tick_rate).await;
    tui::restore()?;
    result
}

async fn ask<P: CompletionProvider>(provider: P, prompt: String) -> Result<()> {
    let mut session = ChatSession::new(provider);
    session.update_draft(prompt);
    session.submit().context("Nothing to send")?;

    let mut stdout = io::stdout();
    while let Some(update) = session.next_update().await {
        match update {
            StreamUpdate::Fragment(fragment) => {
                write!(stdout, "{}", fragment)?;
                stdout.flush()?;
            }
            StreamUpdate::Completed(_) => writeln!(stdout)?,
            StreamUpdate::Failed(message) => return Err(anyhow!("Completion failed: {}", message)),
        }
    }
    Ok(())
}

fn init_config(cli: &Cli, force: bool) -> Result<()> {
    let path = match &cli.config {
        Some(path) => path.clone(),
        None => config::default_config_path()?,
    };
    if path.exists() && !force {
        println!("Config already exists at {} (use --force to overwrite)", path.display());
        return Ok(());
    }
    Config::default().save_to(&path)?;
    println!("Wrote default config to {}", path.display());
    Ok(())
}

fn echo_provider(config: &Config) -> EchoProvider {
    EchoProvider::new(Duration::from_millis(config.ui.echo_delay_ms))
}

fn llm_client(config: &Config) -> Result<LlmClient> {
    LlmClient::new(config.provider.clone(), config.system_prompt.clone())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match &cli.command {
        Some(Commands::Init { force }) => init_config(&cli, *force),
        Some(Commands::Ask { prompt }) => {
            let config = load_config(&cli)?;
            init_logging(&config.log, LogSink::Stderr)?;
            let prompt = prompt.clone();
            if cli.offline {
                ask(echo_provider(&config), prompt).await
            } else {
                ask(llm_client(&config)?, prompt).await
            }
        }
        None => {
            let config = load_config(&cli)?;
            init_logging(&config.log, LogSink::File(config.log_file()?))?;
            if cli.offline {
                run_tui(&config, echo_provider(&config)).await
            } else {
                run_tui(&config, llm_client(&config)?).await
            }
        }
    }
}
