use anyhow::{Context, Result};
use clap::Parser;
use dotenvy::dotenv;
use natural_browser::hands::chrome::{ChromeSession, LaunchConfig};
use natural_browser::{AutoContext, ModelConfig, NaturalBrowser, Page};
use std::io::BufRead;
use std::path::PathBuf;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

/// Run Spanish browser commands such as "abre example.com y pulsa Entrar".
#[derive(Parser, Debug)]
#[command(name = "agent", version)]
struct Cli {
    /// Commands to run in order. Read one per line from stdin when omitted.
    commands: Vec<String>,

    /// Page to open before the first command.
    #[arg(long)]
    url: Option<String>,

    /// Model name; overrides AI_MODEL.
    #[arg(long)]
    model: Option<String>,

    /// OpenAI-compatible endpoint; overrides OPENAI_BASE_URL.
    #[arg(long)]
    base_url: Option<String>,

    /// Run Chrome without a window.
    #[arg(long)]
    headless: bool,

    /// Chrome profile directory.
    #[arg(long)]
    profile_dir: Option<PathBuf>,

    /// DevTools endpoint of a running Chrome to attach to.
    #[arg(long, default_value = "http://127.0.0.1:9222")]
    attach: String,

    /// Always launch a new Chrome instead of attaching.
    #[arg(long)]
    launch: bool,

    /// Name attached to every log line of this run.
    #[arg(long)]
    test: Option<String>,

    /// Log at debug level; same as DEBUG_MODE=true.
    #[arg(long)]
    debug: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv().ok();
    let cli = Cli::parse();

    let mut config = ModelConfig::from_env();
    if let Some(model) = &cli.model {
        config = config.with_model(model.clone());
    }
    if let Some(base_url) = &cli.base_url {
        config = config.with_base_url(base_url.clone());
    }
    if cli.debug {
        config = config.with_debug(true);
    }
    init_tracing(config.debug);

    let launch = LaunchConfig {
        headless: cli.headless,
        profile_dir: cli.profile_dir.clone(),
        attach_ws_url: (!cli.launch).then(|| cli.attach.clone()),
        ..LaunchConfig::default()
    };
    info!("Launching Chrome...");
    let session = tokio::task::spawn_blocking(move || ChromeSession::launch(&launch))
        .await
        .context("browser launch panicked")??;
    let page = session.page()?;

    if let Some(url) = &cli.url {
        page.goto(url).await.with_context(|| format!("cannot open {url}"))?;
    }

    let commands = if cli.commands.is_empty() {
        read_stdin_commands()?
    } else {
        cli.commands.clone()
    };

    let mut runner = NaturalBrowser::new(config);
    let mut page = page;
    let mut failures = 0;
    for command in &commands {
        let ctx = AutoContext {
            page: page.clone(),
            test: cli.test.as_deref(),
        };
        match runner.run(command, ctx).await {
            Ok(Some(value)) => println!("{value}"),
            Ok(None) => {}
            Err(e) => {
                error!("{}", e);
                failures += 1;
            }
        }
        if let Some(last) = runner.last_page() {
            page = last.clone();
        }
    }

    if failures > 0 {
        anyhow::bail!("{failures} of {} command(s) failed", commands.len());
    }
    Ok(())
}

fn init_tracing(debug: bool) {
    let default = if debug { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default)),
        )
        .with_writer(std::io::stderr)
        .init();
}

fn read_stdin_commands() -> Result<Vec<String>> {
    let mut commands = Vec::new();
    for line in std::io::stdin().lock().lines() {
        let line = line.context("cannot read stdin")?;
        if !line.trim().is_empty() {
            commands.push(line);
        }
    }
    Ok(commands)
}
