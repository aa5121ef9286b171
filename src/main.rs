use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use medbot_channels::CliChannel;
use medbot_core::ChatLoop;
use medbot_core::bootstrap::{self, AppBuilder};
use medbot_core::session::Session;
use medbot_core::vault::EnvVaultProvider;
use medbot_memory::SessionId;
use medbot_memory::document::{IndexBuilder, TextSplitter};
use tokio::sync::watch;

#[derive(Debug, Parser)]
#[command(
    name = "medbot",
    version,
    about = "Medical reference chatbot over a local document index"
)]
struct Cli {
    /// Path to the TOML config file (default: $MEDBOT_CONFIG or config/default.toml).
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Interactive terminal chat (default).
    Chat {
        /// List the source documents under each answer.
        #[arg(long)]
        sources: bool,
    },
    /// Build the vector index from a directory of text documents.
    Index {
        #[arg(long)]
        docs: Option<PathBuf>,
        #[arg(long)]
        out: Option<PathBuf>,
    },
    /// Serve the HTTP chat API.
    #[cfg(feature = "gateway")]
    Serve,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    let command = cli.command.unwrap_or(Command::Chat { sources: false });
    let config_path = bootstrap::resolve_config_path(cli.config);

    let app = AppBuilder::load(config_path, &EnvVaultProvider)
        .await
        .context("failed to load configuration")?;
    init_subscriber(
        matches!(command, Command::Chat { .. }).then_some(app.config().app.log_file.as_str()),
    );
    app.log_summary();

    match command {
        Command::Chat { sources } => run_chat(&app, sources).await,
        Command::Index { docs, out } => run_index(&app, docs, out).await,
        #[cfg(feature = "gateway")]
        Command::Serve => run_gateway(&app).await,
    }
}

async fn run_chat(app: &AppBuilder, show_sources: bool) -> anyhow::Result<()> {
    let embedder = app.build_embedder()?;
    let index = app.load_index(&embedder).context("failed to load the vector index")?;
    let (provider, status_rx) = app.build_provider().await?;
    let pipeline = Arc::new(app.build_pipeline(provider, embedder, index));

    let (shutdown_tx, shutdown_rx) = AppBuilder::build_shutdown();
    spawn_ctrl_c(shutdown_tx);

    let session = Session::new(SessionId::generate(), pipeline);
    tracing::info!(session = %session.id(), "chat session started");
    println!(
        "{} is ready. Ask a medical question, or type /help.",
        app.config().app.name
    );

    let mut chat = ChatLoop::new(CliChannel::new(), session, shutdown_rx)
        .with_status_rx(status_rx)
        .with_sources(show_sources);
    chat.run().await?;
    Ok(())
}

async fn run_index(
    app: &AppBuilder,
    docs: Option<PathBuf>,
    out: Option<PathBuf>,
) -> anyhow::Result<()> {
    let config = app.config();
    let docs = docs.unwrap_or_else(|| PathBuf::from(&config.index.docs_dir));
    let out = out.unwrap_or_else(|| PathBuf::from(&config.index.path));

    let embedder = app.build_embedder()?;
    let splitter = TextSplitter::new(app.splitter_config());
    let index = IndexBuilder::new(&embedder, splitter)
        .build_and_save(&docs, &out)
        .await
        .with_context(|| format!("failed to build index from {}", docs.display()))?;

    println!(
        "Indexed {} chunks ({} dimensions, {}) into {}",
        index.len(),
        index.dimension(),
        index.embedding_model(),
        out.display()
    );
    Ok(())
}

#[cfg(feature = "gateway")]
async fn run_gateway(app: &AppBuilder) -> anyhow::Result<()> {
    use medbot_core::session::SessionManager;
    use medbot_gateway::GatewayServer;
    use tokio_util::sync::CancellationToken;

    let gw = &app.config().gateway;
    if !gw.enabled {
        anyhow::bail!(
            "gateway is disabled: set gateway.enabled = true or MEDBOT_GATEWAY_ENABLED=true"
        );
    }

    let embedder = app.build_embedder()?;
    let index = app.load_index(&embedder).context("failed to load the vector index")?;
    let (provider, mut status_rx) = app.build_provider().await?;
    let pipeline = Arc::new(app.build_pipeline(provider, embedder, index));

    // no one to show rate-limit waits to, keep them in the log
    tokio::spawn(async move {
        while let Some(status) = status_rx.recv().await {
            tracing::info!("{status}");
        }
    });

    let (shutdown_tx, shutdown_rx) = AppBuilder::build_shutdown();
    spawn_ctrl_c(shutdown_tx);

    let cancel = CancellationToken::new();
    let manager = Arc::new(SessionManager::new(pipeline, cancel.clone()));

    let server = GatewayServer::new(&gw.bind, gw.port, manager, shutdown_rx)
        .with_auth(gw.auth_token.clone())
        .with_rate_limit(gw.rate_limit)
        .with_max_body_size(gw.max_body_size);
    let result = server.serve().await;
    cancel.cancel();
    result?;
    Ok(())
}

fn spawn_ctrl_c(shutdown_tx: watch::Sender<bool>) {
    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("failed to listen for ctrl-c: {e:#}");
            return;
        }
        tracing::info!("received shutdown signal");
        let _ = shutdown_tx.send(true);
    });
}

/// Log to `log_file` when the terminal belongs to the chat, otherwise to stderr.
fn init_subscriber(log_file: Option<&str>) {
    use tracing_subscriber::layer::SubscriberExt;
    use tracing_subscriber::util::SubscriberInitExt;

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));

    if let Some(path) = log_file {
        match std::fs::File::create(path) {
            Ok(file) => {
                tracing_subscriber::registry()
                    .with(filter)
                    .with(
                        tracing_subscriber::fmt::layer()
                            .with_ansi(false)
                            .with_writer(Arc::new(file)),
                    )
                    .init();
                return;
            }
            Err(e) => eprintln!("cannot open log file {path}: {e}, logging to stderr"),
        }
    }

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}
