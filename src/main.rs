mod config;
mod error;
mod index;
mod model;
mod routes;
mod server;
mod settings;
mod state;
mod store;
mod tools;

use clap::Parser;
use std::path::Path;
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use config::{CliArgs, Command, FeedbackConfig};
use state::{FeedbackState, SharedState};
use tools::ToolServer;

/// Logs always go to stderr (stdout carries the tool protocol), plus a
/// daily rolling file when a log directory is configured.
fn init_tracing(log_dir: Option<&Path>) -> Option<tracing_appender::non_blocking::WorkerGuard> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "qontinui_feedback=info,tower_http=info".into());
    let stderr_layer = tracing_subscriber::fmt::layer().with_writer(std::io::stderr);

    let (file_layer, guard) = match log_dir {
        Some(dir) => {
            let appender = tracing_appender::rolling::daily(dir, "qontinui-feedback.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = tracing_subscriber::fmt::layer()
                .with_ansi(false)
                .with_writer(writer);
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(stderr_layer)
        .with(file_layer)
        .init();
    guard
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = CliArgs::parse();
    let _log_guard = init_tracing(args.log_dir.as_deref());

    info!("Starting qontinui-feedback v{}", env!("CARGO_PKG_VERSION"));
    info!("Data dir: {:?}", args.data_dir);

    std::fs::create_dir_all(&args.data_dir)?;
    let settings = settings::load_or_init(&config::settings_path(&args.data_dir));
    let command = args
        .command
        .clone()
        .unwrap_or(Command::Serve { with_tools: false });
    let config = FeedbackConfig::from_args(args, &settings);

    match command {
        Command::RebuildIndex => {
            // Opening the store performs the rebuild.
            let state = FeedbackState::open(config)?;
            let summary = state.store.summary()?;
            println!("{}", serde_json::to_string_pretty(&summary)?);
            Ok(())
        }
        Command::Tools => {
            let state = FeedbackState::shared(config)?;
            Arc::new(ToolServer::new(state)).serve_stdio().await
        }
        Command::Serve { with_tools } => serve(FeedbackState::shared(config)?, with_tools).await,
    }
}

async fn serve(state: SharedState, with_tools: bool) -> anyhow::Result<()> {
    if with_tools {
        let tool_server = Arc::new(ToolServer::new(state.clone()));
        tokio::spawn(async move {
            if let Err(e) = tool_server.serve_stdio().await {
                error!("Tool interface stopped with error: {}", e);
            }
        });
    }

    let addr = state.config.listen_addr();
    let router = server::build_router(state.clone());
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!("Ingestion interface listening on http://{}", addr);

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("qontinui-feedback shutting down");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Failed to listen for Ctrl+C: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Received shutdown signal");
}
