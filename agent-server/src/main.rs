//! Agent server - WebSocket sessions for running goals plus a small HTTP API.

mod routes;
mod state;
mod ws;

use std::net::SocketAddr;
use std::path::PathBuf;

use agent::io::config::{DEFAULT_CONFIG_PATH, load_config};
use axum::Router;
use axum::routing::get;
use clap::Parser;
use tower_http::cors::{Any, CorsLayer};
use tower_http::services::ServeDir;
use tracing::info;

use crate::state::AppState;

#[derive(Parser)]
#[command(name = "agent-server")]
#[command(about = "WebSocket server for the task-execution agent")]
struct Args {
    /// Path to the TOML config file
    #[arg(long, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    /// Address to bind the server to (overrides config)
    #[arg(long)]
    bind: Option<String>,

    /// Port to listen on (overrides config)
    #[arg(long)]
    port: Option<u16>,

    /// Directory containing frontend static files (overrides config)
    #[arg(long)]
    frontend_dir: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("agent_server=info".parse()?),
        )
        .init();

    let args = Args::parse();
    let config = load_config(&args.config)?;
    let bind = args.bind.unwrap_or_else(|| config.server.bind.clone());
    let port = args.port.unwrap_or(config.server.port);
    let frontend_dir = args.frontend_dir.or_else(|| config.server.frontend_dir.clone());
    info!(
        endpoint = %config.llm.endpoint,
        planner_model = %config.llm.planner_model,
        "starting agent-server"
    );

    let state = AppState::new(config);

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let mut app = Router::new()
        .nest("/api", routes::api_router())
        .route("/ws", get(ws::ws_handler))
        .layer(cors)
        .with_state(state);

    match frontend_dir {
        Some(dir) if dir.exists() => {
            info!(frontend_dir = %dir.display(), "serving static frontend");
            app = app.fallback_service(ServeDir::new(dir).append_index_html_on_directories(true));
        }
        Some(dir) => {
            info!(frontend_dir = %dir.display(), "frontend directory not found, API-only mode");
        }
        None => info!("no frontend directory configured, API-only mode"),
    }

    let addr: SocketAddr = format!("{bind}:{port}").parse()?;
    info!(addr = %addr, "listening");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
