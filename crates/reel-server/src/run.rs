use crate::config::ServerConfig;
use crate::error::Result;
use axum::Router;
use futures::FutureExt;
use reel_app::state::{AppConfig, AppState};
use tracing::info;

pub async fn run(args: ServerConfig) -> Result<()> {
    let state = build_state(&args).await?;
    run_with_state(args, state).await
}

pub async fn run_with_state(args: ServerConfig, state: AppState) -> Result<()> {
    let shutdown = tokio::signal::ctrl_c().map(|_| ());
    run_graceful_with_state(args, state, shutdown).await
}

pub async fn run_graceful_with_state<S>(
    args: ServerConfig,
    state: AppState,
    shutdown_signal: S,
) -> Result<()>
where
    S: std::future::Future<Output = ()> + Send + 'static,
{
    let mut app = main_router(state);

    if args.cors {
        app = app.layer(tower_http::cors::CorsLayer::very_permissive());
    }

    let ip: std::net::IpAddr = args.listen_address.parse()?;
    let addr = std::net::SocketAddr::from((ip, args.port));
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!(
        "Listening on {} in {} environment",
        listener.local_addr()?,
        args.environment
    );

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal)
        .await?;

    info!("Server stopped");
    Ok(())
}

pub fn main_router(state: AppState) -> Router<()> {
    reel_app::router(state)
}

pub async fn build_state(config: &ServerConfig) -> Result<AppState> {
    let data_dir = config.data_dir();
    if !tokio::fs::try_exists(&data_dir).await? {
        tokio::fs::create_dir_all(&data_dir).await?;
        info!("Created data directory {}", data_dir.display());
    } else if !data_dir.is_dir() {
        anyhow::bail!("Data directory {} is not a directory", data_dir.display());
    }

    let app_config: AppConfig = config.into();
    let pool =
        reel_dal::new_pool_with_size(&config.database_url(), config.db_max_connections).await?;
    info!("Database connection pool established");
    Ok(AppState::new(app_config, pool))
}
