use std::sync::Arc;

use clap::Parser;
use tcp_port_exporter::{
    build_app,
    config::{Cli, Config},
    domain::probe::ProbeEngine,
    logging,
    network_client::{SystemResolver, TcpProber},
    AppState,
};
use tracing::info;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    let config = Config::load(&cli)?;
    logging::init_logging(&config.log);

    let items = config.build_items()?;
    let engine = ProbeEngine::new(
        items,
        Arc::new(SystemResolver::new(config.resolve_timeout)?),
        Arc::new(TcpProber::new()),
        config.connection_timeout,
    );
    let state = AppState::new(engine, config.metrics_path.clone());
    let app = build_app(state);
    let listener = tokio::net::TcpListener::bind(config.listen_socket().await?).await?;

    info!(
        listen_addr = %config.listen_addr,
        metrics_path = %config.metrics_path,
        connection_timeout_ms = config.connection_timeout.as_millis(),
        "exporter starting"
    );

    axum::serve(listener, app.into_make_service()).await?;
    Ok(())
}
