use equipment_server::shutdown::{drain_with_grace, stopped, wait_for_shutdown_signal};
use equipment_server::{config, http};

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let config = match config::ServerConfig::load() {
        Ok(cfg) => cfg,
        Err(err) => {
            eprintln!("STARTUP_ERROR {}", err);
            std::process::exit(1);
        }
    };

    let state = match http::AppState::init(config.clone()).await {
        Ok(state) => state,
        Err(err) => {
            eprintln!("STARTUP_ERROR {}", err);
            std::process::exit(1);
        }
    };
    let store = state.store().clone();
    let app = http::router_with_state(state);

    let listener = match tokio::net::TcpListener::bind(config.bind_addr).await {
        Ok(listener) => listener,
        Err(_) => {
            eprintln!("STARTUP_ERROR ERR_BIND_FAILED: failed to bind equipment-server listener");
            std::process::exit(1);
        }
    };

    tracing::info!(
        bind_addr = %config.bind_addr,
        retention_limit = config.retention_limit,
        "equipment-server listening"
    );

    let (stop_tx, stop_rx) = tokio::sync::watch::channel(false);
    tokio::spawn(async move {
        wait_for_shutdown_signal().await;
        tracing::info!("shutdown signal received; draining");
        let _ = stop_tx.send(true);
    });

    let serve = axum::serve(listener, app)
        .with_graceful_shutdown(stopped(stop_rx.clone()))
        .into_future();

    let exit_code = match drain_with_grace(serve, stopped(stop_rx), config.shutdown_grace()).await
    {
        Some(Ok(())) => 0,
        Some(Err(err)) => {
            eprintln!("STARTUP_ERROR ERR_SERVER_FAILED: {}", err);
            1
        }
        None => {
            tracing::warn!(
                grace_ms = config.shutdown_grace_ms,
                "in-flight requests still running after shutdown grace"
            );
            0
        }
    };

    store.close().await;
    tracing::info!("equipment-server stopped");
    std::process::exit(exit_code);
}
