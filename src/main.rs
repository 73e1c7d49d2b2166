use axum::http::{HeaderValue, Method};
use std::net::SocketAddr;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use gastos_backend::{build_router, config::Config, db, services, AppState};

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,gastos_backend=debug".into()),
        )
        .init();

    let config = Config::from_env();
    tracing::info!("Starting gastos backend...");

    let pool = db::init_pool(&config.database_url)
        .await
        .expect("Failed to create database pool");

    db::run_migrations(&pool)
        .await
        .expect("Failed to run migrations");

    tracing::info!("Connected to SQLite at {}", config.database_url);

    // Audit drainer: one process-wide queue, one consumer task
    let (audit, _audit_worker) = services::audit::spawn_audit_worker(pool.clone());

    // Generator: single-instance tick loop
    let _generator = services::generator::spawn_generator(
        pool.clone(),
        audit.clone(),
        config.generator_interval_hours,
    );

    let methods = [
        Method::GET,
        Method::POST,
        Method::PUT,
        Method::PATCH,
        Method::DELETE,
    ];
    let cors = if config.allowed_origins.is_empty() {
        CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(methods)
            .allow_headers(Any)
    } else {
        let origins: Vec<HeaderValue> = config
            .allowed_origins
            .iter()
            .filter_map(|origin| origin.parse().ok())
            .collect();
        CorsLayer::new()
            .allow_origin(origins)
            .allow_methods(methods)
            .allow_headers(Any)
    };

    let state = AppState {
        pool,
        jwt_secret: config.jwt_secret.clone(),
        audit,
        config: config.clone(),
    };

    let app = build_router(state)
        .layer(TraceLayer::new_for_http())
        .layer(cors);

    let addr: SocketAddr = config
        .server_addr
        .parse()
        .expect("SERVER_ADDR must be host:port");

    tracing::info!("Server running on http://{}", addr);

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .expect("Failed to bind server address");
    axum::serve(listener, app)
        .await
        .expect("Server terminated unexpectedly");
}
