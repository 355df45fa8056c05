use axum::http::Method;
use reqwest::Client;
use std::net::SocketAddr;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tower_http::cors::CorsLayer;
use tracing_subscriber::EnvFilter;

use order_events_rs::broadcaster::Broadcaster;
use order_events_rs::config::Config;
use order_events_rs::routes::{router, AppState};
use order_events_rs::{consumer, db, dispatcher};

const BROADCAST_BUFFER: usize = 256;
const OUTBOUND_BUCKET_CAPACITY: u32 = 2;
const OUTBOUND_BUCKET_REFILL_PER_SEC: u32 = 2;

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let config = Config::from_env().unwrap_or_else(|err| {
        tracing::error!(error = %err, "failed to load configuration");
        std::process::exit(1);
    });

    tracing::info!(host = %config.host, port = config.port, "starting order-events service");

    let pool = db::init_pool(&config.database_url).await.unwrap_or_else(|err| {
        tracing::error!(error = %err, "failed to connect to database");
        std::process::exit(1);
    });

    sqlx::migrate!("./db/migrations")
        .run(&pool)
        .await
        .unwrap_or_else(|err| {
            tracing::error!(error = %err, "failed to run database migrations");
            std::process::exit(1);
        });

    tracing::info!("database migrations applied");

    let broadcaster = Broadcaster::new(BROADCAST_BUFFER);
    let shutdown_token = CancellationToken::new();

    for worker_id in 0..config.ingest_consumer_workers {
        let worker_pool = pool.clone();
        let worker_broadcaster = broadcaster.clone();
        let max_read_count = config.queue_max_read_count;
        let worker_shutdown = shutdown_token.clone();
        tokio::spawn(async move {
            consumer::run(worker_pool, worker_broadcaster, worker_id, max_read_count, worker_shutdown).await;
        });
    }
    tracing::info!(workers = config.ingest_consumer_workers, "ingest consumer started");

    let http_client = Client::new();
    let rate_limiter = dispatcher::RateLimiter::new(OUTBOUND_BUCKET_CAPACITY, OUTBOUND_BUCKET_REFILL_PER_SEC);
    {
        let dispatcher_pool = pool.clone();
        let dispatcher_client = http_client.clone();
        let upstream_base_url = config.upstream_base_url.clone();
        let limiter = rate_limiter.clone();
        let max_read_count = config.queue_max_read_count;
        let dispatcher_shutdown = shutdown_token.clone();
        tokio::spawn(async move {
            dispatcher::run(dispatcher_pool, dispatcher_client, upstream_base_url, limiter, 0, max_read_count, dispatcher_shutdown).await;
        });
    }
    tracing::info!(upstream = %config.upstream_base_url, "outbound dispatcher started");

    let cors = CorsLayer::new()
        .allow_origin(tower_http::cors::Any)
        .allow_methods([Method::GET, Method::POST])
        .allow_headers(tower_http::cors::Any);

    let state = AppState { db: pool, broadcaster };
    let app = router(state).layer(cors);

    let addr: SocketAddr = format!("{}:{}", config.host, config.port)
        .parse()
        .unwrap_or_else(|err| {
            tracing::error!(error = %err, "invalid host:port");
            std::process::exit(1);
        });

    tracing::info!(%addr, "order-events service listening");

    let listener = tokio::net::TcpListener::bind(addr).await.unwrap_or_else(|err| {
        tracing::error!(error = %err, "failed to bind address");
        std::process::exit(1);
    });

    let shutdown = {
        let shutdown_token = shutdown_token.clone();
        async move {
            tokio::signal::ctrl_c()
                .await
                .expect("failed to install Ctrl+C handler");
            tracing::info!("shutdown signal received, draining in-flight requests");
            shutdown_token.cancel();
        }
    };

    if let Err(err) = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await
    {
        tracing::error!(error = %err, "server error");
        std::process::exit(1);
    }

    tokio::time::sleep(Duration::from_millis(50)).await;
    std::process::exit(130);
}
