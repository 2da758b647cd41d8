mod config;

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use guardian_api::analytics::spawn_worker;
use guardian_api::auth::{ApiConfig, AppState, AppStateInner};
use guardian_api::entitlement::{EntitlementGate, SubscriptionGate, Unmetered};
use guardian_db::Database;
use guardian_llm::{Generator, GeneratorTopicExtractor, OpenAiConfig, OpenAiGenerator};

use crate::config::Config;

const LLM_CONNECT_TIMEOUT_SECS: u64 = 10;
const LLM_READ_TIMEOUT_SECS: u64 = 120;
const WORKER_DRAIN_SECS: u64 = 10;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "guardian=debug,guardian_api=debug,tower_http=debug".into()),
        )
        .init();

    let config = Config::from_env()?;
    if config.jwt_secret_is_placeholder() {
        eprintln!("FATAL: GUARDIAN_JWT_SECRET is unset or still a placeholder.");
        eprintln!("       Set it in your .env file and restart.");
        std::process::exit(1);
    }

    let db = Arc::new(Database::open(&config.db_path)?);

    let generator: Arc<dyn Generator> = Arc::new(OpenAiGenerator::new(OpenAiConfig {
        base_url: config.llm_base_url.clone(),
        api_key: config.llm_api_key.clone(),
        connect_timeout_secs: LLM_CONNECT_TIMEOUT_SECS,
        read_timeout_secs: LLM_READ_TIMEOUT_SECS,
    })?);
    let extractor = Arc::new(GeneratorTopicExtractor::new(generator.clone(), config.topic_model.clone()));
    let (side_effects, worker) = spawn_worker(db.clone(), extractor);

    let entitlement: Arc<dyn EntitlementGate> = if config.require_entitlement {
        Arc::new(SubscriptionGate::new(db.clone()))
    } else {
        warn!("Entitlement check disabled; every account may chat");
        Arc::new(Unmetered)
    };

    let state: AppState = Arc::new(AppStateInner {
        db,
        config: ApiConfig {
            jwt_secret: config.jwt_secret.clone(),
            token_ttl_days: config.token_ttl_days,
            max_dependents: config.max_dependents,
            max_steps: config.max_steps,
            chat_model: config.chat_model.clone(),
            reasoning_model: config.reasoning_model.clone(),
        },
        generator,
        entitlement,
        side_effects,
    });

    let app = guardian_api::router(state)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http());

    let addr: SocketAddr = config.server_address().parse()?;
    info!("Guardian server listening on {}", addr);
    info!("Models: chat={} reasoning={} topics={}", config.chat_model, config.reasoning_model, config.topic_model);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    // The router held the last queue sender; the worker finishes what is queued.
    match tokio::time::timeout(Duration::from_secs(WORKER_DRAIN_SECS), worker).await {
        Ok(_) => info!("Side-effects worker drained"),
        Err(_) => warn!("Side-effects worker still busy after {}s, exiting anyway", WORKER_DRAIN_SECS),
    }

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();
    #[cfg(unix)]
    {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = ctrl_c => info!("Received Ctrl+C, shutting down..."),
                    _ = sigterm.recv() => info!("Received SIGTERM, shutting down..."),
                }
            }
            Err(e) => {
                warn!("Failed to install SIGTERM handler: {}", e);
                ctrl_c.await.ok();
                info!("Received Ctrl+C, shutting down...");
            }
        }
    }
    #[cfg(not(unix))]
    {
        ctrl_c.await.ok();
        info!("Received Ctrl+C, shutting down...");
    }
}
