//! Gateway HTTP entrypoint.
//!
//! Boots the mailbox, wallet executor pool, and subscription manager against a
//! live EVM JSON-RPC endpoint, then serves the HTTP surface from `handlers.rs`.
//!
//! Environment:
//! - `.env` values loaded at startup
//! - `HOST`, `PORT`, `RPC_URL`, `EVM_PRIVATE_KEY` (comma-separated) control wiring
//! - `OTEL_*` variables enable tracing export

mod actor;
mod backend;
mod config;
mod errors;
mod events;
mod handlers;
mod mailbox;
mod request_manager;
mod sig_down;
mod sliding_window;
mod subscriptions;
mod telemetry;
mod wallet;

use axum::Router;
use axum::http::Method;
use dotenvy::dotenv;
use std::net::SocketAddr;
use std::str::FromStr;
use std::sync::Arc;
use tower_http::cors;
use tower_http::trace::TraceLayer;

use crate::backend::callback::LoggingCallback;
use crate::backend::rpc::AlloyBackend;
use crate::config::Config;
use crate::mailbox::Mailbox;
use crate::request_manager::RequestManager;
use crate::sig_down::SigDown;
use crate::subscriptions::SubscriptionManager;
use crate::telemetry::Telemetry;
use crate::wallet::executor::TransactionExecutor;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenv().ok();

    let _telemetry = Telemetry::new();

    let config = Config::load()?;

    let sig_down = SigDown::try_new()?;
    let cancellation = sig_down.cancellation_token();

    let backend = Arc::new(AlloyBackend::connect(
        config.rpc_url().clone(),
        config.event_channel_capacity(),
    ));
    let chain_id = backend.chain_id().await?;

    let signers = config
        .wallets()
        .iter()
        .map(|w| alloy_signer_local::PrivateKeySigner::from_str(&format!("{:#x}", w.0)))
        .collect::<Result<Vec<_>, _>>()?;

    let executor = Arc::new(
        TransactionExecutor::new(
            signers,
            chain_id,
            Arc::clone(&backend),
            Arc::new(LoggingCallback),
            config.retry_max_attempts_default(),
            config.retry_max_attempts_nonce(),
            cancellation.clone(),
        )
        .await?,
    );

    let mailbox = Arc::new(Mailbox::new(
        config.mailbox_max_size(),
        config.max_inactivity(),
        cancellation.clone(),
    ));
    let subscriptions = Arc::new(SubscriptionManager::new(
        Arc::clone(&mailbox),
        Arc::clone(&backend),
        cancellation.clone(),
    ));

    let request_manager = Arc::new(RequestManager::new(
        mailbox,
        Arc::clone(&backend),
        executor,
        subscriptions,
    ));

    let http_endpoints = Router::new()
        .merge(handlers::routes().with_state(request_manager))
        .layer(TraceLayer::new_for_http())
        .layer(
            cors::CorsLayer::new()
                .allow_origin(cors::Any)
                .allow_methods([Method::GET, Method::POST])
                .allow_headers(cors::Any),
        );

    let addr = SocketAddr::new(config.host(), config.port());
    tracing::info!("Starting server at http://{}", addr);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .unwrap_or_else(|e| {
            tracing::error!("Failed to bind to {}: {}", addr, e);
            std::process::exit(1);
        });

    let axum_cancellation_token = cancellation.clone();
    let axum_graceful_shutdown = async move { axum_cancellation_token.cancelled().await };
    axum::serve(listener, http_endpoints)
        .with_graceful_shutdown(axum_graceful_shutdown)
        .await?;

    Ok(())
}
