//! The ingress HTTP listener (A4): accepts alert events over `POST
//! /events`, dispatches each on its own task, and exposes health and
//! metrics endpoints the way the teacher's admission webhook does.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use prometheus::{Encoder, Registry, TextEncoder};
use tokio::sync::broadcast;
use tracing::{info, warn};

use crate::dispatch::Dispatcher;
use crate::event::Event;
use crate::observability::Metrics;

#[derive(Clone)]
struct IngressState {
    dispatcher: Dispatcher,
    registry: Arc<Registry>,
}

pub async fn serve(listen_address: &str, dispatcher: Dispatcher, metrics: Metrics) -> Result<()> {
    let registry = Registry::new();
    metrics.register(&registry);

    let addr: SocketAddr = listen_address.parse().context("invalid listen address")?;
    let state = IngressState {
        dispatcher,
        registry: Arc::new(registry),
    };

    let app = build_router(state);

    info!(addr = %addr, "ingress listener starting");

    let (shutdown_tx, mut shutdown_rx) = broadcast::channel::<()>(1);
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;

    let serve_fut = axum::serve(listener, app.into_make_service()).with_graceful_shutdown(async move {
        let _ = shutdown_rx.recv().await;
    });

    tokio::select! {
        result = serve_fut => result.context("ingress listener exited")?,
        _ = tokio::signal::ctrl_c() => {
            info!("shutdown signal received");
            let _ = shutdown_tx.send(());
        }
    }

    info!("ingress listener stopped");
    Ok(())
}

fn build_router(state: IngressState) -> Router {
    Router::new()
        .route("/events", post(ingest_event))
        .route("/healthz", get(|| async { (StatusCode::OK, "OK") }))
        .route("/readyz", get(|| async { (StatusCode::OK, "READY") }))
        .route("/metrics", get(metrics_handler))
        .with_state(state)
}

async fn ingest_event(State(state): State<IngressState>, Json(event): Json<Event>) -> impl IntoResponse {
    let dispatcher = state.dispatcher.clone();
    tokio::spawn(async move {
        dispatcher.dispatch_event(event).await;
    });
    StatusCode::ACCEPTED
}

async fn metrics_handler(State(state): State<IngressState>) -> impl IntoResponse {
    let encoder = TextEncoder::new();
    let metric_families = state.registry.gather();
    let mut buffer = Vec::new();

    match encoder.encode(&metric_families, &mut buffer) {
        Ok(()) => match String::from_utf8(buffer) {
            Ok(body) => (StatusCode::OK, body),
            Err(err) => {
                warn!(error = %err, "metrics buffer was not valid utf-8");
                (StatusCode::INTERNAL_SERVER_ERROR, String::new())
            }
        },
        Err(err) => {
            warn!(error = %err, "failed to encode metrics");
            (StatusCode::INTERNAL_SERVER_ERROR, String::new())
        }
    }
}
