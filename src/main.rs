use axum::{
    extract::{Request, State},
    http::{header, StatusCode},
    middleware::{self, Next},
    response::{Json, Response},
    routing::{get, post},
    Router,
};
use deadpool_redis::redis::cmd;
use deadpool_redis::{Config, Pool, Runtime};
use serde_json::{json, Value};
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use axon::config::AxonConfig;
use axon::event::Event;
use axon::EVENT_STREAM_NAME;

#[derive(Clone)]
struct AppState {
    redis_pool: Pool,
    api_key: String,
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt::init();
    dotenvy::dotenv().ok();

    let config = AxonConfig::load().unwrap_or_else(|e| {
        warn!(error = %e, "Failed to load config, using defaults");
        AxonConfig::default()
    });

    let api_key = config.server.api_key.clone().unwrap_or_else(|| {
        warn!("server.api_key not set, defaulting to 'dev-key'. DO NOT USE IN PRODUCTION.");
        "dev-key".to_string()
    });

    let redis_url = std::env::var("REDIS_URL").unwrap_or_else(|_| config.redis.url.clone());
    let cfg = Config::from_url(redis_url);
    let pool = cfg
        .create_pool(Some(Runtime::Tokio1))
        .expect("Failed to create Redis pool");

    let app_state = Arc::new(AppState {
        redis_pool: pool,
        api_key,
    });

    let app = Router::new()
        .route("/health", get(health_check))
        .route("/api/v1/events", post(ingest_events))
        .layer(middleware::from_fn_with_state(
            app_state.clone(),
            auth_middleware,
        ))
        .with_state(app_state);

    let addr: SocketAddr = format!("0.0.0.0:{}", config.server.port)
        .parse()
        .expect("Invalid address");

    info!("Axon ingestion server listening on {}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await.unwrap();
    axum::serve(listener, app).await.unwrap();
}

async fn auth_middleware(
    State(state): State<Arc<AppState>>,
    req: Request,
    next: Next,
) -> Result<Response, StatusCode> {
    // Health checks stay unauthenticated
    if req.uri().path() == "/health" {
        return Ok(next.run(req).await);
    }

    let auth_header = req
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|header| header.to_str().ok());

    match auth_header {
        Some(auth_header) if auth_header.starts_with("Bearer ") => {
            let token = &auth_header[7..];
            if token == state.api_key {
                Ok(next.run(req).await)
            } else {
                warn!("Invalid API key attempt");
                Err(StatusCode::UNAUTHORIZED)
            }
        }
        _ => {
            warn!("Missing or malformed Authorization header");
            Err(StatusCode::UNAUTHORIZED)
        }
    }
}

async fn health_check(State(state): State<Arc<AppState>>) -> Result<Json<Value>, StatusCode> {
    let mut conn = state.redis_pool.get().await.map_err(|e| {
        error!("Failed to get Redis connection: {}", e);
        StatusCode::INTERNAL_SERVER_ERROR
    })?;

    let _: String = cmd("PING").query_async(&mut conn).await.map_err(|e| {
        error!("Redis PING failed: {}", e);
        StatusCode::INTERNAL_SERVER_ERROR
    })?;

    Ok(Json(json!({ "status": "ok", "redis": "connected" })))
}

/// Accepts a single event object or an array of events, and appends each
/// to the event stream for the workers to pick up.
async fn ingest_events(
    State(state): State<Arc<AppState>>,
    Json(body): Json<Value>,
) -> Result<(StatusCode, Json<Value>), StatusCode> {
    let raw_events = match body {
        Value::Array(items) => items,
        other => vec![other],
    };

    let mut events = Vec::with_capacity(raw_events.len());
    for raw in raw_events {
        let event: Event = serde_json::from_value(raw).map_err(|e| {
            debug!(error = %e, "Rejected malformed event");
            StatusCode::BAD_REQUEST
        })?;
        if !event.is_valid() {
            debug!("Rejected event with empty name or source");
            return Err(StatusCode::BAD_REQUEST);
        }
        events.push(event);
    }

    if events.is_empty() {
        return Err(StatusCode::BAD_REQUEST);
    }

    let mut conn = state.redis_pool.get().await.map_err(|e| {
        error!("Failed to get Redis connection: {}", e);
        StatusCode::INTERNAL_SERVER_ERROR
    })?;

    let mut queued = 0usize;
    for event in &events {
        let body = serde_json::to_string(event).map_err(|e| {
            error!("Failed to serialize event: {}", e);
            StatusCode::INTERNAL_SERVER_ERROR
        })?;

        let result: Result<String, _> = cmd("XADD")
            .arg(EVENT_STREAM_NAME)
            .arg("*")
            .arg("body")
            .arg(&body)
            .query_async(&mut conn)
            .await;

        match result {
            Ok(id) => {
                debug!(
                    stream_id = %id,
                    event = %event.name,
                    source = %event.source,
                    "Event queued"
                );
                queued += 1;
            }
            Err(e) => {
                error!("Failed to push event to stream: {}", e);
                return Err(StatusCode::INTERNAL_SERVER_ERROR);
            }
        }
    }

    info!(count = queued, "Queued {} events", queued);
    Ok((StatusCode::ACCEPTED, Json(json!({ "queued": queued }))))
}
