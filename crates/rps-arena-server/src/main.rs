//! RPS Arena Server
//!
//! An Axum web server for running bot tournaments:
//! - REST API to register bots, upload WASI modules, test bots, and start
//!   or cancel tournaments
//! - WebSocket stream of live bracket updates
//! - Static files for the bracket viewer

mod api;
mod jobs;
mod ws;

use anyhow::Context;
use axum::extract::DefaultBodyLimit;
use axum::middleware;
use axum::routing::{get, post};
use axum::Router;
use rps_arena::config::ArenaConfig;
use rps_arena::registry::InMemoryRegistry;
use rps_arena::sandbox::SandboxExecutor;
use std::path::PathBuf;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::services::ServeDir;

/// Application state shared across all handlers.
#[derive(Clone)]
pub struct AppState {
    /// Registered bots and their code.
    pub registry: Arc<InMemoryRegistry>,
    /// Runs bot code for tournaments and test runs.
    pub executor: Arc<SandboxExecutor>,
    /// The tournament slot and its event stream.
    pub jobs: jobs::TournamentJobs,
    pub config: Arc<ArenaConfig>,
}

/// Health check endpoint.
///
/// Returns "ok" to indicate the server is running.
async fn health() -> &'static str {
    "ok"
}

fn app(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    // WebSocket route only needs the event stream
    let ws_router = Router::new()
        .route("/api/ws", get(ws::ws_handler))
        .with_state(state.jobs.clone());

    let static_dir = state.config.server.static_dir.clone();
    let upload_limit = state.config.server.max_upload_bytes;

    Router::new()
        .route("/health", get(health))
        .route(
            "/api/bots",
            get(api::bots::list_bots).post(api::bots::create_bot),
        )
        .route(
            "/api/bots/wasm",
            post(api::bots::upload_wasm).layer(DefaultBodyLimit::max(upload_limit)),
        )
        // Path used by the bracket viewer's upload form.
        .route(
            "/api/upload_wasm",
            post(api::bots::upload_wasm).layer(DefaultBodyLimit::max(upload_limit)),
        )
        .route(
            "/api/tournament",
            get(api::tournament::get_tournament).post(api::tournament::start_tournament),
        )
        .route(
            "/api/tournament/status",
            get(api::tournament::tournament_status),
        )
        .route(
            "/api/tournament/cancel",
            post(api::tournament::cancel_tournament),
        )
        .route("/api/test", post(api::test_bot::run_test))
        .with_state(state)
        .merge(ws_router)
        .layer(middleware::from_fn(rps_arena_server::middleware::timing_layer))
        .layer(cors)
        .fallback_service(ServeDir::new(static_dir).append_index_html_on_directories(true))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();

    let config_path = std::env::var_os("ARENA_CONFIG")
        .map(PathBuf::from)
        .unwrap_or_else(ArenaConfig::config_path);
    let config = ArenaConfig::load_from(&config_path)
        .with_context(|| format!("Failed to load {}", config_path.display()))?;

    let registry = InMemoryRegistry::from_config(&config).context("Failed to load bot roster")?;
    tracing::info!("Loaded {} bots", registry.all_bots().len());

    let state = AppState {
        registry: Arc::new(registry),
        executor: Arc::new(
            SandboxExecutor::new(&config.sandbox).context("Failed to set up bot sandbox")?,
        ),
        jobs: jobs::TournamentJobs::new(config.server.broadcast_capacity),
        config: Arc::new(config),
    };
    let bind = state.config.server.bind.clone();

    let listener = tokio::net::TcpListener::bind(&bind)
        .await
        .with_context(|| format!("Failed to bind to {}", bind))?;
    tracing::info!("Server running on http://{}", listener.local_addr()?);

    axum::serve(listener, app(state))
        .await
        .context("Server error")?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use tower::ServiceExt;
    use rps_arena::registry::BotRegistry;

    /// State with an empty roster and default settings.
    pub(crate) fn test_state() -> AppState {
        let config = ArenaConfig::default();
        AppState {
            registry: Arc::new(InMemoryRegistry::new()),
            executor: Arc::new(SandboxExecutor::new(&config.sandbox).unwrap()),
            jobs: jobs::TournamentJobs::new(config.server.broadcast_capacity),
            config: Arc::new(config),
        }
    }

    #[tokio::test]
    async fn test_health_returns_ok() {
        let result = health().await;
        assert_eq!(result, "ok");
    }

    #[tokio::test]
    async fn test_routes_are_wired() {
        let state = test_state();
        state
            .registry
            .register("rocky", rps_arena::bot::BotRunType::Rock, None)
            .unwrap();

        let response = app(state)
            .oneshot(Request::builder().uri("/api/bots").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let bots: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(bots[0]["name"], "rocky");
        assert_eq!(bots[0]["disabled"], false);
    }

    #[tokio::test]
    async fn test_status_route_reports_idle() {
        let response = app(test_state())
            .oneshot(
                Request::builder()
                    .uri("/api/tournament/status")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let status: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert!(status["running"].is_null());
    }

    const BOUNDARY: &str = "arena-test-boundary";

    fn multipart_body(fields: &[(&str, &[u8])]) -> Vec<u8> {
        let mut body = Vec::new();
        for (name, value) in fields {
            body.extend_from_slice(format!("--{BOUNDARY}\r\n").as_bytes());
            if *name == "wasm_file" {
                body.extend_from_slice(
                    format!(
                        "Content-Disposition: form-data; name=\"{name}\"; filename=\"bot.wasm\"\r\n\
                         Content-Type: application/wasm\r\n\r\n"
                    )
                    .as_bytes(),
                );
            } else {
                body.extend_from_slice(
                    format!("Content-Disposition: form-data; name=\"{name}\"\r\n\r\n").as_bytes(),
                );
            }
            body.extend_from_slice(value);
            body.extend_from_slice(b"\r\n");
        }
        body.extend_from_slice(format!("--{BOUNDARY}--\r\n").as_bytes());
        body
    }

    fn upload(fields: &[(&str, &[u8])]) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri("/api/bots/wasm")
            .header(
                "content-type",
                format!("multipart/form-data; boundary={BOUNDARY}"),
            )
            .body(Body::from(multipart_body(fields)))
            .unwrap()
    }

    #[tokio::test]
    async fn test_wasm_upload_registers_module() {
        let state = test_state();
        let module: &[u8] = b"\0asm\x01\0\0\0";

        let response = app(state.clone())
            .oneshot(upload(&[("botname", b"wasmer"), ("wasm_file", module)]))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::CREATED);

        let bot = state.registry.find("wasmer").unwrap();
        assert_eq!(bot.run_type, rps_arena::bot::BotRunType::Wasi);
        let code = rps_arena::registry::BotRegistry::code(state.registry.as_ref(), bot.id).unwrap();
        assert_eq!(code, Some(rps_arena::bot::BotCode::from(module.to_vec())));
    }

    #[tokio::test]
    async fn test_wasm_upload_rejects_non_modules() {
        let state = test_state();
        let response = app(state.clone())
            .oneshot(upload(&[("botname", b"fake"), ("wasm_file", b"#!/bin/sh\n")]))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert!(state.registry.find("fake").is_none());

        let response = app(state)
            .oneshot(upload(&[("botname", b"nofile")]))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_wasm_upload_respects_size_limit() {
        let mut config = ArenaConfig::default();
        config.server.max_upload_bytes = 64;
        let state = AppState {
            config: Arc::new(config),
            ..test_state()
        };
        let mut module = b"\0asm\x01\0\0\0".to_vec();
        module.resize(1024, 0);

        let response = app(state.clone())
            .oneshot(upload(&[("botname", b"huge"), ("wasm_file", &module)]))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);
        assert!(state.registry.find("huge").is_none());
    }

    #[tokio::test]
    async fn test_command_bots_are_refused_over_http() {
        let state = test_state();
        let response = app(state.clone())
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/api/bots")
                    .header("content-type", "application/json")
                    .body(Body::from(
                        r#"{"name":"shell","run_type":"command","code":"sh -c id"}"#,
                    ))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert!(state.registry.find("shell").is_none());
    }
}
