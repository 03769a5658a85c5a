//! Bot API handlers.

use axum::extract::multipart::{Multipart, MultipartError};
use axum::{extract::State, http::StatusCode, Json};
use rps_arena::bot::{Bot, BotCode, BotRunType};
use rps_arena::registry::{BotRegistry, RegistryError};
use serde::{Deserialize, Serialize};

use super::ApiError;
use crate::AppState;

/// A registered bot as listed by the API.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BotSummary {
    pub id: u32,
    pub name: String,
    pub run_type: BotRunType,
    /// Disabled bots made an invalid play and sit out future tournaments.
    pub disabled: bool,
}

/// First bytes of every binary WebAssembly module.
const WASM_MAGIC: &[u8] = b"\0asm";

/// Request body for registering a bot.
#[derive(Debug, Deserialize)]
pub struct NewBot {
    pub name: String,
    pub run_type: BotRunType,
    #[serde(default)]
    pub code: Option<String>,
}

impl From<RegistryError> for ApiError {
    fn from(e: RegistryError) -> Self {
        let status = match e {
            RegistryError::NameEmpty | RegistryError::NameTooLong => StatusCode::BAD_REQUEST,
            RegistryError::NameTaken(_) => StatusCode::CONFLICT,
            RegistryError::NotFound(_) => StatusCode::NOT_FOUND,
            RegistryError::CodeUnreadable { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        };
        ApiError::new(status, e.to_string())
    }
}

impl From<MultipartError> for ApiError {
    fn from(e: MultipartError) -> Self {
        ApiError::new(e.status(), e.body_text())
    }
}

/// Rejects run-types clients may not submit code for.
///
/// `command` bots run host programs and are only configured by the
/// operator. `wasi` modules arrive as binary uploads, never as JSON text.
pub(crate) fn check_client_run_type(run_type: BotRunType) -> Result<(), ApiError> {
    if run_type.runs_host_program() {
        return Err(ApiError::new(
            StatusCode::BAD_REQUEST,
            "Command bots can only be configured in arena.toml",
        ));
    }
    if run_type == BotRunType::Wasi {
        return Err(ApiError::new(
            StatusCode::BAD_REQUEST,
            "WASI bots are registered by uploading a module to /api/bots/wasm",
        ));
    }
    Ok(())
}

/// List every registered bot, including disabled ones.
///
/// # Endpoint
///
/// `GET /api/bots`
pub async fn list_bots(State(state): State<AppState>) -> Json<Vec<BotSummary>> {
    let bots = state
        .registry
        .all_bots()
        .into_iter()
        .map(|bot| BotSummary {
            disabled: state.registry.is_disabled(bot.id),
            id: bot.id,
            name: bot.name,
            run_type: bot.run_type,
        })
        .collect();
    Json(bots)
}

/// Register a new bot.
///
/// # Endpoint
///
/// `POST /api/bots`
///
/// # Response
///
/// - `201 Created`: the registered bot
/// - `400 Bad Request`: empty or overlong name, missing code for a
///   sandboxed run-type, or a `command`/`wasi` run-type
/// - `409 Conflict`: name already taken
pub async fn create_bot(
    State(state): State<AppState>,
    Json(body): Json<NewBot>,
) -> Result<(StatusCode, Json<Bot>), ApiError> {
    check_client_run_type(body.run_type)?;
    let code = body.code.filter(|code| !code.trim().is_empty());
    if !body.run_type.is_builtin() && code.is_none() {
        return Err(ApiError::new(
            StatusCode::BAD_REQUEST,
            format!("Code is required for {:?} bots", body.run_type),
        ));
    }

    let bot = state
        .registry
        .register(&body.name, body.run_type, code.map(BotCode::Source))?;
    tracing::info!("Registered bot {} ({:?})", bot.name, bot.run_type);
    Ok((StatusCode::CREATED, Json(bot)))
}

/// Register a WASI bot from an uploaded module.
///
/// # Endpoint
///
/// `POST /api/bots/wasm` as `multipart/form-data` with a `botname` text
/// field and a `wasm_file` file field holding a WASI preview1 command
/// module.
///
/// # Response
///
/// - `201 Created`: the registered bot
/// - `400 Bad Request`: a missing field, a file that is not a WebAssembly
///   module, or a bad name
/// - `409 Conflict`: name already taken
/// - `413 Payload Too Large`: module over `server.max_upload_bytes`
pub async fn upload_wasm(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<(StatusCode, Json<Bot>), ApiError> {
    let mut name = None;
    let mut module = None;
    while let Some(field) = multipart.next_field().await? {
        let field_name = field.name().map(str::to_string);
        match field_name.as_deref() {
            Some("botname") => name = Some(field.text().await?),
            Some("wasm_file") => module = Some(field.bytes().await?),
            _ => {}
        }
    }

    let missing = |field: &str| ApiError::new(StatusCode::BAD_REQUEST, format!("Missing field: {field}"));
    let name = name.ok_or_else(|| missing("botname"))?;
    let module = module.ok_or_else(|| missing("wasm_file"))?;
    if !module.starts_with(WASM_MAGIC) {
        return Err(ApiError::new(
            StatusCode::BAD_REQUEST,
            "wasm_file is not a WebAssembly module",
        ));
    }

    let bot = state
        .registry
        .register(&name, BotRunType::Wasi, Some(BotCode::from(module.to_vec())))?;
    tracing::info!("Registered WASI bot {} ({} bytes)", bot.name, module.len());
    Ok((StatusCode::CREATED, Json(bot)))
}

/// Look a bot up by name, for handlers that accept a bot name.
pub(crate) fn find_bot(state: &AppState, name: &str) -> Result<Bot, ApiError> {
    state
        .registry
        .find(name)
        .ok_or_else(|| RegistryError::NotFound(name.to_string()).into())
}
