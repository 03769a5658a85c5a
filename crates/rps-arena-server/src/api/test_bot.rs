//! Single-run bot diagnostics.

use axum::{extract::State, Json};
use rps_arena::bot::{BotCode, BotExecutionSpec, BotRunType};
use rps_arena::registry::BotRegistry;
use rps_arena::sandbox::{test_bot, BotRunResult};
use serde::Deserialize;

use super::bots::{check_client_run_type, find_bot};
use super::ApiError;
use crate::AppState;

/// Request body for a test run.
///
/// Without `run_type` the registered bot called `name` is run with its
/// stored code. With `run_type`, `code` is run as-is under `name`, which
/// lets authors try Python code before registering it.
#[derive(Debug, Deserialize)]
pub struct TestBotRequest {
    pub name: String,
    #[serde(default)]
    pub run_type: Option<BotRunType>,
    #[serde(default)]
    pub code: Option<String>,
    /// Stdin record to send; a sample record is used when absent.
    #[serde(default)]
    pub stdin: Option<String>,
}

/// Run a bot once and return everything it printed.
///
/// # Endpoint
///
/// `POST /api/test`
///
/// # Response
///
/// - `200 OK`: the run result, including stdout, stderr and the parsed play
/// - `400 Bad Request`: inline code for a `command` or `wasi` run-type
/// - `404 Not Found`: no registered bot with that name
pub async fn run_test(
    State(state): State<AppState>,
    Json(body): Json<TestBotRequest>,
) -> Result<Json<BotRunResult>, ApiError> {
    let spec = match body.run_type {
        Some(run_type) => {
            check_client_run_type(run_type)?;
            BotExecutionSpec {
                name: body.name,
                run_type,
                code: body.code.map(BotCode::Source),
            }
        }
        None => {
            let bot = find_bot(&state, &body.name)?;
            let code = state.registry.code(bot.id)?;
            BotExecutionSpec::new(&bot, code)
        }
    };

    let result = test_bot(state.executor.as_ref(), &spec, body.stdin).await;
    tracing::debug!(
        bot = %spec.name,
        play = %result.play,
        duration_ms = result.duration_ms,
        "Test run finished"
    );
    Ok(Json(result))
}
