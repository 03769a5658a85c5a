//! Tournament API handlers.

use axum::{extract::State, http::StatusCode, Json};
use rps_arena::events::TournamentEvent;
use serde::Serialize;

use super::ApiError;
use crate::jobs::{RunningTournament, TournamentStarted, TriggerError};
use crate::AppState;

impl From<TriggerError> for ApiError {
    fn from(e: TriggerError) -> Self {
        let status = match e {
            TriggerError::Bracket(_) => StatusCode::BAD_REQUEST,
            TriggerError::AlreadyRunning(_) => StatusCode::CONFLICT,
        };
        ApiError::new(status, e.to_string())
    }
}

/// Start a tournament between every active bot.
///
/// # Endpoint
///
/// `POST /api/tournament`
///
/// # Response
///
/// - `202 Accepted`: tournament id and the initial bracket; results follow
///   on the WebSocket
/// - `400 Bad Request`: no active bots
/// - `409 Conflict`: a tournament is already running
pub async fn start_tournament(
    State(state): State<AppState>,
) -> Result<(StatusCode, Json<TournamentStarted>), ApiError> {
    let started = state.jobs.trigger(
        state.registry.clone(),
        state.executor.clone(),
        &state.config.tournament,
    )?;
    tracing::info!(
        "Accepted tournament {} with {} matches",
        started.tournament_id,
        started.matches.len()
    );
    Ok((StatusCode::ACCEPTED, Json(started)))
}

/// Latest snapshot of the current or last tournament.
///
/// # Endpoint
///
/// `GET /api/tournament`
pub async fn get_tournament(State(state): State<AppState>) -> Result<Json<TournamentEvent>, ApiError> {
    state
        .jobs
        .latest_snapshot()
        .map(Json)
        .ok_or_else(|| ApiError::not_found("No tournament has been run yet"))
}

#[derive(Debug, Serialize)]
pub struct TournamentStatus {
    pub running: Option<RunningTournament>,
}

/// Whether a tournament is running right now.
///
/// # Endpoint
///
/// `GET /api/tournament/status`
pub async fn tournament_status(State(state): State<AppState>) -> Json<TournamentStatus> {
    Json(TournamentStatus {
        running: state.jobs.running(),
    })
}

#[derive(Debug, Serialize)]
pub struct CancelAck {
    pub tournament_id: String,
}

/// Stop the running tournament after the current round.
///
/// # Endpoint
///
/// `POST /api/tournament/cancel`
///
/// # Response
///
/// - `202 Accepted`: the cancelled tournament's id
/// - `404 Not Found`: nothing is running
pub async fn cancel_tournament(
    State(state): State<AppState>,
) -> Result<(StatusCode, Json<CancelAck>), ApiError> {
    state
        .jobs
        .cancel()
        .map(|tournament_id| (StatusCode::ACCEPTED, Json(CancelAck { tournament_id })))
        .ok_or_else(|| ApiError::not_found("No tournament is running"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jobs::tests::wait_idle;
    use crate::tests::test_state;
    use axum::response::IntoResponse;
    use rps_arena::bot::BotRunType;
    use rps_arena::bracket::MatchState;

    async fn json_body(response: axum::response::Response) -> (StatusCode, serde_json::Value) {
        let status = response.status();
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        (status, serde_json::from_slice(&body).unwrap())
    }

    #[tokio::test]
    async fn test_start_without_bots_is_bad_request() {
        let err = start_tournament(State(test_state())).await.unwrap_err();
        assert_eq!(err.status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_get_before_any_run_is_not_found() {
        let err = get_tournament(State(test_state())).await.unwrap_err();
        assert_eq!(err.status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_start_acknowledges_then_finishes() {
        let state = test_state();
        state.registry.register("a", BotRunType::Paper, None).unwrap();
        state.registry.register("b", BotRunType::Rock, None).unwrap();

        let response = start_tournament(State(state.clone())).await.into_response();
        let (status, body) = json_body(response).await;
        assert_eq!(status, StatusCode::ACCEPTED);
        assert!(body["tournament_id"].is_string());
        assert!(body["started_at"].is_string());
        assert_eq!(body["matches"].as_array().unwrap().len(), 1);

        wait_idle(&state.jobs).await;

        let Json(snapshot) = get_tournament(State(state.clone())).await.unwrap();
        match snapshot {
            TournamentEvent::Snapshot {
                tournament_id,
                matches,
            } => {
                assert_eq!(tournament_id, body["tournament_id"].as_str().unwrap());
                assert_eq!(matches[0].state, MatchState::Finished);
                let winner = matches[0]
                    .participants
                    .iter()
                    .find(|p| p.is_winner == Some(true))
                    .unwrap();
                assert_eq!(winner.name, "a");
            }
            other => panic!("Expected snapshot, got {:?}", other),
        }

        let Json(status) = tournament_status(State(state)).await;
        assert!(status.running.is_none());
    }

    #[tokio::test]
    async fn test_cancel_without_tournament_is_not_found() {
        let err = cancel_tournament(State(test_state())).await.unwrap_err();
        assert_eq!(err.status, StatusCode::NOT_FOUND);
    }
}
