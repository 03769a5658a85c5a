//! WebSocket handler for live tournament updates.
//!
//! Every connected client receives the same stream: the latest snapshot on
//! connect, then every event as it is published. A client that falls behind
//! the broadcast buffer is resynchronised with a fresh snapshot instead of
//! the events it missed.

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::Response,
};
use futures_util::{SinkExt, StreamExt};
use rps_arena::events::TournamentEvent;
use tokio::sync::broadcast::error::RecvError;

use crate::jobs::TournamentJobs;

/// Axum handler for WebSocket upgrade requests.
pub async fn ws_handler(ws: WebSocketUpgrade, State(jobs): State<TournamentJobs>) -> Response {
    ws.on_upgrade(|socket| handle_socket(socket, jobs))
}

fn encode(event: &TournamentEvent) -> Option<Message> {
    match serde_json::to_string(event) {
        Ok(json) => Some(Message::Text(json)),
        Err(e) => {
            tracing::error!("Failed to encode tournament event: {}", e);
            None
        }
    }
}

async fn handle_socket(socket: WebSocket, jobs: TournamentJobs) {
    let (mut sender, mut receiver) = socket.split();
    // Subscribe before reading the snapshot so nothing falls in between.
    let mut rx = jobs.subscribe();

    let send_task = tokio::spawn(async move {
        if let Some(msg) = jobs.latest_snapshot().as_ref().and_then(encode) {
            if sender.send(msg).await.is_err() {
                return;
            }
        }

        loop {
            let event = match rx.recv().await {
                Ok(event) => Some(event),
                Err(RecvError::Lagged(skipped)) => {
                    tracing::debug!("WebSocket client lagged by {} events", skipped);
                    jobs.latest_snapshot()
                }
                Err(RecvError::Closed) => break,
            };
            let Some(msg) = event.as_ref().and_then(encode) else {
                continue;
            };
            if sender.send(msg).await.is_err() {
                break;
            }
        }
    });

    // The stream is one-way; client messages only keep the socket alive.
    while let Some(Ok(msg)) = receiver.next().await {
        if let Message::Close(_) = msg {
            break;
        }
    }

    send_task.abort();
}

#[cfg(test)]
mod tests {
    use super::*;
    use rps_arena::bracket::MatchState;
    use rps_arena::events::MatchRecord;

    #[test]
    fn test_events_encode_as_text_frames() {
        let event = TournamentEvent::Update {
            tournament_id: "t".to_string(),
            record: MatchRecord {
                id: "match-1".to_string(),
                tournament_round_text: "1".to_string(),
                next_match_id: Some("match-3".to_string()),
                state: MatchState::InProgress,
                participants: vec![],
                note: None,
            },
        };

        match encode(&event) {
            Some(Message::Text(json)) => {
                assert!(json.contains("\"type\":\"update\""));
                assert!(json.contains("\"match\":{"));
                assert!(json.contains("\"state\":\"InProgress\""));
            }
            other => panic!("Expected text frame, got {:?}", other),
        }
    }
}
