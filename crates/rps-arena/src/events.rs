//! Tournament state events.
//!
//! Observers follow a tournament through two kinds of event: a full
//! snapshot of every match, and an update carrying a single match. Both hold
//! [`MatchRecord`]s, which are owned copies taken when the event is created,
//! so later changes to the bracket never reach an event already published.

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::bracket::{Match, MatchState, Participant};

/// A participant as shown to observers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ParticipantRecord {
    pub name: String,
    pub is_winner: Option<bool>,
    pub result_text: Vec<String>,
}

impl From<&Participant> for ParticipantRecord {
    fn from(participant: &Participant) -> Self {
        Self {
            name: participant.bot.name.clone(),
            is_winner: participant.is_winner,
            result_text: participant.result_text.clone(),
        }
    }
}

/// A match as shown to observers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MatchRecord {
    pub id: String,
    pub tournament_round_text: String,
    pub next_match_id: Option<String>,
    pub state: MatchState,
    pub participants: Vec<ParticipantRecord>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
}

impl From<&Match> for MatchRecord {
    fn from(m: &Match) -> Self {
        Self {
            id: m.id.clone(),
            tournament_round_text: m.tournament_round_text.clone(),
            next_match_id: m.next_match_id.clone(),
            state: m.state,
            participants: m.participants.iter().map(ParticipantRecord::from).collect(),
            note: m.note.clone(),
        }
    }
}

/// An event on the shared tournament topic.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TournamentEvent {
    /// Every match, in play order.
    Snapshot {
        tournament_id: String,
        matches: Vec<MatchRecord>,
    },
    /// One match after a state change.
    Update {
        tournament_id: String,
        #[serde(rename = "match")]
        record: MatchRecord,
    },
}

impl TournamentEvent {
    pub fn tournament_id(&self) -> &str {
        match self {
            TournamentEvent::Snapshot { tournament_id, .. }
            | TournamentEvent::Update { tournament_id, .. } => tournament_id,
        }
    }
}

/// Receives tournament events.
///
/// Publishing must not block the orchestrator; a sink that cannot deliver
/// an event drops it.
pub trait EventSink: Send + Sync {
    fn publish(&self, event: TournamentEvent);
}

impl EventSink for broadcast::Sender<TournamentEvent> {
    fn publish(&self, event: TournamentEvent) {
        // Only fails when nobody is subscribed.
        if self.send(event).is_err() {
            tracing::trace!("No subscribers for tournament event");
        }
    }
}

/// Turns bracket state into events for one tournament.
pub struct StateBroadcaster<'a> {
    tournament_id: &'a str,
    sink: &'a dyn EventSink,
}

impl<'a> StateBroadcaster<'a> {
    pub fn new(tournament_id: &'a str, sink: &'a dyn EventSink) -> Self {
        Self {
            tournament_id,
            sink,
        }
    }

    /// Publishes a snapshot of every match.
    pub fn publish_full(&self, matches: &[Match]) {
        self.sink.publish(TournamentEvent::Snapshot {
            tournament_id: self.tournament_id.to_string(),
            matches: matches.iter().map(MatchRecord::from).collect(),
        });
    }

    /// Publishes the current state of one match.
    pub fn publish_update(&self, m: &Match) {
        self.sink.publish(TournamentEvent::Update {
            tournament_id: self.tournament_id.to_string(),
            record: MatchRecord::from(m),
        });
    }
}
