//! Drives a bracket from the first match to the final.
//!
//! A [`Tournament`] owns its matches exclusively. [`Tournament::run`] walks
//! them in play order, resolves each playable match, moves winners forward
//! and publishes an event after every state change. Observers only ever see
//! copies taken at those points.

use crate::bot::Bot;
use crate::bracket::{generate_matches, BracketError, Match, MatchState, Participant};
use crate::events::{EventSink, StateBroadcaster};
use crate::resolver::{CancelFlag, MatchOutcome, MatchResolver, Side};
use crate::sandbox::Executor;

/// What happened over a whole run.
#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Serialize)]
pub struct TournamentSummary {
    /// Name of the bot that won the final; `None` if the run was cancelled
    /// before the final was decided.
    pub winner: Option<String>,
    /// Matches resolved by play, not counting byes.
    pub matches_played: usize,
    pub coin_flips: usize,
    pub cancelled: bool,
}

/// One tournament run and the bracket it mutates.
#[derive(Debug, Clone)]
pub struct Tournament {
    id: String,
    matches: Vec<Match>,
}

impl Tournament {
    /// Wraps an already built bracket. `matches` must be in play order.
    pub fn new(id: impl Into<String>, matches: Vec<Match>) -> Self {
        Self {
            id: id.into(),
            matches,
        }
    }

    /// Builds the bracket for `entrants`, taken in the given order.
    ///
    /// # Errors
    ///
    /// Returns [`BracketError::InsufficientEntrants`] for an empty list.
    pub fn from_entrants(id: impl Into<String>, entrants: Vec<Bot>) -> Result<Self, BracketError> {
        Ok(Self::new(id, generate_matches(entrants)?))
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn matches(&self) -> &[Match] {
        &self.matches
    }

    /// Runs every match to completion, or until `cancel` is set.
    ///
    /// Publishes a snapshot before the first match and another after the
    /// last, with single-match updates in between. Cancellation is checked
    /// before each match and each round; matches not yet reached stay
    /// `NotStarted`.
    pub async fn run<E: Executor>(
        &mut self,
        resolver: &MatchResolver<E>,
        sink: &dyn EventSink,
        cancel: &CancelFlag,
    ) -> TournamentSummary {
        let broadcaster = StateBroadcaster::new(&self.id, sink);
        let matches = &mut self.matches;
        let mut summary = TournamentSummary::default();

        tracing::info!("Starting tournament {} with {} matches", self.id, matches.len());
        broadcaster.publish_full(matches);

        for idx in 0..matches.len() {
            if cancel.is_cancelled() {
                summary.cancelled = true;
                break;
            }

            match matches[idx].state {
                MatchState::Bye => {
                    let m = &mut matches[idx];
                    if let Some(participant) = m.participants.first_mut() {
                        participant.is_winner = Some(true);
                    }
                    m.state = MatchState::Finished;
                    tracing::debug!("Match {} is a bye", m.id);
                    broadcaster.publish_update(m);
                }
                MatchState::NotStarted if matches[idx].participants.len() == 2 => {
                    let bot1 = matches[idx].participants[0].bot.clone();
                    let bot2 = matches[idx].participants[1].bot.clone();
                    matches[idx].state = MatchState::InProgress;
                    broadcaster.publish_update(&matches[idx]);
                    tracing::info!("Match {}: {} vs {}", matches[idx].id, bot1.name, bot2.name);

                    let resolved = resolver
                        .resolve_with(&bot1, &bot2, cancel, |moves1, moves2| {
                            let m = &mut matches[idx];
                            m.participants[0].set_moves(moves1);
                            m.participants[1].set_moves(moves2);
                            broadcaster.publish_update(m);
                        })
                        .await;

                    let Ok(outcome) = resolved else {
                        summary.cancelled = true;
                        break;
                    };

                    summary.matches_played += 1;
                    if outcome.coin_flip {
                        summary.coin_flips += 1;
                    }
                    for (side, bot) in [(Side::First, &bot1), (Side::Second, &bot2)] {
                        if outcome.has_invalid(side) {
                            resolver.registry().report_invalid(bot.id);
                        }
                    }

                    let m = &mut matches[idx];
                    record_outcome(m, &outcome);
                    let winner_name = m.participants[outcome.winner.index()].bot.name.clone();
                    tracing::info!(
                        "Match {} won by {} after {} round(s)",
                        m.id,
                        winner_name,
                        outcome.rounds_played()
                    );
                    broadcaster.publish_update(m);
                }
                MatchState::NotStarted => {
                    tracing::warn!(
                        "Skipping match {}: expected 2 participants, found {}",
                        matches[idx].id,
                        matches[idx].participants.len()
                    );
                    continue;
                }
                MatchState::InProgress | MatchState::Finished => continue,
            }

            advance_winner(matches, idx, &broadcaster);
        }

        summary.winner = matches
            .iter()
            .find(|m| m.is_final())
            .and_then(Match::winner)
            .map(|p| p.bot.name.clone());

        broadcaster.publish_full(matches);
        match &summary.winner {
            Some(winner) => tracing::info!("Tournament {} won by {}", self.id, winner),
            None if summary.cancelled => tracing::info!("Tournament {} cancelled", self.id),
            None => tracing::warn!("Tournament {} ended without a winner", self.id),
        }
        summary
    }
}

fn record_outcome(m: &mut Match, outcome: &MatchOutcome) {
    m.participants[0].set_moves(&outcome.moves1);
    m.participants[1].set_moves(&outcome.moves2);
    m.participants[outcome.winner.index()].is_winner = Some(true);
    m.participants[outcome.winner.other().index()].is_winner = Some(false);
    m.note = outcome.note.clone();
    m.state = MatchState::Finished;
}

/// Seats a fresh copy of the winner of `matches[idx]` in the match it feeds.
fn advance_winner(matches: &mut [Match], idx: usize, broadcaster: &StateBroadcaster<'_>) {
    let Some(next_id) = matches[idx].next_match_id.clone() else {
        return;
    };
    let Some(winner) = matches[idx].winner().map(|p| p.bot.clone()) else {
        return;
    };

    let from = matches[idx].id.clone();

    match matches.iter_mut().find(|m| m.id == next_id) {
        Some(next) => {
            next.participants.push(Participant::new(winner));
            broadcaster.publish_update(next);
        }
        None => tracing::warn!("Match {} feeds unknown match {}", from, next_id),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bot::BotRunType;
    use crate::config::TournamentConfig;
    use crate::events::{MatchRecord, TournamentEvent};
    use crate::play::Play;
    use crate::registry::{BotRegistry, InMemoryRegistry};
    use crate::sandbox::BuiltinExecutor;
    use crate::testing::{RecordingSink, ScriptedExecutor};
    use std::sync::Arc;

    fn setup(names: &[(&str, BotRunType)]) -> (Arc<InMemoryRegistry>, Vec<Bot>) {
        let registry = Arc::new(InMemoryRegistry::new());
        let bots = names
            .iter()
            .map(|(name, run_type)| registry.register(name, *run_type, None).unwrap())
            .collect();
        (registry, bots)
    }

    fn updates(events: &[TournamentEvent]) -> Vec<&MatchRecord> {
        events
            .iter()
            .filter_map(|e| match e {
                TournamentEvent::Update { record, .. } => Some(record),
                TournamentEvent::Snapshot { .. } => None,
            })
            .collect()
    }

    #[tokio::test]
    async fn test_three_bot_tournament() {
        let (registry, bots) = setup(&[
            ("paper", BotRunType::Paper),
            ("rock", BotRunType::Rock),
            ("scissors", BotRunType::Scissors),
        ]);
        let resolver = MatchResolver::new(
            Arc::new(BuiltinExecutor),
            registry,
            &TournamentConfig::default(),
        );
        let sink = RecordingSink::new();
        let mut tournament = Tournament::from_entrants("t", bots).unwrap();

        let summary = tournament.run(&resolver, &sink, &CancelFlag::new()).await;

        // paper beats rock, then scissors (bye) beats paper.
        assert_eq!(summary.winner.as_deref(), Some("scissors"));
        assert_eq!(summary.matches_played, 2);
        assert_eq!(summary.coin_flips, 0);
        assert!(!summary.cancelled);

        let matches = tournament.matches();
        assert!(matches.iter().all(|m| m.state == MatchState::Finished));
        assert_eq!(matches[0].participants[0].is_winner, Some(true));
        assert_eq!(matches[0].participants[1].is_winner, Some(false));
        assert_eq!(matches[0].participants[0].result_text, vec!["📄"]);
        assert_eq!(matches[1].participants[0].is_winner, Some(true));
        assert_eq!(matches[1].participants[0].result_text, vec!["Bye"]);

        // The final starts from empty histories.
        let final_names: Vec<&str> = matches[2]
            .participants
            .iter()
            .map(|p| p.bot.name.as_str())
            .collect();
        assert_eq!(final_names, vec!["paper", "scissors"]);
        assert_eq!(matches[2].participants[0].moves, vec![Play::Paper]);
    }

    #[tokio::test]
    async fn test_event_order() {
        let (registry, bots) = setup(&[("a", BotRunType::Paper), ("b", BotRunType::Rock)]);
        let resolver = MatchResolver::new(
            Arc::new(BuiltinExecutor),
            registry,
            &TournamentConfig::default(),
        );
        let sink = RecordingSink::new();
        let mut tournament = Tournament::from_entrants("t", bots).unwrap();
        tournament.run(&resolver, &sink, &CancelFlag::new()).await;

        let events = sink.events();
        assert_eq!(events.len(), 4);
        match (&events[0], &events[3]) {
            (
                TournamentEvent::Snapshot { matches: first, .. },
                TournamentEvent::Snapshot { matches: last, .. },
            ) => {
                assert_eq!(first[0].state, MatchState::NotStarted);
                assert_eq!(last[0].state, MatchState::Finished);
            }
            other => panic!("Expected snapshots around the run, got {:?}", other),
        }
        let states: Vec<MatchState> = updates(&events).iter().map(|r| r.state).collect();
        assert_eq!(states, vec![MatchState::InProgress, MatchState::Finished]);
    }

    #[tokio::test]
    async fn test_seating_winners_updates_the_next_match() {
        let (registry, bots) = setup(&[
            ("paper", BotRunType::Paper),
            ("rock", BotRunType::Rock),
            ("scissors", BotRunType::Scissors),
        ]);
        let resolver = MatchResolver::new(
            Arc::new(BuiltinExecutor),
            registry,
            &TournamentConfig::default(),
        );
        let sink = RecordingSink::new();
        let mut tournament = Tournament::from_entrants("t", bots).unwrap();
        tournament.run(&resolver, &sink, &CancelFlag::new()).await;

        let events = sink.events();
        assert_eq!(events.len(), 9);
        let seen: Vec<(&str, MatchState, Vec<&str>)> = updates(&events)
            .into_iter()
            .map(|r| {
                let names = r.participants.iter().map(|p| p.name.as_str()).collect();
                (r.id.as_str(), r.state, names)
            })
            .collect();
        assert_eq!(
            seen,
            vec![
                ("match-1", MatchState::InProgress, vec!["paper", "rock"]),
                ("match-1", MatchState::Finished, vec!["paper", "rock"]),
                ("match-3", MatchState::NotStarted, vec!["paper"]),
                ("match-2", MatchState::Finished, vec!["scissors"]),
                ("match-3", MatchState::NotStarted, vec!["paper", "scissors"]),
                ("match-3", MatchState::InProgress, vec!["paper", "scissors"]),
                ("match-3", MatchState::Finished, vec!["paper", "scissors"]),
            ]
        );

        // Seated winners arrive undecided and without their earlier moves.
        let seated = updates(&events)[4];
        assert!(seated
            .participants
            .iter()
            .all(|p| p.is_winner.is_none() && p.result_text.is_empty()));
    }

    #[tokio::test]
    async fn test_winner_is_seated_exactly_once() {
        let (registry, bots) = setup(&[
            ("a", BotRunType::Rock),
            ("b", BotRunType::Scissors),
            ("c", BotRunType::Paper),
            ("d", BotRunType::Rock),
            ("e", BotRunType::Scissors),
        ]);
        let resolver = MatchResolver::new(
            Arc::new(BuiltinExecutor),
            registry,
            &TournamentConfig::default(),
        );
        let mut tournament = Tournament::from_entrants("t", bots).unwrap();
        let summary = tournament
            .run(&resolver, &RecordingSink::new(), &CancelFlag::new())
            .await;
        assert!(summary.winner.is_some());

        let matches = tournament.matches();
        let round = |m: &Match| m.tournament_round_text.parse::<u32>().unwrap();
        for m in matches.iter().filter(|m| !m.is_final()) {
            let winner = m.winner().unwrap();
            let seats: Vec<&str> = matches
                .iter()
                .filter(|other| round(other) == round(m) + 1)
                .filter(|other| other.participants.iter().any(|p| p.bot.id == winner.bot.id))
                .map(|other| other.id.as_str())
                .collect();
            assert_eq!(seats, vec![m.next_match_id.as_deref().unwrap()]);
        }
    }

    #[tokio::test]
    async fn test_draw_rounds_publish_progress() {
        let (registry, bots) = setup(&[("a", BotRunType::Command), ("b", BotRunType::Command)]);
        let executor = ScriptedExecutor::new()
            .script("a", [Play::Rock, Play::Rock, Play::Paper])
            .script("b", [Play::Rock, Play::Rock, Play::Rock]);
        let resolver = MatchResolver::new(
            Arc::new(executor),
            registry,
            &TournamentConfig::default(),
        );
        let sink = RecordingSink::new();
        let mut tournament = Tournament::from_entrants("t", bots).unwrap();
        tournament.run(&resolver, &sink, &CancelFlag::new()).await;

        let events = sink.events();
        let progress: Vec<usize> = updates(&events)
            .iter()
            .filter(|r| r.state == MatchState::InProgress)
            .map(|r| r.participants[0].result_text.len())
            .collect();
        assert_eq!(progress, vec![0, 1, 2]);
    }

    #[tokio::test]
    async fn test_invalid_plays_are_reported() {
        let (registry, bots) = setup(&[("good", BotRunType::Command), ("bad", BotRunType::Command)]);
        let executor = ScriptedExecutor::new().script("good", [Play::Rock]);
        let resolver = MatchResolver::new(
            Arc::new(executor),
            registry.clone(),
            &TournamentConfig::default(),
        );
        let mut tournament = Tournament::from_entrants("t", bots.clone()).unwrap();
        let summary = tournament
            .run(&resolver, &RecordingSink::new(), &CancelFlag::new())
            .await;

        assert_eq!(summary.winner.as_deref(), Some("good"));
        assert!(registry.is_disabled(bots[1].id));
        assert!(!registry.is_disabled(bots[0].id));
        assert_eq!(registry.active_bots().len(), 1);
    }

    #[tokio::test]
    async fn test_coin_flip_is_noted() {
        let (registry, bots) = setup(&[("r1", BotRunType::Rock), ("r2", BotRunType::Rock)]);
        let resolver = MatchResolver::new(
            Arc::new(BuiltinExecutor),
            registry,
            &TournamentConfig::default(),
        );
        let mut tournament = Tournament::from_entrants("t", bots).unwrap();
        let summary = tournament
            .run(&resolver, &RecordingSink::new(), &CancelFlag::new())
            .await;

        assert_eq!(summary.coin_flips, 1);
        assert!(summary.winner.is_some());
        let m = &tournament.matches()[0];
        assert_eq!(m.note.as_deref(), Some("resolved by coin flip after 5 draws"));
        assert_eq!(m.participants[0].moves.len(), 5);
    }

    #[tokio::test]
    async fn test_single_entrant_wins_without_playing() {
        let (registry, bots) = setup(&[("solo", BotRunType::Python)]);
        let executor = Arc::new(ScriptedExecutor::new());
        let resolver = MatchResolver::new(executor.clone(), registry, &TournamentConfig::default());
        let mut tournament = Tournament::from_entrants("t", bots).unwrap();

        let summary = tournament
            .run(&resolver, &RecordingSink::new(), &CancelFlag::new())
            .await;

        assert_eq!(summary.winner.as_deref(), Some("solo"));
        assert_eq!(summary.matches_played, 0);
        assert_eq!(executor.call_count(), 0);
    }

    #[tokio::test]
    async fn test_cancelled_run_leaves_matches_unplayed() {
        let (registry, bots) = setup(&[
            ("a", BotRunType::Rock),
            ("b", BotRunType::Paper),
            ("c", BotRunType::Rock),
            ("d", BotRunType::Paper),
        ]);
        let resolver = MatchResolver::new(
            Arc::new(BuiltinExecutor),
            registry,
            &TournamentConfig::default(),
        );
        let sink = RecordingSink::new();
        let cancel = CancelFlag::new();
        cancel.cancel();
        let mut tournament = Tournament::from_entrants("t", bots).unwrap();

        let summary = tournament.run(&resolver, &sink, &cancel).await;

        assert!(summary.cancelled);
        assert_eq!(summary.winner, None);
        assert_eq!(summary.matches_played, 0);
        assert!(tournament
            .matches()
            .iter()
            .all(|m| m.state == MatchState::NotStarted));

        let events = sink.events();
        assert_eq!(events.len(), 2);
        assert!(matches!(events[1], TournamentEvent::Snapshot { .. }));
    }

    #[test]
    fn test_from_entrants_rejects_empty() {
        assert_eq!(
            Tournament::from_entrants("t", vec![]).unwrap_err(),
            BracketError::InsufficientEntrants
        );
    }

    #[tokio::test]
    async fn test_registry_report_is_not_needed_for_clean_matches() {
        let (registry, bots) = setup(&[("a", BotRunType::Paper), ("b", BotRunType::Rock)]);
        let resolver = MatchResolver::new(
            Arc::new(BuiltinExecutor),
            registry.clone(),
            &TournamentConfig::default(),
        );
        let mut tournament = Tournament::from_entrants("t", bots).unwrap();
        tournament
            .run(&resolver, &RecordingSink::new(), &CancelFlag::new())
            .await;
        assert_eq!(registry.active_bots().len(), 2);
    }
}
