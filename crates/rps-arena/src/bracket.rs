//! Single-elimination bracket construction.
//!
//! [`generate_matches`] turns an ordered entrant list into a flat list of
//! [`Match`]es linked into a binary tree through `next_match_id`. The list is
//! in creation order, which is also a valid play order: every match appears
//! after the matches that feed into it.

use rand::seq::SliceRandom;
use rand::Rng;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::bot::Bot;
use crate::play::Play;

/// Result marker shown for a participant who advanced without playing.
pub const BYE_MARKER: &str = "Bye";

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BracketError {
    #[error("At least one bot is required to start a tournament")]
    InsufficientEntrants,
}

/// Lifecycle of a single match.
///
/// Played matches go `NotStarted -> InProgress -> Finished`; walk-overs go
/// `Bye -> Finished`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MatchState {
    NotStarted,
    InProgress,
    Bye,
    Finished,
}

/// A bot's seat in one match.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Participant {
    pub bot: Bot,
    /// Plays made so far in this match.
    pub moves: Vec<Play>,
    /// `None` until the match is decided.
    pub is_winner: Option<bool>,
    /// Per-round markers for display, or the bye marker.
    pub result_text: Vec<String>,
}

impl Participant {
    /// A fresh seat with no plays and an undecided result.
    pub fn new(bot: Bot) -> Self {
        Self {
            bot,
            moves: Vec::new(),
            is_winner: None,
            result_text: Vec::new(),
        }
    }

    fn bye(bot: Bot) -> Self {
        Self {
            result_text: vec![BYE_MARKER.to_string()],
            ..Self::new(bot)
        }
    }

    /// Replaces the move history and refreshes the display markers.
    pub fn set_moves(&mut self, moves: &[Play]) {
        self.moves = moves.to_vec();
        self.result_text = moves.iter().map(|play| play.emoji().to_string()).collect();
    }
}

/// One node of the bracket.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Match {
    pub id: String,
    /// 1-based round number, as text.
    pub tournament_round_text: String,
    /// The match the winner advances to; `None` only for the final.
    pub next_match_id: Option<String>,
    pub participants: Vec<Participant>,
    pub state: MatchState,
    /// How the match was decided, when it was not decided by play.
    pub note: Option<String>,
}

impl Match {
    fn new(id: String, round: u32, participants: Vec<Participant>, state: MatchState) -> Self {
        Self {
            id,
            tournament_round_text: round.to_string(),
            next_match_id: None,
            participants,
            state,
            note: None,
        }
    }

    pub fn is_final(&self) -> bool {
        self.next_match_id.is_none()
    }

    /// The participant flagged as winner, if the match is decided.
    pub fn winner(&self) -> Option<&Participant> {
        self.participants
            .iter()
            .find(|p| p.is_winner == Some(true))
    }
}

/// Shuffles entrants into an unpredictable seeding order.
pub fn seed_entrants<R: Rng + ?Sized>(entrants: &mut [Bot], rng: &mut R) {
    entrants.shuffle(rng);
}

/// Builds the bracket for `entrants`, taken in the given order.
///
/// The first `N - byes` entrants are paired into first-round matches; each
/// remaining entrant gets a bye match of its own, where
/// `byes = 2^ceil(log2 N) - N`. Later rounds pair the previous round's
/// matches in order until one match remains.
///
/// # Errors
///
/// Returns [`BracketError::InsufficientEntrants`] for an empty list.
pub fn generate_matches(entrants: Vec<Bot>) -> Result<Vec<Match>, BracketError> {
    if entrants.is_empty() {
        return Err(BracketError::InsufficientEntrants);
    }

    let mut counter = 0u32;
    let mut next_id = || {
        counter += 1;
        format!("match-{counter}")
    };

    if entrants.len() == 1 {
        return Ok(entrants
            .into_iter()
            .map(|bot| Match::new(next_id(), 1, vec![Participant::bye(bot)], MatchState::Bye))
            .collect());
    }

    let size = entrants.len().next_power_of_two();
    let byes = size - entrants.len();
    let mut paired = entrants;
    let walkovers = paired.split_off(paired.len() - byes);

    let mut current: Vec<Match> = Vec::with_capacity(size / 2);
    let mut seats = paired.into_iter();
    while let (Some(a), Some(b)) = (seats.next(), seats.next()) {
        current.push(Match::new(
            next_id(),
            1,
            vec![Participant::new(a), Participant::new(b)],
            MatchState::NotStarted,
        ));
    }
    for bot in walkovers {
        current.push(Match::new(next_id(), 1, vec![Participant::bye(bot)], MatchState::Bye));
    }

    let mut matches: Vec<Match> = Vec::with_capacity(size - 1);
    let mut round = 1;
    while current.len() > 1 {
        round += 1;
        let mut next_round: Vec<Match> = Vec::with_capacity(current.len() / 2);
        for pair in current.chunks_mut(2) {
            let successor = Match::new(next_id(), round, Vec::new(), MatchState::NotStarted);
            for feeder in pair.iter_mut() {
                feeder.next_match_id = Some(successor.id.clone());
            }
            next_round.push(successor);
        }
        matches.append(&mut current);
        current = next_round;
    }
    matches.append(&mut current);

    Ok(matches)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bot::BotRunType;

    fn bots(n: u32) -> Vec<Bot> {
        (1..=n)
            .map(|i| Bot::new(i, format!("bot{i}"), BotRunType::Random))
            .collect()
    }

    fn names(m: &Match) -> Vec<&str> {
        m.participants.iter().map(|p| p.bot.name.as_str()).collect()
    }

    #[test]
    fn test_empty_entrants_is_an_error() {
        assert_eq!(
            generate_matches(vec![]),
            Err(BracketError::InsufficientEntrants)
        );
    }

    #[test]
    fn test_single_entrant_is_a_lone_bye() {
        let matches = generate_matches(bots(1)).unwrap();
        assert_eq!(matches.len(), 1);
        assert_eq!(matches[0].state, MatchState::Bye);
        assert!(matches[0].is_final());
        assert_eq!(matches[0].participants[0].result_text, vec!["Bye"]);
    }

    #[test]
    fn test_three_entrants() {
        let matches = generate_matches(bots(3)).unwrap();
        assert_eq!(matches.len(), 3);

        let (first, bye, last) = (&matches[0], &matches[1], &matches[2]);
        assert_eq!(first.state, MatchState::NotStarted);
        assert_eq!(names(first), vec!["bot1", "bot2"]);
        assert_eq!(first.tournament_round_text, "1");

        assert_eq!(bye.state, MatchState::Bye);
        assert_eq!(names(bye), vec!["bot3"]);
        assert_eq!(bye.tournament_round_text, "1");

        assert_eq!(last.tournament_round_text, "2");
        assert!(last.participants.is_empty());
        assert!(last.is_final());
        assert_eq!(first.next_match_id.as_deref(), Some(last.id.as_str()));
        assert_eq!(bye.next_match_id.as_deref(), Some(last.id.as_str()));
    }

    #[test]
    fn test_power_of_two_has_no_byes() {
        let matches = generate_matches(bots(8)).unwrap();
        assert_eq!(matches.len(), 7);
        assert!(matches.iter().all(|m| m.state == MatchState::NotStarted));

        let rounds: Vec<&str> = matches
            .iter()
            .map(|m| m.tournament_round_text.as_str())
            .collect();
        assert_eq!(rounds, vec!["1", "1", "1", "1", "2", "2", "3"]);
        assert_eq!(names(&matches[3]), vec!["bot7", "bot8"]);
    }

    #[test]
    fn test_two_entrants_play_the_final_directly() {
        let matches = generate_matches(bots(2)).unwrap();
        assert_eq!(matches.len(), 1);
        assert!(matches[0].is_final());
        assert_eq!(matches[0].participants.len(), 2);
    }

    #[test]
    fn test_byes_take_the_last_entrants() {
        let matches = generate_matches(bots(5)).unwrap();
        let first_round: Vec<&Match> = matches
            .iter()
            .filter(|m| m.tournament_round_text == "1")
            .collect();
        assert_eq!(first_round.len(), 4);
        assert_eq!(names(first_round[0]), vec!["bot1", "bot2"]);
        for (m, name) in first_round[1..].iter().zip(["bot3", "bot4", "bot5"]) {
            assert_eq!(m.state, MatchState::Bye);
            assert_eq!(names(m), vec![name]);
        }
    }

    #[test]
    fn test_ids_are_unique() {
        let matches = generate_matches(bots(6)).unwrap();
        let mut ids: Vec<&str> = matches.iter().map(|m| m.id.as_str()).collect();
        ids.sort();
        ids.dedup();
        assert_eq!(ids.len(), matches.len());
    }

    #[test]
    fn test_seeding_keeps_every_entrant() {
        let mut entrants = bots(10);
        seed_entrants(&mut entrants, &mut rand::thread_rng());
        let mut ids: Vec<u32> = entrants.iter().map(|b| b.id).collect();
        ids.sort();
        assert_eq!(ids, (1..=10).collect::<Vec<_>>());
    }

    #[test]
    fn test_set_moves_refreshes_markers() {
        let mut p = Participant::new(Bot::new(1, "a", BotRunType::Rock));
        p.set_moves(&[Play::Rock, Play::Invalid]);
        assert_eq!(p.result_text, vec!["🗿", "invalid"]);
        assert_eq!(p.moves.len(), 2);
    }
}
