//! Rock-paper-scissors plays and the rules between them.

use serde::{Deserialize, Serialize};

/// A single play made by a bot in one round.
///
/// `Invalid` is not a move: it marks a round in which the bot produced no
/// usable output (crash, timeout, garbage on the last line).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Play {
    Rock,
    Paper,
    Scissors,
    Invalid,
}

/// Outcome of a single round from the first player's point of view.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoundOutcome {
    First,
    Second,
    Draw,
}

impl Play {
    /// The three valid plays, in canonical order.
    pub const VALID: [Play; 3] = [Play::Rock, Play::Paper, Play::Scissors];

    /// Parses a canonical lower-case token. Matching is case-sensitive.
    pub fn from_token(token: &str) -> Option<Self> {
        match token {
            "rock" => Some(Play::Rock),
            "paper" => Some(Play::Paper),
            "scissors" => Some(Play::Scissors),
            _ => None,
        }
    }

    /// Returns the canonical lower-case token a bot prints for this play.
    pub const fn token(self) -> &'static str {
        match self {
            Play::Rock => "rock",
            Play::Paper => "paper",
            Play::Scissors => "scissors",
            Play::Invalid => "invalid",
        }
    }

    #[inline]
    pub const fn is_valid(self) -> bool {
        !matches!(self, Play::Invalid)
    }

    /// Returns true if `self` beats `other`.
    ///
    /// Rock beats Scissors, Scissors beats Paper, Paper beats Rock, and any
    /// valid play beats `Invalid`.
    pub const fn beats(self, other: Play) -> bool {
        matches!(
            (self, other),
            (Play::Rock, Play::Scissors)
                | (Play::Scissors, Play::Paper)
                | (Play::Paper, Play::Rock)
                | (Play::Rock, Play::Invalid)
                | (Play::Paper, Play::Invalid)
                | (Play::Scissors, Play::Invalid)
        )
    }

    /// Returns the valid play that beats `self`, or `None` for `Invalid`.
    pub const fn beaten_by(self) -> Option<Play> {
        match self {
            Play::Rock => Some(Play::Paper),
            Play::Paper => Some(Play::Scissors),
            Play::Scissors => Some(Play::Rock),
            Play::Invalid => None,
        }
    }

    /// Decides a single round. Equal plays, including two `Invalid`s, draw.
    pub const fn against(self, other: Play) -> RoundOutcome {
        if self.beats(other) {
            RoundOutcome::First
        } else if other.beats(self) {
            RoundOutcome::Second
        } else {
            RoundOutcome::Draw
        }
    }

    /// Per-round marker shown next to a participant in the bracket view.
    pub const fn emoji(self) -> &'static str {
        match self {
            Play::Rock => "🗿",
            Play::Paper => "📄",
            Play::Scissors => "✂️",
            Play::Invalid => "invalid",
        }
    }
}

impl std::fmt::Display for Play {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Play::Rock => write!(f, "Rock"),
            Play::Paper => write!(f, "Paper"),
            Play::Scissors => write!(f, "Scissors"),
            Play::Invalid => write!(f, "Invalid"),
        }
    }
}
