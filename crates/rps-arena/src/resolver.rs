//! Match resolution between two bots.
//!
//! This module provides the [`MatchResolver`], which plays up to five
//! sandboxed rounds between two bots and decides the match. The first
//! decisive round ends the match; five draws in a row are broken by a coin
//! flip.

use rand::Rng;
use std::convert::Infallible;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

use crate::bot::{Bot, BotExecutionSpec};
use crate::config::TournamentConfig;
use crate::play::{Play, RoundOutcome};
use crate::registry::BotRegistry;
use crate::sandbox::{BotRunInput, Executor};

/// Upper bound on rounds per match.
pub const MAX_ROUNDS: u32 = 5;

/// Returned when a match is abandoned because its tournament was cancelled.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("Tournament was cancelled")]
pub struct Cancelled;

/// A shared flag that stops a running tournament between rounds.
///
/// Clones share the same flag.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Checked before every round; an error abandons the match.
trait Interrupt: Sync {
    type Error;

    fn check(&self) -> Result<(), Self::Error>;
}

impl Interrupt for CancelFlag {
    type Error = Cancelled;

    fn check(&self) -> Result<(), Cancelled> {
        if self.is_cancelled() {
            Err(Cancelled)
        } else {
            Ok(())
        }
    }
}

/// A match that always runs to its end.
struct Uninterrupted;

impl Interrupt for Uninterrupted {
    type Error = Infallible;

    fn check(&self) -> Result<(), Infallible> {
        Ok(())
    }
}

/// One side of a match.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Side {
    First,
    Second,
}

impl Side {
    pub const fn other(self) -> Side {
        match self {
            Side::First => Side::Second,
            Side::Second => Side::First,
        }
    }

    /// Index of this side in a two-element participant list.
    pub const fn index(self) -> usize {
        match self {
            Side::First => 0,
            Side::Second => 1,
        }
    }
}

/// The result of a resolved match.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MatchOutcome {
    /// The side that advances. Always set, even after a coin flip.
    pub winner: Side,
    /// Every play the first bot made, oldest first.
    pub moves1: Vec<Play>,
    /// Every play the second bot made, oldest first.
    pub moves2: Vec<Play>,
    /// Set when the winner was not decided by play.
    pub note: Option<String>,
    pub coin_flip: bool,
}

impl MatchOutcome {
    pub fn rounds_played(&self) -> usize {
        self.moves1.len()
    }

    /// Returns true if the given side made at least one invalid play.
    pub fn has_invalid(&self, side: Side) -> bool {
        let moves = match side {
            Side::First => &self.moves1,
            Side::Second => &self.moves2,
        };
        moves.iter().any(|play| !play.is_valid())
    }
}

/// Plays matches by running both bots through an [`Executor`].
pub struct MatchResolver<E> {
    executor: Arc<E>,
    registry: Arc<dyn BotRegistry>,
    max_rounds: u32,
    round_delay: Duration,
}

impl<E: Executor> MatchResolver<E> {
    pub fn new(executor: Arc<E>, registry: Arc<dyn BotRegistry>, config: &TournamentConfig) -> Self {
        Self {
            executor,
            registry,
            max_rounds: config.max_rounds.clamp(1, MAX_ROUNDS),
            round_delay: config.round_delay(),
        }
    }

    pub fn registry(&self) -> &Arc<dyn BotRegistry> {
        &self.registry
    }

    /// Resolves a match with no cancellation and no progress reporting.
    pub async fn resolve(&self, bot1: &Bot, bot2: &Bot) -> MatchOutcome {
        match self.play_rounds(bot1, bot2, &Uninterrupted, |_, _| {}).await {
            Ok(outcome) => outcome,
            Err(never) => match never {},
        }
    }

    /// Resolves a match between `bot1` and `bot2`.
    ///
    /// `on_draw` is called with both move histories after every drawn round
    /// that is followed by another round.
    ///
    /// # Errors
    ///
    /// Returns [`Cancelled`] if `cancel` is set before a round starts.
    pub async fn resolve_with<F>(
        &self,
        bot1: &Bot,
        bot2: &Bot,
        cancel: &CancelFlag,
        on_draw: F,
    ) -> Result<MatchOutcome, Cancelled>
    where
        F: FnMut(&[Play], &[Play]),
    {
        self.play_rounds(bot1, bot2, cancel, on_draw).await
    }

    async fn play_rounds<I, F>(
        &self,
        bot1: &Bot,
        bot2: &Bot,
        interrupt: &I,
        mut on_draw: F,
    ) -> Result<MatchOutcome, I::Error>
    where
        I: Interrupt,
        F: FnMut(&[Play], &[Play]),
    {
        let spec1 = self.execution_spec(bot1);
        let spec2 = self.execution_spec(bot2);

        let mut moves1: Vec<Play> = Vec::new();
        let mut moves2: Vec<Play> = Vec::new();

        for round in 0..self.max_rounds {
            interrupt.check()?;

            // Each bot sees what its opponent has played so far.
            let input1 = BotRunInput::new(&bot1.name, &bot2.name, &moves2);
            let input2 = BotRunInput::new(&bot2.name, &bot1.name, &moves1);
            let (play1, play2) = tokio::join!(self.play(&spec1, &input1), self.play(&spec2, &input2));

            moves1.push(play1);
            moves2.push(play2);
            tracing::debug!(
                round,
                "{} played {}, {} played {}",
                bot1.name,
                play1,
                bot2.name,
                play2
            );

            if !self.round_delay.is_zero() {
                tokio::time::sleep(self.round_delay).await;
            }

            let winner = match play1.against(play2) {
                RoundOutcome::First => Side::First,
                RoundOutcome::Second => Side::Second,
                RoundOutcome::Draw => {
                    if round + 1 < self.max_rounds {
                        on_draw(&moves1, &moves2);
                    }
                    continue;
                }
            };
            return Ok(MatchOutcome {
                winner,
                moves1,
                moves2,
                note: None,
                coin_flip: false,
            });
        }

        let winner = if rand::thread_rng().gen_bool(0.5) {
            Side::First
        } else {
            Side::Second
        };
        let winner_name = match winner {
            Side::First => &bot1.name,
            Side::Second => &bot2.name,
        };
        tracing::info!(
            "{} vs {} drew {} rounds; coin flip goes to {}",
            bot1.name,
            bot2.name,
            self.max_rounds,
            winner_name
        );

        Ok(MatchOutcome {
            winner,
            moves1,
            moves2,
            note: Some(format!(
                "resolved by coin flip after {} draws",
                self.max_rounds
            )),
            coin_flip: true,
        })
    }

    /// Looks up a bot's code once per match. A failed lookup leaves the bot
    /// without code, which the sandbox turns into invalid plays.
    fn execution_spec(&self, bot: &Bot) -> BotExecutionSpec {
        let code = match self.registry.code(bot.id) {
            Ok(code) => code,
            Err(e) => {
                tracing::warn!("No code available for bot {}: {}", bot.name, e);
                None
            }
        };
        BotExecutionSpec::new(bot, code)
    }

    async fn play(&self, spec: &BotExecutionSpec, input: &BotRunInput) -> Play {
        match input.to_stdin() {
            Ok(stdin) => self.executor.execute(spec, &stdin).await.play,
            Err(e) => {
                tracing::warn!("Failed to encode input for {}: {}", spec.name, e);
                Play::Invalid
            }
        }
    }
}
