//! Built-in movers that run in-process.

use rand::seq::SliceRandom;
use std::time::Instant;

use super::{BotRunInput, BotRunResult, Executor, SandboxError};
use crate::bot::{BotExecutionSpec, BotRunType};
use crate::play::Play;

/// Executes the built-in run-types without launching a process.
///
/// Built-ins still go through the same stdout parsing as sandboxed bots so
/// their diagnostics look identical.
#[derive(Debug, Clone, Copy, Default)]
pub struct BuiltinExecutor;

impl BuiltinExecutor {
    fn select(run_type: BotRunType, stdin: &str) -> Result<Play, SandboxError> {
        let play = match run_type {
            BotRunType::Rock => Play::Rock,
            BotRunType::Paper => Play::Paper,
            BotRunType::Scissors => Play::Scissors,
            BotRunType::Random => random_play(),
            BotRunType::Snippy => {
                // An unreadable record just means no history to counter.
                let history = serde_json::from_str::<BotRunInput>(stdin)
                    .map(|input| input.history)
                    .unwrap_or_default();
                counter(&history)
            }
            other => return Err(SandboxError::Unsupported(other)),
        };
        Ok(play)
    }
}

impl Executor for BuiltinExecutor {
    async fn execute(&self, bot: &BotExecutionSpec, stdin: &str) -> BotRunResult {
        let start = Instant::now();
        match Self::select(bot.run_type, stdin) {
            Ok(play) => BotRunResult::from_output(
                stdin,
                format!("{}\n", play.token()),
                String::new(),
                start.elapsed().as_millis() as u64,
            ),
            Err(e) => BotRunResult::invalid(stdin, e.to_string()),
        }
    }
}

fn random_play() -> Play {
    Play::VALID
        .choose(&mut rand::thread_rng())
        .copied()
        .unwrap_or(Play::Rock)
}

/// Plays whatever beats the opponent's most recent valid play.
fn counter(history: &[Play]) -> Play {
    history
        .iter()
        .rev()
        .find_map(|play| play.beaten_by())
        .unwrap_or_else(random_play)
}
