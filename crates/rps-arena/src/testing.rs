//! Test doubles shared by unit tests.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use crate::bot::BotExecutionSpec;
use crate::events::{EventSink, TournamentEvent};
use crate::play::Play;
use crate::sandbox::{BotRunInput, BotRunResult, Executor};

/// An executor that replays a fixed script of plays per bot name.
///
/// Once a bot's script runs out its last play repeats. Bots without a script
/// play `Invalid`.
#[derive(Default)]
pub struct ScriptedExecutor {
    scripts: HashMap<String, Vec<Play>>,
    calls: Mutex<Vec<(String, String)>>,
}

impl ScriptedExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn script(mut self, name: &str, plays: impl IntoIterator<Item = Play>) -> Self {
        self.scripts
            .insert(name.to_string(), plays.into_iter().collect());
        self
    }

    /// Every stdin record the named bot received, in call order.
    pub fn inputs_for(&self, name: &str) -> Vec<BotRunInput> {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|(bot, _)| bot == name)
            .map(|(_, stdin)| serde_json::from_str(stdin).unwrap())
            .collect()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }
}

impl Executor for ScriptedExecutor {
    async fn execute(&self, bot: &BotExecutionSpec, stdin: &str) -> BotRunResult {
        let turn = {
            let mut calls = self.calls.lock().unwrap();
            let turn = calls.iter().filter(|(name, _)| *name == bot.name).count();
            calls.push((bot.name.clone(), stdin.to_string()));
            turn
        };
        let play = self
            .scripts
            .get(&bot.name)
            .and_then(|script| script.get(turn).or_else(|| script.last()))
            .copied()
            .unwrap_or(Play::Invalid);
        BotRunResult::from_output(stdin, format!("{}\n", play.token()), String::new(), 0)
    }
}

/// Keeps every published event in memory.
#[derive(Debug, Default)]
pub struct RecordingSink {
    events: Mutex<Vec<TournamentEvent>>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<TournamentEvent> {
        self.lock().clone()
    }

    fn lock(&self) -> MutexGuard<'_, Vec<TournamentEvent>> {
        self.events.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl EventSink for RecordingSink {
    fn publish(&self, event: TournamentEvent) {
        self.lock().push(event);
    }
}
