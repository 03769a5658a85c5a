//! Bot identity and execution descriptions.

use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// How a bot's code is executed.
///
/// The built-in movers run in-process. `python` and `wasi` bots run inside
/// the embedded WebAssembly sandbox. `command` bots run host programs and
/// may only come from the operator's `arena.toml`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BotRunType {
    /// Uniformly random valid play.
    Random,
    /// Always rock.
    Rock,
    /// Always paper.
    Paper,
    /// Always scissors.
    Scissors,
    /// Plays whatever beats the opponent's last valid play.
    Snippy,
    /// Python source run by the WebAssembly build of CPython.
    Python,
    /// A host executable with optional arguments.
    Command,
    /// A compiled WASI preview1 module.
    Wasi,
}

impl BotRunType {
    /// Returns true if the run-type runs a host program rather than sandboxed
    /// code. Such bots are never accepted from clients.
    pub const fn runs_host_program(self) -> bool {
        matches!(self, BotRunType::Command)
    }

    /// Returns true if the run-type is handled without any sandbox.
    pub const fn is_builtin(self) -> bool {
        matches!(
            self,
            BotRunType::Random
                | BotRunType::Rock
                | BotRunType::Paper
                | BotRunType::Scissors
                | BotRunType::Snippy
        )
    }
}

/// A tournament entrant as known to the registry.
///
/// The code itself is not carried here; it is looked up by id when the bot
/// is about to play.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Bot {
    pub id: u32,
    pub name: String,
    pub run_type: BotRunType,
}

impl Bot {
    pub fn new(id: u32, name: impl Into<String>, run_type: BotRunType) -> Self {
        Self {
            id,
            name: name.into(),
            run_type,
        }
    }
}

/// A bot's code as handed to the sandbox.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BotCode {
    /// Python source, or the command line of an operator-configured bot.
    Source(String),
    /// A compiled WASI preview1 module.
    Module(Arc<[u8]>),
}

impl BotCode {
    pub fn as_source(&self) -> Option<&str> {
        match self {
            BotCode::Source(source) => Some(source),
            BotCode::Module(_) => None,
        }
    }

    pub fn as_module(&self) -> Option<&Arc<[u8]>> {
        match self {
            BotCode::Module(bytes) => Some(bytes),
            BotCode::Source(_) => None,
        }
    }
}

impl From<String> for BotCode {
    fn from(source: String) -> Self {
        BotCode::Source(source)
    }
}

impl From<&str> for BotCode {
    fn from(source: &str) -> Self {
        BotCode::Source(source.to_string())
    }
}

impl From<Vec<u8>> for BotCode {
    fn from(bytes: Vec<u8>) -> Self {
        BotCode::Module(bytes.into())
    }
}

/// Everything the sandbox needs to run a bot once.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BotExecutionSpec {
    pub name: String,
    pub run_type: BotRunType,
    /// `None` when the registry had no code for the bot.
    pub code: Option<BotCode>,
}

impl BotExecutionSpec {
    pub fn new(bot: &Bot, code: Option<BotCode>) -> Self {
        Self {
            name: bot.name.clone(),
            run_type: bot.run_type,
            code,
        }
    }
}
