//! Isolated, time-bounded execution of bot code.
//!
//! A bot runs once per round. It receives a single JSON line on stdin
//! describing the match so far and must print its play as the last
//! non-empty line of stdout. Every failure mode (no code, spawn failure,
//! crash, timeout, unparseable output) degrades to [`Play::Invalid`]; nothing
//! escapes [`Executor::execute`] as an error.
//!
//! # Modules
//!
//! - [`builtin`] - in-process deterministic and random movers
//! - [`wasm`] - embedded WebAssembly sandbox for Python scripts and WASI modules
//! - [`process`] - host processes for operator-configured commands

pub mod builtin;
pub mod process;
pub mod wasm;

use serde::{Deserialize, Serialize};
use std::future::Future;
use thiserror::Error;

use crate::bot::{BotExecutionSpec, BotRunType};
use crate::config::SandboxConfig;
use crate::play::Play;

pub use builtin::BuiltinExecutor;
pub use process::ProcessExecutor;
pub use wasm::WasmExecutor;

/// Reasons an execution could not produce output at all.
///
/// These never leave the sandbox; they become the `invalid_reason` of an
/// Invalid [`BotRunResult`].
#[derive(Error, Debug)]
pub enum SandboxError {
    #[error("No code available for bot")]
    NoCode,
    #[error("Bot command is empty")]
    EmptyCommand,
    #[error("Run type {0:?} is not handled by this executor")]
    Unsupported(BotRunType),
    #[error("Failed to prepare sandbox workspace: {0}")]
    Workspace(#[source] std::io::Error),
    #[error("Failed to start bot: {0}")]
    Spawn(#[source] std::io::Error),
    #[error("Failed to wait for bot: {0}")]
    Wait(#[source] std::io::Error),
    #[error("Sandbox is shutting down")]
    Closed,
    #[error("Failed to set up WebAssembly engine: {0}")]
    Engine(String),
    #[error("Python runtime unavailable: {0}")]
    RuntimeUnavailable(String),
    #[error("Error loading wasm module")]
    ModuleLoad,
    #[error("Bot needs source code")]
    ExpectedSource,
    #[error("WASI bots need a compiled module")]
    ExpectedModule,
}

/// The stdin record handed to a bot for one round.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BotRunInput {
    pub botname: String,
    pub round: u32,
    pub opponent: String,
    /// The opponent's plays so far in this match, oldest first.
    pub history: Vec<Play>,
}

impl BotRunInput {
    pub fn new(botname: &str, opponent: &str, history: &[Play]) -> Self {
        Self {
            botname: botname.to_string(),
            round: history.len() as u32,
            opponent: opponent.to_string(),
            history: history.to_vec(),
        }
    }

    /// Serializes the record as a single line without embedded newlines.
    pub fn to_stdin(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}

/// Everything captured from one execution.
///
/// Only `play` feeds tournament logic; the rest is diagnostic output for the
/// bot's author.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BotRunResult {
    pub stdin: String,
    pub stdout: String,
    pub stderr: String,
    pub duration_ms: u64,
    pub play: Play,
    pub invalid_reason: Option<String>,
}

impl BotRunResult {
    /// A result for an execution that produced nothing usable.
    pub fn invalid(stdin: &str, reason: impl Into<String>) -> Self {
        Self {
            stdin: stdin.to_string(),
            stdout: String::new(),
            stderr: String::new(),
            duration_ms: 0,
            play: Play::Invalid,
            invalid_reason: Some(reason.into()),
        }
    }

    /// Builds a result from captured output of a run that exited cleanly.
    pub fn from_output(stdin: &str, stdout: String, stderr: String, duration_ms: u64) -> Self {
        let play = parse_play(&stdout);
        let invalid_reason = (!play.is_valid())
            .then(|| "Program did not print a valid play on the last line.".to_string());
        Self {
            stdin: stdin.to_string(),
            stdout,
            stderr,
            duration_ms,
            play,
            invalid_reason,
        }
    }

    /// Forces the play to Invalid, keeping the captured output.
    pub(crate) fn into_invalid(mut self) -> Self {
        self.play = Play::Invalid;
        self
    }
}

/// Extracts the play from captured stdout.
///
/// Takes the last non-empty line, trims it and compares it case-sensitively
/// against `rock`, `paper` and `scissors`.
pub fn parse_play(stdout: &str) -> Play {
    stdout
        .lines()
        .rev()
        .map(str::trim)
        .find(|line| !line.is_empty())
        .and_then(Play::from_token)
        .unwrap_or(Play::Invalid)
}

/// One way of running bot code.
pub trait Executor: Send + Sync {
    /// Runs the bot once with `stdin` as its only input.
    fn execute(
        &self,
        bot: &BotExecutionSpec,
        stdin: &str,
    ) -> impl Future<Output = BotRunResult> + Send;
}

/// Dispatches each execution to the executor for the bot's run-type.
pub struct SandboxExecutor {
    builtin: BuiltinExecutor,
    wasm: WasmExecutor,
    process: ProcessExecutor,
}

impl SandboxExecutor {
    /// # Errors
    ///
    /// Fails if the WebAssembly engine cannot be created.
    pub fn new(config: &SandboxConfig) -> Result<Self, SandboxError> {
        Ok(Self {
            builtin: BuiltinExecutor,
            wasm: WasmExecutor::new(config)?,
            process: ProcessExecutor::new(config),
        })
    }

    /// Runs a bot and returns only its play.
    pub async fn run_bot(&self, bot: &BotExecutionSpec, stdin: &str) -> Play {
        self.execute(bot, stdin).await.play
    }
}

impl Executor for SandboxExecutor {
    async fn execute(&self, bot: &BotExecutionSpec, stdin: &str) -> BotRunResult {
        match bot.run_type {
            BotRunType::Python | BotRunType::Wasi => self.wasm.execute(bot, stdin).await,
            BotRunType::Command => self.process.execute(bot, stdin).await,
            _ => self.builtin.execute(bot, stdin).await,
        }
    }
}

/// Runs a bot once for diagnostics.
///
/// Uses `stdin` verbatim when given, otherwise a sample record from round 2
/// of a match against `testbot`.
pub async fn test_bot<E: Executor>(
    executor: &E,
    bot: &BotExecutionSpec,
    stdin: Option<String>,
) -> BotRunResult {
    let stdin = match stdin {
        Some(stdin) => stdin,
        None => {
            let sample = BotRunInput::new(&bot.name, "testbot", &[Play::Rock, Play::Scissors]);
            match sample.to_stdin() {
                Ok(line) => line,
                Err(e) => return BotRunResult::invalid("", e.to_string()),
            }
        }
    };
    executor.execute(bot, &stdin).await
}
