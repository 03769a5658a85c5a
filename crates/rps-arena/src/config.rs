//! Configuration file loading for the arena.
//!
//! This module provides types and functions for loading arena configuration
//! (sandbox limits, tournament pacing, server settings and the bot roster)
//! from TOML files.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

use crate::bot::BotRunType;

/// Errors that can occur when loading or parsing configuration.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Failed to read the configuration file from disk.
    #[error("Failed to read config file: {0}")]
    ReadError(#[from] std::io::Error),
    /// Failed to parse the configuration file as valid TOML.
    #[error("Failed to parse config: {0}")]
    ParseError(#[from] toml::de::Error),
}

/// A bot entry in the `[bots]` table.
///
/// Code is either given inline with `code` or read from `path` when the bot
/// is looked up. Built-in run-types need neither.
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct BotConfig {
    pub run_type: BotRunType,
    /// Inline code: script source for `python`, a command line for
    /// `command`. `wasi` bots give a module `path` instead.
    #[serde(default)]
    pub code: Option<String>,
    /// File to read the code from instead of `code`.
    #[serde(default)]
    pub path: Option<PathBuf>,
}

/// Limits and runtimes for sandboxed bot execution.
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct SandboxConfig {
    /// Wall-clock limit for a single execution, in milliseconds.
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    /// Maximum bytes captured from each of stdout and stderr.
    #[serde(default = "default_output_limit")]
    pub output_limit: usize,
    /// Maximum number of executions running at once.
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent: usize,
    /// WASI build of CPython used to run `python` bots.
    #[serde(default = "default_python_wasm")]
    pub python_wasm: PathBuf,
    /// WebAssembly instructions a single execution may consume.
    #[serde(default = "default_fuel")]
    pub fuel: u64,
    /// Linear memory a single execution may allocate, in bytes.
    #[serde(default = "default_memory_limit")]
    pub memory_limit: usize,
}

fn default_timeout_ms() -> u64 {
    1000
}

fn default_output_limit() -> usize {
    100 * 1024
}

fn default_max_concurrent() -> usize {
    4
}

fn default_python_wasm() -> PathBuf {
    PathBuf::from("python-3.11.4.wasm")
}

fn default_fuel() -> u64 {
    1_000_000_000
}

fn default_memory_limit() -> usize {
    100 << 20
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            timeout_ms: default_timeout_ms(),
            output_limit: default_output_limit(),
            max_concurrent: default_max_concurrent(),
            python_wasm: default_python_wasm(),
            fuel: default_fuel(),
            memory_limit: default_memory_limit(),
        }
    }
}

impl SandboxConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

/// Match pacing.
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct TournamentConfig {
    /// Pause after each played round so observers can follow along.
    #[serde(default)]
    pub round_delay_ms: u64,
    /// Attempts per match before the coin flip.
    #[serde(default = "default_max_rounds")]
    pub max_rounds: u32,
}

fn default_max_rounds() -> u32 {
    5
}

impl Default for TournamentConfig {
    fn default() -> Self {
        Self {
            round_delay_ms: 0,
            max_rounds: default_max_rounds(),
        }
    }
}

impl TournamentConfig {
    pub fn round_delay(&self) -> Duration {
        Duration::from_millis(self.round_delay_ms)
    }
}

/// HTTP/WebSocket server settings.
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
    /// Events buffered per subscriber before slow subscribers lag.
    #[serde(default = "default_broadcast_capacity")]
    pub broadcast_capacity: usize,
    #[serde(default = "default_static_dir")]
    pub static_dir: PathBuf,
    /// Largest accepted WASI module upload, in bytes.
    #[serde(default = "default_max_upload_bytes")]
    pub max_upload_bytes: usize,
}

fn default_bind() -> String {
    "127.0.0.1:3001".to_string()
}

fn default_broadcast_capacity() -> usize {
    200
}

fn default_static_dir() -> PathBuf {
    PathBuf::from("static")
}

fn default_max_upload_bytes() -> usize {
    16 << 20
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            broadcast_capacity: default_broadcast_capacity(),
            static_dir: default_static_dir(),
            max_upload_bytes: default_max_upload_bytes(),
        }
    }
}

/// Main arena configuration structure.
///
/// Uses `arena.toml` in the current directory by default.
#[derive(Debug, Deserialize, Serialize, Default, Clone)]
pub struct ArenaConfig {
    #[serde(default)]
    pub sandbox: SandboxConfig,
    #[serde(default)]
    pub tournament: TournamentConfig,
    #[serde(default)]
    pub server: ServerConfig,
    /// Map of bot names to their configurations.
    #[serde(default)]
    pub bots: HashMap<String, BotConfig>,
}

impl ArenaConfig {
    /// Loads the configuration from [`Self::config_path()`].
    ///
    /// Returns a default configuration if the file does not exist.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::ReadError`] if the file exists but cannot be read,
    /// or [`ConfigError::ParseError`] if the file contains invalid TOML.
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from(Self::config_path())
    }

    /// Loads the configuration from an explicit path, falling back to
    /// defaults when the file is missing.
    pub fn load_from<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        if path.exists() {
            let content = std::fs::read_to_string(path)?;
            Ok(toml::from_str(&content)?)
        } else {
            Ok(Self::default())
        }
    }

    /// Returns the default path to the configuration file.
    pub fn config_path() -> PathBuf {
        PathBuf::from("arena.toml")
    }
}
