//! Bot registry seam.
//!
//! The tournament core only ever reads bots through [`BotRegistry`]; how they
//! are stored is up to the implementation. [`InMemoryRegistry`] is the one
//! used by the CLI and server, seeded from `arena.toml` and extended through
//! the registration endpoint.

use std::path::PathBuf;
use std::sync::{Mutex, MutexGuard};
use thiserror::Error;

use crate::bot::{Bot, BotCode, BotRunType};
use crate::config::ArenaConfig;

/// Longest accepted bot name, in characters.
pub const MAX_NAME_LEN: usize = 30;

#[derive(Error, Debug)]
pub enum RegistryError {
    #[error("Bot not found: {0}")]
    NotFound(String),
    #[error("Bot name cannot be empty")]
    NameEmpty,
    #[error("Bot name is limited to 30 characters")]
    NameTooLong,
    #[error("Bot name is already in use: {0}")]
    NameTaken(String),
    #[error("Code for bot {name} is unreadable: {source}")]
    CodeUnreadable {
        name: String,
        #[source]
        source: std::io::Error,
    },
}

/// Read access to registered bots for the duration of a tournament run.
pub trait BotRegistry: Send + Sync {
    /// Bots eligible to enter a new tournament, in registration order.
    fn active_bots(&self) -> Vec<Bot>;

    /// Looks a bot up by name.
    fn find(&self, name: &str) -> Option<Bot>;

    /// Returns the code for a bot, or `None` for run-types that need none.
    fn code(&self, bot_id: u32) -> Result<Option<BotCode>, RegistryError>;

    /// Called after a match in which the bot produced an invalid play.
    fn report_invalid(&self, _bot_id: u32) {}
}

#[derive(Debug, Clone)]
enum CodeSource {
    None,
    Inline(BotCode),
    /// Read on every lookup; WASI modules as bytes, anything else as text.
    File(PathBuf),
}

#[derive(Debug, Clone)]
struct Entry {
    bot: Bot,
    code: CodeSource,
    disabled: bool,
}

/// A registry that keeps every bot in memory.
#[derive(Debug, Default)]
pub struct InMemoryRegistry {
    entries: Mutex<Vec<Entry>>,
}

impl InMemoryRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a registry from the `[bots]` table, in name order.
    pub fn from_config(config: &ArenaConfig) -> Result<Self, RegistryError> {
        let registry = Self::new();
        let mut names: Vec<&String> = config.bots.keys().collect();
        names.sort();
        for name in names {
            let bot = &config.bots[name];
            let code = match (&bot.code, &bot.path) {
                (Some(code), _) => CodeSource::Inline(BotCode::Source(code.clone())),
                (None, Some(path)) => CodeSource::File(path.clone()),
                (None, None) => CodeSource::None,
            };
            registry.insert(name, bot.run_type, code)?;
        }
        Ok(registry)
    }

    /// Registers a new bot with inline code.
    ///
    /// # Errors
    ///
    /// Rejects empty names, names over [`MAX_NAME_LEN`] characters, and
    /// names already in use.
    pub fn register(
        &self,
        name: &str,
        run_type: BotRunType,
        code: Option<BotCode>,
    ) -> Result<Bot, RegistryError> {
        let code = code.map_or(CodeSource::None, CodeSource::Inline);
        self.insert(name, run_type, code)
    }

    /// Returns every bot, including disabled ones.
    pub fn all_bots(&self) -> Vec<Bot> {
        self.lock().iter().map(|e| e.bot.clone()).collect()
    }

    pub fn is_disabled(&self, bot_id: u32) -> bool {
        self.lock()
            .iter()
            .any(|e| e.bot.id == bot_id && e.disabled)
    }

    fn insert(&self, name: &str, run_type: BotRunType, code: CodeSource) -> Result<Bot, RegistryError> {
        let name = name.trim();
        if name.is_empty() {
            return Err(RegistryError::NameEmpty);
        }
        if name.chars().count() > MAX_NAME_LEN {
            return Err(RegistryError::NameTooLong);
        }

        let mut entries = self.lock();
        if entries.iter().any(|e| e.bot.name == name) {
            return Err(RegistryError::NameTaken(name.to_string()));
        }
        let id = entries.iter().map(|e| e.bot.id).max().map_or(1, |id| id + 1);
        let bot = Bot::new(id, name, run_type);
        entries.push(Entry {
            bot: bot.clone(),
            code,
            disabled: false,
        });
        Ok(bot)
    }

    fn lock(&self) -> MutexGuard<'_, Vec<Entry>> {
        self.entries.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl BotRegistry for InMemoryRegistry {
    fn active_bots(&self) -> Vec<Bot> {
        self.lock()
            .iter()
            .filter(|e| !e.disabled)
            .map(|e| e.bot.clone())
            .collect()
    }

    fn find(&self, name: &str) -> Option<Bot> {
        self.lock()
            .iter()
            .find(|e| e.bot.name == name)
            .map(|e| e.bot.clone())
    }

    fn code(&self, bot_id: u32) -> Result<Option<BotCode>, RegistryError> {
        let entry = self
            .lock()
            .iter()
            .find(|e| e.bot.id == bot_id)
            .cloned()
            .ok_or_else(|| RegistryError::NotFound(bot_id.to_string()))?;

        match entry.code {
            CodeSource::None => Ok(None),
            CodeSource::Inline(code) => Ok(Some(code)),
            CodeSource::File(path) => {
                let read = match entry.bot.run_type {
                    BotRunType::Wasi => std::fs::read(&path).map(BotCode::from),
                    _ => std::fs::read_to_string(&path).map(BotCode::from),
                };
                read.map(Some)
                    .map_err(|source| RegistryError::CodeUnreadable {
                        name: entry.bot.name.clone(),
                        source,
                    })
            }
        }
    }

    fn report_invalid(&self, bot_id: u32) {
        let mut entries = self.lock();
        if let Some(entry) = entries.iter_mut().find(|e| e.bot.id == bot_id) {
            if !entry.disabled {
                tracing::info!("Disabling bot {} after an invalid play", entry.bot.name);
            }
            entry.disabled = true;
        }
    }
}
