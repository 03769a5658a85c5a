//! RPS Arena - elimination tournaments between rock-paper-scissors bots.
//!
//! This crate builds single-elimination brackets from registered bots, plays
//! every match by running both bots' untrusted code in a sandbox, and
//! publishes the evolving bracket as events for live observers.
//!
//! # Modules
//!
//! - [`play`] - plays and the beats relation
//! - [`bot`] - bot identity and run-types
//! - [`registry`] - read access to registered bots and their code
//! - [`sandbox`] - isolated, time-bounded execution of bot code
//! - [`resolver`] - best-of-five match resolution with the coin-flip tie-break
//! - [`bracket`] - bracket construction with byes
//! - [`orchestrator`] - drives a bracket to the final
//! - [`events`] - snapshot and update events
//! - [`config`] - `arena.toml` loading

pub mod bot;
pub mod bracket;
pub mod config;
pub mod events;
pub mod orchestrator;
pub mod play;
pub mod registry;
pub mod resolver;
pub mod sandbox;

#[cfg(test)]
mod testing;
