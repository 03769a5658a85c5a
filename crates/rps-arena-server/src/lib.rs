//! RPS Arena Server Library
//!
//! Shared HTTP plumbing for the arena server binary.

pub mod middleware;
