//! HTTP middleware for the arena server.

pub mod timing;

pub use timing::timing_layer;
