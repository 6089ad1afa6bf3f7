//! Command handlers
//!
//! The operations the command-line front-end exposes. Each handler builds
//! the sessions it needs, runs them to completion and returns a
//! serializable result.

pub mod export;
pub mod recording;
