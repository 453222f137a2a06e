#![forbid(unsafe_code)]

//! Agent session engine.
//!
//! Spawns an ACP coding agent as a child process, speaks JSON-RPC with it
//! over stdio, and keeps the conversation state a terminal front-end renders:
//! turns, tool calls, embedded terminals, and permission prompts.

pub mod acp;
pub mod config;
pub mod engine;
pub mod errors;
pub mod logging;
pub mod models;
pub mod workspace;

pub use config::EngineConfig;
pub use engine::session::Session;
pub use errors::{AppError, Result};
