//! Workspace access on behalf of the agent.
//!
//! - `fs`: path confinement plus `fs/read_text_file` and `fs/write_text_file` handling.
//! - `prompt`: turning user text with `@path` references into prompt content blocks.

pub mod fs;
pub mod prompt;
