//! Domain model module declarations.

pub mod permission;
pub mod session;
pub mod terminal;
pub mod tool_call;
pub mod turn;
