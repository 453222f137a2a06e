//! Session engine.
//!
//! [`session::Session`] is the public handle; everything else in this module
//! is state owned by the session actor and mutated only from its task.

pub mod broker;
pub mod correlation;
pub mod events;
pub mod forwarder;
pub mod log;
pub mod session;
pub mod terminals;
pub mod tool_calls;
pub mod turn;
