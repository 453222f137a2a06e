//! Agent Client Protocol (ACP) stream handling.
//!
//! An agent speaks JSON-RPC 2.0 as newline-delimited JSON over its stdio.
//! This module owns everything between the raw byte streams and typed
//! messages:
//!
//! - `codec`: [`LinesCodec`](tokio_util::codec::LinesCodec)-based framing with a line-length cap.
//! - `message`: closed, typed decoding of inbound lines and outbound builders.
//! - `reader` / `writer`: the tasks that move lines between the streams and channels.
//! - `spawner`: process spawning, stderr capture, and exit monitoring.
//! - `transport`: the handle a session holds on to.

pub mod codec;
pub mod message;
pub mod reader;
pub mod spawner;
pub mod transport;
pub mod writer;
