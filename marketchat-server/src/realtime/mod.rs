//! Persistent-connection delivery: who is online, and the per-socket protocol.

pub mod actor;
pub mod registry;
pub mod session;

pub use registry::{ConnectionHandle, ConnectionId, ConnectionRegistry, FanoutReport};
pub use session::{ConnectionSession, SessionState};
