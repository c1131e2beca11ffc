//! Host-facing command contract and stdio bridge.

pub mod channel;
pub mod contract;
pub mod stdio;

pub use channel::{HostCommandClient, HostCommandServer, PendingResponse, command_channel};
pub use contract::{CommandEnvelope, CommandName, EventEnvelope, ResponseEnvelope};
