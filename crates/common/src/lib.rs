//! Common types, traits, and utilities for SignalR hub connections.

pub mod error;
pub mod hub_handler;
pub mod hub_manager;
pub mod messages;
pub mod retry;
pub mod signalr;

pub use error::{Error, Result};
pub use hub_handler::HubHandler;
pub use hub_manager::{HubHandle, HubManager, HubManagerConfig};
pub use messages::{HubCommand, Invocation, InvocationSink};
pub use retry::{ConnectionState, ReconnectPolicy, RetryDecision, RetryState};
