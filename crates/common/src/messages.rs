//! Commands and outbound calls exchanged with a running HubManager.

use crate::error::Result;
use serde_json::Value;

/// One outbound hub method call, e.g. `SubscribeContractQuotes("CON.F.US.EP.M25")`.
#[derive(Debug, Clone, PartialEq)]
pub struct Invocation {
    pub target: String,
    pub arguments: Vec<Value>,
}

impl Invocation {
    pub fn new(target: impl Into<String>, arguments: Vec<Value>) -> Self {
        Self {
            target: target.into(),
            arguments,
        }
    }
}

/// Anything that accepts outbound invocations without blocking.
///
/// Implementations only enqueue; delivery errors surface later in the
/// connection's own logs.
pub trait InvocationSink: Send + Sync {
    fn invoke(&self, invocation: Invocation) -> Result<()>;
}

/// Commands that can be sent to a HubManager at runtime.
#[derive(Debug, Clone)]
pub enum HubCommand {
    /// Issue a hub method call on the live connection.
    Invoke(Invocation),
    /// Graceful shutdown
    Shutdown,
}
