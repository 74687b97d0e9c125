//! ProjectX real-time bridge.
//!
//! Keeps one SignalR connection to the market hub and one to the user hub,
//! forwards every gateway event to an HTTP sink, and lets a local control
//! endpoint bind the bridge to a trading account at runtime.

pub mod api;
pub mod binding;
pub mod config;
pub mod error;
pub mod handler;
pub mod relay;
pub mod subscription;
pub mod supervisor;

pub use binding::{AccountBinding, AccountCoordinator, BindingTransition};
pub use config::{BridgeConfig, Credentials};
pub use error::{Error, Result};
pub use handler::{ChannelHandler, DispatchTable};
pub use relay::{EventKind, EventRelay, EventSink, HttpSink, InboundEvent};
pub use subscription::{Subscription, SubscriptionManager, SubscriptionSet};
pub use supervisor::Bridge;
