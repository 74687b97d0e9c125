//! ProjectX gateway API client.
//!
//! Provides the REST login client and SignalR hub vocabulary for ProjectX.

pub mod client;
pub mod hubs;
pub mod types;

pub use client::{ProjectXClient, API_BASE_URL};
pub use hubs::{key_argument, Hub, Topic, DEFAULT_CONTRACT_ID};
pub use types::{LoginKeyRequest, LoginKeyResponse};
