//! External gateway clients library.
//!
//! This library provides access to the ProjectX (TopstepX) gateway:
//! - hub method and event names for the market and user hubs
//! - topic to invocation mapping used by the subscription manager
//! - REST login that exchanges an API key for a hub access token
//!
//! # Example
//!
//! ```ignore
//! use external_services::projectx::{ProjectXClient, Topic};
//!
//! let client = ProjectXClient::new();
//! let token = client.login_key("trader", "api-key").await?;
//! let call = Topic::Quotes.subscribe(Some("CON.F.US.EP.M25"));
//! ```

pub mod error;
pub mod projectx;

pub use error::{Error, Result};
