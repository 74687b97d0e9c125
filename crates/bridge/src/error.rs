//! Error types for the bridge service.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Missing environment variable: {0}")]
    MissingEnv(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// The sink was unreachable or answered with a non-2xx status.
    #[error("Sink delivery failed: {0}")]
    SinkDelivery(String),

    /// Bad input on the control endpoint.
    #[error("{0}")]
    Validation(String),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Hub(#[from] common::Error),

    #[error(transparent)]
    Gateway(#[from] external_services::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
