//! Connection lifecycle states and the bounded reconnect policy.

use serde::Serialize;
use std::fmt;
use std::time::Duration;

/// Lifecycle of one hub connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    /// Automatic recovery in progress; `attempt` starts at 1.
    Reconnecting { attempt: u32 },
    /// Terminal. No further reconnect attempts are made.
    Failed,
}

impl ConnectionState {
    pub fn is_connected(&self) -> bool {
        matches!(self, ConnectionState::Connected)
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionState::Disconnected => write!(f, "disconnected"),
            ConnectionState::Connecting => write!(f, "connecting"),
            ConnectionState::Connected => write!(f, "connected"),
            ConnectionState::Reconnecting { attempt } => write!(f, "reconnecting ({})", attempt),
            ConnectionState::Failed => write!(f, "failed"),
        }
    }
}

/// Fixed-delay reconnect policy with an attempt ceiling.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectPolicy {
    pub max_attempts: u32,
    pub delay: Duration,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            delay: Duration::from_secs(5),
        }
    }
}

impl ReconnectPolicy {
    /// Delay before the given attempt, or `None` once the ceiling is passed.
    pub fn delay_for(&self, attempt: u32) -> Option<Duration> {
        if attempt == 0 || attempt > self.max_attempts {
            None
        } else {
            Some(self.delay)
        }
    }
}

/// What the reconnect loop should do next.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    RetryAfter { attempt: u32, delay: Duration },
    /// Ceiling exceeded; the connection becomes Failed.
    GiveUp { attempts: u32 },
}

/// Attempt counter for one connection. Not shared between hubs.
#[derive(Debug, Clone)]
pub struct RetryState {
    policy: ReconnectPolicy,
    attempts: u32,
    exhausted: bool,
}

impl RetryState {
    pub fn new(policy: ReconnectPolicy) -> Self {
        Self {
            policy,
            attempts: 0,
            exhausted: false,
        }
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub fn is_exhausted(&self) -> bool {
        self.exhausted
    }

    /// Count a new attempt and decide whether it may go ahead.
    pub fn next_attempt(&mut self) -> RetryDecision {
        if self.exhausted {
            return RetryDecision::GiveUp {
                attempts: self.attempts,
            };
        }
        let attempt = self.attempts + 1;
        match self.policy.delay_for(attempt) {
            Some(delay) => {
                self.attempts = attempt;
                RetryDecision::RetryAfter { attempt, delay }
            }
            None => {
                self.exhausted = true;
                RetryDecision::GiveUp {
                    attempts: self.attempts,
                }
            }
        }
    }

    /// A reconnect succeeded.
    pub fn reset(&mut self) {
        self.attempts = 0;
    }
}
