//! Connection state and the bounded reconnect machine.
//!
//! The machine is pure: it never sleeps or touches the network. The session
//! driver feeds it link outcomes and acts on the returned [`Step`].
//!
//! ```text
//! Disconnected ──connect──► Connecting ──ok──► Connected ──loss──► Lost
//!                               │                 ▲                  │
//!                             fail                ok                 ▼
//!                               └──────────► Reconnecting ◄──────────┘
//!                                               │   ▲
//!                                             fail ─┘ (failures < limit)
//!                                               │
//!                                               └──► Fatal (failures == limit)
//! ```

use rand::Rng;
use std::fmt;
use std::time::Duration;

use crate::config::{BackoffConfig, ControllerConfig};

#[derive(Clone, Copy, Default, Debug, PartialEq, Eq)]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
    Lost,
    Reconnecting,
    /// Retry budget exhausted. Terminal for this session.
    Fatal,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let label = match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
            ConnectionState::Lost => "connection lost",
            ConnectionState::Reconnecting => "reconnecting",
            ConnectionState::Fatal => "failed",
        };
        f.write_str(label)
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum Backoff {
    Fixed(Duration),
    Exponential {
        initial: Duration,
        max: Duration,
        jitter: bool,
    },
}

impl Backoff {
    /// Delay before the given attempt (1-based).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        match self {
            Backoff::Fixed(delay) => *delay,
            Backoff::Exponential {
                initial,
                max,
                jitter,
            } => {
                let exponent = attempt.saturating_sub(1).min(31);
                let delay = initial.saturating_mul(1u32 << exponent).min(*max);
                if *jitter {
                    equal_jitter(delay)
                } else {
                    delay
                }
            }
        }
    }
}

impl From<&BackoffConfig> for Backoff {
    fn from(config: &BackoffConfig) -> Self {
        match *config {
            BackoffConfig::Fixed { delay_ms } => Backoff::Fixed(Duration::from_millis(delay_ms)),
            BackoffConfig::Exponential {
                initial_ms,
                max_ms,
                jitter,
            } => Backoff::Exponential {
                initial: Duration::from_millis(initial_ms),
                max: Duration::from_millis(max_ms),
                jitter,
            },
        }
    }
}

// random delay in [delay / 2, delay]
fn equal_jitter(delay: Duration) -> Duration {
    let half = delay / 2;
    let spread = (delay - half).as_millis() as u64;
    if spread == 0 {
        return delay;
    }
    half + Duration::from_millis(rand::thread_rng().gen_range(0..=spread))
}

#[derive(Clone, Debug, PartialEq)]
pub struct RetryPolicy {
    /// Consecutive failed attempts tolerated before going fatal.
    pub limit: u32,
    pub backoff: Backoff,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            limit: 5,
            backoff: Backoff::Fixed(Duration::from_millis(2500)),
        }
    }
}

impl From<&ControllerConfig> for RetryPolicy {
    fn from(config: &ControllerConfig) -> Self {
        Self {
            limit: config.retry_limit,
            backoff: Backoff::from(&config.backoff),
        }
    }
}

/// What the driver has to do after a link failure.
#[derive(Clone, Debug, PartialEq)]
pub enum Step {
    /// An established connection dropped. Notify observers, then wait and retry.
    ConnectionLost { delay: Duration },
    /// An attempt failed but budget remains. Wait and retry.
    Retry { attempt: u32, delay: Duration },
    /// Budget exhausted. No further attempts.
    GiveUp { failed_attempts: u32 },
}

#[derive(Debug)]
pub struct ReconnectMachine {
    policy: RetryPolicy,
    state: ConnectionState,
    failed_attempts: u32,
}

impl ReconnectMachine {
    pub fn new(policy: RetryPolicy) -> Self {
        Self {
            policy,
            state: ConnectionState::Disconnected,
            failed_attempts: 0,
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn failed_attempts(&self) -> u32 {
        self.failed_attempts
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    pub fn begin_connect(&mut self) -> ConnectionState {
        if self.state == ConnectionState::Disconnected {
            self.state = ConnectionState::Connecting;
        }
        self.state
    }

    pub fn connected(&mut self) -> ConnectionState {
        if self.state != ConnectionState::Fatal {
            self.state = ConnectionState::Connected;
            self.failed_attempts = 0;
        }
        self.state
    }

    /// Lost -> Reconnecting, once the loss has been announced.
    pub fn begin_reconnect(&mut self) -> ConnectionState {
        if self.state == ConnectionState::Lost {
            self.state = ConnectionState::Reconnecting;
        }
        self.state
    }

    pub fn link_failed(&mut self) -> Step {
        match self.state {
            ConnectionState::Connected => {
                self.state = ConnectionState::Lost;
                self.failed_attempts = 0;
                Step::ConnectionLost {
                    delay: self.policy.backoff.delay_for(1),
                }
            }
            ConnectionState::Fatal => Step::GiveUp {
                failed_attempts: self.failed_attempts,
            },
            _ => {
                self.failed_attempts += 1;
                if self.failed_attempts >= self.policy.limit {
                    self.state = ConnectionState::Fatal;
                    Step::GiveUp {
                        failed_attempts: self.failed_attempts,
                    }
                } else {
                    self.state = ConnectionState::Reconnecting;
                    let attempt = self.failed_attempts + 1;
                    Step::Retry {
                        attempt,
                        delay: self.policy.backoff.delay_for(attempt),
                    }
                }
            }
        }
    }
}
