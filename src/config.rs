use std::time::Duration;

/// Tunables for the connection core.
///
/// The defaults reproduce the production behavior: no per-call deadline and a
/// reconnect ladder of 2, 4, 8, 16 seconds (doubled from the 1-second reset
/// value, capped at 16).
#[derive(Debug, Clone)]
pub struct Config {
    /// Deadline for individual calls. `None` disables call timeouts.
    pub call_timeout: Option<Duration>,

    /// Reconnect delay value restored whenever a run reaches the server.
    pub initial_retry: Duration,

    /// Ceiling for the doubled reconnect delay.
    pub max_retry: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            call_timeout: None,
            initial_retry: Duration::from_secs(1),
            max_retry: Duration::from_secs(16),
        }
    }
}
