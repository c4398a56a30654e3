//! Client configuration.

use std::time::Duration;

/// Default time [`Businessman::get_state`](crate::Businessman::get_state)
/// waits for the worker's reply.
pub const DEFAULT_GET_STATE_TIMEOUT: Duration = Duration::from_secs(5);

/// Default name of the worker thread.
pub const DEFAULT_THREAD_NAME: &str = "businessman-worker";

/// Tuning knobs for a [`Businessman`](crate::Businessman) client.
///
/// # Examples
///
/// ```
/// use std::time::Duration;
/// use businessman::Config;
///
/// let config = Config {
///     get_state_timeout: Duration::from_millis(500),
///     ..Config::default()
/// };
/// assert_eq!(config.thread_name, "businessman-worker");
/// ```
#[derive(Debug, Clone)]
pub struct Config {
    /// How long `get_state` waits for the `GET_STATE` broadcast before
    /// giving up with [`ClientError::Timeout`](crate::ClientError::Timeout).
    ///
    /// Default: 5 seconds.
    pub get_state_timeout: Duration,

    /// Name given to the worker thread, visible in debuggers and panics.
    ///
    /// Default: `"businessman-worker"`.
    pub thread_name: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            get_state_timeout: DEFAULT_GET_STATE_TIMEOUT,
            thread_name: DEFAULT_THREAD_NAME.to_owned(),
        }
    }
}
