//! Classification model, the per-service check contract, and the shared
//! HTTP client.

use std::fmt;
use std::time::Duration;

use ureq::Agent;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// The outcome of checking one username against one service.
///
/// `Unknown` covers every indeterminate case: a network failure, an
/// unexpected response, or simply "not in the cache". It is the only
/// variant that is never written to the cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[must_use]
pub enum Status {
    /// The username is already registered.
    Unavailable,
    /// The username is free.
    Available,
    /// The username fails the service's validity rules; no request was made.
    Invalid,
    /// The result could not be determined.
    Unknown,
}

impl Status {
    /// The stable integer used in the cache file format.
    pub const fn code(self) -> u8 {
        match self {
            Self::Unavailable => 0,
            Self::Available => 1,
            Self::Invalid => 2,
            Self::Unknown => 3,
        }
    }

    /// Inverse of [`code`](Self::code); `None` outside `[0, 3]`.
    ///
    /// ```
    /// use handle_avail::check::Status;
    /// assert_eq!(Status::from_code(1), Some(Status::Available));
    /// assert_eq!(Status::from_code(4), None);
    /// ```
    pub const fn from_code(code: u8) -> Option<Self> {
        match code {
            0 => Some(Self::Unavailable),
            1 => Some(Self::Available),
            2 => Some(Self::Invalid),
            3 => Some(Self::Unknown),
            _ => None,
        }
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unavailable => write!(f, "unavailable"),
            Self::Available => write!(f, "available"),
            Self::Invalid => write!(f, "invalid"),
            Self::Unknown => write!(f, "unknown"),
        }
    }
}

/// A service on which usernames can be checked.
///
/// Implementations wrap one remote endpoint each and are registered under
/// a normalized name (see [`Registry`](crate::services::Registry)). The
/// worker pool treats them as opaque capabilities: it calls
/// [`is_valid`](Self::is_valid) before anything else, and only reaches
/// [`check`](Self::check) on a cache miss.
pub trait Service: Send + Sync {
    /// Registry key and cache partition key for this service.
    fn name(&self) -> &str;

    /// Whether `username` can exist on this service at all.
    ///
    /// Rejected usernames are classified [`Status::Invalid`] without
    /// touching the cache or the network. The default accepts everything.
    fn is_valid(&self, _username: &str) -> bool {
        true
    }

    /// Ask the remote service whether `username` is taken.
    ///
    /// This is a blocking call. Implementations must map every internal
    /// failure (transport error, timeout, unexpected response) to
    /// [`Status::Unknown`] rather than panicking; the pool additionally
    /// guards against contract violations, but a panic here is a bug in
    /// the adapter.
    fn check(&self, username: &str) -> Status;
}

/// An HTTP client shared by the built-in service adapters.
///
/// Wraps the underlying HTTP agent to insulate callers from the specific
/// HTTP library version used internally. The agent carries a global
/// request timeout, so a hung remote resolves to a transport error (and
/// therefore [`Status::Unknown`]) instead of stalling a worker forever.
#[derive(Debug, Clone)]
pub struct Client {
    agent: Agent,
}

impl Client {
    /// Create a new client with default timeout settings.
    #[must_use]
    pub fn new() -> Self {
        let config = Agent::config_builder()
            .timeout_global(Some(REQUEST_TIMEOUT))
            .user_agent(concat!(
                env!("CARGO_PKG_NAME"),
                "/",
                env!("CARGO_PKG_VERSION"),
                " (",
                env!("CARGO_PKG_REPOSITORY"),
                ")"
            ))
            .build();
        Self {
            agent: Agent::new_with_config(config),
        }
    }

    pub(crate) fn get(&self, url: &str) -> Result<ureq::http::Response<ureq::Body>, ureq::Error> {
        self.agent.get(url).call()
    }
}

impl Default for Client {
    fn default() -> Self {
        Self::new()
    }
}

/// The default validity rule: ASCII alphanumeric, with an inclusive
/// length range. Services with bespoke handle rules define their own.
///
/// ```
/// use handle_avail::check::default_validity;
/// assert!(default_validity("octocat", 3, 16));
/// assert!(!default_validity("oc", 3, 16));
/// assert!(!default_validity("not ok", 3, 16));
/// ```
#[must_use]
pub fn default_validity(username: &str, min_len: usize, max_len: usize) -> bool {
    let len = username.chars().count();
    len >= min_len && len <= max_len && username.chars().all(|c| c.is_ascii_alphanumeric())
}
