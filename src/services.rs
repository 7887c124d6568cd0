//! Built-in service adapters and the name-to-service registry.
//!
//! Adapters come in two shapes: profile-page probes, where the HTTP
//! status of a public profile URL answers the question, and API probes,
//! where a JSON body has to be decoded. Both live behind the
//! [`Service`] trait, so the pool never knows the difference.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use serde::Deserialize;

use crate::check::{Client, Service, Status, default_validity};

/// The registered services, looked up by normalized name.
pub struct Registry {
    services: HashMap<String, Arc<dyn Service>>,
}

impl Registry {
    /// Build the registry of built-in services, all sharing `client`.
    #[must_use]
    pub fn builtin(client: Client) -> Self {
        let services: Vec<Arc<dyn Service>> = vec![
            Arc::new(ProfileService {
                name: "github",
                base_url: "https://github.com",
                max_len: 39,
                client: client.clone(),
            }),
            Arc::new(ProfileService {
                name: "gitlab",
                base_url: "https://gitlab.com",
                max_len: 255,
                client: client.clone(),
            }),
            Arc::new(Fortnite { client }),
        ];
        Self {
            services: services
                .into_iter()
                .map(|s| (s.name().to_ascii_lowercase(), s))
                .collect(),
        }
    }

    /// Look up a service by name, case-insensitively.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<Arc<dyn Service>> {
        self.services.get(&name.to_ascii_lowercase()).cloned()
    }

    /// The registered service names, sorted, for user-facing listings.
    #[must_use]
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.services.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}

impl fmt::Debug for Registry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Registry")
            .field("services", &self.names())
            .finish()
    }
}

/// A service whose public profile page reveals whether a handle is
/// taken: an existing page means taken, a 404 means free.
#[derive(Debug, Clone)]
struct ProfileService {
    name: &'static str,
    base_url: &'static str,
    max_len: usize,
    client: Client,
}

impl Service for ProfileService {
    fn name(&self) -> &str {
        self.name
    }

    fn is_valid(&self, username: &str) -> bool {
        handle_is_valid(username, self.max_len)
    }

    fn check(&self, username: &str) -> Status {
        let url = format!("{}/{}", self.base_url, username);
        match self.client.get(&url) {
            Ok(_) => Status::Unavailable,
            Err(ureq::Error::StatusCode(404)) => Status::Available,
            Err(err) => {
                tracing::warn!(
                    service = self.name,
                    username,
                    error = %err,
                    "availability check failed"
                );
                Status::Unknown
            }
        }
    }
}

/// Handle rules shared by the profile-page services: ASCII alphanumeric
/// plus internal hyphens.
fn handle_is_valid(username: &str, max_len: usize) -> bool {
    !username.is_empty()
        && username.len() <= max_len
        && !username.starts_with('-')
        && !username.ends_with('-')
        && username
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-')
}

/// Epic Games' account-name endpoint for Fortnite handles.
#[derive(Debug, Clone)]
struct Fortnite {
    client: Client,
}

/// Response body of the account-name state endpoint.
#[derive(Debug, Deserialize)]
struct NameState {
    exist: bool,
}

impl Service for Fortnite {
    fn name(&self) -> &str {
        "fortnite"
    }

    fn is_valid(&self, username: &str) -> bool {
        default_validity(username, 3, 16)
    }

    fn check(&self, username: &str) -> Status {
        let url = format!("https://www.epicgames.com/id/api/account/name/state/{username}");
        let mut response = match self.client.get(&url) {
            Ok(response) => response,
            Err(err) => {
                tracing::warn!(
                    service = "fortnite",
                    username,
                    error = %err,
                    "availability check failed"
                );
                return Status::Unknown;
            }
        };

        let body = match response.body_mut().read_to_string() {
            Ok(body) => body,
            Err(err) => {
                tracing::warn!(service = "fortnite", username, error = %err, "unreadable response body");
                return Status::Unknown;
            }
        };

        match serde_json::from_str::<NameState>(&body) {
            Ok(NameState { exist: true }) => Status::Unavailable,
            Ok(NameState { exist: false }) => Status::Available,
            Err(err) => {
                tracing::warn!(service = "fortnite", username, error = %err, "unexpected response body");
                Status::Unknown
            }
        }
    }
}
