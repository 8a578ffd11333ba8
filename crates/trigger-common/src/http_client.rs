// Creates HTTP clients shared by the CircleCI and Conduit collaborators.

use anyhow::{Context, Result};
use reqwest::Client;
use std::time::Duration;

/// Timeout applied to every outbound HTTP request. All the calls this daemon
/// makes are small API requests, so anything slower than this is stuck.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

/// Creates properly configured HTTP clients for the daemon.
pub struct HttpClientFactory;

impl HttpClientFactory {
    /// Create a new `reqwest::Client` with the daemon's user agent and
    /// request timeout. The client is cheap to clone; collaborators share
    /// one connection pool.
    pub fn create_client() -> Result<Client> {
        Client::builder()
            .user_agent(format!(
                "buildtrigger/{}",
                env!("CARGO_PKG_VERSION")
            ))
            .timeout(REQUEST_TIMEOUT)
            .build()
            .context("Failed to build HTTP client")
    }
}
