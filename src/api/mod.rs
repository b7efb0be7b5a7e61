//! API client module for the donation platform

pub mod account;
pub mod client;
pub mod donations;
mod error;
pub mod users;

pub use client::{ApiClient, ApiResponse, ClientSettings, HttpRefresher, Refresher};
pub use error::ApiError;

#[cfg(test)]
pub(crate) mod test_support {
    use std::sync::Arc;
    use std::time::Duration;

    use super::{ApiClient, ClientSettings, HttpRefresher};
    use crate::auth::MemoryTokenStore;

    /// Client pointed at a mock server, refreshing against the same server.
    pub fn client_for(server: &wiremock::MockServer, tokens: Arc<MemoryTokenStore>) -> ApiClient {
        let settings = ClientSettings {
            base_url: server.uri(),
            timeout: Duration::from_secs(5),
        };
        let refresher = HttpRefresher::new(&server.uri(), Duration::from_secs(5)).unwrap();
        ApiClient::new(settings, tokens, Arc::new(refresher)).unwrap()
    }
}
