//! Configuration for the reconciliation core.

use std::time::Duration;

/// Configuration for a sync session.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Platform tag reported in device records and base order requests.
    pub platform: String,
    /// Client API version string passed through to the transport.
    pub api_version: String,
    /// Sync server URL passed through to the transport.
    pub server_url: String,
    /// Maximum records per fetch request.
    pub fetch_batch_size: u32,
    /// Interval between background poll ticks. The timer itself is
    /// owned by the host; this is advisory.
    pub poll_interval: Duration,
}

impl SyncConfig {
    /// Creates a configuration for the given platform.
    pub fn new(platform: impl Into<String>) -> Self {
        Self {
            platform: platform.into(),
            api_version: "0".into(),
            server_url: String::new(),
            fetch_batch_size: 300,
            poll_interval: Duration::from_secs(60),
        }
    }

    /// Sets the fetch batch size.
    pub fn with_fetch_batch_size(mut self, size: u32) -> Self {
        self.fetch_batch_size = size;
        self
    }

    /// Sets the poll interval.
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Sets the server URL.
    pub fn with_server_url(mut self, url: impl Into<String>) -> Self {
        self.server_url = url.into();
        self
    }

    /// Sets the API version string.
    pub fn with_api_version(mut self, version: impl Into<String>) -> Self {
        self.api_version = version.into();
        self
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self::new("unknown")
    }
}
