// * Fire-and-forget beacon delivery
// * The collector never observes delivery results; failures are logged here and dropped

use crate::config::constants::DATA_FIELD;
use reqwest::Client;
use std::time::Duration;
use thiserror::Error;
use tokio::runtime::Handle;
use tracing::debug;
use url::Url;

const BEACON_TIMEOUT_SECS: u64 = 30;

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("HTTP client error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Invalid base URL: {0}")]
    InvalidUrl(#[from] url::ParseError),
}

/// Non-blocking send of one JSON payload to a relative path.
///
/// Returns true if the payload was queued for delivery, mirroring a browser
/// beacon; a queued payload may still be lost.
pub trait BeaconTransport: Send + Sync {
    fn send_beacon(&self, path: &str, payload: String) -> bool;
}

/// Posts the payload as the `data` form field of a background request.
#[derive(Debug, Clone)]
pub struct HttpBeacon {
    client: Client,
    base_url: Url,
}

impl HttpBeacon {
    pub fn new(base_url: &str) -> Result<Self, TransportError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(BEACON_TIMEOUT_SECS))
            .build()?;

        let mut base_url = Url::parse(base_url)?;
        // * Treat the base path as a directory so subfolder installs keep their prefix
        if !base_url.path().ends_with('/') {
            let directory = format!("{}/", base_url.path());
            base_url.set_path(&directory);
        }

        Ok(Self { client, base_url })
    }

    /// Resolves `path` beneath the base URL, keeping any subfolder prefix.
    pub fn endpoint(&self, path: &str) -> Result<Url, TransportError> {
        Ok(self.base_url.join(path.trim_start_matches('/'))?)
    }
}

impl BeaconTransport for HttpBeacon {
    fn send_beacon(&self, path: &str, payload: String) -> bool {
        let endpoint = match self.endpoint(path) {
            Ok(url) => url,
            Err(e) => {
                debug!(error = %e, path = path, "Beacon endpoint invalid, payload dropped");
                return false;
            }
        };
        let handle = match Handle::try_current() {
            Ok(handle) => handle,
            Err(_) => {
                debug!("No async runtime available, payload dropped");
                return false;
            }
        };

        let request = self.client.post(endpoint).form(&[(DATA_FIELD, payload)]);
        handle.spawn(async move {
            match request.send().await {
                Ok(response) => debug!(status = %response.status(), "Beacon delivered"),
                Err(e) => debug!(error = %e, "Beacon delivery failed"),
            }
        });
        true
    }
}
