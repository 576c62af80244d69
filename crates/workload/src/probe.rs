//! HTTP liveness probe for the backend.

use std::time::Duration;

use async_trait::async_trait;
use penpot_reconciler::LivenessProbe;
use reqwest::Client;
use tracing::debug;
use url::Url;

use crate::error::Result;

/// Default backend liveness endpoint.
pub const DEFAULT_LIVENESS_URL: &str = "http://127.0.0.1:6060/readyz";

/// GETs a URL and treats any 2xx as live.
#[derive(Debug, Clone)]
pub struct HttpLivenessProbe {
    client: Client,
    url: Url,
}

impl HttpLivenessProbe {
    /// Create a probe with a per-request timeout.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Http`] if the client cannot be built.
    pub fn new(url: Url, timeout: Duration) -> Result<Self> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self { client, url })
    }

    /// Probed URL.
    #[must_use]
    pub const fn url(&self) -> &Url {
        &self.url
    }
}

#[async_trait]
impl LivenessProbe for HttpLivenessProbe {
    async fn is_live(&self) -> bool {
        match self.client.get(self.url.clone()).send().await {
            Ok(response) => {
                let status = response.status();
                debug!(url = %self.url, %status, "Liveness probe");
                status.is_success()
            }
            Err(e) => {
                debug!(url = %self.url, error = %e, "Liveness probe failed");
                false
            }
        }
    }
}
