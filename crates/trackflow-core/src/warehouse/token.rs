use crate::error::{PipelineError, Result};
use parking_lot::Mutex;
use serde::Deserialize;
use std::time::{Duration, Instant};
use tracing::debug;

pub const ACCESS_TOKEN_ENV: &str = "GOOGLE_OAUTH_ACCESS_TOKEN";
const METADATA_TOKEN_URL: &str =
    "http://metadata.google.internal/computeMetadata/v1/instance/service-accounts/default/token";
/// Refresh this long before the server-side expiry.
const EXPIRY_SLACK: Duration = Duration::from_secs(60);

/// Source of bearer tokens for warehouse requests.
///
/// Only ambient identities are used: a token handed in through the
/// environment, or the instance metadata server.
#[derive(Debug)]
pub enum TokenProvider {
    Static(String),
    MetadataServer {
        url: String,
        cached: Mutex<Option<(String, Instant)>>,
    },
}

#[derive(Deserialize)]
struct MetadataToken {
    access_token: String,
    expires_in: u64,
}

impl TokenProvider {
    pub fn from_env() -> Self {
        match std::env::var(ACCESS_TOKEN_ENV) {
            Ok(token) if !token.trim().is_empty() => TokenProvider::Static(token.trim().to_string()),
            _ => Self::metadata_server(METADATA_TOKEN_URL),
        }
    }

    pub fn metadata_server(url: impl Into<String>) -> Self {
        TokenProvider::MetadataServer {
            url: url.into(),
            cached: Mutex::new(None),
        }
    }

    pub async fn token(&self, http: &reqwest::Client) -> Result<String> {
        match self {
            TokenProvider::Static(token) => Ok(token.clone()),
            TokenProvider::MetadataServer { url, cached } => {
                let fresh = cached
                    .lock()
                    .as_ref()
                    .filter(|(_, expires)| Instant::now() < *expires)
                    .map(|(token, _)| token.clone());
                if let Some(token) = fresh {
                    return Ok(token);
                }
                let resp = http
                    .get(url)
                    .header("Metadata-Flavor", "Google")
                    .send()
                    .await
                    .map_err(|e| {
                        PipelineError::Auth(format!(
                            "no ambient credentials: set {ACCESS_TOKEN_ENV} or run on a host with a metadata server ({e})"
                        ))
                    })?;
                if !resp.status().is_success() {
                    return Err(PipelineError::Auth(format!(
                        "metadata server refused token request: {}",
                        resp.status()
                    )));
                }
                let body: MetadataToken = resp.json().await?;
                let lifetime = Duration::from_secs(body.expires_in).saturating_sub(EXPIRY_SLACK);
                debug!(expires_in = body.expires_in, "fetched access token");
                *cached.lock() = Some((body.access_token.clone(), Instant::now() + lifetime));
                Ok(body.access_token)
            }
        }
    }
}
