//! Process-wide HTTP client and credential acquisition.
//!
//! All handles in a process share one [`StorageClient`]: a `reqwest`
//! client plus an optional GCP token provider. The shared instance is
//! initialised at most once, on first handle creation, and can be
//! replaced by injection before that point (tests point an
//! unauthenticated client at an emulator).
//!
//! Credential discovery goes through `gcp_auth::provider()`, which walks
//! the usual chain (service-account file, gcloud config, metadata
//! server). Failure surfaces as [`Error::Credentials`].

use std::sync::Arc;
use std::time::Duration;

use gcp_auth::TokenProvider;
use tokio::sync::OnceCell;

use crate::error::{Error, Result};

/// OAuth scope requested for lock operations.
const SCOPE: &str = "https://www.googleapis.com/auth/devstorage.read_write";

/// Per-request timeout. Lock payloads are expected to be small.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

static SHARED: OnceCell<Arc<StorageClient>> = OnceCell::const_new();

/// HTTP client used by the object-store adapter.
pub struct StorageClient {
    http: reqwest::Client,
    token_provider: Option<Arc<dyn TokenProvider>>,
}

impl std::fmt::Debug for StorageClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StorageClient")
            .field("authenticated", &self.token_provider.is_some())
            .finish_non_exhaustive()
    }
}

impl StorageClient {
    /// Creates a client that attaches application-default credentials to
    /// every request.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Credentials`] if no credentials can be discovered.
    pub async fn with_default_credentials() -> Result<Self> {
        let provider = gcp_auth::provider()
            .await
            .map_err(|e| Error::credentials(e.to_string()))?;
        Ok(Self {
            http: build_http()?,
            token_provider: Some(provider),
        })
    }

    /// Creates a client that sends no `Authorization` header. Intended
    /// for emulators and tests.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Transport`] if the underlying client cannot be
    /// constructed.
    pub fn unauthenticated() -> Result<Self> {
        Ok(Self {
            http: build_http()?,
            token_provider: None,
        })
    }

    /// Creates a client around an existing token provider.
    #[must_use]
    pub fn with_token_provider(http: reqwest::Client, provider: Arc<dyn TokenProvider>) -> Self {
        Self {
            http,
            token_provider: Some(provider),
        }
    }

    pub(crate) fn http(&self) -> &reqwest::Client {
        &self.http
    }

    /// Attaches a bearer token to the request when a provider is
    /// configured.
    pub(crate) async fn authorize(
        &self,
        request: reqwest::RequestBuilder,
    ) -> Result<reqwest::RequestBuilder> {
        match &self.token_provider {
            Some(provider) => {
                let token = provider
                    .token(&[SCOPE])
                    .await
                    .map_err(|e| Error::credentials(e.to_string()))?;
                Ok(request.bearer_auth(token.as_str()))
            }
            None => Ok(request),
        }
    }
}

fn build_http() -> Result<reqwest::Client> {
    Ok(reqwest::Client::builder()
        .timeout(REQUEST_TIMEOUT)
        .build()?)
}

/// Returns the process-wide client, initialising it with default
/// credentials on first use.
///
/// # Errors
///
/// Returns [`Error::Credentials`] if initialisation fails; the next call
/// retries.
pub(crate) async fn shared() -> Result<Arc<StorageClient>> {
    SHARED
        .get_or_try_init(|| async {
            StorageClient::with_default_credentials().await.map(Arc::new)
        })
        .await
        .cloned()
}

/// Installs `client` as the process-wide client.
///
/// Returns false if a client was already installed (the existing one
/// keeps being used). Exposed for dependency injection in tests and
/// embedding applications; per-handle injection via
/// [`Config::with_client`](crate::Config::with_client) does not touch
/// this slot.
pub fn install_shared_client(client: Arc<StorageClient>) -> bool {
    SHARED.set(client).is_ok()
}
