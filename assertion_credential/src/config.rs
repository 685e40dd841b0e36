//! Credential configuration

use std::env;

use assertion_clock::DurationSecs;
use reqwest::Url;
use serde::Deserialize;

use crate::{backoff::ErrorBackoffConfig, cache::TokenCache, Error};

/// The authority used when none is configured
pub const DEFAULT_AUTHORITY_HOST: &str = "login.microsoftonline.com";

/// The environment variable consulted for an authority host when none is configured
pub const AUTHORITY_HOST_ENV: &str = "AZURE_AUTHORITY_HOST";

const DEFAULT_USER_AGENT: &str = concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION"));

/// Options for constructing a [`ClientAssertionCredential`][crate::ClientAssertionCredential]
///
/// Everything except the caches can be deserialized, for example from a
/// configuration file:
///
/// ```
/// # use assertion_credential::CredentialOptions;
/// let options: CredentialOptions = serde_json::from_str(r#"{
///     "authority_host": "login.microsoftonline.us",
///     "additionally_allowed_tenants": ["*"],
///     "transport": { "request_timeout": 10, "retry": { "max_retries": 1 } }
/// }"#)?;
/// # Ok::<_, serde_json::Error>(())
/// ```
#[derive(Clone, Debug, Default, Deserialize)]
#[serde(default)]
pub struct CredentialOptions {
    pub(crate) authority_host: Option<String>,
    pub(crate) additionally_allowed_tenants: Vec<String>,
    pub(crate) cache_minimum_validity: Option<DurationSecs>,
    pub(crate) proactive_refresh: bool,
    pub(crate) transport: TransportOptions,
    #[serde(skip)]
    pub(crate) cache: Option<TokenCache>,
    #[serde(skip)]
    pub(crate) cae_cache: Option<TokenCache>,
}

impl CredentialOptions {
    /// Constructs the default options
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the authority host, such as `login.microsoftonline.com`
    ///
    /// A host without a scheme is assumed to use `https`.
    pub fn with_authority_host(mut self, host: impl Into<String>) -> Self {
        self.authority_host = Some(host.into());
        self
    }

    /// Allows tokens to be acquired for tenants other than the home tenant
    ///
    /// Include `"*"` to allow any tenant the principal can access.
    pub fn with_additionally_allowed_tenants<I, S>(mut self, tenants: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.additionally_allowed_tenants
            .extend(tenants.into_iter().map(Into::into));
        self
    }

    /// Uses `cache` for tokens without continuous access evaluation
    pub fn with_cache(mut self, cache: TokenCache) -> Self {
        self.cache = Some(cache);
        self
    }

    /// Uses `cache` for tokens with continuous access evaluation
    pub fn with_cae_cache(mut self, cache: TokenCache) -> Self {
        self.cae_cache = Some(cache);
        self
    }

    /// Sets the minimum validity for caches created by the credential
    ///
    /// Caches supplied through [`with_cache`][Self::with_cache] or
    /// [`with_cae_cache`][Self::with_cae_cache] keep their own setting.
    pub fn with_cache_minimum_validity(mut self, minimum_validity: DurationSecs) -> Self {
        self.cache_minimum_validity = Some(minimum_validity);
        self
    }

    /// Refreshes cached tokens ahead of expiry
    ///
    /// When enabled, a cached token inside its refresh window triggers a new
    /// exchange; if that exchange fails, the still-valid cached token is
    /// returned instead of the error.
    pub fn with_proactive_refresh(mut self, enabled: bool) -> Self {
        self.proactive_refresh = enabled;
        self
    }

    /// Sets the transport options
    pub fn with_transport(mut self, transport: TransportOptions) -> Self {
        self.transport = transport;
        self
    }

    pub(crate) fn new_cache(&self) -> TokenCache {
        match self.cache_minimum_validity {
            Some(minimum_validity) => TokenCache::new().with_minimum_validity(minimum_validity),
            None => TokenCache::new(),
        }
    }

    pub(crate) fn authority(&self) -> Result<Url, Error> {
        let host = match &self.authority_host {
            Some(host) => host.clone(),
            None => env::var(AUTHORITY_HOST_ENV)
                .ok()
                .filter(|h| !h.trim().is_empty())
                .unwrap_or_else(|| DEFAULT_AUTHORITY_HOST.to_owned()),
        };

        normalize_authority(&host)
    }
}

/// Options for the HTTP transport used to reach the token endpoint
#[derive(Clone, Debug, Default, Deserialize)]
#[serde(default)]
pub struct TransportOptions {
    request_timeout: Option<DurationSecs>,
    user_agent: Option<String>,
    retry: ErrorBackoffConfig,
    #[serde(skip)]
    client: Option<reqwest::Client>,
}

impl TransportOptions {
    /// Constructs the default transport options
    pub fn new() -> Self {
        Self::default()
    }

    /// Bounds each HTTP request to the token endpoint
    pub fn with_request_timeout(mut self, timeout: DurationSecs) -> Self {
        self.request_timeout = Some(timeout);
        self
    }

    /// Sets the `User-Agent` sent to the token endpoint
    pub fn with_user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = Some(user_agent.into());
        self
    }

    /// Sets how transient token endpoint failures are retried
    pub fn with_retry(mut self, retry: ErrorBackoffConfig) -> Self {
        self.retry = retry;
        self
    }

    /// Uses a preconfigured HTTP client
    ///
    /// The request timeout and user agent options are ignored in favor of the
    /// client's own configuration.
    pub fn with_client(mut self, client: reqwest::Client) -> Self {
        self.client = Some(client);
        self
    }

    pub(crate) fn retry(&self) -> &ErrorBackoffConfig {
        &self.retry
    }

    pub(crate) fn build_client(&self) -> Result<reqwest::Client, Error> {
        if let Some(client) = &self.client {
            return Ok(client.clone());
        }

        let mut builder = reqwest::Client::builder()
            .user_agent(self.user_agent.as_deref().unwrap_or(DEFAULT_USER_AGENT));

        if let Some(timeout) = self.request_timeout {
            builder = builder.timeout(timeout.into());
        }

        builder
            .build()
            .map_err(|e| Error::InvalidConfig(format!("unable to build HTTP client: {}", e)))
    }
}

/// Parses an authority host into the base URL of the authority
///
/// A host without a scheme is assumed to use `https`. Plain `http` is only
/// accepted for loopback hosts.
pub fn normalize_authority(host: &str) -> Result<Url, Error> {
    let host = host.trim();
    let with_scheme = if host.contains("://") {
        host.to_owned()
    } else {
        format!("https://{}", host)
    };

    let url = Url::parse(with_scheme.trim_end_matches('/'))
        .map_err(|e| Error::InvalidConfig(format!("invalid authority host '{}': {}", host, e)))?;

    let loopback = matches!(url.host_str(), Some("localhost" | "127.0.0.1" | "[::1]"));
    match url.scheme() {
        "https" => Ok(url),
        "http" if loopback => Ok(url),
        scheme => Err(Error::InvalidConfig(format!(
            "authority host '{}' must use https, not {}",
            host, scheme
        ))),
    }
}
