//! A token client for Microsoft Entra ID and compatible authorities

use assertion_clock::{Clock, System};
use async_trait::async_trait;
use reqwest::{StatusCode, Url};
use thiserror::Error;

use super::{TokenClient, TokenRequest};
use crate::{
    backoff::{ErrorBackoffConfig, ErrorBackoffHandler, WithBackoff},
    cache::{CacheKey, TokenCache},
    AccessTokenInfo, BoxError, ClientAssertion, ClientId, ClientIdRef, CredentialOptions, Error,
    TenantIdRef, TokenLifetimeConfig,
};

pub mod dto;

use dto::ErrorBody;

/// A client for the OAuth2 v2.0 token endpoint of an Entra ID authority
///
/// Owns the HTTP connection pool and the token caches. Transient failures
/// (connection errors, server errors, and throttling) are retried with
/// exponential backoff; other failures are returned immediately.
#[derive(Debug)]
pub struct AadClient<C = System> {
    http: reqwest::Client,
    authority: Url,
    client_id: ClientId,
    cache: TokenCache,
    cae_cache: TokenCache,
    lifetime_config: TokenLifetimeConfig<C>,
    retry: ErrorBackoffConfig,
}

impl AadClient<System> {
    /// Constructs a new client for `client_id`
    pub fn new(client_id: impl Into<ClientId>, options: &CredentialOptions) -> Result<Self, Error> {
        Ok(Self {
            http: options.transport.build_client()?,
            authority: options.authority()?,
            client_id: client_id.into(),
            cache: options.cache.clone().unwrap_or_else(|| options.new_cache()),
            cae_cache: options
                .cae_cache
                .clone()
                .unwrap_or_else(|| options.new_cache()),
            lifetime_config: TokenLifetimeConfig::default(),
            retry: options.transport.retry().clone(),
        })
    }
}

impl<C> AadClient<C> {
    /// Sets the lifetime configuration used to stamp new tokens
    ///
    /// The configuration's clock is also used for cache lookups.
    pub fn with_lifetime_config<D>(self, lifetime_config: TokenLifetimeConfig<D>) -> AadClient<D> {
        AadClient {
            http: self.http,
            authority: self.authority,
            client_id: self.client_id,
            cache: self.cache,
            cae_cache: self.cae_cache,
            lifetime_config,
            retry: self.retry,
        }
    }

    /// The client ID presented to the authority
    pub fn client_id(&self) -> &ClientIdRef {
        &self.client_id
    }

    /// The base URL of the authority
    pub fn authority(&self) -> &Url {
        &self.authority
    }

    /// The cache for tokens without continuous access evaluation
    pub fn cache(&self) -> &TokenCache {
        &self.cache
    }

    /// The cache for tokens with continuous access evaluation
    pub fn cae_cache(&self) -> &TokenCache {
        &self.cae_cache
    }

    /// The token endpoint for `tenant`
    pub fn token_endpoint(&self, tenant: &TenantIdRef) -> Url {
        let mut url = self.authority.clone();
        // https authorities can always be a base
        if let Ok(mut segments) = url.path_segments_mut() {
            segments
                .pop_if_empty()
                .extend([tenant.as_str(), "oauth2", "v2.0", "token"]);
        }
        url
    }

    fn cache_for(&self, request: &TokenRequest) -> &TokenCache {
        if request.enable_cae() {
            &self.cae_cache
        } else {
            &self.cache
        }
    }

    fn cache_key(&self, request: &TokenRequest) -> CacheKey {
        CacheKey::new(
            self.authority.as_str(),
            &self.client_id,
            request.tenant(),
            request.scopes(),
        )
    }
}

#[async_trait]
impl<C: Clock + Send + Sync> TokenClient for AadClient<C> {
    fn lookup_cached(&self, request: &TokenRequest) -> Option<AccessTokenInfo> {
        if request.claims().is_some() {
            tracing::debug!("claims challenge present, a new token is required");
            return None;
        }

        self.cache_for(request)
            .lookup(&self.cache_key(request), self.lifetime_config.clock().now())
    }

    async fn exchange_by_assertion(
        &self,
        request: &TokenRequest,
        assertion: ClientAssertion,
    ) -> Result<AccessTokenInfo, TokenRequestError> {
        let token_url = self.token_endpoint(request.tenant());
        let claims = dto::merge_claims(request.claims(), request.enable_cae())
            .map_err(TokenRequestError::InvalidClaims)?;

        let grant = dto::AssertionGrant {
            client_id: &self.client_id,
            assertion: &assertion,
            scope: join_scopes(request),
            claims,
        };

        let mut backoff = ErrorBackoffHandler::new(self.retry.clone());
        let token = loop {
            match request_token(&self.http, &token_url, &grant, &self.lifetime_config)
                .await
                .with_backoff(&mut backoff)
            {
                Ok(token) => break token,
                Err((error, Some(delay))) if error.is_transient() => {
                    tracing::warn!(
                        error = (&error as &dyn std::error::Error),
                        delay_ms = delay.as_millis() as u64,
                        "transient error requesting token, will retry"
                    );
                    tokio::time::sleep(delay).await;
                }
                Err((error, _)) => return Err(error),
            }
        };

        self.cache_for(request)
            .store(self.cache_key(request), token.clone());

        Ok(token)
    }
}

fn join_scopes(request: &TokenRequest) -> String {
    request
        .scopes()
        .iter()
        .map(|s| s.as_str())
        .collect::<Vec<_>>()
        .join(" ")
}

/// An error while attempting to exchange an assertion for a token
#[derive(Debug, Error)]
pub enum TokenRequestError {
    /// The authority rejected the request
    #[error("authority rejected token request ({status}): {body}")]
    Provider {
        /// The HTTP status returned by the authority
        status: StatusCode,
        /// The error details returned by the authority
        body: ErrorBody,
    },
    /// Unable to deserialize the token body
    #[error("error deserializing token body from authority")]
    TokenBody(#[source] serde_json::Error),
    /// The claims challenge is not valid JSON
    #[error("claims challenge is not valid JSON")]
    InvalidClaims(#[source] serde_json::Error),
    /// Unable to read the response
    #[error("error reading response body")]
    BodyRead(#[source] reqwest::Error),
    /// Unable to send a token request to the authority
    #[error("error sending request to authority")]
    RequestSend(#[source] reqwest::Error),
    /// A failure reported by a custom token client
    #[error("error exchanging assertion for token")]
    Other(#[source] BoxError),
}

impl TokenRequestError {
    /// The HTTP status returned by the authority, if it responded
    pub fn status(&self) -> Option<StatusCode> {
        match self {
            Self::Provider { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// The OAuth2 error code returned by the authority
    pub fn error_code(&self) -> Option<&str> {
        match self {
            Self::Provider { body, .. } if !body.error.is_empty() => Some(&body.error),
            _ => None,
        }
    }

    /// The error description returned by the authority
    pub fn description(&self) -> Option<&str> {
        match self {
            Self::Provider { body, .. } => body.error_description.as_deref(),
            _ => None,
        }
    }

    /// The correlation ID returned by the authority
    pub fn correlation_id(&self) -> Option<&str> {
        match self {
            Self::Provider { body, .. } => body.correlation_id.as_deref(),
            _ => None,
        }
    }

    /// Whether the request may succeed if retried unchanged
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Provider { status, .. } => {
                status.is_server_error() || *status == StatusCode::TOO_MANY_REQUESTS
            }
            Self::RequestSend(error) => !error.is_builder(),
            Self::BodyRead(_) => true,
            Self::TokenBody(_) | Self::InvalidClaims(_) | Self::Other(_) => false,
        }
    }
}

#[tracing::instrument(
    err,
    skip(client, token_url, grant, lifetime_config),
    fields(
        token_url = %token_url,
        client_id = %grant.client_id,
        scope = %grant.scope,
        has_claims = grant.claims.is_some(),
    ),
)]
async fn request_token<C: Clock>(
    client: &reqwest::Client,
    token_url: &Url,
    grant: &dto::AssertionGrant<'_>,
    lifetime_config: &TokenLifetimeConfig<C>,
) -> Result<AccessTokenInfo, TokenRequestError> {
    tracing::trace!("requesting token from authority");

    let resp = client
        .post(token_url.clone())
        .form(grant)
        .send()
        .await
        .map_err(TokenRequestError::RequestSend)?;

    let status = resp.status();
    tracing::debug!(
        response.status = status.as_u16(),
        "received token response from issuing authority"
    );

    let body = resp.bytes().await.map_err(TokenRequestError::BodyRead)?;

    if !status.is_success() {
        return Err(TokenRequestError::Provider {
            status,
            body: ErrorBody::from_bytes(&body),
        });
    }

    let resp: dto::TokenResponse =
        serde_json::from_slice(&body).map_err(TokenRequestError::TokenBody)?;

    let token = lifetime_config.create_token(
        &resp.access_token,
        resp.token_type.as_deref(),
        resp.expires_in,
        resp.refresh_in,
    );

    tracing::info!(
        lifetime = resp.expires_in.0,
        expires_on = token.expires_on().0,
        refresh_on = token.refresh_on().map(|r| r.0),
        "received new access token"
    );

    Ok(token)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::TenantId;

    fn client(authority: &str) -> AadClient {
        AadClient::new(
            "client",
            &CredentialOptions::new().with_authority_host(authority),
        )
        .unwrap()
    }

    #[test]
    fn token_endpoint_includes_tenant() {
        let client = client("login.microsoftonline.com");
        let url = client.token_endpoint(&TenantId::from_static("contoso"));

        assert_eq!(
            url.as_str(),
            "https://login.microsoftonline.com/contoso/oauth2/v2.0/token"
        );
    }

    #[test]
    fn token_endpoint_keeps_authority_path() {
        let client = client("https://login.example/prefix/");
        let url = client.token_endpoint(&TenantId::from_static("t"));

        assert_eq!(url.as_str(), "https://login.example/prefix/t/oauth2/v2.0/token");
    }

    #[test]
    fn claims_challenge_bypasses_cache() {
        let client = client("login.microsoftonline.com");
        let request = TokenRequest::new(
            vec![crate::Scope::from_static("s")],
            TenantId::from_static("t"),
        );

        client.cache().store(
            client.cache_key(&request),
            AccessTokenInfo::new(
                crate::BearerToken::from_static("cached"),
                assertion_clock::UnixTime(u64::MAX),
            ),
        );

        assert!(client.lookup_cached(&request).is_some());
        assert!(client
            .lookup_cached(&request.clone().with_claims("{}"))
            .is_none());
    }

    #[test]
    fn clouds_sharing_a_cache_do_not_share_tokens() {
        let shared = TokenCache::new();
        let client_for = |authority: &str| {
            AadClient::new(
                "client",
                &CredentialOptions::new()
                    .with_authority_host(authority)
                    .with_cache(shared.clone()),
            )
            .unwrap()
        };
        let public = client_for("login.microsoftonline.com");
        let government = client_for("login.microsoftonline.us");
        let request = TokenRequest::new(
            vec![crate::Scope::from_static("s")],
            TenantId::from_static("t"),
        );

        public.cache().store(
            public.cache_key(&request),
            AccessTokenInfo::new(
                crate::BearerToken::from_static("public"),
                assertion_clock::UnixTime(u64::MAX),
            ),
        );

        assert!(public.lookup_cached(&request).is_some());
        assert!(government.lookup_cached(&request).is_none());
        assert_eq!(shared.len(), 1);
    }

    #[test]
    fn cae_tokens_use_a_separate_cache() {
        let client = client("login.microsoftonline.com");
        let request = TokenRequest::new(
            vec![crate::Scope::from_static("s")],
            TenantId::from_static("t"),
        );

        client.cache().store(
            client.cache_key(&request),
            AccessTokenInfo::new(
                crate::BearerToken::from_static("plain"),
                assertion_clock::UnixTime(u64::MAX),
            ),
        );

        assert!(client
            .lookup_cached(&request.clone().with_cae(true))
            .is_none());
    }

    #[test]
    fn server_errors_and_throttling_are_transient() {
        let provider = |status| TokenRequestError::Provider {
            status,
            body: ErrorBody::default(),
        };

        assert!(provider(StatusCode::SERVICE_UNAVAILABLE).is_transient());
        assert!(provider(StatusCode::TOO_MANY_REQUESTS).is_transient());
        assert!(!provider(StatusCode::BAD_REQUEST).is_transient());
        assert!(!provider(StatusCode::UNAUTHORIZED).is_transient());
    }

    #[test]
    fn provider_details_are_exposed() {
        let error = TokenRequestError::Provider {
            status: StatusCode::UNAUTHORIZED,
            body: ErrorBody {
                error: "invalid_client".to_owned(),
                error_description: Some("AADSTS7000215".to_owned()),
                correlation_id: Some("corr".to_owned()),
                ..ErrorBody::default()
            },
        };

        assert_eq!(error.status(), Some(StatusCode::UNAUTHORIZED));
        assert_eq!(error.error_code(), Some("invalid_client"));
        assert_eq!(error.description(), Some("AADSTS7000215"));
        assert_eq!(error.correlation_id(), Some("corr"));
    }
}
