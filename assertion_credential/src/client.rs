//! Token clients exchange client assertions for access tokens

use std::sync::Arc;

use async_trait::async_trait;

use crate::{AccessTokenInfo, ClientAssertion, Scope, TenantId, TenantIdRef};

pub mod aad;

pub use aad::{AadClient, TokenRequestError};

/// A request for a token, after scopes and tenant have been validated
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TokenRequest {
    scopes: Vec<Scope>,
    tenant: TenantId,
    claims: Option<String>,
    enable_cae: bool,
}

impl TokenRequest {
    /// Constructs a request for `scopes` in `tenant`
    pub fn new(scopes: Vec<Scope>, tenant: TenantId) -> Self {
        Self {
            scopes,
            tenant,
            claims: None,
            enable_cae: false,
        }
    }

    /// Attaches a claims challenge returned by a resource
    pub fn with_claims(mut self, claims: impl Into<String>) -> Self {
        self.claims = Some(claims.into());
        self
    }

    /// Requests a token that supports continuous access evaluation
    pub fn with_cae(mut self, enable_cae: bool) -> Self {
        self.enable_cae = enable_cae;
        self
    }

    /// The requested scopes, in caller order
    pub fn scopes(&self) -> &[Scope] {
        &self.scopes
    }

    /// The tenant the token is requested from
    pub fn tenant(&self) -> &TenantIdRef {
        &self.tenant
    }

    /// The claims challenge, if any
    pub fn claims(&self) -> Option<&str> {
        self.claims.as_deref()
    }

    /// Whether continuous access evaluation is requested
    pub fn enable_cae(&self) -> bool {
        self.enable_cae
    }
}

/// The operations a credential needs from the client that talks to its authority
///
/// Implementations own the token cache and the network transport.
#[async_trait]
pub trait TokenClient: Send + Sync {
    /// Looks up a cached token that satisfies `request`
    ///
    /// Must not perform network I/O, and must not return a token that is
    /// expired or about to expire. Returns `None` when the request carries a
    /// claims challenge, as the challenge can only be satisfied by a new token.
    fn lookup_cached(&self, request: &TokenRequest) -> Option<AccessTokenInfo>;

    /// Exchanges `assertion` for a new token and stores the result in the cache
    ///
    /// May be called concurrently for the same request.
    async fn exchange_by_assertion(
        &self,
        request: &TokenRequest,
        assertion: ClientAssertion,
    ) -> Result<AccessTokenInfo, TokenRequestError>;
}

#[async_trait]
impl<T> TokenClient for Arc<T>
where
    T: TokenClient + ?Sized,
{
    #[inline]
    fn lookup_cached(&self, request: &TokenRequest) -> Option<AccessTokenInfo> {
        (**self).lookup_cached(request)
    }

    #[inline]
    async fn exchange_by_assertion(
        &self,
        request: &TokenRequest,
        assertion: ClientAssertion,
    ) -> Result<AccessTokenInfo, TokenRequestError> {
        (**self).exchange_by_assertion(request, assertion).await
    }
}
