//! A credential authenticating a service principal with a client assertion

use std::{fmt, ops::Deref};

use assertion_clock::{Clock, System};
use async_trait::async_trait;

use crate::{
    acquire::{AcquireToken, GetTokenOptions, TokenAcquirer},
    assertion::AssertionProducer,
    client::{AadClient, TokenClient, TokenRequest},
    session::CredentialSession,
    AccessToken, AccessTokenInfo, ClientId, CredentialOptions, Error, Scope, TenantId,
    TenantPolicy,
};

const CREDENTIAL_NAME: &str = "ClientAssertionCredential";

/// Acquires access tokens for a service principal by exchanging client
/// assertions with its authority
///
/// Each call first looks for a cached token. Only when none is usable does the
/// credential ask its [`AssertionProducer`] for a new assertion, exactly once,
/// and exchange it for a token. Failures are returned to the caller as-is; a
/// failed call never yields a stale token.
///
/// The credential owns its network client. Once [`close`][Self::close] has been
/// called, every later call fails with [`Error::SessionClosed`].
///
/// ```no_run
/// use assertion_credential::{ClientAssertionCredential, CredentialOptions, GetTokenOptions};
///
/// # async fn run() -> Result<(), assertion_credential::Error> {
/// let credential = ClientAssertionCredential::new(
///     "contoso.onmicrosoft.com",
///     "00000000-0000-0000-0000-000000000000",
///     || std::fs::read_to_string("/var/run/secrets/tokens/assertion"),
///     CredentialOptions::new(),
/// )?;
///
/// let token = credential
///     .get_token(["https://graph.microsoft.com/.default"], &GetTokenOptions::new())
///     .await?;
/// # drop(token);
/// # Ok(())
/// # }
/// ```
pub struct ClientAssertionCredential<P, T = AadClient, C = System> {
    session: CredentialSession<T>,
    producer: P,
    policy: TenantPolicy,
    acquirer: TokenAcquirer<C>,
}

impl<P: AssertionProducer> ClientAssertionCredential<P> {
    /// Constructs a credential for `client_id` in the home tenant `tenant_id`
    ///
    /// Fails when the tenant IDs or the authority host are invalid.
    pub fn new(
        tenant_id: impl Into<TenantId>,
        client_id: impl Into<ClientId>,
        producer: P,
        options: CredentialOptions,
    ) -> Result<Self, Error> {
        let policy = TenantPolicy::new(tenant_id)?
            .with_additionally_allowed(options.additionally_allowed_tenants.iter().cloned())?;
        let client = AadClient::new(client_id, &options)?;

        tracing::debug!(
            home_tenant = %policy.home(),
            client_id = %client.client_id(),
            authority = %client.authority(),
            allows_any_tenant = policy.allows_any(),
            "constructed client assertion credential"
        );

        Ok(Self::with_client(policy, client, producer)
            .with_proactive_refresh(options.proactive_refresh))
    }
}

impl<P, T> ClientAssertionCredential<P, T> {
    /// Constructs a credential around a custom token client
    pub fn with_client(policy: TenantPolicy, client: T, producer: P) -> Self {
        Self {
            session: CredentialSession::open(client),
            producer,
            policy,
            acquirer: TokenAcquirer::new(CREDENTIAL_NAME),
        }
    }
}

impl<P, T, C> ClientAssertionCredential<P, T, C> {
    /// Refreshes cached tokens ahead of expiry
    pub fn with_proactive_refresh(mut self, enabled: bool) -> Self {
        self.acquirer = self.acquirer.with_proactive_refresh(enabled);
        self
    }

    /// Sets a custom clock to be used for refresh decisions
    ///
    /// Useful for testing purposes
    pub fn with_clock<D>(self, clock: D) -> ClientAssertionCredential<P, T, D> {
        ClientAssertionCredential {
            session: self.session,
            producer: self.producer,
            policy: self.policy,
            acquirer: self.acquirer.with_clock(clock),
        }
    }

    /// The tenants the credential may acquire tokens for
    pub fn tenant_policy(&self) -> &TenantPolicy {
        &self.policy
    }

    /// Whether the credential has been closed
    pub fn is_closed(&self) -> bool {
        self.session.is_closed()
    }

    /// Closes the credential, releasing its network client
    ///
    /// Requests already in flight complete normally. Closing is not
    /// idempotent: a second call fails with [`Error::SessionClosed`].
    pub fn close(&self) -> Result<(), Error> {
        self.session.close()
    }

    /// Scopes use of the credential, closing it when the guard is dropped
    pub fn enter(&self) -> Result<CredentialGuard<'_, P, T, C>, Error> {
        if self.is_closed() {
            return Err(Error::SessionClosed);
        }

        Ok(CredentialGuard { credential: self })
    }
}

impl<P, T, C> ClientAssertionCredential<P, T, C>
where
    P: AssertionProducer,
    T: TokenClient,
    C: Clock + Send + Sync,
{
    /// Acquires an access token for `scopes`
    pub async fn get_token<I, S>(
        &self,
        scopes: I,
        options: &GetTokenOptions,
    ) -> Result<AccessToken, Error>
    where
        I: IntoIterator<Item = S>,
        S: Into<Scope>,
    {
        self.get_token_info(scopes, options)
            .await
            .map(AccessToken::from)
    }

    /// Acquires an access token for `scopes`, including its token type and
    /// refresh hint
    pub async fn get_token_info<I, S>(
        &self,
        scopes: I,
        options: &GetTokenOptions,
    ) -> Result<AccessTokenInfo, Error>
    where
        I: IntoIterator<Item = S>,
        S: Into<Scope>,
    {
        let request = self.prepare_request(scopes.into_iter().map(Into::into).collect(), options)?;
        self.acquirer.acquire(self, &request, options).await
    }

    fn prepare_request(
        &self,
        scopes: Vec<Scope>,
        options: &GetTokenOptions,
    ) -> Result<TokenRequest, Error> {
        if scopes.is_empty() {
            return Err(Error::EmptyScopes);
        }

        if self.session.is_closed() {
            return Err(Error::SessionClosed);
        }

        let tenant = self.policy.resolve(options.tenant_id())?;

        let mut request = TokenRequest::new(scopes, tenant).with_cae(options.enable_cae());
        if let Some(claims) = options.claims() {
            request = request.with_claims(claims);
        }

        Ok(request)
    }
}

#[async_trait]
impl<P, T, C> AcquireToken for ClientAssertionCredential<P, T, C>
where
    P: AssertionProducer,
    T: TokenClient,
    C: Clock + Send + Sync,
{
    fn lookup_cached(&self, request: &TokenRequest) -> Result<Option<AccessTokenInfo>, Error> {
        Ok(self.session.client()?.lookup_cached(request))
    }

    async fn request_new(&self, request: &TokenRequest) -> Result<AccessTokenInfo, Error> {
        let client = self.session.client()?;

        tracing::debug!("requesting client assertion");
        let assertion = self
            .producer
            .produce_assertion()
            .await
            .map_err(Error::AssertionProduction)?;

        Ok(client.exchange_by_assertion(request, assertion).await?)
    }
}

impl<P, T, C: fmt::Debug> fmt::Debug for ClientAssertionCredential<P, T, C> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("ClientAssertionCredential")
            .field("session", &self.session)
            .field("policy", &self.policy)
            .field("acquirer", &self.acquirer)
            .finish_non_exhaustive()
    }
}

/// Closes the credential it guards when dropped
///
/// Dereferences to the credential, so tokens can be acquired through the guard.
pub struct CredentialGuard<'a, P, T = AadClient, C = System> {
    credential: &'a ClientAssertionCredential<P, T, C>,
}

impl<'a, P, T, C> Deref for CredentialGuard<'a, P, T, C> {
    type Target = ClientAssertionCredential<P, T, C>;

    fn deref(&self) -> &Self::Target {
        self.credential
    }
}

impl<P, T, C> Drop for CredentialGuard<'_, P, T, C> {
    fn drop(&mut self) {
        if self.credential.close().is_err() {
            tracing::debug!("credential was already closed when leaving its scope");
        }
    }
}

impl<P, T, C: fmt::Debug> fmt::Debug for CredentialGuard<'_, P, T, C> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("CredentialGuard")
            .field("credential", self.credential)
            .finish()
    }
}
