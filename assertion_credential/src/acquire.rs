//! The two-phase token acquisition algorithm
//!
//! Every acquisition first asks for a cached token and only falls back to
//! requesting a new token when nothing usable is cached. The algorithm is
//! independent of how a particular credential looks up or requests tokens;
//! credentials provide those two capabilities through [`AcquireToken`], and
//! [`TokenAcquirer`] drives them.

use std::{
    error,
    sync::atomic::{AtomicU64, Ordering},
    time::Duration,
};

use assertion_clock::{Clock, DurationSecs, System, UnixTime};
use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::{client::TokenRequest, AccessTokenInfo, Error, TenantId, TenantIdRef};

/// A cached token this close to expiry is due for refresh when proactive
/// refresh is enabled
const REFRESH_OFFSET: DurationSecs = DurationSecs(300);

/// Minimum time between proactive refresh attempts for a token nearing expiry
///
/// A token past its refresh hint is refreshed on every call until a refresh
/// succeeds.
const REFRESH_RETRY_DELAY: DurationSecs = DurationSecs(30);

/// Per-call options for acquiring a token
#[derive(Clone, Debug, Default)]
pub struct GetTokenOptions {
    tenant_id: Option<TenantId>,
    claims: Option<String>,
    enable_cae: bool,
    timeout: Option<Duration>,
    cancellation: Option<CancellationToken>,
}

impl GetTokenOptions {
    /// Constructs the default options
    pub fn new() -> Self {
        Self::default()
    }

    /// Requests the token from `tenant_id` instead of the home tenant
    pub fn with_tenant_id(mut self, tenant_id: impl Into<TenantId>) -> Self {
        self.tenant_id = Some(tenant_id.into());
        self
    }

    /// Attaches a claims challenge returned by a resource
    pub fn with_claims(mut self, claims: impl Into<String>) -> Self {
        self.claims = Some(claims.into());
        self
    }

    /// Requests a token supporting continuous access evaluation
    pub fn with_cae(mut self, enable_cae: bool) -> Self {
        self.enable_cae = enable_cae;
        self
    }

    /// Bounds the time spent requesting a new token
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Abandons the request for a new token when `token` is cancelled
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancellation = Some(token);
        self
    }

    /// The requested tenant
    pub fn tenant_id(&self) -> Option<&TenantIdRef> {
        self.tenant_id.as_deref()
    }

    /// The claims challenge
    pub fn claims(&self) -> Option<&str> {
        self.claims.as_deref()
    }

    /// Whether continuous access evaluation is requested
    pub fn enable_cae(&self) -> bool {
        self.enable_cae
    }
}

/// The capabilities a credential provides to the acquisition algorithm
#[async_trait]
pub trait AcquireToken: Send + Sync {
    /// Looks up a cached token without performing network I/O
    fn lookup_cached(&self, request: &TokenRequest) -> Result<Option<AccessTokenInfo>, Error>;

    /// Requests a new token from the authority
    async fn request_new(&self, request: &TokenRequest) -> Result<AccessTokenInfo, Error>;
}

/// Drives the acquisition algorithm for a credential
///
/// A call either returns a token found in the cache, with no request made, or
/// makes exactly one request for a new token. Failures are returned as-is and
/// leave no state behind, so the next call starts again with a cache lookup.
#[derive(Debug)]
pub struct TokenAcquirer<C = System> {
    name: &'static str,
    proactive_refresh: bool,
    last_request: AtomicU64,
    clock: C,
}

impl TokenAcquirer<System> {
    /// Constructs an acquirer for the credential called `name`
    ///
    /// The name is only used in diagnostics.
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            proactive_refresh: false,
            last_request: AtomicU64::new(0),
            clock: System,
        }
    }
}

impl<C> TokenAcquirer<C> {
    /// Requests a new token when a cached token enters its refresh window
    ///
    /// If that request fails, the cached token is still valid and is returned.
    pub fn with_proactive_refresh(mut self, enabled: bool) -> Self {
        self.proactive_refresh = enabled;
        self
    }

    /// Sets a custom clock to be used
    ///
    /// Useful for testing purposes
    pub fn with_clock<D>(self, clock: D) -> TokenAcquirer<D> {
        TokenAcquirer {
            name: self.name,
            proactive_refresh: self.proactive_refresh,
            last_request: self.last_request,
            clock,
        }
    }
}

impl<C: Clock + Send + Sync> TokenAcquirer<C> {
    /// Acquires a token for `request` from `source`
    pub async fn acquire<A>(
        &self,
        source: &A,
        request: &TokenRequest,
        options: &GetTokenOptions,
    ) -> Result<AccessTokenInfo, Error>
    where
        A: AcquireToken + ?Sized,
    {
        let result = self.acquire_inner(source, request, options).await;

        match &result {
            Ok(token) => tracing::info!(
                credential = self.name,
                scopes = ?request.scopes(),
                tenant = %request.tenant(),
                expires_on = token.expires_on().0,
                "get_token succeeded"
            ),
            Err(error) => tracing::warn!(
                credential = self.name,
                scopes = ?request.scopes(),
                tenant = %request.tenant(),
                error = (error as &dyn error::Error),
                "get_token failed"
            ),
        }

        result
    }

    async fn acquire_inner<A>(
        &self,
        source: &A,
        request: &TokenRequest,
        options: &GetTokenOptions,
    ) -> Result<AccessTokenInfo, Error>
    where
        A: AcquireToken + ?Sized,
    {
        match source.lookup_cached(request)? {
            Some(cached) if !self.should_refresh(&cached) => {
                tracing::trace!("using cached token");
                Ok(cached)
            }
            Some(cached) => {
                tracing::debug!(
                    expires_on = cached.expires_on().0,
                    refresh_on = cached.refresh_on().map(|r| r.0),
                    "cached token is due for refresh"
                );
                match self.request_new(source, request, options).await {
                    Ok(token) => Ok(token),
                    Err(error @ (Error::Cancelled | Error::SessionClosed)) => Err(error),
                    Err(error) => {
                        tracing::warn!(
                            error = (&error as &dyn error::Error),
                            "unable to refresh token, using cached token"
                        );
                        Ok(cached)
                    }
                }
            }
            None => {
                tracing::debug!("no usable cached token, requesting new token");
                self.request_new(source, request, options).await
            }
        }
    }

    async fn request_new<A>(
        &self,
        source: &A,
        request: &TokenRequest,
        options: &GetTokenOptions,
    ) -> Result<AccessTokenInfo, Error>
    where
        A: AcquireToken + ?Sized,
    {
        if let Some(cancellation) = &options.cancellation {
            if cancellation.is_cancelled() {
                return Err(Error::Cancelled);
            }
        }

        self.last_request
            .store(self.clock.now().0, Ordering::Relaxed);

        let requested = async {
            match options.timeout {
                Some(timeout) => tokio::time::timeout(timeout, source.request_new(request))
                    .await
                    .map_err(|_| {
                        tracing::debug!(timeout_ms = timeout.as_millis() as u64, "token request timed out");
                        Error::Cancelled
                    })?,
                None => source.request_new(request).await,
            }
        };

        match &options.cancellation {
            Some(cancellation) => {
                tokio::select! {
                    biased;
                    _ = cancellation.cancelled() => {
                        tracing::debug!("token request cancelled");
                        Err(Error::Cancelled)
                    }
                    result = requested => result,
                }
            }
            None => requested.await,
        }
    }

    fn should_refresh(&self, token: &AccessTokenInfo) -> bool {
        if !self.proactive_refresh {
            return false;
        }

        let now = self.clock.now();
        if token.refresh_on().map_or(false, |r| now >= r) {
            return true;
        }
        if token.until_expired_at(now) > REFRESH_OFFSET {
            return false;
        }

        let last_request = UnixTime(self.last_request.load(Ordering::Relaxed));
        now - last_request >= REFRESH_RETRY_DELAY
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    };

    use assertion_clock::TestClock;
    use parking_lot::Mutex;

    use super::*;
    use crate::{BearerToken, Scope};

    #[derive(Default)]
    struct ScriptedSource {
        cached: Mutex<Option<AccessTokenInfo>>,
        lookups: AtomicUsize,
        requests: AtomicUsize,
        fail_requests: bool,
        stall_requests: bool,
    }

    #[async_trait]
    impl AcquireToken for ScriptedSource {
        fn lookup_cached(
            &self,
            _: &TokenRequest,
        ) -> Result<Option<AccessTokenInfo>, Error> {
            self.lookups.fetch_add(1, Ordering::SeqCst);
            Ok(self.cached.lock().clone())
        }

        async fn request_new(&self, _: &TokenRequest) -> Result<AccessTokenInfo, Error> {
            self.requests.fetch_add(1, Ordering::SeqCst);
            if self.stall_requests {
                std::future::pending::<()>().await;
            }
            if self.fail_requests {
                return Err(Error::InvalidConfig("scripted failure".to_owned()));
            }
            let token = AccessTokenInfo::new(BearerToken::from_static("new"), UnixTime(10_000));
            *self.cached.lock() = Some(token.clone());
            Ok(token)
        }
    }

    fn request() -> TokenRequest {
        TokenRequest::new(
            vec![Scope::from_static("https://graph.example/.default")],
            TenantId::from_static("T1"),
        )
    }

    fn cached(expires_on: u64) -> Mutex<Option<AccessTokenInfo>> {
        Mutex::new(Some(AccessTokenInfo::new(
            BearerToken::from_static("cached"),
            UnixTime(expires_on),
        )))
    }

    mod when_nothing_is_cached {
        use super::*;

        #[tokio::test]
        async fn requests_a_new_token_once() {
            let source = ScriptedSource::default();
            let acquirer = TokenAcquirer::new("test");

            let token = acquirer
                .acquire(&source, &request(), &GetTokenOptions::new())
                .await
                .unwrap();

            assert_eq!(token.token().as_str(), "new");
            assert_eq!(source.lookups.load(Ordering::SeqCst), 1);
            assert_eq!(source.requests.load(Ordering::SeqCst), 1);
        }

        #[tokio::test]
        async fn failure_is_returned_and_next_call_looks_up_again() {
            let source = ScriptedSource {
                fail_requests: true,
                ..ScriptedSource::default()
            };
            let acquirer = TokenAcquirer::new("test");

            let first = acquirer
                .acquire(&source, &request(), &GetTokenOptions::new())
                .await;
            assert!(matches!(first, Err(Error::InvalidConfig(_))));

            let second = acquirer
                .acquire(&source, &request(), &GetTokenOptions::new())
                .await;
            assert!(second.is_err());
            assert_eq!(source.lookups.load(Ordering::SeqCst), 2);
            assert_eq!(source.requests.load(Ordering::SeqCst), 2);
        }

        #[tokio::test]
        async fn pre_cancelled_request_is_never_started() {
            let source = ScriptedSource::default();
            let acquirer = TokenAcquirer::new("test");
            let cancellation = CancellationToken::new();
            cancellation.cancel();

            let result = acquirer
                .acquire(
                    &source,
                    &request(),
                    &GetTokenOptions::new().with_cancellation(cancellation),
                )
                .await;

            assert!(matches!(result, Err(Error::Cancelled)));
            assert_eq!(source.requests.load(Ordering::SeqCst), 0);
        }

        #[tokio::test]
        async fn cancellation_abandons_in_flight_request() {
            let source = Arc::new(ScriptedSource {
                stall_requests: true,
                ..ScriptedSource::default()
            });
            let acquirer = Arc::new(TokenAcquirer::new("test"));
            let cancellation = CancellationToken::new();

            let task = {
                let source = source.clone();
                let acquirer = acquirer.clone();
                let options = GetTokenOptions::new().with_cancellation(cancellation.clone());
                tokio::spawn(async move { acquirer.acquire(&*source, &request(), &options).await })
            };

            while source.requests.load(Ordering::SeqCst) == 0 {
                tokio::task::yield_now().await;
            }
            cancellation.cancel();

            assert!(matches!(task.await.unwrap(), Err(Error::Cancelled)));
            assert!(source.cached.lock().is_none());
        }

        #[tokio::test(start_paused = true)]
        async fn timeout_surfaces_as_cancelled() {
            let source = ScriptedSource {
                stall_requests: true,
                ..ScriptedSource::default()
            };
            let acquirer = TokenAcquirer::new("test");

            let result = acquirer
                .acquire(
                    &source,
                    &request(),
                    &GetTokenOptions::new().with_timeout(Duration::from_secs(5)),
                )
                .await;

            assert!(matches!(result, Err(Error::Cancelled)));
            assert!(source.cached.lock().is_none());
        }
    }

    mod when_a_token_is_cached {
        use super::*;

        #[tokio::test]
        async fn returns_it_without_requesting() {
            let source = ScriptedSource {
                cached: cached(10_000),
                ..ScriptedSource::default()
            };
            let acquirer = TokenAcquirer::new("test");

            let token = acquirer
                .acquire(&source, &request(), &GetTokenOptions::new())
                .await
                .unwrap();

            assert_eq!(token.token().as_str(), "cached");
            assert_eq!(source.requests.load(Ordering::SeqCst), 0);
        }

        #[tokio::test]
        async fn near_expiry_is_ignored_without_proactive_refresh() {
            let source = ScriptedSource {
                cached: cached(1_100),
                ..ScriptedSource::default()
            };
            let acquirer = TokenAcquirer::new("test").with_clock(TestClock::new(UnixTime(1_000)));

            let token = acquirer
                .acquire(&source, &request(), &GetTokenOptions::new())
                .await
                .unwrap();

            assert_eq!(token.token().as_str(), "cached");
            assert_eq!(source.requests.load(Ordering::SeqCst), 0);
        }
    }

    mod with_proactive_refresh {
        use super::*;

        #[tokio::test]
        async fn refreshes_token_near_expiry() {
            let source = ScriptedSource {
                cached: cached(1_100),
                ..ScriptedSource::default()
            };
            let acquirer = TokenAcquirer::new("test")
                .with_proactive_refresh(true)
                .with_clock(TestClock::new(UnixTime(1_000)));

            let token = acquirer
                .acquire(&source, &request(), &GetTokenOptions::new())
                .await
                .unwrap();

            assert_eq!(token.token().as_str(), "new");
            assert_eq!(source.requests.load(Ordering::SeqCst), 1);
        }

        #[tokio::test]
        async fn refreshes_token_past_its_refresh_hint() {
            let source = ScriptedSource {
                cached: Mutex::new(Some(
                    AccessTokenInfo::new(BearerToken::from_static("cached"), UnixTime(9_000))
                        .with_refresh_on(UnixTime(900)),
                )),
                ..ScriptedSource::default()
            };
            let acquirer = TokenAcquirer::new("test")
                .with_proactive_refresh(true)
                .with_clock(TestClock::new(UnixTime(1_000)));

            let token = acquirer
                .acquire(&source, &request(), &GetTokenOptions::new())
                .await
                .unwrap();

            assert_eq!(token.token().as_str(), "new");
        }

        #[tokio::test]
        async fn falls_back_to_cached_token_and_waits_before_retrying() {
            let source = ScriptedSource {
                cached: cached(1_100),
                fail_requests: true,
                ..ScriptedSource::default()
            };
            let clock = TestClock::new(UnixTime(1_000));
            let acquirer = TokenAcquirer::new("test")
                .with_proactive_refresh(true)
                .with_clock(clock.clone());

            let first = acquirer
                .acquire(&source, &request(), &GetTokenOptions::new())
                .await
                .unwrap();
            assert_eq!(first.token().as_str(), "cached");
            assert_eq!(source.requests.load(Ordering::SeqCst), 1);

            clock.inc(10);
            acquirer
                .acquire(&source, &request(), &GetTokenOptions::new())
                .await
                .unwrap();
            assert_eq!(source.requests.load(Ordering::SeqCst), 1);

            clock.inc(30);
            acquirer
                .acquire(&source, &request(), &GetTokenOptions::new())
                .await
                .unwrap();
            assert_eq!(source.requests.load(Ordering::SeqCst), 2);
        }

        #[tokio::test]
        async fn retries_immediately_once_past_refresh_hint() {
            let source = ScriptedSource {
                cached: Mutex::new(Some(
                    AccessTokenInfo::new(BearerToken::from_static("cached"), UnixTime(9_000))
                        .with_refresh_on(UnixTime(900)),
                )),
                fail_requests: true,
                ..ScriptedSource::default()
            };
            let clock = TestClock::new(UnixTime(1_000));
            let acquirer = TokenAcquirer::new("test")
                .with_proactive_refresh(true)
                .with_clock(clock.clone());

            let first = acquirer
                .acquire(&source, &request(), &GetTokenOptions::new())
                .await
                .unwrap();
            assert_eq!(first.token().as_str(), "cached");
            assert_eq!(source.requests.load(Ordering::SeqCst), 1);

            clock.inc(1);
            let second = acquirer
                .acquire(&source, &request(), &GetTokenOptions::new())
                .await
                .unwrap();
            assert_eq!(second.token().as_str(), "cached");
            assert_eq!(source.requests.load(Ordering::SeqCst), 2);
        }

        #[tokio::test]
        async fn leaves_fresh_tokens_alone() {
            let source = ScriptedSource {
                cached: cached(5_000),
                ..ScriptedSource::default()
            };
            let acquirer = TokenAcquirer::new("test")
                .with_proactive_refresh(true)
                .with_clock(TestClock::new(UnixTime(1_000)));

            acquirer
                .acquire(&source, &request(), &GetTokenOptions::new())
                .await
                .unwrap();

            assert_eq!(source.requests.load(Ordering::SeqCst), 0);
        }
    }
}
