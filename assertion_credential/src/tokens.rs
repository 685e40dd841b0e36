//! Access tokens and the lifetime information used to cache and refresh them

use assertion_clock::{Clock, DurationSecs, System, UnixTime};
use serde::{Deserialize, Serialize};

use super::{BearerToken, BearerTokenRef};

/// An access token together with the instant at which it expires
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessToken {
    token: BearerToken,
    expires_on: UnixTime,
}

impl AccessToken {
    /// Constructs a new access token
    pub fn new(token: BearerToken, expires_on: UnixTime) -> Self {
        Self { token, expires_on }
    }

    /// Gets the bearer token value
    #[inline]
    pub fn token(&self) -> &BearerTokenRef {
        &self.token
    }

    /// Gets the time that the token will expire
    #[inline]
    pub fn expires_on(&self) -> UnixTime {
        self.expires_on
    }
}

impl From<AccessTokenInfo> for AccessToken {
    fn from(info: AccessTokenInfo) -> Self {
        Self {
            token: info.token,
            expires_on: info.expires_on,
        }
    }
}

/// A token as returned by the authority with some additional lifetime information
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessTokenInfo {
    token: BearerToken,
    token_type: String,
    expires_on: UnixTime,
    refresh_on: Option<UnixTime>,
}

/// A token's lifecycle status
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TokenStatus {
    /// The token is valid and not yet due for refresh
    Fresh,
    /// The token is valid, but the authority suggests refreshing it
    Stale,
    /// The token is no longer valid
    Expired,
}

impl AccessTokenInfo {
    /// Constructs a token record with no refresh hint
    pub fn new(token: BearerToken, expires_on: UnixTime) -> Self {
        Self {
            token,
            token_type: DEFAULT_TOKEN_TYPE.to_owned(),
            expires_on,
            refresh_on: None,
        }
    }

    /// Sets the time after which the token should be refreshed
    pub fn with_refresh_on(mut self, refresh_on: UnixTime) -> Self {
        self.refresh_on = Some(refresh_on);
        self
    }

    /// Sets the token type
    pub fn with_token_type(mut self, token_type: impl Into<String>) -> Self {
        self.token_type = token_type.into();
        self
    }

    /// Gets the bearer token value
    #[inline]
    pub fn token(&self) -> &BearerTokenRef {
        &self.token
    }

    /// Gets the token type, usually `Bearer`
    #[inline]
    pub fn token_type(&self) -> &str {
        &self.token_type
    }

    /// Gets the time that the token will expire
    #[inline]
    pub fn expires_on(&self) -> UnixTime {
        self.expires_on
    }

    /// Gets the time after which the token should be refreshed, if known
    #[inline]
    pub fn refresh_on(&self) -> Option<UnixTime> {
        self.refresh_on
    }

    /// Gets the token's current lifetime status
    #[inline]
    pub fn token_status(&self) -> TokenStatus {
        self.token_status_at(System.now())
    }

    /// Gets the token's lifetime status as of the provided time
    ///
    /// Tokens without a refresh hint are fresh until they expire.
    #[inline]
    pub fn token_status_at(&self, time: UnixTime) -> TokenStatus {
        if time >= self.expires_on {
            TokenStatus::Expired
        } else if self.refresh_on.map_or(false, |r| time >= r) {
            TokenStatus::Stale
        } else {
            TokenStatus::Fresh
        }
    }

    /// Gets a duration for how much longer the token would be valid as of the
    /// provided time
    #[inline]
    pub fn until_expired_at(&self, time: UnixTime) -> DurationSecs {
        self.expires_on - time
    }
}

const DEFAULT_TOKEN_TYPE: &str = "Bearer";

/// Configuration for deriving a refresh hint from a token's lifetime
///
/// When the authority does not say when a token should be refreshed, tokens
/// that live at least `min_lifetime_for_hint` are due for refresh once
/// `refresh_ratio` of their lifetime has passed. Shorter-lived tokens get no
/// hint.
#[derive(Clone, Debug)]
pub struct TokenLifetimeConfig<C = System> {
    refresh_ratio: f64,
    min_lifetime_for_hint: DurationSecs,
    clock: C,
}

impl Default for TokenLifetimeConfig {
    /// Default lifetime configuration
    ///
    /// Refreshes at half-life for tokens living two hours or more, using the
    /// system clock.
    fn default() -> Self {
        Self {
            refresh_ratio: 0.5,
            min_lifetime_for_hint: DurationSecs(7200),
            clock: System,
        }
    }
}

impl TokenLifetimeConfig {
    /// Constructs a new lifetime configuration
    pub fn new(refresh_ratio: f64, min_lifetime_for_hint: DurationSecs) -> Self {
        Self {
            refresh_ratio,
            min_lifetime_for_hint,
            clock: System,
        }
    }
}

impl<C> TokenLifetimeConfig<C> {
    /// Sets a custom clock to be used
    pub fn with_clock<D>(self, clock: D) -> TokenLifetimeConfig<D> {
        TokenLifetimeConfig {
            refresh_ratio: self.refresh_ratio,
            min_lifetime_for_hint: self.min_lifetime_for_hint,
            clock,
        }
    }

    /// Gets the clock used to stamp issued tokens
    pub fn clock(&self) -> &C {
        &self.clock
    }

    fn refresh_hint(
        &self,
        issued: UnixTime,
        lifetime: DurationSecs,
        refresh_in: Option<DurationSecs>,
    ) -> Option<UnixTime> {
        match refresh_in {
            Some(refresh_in) => Some(issued + refresh_in),
            None if lifetime >= self.min_lifetime_for_hint => {
                Some(issued + lifetime * self.refresh_ratio)
            }
            None => None,
        }
    }
}

impl<C: Clock> TokenLifetimeConfig<C> {
    /// Given an access token, its lifetime, and the authority's refresh hint,
    /// constructs a token record stamped with the current time
    pub fn create_token<A>(
        &self,
        access_token: A,
        token_type: Option<&str>,
        lifetime: DurationSecs,
        refresh_in: Option<DurationSecs>,
    ) -> AccessTokenInfo
    where
        A: AsRef<BearerTokenRef>,
    {
        let issued = self.clock.now();
        AccessTokenInfo {
            token: access_token.as_ref().to_owned(),
            token_type: token_type.unwrap_or(DEFAULT_TOKEN_TYPE).to_owned(),
            expires_on: issued + lifetime,
            refresh_on: self.refresh_hint(issued, lifetime, refresh_in),
        }
    }
}
