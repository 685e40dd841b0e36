//! Errors surfaced while acquiring tokens

use std::error;

use thiserror::Error;

use crate::{client::aad::TokenRequestError, TenantId};

/// A boxed error returned by an assertion producer
pub type BoxError = Box<dyn error::Error + Send + Sync + 'static>;

/// An error while attempting to obtain an access token
///
/// Every failure is surfaced to the caller unmodified; a failed request never
/// yields a stale or synthetic token.
#[derive(Debug, Error)]
pub enum Error {
    /// A token was requested without any scopes
    #[error("a token request requires at least one scope")]
    EmptyScopes,

    /// A tenant ID contains characters that are not permitted
    #[error("invalid tenant ID '{tenant}': only alphanumeric characters, '-', and '.' are permitted")]
    InvalidTenantId {
        /// The rejected tenant ID
        tenant: String,
    },

    /// The requested tenant is neither the home tenant nor additionally allowed
    #[error("the credential is not configured to acquire tokens for tenant '{tenant}'; add it to the additionally allowed tenants or use \"*\" to allow any tenant")]
    TenantPolicyViolation {
        /// The rejected tenant
        tenant: TenantId,
    },

    /// The assertion producer failed to provide an assertion
    #[error("error producing client assertion")]
    AssertionProduction(#[source] BoxError),

    /// The authority rejected the exchange or could not be reached
    #[error("error exchanging client assertion for an access token")]
    TokenExchange(#[from] TokenRequestError),

    /// The credential's session was used after being closed
    #[error("the credential session has been closed")]
    SessionClosed,

    /// The caller cancelled the request or its deadline elapsed
    #[error("the token request was cancelled")]
    Cancelled,

    /// The credential was configured with an unusable value
    #[error("invalid credential configuration: {0}")]
    InvalidConfig(String),
}

impl Error {
    /// Gets the underlying exchange failure, if this error came from the authority exchange
    pub fn as_exchange_error(&self) -> Option<&TokenRequestError> {
        match self {
            Self::TokenExchange(error) => Some(error),
            _ => None,
        }
    }
}
