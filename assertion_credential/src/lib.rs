//! Access tokens for service principals that authenticate with a client assertion
//!
//! Workloads running outside of their identity provider's own infrastructure
//! often can't hold a long-lived client secret. Instead, they obtain a
//! short-lived signed JWT (the _client assertion_) from some other trusted
//! source, such as a projected service account token or a federated identity
//! issuer, and exchange it for an access token under the OAuth2 client
//! credentials grant.
//!
//! [`ClientAssertionCredential`] manages that exchange. Callers supply a
//! producer that can mint a fresh assertion on demand, and then ask the
//! credential for tokens. Each request:
//!
//! 1. validates the requested scopes and tenant against the credential's
//!    [`TenantPolicy`],
//! 2. returns a cached token if one is still comfortably valid, and otherwise
//! 3. asks the producer for exactly one new assertion and exchanges it with the
//!    authority, caching the result.
//!
//! Failures are always surfaced to the caller. A failed request never yields a
//! stale token, and nothing about the failure is remembered, so the next
//! request starts again with a cache lookup.
//!
//! ```no_run
//! use assertion_credential::{
//!     ClientAssertionCredential, CredentialOptions, GetTokenOptions,
//! };
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let options = CredentialOptions::new().with_additionally_allowed_tenants(["fabrikam"]);
//!
//! let credential = ClientAssertionCredential::new(
//!     "contoso",
//!     "00000000-0000-0000-0000-000000000000",
//!     || std::env::var("CLIENT_ASSERTION"),
//!     options,
//! )?;
//!
//! let token = credential
//!     .get_token(
//!         ["https://graph.microsoft.com/.default"],
//!         &GetTokenOptions::new().with_tenant_id("fabrikam"),
//!     )
//!     .await?;
//!
//! tracing::info!(expires_on = %token.expires_on(), "acquired token");
//!
//! credential.close()?;
//! # Ok(())
//! # }
//! ```
//!
//! # Features
//!
//! * `rustls-tls` (default): Uses rustls to connect to the authority.
//! * `default-tls`: Uses the platform's native TLS implementation.

#![cfg_attr(docsrs, feature(doc_cfg))]
#![warn(
    missing_docs,
    unused_import_braces,
    unused_imports,
    unused_qualifications
)]
#![deny(
    missing_debug_implementations,
    trivial_numeric_casts,
    unsafe_code,
    unused_must_use
)]

mod acquire;
mod assertion;
pub mod backoff;
mod braids;
pub mod cache;
pub mod client;
mod config;
mod credential;
mod error;
mod session;
mod tenant;
mod tokens;

pub use acquire::{AcquireToken, GetTokenOptions, TokenAcquirer};
pub use assertion::{from_async_fn, AssertionProducer, AsyncAssertionFn};
pub use braids::*;
pub use client::{
    aad::dto::ErrorBody, AadClient, TokenClient, TokenRequest, TokenRequestError,
};
pub use config::{
    normalize_authority, CredentialOptions, TransportOptions, AUTHORITY_HOST_ENV,
    DEFAULT_AUTHORITY_HOST,
};
pub use credential::{ClientAssertionCredential, CredentialGuard};
pub use error::{BoxError, Error};
pub use session::CredentialSession;
pub use tenant::{validate_tenant_id, TenantPolicy, ANY_TENANT};
pub use tokens::{AccessToken, AccessTokenInfo, TokenLifetimeConfig, TokenStatus};
