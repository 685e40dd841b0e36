//! Producers of client assertions

use std::{fmt, future::Future};

use async_trait::async_trait;

use crate::{BoxError, ClientAssertion};

/// A capability that produces a fresh client assertion on demand
///
/// A credential asks for a new assertion every time it needs to contact the
/// authority and never reuses one, so producers may hand out single-use or
/// very short-lived assertions.
///
/// Any `Fn() -> Result<impl Into<ClientAssertion>, impl Into<BoxError>>`
/// closure is a producer. Asynchronous producers can be built with
/// [`from_async_fn`].
#[async_trait]
pub trait AssertionProducer: Send + Sync {
    /// Produces a new assertion
    async fn produce_assertion(&self) -> Result<ClientAssertion, BoxError>;
}

#[async_trait]
impl<F, A, E> AssertionProducer for F
where
    F: Fn() -> Result<A, E> + Send + Sync,
    A: Into<ClientAssertion> + 'static,
    E: Into<BoxError> + 'static,
{
    async fn produce_assertion(&self) -> Result<ClientAssertion, BoxError> {
        (self)().map(Into::into).map_err(Into::into)
    }
}

/// An assertion producer backed by an asynchronous function
pub struct AsyncAssertionFn<F> {
    f: F,
}

/// Wraps an asynchronous function as an [`AssertionProducer`]
pub fn from_async_fn<F, Fut, A, E>(f: F) -> AsyncAssertionFn<F>
where
    F: Fn() -> Fut + Send + Sync,
    Fut: Future<Output = Result<A, E>> + Send + 'static,
    A: Into<ClientAssertion> + 'static,
    E: Into<BoxError> + 'static,
{
    AsyncAssertionFn { f }
}

#[async_trait]
impl<F, Fut, A, E> AssertionProducer for AsyncAssertionFn<F>
where
    F: Fn() -> Fut + Send + Sync,
    Fut: Future<Output = Result<A, E>> + Send + 'static,
    A: Into<ClientAssertion> + 'static,
    E: Into<BoxError> + 'static,
{
    async fn produce_assertion(&self) -> Result<ClientAssertion, BoxError> {
        (self.f)().await.map(Into::into).map_err(Into::into)
    }
}

impl<F> fmt::Debug for AsyncAssertionFn<F> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("AsyncAssertionFn").finish_non_exhaustive()
    }
}
