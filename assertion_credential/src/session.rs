//! Lifecycle management for a credential's network client

use std::{fmt, sync::Arc};

use arc_swap::ArcSwapOption;

use crate::Error;

/// Exclusive ownership of the client a credential uses to talk to its authority
///
/// The session is open from construction until [`close`][Self::close] is
/// called. Requests already in flight when the session closes keep their own
/// handle to the client and run to completion; every later use fails with
/// [`Error::SessionClosed`]. The client's resources (such as its connection
/// pool) are released once the last in-flight request finishes.
pub struct CredentialSession<T> {
    client: ArcSwapOption<T>,
}

impl<T> CredentialSession<T> {
    /// Opens a session around `client`
    pub fn open(client: T) -> Self {
        Self {
            client: ArcSwapOption::from_pointee(client),
        }
    }

    /// Gets a handle to the client
    ///
    /// Fails with [`Error::SessionClosed`] once the session has been closed.
    pub fn client(&self) -> Result<Arc<T>, Error> {
        self.client.load_full().ok_or(Error::SessionClosed)
    }

    /// Whether the session has been closed
    pub fn is_closed(&self) -> bool {
        self.client.load().is_none()
    }

    /// Closes the session, releasing the client
    ///
    /// Closing is not idempotent: only the first call succeeds, and any later
    /// call fails with [`Error::SessionClosed`].
    pub fn close(&self) -> Result<(), Error> {
        match self.client.swap(None) {
            Some(_) => {
                tracing::debug!("credential session closed");
                Ok(())
            }
            None => Err(Error::SessionClosed),
        }
    }
}

impl<T> fmt::Debug for CredentialSession<T> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("CredentialSession")
            .field("closed", &self.is_closed())
            .finish()
    }
}
