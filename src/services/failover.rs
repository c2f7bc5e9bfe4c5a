use log::warn;
use std::future::Future;

use crate::core::credentials::{mask_key, CredentialManager};
use crate::core::error::{RemoteError, StudioError};

/// Runs remote calls against the active API key, moving on to the next key
/// when the current one is rejected or out of quota.
#[derive(Clone)]
pub struct ResilientCaller {
    credentials: CredentialManager,
}

impl ResilientCaller {
    pub fn new(credentials: CredentialManager) -> Self {
        Self { credentials }
    }

    pub fn credentials(&self) -> &CredentialManager {
        &self.credentials
    }

    /// Calls `work` with the active key. Switchable failures rotate to the
    /// next key and try again, at most once per stored key. Any other
    /// failure is returned as is.
    pub async fn call<T, F, Fut>(&self, mut work: F) -> Result<T, StudioError>
    where
        F: FnMut(String) -> Fut,
        Fut: Future<Output = Result<T, RemoteError>>,
    {
        let initial = self.credentials.active().ok_or(StudioError::NoCredential)?;
        let total = self.credentials.len();
        let mut current = initial.clone();

        for _ in 0..total {
            let err = match work(current.clone()).await {
                Ok(value) => return Ok(value),
                Err(err) => err,
            };

            if !err.is_switchable() {
                return Err(StudioError::Remote(err));
            }

            warn!(
                "API key {} failed ({:?}), trying next key",
                mask_key(&current),
                err.kind
            );
            self.credentials.advance().await?;

            match self.credentials.active() {
                Some(next) if next != initial => current = next,
                _ => return Err(StudioError::AllCredentialsExhausted),
            }
        }

        Err(StudioError::AllCredentialsExhausted)
    }
}
