//! Synchronous gate in front of protected views.

use crate::credentials::{CredentialStore, WriteOrigin};
use crate::routes::{Redirect, Routes};

/// Outcome of a guard check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GuardDecision {
    /// Access granted. `restored` is set when the session had to be
    /// rebuilt from the durable backup.
    Grant { restored: bool },
    /// Access denied; the caller must navigate to the redirect.
    Deny(Redirect),
}

impl GuardDecision {
    pub fn is_granted(&self) -> bool {
        matches!(self, GuardDecision::Grant { .. })
    }
}

/// Grants access to protected views based only on locally stored state.
///
/// No remote verification happens here: a token rejected server-side
/// surfaces as an auth error from the API layer instead.
pub struct AccessGuard {
    credentials: CredentialStore,
    routes: Routes,
}

impl AccessGuard {
    pub fn new(credentials: CredentialStore, routes: Routes) -> Self {
        Self {
            credentials,
            routes,
        }
    }

    /// Evaluate a navigation into `requested`.
    pub fn check(&self, requested: &str) -> GuardDecision {
        if self.credentials.has_primary() {
            return GuardDecision::Grant { restored: false };
        }

        if self.credentials.has_valid() {
            if let Some(record) = self.credentials.read_secondary() {
                if !self.credentials.write(&record, WriteOrigin::Restore) {
                    tracing::warn!(
                        "Could not populate the primary store while entering {requested}"
                    );
                }
                self.credentials.renew();
                tracing::debug!("Session restored from backup while entering {requested}");
                return GuardDecision::Grant { restored: true };
            }
        }

        tracing::debug!("No session; redirecting {requested} to {}", self.routes.login);
        GuardDecision::Deny(Redirect {
            to: self.routes.login.clone(),
            return_to: Some(requested.to_string()),
        })
    }
}
