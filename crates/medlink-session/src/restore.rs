//! One-shot session restoration at process start.

use crate::credentials::{CredentialStore, WriteOrigin};
use crate::routes::{Redirect, Routes};
use std::sync::atomic::{AtomicU8, Ordering};

const NOT_STARTED: u8 = 0;
const RESTORING: u8 = 1;
const DONE: u8 = 2;

/// What a restoration attempt did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RestoreOutcome {
    /// Restoration already ran (or is running) in this process.
    AlreadyRan,
    /// The primary store already held a session; its backup was renewed.
    Active,
    /// Nothing to restore. The user stays on the login surface.
    NoSession,
    /// The backup was copied into the primary store.
    Restored { redirect: Option<Redirect> },
}

/// Reconciles the primary and secondary stores into one live session,
/// at most once per process.
///
/// The latch moves `NotStarted → Restoring → Done` through a single
/// compare-exchange, so repeated or concurrent calls after the first are no-ops.
pub struct SessionRestorer {
    credentials: CredentialStore,
    routes: Routes,
    state: AtomicU8,
}

impl SessionRestorer {
    pub fn new(credentials: CredentialStore, routes: Routes) -> Self {
        Self {
            credentials,
            routes,
            state: AtomicU8::new(NOT_STARTED),
        }
    }

    /// Whether restoration has completed.
    pub fn is_done(&self) -> bool {
        self.state.load(Ordering::Acquire) == DONE
    }

    /// Run restoration for a process currently showing `current_path`.
    pub fn restore(&self, current_path: &str) -> RestoreOutcome {
        if self
            .state
            .compare_exchange(NOT_STARTED, RESTORING, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            tracing::debug!("Session restoration already ran; skipping");
            return RestoreOutcome::AlreadyRan;
        }

        let outcome = self.reconcile(current_path);
        self.state.store(DONE, Ordering::Release);
        tracing::debug!("Session restoration finished: {outcome:?}");
        outcome
    }

    fn reconcile(&self, current_path: &str) -> RestoreOutcome {
        if self.credentials.has_primary() {
            self.credentials.renew();
            return RestoreOutcome::Active;
        }

        if !self.credentials.has_valid() {
            return RestoreOutcome::NoSession;
        }

        let Some(record) = self.credentials.read_secondary() else {
            return RestoreOutcome::NoSession;
        };

        if !self.credentials.write(&record, WriteOrigin::Restore) {
            tracing::warn!("Could not populate the primary store; leaving session unrestored");
            return RestoreOutcome::NoSession;
        }
        self.credentials.renew();

        let redirect = self
            .routes
            .is_entry(current_path)
            .then(|| Redirect::to(self.routes.landing.clone()));
        RestoreOutcome::Restored { redirect }
    }
}
