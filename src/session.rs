//! Credential lifecycle management.
//!
//! Owns the current access credential and drives the acquisition, silent
//! refresh and invalidation state machine:
//!
//! ```text
//! SignedOut --begin_sign_in--> Authorizing --credential_received--> Active
//! Active --refresh timer--> RefreshPending --credential_received--> Active
//! RefreshPending --refresh_failed--> Active          (silent, logged only)
//! Active|RefreshPending --invalidate (401)--> Expired --> SignedOut
//! any signed-in state --sign_out--> SignedOut
//! ```
//!
//! All transitions happen on the caller's task; the only background work is
//! the refresh timer, which does nothing but deliver a
//! [`SessionEvent::RefreshDue`] notification. The embedding layer runs the
//! actual silent re-authorization (the issuance flow itself is out of
//! scope) and reports back via [`SessionManager::credential_received`] or
//! [`SessionManager::refresh_failed`].

use crate::config::DashboardConfig;
use crate::error::{EngineError, Result};
use crate::store::{SavedToken, TokenStore};
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Refresh lead time before expiry (5 minutes), in milliseconds.
const REFRESH_LEAD_MS: i64 = 300_000;

/// Session lifecycle status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionStatus {
    /// No credential held.
    SignedOut,
    /// Interactive authorization in flight.
    Authorizing,
    /// Valid credential held.
    Active,
    /// Silent refresh requested, previous credential still in use.
    RefreshPending,
    /// Credential rejected by the backing store; transient, the manager
    /// completes the cleanup to [`SessionStatus::SignedOut`] synchronously.
    Expired,
}

/// The held credential and its validity window.
#[derive(Debug, Clone)]
pub struct Session {
    /// Opaque access credential.
    pub credential: String,
    /// When this credential was received (or restored).
    pub issued_at: DateTime<Utc>,
    /// Absolute expiry instant.
    pub expires_at: DateTime<Utc>,
}

/// Notifications emitted by the refresh timer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEvent {
    /// The credential is approaching expiry; run a silent refresh.
    RefreshDue,
}

/// Owns the session and its refresh timer.
pub struct SessionManager {
    store: Arc<dyn TokenStore>,
    session: Option<Session>,
    status: SessionStatus,
    refresh_cancel: Option<CancellationToken>,
    event_tx: mpsc::UnboundedSender<SessionEvent>,
}

impl SessionManager {
    /// Create a manager over the given token store.
    ///
    /// Returns the manager plus the receiver for refresh-due notifications.
    pub fn new(store: Arc<dyn TokenStore>) -> (Self, mpsc::UnboundedReceiver<SessionEvent>) {
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        (
            Self {
                store,
                session: None,
                status: SessionStatus::SignedOut,
                refresh_cancel: None,
                event_tx,
            },
            event_rx,
        )
    }

    /// Current lifecycle status.
    #[must_use]
    pub fn status(&self) -> SessionStatus {
        self.status
    }

    /// Whether the engine should treat the session as signed in.
    #[must_use]
    pub fn is_signed_in(&self) -> bool {
        matches!(
            self.status,
            SessionStatus::Active | SessionStatus::RefreshPending
        )
    }

    /// The current credential, when signed in.
    #[must_use]
    pub fn credential(&self) -> Option<&str> {
        if self.is_signed_in() {
            self.session.as_ref().map(|s| s.credential.as_str())
        } else {
            None
        }
    }

    /// Read-only view of the held session.
    #[must_use]
    pub fn session(&self) -> Option<&Session> {
        self.session.as_ref()
    }

    /// Restore a persisted session on process start.
    ///
    /// A saved credential whose expiry is still in the future goes straight
    /// to `Active` without a new authorization round-trip, with the refresh
    /// timer scheduled against the remaining lifetime. A stale record is
    /// cleared and the manager stays `SignedOut`.
    ///
    /// Returns `true` when a session was restored.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Storage`] when the store itself fails;
    /// missing or unparseable records are not errors.
    pub fn restore(&mut self) -> Result<bool> {
        let Some(saved) = self.store.load()? else {
            debug!("no saved session");
            return Ok(false);
        };

        let now = Utc::now();
        let now_ms = now.timestamp_millis();
        if saved.expires_at_ms <= now_ms {
            info!("saved credential has expired, clearing");
            if let Err(e) = self.store.clear() {
                warn!("cannot clear stale session record: {e}");
            }
            return Ok(false);
        }

        let remaining_ms = saved.expires_at_ms - now_ms;
        let expires_at = now + chrono::Duration::milliseconds(remaining_ms);
        self.session = Some(Session {
            credential: saved.access_token,
            issued_at: now,
            expires_at,
        });
        self.status = SessionStatus::Active;
        self.schedule_refresh(refresh_delay_ms(remaining_ms));
        info!("restored saved session, {remaining_ms}ms of lifetime left");
        Ok(true)
    }

    /// Begin an interactive sign-in: `SignedOut -> Authorizing`.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Auth`] when the client configuration is
    /// incomplete; the status stays `SignedOut`.
    pub fn begin_sign_in(&mut self, config: &DashboardConfig) -> Result<()> {
        if config.client_id.trim().is_empty() {
            return Err(EngineError::Auth("client ID is not configured".to_owned()));
        }
        if config.spreadsheet_id.trim().is_empty() {
            return Err(EngineError::Auth(
                "spreadsheet ID is not configured".to_owned(),
            ));
        }
        self.status = SessionStatus::Authorizing;
        debug!("authorization started");
        Ok(())
    }

    /// Accept a freshly issued credential: `Authorizing|RefreshPending ->
    /// Active`.
    ///
    /// Persists the credential with its absolute expiry and re-arms the
    /// refresh timer at `max(expires_in - 5min, expires_in / 2)`.
    ///
    /// There is deliberately no state guard: a credential delivered after
    /// sign-out starts a fresh session. The embedding layer owns the
    /// issuance flow and decides whether a late callback still gets
    /// delivered; a credential is a positive fact about a completed
    /// authorization, unlike a stale timer notification (which
    /// [`Self::refresh_due`] does ignore).
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Storage`] when persisting fails; the
    /// in-memory session still activates so the current run keeps working.
    pub fn credential_received(&mut self, credential: &str, expires_in_secs: u64) -> Result<()> {
        let now = Utc::now();
        let expires_in_ms = (expires_in_secs as i64) * 1000;
        let expires_at = now + chrono::Duration::milliseconds(expires_in_ms);

        let persist_result = self.store.save(&SavedToken {
            access_token: credential.to_owned(),
            expires_at_ms: expires_at.timestamp_millis(),
        });

        self.session = Some(Session {
            credential: credential.to_owned(),
            issued_at: now,
            expires_at,
        });
        self.status = SessionStatus::Active;
        self.schedule_refresh(refresh_delay_ms(expires_in_ms));
        info!("credential received, expires in {expires_in_secs}s");

        persist_result
    }

    /// Record a failed interactive authorization: `Authorizing -> SignedOut`.
    ///
    /// Returns the user-facing error for the caller to surface.
    pub fn auth_failed(&mut self, reason: &str) -> EngineError {
        self.status = SessionStatus::SignedOut;
        warn!("authorization failed: {reason}");
        EngineError::Auth(reason.to_owned())
    }

    /// Handle a refresh-due notification: `Active -> RefreshPending`.
    ///
    /// No-op in any other state (a stale notification after sign-out or
    /// invalidation must not resurrect the session).
    pub fn refresh_due(&mut self) {
        if self.status == SessionStatus::Active {
            self.status = SessionStatus::RefreshPending;
            debug!("credential approaching expiry, silent refresh pending");
        }
    }

    /// Record a failed silent refresh: `RefreshPending -> Active`.
    ///
    /// Deliberately silent: logged only, never surfaced to the user. The
    /// session proceeds toward natural expiry, which the backing store will
    /// eventually report as unauthorized.
    pub fn refresh_failed(&mut self) {
        if self.status == SessionStatus::RefreshPending {
            self.status = SessionStatus::Active;
            warn!("silent credential refresh failed, continuing until natural expiry");
        }
    }

    /// Force invalidation after the backing store reported unauthorized.
    ///
    /// Passes through `Expired` and synchronously completes the cleanup to
    /// `SignedOut`: persisted and in-memory credentials are cleared and any
    /// pending refresh timer is cancelled. The caller is responsible for
    /// clearing loaded items and deactivating rotation.
    pub fn invalidate(&mut self) {
        self.status = SessionStatus::Expired;
        info!("credential rejected by backing store, session expired");
        self.clear_to_signed_out();
    }

    /// Explicit sign-out from any state. Same cleanup as invalidation.
    pub fn sign_out(&mut self) {
        info!("signing out");
        self.clear_to_signed_out();
    }

    fn clear_to_signed_out(&mut self) {
        self.cancel_refresh();
        self.session = None;
        if let Err(e) = self.store.clear() {
            warn!("cannot clear persisted session record: {e}");
        }
        self.status = SessionStatus::SignedOut;
    }

    /// Arm the refresh timer, cancelling any previously pending one first
    /// so at most one is ever outstanding.
    fn schedule_refresh(&mut self, delay_ms: i64) {
        self.cancel_refresh();

        let delay = Duration::from_millis(delay_ms.max(0) as u64);
        let cancel = CancellationToken::new();
        let task_cancel = cancel.clone();
        let event_tx = self.event_tx.clone();

        tokio::spawn(async move {
            tokio::select! {
                () = task_cancel.cancelled() => {}
                () = tokio::time::sleep(delay) => {
                    let _ = event_tx.send(SessionEvent::RefreshDue);
                }
            }
        });

        debug!("refresh timer armed for {delay_ms}ms");
        self.refresh_cancel = Some(cancel);
    }

    fn cancel_refresh(&mut self) {
        if let Some(cancel) = self.refresh_cancel.take() {
            cancel.cancel();
        }
    }
}

impl Drop for SessionManager {
    fn drop(&mut self) {
        self.cancel_refresh();
    }
}

/// Delay before the silent refresh fires: five minutes before expiry, or
/// halfway through the lifetime when that is sooner.
fn refresh_delay_ms(lifetime_ms: i64) -> i64 {
    (lifetime_ms - REFRESH_LEAD_MS).max(lifetime_ms / 2)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryTokenStore;

    fn configured() -> DashboardConfig {
        DashboardConfig {
            client_id: "client-1".to_owned(),
            spreadsheet_id: "sheet-1".to_owned(),
            ..DashboardConfig::default()
        }
    }

    fn store_with_expiry_in_ms(offset_ms: i64) -> Arc<MemoryTokenStore> {
        let store = Arc::new(MemoryTokenStore::new());
        store
            .save(&SavedToken {
                access_token: "saved-token".to_owned(),
                expires_at_ms: Utc::now().timestamp_millis() + offset_ms,
            })
            .unwrap();
        store
    }

    #[test]
    fn refresh_delay_prefers_five_minute_lead() {
        // 1 hour lifetime: 55 minutes out.
        assert_eq!(refresh_delay_ms(3_600_000), 3_300_000);
        // 8 minute lifetime: lead would leave 3 minutes, halfway (4min) wins.
        assert_eq!(refresh_delay_ms(480_000), 240_000);
        // Exactly 10 minutes: both formulas agree.
        assert_eq!(refresh_delay_ms(600_000), 300_000);
    }

    #[tokio::test]
    async fn restore_with_future_expiry_goes_straight_to_active() {
        let store = store_with_expiry_in_ms(3_600_000);
        let (mut manager, _rx) = SessionManager::new(store.clone());

        assert!(manager.restore().unwrap());
        assert_eq!(manager.status(), SessionStatus::Active);
        assert_eq!(manager.credential(), Some("saved-token"));
        // The persisted record survives a restore.
        assert!(store.load().unwrap().is_some());
    }

    #[tokio::test]
    async fn restore_with_past_expiry_clears_and_stays_signed_out() {
        let store = store_with_expiry_in_ms(-1_000);
        let (mut manager, _rx) = SessionManager::new(store.clone());

        assert!(!manager.restore().unwrap());
        assert_eq!(manager.status(), SessionStatus::SignedOut);
        assert_eq!(manager.credential(), None);
        assert!(store.load().unwrap().is_none());
    }

    #[tokio::test]
    async fn restore_without_saved_record_is_a_no_op() {
        let (mut manager, _rx) = SessionManager::new(Arc::new(MemoryTokenStore::new()));
        assert!(!manager.restore().unwrap());
        assert_eq!(manager.status(), SessionStatus::SignedOut);
    }

    #[tokio::test]
    async fn sign_in_requires_client_configuration() {
        let (mut manager, _rx) = SessionManager::new(Arc::new(MemoryTokenStore::new()));

        let err = manager.begin_sign_in(&DashboardConfig::default()).unwrap_err();
        assert!(matches!(err, EngineError::Auth(_)));
        assert_eq!(manager.status(), SessionStatus::SignedOut);

        manager.begin_sign_in(&configured()).unwrap();
        assert_eq!(manager.status(), SessionStatus::Authorizing);
    }

    #[tokio::test]
    async fn credential_received_persists_and_activates() {
        let store = Arc::new(MemoryTokenStore::new());
        let (mut manager, _rx) = SessionManager::new(store.clone());

        manager.begin_sign_in(&configured()).unwrap();
        manager.credential_received("fresh-token", 3600).unwrap();

        assert_eq!(manager.status(), SessionStatus::Active);
        assert_eq!(manager.credential(), Some("fresh-token"));

        let saved = store.load().unwrap().unwrap();
        assert_eq!(saved.access_token, "fresh-token");
        let remaining = saved.expires_at_ms - Utc::now().timestamp_millis();
        assert!(remaining > 3_590_000 && remaining <= 3_600_000);
    }

    #[tokio::test]
    async fn auth_failure_returns_to_signed_out() {
        let (mut manager, _rx) = SessionManager::new(Arc::new(MemoryTokenStore::new()));
        manager.begin_sign_in(&configured()).unwrap();

        let err = manager.auth_failed("user denied consent");
        assert!(matches!(err, EngineError::Auth(_)));
        assert_eq!(manager.status(), SessionStatus::SignedOut);
    }

    #[tokio::test(start_paused = true)]
    async fn refresh_timer_fires_at_the_computed_lead() {
        let (mut manager, mut rx) = SessionManager::new(Arc::new(MemoryTokenStore::new()));
        manager.begin_sign_in(&configured()).unwrap();
        // 700s lifetime: refresh due at max(400s, 350s) = 400s.
        manager.credential_received("tok", 700).unwrap();

        assert_eq!(rx.recv().await, Some(SessionEvent::RefreshDue));

        manager.refresh_due();
        assert_eq!(manager.status(), SessionStatus::RefreshPending);
        assert!(manager.is_signed_in());
        assert_eq!(manager.credential(), Some("tok"));

        manager.refresh_failed();
        assert_eq!(manager.status(), SessionStatus::Active);
    }

    #[tokio::test(start_paused = true)]
    async fn rescheduling_cancels_the_previous_refresh_timer() {
        let (mut manager, mut rx) = SessionManager::new(Arc::new(MemoryTokenStore::new()));
        manager.begin_sign_in(&configured()).unwrap();
        manager.credential_received("tok-1", 700).unwrap();
        manager.credential_received("tok-2", 700).unwrap();

        // Only the second timer fires.
        assert_eq!(rx.recv().await, Some(SessionEvent::RefreshDue));
        tokio::time::advance(Duration::from_secs(3_600)).await;
        tokio::task::yield_now().await;
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn sign_out_cancels_the_pending_refresh_timer() {
        let store = Arc::new(MemoryTokenStore::new());
        let (mut manager, mut rx) = SessionManager::new(store.clone());
        manager.begin_sign_in(&configured()).unwrap();
        manager.credential_received("tok", 700).unwrap();

        manager.sign_out();
        assert_eq!(manager.status(), SessionStatus::SignedOut);
        assert!(store.load().unwrap().is_none());

        tokio::time::advance(Duration::from_secs(3_600)).await;
        tokio::task::yield_now().await;
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn invalidate_clears_state_from_active_and_refresh_pending() {
        for pending in [false, true] {
            let store = Arc::new(MemoryTokenStore::new());
            let (mut manager, _rx) = SessionManager::new(store.clone());
            manager.begin_sign_in(&configured()).unwrap();
            manager.credential_received("tok", 3600).unwrap();
            if pending {
                manager.refresh_due();
                assert_eq!(manager.status(), SessionStatus::RefreshPending);
            }

            manager.invalidate();
            assert_eq!(manager.status(), SessionStatus::SignedOut);
            assert_eq!(manager.credential(), None);
            assert!(store.load().unwrap().is_none());
        }
    }

    #[tokio::test]
    async fn late_credential_after_sign_out_starts_a_fresh_session() {
        let store = Arc::new(MemoryTokenStore::new());
        let (mut manager, _rx) = SessionManager::new(store.clone());
        manager.begin_sign_in(&configured()).unwrap();
        manager.credential_received("tok-1", 3600).unwrap();
        manager.sign_out();

        // A credential is a completed authorization, so it always signs in.
        manager.credential_received("tok-2", 3600).unwrap();
        assert_eq!(manager.status(), SessionStatus::Active);
        assert_eq!(manager.credential(), Some("tok-2"));
        assert_eq!(store.load().unwrap().unwrap().access_token, "tok-2");
    }

    #[tokio::test]
    async fn stale_refresh_notification_does_not_resurrect_a_session() {
        let (mut manager, _rx) = SessionManager::new(Arc::new(MemoryTokenStore::new()));
        manager.begin_sign_in(&configured()).unwrap();
        manager.credential_received("tok", 3600).unwrap();
        manager.sign_out();

        manager.refresh_due();
        assert_eq!(manager.status(), SessionStatus::SignedOut);
    }
}
