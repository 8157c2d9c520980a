//! Engine façade.
//!
//! [`InventoryEngine`] wires the credential lifecycle, the rotation task
//! and the backing-store gateway into one instantiable object. Nothing here
//! is ambient or global; independent instances share no timers, storage
//! keys or session state, so tests can run several side by side.

use crate::config::DashboardConfig;
use crate::error::{EngineError, Result};
use crate::item::{Item, Location, parse_rows};
use crate::rotation::{self, RotationHandle, RotationState};
use crate::session::{SessionEvent, SessionManager, SessionStatus};
use crate::sheets::{RowUpdate, SheetStore};
use crate::store::TokenStore;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tracing::{info, warn};

/// Suggested cadence for periodic data re-fetches by the embedding layer.
pub const DATA_REFRESH_INTERVAL: Duration = Duration::from_secs(5 * 60);

/// The session and rotation engine behind the dashboard.
pub struct InventoryEngine {
    config: DashboardConfig,
    config_path: Option<PathBuf>,
    session: SessionManager,
    session_events: mpsc::UnboundedReceiver<SessionEvent>,
    items: Vec<Item>,
    rotation: RotationHandle,
    gateway: Arc<dyn SheetStore>,
}

impl InventoryEngine {
    /// Build an engine over the given token store and gateway.
    #[must_use]
    pub fn new(
        config: DashboardConfig,
        token_store: Arc<dyn TokenStore>,
        gateway: Arc<dyn SheetStore>,
    ) -> Self {
        let (session, session_events) = SessionManager::new(token_store);
        let rotation = rotation::spawn(&config);
        Self {
            config,
            config_path: None,
            session,
            session_events,
            items: Vec::new(),
            rotation,
            gateway,
        }
    }

    /// Persist configuration changes to this path on [`Self::apply_config`].
    #[must_use]
    pub fn with_config_path(mut self, path: PathBuf) -> Self {
        self.config_path = Some(path);
        self
    }

    /// Current configuration.
    #[must_use]
    pub fn config(&self) -> &DashboardConfig {
        &self.config
    }

    /// Currently loaded items.
    #[must_use]
    pub fn items(&self) -> &[Item] {
        &self.items
    }

    /// Current session status.
    #[must_use]
    pub fn session_status(&self) -> SessionStatus {
        self.session.status()
    }

    /// Whether the session is usable (`Active` or `RefreshPending`).
    #[must_use]
    pub fn is_signed_in(&self) -> bool {
        self.session.is_signed_in()
    }

    /// Snapshot of the rotation output.
    #[must_use]
    pub fn rotation_state(&self) -> RotationState {
        self.rotation.state()
    }

    /// Subscribe to rotation output changes.
    #[must_use]
    pub fn subscribe_rotation(&self) -> watch::Receiver<RotationState> {
        self.rotation.subscribe()
    }

    /// Restore a persisted session on startup. Returns `true` when signed
    /// in; the caller should follow up with [`Self::refresh_items`].
    ///
    /// # Errors
    ///
    /// Propagates [`EngineError::Storage`] from the token store.
    pub fn restore_session(&mut self) -> Result<bool> {
        self.session.restore()
    }

    /// Start the interactive sign-in flow.
    ///
    /// # Errors
    ///
    /// [`EngineError::Auth`] when the client configuration is incomplete.
    pub fn begin_sign_in(&mut self) -> Result<()> {
        self.session.begin_sign_in(&self.config)
    }

    /// Deliver the credential produced by the issuance flow.
    ///
    /// # Errors
    ///
    /// Propagates [`EngineError::Storage`] when the credential cannot be
    /// persisted; the in-memory session still activates.
    pub fn credential_received(&mut self, credential: &str, expires_in_secs: u64) -> Result<()> {
        self.session.credential_received(credential, expires_in_secs)
    }

    /// Record a failed interactive authorization, returning the user-facing
    /// error.
    pub fn auth_failed(&mut self, reason: &str) -> EngineError {
        self.session.auth_failed(reason)
    }

    /// Record a failed silent refresh. Logged, never surfaced.
    pub fn refresh_failed(&mut self) {
        self.session.refresh_failed();
    }

    /// Await the next session event. On `RefreshDue` the session moves to
    /// `RefreshPending`; the caller runs the silent re-authorization and
    /// reports back via [`Self::credential_received`] or
    /// [`Self::refresh_failed`].
    pub async fn next_session_event(&mut self) -> Option<SessionEvent> {
        let event = self.session_events.recv().await?;
        match event {
            SessionEvent::RefreshDue => self.session.refresh_due(),
        }
        Some(event)
    }

    /// Explicit sign-out: clears session, items and rotation output.
    pub fn sign_out(&mut self) {
        self.session.sign_out();
        self.items.clear();
        self.rotation.deactivate();
    }

    /// Fetch and parse the item collection, then hand it to the rotation
    /// task (which runs the initial selection immediately).
    ///
    /// Returns the number of loaded items.
    ///
    /// # Errors
    ///
    /// - [`EngineError::SessionExpired`] when the store rejects the
    ///   credential; the session is invalidated and items are cleared.
    /// - [`EngineError::Network`] / [`EngineError::DataFormat`] are
    ///   recoverable and leave session and items untouched.
    pub async fn refresh_items(&mut self) -> Result<usize> {
        let credential = self.require_credential()?;

        let rows = match self.gateway.fetch_rows(&credential).await {
            Ok(rows) => rows,
            Err(EngineError::SessionExpired) => {
                self.force_sign_out();
                return Err(EngineError::SessionExpired);
            }
            Err(e) => return Err(e),
        };

        let items = parse_rows(&rows)?;
        info!("loaded {} items", items.len());
        self.items = items;
        self.rotation.items_changed(self.items.clone());
        Ok(self.items.len())
    }

    /// Adjust one quantity by a signed delta (clamped at zero) and write
    /// the row back.
    ///
    /// The local mutation is applied optimistically before the write and is
    /// deliberately NOT rolled back when the write fails; the caller gets
    /// [`EngineError::Write`] and the user retries. Whether a failed write
    /// should revert the local quantity is an open product question; the
    /// observed dashboard behavior is preserved here.
    ///
    /// # Errors
    ///
    /// - [`EngineError::SessionExpired`] invalidates the session.
    /// - [`EngineError::Write`] for any other write failure.
    pub async fn adjust_quantity(
        &mut self,
        row_index: usize,
        location: Location,
        delta: i32,
    ) -> Result<()> {
        let credential = self.require_credential()?;
        let today = chrono::Local::now().date_naive();

        let item = self
            .items
            .iter_mut()
            .find(|item| item.row_index == row_index)
            .ok_or_else(|| EngineError::Write(format!("no item at row {row_index}")))?;

        item.apply_delta(location, delta, today);
        let update = RowUpdate {
            quantity_storage: item.quantity_storage,
            quantity_kitchen: item.quantity_kitchen,
            expiry_date: item.expiry_date,
            last_update: today,
        };
        // Patch, don't re-select: the item being adjusted stays on display.
        self.rotation.item_updated(item.clone());

        match self.gateway.write_range(&credential, row_index, &update).await {
            Ok(()) => Ok(()),
            Err(EngineError::SessionExpired) => {
                self.force_sign_out();
                Err(EngineError::SessionExpired)
            }
            Err(e) => {
                warn!("quantity write for row {row_index} failed: {e}");
                Err(e)
            }
        }
    }

    /// Apply and persist new settings, forwarding rotation parameters to
    /// the running task. The caller re-fetches items when the backing sheet
    /// changed.
    ///
    /// # Errors
    ///
    /// Propagates filesystem errors from saving the config file.
    pub fn apply_config(&mut self, new_config: DashboardConfig) -> Result<()> {
        if let Some(path) = &self.config_path {
            new_config.save_to(path)?;
        }
        self.rotation
            .set_interval(new_config.rotation_interval_secs);
        self.rotation.set_weights(new_config.weights);
        self.rotation.set_table_rows(new_config.table_rows);
        self.config = new_config;
        Ok(())
    }

    fn require_credential(&self) -> Result<String> {
        self.session
            .credential()
            .map(str::to_owned)
            .ok_or_else(|| EngineError::Auth("not signed in".to_owned()))
    }

    /// Forced invalidation: session cleanup plus item/rotation teardown.
    fn force_sign_out(&mut self) {
        self.session.invalidate();
        self.items.clear();
        self.rotation.deactivate();
    }
}
