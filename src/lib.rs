//! Larder: session and rotation engine for a spreadsheet-backed home
//! inventory dashboard.
//!
//! The dashboard periodically surfaces items from a backing sheet, biased
//! toward those nearer expiry, and writes quantity adjustments back. This
//! crate is the engine behind that UI:
//!
//! - **Credential lifecycle** ([`session`]): acquires, persists, silently
//!   refreshes and invalidates the access credential.
//! - **Weighted selection** ([`selector`], [`expiry`]): draws items with
//!   probability proportional to per-category weight × population.
//! - **Rotation scheduling** ([`rotation`]): the rotation tick and the
//!   100ms progress tick, active only while signed in with items loaded.
//! - **Backing-store gateway** ([`sheets`]): the narrow read/write contract
//!   plus a Google Sheets values API client.
//!
//! [`engine::InventoryEngine`] wires these together for the presentation
//! layer. There is no CLI surface; rendering, the settings form and the
//! interactive credential issuance flow live in the embedding application.

pub mod config;
pub mod engine;
pub mod error;
pub mod expiry;
pub mod item;
pub mod rotation;
pub mod selector;
pub mod session;
pub mod sheets;
pub mod store;

pub use config::{DashboardConfig, SelectionWeights};
pub use engine::{DATA_REFRESH_INTERVAL, InventoryEngine};
pub use error::{EngineError, Result};
pub use expiry::ExpiryCategory;
pub use item::{Item, Location};
pub use rotation::{RotationHandle, RotationState};
pub use session::{SessionEvent, SessionManager, SessionStatus};
pub use sheets::{RowUpdate, SheetStore, SheetsClient};
pub use store::{FileTokenStore, MemoryTokenStore, SavedToken, TokenStore};
