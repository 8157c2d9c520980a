//! Rotation scheduling.
//!
//! A spawned task owns the [`RotationState`] and coordinates two periodic
//! actions while active: the rotation tick (re-selects the displayed items,
//! resets progress) and the 100ms progress tick (best-effort elapsed
//! fraction of the rotation interval). Activation requires a signed-in
//! session and a non-empty item collection; the engine enforces the session
//! half by only sending items while signed in.
//!
//! Cancellation is structural: the intervals exist only while active, so
//! deactivation drops them both at once, and closing the command channel
//! (dropping the [`RotationHandle`]) terminates the task. No timer outlives
//! the component.

use crate::config::{
    DashboardConfig, MAX_ROTATION_INTERVAL_SECS, MIN_ROTATION_INTERVAL_SECS, SelectionWeights,
};
use crate::item::Item;
use crate::selector;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::time::{Instant, Interval, MissedTickBehavior};
use tracing::{debug, info, warn};

/// Progress tick period.
const PROGRESS_TICK: Duration = Duration::from_millis(100);

/// Published rotation output.
#[derive(Debug, Clone, Default)]
pub struct RotationState {
    /// Item currently on display.
    pub current_item: Option<Item>,
    /// Sampled table rows: independent weighted draws with replacement,
    /// `min(configured table rows, collection size)` of them.
    pub sampled_items: Vec<Item>,
    /// Elapsed share of the rotation interval, in `[0, 100)`. Approximate.
    pub progress: f64,
    /// Selections run since the task started. Diagnostic counter.
    pub rotation_count: u64,
}

/// Commands accepted by the rotation task.
#[derive(Debug)]
enum RotationCommand {
    ItemsChanged(Vec<Item>),
    ItemUpdated(Item),
    SetInterval(u64),
    SetWeights(SelectionWeights),
    SetTableRows(usize),
    Deactivate,
}

/// Handle to a running rotation task.
///
/// Dropping the handle closes the command channel and terminates the task.
pub struct RotationHandle {
    cmd_tx: mpsc::UnboundedSender<RotationCommand>,
    state_rx: watch::Receiver<RotationState>,
}

impl RotationHandle {
    /// Replace the item collection. Non-empty items activate the timers and
    /// run the initial selection immediately; an empty collection
    /// deactivates exactly like [`RotationHandle::deactivate`].
    pub fn items_changed(&self, items: Vec<Item>) {
        let _ = self.cmd_tx.send(RotationCommand::ItemsChanged(items));
    }

    /// Patch one item in place after a quantity write. The matching copies
    /// in the collection, the current item and the sampled table are
    /// updated by row; no re-selection runs, timers and progress are
    /// untouched, so the display stays on whatever the user is adjusting.
    pub fn item_updated(&self, item: Item) {
        let _ = self.cmd_tx.send(RotationCommand::ItemUpdated(item));
    }

    /// Change the rotation interval (seconds, clamped to [5, 300]). Both
    /// timers restart with the new period and recomputed progress
    /// increment; the next rotation fires one full new period out.
    pub fn set_interval(&self, secs: u64) {
        let _ = self.cmd_tx.send(RotationCommand::SetInterval(secs));
    }

    /// Replace the selection weights, effective from the next selection.
    pub fn set_weights(&self, weights: SelectionWeights) {
        let _ = self.cmd_tx.send(RotationCommand::SetWeights(weights));
    }

    /// Change the sampled-table row count, effective from the next selection.
    pub fn set_table_rows(&self, rows: usize) {
        let _ = self.cmd_tx.send(RotationCommand::SetTableRows(rows));
    }

    /// Cancel both timers and clear the published state.
    pub fn deactivate(&self) {
        let _ = self.cmd_tx.send(RotationCommand::Deactivate);
    }

    /// Snapshot of the current rotation state.
    #[must_use]
    pub fn state(&self) -> RotationState {
        self.state_rx.borrow().clone()
    }

    /// Subscribe to rotation state changes.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<RotationState> {
        self.state_rx.clone()
    }
}

/// Spawns the rotation task configured from the dashboard settings.
#[must_use]
pub fn spawn(config: &DashboardConfig) -> RotationHandle {
    let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
    let (state_tx, state_rx) = watch::channel(RotationState::default());

    let task = RotationTask {
        items: Vec::new(),
        weights: config.weights,
        interval_secs: clamp_interval(config.rotation_interval_secs),
        table_rows: config.table_rows,
        state: RotationState::default(),
        state_tx,
    };
    tokio::spawn(task.run(cmd_rx));

    RotationHandle { cmd_tx, state_rx }
}

struct RotationTask {
    items: Vec<Item>,
    weights: SelectionWeights,
    interval_secs: u64,
    table_rows: usize,
    state: RotationState,
    state_tx: watch::Sender<RotationState>,
}

impl RotationTask {
    async fn run(mut self, mut cmd_rx: mpsc::UnboundedReceiver<RotationCommand>) {
        // Both intervals exist only while the active precondition holds.
        let mut rotation: Option<Interval> = None;
        let mut progress: Option<Interval> = None;

        loop {
            tokio::select! {
                cmd = cmd_rx.recv() => {
                    let Some(cmd) = cmd else {
                        debug!("rotation command channel closed, stopping");
                        break;
                    };
                    self.handle_command(cmd, &mut rotation, &mut progress);
                }
                () = tick(rotation.as_mut()) => {
                    self.select_now();
                }
                () = tick(progress.as_mut()) => {
                    self.advance_progress();
                }
            }
        }
    }

    fn handle_command(
        &mut self,
        cmd: RotationCommand,
        rotation: &mut Option<Interval>,
        progress: &mut Option<Interval>,
    ) {
        match cmd {
            RotationCommand::ItemsChanged(items) => {
                if items.is_empty() {
                    debug!("item collection emptied, deactivating rotation");
                    self.deactivate(rotation, progress);
                    return;
                }
                self.items = items;
                self.select_now();
                self.arm_timers(rotation, progress);
            }
            RotationCommand::ItemUpdated(item) => {
                self.patch_item(&item);
            }
            RotationCommand::SetInterval(secs) => {
                let secs = clamp_interval(secs);
                if secs == self.interval_secs {
                    return;
                }
                info!("rotation interval changed to {secs}s");
                self.interval_secs = secs;
                if rotation.is_some() {
                    // Restart both timers with the new period; the next
                    // rotation is one full new period out.
                    self.state.progress = 0.0;
                    self.publish();
                    self.arm_timers(rotation, progress);
                }
            }
            RotationCommand::SetWeights(weights) => {
                self.weights = weights;
            }
            RotationCommand::SetTableRows(rows) => {
                self.table_rows = rows;
            }
            RotationCommand::Deactivate => {
                self.deactivate(rotation, progress);
            }
        }
    }

    fn deactivate(&mut self, rotation: &mut Option<Interval>, progress: &mut Option<Interval>) {
        *rotation = None;
        *progress = None;
        self.items.clear();
        self.state = RotationState {
            rotation_count: self.state.rotation_count,
            ..RotationState::default()
        };
        self.publish();
    }

    /// Replace every copy of a row without re-selecting or touching the
    /// timers. Rows the task does not hold are ignored.
    fn patch_item(&mut self, item: &Item) {
        let Some(existing) = self
            .items
            .iter_mut()
            .find(|i| i.row_index == item.row_index)
        else {
            return;
        };
        *existing = item.clone();

        let mut changed = false;
        if let Some(current) = self.state.current_item.as_mut()
            && current.row_index == item.row_index
        {
            *current = item.clone();
            changed = true;
        }
        for sampled in &mut self.state.sampled_items {
            if sampled.row_index == item.row_index {
                *sampled = item.clone();
                changed = true;
            }
        }
        if changed {
            self.publish();
        }
    }

    /// (Re)create both intervals, first fire one full period from now.
    fn arm_timers(&self, rotation: &mut Option<Interval>, progress: &mut Option<Interval>) {
        let period = Duration::from_secs(self.interval_secs);
        let mut rotation_interval = tokio::time::interval_at(Instant::now() + period, period);
        rotation_interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut progress_interval =
            tokio::time::interval_at(Instant::now() + PROGRESS_TICK, PROGRESS_TICK);
        progress_interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        *rotation = Some(rotation_interval);
        *progress = Some(progress_interval);
    }

    /// Run the current-item selection and the sampled-table draws, and
    /// reset progress. Fired on activation, items change, and every
    /// rotation tick.
    fn select_now(&mut self) {
        if self.items.is_empty() {
            warn!("selection requested with no items loaded");
            return;
        }
        let today = chrono::Local::now().date_naive();
        let mut rng = rand::thread_rng();

        self.state.current_item =
            selector::select(&self.items, &self.weights, today, &mut rng).cloned();
        self.state.sampled_items =
            selector::sample(&self.items, &self.weights, self.table_rows, today, &mut rng);
        self.state.progress = 0.0;
        self.state.rotation_count += 1;
        self.publish();
    }

    fn advance_progress(&mut self) {
        self.state.progress = next_progress(self.state.progress, self.interval_secs);
        self.publish();
    }

    fn publish(&self) {
        let _ = self.state_tx.send(self.state.clone());
    }
}

/// Await the next tick, or never when inactive.
async fn tick(interval: Option<&mut Interval>) {
    match interval {
        Some(interval) => {
            interval.tick().await;
        }
        None => std::future::pending().await,
    }
}

fn clamp_interval(secs: u64) -> u64 {
    secs.clamp(MIN_ROTATION_INTERVAL_SECS, MAX_ROTATION_INTERVAL_SECS)
}

/// One 100ms progress step: add `100 / (interval_secs × 10)` and wrap to 0
/// strictly before reaching 100.
fn next_progress(progress: f64, interval_secs: u64) -> f64 {
    let increment = 100.0 / (interval_secs as f64 * 10.0);
    let next = progress + increment;
    if next >= 100.0 { 0.0 } else { next }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn item(name: &str, row_index: usize) -> Item {
        Item {
            category: "Tins".to_owned(),
            name: name.to_owned(),
            size: None,
            quantity_storage: 1,
            quantity_kitchen: 0,
            expiry_date: NaiveDate::from_ymd_opt(2026, 9, 1),
            last_update: None,
            row_index,
        }
    }

    fn config(interval_secs: u64, table_rows: usize) -> DashboardConfig {
        DashboardConfig {
            rotation_interval_secs: interval_secs,
            table_rows,
            ..DashboardConfig::default()
        }
    }

    /// Let the spawned task drain its queue and timers.
    async fn settle() {
        for _ in 0..20 {
            tokio::task::yield_now().await;
        }
    }

    #[test]
    fn progress_wraps_strictly_before_one_hundred() {
        let mut progress = 0.0;
        for _ in 0..10_000 {
            progress = next_progress(progress, 5);
            assert!((0.0..100.0).contains(&progress));
        }
        // 2.0 per tick at a 5s interval.
        assert!((next_progress(0.0, 5) - 2.0).abs() < 1e-9);
        // A step that would land exactly on 100 wraps to 0.
        assert_eq!(next_progress(98.0, 5), 0.0);
        assert_eq!(next_progress(99.9, 5), 0.0);
    }

    #[tokio::test(start_paused = true)]
    async fn items_change_runs_the_initial_selection_immediately() {
        let handle = spawn(&config(60, 2));
        handle.items_changed(vec![item("a", 2), item("b", 3), item("c", 4)]);
        settle().await;

        let state = handle.state();
        assert!(state.current_item.is_some());
        assert_eq!(state.sampled_items.len(), 2);
        assert_eq!(state.progress, 0.0);
        assert_eq!(state.rotation_count, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn sampled_table_is_capped_by_collection_size() {
        let handle = spawn(&config(60, 10));
        handle.items_changed(vec![item("a", 2), item("b", 3)]);
        settle().await;
        assert_eq!(handle.state().sampled_items.len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn rotation_tick_reselects_and_resets_progress() {
        let handle = spawn(&config(20, 1));
        handle.items_changed(vec![item("a", 2), item("b", 3)]);
        settle().await;

        // Halfway through the interval progress sits near 50. The clock is
        // stepped tick by tick so the progress interval fires every period.
        for _ in 0..100 {
            tokio::time::advance(Duration::from_millis(100)).await;
            tokio::task::yield_now().await;
        }
        settle().await;
        let midway = handle.state();
        assert_eq!(midway.rotation_count, 1);
        assert!((midway.progress - 50.0).abs() < 2.0, "progress was {}", midway.progress);

        // The rotation tick re-selects and resets progress.
        tokio::time::advance(Duration::from_secs(10)).await;
        settle().await;
        let after = handle.state();
        assert_eq!(after.rotation_count, 2);
        assert!(after.progress < 2.0, "progress was {}", after.progress);
    }

    #[tokio::test(start_paused = true)]
    async fn item_update_patches_the_display_without_reselecting() {
        let handle = spawn(&config(20, 2));
        handle.items_changed(vec![item("a", 2), item("b", 3)]);
        settle().await;
        assert_eq!(handle.state().rotation_count, 1);

        // Build up some progress so a reset would be visible.
        for _ in 0..10 {
            tokio::time::advance(Duration::from_millis(100)).await;
            tokio::task::yield_now().await;
        }
        settle().await;
        let before = handle.state();
        assert!(before.progress > 0.0);
        let shown_row = before.current_item.as_ref().unwrap().row_index;

        // Patch whichever row is on display, as a quantity press would.
        let mut updated = if shown_row == 2 { item("a", 2) } else { item("b", 3) };
        updated.quantity_storage = 9;
        handle.item_updated(updated);
        settle().await;

        // Same row stays on display with the new quantity; no selection ran
        // and progress keeps ticking from where it was.
        let after = handle.state();
        assert_eq!(after.rotation_count, 1);
        let current = after.current_item.as_ref().unwrap();
        assert_eq!(current.row_index, shown_row);
        assert_eq!(current.quantity_storage, 9);
        assert_eq!(after.progress, before.progress);
        for sampled in &after.sampled_items {
            if sampled.row_index == shown_row {
                assert_eq!(sampled.quantity_storage, 9);
            }
        }

        // The patched quantity survives the next rotation's draws.
        tokio::time::advance(Duration::from_secs(20)).await;
        settle().await;
        let rotated = handle.state();
        assert_eq!(rotated.rotation_count, 2);
        let current = rotated.current_item.as_ref().unwrap();
        if current.row_index == shown_row {
            assert_eq!(current.quantity_storage, 9);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn progress_never_reaches_one_hundred() {
        let handle = spawn(&config(5, 1));
        handle.items_changed(vec![item("a", 2)]);
        settle().await;

        for _ in 0..120 {
            tokio::time::advance(Duration::from_millis(100)).await;
            settle().await;
            let progress = handle.state().progress;
            assert!((0.0..100.0).contains(&progress), "progress was {progress}");
        }
    }

    #[tokio::test(start_paused = true)]
    async fn deactivation_cancels_both_timers() {
        let handle = spawn(&config(5, 1));
        handle.items_changed(vec![item("a", 2)]);
        settle().await;
        assert_eq!(handle.state().rotation_count, 1);

        handle.deactivate();
        settle().await;
        let cleared = handle.state();
        assert!(cleared.current_item.is_none());
        assert!(cleared.sampled_items.is_empty());
        assert_eq!(cleared.progress, 0.0);

        // No further selection or progress mutation after deactivation.
        tokio::time::advance(Duration::from_secs(3_600)).await;
        settle().await;
        let later = handle.state();
        assert_eq!(later.rotation_count, 1);
        assert_eq!(later.progress, 0.0);
    }

    #[tokio::test(start_paused = true)]
    async fn empty_collection_deactivates_like_sign_out() {
        let handle = spawn(&config(5, 1));
        handle.items_changed(vec![item("a", 2)]);
        settle().await;

        handle.items_changed(Vec::new());
        settle().await;
        assert!(handle.state().current_item.is_none());

        tokio::time::advance(Duration::from_secs(60)).await;
        settle().await;
        assert_eq!(handle.state().rotation_count, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn interval_change_restarts_without_a_spurious_rotation() {
        let handle = spawn(&config(60, 1));
        handle.items_changed(vec![item("a", 2), item("b", 3)]);
        settle().await;
        assert_eq!(handle.state().rotation_count, 1);

        tokio::time::advance(Duration::from_secs(30)).await;
        settle().await;

        handle.set_interval(10);
        settle().await;
        // No rotation at the moment of the change, and progress restarts.
        let at_change = handle.state();
        assert_eq!(at_change.rotation_count, 1);
        assert!(at_change.progress < 2.0);

        // The next rotation fires one full new period out.
        tokio::time::advance(Duration::from_secs(9)).await;
        settle().await;
        assert_eq!(handle.state().rotation_count, 1);
        tokio::time::advance(Duration::from_secs(1)).await;
        settle().await;
        assert_eq!(handle.state().rotation_count, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn interval_is_clamped_to_supported_range() {
        let handle = spawn(&config(60, 1));
        handle.items_changed(vec![item("a", 2)]);
        settle().await;

        // 1s clamps to 5s: after 4s no rotation, after 5s one.
        handle.set_interval(1);
        settle().await;
        tokio::time::advance(Duration::from_secs(4)).await;
        settle().await;
        assert_eq!(handle.state().rotation_count, 1);
        tokio::time::advance(Duration::from_secs(1)).await;
        settle().await;
        assert_eq!(handle.state().rotation_count, 2);
    }
}
