//! Live routing tables and rebuild scheduling.
//!
//! [`RoutingTables`] owns the installed field for every [`FieldLabel`] and
//! decides when to recompute them. Rebuilds are requested by the admission
//! state machine through [`RoutingTables::mark_dirty`] and rate-limited in
//! simulated time.
//!
//! # Inline and worker modes
//!
//! Inline rebuilds compute on the tick thread and install immediately.
//! Worker rebuilds ship an owned snapshot to the [`RouterWorker`] thread and
//! keep using the previous tables until the result is installed. A worker
//! result is installed at exactly `request_tick + apply_after_ticks`; if it
//! has not arrived by then the tick loop blocks for it. Installation time is
//! therefore a pure function of the tick counter and runs stay reproducible.
//!
//! Every request carries an epoch. A response whose epoch is older than the
//! latest epoch requested for its label is discarded.

use std::collections::BTreeMap;

use corridor_types::FieldLabel;
use corridor_world::{
    FieldRequest, FieldResult, Grid, RouterOutcome, RouterParams, RouterRequest, RouterResponse,
    RouterWorker, WorldError, compute_field, handle_request,
};
use tracing::{debug, info};

use crate::config::{RouterMode, RoutingConfig};
use crate::lots::LotRegistry;

/// Errors from the routing layer.
#[derive(Debug, thiserror::Error)]
pub enum RoutingError {
    /// Field computation or worker communication failed.
    #[error("router error: {source}")]
    World {
        /// The underlying world error.
        #[from]
        source: WorldError,
    },

    /// The worker reported a failed computation.
    #[error("router failed to compute {label:?} field: {message}")]
    Failed {
        /// Field that failed.
        label: FieldLabel,
        /// Rendered error from the worker.
        message: String,
    },
}

/// A worker request that has not been installed yet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Pending {
    id: u64,
    epoch: u64,
    apply_at_tick: u64,
}

/// Installed fields plus rebuild bookkeeping.
#[derive(Debug)]
pub struct RoutingTables {
    lots: FieldResult,
    checkpoint: FieldResult,
    checkpoint_closed: FieldResult,
    params: RouterParams,
    mode: RouterMode,
    apply_after_ticks: u64,
    min_interval_s: f64,
    worker: Option<RouterWorker>,
    next_id: u64,
    latest_epoch: BTreeMap<FieldLabel, u64>,
    installed_epoch: BTreeMap<FieldLabel, u64>,
    pending: BTreeMap<FieldLabel, Pending>,
    inbox: Vec<RouterResponse>,
    dirty: bool,
    last_rebuild_s: f64,
    rebuilds: u64,
    stale_discarded: u64,
}

/// Build the field request for `label` from the live lot state.
pub fn field_request(
    grid: &Grid,
    lots: &LotRegistry,
    label: FieldLabel,
    params: RouterParams,
) -> FieldRequest {
    FieldRequest {
        label,
        sinks: FieldRequest::default_sinks(grid, label),
        lot_utilization: lots.utilization(),
        lot_admitting: lots.admitting(),
        params,
    }
}

impl RoutingTables {
    /// Compute every field inline and, in worker mode, start the worker.
    ///
    /// # Errors
    ///
    /// Returns [`RoutingError`] if a field cannot be computed or the worker
    /// thread cannot be started.
    pub fn new(grid: &Grid, lots: &LotRegistry, config: &RoutingConfig) -> Result<Self, RoutingError> {
        let params = config.router_params();
        let build = |label| compute_field(grid, &field_request(grid, lots, label, params));
        let tables = Self {
            lots: build(FieldLabel::Lots)?,
            checkpoint: build(FieldLabel::Checkpoint)?,
            checkpoint_closed: build(FieldLabel::CheckpointClosed)?,
            params,
            mode: config.mode,
            apply_after_ticks: config.apply_after_ticks,
            min_interval_s: config.rebuild_min_interval_s,
            worker: match config.mode {
                RouterMode::Inline => None,
                RouterMode::Worker => Some(RouterWorker::spawn()?),
            },
            next_id: 0,
            latest_epoch: BTreeMap::new(),
            installed_epoch: BTreeMap::new(),
            pending: BTreeMap::new(),
            inbox: Vec::new(),
            dirty: false,
            last_rebuild_s: 0.0,
            rebuilds: 0,
            stale_discarded: 0,
        };
        info!(
            mode = ?tables.mode,
            lots_reachable = tables.lots.reachable_count,
            checkpoint_reachable = tables.checkpoint.reachable_count,
            "Routing tables built"
        );
        Ok(tables)
    }

    /// The installed field for `label`.
    pub const fn field(&self, label: FieldLabel) -> &FieldResult {
        match label {
            FieldLabel::Lots => &self.lots,
            FieldLabel::Checkpoint => &self.checkpoint,
            FieldLabel::CheckpointClosed => &self.checkpoint_closed,
        }
    }

    /// Flag that lot state changed and the lots field should be rebuilt.
    pub const fn mark_dirty(&mut self) {
        self.dirty = true;
    }

    /// Whether a rebuild is wanted but not yet requested.
    pub const fn is_dirty(&self) -> bool {
        self.dirty
    }

    /// Whether a worker rebuild has been requested and not yet installed.
    pub fn in_flight(&self) -> bool {
        !self.pending.is_empty()
    }

    /// Rebuilds installed since construction.
    pub const fn rebuilds(&self) -> u64 {
        self.rebuilds
    }

    /// Worker responses dropped because a newer epoch had been requested.
    pub const fn stale_discarded(&self) -> u64 {
        self.stale_discarded
    }

    /// Epoch of the installed field for `label` (0 for the initial build).
    pub fn installed_epoch(&self, label: FieldLabel) -> u64 {
        self.installed_epoch.get(&label).copied().unwrap_or(0)
    }

    /// Request the dirty rebuild if the rate limit allows it.
    ///
    /// Returns whether a request was issued.
    ///
    /// # Errors
    ///
    /// Returns [`RoutingError`] if an inline rebuild fails or the worker is
    /// gone.
    pub fn maybe_rebuild(
        &mut self,
        now_s: f64,
        tick: u64,
        grid: &Grid,
        lots: &LotRegistry,
    ) -> Result<bool, RoutingError> {
        if !self.dirty || self.in_flight() || now_s - self.last_rebuild_s < self.min_interval_s {
            return Ok(false);
        }
        self.dirty = false;
        self.last_rebuild_s = now_s;
        self.request(FieldLabel::Lots, tick, grid, lots)?;
        Ok(true)
    }

    /// Issue a rebuild of `label` regardless of dirtiness and rate limits.
    /// Returns the request's epoch.
    ///
    /// # Errors
    ///
    /// Returns [`RoutingError`] if an inline rebuild fails or the worker is
    /// gone.
    pub fn request(
        &mut self,
        label: FieldLabel,
        tick: u64,
        grid: &Grid,
        lots: &LotRegistry,
    ) -> Result<u64, RoutingError> {
        let epoch = self.latest_epoch.get(&label).copied().unwrap_or(0) + 1;
        self.latest_epoch.insert(label, epoch);
        let id = self.next_id;
        self.next_id += 1;

        let request = RouterRequest {
            id,
            epoch,
            grid: grid.clone(),
            field: field_request(grid, lots, label, self.params),
        };
        info!(id, epoch, label = ?label, tick, mode = ?self.mode, "Router rebuild requested");

        match &self.worker {
            None => {
                let response = handle_request(&request);
                self.accept(response)?;
            }
            Some(worker) => {
                worker.submit(request)?;
                self.pending.insert(
                    label,
                    Pending {
                        id,
                        epoch,
                        apply_at_tick: tick + self.apply_after_ticks,
                    },
                );
            }
        }
        Ok(epoch)
    }

    /// Install every worker result due at or before `tick`, blocking for
    /// results that have not arrived yet.
    ///
    /// # Errors
    ///
    /// Returns [`RoutingError`] if the worker disconnected or reported a
    /// failure.
    pub fn poll(&mut self, tick: u64) -> Result<(), RoutingError> {
        let due: Vec<(FieldLabel, Pending)> = self
            .pending
            .iter()
            .filter(|(_, p)| p.apply_at_tick <= tick)
            .map(|(label, p)| (*label, *p))
            .collect();

        for (label, pending) in due {
            let response = self.await_response(label, pending)?;
            self.pending.remove(&label);
            self.accept(response)?;
        }
        Ok(())
    }

    fn await_response(
        &mut self,
        label: FieldLabel,
        pending: Pending,
    ) -> Result<RouterResponse, RoutingError> {
        loop {
            if let Some(pos) = self
                .inbox
                .iter()
                .position(|r| r.label == label && r.id == pending.id)
            {
                return Ok(self.inbox.swap_remove(pos));
            }
            let Some(worker) = self.worker.as_mut() else {
                return Err(WorldError::WorkerDisconnected.into());
            };
            let response = worker.recv_blocking()?;
            if self.is_stale(&response) {
                self.discard(&response);
            } else {
                self.inbox.push(response);
            }
        }
    }

    fn is_stale(&self, response: &RouterResponse) -> bool {
        response.epoch < self.latest_epoch.get(&response.label).copied().unwrap_or(0)
    }

    fn discard(&mut self, response: &RouterResponse) {
        self.stale_discarded += 1;
        debug!(
            id = response.id,
            epoch = response.epoch,
            label = ?response.label,
            "Discarding stale router response"
        );
    }

    fn accept(&mut self, response: RouterResponse) -> Result<(), RoutingError> {
        if self.is_stale(&response) {
            self.discard(&response);
            return Ok(());
        }
        let field = match response.outcome {
            RouterOutcome::Computed(field) => field,
            RouterOutcome::Failed { message } => {
                return Err(RoutingError::Failed {
                    label: response.label,
                    message,
                });
            }
        };
        info!(
            epoch = response.epoch,
            label = ?response.label,
            reachable = field.reachable_count,
            "Router field installed"
        );
        match response.label {
            FieldLabel::Lots => self.lots = field,
            FieldLabel::Checkpoint => self.checkpoint = field,
            FieldLabel::CheckpointClosed => self.checkpoint_closed = field,
        }
        self.installed_epoch.insert(response.label, response.epoch);
        self.rebuilds += 1;
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::lots::Lot;
    use corridor_types::{CellIndex, LotId, Region};
    use corridor_world::{CellSpec, Conductance};

    /// Row 0: lot a, road, road, checkpoint.
    fn setup() -> (Grid, LotRegistry) {
        let mut grid = Grid::new(4).unwrap();
        let row = [
            (Region::Lot, Some(LotId(0))),
            (Region::Road, None),
            (Region::Road, None),
            (Region::Sink, None),
        ];
        for (x, (region, lot)) in row.into_iter().enumerate() {
            grid.set_cell(
                CellIndex(x),
                CellSpec {
                    region,
                    lot,
                    conductance: Conductance::uniform(1.0),
                    ..CellSpec::default()
                },
            )
            .unwrap();
        }
        let lots = LotRegistry::new(
            vec![Lot::new(LotId(0), "a".to_owned(), vec![CellIndex(0)], 2.0)],
            0.9,
            60.0,
        );
        (grid, lots)
    }

    fn config(mode: RouterMode) -> RoutingConfig {
        RoutingConfig {
            mode,
            rebuild_min_interval_s: 100.0,
            apply_after_ticks: 2,
            ..RoutingConfig::default()
        }
    }

    #[test]
    fn initial_fields_are_built() {
        let (grid, lots) = setup();
        let tables = RoutingTables::new(&grid, &lots, &config(RouterMode::Inline)).unwrap();
        assert_eq!(tables.field(FieldLabel::Lots).next_hop(CellIndex(1)), Some(CellIndex(0)));
        assert_eq!(
            tables.field(FieldLabel::Checkpoint).next_hop(CellIndex(2)),
            Some(CellIndex(3))
        );
        assert!(tables.field(FieldLabel::CheckpointClosed).is_destination(CellIndex(2)));
    }

    #[test]
    fn rebuild_is_rate_limited() {
        let (grid, mut lots) = setup();
        let mut tables = RoutingTables::new(&grid, &lots, &config(RouterMode::Inline)).unwrap();
        lots.try_admit(LotId(0), 2.0);
        lots.update(10.0);
        tables.mark_dirty();

        assert!(!tables.maybe_rebuild(50.0, 50, &grid, &lots).unwrap());
        assert!(tables.is_dirty());
        assert!(tables.maybe_rebuild(100.0, 100, &grid, &lots).unwrap());
        assert!(!tables.is_dirty());
        assert_eq!(tables.rebuilds(), 1);
        // Draining lot is no longer a destination.
        assert!(!tables.field(FieldLabel::Lots).is_reachable(CellIndex(1)));
    }

    #[test]
    fn worker_result_applies_at_the_scheduled_tick() {
        let (grid, mut lots) = setup();
        let mut tables = RoutingTables::new(&grid, &lots, &config(RouterMode::Worker)).unwrap();
        lots.try_admit(LotId(0), 2.0);
        lots.update(10.0);
        tables.mark_dirty();
        assert!(tables.maybe_rebuild(100.0, 10, &grid, &lots).unwrap());
        assert!(tables.in_flight());

        tables.poll(11).unwrap();
        assert!(tables.in_flight());
        assert!(tables.field(FieldLabel::Lots).is_reachable(CellIndex(1)));

        tables.poll(12).unwrap();
        assert!(!tables.in_flight());
        assert!(!tables.field(FieldLabel::Lots).is_reachable(CellIndex(1)));
        assert_eq!(tables.installed_epoch(FieldLabel::Lots), 1);
    }

    #[test]
    fn superseded_worker_result_is_discarded() {
        let (grid, mut lots) = setup();
        let mut tables = RoutingTables::new(&grid, &lots, &config(RouterMode::Worker)).unwrap();
        tables.request(FieldLabel::Lots, 1, &grid, &lots).unwrap();
        lots.try_admit(LotId(0), 2.0);
        lots.update(10.0);
        let epoch = tables.request(FieldLabel::Lots, 2, &grid, &lots).unwrap();
        assert_eq!(epoch, 2);

        tables.poll(4).unwrap();
        assert_eq!(tables.stale_discarded(), 1);
        assert_eq!(tables.installed_epoch(FieldLabel::Lots), 2);
        assert_eq!(tables.rebuilds(), 1);
        assert!(!tables.field(FieldLabel::Lots).is_reachable(CellIndex(1)));
    }

    #[test]
    fn inline_request_installs_immediately() {
        let (grid, lots) = setup();
        let mut tables = RoutingTables::new(&grid, &lots, &config(RouterMode::Inline)).unwrap();
        let epoch = tables.request(FieldLabel::Checkpoint, 1, &grid, &lots).unwrap();
        assert_eq!(tables.installed_epoch(FieldLabel::Checkpoint), epoch);
        assert!(!tables.in_flight());
    }
}
