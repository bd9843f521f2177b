//! Router worker message protocol.
//!
//! Requests and responses carry owned data only, so they can cross a thread
//! or process boundary without sharing the live grid. Each request is stamped
//! with a routing epoch; the receiver compares the response epoch against the
//! newest epoch it has issued for that label and drops anything older.

use corridor_types::FieldLabel;
use serde::{Deserialize, Serialize};

use crate::field::{FieldRequest, FieldResult, compute_field};
use crate::grid::Grid;

/// A rebuild request for one field.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RouterRequest {
    /// Request id, unique per simulation.
    pub id: u64,
    /// Routing epoch at the time of the request.
    pub epoch: u64,
    /// Snapshot of the grid geometry.
    pub grid: Grid,
    /// Field parameters: label, sinks, lot utilization and admission.
    pub field: FieldRequest,
}

impl RouterRequest {
    /// The field this request rebuilds.
    pub const fn label(&self) -> FieldLabel {
        self.field.label
    }
}

/// Result of processing one request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum RouterOutcome {
    /// The field was computed.
    Computed(FieldResult),
    /// The request was malformed.
    Failed {
        /// Rendered error.
        message: String,
    },
}

/// The reply to a [`RouterRequest`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RouterResponse {
    /// Id of the request this answers.
    pub id: u64,
    /// Epoch copied from the request.
    pub epoch: u64,
    /// Field label copied from the request.
    pub label: FieldLabel,
    /// The computed field or the failure.
    pub outcome: RouterOutcome,
}

/// Compute the response for `request`. Used by the worker thread and by
/// inline rebuilds alike.
pub fn handle_request(request: &RouterRequest) -> RouterResponse {
    let outcome = match compute_field(&request.grid, &request.field) {
        Ok(field) => RouterOutcome::Computed(field),
        Err(e) => RouterOutcome::Failed {
            message: e.to_string(),
        },
    };
    RouterResponse {
        id: request.id,
        epoch: request.epoch,
        label: request.label(),
        outcome,
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::field::RouterParams;
    use crate::grid::{CellSpec, Conductance};
    use corridor_types::{CellIndex, Region};

    fn line_grid() -> Grid {
        let mut grid = Grid::new(2).unwrap();
        for i in 0..4 {
            let region = if i == 0 { Region::Sink } else { Region::Road };
            grid.set_cell(
                CellIndex(i),
                CellSpec {
                    region,
                    conductance: Conductance::uniform(1.0),
                    ..CellSpec::default()
                },
            )
            .unwrap();
        }
        grid
    }

    fn request(label: FieldLabel) -> RouterRequest {
        let grid = line_grid();
        RouterRequest {
            id: 7,
            epoch: 3,
            field: FieldRequest {
                label,
                sinks: FieldRequest::default_sinks(&grid, label),
                lot_utilization: Vec::new(),
                lot_admitting: Vec::new(),
                params: RouterParams::default(),
            },
            grid,
        }
    }

    #[test]
    fn response_echoes_id_epoch_and_label() {
        let response = handle_request(&request(FieldLabel::Checkpoint));
        assert_eq!(response.id, 7);
        assert_eq!(response.epoch, 3);
        assert_eq!(response.label, FieldLabel::Checkpoint);
        assert!(matches!(
            response.outcome,
            RouterOutcome::Computed(ref field) if field.reachable_count == 4
        ));
    }

    #[test]
    fn malformed_request_reports_failure() {
        let mut req = request(FieldLabel::Checkpoint);
        req.field.sinks = vec![CellIndex(99)];
        let response = handle_request(&req);
        assert!(matches!(response.outcome, RouterOutcome::Failed { .. }));
    }

    #[test]
    fn request_survives_serialization() {
        let req = request(FieldLabel::Lots);
        let json = serde_json::to_string(&req).unwrap();
        let back: RouterRequest = serde_json::from_str(&json).unwrap();
        assert_eq!(back.grid, req.grid);
        assert_eq!(back.label(), FieldLabel::Lots);
    }
}
