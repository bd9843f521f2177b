//! Background router worker.
//!
//! Runs [`handle_request`] on a dedicated OS thread so the Dijkstra
//! relaxation never blocks the tick loop. The worker owns nothing shared:
//! every request carries its own grid snapshot, and results flow back over a
//! second channel. Requests are processed strictly in submission order.
//!
//! Dropping the [`RouterWorker`] closes the request channel, which ends the
//! thread's receive loop, and then joins the thread.

use std::thread::JoinHandle;

use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::error::WorldError;
use crate::protocol::{RouterRequest, RouterResponse, handle_request};

/// Handle to the router thread.
#[derive(Debug)]
pub struct RouterWorker {
    requests: Option<mpsc::UnboundedSender<RouterRequest>>,
    responses: mpsc::UnboundedReceiver<RouterResponse>,
    handle: Option<JoinHandle<()>>,
}

impl RouterWorker {
    /// Start the worker thread.
    ///
    /// # Errors
    ///
    /// Returns [`WorldError::WorkerSpawn`] if the OS refuses the thread.
    pub fn spawn() -> Result<Self, WorldError> {
        let (req_tx, mut req_rx) = mpsc::unbounded_channel::<RouterRequest>();
        let (resp_tx, resp_rx) = mpsc::unbounded_channel::<RouterResponse>();

        let handle = std::thread::Builder::new()
            .name("corridor-router".to_owned())
            .spawn(move || {
                while let Some(request) = req_rx.blocking_recv() {
                    debug!(
                        id = request.id,
                        epoch = request.epoch,
                        label = ?request.label(),
                        "Router worker computing field"
                    );
                    let response = handle_request(&request);
                    if resp_tx.send(response).is_err() {
                        break;
                    }
                }
                debug!("Router worker stopped");
            })?;

        Ok(Self {
            requests: Some(req_tx),
            responses: resp_rx,
            handle: Some(handle),
        })
    }

    /// Queue a request.
    ///
    /// # Errors
    ///
    /// Returns [`WorldError::WorkerDisconnected`] if the thread has exited.
    pub fn submit(&self, request: RouterRequest) -> Result<(), WorldError> {
        self.requests
            .as_ref()
            .ok_or(WorldError::WorkerDisconnected)?
            .send(request)
            .map_err(|_send_error| WorldError::WorkerDisconnected)
    }

    /// Block the calling thread until the next response arrives.
    ///
    /// Must not be called from inside an async runtime worker; the tick loop
    /// runs on a plain thread or on tokio's blocking pool.
    ///
    /// # Errors
    ///
    /// Returns [`WorldError::WorkerDisconnected`] if the thread exited with
    /// no response pending.
    pub fn recv_blocking(&mut self) -> Result<RouterResponse, WorldError> {
        self.responses
            .blocking_recv()
            .ok_or(WorldError::WorkerDisconnected)
    }

    /// Close the request channel and join the thread.
    pub fn shutdown(&mut self) {
        self.requests = None;
        if let Some(handle) = self.handle.take()
            && handle.join().is_err()
        {
            warn!("Router worker thread panicked");
        }
    }
}

impl Drop for RouterWorker {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::field::{FieldRequest, RouterParams};
    use crate::grid::{CellSpec, Conductance, Grid};
    use crate::protocol::RouterOutcome;
    use corridor_types::{CellIndex, FieldLabel, Region};

    fn request(id: u64, epoch: u64) -> RouterRequest {
        let mut grid = Grid::new(3).unwrap();
        for cell in grid.indices().collect::<Vec<_>>() {
            let region = if cell == CellIndex(4) {
                Region::Sink
            } else {
                Region::Road
            };
            grid.set_cell(
                cell,
                CellSpec {
                    region,
                    conductance: Conductance::uniform(1.0),
                    ..CellSpec::default()
                },
            )
            .unwrap();
        }
        RouterRequest {
            id,
            epoch,
            field: FieldRequest {
                label: FieldLabel::Checkpoint,
                sinks: vec![CellIndex(4)],
                lot_utilization: Vec::new(),
                lot_admitting: Vec::new(),
                params: RouterParams::default(),
            },
            grid,
        }
    }

    #[test]
    fn worker_answers_in_submission_order() {
        let mut worker = RouterWorker::spawn().unwrap();
        worker.submit(request(1, 1)).unwrap();
        worker.submit(request(2, 2)).unwrap();
        let first = worker.recv_blocking().unwrap();
        let second = worker.recv_blocking().unwrap();
        assert_eq!((first.id, second.id), (1, 2));
        assert!(matches!(
            second.outcome,
            RouterOutcome::Computed(ref field) if field.reachable_count == 9
        ));
    }

    #[test]
    fn submit_after_shutdown_fails() {
        let mut worker = RouterWorker::spawn().unwrap();
        worker.shutdown();
        assert!(matches!(
            worker.submit(request(1, 1)),
            Err(WorldError::WorkerDisconnected)
        ));
    }
}
