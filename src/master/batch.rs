//! Batched execution of read-only requests.
//!
//! Readers must observe a consistent snapshot. Queued read handlers are
//! dispatched together to a bounded worker pool while the actor thread
//! blocks on their completion, so no mutation can interleave with a
//! worker's serialization of state. The price is that the actor stalls
//! for the duration of a batch; the worker bound keeps a flood of
//! readers from exhausting the pool.

use super::{ActorGone, Master, MasterHandle};
use crate::auth::ObjectApprovers;
use crate::wire::MasterResponse;
use log::debug;
use std::sync::Arc;
use std::thread;
use tokio::sync::oneshot;

/// Read handlers run by the pool against a borrowed view of the state.
pub type ReadOnlyHandler = fn(&Master, &ObjectApprovers) -> MasterResponse;

/// Scoped worker threads running one batch. Larger batches are
/// processed in waves inside the same actor turn.
pub const MAX_BATCH_WORKERS: usize = 8;

pub(crate) struct BatchedRequest {
    pub(crate) handler: ReadOnlyHandler,
    pub(crate) approvers: Arc<ObjectApprovers>,
    pub(crate) response: oneshot::Sender<MasterResponse>,
}

impl MasterHandle {
    /// Appends a read to the current batch; the first request in an
    /// empty batch schedules one processing continuation behind
    /// whatever is already in the mailbox.
    pub async fn batched_read(
        &self,
        handler: ReadOnlyHandler,
        approvers: Arc<ObjectApprovers>,
    ) -> Result<MasterResponse, ActorGone> {
        let (tx, rx) = oneshot::channel();
        self.call(move |master| {
            let schedule = master.batched_requests.is_empty();
            master.batched_requests.push(BatchedRequest {
                handler,
                approvers,
                response: tx,
            });
            if schedule {
                if let Some(handle) = master.handle.clone() {
                    handle.dispatch(Master::process_request_batch);
                }
            }
        })
        .await?;
        rx.await.map_err(|_| ActorGone)
    }
}

impl Master {
    /// Runs every queued read in parallel against `&self` and blocks
    /// the actor until all of them have produced their response.
    /// Cancelled requesters merely discard the result.
    pub(crate) fn process_request_batch(&mut self) {
        let mut batch = std::mem::take(&mut self.batched_requests);
        if batch.is_empty() {
            return;
        }
        debug!("event=read_batch_processing size={}", batch.len());

        let master: &Master = self;
        while !batch.is_empty() {
            let wave: Vec<BatchedRequest> =
                batch.drain(..batch.len().min(MAX_BATCH_WORKERS)).collect();
            thread::scope(|scope| {
                for request in wave {
                    scope.spawn(move || {
                        let response = (request.handler)(master, &request.approvers);
                        let _ = request.response.send(response);
                    });
                }
            });
        }
    }
}
