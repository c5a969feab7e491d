//! The master mailbox: a dedicated thread draining deferred
//! continuations, each run with exclusive access to the state.
//!
//! Async handlers never hold a reference to `Master`. They send
//! closures in and await the result; every continuation after an
//! external await (authorizer, registrar, allocator) re-enters the
//! actor the same way.

use super::Master;
use log::info;
use std::thread;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};

type Thunk = Box<dyn FnOnce(&mut Master) + Send>;

#[derive(Debug, Error, PartialEq, Eq)]
#[error("master actor has terminated")]
pub struct ActorGone;

/// Cloneable handle submitting work to the master actor. The actor
/// thread exits once every handle is dropped and the mailbox drains.
#[derive(Clone)]
pub struct MasterHandle {
    tx: mpsc::UnboundedSender<Thunk>,
}

impl MasterHandle {
    /// Moves `master` onto its own thread and starts the mailbox loop.
    /// Must be called from within a tokio runtime; timers spawned by
    /// actor continuations (heartbeats, log-level reverts) land on it.
    pub fn spawn(mut master: Master) -> MasterHandle {
        let (tx, mut rx) = mpsc::unbounded_channel::<Thunk>();
        let handle = MasterHandle { tx };
        master.handle = Some(handle.clone());
        master.runtime = Some(tokio::runtime::Handle::current());
        let id = master.config.info.id.clone();
        thread::Builder::new()
            .name(format!("master-{id}"))
            .spawn(move || {
                while let Some(thunk) = rx.blocking_recv() {
                    thunk(&mut master);
                }
                info!("event=master_actor_stopped id={id}");
            })
            .expect("failed to spawn master actor thread");
        handle
    }

    /// Runs `f` on the actor thread and resolves with its result.
    pub async fn call<T, F>(&self, f: F) -> Result<T, ActorGone>
    where
        T: Send + 'static,
        F: FnOnce(&mut Master) -> T + Send + 'static,
    {
        let (tx, rx) = oneshot::channel();
        self.tx
            .send(Box::new(move |master| {
                // The caller may have gone away; the work still ran.
                let _ = tx.send(f(master));
            }))
            .map_err(|_| ActorGone)?;
        rx.await.map_err(|_| ActorGone)
    }

    /// Fire-and-forget dispatch onto the end of the mailbox.
    pub fn dispatch<F>(&self, f: F)
    where
        F: FnOnce(&mut Master) + Send + 'static,
    {
        let _ = self.tx.send(Box::new(f));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::master::MasterConfig;
    use crate::testing::{NullAgentTransport, NullAllocator};
    use crate::wire::MasterInfo;
    use std::sync::Arc;

    fn sample_master() -> Master {
        let info = MasterInfo {
            id: "master-1".to_string(),
            hostname: "localhost".to_string(),
            port: 5050,
        };
        Master::new(
            MasterConfig::new(info),
            Arc::new(NullAllocator),
            Arc::new(NullAgentTransport),
        )
    }

    #[tokio::test]
    async fn call_runs_on_actor_and_returns() {
        let handle = MasterHandle::spawn(sample_master());
        let elected = handle.call(|m| m.elected()).await.unwrap();
        assert!(!elected);

        let leader = handle
            .call(|m| {
                let info = m.info().clone();
                m.set_leader(Some(info.clone()));
                info
            })
            .await
            .unwrap();
        assert_eq!("master-1", leader.id);
        assert!(handle.call(|m| m.elected()).await.unwrap());
    }

    #[tokio::test]
    async fn dispatches_run_in_order() {
        let handle = MasterHandle::spawn(sample_master());
        handle.dispatch(|m| m.complete_recovery());
        // A later call observes the earlier dispatch.
        assert!(handle.call(|m| m.recovered()).await.unwrap());
    }
}
