//! Host execution context.
//!
//! Every host-supplied callback (ready listeners, event listeners, request handlers) is
//! marshaled through a [`HostExecutor`] before it runs, so user code observes a single
//! serial context regardless of which thread delivered the renderer query.

use std::panic::{self, AssertUnwindSafe};

use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

pub type HostTask = Box<dyn FnOnce() + Send + 'static>;

pub trait HostExecutor: Send + Sync {
    fn execute(&self, task: HostTask);
}

/// Runs tasks on the calling thread. Useful for tests and hosts that are already serialized.
#[derive(Clone, Copy, Debug, Default)]
pub struct InlineExecutor;

impl HostExecutor for InlineExecutor {
    fn execute(&self, task: HostTask) {
        task();
    }
}

/// A tokio task draining submitted closures one at a time.
///
/// The loop exits once every `HostLoop` clone is dropped.
#[derive(Clone, Debug)]
pub struct HostLoop {
    tx: mpsc::UnboundedSender<HostTask>,
}

impl HostLoop {
    pub fn spawn(handle: &Handle) -> (Self, JoinHandle<()>) {
        let (tx, mut rx) = mpsc::unbounded_channel::<HostTask>();
        let task = handle.spawn(async move {
            while let Some(task) = rx.recv().await {
                if panic::catch_unwind(AssertUnwindSafe(task)).is_err() {
                    warn!(target: "bridge-runtime", "host task panicked; continuing");
                }
            }
            debug!(target: "bridge-runtime", "host loop stopped");
        });
        (Self { tx }, task)
    }
}

impl HostExecutor for HostLoop {
    fn execute(&self, task: HostTask) {
        if self.tx.send(task).is_err() {
            debug!(target: "bridge-runtime", "host loop closed; task dropped");
        }
    }
}
