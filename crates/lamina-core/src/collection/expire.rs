//! Background expiration of rows with a TTL deadline.

use std::sync::{Arc, Weak};
use std::thread::JoinHandle;
use std::time::Duration;

use crossbeam_channel::{bounded, select, tick, Sender};
use tracing::debug;

use super::{now_nanos, Collection, Core, EXPIRE_COLUMN};

/// Handle to the background sweep thread.
///
/// The thread holds only a weak reference to the collection core, so a
/// dropped collection shuts its sweeper down instead of leaking a cycle.
pub(crate) struct Sweeper {
    shutdown: Sender<()>,
    handle: Option<JoinHandle<()>>,
}

impl Sweeper {
    pub(crate) fn start(core: Weak<Core>, interval: Duration) -> Self {
        let (shutdown, shutdown_rx) = bounded::<()>(0);
        let ticker = tick(interval);
        let handle = std::thread::Builder::new()
            .name("lamina-expire".into())
            .spawn(move || loop {
                select! {
                    recv(ticker) -> _ => {
                        let Some(core) = core.upgrade() else { break };
                        sweep(&core);
                    }
                    recv(shutdown_rx) -> _ => break,
                }
            })
            .expect("spawn expiration thread");
        Self {
            shutdown,
            handle: Some(handle),
        }
    }

    /// Stops scheduling new sweeps; the in-flight sweep finishes first.
    pub(crate) fn stop(mut self) {
        drop(self.shutdown);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

/// One cooperative sweep: delete every row whose deadline has passed.
///
/// Runs as an ordinary transaction, so it holds at most one chunk lock at
/// a time and its deletions reach the commit log like any other delete.
fn sweep(core: &Arc<Core>) {
    let collection = Collection {
        core: Arc::clone(core),
    };
    let now = now_nanos();
    let mut expired = 0usize;
    let result = collection.query(|txn| {
        txn.with_i64(EXPIRE_COLUMN, |deadline| deadline != 0 && deadline <= now);
        txn.range(|row| {
            row.delete();
            expired += 1;
            Ok(())
        })
    });
    match result {
        Ok(()) if expired > 0 => debug!(expired, "expiration sweep"),
        Ok(()) => {}
        Err(e) => debug!(error = %e, "expiration sweep failed"),
    }
}
