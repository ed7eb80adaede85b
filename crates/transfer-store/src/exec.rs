//! Store operation executor logic.
//!
//! Manages the indirection to run blocking store calls on a thread pool and hand the result
//! back to async code.

use threadpool::ThreadPool;
use tokio::sync::oneshot;
use tracing::*;

use crate::errors::{StoreError, StoreResult};

/// Executes `op` on `pool` and returns its result over a oneshot channel.
pub(crate) async fn exec_async<T, F>(pool: &ThreadPool, op: F) -> StoreResult<T>
where
    F: FnOnce() -> StoreResult<T> + Send + 'static,
    T: Send + 'static,
{
    let (resp_tx, resp_rx) = oneshot::channel();

    pool.execute(move || {
        let res = op();
        if resp_tx.send(res).is_err() {
            warn!("failed to send response");
        }
    });

    match resp_rx.await {
        Ok(v) => v,
        Err(e) => Err(StoreError::Worker(format!("{e}"))),
    }
}
