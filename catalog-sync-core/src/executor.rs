//! Batched concurrent execution of independent per-package operations.
//!
//! The repository and the local machine both dislike thousands of
//! simultaneous publish calls (each may open a database connection and a
//! temporary artifact file), so operations run in fixed-size windows. A full
//! window is awaited before the next one is admitted; a failure or panic in
//! one operation never cancels its siblings.

use futures::future::join_all;
use std::future::Future;
use tracing::{debug, error};

use crate::model::ImportStats;

/// Run `ops` with at most `batch_size` in flight at once, folding each
/// operation's boolean outcome into the returned [`ImportStats`]. A panicked
/// operation counts as a failure.
pub async fn run_batched<F>(ops: Vec<F>, batch_size: usize) -> ImportStats
where
    F: Future<Output = bool> + Send + 'static,
{
    let batch_size = batch_size.max(1);
    let mut stats = ImportStats::default();
    let total = ops.len();
    let mut window = 0usize;

    let mut ops = ops.into_iter().peekable();
    while ops.peek().is_some() {
        let handles: Vec<_> = ops
            .by_ref()
            .take(batch_size)
            .map(tokio::spawn)
            .collect();
        window += 1;
        debug!(window, in_flight = handles.len(), total, "executing batch window");
        for joined in join_all(handles).await {
            match joined {
                Ok(ok) => stats.record(ok),
                Err(e) => {
                    error!(error = ?e, "package operation panicked, counted as failure");
                    stats.record(false);
                }
            }
        }
    }
    stats
}
