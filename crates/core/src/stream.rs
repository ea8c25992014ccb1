// crates/core/src/stream.rs
//! Per-job status streaming.
//!
//! The stream observes the store through its per-job broadcast channel, so
//! updates are change-driven rather than busy-polled, but emissions are
//! coalesced to at most one per `interval` to bound overhead when a job
//! reports progress in tight loops. Dropping the stream drops the broadcast
//! receiver with it; nothing keeps observing after a subscriber disconnects.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast::error::{RecvError, TryRecvError};
use tokio_stream::Stream;

use conveyor_types::{JobId, StreamEvent};

use crate::store::JobStore;

/// Stream of events for one job: an initial `update` snapshot, an `update`
/// per observed status/progress change, and exactly one terminal `complete`,
/// after which the stream closes. An unknown id yields a single `error`
/// event.
pub fn status_stream(
    store: Arc<JobStore>,
    id: JobId,
    interval: Duration,
) -> impl Stream<Item = StreamEvent> {
    async_stream::stream! {
        let mut rx = match store.subscribe(id) {
            Ok(rx) => rx,
            Err(err) => {
                yield StreamEvent::Error { message: err.to_string() };
                return;
            }
        };

        let Ok(record) = store.get(id) else {
            yield StreamEvent::Error { message: format!("job not found: {id}") };
            return;
        };
        yield StreamEvent::update(&record);
        if record.status.is_terminal() {
            yield StreamEvent::complete(&record);
            return;
        }
        let mut last = (record.status, record.progress);

        loop {
            match rx.recv().await {
                Ok(_) | Err(RecvError::Lagged(_)) => {}
                // The store dropped the entry; nothing more to observe.
                Err(RecvError::Closed) => return,
            }
            // Rate bound: let further changes land, then emit one snapshot.
            tokio::time::sleep(interval).await;
            loop {
                match rx.try_recv() {
                    Ok(_) | Err(TryRecvError::Lagged(_)) => continue,
                    Err(TryRecvError::Empty) | Err(TryRecvError::Closed) => break,
                }
            }

            let Ok(record) = store.get(id) else { return };
            if record.status.is_terminal() {
                yield StreamEvent::complete(&record);
                return;
            }
            if (record.status, record.progress) != last {
                last = (record.status, record.progress);
                yield StreamEvent::update(&record);
            }
        }
    }
}
