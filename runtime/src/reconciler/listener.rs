//! Background task consuming the upstream updates stream.
//!
//! Items are folded one at a time in receipt order: the loop awaits each
//! `send`, so an item is reduced before the next one is pulled. Only the wait
//! for its acknowledgement and notifications runs in the `JoinSet`, so a slow
//! acknowledgement never holds up receipt of the next item.

use super::ReconcilerStore;
use super::reducer::{Origin, ReconcilerAction};
use entitlements_core::environment::Clock;
use entitlements_core::source::VerificationStream;
use entitlements_core::transaction::VerificationResult;
use futures::StreamExt;
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::{JoinError, JoinHandle, JoinSet};

/// A running listener subscription.
///
/// Dropping the handle signals shutdown and detaches the task, which still
/// drains and acknowledges every item it already pulled.
pub(crate) struct ListenerHandle {
    shutdown: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl ListenerHandle {
    /// Open a subscription and start consuming it.
    ///
    /// The subscription is open when this returns.
    pub(crate) fn spawn<C>(store: ReconcilerStore<C>) -> Self
    where
        C: Clock + Clone + 'static,
    {
        let (shutdown, shutdown_rx) = watch::channel(false);
        let updates = store.environment().source.updates();
        let task = tokio::spawn(run(store, updates, shutdown_rx));
        metrics::counter!("entitlements.listener.started").increment(1);
        Self { shutdown, task }
    }

    /// Signal shutdown and wait for the task and every in-flight item.
    pub(crate) async fn stop(mut self) {
        let _ = self.shutdown.send(true);
        if let Err(error) = (&mut self.task).await {
            log_join_error(&error);
        }
        metrics::counter!("entitlements.listener.stopped").increment(1);
    }
}

impl Drop for ListenerHandle {
    fn drop(&mut self) {
        let _ = self.shutdown.send(true);
    }
}

async fn run<C>(store: ReconcilerStore<C>, mut updates: VerificationStream, mut shutdown: watch::Receiver<bool>)
where
    C: Clock + Clone + 'static,
{
    let mut in_flight: JoinSet<()> = JoinSet::new();
    let mut received: u64 = 0;
    let mut ended = false;

    tracing::info!("Transaction listener started");

    while !*shutdown.borrow() {
        tokio::select! {
            biased;

            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    tracing::info!("Shutdown signal received");
                    break;
                }
            }

            item = updates.next() => {
                let Some(result) = item else {
                    tracing::info!(received, "Transaction stream ended");
                    ended = true;
                    break;
                };
                received += 1;
                fold(&store, result, &mut in_flight).await;
            }

            Some(joined) = in_flight.join_next(), if !in_flight.is_empty() => {
                if let Err(error) = joined {
                    log_join_error(&error);
                }
            }
        }
    }

    drop(updates);

    let pending = in_flight.len();
    if pending > 0 {
        tracing::debug!(pending, "Draining in-flight transactions");
    }
    while let Some(joined) = in_flight.join_next().await {
        if let Err(error) = joined {
            log_join_error(&error);
        }
    }

    if ended {
        if let Err(error) = store.send(ReconcilerAction::StreamEnded).await {
            tracing::debug!(error = %error, "Stream end not recorded");
        }
    }

    tracing::info!(received, "Transaction listener stopped");
}

/// Reduce one item, then leave the wait for its effects to `in_flight`.
async fn fold<C>(store: &ReconcilerStore<C>, result: VerificationResult, in_flight: &mut JoinSet<()>)
where
    C: Clock + Clone + 'static,
{
    let transaction = result.transaction().clone();
    let action = ReconcilerAction::TransactionReceived {
        result,
        origin: Origin::Stream,
    };

    match store.send(action).await {
        Ok(mut handle) => {
            in_flight.spawn(async move { handle.wait().await });
        },
        Err(error) => {
            tracing::warn!(
                transaction_id = %transaction.transaction_id,
                error = %error,
                "Store rejected transaction, acknowledging without folding"
            );
            let source = Arc::clone(&store.environment().source);
            in_flight.spawn(async move { source.finish(transaction).await });
        },
    }
}

fn log_join_error(error: &JoinError) {
    if error.is_cancelled() {
        tracing::debug!("Listener task cancelled");
    } else {
        tracing::error!(error = %error, "Listener task panicked");
    }
}
