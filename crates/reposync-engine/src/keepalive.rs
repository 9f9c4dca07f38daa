//! Background renewal of an open repository transaction

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::{self, MissedTickBehavior};
use tracing::{debug, warn};

use crate::transport::{RepositoryTransport, TransactionId};

/// Periodically renews one transaction until stopped.
///
/// The task owns its own transport handle and transaction id and never
/// touches session state. Dropping the handle aborts the task.
pub struct KeepAlive {
    stop: Option<oneshot::Sender<()>>,
    handle: Option<JoinHandle<()>>,
}

impl KeepAlive {
    /// Spawn the renewal task; the first renewal happens one `interval`
    /// after spawning.
    pub fn spawn(
        transport: Arc<dyn RepositoryTransport>,
        tx: TransactionId,
        interval: Duration,
    ) -> Self {
        let (stop_tx, mut stop_rx) = oneshot::channel::<()>();

        let handle = tokio::spawn(async move {
            let mut ticker = time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            ticker.tick().await;

            loop {
                tokio::select! {
                    _ = &mut stop_rx => break,
                    _ = ticker.tick() => {
                        match transport.keep_alive(&tx).await {
                            Ok(()) => debug!("Renewed transaction {}", tx),
                            Err(e) => warn!("Failed to renew transaction {}: {}", tx, e),
                        }
                    }
                }
            }

            debug!("Keep-alive for transaction {} stopped", tx);
        });

        Self {
            stop: Some(stop_tx),
            handle: Some(handle),
        }
    }

    /// Signal the task and wait for it to finish.
    pub async fn stop(mut self) {
        if let Some(stop) = self.stop.take() {
            let _ = stop.send(());
        }
        if let Some(handle) = self.handle.take() {
            if let Err(e) = handle.await {
                if !e.is_cancelled() {
                    warn!("Keep-alive task ended abnormally: {}", e);
                }
            }
        }
    }

    pub fn is_running(&self) -> bool {
        self.handle.as_ref().is_some_and(|h| !h.is_finished())
    }
}

impl Drop for KeepAlive {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
    }
}
