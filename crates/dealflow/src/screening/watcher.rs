//! Live screening progress: re-read and re-derive on a timer and on store
//! change events, publish through a `watch` channel.

use std::future::pending;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::summary::{derive_progress, ScreeningProgress};
use crate::store::{DealStore, StoreEvent};

pub struct ProgressWatcher {
    rx: watch::Receiver<ScreeningProgress>,
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

impl ProgressWatcher {
    pub fn spawn(store: Arc<dyn DealStore>, poll_interval: Duration) -> Self {
        let (tx, rx) = watch::channel(ScreeningProgress::default());
        let cancel = CancellationToken::new();
        let events = store.subscribe();
        let handle = tokio::spawn(run(store, tx, events, poll_interval, cancel.clone()));
        Self { rx, cancel, handle }
    }

    pub fn subscribe(&self) -> watch::Receiver<ScreeningProgress> {
        self.rx.clone()
    }

    pub fn current(&self) -> ScreeningProgress {
        self.rx.borrow().clone()
    }

    pub async fn shutdown(self) {
        self.cancel.cancel();
        let _ = self.handle.await;
    }
}

/// Both wake-up paths land here.
async fn refresh(store: &dyn DealStore, tx: &watch::Sender<ScreeningProgress>) {
    match store.list_screenings().await {
        Ok(rows) => {
            let progress = derive_progress(&rows);
            tx.send_if_modified(|current| {
                if *current == progress {
                    false
                } else {
                    *current = progress;
                    true
                }
            });
        }
        Err(e) => tracing::warn!(error = %e, "ProgressWatcher: refresh failed"),
    }
}

async fn run(
    store: Arc<dyn DealStore>,
    tx: watch::Sender<ScreeningProgress>,
    events: broadcast::Receiver<StoreEvent>,
    poll_interval: Duration,
    cancel: CancellationToken,
) {
    let mut events = Some(events);
    let mut ticker = tokio::time::interval(poll_interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        let next_event = async {
            match events.as_mut() {
                Some(rx) => rx.recv().await,
                None => pending().await,
            }
        };
        let wake = tokio::select! {
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => None,
            event = next_event => Some(event),
        };
        match wake {
            None | Some(Ok(StoreEvent::ScreeningsChanged { .. })) => {}
            Some(Ok(_)) => continue,
            // Missed events are covered by a full re-read.
            Some(Err(broadcast::error::RecvError::Lagged(skipped))) => {
                tracing::debug!(skipped, "ProgressWatcher: lagged behind store events");
            }
            Some(Err(broadcast::error::RecvError::Closed)) => {
                tracing::warn!("ProgressWatcher: store events closed, polling only");
                events = None;
                continue;
            }
        }
        refresh(store.as_ref(), &tx).await;
    }
    tracing::debug!("ProgressWatcher stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::InMemoryStore;
    use uuid::Uuid;

    #[tokio::test]
    async fn test_push_path_updates_without_waiting_for_poll() {
        let store = Arc::new(InMemoryStore::new());
        let watcher = ProgressWatcher::spawn(store.clone(), Duration::from_secs(3600));
        let mut rx = watcher.subscribe();

        store.upsert_pending_screening(Uuid::new_v4(), Uuid::new_v4()).await.unwrap();

        tokio::time::timeout(Duration::from_secs(2), async {
            loop {
                if rx.borrow_and_update().in_progress.len() == 1 {
                    break;
                }
                rx.changed().await.unwrap();
            }
        })
        .await
        .unwrap();
        watcher.shutdown().await;
    }
}
