//! The long-lived sync loop and outbound send path.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use wb_domain::Result;
use wb_scrubber::Scrubber;

use crate::client::{MatrixClient, RoomEvent};

/// Sync failures back off up to this ceiling.
const BACKOFF_MAX_SECS: u64 = 60;
/// Proactive token refresh cadence.
const REFRESH_EVERY_SYNCS: u32 = 100;

#[derive(Debug, Clone, serde::Serialize)]
pub struct AdapterStatus {
    pub running: bool,
    pub synced_batches: u64,
    pub last_error: Option<String>,
    pub since: Option<String>,
}

/// Owns the sync loop and forwards incoming events to a channel the
/// broker consumes. Outgoing sends pass through the scrubber when one
/// is configured.
pub struct MatrixAdapter {
    client: Arc<MatrixClient>,
    scrubber: Option<Arc<Scrubber>>,
    sync_timeout_ms: u64,
    since: RwLock<Option<String>>,
    status: RwLock<AdapterStatus>,
    cancel: CancellationToken,
}

impl MatrixAdapter {
    pub fn new(
        client: Arc<MatrixClient>,
        scrubber: Option<Arc<Scrubber>>,
        sync_timeout_ms: u64,
    ) -> Self {
        Self {
            client,
            scrubber,
            sync_timeout_ms,
            since: RwLock::new(None),
            status: RwLock::new(AdapterStatus {
                running: false,
                synced_batches: 0,
                last_error: None,
                since: None,
            }),
            cancel: CancellationToken::new(),
        }
    }

    pub fn client(&self) -> &Arc<MatrixClient> {
        &self.client
    }

    pub fn status(&self) -> AdapterStatus {
        self.status.read().clone()
    }

    /// Spawn the sync loop. Incoming message events arrive on the
    /// returned receiver; the loop stops when the adapter is shut down.
    pub fn start(self: &Arc<Self>) -> mpsc::Receiver<RoomEvent> {
        let (tx, rx) = mpsc::channel(256);
        let adapter = self.clone();
        let cancel = self.cancel.clone();

        tokio::spawn(async move {
            adapter.status.write().running = true;
            let mut backoff_secs = 1u64;
            let mut syncs: u32 = 0;

            loop {
                if cancel.is_cancelled() {
                    break;
                }

                let since = adapter.since.read().clone();
                let sync = tokio::select! {
                    result = adapter.client.sync(since.as_deref(), adapter.sync_timeout_ms) => result,
                    _ = cancel.cancelled() => break,
                };

                match sync {
                    Ok(batch) => {
                        backoff_secs = 1;
                        syncs += 1;
                        *adapter.since.write() = Some(batch.next_batch.clone());
                        {
                            let mut status = adapter.status.write();
                            status.synced_batches += 1;
                            status.last_error = None;
                            status.since = Some(batch.next_batch);
                        }

                        for event in batch.events {
                            // Skip our own echoes.
                            if event.sender == adapter.client.user_id() {
                                continue;
                            }
                            if tx.send(event).await.is_err() {
                                tracing::warn!("receive channel closed; stopping sync loop");
                                adapter.status.write().running = false;
                                return;
                            }
                        }

                        if syncs % REFRESH_EVERY_SYNCS == 0 {
                            if let Err(e) = adapter.client.refresh().await {
                                tracing::debug!(error = %e, "token refresh skipped");
                            }
                        }
                    }
                    Err(e) => {
                        tracing::warn!(error = %e, backoff_secs, "sync failed; backing off");
                        adapter.status.write().last_error = Some(e.to_string());
                        tokio::select! {
                            _ = tokio::time::sleep(Duration::from_secs(backoff_secs)) => {}
                            _ = cancel.cancelled() => break,
                        }
                        backoff_secs = (backoff_secs * 2).min(BACKOFF_MAX_SECS);
                    }
                }
            }

            adapter.status.write().running = false;
            tracing::info!("matrix sync loop stopped");
        });

        rx
    }

    pub fn stop(&self) {
        self.cancel.cancel();
    }

    /// Send a message into a room, scrubbing the body first when a
    /// scrubber is configured. Returns the event id.
    pub async fn send(&self, room_id: &str, body: &str, sender_hint: &str) -> Result<String> {
        let outgoing = match &self.scrubber {
            Some(scrubber) => {
                let outcome = scrubber.scrub_message(body, sender_hint, room_id)?;
                if outcome.quarantined {
                    tracing::warn!(room = %room_id, "outgoing message quarantined");
                }
                outcome.text
            }
            None => body.to_string(),
        };
        self.client.send_message(room_id, &outgoing, None).await
    }

    /// Current sync cursor (diagnostics).
    pub fn since(&self) -> Option<String> {
        self.since.read().clone()
    }
}
