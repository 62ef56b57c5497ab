//! Callback delivery for completed asynchronous requests.
//!
//! Records entering `CALLBACK_PENDING` are queued onto a bounded channel and
//! drained by a single logical worker that POSTs the stored response to the
//! caller-supplied URL. Failures re-enqueue with capped exponential backoff
//! and jitter until the attempt budget runs out, at which point the record is
//! marked `CALLBACK_FAILED`.
//!
//! The queue is intentionally lossy under pressure: on overflow the record
//! simply stays `CALLBACK_PENDING` in the store and a background rescuer
//! re-enqueues stale pending records, so nothing is lost - delivery is
//! at-least-once, never exactly-once.

use crate::models::record::{RequestRecord, RequestState};
use crate::models::settings::Settings;
use crate::storage::{MailboxStore, RecordPatch};
use chrono::Utc;
use log::{debug, info, warn};
use rand::Rng;
use reqwest::Client;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

const INITIAL_BACKOFF_MS: u64 = 1_000;
const MAX_BACKOFF_MS: u64 = 60_000;
const JITTER_FRACTION: f64 = 0.2;

/// Delivery settings derived from the gateway configuration.
#[derive(Debug, Clone)]
pub struct CallbackConfig {
    /// Per-delivery timeout, already clamped by the settings layer.
    pub timeout_ms: u64,
    pub max_attempts: u32,
    pub queue_size: usize,
    /// How often the rescuer scans for stuck pending records.
    pub rescue_interval_secs: u64,
    /// Minimum age before a pending record counts as stuck.
    pub rescue_age_secs: u64,
}

impl CallbackConfig {
    pub fn from_settings(settings: &Settings) -> CallbackConfig {
        CallbackConfig {
            timeout_ms: settings.callback_timeout_ms(),
            max_attempts: settings.max_callback_attempts.max(1),
            queue_size: settings.callback_queue_size.max(1),
            rescue_interval_secs: 30,
            rescue_age_secs: 90,
        }
    }
}

/// Cloneable handle used by the engine and the callback-receipt endpoint to
/// hand records to the delivery worker.
#[derive(Clone)]
pub struct CallbackDispatcher {
    tx: mpsc::Sender<String>,
    config: Arc<CallbackConfig>,
    store: Arc<dyn MailboxStore>,
    client: Client,
}

/// Owns the queue receiver; consumed by [`CallbackWorker::run`].
pub struct CallbackWorker {
    rx: mpsc::Receiver<String>,
    dispatcher: CallbackDispatcher,
}

impl CallbackDispatcher {
    pub fn new(
        config: CallbackConfig,
        store: Arc<dyn MailboxStore>,
    ) -> Result<(CallbackDispatcher, CallbackWorker), String> {
        let (tx, rx) = mpsc::channel(config.queue_size);
        let client = Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms))
            .build()
            .map_err(|e| format!("callback client build failed: {}", e))?;
        let dispatcher = CallbackDispatcher {
            tx,
            config: Arc::new(config),
            store,
            client,
        };
        let worker = CallbackWorker {
            rx,
            dispatcher: dispatcher.clone(),
        };
        Ok((dispatcher, worker))
    }

    /// Queues a record for delivery. On overflow the record stays
    /// `CALLBACK_PENDING` in the store for the rescuer to pick up.
    pub fn enqueue(&self, request_id: &str) {
        if let Err(e) = self.tx.try_send(request_id.to_string()) {
            warn!(
                "callback queue full, leaving {} pending for rescue: {}",
                request_id, e
            );
        }
    }

    /// Spawns the rescuer that rehydrates stuck `CALLBACK_PENDING` records
    /// from persistence.
    pub fn spawn_rescuer(&self) -> JoinHandle<()> {
        let dispatcher = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(Duration::from_secs(
                dispatcher.config.rescue_interval_secs,
            ));
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                let cutoff =
                    Utc::now() - chrono::Duration::seconds(dispatcher.config.rescue_age_secs as i64);
                match dispatcher
                    .store
                    .list_in_state(RequestState::CallbackPending, cutoff)
                    .await
                {
                    Ok(stuck) => {
                        for record in stuck {
                            debug!("rescuing pending callback {}", record.request_id);
                            dispatcher.enqueue(&record.request_id);
                        }
                    }
                    Err(e) => warn!("callback rescue scan failed: {}", e),
                }
            }
        })
    }

    async fn deliver(&self, request_id: &str) {
        let record = match self.store.get(request_id).await {
            Ok(Some(record)) => record,
            Ok(None) => {
                debug!("callback {} vanished before delivery", request_id);
                return;
            }
            Err(e) => {
                warn!("callback {} lookup failed: {}", request_id, e);
                return;
            }
        };
        if record.state != RequestState::CallbackPending {
            debug!(
                "callback {} no longer pending ({:?}), skipping",
                request_id, record.state
            );
            return;
        }

        let attempt = record.attempts + 1;
        match self.post(&record).await {
            Ok(()) => {
                info!(
                    "callback {} delivered on attempt {}",
                    record.request_id, attempt
                );
                if let Err(e) = self
                    .store
                    .update_state(
                        &record.request_id,
                        RequestState::CallbackSent,
                        RecordPatch::with_attempts(attempt),
                    )
                    .await
                {
                    warn!("callback {} sent but not recorded: {}", record.request_id, e);
                }
            }
            Err(reason) => {
                warn!(
                    "callback {} attempt {}/{} failed: {}",
                    record.request_id, attempt, self.config.max_attempts, reason
                );
                if attempt >= self.config.max_attempts {
                    if let Err(e) = self
                        .store
                        .update_state(
                            &record.request_id,
                            RequestState::CallbackFailed,
                            RecordPatch::with_attempts(attempt),
                        )
                        .await
                    {
                        warn!("callback {} exhaustion not recorded: {}", record.request_id, e);
                    }
                    return;
                }

                // Persist the attempt count, then come back after backoff.
                let mut bumped = record.clone();
                bumped.attempts = attempt;
                bumped.updated_at = Utc::now();
                if let Err(e) = self.store.save(bumped).await {
                    warn!("callback {} attempt bump failed: {}", record.request_id, e);
                }

                let delay = Duration::from_millis(backoff_ms(attempt));
                let tx = self.tx.clone();
                let id = record.request_id.clone();
                tokio::spawn(async move {
                    tokio::time::sleep(delay).await;
                    // A closed queue means the worker is gone; the rescuer
                    // owns the record from here.
                    let _ = tx.send(id).await;
                });
            }
        }
    }

    async fn post(&self, record: &RequestRecord) -> Result<(), String> {
        let uri = record
            .callback_uri
            .as_deref()
            .ok_or_else(|| "record has no callback uri".to_string())?;
        let response = record
            .response
            .as_ref()
            .ok_or_else(|| "record has no stored response".to_string())?;

        let mut request = self.client.post(uri).body(response.body.clone());
        for (name, value) in &response.headers {
            request = request.header(name.as_str(), value.as_str());
        }
        request = request.header("X-Request-Id", record.request_id.as_str());

        let resp = request.send().await.map_err(|e| e.to_string())?;
        if resp.status().is_success() {
            Ok(())
        } else {
            Err(format!("callback target returned {}", resp.status()))
        }
    }
}

impl CallbackWorker {
    /// Drains the queue until every sender is gone.
    pub async fn run(mut self) {
        info!("callback dispatcher started");
        while let Some(request_id) = self.rx.recv().await {
            self.dispatcher.deliver(&request_id).await;
        }
        info!("callback dispatcher stopped");
    }
}

/// Exponential backoff for the given one-based attempt: 1s doubling to a
/// 60s cap, jittered by ±20%.
pub fn backoff_ms(attempt: u32) -> u64 {
    let exponent = attempt.saturating_sub(1).min(16);
    let base = INITIAL_BACKOFF_MS
        .saturating_mul(1u64 << exponent)
        .min(MAX_BACKOFF_MS);
    let jitter = rand::thread_rng().gen_range(-JITTER_FRACTION..=JITTER_FRACTION);
    ((base as f64) * (1.0 + jitter)) as u64
}
