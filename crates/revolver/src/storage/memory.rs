//! In-memory mailbox back-end with TTL enforcement.
//!
//! Records live in a hash map behind an async `RwLock`. Every record carries
//! an absolute expiry stamped at creation; a background sweep task removes
//! expired entries so the map cannot grow without bound. Reads treat expired
//! records as absent even between sweeps.

use crate::models::record::{RequestRecord, RequestState};
use crate::storage::{MailboxStore, RecordPatch, StorageError};
use ahash::HashMap as AHashMap;
use chrono::{DateTime, Utc};
use log::{debug, info};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;

/// In-memory implementation of [`MailboxStore`].
pub struct InMemoryMailbox {
    records: RwLock<AHashMap<String, RequestRecord>>,
    ttl_seconds: u64,
}

impl InMemoryMailbox {
    pub fn new(ttl_seconds: u64) -> Arc<Self> {
        Arc::new(Self {
            records: RwLock::new(AHashMap::default()),
            ttl_seconds: ttl_seconds.max(1),
        })
    }

    /// Record retention as a chrono duration, for stamping new records.
    pub fn ttl(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.ttl_seconds as i64)
    }

    /// Spawns the background sweep. The interval is a tenth of the TTL with
    /// a one second floor, so expired records linger briefly at worst.
    pub fn spawn_sweeper(self: &Arc<Self>) -> JoinHandle<()> {
        let store = Arc::clone(self);
        let period = Duration::from_secs((self.ttl_seconds / 10).max(1));
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                match store.expire_before(Utc::now()).await {
                    Ok(0) => {}
                    Ok(n) => debug!("mailbox sweep removed {} expired records", n),
                    Err(e) => log::warn!("mailbox sweep failed: {}", e),
                }
            }
        })
    }

    fn is_live(record: &RequestRecord, now: DateTime<Utc>) -> bool {
        record.expires_at > now
    }
}

#[async_trait::async_trait]
impl MailboxStore for InMemoryMailbox {
    async fn save(&self, record: RequestRecord) -> Result<(), StorageError> {
        let mut records = self.records.write().await;
        records.insert(record.request_id.clone(), record);
        Ok(())
    }

    async fn get(&self, request_id: &str) -> Result<Option<RequestRecord>, StorageError> {
        let records = self.records.read().await;
        Ok(records
            .get(request_id)
            .filter(|r| Self::is_live(r, Utc::now()))
            .cloned())
    }

    async fn list_mailbox(&self, mailbox_id: &str) -> Result<Vec<RequestRecord>, StorageError> {
        let records = self.records.read().await;
        let now = Utc::now();
        let mut found: Vec<RequestRecord> = records
            .values()
            .filter(|r| {
                Self::is_live(r, now) && r.mailbox_id.as_deref() == Some(mailbox_id)
            })
            .cloned()
            .collect();
        found.sort_by_key(|r| r.created_at);
        Ok(found)
    }

    async fn update_state(
        &self,
        request_id: &str,
        new_state: RequestState,
        patch: RecordPatch,
    ) -> Result<RequestRecord, StorageError> {
        let mut records = self.records.write().await;
        let record = records
            .get_mut(request_id)
            .filter(|r| Self::is_live(r, Utc::now()))
            .ok_or_else(|| StorageError::NotFound {
                request_id: request_id.to_string(),
            })?;

        if !record.state.can_transition(new_state) {
            return Err(StorageError::IllegalTransition {
                request_id: request_id.to_string(),
                from: record.state,
                to: new_state,
            });
        }

        record.state = new_state;
        if let Some(response) = patch.response {
            record.response = Some(response);
        }
        if let Some(attempts) = patch.attempts {
            record.attempts = attempts;
        }
        record.updated_at = Utc::now();
        Ok(record.clone())
    }

    async fn list_in_state(
        &self,
        state: RequestState,
        updated_before: DateTime<Utc>,
    ) -> Result<Vec<RequestRecord>, StorageError> {
        let records = self.records.read().await;
        let now = Utc::now();
        Ok(records
            .values()
            .filter(|r| Self::is_live(r, now) && r.state == state && r.updated_at < updated_before)
            .cloned()
            .collect())
    }

    async fn expire_before(&self, ts: DateTime<Utc>) -> Result<usize, StorageError> {
        let mut records = self.records.write().await;
        let before = records.len();
        records.retain(|_, r| r.expires_at > ts);
        let removed = before - records.len();
        if removed > 0 {
            info!("expired {} mailbox records", removed);
        }
        Ok(removed)
    }
}
