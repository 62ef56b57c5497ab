//! Request persistence: the mailbox store contract and the in-memory
//! back-end.
//!
//! The gateway talks to persistence exclusively through [`MailboxStore`].
//! The shipped back-end is [`memory::InMemoryMailbox`]; an external KV store
//! with native TTL plugs in through the same trait via the gateway builder.

pub mod memory;

use crate::models::record::{RequestRecord, RequestState, StoredResponse};
use chrono::{DateTime, Utc};
use thiserror::Error;

/// Storage-layer failures.
#[derive(Debug, Error, PartialEq)]
pub enum StorageError {
    #[error("no record for request id {request_id}")]
    NotFound { request_id: String },

    /// The requested state change is not in the permitted transition graph;
    /// the record is left untouched.
    #[error("illegal transition {from:?} -> {to:?} for request id {request_id}")]
    IllegalTransition {
        request_id: String,
        from: RequestState,
        to: RequestState,
    },

    #[error("storage backend failure: {0}")]
    Backend(String),
}

/// Fields applied together with a state transition.
#[derive(Debug, Clone, Default)]
pub struct RecordPatch {
    pub response: Option<StoredResponse>,
    pub attempts: Option<u32>,
}

impl RecordPatch {
    pub fn none() -> RecordPatch {
        RecordPatch::default()
    }

    pub fn with_response(response: StoredResponse) -> RecordPatch {
        RecordPatch {
            response: Some(response),
            attempts: None,
        }
    }

    pub fn with_attempts(attempts: u32) -> RecordPatch {
        RecordPatch {
            response: None,
            attempts: Some(attempts),
        }
    }
}

/// Contract every mailbox back-end satisfies.
///
/// `update_state` is the serialization point for record lifecycles: the
/// transition is checked against the permitted graph under the provider's
/// own concurrency discipline (compare-and-set), so concurrent writers
/// cannot regress a record.
#[async_trait::async_trait]
pub trait MailboxStore: Send + Sync {
    /// Idempotent upsert keyed by `request_id`.
    async fn save(&self, record: RequestRecord) -> Result<(), StorageError>;

    async fn get(&self, request_id: &str) -> Result<Option<RequestRecord>, StorageError>;

    /// Records grouped under one mailbox id, oldest first.
    async fn list_mailbox(&self, mailbox_id: &str) -> Result<Vec<RequestRecord>, StorageError>;

    /// Applies a state transition plus patch, conditional on the current
    /// state allowing it. Returns the updated record.
    async fn update_state(
        &self,
        request_id: &str,
        new_state: RequestState,
        patch: RecordPatch,
    ) -> Result<RequestRecord, StorageError>;

    /// Records sitting in `state` whose last update is older than the given
    /// instant. Used by the callback rescuer to rehydrate stuck deliveries.
    async fn list_in_state(
        &self,
        state: RequestState,
        updated_before: DateTime<Utc>,
    ) -> Result<Vec<RequestRecord>, StorageError>;

    /// Housekeeping sweep; TTL-native back-ends may no-op. Returns the
    /// number of records removed.
    async fn expire_before(&self, ts: DateTime<Utc>) -> Result<usize, StorageError>;
}
