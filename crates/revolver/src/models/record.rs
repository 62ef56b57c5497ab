//! Persisted request records: modes, states and the permitted transition graph.
//!
//! Every asynchronous request accepted by the gateway materializes as a
//! [`RequestRecord`] in the mailbox store. The record moves through a strict
//! state machine; providers enforce the graph with compare-and-set semantics
//! so no record can regress.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Interaction mode selected for a request.
///
/// - `Sync` - the upstream response is returned inline.
/// - `Polling` - the response is persisted; the caller fetches it later by
///   request id.
/// - `Callback` - the response is persisted and POSTed to a caller-supplied
///   URL by the callback dispatcher.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RequestMode {
    Sync,
    Polling,
    Callback,
}

impl RequestMode {
    /// Parses the `X-Request-Mode` header value. Case-sensitive by contract.
    pub fn from_header(value: &str) -> Option<RequestMode> {
        match value {
            "SYNC" => Some(RequestMode::Sync),
            "POLLING" => Some(RequestMode::Polling),
            "CALLBACK" => Some(RequestMode::Callback),
            _ => None,
        }
    }

    pub fn is_async(self) -> bool {
        !matches!(self, RequestMode::Sync)
    }
}

/// Lifecycle state of a persisted request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RequestState {
    Received,
    InProgress,
    Completed,
    Failed,
    TimedOut,
    CallbackPending,
    CallbackSent,
    CallbackFailed,
}

impl RequestState {
    /// Whether a transition from `self` to `next` is permitted.
    ///
    /// The graph is monotonic: `RECEIVED → IN_PROGRESS → {COMPLETED, FAILED,
    /// TIMED_OUT}`, and for callback mode `COMPLETED → CALLBACK_PENDING →
    /// {CALLBACK_SENT, CALLBACK_FAILED}`. A record may jump straight from
    /// `RECEIVED` to a terminal execution state when the upstream answers
    /// before the in-progress mark lands (callback receipts do this).
    pub fn can_transition(self, next: RequestState) -> bool {
        use RequestState::*;
        matches!(
            (self, next),
            (Received, InProgress)
                | (Received, Completed)
                | (Received, Failed)
                | (Received, TimedOut)
                | (InProgress, Completed)
                | (InProgress, Failed)
                | (InProgress, TimedOut)
                | (Completed, CallbackPending)
                | (CallbackPending, CallbackSent)
                | (CallbackPending, CallbackFailed)
        )
    }

    /// Terminal states accept no further transitions.
    pub fn is_terminal(self) -> bool {
        use RequestState::*;
        matches!(self, Failed | TimedOut | CallbackSent | CallbackFailed)
    }

    /// States in which the upstream exchange finished and the response is
    /// stored: `COMPLETED` plus the callback-delivery states that follow it.
    ///
    /// A duplicate async submission under the same id is acknowledged
    /// without a new upstream call exactly in these states. Failed,
    /// timed-out and callback-exhausted records are NOT covered - the whole
    /// point of an idempotency key is that the caller may retry those.
    pub fn has_upstream_response(self) -> bool {
        use RequestState::*;
        matches!(self, Completed | CallbackPending | CallbackSent)
    }
}

/// Response captured from the upstream (or posted back via the callback
/// receipt endpoint), stored verbatim for later retrieval or delivery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredResponse {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

/// A request persisted in the mailbox store.
///
/// At most one record exists per `request_id` within the TTL window; the
/// store upserts by id. Bodies are kept as raw bytes so the gateway can
/// replay them byte-for-byte.
#[derive(Debug, Clone)]
pub struct RequestRecord {
    pub request_id: String,
    pub mailbox_id: Option<String>,
    pub service: String,
    pub api: String,
    pub mode: RequestMode,
    pub state: RequestState,
    pub method: String,
    pub path: String,
    pub request_headers: Vec<(String, String)>,
    pub request_body: Vec<u8>,
    pub response: Option<StoredResponse>,
    pub callback_uri: Option<String>,
    /// Callback delivery attempts made so far.
    pub attempts: u32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl RequestRecord {
    /// Creates a fresh record in `RECEIVED` state with an absolute expiry.
    #[allow(clippy::too_many_arguments)]
    pub fn received(
        request_id: String,
        mailbox_id: Option<String>,
        service: String,
        api: String,
        mode: RequestMode,
        method: String,
        path: String,
        request_headers: Vec<(String, String)>,
        request_body: Vec<u8>,
        callback_uri: Option<String>,
        ttl: chrono::Duration,
    ) -> Self {
        let now = Utc::now();
        Self {
            request_id,
            mailbox_id,
            service,
            api,
            mode,
            state: RequestState::Received,
            method,
            path,
            request_headers,
            request_body,
            response: None,
            callback_uri,
            attempts: 0,
            created_at: now,
            updated_at: now,
            expires_at: now + ttl,
        }
    }

    /// Summary view used by the mailbox listing and status envelopes.
    /// Bodies are deliberately excluded.
    pub fn summary(&self) -> RecordSummary {
        RecordSummary {
            request_id: self.request_id.clone(),
            mailbox_id: self.mailbox_id.clone(),
            service: self.service.clone(),
            api: self.api.clone(),
            mode: self.mode,
            state: self.state,
            response_status: self.response.as_ref().map(|r| r.status),
            attempts: self.attempts,
            created_at: self.created_at,
            updated_at: self.updated_at,
            expires_at: self.expires_at,
        }
    }
}

/// Serializable record summary returned by the polling surfaces.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordSummary {
    pub request_id: String,
    pub mailbox_id: Option<String>,
    pub service: String,
    pub api: String,
    pub mode: RequestMode,
    pub state: RequestState,
    pub response_status: Option<u16>,
    pub attempts: u32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transition_graph_is_monotonic() {
        use RequestState::*;
        assert!(Received.can_transition(InProgress));
        assert!(InProgress.can_transition(Completed));
        assert!(Completed.can_transition(CallbackPending));
        assert!(CallbackPending.can_transition(CallbackSent));

        // No regressions.
        assert!(!Completed.can_transition(InProgress));
        assert!(!CallbackSent.can_transition(CallbackPending));
        assert!(!Failed.can_transition(Completed));
        assert!(!TimedOut.can_transition(InProgress));
    }

    #[test]
    fn only_completed_states_carry_an_upstream_response() {
        use RequestState::*;
        assert!(Completed.has_upstream_response());
        assert!(CallbackPending.has_upstream_response());
        assert!(CallbackSent.has_upstream_response());

        assert!(!Received.has_upstream_response());
        assert!(!InProgress.has_upstream_response());
        assert!(!Failed.has_upstream_response());
        assert!(!TimedOut.has_upstream_response());
        assert!(!CallbackFailed.has_upstream_response());
    }

    #[test]
    fn mode_header_parsing_is_strict() {
        assert_eq!(RequestMode::from_header("SYNC"), Some(RequestMode::Sync));
        assert_eq!(
            RequestMode::from_header("CALLBACK"),
            Some(RequestMode::Callback)
        );
        assert_eq!(RequestMode::from_header("sync"), None);
        assert_eq!(RequestMode::from_header("BATCH"), None);
    }
}
