use chrono::Utc;
use revolver::models::record::{RequestMode, RequestRecord, RequestState, StoredResponse};
use revolver::storage::memory::InMemoryMailbox;
use revolver::storage::{MailboxStore, RecordPatch, StorageError};
use tokio::time::{sleep, Duration};

fn record(request_id: &str, mailbox_id: Option<&str>, ttl_seconds: i64) -> RequestRecord {
    RequestRecord::received(
        request_id.to_string(),
        mailbox_id.map(|m| m.to_string()),
        "payments".to_string(),
        "order".to_string(),
        RequestMode::Polling,
        "GET".to_string(),
        "/orders/1".to_string(),
        vec![("accept".to_string(), "application/json".to_string())],
        vec![],
        None,
        chrono::Duration::seconds(ttl_seconds),
    )
}

fn response() -> StoredResponse {
    StoredResponse {
        status: 200,
        headers: vec![("content-type".to_string(), "application/json".to_string())],
        body: b"{\"ok\":true}".to_vec(),
    }
}

#[tokio::test]
async fn save_and_get_round_trip() {
    let store = InMemoryMailbox::new(900);
    store.save(record("r1", None, 900)).await.unwrap();

    let found = store.get("r1").await.unwrap().unwrap();
    assert_eq!(found.request_id, "r1");
    assert_eq!(found.state, RequestState::Received);
    assert!(store.get("r2").await.unwrap().is_none());
}

#[tokio::test]
async fn save_is_idempotent_upsert() {
    let store = InMemoryMailbox::new(900);
    store.save(record("r1", None, 900)).await.unwrap();
    store.save(record("r1", None, 900)).await.unwrap();

    let found = store.get("r1").await.unwrap().unwrap();
    assert_eq!(found.request_id, "r1");
    assert_eq!(store.list_mailbox("m").await.unwrap().len(), 0);
}

#[tokio::test]
async fn permitted_transitions_apply_patches() {
    let store = InMemoryMailbox::new(900);
    store.save(record("r1", None, 900)).await.unwrap();

    let updated = store
        .update_state("r1", RequestState::InProgress, RecordPatch::none())
        .await
        .unwrap();
    assert_eq!(updated.state, RequestState::InProgress);

    let updated = store
        .update_state(
            "r1",
            RequestState::Completed,
            RecordPatch::with_response(response()),
        )
        .await
        .unwrap();
    assert_eq!(updated.state, RequestState::Completed);
    assert_eq!(updated.response.unwrap().status, 200);
}

#[tokio::test]
async fn illegal_transitions_leave_record_untouched() {
    let store = InMemoryMailbox::new(900);
    store.save(record("r1", None, 900)).await.unwrap();
    store
        .update_state("r1", RequestState::InProgress, RecordPatch::none())
        .await
        .unwrap();
    store
        .update_state(
            "r1",
            RequestState::Completed,
            RecordPatch::with_response(response()),
        )
        .await
        .unwrap();

    // Completed records cannot regress.
    let err = store
        .update_state("r1", RequestState::InProgress, RecordPatch::none())
        .await
        .unwrap_err();
    assert!(matches!(err, StorageError::IllegalTransition { .. }));

    let found = store.get("r1").await.unwrap().unwrap();
    assert_eq!(found.state, RequestState::Completed);
}

#[tokio::test]
async fn callback_lifecycle_transitions() {
    let store = InMemoryMailbox::new(900);
    store.save(record("r1", None, 900)).await.unwrap();
    store
        .update_state("r1", RequestState::InProgress, RecordPatch::none())
        .await
        .unwrap();
    store
        .update_state(
            "r1",
            RequestState::Completed,
            RecordPatch::with_response(response()),
        )
        .await
        .unwrap();
    store
        .update_state("r1", RequestState::CallbackPending, RecordPatch::none())
        .await
        .unwrap();
    let sent = store
        .update_state(
            "r1",
            RequestState::CallbackSent,
            RecordPatch::with_attempts(1),
        )
        .await
        .unwrap();
    assert_eq!(sent.attempts, 1);

    // Terminal.
    assert!(store
        .update_state("r1", RequestState::CallbackPending, RecordPatch::none())
        .await
        .is_err());
}

#[tokio::test]
async fn unknown_record_is_not_found() {
    let store = InMemoryMailbox::new(900);
    let err = store
        .update_state("ghost", RequestState::InProgress, RecordPatch::none())
        .await
        .unwrap_err();
    assert_eq!(
        err,
        StorageError::NotFound {
            request_id: "ghost".to_string()
        }
    );
}

#[tokio::test]
async fn mailbox_listing_is_grouped_and_ordered() {
    let store = InMemoryMailbox::new(900);
    store.save(record("r1", Some("batch-1"), 900)).await.unwrap();
    sleep(Duration::from_millis(5)).await;
    store.save(record("r2", Some("batch-1"), 900)).await.unwrap();
    store.save(record("r3", Some("batch-2"), 900)).await.unwrap();
    store.save(record("r4", None, 900)).await.unwrap();

    let batch = store.list_mailbox("batch-1").await.unwrap();
    let ids: Vec<&str> = batch.iter().map(|r| r.request_id.as_str()).collect();
    assert_eq!(ids, vec!["r1", "r2"]);
    assert_eq!(store.list_mailbox("batch-2").await.unwrap().len(), 1);
    assert!(store.list_mailbox("nope").await.unwrap().is_empty());
}

#[tokio::test]
async fn expired_records_are_invisible_and_swept() {
    let store = InMemoryMailbox::new(900);
    store.save(record("stale", None, -1)).await.unwrap();
    store.save(record("live", None, 900)).await.unwrap();

    // Expired records read as absent even before the sweep runs.
    assert!(store.get("stale").await.unwrap().is_none());
    assert!(store.get("live").await.unwrap().is_some());

    let removed = store.expire_before(Utc::now()).await.unwrap();
    assert_eq!(removed, 1);
}

#[tokio::test]
async fn list_in_state_filters_by_age() {
    let store = InMemoryMailbox::new(900);
    store.save(record("r1", None, 900)).await.unwrap();
    store
        .update_state("r1", RequestState::InProgress, RecordPatch::none())
        .await
        .unwrap();
    store
        .update_state(
            "r1",
            RequestState::Completed,
            RecordPatch::with_response(response()),
        )
        .await
        .unwrap();
    store
        .update_state("r1", RequestState::CallbackPending, RecordPatch::none())
        .await
        .unwrap();

    // Not yet old enough.
    let past = Utc::now() - chrono::Duration::seconds(60);
    assert!(store
        .list_in_state(RequestState::CallbackPending, past)
        .await
        .unwrap()
        .is_empty());

    // Old enough once the cutoff moves past the update.
    let future = Utc::now() + chrono::Duration::seconds(1);
    let stuck = store
        .list_in_state(RequestState::CallbackPending, future)
        .await
        .unwrap();
    assert_eq!(stuck.len(), 1);
    assert_eq!(stuck[0].request_id, "r1");
}
