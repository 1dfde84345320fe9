mod common;

use std::sync::{Arc, Mutex};

use axum::extract::Path;
use axum::http::{HeaderMap, StatusCode};
use axum::routing::post;
use axum::{Json, Router};
use common::{eventually, serve};
use relief_client::{
    spawn_auto_drain, AcknowledgeReplayer, Connectivity, DrainOutcome, HttpReplayer,
    MutationQueue, SqliteMutationStore,
};
use relief_db::DbRuntimeSettings;
use serde_json::{json, Value};

#[derive(Debug, Clone)]
struct Received {
    endpoint: String,
    idempotency_key: Option<String>,
    body: Value,
}

#[tokio::test]
async fn offline_writes_replay_when_connectivity_returns() {
    let received: Arc<Mutex<Vec<Received>>> = Arc::default();
    let log = received.clone();
    let router = Router::new().route(
        "/api/{endpoint}",
        post(
            move |Path(endpoint): Path<String>, headers: HeaderMap, Json(body): Json<Value>| {
                let log = log.clone();
                async move {
                    log.lock().unwrap().push(Received {
                        endpoint,
                        idempotency_key: headers
                            .get("idempotency-key")
                            .and_then(|v| v.to_str().ok())
                            .map(str::to_string),
                        body,
                    });
                    StatusCode::NO_CONTENT
                }
            },
        ),
    );
    let url = serve(router).await;

    let dir = tempfile::tempdir().unwrap();
    let db_path = dir.path().join("queue.db");
    let store = SqliteMutationStore::open(db_path.to_str().unwrap(), DbRuntimeSettings::default())
        .unwrap();
    let connectivity = Connectivity::new(false);
    let queue = Arc::new(MutationQueue::new(
        Arc::new(store),
        Arc::new(HttpReplayer::new(reqwest::Client::new(), url)),
        connectivity.clone(),
    ));
    let drainer = spawn_auto_drain(queue.clone());

    let first = queue.enqueue("supply.approve", json!({ "id": "RS-9" })).await.unwrap();
    let second = queue.enqueue("supply.approve", json!({ "id": "RS-9" })).await.unwrap();
    assert_ne!(first.id, second.id);
    assert_eq!(queue.len().await.unwrap(), 2);
    assert!(matches!(queue.drain().await, DrainOutcome::Offline));

    connectivity.set_online();
    assert!(eventually(|| received.lock().unwrap().len() == 2).await);
    let mut empty = false;
    for _ in 0..100 {
        if queue.len().await.unwrap() == 0 {
            empty = true;
            break;
        }
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
    }
    assert!(empty, "queue never drained");

    let received = received.lock().unwrap().clone();
    assert!(received.iter().all(|r| r.endpoint == "supply.approve"));
    assert!(received.iter().all(|r| r.body == json!({ "id": "RS-9" })));
    let keys: Vec<_> = received
        .iter()
        .map(|r| r.idempotency_key.clone().unwrap_or_default())
        .collect();
    assert_eq!(keys, [first.id, second.id], "replayed in insertion order");

    drainer.abort();
}

#[tokio::test]
async fn queued_mutations_survive_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let db_path = dir.path().join("queue.db");
    let path = db_path.to_str().unwrap();

    let queued = {
        let store = SqliteMutationStore::open(path, DbRuntimeSettings::default()).unwrap();
        let queue = MutationQueue::new(
            Arc::new(store),
            Arc::new(AcknowledgeReplayer),
            Connectivity::new(false),
        );
        queue
            .enqueue("shelter.update", json!({ "id": "S-2", "beds": 40 }))
            .await
            .unwrap()
    };

    let store = SqliteMutationStore::open(path, DbRuntimeSettings::default()).unwrap();
    let queue = MutationQueue::new(
        Arc::new(store),
        Arc::new(AcknowledgeReplayer),
        Connectivity::new(true),
    );
    assert_eq!(queue.pending().await.unwrap(), vec![queued]);

    let DrainOutcome::Completed(report) = queue.drain().await else {
        panic!("expected a completed drain");
    };
    assert_eq!(report.removed, 1);
    assert_eq!(queue.len().await.unwrap(), 0);
}

#[tokio::test]
async fn unreadable_record_does_not_block_the_queue() {
    let dir = tempfile::tempdir().unwrap();
    let db_path = dir.path().join("queue.db");
    let path = db_path.to_str().unwrap();

    let store = SqliteMutationStore::open(path, DbRuntimeSettings::default()).unwrap();
    let queue = MutationQueue::new(
        Arc::new(store),
        Arc::new(AcknowledgeReplayer),
        Connectivity::new(true),
    );
    let broken = queue.enqueue("supply.approve", json!({ "id": "RS-1" })).await.unwrap();
    let healthy = queue.enqueue("supply.approve", json!({ "id": "RS-2" })).await.unwrap();

    rusqlite::Connection::open(path)
        .unwrap()
        .execute(
            "UPDATE mutation_queue SET input_json = '{broken' WHERE id = ?1",
            [&broken.id],
        )
        .unwrap();

    assert_eq!(queue.pending().await.unwrap(), vec![healthy]);
    let DrainOutcome::Completed(report) = queue.drain().await else {
        panic!("expected a completed drain");
    };
    assert_eq!(report.replayed, 1);
    assert_eq!(report.removed, 1);
    assert_eq!(queue.len().await.unwrap(), 0);

    let DrainOutcome::Completed(again) = queue.drain().await else {
        panic!("expected a completed drain");
    };
    assert_eq!(again, Default::default());
}
