//! Integration tests for sync engine and server.

use async_trait::async_trait;
use serde_json::json;
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use std::time::Duration;
use tidesync_engine::{
    HttpTransport, LocalMirror, MemoryMirror, RetryConfig, SqliteMirror, SyncConfig, SyncEngine,
    SyncError, SyncResult, SyncTransport,
};
use tidesync_protocol::{
    BootstrapResponse, PullQuery, PullResponse, Record, SyncId, Transaction, TransactionPayload,
};
use tidesync_server::{ServerConfig, ServerError, SyncServer};

/// A transport that calls a server in the same process.
struct InProcessTransport {
    server: SyncServer,
    online: AtomicBool,
    /// Record ids whose writes are sent without an action.
    malformed: Mutex<HashSet<String>>,
}

impl InProcessTransport {
    fn new(server: SyncServer) -> Self {
        Self {
            server,
            online: AtomicBool::new(true),
            malformed: Mutex::new(HashSet::new()),
        }
    }

    fn set_online(&self, online: bool) {
        self.online.store(online, Ordering::SeqCst);
    }

    fn send_malformed(&self, record_id: &str) {
        self.malformed.lock().unwrap().insert(record_id.to_string());
    }

    fn check_online(&self) -> SyncResult<()> {
        if self.online.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(SyncError::transport_retryable("offline"))
        }
    }
}

fn map_error(err: ServerError) -> SyncError {
    if matches!(err, ServerError::BatchTooLarge { .. }) {
        SyncError::BatchTooLarge(err.to_string())
    } else if err.is_client_error() {
        SyncError::Rejected(err.to_string())
    } else {
        SyncError::ServerError(err.to_string())
    }
}

#[async_trait]
impl SyncTransport for InProcessTransport {
    async fn push(&self, transactions: &[Transaction]) -> SyncResult<SyncId> {
        self.check_online()?;
        let malformed = self.malformed.lock().unwrap().clone();
        let payloads = transactions
            .iter()
            .map(|tx| {
                let mut payload = TransactionPayload::from(tx);
                if malformed.contains(&tx.record_id) {
                    payload.action = None;
                }
                payload
            })
            .collect();
        self.server
            .handle_push(payloads)
            .map(|r| r.sync_id)
            .map_err(map_error)
    }

    async fn pull(&self, from: SyncId, to: Option<SyncId>) -> SyncResult<PullResponse> {
        self.check_online()?;
        self.server
            .handle_pull(PullQuery::new(from, to))
            .map_err(map_error)
    }

    async fn bootstrap(&self) -> SyncResult<BootstrapResponse> {
        self.check_online()?;
        self.server.handle_bootstrap().map_err(map_error)
    }
}

fn config() -> SyncConfig {
    SyncConfig::default()
        .with_poll_interval(Duration::from_secs(3600))
        .with_pull_batch_size(3)
        .with_retry(RetryConfig::no_retry())
}

fn client<M: LocalMirror>(server: &SyncServer, mirror: M) -> SyncEngine<InProcessTransport, M> {
    SyncEngine::new(config(), InProcessTransport::new(server.clone()), mirror)
}

fn payload(model_type: &str, id: &str, action: &str, data: serde_json::Value) -> TransactionPayload {
    serde_json::from_value(json!({
        "type": model_type,
        "id": id,
        "action": action,
        "data": data,
    }))
    .unwrap()
}

fn ids_and_data(records: Vec<Record>) -> Vec<(String, serde_json::Value)> {
    records.into_iter().map(|r| (r.id, r.data)).collect()
}

#[tokio::test]
async fn two_clients_converge() {
    let server = SyncServer::new(ServerConfig::default());
    let alice = client(&server, MemoryMirror::new());
    let bob = client(&server, MemoryMirror::new());
    alice.init().await.unwrap();
    bob.init().await.unwrap();

    alice
        .create_with_id("Todo", "a1", json!({ "title": "Buy milk", "completed": false }))
        .unwrap();
    bob.create_with_id("Todo", "b1", json!({ "title": "Walk dog" }))
        .unwrap();
    alice.flush().await.unwrap();
    bob.flush().await.unwrap();

    bob.update("Todo", "a1", json!({ "title": "Buy milk", "completed": true }))
        .unwrap();
    bob.flush().await.unwrap();

    alice.poll_once().await.unwrap();
    bob.poll_once().await.unwrap();

    let expected = ids_and_data(server.handle_bootstrap().unwrap().into_records(chrono::Utc::now()));
    assert_eq!(ids_and_data(alice.records("Todo").unwrap()), expected);
    assert_eq!(ids_and_data(bob.records("Todo").unwrap()), expected);
    assert_eq!(alice.cursor().unwrap(), Some(3));
    assert_eq!(bob.cursor().unwrap(), Some(3));
    assert_eq!(
        alice.record("a1").unwrap().unwrap().data["completed"],
        json!(true)
    );

    alice.stop();
    bob.stop();
}

#[tokio::test]
async fn deleted_record_is_absent_from_later_bootstrap() {
    let server = SyncServer::new(ServerConfig::default());
    let writer = client(&server, MemoryMirror::new());
    writer.init().await.unwrap();

    writer
        .create_with_id("Todo", "gone", json!({ "title": "temp" }))
        .unwrap();
    writer.delete("Todo", "gone").unwrap();
    writer.flush().await.unwrap();
    assert!(writer.record("gone").unwrap().is_none());

    let reader = client(&server, MemoryMirror::new());
    reader.init().await.unwrap();
    assert!(reader.record("gone").unwrap().is_none());
    assert_eq!(reader.cursor().unwrap(), Some(2));

    writer.stop();
    reader.stop();
}

#[tokio::test]
async fn bootstrap_then_poll_matches_server_state() {
    let server = SyncServer::new(ServerConfig::default());
    server
        .handle_push(vec![
            payload("Todo", "a", "create", json!({ "n": 1 })),
            payload("Todo", "b", "create", json!({ "n": 2 })),
            payload("Note", "n", "create", json!({ "text": "hi" })),
        ])
        .unwrap();

    let engine = client(&server, MemoryMirror::new());
    engine.init().await.unwrap();
    assert_eq!(engine.cursor().unwrap(), Some(3));

    for i in 0..7 {
        server
            .handle_push(vec![payload("Todo", "a", "update", json!({ "n": 10 + i }))])
            .unwrap();
    }
    server
        .handle_push(vec![payload("Todo", "b", "delete", json!(null))])
        .unwrap();

    assert_eq!(engine.poll_once().await.unwrap(), 8);
    assert_eq!(engine.cursor().unwrap(), Some(server.latest().unwrap()));

    let snapshot = server.handle_bootstrap().unwrap();
    assert_eq!(snapshot.sync_id, 11);
    let mut local = ids_and_data(engine.records("Todo").unwrap());
    local.extend(ids_and_data(engine.records("Note").unwrap()));
    local.sort_by(|a, b| a.0.cmp(&b.0));
    let mut remote = ids_and_data(snapshot.into_records(chrono::Utc::now()));
    remote.sort_by(|a, b| a.0.cmp(&b.0));
    assert_eq!(local, remote);
    assert_eq!(engine.record("a").unwrap().unwrap().data, json!({ "n": 16 }));

    engine.stop();
}

#[tokio::test]
async fn outbox_survives_restart_and_flushes_in_order() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("client.db");
    let server = SyncServer::new(ServerConfig::default());

    {
        let engine = client(&server, SqliteMirror::open(&path).unwrap());
        engine.init().await.unwrap();
        engine.transport().set_online(false);

        for i in 0..3 {
            engine
                .create_with_id("Todo", format!("r{}", i), json!({ "i": i }))
                .unwrap();
        }
        assert!(engine.flush().await.is_err());
        assert_eq!(engine.pending_count().unwrap(), 3);
        engine.stop();
    }
    assert_eq!(server.latest().unwrap(), 0);

    let engine = client(&server, SqliteMirror::open(&path).unwrap());
    assert_eq!(engine.pending_count().unwrap(), 3);
    assert_eq!(engine.records("Todo").unwrap().len(), 3);

    engine.init().await.unwrap();
    engine.flush().await.unwrap();
    assert_eq!(engine.pending_count().unwrap(), 0);

    let log = server.handle_pull(PullQuery::new(1, None)).unwrap();
    let order: Vec<_> = log
        .transactions
        .iter()
        .map(|e| e.transaction.record_id.as_str())
        .collect();
    assert_eq!(order, vec!["r0", "r1", "r2"]);

    engine.poll_once().await.unwrap();
    assert_eq!(engine.cursor().unwrap(), Some(3));
    engine.stop();
}

#[tokio::test]
async fn retried_push_is_not_duplicated() {
    let server = SyncServer::new(ServerConfig::default());
    let engine = client(&server, MemoryMirror::new());
    engine.init().await.unwrap();

    let write = engine
        .create_with_id("Todo", "a", json!({ "title": "once" }))
        .unwrap();
    let tx = write.transaction().clone();
    engine.flush().await.unwrap();

    // A second delivery of the same txId keeps its original position.
    let again = server
        .handle_push(vec![TransactionPayload::from(&tx)])
        .unwrap();
    assert_eq!(again.sync_id, 1);
    assert_eq!(server.latest().unwrap(), 1);

    engine.stop();
}

fn local_matches_server<M: LocalMirror>(
    engine: &SyncEngine<InProcessTransport, M>,
    server: &SyncServer,
) {
    let mut remote = ids_and_data(server.handle_bootstrap().unwrap().into_records(chrono::Utc::now()));
    remote.sort_by(|a, b| a.0.cmp(&b.0));
    assert_eq!(ids_and_data(engine.records("Todo").unwrap()), remote);
}

#[tokio::test]
async fn batch_limit_splits_queued_writes() {
    let server = SyncServer::new(ServerConfig::default().with_max_push_batch(2));
    let engine = client(&server, MemoryMirror::new());
    engine.init().await.unwrap();
    engine.transport().set_online(false);

    for i in 0..3 {
        engine
            .create_with_id("Todo", format!("r{}", i), json!({ "i": i }))
            .unwrap();
    }
    engine.transport().set_online(true);

    assert_eq!(engine.flush().await.unwrap(), 3);
    assert_eq!(engine.pending_count().unwrap(), 0);
    assert_eq!(server.latest().unwrap(), 3);
    assert_eq!(engine.records("Todo").unwrap().len(), 3);
    local_matches_server(&engine, &server);

    engine.poll_once().await.unwrap();
    assert_eq!(engine.cursor().unwrap(), Some(3));
    engine.stop();
}

#[tokio::test]
async fn invalid_write_is_reverted_and_others_land() {
    let server = SyncServer::new(ServerConfig::default());
    server
        .handle_push(vec![payload("Todo", "bad", "create", json!({ "title": "server" }))])
        .unwrap();

    let engine = client(&server, MemoryMirror::new());
    engine.init().await.unwrap();
    engine.transport().send_malformed("bad");

    let first = engine
        .create_with_id("Todo", "g1", json!({ "title": "first" }))
        .unwrap();
    let bad = engine
        .update("Todo", "bad", json!({ "title": "local" }))
        .unwrap();
    let last = engine
        .create_with_id("Todo", "g2", json!({ "title": "last" }))
        .unwrap();

    let err = engine.flush().await.unwrap_err();
    assert!(matches!(err, SyncError::Rejected(_)));
    assert!(matches!(bad.acknowledged().await, Err(SyncError::Rejected(_))));
    assert_eq!(
        engine.record("bad").unwrap().unwrap().data,
        json!({ "title": "server" })
    );

    engine.flush().await.unwrap();
    assert_eq!(first.acknowledged().await.unwrap(), 2);
    assert_eq!(last.acknowledged().await.unwrap(), 3);
    assert_eq!(engine.pending_count().unwrap(), 0);
    assert_eq!(server.latest().unwrap(), 3);
    local_matches_server(&engine, &server);

    engine.stop();
}

#[tokio::test]
async fn http_end_to_end() {
    let server = SyncServer::new(ServerConfig::default());
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let router = server.router();
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });

    let url = format!("http://{}", addr);
    let config = config().with_timeout(Duration::from_secs(5));

    let alice = SyncEngine::new(
        config.clone(),
        HttpTransport::new(url.clone(), config.timeout).unwrap(),
        MemoryMirror::new(),
    );
    alice.init().await.unwrap();
    let write = alice
        .create_with_id("Todo", "a1", json!({ "title": "Buy milk", "completed": false }))
        .unwrap();
    assert_eq!(write.acknowledged().await.unwrap(), 1);

    let bob = SyncEngine::new(
        config.clone(),
        HttpTransport::new(url.clone(), config.timeout).unwrap(),
        MemoryMirror::new(),
    );
    bob.init().await.unwrap();
    assert_eq!(bob.cursor().unwrap(), Some(1));
    assert_eq!(
        bob.record("a1").unwrap().unwrap().data,
        json!({ "title": "Buy milk", "completed": false })
    );

    let direct = HttpTransport::new(url.clone(), config.timeout).unwrap();
    let page = direct.pull(1, Some(1)).await.unwrap();
    assert_eq!(page.sync_id, 1);
    assert_eq!(page.transactions[0].transaction.record_id, "a1");

    let err = direct.push(&[]).await.unwrap_err();
    assert!(matches!(err, SyncError::Rejected(_)));
    assert!(direct.last_error().is_some());

    let misrouted = HttpTransport::new(format!("{}/missing", url), config.timeout).unwrap();
    let err = misrouted.push(&[write_tx("m1")]).await.unwrap_err();
    assert!(matches!(err, SyncError::Protocol(_)), "{:?}", err);
    assert!(!err.is_retryable());

    alice.stop();
    bob.stop();
}

fn write_tx(id: &str) -> Transaction {
    Transaction::create("Todo", id, json!({ "title": id })).into_local(format!("tx-{}", id))
}

#[tokio::test]
async fn http_batch_limit_is_split() {
    let server = SyncServer::new(ServerConfig::default().with_max_push_batch(2));
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let router = server.router();
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });

    let url = format!("http://{}", addr);
    let config = config().with_timeout(Duration::from_secs(5));
    let direct = HttpTransport::new(url.clone(), config.timeout).unwrap();
    let err = direct
        .push(&[write_tx("x"), write_tx("y"), write_tx("z")])
        .await
        .unwrap_err();
    assert!(matches!(err, SyncError::BatchTooLarge(_)), "{:?}", err);
    assert_eq!(server.latest().unwrap(), 0);

    let engine = SyncEngine::new(
        config.clone(),
        HttpTransport::new(url, config.timeout).unwrap(),
        MemoryMirror::new(),
    );
    engine.init().await.unwrap();
    let writes: Vec<_> = (0..3)
        .map(|i| {
            engine
                .create_with_id("Todo", format!("r{}", i), json!({ "i": i }))
                .unwrap()
        })
        .collect();
    engine.flush().await.unwrap();

    for write in writes {
        assert!(write.acknowledged().await.is_ok());
    }
    assert_eq!(engine.pending_count().unwrap(), 0);
    assert_eq!(server.latest().unwrap(), 3);
    engine.stop();
}
