//! End-to-end tests: client sessions against a real server dispatcher and
//! the in-memory engine, wired over the loopback transport.

use docket_client::{
    attachments, AllDocsOptions, ChangesOptions, ClientError, DatabaseOptions, GetOptions,
    QueryOptions, SocketClient,
};
use docket_engine::{EngineError, EngineFactory};
use docket_server::{Server, ServerConfig};
use docket_testkit::{fixtures, MemoryEngineFactory};
use docket_transport::{MemoryListener, TcpConnector, TcpTransportListener};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

fn rig() -> (SocketClient, Arc<MemoryEngineFactory>) {
    let (listener, connector) = MemoryListener::new();
    let factory = Arc::new(MemoryEngineFactory::new());
    let server = Server::new(
        Arc::clone(&factory) as Arc<dyn EngineFactory>,
        ServerConfig::default(),
    );
    tokio::spawn(async move {
        let _ = server.serve(listener).await;
    });
    (SocketClient::new(Arc::new(connector)), factory)
}

fn db(name: &str) -> DatabaseOptions {
    DatabaseOptions::new("memory:local", name)
}

#[tokio::test]
async fn put_then_get_roundtrip() {
    let (client, _factory) = rig();
    let session = client.open(db("testdb")).await.unwrap();

    let put = session.put(json!({"_id": "x", "value": 42})).await.unwrap();
    assert_eq!(put["ok"], true);
    assert_eq!(put["id"], "x");
    let rev = put["rev"].as_str().unwrap();
    assert!(rev.starts_with("1-"));

    let doc = session.get("x", &GetOptions::default()).await.unwrap();
    assert_eq!(doc["value"], 42);
    assert_eq!(doc["_rev"], rev);
}

#[tokio::test]
async fn sessions_share_one_connection_per_name() {
    let (client, factory) = rig();

    let first = client.open(db("shared")).await.unwrap();
    let second = client.open(db("shared")).await.unwrap();
    let other = client.open(db("other")).await.unwrap();

    // Two handles, one createDatabase; a different name dials its own
    // connection.
    assert_eq!(factory.created_names(), vec!["shared", "other"]);
    assert_eq!(client.open_connections(), 2);

    // Writes through one handle are visible through the other.
    first.put(json!({"_id": "seen"})).await.unwrap();
    let doc = second.get("seen", &GetOptions::default()).await.unwrap();
    assert_eq!(doc["_id"], "seen");

    // The unrelated database saw none of it.
    let err = other.get("seen", &GetOptions::default()).await.unwrap_err();
    assert_eq!(err.as_remote().unwrap().error, "not_found");
}

#[tokio::test]
async fn connection_identity_is_shared_and_stable() {
    let (client, _factory) = rig();
    let first = client.open(db("testdb")).await.unwrap();
    let second = client.open(db("testdb")).await.unwrap();

    let id = first.id().await.unwrap();
    assert!(!id.is_empty());
    assert_eq!(second.id().await.unwrap(), id);
}

#[tokio::test]
async fn document_operation_sweep() {
    let (client, _factory) = rig();
    let session = client.open(db("sweep")).await.unwrap();

    let posted = session.post(json!({"value": "posted"})).await.unwrap();
    assert_eq!(posted["ok"], true);

    let results = session.bulk_docs(fixtures::docs("bulk", 3)).await.unwrap();
    assert_eq!(results.as_array().unwrap().len(), 3);

    let all = session.all_docs(&AllDocsOptions::with_docs()).await.unwrap();
    assert_eq!(all["total_rows"], 4);
    assert!(all["rows"][0]["doc"].is_object());

    let queried = session
        .query(json!({"map": "by_id"}), &QueryOptions::default())
        .await
        .unwrap();
    assert_eq!(queried["total_rows"], 4);

    let info = session.info().await.unwrap();
    assert_eq!(info["db_name"], "sweep");
    assert_eq!(info["doc_count"], 4);

    let diff = session
        .revs_diff(json!({"bulk0": ["1-missing"]}))
        .await
        .unwrap();
    assert!(diff["bulk0"]["missing"][0].is_string());

    assert_eq!(session.compact().await.unwrap()["ok"], true);
    assert_eq!(session.view_cleanup().await.unwrap()["ok"], true);

    let put = session.put(json!({"_id": "gone"})).await.unwrap();
    let removed = session
        .remove("gone", put["rev"].as_str().unwrap())
        .await
        .unwrap();
    assert_eq!(removed["ok"], true);
    assert!(session.get("gone", &GetOptions::default()).await.is_err());
}

#[tokio::test]
async fn put_rejects_non_objects_locally() {
    let (client, _factory) = rig();
    let session = client.open(db("testdb")).await.unwrap();

    let err = session.put(json!(["not", "an", "object"])).await.unwrap_err();
    assert!(matches!(err, ClientError::NotAnObject));
}

#[tokio::test]
async fn attachment_upload_and_download_roundtrip() {
    let (client, _factory) = rig();
    let session = client.open(db("testdb")).await.unwrap();

    let put = session
        .put_attachment("doc", "note.txt", None, b"attachment body", "text/plain")
        .await
        .unwrap();
    assert_eq!(put["ok"], true);

    let attachment = session.get_attachment("doc", "note.txt").await.unwrap();
    assert_eq!(attachment.content_type, "text/plain");
    assert_eq!(&attachment.data[..], b"attachment body");

    // The same body travels inline, base64-encoded, on document reads.
    let doc = session
        .get("doc", &GetOptions::default().with_attachments())
        .await
        .unwrap();
    let inline = attachments::decode_inline(&doc, "note.txt")
        .unwrap()
        .unwrap();
    assert_eq!(&inline.data[..], b"attachment body");

    let rev = put["rev"].as_str().unwrap();
    session
        .remove_attachment("doc", "note.txt", rev)
        .await
        .unwrap();
    assert!(session.get_attachment("doc", "note.txt").await.is_err());
}

#[tokio::test]
async fn empty_attachment_uploads_cleanly() {
    let (client, _factory) = rig();
    let session = client.open(db("testdb")).await.unwrap();

    session
        .put_attachment("doc", "empty.bin", None, b"", "application/octet-stream")
        .await
        .unwrap();

    let attachment = session.get_attachment("doc", "empty.bin").await.unwrap();
    assert!(attachment.data.is_empty());
}

#[tokio::test]
async fn missing_attachment_is_an_error_not_a_handoff() {
    let (client, _factory) = rig();
    let session = client.open(db("testdb")).await.unwrap();
    session.put(json!({"_id": "doc"})).await.unwrap();

    let err = session.get_attachment("doc", "nope.txt").await.unwrap_err();
    let remote = err.as_remote().unwrap();
    assert_eq!(remote.error, "not_found");
    assert_eq!(remote.reason.as_deref(), Some("missing attachment"));
}

#[tokio::test]
async fn concurrent_attachment_downloads_do_not_cross() {
    let (client, _factory) = rig();
    let session = Arc::new(client.open(db("testdb")).await.unwrap());

    for i in 0..4 {
        session
            .put_attachment(
                &format!("doc{i}"),
                "blob.bin",
                None,
                format!("payload {i}").as_bytes(),
                "application/octet-stream",
            )
            .await
            .unwrap();
    }

    let mut tasks = Vec::new();
    for i in 0..4 {
        let session = Arc::clone(&session);
        tasks.push(tokio::spawn(async move {
            let attachment = session
                .get_attachment(&format!("doc{i}"), "blob.bin")
                .await
                .unwrap();
            assert_eq!(&attachment.data[..], format!("payload {i}").as_bytes());
        }));
    }
    for task in tasks {
        task.await.unwrap();
    }
}

#[tokio::test]
async fn buffered_changes_and_summary_only() {
    let (client, _factory) = rig();
    let session = client.open(db("testdb")).await.unwrap();

    session.put(json!({"_id": "a"})).await.unwrap();
    session.put(json!({"_id": "b"})).await.unwrap();

    let full = session.changes(&ChangesOptions::default()).await.unwrap();
    assert_eq!(full["results"].as_array().unwrap().len(), 2);
    assert_eq!(full["last_seq"], 2);

    let summary = session
        .changes(&ChangesOptions::default().summary_only())
        .await
        .unwrap();
    assert!(summary["results"].as_array().unwrap().is_empty());
    assert_eq!(summary["last_seq"], 2);

    let since = session.changes(&ChangesOptions::since(1)).await.unwrap();
    assert_eq!(since["results"].as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn live_changes_deliver_updates_in_order_then_one_terminal() {
    let (client, _factory) = rig();
    let session = client.open(db("testdb")).await.unwrap();

    let mut feed = session
        .live_changes(&ChangesOptions::default().with_limit(3))
        .await
        .unwrap();

    for name in ["a", "b", "c"] {
        session.put(json!({"_id": name})).await.unwrap();
    }

    let mut seen = Vec::new();
    while let Some(change) = feed.next_change().await {
        seen.push(change["id"].as_str().unwrap().to_string());
    }
    assert_eq!(seen, vec!["a", "b", "c"]);

    let summary = feed.completion().await.unwrap();
    assert_eq!(summary["last_seq"], 3);
}

#[tokio::test]
async fn cancelled_live_changes_stop_and_resolve_cancelled() {
    let (client, _factory) = rig();
    let session = client.open(db("testdb")).await.unwrap();

    let mut feed = session
        .live_changes(&ChangesOptions::default())
        .await
        .unwrap();

    session.put(json!({"_id": "before"})).await.unwrap();
    let first = feed.next_change().await.unwrap();
    assert_eq!(first["id"], "before");

    feed.cancel().await;

    // Writes after the cancel never reach this listener.
    session.put(json!({"_id": "after"})).await.unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(feed.next_change().await, None);

    assert!(matches!(
        feed.completion().await,
        Err(ClientError::Cancelled)
    ));
}

#[tokio::test]
async fn unhandled_engine_faults_are_broadcast() {
    let (client, factory) = rig();
    let session = client.open(db("testdb")).await.unwrap();
    let mut errors = session.unhandled_errors();

    factory
        .last_engine()
        .unwrap()
        .inject_fault(EngineError::new("view function threw"));

    let payload = tokio::time::timeout(Duration::from_secs(5), errors.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(payload.error, "view function threw");
}

#[tokio::test]
async fn close_is_idempotent_and_sending_after_close_fails_locally() {
    let (client, _factory) = rig();
    let session = client.open(db("testdb")).await.unwrap();

    session.close().await.unwrap();
    session.close().await.unwrap();
    assert_eq!(client.open_connections(), 0);

    let err = session.info().await.unwrap_err();
    assert!(matches!(err, ClientError::Closed));
    assert!(err.is_local());
}

#[tokio::test]
async fn closing_one_handle_tears_down_the_shared_connection_once() {
    let (client, _factory) = rig();
    let first = client.open(db("testdb")).await.unwrap();
    let second = client.open(db("testdb")).await.unwrap();

    first.close().await.unwrap();

    // The other handle is not "closed" locally, but its connection is
    // gone; pending and future calls resolve with explicit errors rather
    // than hanging.
    let err = second.info().await.unwrap_err();
    assert!(matches!(err, ClientError::ConnectionClosed));

    // Its own close is still a clean no-op.
    second.close().await.unwrap();
}

#[tokio::test]
async fn destroy_reports_ok_and_later_handles_start_fresh() {
    let (client, factory) = rig();
    let session = client.open(db("testdb")).await.unwrap();
    session.put(json!({"_id": "doomed"})).await.unwrap();

    let result = session.destroy().await.unwrap();
    assert_eq!(result["ok"], true);

    let err = session.info().await.unwrap_err();
    assert!(matches!(err, ClientError::Destroyed));

    // Destroy on an already-torn-down name is a no-op success.
    assert_eq!(session.destroy().await.unwrap()["ok"], true);

    // Reopening dials a fresh connection and a fresh engine.
    let reopened = client.open(db("testdb")).await.unwrap();
    assert_eq!(factory.created_names(), vec!["testdb", "testdb"]);
    let err = reopened.get("doomed", &GetOptions::default()).await.unwrap_err();
    assert_eq!(err.as_remote().unwrap().error, "not_found");
}

#[tokio::test]
async fn invalid_addresses_fail_before_any_io() {
    let (client, factory) = rig();

    assert!(matches!(
        client.open(DatabaseOptions::new("", "db")).await,
        Err(ClientError::InvalidAddress)
    ));
    assert!(matches!(
        client.open(DatabaseOptions::new("memory:local", "")).await,
        Err(ClientError::InvalidAddress)
    ));
    assert!(factory.created_names().is_empty());
}

#[tokio::test]
async fn the_full_protocol_works_over_real_tcp_sockets() {
    let listener = TcpTransportListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap().to_string();

    let factory = Arc::new(MemoryEngineFactory::new());
    let server = Server::new(factory as Arc<dyn EngineFactory>, ServerConfig::default());
    tokio::spawn(async move {
        let _ = server.serve(listener).await;
    });

    let client = SocketClient::new(Arc::new(TcpConnector::new()));
    let session = client
        .open(DatabaseOptions::new(addr, "tcpdb"))
        .await
        .unwrap();

    session.put(json!({"_id": "x", "value": "over tcp"})).await.unwrap();
    let doc = session.get("x", &GetOptions::default()).await.unwrap();
    assert_eq!(doc["value"], "over tcp");

    session
        .put_attachment("x", "blob.bin", doc["_rev"].as_str(), b"\x00\x01\x02", "application/octet-stream")
        .await
        .unwrap();
    let attachment = session.get_attachment("x", "blob.bin").await.unwrap();
    assert_eq!(&attachment.data[..], b"\x00\x01\x02");

    session.close().await.unwrap();
}

#[tokio::test]
async fn refused_database_creation_reaches_the_opener() {
    let (client, factory) = rig();
    factory.fail_next_create();

    let err = client.open(db("refused")).await.unwrap_err();
    assert_eq!(err.as_remote().unwrap().error, "unauthorized");
    assert_eq!(client.open_connections(), 0);
}
