//! Attachment download tests.
//!
//! Files are sent through the coordinator and fetched back over HTTP.

mod common;

use std::sync::Arc;

use axum::http::StatusCode;
use axum_test::TestServer;

use chatrelay::chat::{Payload, ServerEvent, Submission};
use chatrelay::config::ChatConfig;
use chatrelay::file::AttachmentCodec;
use chatrelay::web::{create_router, AppState};

use common::{TestClient, TestRelay};

fn test_server(relay: &TestRelay) -> TestServer {
    let state = Arc::new(AppState::new(Arc::clone(&relay.coordinator), 1024 * 1024));
    TestServer::new(create_router(state, &[])).unwrap()
}

/// Send a file and return the link it was broadcast with.
async fn send_file(relay: &TestRelay, client: &mut TestClient, filename: &str, bytes: &[u8]) -> String {
    relay
        .coordinator
        .send(
            client.conn,
            Submission::File {
                filename: filename.to_string(),
                data: AttachmentCodec::encode(bytes),
            },
        )
        .await
        .unwrap();

    client
        .drain()
        .into_iter()
        .find_map(|event| match event {
            ServerEvent::Message(entry) => match entry.payload {
                Payload::File { link, .. } => link,
                _ => None,
            },
            _ => None,
        })
        .expect("file message with a link")
}

async fn joined_client(relay: &TestRelay, name: &str) -> TestClient {
    let mut client = relay.connect(name).await;
    relay.coordinator.join(client.conn, "files").await.unwrap();
    client.drain();
    client
}

#[tokio::test]
async fn test_sent_file_is_downloadable() {
    let relay = TestRelay::new().await;
    let mut alice = joined_client(&relay, "alice").await;
    let content: Vec<u8> = (0u8..=255).collect();

    let link = send_file(&relay, &mut alice, "blob.bin", &content).await;

    let server = test_server(&relay);
    let response = server.get(&link).await;
    response.assert_status_ok();
    assert_eq!(response.as_bytes().to_vec(), content);
    assert_eq!(
        response.header("content-disposition"),
        "attachment; filename=\"blob.bin\""
    );
}

#[tokio::test]
async fn test_data_url_payload_and_content_type() {
    let relay = TestRelay::new().await;
    let alice = joined_client(&relay, "alice").await;

    relay
        .coordinator
        .send(
            alice.conn,
            Submission::File {
                filename: "note.txt".into(),
                data: "data:text/plain;base64,aGVsbG8=".into(),
            },
        )
        .await
        .unwrap();

    let server = test_server(&relay);
    let response = server.get("/files/1/note.txt").await;
    response.assert_status_ok();
    response.assert_text("hello");
    assert!(response
        .header("content-type")
        .to_str()
        .unwrap()
        .starts_with("text/plain"));
}

#[tokio::test]
async fn test_filename_mismatch_is_not_found() {
    let relay = TestRelay::new().await;
    let mut alice = joined_client(&relay, "alice").await;
    let link = send_file(&relay, &mut alice, "right.txt", b"x").await;
    assert_eq!(link, "/files/1/right.txt");

    let server = test_server(&relay);
    server
        .get("/files/1/wrong.txt")
        .await
        .assert_status(StatusCode::NOT_FOUND);
    server
        .get("/files/99/right.txt")
        .await
        .assert_status(StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_pruning_removes_oldest_surplus() {
    let relay = TestRelay::with_settings(ChatConfig::default(), 2).await;
    let mut alice = joined_client(&relay, "alice").await;

    let mut links = Vec::new();
    for i in 0..5u8 {
        links.push(send_file(&relay, &mut alice, &format!("f{i}.bin"), &[i; 4]).await);
    }

    let server = test_server(&relay);
    for link in &links[..3] {
        server.get(link).await.assert_status(StatusCode::NOT_FOUND);
    }
    for (i, link) in links.iter().enumerate().skip(3) {
        let response = server.get(link).await;
        response.assert_status_ok();
        assert_eq!(response.as_bytes().to_vec(), vec![i as u8; 4]);
    }
}

#[tokio::test]
async fn test_history_carries_file_links() {
    let relay = TestRelay::new().await;
    let mut alice = joined_client(&relay, "alice").await;
    let link = send_file(&relay, &mut alice, "kept.txt", b"abc").await;

    let mut bob = relay.connect("bob").await;
    relay.coordinator.join(bob.conn, "files").await.unwrap();

    match &bob.drain()[0] {
        ServerEvent::Joined { history } => {
            assert_eq!(
                history[0].payload,
                Payload::File {
                    filename: "kept.txt".into(),
                    link: Some(link),
                }
            );
        }
        other => panic!("Expected Joined, got {other:?}"),
    }
}

#[tokio::test]
async fn test_health_check() {
    let relay = TestRelay::new().await;
    let server = test_server(&relay);

    let response = server.get("/health").await;
    response.assert_status_ok();
    response.assert_text("OK");
}
