//! Stress testing suite for mongo-user-admin
//!
//! Tests failure handling and recovery under adverse conditions. Everything runs
//! against the in-process fake server except the live cycling test.
//!
//! Run with: cargo test --test stress_tests -- --nocapture

mod common;

use common::{FakeOptions, FakeServer, PlainDialerFactory};
use mongo_user_admin::{Client, ClientConfig, Credential, ErrorKind, TargetDeployment};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpListener;

fn fake_client(server: &FakeServer) -> Client<PlainDialerFactory> {
    Client::with_dialer_factory(
        ClientConfig::new(server.url(), ""),
        PlainDialerFactory::default(),
    )
}

/// Test many concurrent provisioning calls sharing one client
#[tokio::test]
async fn test_stress_concurrent_creates() {
    println!("Test: Concurrent creates");

    let server = FakeServer::start(FakeOptions::default().with_admin()).await;
    let client = Arc::new(fake_client(&server));
    let target = TargetDeployment::new("app");

    let mut handles = Vec::new();
    for i in 0..32 {
        let client = client.clone();
        let target = target.clone();
        handles.push(tokio::spawn(async move {
            client
                .create_user(&target, &Credential::new(format!("svc{}", i), "pw"))
                .await
        }));
    }

    for (i, handle) in handles.into_iter().enumerate() {
        handle.await.unwrap().unwrap_or_else(|e| panic!("create {} failed: {}", i, e));
    }

    for i in 0..32 {
        assert!(server.user("app", &format!("svc{}", i)).is_some());
    }
    assert_eq!(server.connections_opened(), 32);
    assert!(server.wait_idle().await, "sessions left open");
    println!("  32 users created, all sessions closed: ✓");
}

/// Test racing creates of the same user: exactly one wins
#[tokio::test]
async fn test_stress_racing_duplicate_creates() {
    println!("Test: Racing duplicate creates");

    let server = FakeServer::start(FakeOptions::default().with_admin()).await;
    let client = Arc::new(fake_client(&server));

    let mut handles = Vec::new();
    for i in 0..8 {
        let client = client.clone();
        handles.push(tokio::spawn(async move {
            client
                .create_user(
                    &TargetDeployment::new("app"),
                    &Credential::new("shared", format!("pw{}", i)),
                )
                .await
        }));
    }

    let mut created = 0;
    for handle in handles {
        match handle.await.unwrap() {
            Ok(()) => created += 1,
            Err(e) => assert_eq!(e.kind(), ErrorKind::UserAlreadyExists),
        }
    }
    assert_eq!(created, 1);
    println!("  One winner, seven duplicates: ✓");
}

/// Test rapid create/update/delete cycles on one user
#[tokio::test]
async fn test_stress_lifecycle_cycling() {
    println!("Test: Rapid lifecycle cycles");

    let server = FakeServer::start(FakeOptions::default().with_admin()).await;
    let client = fake_client(&server);
    let target = TargetDeployment::new("app");

    for i in 0..10 {
        let password = format!("cycle{}", i);
        client
            .create_user(&target, &Credential::new("svc", &password))
            .await
            .unwrap_or_else(|e| panic!("cycle {} create failed: {}", i, e));
        client
            .update_user(&target, &Credential::new("svc", "rotated"))
            .await
            .unwrap_or_else(|e| panic!("cycle {} update failed: {}", i, e));
        client
            .delete_user(&target, &Credential::new("svc", ""))
            .await
            .unwrap_or_else(|e| panic!("cycle {} delete failed: {}", i, e));
    }

    assert!(server.user("app", "svc").is_none());
    assert!(server.wait_idle().await);
    println!("  Lifecycle cycling: ✓");
}

/// Test invalid connection string handling
#[tokio::test]
async fn test_stress_invalid_connection_string() {
    println!("Test: Invalid connection string");

    for url in ["invalid://connection/string", "mongodb://", "mongodb://host:0/admin"] {
        let err = Client::new(url, "")
            .create_user(&TargetDeployment::new("app"), &Credential::new("svc", "pw"))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ConnectionParse, "{} accepted", url);
    }
    println!("  Invalid connection strings rejected: ✓");
}

/// Test connection to non-existent host
#[tokio::test]
async fn test_stress_connection_refused() {
    println!("Test: Connection refused (host unreachable)");

    let client = Client::with_config(
        ClientConfig::builder("mongodb://nonexistent.invalid:27017/admin", "")
            .connect_timeout(Duration::from_secs(5))
            .build(),
    );
    let err = client
        .delete_user(&TargetDeployment::new("app"), &Credential::new("svc", ""))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Connect);
    println!("  Unreachable host reported as connect error: ✓");
}

/// Test a server that hangs up mid-handshake
#[tokio::test]
async fn test_stress_server_hangs_up() {
    println!("Test: Server closes the socket before replying");

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    tokio::spawn(async move {
        while let Ok((mut socket, _)) = listener.accept().await {
            let _ = socket.shutdown().await;
        }
    });

    let client = Client::with_dialer_factory(
        ClientConfig::new(format!("mongodb://127.0.0.1:{}/admin", port), ""),
        PlainDialerFactory::default(),
    );
    let err = client
        .create_user(&TargetDeployment::new("app"), &Credential::new("svc", "pw"))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Connect);
    println!("  Hang-up reported as connect error: ✓");
}

/// Test a server that answers with garbage
#[tokio::test]
async fn test_stress_garbage_reply() {
    println!("Test: Server replies with a malformed frame");

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    tokio::spawn(async move {
        while let Ok((mut socket, _)) = listener.accept().await {
            // Minimal frame with an unknown opcode
            let mut frame = Vec::new();
            frame.extend_from_slice(&21i32.to_le_bytes());
            frame.extend_from_slice(&1i32.to_le_bytes());
            frame.extend_from_slice(&1i32.to_le_bytes());
            frame.extend_from_slice(&9999i32.to_le_bytes());
            frame.extend_from_slice(&[0u8; 5]);
            let _ = socket.write_all(&frame).await;
            tokio::time::sleep(Duration::from_millis(200)).await;
        }
    });

    let client = Client::with_dialer_factory(
        ClientConfig::new(format!("mongodb://127.0.0.1:{}/admin", port), ""),
        PlainDialerFactory::default(),
    );
    let err = client
        .create_user(&TargetDeployment::new("app"), &Credential::new("svc", "pw"))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Connect);
    println!("  Malformed reply rejected: ✓");
}

/// Test rapid sessions against a real deployment
#[tokio::test]
#[ignore] // Requires a TLS-enabled MongoDB deployment
async fn test_stress_live_cycling() {
    println!("Test: Rapid live lifecycle cycles");

    let Ok(url) = std::env::var("MONGO_ADMIN_URL") else {
        eprintln!("Skipping test: MONGO_ADMIN_URL not set");
        return;
    };
    let ca = std::env::var("MONGO_CA_PEM").unwrap_or_default();
    let client = Client::new(url, ca);
    let target = TargetDeployment::new("mongo_user_admin_test");
    let username = format!("stress_{}", std::process::id());

    for i in 0..10 {
        client
            .update_user(&target, &Credential::new(&username, format!("pw{}", i)))
            .await
            .unwrap_or_else(|e| panic!("cycle {} failed: {}", i, e));
        println!("  Cycle {}: rotated", i);
    }
    client
        .delete_user(&target, &Credential::new(&username, ""))
        .await
        .expect("cleanup failed");

    println!("  Live cycling: ✓");
}
