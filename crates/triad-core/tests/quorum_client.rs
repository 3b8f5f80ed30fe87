//! Quorum fetch scenarios
//!
//! Drives a client against three in-process mock computors and checks the
//! resolution rules: majority agreement resolves, full disagreement rejects,
//! and concurrent identical calls coalesce into one frame per computor.

mod common;

use std::time::Duration;

use common::{test_config, wait_until, MockComputor, Responder};
use tempfile::TempDir;
use triad_core::{Client, ClientError};

fn test_identity() -> String {
    "AB".repeat(32)
}

fn nonce_responder(nonce: u32) -> Responder {
    Box::new(move |text| {
        let value: serde_json::Value = serde_json::from_str(text).unwrap();
        match value["command"].as_u64() {
            Some(1) => vec![serde_json::json!({
                "command": 1,
                "identity": value["identity"],
                "identityNonce": nonce,
            })
            .to_string()],
            _ => Vec::new(),
        }
    })
}

fn energy_responder(energy: u64) -> Responder {
    Box::new(move |text| {
        let value: serde_json::Value = serde_json::from_str(text).unwrap();
        match value["command"].as_u64() {
            Some(2) => vec![serde_json::json!({
                "command": 2,
                "identity": value["identity"],
                "energy": energy,
            })
            .to_string()],
            _ => Vec::new(),
        }
    })
}

async fn spawn_nonce_mocks(nonces: [u32; 3]) -> Vec<MockComputor> {
    let mut mocks = Vec::new();
    for nonce in nonces {
        mocks.push(MockComputor::spawn(nonce_responder(nonce)).await);
    }
    mocks
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn happy_quorum_fetch() {
    let mocks = spawn_nonce_mocks([7, 7, 7]).await;
    let temp = TempDir::new().unwrap();
    let client = Client::connect(test_config(&mocks, &temp)).await.unwrap();

    let nonce = client.fetch_identity_nonce(&test_identity()).await.unwrap();
    assert_eq!(nonce, 7);

    // One outbound frame per computor, no more.
    wait_until(
        || mocks.iter().all(|mock| mock.received_with_command(1) == 1),
        Duration::from_secs(5),
    )
    .await;
    tokio::time::sleep(Duration::from_millis(200)).await;
    for mock in &mocks {
        assert_eq!(mock.received_with_command(1), 1);
    }

    // The pending entry was evicted: a fresh call round-trips again.
    let nonce = client.fetch_identity_nonce(&test_identity()).await.unwrap();
    assert_eq!(nonce, 7);
    wait_until(
        || mocks.iter().all(|mock| mock.received_with_command(1) == 2),
        Duration::from_secs(5),
    )
    .await;

    client.terminate();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn split_result_resolves_with_majority() {
    let mocks = spawn_nonce_mocks([7, 7, 8]).await;
    let temp = TempDir::new().unwrap();
    let client = Client::connect(test_config(&mocks, &temp)).await.unwrap();

    let nonce = client.fetch_identity_nonce(&test_identity()).await.unwrap();
    assert_eq!(nonce, 7);

    client.terminate();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn no_quorum_rejects() {
    let mocks = spawn_nonce_mocks([7, 8, 9]).await;
    let temp = TempDir::new().unwrap();
    let client = Client::connect(test_config(&mocks, &temp)).await.unwrap();

    let result = client.fetch_identity_nonce(&test_identity()).await;
    assert!(matches!(result, Err(ClientError::InvalidResponses)));

    client.terminate();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn concurrent_identical_calls_coalesce() {
    // Silent computors: requests stay pending until we push replies.
    let mocks = vec![
        MockComputor::silent().await,
        MockComputor::silent().await,
        MockComputor::silent().await,
    ];
    let temp = TempDir::new().unwrap();
    let client = Client::connect(test_config(&mocks, &temp)).await.unwrap();

    let first = {
        let client = client.clone();
        tokio::spawn(async move { client.fetch_identity_nonce(&test_identity()).await })
    };
    let second = {
        let client = client.clone();
        tokio::spawn(async move { client.fetch_identity_nonce(&test_identity()).await })
    };

    // Both calls in flight, yet exactly one frame reached each computor.
    wait_until(
        || mocks.iter().all(|mock| mock.received_with_command(1) == 1),
        Duration::from_secs(5),
    )
    .await;
    tokio::time::sleep(Duration::from_millis(200)).await;
    for mock in &mocks {
        assert_eq!(mock.received_with_command(1), 1);
    }

    // Two byte-identical pushed replies resolve both waiters.
    let reply = serde_json::json!({
        "command": 1,
        "identity": test_identity(),
        "identityNonce": 41,
    })
    .to_string();
    mocks[0].push(reply.clone());
    mocks[1].push(reply);

    assert_eq!(first.await.unwrap().unwrap(), 41);
    assert_eq!(second.await.unwrap().unwrap(), 41);

    client.terminate();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn distinct_commands_do_not_coalesce() {
    let mut mocks = Vec::new();
    for _ in 0..3 {
        // Answer both commands so either resolves.
        let mock = MockComputor::spawn(Box::new(|text| {
            let value: serde_json::Value = serde_json::from_str(text).unwrap();
            match value["command"].as_u64() {
                Some(1) => vec![serde_json::json!({
                    "command": 1,
                    "identity": value["identity"],
                    "identityNonce": 3,
                })
                .to_string()],
                Some(2) => vec![serde_json::json!({
                    "command": 2,
                    "identity": value["identity"],
                    "energy": 900,
                })
                .to_string()],
                _ => Vec::new(),
            }
        }))
        .await;
        mocks.push(mock);
    }
    let temp = TempDir::new().unwrap();
    let client = Client::connect(test_config(&mocks, &temp)).await.unwrap();

    let nonce = client.fetch_identity_nonce(&test_identity()).await.unwrap();
    let energy = client.fetch_energy(&test_identity()).await.unwrap();
    assert_eq!(nonce, 3);
    assert_eq!(energy, 900);

    wait_until(
        || {
            mocks.iter().all(|mock| {
                mock.received_with_command(1) == 1 && mock.received_with_command(2) == 1
            })
        },
        Duration::from_secs(5),
    )
    .await;
    tokio::time::sleep(Duration::from_millis(200)).await;
    for mock in &mocks {
        assert_eq!(mock.received_with_command(1), 1);
        assert_eq!(mock.received_with_command(2), 1);
    }

    client.terminate();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn energy_fetch_round_trips() {
    let mut mocks = Vec::new();
    for _ in 0..3 {
        mocks.push(MockComputor::spawn(energy_responder(1234)).await);
    }
    let temp = TempDir::new().unwrap();
    let client = Client::connect(test_config(&mocks, &temp)).await.unwrap();

    let energy = client.fetch_energy(&test_identity()).await.unwrap();
    assert_eq!(energy, 1234);

    client.terminate();
}
