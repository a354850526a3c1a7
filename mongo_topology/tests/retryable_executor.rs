mod common;

use std::{sync::Arc, time::Duration};

use common::{
    address, builder, document, primary_reply, wait_for, Outcome, ScriptedHeartbeater,
    ScriptedPool,
};
use mongo_topology::{
    Capabilities, ClientSession, OperationError, ReadPreference, RetryableExecutor, RunCommand,
    SelectionCriteria, Topology, TopologyOptions, TopologyType,
};
use serde_json::json;
use tokio::time::Instant;

const MEMBERS: [&str; 1] = ["a:27017"];

async fn replica_set(
    pool: Arc<ScriptedPool>,
    options: TopologyOptions,
) -> (Topology, RetryableExecutor) {
    let heartbeater = ScriptedHeartbeater::new();
    heartbeater.reply("a:27017", primary_reply("a:27017", &MEMBERS, 1, 1));
    let topology = builder(&MEMBERS, heartbeater, pool)
        .set_options(TopologyOptions {
            replica_set_name: Some("rs0".to_string()),
            ..options
        })
        .build()
        .unwrap();
    wait_for(&topology, Duration::from_secs(60), |d| {
        d.topology_type == TopologyType::ReplicaSetWithPrimary
    })
    .await;
    let executor = RetryableExecutor::new(topology.clone());
    (topology, executor)
}

fn insert() -> RunCommand {
    RunCommand::new(document(json!({ "insert": "users", "documents": [{ "name": "ada" }] })))
        .unwrap()
        .set_capabilities(Capabilities::write().retryable())
}

fn find() -> RunCommand {
    RunCommand::new(document(json!({ "find": "users", "filter": {} })))
        .unwrap()
        .set_capabilities(Capabilities::read().retryable())
        .set_read_preference(ReadPreference::primary())
}

#[tokio::test(start_paused = true)]
async fn write_retried_after_network_error_reports_only_success() {
    // Arrange
    let pool = ScriptedPool::new();
    pool.push("a:27017", Outcome::NetworkError);
    let (topology, executor) = replica_set(pool.clone(), TopologyOptions::default()).await;
    let mut session = ClientSession::new();

    // Act
    let reply = executor.execute(&insert(), Some(&mut session)).await;

    // Assert
    let reply = reply.unwrap();
    assert_eq!(reply.get("ok"), Some(&json!(1)));

    let sent = pool.sent();
    assert_eq!(sent.len(), 2);
    for (_, command) in &sent {
        assert_eq!(command.get("txnNumber"), Some(&json!(1)));
        assert_eq!(command.get("lsid"), Some(&session.lsid()));
    }
    assert_eq!(session.txn_number(), 1);

    tokio::time::sleep(Duration::from_millis(10)).await;
    assert_eq!(pool.cleared(), vec![address("a:27017")]);

    topology.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn retry_waits_for_the_failed_primary_to_come_back() {
    // Arrange
    let heartbeater = ScriptedHeartbeater::new();
    heartbeater.reply("a:27017", primary_reply("a:27017", &MEMBERS, 1, 1));
    let pool = ScriptedPool::new();
    pool.push("a:27017", Outcome::NetworkError);
    let topology = builder(&MEMBERS, heartbeater.clone(), pool.clone())
        .set_options(TopologyOptions {
            replica_set_name: Some("rs0".to_string()),
            server_selection_timeout_ms: 2_000,
            ..TopologyOptions::default()
        })
        .build()
        .unwrap();
    wait_for(&topology, Duration::from_secs(60), |d| {
        d.topology_type == TopologyType::ReplicaSetWithPrimary
    })
    .await;
    heartbeater.fail("a:27017", "connection refused");
    let executor = RetryableExecutor::new(topology.clone());
    let mut session = ClientSession::new();
    let started = Instant::now();

    // Act
    let result = executor.execute(&insert(), Some(&mut session)).await;

    // Assert
    assert!(matches!(result, Err(OperationError::Network { .. })));
    assert_eq!(pool.sent().len(), 1);
    assert!(started.elapsed() >= Duration::from_millis(2_000));
    assert_eq!(
        topology.description().topology_type,
        TopologyType::ReplicaSetNoPrimary
    );

    topology.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn reported_error_is_visible_once_the_report_returns() {
    // Arrange
    let pool = ScriptedPool::new();
    let (topology, _executor) = replica_set(pool.clone(), TopologyOptions::default()).await;
    let error = OperationError::Network {
        address: address("a:27017"),
        message: "connection reset by peer".to_string(),
    };

    // Act
    topology
        .handle_application_error(&address("a:27017"), &error)
        .await;

    // Assert
    let description = topology.description();
    assert_eq!(description.topology_type, TopologyType::ReplicaSetNoPrimary);
    assert!(description.server(&address("a:27017")).unwrap().error.is_some());
    assert_eq!(pool.cleared(), vec![address("a:27017")]);

    topology.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn never_more_than_two_attempts() {
    // Arrange
    let pool = ScriptedPool::new();
    for _ in 0..3 {
        pool.push("a:27017", Outcome::NetworkError);
    }
    let (topology, executor) = replica_set(pool.clone(), TopologyOptions::default()).await;
    let mut session = ClientSession::new();

    // Act
    let result = executor.execute(&insert(), Some(&mut session)).await;

    // Assert
    assert!(matches!(result, Err(OperationError::Network { .. })));
    assert_eq!(pool.sent().len(), 2);

    topology.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn non_retryable_command_error_surfaces_immediately() {
    // Arrange
    let pool = ScriptedPool::new();
    pool.push(
        "a:27017",
        Outcome::CommandError {
            code: 11000,
            labels: Vec::new(),
        },
    );
    let (topology, executor) = replica_set(pool.clone(), TopologyOptions::default()).await;
    let mut session = ClientSession::new();

    // Act
    let result = executor.execute(&insert(), Some(&mut session)).await;

    // Assert
    assert!(matches!(
        result,
        Err(OperationError::Command { code: 11000, .. })
    ));
    assert_eq!(pool.sent().len(), 1);
    tokio::time::sleep(Duration::from_millis(10)).await;
    assert!(pool.cleared().is_empty());

    topology.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn labelled_write_error_is_retried() {
    // Arrange
    let pool = ScriptedPool::new();
    pool.push(
        "a:27017",
        Outcome::CommandError {
            code: 112,
            labels: vec!["RetryableWriteError".to_string()],
        },
    );
    let (topology, executor) = replica_set(pool.clone(), TopologyOptions::default()).await;
    let mut session = ClientSession::new();

    // Act
    let result = executor.execute(&insert(), Some(&mut session)).await;

    // Assert
    assert!(result.is_ok());
    assert_eq!(pool.sent().len(), 2);
    // Not a state change, so the topology is left alone.
    tokio::time::sleep(Duration::from_millis(10)).await;
    assert!(pool.cleared().is_empty());

    topology.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn write_without_session_is_not_retried() {
    // Arrange
    let pool = ScriptedPool::new();
    pool.push("a:27017", Outcome::NetworkError);
    let (topology, executor) = replica_set(pool.clone(), TopologyOptions::default()).await;

    // Act
    let result = executor.execute(&insert(), None).await;

    // Assert
    assert!(matches!(result, Err(OperationError::Network { .. })));
    let sent = pool.sent();
    assert_eq!(sent.len(), 1);
    assert!(sent[0].1.get("txnNumber").is_none());

    topology.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn retry_writes_option_disables_retries() {
    // Arrange
    let pool = ScriptedPool::new();
    pool.push("a:27017", Outcome::NetworkError);
    let options = TopologyOptions {
        retry_writes: false,
        ..TopologyOptions::default()
    };
    let (topology, executor) = replica_set(pool.clone(), options).await;
    let mut session = ClientSession::new();

    // Act
    let result = executor.execute(&insert(), Some(&mut session)).await;

    // Assert
    assert!(result.is_err());
    assert_eq!(pool.sent().len(), 1);
    assert_eq!(session.txn_number(), 0);

    topology.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn read_retried_after_state_change_error() {
    // Arrange
    let pool = ScriptedPool::new();
    pool.push(
        "a:27017",
        Outcome::CommandError {
            code: 11602,
            labels: Vec::new(),
        },
    );
    let (topology, executor) = replica_set(pool.clone(), TopologyOptions::default()).await;

    // Act
    let result = executor.execute(&find(), None).await;

    // Assert
    assert!(result.is_ok());
    let sent = pool.sent();
    assert_eq!(sent.len(), 2);
    assert!(sent.iter().all(|(_, command)| command.get("lsid").is_none()));
    tokio::time::sleep(Duration::from_millis(10)).await;
    assert_eq!(pool.cleared(), vec![address("a:27017")]);

    topology.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn cursor_iteration_must_be_pinned() {
    // Arrange
    let pool = ScriptedPool::new();
    let (topology, executor) = replica_set(pool.clone(), TopologyOptions::default()).await;
    let get_more = RunCommand::new(document(json!({ "getMore": 42, "collection": "users" })))
        .unwrap()
        .set_capabilities(Capabilities::read().retryable().cursor_iterating());

    // Act
    let unpinned = executor.execute(&get_more, None).await;
    let pinned = executor
        .execute(
            &get_more
                .clone()
                .set_selection_criteria(SelectionCriteria::Address(address("a:27017"))),
            None,
        )
        .await;

    // Assert
    assert!(matches!(unpinned, Err(OperationError::InvalidArgument(_))));
    assert!(pinned.is_ok());
    assert_eq!(pool.sent().len(), 1);

    topology.shutdown().await;
}
