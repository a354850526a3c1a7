mod common;

use std::time::Duration;

use common::{
    address, builder, drain_events, mongos_reply, primary_reply, secondary_reply,
    standalone_reply, wait_for, ScriptedHeartbeater, ScriptedPool,
};
use mongo_topology::{
    ServerMonitoringMode, ServerType, TopologyEvent, TopologyOptions, TopologyType,
};

const WAIT: Duration = Duration::from_secs(60);
const MEMBERS: [&str; 3] = ["a:27017", "b:27017", "c:27017"];

fn tracks(description: &mongo_topology::TopologyDescription, hosts: &[&str]) -> bool {
    description.servers.len() == hosts.len()
        && hosts
            .iter()
            .all(|host| description.servers.contains_key(&address(host)))
}

#[tokio::test(start_paused = true)]
async fn primary_reporting_members_yields_replica_set_with_primary() {
    // Arrange
    let heartbeater = ScriptedHeartbeater::new();
    heartbeater.reply("a:27017", primary_reply("a:27017", &MEMBERS, 1, 1));
    let topology = builder(&["a:27017"], heartbeater.clone(), ScriptedPool::new())
        .set_replica_set_name("rs0")
        .build()
        .unwrap();

    // Act
    wait_for(&topology, WAIT, |d| {
        d.topology_type == TopologyType::ReplicaSetWithPrimary && tracks(d, &MEMBERS)
    })
    .await;

    // Assert
    let description = topology.description();
    assert_eq!(description.primary().unwrap().address, address("a:27017"));
    assert_eq!(description.max_set_version, Some(1));
    assert_eq!(description.set_name.as_deref(), Some("rs0"));

    topology.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn equal_claim_from_another_member_is_rejected() {
    // Arrange
    let heartbeater = ScriptedHeartbeater::new();
    heartbeater.reply("a:27017", primary_reply("a:27017", &MEMBERS, 1, 1));
    let topology = builder(&["a:27017"], heartbeater.clone(), ScriptedPool::new())
        .set_replica_set_name("rs0")
        .build()
        .unwrap();
    wait_for(&topology, WAIT, |d| {
        d.topology_type == TopologyType::ReplicaSetWithPrimary && tracks(d, &MEMBERS)
    })
    .await;

    // Act
    heartbeater.reply("b:27017", primary_reply("b:27017", &MEMBERS, 1, 1));
    topology.request_immediate_check(Some(address("b:27017")));
    wait_for(&topology, WAIT, |d| {
        d.server(&address("b:27017"))
            .and_then(|b| b.error.as_deref())
            .map(|error| error.starts_with("Stale primary claim"))
            .unwrap_or(false)
    })
    .await;

    // Assert
    let description = topology.description();
    assert_eq!(description.primary().unwrap().address, address("a:27017"));
    assert_eq!(
        description.server(&address("b:27017")).unwrap().server_type,
        ServerType::Unknown
    );

    topology.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn newer_claim_takes_over_and_demotes_old_primary() {
    // Arrange
    let heartbeater = ScriptedHeartbeater::new();
    heartbeater.reply("a:27017", primary_reply("a:27017", &MEMBERS, 1, 1));
    let topology = builder(&["a:27017"], heartbeater.clone(), ScriptedPool::new())
        .set_replica_set_name("rs0")
        .build()
        .unwrap();
    wait_for(&topology, WAIT, |d| {
        d.topology_type == TopologyType::ReplicaSetWithPrimary && tracks(d, &MEMBERS)
    })
    .await;

    // Act
    heartbeater.reply("b:27017", primary_reply("b:27017", &MEMBERS, 2, 2));
    topology.request_immediate_check(Some(address("b:27017")));
    wait_for(&topology, WAIT, |d| {
        d.primary().map(|p| p.address == address("b:27017")).unwrap_or(false)
    })
    .await;

    // Assert
    let description = topology.description();
    assert_eq!(description.max_set_version, Some(2));
    assert_eq!(
        description.server(&address("a:27017")).unwrap().server_type,
        ServerType::Unknown
    );
    assert_eq!(
        description
            .servers
            .values()
            .filter(|s| s.server_type == ServerType::RsPrimary)
            .count(),
        1
    );

    topology.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn primary_failure_drops_to_no_primary() {
    // Arrange
    let heartbeater = ScriptedHeartbeater::new();
    heartbeater.reply("a:27017", primary_reply("a:27017", &MEMBERS, 1, 1));
    let topology = builder(&["a:27017"], heartbeater.clone(), ScriptedPool::new())
        .set_replica_set_name("rs0")
        .build()
        .unwrap();
    wait_for(&topology, WAIT, |d| {
        d.topology_type == TopologyType::ReplicaSetWithPrimary
    })
    .await;

    // Act
    heartbeater.fail("a:27017", "connection reset");
    topology.request_immediate_check(Some(address("a:27017")));
    wait_for(&topology, WAIT, |d| {
        d.topology_type == TopologyType::ReplicaSetNoPrimary
    })
    .await;

    // Assert
    let a = topology.description().server(&address("a:27017")).cloned().unwrap();
    assert_eq!(a.server_type, ServerType::Unknown);
    assert!(a.error.is_some());

    topology.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn monitors_follow_the_primary_member_list() {
    // Arrange
    let heartbeater = ScriptedHeartbeater::new();
    heartbeater.reply("a:27017", primary_reply("a:27017", &MEMBERS, 1, 1));
    let topology = builder(&["a:27017"], heartbeater.clone(), ScriptedPool::new())
        .set_replica_set_name("rs0")
        .build()
        .unwrap();
    let mut events = topology.subscribe_events();
    wait_for(&topology, WAIT, |d| tracks(d, &MEMBERS)).await;
    wait_for(&topology, WAIT, |_| heartbeater.checks("c:27017") > 0).await;

    // Act
    heartbeater.reply("a:27017", primary_reply("a:27017", &MEMBERS[..2], 1, 1));
    topology.request_immediate_check(Some(address("a:27017")));
    wait_for(&topology, WAIT, |d| tracks(d, &MEMBERS[..2])).await;
    tokio::time::sleep(Duration::from_millis(10)).await;

    // Assert
    let events = drain_events(&mut events);
    let opened = events
        .iter()
        .filter_map(|event| match event {
            TopologyEvent::ServerOpening { address } => Some(address.clone()),
            _ => None,
        })
        .collect::<Vec<_>>();
    let closed = events
        .iter()
        .filter_map(|event| match event {
            TopologyEvent::ServerClosed { address } => Some(address.clone()),
            _ => None,
        })
        .collect::<Vec<_>>();
    assert_eq!(
        opened,
        vec![address("a:27017"), address("b:27017"), address("c:27017")]
    );
    assert_eq!(closed, vec![address("c:27017")]);

    // A stopped monitor checks no more.
    let checks_after_removal = heartbeater.checks("c:27017");
    tokio::time::sleep(Duration::from_secs(60)).await;
    assert_eq!(heartbeater.checks("c:27017"), checks_after_removal);

    topology.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn secondary_seed_discovers_hinted_primary() {
    // Arrange
    let heartbeater = ScriptedHeartbeater::new();
    heartbeater.reply(
        "b:27017",
        secondary_reply("b:27017", &MEMBERS, Some("a:27017")),
    );
    heartbeater.reply("a:27017", primary_reply("a:27017", &MEMBERS, 1, 1));
    let topology = builder(&["b:27017"], heartbeater.clone(), ScriptedPool::new())
        .build()
        .unwrap();

    // Act
    wait_for(&topology, WAIT, |d| {
        d.topology_type == TopologyType::ReplicaSetWithPrimary
    })
    .await;

    // Assert
    let description = topology.description();
    assert_eq!(description.set_name.as_deref(), Some("rs0"));
    assert_eq!(description.primary().unwrap().address, address("a:27017"));
    assert!(tracks(&description, &MEMBERS));

    topology.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn mongos_seeds_yield_sharded() {
    let heartbeater = ScriptedHeartbeater::new();
    heartbeater.reply("m1:27017", mongos_reply());
    heartbeater.reply("m2:27017", mongos_reply());
    let topology = builder(&["m1", "m2"], heartbeater, ScriptedPool::new())
        .build()
        .unwrap();

    wait_for(&topology, WAIT, |d| {
        d.topology_type == TopologyType::Sharded
            && d.servers.values().all(|s| s.server_type == ServerType::Mongos)
    })
    .await;

    topology.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn lone_standalone_seed_yields_single() {
    let heartbeater = ScriptedHeartbeater::new();
    heartbeater.reply("solo:27017", standalone_reply());
    let topology = builder(&["solo"], heartbeater, ScriptedPool::new())
        .build()
        .unwrap();

    wait_for(&topology, WAIT, |d| d.topology_type == TopologyType::Single).await;
    assert_eq!(
        topology
            .description()
            .server(&address("solo"))
            .unwrap()
            .server_type,
        ServerType::Standalone
    );

    topology.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn stale_application_errors_are_ignored() {
    // Arrange
    let heartbeater = ScriptedHeartbeater::new();
    let mut reply = primary_reply("a:27017", &["a:27017"], 1, 1);
    reply.insert(
        "topologyVersion".to_string(),
        serde_json::json!({ "processId": common::oid(9), "counter": 5 }),
    );
    heartbeater.reply("a:27017", reply);
    let pool = ScriptedPool::new();
    let options = TopologyOptions {
        server_monitoring_mode: ServerMonitoringMode::Poll,
        replica_set_name: Some("rs0".to_string()),
        ..TopologyOptions::default()
    };
    let topology = builder(&["a:27017"], heartbeater, pool.clone())
        .set_options(options)
        .build()
        .unwrap();
    wait_for(&topology, WAIT, |d| {
        d.topology_type == TopologyType::ReplicaSetWithPrimary
    })
    .await;

    let not_primary = |counter: i64| mongo_topology::OperationError::Command {
        code: 10107,
        code_name: "NotWritablePrimary".to_string(),
        message: "not primary".to_string(),
        labels: Vec::new(),
        topology_version: serde_json::from_value(serde_json::json!({
            "processId": common::oid(9),
            "counter": counter
        }))
        .ok(),
    };

    // Act: an error older than what the monitor last saw
    topology
        .handle_application_error(&address("a:27017"), &not_primary(3))
        .await;
    tokio::time::sleep(Duration::from_millis(10)).await;

    // Assert
    assert!(pool.cleared().is_empty());
    assert_eq!(
        topology.description().topology_type,
        TopologyType::ReplicaSetWithPrimary
    );

    // Act: a newer error
    topology
        .handle_application_error(&address("a:27017"), &not_primary(6))
        .await;
    tokio::time::sleep(Duration::from_millis(10)).await;

    // Assert
    assert_eq!(pool.cleared(), vec![address("a:27017")]);

    topology.shutdown().await;
}
