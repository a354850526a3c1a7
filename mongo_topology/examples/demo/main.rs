//! Runs a topology against an in-memory three-member replica set, fails the primary over to
//! another member, and keeps writing through the executor while it happens.
use std::{
    sync::{Arc, Mutex},
    time::Duration,
};

use async_trait::async_trait;
use mongo_topology::{
    Capabilities, ClientSession, Connection, ConnectionPool, Document, HeartbeatError,
    HeartbeatRequest, Heartbeater, OperationError, RetryableExecutor, RunCommand, ServerAddress,
    Topology, TopologyEvent, TopologyOptions,
};
use serde_json::json;
use tracing::subscriber::set_global_default;
use tracing_bunyan_formatter::{BunyanFormattingLayer, JsonStorageLayer};
use tracing_log::LogTracer;
use tracing_subscriber::{layer::SubscriberExt, EnvFilter, Registry};

const MEMBERS: [&str; 3] = ["db1:27017", "db2:27017", "db3:27017"];

/// Which member is primary, and under which election.
struct Election {
    primary: usize,
    term: u8,
}

#[derive(Clone)]
struct SimulatedReplicaSet {
    election: Arc<Mutex<Election>>,
}

impl SimulatedReplicaSet {
    fn new() -> Self {
        Self {
            election: Arc::new(Mutex::new(Election {
                primary: 0,
                term: 1,
            })),
        }
    }

    fn fail_over(&self, to: usize) {
        if let Ok(mut election) = self.election.lock() {
            election.primary = to;
            election.term += 1;
        }
    }

    fn is_primary(&self, address: &ServerAddress) -> bool {
        self.election
            .lock()
            .map(|election| MEMBERS[election.primary] == address.to_string())
            .unwrap_or(false)
    }

    fn hello(&self, address: &ServerAddress) -> Result<Document, HeartbeatError> {
        let election = self
            .election
            .lock()
            .map_err(|_| HeartbeatError::Network("simulation poisoned".to_string()))?;
        let me = address.to_string();
        let is_primary = MEMBERS[election.primary] == me;
        let reply = json!({
            "ok": 1,
            "isWritablePrimary": is_primary,
            "secondary": !is_primary,
            "setName": "demo",
            "setVersion": election.term,
            "electionId": { "$oid": format!("{:024x}", election.term) },
            "primary": MEMBERS[election.primary],
            "me": me,
            "hosts": MEMBERS,
            "minWireVersion": 0,
            "maxWireVersion": 17,
            "logicalSessionTimeoutMinutes": 30,
        });
        reply
            .as_object()
            .cloned()
            .ok_or_else(|| HeartbeatError::MalformedReply("reply is not a document".to_string()))
    }
}

#[async_trait]
impl Heartbeater for SimulatedReplicaSet {
    async fn check(
        &self,
        address: &ServerAddress,
        _request: HeartbeatRequest,
    ) -> Result<Document, HeartbeatError> {
        tokio::time::sleep(Duration::from_millis(5)).await;
        self.hello(address)
    }
}

#[async_trait]
impl ConnectionPool for SimulatedReplicaSet {
    async fn checkout(
        &self,
        address: &ServerAddress,
    ) -> Result<Box<dyn Connection>, OperationError> {
        Ok(Box::new(SimulatedConnection {
            address: address.clone(),
            replica_set: self.clone(),
        }))
    }

    fn clear(&self, address: &ServerAddress) {
        tracing::info!("Clearing connections to {}", address);
    }
}

struct SimulatedConnection {
    address: ServerAddress,
    replica_set: SimulatedReplicaSet,
}

#[async_trait]
impl Connection for SimulatedConnection {
    fn address(&self) -> &ServerAddress {
        &self.address
    }

    async fn send_command(&mut self, _command: Document) -> Result<Document, OperationError> {
        let reply = if self.replica_set.is_primary(&self.address) {
            json!({ "ok": 1, "n": 1 })
        } else {
            json!({
                "ok": 0,
                "code": 10107,
                "codeName": "NotWritablePrimary",
                "errmsg": "not primary",
                "errorLabels": ["RetryableWriteError"],
            })
        };
        reply
            .as_object()
            .cloned()
            .ok_or_else(|| OperationError::InvalidResponse("reply is not a document".to_string()))
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    setup_tracing();

    let replica_set = SimulatedReplicaSet::new();
    let options = TopologyOptions {
        heartbeat_frequency_ms: 2_000,
        server_selection_timeout_ms: 5_000,
        ..TopologyOptions::default()
    };
    let topology = Topology::builder()
        .set_hosts(&MEMBERS[..1])
        .set_options(options)
        .set_replica_set_name("demo")
        .set_heartbeater(Arc::new(replica_set.clone()))
        .set_connection_pool(Arc::new(replica_set.clone()))
        .build()?;

    let mut events = topology.subscribe_events();
    tokio::spawn(async move {
        while let Ok(event) = events.recv().await {
            if let TopologyEvent::TopologyDescriptionChanged { new, .. } = event {
                println!("topology changed: {}", new);
            }
        }
    });

    let executor = RetryableExecutor::new(topology.clone());
    let mut session = ClientSession::new();
    let insert = RunCommand::new(
        json!({ "insert": "events", "documents": [{ "kind": "demo" }] })
            .as_object()
            .cloned()
            .unwrap_or_default(),
    )?
    .set_capabilities(Capabilities::write().retryable());

    for round in 0..6 {
        if round == 3 {
            println!("failing over to {}", MEMBERS[1]);
            replica_set.fail_over(1);
        }
        match executor.execute(&insert, Some(&mut session)).await {
            Ok(reply) => println!("insert {} succeeded: {:?}", round, reply),
            Err(e) => println!("insert {} failed: {}", round, e),
        }
        tokio::time::sleep(Duration::from_secs(1)).await;
    }

    topology.shutdown().await;
    Ok(())
}

fn setup_tracing() {
    // Redirect all `log`'s events to the subscriber
    LogTracer::init().expect("Failed to set logger");
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let formatting_layer = BunyanFormattingLayer::new("mongo-topology-demo".into(), std::io::stdout);
    let subscriber = Registry::default()
        .with(env_filter)
        .with(JsonStorageLayer)
        .with(formatting_layer);
    set_global_default(subscriber).expect("Failed to set subscriber");
}
